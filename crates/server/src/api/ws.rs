//! WebSocket stream of job updates.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use jobhub_core::notify::{JOBS_CHANNEL, JOB_UPDATED_EVENT};
use jobhub_core::JobEvent;

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Frame sent to clients; same envelope as the webhook sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    pub channel: String,
    pub event: String,
    pub data: JobEvent,
}

impl From<JobEvent> for WsMessage {
    fn from(data: JobEvent) -> Self {
        Self {
            channel: JOBS_CHANNEL.to_string(),
            event: JOB_UPDATED_EVENT.to_string(),
            data,
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let job_id = event.job_id.clone();
                    let message = WsMessage::from(event);
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                            WS_MESSAGES_SENT
                                .with_label_values(&[JOB_UPDATED_EVENT])
                                .inc();
                        }
                        Err(e) => {
                            error!(job_id = %job_id, error = %e, "Failed to serialize job event");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // The next event of each job carries its full state
                    warn!("WebSocket client lagged, skipped {} messages", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Job event channel closed");
                    break;
                }
            }
        }
    });

    // Only close frames matter from the client
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
