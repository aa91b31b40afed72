use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use super::event::{JobEvent, JOBS_CHANNEL, JOB_UPDATED_EVENT};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink request failed: {0}")]
    Request(String),

    #[error("Sink responded with HTTP {0}")]
    Status(u16),
}

/// Destination for job update events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &str;

    async fn publish(&self, event: &JobEvent) -> Result<(), SinkError>;
}

/// In-process broadcast, consumed by WebSocket clients.
///
/// Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<JobEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn publish(&self, event: &JobEvent) -> Result<(), SinkError> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    channel: &'a str,
    event: &'a str,
    data: &'a JobEvent,
}

/// POSTs every event to an external broadcaster.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, event: &JobEvent) -> Result<(), SinkError> {
        let envelope = Envelope {
            channel: JOBS_CHANNEL,
            event: JOB_UPDATED_EVENT,
            data: event,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
