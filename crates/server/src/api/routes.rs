use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use jobhub_core::pipeline::THUMBNAIL_URL_PREFIX;

use super::{handlers, jobs, media, middleware::metrics_middleware, torrents, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let thumbnails_dir = state.config().storage.thumbnails_dir();

    let api_routes = Router::new()
        // Health, config, metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        .route("/profiles", get(handlers::list_profiles))
        // Job submission
        .route("/jobs/transfer", post(jobs::submit_transfer))
        .route("/jobs/torrent/magnet", post(jobs::submit_magnet))
        .route("/jobs/torrent/file", post(jobs::submit_torrent_file))
        .route("/jobs/transcode", post(jobs::submit_transcode))
        // Job queries and control
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/{id}/wait", get(jobs::wait_job))
        .route("/jobs/{id}/select", post(jobs::select_files))
        .route("/jobs/{id}/pause", post(jobs::pause_job))
        .route("/jobs/{id}/resume", post(jobs::resume_job))
        // Descriptor inspection
        .route("/torrents/parse/magnet", post(torrents::parse_magnet_uri))
        .route("/torrents/parse/file", post(torrents::parse_file))
        // Extractor metadata
        .route("/media/info", get(media::media_info))
        // Live updates
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest_service(THUMBNAIL_URL_PREFIX, ServeDir::new(thumbnails_dir))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
