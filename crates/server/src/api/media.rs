use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use jobhub_core::MediaMetadata;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MediaInfoQuery {
    pub url: String,
}

/// Title, thumbnail, duration and formats of a URL.
pub async fn media_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaInfoQuery>,
) -> Result<Json<MediaMetadata>, ApiError> {
    Ok(Json(state.manager().media_info(&query.url).await?))
}
