//! Parse-only torrent endpoints: inspect a descriptor without creating a job.

use axum::{extract::Multipart, Json};
use serde::Deserialize;

use jobhub_core::engine::MagnetInfo;
use jobhub_core::{parse_magnet, parse_torrent_file, JobError, TorrentMetadata};

use super::error::ApiError;
use super::jobs::read_torrent_form;

#[derive(Debug, Deserialize)]
pub struct ParseMagnetBody {
    pub uri: String,
}

pub async fn parse_magnet_uri(
    Json(body): Json<ParseMagnetBody>,
) -> Result<Json<MagnetInfo>, ApiError> {
    parse_magnet(&body.uri)
        .map(Json)
        .map_err(|e| JobError::InvalidInput(e.to_string()).into())
}

pub async fn parse_file(multipart: Multipart) -> Result<Json<TorrentMetadata>, ApiError> {
    let form = read_torrent_form(multipart).await?;
    parse_torrent_file(&form.data)
        .map(Json)
        .map_err(|e| JobError::InvalidInput(e.to_string()).into())
}
