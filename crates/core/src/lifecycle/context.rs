use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::registry::HandleRegistry;
use crate::config::Config;
use crate::engine::PeerEngine;
use crate::extractor::MediaExtractor;
use crate::job::JobStore;
use crate::notify::Fanout;
use crate::pipeline::{CompletionPipeline, PipelineSettings};
use crate::transcoder::Transcoder;

/// Timing and placement knobs of the lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub transfer_poll_interval: Duration,
    pub conversion_poll_interval: Duration,
    pub command_buffer: usize,
    /// Where the extractor writes downloads.
    pub downloads_dir: PathBuf,
    pub pipeline: PipelineSettings,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transfer_poll_interval: Duration::from_millis(
                config.lifecycle.transfer_poll_interval_ms,
            ),
            conversion_poll_interval: Duration::from_millis(
                config.lifecycle.conversion_poll_interval_ms,
            ),
            command_buffer: config.lifecycle.command_buffer.max(1),
            downloads_dir: config.storage.downloads_dir(),
            pipeline: PipelineSettings::from_config(config),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The collaborators jobs are executed with.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn PeerEngine>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub transcoder: Arc<dyn Transcoder>,
}

/// Everything a monitoring task shares with the manager.
pub(crate) struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub fanout: Fanout,
    pub registry: Arc<HandleRegistry>,
    pub collaborators: Collaborators,
    pub pipeline: CompletionPipeline,
    pub settings: LifecycleSettings,
}
