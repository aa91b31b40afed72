use jobhub_core::{ChannelSink, Config, JobManager, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    manager: JobManager,
    events: ChannelSink,
}

impl AppState {
    pub fn new(config: Config, manager: JobManager, events: ChannelSink) -> Self {
        Self {
            config,
            manager,
            events,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// In-process job update stream feeding WebSocket clients.
    pub fn events(&self) -> &ChannelSink {
        &self.events
    }
}
