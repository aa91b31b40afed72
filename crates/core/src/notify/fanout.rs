use std::sync::Arc;

use tracing::warn;

use super::event::JobEvent;
use super::sink::EventSink;
use crate::job::Job;
use crate::metrics;

/// Forwards every job write to the configured sinks.
///
/// Sink failures are logged and counted, never returned.
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn write(&self, job: &Job) {
        if self.sinks.is_empty() {
            return;
        }
        let event = JobEvent::from(job);
        for sink in &self.sinks {
            if let Err(e) = sink.publish(&event).await {
                warn!(job_id = %job.id, sink = sink.name(), error = %e, "Failed to publish job update");
                metrics::FANOUT_FAILURES
                    .with_label_values(&[sink.name()])
                    .inc();
            }
        }
    }
}
