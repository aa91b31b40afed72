//! Notification fanout.
//!
//! Every job write is projected into a [`JobEvent`] and handed to each
//! configured [`EventSink`]. The per-job store channel is published by the
//! store itself.

mod event;
mod fanout;
mod sink;

pub use event::{EventMetadata, JobEvent, JOBS_CHANNEL, JOB_UPDATED_EVENT};
pub use fanout::Fanout;
pub use sink::{ChannelSink, EventSink, SinkError, WebhookSink};
