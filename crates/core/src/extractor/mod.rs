//! Link/media extractor abstraction.

mod config;
mod types;
mod ytdlp;

pub use config::ExtractorConfig;
pub use types::*;
pub use ytdlp::YtDlpExtractor;
