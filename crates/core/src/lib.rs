pub mod config;
pub mod engine;
pub mod extractor;
pub mod job;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod testing;
pub mod transcoder;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use engine::{
    parse_magnet, parse_torrent_file, EngineError, EngineHandle, LibrqbitEngine, PeerEngine,
    QBittorrentEngine, TorrentMetadata, TorrentSource,
};
pub use extractor::{MediaExtractor, MediaMetadata, YtDlpExtractor};
pub use job::{
    FileEntry, FilePriority, Job, JobCategory, JobPatch, JobStatus, JobStore, MemoryJobStore,
    Retention, SqliteJobStore, StoreError,
};
pub use lifecycle::{
    spawn_purge_loop, Collaborators, ConversionRequest, JobError, JobManager, LifecycleSettings,
    TorrentRequest, TransferRequest,
};
pub use notify::{ChannelSink, EventSink, Fanout, JobEvent, WebhookSink};
pub use transcoder::{FfmpegTranscoder, HttpTranscoder, Transcoder};
