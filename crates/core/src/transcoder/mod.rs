//! Transcoding collaborator.
//!
//! A `Transcoder` accepts a conversion, hands back a sub-job id and reports
//! the sub-job's status on demand. It can also cut a single thumbnail frame.
//!
//! - `FfmpegTranscoder` runs ffmpeg in-process
//! - `HttpTranscoder` delegates to a remote converter service

mod config;
mod ffmpeg;
mod http;
mod profiles;
mod types;

pub use config::{FfmpegTranscoderConfig, HttpTranscoderConfig};
pub use ffmpeg::FfmpegTranscoder;
pub use http::HttpTranscoder;
pub use profiles::{
    builtin_profiles, is_supported_format, normalize_target_format, OutputProfile,
    ORIGINAL_FORMAT,
};
pub use types::{
    derived_sub_job_id, SubJobState, SubJobStatus, TranscodeRequest, Transcoder, TranscoderError,
};
