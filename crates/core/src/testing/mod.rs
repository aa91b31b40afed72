//! Testing utilities and mock implementations of every collaborator.
//!
//! The mocks let the whole lifecycle run without a peer-to-peer engine,
//! yt-dlp or ffmpeg installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobhub_core::testing::{fixtures, MockExtractor, MockPeerEngine, MockTranscoder};
//!
//! let engine = MockPeerEngine::new();
//! engine.set_default_metadata(fixtures::torrent_metadata("Show", &[1000, 2000], 100)).await;
//!
//! let collaborators = fixtures::collaborators(&engine, &MockExtractor::new(), &MockTranscoder::new());
//! ```

mod mock_engine;
mod mock_extractor;
mod mock_sink;
mod mock_transcoder;

pub use mock_engine::{MockEngineHandle, MockPeerEngine};
pub use mock_extractor::MockExtractor;
pub use mock_sink::RecordingSink;
pub use mock_transcoder::{MockTranscoder, MOCK_THUMBNAIL};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{MockExtractor, MockPeerEngine, MockTranscoder};
    use crate::engine::{TorrentFile, TorrentMetadata};
    use crate::lifecycle::{Collaborators, LifecycleSettings};
    use crate::pipeline::PipelineSettings;

    /// Metadata of a torrent named `name` with one file per entry of `sizes`.
    ///
    /// Files are `{name}/file{index}.mkv`, laid out back to back.
    pub fn torrent_metadata(name: &str, sizes: &[u64], piece_length: u64) -> TorrentMetadata {
        TorrentMetadata {
            name: name.to_string(),
            info_hash: "0123456789abcdef0123456789abcdef01234567".to_string(),
            total_size: sizes.iter().sum(),
            piece_length: Some(piece_length),
            files: sizes
                .iter()
                .enumerate()
                .map(|(index, size)| TorrentFile {
                    index,
                    path: format!("{}/file{}.mkv", name, index),
                    size: *size,
                    offset: 0,
                })
                .collect(),
        }
        .with_sequential_offsets()
    }

    /// Settings with millisecond poll intervals, storing under `root`.
    pub fn fast_settings(root: &Path) -> LifecycleSettings {
        LifecycleSettings {
            transfer_poll_interval: Duration::from_millis(10),
            conversion_poll_interval: Duration::from_millis(10),
            command_buffer: 8,
            downloads_dir: root.join("downloads"),
            pipeline: PipelineSettings {
                thumbnail_min_bytes: 1024 * 1024,
                early_thumbnail_threshold_pct: 10.0,
                thumbnail_timestamp_secs: 5,
                thumbnails_dir: root.join("thumbnails"),
            },
        }
    }

    pub fn collaborators(
        engine: &MockPeerEngine,
        extractor: &MockExtractor,
        transcoder: &MockTranscoder,
    ) -> Collaborators {
        Collaborators {
            engine: Arc::new(engine.clone()),
            extractor: Arc::new(extractor.clone()),
            transcoder: Arc::new(transcoder.clone()),
        }
    }
}
