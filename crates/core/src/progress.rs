//! Progress estimation from engine counters.
//!
//! Everything here is a pure function of its inputs: no smoothing, no
//! memory of earlier readings. A lower value than last time is returned
//! as-is.

use std::ops::RangeInclusive;

use crate::engine::{EngineStatus, TorrentMetadata};
use crate::job::{FileEntry, FilePriority};

/// Which pieces of a torrent are already owned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceBitfield {
    pieces: Vec<bool>,
}

/// qBittorrent's `pieceStates` code for a downloaded piece.
const QB_PIECE_DOWNLOADED: i64 = 2;

impl PieceBitfield {
    pub fn new(pieces: Vec<bool>) -> Self {
        Self { pieces }
    }

    /// Build from qBittorrent piece states (0 = missing, 1 = downloading, 2 = owned).
    pub fn from_qbittorrent_states(states: &[i64]) -> Self {
        Self {
            pieces: states.iter().map(|s| *s == QB_PIECE_DOWNLOADED).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn has(&self, piece: u64) -> bool {
        usize::try_from(piece)
            .ok()
            .and_then(|i| self.pieces.get(i))
            .copied()
            .unwrap_or(false)
    }

    /// Owned pieces within `range`. Indices past the end count as missing.
    pub fn count_owned(&self, range: RangeInclusive<u64>) -> u64 {
        range.filter(|piece| self.has(*piece)).count() as u64
    }
}

/// Denominator for a byte-stream transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteTotal {
    Exact(u64),
    Estimate(u64),
    Unknown,
}

impl ByteTotal {
    /// Prefer the exact size, fall back to the estimate.
    pub fn from_parts(exact: Option<u64>, estimate: Option<u64>) -> Self {
        match (exact, estimate) {
            (Some(total), _) if total > 0 => ByteTotal::Exact(total),
            (_, Some(estimate)) if estimate > 0 => ByteTotal::Estimate(estimate),
            _ => ByteTotal::Unknown,
        }
    }

    fn value(&self) -> Option<u64> {
        match self {
            ByteTotal::Exact(n) | ByteTotal::Estimate(n) => Some(*n),
            ByteTotal::Unknown => None,
        }
    }
}

/// `min(100, 100 * done / total)`, or 0 while the total is unknown.
pub fn byte_progress(done: u64, total: ByteTotal) -> f64 {
    match total.value() {
        Some(total) if total > 0 => (100.0 * done as f64 / total as f64).min(100.0),
        _ => 0.0,
    }
}

/// Inclusive piece range covered by the byte range `[offset, offset + size)`.
///
/// `None` for empty files or a zero piece length.
pub fn piece_range(offset: u64, size: u64, piece_length: u64) -> Option<RangeInclusive<u64>> {
    if size == 0 || piece_length == 0 {
        return None;
    }
    let first = offset / piece_length;
    let last = (offset + size - 1) / piece_length;
    Some(first..=last)
}

/// Per-file progress from owned pieces: `100 * owned / range_length`.
pub fn file_progress(offset: u64, size: u64, piece_length: u64, pieces: &PieceBitfield) -> f64 {
    let Some(range) = piece_range(offset, size, piece_length) else {
        return 0.0;
    };
    let range_length = range.end() - range.start() + 1;
    let owned = pieces.count_owned(range);
    100.0 * owned as f64 / range_length as f64
}

/// Per-file progress when the engine reports bytes instead of pieces.
pub fn file_progress_from_bytes(done: u64, size: u64) -> f64 {
    if size == 0 {
        return 0.0;
    }
    byte_progress(done, ByteTotal::Exact(size))
}

/// Job-level progress: the engine's own global completion ratio.
pub fn job_progress(status: &EngineStatus) -> f64 {
    let pct = status.global_progress * 100.0;
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

/// Rebuild the file entries of a multi-file job.
///
/// `priorities` is indexed by file index; missing entries mean skip.
/// Skipped files always report 0.
pub fn file_entries(
    metadata: &TorrentMetadata,
    priorities: &[FilePriority],
    status: &EngineStatus,
) -> Vec<FileEntry> {
    metadata
        .files
        .iter()
        .map(|file| {
            let priority = priorities.get(file.index).copied().unwrap_or_default();
            let progress = if !priority.is_selected() {
                0.0
            } else if let (Some(pieces), Some(piece_length)) =
                (status.pieces.as_ref(), metadata.piece_length)
            {
                file_progress(file.offset, file.size, piece_length, pieces)
            } else if let Some(done) = status.file_bytes.as_ref().and_then(|b| b.get(file.index))
            {
                file_progress_from_bytes(*done, file.size)
            } else {
                0.0
            };

            FileEntry {
                index: file.index,
                path: file.path.clone(),
                size: file.size,
                priority,
                progress,
            }
        })
        .collect()
}
