//! Thumbnail candidate selection and the once-per-job guard.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Extensions a thumbnail can be cut from.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "webm", "flv", "m4v", "mpg", "mpeg", "ts", "m2ts",
];

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// First media file, in the given order, with more than `min_bytes` on disk.
///
/// A smaller file is most likely still being written.
pub async fn select_candidate(paths: &[PathBuf], min_bytes: u64) -> Option<PathBuf> {
    for path in paths.iter().filter(|p| is_media_file(p)) {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.is_file() && meta.len() > min_bytes {
                return Some(path.clone());
            }
        }
    }
    None
}

const IDLE: u8 = 0;
const CLAIMED: u8 = 1;
const DONE: u8 = 2;

/// Makes thumbnail generation effectively single-fire per job.
///
/// The early trigger and the completion trigger both go through the same
/// guard: whoever claims it first generates, a claim dropped without
/// success releases the guard for the next attempt, and once a thumbnail
/// is recorded every later claim is refused.
///
/// The early trigger gets one extraction attempt per job; after that only
/// the completion trigger may try.
#[derive(Debug, Default)]
pub struct ThumbnailGuard {
    state: AtomicU8,
    early_attempted: AtomicBool,
}

impl ThumbnailGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to generate. `None` when claimed or done already.
    pub fn try_claim(&self) -> Option<ThumbnailClaim<'_>> {
        self.state
            .compare_exchange(IDLE, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ThumbnailClaim {
                guard: self,
                completed: false,
            })
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    pub fn early_attempted(&self) -> bool {
        self.early_attempted.load(Ordering::Acquire)
    }

    pub fn mark_early_attempted(&self) {
        self.early_attempted.store(true, Ordering::Release);
    }

    /// Record that a thumbnail exists without generating one.
    pub fn mark_done(&self) {
        self.state.store(DONE, Ordering::Release);
    }
}

/// Outstanding claim on a [`ThumbnailGuard`].
pub struct ThumbnailClaim<'a> {
    guard: &'a ThumbnailGuard,
    completed: bool,
}

impl ThumbnailClaim<'_> {
    pub fn complete(mut self) {
        self.completed = true;
        self.guard.mark_done();
    }
}

impl Drop for ThumbnailClaim<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.guard.state.store(IDLE, Ordering::Release);
        }
    }
}
