//! Job lifecycle integration tests.
//!
//! These tests drive the job manager end to end against mock collaborators
//! with millisecond poll intervals:
//! - Selective transfers: metadata, selection, pause/resume, completion
//! - Simple transfers through the extractor, with and without conversion
//! - Thumbnail generation and its once-per-job guard
//! - Failure paths: engine errors, panics, orphaned records, removal

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, Instant};

use jobhub_core::{
    extractor::{MediaMetadata, TransferProgress},
    job::{FilePriority, Job, JobCategory, JobPatch, JobStatus, JobStore, MemoryJobStore},
    lifecycle::{
        ConversionRequest, JobError, JobManager, TorrentRequest, TransferRequest, ORPHANED_REASON,
    },
    notify::Fanout,
    pipeline::{CompletionPipeline, ThumbnailGuard, ThumbnailTrigger},
    testing::{fixtures, MockExtractor, MockPeerEngine, MockTranscoder, RecordingSink},
    transcoder::SubJobStatus,
    TorrentSource,
};

const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Show";

/// Test helper wiring a job manager to mocks.
struct TestHarness {
    manager: JobManager,
    engine: MockPeerEngine,
    extractor: MockExtractor,
    transcoder: MockTranscoder,
    sink: RecordingSink,
    store: Arc<MemoryJobStore>,
    dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let engine = MockPeerEngine::with_save_path(dir.path().join("torrents"));
        let extractor = MockExtractor::new();
        let transcoder = MockTranscoder::new();
        let sink = RecordingSink::new();
        let store = Arc::new(MemoryJobStore::default());

        let manager = JobManager::new(
            store.clone(),
            fixtures::collaborators(&engine, &extractor, &transcoder),
            Fanout::new().with_sink(Arc::new(sink.clone())),
            fixtures::fast_settings(dir.path()),
        );

        Self {
            manager,
            engine,
            extractor,
            transcoder,
            sink,
            store,
            dir,
        }
    }

    /// Three files of 1000, 2000 and 3000 bytes, piece length 100.
    async fn with_three_files(self) -> Self {
        self.engine
            .set_default_metadata(fixtures::torrent_metadata("Show", &[1000, 2000, 3000], 100))
            .await;
        self
    }

    async fn submit_magnet(&self, job_id: &str) -> Job {
        self.manager
            .submit_torrent(
                TorrentRequest::new(TorrentSource::Magnet(MAGNET.to_string())).with_job_id(job_id),
            )
            .await
            .expect("Failed to submit torrent")
    }

    async fn submit_magnet_with_format(&self, job_id: &str, format: &str) -> Job {
        self.manager
            .submit_torrent(
                TorrentRequest::new(TorrentSource::Magnet(MAGNET.to_string()))
                    .with_job_id(job_id)
                    .with_target_format(format),
            )
            .await
            .expect("Failed to submit torrent")
    }

    /// Where the mock engine puts a job's files.
    fn torrent_file(&self, job_id: &str, index: usize) -> PathBuf {
        self.dir
            .path()
            .join("torrents")
            .join(job_id)
            .join("Show")
            .join(format!("file{}.mkv", index))
    }

    fn write_file(&self, path: &Path, size: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; size]).unwrap();
    }

    async fn wait_for(&self, job_id: &str, what: &str, predicate: impl Fn(&Job) -> bool) -> Job {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(job) = self.manager.get_status(job_id) {
                if predicate(&job) {
                    return job;
                }
            }
            if Instant::now() > deadline {
                panic!(
                    "Timed out waiting for {} on {}: {:?}",
                    what,
                    job_id,
                    self.manager.get_status(job_id)
                );
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_status(&self, job_id: &str, status: JobStatus) -> Job {
        self.wait_for(job_id, status.as_str(), |j| j.status == status)
            .await
    }

    async fn wait_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.manager.active_count() > 0 {
            assert!(Instant::now() < deadline, "monitoring tasks did not stop");
            sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Bencoded single-file `.torrent` with zeroed piece hashes.
fn torrent_bytes(name: &str, length: u64, piece_length: u64) -> Vec<u8> {
    let pieces = length.div_ceil(piece_length) as usize;
    let mut out = Vec::new();
    out.extend_from_slice(b"d4:infod");
    out.extend_from_slice(format!("6:lengthi{}e", length).as_bytes());
    out.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
    out.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    out.extend_from_slice(format!("6:pieces{}:", pieces * 20).as_bytes());
    out.extend(std::iter::repeat(0u8).take(pieces * 20));
    out.extend_from_slice(b"ee");
    out
}

fn priorities(job: &Job) -> Vec<FilePriority> {
    job.files.iter().map(|f| f.priority).collect()
}

// ============================================================================
// Selective transfers
// ============================================================================

#[tokio::test]
async fn test_scenario_a_metadata_then_selection() {
    let h = TestHarness::new().with_three_files().await;
    let submitted = h.submit_magnet("scen-a").await;
    assert_eq!(submitted.category, JobCategory::SelectiveTransfer);
    assert_eq!(submitted.name, "Show");

    let job = h.wait_status("scen-a", JobStatus::AwaitingSelection).await;
    assert_eq!(job.files.len(), 3);
    assert_eq!(job.total_size, Some(6000));
    assert_eq!(priorities(&job), vec![FilePriority::Skip; 3]);
    assert!(job.files.iter().all(|f| f.progress == 0.0));
    assert!(h.engine.pause_calls("scen-a").await >= 1);
    assert!(h
        .engine
        .priorities("scen-a")
        .await
        .values()
        .all(|p| *p == FilePriority::Skip));

    let job = h.manager.select_files("scen-a", vec![1]).await.unwrap();
    assert_eq!(job.status, JobStatus::Transferring);
    assert_eq!(
        priorities(&job),
        vec![FilePriority::Skip, FilePriority::High, FilePriority::Skip]
    );

    let engine_priorities = h.engine.priorities("scen-a").await;
    assert_eq!(engine_priorities[&0], FilePriority::Skip);
    assert_eq!(engine_priorities[&1], FilePriority::High);
    assert_eq!(engine_priorities[&2], FilePriority::Skip);
    assert_eq!(h.engine.resume_calls("scen-a").await, 1);
}

#[tokio::test]
async fn test_selection_out_of_range_changes_nothing() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("bad-index").await;
    h.wait_status("bad-index", JobStatus::AwaitingSelection).await;

    let err = h
        .manager
        .select_files("bad-index", vec![0, 3])
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidInput(_)), "got {:?}", err);

    let job = h.manager.get_status("bad-index").unwrap();
    assert_eq!(job.status, JobStatus::AwaitingSelection);
    assert_eq!(priorities(&job), vec![FilePriority::Skip; 3]);
    assert_eq!(h.engine.resume_calls("bad-index").await, 0);
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("empty-sel").await;
    h.wait_status("empty-sel", JobStatus::AwaitingSelection).await;

    let err = h.manager.select_files("empty-sel", vec![]).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidInput(_)));
}

#[tokio::test]
async fn test_selection_before_metadata_is_invalid_state() {
    let h = TestHarness::new();
    h.submit_magnet("no-meta").await;
    h.wait_status("no-meta", JobStatus::FetchingMetadata).await;

    let err = h.manager.select_files("no-meta", vec![0]).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState(_)), "got {:?}", err);

    // Stays put until metadata shows up
    h.engine
        .set_metadata("no-meta", fixtures::torrent_metadata("Show", &[10, 20], 16))
        .await;
    let job = h.wait_status("no-meta", JobStatus::AwaitingSelection).await;
    assert_eq!(job.files.len(), 2);
}

#[tokio::test]
async fn test_reselection_while_transferring() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("resel").await;
    h.wait_status("resel", JobStatus::AwaitingSelection).await;
    h.manager.select_files("resel", vec![0]).await.unwrap();

    let job = h.manager.select_files("resel", vec![1, 2]).await.unwrap();
    assert_eq!(job.status, JobStatus::Transferring);
    assert_eq!(
        priorities(&job),
        vec![FilePriority::Skip, FilePriority::High, FilePriority::High]
    );
    // Only the first selection resumes the engine
    assert_eq!(h.engine.resume_calls("resel").await, 1);
}

#[tokio::test]
async fn test_file_progress_from_pieces() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("pieces").await;
    h.wait_status("pieces", JobStatus::AwaitingSelection).await;
    h.manager.select_files("pieces", vec![0, 1]).await.unwrap();

    // File 0 spans pieces 0-9, file 1 spans 10-29
    let mut owned = vec![false; 60];
    for piece in owned.iter_mut().take(15) {
        *piece = true;
    }
    h.engine
        .set_pieces("pieces", jobhub_core::progress::PieceBitfield::new(owned))
        .await;
    h.engine.set_progress("pieces", 0.25).await;

    let job = h
        .wait_for("pieces", "piece progress", |j| j.progress == 25.0)
        .await;
    assert_eq!(job.files[0].progress, 100.0);
    assert_eq!(job.files[1].progress, 25.0);
    assert_eq!(job.files[2].progress, 0.0);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("pr").await;
    h.wait_status("pr", JobStatus::AwaitingSelection).await;

    let err = h.manager.pause("pr").await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState(_)));

    h.manager.select_files("pr", vec![2]).await.unwrap();
    let pauses_before = h.engine.pause_calls("pr").await;

    let job = h.manager.pause("pr").await.unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(h.engine.pause_calls("pr").await, pauses_before + 1);

    // Idempotent
    let job = h.manager.pause("pr").await.unwrap();
    assert_eq!(job.status, JobStatus::Paused);

    let job = h.manager.resume("pr").await.unwrap();
    assert_eq!(job.status, JobStatus::Transferring);
    assert_eq!(h.engine.resume_calls("pr").await, 2);
}

#[tokio::test]
async fn test_pause_rejected_for_simple_transfer() {
    let h = TestHarness::new();
    h.extractor
        .set_steps(vec![TransferProgress::default()], Duration::from_secs(5))
        .await;
    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/1").with_job_id("simple"))
        .await
        .unwrap();

    let err = h.manager.pause("simple").await.unwrap_err();
    assert!(matches!(err, JobError::InvalidInput(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_engine_error_fails_job() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("broken").await;
    h.wait_status("broken", JobStatus::AwaitingSelection).await;
    h.manager.select_files("broken", vec![0]).await.unwrap();

    h.engine.set_error("broken", "tracker unreachable").await;
    let job = h.wait_status("broken", JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("tracker unreachable"));

    h.wait_idle().await;
    let err = h.manager.resume("broken").await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState(_)), "got {:?}", err);

    // Terminal is never followed by anything else
    let statuses = h.sink.statuses_for("broken").await;
    assert_eq!(statuses.last(), Some(&JobStatus::Failed));
    assert_eq!(
        statuses,
        vec![
            JobStatus::Pending,
            JobStatus::FetchingMetadata,
            JobStatus::AwaitingSelection,
            JobStatus::Transferring,
            JobStatus::Failed,
        ]
    );
}

#[tokio::test]
async fn test_engine_error_while_awaiting_selection() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("idle-err").await;
    h.wait_status("idle-err", JobStatus::AwaitingSelection).await;

    h.engine.set_error("idle-err", "disk full").await;
    let job = h.wait_status("idle-err", JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("disk full"));
    h.wait_idle().await;
}

#[tokio::test]
async fn test_engine_error_while_paused() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("paused-err").await;
    h.wait_status("paused-err", JobStatus::AwaitingSelection).await;
    h.manager.select_files("paused-err", vec![0]).await.unwrap();
    h.manager.pause("paused-err").await.unwrap();

    // Paused jobs keep their progress
    h.engine.set_progress("paused-err", 0.4).await;
    sleep(Duration::from_millis(50)).await;
    let job = h.manager.get_status("paused-err").unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.progress, 0.0);

    h.engine.set_error("paused-err", "tracker unreachable").await;
    let job = h.wait_status("paused-err", JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("tracker unreachable"));
}

#[tokio::test]
async fn test_torrent_dropped_by_engine_fails_idle_jobs() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("dropped-a").await;
    h.submit_magnet("dropped-b").await;
    h.wait_status("dropped-a", JobStatus::AwaitingSelection).await;
    h.wait_status("dropped-b", JobStatus::AwaitingSelection).await;
    h.manager.select_files("dropped-b", vec![1]).await.unwrap();
    h.manager.pause("dropped-b").await.unwrap();

    h.engine.forget("dropped-a").await;
    h.engine.forget("dropped-b").await;

    for id in ["dropped-a", "dropped-b"] {
        let job = h.wait_status(id, JobStatus::Failed).await;
        let error = job.error.unwrap_or_default();
        assert!(error.contains("not found"), "{}: {}", id, error);
    }
    h.wait_idle().await;
}

#[tokio::test]
async fn test_magnets_start_unpaused_and_files_start_paused() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("mag").await;
    h.manager
        .submit_torrent(
            TorrentRequest::new(TorrentSource::TorrentFile {
                data: torrent_bytes("Show", 6000, 100),
                filename: Some("show.torrent".to_string()),
            })
            .with_job_id("file"),
        )
        .await
        .unwrap();

    let added = h.engine.added().await;
    let mag = added.iter().find(|r| r.job_id == "mag").unwrap();
    let file = added.iter().find(|r| r.job_id == "file").unwrap();
    assert!(!mag.start_paused);
    assert!(file.start_paused);

    // The metadata gate still holds both before selection
    for id in ["mag", "file"] {
        h.wait_status(id, JobStatus::AwaitingSelection).await;
        assert!(h.engine.pause_calls(id).await >= 1);
        assert!(h
            .engine
            .priorities(id)
            .await
            .values()
            .all(|p| *p == FilePriority::Skip));
    }
}

#[tokio::test]
async fn test_torrent_completion_without_conversion() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("done").await;
    h.wait_status("done", JobStatus::AwaitingSelection).await;
    h.manager.select_files("done", vec![0, 2]).await.unwrap();

    h.engine.set_rates("done", 1000, 200, 5, 3).await;
    h.engine.set_progress("done", 1.0).await;

    let job = h.wait_status("done", JobStatus::Completed).await;
    assert_eq!(job.progress, 100.0);
    assert!(job.error.is_none());
    assert_eq!(
        job.output_path.as_deref(),
        Some(
            h.dir
                .path()
                .join("torrents/done/Show")
                .to_string_lossy()
                .as_ref()
        )
    );
    assert_eq!(job.peer.as_ref().map(|p| p.num_seeds), Some(3));
}

#[tokio::test]
async fn test_torrent_completion_converts_first_selected_file() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet_with_format("conv-t", "mp3").await;
    h.wait_status("conv-t", JobStatus::AwaitingSelection).await;
    h.manager.select_files("conv-t", vec![1, 2]).await.unwrap();

    h.engine.set_progress("conv-t", 1.0).await;
    let job = h.wait_status("conv-t", JobStatus::Completed).await;

    let expected = MockTranscoder::default_output(&h.torrent_file("conv-t", 1), "mp3");
    assert_eq!(
        job.output_path.as_deref(),
        Some(expected.to_string_lossy().as_ref())
    );
    assert_eq!(job.derived_job_id.as_deref(), Some("conv_conv-t"));
    assert_eq!(h.transcoder.submissions().await[0].input_path, h.torrent_file("conv-t", 1));
}

// ============================================================================
// Thumbnails
// ============================================================================

#[tokio::test]
async fn test_scenario_c_thumbnail_recorded_once() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("scen-c").await;
    h.wait_status("scen-c", JobStatus::AwaitingSelection).await;
    h.manager.select_files("scen-c", vec![1]).await.unwrap();

    h.write_file(&h.torrent_file("scen-c", 1), 2 * 1024 * 1024);

    // Early trigger
    h.engine.set_progress("scen-c", 0.5).await;
    let job = h
        .wait_for("scen-c", "early thumbnail", |j| j.thumbnail.is_some())
        .await;
    assert_eq!(job.status, JobStatus::Transferring);
    assert_eq!(job.thumbnail.as_deref(), Some("/api/thumbnails/scen-c.jpg"));

    // Completion trigger finds the guard spent
    h.engine.set_progress("scen-c", 1.0).await;
    let job = h.wait_status("scen-c", JobStatus::Completed).await;
    assert_eq!(job.thumbnail.as_deref(), Some("/api/thumbnails/scen-c.jpg"));
    assert_eq!(h.transcoder.thumbnail_calls().await, 1);

    let cached = h.dir.path().join("thumbnails/scen-c.jpg");
    assert_eq!(
        std::fs::read(cached).unwrap(),
        jobhub_core::testing::MOCK_THUMBNAIL
    );
}

#[tokio::test]
async fn test_small_files_get_no_thumbnail() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("tiny").await;
    h.wait_status("tiny", JobStatus::AwaitingSelection).await;
    h.manager.select_files("tiny", vec![0]).await.unwrap();
    h.write_file(&h.torrent_file("tiny", 0), 1000);

    h.engine.set_progress("tiny", 1.0).await;
    let job = h.wait_status("tiny", JobStatus::Completed).await;
    assert!(job.thumbnail.is_none());
    assert_eq!(h.transcoder.thumbnail_calls().await, 0);
}

#[tokio::test]
async fn test_concurrent_thumbnail_triggers_fire_once() {
    let dir = TempDir::new().unwrap();
    let transcoder = MockTranscoder::new();
    transcoder
        .set_thumbnail_delay(Duration::from_millis(50))
        .await;
    let settings = fixtures::fast_settings(dir.path());
    let pipeline = CompletionPipeline::new(Arc::new(transcoder.clone()), settings.pipeline);

    let input = dir.path().join("movie.mp4");
    std::fs::write(&input, vec![0u8; 2 * 1024 * 1024]).unwrap();
    let candidates = vec![input];
    let guard = ThumbnailGuard::new();

    let (early, completion) = tokio::join!(
        pipeline.generate_thumbnail("race", &guard, &candidates, ThumbnailTrigger::Early),
        pipeline.generate_thumbnail("race", &guard, &candidates, ThumbnailTrigger::Completion),
    );

    assert_eq!(
        early.is_some() as u8 + completion.is_some() as u8,
        1,
        "exactly one trigger may win"
    );
    assert!(guard.is_done());
    assert_eq!(transcoder.thumbnail_calls().await, 1);

    let again = pipeline
        .generate_thumbnail("race", &guard, &candidates, ThumbnailTrigger::Completion)
        .await;
    assert!(again.is_none());
}

#[tokio::test]
async fn test_failed_early_thumbnail_leaves_completion_attempt() {
    let dir = TempDir::new().unwrap();
    let transcoder = MockTranscoder::new();
    let settings = fixtures::fast_settings(dir.path());
    let pipeline = CompletionPipeline::new(Arc::new(transcoder.clone()), settings.pipeline);

    let input = dir.path().join("movie.mkv");
    std::fs::write(&input, vec![0u8; 2 * 1024 * 1024]).unwrap();
    let guard = ThumbnailGuard::new();

    transcoder.fail_thumbnails("decoder error").await;
    let first = pipeline
        .generate_thumbnail("retry", &guard, &[input.clone()], ThumbnailTrigger::Early)
        .await;
    assert!(first.is_none());
    assert!(!guard.is_done());
    assert!(guard.early_attempted());

    // The early trigger had its one attempt
    transcoder.restore_thumbnails().await;
    let again = pipeline
        .generate_thumbnail("retry", &guard, &[input.clone()], ThumbnailTrigger::Early)
        .await;
    assert!(again.is_none());
    assert_eq!(transcoder.thumbnail_calls().await, 1);

    let last = pipeline
        .generate_thumbnail("retry", &guard, &[input], ThumbnailTrigger::Completion)
        .await;
    assert_eq!(last.as_deref(), Some("/api/thumbnails/retry.jpg"));
    assert!(guard.is_done());
    assert_eq!(transcoder.thumbnail_calls().await, 2);
}

#[tokio::test]
async fn test_early_thumbnail_waits_for_candidate() {
    let dir = TempDir::new().unwrap();
    let transcoder = MockTranscoder::new();
    let settings = fixtures::fast_settings(dir.path());
    let pipeline = CompletionPipeline::new(Arc::new(transcoder.clone()), settings.pipeline);

    let input = dir.path().join("movie.mkv");
    let guard = ThumbnailGuard::new();

    let early = pipeline
        .generate_thumbnail("later", &guard, &[input.clone()], ThumbnailTrigger::Early)
        .await;
    assert!(early.is_none());
    assert!(!guard.early_attempted());
    assert_eq!(transcoder.thumbnail_calls().await, 0);

    std::fs::write(&input, vec![0u8; 2 * 1024 * 1024]).unwrap();
    let early = pipeline
        .generate_thumbnail("later", &guard, &[input], ThumbnailTrigger::Early)
        .await;
    assert!(early.is_some());
    assert_eq!(transcoder.thumbnail_calls().await, 1);
}

#[tokio::test]
async fn test_failing_thumbnails_are_tried_once_per_trigger() {
    let h = TestHarness::new().with_three_files().await;
    h.transcoder.fail_thumbnails("decoder error").await;
    h.submit_magnet("no-thumb").await;
    h.wait_status("no-thumb", JobStatus::AwaitingSelection).await;
    h.manager.select_files("no-thumb", vec![1]).await.unwrap();
    h.write_file(&h.torrent_file("no-thumb", 1), 2 * 1024 * 1024);

    // Many ticks above the early threshold
    h.engine.set_progress("no-thumb", 0.5).await;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(h.transcoder.thumbnail_calls().await, 1);

    h.engine.set_progress("no-thumb", 1.0).await;
    let job = h.wait_status("no-thumb", JobStatus::Completed).await;
    assert!(job.thumbnail.is_none());
    assert_eq!(h.transcoder.thumbnail_calls().await, 2);
}

// ============================================================================
// Simple transfers
// ============================================================================

#[tokio::test]
async fn test_scenario_b_byte_progress() {
    let h = TestHarness::new();
    h.extractor
        .set_steps(
            vec![
                TransferProgress {
                    downloaded_bytes: 50,
                    total_bytes: Some(200),
                    ..Default::default()
                },
                TransferProgress {
                    downloaded_bytes: 200,
                    total_bytes: Some(200),
                    finished: true,
                    ..Default::default()
                },
            ],
            Duration::from_millis(150),
        )
        .await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/1").with_job_id("scen-b"))
        .await
        .unwrap();

    let job = h
        .wait_for("scen-b", "25% progress", |j| j.progress == 25.0)
        .await;
    assert_eq!(job.status, JobStatus::Transferring);
    assert_eq!(job.name, "Mock Video");

    let job = h.wait_status("scen-b", JobStatus::Completed).await;
    assert_eq!(job.progress, 100.0);
    let output = job.output_path.expect("output path");
    assert!(output.ends_with("scen-b_Mock Video.mp4"), "got {}", output);
    assert!(Path::new(&output).exists());
}

#[tokio::test]
async fn test_scenario_d_conversion_inherits_output() {
    let h = TestHarness::new();
    h.transcoder
        .set_sequence(vec![
            SubJobStatus::pending(),
            SubJobStatus::processing(40.0),
            SubJobStatus::processing(80.0),
            SubJobStatus::completed(PathBuf::from("/converted/scen-d.mp3")),
        ])
        .await;

    h.manager
        .submit_transfer(
            TransferRequest::new("https://example.com/v/2")
                .with_job_id("scen-d")
                .with_target_format("mp3"),
        )
        .await
        .unwrap();

    let job = h.wait_status("scen-d", JobStatus::Completed).await;
    assert_eq!(job.output_path.as_deref(), Some("/converted/scen-d.mp3"));
    assert_eq!(job.derived_job_id.as_deref(), Some("conv_scen-d"));
    assert_eq!(job.target_format.as_deref(), Some("mp3"));
    assert_eq!(job.progress, 100.0);
    assert!(job.error.is_none());

    assert!(h.transcoder.polls("conv_scen-d").await >= 4);
    let submissions = h.transcoder.submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].output_format, "mp3");
    assert!(submissions[0]
        .input_path
        .to_string_lossy()
        .ends_with("scen-d_Mock Video.mp4"));

    // The sub-job's progress was mirrored while converting
    let converting: Vec<u32> = h
        .sink
        .events_for("scen-d")
        .await
        .into_iter()
        .filter(|e| e.status == JobStatus::Converting)
        .map(|e| e.progress)
        .collect();
    assert!(converting.contains(&40), "got {:?}", converting);
    assert!(converting.contains(&80), "got {:?}", converting);

    let statuses = h.sink.statuses_for("scen-d").await;
    assert_eq!(
        statuses,
        vec![
            JobStatus::Pending,
            JobStatus::Transferring,
            JobStatus::Converting,
            JobStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn test_failed_conversion_keeps_original() {
    let h = TestHarness::new();
    h.transcoder
        .set_sequence(vec![
            SubJobStatus::processing(10.0),
            SubJobStatus::failed("codec not supported"),
        ])
        .await;

    h.manager
        .submit_transfer(
            TransferRequest::new("https://example.com/v/3")
                .with_job_id("conv-fail")
                .with_target_format("webm"),
        )
        .await
        .unwrap();

    let job = h.wait_status("conv-fail", JobStatus::Completed).await;
    assert_eq!(
        job.error.as_deref(),
        Some("conversion failed: codec not supported")
    );
    assert!(job
        .output_path
        .as_deref()
        .unwrap()
        .ends_with("conv-fail_Mock Video.mp4"));
}

#[tokio::test]
async fn test_submit_failure_keeps_original() {
    let h = TestHarness::new();
    h.transcoder.fail_submit("converter offline").await;

    h.manager
        .submit_transfer(
            TransferRequest::new("https://example.com/v/4")
                .with_job_id("submit-fail")
                .with_target_format("audio_mp3"),
        )
        .await
        .unwrap();

    let job = h.wait_status("submit-fail", JobStatus::Completed).await;
    let error = job.error.unwrap();
    assert!(error.starts_with("conversion failed:"), "got {}", error);
    assert!(error.contains("converter offline"));
    assert!(job.derived_job_id.is_none());
}

#[tokio::test]
async fn test_remote_thumbnail_cached() {
    let h = TestHarness::new();
    h.extractor
        .set_metadata(MediaMetadata {
            title: "Clip".to_string(),
            thumbnail_url: Some("https://img.example.com/clip.jpg".to_string()),
            duration: None,
            formats: vec![],
        })
        .await;
    h.extractor.set_thumbnail(b"remote-jpeg".to_vec()).await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/5").with_job_id("remote"))
        .await
        .unwrap();

    let job = h.wait_status("remote", JobStatus::Completed).await;
    assert_eq!(job.thumbnail.as_deref(), Some("/api/thumbnails/remote.jpg"));
    assert_eq!(
        std::fs::read(h.dir.path().join("thumbnails/remote.jpg")).unwrap(),
        b"remote-jpeg"
    );
    assert_eq!(h.transcoder.thumbnail_calls().await, 0);
}

#[tokio::test]
async fn test_remote_thumbnail_falls_back_to_url() {
    let h = TestHarness::new();
    h.extractor
        .set_metadata(MediaMetadata {
            title: "Clip".to_string(),
            thumbnail_url: Some("https://img.example.com/clip.jpg".to_string()),
            duration: None,
            formats: vec![],
        })
        .await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/6").with_job_id("fallback"))
        .await
        .unwrap();

    let job = h.wait_status("fallback", JobStatus::Completed).await;
    assert_eq!(
        job.thumbnail.as_deref(),
        Some("https://img.example.com/clip.jpg")
    );
    assert_eq!(h.extractor.thumbnail_fetches().await.len(), 1);
}

#[tokio::test]
async fn test_metadata_failure_fails_job() {
    let h = TestHarness::new();
    h.extractor.fail_metadata("video unavailable").await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/7").with_job_id("meta-fail"))
        .await
        .unwrap();

    let job = h.wait_status("meta-fail", JobStatus::Failed).await;
    assert!(job.error.unwrap().contains("video unavailable"));
}

#[tokio::test]
async fn test_task_panic_fails_only_that_job() {
    let h = TestHarness::new();
    h.extractor.panic_on_metadata().await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/8").with_job_id("boom"))
        .await
        .unwrap();

    let job = h.wait_status("boom", JobStatus::Failed).await;
    assert_eq!(
        job.error.as_deref(),
        Some("internal error: mock extractor exploded")
    );
    h.wait_idle().await;
}

#[tokio::test]
async fn test_failing_sink_does_not_fail_jobs() {
    let h = TestHarness::new();
    h.sink.set_failing(true).await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/9").with_job_id("sink"))
        .await
        .unwrap();

    h.wait_status("sink", JobStatus::Completed).await;
    assert!(!h.sink.events_for("sink").await.is_empty());
}

// ============================================================================
// Direct conversion
// ============================================================================

#[tokio::test]
async fn test_direct_conversion() {
    let h = TestHarness::new();
    let input = h.dir.path().join("talk.mkv");
    std::fs::write(&input, b"not really a video").unwrap();

    let job = h
        .manager
        .submit_conversion(ConversionRequest::new(&input, "mp3").with_job_id("direct"))
        .await
        .unwrap();
    assert_eq!(job.category, JobCategory::Transcode);
    assert_eq!(job.name, "talk.mkv");

    let job = h.wait_status("direct", JobStatus::Completed).await;
    assert_eq!(
        job.output_path.as_deref(),
        Some(input.with_extension("mp3").to_string_lossy().as_ref())
    );
    assert_eq!(
        h.sink.statuses_for("direct").await,
        vec![JobStatus::Pending, JobStatus::Converting, JobStatus::Completed]
    );
}

#[tokio::test]
async fn test_direct_conversion_failure_fails_job() {
    let h = TestHarness::new();
    let input = h.dir.path().join("talk.mkv");
    std::fs::write(&input, b"x").unwrap();
    h.transcoder
        .set_sequence(vec![SubJobStatus::failed("bad input")])
        .await;

    h.manager
        .submit_conversion(ConversionRequest::new(&input, "gif").with_job_id("direct-fail"))
        .await
        .unwrap();

    let job = h.wait_status("direct-fail", JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("conversion failed: bad input"));
}

#[tokio::test]
async fn test_direct_conversion_rejects_missing_input() {
    let h = TestHarness::new();
    let err = h
        .manager
        .submit_conversion(ConversionRequest::new("/nope/missing.mkv", "mp3"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidInput(_)));
    assert!(h.manager.list(None).unwrap().is_empty());
}

// ============================================================================
// Submission errors, removal, recovery
// ============================================================================

#[tokio::test]
async fn test_input_errors_create_nothing() {
    let h = TestHarness::new();

    let bad_magnet = h
        .manager
        .submit_torrent(TorrentRequest::new(TorrentSource::Magnet(
            "magnet:?dn=nohash".to_string(),
        )))
        .await
        .unwrap_err();
    assert!(matches!(bad_magnet, JobError::InvalidInput(_)));

    let bad_url = h
        .manager
        .submit_transfer(TransferRequest::new("file:///etc/passwd"))
        .await
        .unwrap_err();
    assert!(matches!(bad_url, JobError::InvalidInput(_)));

    let bad_id = h
        .manager
        .submit_transfer(TransferRequest::new("https://example.com").with_job_id("a b"))
        .await
        .unwrap_err();
    assert!(matches!(bad_id, JobError::InvalidInput(_)));

    let bad_format = h
        .manager
        .submit_transfer(TransferRequest::new("https://example.com").with_target_format("mp3!"))
        .await
        .unwrap_err();
    assert!(matches!(bad_format, JobError::InvalidInput(_)));

    assert!(h.manager.list(None).unwrap().is_empty());
    assert!(h.engine.added().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_job_id_conflicts() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("dup").await;

    let err = h
        .manager
        .submit_torrent(
            TorrentRequest::new(TorrentSource::Magnet(MAGNET.to_string())).with_job_id("dup"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Conflict(_)));
    assert_eq!(h.engine.added().await.len(), 1);
}

#[tokio::test]
async fn test_engine_add_failure_creates_nothing() {
    let h = TestHarness::new();
    h.engine
        .set_next_error(jobhub_core::EngineError::ConnectionFailed("refused".to_string()))
        .await;

    let err = h
        .manager
        .submit_torrent(
            TorrentRequest::new(TorrentSource::Magnet(MAGNET.to_string()))
                .with_job_id("no-engine"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Engine(_)));
    assert!(matches!(
        h.manager.get_status("no-engine"),
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_live_torrent() {
    let h = TestHarness::new().with_three_files().await;
    h.submit_magnet("gone").await;
    h.wait_status("gone", JobStatus::AwaitingSelection).await;
    h.manager.select_files("gone", vec![0]).await.unwrap();

    h.manager.delete("gone", true).await.unwrap();
    assert_eq!(h.engine.removed("gone").await, Some(true));
    assert!(matches!(
        h.manager.get_status("gone"),
        Err(JobError::NotFound(_))
    ));

    h.wait_idle().await;
    // Never resurrected by a late write
    sleep(Duration::from_millis(50)).await;
    assert!(h.store.get("gone").unwrap().is_none());

    let err = h.manager.delete("gone", false).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
    let err = h.manager.select_files("gone", vec![0]).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_during_download_removes_partial_files() {
    let h = TestHarness::new();
    h.extractor
        .set_steps(
            vec![TransferProgress {
                downloaded_bytes: 10,
                total_bytes: Some(100),
                ..Default::default()
            }],
            Duration::from_secs(10),
        )
        .await;

    let downloads = h.dir.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/10").with_job_id("cancel"))
        .await
        .unwrap();
    h.wait_status("cancel", JobStatus::Transferring).await;
    let partial = downloads.join("cancel_Mock Video.mp4.part");
    std::fs::write(&partial, b"partial").unwrap();

    h.manager.delete("cancel", true).await.unwrap();
    h.wait_idle().await;
    assert!(!partial.exists());
    assert!(h.store.get("cancel").unwrap().is_none());
    assert_eq!(h.extractor.active_downloads(), 0);
}

#[tokio::test]
async fn test_vanished_record_stops_download() {
    let h = TestHarness::new();
    let steps = (1..=200)
        .map(|i| TransferProgress {
            downloaded_bytes: i,
            total_bytes: Some(1000),
            ..Default::default()
        })
        .collect();
    h.extractor
        .set_steps(steps, Duration::from_millis(25))
        .await;

    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/11").with_job_id("vanish"))
        .await
        .unwrap();
    h.wait_status("vanish", JobStatus::Transferring).await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.extractor.active_downloads() == 0 {
        assert!(Instant::now() < deadline, "download never started");
        sleep(Duration::from_millis(5)).await;
    }

    // Deleted behind the manager's back; the next progress write finds nothing
    assert!(h.store.delete("vanish").unwrap());
    h.wait_idle().await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.extractor.active_downloads() > 0 {
        assert!(Instant::now() < deadline, "download kept running");
        sleep(Duration::from_millis(5)).await;
    }
    assert!(h.store.get("vanish").unwrap().is_none());
}

#[tokio::test]
async fn test_delete_finished_job_removes_output() {
    let h = TestHarness::new();
    h.manager
        .submit_transfer(TransferRequest::new("https://example.com/v/11").with_job_id("old"))
        .await
        .unwrap();
    let job = h.wait_status("old", JobStatus::Completed).await;
    h.wait_idle().await;

    let output = PathBuf::from(job.output_path.unwrap());
    assert!(output.exists());
    h.manager.delete("old", true).await.unwrap();
    assert!(!output.exists());
}

#[tokio::test]
async fn test_reconcile_orphans() {
    let h = TestHarness::new();
    h.store
        .create("orphan", JobPatch::create(JobCategory::SelectiveTransfer))
        .unwrap();
    h.store
        .create(
            "finished",
            JobPatch::create(JobCategory::Transfer).with_status(JobStatus::Completed),
        )
        .unwrap();

    assert_eq!(h.manager.reconcile_orphans().await.unwrap(), 1);

    let orphan = h.manager.get_status("orphan").unwrap();
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(orphan.error.as_deref(), Some(ORPHANED_REASON));
    assert_eq!(
        h.manager.get_status("finished").unwrap().status,
        JobStatus::Completed
    );

    let err = h.manager.pause("orphan").await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState(_)));
}

#[tokio::test]
async fn test_control_without_live_task_is_not_controllable() {
    let h = TestHarness::new();
    h.store
        .create("stale", JobPatch::create(JobCategory::SelectiveTransfer))
        .unwrap();

    let err = h.manager.select_files("stale", vec![0]).await.unwrap_err();
    assert!(matches!(err, JobError::NotControllable(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_wait_for_change_and_list() {
    let h = TestHarness::new();
    h.engine
        .set_default_metadata(fixtures::torrent_metadata("Show", &[10], 16))
        .await;
    h.submit_magnet("waiter").await;
    h.wait_status("waiter", JobStatus::AwaitingSelection).await;

    let manager = h.manager.clone();
    let waiter = tokio::spawn(async move {
        manager
            .wait_for_change("waiter", Duration::from_secs(5))
            .await
    });
    sleep(Duration::from_millis(20)).await;
    h.manager.select_files("waiter", vec![0]).await.unwrap();

    let changed = waiter.await.unwrap().unwrap();
    assert_eq!(changed.status, JobStatus::Transferring);

    // Times out with the current record
    h.manager.pause("waiter").await.unwrap();
    let same = h
        .manager
        .wait_for_change("waiter", Duration::from_millis(30))
        .await
        .unwrap();
    assert_eq!(same.status, JobStatus::Paused);

    let listed = h.manager.list(Some("wait")).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(h.manager.list(Some("zzz")).unwrap().is_empty());

    let err = h
        .manager
        .wait_for_change("missing", Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
}
