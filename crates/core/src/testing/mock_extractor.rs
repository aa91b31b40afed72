//! Mock media extractor for testing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use crate::extractor::{
    DownloadRequest, ExtractorError, MediaExtractor, MediaMetadata, TransferProgress,
};

#[derive(Debug, Clone)]
struct Script {
    metadata: MediaMetadata,
    metadata_error: Option<String>,
    panic_on_metadata: bool,
    /// Published one after another, `step_delay` apart.
    steps: Vec<TransferProgress>,
    step_delay: Duration,
    download_error: Option<String>,
    /// Bytes written to the output file.
    output_size: usize,
    output_extension: String,
    thumbnail: Option<Vec<u8>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            metadata: MediaMetadata {
                title: "Mock Video".to_string(),
                thumbnail_url: None,
                duration: Some(60.0),
                formats: Vec::new(),
            },
            metadata_error: None,
            panic_on_metadata: false,
            steps: vec![
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
            step_delay: Duration::from_millis(10),
            download_error: None,
            output_size: 1024,
            output_extension: "mp4".to_string(),
            thumbnail: None,
        }
    }
}

/// Mock implementation of the MediaExtractor trait.
///
/// Downloads publish the scripted progress steps and then write a real file
/// named `{job_id}_{title}.{ext}` into the request's output directory.
#[derive(Debug, Clone, Default)]
pub struct MockExtractor {
    script: Arc<RwLock<Script>>,
    downloads: Arc<RwLock<Vec<DownloadRequest>>>,
    thumbnail_fetches: Arc<RwLock<Vec<String>>>,
    /// Downloads currently running; aborted ones are no longer counted.
    active: Arc<AtomicUsize>,
}

/// Counts a running download until dropped.
struct Running(Arc<AtomicUsize>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_metadata(&self, metadata: MediaMetadata) {
        self.script.write().await.metadata = metadata;
    }

    pub async fn fail_metadata(&self, message: &str) {
        self.script.write().await.metadata_error = Some(message.to_string());
    }

    /// Panic inside `fetch_metadata`, as a buggy backend would.
    pub async fn panic_on_metadata(&self) {
        self.script.write().await.panic_on_metadata = true;
    }

    pub async fn set_steps(&self, steps: Vec<TransferProgress>, step_delay: Duration) {
        let mut script = self.script.write().await;
        script.steps = steps;
        script.step_delay = step_delay;
    }

    /// Fail the download after the scripted steps.
    pub async fn fail_download(&self, message: &str) {
        self.script.write().await.download_error = Some(message.to_string());
    }

    pub async fn set_output(&self, extension: &str, size: usize) {
        let mut script = self.script.write().await;
        script.output_extension = extension.to_string();
        script.output_size = size;
    }

    /// Serve these bytes for every thumbnail URL; fetches fail otherwise.
    pub async fn set_thumbnail(&self, bytes: Vec<u8>) {
        self.script.write().await.thumbnail = Some(bytes);
    }

    pub async fn downloads(&self) -> Vec<DownloadRequest> {
        self.downloads.read().await.clone()
    }

    pub fn active_downloads(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn thumbnail_fetches(&self) -> Vec<String> {
        self.thumbnail_fetches.read().await.clone()
    }
}

#[async_trait]
impl MediaExtractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_metadata(&self, url: &str) -> Result<MediaMetadata, ExtractorError> {
        let script = self.script.read().await;
        if script.panic_on_metadata {
            panic!("mock extractor exploded");
        }
        if let Some(message) = &script.metadata_error {
            return Err(ExtractorError::MetadataFailed(message.clone()));
        }
        if url.contains("unsupported") {
            return Err(ExtractorError::UnsupportedUrl(url.to_string()));
        }
        Ok(script.metadata.clone())
    }

    async fn download(
        &self,
        request: DownloadRequest,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<PathBuf, ExtractorError> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let _running = Running(Arc::clone(&self.active));
        self.downloads.write().await.push(request.clone());
        let script = self.script.read().await.clone();

        for step in &script.steps {
            tokio::time::sleep(script.step_delay).await;
            let _ = progress.send(*step);
        }

        if let Some(message) = script.download_error {
            return Err(ExtractorError::DownloadFailed(message));
        }

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let path = request.output_dir.join(format!(
            "{}_{}.{}",
            request.job_id, script.metadata.title, script.output_extension
        ));
        tokio::fs::write(&path, vec![0u8; script.output_size]).await?;
        Ok(path)
    }

    async fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, ExtractorError> {
        self.thumbnail_fetches.write().await.push(url.to_string());
        self.script
            .read()
            .await
            .thumbnail
            .clone()
            .ok_or_else(|| ExtractorError::ThumbnailFailed(format!("no thumbnail at {}", url)))
    }
}
