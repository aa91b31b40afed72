//! yt-dlp based extractor implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use super::{
    DownloadRequest, ExtractorConfig, ExtractorError, MediaExtractor, MediaFormat, MediaMetadata,
    TransferProgress,
};

/// Marker prefixing our machine-readable progress lines.
const PROGRESS_MARKER: &str = "JOBHUB_PROGRESS";

/// Extractor driving the `yt-dlp` binary.
pub struct YtDlpExtractor {
    config: ExtractorConfig,
    http: Client,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractorError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.thumbnail_timeout_secs))
            .build()
            .map_err(|e| ExtractorError::ThumbnailFailed(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.ytdlp_path);
        cmd.args(&self.config.extra_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> ExtractorError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractorError::BinaryNotFound {
                path: self.config.ytdlp_path.clone(),
            }
        } else {
            ExtractorError::Io(e)
        }
    }

    fn progress_template() -> String {
        format!(
            "download:{} %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
            PROGRESS_MARKER
        )
    }

    /// Build download arguments. The output template is `{job_id}_{title}.{ext}`.
    fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let template = request
            .output_dir
            .join(format!("{}_%(title)s.%(ext)s", request.job_id));
        vec![
            "-f".to_string(),
            request
                .format
                .clone()
                .unwrap_or_else(|| self.config.default_format.clone()),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            Self::progress_template(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            request.url.clone(),
        ]
    }

    /// Parse `--dump-json` output.
    fn parse_metadata(output: &str) -> Result<MediaMetadata, ExtractorError> {
        #[derive(Deserialize)]
        struct DumpJson {
            title: Option<String>,
            thumbnail: Option<String>,
            duration: Option<f64>,
            #[serde(default)]
            formats: Vec<DumpFormat>,
        }

        #[derive(Deserialize)]
        struct DumpFormat {
            format_id: Option<String>,
            ext: Option<String>,
            resolution: Option<String>,
            filesize: Option<u64>,
            vcodec: Option<String>,
            acodec: Option<String>,
        }

        // yt-dlp prints one JSON document per line; take the first
        let line = output
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| ExtractorError::MetadataFailed("no JSON in output".to_string()))?;

        let dump: DumpJson = serde_json::from_str(line)
            .map_err(|e| ExtractorError::MetadataFailed(format!("invalid JSON: {}", e)))?;

        Ok(MediaMetadata {
            title: dump.title.unwrap_or_else(|| "Unknown".to_string()),
            thumbnail_url: dump.thumbnail,
            duration: dump.duration,
            formats: dump
                .formats
                .into_iter()
                .filter_map(|f| {
                    Some(MediaFormat {
                        format_id: f.format_id?,
                        ext: f.ext,
                        resolution: Some(f.resolution.unwrap_or_else(|| "audio only".to_string())),
                        filesize: f.filesize,
                        vcodec: f.vcodec,
                        acodec: f.acodec,
                    })
                })
                .collect(),
        })
    }

    /// Find the file yt-dlp wrote for a job.
    async fn find_output(dir: &Path, job_id: &str) -> Result<PathBuf, ExtractorError> {
        let prefix = format!("{}_", job_id);
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
                return Ok(entry.path());
            }
        }
        Err(ExtractorError::DownloadFailed(
            "Downloaded file not found".to_string(),
        ))
    }
}

/// Parse one `--progress-template` line. `NA` fields become `None`.
fn parse_progress_line(re: &Regex, line: &str) -> Option<TransferProgress> {
    let caps = re.captures(line.trim())?;
    let number = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|n| n.max(0.0) as u64)
    };
    Some(TransferProgress {
        downloaded_bytes: number(2).unwrap_or(0),
        total_bytes: number(3),
        total_bytes_estimate: number(4),
        finished: caps.get(1).map(|m| m.as_str()) == Some("finished"),
    })
}

fn progress_regex() -> Option<Regex> {
    Regex::new(&format!(r"^{} (\S+) (\S+) (\S+) (\S+)$", PROGRESS_MARKER)).ok()
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch_metadata(&self, url: &str) -> Result<MediaMetadata, ExtractorError> {
        let mut cmd = self.command();
        cmd.args(["--dump-json", "--no-playlist", "--no-warnings", "--skip-download"])
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = timeout(
            Duration::from_secs(self.config.metadata_timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| ExtractorError::Timeout {
            timeout_secs: self.config.metadata_timeout_secs,
        })?
        .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ExtractorError::MetadataFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Self::parse_metadata(&String::from_utf8_lossy(&output.stdout))
    }

    async fn download(
        &self,
        request: DownloadRequest,
        progress: watch::Sender<TransferProgress>,
    ) -> Result<PathBuf, ExtractorError> {
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let mut child = self
            .command()
            .args(self.download_args(&request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::DownloadFailed("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::DownloadFailed("stderr not captured".to_string()))?;

        // Drain stderr alongside stdout
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let re = progress_regex();
        let mut lines = BufReader::new(stdout).lines();

        let run = async {
            while let Some(line) = lines.next_line().await? {
                if let Some(update) = re.as_ref().and_then(|re| parse_progress_line(re, &line)) {
                    // Nobody watching is fine
                    let _ = progress.send(update);
                }
            }
            child.wait().await
        };

        let status = timeout(Duration::from_secs(self.config.download_timeout_secs), run)
            .await
            .map_err(|_| ExtractorError::Timeout {
                timeout_secs: self.config.download_timeout_secs,
            })??;

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let reason = stderr_text
                .lines()
                .rev()
                .find(|l| l.contains("ERROR"))
                .unwrap_or("yt-dlp exited with an error")
                .trim()
                .to_string();
            return Err(ExtractorError::DownloadFailed(reason));
        }

        let path = Self::find_output(&request.output_dir, &request.job_id).await?;
        debug!(job_id = %request.job_id, path = %path.display(), "Download finished");
        Ok(path)
    }

    async fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, ExtractorError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractorError::ThumbnailFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExtractorError::ThumbnailFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ExtractorError::ThumbnailFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_progress_line() {
        let re = progress_regex().unwrap();
        let p = parse_progress_line(&re, "JOBHUB_PROGRESS downloading 50 200 NA").unwrap();
        assert_eq!(p.downloaded_bytes, 50);
        assert_eq!(p.total_bytes, Some(200));
        assert_eq!(p.total_bytes_estimate, None);
        assert!(!p.finished);
        assert_eq!(p.percent(), 25.0);
    }

    #[test]
    fn test_parse_progress_line_estimate_and_finished() {
        let re = progress_regex().unwrap();
        let p = parse_progress_line(&re, "JOBHUB_PROGRESS downloading 100 NA 400.5").unwrap();
        assert_eq!(p.total_bytes, None);
        assert_eq!(p.total_bytes_estimate, Some(400));

        let done = parse_progress_line(&re, "JOBHUB_PROGRESS finished 400 400 NA").unwrap();
        assert!(done.finished);
        assert_eq!(done.percent(), 99.0);
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        let re = progress_regex().unwrap();
        assert!(parse_progress_line(&re, "[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn test_parse_metadata() {
        let json = r#"{"title":"A Clip","thumbnail":"https://img/x.jpg","duration":12.5,
            "formats":[{"format_id":"18","ext":"mp4","resolution":"640x360","filesize":1000,
            "vcodec":"avc1","acodec":"mp4a"},{"format_id":"140","ext":"m4a","vcodec":"none"},
            {"ext":"webm"}]}"#
            .replace('\n', " ");
        let meta = YtDlpExtractor::parse_metadata(&json).unwrap();
        assert_eq!(meta.title, "A Clip");
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://img/x.jpg"));
        assert_eq!(meta.duration, Some(12.5));
        assert_eq!(meta.formats.len(), 2);
        assert_eq!(meta.formats[1].resolution.as_deref(), Some("audio only"));
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(YtDlpExtractor::parse_metadata("ERROR: unsupported URL").is_err());
    }

    #[test]
    fn test_download_args_use_job_prefix() {
        let extractor = YtDlpExtractor::new(ExtractorConfig::default()).unwrap();
        let args = extractor.download_args(&DownloadRequest {
            job_id: "job42".to_string(),
            url: "https://example.com/v".to_string(),
            format: None,
            output_dir: PathBuf::from("/storage/downloads"),
        });
        assert!(args.contains(&"/storage/downloads/job42_%(title)s.%(ext)s".to_string()));
        assert!(args.contains(&ExtractorConfig::default().default_format));
        assert_eq!(args.last().unwrap(), "https://example.com/v");
    }

    #[tokio::test]
    async fn test_find_output_skips_partials() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("job1_clip.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("other_clip.mp4"), b"x").unwrap();
        assert!(YtDlpExtractor::find_output(dir.path(), "job1").await.is_err());

        std::fs::write(dir.path().join("job1_clip.mp4"), b"x").unwrap();
        let found = YtDlpExtractor::find_output(dir.path(), "job1").await.unwrap();
        assert_eq!(found.file_name().unwrap(), "job1_clip.mp4");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let extractor = YtDlpExtractor::new(ExtractorConfig {
            ytdlp_path: PathBuf::from("/nonexistent/yt-dlp"),
            ..Default::default()
        })
        .unwrap();
        let result = extractor.fetch_metadata("https://example.com").await;
        assert!(matches!(result, Err(ExtractorError::BinaryNotFound { .. })));
    }
}
