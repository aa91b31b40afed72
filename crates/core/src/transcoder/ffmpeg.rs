//! FFmpeg-based transcoder running conversions in-process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use regex_lite::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

use super::config::FfmpegTranscoderConfig;
use super::profiles::OutputProfile;
use super::types::{SubJobStatus, TranscodeRequest, Transcoder, TranscoderError};

/// Conversion progress never reaches 100 before ffmpeg exits.
const MAX_RUNNING_PROGRESS: f64 = 99.0;

const THUMBNAIL_FILTER: &str =
    "scale=320:180:force_original_aspect_ratio=decrease,pad=320:180:(ow-iw)/2:(oh-ih)/2";

/// How long a finished sub-job stays pollable.
const FINISHED_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct SubJobEntry {
    status: SubJobStatus,
    finished_at: Option<Instant>,
}

type SubJobMap = Arc<RwLock<HashMap<String, SubJobEntry>>>;

/// Transcoder spawning one ffmpeg process per sub-job.
pub struct FfmpegTranscoder {
    config: FfmpegTranscoderConfig,
    output_dir: PathBuf,
    jobs: SubJobMap,
    retention: Duration,
}

impl FfmpegTranscoder {
    /// Creates a transcoder writing converted files under `output_dir`.
    pub fn new(config: FfmpegTranscoderConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention: FINISHED_RETENTION,
        }
    }

    /// Keep finished sub-jobs pollable for `retention` instead of the default.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Forget sub-jobs that finished more than `retention` ago.
    async fn prune_finished(&self) {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| {
            entry
                .finished_at
                .is_none_or(|at| now.duration_since(at) < self.retention)
        });
        let pruned = before - jobs.len();
        if pruned > 0 {
            debug!(pruned, "Dropped finished conversion sub-jobs");
        }
    }

    /// Output location for a sub-job.
    ///
    /// `{output_dir}/{stem}_{sub_id}.{ext}`, or `{output_dir}/hls/{sub_id}/playlist.m3u8` for HLS.
    fn output_path(&self, input: &Path, profile: &OutputProfile, sub_id: &str) -> PathBuf {
        if profile.is_hls() {
            return self.hls_dir(sub_id).join("playlist.m3u8");
        }
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        self.output_dir
            .join(format!("{}_{}.{}", stem, sub_id, profile.extension))
    }

    fn hls_dir(&self, sub_id: &str) -> PathBuf {
        self.output_dir.join("hls").join(sub_id)
    }

    /// Builds ffmpeg arguments for a conversion.
    fn build_args(&self, input: &Path, output: &Path, profile: &OutputProfile) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            self.config.log_level.clone(),
        ];

        args.extend(profile.args.iter().cloned());

        if profile.is_hls() {
            let segments = output
                .parent()
                .unwrap_or(&self.output_dir)
                .join("segment_%03d.ts");
            args.extend([
                "-hls_segment_filename".to_string(),
                segments.to_string_lossy().to_string(),
            ]);
        }

        args.extend(self.config.extra_args.iter().cloned());
        args.push(output.to_string_lossy().to_string());
        args
    }

    fn thumbnail_args(input: &Path, timestamp_secs: u64) -> Vec<String> {
        vec![
            "-ss".to_string(),
            timestamp_secs.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            THUMBNAIL_FILTER.to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "pipe:1".to_string(),
        ]
    }

    fn spawn_error(path: &Path, e: std::io::Error) -> TranscoderError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TranscoderError::BinaryNotFound {
                path: path.to_path_buf(),
            }
        } else {
            TranscoderError::Io(e)
        }
    }
}

/// Percent of `duration_secs` covered by an `out_time_ms` value (microseconds).
fn conversion_percent(out_time_us: f64, duration_secs: f64) -> Option<f64> {
    if duration_secs <= 0.0 {
        return None;
    }
    let current = out_time_us / 1_000_000.0;
    Some((current / duration_secs * 100.0).clamp(0.0, MAX_RUNNING_PROGRESS))
}

/// Reads the container duration in seconds; 0 when unknown.
async fn probe_duration(ffprobe: &Path, input: &Path) -> f64 {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .trim()
            .parse::<f64>()
            .unwrap_or(0.0),
        Ok(_) => 0.0,
        Err(e) => {
            warn!(error = %e, "ffprobe unavailable, conversion progress will stay at 0");
            0.0
        }
    }
}

async fn set_status(jobs: &SubJobMap, id: &str, status: SubJobStatus) {
    let finished_at = status.status.is_terminal().then(Instant::now);
    jobs.write()
        .await
        .insert(id.to_string(), SubJobEntry { status, finished_at });
}

/// Runs one sub-job to completion, recording every state change in `jobs`.
async fn run_sub_job(
    config: FfmpegTranscoderConfig,
    jobs: SubJobMap,
    sub_id: String,
    input: PathBuf,
    output: PathBuf,
    args: Vec<String>,
) {
    set_status(&jobs, &sub_id, SubJobStatus::processing(0.0)).await;

    let duration = probe_duration(&config.ffprobe_path, &input).await;

    let spawned = Command::new(&config.ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let err = FfmpegTranscoder::spawn_error(&config.ffmpeg_path, e);
            set_status(&jobs, &sub_id, SubJobStatus::failed(err.to_string())).await;
            return;
        }
    };

    let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        set_status(&jobs, &sub_id, SubJobStatus::failed("ffmpeg pipes not captured")).await;
        return;
    };

    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let time_regex = Regex::new(r"^out_time_ms=(\d+)").ok();
    let mut lines = BufReader::new(stdout).lines();

    let run = async {
        while let Some(line) = lines.next_line().await? {
            let Some(caps) = time_regex.as_ref().and_then(|re| re.captures(line.trim())) else {
                continue;
            };
            let Some(us) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
                continue;
            };
            if let Some(percent) = conversion_percent(us, duration) {
                set_status(&jobs, &sub_id, SubJobStatus::processing(percent)).await;
            }
        }
        child.wait().await
    };

    let result = timeout(Duration::from_secs(config.timeout_secs), run).await;
    let stderr_text = stderr_task.await.unwrap_or_default();

    let status = match result {
        Ok(Ok(exit)) if exit.success() => {
            info!(sub_job_id = %sub_id, output = %output.display(), "Conversion completed");
            SubJobStatus::completed(output)
        }
        Ok(Ok(exit)) => {
            let tail = stderr_text.trim();
            let reason = if tail.is_empty() {
                format!("ffmpeg exited with code: {:?}", exit.code())
            } else {
                tail.lines().last().unwrap_or(tail).to_string()
            };
            warn!(sub_job_id = %sub_id, error = %reason, "Conversion failed");
            SubJobStatus::failed(reason)
        }
        Ok(Err(e)) => SubJobStatus::failed(e.to_string()),
        Err(_) => SubJobStatus::failed(
            TranscoderError::Timeout {
                timeout_secs: config.timeout_secs,
            }
            .to_string(),
        ),
    };

    set_status(&jobs, &sub_id, status).await;
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn submit(&self, request: TranscodeRequest) -> Result<String, TranscoderError> {
        if !tokio::fs::try_exists(&request.input_path).await.unwrap_or(false) {
            return Err(TranscoderError::InputNotFound {
                path: request.input_path,
            });
        }

        let profile = OutputProfile::resolve(&request.output_format)
            .ok_or_else(|| TranscoderError::UnknownProfile(request.output_format.clone()))?;

        let sub_id = request
            .sub_job_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.prune_finished().await;
        {
            let mut jobs = self.jobs.write().await;
            if jobs.get(&sub_id).is_some_and(|e| e.finished_at.is_none()) {
                return Err(TranscoderError::AlreadyRunning(sub_id));
            }
            jobs.insert(
                sub_id.clone(),
                SubJobEntry {
                    status: SubJobStatus::pending(),
                    finished_at: None,
                },
            );
        }

        let output = self.output_path(&request.input_path, &profile, &sub_id);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.build_args(&request.input_path, &output, &profile);
        debug!(sub_job_id = %sub_id, profile = %profile.key, "Submitting conversion");

        tokio::spawn(run_sub_job(
            self.config.clone(),
            Arc::clone(&self.jobs),
            sub_id.clone(),
            request.input_path,
            output,
            args,
        ));

        Ok(sub_id)
    }

    async fn poll_status(&self, sub_job_id: &str) -> Result<SubJobStatus, TranscoderError> {
        self.prune_finished().await;
        self.jobs
            .read()
            .await
            .get(sub_job_id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| TranscoderError::UnknownSubJob(sub_job_id.to_string()))
    }

    async fn extract_thumbnail(
        &self,
        input_path: &Path,
        timestamp_secs: u64,
    ) -> Result<Vec<u8>, TranscoderError> {
        if !tokio::fs::try_exists(input_path).await.unwrap_or(false) {
            return Err(TranscoderError::InputNotFound {
                path: input_path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffmpeg_path)
            .args(Self::thumbnail_args(input_path, timestamp_secs))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = timeout(Duration::from_secs(self.config.thumbnail_timeout_secs), output)
            .await
            .map_err(|_| TranscoderError::Timeout {
                timeout_secs: self.config.thumbnail_timeout_secs,
            })?
            .map_err(|e| Self::spawn_error(&self.config.ffmpeg_path, e))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(TranscoderError::ThumbnailFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output.stdout)
    }
}
