use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use log::debug;
use crate::config::{EncodeOptions, NanoConfig};

/// Captured output of a finished ffmpeg process
#[derive(Debug, Clone)]
pub struct FFmpegOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl FFmpegOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One file handed to the encoder
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub options: &'a EncodeOptions,
}

/// Black-box video encoder.
///
/// On success the complete result must exist at `request.output`. On
/// failure the returned text is the encoder's own diagnostic output.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, request: EncodeRequest<'_>) -> Result<(), String>;
}

/// Encodes to HEVC with the ffmpeg binary, copying audio and subtitles
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    pub ffmpeg_bin: PathBuf,
    pub timeout_secs: Option<u64>,
}

impl FfmpegEncoder {
    pub fn new(cfg: &NanoConfig) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            timeout_secs: cfg.encode_timeout_secs,
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, request: EncodeRequest<'_>) -> Result<(), String> {
        let args = build_encode_command(request.input, request.output, request.options);
        let output = run_ffmpeg(&self.ffmpeg_bin, &args, self.timeout_secs).await?;
        if output.success() {
            Ok(())
        } else {
            Err(format!(
                "ffmpeg exited with code {}\n{}",
                output.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none (killed by signal)".to_string()),
                output.stderr.trim()
            ))
        }
    }
}

/// Build the ffmpeg argument list for one encode
pub fn build_encode_command(input: &Path, output: &Path, options: &EncodeOptions) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    args.push("-hide_banner".to_string());
    args.push("-nostdin".to_string());
    // the output is always our own in-progress name
    args.push("-y".to_string());

    args.push("-i".to_string());
    args.push(input.to_string_lossy().into_owned());

    // First video stream plus every audio and subtitle stream
    args.push("-map".to_string());
    args.push("0:v:0".to_string());
    args.push("-map".to_string());
    args.push("0:a?".to_string());
    args.push("-map".to_string());
    args.push("0:s?".to_string());

    args.push("-c:v".to_string());
    args.push("libx265".to_string());
    args.push("-crf".to_string());
    args.push(options.crf.to_string());
    args.push("-preset".to_string());
    args.push(options.preset.as_str().to_string());
    if let Some(tune) = options.tune {
        args.push("-tune".to_string());
        args.push(tune.as_str().to_string());
    }
    args.push("-threads".to_string());
    args.push(options.threads.to_string());

    args.push("-c:a".to_string());
    args.push("copy".to_string());
    args.push("-c:s".to_string());
    args.push("copy".to_string());

    // QuickTime wants hvc1 and 8-bit 4:2:0
    args.push("-tag:v".to_string());
    args.push("hvc1".to_string());
    let mut filters = vec!["format=yuv420p".to_string()];
    if let Some(height) = options.downscale {
        filters.push(format!("scale=-2:{}", height));
    }
    args.push("-vf".to_string());
    args.push(filters.join(","));

    args.push("-loglevel".to_string());
    args.push("error".to_string());

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Spawn ffmpeg, collect its output and enforce an optional timeout.
///
/// The child is killed if this future is dropped or the timeout expires.
pub async fn run_ffmpeg(
    ffmpeg_bin: &Path,
    args: &[String],
    timeout_secs: Option<u64>,
) -> Result<FFmpegOutput, String> {
    debug!("Executing: {} {}", ffmpeg_bin.display(), args.join(" "));

    let mut child = Command::new(ffmpeg_bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", ffmpeg_bin.display(), e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture ffmpeg stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "failed to capture ffmpeg stderr".to_string())?;
    let stdout_handle = tokio::spawn(collect_lines(stdout));
    let stderr_handle = tokio::spawn(collect_lines(stderr));

    let status = match timeout_secs {
        Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(result) => result.map_err(|e| format!("failed to wait for ffmpeg: {}", e))?,
            Err(_) => {
                child
                    .kill()
                    .await
                    .map_err(|e| format!("failed to kill stuck ffmpeg process: {}", e))?;
                return Err(format!("ffmpeg timed out after {} seconds and was killed", secs));
            }
        },
        None => child
            .wait()
            .await
            .map_err(|e| format!("failed to wait for ffmpeg: {}", e))?,
    };

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();
    debug!(
        "ffmpeg exit code: {:?}, stdout length: {}, stderr length: {}",
        status.code(),
        stdout.len(),
        stderr.len()
    );

    Ok(FFmpegOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = Vec::new();
    let mut line_stream = BufReader::new(reader).lines();
    while let Ok(Some(line)) = line_stream.next_line().await {
        lines.push(line);
    }
    lines.join("\n")
}
