use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use log::debug;
use crate::error::{NanoError, NanoResult};

/// Subset of ffprobe's JSON output
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl FFProbeData {
    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Codec name of the first video stream, lowercased
    pub fn video_codec(&self) -> Option<String> {
        self.video_stream()
            .and_then(|s| s.codec_name.as_deref())
            .map(|c| c.to_lowercase())
    }

    /// Width and height of the first video stream
    pub fn resolution(&self) -> Option<(i32, i32)> {
        let s = self.video_stream()?;
        Some((s.width?, s.height?))
    }

    /// Container duration in seconds
    pub fn duration_secs(&self) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| *d > 0.0)
    }

    /// True when the video is already HEVC/H.265
    pub fn is_hevc(&self) -> bool {
        self.video_codec()
            .map(|c| ["hevc", "h265", "h.265"].iter().any(|n| c.contains(n)))
            .unwrap_or(false)
    }
}

/// Source of container/stream metadata
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> NanoResult<FFProbeData>;
}

/// Runs the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    pub ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> NanoResult<FFProbeData> {
        let fail = |diagnostics: String| NanoError::Probe {
            path: path.to_path_buf(),
            diagnostics,
        };

        if !path.exists() {
            return Err(fail("file does not exist".to_string()));
        }

        debug!("ffprobe: probing {}", path.display());
        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| fail(format!("failed to execute {}: {}", self.ffprobe_bin.display(), e)))?;

        if !output.status.success() {
            return Err(fail(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe_output(&output.stdout).map_err(fail)
    }
}

fn parse_probe_output(stdout: &[u8]) -> Result<FFProbeData, String> {
    let json = std::str::from_utf8(stdout).map_err(|_| "ffprobe output is not valid UTF-8".to_string())?;
    serde_json::from_str(json).map_err(|e| format!("failed to parse ffprobe JSON: {}", e))
}
