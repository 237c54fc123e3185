use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::error::{NanoError, NanoResult};

pub const CRF_MIN: u8 = 0;
pub const CRF_MAX: u8 = 51;

/// Configuration shared by every command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NanoConfig {
    /// Path to the ffmpeg binary (encoder and similarity analyzer)
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Extensions (lowercase, without dot) considered video files
    pub video_extensions: Vec<String>,
    /// Number of files encoded in parallel
    pub workers: usize,
    /// Stop scheduling new encodes once an output is not smaller than its input
    pub halt_on_regression: bool,
    /// Encode sources that are already HEVC
    pub force_encode: bool,
    /// Fraction of completed pairs checked by `health`
    pub sample_ratio: f64,
    /// Kill an encode that runs longer than this
    pub encode_timeout_secs: Option<u64>,
    /// Encoder rate control and speed settings
    pub encode: EncodeOptions,
}

impl Default for NanoConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl NanoConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            video_extensions: ["mkv", "mp4", "mov", "m4v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            workers: 1,
            halt_on_regression: false,
            force_encode: false,
            sample_ratio: 0.05,
            encode_timeout_secs: None,
            encode: EncodeOptions::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Reject values no command can run with
    pub fn validate(&self) -> NanoResult<()> {
        if self.encode.crf > CRF_MAX {
            return Err(NanoError::InvalidConfig(format!(
                "crf must be between {} and {}, got {}",
                CRF_MIN, CRF_MAX, self.encode.crf
            )));
        }
        if self.workers == 0 {
            return Err(NanoError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if !(self.sample_ratio > 0.0 && self.sample_ratio <= 1.0) {
            return Err(NanoError::InvalidConfig(format!(
                "sample ratio must be in (0, 1], got {}",
                self.sample_ratio
            )));
        }
        if self.video_extensions.is_empty() {
            return Err(NanoError::InvalidConfig("no video extensions configured".to_string()));
        }
        if self.encode.downscale == Some(0) {
            return Err(NanoError::InvalidConfig("downscale height must be positive".to_string()));
        }
        Ok(())
    }

    /// Case-insensitive check against `video_extensions`
    pub fn is_video_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.video_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }
}

/// Options handed to the encoder for every file of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Constant rate factor (lower = better quality, larger file)
    pub crf: u8,
    pub preset: Preset,
    pub tune: Option<Tune>,
    /// Target height; width follows the aspect ratio
    pub downscale: Option<u32>,
    /// Encoder thread count, 0 lets the encoder decide
    pub threads: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            crf: 28,
            preset: Preset::Medium,
            tune: None,
            downscale: None,
            threads: 0,
        }
    }
}

/// x265 speed/efficiency presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub const ALL: [Preset; 9] = [
        Preset::Ultrafast,
        Preset::Superfast,
        Preset::Veryfast,
        Preset::Faster,
        Preset::Fast,
        Preset::Medium,
        Preset::Slow,
        Preset::Slower,
        Preset::Veryslow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Preset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

/// x265 tuning profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tune {
    Animation,
    Grain,
    Stillimage,
    Fastdecode,
    Zerolatency,
}

impl Tune {
    pub const ALL: [Tune; 5] = [
        Tune::Animation,
        Tune::Grain,
        Tune::Stillimage,
        Tune::Fastdecode,
        Tune::Zerolatency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tune::Animation => "animation",
            Tune::Grain => "grain",
            Tune::Stillimage => "stillimage",
            Tune::Fastdecode => "fastdecode",
            Tune::Zerolatency => "zerolatency",
        }
    }
}

impl fmt::Display for Tune {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tune {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Tune::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown tune '{}'", s))
    }
}
