pub mod config;
pub mod error;
pub mod media;
pub mod scan;
pub mod ffprobe;
pub mod ffmpeg;
pub mod job;
pub mod format;
pub mod dispatch;
pub mod health;
pub mod cleanup;

pub use config::{EncodeOptions, NanoConfig, Preset, Tune};
pub use error::{NanoError, NanoResult};
pub use media::{classify, Identity, MediaFile, TagState};
pub use scan::{scan_directory, validate_directory, FileGroup, ScanResult};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream, FfprobeProbe, MediaProbe};
pub use ffmpeg::{EncodeRequest, Encoder, FfmpegEncoder};
pub use job::{process_group, JobOutcome, JobRecord, JobSettings, SkipReason};
pub use dispatch::{Dispatcher, RunSummary};
pub use health::{check_health, FfmpegSsim, Grade, HealthReport, SampleMode, SimilarityAnalyzer};
pub use cleanup::{purge, untag, PurgePlan, PurgeReport, RemovalMode, Remover, UntagPlan, UntagReport};
