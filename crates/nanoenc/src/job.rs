use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use serde::Serialize;
use log::{debug, info, warn};
use crate::config::EncodeOptions;
use crate::error::NanoError;
use crate::ffmpeg::{EncodeRequest, Encoder};
use crate::ffprobe::MediaProbe;
use crate::format::{human_bytes, human_duration};
use crate::media::{Identity, TagState};
use crate::scan::FileGroup;

/// Why a group needed no work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// A completed encode already exists
    AlreadyCompleted,
    /// Source video is already HEVC and encoding was not forced
    AlreadyEfficient,
    /// Nothing in the group can be encoded
    NoOriginal,
}

/// Sizes and timing of one finished encode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeStats {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub elapsed: Duration,
}

impl EncodeStats {
    /// Bytes saved, negative when the output grew
    pub fn saved_bytes(&self) -> i64 {
        self.input_bytes as i64 - self.output_bytes as i64
    }

    pub fn ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            return 1.0;
        }
        self.output_bytes as f64 / self.input_bytes as f64
    }
}

/// Result of running the state machine over one group
#[derive(Debug)]
pub enum JobOutcome {
    Skipped(SkipReason),
    Succeeded(EncodeStats),
    /// Encode finished but output is not smaller than input
    SizeRegressed(EncodeStats),
    Failed(NanoError),
}

impl JobOutcome {
    pub fn stats(&self) -> Option<&EncodeStats> {
        match self {
            JobOutcome::Succeeded(s) | JobOutcome::SizeRegressed(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed(_))
    }
}

/// Outcome tagged with the group it belongs to
#[derive(Debug)]
pub struct JobRecord {
    pub identity: Identity,
    pub outcome: JobOutcome,
}

/// Per-run settings the state machine needs
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub options: EncodeOptions,
    pub force_encode: bool,
}

/// Drive one group through its lifecycle.
///
/// In-progress artifacts found here always come from an earlier run and are
/// deleted before anything else happens; the encode is then redone from the
/// original.
pub async fn process_group(
    group: &FileGroup,
    settings: &JobSettings,
    encoder: &dyn Encoder,
    probe: Option<&dyn MediaProbe>,
) -> JobOutcome {
    let original = match (&group.original, &group.in_progress, &group.completed) {
        (_, in_progress, Some(completed)) => {
            if let Some(orphan) = in_progress {
                if let Err(e) = discard_orphan(&orphan.path) {
                    return JobOutcome::Failed(e);
                }
            }
            debug!("{}: already completed as {}", group.identity, completed.path.display());
            return JobOutcome::Skipped(SkipReason::AlreadyCompleted);
        }
        (None, Some(orphan), None) => {
            warn!("{}: in-progress file without an original", group.identity);
            return JobOutcome::Failed(NanoError::OrphanWithoutOriginal {
                path: orphan.path.clone(),
            });
        }
        (None, None, None) => return JobOutcome::Skipped(SkipReason::NoOriginal),
        (Some(original), in_progress, None) => {
            if let Some(orphan) = in_progress {
                if let Err(e) = discard_orphan(&orphan.path) {
                    return JobOutcome::Failed(e);
                }
            }
            original
        }
    };

    let mut media_secs = None;
    if let Some(probe) = probe {
        match probe.probe(&original.path).await {
            Ok(meta) if meta.is_hevc() && !settings.force_encode => {
                info!("'{}' is already h.265 encoded. Skipping.", original.file_name());
                return JobOutcome::Skipped(SkipReason::AlreadyEfficient);
            }
            Ok(meta) => media_secs = meta.duration_secs(),
            Err(e) => warn!("{}; encoding anyway", e),
        }
    }

    let in_progress = original.path_as(TagState::InProgress);
    let completed = original.path_as(TagState::Completed);
    let outcome = transcode(&original.path, &in_progress, &completed, settings, encoder).await;
    if let (JobOutcome::Succeeded(stats), Some(secs)) = (&outcome, media_secs) {
        let elapsed = stats.elapsed.as_secs_f64();
        if elapsed > 0.0 {
            info!("'{}' encoded at {:.2}x speed", original.file_name(), secs / elapsed);
        }
    }
    outcome
}

fn discard_orphan(path: &Path) -> Result<(), NanoError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("🗑️  Deleted partially completed file '{}'", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NanoError::io(path, e)),
    }
}

/// Original → InProgress → Completed
async fn transcode(
    input: &Path,
    in_progress: &Path,
    completed: &Path,
    settings: &JobSettings,
    encoder: &dyn Encoder,
) -> JobOutcome {
    let input_bytes = match fs::metadata(input) {
        Ok(m) => m.len(),
        Err(e) => return JobOutcome::Failed(NanoError::io(input, e)),
    };

    info!("Starting encoding for '{}'", input.display());
    let started = Instant::now();
    let request = EncodeRequest {
        input,
        output: in_progress,
        options: &settings.options,
    };
    if let Err(diagnostics) = encoder.encode(request).await {
        if let Err(e) = discard_orphan(in_progress) {
            warn!("{}", e);
        }
        return JobOutcome::Failed(NanoError::EncoderFailure {
            input: input.to_path_buf(),
            diagnostics,
        });
    }
    let elapsed = started.elapsed();

    let output_bytes = match fs::metadata(in_progress) {
        Ok(m) => m.len(),
        Err(_) => {
            return JobOutcome::Failed(NanoError::EncoderFailure {
                input: input.to_path_buf(),
                diagnostics: format!("encoder reported success but {} was not created", in_progress.display()),
            });
        }
    };

    if let Err(e) = fs::rename(in_progress, completed) {
        if let Err(cleanup) = discard_orphan(in_progress) {
            warn!("{}", cleanup);
        }
        return JobOutcome::Failed(NanoError::io(completed, e));
    }

    let stats = EncodeStats {
        input: input.to_path_buf(),
        output: completed.to_path_buf(),
        input_bytes,
        output_bytes,
        elapsed,
    };

    if output_bytes >= input_bytes {
        warn!(
            "'{}' did not shrink: {} → {} in {}",
            input.display(),
            human_bytes(input_bytes),
            human_bytes(output_bytes),
            human_duration(elapsed)
        );
        JobOutcome::SizeRegressed(stats)
    } else {
        info!(
            "✅ Finished encoding '{}': {} → {} ({:.0}% of original) in {}",
            input.display(),
            human_bytes(input_bytes),
            human_bytes(output_bytes),
            stats.ratio() * 100.0,
            human_duration(elapsed)
        );
        JobOutcome::Succeeded(stats)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream};
    use crate::media::MediaFile;
    use crate::error::NanoResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Writes `factor` times the input length; fails for names containing "broken"
    pub(crate) struct FakeEncoder {
        pub factor: f64,
        pub grow_if_contains: Option<String>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<PathBuf>>,
    }

    impl FakeEncoder {
        pub(crate) fn shrinking() -> Self {
            FakeEncoder {
                factor: 0.5,
                grow_if_contains: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn encode(&self, request: EncodeRequest<'_>) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.input.to_path_buf());
            let name = request.input.to_string_lossy().into_owned();
            // leave a partial file behind like a real encoder would
            fs::write(request.output, b"partial").map_err(|e| e.to_string())?;
            if name.contains("broken") {
                return Err("Invalid data found when processing input".to_string());
            }
            let data = fs::read(request.input).map_err(|e| e.to_string())?;
            let factor = match &self.grow_if_contains {
                Some(needle) if name.contains(needle.as_str()) => 2.0,
                _ => self.factor,
            };
            let len = (data.len() as f64 * factor) as usize;
            let encoded: Vec<u8> = data.iter().cycle().take(len).map(|b| b ^ 0x5a).collect();
            fs::write(request.output, encoded).map_err(|e| e.to_string())
        }
    }

    pub(crate) struct FixedProbe {
        pub codec: &'static str,
    }

    #[async_trait]
    impl MediaProbe for FixedProbe {
        async fn probe(&self, _path: &Path) -> NanoResult<FFProbeData> {
            Ok(FFProbeData {
                streams: vec![FFProbeStream {
                    codec_type: Some("video".into()),
                    codec_name: Some(self.codec.into()),
                    width: Some(1920),
                    height: Some(1080),
                    ..Default::default()
                }],
                format: FFProbeFormat::default(),
            })
        }
    }

    fn settings() -> JobSettings {
        JobSettings {
            options: EncodeOptions::default(),
            force_encode: false,
        }
    }

    fn group_of(dir: &Path, names: &[&str]) -> FileGroup {
        let members: Vec<MediaFile> = names
            .iter()
            .map(|n| MediaFile::from_path(&dir.join(n)).unwrap())
            .collect();
        FileGroup::from_members(members[0].identity(), members).unwrap()
    }

    #[tokio::test]
    async fn test_original_only_is_encoded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.mp4"), vec![1u8; 1000]).unwrap();
        let encoder = FakeEncoder::shrinking();

        let outcome = process_group(&group_of(dir.path(), &["movie.mp4"]), &settings(), &encoder, None).await;
        let stats = match outcome {
            JobOutcome::Succeeded(s) => s,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(stats.input_bytes, 1000);
        assert_eq!(stats.output_bytes, 500);
        assert_eq!(stats.saved_bytes(), 500);
        assert!(dir.path().join("movie.mp4").exists());
        assert!(dir.path().join("movie.optimized.mp4").exists());
        assert!(!dir.path().join("movie.optimizing.mp4").exists());
    }

    #[tokio::test]
    async fn test_completed_is_skipped_without_encoding() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.mp4"), b"orig").unwrap();
        fs::write(dir.path().join("movie.optimized.mp4"), b"done").unwrap();
        let encoder = FakeEncoder::shrinking();

        let both = group_of(dir.path(), &["movie.mp4", "movie.optimized.mp4"]);
        let outcome = process_group(&both, &settings(), &encoder, None).await;
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::AlreadyCompleted)));

        let untagged = group_of(dir.path(), &["movie.optimized.mp4"]);
        let outcome = process_group(&untagged, &settings(), &encoder, None).await;
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::AlreadyCompleted)));
        assert_eq!(encoder.calls(), 0);
    }

    #[tokio::test]
    async fn test_lingering_orphan_next_to_completed_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["movie.mp4", "movie.optimized.mp4", "movie.optimizing.mp4"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let encoder = FakeEncoder::shrinking();
        let group = group_of(dir.path(), &["movie.mp4", "movie.optimized.mp4", "movie.optimizing.mp4"]);

        let outcome = process_group(&group, &settings(), &encoder, None).await;
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::AlreadyCompleted)));
        assert!(!dir.path().join("movie.optimizing.mp4").exists());
        assert_eq!(encoder.calls(), 0);
    }

    #[tokio::test]
    async fn test_orphan_is_discarded_and_redone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.mkv"), vec![7u8; 400]).unwrap();
        fs::write(dir.path().join("movie.optimizing.mkv"), b"garbage from a crash").unwrap();
        let encoder = FakeEncoder::shrinking();

        let group = group_of(dir.path(), &["movie.mkv", "movie.optimizing.mkv"]);
        let outcome = process_group(&group, &settings(), &encoder, None).await;
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert_eq!(encoder.calls(), 1);
        assert!(!dir.path().join("movie.optimizing.mkv").exists());
        let encoded = fs::read(dir.path().join("movie.optimized.mkv")).unwrap();
        assert_eq!(encoded, vec![7u8 ^ 0x5a; 200]);
    }

    #[tokio::test]
    async fn test_orphan_without_original_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.optimizing.mp4"), b"partial").unwrap();
        let encoder = FakeEncoder::shrinking();

        let outcome = process_group(&group_of(dir.path(), &["movie.optimizing.mp4"]), &settings(), &encoder, None).await;
        assert!(matches!(outcome, JobOutcome::Failed(NanoError::OrphanWithoutOriginal { .. })));
        // left in place for the operator
        assert!(dir.path().join("movie.optimizing.mp4").exists());
        assert_eq!(encoder.calls(), 0);
    }

    #[tokio::test]
    async fn test_encoder_failure_cleans_up_and_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.mp4"), b"not a video").unwrap();
        let encoder = FakeEncoder::shrinking();

        let outcome = process_group(&group_of(dir.path(), &["broken.mp4"]), &settings(), &encoder, None).await;
        match outcome {
            JobOutcome::Failed(NanoError::EncoderFailure { diagnostics, .. }) => {
                assert_eq!(diagnostics, "Invalid data found when processing input");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!dir.path().join("broken.optimizing.mp4").exists());
        assert!(!dir.path().join("broken.optimized.mp4").exists());
        assert!(dir.path().join("broken.mp4").exists());
    }

    #[tokio::test]
    async fn test_growth_is_a_regression() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tiny.mp4"), vec![1u8; 100]).unwrap();
        let encoder = FakeEncoder {
            grow_if_contains: Some("tiny".to_string()),
            ..FakeEncoder::shrinking()
        };

        let outcome = process_group(&group_of(dir.path(), &["tiny.mp4"]), &settings(), &encoder, None).await;
        match outcome {
            JobOutcome::SizeRegressed(stats) => {
                assert_eq!(stats.output_bytes, 200);
                assert!(stats.saved_bytes() < 0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(dir.path().join("tiny.optimized.mp4").exists());
    }

    #[tokio::test]
    async fn test_hevc_source_is_skipped_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.mp4"), vec![1u8; 10]).unwrap();
        let encoder = FakeEncoder::shrinking();
        let probe = FixedProbe { codec: "hevc" };
        let group = group_of(dir.path(), &["movie.mp4"]);

        let outcome = process_group(&group, &settings(), &encoder, Some(&probe)).await;
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::AlreadyEfficient)));
        assert_eq!(encoder.calls(), 0);

        let forced = JobSettings { force_encode: true, ..settings() };
        let outcome = process_group(&group, &forced, &encoder, Some(&probe)).await;
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert_eq!(encoder.calls(), 1);
    }
}
