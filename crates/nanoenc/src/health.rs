use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::index;
use rand::Rng;
use serde::Serialize;
use log::{info, warn};
use crate::error::{NanoError, NanoResult};
use crate::ffmpeg::run_ffmpeg;
use crate::ffprobe::MediaProbe;
use crate::format::{human_bytes, human_delta};
use crate::media::Identity;
use crate::scan::{FileGroup, ScanResult};

/// Scores at or above this are graded good
pub const GOOD_THRESHOLD: f64 = 0.990;
/// Scores at or above this (and below good) are graded fair
pub const FAIR_THRESHOLD: f64 = 0.980;

/// How many completed pairs to verify
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SampleMode {
    Ratio(f64),
    All,
}

/// Number of pairs selected from a population of `population`.
///
/// `max(1, ceil(ratio × population))` capped at the population; zero for an
/// empty population.
pub fn sample_size(population: usize, mode: SampleMode) -> usize {
    if population == 0 {
        return 0;
    }
    match mode {
        SampleMode::All => population,
        SampleMode::Ratio(ratio) => {
            let n = (ratio * population as f64).ceil();
            (n.max(1.0) as usize).min(population)
        }
    }
}

/// Pick pairs uniformly at random without replacement, preserving scan order
pub fn select_sample<'a, R: Rng + ?Sized>(
    population: &[&'a FileGroup],
    mode: SampleMode,
    rng: &mut R,
) -> Vec<&'a FileGroup> {
    let amount = sample_size(population.len(), mode);
    let mut picked = index::sample(rng, population.len(), amount).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| population[i]).collect()
}

/// Perceptual similarity between a reference and a candidate
#[async_trait]
pub trait SimilarityAnalyzer: Send + Sync {
    /// Score in [0, 1]; higher is more similar
    async fn similarity(&self, reference: &Path, candidate: &Path) -> NanoResult<f64>;
}

/// SSIM through ffmpeg's `ssim` filter
#[derive(Debug, Clone)]
pub struct FfmpegSsim {
    pub ffmpeg_bin: PathBuf,
}

impl FfmpegSsim {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }
}

#[async_trait]
impl SimilarityAnalyzer for FfmpegSsim {
    async fn similarity(&self, reference: &Path, candidate: &Path) -> NanoResult<f64> {
        let fail = |diagnostics: String| NanoError::SimilarityFailure {
            reference: reference.to_path_buf(),
            candidate: candidate.to_path_buf(),
            diagnostics,
        };

        let args = build_ssim_command(reference, candidate);
        let output = run_ffmpeg(&self.ffmpeg_bin, &args, None).await.map_err(fail)?;
        if !output.success() {
            return Err(fail(output.stderr.trim().to_string()));
        }
        parse_ssim(&output.stderr)
            .ok_or_else(|| fail("SSIM score not found in ffmpeg output".to_string()))
    }
}

/// Decode both files and print only the ssim summary line (on stderr)
pub fn build_ssim_command(reference: &Path, candidate: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        reference.to_string_lossy().into_owned(),
        "-i".into(),
        candidate.to_string_lossy().into_owned(),
        "-lavfi".into(),
        "[0:v][1:v]ssim".into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]
}

/// Last `All:<score>` value in ffmpeg's ssim summary
pub fn parse_ssim(stderr: &str) -> Option<f64> {
    let start = stderr.rfind("All:")? + "All:".len();
    let digits: String = stderr[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok()
}

/// Quality verdict for one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    Good,
    Fair,
    Poor,
    /// Resolutions differ, so no score was computed
    ResolutionMismatch,
    /// The analyzer failed
    Unmeasured,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        let score = (score * 1000.0).round() / 1000.0;
        if score >= GOOD_THRESHOLD {
            Grade::Good
        } else if score >= FAIR_THRESHOLD {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }
}

/// Verification result for one identity
#[derive(Debug, Clone, Serialize)]
pub struct HealthEntry {
    pub original: PathBuf,
    pub completed: PathBuf,
    pub score: Option<f64>,
    /// Completed size minus original size, when both could be read
    pub size_delta: Option<i64>,
    pub grade: Grade,
    pub note: Option<String>,
}

impl HealthEntry {
    /// The encode did not save space
    pub fn grew(&self) -> bool {
        self.size_delta.is_some_and(|d| d >= 0)
    }
}

/// Outcome of a health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub mode: SampleMode,
    /// Number of completed pairs eligible for sampling
    pub population: usize,
    pub entries: BTreeMap<Identity, HealthEntry>,
}

impl HealthReport {
    pub fn unmeasured(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.grade == Grade::Unmeasured)
            .count()
    }

    /// One row per entry: original, completed, score, size delta, grade
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Checked {} of {} pair(s)",
            self.entries.len(),
            self.population
        )];
        for entry in self.entries.values() {
            let score = entry
                .score
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".to_string());
            let mut line = format!(
                "{} | {} | SSIM {} | {} | {:?}",
                file_name(&entry.original),
                file_name(&entry.completed),
                score,
                entry.size_delta.map(human_delta).unwrap_or_else(|| "-".to_string()),
                entry.grade
            );
            if entry.grew() {
                line.push_str(" | grew");
            }
            if let Some(note) = &entry.note {
                line.push_str(" | ");
                line.push_str(note);
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_len(path: &Path) -> NanoResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| NanoError::io(path, e))
}

/// Verify a sample of original/completed pairs. Never modifies a file.
pub async fn check_health<R: Rng + ?Sized>(
    scan: &ScanResult,
    mode: SampleMode,
    analyzer: &dyn SimilarityAnalyzer,
    probe: Option<&dyn MediaProbe>,
    rng: &mut R,
) -> NanoResult<HealthReport> {
    let population: Vec<&FileGroup> = scan.pairs().collect();
    let sample = select_sample(&population, mode, rng);
    info!(
        "Performing healthcheck for {}: {} of {} pair(s)",
        scan.root.display(),
        sample.len(),
        population.len()
    );

    let mut report = HealthReport {
        generated_at: Utc::now(),
        mode,
        population: population.len(),
        entries: BTreeMap::new(),
    };

    for group in sample {
        let (Some(original), Some(completed)) = (&group.original, &group.completed) else {
            continue;
        };
        let mut entry = HealthEntry {
            original: original.path.clone(),
            completed: completed.path.clone(),
            score: None,
            size_delta: None,
            grade: Grade::Unmeasured,
            note: None,
        };
        let (original_bytes, completed_bytes) = match (file_len(&original.path), file_len(&completed.path)) {
            (Ok(o), Ok(c)) => (o, c),
            (Err(e), _) | (_, Err(e)) => {
                warn!("{}", e);
                entry.note = Some(e.to_string());
                report.entries.insert(group.identity.clone(), entry);
                continue;
            }
        };
        entry.size_delta = Some(completed_bytes as i64 - original_bytes as i64);

        if let Some(probe) = probe {
            let original_res = probe.probe(&original.path).await.ok().and_then(|m| m.resolution());
            let completed_res = probe.probe(&completed.path).await.ok().and_then(|m| m.resolution());
            if let (Some(a), Some(b)) = (original_res, completed_res) {
                if a != b {
                    entry.grade = Grade::ResolutionMismatch;
                    entry.note = Some(format!(
                        "varying resolutions {}x{} vs {}x{}, unable to compare",
                        a.0, a.1, b.0, b.1
                    ));
                    report.entries.insert(group.identity.clone(), entry);
                    continue;
                }
            }
        }

        info!("Starting SSIM comparison for '{}'", group.identity);
        match analyzer.similarity(&original.path, &completed.path).await {
            Ok(score) => {
                info!(
                    "'{}' = {:.3} SSIM ({} → {})",
                    group.identity,
                    score,
                    human_bytes(original_bytes),
                    human_bytes(completed_bytes)
                );
                entry.score = Some(score);
                entry.grade = Grade::from_score(score);
            }
            Err(e) => {
                warn!("{}", e);
                entry.note = Some(e.to_string());
            }
        }
        report.entries.insert(group.identity.clone(), entry);
    }

    Ok(report)
}
