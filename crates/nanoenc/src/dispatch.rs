use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use log::{error, info, warn};
use crate::config::NanoConfig;
use crate::error::NanoError;
use crate::ffmpeg::Encoder;
use crate::ffprobe::MediaProbe;
use crate::format::{human_bytes, human_delta, human_duration};
use crate::job::{process_group, JobOutcome, JobRecord, JobSettings, SkipReason};
use crate::media::Identity;
use crate::scan::ScanResult;

/// Aggregate of one `optimize` run
#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub wall_time: Duration,
    /// One record per group that was processed, sorted by identity
    pub records: Vec<JobRecord>,
    /// Groups never started because the run halted
    pub not_dispatched: Vec<Identity>,
    /// Video files whose names could not be classified, with the reason
    pub rejected: Vec<(PathBuf, String)>,
    pub halted: bool,
    /// Worker tasks that panicked or were aborted
    pub lost_tasks: usize,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Sum of per-file encode times
    pub encode_time: Duration,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        RunSummary {
            started_at,
            wall_time: Duration::ZERO,
            records: Vec::new(),
            not_dispatched: Vec::new(),
            rejected: Vec::new(),
            halted: false,
            lost_tasks: 0,
            input_bytes: 0,
            output_bytes: 0,
            encode_time: Duration::ZERO,
        }
    }

    fn record(&mut self, record: JobRecord) {
        if let Some(stats) = record.outcome.stats() {
            self.input_bytes += stats.input_bytes;
            self.output_bytes += stats.output_bytes;
            self.encode_time += stats.elapsed;
        }
        self.records.push(record);
    }

    pub fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Succeeded(_)))
    }

    pub fn regressed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::SizeRegressed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(JobOutcome::is_failure) + self.lost_tasks + self.rejected.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Identity, &NanoError)> {
        self.records.iter().filter_map(|r| match &r.outcome {
            JobOutcome::Failed(e) => Some((&r.identity, e)),
            _ => None,
        })
    }

    /// Bytes saved across all finished encodes, negative when the total grew
    pub fn saved_bytes(&self) -> i64 {
        self.input_bytes as i64 - self.output_bytes as i64
    }

    /// True when nothing failed and the run was not halted
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.halted
    }

    /// Multi-line report for the operator
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "{} encoded, {} grew, {} skipped, {} failed",
            self.succeeded(),
            self.regressed(),
            self.skipped(),
            self.failed()
        )];
        lines.push(format!(
            "Total size: {} → {} ({})",
            human_bytes(self.input_bytes),
            human_bytes(self.output_bytes),
            human_delta(-self.saved_bytes())
        ));
        lines.push(format!(
            "Total duration: {} (encoding {})",
            human_duration(self.wall_time),
            human_duration(self.encode_time)
        ));
        for (identity, error) in self.failures() {
            lines.push(format!("FAILED {}: {}", identity, error));
        }
        for (path, reason) in &self.rejected {
            lines.push(format!("REJECTED {}: {}", path.display(), reason));
        }
        for record in &self.records {
            if let JobOutcome::SizeRegressed(stats) = &record.outcome {
                lines.push(format!(
                    "GREW {}: {} → {}",
                    record.identity,
                    human_bytes(stats.input_bytes),
                    human_bytes(stats.output_bytes)
                ));
            }
        }
        if self.halted {
            lines.push(format!(
                "Halted after a size regression; {} group(s) not started. Try a higher CRF.",
                self.not_dispatched.len()
            ));
        }
        lines.join("\n")
    }
}

/// Runs the per-group state machine over a scan with bounded parallelism
pub struct Dispatcher {
    encoder: Arc<dyn Encoder>,
    probe: Option<Arc<dyn MediaProbe>>,
    settings: Arc<JobSettings>,
    workers: usize,
    halt_on_regression: bool,
}

impl Dispatcher {
    pub fn new(cfg: &NanoConfig, encoder: Arc<dyn Encoder>, probe: Option<Arc<dyn MediaProbe>>) -> Self {
        Dispatcher {
            encoder,
            probe,
            settings: Arc::new(JobSettings {
                options: cfg.encode.clone(),
                force_encode: cfg.force_encode,
            }),
            workers: cfg.workers.max(1),
            halt_on_regression: cfg.halt_on_regression,
        }
    }

    /// Process every group of `scan` once.
    ///
    /// Groups are handed out in scan order; each group is owned by exactly
    /// one task. Conflicting groups are reported as failures without being
    /// touched. After a regression with halting enabled no further group is
    /// started, but jobs already running are allowed to finish.
    ///
    /// Dropping the returned future aborts all in-flight jobs, which kills
    /// their encoder processes.
    pub async fn run(&self, scan: &ScanResult) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(Utc::now());
        summary.rejected = scan
            .rejected
            .iter()
            .map(|(path, e)| (path.clone(), e.to_string()))
            .collect();

        for conflict in &scan.conflicts {
            let detail = match &conflict.error {
                NanoError::ClassificationAmbiguity { detail, .. } => detail.clone(),
                other => other.to_string(),
            };
            summary.record(JobRecord {
                identity: conflict.identity.clone(),
                outcome: JobOutcome::Failed(NanoError::ClassificationAmbiguity {
                    subject: conflict.identity.to_string(),
                    detail,
                }),
            });
        }

        let total = scan.groups.len();
        info!("Dispatching {} group(s) with {} worker(s)", total, self.workers);

        let mut pending = scan.groups.values();
        let mut in_flight: JoinSet<JobRecord> = JoinSet::new();
        let mut dispatched = 0usize;

        loop {
            while !summary.halted && in_flight.len() < self.workers {
                let Some(group) = pending.next() else { break };
                dispatched += 1;
                let group = group.clone();
                let encoder = Arc::clone(&self.encoder);
                let probe = self.probe.clone();
                let settings = Arc::clone(&self.settings);
                in_flight.spawn(async move {
                    let outcome = process_group(&group, &settings, encoder.as_ref(), probe.as_deref()).await;
                    JobRecord {
                        identity: group.identity,
                        outcome,
                    }
                });
            }

            let Some(joined) = in_flight.join_next().await else { break };
            match joined {
                Ok(record) => {
                    if let JobOutcome::Failed(e) = &record.outcome {
                        error!("❌ {}: {}", record.identity, e);
                    }
                    if matches!(record.outcome, JobOutcome::SizeRegressed(_)) && self.halt_on_regression {
                        warn!("Halting optimization: '{}' size increased", record.identity);
                        summary.halted = true;
                    }
                    if matches!(record.outcome, JobOutcome::Skipped(SkipReason::AlreadyCompleted)) {
                        info!("'{}' has optimized version. Skipping.", record.identity);
                    }
                    summary.record(record);
                }
                Err(e) => {
                    error!("Worker task did not complete: {}", e);
                    summary.lost_tasks += 1;
                }
            }
            info!("Progress: {}/{} groups done", summary.records.len() - scan.conflicts.len(), total);
        }

        summary.not_dispatched = pending.map(|g| g.identity.clone()).collect();
        summary.records.sort_by(|a, b| a.identity.cmp(&b.identity));
        summary.wall_time = started.elapsed();

        info!(
            "Completed run: {} dispatched, {} not started, {} saved in {}",
            dispatched,
            summary.not_dispatched.len(),
            human_delta(summary.saved_bytes()),
            human_duration(summary.wall_time)
        );
        summary
    }
}
