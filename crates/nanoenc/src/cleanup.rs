use std::fs;
use std::path::{Path, PathBuf};
use log::{info, warn};
use crate::error::{NanoError, NanoResult};
use crate::media::TagState;
use crate::scan::ScanResult;

/// How purged originals are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Move to the OS trash (reversible)
    Trash,
    /// Delete outright
    Permanent,
}

impl RemovalMode {
    pub fn remover(&self) -> Box<dyn Remover> {
        match self {
            RemovalMode::Trash => Box::new(TrashRemover),
            RemovalMode::Permanent => Box::new(PermanentRemover),
        }
    }
}

/// Removes one file
pub trait Remover {
    fn remove(&self, path: &Path) -> NanoResult<()>;
}

pub struct TrashRemover;

impl Remover for TrashRemover {
    fn remove(&self, path: &Path) -> NanoResult<()> {
        trash::delete(path).map_err(|e| NanoError::Removal {
            path: path.to_path_buf(),
            diagnostics: format!("trash error: {}", e),
        })
    }
}

pub struct PermanentRemover;

impl Remover for PermanentRemover {
    fn remove(&self, path: &Path) -> NanoResult<()> {
        fs::remove_file(path).map_err(|e| NanoError::Removal {
            path: path.to_path_buf(),
            diagnostics: e.to_string(),
        })
    }
}

/// Original to remove and the completed encode that replaces it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeItem {
    pub original: PathBuf,
    pub completed: PathBuf,
}

/// Everything a purge would remove
#[derive(Debug, Clone)]
pub struct PurgePlan {
    pub mode: RemovalMode,
    pub items: Vec<PurgeItem>,
}

impl PurgePlan {
    /// Confirmation prompt matching the removal mode
    pub fn prompt(&self) -> &'static str {
        match self.mode {
            RemovalMode::Permanent => "Permanently delete these ORIGINAL files?",
            RemovalMode::Trash => "Send these ORIGINAL files to recycling bin/trash?",
        }
    }

    /// "original → completed" per item, for confirmation
    pub fn listing(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|i| format!("{} → {}", i.original.display(), file_name(&i.completed)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, NanoError)>,
}

impl PurgeReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Collect originals that have a completed counterpart.
///
/// Any in-progress file anywhere in the tree means a run never finished; the
/// whole purge is refused so no original loses an unverified replacement.
pub fn plan_purge(scan: &ScanResult, mode: RemovalMode) -> NanoResult<PurgePlan> {
    if let Some(unfinished) = scan.in_progress_files().first() {
        return Err(NanoError::PreconditionViolation(format!(
            "encountered unfinished video '{}', unable to purge originals. \
             Remove this file, or re-run optimize against {} to resolve",
            unfinished.path.display(),
            scan.root.display()
        )));
    }

    let items = scan
        .pairs()
        .filter_map(|g| match (&g.original, &g.completed) {
            (Some(o), Some(c)) => Some(PurgeItem {
                original: o.path.clone(),
                completed: c.path.clone(),
            }),
            _ => None,
        })
        .collect();

    Ok(PurgePlan { mode, items })
}

/// Remove every original in `plan`, continuing past individual failures
pub fn execute_purge(plan: &PurgePlan, remover: &dyn Remover) -> PurgeReport {
    let mut report = PurgeReport::default();
    for item in &plan.items {
        // the replacement must still be there at the moment of removal
        if !item.completed.is_file() {
            report.failed.push((
                item.original.clone(),
                NanoError::PreconditionViolation(format!(
                    "{} disappeared, keeping original",
                    item.completed.display()
                )),
            ));
            continue;
        }
        match remover.remove(&item.original) {
            Ok(()) => {
                info!("Purged '{}' ({:?})", item.original.display(), plan.mode);
                report.removed.push(item.original.clone());
            }
            Err(e) => {
                warn!("{}", e);
                report.failed.push((item.original.clone(), e));
            }
        }
    }
    info!(
        "Purged {} original file(s), {} failure(s)",
        report.removed.len(),
        report.failed.len()
    );
    report
}

/// Plan, confirm, and remove.
///
/// `confirm` sees the full plan before anything is removed and is skipped
/// when `assume_yes` is set. An empty plan removes nothing and never asks.
pub fn purge(
    scan: &ScanResult,
    mode: RemovalMode,
    assume_yes: bool,
    remover: &dyn Remover,
    confirm: impl FnOnce(&PurgePlan) -> bool,
) -> NanoResult<PurgeReport> {
    let plan = plan_purge(scan, mode)?;
    if plan.items.is_empty() {
        info!("No originals with optimized versions found in '{}'", scan.root.display());
        return Ok(PurgeReport::default());
    }
    info!(
        "Found the following to purge: {}",
        plan.items
            .iter()
            .map(|i| file_name(&i.original))
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !assume_yes && !confirm(&plan) {
        info!("User declined the purge");
        return Err(NanoError::ConfirmationDeclined);
    }
    Ok(execute_purge(&plan, remover))
}

/// Completed file and the canonical name it will take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntagItem {
    pub completed: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Default)]
pub struct UntagPlan {
    pub items: Vec<UntagItem>,
    /// Completed files whose canonical name is taken
    pub collisions: Vec<UntagItem>,
}

impl UntagPlan {
    pub fn listing(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|i| format!("{} → {}", i.completed.display(), file_name(&i.target)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct UntagReport {
    pub renamed: Vec<(PathBuf, PathBuf)>,
    pub failed: Vec<(PathBuf, NanoError)>,
}

impl UntagReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Map each completed file to its untagged name, separating out collisions
pub fn plan_untag(scan: &ScanResult) -> UntagPlan {
    let mut plan = UntagPlan::default();
    for group in scan.groups.values() {
        let Some(completed) = &group.completed else { continue };
        let item = UntagItem {
            completed: completed.path.clone(),
            target: completed.path_as(TagState::Original),
        };
        if group.original.is_some() || item.target.exists() {
            plan.collisions.push(item);
        } else {
            plan.items.push(item);
        }
    }
    plan
}

/// Rename every planned item; a target that appeared since planning is refused
pub fn execute_untag(plan: &UntagPlan) -> UntagReport {
    let mut report = UntagReport::default();

    for item in &plan.collisions {
        let error = NanoError::UntagCollision {
            source_path: item.completed.clone(),
            target: item.target.clone(),
        };
        warn!("{}. Consider running purge first", error);
        report.failed.push((item.completed.clone(), error));
    }

    for item in &plan.items {
        if item.target.exists() {
            report.failed.push((
                item.completed.clone(),
                NanoError::UntagCollision {
                    source_path: item.completed.clone(),
                    target: item.target.clone(),
                },
            ));
            continue;
        }
        match fs::rename(&item.completed, &item.target) {
            Ok(()) => {
                info!("Successfully untagged: {} → {}", item.completed.display(), item.target.display());
                report.renamed.push((item.completed.clone(), item.target.clone()));
            }
            Err(e) => report.failed.push((item.completed.clone(), NanoError::io(&item.completed, e))),
        }
    }

    info!("Untagged {} video file(s)", report.renamed.len());
    report
}

/// Plan, confirm, and rename
pub fn untag(
    scan: &ScanResult,
    assume_yes: bool,
    confirm: impl FnOnce(&UntagPlan) -> bool,
) -> NanoResult<UntagReport> {
    let plan = plan_untag(scan);
    if plan.items.is_empty() && plan.collisions.is_empty() {
        info!("There are no videos to untag in '{}'", scan.root.display());
        return Ok(UntagReport::default());
    }
    if !plan.items.is_empty() && !assume_yes && !confirm(&plan) {
        info!("User declined the untag");
        return Err(NanoError::ConfirmationDeclined);
    }
    Ok(execute_untag(&plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NanoConfig;
    use crate::scan::scan_directory;
    use std::cell::RefCell;

    struct Recording {
        removed: RefCell<Vec<PathBuf>>,
        fail_on: Option<&'static str>,
    }

    impl Recording {
        fn new() -> Self {
            Recording {
                removed: RefCell::new(Vec::new()),
                fail_on: None,
            }
        }
    }

    impl Remover for Recording {
        fn remove(&self, path: &Path) -> NanoResult<()> {
            if let Some(needle) = self.fail_on {
                if path.to_string_lossy().contains(needle) {
                    return Err(NanoError::Removal {
                        path: path.to_path_buf(),
                        diagnostics: "trash is full".to_string(),
                    });
                }
            }
            self.removed.borrow_mut().push(path.to_path_buf());
            fs::remove_file(path).map_err(|e| NanoError::io(path, e))
        }
    }

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            let p = dir.path().join(f);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, f.as_bytes()).unwrap();
        }
        dir
    }

    fn scan(dir: &tempfile::TempDir) -> ScanResult {
        scan_directory(&NanoConfig::default(), dir.path()).unwrap()
    }

    #[test]
    fn test_in_progress_anywhere_blocks_purge() {
        let dir = tree(&["a/movie.mp4", "a/movie.optimized.mp4", "deep/er/other.optimizing.mkv", "deep/er/other.mkv"]);
        let remover = Recording::new();

        let err = purge(&scan(&dir), RemovalMode::Permanent, true, &remover, |_| true).unwrap_err();
        assert!(matches!(err, NanoError::PreconditionViolation(_)));
        assert!(remover.removed.borrow().is_empty());
        assert!(dir.path().join("a/movie.mp4").exists());
    }

    #[test]
    fn test_purge_removes_only_paired_originals() {
        let dir = tree(&["movie.mp4", "movie.optimized.mp4", "pending.mp4", "untagged.optimized.mkv"]);
        let remover = Recording::new();
        let mut shown = Vec::new();

        let report = purge(&scan(&dir), RemovalMode::Trash, false, &remover, |plan| {
            shown = plan.listing();
            assert_eq!(plan.prompt(), "Send these ORIGINAL files to recycling bin/trash?");
            true
        })
        .unwrap();

        assert_eq!(shown.len(), 1);
        assert!(shown[0].ends_with("movie.mp4 → movie.optimized.mp4"));
        assert_eq!(report.removed, vec![dir.path().join("movie.mp4")]);
        assert!(report.is_success());
        assert!(dir.path().join("pending.mp4").exists());
        assert!(dir.path().join("movie.optimized.mp4").exists());
    }

    #[test]
    fn test_declined_confirmation_removes_nothing() {
        let dir = tree(&["movie.mp4", "movie.optimized.mp4"]);
        let remover = Recording::new();

        let err = purge(&scan(&dir), RemovalMode::Permanent, false, &remover, |_| false).unwrap_err();
        assert!(matches!(err, NanoError::ConfirmationDeclined));
        assert!(dir.path().join("movie.mp4").exists());
    }

    #[test]
    fn test_empty_purge_never_asks() {
        let dir = tree(&["movie.mp4"]);
        let remover = Recording::new();
        let report = purge(&scan(&dir), RemovalMode::Permanent, false, &remover, |_| {
            panic!("nothing to confirm")
        })
        .unwrap();
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_removal_failure_is_surfaced() {
        let dir = tree(&["a.mp4", "a.optimized.mp4", "b.mp4", "b.optimized.mp4"]);
        let remover = Recording {
            fail_on: Some("a.mp4"),
            ..Recording::new()
        };

        let report = purge(&scan(&dir), RemovalMode::Trash, true, &remover, |_| true).unwrap();
        assert_eq!(report.removed, vec![dir.path().join("b.mp4")]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, NanoError::Removal { .. }));
        assert!(!report.is_success());
        assert!(dir.path().join("a.mp4").exists());
    }

    #[test]
    fn test_permanent_remover_deletes() {
        let dir = tree(&["x.mp4"]);
        PermanentRemover.remove(&dir.path().join("x.mp4")).unwrap();
        assert!(!dir.path().join("x.mp4").exists());
        assert!(PermanentRemover.remove(&dir.path().join("x.mp4")).is_err());
    }

    #[test]
    fn test_untag_refuses_to_overwrite_original() {
        let dir = tree(&["movie.mp4", "movie.optimized.mp4", "solo.optimized.mkv"]);

        let report = untag(&scan(&dir), true, |_| true).unwrap();
        assert_eq!(report.renamed.len(), 1);
        assert_eq!(report.renamed[0].1, dir.path().join("solo.mkv"));
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, NanoError::UntagCollision { .. }));
        // original untouched
        assert_eq!(fs::read(dir.path().join("movie.mp4")).unwrap(), b"movie.mp4");
        assert!(dir.path().join("movie.optimized.mp4").exists());
    }

    #[test]
    fn test_untag_confirmation() {
        let dir = tree(&["a.optimized.mp4"]);
        let mut listed = Vec::new();

        let err = untag(&scan(&dir), false, |plan| {
            listed = plan.listing();
            false
        })
        .unwrap_err();
        assert!(matches!(err, NanoError::ConfirmationDeclined));
        assert_eq!(listed.len(), 1);
        assert!(dir.path().join("a.optimized.mp4").exists());

        let report = untag(&scan(&dir), false, |_| true).unwrap();
        assert!(report.is_success());
        assert_eq!(fs::read(dir.path().join("a.mp4")).unwrap(), b"a.optimized.mp4");
    }
}
