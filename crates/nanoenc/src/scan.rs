use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};
use crate::config::NanoConfig;
use crate::error::{NanoError, NanoResult};
use crate::media::{Identity, MediaFile, TagState};

/// All variants of one identity found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub identity: Identity,
    pub original: Option<MediaFile>,
    pub in_progress: Option<MediaFile>,
    pub completed: Option<MediaFile>,
}

impl FileGroup {
    /// Fold the members of one identity into a group.
    ///
    /// Returns `ClassificationAmbiguity` when a state occurs more than once
    /// (for example `movie.mkv` next to `movie.mp4`).
    pub fn from_members(identity: Identity, members: Vec<MediaFile>) -> NanoResult<Self> {
        let mut group = FileGroup {
            identity,
            original: None,
            in_progress: None,
            completed: None,
        };

        for member in members {
            let slot = match member.state {
                TagState::Original => &mut group.original,
                TagState::InProgress => &mut group.in_progress,
                TagState::Completed => &mut group.completed,
            };
            if let Some(existing) = slot {
                return Err(NanoError::ClassificationAmbiguity {
                    subject: group.identity.to_string(),
                    detail: format!(
                        "{:?} appears twice: {} and {}",
                        member.state,
                        existing.path.display(),
                        member.path.display()
                    ),
                });
            }
            *slot = Some(member);
        }

        Ok(group)
    }

    pub fn members(&self) -> impl Iterator<Item = &MediaFile> {
        self.original
            .iter()
            .chain(self.in_progress.iter())
            .chain(self.completed.iter())
    }

    /// Both the untouched source and a finished encode are present
    pub fn is_pair(&self) -> bool {
        self.original.is_some() && self.completed.is_some()
    }
}

/// An identity whose files break the one-per-state invariant
#[derive(Debug)]
pub struct GroupConflict {
    pub identity: Identity,
    pub members: Vec<MediaFile>,
    pub error: NanoError,
}

/// Snapshot of a directory tree, rebuilt on every command
#[derive(Debug, Default)]
pub struct ScanResult {
    pub root: PathBuf,
    pub groups: BTreeMap<Identity, FileGroup>,
    pub conflicts: Vec<GroupConflict>,
    /// Video files whose names could not be classified
    pub rejected: Vec<(PathBuf, NanoError)>,
    /// Non-fatal walk errors (unreadable directories, broken entries)
    pub warnings: Vec<String>,
}

impl ScanResult {
    /// Every in-progress file in the tree, conflicting groups included
    pub fn in_progress_files(&self) -> Vec<&MediaFile> {
        let mut files: Vec<&MediaFile> = self
            .groups
            .values()
            .filter_map(|g| g.in_progress.as_ref())
            .chain(
                self.conflicts
                    .iter()
                    .flat_map(|c| c.members.iter())
                    .filter(|m| m.state == TagState::InProgress),
            )
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Groups holding both an original and a completed file
    pub fn pairs(&self) -> impl Iterator<Item = &FileGroup> {
        self.groups.values().filter(|g| g.is_pair())
    }

    pub fn file_count(&self) -> usize {
        self.groups.values().map(|g| g.members().count()).sum::<usize>()
            + self.conflicts.iter().map(|c| c.members.len()).sum::<usize>()
    }
}

/// Check that `root` exists and is a directory
pub fn validate_directory(root: &Path) -> NanoResult<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(NanoError::InvalidDirectory(root.to_path_buf()))
    }
}

/// Recursively scan `root` and group video files by identity.
///
/// Symlinks are not followed. Unreadable entries become warnings. Groups are
/// keyed in lexicographic order so repeated scans of an unchanged tree
/// iterate identically.
pub fn scan_directory(cfg: &NanoConfig, root: &Path) -> NanoResult<ScanResult> {
    validate_directory(root)?;
    info!("Scanning directory: {}", root.display());

    let mut result = ScanResult {
        root: root.to_path_buf(),
        ..Default::default()
    };
    let mut members: BTreeMap<Identity, Vec<MediaFile>> = BTreeMap::new();
    let mut entry_count = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        entry_count += 1;
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                result.warnings.push(e.to_string());
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        let is_video = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| cfg.is_video_extension(ext))
            .unwrap_or(false);
        if !is_video {
            continue;
        }

        match MediaFile::from_path(path) {
            Ok(file) => {
                debug!("Found {:?} file: {}", file.state, path.display());
                members.entry(file.identity()).or_default().push(file);
            }
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                result.rejected.push((path.to_path_buf(), e));
            }
        }
    }

    for (identity, files) in members {
        match FileGroup::from_members(identity.clone(), files.clone()) {
            Ok(group) => {
                result.groups.insert(identity, group);
            }
            Err(error) => {
                warn!("{}", error);
                result.conflicts.push(GroupConflict {
                    identity,
                    members: files,
                    error,
                });
            }
        }
    }

    info!(
        "Finished scanning {}: {} entries, {} video files in {} groups ({} conflicting)",
        root.display(),
        entry_count,
        result.file_count(),
        result.groups.len(),
        result.conflicts.len()
    );
    Ok(result)
}
