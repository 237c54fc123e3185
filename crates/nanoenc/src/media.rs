use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Serialize, Serializer};
use crate::error::{NanoError, NanoResult};

/// Marker carried by an encode that has started but not been seen to finish
pub const IN_PROGRESS_MARKER: &str = "optimizing";
/// Marker carried by a finished encode
pub const COMPLETED_MARKER: &str = "optimized";

/// Lifecycle state encoded in a filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TagState {
    Original,
    InProgress,
    Completed,
}

impl TagState {
    fn marker(&self) -> Option<&'static str> {
        match self {
            TagState::Original => None,
            TagState::InProgress => Some(IN_PROGRESS_MARKER),
            TagState::Completed => Some(COMPLETED_MARKER),
        }
    }
}

/// Result of classifying a bare filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub stem: String,
    pub extension: String,
    pub state: TagState,
}

/// Split `name` into base stem, extension and tag state.
///
/// Only the dot-separated token directly before the final extension is
/// inspected, and it must equal a marker exactly. A name whose stem is empty
/// once the marker is removed, or that still ends in a marker, is ambiguous.
pub fn classify(name: &str) -> NanoResult<Classification> {
    let ambiguous = |detail: &str| NanoError::ClassificationAmbiguity {
        subject: name.to_string(),
        detail: detail.to_string(),
    };

    let (rest, extension) = name
        .rsplit_once('.')
        .filter(|(rest, ext)| !rest.is_empty() && !ext.is_empty())
        .ok_or_else(|| ambiguous("no extension"))?;

    let (stem, state) = match rest.rsplit_once('.') {
        Some((stem, IN_PROGRESS_MARKER)) => (stem, TagState::InProgress),
        Some((stem, COMPLETED_MARKER)) => (stem, TagState::Completed),
        _ => (rest, TagState::Original),
    };

    if stem.is_empty() {
        return Err(ambiguous("nothing left once the marker is removed"));
    }
    if state != TagState::Original {
        if let Some((_, inner)) = stem.rsplit_once('.') {
            if inner == IN_PROGRESS_MARKER || inner == COMPLETED_MARKER {
                return Err(ambiguous("carries more than one lifecycle marker"));
            }
        }
    }

    Ok(Classification {
        stem: stem.to_string(),
        extension: extension.to_string(),
        state,
    })
}

/// Build the filename for `stem` and `extension` in the given state
pub fn tagged_name(stem: &str, extension: &str, state: TagState) -> String {
    match state.marker() {
        Some(marker) => format!("{}.{}.{}", stem, marker, extension),
        None => format!("{}.{}", stem, extension),
    }
}

/// Grouping key: parent directory plus base stem
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    pub dir: PathBuf,
    pub stem: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir.join(&self.stem).display())
    }
}

// Serialized as "dir/stem" so it can key JSON maps
impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A classified video file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub stem: String,
    pub extension: String,
    pub state: TagState,
}

impl MediaFile {
    /// Classify an on-disk path
    pub fn from_path(path: &Path) -> NanoResult<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| NanoError::ClassificationAmbiguity {
                subject: path.display().to_string(),
                detail: "filename is not valid UTF-8".to_string(),
            })?;
        let c = classify(name)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(MediaFile {
            path: path.to_path_buf(),
            dir,
            stem: c.stem,
            extension: c.extension,
            state: c.state,
        })
    }

    pub fn identity(&self) -> Identity {
        Identity {
            dir: self.dir.clone(),
            stem: self.stem.clone(),
        }
    }

    /// Path of this file's identity in `state`, keeping the extension
    pub fn path_as(&self, state: TagState) -> PathBuf {
        self.dir.join(tagged_name(&self.stem, &self.extension, state))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_original() {
        let c = classify("movie.mp4").unwrap();
        assert_eq!(c.stem, "movie");
        assert_eq!(c.extension, "mp4");
        assert_eq!(c.state, TagState::Original);
    }

    #[test]
    fn test_markers() {
        let c = classify("movie.optimizing.mkv").unwrap();
        assert_eq!((c.stem.as_str(), c.state), ("movie", TagState::InProgress));

        let c = classify("The.Show.S01E01.optimized.mp4").unwrap();
        assert_eq!((c.stem.as_str(), c.state), ("The.Show.S01E01", TagState::Completed));
    }

    #[test]
    fn test_marker_elsewhere_is_not_a_tag() {
        let c = classify("optimized.cut.mp4").unwrap();
        assert_eq!(c.state, TagState::Original);
        assert_eq!(c.stem, "optimized.cut");

        let c = classify("movie.optimized.part2.mp4").unwrap();
        assert_eq!(c.state, TagState::Original);

        let c = classify("movie-optimized.mp4").unwrap();
        assert_eq!(c.state, TagState::Original);
    }

    #[test]
    fn test_markers_are_case_sensitive() {
        let c = classify("movie.OPTIMIZED.mp4").unwrap();
        assert_eq!(c.state, TagState::Original);
        assert_eq!(c.stem, "movie.OPTIMIZED");
    }

    #[test]
    fn test_ambiguous_names() {
        assert!(matches!(
            classify("movie.optimizing.optimized.mp4"),
            Err(NanoError::ClassificationAmbiguity { .. })
        ));
        assert!(classify("movie.optimized.optimized.mp4").is_err());
        assert!(classify(".optimized.mp4").is_err());
        assert!(classify("noextension").is_err());
        assert!(classify("trailing.").is_err());
    }

    #[test]
    fn test_media_file_paths() {
        let f = MediaFile::from_path(Path::new("/lib/Films/movie.mp4")).unwrap();
        assert_eq!(f.dir, PathBuf::from("/lib/Films"));
        assert_eq!(f.path_as(TagState::InProgress), PathBuf::from("/lib/Films/movie.optimizing.mp4"));
        assert_eq!(f.path_as(TagState::Completed), PathBuf::from("/lib/Films/movie.optimized.mp4"));
        assert_eq!(f.identity().to_string(), "/lib/Films/movie");
    }

    fn plain_stem() -> impl Strategy<Value = String> {
        "[A-Za-z0-9 _-]{1,12}(\\.[A-Za-z0-9_-]{1,8}){0,3}"
            .prop_filter("stem must not end in a marker", |s| {
                !s.ends_with(".optimized") && !s.ends_with(".optimizing")
            })
    }

    proptest! {
        #[test]
        fn test_classify_is_deterministic(name in "[A-Za-z0-9._ -]{0,40}") {
            let a = classify(&name).ok();
            let b = classify(&name).ok();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn test_completed_name_round_trips(stem in plain_stem(), ext in "(mp4|mkv|mov|m4v)") {
            let original = classify(&tagged_name(&stem, &ext, TagState::Original)).unwrap();
            prop_assert_eq!(original.state, TagState::Original);

            let completed = classify(&tagged_name(&original.stem, &original.extension, TagState::Completed)).unwrap();
            prop_assert_eq!(completed.state, TagState::Completed);
            prop_assert_eq!(&completed.stem, &original.stem);

            let in_progress = classify(&tagged_name(&original.stem, &ext, TagState::InProgress)).unwrap();
            prop_assert_eq!(in_progress.state, TagState::InProgress);
            prop_assert_eq!(in_progress.stem, original.stem);
        }
    }
}
