use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the classifier, the per-file state machine and the
/// cleanup commands.
///
/// Per-file variants are carried inside outcomes and reports; only
/// `PreconditionViolation`, `ConfirmationDeclined`, `InvalidDirectory` and
/// `InvalidConfig` stop a whole command.
#[derive(Debug, Error)]
pub enum NanoError {
    /// A filename or a group carries more markers than the lifecycle allows
    #[error("ambiguous classification for {subject}: {detail}")]
    ClassificationAmbiguity { subject: String, detail: String },

    /// The external encoder exited non-zero, timed out or produced no output
    #[error("encoder failed for {}: {diagnostics}", input.display())]
    EncoderFailure { input: PathBuf, diagnostics: String },

    /// An in-progress artifact was found whose original no longer exists
    #[error("in-progress file {} has no original to re-encode from", path.display())]
    OrphanWithoutOriginal { path: PathBuf },

    /// The encode finished but the output is not smaller than the input
    #[error("{} grew from {input_bytes} to {output_bytes} bytes", input.display())]
    SizeRegression {
        input: PathBuf,
        input_bytes: u64,
        output_bytes: u64,
    },

    /// A global precondition of a command does not hold
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// The operator did not confirm a destructive operation
    #[error("operation cancelled: confirmation declined")]
    ConfirmationDeclined,

    /// Untagging would overwrite an existing file
    #[error("{} already exists, refusing to rename {} over it", target.display(), source_path.display())]
    UntagCollision { source_path: PathBuf, target: PathBuf },

    /// The similarity analyzer failed or its output could not be read
    #[error("similarity check failed for {} vs {}: {diagnostics}", reference.display(), candidate.display())]
    SimilarityFailure {
        reference: PathBuf,
        candidate: PathBuf,
        diagnostics: String,
    },

    /// ffprobe failed or returned unusable metadata
    #[error("probe failed for {}: {diagnostics}", path.display())]
    Probe { path: PathBuf, diagnostics: String },

    /// Moving a file to the trash or deleting it failed
    #[error("failed to remove {}: {diagnostics}", path.display())]
    Removal { path: PathBuf, diagnostics: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not an existing directory", .0.display())]
    InvalidDirectory(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NanoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NanoError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type NanoResult<T> = std::result::Result<T, NanoError>;
