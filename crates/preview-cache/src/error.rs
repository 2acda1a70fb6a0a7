use crate::generate::Strategy;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the preview engine
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("path escapes the library root: {0}")]
    ContainmentViolation(String),

    #[error("`{0}` is a reserved directory")]
    Reserved(String),

    #[error("original not found: {}", .0.display())]
    NotFound(PathBuf),

    /// RAW original whose preview could not be produced
    #[error("no preview available for {}", .original.display())]
    Unavailable {
        original: PathBuf,
        #[source]
        cause: ChainExhausted,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PreviewError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Failure of a single decode strategy; the chain falls through to the next one
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("metadata unreadable: {0}")]
    Metadata(String),

    #[error("no embedded thumbnail")]
    NoThumbnail,

    #[error("transcoder `{0}` is not installed")]
    ToolUnavailable(String),

    #[error("transcoder timed out after {0:?}")]
    ToolTimeout(Duration),

    #[error("transcoder exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("output is only {0} bytes")]
    OutputTooSmall(u64),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for StepError {
    fn from(e: io::Error) -> Self {
        StepError::Io(e.to_string())
    }
}

impl From<image::ImageError> for StepError {
    fn from(e: image::ImageError) -> Self {
        StepError::Decode(e.to_string())
    }
}

impl From<exif::Error> for StepError {
    fn from(e: exif::Error) -> Self {
        StepError::Metadata(e.to_string())
    }
}

/// Every applicable strategy failed for one original
#[derive(Debug, Clone)]
pub struct ChainExhausted {
    pub original: PathBuf,
    pub attempts: Vec<(Strategy, StepError)>,
}

impl ChainExhausted {
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "nothing attempted".to_string();
        }
        self.attempts
            .iter()
            .map(|(strategy, err)| format!("{}: {}", strategy, err))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every decode strategy failed for {}: {}", self.original.display(), self.summary())
    }
}

impl std::error::Error for ChainExhausted {}
