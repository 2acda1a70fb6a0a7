//! On-demand preview lookup
//!
//! Serves the cached preview of an original, generating it inline on the
//! caller's thread when it is missing. When generation fails the configured
//! fallback decides between the original bytes and an explicit refusal.

use crate::error::{ChainExhausted, PreviewError};
use crate::generate::Generator;
use crate::path::Library;
use crate::{MediaKind, RawFallback};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes handed back for a preview request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    /// The generated preview JPEG
    Preview(Vec<u8>),
    /// The untouched original, used when no preview could be produced
    Original(Vec<u8>),
}

impl Served {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Served::Preview(bytes) | Served::Original(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Served::Preview(bytes) | Served::Original(bytes) => bytes,
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self, Served::Preview(_))
    }
}

/// Everything needed to serve one original
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub original: PathBuf,
    pub derived: PathBuf,
    pub kind: MediaKind,
}

pub struct PreviewCache {
    library: Library,
    generator: Arc<Generator>,
}

impl PreviewCache {
    pub fn new(library: Library, generator: Arc<Generator>) -> Self {
        Self { library, generator }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    /// Resolve raw request segments to an existing original and its preview path
    pub fn locate(&self, album: &str, filename: &str) -> Result<Located, PreviewError> {
        let original = self.library.original(album, filename)?;
        if !original.is_file() {
            return Err(PreviewError::NotFound(original));
        }
        let Some(kind) = self.generator.config().kind_of(&original) else {
            return Err(PreviewError::NotFound(original));
        };
        let derived = self.library.derived_path(&original)?;

        Ok(Located {
            original,
            derived,
            kind,
        })
    }

    /// Return the preview for `album`/`filename`, generating it if needed
    ///
    /// Generation happens on the calling thread and blocks it; concurrent
    /// callers for the same preview wait for a single generation.
    pub fn get_or_create(&self, album: &str, filename: &str) -> Result<Served, PreviewError> {
        let located = self.locate(album, filename)?;

        match self.generator.produce(&located.original, &located.derived) {
            Ok(outcome) => {
                debug!(derived = %located.derived.display(), ?outcome, "serving preview");
                read(&located.derived).map(Served::Preview)
            }
            Err(cause) => self.fallback(located, cause),
        }
    }

    /// What to serve once every strategy failed
    fn fallback(&self, located: Located, cause: ChainExhausted) -> Result<Served, PreviewError> {
        let policy = self.generator.config().raw_fallback;
        match (located.kind, policy) {
            (MediaKind::Raw, RawFallback::Unavailable) => {
                warn!(original = %located.original.display(), error = %cause, "RAW preview unavailable");
                Err(PreviewError::Unavailable {
                    original: located.original,
                    cause,
                })
            }
            _ => {
                warn!(original = %located.original.display(), error = %cause, "serving original in place of preview");
                read(&located.original).map(Served::Original)
            }
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, PreviewError> {
    fs::read(path).map_err(|e| PreviewError::io(path, e))
}
