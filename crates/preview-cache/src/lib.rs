//! Lazy preview generation and on-disk caching for PicShare
//!
//! This crate turns a tree of original photos under a single root directory
//! into bandwidth-friendly JPEG previews. Previews are produced on demand or
//! by a background warmer, and persisted in a reserved directory that mirrors
//! the original tree.
//!
//! # Features
//!
//! - **Contained paths**: every lookup is percent-decoded, canonicalized and
//!   checked against the root before it touches the filesystem
//! - **Decode chain**: direct decode, embedded RAW thumbnail, then an external
//!   transcoder (ImageMagick by default) with a hard timeout
//! - **Atomic artifacts**: previews are written to a temporary file and renamed
//!   into place, so readers never observe a truncated JPEG
//! - **Single-flight**: concurrent requests for one preview share a single
//!   generation attempt
//! - **Background warming**: a sweep over the whole tree feeds a bounded rayon
//!   pool, remembering what it already considered

pub mod cache;
pub mod error;
pub mod flight;
pub mod gallery;
pub mod generate;
pub mod marks;
pub mod metadata;
pub mod path;
pub mod status;
pub mod transcode;
pub mod warmer;

pub use cache::{PreviewCache, Served};
pub use error::{ChainExhausted, PreviewError, StepError};
pub use gallery::Gallery;
pub use generate::{Generator, Outcome, Strategy};
pub use marks::MarkStore;
pub use path::{resolve, Library, Photo};
pub use status::{NullStatus, StatusSink, TracingStatus};
pub use warmer::{BackgroundWarmer, SweepReport};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "gif", "heic"];

const DEFAULT_RAW_EXTENSIONS: &[&str] = &["cr2", "cr3", "nef", "arw", "dng", "orf", "rw2", "pef", "sr2"];

/// Configuration consumed by the preview engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Reserved top-level directory holding generated previews
    pub preview_dir: String,
    /// Reserved top-level directory holding marked copies
    pub marked_dir: String,
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub allowed_extensions: BTreeSet<String>,
    pub raw_extensions: BTreeSet<String>,
    pub worker_threads: usize,
    /// Smallest on-disk preview still treated as a valid cache entry
    pub min_cached_bytes: u64,
    pub raw_fallback: RawFallback,
    pub transcoder: TranscoderConfig,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            preview_dir: "._preview_cache".to_string(),
            marked_dir: "marked".to_string(),
            max_width: 640,
            max_height: 640,
            jpeg_quality: 60,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            raw_extensions: DEFAULT_RAW_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            worker_threads: 8,
            min_cached_bytes: 100,
            raw_fallback: RawFallback::Unavailable,
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl PreviewConfig {
    /// Classify a file by extension, `None` for anything that is not a media file
    pub fn kind_of(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if self.raw_extensions.contains(&ext) {
            Some(MediaKind::Raw)
        } else if self.allowed_extensions.contains(&ext) {
            Some(MediaKind::Standard)
        } else {
            None
        }
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        name == self.preview_dir || name == self.marked_dir
    }

    /// Geometry string understood by the transcoder, `>` means shrink only
    pub fn thumbnail_geometry(&self) -> String {
        format!("{}x{}>", self.max_width, self.max_height)
    }
}

/// External transcoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
    pub timeout_secs: u64,
    /// Output below this size is treated as a failed conversion
    pub min_output_bytes: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "magick".to_string(),
            timeout_secs: 60,
            min_output_bytes: 1024,
        }
    }
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What the preview cache serves when a RAW original cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RawFallback {
    /// Refuse with [`PreviewError::Unavailable`]; RAW originals stay hidden
    #[default]
    Unavailable,
    /// Hand out the full RAW original instead of a preview
    ServeOriginal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// Formats the `image` crate decodes directly
    Standard,
    /// Camera-proprietary formats
    Raw,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Standard => write!(f, "standard"),
            MediaKind::Raw => write!(f, "raw"),
        }
    }
}
