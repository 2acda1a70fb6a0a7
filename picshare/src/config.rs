//! On-disk settings and command-line overrides

use anyhow::{Context, Result};
use clap::Args;
use preview_cache::{PreviewConfig, RawFallback};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Contents of `picshare.toml`
///
/// ```toml
/// root = "/photos"
///
/// [preview]
/// jpeg_quality = 70
/// raw_fallback = "serve-original"
///
/// [preview.transcoder]
/// program = "convert"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub root: Option<PathBuf>,
    pub preview: PreviewConfig,
}

/// Flags taking precedence over the settings file
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Library root directory
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Background worker threads
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// JPEG quality of generated previews (1-100)
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Bounding box for previews, applied to both width and height
    #[arg(long, global = true)]
    pub size: Option<u32>,

    /// External transcoder used for RAW files
    #[arg(long, global = true)]
    pub transcoder: Option<String>,

    /// Serve full RAW originals when no preview can be produced
    #[arg(long, global = true)]
    pub serve_raw_originals: bool,
}

impl Settings {
    /// `<config dir>/picshare/picshare.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("picshare").join("picshare.toml"))
    }

    /// Load from an explicit path, or from the default path when it exists
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file just yields the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::read(&path),
            _ => {
                debug!("no settings file, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::parse(&text).with_context(|| format!("Invalid settings in {}", path.display()))?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(root) = &overrides.root {
            self.root = Some(root.clone());
        }
        let preview = &mut self.preview;
        if let Some(workers) = overrides.workers {
            preview.worker_threads = workers.max(1);
        }
        if let Some(quality) = overrides.quality {
            preview.jpeg_quality = quality;
        }
        if let Some(size) = overrides.size {
            preview.max_width = size;
            preview.max_height = size;
        }
        if let Some(program) = &overrides.transcoder {
            preview.transcoder.program = program.clone();
        }
        if overrides.serve_raw_originals {
            preview.raw_fallback = RawFallback::ServeOriginal;
        }
    }

    pub fn root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .context("No library root: pass --root or set `root` in picshare.toml")
    }
}
