//! Top-level handle tying the cache, warmer and status sink to one root
//!
//! Opening a gallery or pointing it at a new root starts a background sweep.
//! The warmer and its ledger live as long as the gallery, so switching back
//! to a root that was already swept submits nothing new.

use crate::cache::{PreviewCache, Served};
use crate::error::PreviewError;
use crate::generate::Generator;
use crate::marks::MarkStore;
use crate::path::{Library, Photo};
use crate::status::StatusSink;
use crate::warmer::{BackgroundWarmer, SweepReport};
use crate::PreviewConfig;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

pub struct Gallery {
    config: Arc<PreviewConfig>,
    generator: Arc<Generator>,
    warmer: Arc<BackgroundWarmer>,
    status: Arc<dyn StatusSink>,
    current: RwLock<Arc<PreviewCache>>,
    sweep: Mutex<Option<JoinHandle<SweepReport>>>,
}

impl Gallery {
    pub fn open(
        root: impl AsRef<Path>,
        config: PreviewConfig,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self, PreviewError> {
        let config = Arc::new(config);
        let library = Library::open(root, &config)?;
        let generator = Arc::new(Generator::new(Arc::clone(&config)));
        let warmer = Arc::new(BackgroundWarmer::new(Arc::clone(&generator), Arc::clone(&status))?);

        info!(root = %library.root().display(), "gallery opened");
        let gallery = Self {
            current: RwLock::new(Arc::new(PreviewCache::new(library.clone(), Arc::clone(&generator)))),
            config,
            generator,
            warmer,
            status,
            sweep: Mutex::new(None),
        };
        gallery.start_sweep(library)?;

        Ok(gallery)
    }

    /// Serve the preview for one original under the current root
    pub fn preview(&self, album: &str, filename: &str) -> Result<Served, PreviewError> {
        self.cache().get_or_create(album, filename)
    }

    /// Media files of one album under the current root
    pub fn photos(&self, album: &str) -> Result<Vec<Photo>, PreviewError> {
        self.library().photos(album, &self.config)
    }

    /// Point the gallery at a different root and sweep it
    pub fn set_root(&self, root: impl AsRef<Path>) -> Result<(), PreviewError> {
        let library = Library::open(root, &self.config)?;
        info!(root = %library.root().display(), "gallery root changed");

        *self.current.write() = Arc::new(PreviewCache::new(library.clone(), Arc::clone(&self.generator)));
        self.start_sweep(library)
    }

    fn start_sweep(&self, library: Library) -> Result<(), PreviewError> {
        let root = library.root().to_path_buf();
        let warmer = Arc::clone(&self.warmer);
        let handle = thread::Builder::new()
            .name("preview-sweep".to_string())
            .spawn(move || warmer.sweep(&library))
            .map_err(|e| PreviewError::io(&root, e))?;

        // A sweep still running for the previous root is left to finish on its own
        *self.sweep.lock() = Some(handle);
        Ok(())
    }

    /// Wait for the most recent sweep and return its report
    ///
    /// Returns `None` when no sweep is outstanding or the sweep thread panicked.
    pub fn wait_for_sweep(&self) -> Option<SweepReport> {
        let handle = self.sweep.lock().take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                warn!("preview sweep thread panicked");
                None
            }
        }
    }

    /// Wait for the sweep and every job it queued
    pub fn wait_idle(&self) {
        self.wait_for_sweep();
        self.warmer.wait_idle();
    }

    pub fn cache(&self) -> Arc<PreviewCache> {
        Arc::clone(&self.current.read())
    }

    pub fn library(&self) -> Library {
        self.current.read().library().clone()
    }

    pub fn marks(&self) -> MarkStore {
        MarkStore::new(self.library(), Arc::clone(&self.status))
    }

    pub fn warmer(&self) -> &BackgroundWarmer {
        &self.warmer
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }
}
