//! Background warming of the preview cache
//!
//! A sweep walks every album under the root and submits generation jobs for
//! originals without a valid preview to a fixed-size rayon pool. The warmer
//! remembers every derived path it has considered for its whole lifetime, so
//! repeated sweeps over an unchanged tree submit nothing new.

use crate::error::PreviewError;
use crate::generate::Generator;
use crate::path::Library;
use crate::status::StatusSink;
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Jobs handed to the worker pool
    pub submitted: usize,
    /// Originals that already had a valid preview
    pub cached: usize,
    /// Originals already considered by an earlier sweep
    pub seen: usize,
    /// Files skipped for their extension or a reserved path component
    pub ignored: usize,
}

impl SweepReport {
    pub fn message(&self) -> String {
        if self.submitted > 0 {
            format!("warming {} new previews", self.submitted)
        } else {
            "all previews indexed".to_string()
        }
    }
}

#[derive(Default)]
struct Counters {
    pending: usize,
    generated: usize,
    failed: usize,
}

/// Pending job bookkeeping shared with the pool
#[derive(Default)]
struct Progress {
    counters: Mutex<Counters>,
    idle: Condvar,
}

impl Progress {
    fn begin(&self) {
        self.counters.lock().pending += 1;
    }

    /// Returns the drained totals when this was the last pending unit
    fn finish(&self, outcome: Option<bool>) -> Option<(usize, usize)> {
        let mut counters = self.counters.lock();
        match outcome {
            Some(true) => counters.generated += 1,
            Some(false) => counters.failed += 1,
            None => {}
        }
        counters.pending -= 1;
        if counters.pending > 0 {
            return None;
        }

        self.idle.notify_all();
        let totals = (counters.generated, counters.failed);
        counters.generated = 0;
        counters.failed = 0;
        Some(totals)
    }
}

pub struct BackgroundWarmer {
    generator: Arc<Generator>,
    pool: ThreadPool,
    ledger: Mutex<HashSet<PathBuf>>,
    progress: Arc<Progress>,
    status: Arc<dyn StatusSink>,
}

impl BackgroundWarmer {
    pub fn new(generator: Arc<Generator>, status: Arc<dyn StatusSink>) -> Result<Self, PreviewError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(generator.config().worker_threads.max(1))
            .thread_name(|index| format!("preview-worker-{}", index))
            .build()?;

        Ok(Self {
            generator,
            pool,
            ledger: Mutex::new(HashSet::new()),
            progress: Arc::new(Progress::default()),
            status,
        })
    }

    /// Walk the library once and queue every original missing a preview
    pub fn sweep(&self, library: &Library) -> SweepReport {
        let mut report = SweepReport::default();
        let root = library.root();

        self.status.report("warming previews in the background");
        self.progress.begin();

        match fs::read_dir(root) {
            Ok(entries) => {
                for entry in entries.filter_map(Result::ok) {
                    let is_reserved = entry.file_name().to_str().is_some_and(|name| library.is_reserved(name));
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    if is_reserved || !is_dir {
                        continue;
                    }
                    self.sweep_album(library, &entry.path(), &mut report);
                }
            }
            Err(e) => warn!(root = %root.display(), error = %e, "cannot list library root"),
        }

        info!(root = %root.display(), ?report, "sweep finished");
        self.status.report(&report.message());
        self.finish_sweep();

        report
    }

    fn sweep_album(&self, library: &Library, album: &Path, report: &mut SweepReport) {
        for entry in WalkDir::new(album) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let visible = path
                .strip_prefix(library.root())
                .map(|relative| !library.contains_reserved(relative))
                .unwrap_or(false);
            if !visible || self.generator.config().kind_of(path).is_none() {
                report.ignored += 1;
                continue;
            }

            match library.derived_path(path) {
                Ok(derived) => self.consider(path.to_path_buf(), derived, report),
                Err(e) => debug!(path = %path.display(), error = %e, "no preview path"),
            }
        }
    }

    fn consider(&self, original: PathBuf, derived: PathBuf, report: &mut SweepReport) {
        if !self.ledger.lock().insert(derived.clone()) {
            report.seen += 1;
            return;
        }
        if self.generator.is_cached(&derived) {
            report.cached += 1;
            return;
        }

        report.submitted += 1;
        self.submit(original, derived);
    }

    fn submit(&self, original: PathBuf, derived: PathBuf) {
        self.progress.begin();

        let generator = Arc::clone(&self.generator);
        let progress = Arc::clone(&self.progress);
        let status = Arc::clone(&self.status);

        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| generator.produce(&original, &derived)));
            let succeeded = match result {
                Ok(Ok(outcome)) => {
                    debug!(original = %original.display(), ?outcome, "background preview ready");
                    true
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "background preview failed");
                    false
                }
                Err(_) => {
                    warn!(original = %original.display(), "preview worker panicked");
                    false
                }
            };
            if let Some((generated, failed)) = progress.finish(Some(succeeded)) {
                report_drained(status.as_ref(), generated, failed);
            }
        });
    }

    fn finish_sweep(&self) {
        if let Some((generated, failed)) = self.progress.finish(None) {
            report_drained(self.status.as_ref(), generated, failed);
        }
    }

    /// Block until every submitted job and running sweep has finished
    pub fn wait_idle(&self) {
        let mut counters = self.progress.counters.lock();
        while counters.pending > 0 {
            self.progress.idle.wait(&mut counters);
        }
    }

    /// Jobs queued or running, plus any sweep in progress
    pub fn pending(&self) -> usize {
        self.progress.counters.lock().pending
    }

    /// Derived paths considered so far
    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().len()
    }
}

fn report_drained(status: &dyn StatusSink, generated: usize, failed: usize) {
    if generated + failed > 0 {
        status.report(&format!(
            "background warm-up finished: {} generated, {} failed",
            generated, failed
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::fixtures::jpeg;
    use crate::status::recording::RecordingStatus;
    use crate::{NullStatus, PreviewConfig};
    use anyhow::Result;
    use tempfile::tempdir;

    fn setup(root: &Path) -> Result<(Library, BackgroundWarmer)> {
        let mut config = PreviewConfig::default();
        config.worker_threads = 2;
        config.transcoder.program = "picshare-test-no-such-transcoder".to_string();
        let library = Library::open(root, &config)?;
        let generator = Arc::new(Generator::new(Arc::new(config)));
        Ok((library, BackgroundWarmer::new(generator, Arc::new(NullStatus))?))
    }

    fn populate(root: &Path) -> Result<()> {
        fs::create_dir_all(root.join("holiday/day1"))?;
        fs::create_dir_all(root.join("family"))?;
        fs::write(root.join("holiday/a.jpg"), jpeg(64, 48))?;
        fs::write(root.join("holiday/day1/b.png"), b"broken png")?;
        fs::write(root.join("family/c.jpg"), jpeg(48, 64))?;
        fs::write(root.join("family/notes.txt"), b"not media")?;
        fs::write(root.join("loose.jpg"), jpeg(8, 8))?;
        Ok(())
    }

    #[test]
    fn test_sweep_submits_uncached_media() -> Result<()> {
        let temp_dir = tempdir()?;
        populate(temp_dir.path())?;
        let (library, warmer) = setup(temp_dir.path())?;

        let report = warmer.sweep(&library);
        assert_eq!(report.submitted, 3);
        assert_eq!(report.ignored, 1);
        warmer.wait_idle();

        let preview_root = library.preview_root();
        assert!(preview_root.join("holiday/a.jpg").is_file());
        assert!(preview_root.join("family/c.jpg").is_file());
        assert!(!preview_root.join("holiday/day1/b.png").exists());
        // Files directly under the root do not belong to an album
        assert!(!preview_root.join("loose.jpg").exists());
        Ok(())
    }

    #[test]
    fn test_second_sweep_submits_nothing() -> Result<()> {
        let temp_dir = tempdir()?;
        populate(temp_dir.path())?;
        let (library, warmer) = setup(temp_dir.path())?;

        warmer.sweep(&library);
        warmer.wait_idle();

        let second = warmer.sweep(&library);
        assert_eq!(second.submitted, 0);
        assert_eq!(second.seen, 3);
        assert_eq!(warmer.ledger_len(), 3);
        assert_eq!(warmer.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_existing_previews_are_recorded_not_regenerated() -> Result<()> {
        let temp_dir = tempdir()?;
        populate(temp_dir.path())?;
        let (library, warmer) = setup(temp_dir.path())?;

        let cached = library.preview_root().join("holiday/a.jpg");
        fs::create_dir_all(cached.parent().unwrap())?;
        fs::write(&cached, vec![7u8; 500])?;

        let report = warmer.sweep(&library);
        assert_eq!(report.cached, 1);
        assert_eq!(report.submitted, 2);
        warmer.wait_idle();
        assert_eq!(fs::read(&cached)?, vec![7u8; 500]);
        Ok(())
    }

    #[test]
    fn test_reserved_directories_are_skipped() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("marked/holiday"))?;
        fs::create_dir_all(root.join("holiday/._preview_cache"))?;
        fs::write(root.join("marked/holiday/a.jpg"), jpeg(8, 8))?;
        fs::write(root.join("holiday/._preview_cache/nested.jpg"), jpeg(8, 8))?;
        let (library, warmer) = setup(root)?;

        let report = warmer.sweep(&library);
        assert_eq!(report.submitted, 0);
        assert_eq!(report.ignored, 1);
        Ok(())
    }

    #[test]
    fn test_status_messages() -> Result<()> {
        let temp_dir = tempdir()?;
        populate(temp_dir.path())?;
        let mut config = PreviewConfig::default();
        config.transcoder.program = "picshare-test-no-such-transcoder".to_string();
        let library = Library::open(temp_dir.path(), &config)?;
        let status = Arc::new(RecordingStatus::default());
        let warmer = BackgroundWarmer::new(Arc::new(Generator::new(Arc::new(config))), status.clone())?;

        warmer.sweep(&library);
        warmer.wait_idle();
        warmer.sweep(&library);

        let messages = status.messages();
        assert_eq!(messages.first().map(String::as_str), Some("warming previews in the background"));
        assert!(messages.contains(&"warming 3 new previews".to_string()));
        assert!(messages.contains(&"background warm-up finished: 2 generated, 1 failed".to_string()));
        assert_eq!(messages.last().map(String::as_str), Some("all previews indexed"));
        Ok(())
    }
}
