//! Preview generation pipeline
//!
//! An original goes through an ordered chain of strategies until one of them
//! yields a preview: a direct decode with the `image` crate, the embedded
//! thumbnail of a RAW container, and finally an external transcoder. Failures
//! of individual strategies are logged and fall through to the next one.

use crate::error::{ChainExhausted, StepError};
use crate::flight::{Flight, InFlight};
use crate::metadata::{self, Orientation};
use crate::{transcode, MediaKind, PreviewConfig};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PARTIAL_PREFIX: &str = ".partial-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Decode the original with the `image` crate
    Direct,
    /// Decode the JPEG stored in a RAW file's thumbnail IFD
    EmbeddedThumbnail,
    /// Hand the original to the external transcoder
    Transcoder,
}

impl Strategy {
    /// Strategies applicable to a kind of media, in the order they are tried
    pub fn chain_for(kind: MediaKind) -> &'static [Strategy] {
        match kind {
            MediaKind::Standard => &[Strategy::Direct],
            MediaKind::Raw => &[Strategy::Direct, Strategy::EmbeddedThumbnail, Strategy::Transcoder],
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct decode"),
            Strategy::EmbeddedThumbnail => write!(f, "embedded thumbnail"),
            Strategy::Transcoder => write!(f, "transcoder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A valid preview was already on disk
    Cached,
    /// This call generated the preview
    Generated(Strategy),
    /// Another caller was generating the same preview; this one waited for it
    Joined,
}

/// Runs the decode chain, at most once at a time per derived path
pub struct Generator {
    config: Arc<PreviewConfig>,
    in_flight: InFlight<PathBuf, Result<Outcome, ChainExhausted>>,
}

impl Generator {
    pub fn new(config: Arc<PreviewConfig>) -> Self {
        Self {
            config,
            in_flight: InFlight::new(),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Whether `derived` holds a preview large enough to trust
    pub fn is_cached(&self, derived: &Path) -> bool {
        fs::metadata(derived)
            .map(|m| m.is_file() && m.len() >= self.config.min_cached_bytes)
            .unwrap_or(false)
    }

    /// Number of previews currently being generated
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Make sure a preview of `original` exists at `derived`
    ///
    /// Concurrent calls for the same `derived` path share one run of the chain.
    pub fn produce(&self, original: &Path, derived: &Path) -> Result<Outcome, ChainExhausted> {
        if self.is_cached(derived) {
            return Ok(Outcome::Cached);
        }

        match self.in_flight.run(derived.to_path_buf(), || self.run_chain(original, derived)) {
            Flight::Led(result) => result,
            Flight::Joined(result) => result.map(|outcome| match outcome {
                Outcome::Generated(_) => Outcome::Joined,
                other => other,
            }),
        }
    }

    fn run_chain(&self, original: &Path, derived: &Path) -> Result<Outcome, ChainExhausted> {
        // A previous leader may have finished between the check and the claim
        if self.is_cached(derived) {
            return Ok(Outcome::Cached);
        }

        let kind = self.config.kind_of(original).unwrap_or(MediaKind::Standard);
        let mut attempts = Vec::new();

        for &strategy in Strategy::chain_for(kind) {
            let result = match strategy {
                Strategy::Direct => self.decode_direct(original, derived),
                Strategy::EmbeddedThumbnail => self.decode_embedded(original, derived),
                Strategy::Transcoder => self.transcode(original, derived),
            };

            match result {
                Ok(()) => {
                    info!(original = %original.display(), %strategy, "preview generated");
                    return Ok(Outcome::Generated(strategy));
                }
                Err(err) => {
                    match &err {
                        StepError::ToolUnavailable(program) => {
                            warn!(%program, "transcoder not found on PATH, RAW fallback disabled")
                        }
                        StepError::ToolTimeout(after) => {
                            warn!(original = %original.display(), ?after, "transcoder timed out")
                        }
                        other => debug!(original = %original.display(), %strategy, error = %other, "strategy failed"),
                    }
                    attempts.push((strategy, err));
                }
            }
        }

        Err(ChainExhausted {
            original: original.to_path_buf(),
            attempts,
        })
    }

    fn decode_direct(&self, original: &Path, derived: &Path) -> Result<(), StepError> {
        let img = ImageReader::open(original)?.with_guessed_format()?.decode()?;
        let orientation = Orientation::from_path(original).unwrap_or_default();
        self.write_preview(img, orientation, derived)
    }

    fn decode_embedded(&self, original: &Path, derived: &Path) -> Result<(), StepError> {
        let thumbnail = metadata::embedded_thumbnail(original)?;
        let img = image::load_from_memory(&thumbnail.bytes)?;
        // RAW thumbnails rarely carry their own EXIF; the container's applies
        let orientation = Orientation::from_bytes(&thumbnail.bytes)
            .or(thumbnail.container_orientation)
            .unwrap_or_default();
        self.write_preview(img, orientation, derived)
    }

    fn transcode(&self, original: &Path, derived: &Path) -> Result<(), StepError> {
        let parent = parent_dir(derived)?;
        fs::create_dir_all(parent)?;

        // Removed on drop unless persisted
        let output = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(".jpg")
            .tempfile_in(parent)?
            .into_temp_path();

        transcode::run(&self.config, original, &output)?;
        output.persist(derived).map_err(|e| StepError::Io(e.error.to_string()))?;
        Ok(())
    }

    fn write_preview(&self, img: DynamicImage, orientation: Orientation, derived: &Path) -> Result<(), StepError> {
        let img = orientation.apply(img);
        let img = match img {
            DynamicImage::ImageRgb8(_) => img,
            other => DynamicImage::ImageRgb8(other.into_rgb8()),
        };
        let img = fit_within(img, self.config.max_width, self.config.max_height);

        let encoded = encode_jpeg(&img, self.config.jpeg_quality)?;
        write_atomically(derived, &encoded)
    }
}

/// Shrink to fit inside `max_width` x `max_height`, keeping the aspect ratio
fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let max_width = max_width.max(1);
    let max_height = max_height.max(1);

    // If image is already smaller than the box, don't upscale
    if width <= max_width && height <= max_height {
        return img;
    }

    img.resize(max_width, max_height, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, StepError> {
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(buffer)
}

/// Write `bytes` next to `dest` and rename into place
pub(crate) fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), StepError> {
    let parent = parent_dir(dest)?;
    fs::create_dir_all(parent)?;

    let mut file = tempfile::Builder::new().prefix(PARTIAL_PREFIX).tempfile_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(dest).map_err(|e| StepError::Io(e.error.to_string()))?;
    Ok(())
}

fn parent_dir(path: &Path) -> Result<&Path, StepError> {
    path.parent()
        .ok_or_else(|| StepError::Io(format!("{} has no parent directory", path.display())))
}
