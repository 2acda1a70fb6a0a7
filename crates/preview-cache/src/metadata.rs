//! EXIF helpers: orientation correction and embedded thumbnail extraction
//!
//! RAW containers are mostly TIFF based and carry a small JPEG in their
//! thumbnail IFD (IFD1). Pulling that out is much cheaper than demosaicing
//! the sensor data, and good enough for a browsing preview.

use crate::error::StepError;
use exif::{Exif, In, Reader, Tag};
use image::DynamicImage;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Normal,
    MirroredHorizontal,
    CW180,
    MirroredVertical,
    MirroredHorizontalAnd270CW,
    CW90,
    MirroredHorizontalAnd90CW,
    CW270,
}

impl Orientation {
    pub fn from_exif(exif: &Exif) -> Option<Self> {
        exif.get_field(Tag::Orientation, In::PRIMARY)?
            .value
            .get_uint(0)
            .map(Into::into)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let file = File::open(path).ok()?;
        let exif = Reader::new().read_from_container(&mut BufReader::new(file)).ok()?;
        Self::from_exif(&exif)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let exif = Reader::new().read_from_container(&mut Cursor::new(bytes)).ok()?;
        Self::from_exif(&exif)
    }

    /// Rotate and flip pixels so the image displays upright without metadata
    #[must_use]
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => img,
            Self::MirroredHorizontal => img.fliph(),
            Self::CW180 => img.rotate180(),
            Self::MirroredVertical => img.flipv(),
            Self::MirroredHorizontalAnd270CW => img.fliph().rotate270(),
            Self::CW90 => img.rotate90(),
            Self::MirroredHorizontalAnd90CW => img.fliph().rotate90(),
            Self::CW270 => img.rotate270(),
        }
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::MirroredHorizontal,
            3 => Self::CW180,
            4 => Self::MirroredVertical,
            5 => Self::MirroredHorizontalAnd270CW,
            6 => Self::CW90,
            7 => Self::MirroredHorizontalAnd90CW,
            8 => Self::CW270,
            _ => Self::Normal,
        }
    }
}

/// JPEG bytes found in a container's thumbnail IFD
#[derive(Debug, Clone)]
pub struct EmbeddedThumbnail {
    pub bytes: Vec<u8>,
    /// Orientation of the container's primary image
    pub container_orientation: Option<Orientation>,
}

/// Locate and copy out the thumbnail referenced by
/// `JPEGInterchangeFormat`/`JPEGInterchangeFormatLength`
pub fn embedded_thumbnail(path: &Path) -> Result<EmbeddedThumbnail, StepError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut reader)?;

    let offset = thumbnail_field(&exif, Tag::JPEGInterchangeFormat)?;
    let length = thumbnail_field(&exif, Tag::JPEGInterchangeFormatLength)?;
    if length == 0 {
        return Err(StepError::NoThumbnail);
    }

    // Offsets are relative to the TIFF header, which is the start of `buf()`
    let start = offset as usize;
    let end = start.saturating_add(length as usize);
    let bytes = match exif.buf().get(start..end) {
        Some(slice) => slice.to_vec(),
        None => {
            if u64::from(offset) + u64::from(length) > file_len {
                return Err(StepError::NoThumbnail);
            }
            reader.seek(SeekFrom::Start(u64::from(offset)))?;
            let mut bytes = vec![0u8; length as usize];
            reader.read_exact(&mut bytes)?;
            bytes
        }
    };

    Ok(EmbeddedThumbnail {
        bytes,
        container_orientation: Orientation::from_exif(&exif),
    })
}

fn thumbnail_field(exif: &Exif, tag: Tag) -> Result<u32, StepError> {
    exif.get_field(tag, In::THUMBNAIL)
        .and_then(|field| field.value.get_uint(0))
        .ok_or(StepError::NoThumbnail)
}
