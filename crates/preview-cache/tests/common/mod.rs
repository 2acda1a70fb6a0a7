#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use preview_cache::PreviewConfig;
use std::fs;
use std::io::Cursor;
use std::path::Path;

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 251) as u8, (y % 241) as u8, 90]));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .unwrap();
    buffer
}

/// Little-endian TIFF container whose thumbnail IFD points at `thumbnail`
pub fn raw_with_thumbnail(thumbnail: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());

    out.extend_from_slice(&1u16.to_le_bytes());
    entry(&mut out, 0x0112, 3, 1);
    out.extend_from_slice(&26u32.to_le_bytes());

    let data_offset = 26 + 2 + 2 * 12 + 4;
    out.extend_from_slice(&2u16.to_le_bytes());
    entry(&mut out, 0x0201, 4, data_offset);
    entry(&mut out, 0x0202, 4, thumbnail.len() as u32);
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(thumbnail);
    out
}

fn entry(out: &mut Vec<u8>, tag: u16, field_type: u16, value: u32) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&field_type.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
}

/// Defaults with a transcoder that is guaranteed not to exist
pub fn config() -> PreviewConfig {
    let mut config = PreviewConfig::default();
    config.worker_threads = 4;
    config.transcoder.program = "picshare-test-no-such-transcoder".to_string();
    config
}

pub fn write(root: &Path, relative: &str, bytes: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Leftover temporary files anywhere under `dir`
pub fn partials(dir: &Path) -> Vec<String> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.starts_with(".partial-"))
        .collect()
}
