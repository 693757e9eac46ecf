//! JPEG compression of packed NV21 frames.

use std::fs;
use std::path::Path;

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;

use crate::error::Error;
use crate::frame::write_atomically;
use crate::types::Size;

pub const DEFAULT_QUALITY: u8 = 100;

/// Compress an NV21 buffer to JPEG bytes.
pub fn encode_nv21(data: &[u8], size: Size, quality: u8) -> Result<Vec<u8>, Error> {
    let rgb = nv21_to_rgb(data, size)?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, size.width, size.height, ExtendedColorType::Rgb8)
        .map_err(|e| Error::InvalidArgument(format!("JPEG encoding failed: {e}")))?;
    Ok(out)
}

/// Compress an NV21 buffer and store it at `path`.
pub fn write_nv21(path: &Path, data: &[u8], size: Size, quality: u8) -> Result<(), Error> {
    let jpeg = encode_nv21(data, size, quality)?;
    write_atomically(path, &jpeg).map_err(|source| Error::StorageWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `dir` if needed; used for preview dumps.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|source| Error::StorageWrite {
        path: dir.to_path_buf(),
        source,
    })
}

// Full-range BT.601, the matrix JFIF assumes.
fn nv21_to_rgb(data: &[u8], size: Size) -> Result<Vec<u8>, Error> {
    if data.len() < size.yuv420_len() {
        return Err(Error::InvalidArgument(format!(
            "NV21 buffer of {} bytes is too short for {}x{}",
            data.len(),
            size.width,
            size.height
        )));
    }
    let width = size.width as usize;
    let height = size.height as usize;
    let frame_size = width * height;
    let mut rgb = Vec::with_capacity(frame_size * 3);

    for j in 0..height {
        for i in 0..width {
            let y = data[j * width + i] as i32;
            let uv = frame_size + (j >> 1) * width + (i & !1);
            let v = data[uv] as i32 - 128;
            let u = data.get(uv + 1).copied().unwrap_or(128) as i32 - 128;

            // 16.16 fixed point.
            let r = y + ((91_881 * v) >> 16);
            let g = y - ((22_554 * u + 46_802 * v) >> 16);
            let b = y + ((116_130 * u) >> 16);
            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }
    Ok(rgb)
}
