//! Planar extraction: turns a decoded frame's strided, cropped planes into a
//! contiguous I420 or NV21 buffer.

use crate::error::Error;
use crate::frame::{Frame, MAX_PLANES, PackedFrame};
use crate::types::PackedLayout;

/// Where one source plane lands in the packed output.
///
/// The destination offset is `area * quarters / 4 + extra` and consecutive
/// samples are `output_stride` bytes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Channel {
    quarters: usize,
    extra: usize,
    output_stride: usize,
}

impl Channel {
    const fn new(quarters: usize, extra: usize, output_stride: usize) -> Self {
        Channel {
            quarters,
            extra,
            output_stride,
        }
    }

    fn offset(&self, area: usize) -> usize {
        area * self.quarters / 4 + self.extra
    }
}

/// Indexed by `[layout][plane]`. Plane 1 and 2 keep the decoder's native
/// order; NV21 writes plane 2 first in each pair so the bytes come out V,U.
const CHANNELS: [[Channel; 3]; 2] = [
    // I420
    [
        Channel::new(0, 0, 1),
        Channel::new(4, 0, 1),
        Channel::new(5, 0, 1),
    ],
    // NV21
    [
        Channel::new(0, 0, 1),
        Channel::new(4, 1, 2),
        Channel::new(4, 0, 2),
    ],
];

fn channel(layout: PackedLayout, plane: usize) -> Channel {
    let row = match layout {
        PackedLayout::I420 => 0,
        PackedLayout::Nv21 => 1,
    };
    CHANNELS[row][plane]
}

/// Extract `frame` into a packed buffer of the requested layout.
///
/// The output covers the crop rectangle only and is exactly
/// `width * height * 12 / 8` bytes. Plane memory is only read during the call.
pub fn extract<F: Frame + ?Sized>(frame: &F, layout: PackedLayout) -> Result<PackedFrame, Error> {
    let pixel_format = frame.pixel_format();
    if !pixel_format.is_yuv420() {
        return Err(Error::UnsupportedFormat(pixel_format));
    }
    let bits_per_pixel = pixel_format
        .bits_per_pixel()
        .ok_or(Error::UnsupportedFormat(pixel_format))? as usize;

    let crop = frame.crop();
    let size = crop.size();
    if crop.right > frame.size().width || crop.bottom > frame.size().height {
        return Err(Error::InvalidArgument(format!(
            "crop {crop:?} exceeds frame size {:?}",
            frame.size()
        )));
    }
    let width = size.width as usize;
    let height = size.height as usize;
    let area = width * height;

    let planes = frame.planes();
    if planes.len() < MAX_PLANES {
        return Err(Error::InvalidArgument(format!(
            "{pixel_format:?} frame needs Y, U and V planes, got {}",
            planes.len()
        )));
    }
    let mut data = vec![0u8; area * bits_per_pixel / 8];
    let mut row_data = vec![0u8; planes.first().map_or(0, |p| p.bytes_per_row)];

    for (i, plane) in planes.iter().take(MAX_PLANES).enumerate() {
        let ch = channel(layout, i);
        let output_stride = ch.output_stride;
        let mut out = ch.offset(area);

        let shift = if i == 0 { 0 } else { 1 };
        let w = width >> shift;
        let h = height >> shift;
        if w == 0 || h == 0 {
            continue;
        }

        let pixel_stride = plane.pixel_stride.max(1);
        let row_stride = plane.bytes_per_row;
        let mut pos = row_stride * (crop.top as usize >> shift)
            + pixel_stride * (crop.left as usize >> shift);

        for _ in 0..h {
            if pixel_stride == 1 && output_stride == 1 {
                let row = read_row(plane.data, i, pos, w)?;
                data[out..out + w].copy_from_slice(row);
                out += w;
            } else {
                let length = (w - 1) * pixel_stride + 1;
                let row = read_row(plane.data, i, pos, length)?;
                if row_data.len() < length {
                    row_data.resize(length, 0);
                }
                row_data[..length].copy_from_slice(row);
                for col in 0..w {
                    data[out] = row_data[col * pixel_stride];
                    out += output_stride;
                }
            }
            pos += row_stride;
        }
    }

    Ok(PackedFrame::from_parts(layout, size, data))
}

fn read_row(data: &[u8], plane: usize, pos: usize, len: usize) -> Result<&[u8], Error> {
    data.get(pos..pos + len).ok_or(Error::PlaneTooSmall {
        plane,
        needed: pos + len,
        len: data.len(),
    })
}
