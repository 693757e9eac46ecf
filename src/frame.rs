use core::time::Duration;
use std::fs;
use std::io;
use std::path::Path;

use arrayvec::ArrayVec;

use crate::types::{PackedLayout, PixelFormat, Rect, Size};

/// Maximum number of planes in a decoded 4:2:0 frame.
pub const MAX_PLANES: usize = 3;

/// A single plane of image data.
///
/// `pixel_stride` is the distance in bytes between horizontally adjacent
/// samples; interleaved chroma exposes each channel as its own plane with a
/// pixel stride of 2.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
    pub pixel_stride: usize,
}

impl<'a> Plane<'a> {
    pub fn new(data: &'a [u8], bytes_per_row: usize, pixel_stride: usize) -> Self {
        Plane {
            data,
            bytes_per_row,
            pixel_stride,
        }
    }
}

/// A borrowed video frame. Lifetime tied to the decoder output it came from.
pub trait Frame {
    fn pixel_format(&self) -> PixelFormat;
    /// Coded dimensions, which may include padding outside the crop.
    fn size(&self) -> Size;
    fn crop(&self) -> Rect {
        Rect::from_size(self.size())
    }
    fn planes(&self) -> &[Plane<'_>];
    fn timestamp(&self) -> Duration;
}

/// A decoder-owned frame view. Valid only until the output buffer it
/// borrows from is released back to the decoder.
#[derive(Debug, Clone)]
pub struct DecodedFrame<'a> {
    pixel_format: PixelFormat,
    size: Size,
    crop: Rect,
    planes: ArrayVec<Plane<'a>, MAX_PLANES>,
    timestamp: Duration,
}

impl<'a> DecodedFrame<'a> {
    pub fn new(
        pixel_format: PixelFormat,
        size: Size,
        planes: impl IntoIterator<Item = Plane<'a>>,
        timestamp: Duration,
    ) -> Self {
        DecodedFrame {
            pixel_format,
            size,
            crop: Rect::from_size(size),
            planes: planes.into_iter().take(MAX_PLANES).collect(),
            timestamp,
        }
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = crop;
        self
    }
}

impl Frame for DecodedFrame<'_> {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn size(&self) -> Size {
        self.size
    }

    fn crop(&self) -> Rect {
        self.crop
    }

    fn planes(&self) -> &[Plane<'_>] {
        &self.planes
    }

    fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// An owned, contiguous 4:2:0 frame in a canonical layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedFrame {
    layout: PackedLayout,
    size: Size,
    data: Vec<u8>,
}

impl PackedFrame {
    pub(crate) fn from_parts(layout: PackedLayout, size: Size, data: Vec<u8>) -> Self {
        PackedFrame { layout, size, data }
    }

    pub fn layout(&self) -> PackedLayout {
        self.layout
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// View the packed bytes as a frame again, e.g. to re-extract into the
    /// other layout.
    pub fn as_frame(&self) -> DecodedFrame<'_> {
        packed_frame(self.layout, self.size, &self.data, Duration::ZERO)
    }

    /// Write the frame to `path`. The bytes land under a temporary name
    /// first so a failed write never leaves a truncated file behind.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        write_atomically(path, &self.data)
    }
}

/// Borrow a packed I420/NV21 buffer as a three-plane frame. NV21 chroma is
/// exposed as two aliasing planes with a pixel stride of 2.
pub(crate) fn packed_frame(layout: PackedLayout, size: Size, data: &[u8], timestamp: Duration) -> DecodedFrame<'_> {
    let area = size.area();
    let width = size.width as usize;
    let y = Plane::new(&data[..area], width, 1);
    let (pixel_format, planes) = match layout {
        PackedLayout::I420 => {
            let quarter = area / 4;
            let chroma_w = width >> 1;
            (
                PixelFormat::I420,
                [
                    y,
                    Plane::new(&data[area..area + quarter], chroma_w, 1),
                    Plane::new(&data[area + quarter..], chroma_w, 1),
                ],
            )
        }
        PackedLayout::Nv21 => (
            PixelFormat::Nv21,
            [
                y,
                Plane::new(&data[area + 1..], width, 2),
                Plane::new(&data[area..], width, 2),
            ],
        ),
    };
    DecodedFrame::new(pixel_format, size, planes, timestamp)
}

pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = std::path::PathBuf::from(partial);
    if let Err(e) = fs::write(&partial, data) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, path)
}
