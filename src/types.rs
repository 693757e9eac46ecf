use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Pixel formats a decoder may hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Three-plane 4:2:0 with per-plane row/pixel strides (chroma planes may
    /// alias one interleaved buffer).
    Yuv420Flexible,
    I420,
    Yv12,
    Nv12,
    Nv21,
    Yuyv,
    Uyvy,
    Bgra32,
    Jpeg,
}

impl PixelFormat {
    /// Whether the format belongs to the 4:2:0 family the extractor accepts.
    pub fn is_yuv420(&self) -> bool {
        matches!(
            self,
            Self::Yuv420Flexible | Self::I420 | Self::Yv12 | Self::Nv12 | Self::Nv21
        )
    }

    pub fn bits_per_pixel(&self) -> Option<u32> {
        match self {
            Self::Yuv420Flexible | Self::I420 | Self::Yv12 | Self::Nv12 | Self::Nv21 => Some(12),
            Self::Yuyv | Self::Uyvy => Some(16),
            Self::Bgra32 => Some(32),
            Self::Jpeg => None,
        }
    }
}

/// Canonical packed 4:2:0 layouts produced by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackedLayout {
    I420,
    Nv21,
}

impl PackedLayout {
    pub fn name(&self) -> &'static str {
        match self {
            Self::I420 => "I420",
            Self::Nv21 => "NV21",
        }
    }
}

impl fmt::Display for PackedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How materialized frames are written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    I420,
    Nv21,
    Jpeg,
}

impl OutputFormat {
    /// Layout extracted before the frame is stored. JPEG compresses NV21.
    pub fn layout(&self) -> PackedLayout {
        match self {
            Self::I420 => PackedLayout::I420,
            Self::Nv21 | Self::Jpeg => PackedLayout::Nv21,
        }
    }
}

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    /// Number of luma samples.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of a packed 4:2:0 frame of this size.
    pub fn yuv420_len(&self) -> usize {
        self.area() * 12 / 8
    }

    pub fn transposed(&self) -> Self {
        Size {
            width: self.height,
            height: self.width,
        }
    }
}

/// Visible sub-region of a frame's planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn from_size(size: Size) -> Self {
        Rect {
            left: 0,
            top: 0,
            right: size.width,
            bottom: size.height,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }
}

/// A rational number (numerator / denominator).
///
/// Used for stream frame rates (e.g. 30000/1001).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }
}

/// A quarter-turn rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts 0, 90, 180 and 270.
    pub fn from_degrees(degrees: i32) -> Result<Self, Error> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            _ => Err(Error::InvalidArgument(format!(
                "rotation must be 0, 90, 180 or 270 degrees, got {degrees}"
            ))),
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(&self) -> bool {
        self.degrees() % 180 != 0
    }
}

impl Serialize for Rotation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.degrees())
    }
}

impl<'de> Deserialize<'de> for Rotation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let degrees = i32::deserialize(deserializer)?;
        Rotation::from_degrees(degrees).map_err(serde::de::Error::custom)
    }
}
