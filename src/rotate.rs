use std::borrow::Cow;

use crate::error::Error;
use crate::types::{Rotation, Size};

/// Rotate a packed NV21 frame clockwise by `degrees` (0, 90, 180 or 270).
///
/// The result has the same length as the input; for 90 and 270 its
/// dimensions are `height x width`. A zero rotation borrows the input.
pub fn rotate_nv21(data: &[u8], width: u32, height: u32, degrees: i32) -> Result<Cow<'_, [u8]>, Error> {
    let rotation = Rotation::from_degrees(degrees)?;
    rotate_nv21_by(data, Size::new(width, height), rotation)
}

/// [`rotate_nv21`] with an already-validated rotation.
pub fn rotate_nv21_by(data: &[u8], size: Size, rotation: Rotation) -> Result<Cow<'_, [u8]>, Error> {
    if rotation == Rotation::Deg0 {
        return Ok(Cow::Borrowed(data));
    }
    if size.width % 2 != 0 || size.height % 2 != 0 {
        return Err(Error::InvalidArgument(format!(
            "NV21 dimensions must be even, got {}x{}",
            size.width, size.height
        )));
    }
    if data.len() < size.yuv420_len() {
        return Err(Error::InvalidArgument(format!(
            "NV21 buffer of {} bytes is too short for {}x{}",
            data.len(),
            size.width,
            size.height
        )));
    }

    let degrees = rotation.degrees();
    let swap = degrees % 180 != 0;
    let xflip = degrees % 270 != 0;
    let yflip = degrees >= 180;

    let width = size.width as usize;
    let height = size.height as usize;
    let frame_size = width * height;
    let (w_out, h_out) = if swap { (height, width) } else { (width, height) };

    let mut output = vec![0u8; data.len()];
    for j in 0..height {
        for i in 0..width {
            let y_in = j * width + i;
            let uv_in = frame_size + (j >> 1) * width + (i & !1);

            let (i_swapped, j_swapped) = if swap { (j, i) } else { (i, j) };
            let i_out = if xflip { w_out - i_swapped - 1 } else { i_swapped };
            let j_out = if yflip { h_out - j_swapped - 1 } else { j_swapped };

            let y_out = j_out * w_out + i_out;
            let uv_out = frame_size + (j_out >> 1) * w_out + (i_out & !1);

            output[y_out] = data[y_in];
            output[uv_out] = data[uv_in];
            output[uv_out + 1] = data[uv_in + 1];
        }
    }
    Ok(Cow::Owned(output))
}
