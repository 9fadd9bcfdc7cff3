//! Pixel-format conversion from raw V4L2 buffers to RGB frames.

use image::{ImageFormat, Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Mjpeg(#[from] image::ImageError),
    #[error("MJPEG frame is {actual:?}, negotiated {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Convert packed YUYV 4:2:2 to RGB (BT.601, studio range).
///
/// Each 4-byte group [Y0, U, Y1, V] holds two horizontally adjacent pixels
/// sharing one chroma sample.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let g = grey[(y * width + x) as usize];
        Rgb([g, g, g])
    }))
}

/// Decode one motion-JPEG buffer.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let rgb = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8();
    if rgb.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: rgb.dimensions(),
        });
    }
    Ok(rgb)
}
