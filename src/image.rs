//! Image helpers: grayscale conversion, focus measure, JPEG encoding.

use crate::agents::camera::ColorFrame;
use eyre::{Result, WrapErr};
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;

/// Converts an RGB8 frame to 8-bit luma using the BT.601 weights.
#[must_use]
pub fn to_luma(frame: &ColorFrame) -> Vec<u8> {
    frame
        .data()
        .chunks_exact(3)
        .map(|px| {
            let y = 0.299 * f64::from(px[0]) + 0.587 * f64::from(px[1]) + 0.114 * f64::from(px[2]);
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Variance of the 4-neighbour Laplacian over the luma plane.
///
/// Sharp frames produce high variance; defocused frames collapse towards
/// zero. Border pixels are excluded.
#[must_use]
pub fn variance_of_laplacian(frame: &ColorFrame) -> f64 {
    let luma = to_luma(frame);
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = f64::from(luma[y * w + x]);
            let neighbours = f64::from(luma[(y - 1) * w + x])
                + f64::from(luma[(y + 1) * w + x])
                + f64::from(luma[y * w + x - 1])
                + f64::from(luma[y * w + x + 1]);
            responses.push(neighbours - 4.0 * center);
        }
    }
    let mean = responses.iter().sum::<f64>() / responses.len() as f64;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / responses.len() as f64
}

/// Encodes an RGB8 frame as JPEG with the given quality.
pub fn encode_jpeg(frame: &ColorFrame, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(frame.data(), frame.width(), frame.height(), image::ColorType::Rgb8)
        .wrap_err("JPEG encoding failed")?;
    Ok(buf.into_inner())
}
