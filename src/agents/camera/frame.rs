//! Aligned color and depth frames.
//!
//! Both frame types wrap their buffers in [`Arc`] inside, so cloning is
//! cheap and results can be fanned out to any number of subscribers.

use std::{sync::Arc, time::Duration};

/// An 8-bit RGB color frame.
#[derive(Clone, Debug)]
pub struct ColorFrame(Arc<ColorData>);

#[derive(Debug)]
struct ColorData {
    data: Vec<u8>,
    width: u32,
    height: u32,
    timestamp: Duration,
}

impl ColorFrame {
    /// Wraps an RGB8 buffer. The buffer length must be `width * height * 3`.
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp: Duration) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self(Arc::new(ColorData { data, width, height, timestamp }))
    }

    /// Raw RGB8 bytes, row-major.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height
    }

    /// Monotonic timestamp assigned by the pipeline.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        self.0.timestamp
    }
}

/// A depth frame aligned to its color counterpart.
///
/// Depth values are raw sensor units; `depth_scale` converts them to
/// meters. A raw value of zero marks an invalid measurement.
#[derive(Clone, Debug)]
pub struct DepthFrame(Arc<DepthData>);

#[derive(Debug)]
struct DepthData {
    data: Vec<u16>,
    depth_scale: f64,
    width: u32,
    height: u32,
}

impl DepthFrame {
    /// Wraps a raw depth buffer. The buffer length must be `width * height`.
    #[must_use]
    pub fn new(data: Vec<u16>, depth_scale: f64, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self(Arc::new(DepthData { data, depth_scale, width, height }))
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height
    }

    /// Meters per raw depth unit.
    #[must_use]
    pub fn depth_scale(&self) -> f64 {
        self.0.depth_scale
    }

    /// Depth in meters at a pixel, or `None` for invalid measurements.
    #[must_use]
    pub fn depth_m(&self, x: u32, y: u32) -> Option<f64> {
        if x >= self.0.width || y >= self.0.height {
            return None;
        }
        let raw = self.0.data[y as usize * self.0.width as usize + x as usize];
        (raw != 0).then(|| f64::from(raw) * self.0.depth_scale)
    }
}

/// An aligned color/depth frame pair.
#[derive(Clone, Debug)]
pub struct FramePair {
    /// The color frame.
    pub color: ColorFrame,
    /// The depth frame, aligned to the color frame.
    pub depth: DepthFrame,
}
