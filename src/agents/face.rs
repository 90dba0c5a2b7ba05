//! Face detection seam.
//!
//! The vendor landmark model lives behind [`FaceDetector`]; the kiosk core
//! only consumes the bounding box of a single forward pass. The in-tree
//! implementations are the development stand-ins used off-device and by
//! the test suite.

use crate::{agents::camera::ColorFrame, image::to_luma, liveness::BoundingBox};

/// A single-forward-pass face detector.
#[cfg_attr(test, mockall::automock)]
pub trait FaceDetector: Send + Sync {
    /// Returns the face bounding box, or `None` when no face is present.
    fn detect(&self, frame: &ColorFrame) -> Option<BoundingBox>;
}

/// Detector returning a fixed answer. Used by tests and scripted demos.
#[derive(Debug, Clone)]
pub struct StaticDetector {
    bbox: Option<BoundingBox>,
}

impl StaticDetector {
    /// A detector that always reports the given box.
    #[must_use]
    pub fn with_bbox(bbox: BoundingBox) -> Self {
        Self { bbox: Some(bbox) }
    }

    /// A detector that never finds a face.
    #[must_use]
    pub fn none() -> Self {
        Self { bbox: None }
    }
}

impl FaceDetector for StaticDetector {
    fn detect(&self, _frame: &ColorFrame) -> Option<BoundingBox> {
        self.bbox
    }
}

/// Brightness-region detector for the simulated pipeline.
///
/// The simulated depth pipeline renders the "face" as a bright rectangle;
/// this detector recovers its bounding box by thresholding the luma plane.
#[derive(Debug, Clone)]
pub struct LumaRegionDetector {
    threshold: u8,
    min_area: u32,
}

impl LumaRegionDetector {
    /// Creates a detector with the given luma threshold and minimum area.
    #[must_use]
    pub fn new(threshold: u8, min_area: u32) -> Self {
        Self { threshold, min_area }
    }
}

impl Default for LumaRegionDetector {
    fn default() -> Self {
        Self { threshold: 200, min_area: 64 }
    }
}

impl FaceDetector for LumaRegionDetector {
    fn detect(&self, frame: &ColorFrame) -> Option<BoundingBox> {
        let luma = to_luma(frame);
        let w = frame.width();
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (i, &value) in luma.iter().enumerate() {
            if value >= self.threshold {
                let (x, y) = (i as u32 % w, i as u32 / w);
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x + 1);
                y1 = y1.max(y + 1);
            }
        }
        if x0 == u32::MAX || (x1 - x0) * (y1 - y0) < self.min_area {
            return None;
        }
        Some(BoundingBox { x0, y0, x1, y1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame_with_patch(x0: u32, y0: u32, x1: u32, y1: u32) -> ColorFrame {
        let (w, h) = (64u32, 48u32);
        let mut data = vec![20u8; (w * h * 3) as usize];
        for y in y0..y1 {
            for x in x0..x1 {
                let i = ((y * w + x) * 3) as usize;
                data[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        ColorFrame::new(data, w, h, Duration::ZERO)
    }

    #[test]
    fn recovers_the_bright_patch() {
        let detector = LumaRegionDetector::default();
        let bbox = detector.detect(&frame_with_patch(10, 8, 30, 28)).unwrap();
        assert_eq!(bbox, BoundingBox { x0: 10, y0: 8, x1: 30, y1: 28 });
    }

    #[test]
    fn small_speckle_is_not_a_face() {
        let detector = LumaRegionDetector::default();
        assert!(detector.detect(&frame_with_patch(5, 5, 7, 7)).is_none());
    }
}
