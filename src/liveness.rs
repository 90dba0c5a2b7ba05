//! Per-frame liveness evaluation.
//!
//! The evaluator is a pure function over one aligned frame pair. It keeps
//! no state between frames; temporal smoothing belongs to the session
//! plans.

use crate::{
    agents::{
        camera::{ColorFrame, DepthFrame, FramePair},
        face::FaceDetector,
    },
    config::CameraConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Face bounding box in pixel coordinates, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x0: u32,
    /// Top edge.
    pub y0: u32,
    /// Right edge (exclusive).
    pub x1: u32,
    /// Bottom edge (exclusive).
    pub y1: u32,
}

impl BoundingBox {
    /// Center of the box in pixel coordinates.
    #[must_use]
    pub fn centroid(&self) -> (f64, f64) {
        (f64::from(self.x0 + self.x1) / 2.0, f64::from(self.y0 + self.y1) / 2.0)
    }

    /// The box as the `[x0, y0, x1, y1]` array used on the wire.
    #[must_use]
    pub fn to_array(&self) -> [u32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// Liveness verdict with its reason tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The frame passed all liveness checks.
    Live,
    /// Too few valid depth points inside the bounding box.
    InsufficientDepthData,
    /// Mean depth below the configured minimum.
    TooClose,
    /// Mean depth above the configured maximum.
    TooFar,
    /// Depth relief too shallow; rejects photos and screens.
    FlatSurface,
    /// No face was detected in the frame.
    NoFace,
}

/// The outcome of evaluating a single frame pair.
#[derive(Clone, Debug)]
pub struct LivenessResult {
    /// Monotonic pipeline timestamp of the frame pair.
    pub timestamp: Duration,
    /// Whether a face was detected at all.
    pub face_detected: bool,
    /// Face bounding box, absent when no face was detected.
    pub bbox: Option<BoundingBox>,
    /// Mean depth over the valid points in meters.
    pub mean_depth_m: Option<f64>,
    /// Depth standard deviation over the valid points in meters.
    pub depth_stddev_m: Option<f64>,
    /// Count of valid depth points inside the bounding box.
    pub valid_points: usize,
    /// The liveness verdict.
    pub verdict: Verdict,
    /// The color frame; ownership moves into the result.
    pub color: ColorFrame,
    /// Shared handle to the raw depth frame.
    pub depth: DepthFrame,
}

impl LivenessResult {
    /// Whether this frame counts towards the validation quota.
    #[must_use]
    pub fn is_passing(&self) -> bool {
        self.verdict == Verdict::Live
    }
}

/// Evaluates one aligned frame pair.
///
/// The checks run in a fixed order and the first failing check names the
/// verdict: valid-point count, mean distance, depth relief.
#[must_use]
pub fn evaluate(
    detector: &dyn FaceDetector,
    pair: FramePair,
    config: &CameraConfig,
) -> LivenessResult {
    let FramePair { color, depth } = pair;
    let timestamp = color.timestamp();
    let Some(bbox) = detector.detect(&color) else {
        return LivenessResult {
            timestamp,
            face_detected: false,
            bbox: None,
            mean_depth_m: None,
            depth_stddev_m: None,
            valid_points: 0,
            verdict: Verdict::NoFace,
            color,
            depth,
        };
    };

    let values = depth_values(&depth, bbox);
    let valid_points = values.len();
    if valid_points < config.min_valid_points as usize {
        return LivenessResult {
            timestamp,
            face_detected: true,
            bbox: Some(bbox),
            mean_depth_m: None,
            depth_stddev_m: None,
            valid_points,
            verdict: Verdict::InsufficientDepthData,
            color,
            depth,
        };
    }

    let (mean, stddev) = mean_stddev(&values);
    let verdict = if mean < config.distance_min_m {
        Verdict::TooClose
    } else if mean > config.distance_max_m {
        Verdict::TooFar
    } else if stddev < config.depth_variance_min_m {
        Verdict::FlatSurface
    } else {
        Verdict::Live
    };
    LivenessResult {
        timestamp,
        face_detected: true,
        bbox: Some(bbox),
        mean_depth_m: Some(mean),
        depth_stddev_m: Some(stddev),
        valid_points,
        verdict,
        color,
        depth,
    }
}

/// Collects the valid depth values inside the bounding box, in meters.
fn depth_values(depth: &DepthFrame, bbox: BoundingBox) -> Vec<f64> {
    let x1 = bbox.x1.min(depth.width());
    let y1 = bbox.y1.min(depth.height());
    let mut values = Vec::new();
    for y in bbox.y0..y1 {
        for x in bbox.x0..x1 {
            if let Some(m) = depth.depth_m(x, y) {
                values.push(m);
            }
        }
    }
    values
}

/// Two-pass mean and standard deviation, stable on small samples.
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::face::StaticDetector;
    use approx::assert_abs_diff_eq;

    const W: u32 = 64;
    const H: u32 = 48;
    const SCALE: f64 = 0.001;

    fn pair_with_depth(raw: impl Fn(u32, u32) -> u16) -> FramePair {
        let color = ColorFrame::new(vec![128; (W * H * 3) as usize], W, H, Duration::ZERO);
        let mut data = Vec::with_capacity((W * H) as usize);
        for y in 0..H {
            for x in 0..W {
                data.push(raw(x, y));
            }
        }
        FramePair { color, depth: DepthFrame::new(data, SCALE, W, H) }
    }

    fn full_bbox() -> BoundingBox {
        BoundingBox { x0: 0, y0: 0, x1: W, y1: H }
    }

    fn config() -> CameraConfig {
        CameraConfig::default()
    }

    #[test]
    fn no_face_yields_absent_metrics() {
        let detector = StaticDetector::none();
        let result = evaluate(&detector, pair_with_depth(|_, _| 650), &config());
        assert_eq!(result.verdict, Verdict::NoFace);
        assert!(!result.face_detected);
        assert!(result.bbox.is_none());
        assert!(result.mean_depth_m.is_none());
        assert_eq!(result.valid_points, 0);
    }

    #[test]
    fn sparse_depth_is_insufficient() {
        let detector = StaticDetector::with_bbox(full_bbox());
        // Only 99 valid points in the whole frame.
        let result = evaluate(
            &detector,
            pair_with_depth(|x, y| if y == 0 && x < 99 { 650 } else { 0 }),
            &config(),
        );
        assert_eq!(result.verdict, Verdict::InsufficientDepthData);
        assert_eq!(result.valid_points, 99);
    }

    #[test]
    fn alternating_relief_passes_as_live() {
        let detector = StaticDetector::with_bbox(full_bbox());
        // Alternating 630/670 raw units: mean 0.65 m, stddev 0.02 m.
        let result =
            evaluate(&detector, pair_with_depth(|x, _| if x % 2 == 0 { 630 } else { 670 }), &config());
        assert_eq!(result.verdict, Verdict::Live);
        assert_abs_diff_eq!(result.mean_depth_m.unwrap(), 0.65, epsilon = 1e-9);
        assert_abs_diff_eq!(result.depth_stddev_m.unwrap(), 0.02, epsilon = 1e-9);
    }

    #[test]
    fn flat_relief_is_rejected() {
        let detector = StaticDetector::with_bbox(full_bbox());
        let result = evaluate(&detector, pair_with_depth(|_, _| 650), &config());
        assert_eq!(result.verdict, Verdict::FlatSurface);
    }

    #[test]
    fn stddev_exactly_at_threshold_is_live() {
        let detector = StaticDetector::with_bbox(full_bbox());
        // Alternating ±15 raw units: stddev exactly 0.015 m, the boundary.
        let result =
            evaluate(&detector, pair_with_depth(|x, _| if x % 2 == 0 { 635 } else { 665 }), &config());
        assert_abs_diff_eq!(result.depth_stddev_m.unwrap(), 0.015, epsilon = 1e-9);
        assert_eq!(result.verdict, Verdict::Live);
    }

    #[test]
    fn close_and_far_are_classified_in_order() {
        let detector = StaticDetector::with_bbox(full_bbox());
        let close = evaluate(&detector, pair_with_depth(|_, _| 200), &config());
        assert_eq!(close.verdict, Verdict::TooClose);
        let far = evaluate(&detector, pair_with_depth(|_, _| 1500), &config());
        assert_eq!(far.verdict, Verdict::TooFar);
    }
}
