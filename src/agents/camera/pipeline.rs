//! Depth pipeline seam.
//!
//! The vendor SDK sits behind [`DepthPipeline`]; the service only relies
//! on start/stop and a bounded frame wait. The in-tree implementation is
//! the simulated backend used off-device and by the test suite.

use super::frame::{ColorFrame, DepthFrame, FramePair};
use crate::config::CameraConfig;
use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

/// Errors of the camera boundary.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The pipeline failed to start.
    #[error("pipeline start failed: {0}")]
    Start(String),
    /// The pipeline instance was lost and cannot be activated.
    #[error("camera pipeline unavailable")]
    Unavailable,
}

/// Errors of a single frame wait.
#[derive(Debug, thiserror::Error)]
pub enum FrameWaitError {
    /// No aligned frame pair arrived within the timeout.
    #[error("frame timeout")]
    Timeout,
    /// The pipeline reported a fault.
    #[error("pipeline fault: {0}")]
    Fault(String),
}

/// A depth+color pipeline with aligned frame delivery.
pub trait DepthPipeline: Send {
    /// Starts streaming. Idempotent on an already-running pipeline.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Stops streaming and releases the stream buffers. Idempotent.
    fn stop(&mut self);

    /// Blocks for the next aligned frame pair, up to `timeout`.
    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, FrameWaitError>;
}

/// What the simulated camera currently "sees".
#[derive(Clone, Copy, Debug)]
pub struct SimulatedScene {
    /// Whether a face (bright patch) is present.
    pub face: bool,
    /// Mean depth of the face in meters.
    pub mean_m: f64,
    /// Depth standard deviation of the face in meters.
    pub stddev_m: f64,
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self { face: true, mean_m: 0.65, stddev_m: 0.02 }
    }
}

/// Shared handle that switches the simulated scene mid-stream.
#[derive(Clone, Debug, Default)]
pub struct SceneHandle(Arc<Mutex<SimulatedScene>>);

impl SceneHandle {
    /// Replaces the scene.
    pub fn set(&self, scene: SimulatedScene) {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = scene;
    }

    fn get(&self) -> SimulatedScene {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Deterministic software pipeline.
///
/// Renders the scene's face as a bright patch over a dark background and
/// a depth relief alternating around the configured mean, so the liveness
/// math recovers the scene parameters exactly.
#[derive(Debug)]
pub struct SimulatedPipeline {
    scene: SceneHandle,
    width: u32,
    height: u32,
    frame_interval: Duration,
    depth_scale: f64,
    running: bool,
    frame_index: u64,
    noise: StdRng,
}

impl SimulatedPipeline {
    /// Creates a pipeline for the configured resolution and frame rate.
    #[must_use]
    pub fn new(config: &CameraConfig, scene: SceneHandle) -> Self {
        Self {
            scene,
            width: config.resolution.w,
            height: config.resolution.h,
            frame_interval: Duration::from_secs(1) / config.fps.max(1),
            depth_scale: 0.001,
            running: false,
            frame_index: 0,
            noise: StdRng::seed_from_u64(0),
        }
    }

    fn face_rect(&self) -> (u32, u32, u32, u32) {
        let (w, h) = (self.width, self.height);
        (w / 4, h / 4, w * 3 / 4, h * 3 / 4)
    }
}

impl DepthPipeline for SimulatedPipeline {
    fn start(&mut self) -> Result<(), CameraError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn wait_for_frames(&mut self, _timeout: Duration) -> Result<FramePair, FrameWaitError> {
        if !self.running {
            return Err(FrameWaitError::Fault("pipeline is stopped".to_owned()));
        }
        thread::sleep(self.frame_interval);
        let scene = self.scene.get();
        let (w, h) = (self.width, self.height);
        let (x0, y0, x1, y1) = self.face_rect();

        let mut color = vec![20u8; (w * h * 3) as usize];
        let mut depth = vec![0u16; (w * h) as usize];
        if scene.face {
            let offset = (scene.stddev_m / self.depth_scale).round() as i64;
            let mean = (scene.mean_m / self.depth_scale).round() as i64;
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = (y * w + x) as usize;
                    // Slight texture keeps the focus measure non-zero.
                    let bright =
                        if (x + y) % 2 == 0 { 255 } else { self.noise.gen_range(230..=250) };
                    color[i * 3..i * 3 + 3].copy_from_slice(&[bright, bright, bright]);
                    let raw = if x % 2 == 0 { mean - offset } else { mean + offset };
                    depth[i] = raw.clamp(0, i64::from(u16::MAX)) as u16;
                }
            }
        }
        self.frame_index += 1;
        let timestamp = self.frame_interval * self.frame_index as u32;
        Ok(FramePair {
            color: ColorFrame::new(color, w, h, timestamp),
            depth: DepthFrame::new(depth, self.depth_scale, w, h),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agents::face::LumaRegionDetector, config::CameraConfig, liveness,
        liveness::Verdict,
    };
    use approx::assert_abs_diff_eq;

    #[test]
    fn simulated_face_recovers_scene_parameters() {
        let mut config = CameraConfig::default();
        config.resolution = crate::config::Resolution { w: 64, h: 48 };
        config.fps = 1000;
        let mut pipeline = SimulatedPipeline::new(&config, SceneHandle::default());
        pipeline.start().unwrap();
        let pair = pipeline.wait_for_frames(Duration::from_secs(1)).unwrap();
        let result = liveness::evaluate(&LumaRegionDetector::default(), pair, &config);
        assert_eq!(result.verdict, Verdict::Live);
        assert_abs_diff_eq!(result.mean_depth_m.unwrap(), 0.65, epsilon = 1e-9);
        assert_abs_diff_eq!(result.depth_stddev_m.unwrap(), 0.02, epsilon = 1e-9);
    }

    #[test]
    fn stopped_pipeline_faults() {
        let config = CameraConfig::default();
        let mut pipeline = SimulatedPipeline::new(&config, SceneHandle::default());
        assert!(matches!(
            pipeline.wait_for_frames(Duration::from_millis(10)),
            Err(FrameWaitError::Fault(_))
        ));
    }
}
