//! Depth camera ownership and the per-frame processing loop.

mod frame;
mod pipeline;
mod service;

pub use frame::{ColorFrame, DepthFrame, FramePair};
pub use pipeline::{
    CameraError, DepthPipeline, FrameWaitError, SceneHandle, SimulatedPipeline, SimulatedScene,
};
pub use service::CameraService;
