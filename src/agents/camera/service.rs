//! Reference-counted camera activation and the processing loop.

use super::{
    frame::FramePair,
    pipeline::{CameraError, DepthPipeline, FrameWaitError},
};
use crate::{
    agents::face::FaceDetector,
    broadcast::{Hub, PreviewFrame, Subscription},
    config::CameraConfig,
    consts::{
        FRAME_TIMEOUT, JPEG_QUALITY_PREVIEW, RESTART_AFTER_FAILURES, RESTART_AFTER_TIMEOUTS,
    },
    dd_incr, image,
    liveness::{self, LivenessResult},
};
use std::{collections::HashMap, sync::Arc, thread, time::Duration};
use tokio::{sync::Mutex, task};
use tokio_util::sync::CancellationToken;

/// How long `release` waits for the processing loop to wind down.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(3);

struct Worker {
    cancel: CancellationToken,
    handle: task::JoinHandle<Box<dyn DepthPipeline>>,
}

struct State {
    counts: HashMap<String, usize>,
    pipeline: Option<Box<dyn DepthPipeline>>,
    worker: Option<Worker>,
}

impl State {
    fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Owner of the depth+color pipeline.
///
/// Activation is arbitrated by named reference counts: the pipeline
/// physically starts on the first overall `acquire` and stops on the last
/// overall `release`. Both calls are serialized by a single lock, and both
/// run as detached tasks so a cancelled caller can never strand a
/// half-activated pipeline.
pub struct CameraService {
    inner: Arc<Inner>,
}

struct Inner {
    config: CameraConfig,
    detector: Arc<dyn FaceDetector>,
    hub: Arc<Hub>,
    state: Mutex<State>,
}

impl CameraService {
    /// Creates a service owning `pipeline` and publishing through a new hub.
    #[must_use]
    pub fn new(
        config: CameraConfig,
        detector: Arc<dyn FaceDetector>,
        pipeline: Box<dyn DepthPipeline>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                detector,
                hub: Arc::new(Hub::default()),
                state: Mutex::new(State {
                    counts: HashMap::new(),
                    pipeline: Some(pipeline),
                    worker: None,
                }),
            }),
        }
    }

    /// Increments the activation count for `tag`.
    ///
    /// The first overall increment starts the pipeline and spawns the
    /// processing loop; a start failure leaves the count untouched and
    /// fails the caller.
    pub async fn acquire(&self, tag: &str) -> Result<(), CameraError> {
        let inner = Arc::clone(&self.inner);
        let tag = tag.to_owned();
        task::spawn(async move { inner.acquire(&tag).await })
            .await
            .unwrap_or(Err(CameraError::Unavailable))
    }

    /// Decrements the activation count for `tag`.
    ///
    /// The last overall decrement signals the loop, stops the pipeline and
    /// releases the stream buffers. Always completes.
    pub async fn release(&self, tag: &str) {
        let inner = Arc::clone(&self.inner);
        let tag = tag.to_owned();
        drop(task::spawn(async move { inner.release(&tag).await }).await);
    }

    /// Current activation count for `tag`.
    pub async fn held(&self, tag: &str) -> usize {
        self.inner.state.lock().await.counts.get(tag).copied().unwrap_or(0)
    }

    /// Whether the pipeline is physically running.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.worker.is_some()
    }

    /// Subscribes to the frame-result stream.
    #[must_use]
    pub fn subscribe_results(&self) -> Subscription<LivenessResult> {
        self.inner.hub.subscribe_results()
    }

    /// Subscribes to the encoded preview stream.
    #[must_use]
    pub fn subscribe_previews(&self) -> Subscription<PreviewFrame> {
        self.inner.hub.subscribe_previews()
    }
}

impl std::fmt::Debug for CameraService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraService").finish_non_exhaustive()
    }
}

impl Inner {
    async fn acquire(&self, tag: &str) -> Result<(), CameraError> {
        let mut state = self.state.lock().await;
        if state.total() == 0 && state.worker.is_none() {
            let mut pipeline = state.pipeline.take().ok_or(CameraError::Unavailable)?;
            let started = task::spawn_blocking(move || match pipeline.start() {
                Ok(()) => Ok(pipeline),
                Err(err) => Err((err, pipeline)),
            })
            .await
            .map_err(|err| CameraError::Start(err.to_string()))?;
            match started {
                Ok(pipeline) => {
                    tracing::info!("camera pipeline activated by `{tag}`");
                    dd_incr!("main.count.camera.activated");
                    state.worker = Some(self.spawn_worker(pipeline));
                }
                Err((err, pipeline)) => {
                    state.pipeline = Some(pipeline);
                    return Err(err);
                }
            }
        }
        *state.counts.entry(tag.to_owned()).or_insert(0) += 1;
        Ok(())
    }

    async fn release(&self, tag: &str) {
        let mut state = self.state.lock().await;
        match state.counts.get_mut(tag) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                tracing::warn!("camera release for `{tag}` without a matching acquire");
                return;
            }
        }
        if state.total() > 0 {
            return;
        }
        let Some(worker) = state.worker.take() else { return };
        worker.cancel.cancel();
        match tokio::time::timeout(WORKER_STOP_TIMEOUT, worker.handle).await {
            Ok(Ok(pipeline)) => {
                tracing::info!("camera pipeline deactivated by `{tag}`");
                dd_incr!("main.count.camera.deactivated");
                state.pipeline = Some(pipeline);
            }
            Ok(Err(err)) => {
                tracing::error!("camera worker terminated abnormally: {err}");
            }
            Err(_) => {
                tracing::error!("camera worker did not stop in time");
            }
        }
    }

    fn spawn_worker(&self, pipeline: Box<dyn DepthPipeline>) -> Worker {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let config = self.config.clone();
        let detector = Arc::clone(&self.detector);
        let hub = Arc::clone(&self.hub);
        let handle = task::spawn_blocking(move || {
            processing_loop(pipeline, &config, detector.as_ref(), &hub, &loop_cancel)
        });
        Worker { cancel, handle }
    }
}

/// One iteration per frame: detect, evaluate, publish, preview cadence.
///
/// Eight consecutive frame timeouts or five consecutive processing
/// failures restart the pipeline in place; everything else stays confined
/// to the loop.
fn processing_loop(
    mut pipeline: Box<dyn DepthPipeline>,
    config: &CameraConfig,
    detector: &dyn FaceDetector,
    hub: &Hub,
    cancel: &CancellationToken,
) -> Box<dyn DepthPipeline> {
    let mut consecutive_timeouts: u32 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut frame_index: u32 = 0;
    while !cancel.is_cancelled() {
        match pipeline.wait_for_frames(FRAME_TIMEOUT) {
            Ok(pair) => {
                consecutive_timeouts = 0;
                match process_frame(pair, config, detector, hub, frame_index) {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        tracing::warn!(
                            "frame processing failed ({consecutive_failures} consecutive): {err:?}"
                        );
                        if consecutive_failures >= RESTART_AFTER_FAILURES {
                            restart(pipeline.as_mut());
                            consecutive_failures = 0;
                        }
                    }
                }
                frame_index = frame_index.wrapping_add(1);
            }
            Err(FrameWaitError::Timeout) => {
                consecutive_timeouts += 1;
                tracing::warn!("frame timeout ({consecutive_timeouts} consecutive)");
                if consecutive_timeouts >= RESTART_AFTER_TIMEOUTS {
                    restart(pipeline.as_mut());
                    consecutive_timeouts = 0;
                }
            }
            Err(FrameWaitError::Fault(fault)) => {
                consecutive_failures += 1;
                tracing::warn!(
                    "pipeline fault ({consecutive_failures} consecutive): {fault}"
                );
                if consecutive_failures >= RESTART_AFTER_FAILURES {
                    restart(pipeline.as_mut());
                    consecutive_failures = 0;
                }
            }
        }
    }
    pipeline.stop();
    pipeline
}

fn process_frame(
    pair: FramePair,
    config: &CameraConfig,
    detector: &dyn FaceDetector,
    hub: &Hub,
    frame_index: u32,
) -> eyre::Result<()> {
    let result = liveness::evaluate(detector, pair, config);
    let preview_due = frame_index % config.preview_frame_skip == 0;
    let preview_source = preview_due.then(|| result.color.clone());
    let timestamp = result.timestamp;
    hub.publish_result(result);
    if let Some(color) = preview_source {
        let jpeg = image::encode_jpeg(&color, JPEG_QUALITY_PREVIEW)?;
        hub.publish_preview(PreviewFrame { jpeg: Arc::new(jpeg), timestamp });
    }
    Ok(())
}

fn restart(pipeline: &mut dyn DepthPipeline) {
    dd_incr!("main.count.camera.restart");
    tracing::warn!("restarting the camera pipeline in place");
    pipeline.stop();
    if let Err(err) = pipeline.start() {
        tracing::error!("pipeline restart failed: {err}");
        thread::sleep(Duration::from_millis(500));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agents::camera::pipeline::{SceneHandle, SimulatedPipeline},
        agents::face::LumaRegionDetector,
        config::Resolution,
        liveness::Verdict,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> CameraConfig {
        let mut config = CameraConfig::default();
        config.resolution = Resolution { w: 64, h: 48 };
        config.fps = 200;
        config
    }

    fn service(config: &CameraConfig) -> CameraService {
        let pipeline = SimulatedPipeline::new(config, SceneHandle::default());
        CameraService::new(
            config.clone(),
            Arc::new(LumaRegionDetector::default()),
            Box::new(pipeline),
        )
    }

    /// Pipeline that counts starts/stops and never produces frames.
    struct CountingPipeline {
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
        fail_start: bool,
    }

    impl DepthPipeline for CountingPipeline {
        fn start(&mut self) -> Result<(), CameraError> {
            if self.fail_start {
                return Err(CameraError::Start("no device".to_owned()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn wait_for_frames(&mut self, timeout: Duration) -> Result<FramePair, FrameWaitError> {
            thread::sleep(timeout);
            Err(FrameWaitError::Timeout)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn double_acquire_runs_the_pipeline_exactly_once() {
        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let service = CameraService::new(
            test_config(),
            Arc::new(LumaRegionDetector::default()),
            Box::new(CountingPipeline {
                starts: Arc::clone(&starts),
                stops: Arc::clone(&stops),
                fail_start: false,
            }),
        );
        service.acquire("validation").await.unwrap();
        service.acquire("validation").await.unwrap();
        assert!(service.is_running().await);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        service.release("validation").await;
        assert!(service.is_running().await);
        service.release("validation").await;
        assert!(!service.is_running().await);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn distinct_tags_share_one_activation() {
        let config = test_config();
        let service = service(&config);
        service.acquire("validation").await.unwrap();
        service.acquire("preview").await.unwrap();
        service.release("validation").await;
        assert!(service.is_running().await);
        assert_eq!(service.held("preview").await, 1);
        service.release("preview").await;
        assert!(!service.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unmatched_release_is_a_logged_no_op() {
        let config = test_config();
        let service = service(&config);
        service.release("validation").await;
        assert!(!service.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_failure_fails_the_acquiring_caller() {
        let service = CameraService::new(
            test_config(),
            Arc::new(LumaRegionDetector::default()),
            Box::new(CountingPipeline {
                starts: Arc::new(AtomicU32::new(0)),
                stops: Arc::new(AtomicU32::new(0)),
                fail_start: true,
            }),
        );
        assert!(matches!(
            service.acquire("validation").await,
            Err(CameraError::Start(_))
        ));
        assert!(!service.is_running().await);
        assert_eq!(service.held("validation").await, 0);
        // The pipeline instance survives the failed start for a retry.
        assert!(matches!(
            service.acquire("validation").await,
            Err(CameraError::Start(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_results_flow_to_subscribers() {
        let config = test_config();
        let service = service(&config);
        let mut results = service.subscribe_results();
        service.acquire("validation").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("no result within the timeout")
            .unwrap();
        assert_eq!(result.verdict, Verdict::Live);
        service.release("validation").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn preview_frames_follow_the_cadence() {
        let config = test_config();
        let service = service(&config);
        let mut previews = service.subscribe_previews();
        service.acquire("preview").await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), previews.recv())
            .await
            .expect("no preview within the timeout")
            .unwrap();
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        service.release("preview").await;
    }
}
