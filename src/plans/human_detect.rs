//! Liveness validation phase.

use super::SessionError;
use crate::{
    backend::bridge::InboundMessage,
    consts::CAMERA_TAG_VALIDATION,
    controller::Services,
    image,
    liveness::LivenessResult,
    phase::Phase,
    ui::MetricsSnapshot,
};
use ordered_float::OrderedFloat;
use std::time::Duration;
use tokio::{sync::mpsc, time};

/// The frame selected at the end of the validation window.
#[derive(Clone, Debug)]
pub struct SelectedFrame {
    /// The winning liveness result.
    pub result: LivenessResult,
    /// Composite quality score.
    pub score: f64,
    /// Bbox stability component.
    pub stability: f64,
    /// Normalized focus component.
    pub focus: f64,
}

/// Exponentially weighted inverse of bbox centroid motion.
///
/// Motion is the centroid displacement between consecutive frames in
/// pixels; its running average decays with the configured half-life. A
/// motionless face scores 1, a shaking one approaches 0.
#[derive(Debug)]
pub struct StabilityTracker {
    half_life: Duration,
    ewma_motion: f64,
    last: Option<((f64, f64), Duration)>,
}

impl StabilityTracker {
    /// Creates a tracker with the given decay half-life.
    #[must_use]
    pub fn new(half_life: Duration) -> Self {
        Self { half_life, ewma_motion: 0.0, last: None }
    }

    /// Feeds one centroid observation; returns the stability in `[0, 1]`.
    pub fn update(&mut self, centroid: (f64, f64), timestamp: Duration) -> f64 {
        if let Some((previous, at)) = self.last {
            let motion =
                ((centroid.0 - previous.0).powi(2) + (centroid.1 - previous.1).powi(2)).sqrt();
            let dt = timestamp.saturating_sub(at);
            let alpha = 1.0 - 0.5_f64.powf(dt.as_secs_f64() / self.half_life.as_secs_f64());
            self.ewma_motion += alpha * (motion - self.ewma_motion);
        }
        self.last = Some((centroid, timestamp));
        self.stability()
    }

    /// Current stability value.
    #[must_use]
    pub fn stability(&self) -> f64 {
        (1.0 / (1.0 + self.ewma_motion)).clamp(0.0, 1.0)
    }
}

/// Validation plan: collect passing frames, keep the best one.
pub struct Plan {
    tracker: StabilityTracker,
    passing: usize,
    best: Option<SelectedFrame>,
}

impl Plan {
    /// Creates the plan.
    #[must_use]
    pub fn new(half_life: Duration) -> Self {
        Self { tracker: StabilityTracker::new(half_life), passing: 0, best: None }
    }

    /// Runs the validation window and returns the best passing frame.
    ///
    /// The bridge queue is drained alongside the result stream: an
    /// explicit bridge error fails this phase instead of lingering until
    /// processing reads the queue.
    pub async fn run(
        &mut self,
        services: &Services,
        inbound_rx: &mut mpsc::Receiver<InboundMessage>,
    ) -> Result<SelectedFrame, SessionError> {
        services.events.emit_phase(Phase::HumanDetect, None, None);
        let warmup = if services.camera.held(CAMERA_TAG_VALIDATION).await > 0 {
            services.config.warmup_warm()
        } else {
            services.camera.acquire(CAMERA_TAG_VALIDATION).await.map_err(SessionError::Camera)?;
            services.config.warmup_cold()
        };
        time::sleep(warmup).await;

        let mut results = services.camera.subscribe_results();
        let deadline = time::Instant::now() + services.config.validation_window();
        loop {
            tokio::select! {
                () = time::sleep_until(deadline) => break,
                result = results.recv() => match result {
                    Some(result) => self.ingest(result, services),
                    None => {
                        return Err(SessionError::Internal(
                            "camera result stream ended".to_owned(),
                        ))
                    }
                },
                message = inbound_rx.recv() => match message {
                    Some(InboundMessage::FromApp { platform_id }) => {
                        tracing::warn!("ignoring repeated app connect from {platform_id}");
                    }
                    Some(InboundMessage::BackendResponse { .. }) => {
                        tracing::warn!("unexpected backend response during validation");
                    }
                    Some(InboundMessage::Error { kind, detail }) => {
                        tracing::error!("bridge error during validation: {kind}: {detail}");
                        return Err(SessionError::Bridge(detail));
                    }
                    None => return Err(SessionError::BridgeLost),
                },
            }
        }

        if self.passing < services.config.validation.min_passing_frames {
            tracing::info!("validation failed with {} passing frames", self.passing);
            return Err(SessionError::ValidationInsufficient);
        }
        self.best.take().ok_or_else(|| {
            SessionError::Internal("passing frames recorded without a best frame".to_owned())
        })
    }

    /// Scores one result and publishes the metric snapshot.
    fn ingest(&mut self, result: LivenessResult, services: &Services) {
        let config = &services.config.validation;
        let stability = match result.bbox {
            Some(bbox) => self.tracker.update(bbox.centroid(), result.timestamp),
            None => self.tracker.stability(),
        };
        let mut focus = 0.0;
        let mut composite = 0.0;
        if result.is_passing() {
            focus = (image::variance_of_laplacian(&result.color)
                / config.focus_norm_threshold)
                .min(1.0);
            composite = config.stability_weight * stability + config.focus_weight * focus;
            self.passing += 1;
            let better = self
                .best
                .as_ref()
                .map_or(true, |best| OrderedFloat(composite) > OrderedFloat(best.score));
            if better {
                self.best = Some(SelectedFrame {
                    result: result.clone(),
                    score: composite,
                    stability,
                    focus,
                });
            }
        }
        let depth_ok = result.mean_depth_m.is_some_and(|mean| {
            mean >= services.config.camera.distance_min_m
                && mean <= services.config.camera.distance_max_m
        });
        let progress =
            (self.passing as f64 / config.min_passing_frames as f64).min(1.0);
        services.events.emit_metrics(MetricsSnapshot {
            stability,
            focus,
            composite,
            instant_alive: result.is_passing(),
            stable_alive: self.passing >= config.min_passing_frames,
            depth_ok,
            face_detected: result.face_detected,
            validation_progress: progress,
        });
    }
}
