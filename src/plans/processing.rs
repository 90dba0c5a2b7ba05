//! Processing phase: upload the selected frame and await the verdict.

use super::{human_detect::SelectedFrame, AckReceipt, SessionContext, SessionError};
use crate::{
    backend::bridge::{AckStatus, InboundMessage, OutboundMessage, UploadMetadata},
    consts::{CAMERA_TAG_VALIDATION, JPEG_QUALITY_CAPTURE},
    controller::Services,
    dd_timing, image,
    phase::Phase,
    store::CaptureArtifact,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::{sync::mpsc, task, time};

/// Processing plan.
pub struct Plan {
    selected: SelectedFrame,
}

impl Plan {
    /// Creates the plan for the selected frame.
    #[must_use]
    pub fn new(selected: SelectedFrame) -> Self {
        Self { selected }
    }

    /// Runs the phase: release the camera, persist and upload the frame,
    /// then hold until the backend acknowledges (or the wait expires).
    pub async fn run(
        &mut self,
        services: &Services,
        ctx: &mut SessionContext,
        inbound_rx: &mut mpsc::Receiver<InboundMessage>,
    ) -> Result<AckReceipt, SessionError> {
        services.events.emit_phase(Phase::Processing, None, None);
        let entry = time::Instant::now();
        services.camera.release(CAMERA_TAG_VALIDATION).await;

        let platform_id = ctx
            .platform_id
            .clone()
            .ok_or_else(|| SessionError::Internal("processing without a platform id".to_owned()))?;
        let selected = &self.selected;
        let color = selected.result.color.clone();
        let jpeg = task::spawn_blocking(move || image::encode_jpeg(&color, JPEG_QUALITY_CAPTURE))
            .await
            .map_err(|err| SessionError::Internal(err.to_string()))?
            .map_err(|err| SessionError::Internal(err.to_string()))?;

        let bbox = selected.result.bbox.ok_or_else(|| {
            SessionError::Internal("selected frame without a bounding box".to_owned())
        })?;
        let distance_m = selected.result.mean_depth_m.unwrap_or_default();
        let stddev_m = selected.result.depth_stddev_m.unwrap_or_default();
        let metadata = UploadMetadata::new(
            platform_id.clone(),
            selected.score,
            distance_m,
            stddev_m,
            bbox,
        );

        // Persistence failure is logged and must not fail the session.
        let artifact = CaptureArtifact {
            session_id: ctx.session_id,
            platform_id,
            captured_at: ::time::OffsetDateTime::now_utc(),
            score: selected.score,
            distance_m,
            stddev_m,
            stability: selected.stability,
            focus: selected.focus,
            bbox,
            jpeg: jpeg.clone(),
        };
        let store = services.store.clone();
        match task::spawn_blocking(move || store.persist(&artifact)).await {
            Ok(Ok(path)) => tracing::info!("best frame persisted to {}", path.display()),
            Ok(Err(err)) => tracing::error!("best frame persistence failed: {err:?}"),
            Err(err) => tracing::error!("persistence task failed: {err}"),
        }

        services
            .bridge
            .send(&OutboundMessage::ToBackend { image_b64: BASE64.encode(&jpeg), metadata })
            .await;

        let deadline = entry + services.config.processing_max_wait();
        let receipt = loop {
            let message = match time::timeout_at(deadline, inbound_rx.recv()).await {
                Err(_) => return Err(SessionError::BackendTimeout),
                Ok(None) => return Err(SessionError::BridgeLost),
                Ok(Some(message)) => message,
            };
            match message {
                InboundMessage::BackendResponse { status, detail } => {
                    break AckReceipt { status, detail };
                }
                InboundMessage::FromApp { platform_id } => {
                    tracing::warn!("ignoring repeated app connect from {platform_id}");
                }
                InboundMessage::Error { kind, detail } => {
                    tracing::error!("bridge error during processing: {kind}: {detail}");
                    return Err(SessionError::Bridge(detail));
                }
            }
        };
        dd_timing!("main.time.session.backend_ack", entry.into_std());

        // An early ack still holds the phase to its minimum display time.
        time::sleep_until(entry + services.config.processing_min_display()).await;
        match receipt.status {
            AckStatus::Ok => Ok(receipt),
            AckStatus::Error => Err(SessionError::BackendRejected(
                receipt
                    .detail
                    .unwrap_or_else(|| "the backend rejected the capture".to_owned()),
            )),
        }
    }
}
