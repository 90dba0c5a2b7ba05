//! QR display phase.

use super::SessionError;
use crate::{
    backend::{auth::TokenResponse, bridge::InboundMessage},
    consts::CAMERA_TAG_VALIDATION,
    controller::Services,
    phase::Phase,
};
use std::time::Duration;
use tokio::{sync::mpsc, time};

/// QR display plan: open the bridge, show the payload, wait for the app.
pub struct Plan<'a> {
    token: &'a TokenResponse,
}

impl<'a> Plan<'a> {
    /// Creates the plan for an issued pairing token.
    #[must_use]
    pub fn new(token: &'a TokenResponse) -> Self {
        Self { token }
    }

    /// Runs the phase. Returns the platform id of the connected peer.
    ///
    /// The camera is pre-warmed here so the validation phase only needs
    /// the short warm-up. Token expiry bounds the phase from above.
    pub async fn run(
        &mut self,
        services: &Services,
        inbound_tx: mpsc::Sender<InboundMessage>,
        inbound_rx: &mut mpsc::Receiver<InboundMessage>,
    ) -> Result<String, SessionError> {
        services
            .bridge
            .connect(&self.token.token, inbound_tx)
            .await
            .map_err(|err| {
                tracing::error!("bridge connect failed: {err:?}");
                SessionError::BridgeLost
            })?;
        services.events.emit_phase(
            Phase::QrDisplay,
            Some(serde_json::json!({
                "token": self.token.token,
                "qr_payload": self.token.qr_payload,
                "expires_in": self.token.expires_in,
            })),
            None,
        );
        services.camera.acquire(CAMERA_TAG_VALIDATION).await.map_err(SessionError::Camera)?;

        let deadline = time::Instant::now() + Duration::from_secs(self.token.expires_in);
        loop {
            let message = match time::timeout_at(deadline, inbound_rx.recv()).await {
                Err(_) => return Err(SessionError::QrExpired),
                Ok(None) => return Err(SessionError::BridgeLost),
                Ok(Some(message)) => message,
            };
            match message {
                InboundMessage::FromApp { platform_id } => {
                    tracing::info!("mobile peer connected: {platform_id}");
                    return Ok(platform_id);
                }
                InboundMessage::BackendResponse { .. } => {
                    tracing::warn!("unexpected backend response while showing the QR");
                }
                InboundMessage::Error { kind, detail } => {
                    tracing::error!("bridge error during QR display: {kind}: {detail}");
                    return Err(SessionError::Bridge(detail));
                }
            }
        }
    }
}
