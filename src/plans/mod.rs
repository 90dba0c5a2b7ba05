//! Collection of session plans.
//!
//! A session is one pass from the proximity trigger through `Complete` or
//! `Error` back to `Idle`. The whole walk runs on the controller's task;
//! blocking work is pushed onto the executor by the individual plans.

pub mod human_detect;
pub mod pairing;
pub mod processing;
pub mod qr_display;

use crate::{
    agents::camera::CameraError,
    backend::{auth::TokenResponse, bridge::AckStatus},
    consts::{
        CAMERA_TAG_VALIDATION, HELLO_HUMAN_DISPLAY, SCAN_PROMPT_DISPLAY, STABILITY_HALF_LIFE,
    },
    controller::Services,
    dd_incr, dd_timing,
    phase::Phase,
};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Typed session failures, classified for the error phase.
///
/// The `Display` form of every variant except [`Cancelled`] is the
/// user-facing message shown by the presentation layer.
///
/// [`Cancelled`]: SessionError::Cancelled
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The pairing token could not be issued.
    #[error("pairing service unavailable")]
    TokenIssue,
    /// The pairing token expired before the app connected.
    #[error("QR expired")]
    QrExpired,
    /// The bridge connection failed or was lost mid-session.
    #[error("bridge connection lost")]
    BridgeLost,
    /// The bridge reported an explicit error.
    #[error("bridge error: {0}")]
    Bridge(String),
    /// The backend did not acknowledge the upload in time.
    #[error("backend processing timeout")]
    BackendTimeout,
    /// The backend rejected the upload; carries its message verbatim.
    #[error("{0}")]
    BackendRejected(String),
    /// Too few passing frames in the validation window.
    #[error("please position your face in frame")]
    ValidationInsufficient,
    /// The camera pipeline failed to start or died mid-phase.
    #[error("camera unavailable")]
    Camera(#[source] CameraError),
    /// Proximity cancel or shutdown; silent to the user.
    #[error("session cancelled")]
    Cancelled,
    /// Catch-all for faults with no dedicated classification.
    #[error("internal error")]
    Internal(String),
}

impl SessionError {
    /// Whether the failure returns to idle without an error phase.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

/// Receipt of the backend acknowledgement.
#[derive(Clone, Debug)]
pub struct AckReceipt {
    /// Accept/reject status.
    pub status: AckStatus,
    /// Optional server-provided message.
    pub detail: Option<String>,
}

/// Per-session state. At most one instance exists at any instant, and
/// none while the kiosk is idle.
#[derive(Debug)]
pub struct SessionContext {
    /// Session id carried through logs, files and uploads.
    pub session_id: Uuid,
    /// Pairing token, once minted.
    pub token: Option<TokenResponse>,
    /// Platform id, once the mobile peer connected.
    pub platform_id: Option<String>,
    /// Composite score of the selected frame.
    pub best_score: Option<f64>,
    /// Backend acknowledgement of the upload.
    pub upload_receipt: Option<AckReceipt>,
    /// Cancellation handle of the running session task.
    pub cancel: CancellationToken,
}

impl SessionContext {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            token: None,
            platform_id: None,
            best_score: None,
            upload_receipt: None,
            cancel,
        }
    }
}

/// Runs one full session and always leaves the kiosk idle again.
///
/// Returns `true` when the session completed successfully.
pub async fn run_session(services: Arc<Services>, cancel: CancellationToken) -> bool {
    let started = Instant::now();
    let mut plan = SessionPlan::new(Arc::clone(&services), cancel.clone());
    tracing::info!("session {} started", plan.ctx.session_id);
    dd_incr!("main.count.session.started");
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SessionError::Cancelled),
        result = plan.run() => result,
    };
    dd_timing!("main.time.session.total", started.into_std());
    plan.finish(result).await
}

/// One session's phase walk.
struct SessionPlan {
    services: Arc<Services>,
    ctx: SessionContext,
}

impl SessionPlan {
    fn new(services: Arc<Services>, cancel: CancellationToken) -> Self {
        Self { services, ctx: SessionContext::new(cancel) }
    }

    async fn run(&mut self) -> Result<(), SessionError> {
        let services = Arc::clone(&self.services);

        let token = pairing::Plan.run(&services).await?;
        self.ctx.token = Some(token);

        services.events.emit_phase(Phase::HelloHuman, None, None);
        sleep(HELLO_HUMAN_DISPLAY).await;

        services.events.emit_phase(Phase::ScanPrompt, None, None);
        sleep(SCAN_PROMPT_DISPLAY).await;

        // From the bridge connect onwards a lost connection must abort
        // whatever phase is running, including ones that never read the
        // bridge queue.
        let bridge = Arc::clone(&services.bridge);
        let receipt = {
            let connected_phases = self.bridged_phases();
            tokio::pin!(connected_phases);
            tokio::select! {
                () = bridge.wait_lost() => Err(SessionError::BridgeLost),
                result = &mut connected_phases => result,
            }
        }?;
        self.ctx.upload_receipt = Some(receipt);

        services.events.emit_phase(Phase::Complete, None, None);
        dd_incr!("main.count.session.complete");
        sleep(services.config.complete_display()).await;
        Ok(())
    }

    /// The phases that require a healthy bridge connection.
    async fn bridged_phases(&mut self) -> Result<AckReceipt, SessionError> {
        let services = Arc::clone(&self.services);
        let (inbound_tx, mut inbound_rx) = crate::backend::bridge::BridgeClient::inbound_queue();

        let token = self.ctx.token.as_ref().expect("token minted by the pairing phase");
        let platform_id = qr_display::Plan::new(token)
            .run(&services, inbound_tx, &mut inbound_rx)
            .await?;
        self.ctx.platform_id = Some(platform_id);

        let selected = human_detect::Plan::new(STABILITY_HALF_LIFE)
            .run(&services, &mut inbound_rx)
            .await?;
        self.ctx.best_score = Some(selected.score);

        processing::Plan::new(selected).run(&services, &mut self.ctx, &mut inbound_rx).await
    }

    /// Cleanup and terminal display. Runs on every exit path, swallows
    /// every cleanup fault, and always ends in `Idle`.
    async fn finish(self, result: Result<(), SessionError>) -> bool {
        let Self { services, ctx } = self;
        if services.camera.held(CAMERA_TAG_VALIDATION).await > 0 {
            services.camera.release(CAMERA_TAG_VALIDATION).await;
        }
        services.bridge.disconnect().await;

        let success = match &result {
            Ok(()) => {
                tracing::info!("session {} complete", ctx.session_id);
                true
            }
            Err(error) if error.is_silent() => {
                tracing::info!("session {} cancelled", ctx.session_id);
                dd_incr!("main.count.session.cancelled");
                false
            }
            Err(error) => {
                tracing::warn!("session {} failed: {error:?}", ctx.session_id);
                dd_incr!("main.count.session.error");
                services.events.emit_phase(Phase::Error, None, Some(error.to_string()));
                sleep(services.config.error_display()).await;
                false
            }
        };
        drop(ctx);
        services.events.emit_phase(Phase::Idle, None, None);
        success
    }
}
