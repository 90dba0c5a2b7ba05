//! The kiosk controller.
//!
//! One explicitly constructed value owned by the supervisor. External
//! actors (proximity loop, admin surface, shutdown signal) post typed
//! commands into a bounded queue; the controller's single task interprets
//! them, so all phase transitions and session state live on one task.

use crate::{
    agents::camera::CameraService,
    backend::bridge::BridgeClient,
    config::Config,
    consts::{CAMERA_TAG_PREVIEW, COMMAND_QUEUE_CAPACITY},
    dd_incr,
    ext::mpsc::SenderExt as _,
    phase::Phase,
    plans,
    store::CaptureStore,
    ui::EventBus,
};
use eyre::Result;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

/// Commands accepted by the controller task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// A debounced proximity transition.
    Proximity {
        /// `true` for near, `false` for far.
        triggered: bool,
        /// Distance of the transition sample.
        distance_mm: u16,
    },
    /// Operator-initiated session start.
    ManualTrigger,
    /// Acquire or release the preview hold on the camera.
    SetPreview(bool),
    /// Quiesce and exit the controller loop.
    Shutdown,
}

/// Posting side of the controller command queue.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Posts a command without blocking; a full queue drops it.
    pub fn post(&self, command: Command) {
        if self.tx.send_now(command).is_err() {
            tracing::warn!("controller is gone, dropping {command:?}");
        }
    }
}

/// Shared service handles used by the controller and the session plans.
#[derive(Debug)]
pub struct Services {
    /// Validated configuration.
    pub config: Arc<Config>,
    /// Camera owner.
    pub camera: Arc<CameraService>,
    /// Bridge client.
    pub bridge: Arc<BridgeClient>,
    /// Presentation event bus.
    pub events: EventBus,
    /// Capture persistence.
    pub store: CaptureStore,
}

/// The controller value owned by the supervisor.
pub struct Controller {
    services: Arc<Services>,
    rx: mpsc::Receiver<Command>,
    tx: CommandSender,
    oneshot: bool,
    preview_held: bool,
}

impl Controller {
    /// Creates the controller and its command queue.
    #[must_use]
    pub fn new(services: Arc<Services>, oneshot: bool) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        Self { services, rx, tx: CommandSender { tx }, oneshot, preview_held: false }
    }

    /// A handle for posting commands into the controller.
    #[must_use]
    pub fn command_sender(&self) -> CommandSender {
        self.tx.clone()
    }

    /// Runs the controller loop until shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.services.events.emit_phase(Phase::Idle, None, None);
        loop {
            // Idle: wait for a trigger.
            let command = match self.rx.recv().await {
                Some(command) => command,
                None => break,
            };
            match command {
                Command::Proximity { triggered: true, distance_mm } => {
                    tracing::info!("session trigger at {distance_mm} mm");
                }
                Command::ManualTrigger => {
                    tracing::info!("manual session trigger");
                }
                Command::Proximity { triggered: false, .. } => continue,
                Command::SetPreview(enabled) => {
                    self.set_preview(enabled).await;
                    continue;
                }
                Command::Shutdown => break,
            }

            let success = self.drive_session().await;
            if self.oneshot && success {
                tracing::info!("oneshot session finished, exiting");
                break;
            }
        }
        self.quiesce().await;
        Ok(())
    }

    /// Runs one session while interpreting commands that arrive mid-flight.
    ///
    /// A far event schedules a cancel one debounce window ahead; a near
    /// event before the deadline disarms it. The cancel is silent.
    async fn drive_session(&mut self) -> bool {
        let cancel = CancellationToken::new();
        let session = plans::run_session(Arc::clone(&self.services), cancel.clone());
        tokio::pin!(session);
        let mut pending_cancel: Option<Instant> = None;
        let mut shutdown_after = false;

        let success = loop {
            let armed = pending_cancel;
            let cancel_wait = async move {
                match armed {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                success = &mut session => break success,
                Some(command) = self.rx.recv() => match command {
                    Command::Proximity { triggered: false, .. } => {
                        if pending_cancel.is_none()
                            && self.services.events.current_phase().is_cancellable()
                        {
                            tracing::info!("user left, scheduling session cancel");
                            pending_cancel = Some(
                                Instant::now() + self.services.config.proximity_debounce(),
                            );
                        }
                    }
                    Command::Proximity { triggered: true, .. } => {
                        if pending_cancel.take().is_some() {
                            tracing::info!("user returned, cancel disarmed");
                        }
                    }
                    Command::ManualTrigger => {
                        tracing::debug!("ignoring trigger, session already active");
                    }
                    Command::SetPreview(enabled) => self.set_preview(enabled).await,
                    Command::Shutdown => {
                        shutdown_after = true;
                        cancel.cancel();
                    }
                },
                () = cancel_wait, if pending_cancel.is_some() => {
                    pending_cancel = None;
                    if self.services.events.current_phase().is_cancellable() {
                        dd_incr!("main.count.session.proximity_cancel");
                        cancel.cancel();
                    }
                }
            }
        };
        if shutdown_after {
            self.tx.post(Command::Shutdown);
        }
        success
    }

    async fn set_preview(&mut self, enabled: bool) {
        if enabled == self.preview_held {
            return;
        }
        if enabled {
            match self.services.camera.acquire(CAMERA_TAG_PREVIEW).await {
                Ok(()) => self.preview_held = true,
                Err(err) => tracing::error!("preview activation failed: {err}"),
            }
        } else {
            self.services.camera.release(CAMERA_TAG_PREVIEW).await;
            self.preview_held = false;
        }
    }

    /// Releases every hold the controller still owns.
    async fn quiesce(&mut self) {
        if self.preview_held {
            self.services.camera.release(CAMERA_TAG_PREVIEW).await;
            self.preview_held = false;
        }
        self.services.bridge.disconnect().await;
    }
}
