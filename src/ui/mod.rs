//! Presentation event stream.
//!
//! The kiosk UI subscribes to phase, metric and heartbeat events; every
//! subscription is a bounded drop-oldest queue so a stalled UI can never
//! block the controller.

use crate::{
    consts::{EVENT_QUEUE_CAPACITY, HEARTBEAT_INTERVAL},
    ext::broadcast::ReceiverExt as _,
    phase::Phase,
};
use serde::Serialize;
use tokio::{
    sync::{broadcast, watch},
    task,
};
use tokio_stream::{wrappers::IntervalStream, StreamExt as _};

/// Per-frame metric snapshot shown by the UI during validation.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Temporal bbox stability in `[0, 1]`.
    pub stability: f64,
    /// Normalized focus in `[0, 1]`.
    pub focus: f64,
    /// Composite frame score.
    pub composite: f64,
    /// Whether the current frame's verdict is `live`.
    pub instant_alive: bool,
    /// Whether the passing-frame quota has been reached.
    pub stable_alive: bool,
    /// Whether the mean depth lies inside the accepted range.
    pub depth_ok: bool,
    /// Whether a face was detected in the current frame.
    pub face_detected: bool,
    /// Fraction of the passing-frame quota collected so far.
    pub validation_progress: f64,
}

/// Event emitted to presentation subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// A phase transition.
    State {
        /// The phase being entered.
        phase: Phase,
        /// Phase payload, e.g. the QR payload during `qr_display`.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        /// User-facing message when the phase is `error`.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A validation metric snapshot.
    Metrics {
        /// The snapshot.
        data: MetricsSnapshot,
    },
    /// UI-side liveness probe.
    Heartbeat,
}

/// Broadcast bus of [`ControllerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControllerEvent>,
    phase_tx: watch::Sender<Phase>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates the bus. The kiosk starts in [`Phase::Idle`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Self { tx, phase_tx }
    }

    /// Emits a phase transition.
    pub fn emit_phase(&self, phase: Phase, data: Option<serde_json::Value>, error: Option<String>) {
        self.phase_tx.send_replace(phase);
        tracing::info!("phase -> {phase:?}");
        drop(self.tx.send(ControllerEvent::State { phase, data, error }));
    }

    /// Emits a metric snapshot.
    pub fn emit_metrics(&self, data: MetricsSnapshot) {
        drop(self.tx.send(ControllerEvent::Metrics { data }));
    }

    /// The phase the kiosk is currently in.
    #[must_use]
    pub fn current_phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    /// Watches phase changes without consuming events.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Subscribes to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription { rx: self.tx.subscribe() }
    }

    /// Spawns the heartbeat task. Runs until aborted through the handle.
    #[must_use]
    pub fn spawn_heartbeat(&self) -> task::JoinHandle<()> {
        let tx = self.tx.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            let mut ticks = IntervalStream::new(interval);
            while ticks.next().await.is_some() {
                if tx.send(ControllerEvent::Heartbeat).is_err() {
                    // No subscribers; keep beating for future ones.
                    tracing::trace!("heartbeat with no subscribers");
                }
            }
        })
    }
}

/// Bounded drop-oldest queue of controller events. Drop to deregister.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<ControllerEvent>,
}

impl EventSubscription {
    /// Receives the next event in emission order.
    pub async fn recv(&mut self) -> Option<ControllerEvent> {
        self.rx.next_broadcast().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_event_wire_format() {
        let event = ControllerEvent::State {
            phase: Phase::QrDisplay,
            data: Some(serde_json::json!({ "token": "T" })),
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "state", "phase": "qr_display", "data": { "token": "T" } })
        );
    }

    #[test]
    fn heartbeat_wire_format() {
        let json = serde_json::to_value(ControllerEvent::Heartbeat).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "heartbeat" }));
    }

    #[tokio::test]
    async fn phase_events_are_totally_ordered_per_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.emit_phase(Phase::PairingRequest, None, None);
        bus.emit_phase(Phase::HelloHuman, None, None);
        let phases: Vec<Phase> = [sub.recv().await.unwrap(), sub.recv().await.unwrap()]
            .into_iter()
            .map(|event| match event {
                ControllerEvent::State { phase, .. } => phase,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(phases, [Phase::PairingRequest, Phase::HelloHuman]);
        assert_eq!(bus.current_phase(), Phase::HelloHuman);
    }

    #[tokio::test]
    async fn emitting_to_a_dropped_subscription_is_a_no_op() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.emit_phase(Phase::Complete, None, None);
    }
}
