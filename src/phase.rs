//! Session phases.

use serde::{Deserialize, Serialize};

/// Discrete UI-visible state of the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No session. The kiosk waits for a proximity trigger.
    Idle,
    /// A pairing token is being minted.
    PairingRequest,
    /// Greeting screen.
    HelloHuman,
    /// Instructions to scan the pairing code.
    ScanPrompt,
    /// The QR payload is displayed and the bridge waits for the app.
    QrDisplay,
    /// The camera is active and liveness frames are collected.
    HumanDetect,
    /// The best frame is uploaded and the backend ack is awaited.
    Processing,
    /// The session finished successfully.
    Complete,
    /// The session failed with a user-visible message.
    Error,
}

impl Phase {
    /// Whether a far proximity event may cancel the session in this phase.
    #[must_use]
    pub fn is_cancellable(self) -> bool {
        !matches!(self, Phase::Idle | Phase::Complete | Phase::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_snake_case() {
        assert_eq!(serde_json::to_string(&Phase::QrDisplay).unwrap(), "\"qr_display\"");
        assert_eq!(serde_json::to_string(&Phase::HumanDetect).unwrap(), "\"human_detect\"");
        assert_eq!(serde_json::to_string(&Phase::PairingRequest).unwrap(), "\"pairing_request\"");
    }

    #[test]
    fn terminal_phases_are_not_cancellable() {
        assert!(!Phase::Idle.is_cancellable());
        assert!(!Phase::Complete.is_cancellable());
        assert!(!Phase::Error.is_cancellable());
        assert!(Phase::QrDisplay.is_cancellable());
        assert!(Phase::HumanDetect.is_cancellable());
    }
}
