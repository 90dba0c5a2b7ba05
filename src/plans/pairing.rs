//! Pairing-token phase.

use super::SessionError;
use crate::{backend::auth, consts::PAIRING_MIN_DISPLAY, controller::Services, phase::Phase};
use tokio::time::sleep;

/// Pairing-request plan: mint the short-lived credential.
pub struct Plan;

impl Plan {
    /// Fetches the pairing token while holding the phase for its minimum
    /// display time. The HTTP timeout bounds the phase from above.
    pub async fn run(
        &mut self,
        services: &Services,
    ) -> Result<auth::TokenResponse, SessionError> {
        services.events.emit_phase(Phase::PairingRequest, None, None);
        let (token, ()) = tokio::join!(
            auth::issue_token(&services.config.bridge),
            sleep(PAIRING_MIN_DISPLAY),
        );
        token.ok_or(SessionError::TokenIssue)
    }
}
