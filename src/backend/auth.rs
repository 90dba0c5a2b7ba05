//! Pairing-token endpoint.

use crate::{config::BridgeConfig, dd_incr};
use serde::Deserialize;

/// Response of the auth endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Short-lived pairing token.
    pub token: String,
    /// Opaque payload rendered as the QR code.
    pub qr_payload: serde_json::Value,
    /// Token lifetime in seconds.
    pub expires_in: u64,
}

/// Requests a pairing token with the device credentials.
///
/// Never raises towards the caller: a timeout, network error, non-2xx
/// status or undecodable body logs the failure kind and yields `None`.
pub async fn issue_token(config: &BridgeConfig) -> Option<TokenResponse> {
    let client = match super::client(std::time::Duration::from_secs(config.http_timeout_s)) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("auth client construction failed: {err:?}");
            return None;
        }
    };
    let url = format!("{}/auth", config.backend_url);
    let response = match client.post(&url).header("X-Api-Key", &config.api_key).send().await {
        Ok(response) => response,
        Err(err) => {
            let kind = if err.is_timeout() { "timeout" } else { "network" };
            tracing::error!("auth request failed ({kind}): {err:?}");
            dd_incr!("main.count.http.auth.error", "kind:request");
            return None;
        }
    };
    let status = response.status();
    if !status.is_success() {
        tracing::error!("auth request rejected with status {status}");
        dd_incr!("main.count.http.auth.error", "kind:status");
        return None;
    }
    match response.json::<TokenResponse>().await {
        Ok(token) => {
            dd_incr!("main.count.http.auth.success");
            Some(token)
        }
        Err(err) => {
            tracing::error!("decoding auth response failed: {err:?}");
            dd_incr!("main.count.http.auth.error", "kind:decode");
            None
        }
    }
}
