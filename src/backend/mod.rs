//! Communication with the remote bridge backend.

pub mod auth;
pub mod bridge;

use crate::consts::BRIDGE_HTTP_CONNECT_TIMEOUT;
use std::time::Duration;

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Creates a new HTTPS client with the given request timeout.
pub fn client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(BRIDGE_HTTP_CONNECT_TIMEOUT)
        .build()
}
