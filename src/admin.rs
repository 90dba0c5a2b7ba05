//! Operator and test HTTP surface.
//!
//! Not user-facing: a health probe reporting the current phase, manual
//! and simulated-proximity triggers, the preview toggle, and the
//! presentation event stream over a WebSocket.

use crate::{
    controller::{Command, CommandSender},
    ui::EventBus,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Shared state of the admin routes.
#[derive(Clone)]
pub struct AdminState {
    commands: CommandSender,
    events: EventBus,
}

impl AdminState {
    /// Creates the state from the controller handles.
    #[must_use]
    pub fn new(commands: CommandSender, events: EventBus) -> Self {
        Self { commands, events }
    }
}

/// Builds the admin router.
#[must_use]
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trigger", post(trigger))
        .route("/proximity", post(proximity))
        .route("/preview", post(preview))
        .route("/events", get(events))
        .with_state(Arc::new(state))
}

/// Serves the admin surface until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding the admin surface to {addr}"))?;
    tracing::info!("admin surface listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .wrap_err("admin surface failed")
}

async fn health(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "phase": state.events.current_phase(),
    }))
}

async fn trigger(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    state.commands.post(Command::ManualTrigger);
    StatusCode::ACCEPTED
}

/// Body of a simulated proximity event.
#[derive(Debug, Deserialize)]
struct ProximityBody {
    triggered: bool,
    #[serde(default)]
    distance_mm: u16,
}

async fn proximity(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<ProximityBody>,
) -> impl IntoResponse {
    state
        .commands
        .post(Command::Proximity { triggered: body.triggered, distance_mm: body.distance_mm });
    StatusCode::ACCEPTED
}

/// Body of the preview toggle.
#[derive(Debug, Deserialize)]
struct PreviewBody {
    enabled: bool,
}

async fn preview(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<PreviewBody>,
) -> impl IntoResponse {
    state.commands.post(Command::SetPreview(body.enabled));
    StatusCode::ACCEPTED
}

async fn events(
    State(state): State<Arc<AdminState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let events = state.events.clone();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

/// Forwards the presentation event stream to one WebSocket client.
async fn forward_events(mut socket: WebSocket, events: EventBus) {
    let mut subscription = events.subscribe();
    while let Some(event) = subscription.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("event serialization failed: {err}");
                continue;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}
