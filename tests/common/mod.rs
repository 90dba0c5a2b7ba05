//! Shared harness: fake auth endpoint, fake bridge, service wiring.
#![allow(dead_code)]

use axum::{routing::post, Json, Router};
use futures::{SinkExt as _, StreamExt as _};
use kiosk::{
    agents::camera::{CameraService, SceneHandle, SimulatedPipeline, SimulatedScene},
    agents::face::LumaRegionDetector,
    backend::bridge::BridgeClient,
    config::{Config, Resolution},
    controller::Services,
    phase::Phase,
    store::CaptureStore,
    ui::{ControllerEvent, EventBus, EventSubscription},
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task, time};
use tokio_tungstenite::tungstenite::Message;

/// How the fake bridge behaves for one test.
#[derive(Clone, Debug)]
pub struct BridgeScript {
    /// Send `from_app` this long after the kiosk connects; `None` never
    /// pairs.
    pub from_app_after: Option<Duration>,
    /// Reply to `to_backend` uploads.
    pub ack: AckScript,
    /// Drop the connection this long after `from_app` was sent.
    pub close_after_from_app: Option<Duration>,
    /// Send an explicit `error` envelope this long after `from_app`.
    pub error_after_from_app: Option<Duration>,
}

#[derive(Clone, Debug)]
pub enum AckScript {
    Ok { delay: Duration },
    Reject { detail: String },
    Never,
}

impl Default for BridgeScript {
    fn default() -> Self {
        Self {
            from_app_after: Some(Duration::from_millis(300)),
            ack: AckScript::Ok { delay: Duration::from_millis(100) },
            close_after_from_app: None,
            error_after_from_app: None,
        }
    }
}

/// Spawns the fake auth endpoint; returns its base URL.
pub async fn spawn_auth(expires_in: u64) -> String {
    let app = Router::new().route(
        "/auth",
        post(move || async move {
            Json(serde_json::json!({
                "token": "T",
                "qr_payload": { "url": "kiosk://pair/T" },
                "expires_in": expires_in,
            }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Spawns the fake bridge; returns its WebSocket URL.
pub async fn spawn_bridge(script: BridgeScript) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let script = script.clone();
            task::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                serve_connection(ws, script).await;
            });
        }
    });
    format!("ws://{addr}/bridge")
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    script: BridgeScript,
) {
    let (mut sink, mut source) = ws.split();
    let mut from_app_sent = false;
    let mut error_sent = false;
    let from_app_timer =
        time::sleep(script.from_app_after.unwrap_or(Duration::from_secs(3600)));
    tokio::pin!(from_app_timer);
    let close_timer = time::sleep(Duration::from_secs(3600));
    tokio::pin!(close_timer);
    let error_timer = time::sleep(Duration::from_secs(3600));
    tokio::pin!(error_timer);

    loop {
        tokio::select! {
            () = &mut from_app_timer, if !from_app_sent && script.from_app_after.is_some() => {
                from_app_sent = true;
                let msg = serde_json::json!({
                    "type": "from_app",
                    "data": { "platform_id": "plat-1" },
                });
                if sink.send(Message::Text(msg.to_string())).await.is_err() {
                    return;
                }
                if let Some(delay) = script.close_after_from_app {
                    close_timer.as_mut().reset(time::Instant::now() + delay);
                }
                if let Some(delay) = script.error_after_from_app {
                    error_timer.as_mut().reset(time::Instant::now() + delay);
                }
            }
            () = &mut close_timer, if script.close_after_from_app.is_some() && from_app_sent => {
                drop(sink.close().await);
                return;
            }
            () = &mut error_timer,
                if script.error_after_from_app.is_some() && from_app_sent && !error_sent =>
            {
                error_sent = true;
                let msg = serde_json::json!({
                    "type": "error",
                    "data": { "kind": "relay", "detail": "relay restarting" },
                });
                if sink.send(Message::Text(msg.to_string())).await.is_err() {
                    return;
                }
            }
            msg = source.next() => {
                let Some(Ok(Message::Text(text))) = msg else { return };
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "to_backend" {
                    assert!(value["data"]["image_b64"].is_string());
                    match script.ack.clone() {
                        AckScript::Ok { delay } => {
                            time::sleep(delay).await;
                            let ack = serde_json::json!({
                                "type": "backend_response",
                                "data": { "status": "ok" },
                            });
                            drop(sink.send(Message::Text(ack.to_string())).await);
                        }
                        AckScript::Reject { detail } => {
                            let ack = serde_json::json!({
                                "type": "backend_response",
                                "data": { "status": "error", "detail": detail },
                            });
                            drop(sink.send(Message::Text(ack.to_string())).await);
                        }
                        AckScript::Never => {}
                    }
                }
            }
        }
    }
}

/// Test configuration with the configurable durations shrunk.
pub fn test_config(backend_url: String, ws_url: String, captures_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.proximity.debounce_ms = 300;
    config.camera.resolution = Resolution { w: 64, h: 48 };
    config.camera.fps = 60;
    config.validation.duration_s = 0.8;
    config.validation.min_passing_frames = 5;
    config.validation.warmup_cold_ms = 300;
    config.validation.warmup_warm_ms = 100;
    config.processing.min_display_s = 0.3;
    config.processing.max_wait_s = 2.0;
    config.complete.display_s = 0.2;
    config.error.display_s = 0.2;
    config.bridge.backend_url = backend_url;
    config.bridge.ws_url = ws_url;
    config.captures_dir = captures_dir.to_owned();
    config
}

/// Wires the services over the simulated camera.
pub fn services(config: Config, scene: SceneHandle) -> Arc<Services> {
    let config = Arc::new(config);
    let camera = Arc::new(CameraService::new(
        config.camera.clone(),
        Arc::new(LumaRegionDetector::default()),
        Box::new(SimulatedPipeline::new(&config.camera, scene)),
    ));
    Arc::new(Services {
        config: Arc::clone(&config),
        camera,
        bridge: Arc::new(BridgeClient::new(config.bridge.ws_url.clone())),
        events: EventBus::new(),
        store: CaptureStore::new(config.captures_dir.clone()),
    })
}

/// A live face scene matching the happy-path scenario.
pub fn live_scene() -> SimulatedScene {
    SimulatedScene { face: true, mean_m: 0.65, stddev_m: 0.02 }
}

/// A photo-attack scene: face present but nearly flat.
pub fn flat_scene() -> SimulatedScene {
    SimulatedScene { face: true, mean_m: 0.65, stddev_m: 0.004 }
}

/// Drains phase transitions until the session returns to idle.
///
/// Returns the observed `(phase, error)` pairs, skipping the leading idle
/// and every metrics/heartbeat event.
pub async fn collect_session(
    sub: &mut EventSubscription,
    timeout: Duration,
) -> Vec<(Phase, Option<String>)> {
    let deadline = time::Instant::now() + timeout;
    let mut phases = Vec::new();
    loop {
        let event = time::timeout_at(deadline, sub.recv())
            .await
            .expect("timed out waiting for the session to finish")
            .expect("event bus closed");
        if let ControllerEvent::State { phase, error, .. } = event {
            if phase == Phase::Idle && phases.is_empty() {
                continue;
            }
            let done = phase == Phase::Idle;
            phases.push((phase, error));
            if done {
                return phases;
            }
        }
    }
}

/// The phases alone, for sequence assertions.
pub fn phases_of(collected: &[(Phase, Option<String>)]) -> Vec<Phase> {
    collected.iter().map(|(phase, _)| *phase).collect()
}

/// Spawns a controller over the services and returns its command sender.
pub fn spawn_controller(
    services: Arc<Services>,
) -> (kiosk::controller::CommandSender, task::JoinHandle<()>) {
    let controller = kiosk::controller::Controller::new(services, false);
    let commands = controller.command_sender();
    let handle = task::spawn(async move {
        controller.run().await.unwrap();
    });
    (commands, handle)
}
