//! Full-duplex channel to the remote bridge.
//!
//! The client opens one WebSocket per session, announces itself with
//! `hardware_ready`, forwards recognized inbound envelopes to the session
//! queue and never reconnects on its own: a lost connection must surface
//! through the running phase instead of silently drifting it.

use crate::{consts::BRIDGE_INBOUND_CAPACITY, dd_incr, liveness::BoundingBox};
use eyre::{Result, WrapErr};
use futures::{SinkExt as _, StreamExt as _};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Metadata attached to the uploaded best frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Platform id of the paired mobile peer.
    pub platform_id: String,
    /// Composite quality score of the frame.
    pub score: f64,
    /// Mean face depth in meters.
    pub distance_m: f64,
    /// Depth standard deviation in meters.
    pub stddev_m: f64,
    /// Face bounding box as `[x0, y0, x1, y1]`.
    pub bbox: [u32; 4],
}

impl UploadMetadata {
    /// Builds the metadata from the selected frame's measurements.
    #[must_use]
    pub fn new(
        platform_id: String,
        score: f64,
        distance_m: f64,
        stddev_m: f64,
        bbox: BoundingBox,
    ) -> Self {
        Self { platform_id, score, distance_m, stddev_m, bbox: bbox.to_array() }
    }
}

/// Envelopes sent to the bridge.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Announced once right after connecting.
    HardwareReady,
    /// The best-frame upload.
    ToBackend {
        /// Base64 of the encoded JPEG.
        image_b64: String,
        /// Frame metadata.
        metadata: UploadMetadata,
    },
}

/// Status field of a backend acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The backend accepted the upload.
    Ok,
    /// The backend rejected the upload.
    Error,
}

/// Envelopes received from the bridge.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    /// The user scanned the QR payload with the mobile app.
    FromApp {
        /// Platform id of the mobile peer.
        platform_id: String,
    },
    /// Backend acknowledgement of the upload.
    BackendResponse {
        /// Accept/reject status.
        status: AckStatus,
        /// Optional server-provided message.
        #[serde(default)]
        detail: Option<String>,
    },
    /// Bridge-side error report.
    Error {
        /// Machine-readable error kind.
        kind: String,
        /// Human-readable detail.
        detail: String,
    },
}

struct Connection {
    sink: WsSink,
    listener: task::JoinHandle<()>,
}

/// Client for the full-duplex bridge channel.
#[derive(Debug)]
pub struct BridgeClient {
    ws_url: String,
    connection: Mutex<Option<Connection>>,
    lost_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// Creates a disconnected client for the given bridge URL.
    #[must_use]
    pub fn new(ws_url: String) -> Self {
        let (lost_tx, _) = watch::channel(false);
        Self { ws_url, connection: Mutex::new(None), lost_tx }
    }

    /// Bounded queue pair for inbound messages of one session.
    #[must_use]
    pub fn inbound_queue() -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
        mpsc::channel(BRIDGE_INBOUND_CAPACITY)
    }

    /// Opens the channel, sends `hardware_ready` and starts the listener.
    ///
    /// Recognized inbound envelopes are forwarded to `inbound_tx`;
    /// undecodable or unknown messages are logged and skipped so one bad
    /// handler input cannot take the listener down.
    pub async fn connect(
        &self,
        token: &str,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if guard.is_some() {
            tracing::warn!("bridge already connected, reusing the channel");
            return Ok(());
        }
        let url = format!("{}?token={token}", self.ws_url);
        let (stream, _) = connect_async(url.as_str()).await.wrap_err("opening the bridge channel")?;
        let (mut sink, mut source) = stream.split();
        self.lost_tx.send_replace(false);

        let ready = serde_json::to_string(&OutboundMessage::HardwareReady)?;
        sink.send(Message::Text(ready)).await.wrap_err("announcing hardware_ready")?;

        let lost_tx = self.lost_tx.clone();
        let listener = task::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundMessage>(&text) {
                            Ok(message) => {
                                if inbound_tx.send(message).await.is_err() {
                                    tracing::debug!("session queue gone, draining bridge");
                                }
                            }
                            Err(err) => {
                                tracing::warn!("ignoring unrecognized bridge message: {err}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("bridge channel closed by the remote end");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!("bridge channel failed: {err}");
                        break;
                    }
                }
            }
            dd_incr!("main.count.bridge.connection_lost");
            lost_tx.send_replace(true);
        });
        *guard = Some(Connection { sink, listener });
        Ok(())
    }

    /// Best-effort send. Logs and returns when the channel is not open or
    /// the write fails; never raises to the caller.
    pub async fn send(&self, message: &OutboundMessage) {
        let mut guard = self.connection.lock().await;
        let Some(connection) = guard.as_mut() else {
            tracing::warn!("bridge send with no open channel, dropping message");
            return;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("bridge message serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = connection.sink.send(Message::Text(text)).await {
            tracing::warn!("bridge send failed: {err}");
        }
    }

    /// Cancels the listener and closes the channel. Idempotent.
    pub async fn disconnect(&self) {
        let Some(mut connection) = self.connection.lock().await.take() else { return };
        connection.listener.abort();
        drop(connection.sink.close().await);
        tracing::debug!("bridge disconnected");
    }

    /// Resolves when an open connection is lost. Pending while the client
    /// is disconnected or healthy.
    pub async fn wait_lost(&self) {
        let mut rx = self.lost_tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // The client itself is gone; stay pending forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_wire_format() {
        let json = serde_json::to_value(&OutboundMessage::HardwareReady).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "hardware_ready" }));

        let upload = OutboundMessage::ToBackend {
            image_b64: "aGk=".to_owned(),
            metadata: UploadMetadata::new(
                "p-1".to_owned(),
                0.9,
                0.65,
                0.02,
                BoundingBox { x0: 1, y0: 2, x1: 3, y1: 4 },
            ),
        };
        let json = serde_json::to_value(&upload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "to_backend",
                "data": {
                    "image_b64": "aGk=",
                    "metadata": {
                        "platform_id": "p-1",
                        "score": 0.9,
                        "distance_m": 0.65,
                        "stddev_m": 0.02,
                        "bbox": [1, 2, 3, 4],
                    },
                },
            })
        );
    }

    #[test]
    fn inbound_wire_format() {
        let message: InboundMessage =
            serde_json::from_str(r#"{"type":"from_app","data":{"platform_id":"p-7"}}"#).unwrap();
        assert!(matches!(message, InboundMessage::FromApp { platform_id } if platform_id == "p-7"));

        let message: InboundMessage =
            serde_json::from_str(r#"{"type":"backend_response","data":{"status":"ok"}}"#).unwrap();
        assert!(matches!(
            message,
            InboundMessage::BackendResponse { status: AckStatus::Ok, detail: None }
        ));

        let message: InboundMessage = serde_json::from_str(
            r#"{"type":"backend_response","data":{"status":"error","detail":"bad frame"}}"#,
        )
        .unwrap();
        assert!(matches!(
            message,
            InboundMessage::BackendResponse { status: AckStatus::Error, detail: Some(d) }
                if d == "bad frame"
        ));

        serde_json::from_str::<InboundMessage>(r#"{"type":"telemetry","data":{}}"#).unwrap_err();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let client = BridgeClient::new("ws://localhost:1".to_owned());
        client.disconnect().await;
        client.disconnect().await;
    }

    #[tokio::test]
    async fn send_without_a_channel_is_a_logged_no_op() {
        let client = BridgeClient::new("ws://localhost:1".to_owned());
        client.send(&OutboundMessage::HardwareReady).await;
    }
}
