use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pairline_core::{ChannelError, ChannelEvent, PeerId, SignalingChannel, SignalingMessage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid signaling url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("websocket connect failed: {0}")]
    Connect(String),
}

/// Relay connection over a websocket. Outbound messages go through a writer
/// task; inbound frames are decoded by a reader task and surfaced as
/// [`ChannelEvent`]s.
pub struct WebSocketChannel {
    url: Url,
    send_tx: mpsc::UnboundedSender<Message>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketChannel {
    pub async fn connect(
        signaling_url: &str,
        room_path: &str,
        local_id: &PeerId,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>), SignalingError> {
        let websocket_url = derive_websocket_url(signaling_url, room_path, local_id)?;
        let (ws_stream, _) = connect_async(websocket_url.as_str())
            .await
            .map_err(|err| SignalingError::Connect(err.to_string()))?;
        tracing::debug!(target: "signaling", url = %websocket_url, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ChannelEvent>();

        let writer_events = events_tx.clone();
        let writer_handle = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                if let Err(err) = ws_write.send(message).await {
                    tracing::warn!(target: "signaling", error = %err, "signaling websocket write failed");
                    let _ = writer_events.send(ChannelEvent::Error(err.to_string()));
                    break;
                }
            }
        });

        let reader_events = events_tx.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(target: "signaling", event = "ws_in", kind = "text", len = text.len());
                        forward_frame(&text, &reader_events);
                    }
                    Ok(Message::Binary(data)) => {
                        tracing::trace!(target: "signaling", event = "ws_in", kind = "binary", len = data.len());
                        match String::from_utf8(data) {
                            Ok(text) => forward_frame(&text, &reader_events),
                            Err(err) => {
                                tracing::warn!(target: "signaling", error = %err, "skipping non-utf8 signaling frame");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(target: "signaling", "signaling websocket closed: {err}");
                            }
                            _ => {
                                tracing::warn!(target: "signaling", "signaling websocket error: {err}");
                                let _ = reader_events.send(ChannelEvent::Error(err.to_string()));
                                return;
                            }
                        }
                        break;
                    }
                }
            }
            let _ = reader_events.send(ChannelEvent::Closed);
        });

        let heartbeat_tx = send_tx.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        });

        let _ = events_tx.send(ChannelEvent::Opened);
        let channel = Arc::new(Self {
            url: websocket_url,
            send_tx,
            tasks: Mutex::new(vec![writer_handle, reader_handle, heartbeat_handle]),
        });
        Ok((channel, events_rx))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn send(&self, message: SignalingMessage) -> Result<(), ChannelError> {
        let text = message
            .encode()
            .map_err(|err| ChannelError::Send(err.to_string()))?;
        self.send_tx
            .send(Message::Text(text))
            .map_err(|_| ChannelError::Closed)
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

fn forward_frame(text: &str, events: &mpsc::UnboundedSender<ChannelEvent>) {
    match SignalingMessage::decode(text) {
        Ok(message) => {
            let _ = events.send(ChannelEvent::Message(message));
        }
        Err(err) => {
            tracing::warn!(target: "signaling", error = %err, "skipping undecodable signaling frame");
        }
    }
}

/// `<base>/<room path>/<local id>` with `http(s)` mapped to `ws(s)`.
pub fn derive_websocket_url(
    signaling_url: &str,
    room_path: &str,
    local_id: &PeerId,
) -> Result<Url, SignalingError> {
    let invalid = |reason: String| SignalingError::InvalidUrl {
        url: signaling_url.to_string(),
        reason,
    };
    let base = Url::parse(signaling_url).map_err(|err| invalid(err.to_string()))?;
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };

    let mut ws = base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| invalid("invalid websocket scheme".into()))?;
    let mut path = base.path().trim_end_matches('/').to_string();
    for segment in room_path.split('/').filter(|s| !s.is_empty()) {
        path.push('/');
        path.push_str(segment);
    }
    path.push('/');
    path.push_str(local_id.as_str());
    ws.set_path(&path);
    ws.set_query(None);
    ws.set_fragment(None);
    Ok(ws)
}
