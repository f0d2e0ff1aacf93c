//! WebSocket transport over tokio-tungstenite
//!
//! Each `open` spawns one connection task. The task owns the socket and
//! multiplexes outbound commands and inbound frames with `tokio::select!`,
//! reporting lifecycle through the [`EventSink`] the way a browser
//! `WebSocket` does: `Open`, any number of `Message`s, optional `Error`,
//! then exactly one `Close`.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{validate_url, EventSink, Transport, TransportHandle};
use crate::types::TransportEvent;
use crate::{CoreError, Result};

/// How long to wait for the peer to answer our close frame
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code reported when the peer's close frame carried no status
const CLOSE_NO_STATUS: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound command for the connection task
enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// WebSocket transport (ws:// and wss://)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn TransportHandle>> {
        let url = validate_url(url)?;
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::debug!("Opening WebSocket connection to {}", url);
        let task = tokio::spawn(run_connection(url, rx, events));

        Ok(Box::new(WebSocketHandle {
            tx,
            task,
            closing: false,
        }))
    }
}

/// Handle to a connection task
///
/// Dropping the handle without calling `close` aborts the task; no further
/// events are emitted for it.
struct WebSocketHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
    closing: bool,
}

impl TransportHandle for WebSocketHandle {
    fn send(&self, text: String) -> Result<()> {
        if self.closing {
            return Err(CoreError::NotConnected);
        }
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| CoreError::NotConnected)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closing {
            return;
        }
        self.closing = true;

        let close = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if self.tx.send(close).is_err() {
            // Task already finished
            self.task.abort();
        }
    }
}

impl Drop for WebSocketHandle {
    fn drop(&mut self) {
        if !self.closing {
            self.task.abort();
        }
    }
}

/// Connection task: connect, then pump frames until closed
async fn run_connection(url: Url, mut outbound: mpsc::UnboundedReceiver<Outbound>, events: EventSink) {
    let Some(ws) = establish(&url, &mut outbound, &events).await else {
        return;
    };

    tracing::info!("WebSocket connected to {}", url);
    events.emit(TransportEvent::Open);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => {
                        tracing::trace!("Sending {} bytes", text.len());
                        if let Err(e) = sink.send(Frame::Text(text.into())).await {
                            events.emit(TransportEvent::Error(format!("Send failed: {}", e)));
                            events.emit(TransportEvent::abnormal_close());
                            return;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if sink.send(Frame::Close(Some(frame))).await.is_err() {
                            events.emit(TransportEvent::abnormal_close());
                            return;
                        }

                        // Wait for the peer's close reply to complete the handshake
                        let answered = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
                            while let Some(frame) = stream.next().await {
                                match frame {
                                    Ok(Frame::Close(_)) => return true,
                                    Ok(_) => continue,
                                    Err(_) => return false,
                                }
                            }
                            // Stream ended after our close frame went out
                            true
                        })
                        .await
                        .unwrap_or(false);

                        if answered {
                            events.emit(TransportEvent::clean_close(code));
                        } else {
                            tracing::debug!("Close handshake with {} did not complete", url);
                            events.emit(TransportEvent::abnormal_close());
                        }
                        return;
                    }
                    None => return,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        events.emit(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => events.emit(TransportEvent::Message(text)),
                        Err(_) => events.emit(TransportEvent::Error(format!(
                            "Dropped {}-byte binary frame that is not UTF-8",
                            bytes.len()
                        ))),
                    },
                    Some(Ok(Frame::Close(frame))) => {
                        let code = frame
                            .as_ref()
                            .map_or(CLOSE_NO_STATUS, |f| u16::from(f.code));
                        tracing::info!("Server closed WebSocket (code {})", code);
                        // Flushes the queued close reply
                        let _ = sink.close().await;
                        events.emit(TransportEvent::clean_close(code));
                        return;
                    }
                    // Ping/pong are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        events.emit(TransportEvent::Error(format!("Receive failed: {}", e)));
                        events.emit(TransportEvent::abnormal_close());
                        return;
                    }
                    None => {
                        events.emit(TransportEvent::abnormal_close());
                        return;
                    }
                }
            }
        }
    }
}

/// Run the open handshake, giving up early if the handle is closed first
async fn establish(
    url: &Url,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &EventSink,
) -> Option<WsStream> {
    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    loop {
        tokio::select! {
            result = &mut connect => {
                return match result {
                    Ok((ws, _response)) => Some(ws),
                    Err(e) => {
                        tracing::warn!("WebSocket connection to {} failed: {}", url, e);
                        events.emit(TransportEvent::Error(format!("Failed to connect to {}: {}", url, e)));
                        events.emit(TransportEvent::abnormal_close());
                        None
                    }
                };
            }
            cmd = outbound.recv() => {
                match cmd {
                    // Not open yet; nothing to write to
                    Some(Outbound::Text(_)) => continue,
                    Some(Outbound::Close { .. }) | None => {
                        tracing::debug!("Connection to {} closed before open completed", url);
                        events.emit(TransportEvent::abnormal_close());
                        return None;
                    }
                }
            }
        }
    }
}
