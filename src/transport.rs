//! WebSocket transport to the transcription server
//!
//! Owns the connection lifecycle for one session: a single timeout-guarded
//! connect attempt, a background reader task that parses inbound transcript
//! frames, and the write half used for the config message and audio frames.
//!
//! There is deliberately no retry or reconnect here; if the connection drops
//! mid-session the owner is told once via [`ServerEvent::Closed`] and decides
//! what to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::protocol::{parse_server_message, TranscriptEvent};

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by the transport.
#[derive(Debug, Clone)]
pub enum TransportError {
    ConnectionFailed(String),
    SendFailed(String),
    /// Attempted to send on a connection that is no longer open.
    NotOpen,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to server: {}", e)
            }
            TransportError::SendFailed(e) => write!(f, "Failed to send: {}", e),
            TransportError::NotOpen => write!(f, "Connection is not open"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Events delivered by the reader task.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A parsed transcript message.
    Transcript(TranscriptEvent),
    /// The connection closed, cleanly or not. Sent at most once.
    Closed { reason: Option<String> },
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// An open WebSocket connection to the transcription server.
pub struct Transport {
    write: WsSink,
    open: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Transport {
    /// Connect to `address` (a `ws://` or `wss://` URL).
    ///
    /// A single attempt with a 10 second timeout. On success a reader task is
    /// spawned that parses every inbound text frame and forwards it on
    /// `events_tx`; malformed frames are logged and dropped without closing
    /// the connection.
    pub async fn connect(
        address: &str,
        events_tx: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, TransportError> {
        log::info!("Transport: connecting to {}", address);

        let (ws_stream, _response) = timeout(CONNECTION_TIMEOUT, connect_async(address))
            .await
            .map_err(|_| TransportError::ConnectionFailed("connection timeout".to_string()))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        log::info!("Transport: connected");

        let (write, mut read) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match parse_server_message(&text) {
                        Ok(event) => {
                            if events_tx.send(ServerEvent::Transcript(event)).await.is_err() {
                                log::debug!("Transport: event channel closed");
                                return;
                            }
                        }
                        Err(e) => {
                            log::warn!("Transport: dropping malformed message: {}", e);
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        log::info!("Transport: closed by server");
                        reader_open.store(false, Ordering::SeqCst);
                        let reason = frame.map(|f| f.reason.into_owned());
                        let _ = events_tx.send(ServerEvent::Closed { reason }).await;
                        return;
                    }
                    Err(e) => {
                        log::warn!("Transport: websocket error: {}", e);
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events_tx
                            .send(ServerEvent::Closed {
                                reason: Some(e.to_string()),
                            })
                            .await;
                        return;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Stream ended without a close frame
            reader_open.store(false, Ordering::SeqCst);
            let _ = events_tx.send(ServerEvent::Closed { reason: None }).await;
        });

        Ok(Self {
            write,
            open,
            reader_task,
        })
    }

    /// Whether the connection is still open. Used as the send guard: audio
    /// produced while this is false is dropped.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Send a text frame (the config message).
    pub async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        self.write.send(Message::Text(text)).await.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::SendFailed(e.to_string())
        })
    }

    /// Send a binary frame (raw PCM audio). Ownership of the frame moves to
    /// the transport; nothing is retained on failure.
    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        self.write.send(Message::Binary(bytes)).await.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::SendFailed(e.to_string())
        })
    }

    /// Close the connection and stop the reader task.
    pub async fn close(mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader_task.abort();

        if let Err(e) = self.write.close().await {
            log::debug!("Transport: error closing WebSocket: {}", e);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Ensure the reader task does not outlive the transport
        self.reader_task.abort();
    }
}
