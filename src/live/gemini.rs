//! Websocket client for the Gemini Live API
//!
//! The connection is split into a writer task draining the outbound blob
//! channel and a reader task turning server frames into [`ServerEvent`]s.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{ClientMessage, ServerMessage};
use super::{LiveConnector, LiveLink, LiveSession, ServerEvent, SessionSetup};
use crate::config::LiveConfig;
use crate::voice::{BlobSender, TransportBlob};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens sessions against the Gemini Live websocket endpoint
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    endpoint: Url,
    api_key: SecretString,
    connect_timeout: Duration,
}

impl GeminiConnector {
    /// Create a connector from the live configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no API key is configured or the endpoint
    /// is not a websocket URL
    pub fn new(config: &LiveConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config("no API key configured (set GEMINI_API_KEY)".to_string())
        })?;

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid live endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "live endpoint must use ws or wss, got {}",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            api_key,
            connect_timeout: config.connect_timeout,
        })
    }

    /// Endpoint with the API key attached
    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        url
    }

    async fn handshake(&self, setup: &SessionSetup) -> Result<(WsStream, Vec<ServerEvent>)> {
        let (mut ws, _) = connect_async(self.request_url().as_str())
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        let setup_frame = serde_json::to_string(&ClientMessage::setup(setup))?;
        ws.send(Message::Text(setup_frame.into()))
            .await
            .map_err(|e| Error::Connect(format!("failed to send setup: {e}")))?;

        let mut early = Vec::new();
        while let Some(frame) = ws.next().await {
            let message = match frame.map_err(|e| Error::Connect(e.to_string()))? {
                Message::Text(text) => parse_frame(text.as_bytes()),
                Message::Binary(data) => parse_frame(&data),
                Message::Close(frame) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(Error::Connect(format!(
                        "session closed during setup: {reason}"
                    )));
                }
                _ => None,
            };

            let Some(message) = message else { continue };
            if message.is_setup_complete() {
                return Ok((ws, early));
            }
            early.extend(message.into_events());
        }

        Err(Error::Connect(
            "connection ended before setup completed".to_string(),
        ))
    }
}

#[async_trait(?Send)]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveLink> {
        tracing::info!(
            endpoint = %self.endpoint,
            model = %setup.model,
            voice = %setup.voice_name,
            "connecting live session"
        );

        let (ws, early) = tokio::time::timeout(self.connect_timeout, self.handshake(setup))
            .await
            .map_err(|_| {
                Error::Connect(format!(
                    "no setup acknowledgement within {}s",
                    self.connect_timeout.as_secs()
                ))
            })??;

        tracing::info!("live session established");

        let (session, events) = GeminiSession::spawn(ws, early);
        Ok(LiveLink {
            session: Box::new(session),
            events,
        })
    }
}

/// Established Gemini Live session
pub struct GeminiSession {
    outbound: BlobSender,
    close_tx: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
}

impl GeminiSession {
    fn spawn(ws: WsStream, early: Vec<ServerEvent>) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound, blob_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        for event in early {
            let _ = event_tx.send(event);
        }

        let (sink, stream) = ws.split();
        tokio::spawn(write_loop(sink, blob_rx, close_rx, event_tx.clone()));
        let reader = tokio::spawn(read_loop(stream, event_tx));

        (
            Self {
                outbound,
                close_tx: Some(close_tx),
                reader,
            },
            event_rx,
        )
    }
}

impl LiveSession for GeminiSession {
    fn send(&self, blob: TransportBlob) -> Result<()> {
        self.outbound
            .send(blob)
            .map_err(|_| Error::Transport("live session closed".to_string()))
    }

    fn sender(&self) -> BlobSender {
        self.outbound.clone()
    }

    fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
            self.reader.abort();
            tracing::info!("live session closed");
        }
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut blobs: mpsc::UnboundedReceiver<TransportBlob>,
    mut close_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    loop {
        tokio::select! {
            _ = &mut close_rx => break,
            blob = blobs.recv() => {
                let Some(blob) = blob else { break };
                let frame = match serde_json::to_string(&ClientMessage::audio(blob)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize audio frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::error!(error = %e, "live session write failed");
                    let _ = events.send(ServerEvent::Error(e.to_string()));
                    return;
                }
            }
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "close frame not sent");
    }
    tracing::debug!("live writer stopped");
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: mpsc::UnboundedSender<ServerEvent>) {
    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => parse_frame(text.as_bytes()),
            Ok(Message::Binary(data)) => parse_frame(&data),
            Ok(Message::Close(frame)) => {
                tracing::info!(
                    reason = frame.as_ref().map(|f| f.reason.to_string()).unwrap_or_default(),
                    "live session closed by server"
                );
                break;
            }
            Ok(_) => None,
            Err(e) => {
                tracing::error!(error = %e, "live connection error");
                let _ = events.send(ServerEvent::Error(e.to_string()));
                return;
            }
        };

        let Some(message) = message else { continue };
        for event in message.into_events() {
            if events.send(event).is_err() {
                return;
            }
        }
    }

    let _ = events.send(ServerEvent::Closed);
}

fn parse_frame(bytes: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice(bytes) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "skipping malformed server frame");
            None
        }
    }
}
