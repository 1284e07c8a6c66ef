//! WebSocket transport for Whirl.
//!
//! Implements [`Connector`] over `tokio-tungstenite`. Each link spawns a
//! writer task (draining [`Outgoing`] commands into the socket) and a reader
//! task (turning socket messages into [`TransportEvent`]s).

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::{Connector, LINK_BUFFER, Outgoing, TransportError, TransportEvent, TransportLink, TransportType};

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket links to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url` (ws:// or wss://, token already embedded).
    #[must_use]
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    /// The URL this connector dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    /// Perform the WebSocket handshake and spawn the reader/writer tasks.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake does not finish in time.
    /// - [`TransportError::Unauthorized`] if the server answers 401/403.
    /// - [`TransportError::Unreachable`] if the server refuses the connection.
    /// - [`TransportError::Io`] for TLS and other handshake failures.
    async fn open(&self) -> Result<TransportLink, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!("websocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(err = %e, "websocket connect failed");
                    map_ws_connect_error(e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(cmd) = out_rx.recv().await {
                let result = match cmd {
                    Outgoing::Text(text) => ws_sender.send(Message::Text(text.into())).await,
                    Outgoing::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        let _ = ws_sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(err = %e, "websocket write failed");
                    break;
                }
            }
            tracing::debug!("websocket writer task exiting");
        });

        tokio::spawn(async move {
            let closed = loop {
                match ws_reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx
                            .send(TransportEvent::Text(text.as_str().to_owned()))
                            .await
                            .is_err()
                        {
                            // Link dropped by its owner.
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "websocket closed by server");
                        break TransportEvent::Closed {
                            code: frame.map(|f| u16::from(f.code)),
                            clean: true,
                        };
                    }
                    Some(Ok(_)) => {
                        // Binary, ping/pong and raw frames carry nothing for us.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "websocket read error");
                        break TransportEvent::Closed {
                            code: None,
                            clean: false,
                        };
                    }
                    None => {
                        break TransportEvent::Closed {
                            code: None,
                            clean: false,
                        };
                    }
                }
            };
            let _ = in_tx.send(closed).await;
            tracing::debug!("websocket reader task exiting");
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            TransportError::Unauthorized
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "websocket HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "websocket connection error: {other}"
        ))),
    }
}
