//! Transport layer abstraction for Whirl.
//!
//! Defines the [`Connector`] trait that opens a bidirectional text-frame
//! link to the chat server. Concrete implementations include:
//! - [`websocket::WebSocketConnector`] — the production WebSocket transport
//! - [`loopback::LoopbackConnector`] — in-process channel-based transport for testing
//!
//! A [`TransportLink`] is a pair of channels: [`Outgoing`] commands flow to
//! the socket, [`TransportEvent`]s flow back. The link never inspects frame
//! contents; decoding happens in the session layer.

pub mod loopback;
pub mod websocket;

use std::fmt;

use tokio::sync::mpsc;

/// Capacity of the per-link inbound and outbound channels.
pub const LINK_BUFFER: usize = 256;

/// Describes which kind of transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket to the chat server.
    WebSocket,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur while opening a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has already been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The open handshake did not complete in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The server rejected the handshake credentials.
    #[error("handshake rejected: unauthorized")]
    Unauthorized,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// An underlying I/O or protocol error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Commands sent toward the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A JSON text frame.
    Text(String),
    /// Close the socket with a normal (1000) close frame.
    Close,
}

/// Events produced by the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Text(String),
    /// The socket closed. `code` is `None` when no close frame was received;
    /// `clean` is false when the connection dropped without a handshake.
    Closed {
        /// Close code from the close frame, if any.
        code: Option<u16>,
        /// Whether the closing handshake completed.
        clean: bool,
    },
}

/// An open link: one sender toward the socket, one receiver from it.
///
/// Dropping the `outbound` sender also shuts the writer down.
#[derive(Debug)]
pub struct TransportLink {
    /// Commands toward the socket.
    pub outbound: mpsc::Sender<Outgoing>,
    /// Events from the socket. Ends after a [`TransportEvent::Closed`].
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens links to the chat server.
///
/// Each call to [`Connector::open`] establishes a fresh, independent link;
/// callers are responsible for not opening two at once.
pub trait Connector: Send + Sync + 'static {
    /// Open a new link.
    ///
    /// Returns once the transport is ready to carry frames.
    fn open(&self) -> impl std::future::Future<Output = Result<TransportLink, TransportError>> + Send;

    /// Return the type of this transport.
    fn transport_type(&self) -> TransportType;
}
