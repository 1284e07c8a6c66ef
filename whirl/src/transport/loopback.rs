//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to stand in for the chat
//! server. Created via [`LoopbackConnector::new`], which returns the
//! connector plus a [`LoopbackServer`] that accepts each link the connector
//! opens and lets the test script the server side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use super::{Connector, LINK_BUFFER, Outgoing, TransportError, TransportEvent, TransportLink, TransportType};

/// In-process [`Connector`] backed by `tokio::sync::mpsc` channels.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    accept_tx: mpsc::UnboundedSender<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

/// Server side of a [`LoopbackConnector`]: yields one [`LoopbackPeer`] per
/// opened link.
#[derive(Debug)]
pub struct LoopbackServer {
    accept_rx: Mutex<mpsc::UnboundedReceiver<LoopbackPeer>>,
    refusing: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

/// Server end of one loopback link.
#[derive(Debug)]
pub struct LoopbackPeer {
    to_client: mpsc::Sender<TransportEvent>,
    from_client: mpsc::Receiver<Outgoing>,
}

impl LoopbackConnector {
    /// Create a connector and the server handle that accepts its links.
    #[must_use]
    pub fn new() -> (Self, LoopbackServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let refusing = Arc::new(AtomicBool::new(false));
        let opened = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            accept_tx,
            refusing: Arc::clone(&refusing),
            opened: Arc::clone(&opened),
        };
        let server = LoopbackServer {
            accept_rx: Mutex::new(accept_rx),
            refusing,
            opened,
        };
        (connector, server)
    }
}

impl Connector for LoopbackConnector {
    async fn open(&self) -> Result<TransportLink, TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("loopback".into()));
        }

        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        self.accept_tx
            .send(LoopbackPeer {
                to_client: in_tx,
                from_client: out_rx,
            })
            .map_err(|_| TransportError::ConnectionClosed)?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

impl LoopbackServer {
    /// Wait for the next link the connector opens.
    pub async fn accept(&self) -> Option<LoopbackPeer> {
        self.accept_rx.lock().await.recv().await
    }

    /// Make subsequent `open` calls fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of links opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl LoopbackPeer {
    /// Push a text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client dropped the link.
    pub async fn push(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(TransportEvent::Text(text.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close the link from the server side with the given close code.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client dropped the link.
    pub async fn close(&self, code: u16) -> Result<(), TransportError> {
        self.to_client
            .send(TransportEvent::Closed {
                code: Some(code),
                clean: true,
            })
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Drop the link without a close handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client dropped the link.
    pub async fn sever(&self) -> Result<(), TransportError> {
        self.to_client
            .send(TransportEvent::Closed {
                code: None,
                clean: false,
            })
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Next command the client sent, or `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.from_client.recv().await
    }

    /// Drain every command already queued by the client without waiting.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.from_client.try_recv() {
            out.push(cmd);
        }
        out
    }
}
