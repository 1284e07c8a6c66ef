//! Connection manager: sole owner of the socket.
//!
//! Holds at most one open [`TransportLink`] and walks the
//! `Disconnected → Connecting → Connected → Disconnected` state machine.
//! Background tasks never touch this struct; they report through the
//! session loop tagged with the connection *generation* they belong to, so
//! updates from an abandoned link are recognised and dropped.
//!
//! There is no automatic reconnect. After an abnormal close the manager
//! schedules a single delayed liveness probe; its outcome decides whether
//! the session has to be torn down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use whirl_proto::close::{CloseKind, classify_close};
use whirl_proto::codec::{self, FrameError};
use whirl_proto::message::OutboundFrame;

use crate::api::HealthProbe;
use crate::event::{ConnectionUpdate, EventSender, LoopEvent, LoopSender, SessionEvent};
use crate::transport::{Connector, Outgoing, TransportError, TransportEvent, TransportLink};

/// Externally observable socket status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No socket.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Errors reported when a frame cannot be handed to the socket.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The socket is not open.
    #[error("socket is not connected")]
    NotConnected,

    /// The socket's outbound buffer is full.
    #[error("socket outbound buffer is full")]
    Congested,

    /// The frame could not be encoded.
    #[error("frame encoding failed: {0}")]
    Encode(#[from] FrameError),
}

/// Where outbound frames go.
///
/// Implemented by [`ConnectionManager`]; components that emit frames take
/// `&impl FrameSink` so they can be exercised without a socket.
pub trait FrameSink {
    /// Whether a frame sent now would reach the socket.
    fn is_connected(&self) -> bool;

    /// Hand one frame to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] unless connected.
    fn send_frame(&self, frame: &OutboundFrame) -> Result<(), ConnectionError>;
}

/// Liveness-probe timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Wait before probing after an abnormal close.
    pub delay: Duration,
    /// Upper bound on the probe request itself.
    pub timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        }
    }
}

/// What the session needs to act on after a connection update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// The socket finished opening.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket is gone; the manager is already `Disconnected`.
    Closed(CloseKind),
}

enum LinkState {
    Disconnected,
    Connecting,
    Connected { outbound: mpsc::Sender<Outgoing> },
}

/// Owns the single socket and its lifecycle.
pub struct ConnectionManager<C, P> {
    connector: Arc<C>,
    probe: Arc<P>,
    policy: ProbePolicy,
    loop_tx: LoopSender,
    events_tx: EventSender,
    status_tx: watch::Sender<ConnectionStatus>,
    state: LinkState,
    generation: u64,
}

impl<C: Connector, P: HealthProbe> ConnectionManager<C, P> {
    /// Create a disconnected manager.
    pub fn new(
        connector: Arc<C>,
        probe: Arc<P>,
        policy: ProbePolicy,
        loop_tx: LoopSender,
        events_tx: EventSender,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            probe,
            policy,
            loop_tx,
            events_tx,
            status_tx,
            state: LinkState::Disconnected,
            generation: 0,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        match self.state {
            LinkState::Disconnected => ConnectionStatus::Disconnected,
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Connected { .. } => ConnectionStatus::Connected,
        }
    }

    /// Watch the status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Start opening the socket unless one is already open or opening.
    ///
    /// Returns `true` if a new attempt was started.
    pub fn connect(&mut self) -> bool {
        if !matches!(self.state, LinkState::Disconnected) {
            tracing::debug!(status = %self.status(), "connect ignored: socket already active");
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        self.set_state(LinkState::Connecting);
        tracing::info!(
            generation,
            transport = %self.connector.transport_type(),
            "opening socket"
        );

        let connector = Arc::clone(&self.connector);
        let tx = self.loop_tx.clone();
        tokio::spawn(async move {
            drive_link(connector.as_ref(), generation, &tx).await;
        });
        true
    }

    /// Close the socket (if any) and move to `Disconnected`.
    ///
    /// Pending updates from the closed link are discarded.
    pub fn close(&mut self) {
        if let LinkState::Connected { outbound } = &self.state {
            let _ = outbound.try_send(Outgoing::Close);
        }
        self.generation += 1;
        if !matches!(self.state, LinkState::Disconnected) {
            tracing::info!("socket closed locally");
            self.set_state(LinkState::Disconnected);
        }
    }

    /// Apply an update from the link task for `generation`.
    ///
    /// Returns `None` for stale updates and for nothing-to-do events.
    pub fn on_update(&mut self, generation: u64, update: ConnectionUpdate) -> Option<LinkSignal> {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "dropping stale link update");
            if let ConnectionUpdate::Opened(outbound) = update {
                let _ = outbound.try_send(Outgoing::Close);
            }
            return None;
        }

        match update {
            ConnectionUpdate::Opened(outbound) => {
                tracing::info!(generation, "socket connected");
                self.set_state(LinkState::Connected { outbound });
                Some(LinkSignal::Opened)
            }
            ConnectionUpdate::Event(TransportEvent::Text(text)) => Some(LinkSignal::Frame(text)),
            ConnectionUpdate::Event(TransportEvent::Closed { code, clean }) => {
                let kind = classify_close(code, clean);
                tracing::info!(generation, ?code, clean, ?kind, "socket closed by remote");
                Some(self.lost(kind))
            }
            ConnectionUpdate::OpenFailed(err) => {
                tracing::warn!(generation, err = %err, "socket open failed");
                let kind = match err {
                    TransportError::Unauthorized => CloseKind::Unauthorized,
                    _ => CloseKind::Abnormal,
                };
                Some(self.lost(kind))
            }
        }
    }

    /// Apply a finished liveness probe.
    ///
    /// Returns `true` when the server should be considered offline.
    pub fn on_probe(&self, generation: u64, healthy: bool) -> bool {
        if generation != self.generation || !matches!(self.state, LinkState::Disconnected) {
            tracing::debug!(generation, healthy, "ignoring probe for superseded connection");
            return false;
        }
        if healthy {
            tracing::info!("server reachable after abnormal close");
        } else {
            tracing::warn!("liveness probe failed");
        }
        !healthy
    }

    fn lost(&mut self, kind: CloseKind) -> LinkSignal {
        self.set_state(LinkState::Disconnected);
        if kind == CloseKind::Abnormal {
            self.spawn_probe();
        }
        LinkSignal::Closed(kind)
    }

    fn spawn_probe(&self) {
        let generation = self.generation;
        let probe = Arc::clone(&self.probe);
        let policy = self.policy;
        let tx = self.loop_tx.clone();
        tracing::debug!(generation, delay_ms = policy.delay.as_millis(), "scheduling liveness probe");
        tokio::spawn(async move {
            tokio::time::sleep(policy.delay).await;
            let healthy = matches!(
                tokio::time::timeout(policy.timeout, probe.check()).await,
                Ok(Ok(()))
            );
            let _ = tx.send(LoopEvent::Probe {
                generation,
                healthy,
            });
        });
    }

    fn set_state(&mut self, state: LinkState) {
        self.state = state;
        let status = self.status();
        self.status_tx.send_replace(status);
        let _ = self.events_tx.send(SessionEvent::Connection(status));
    }
}

impl<C: Connector, P: HealthProbe> FrameSink for ConnectionManager<C, P> {
    fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    fn send_frame(&self, frame: &OutboundFrame) -> Result<(), ConnectionError> {
        let LinkState::Connected { outbound } = &self.state else {
            tracing::warn!(?frame, "dropping frame: socket not connected");
            return Err(ConnectionError::NotConnected);
        };
        let text = codec::encode(frame)?;
        outbound.try_send(Outgoing::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("dropping frame: socket buffer full");
                ConnectionError::Congested
            }
            mpsc::error::TrySendError::Closed(_) => ConnectionError::NotConnected,
        })
    }
}

/// Open a link and forward everything it produces, tagged with `generation`.
async fn drive_link<C: Connector>(connector: &C, generation: u64, tx: &LoopSender) {
    let TransportLink {
        outbound,
        mut inbound,
    } = match connector.open().await {
        Ok(link) => link,
        Err(err) => {
            let _ = tx.send(LoopEvent::Connection {
                generation,
                update: ConnectionUpdate::OpenFailed(err),
            });
            return;
        }
    };

    let opened = LoopEvent::Connection {
        generation,
        update: ConnectionUpdate::Opened(outbound),
    };
    if tx.send(opened).is_err() {
        return;
    }

    while let Some(event) = inbound.recv().await {
        let closed = matches!(event, TransportEvent::Closed { .. });
        let update = LoopEvent::Connection {
            generation,
            update: ConnectionUpdate::Event(event),
        };
        if tx.send(update).is_err() || closed {
            return;
        }
    }

    // Reader went away without reporting a close.
    let _ = tx.send(LoopEvent::Connection {
        generation,
        update: ConnectionUpdate::Event(TransportEvent::Closed {
            code: None,
            clean: false,
        }),
    });
}
