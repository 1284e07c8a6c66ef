//! Events flowing into and out of the session loop.
//!
//! [`LoopEvent`]s are completions produced by background tasks (socket
//! readers, history fetches, timers, health probes) and scheduled back onto
//! the single session loop. [`SessionEvent`]s are what the session reports
//! outward to whatever drives the UI.

use tokio::sync::mpsc;
use uuid::Uuid;

use whirl_proto::history::HistoryMessage;
use whirl_proto::message::UserId;

use crate::api::FetchError;
use crate::connection::ConnectionStatus;
use crate::friends::DeliveryState;
use crate::random::{FriendRequestState, RandomChatEvent, RandomState};
use crate::transport::{Outgoing, TransportError, TransportEvent};

/// Sender half used by components to report [`SessionEvent`]s.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Sender half used by background tasks to schedule [`LoopEvent`]s.
pub type LoopSender = mpsc::UnboundedSender<LoopEvent>;

/// What happened on a transport link.
#[derive(Debug)]
pub enum ConnectionUpdate {
    /// The link is open; frames go out through this sender.
    Opened(mpsc::Sender<Outgoing>),
    /// The link produced an event.
    Event(TransportEvent),
    /// The link could not be opened.
    OpenFailed(TransportError),
}

/// Internal completions processed by the session loop, in arrival order.
#[derive(Debug)]
pub enum LoopEvent {
    /// Progress on the link opened for `generation`.
    Connection {
        /// Connection attempt this update belongs to.
        generation: u64,
        /// The update itself.
        update: ConnectionUpdate,
    },
    /// A post-disconnect liveness probe finished.
    Probe {
        /// Connection attempt that triggered the probe.
        generation: u64,
        /// Whether the server answered in time.
        healthy: bool,
    },
    /// A history page request completed.
    HistoryPage {
        /// Friend-store epoch the request was issued in.
        epoch: u64,
        /// Conversation the page belongs to.
        friend: UserId,
        /// Requested page number.
        page: u32,
        /// Cumulative messages (newest first) or the failure.
        result: Result<Vec<HistoryMessage>, FetchError>,
    },
    /// The fixed "sent" delay for a direct message elapsed.
    DeliveryTimer {
        /// Friend-store epoch the message was sent in.
        epoch: u64,
        /// Conversation the message belongs to.
        friend: UserId,
        /// Idempotency token of the message.
        token: Uuid,
    },
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The socket status changed.
    Connection(ConnectionStatus),
    /// New human-readable status line for the random-chat view.
    Status(String),
    /// An event was appended to the random-chat transcript.
    RandomEvent(RandomChatEvent),
    /// The random-chat transcript was emptied.
    RandomCleared,
    /// The random session or its friend-request sub-state changed.
    RandomStateChanged {
        /// Pairing state.
        state: RandomState,
        /// Friend-request sub-state.
        friend_request: FriendRequestState,
    },
    /// The random partner became a friend; switch to the friends view.
    NavigateToFriends,
    /// A friend conversation gained or changed messages.
    ThreadUpdated {
        /// Conversation key.
        friend: UserId,
    },
    /// Older history was prepended to a friend conversation.
    OlderLoaded {
        /// Conversation key.
        friend: UserId,
        /// Number of messages prepended.
        added: usize,
        /// Whether more history may exist.
        has_more: bool,
    },
    /// A locally sent direct message changed delivery state.
    DeliveryChanged {
        /// Conversation key.
        friend: UserId,
        /// Idempotency token of the message.
        token: Uuid,
        /// New delivery state.
        state: DeliveryState,
    },
    /// The user logged out; the session is finished.
    LoggedOut,
    /// Session state was cleared and the user must authenticate again.
    ReauthRequired {
        /// Human-readable reason.
        reason: String,
    },
}
