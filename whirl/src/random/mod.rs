//! Random-match coordinator.
//!
//! Drives the queue → pair → chat → leave protocol and the friend-request
//! handshake on top of a [`FrameSink`]. The coordinator owns the
//! [`RandomState`] machine, the ephemeral transcript and the status line,
//! and mirrors every mutation of a live session into the persisted
//! [`snapshot`]. Whenever the session returns to idle the snapshot is
//! removed, so a reload can never resurrect a stale pairing.

pub mod snapshot;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use whirl_proto::close::ServerErrorCode;
use whirl_proto::codec::FrameError;
use whirl_proto::message::{InboundFrame, OutboundFrame};

use crate::connection::{ConnectionError, FrameSink};
use crate::event::{EventSender, SessionEvent};
use crate::storage::KeyValueStore;

use self::snapshot::SessionSnapshot;

const STATUS_CONNECTED: &str = "Connected. Tap Start Whirl to join the queue.";
const STATUS_CONNECTING: &str = "Connecting socket...";
const STATUS_FINDING: &str = "Finding a partner...";
const STATUS_PAIRED: &str = "You are now connected! Say hi.";
const STATUS_LEFT_CHAT: &str = "Left chat. Tap Start Whirl to find a new partner.";
const STATUS_LEFT_QUEUE: &str = "Left queue. Tap Start Whirl to try again.";
const STATUS_PARTNER_LEFT: &str = "Your match left. Re-queue to connect again.";
const STATUS_SERVER_ERROR: &str = "Error received from server.";
/// Status shown when a frame could not be handed to the socket.
pub const STATUS_SOCKET_NOT_READY: &str = "Socket not ready. Tap Connect to retry.";
/// Status shown after a retryable socket loss.
pub const STATUS_DISCONNECTED: &str = "Disconnected. Tap to retry.";

const NOTICE_JOINING: &str = "Joining random queue...";
const NOTICE_PAIRED: &str = "You have been whirled! Start chatting.";
const NOTICE_NOT_PAIRED: &str = "You are not connected to a random user yet.";
const NOTICE_LEFT_CHAT: &str = "You left the chat.";
const NOTICE_LEFT_QUEUE: &str = "You left the queue.";
const NOTICE_FRIEND_REQUEST: &str = "You received a friend request!";
const NOTICE_FRIENDS: &str = "🎉 You are now friends!";
const NOTICE_FRIEND_FAILED: &str = "Failed to send friend request. Please try again.";
const NOTICE_PARTNER_LEFT: &str = "Your match has left. Tap Start Whirl to find another.";
const NOTICE_MATCH_DISCONNECTED: &str = "Your match has disconnected.";
const NOTICE_SERVER_ERROR: &str = "Something went wrong.";
const NOTICE_MALFORMED: &str = "Received malformed message from server.";

/// Pairing state of the random session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomState {
    /// Not queued and not paired.
    #[default]
    Idle,
    /// Waiting in the match queue.
    Queueing,
    /// Chatting with a random partner.
    Paired,
}

/// Friend-request sub-state of a random session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestState {
    /// No request in flight.
    #[default]
    Idle,
    /// We asked; waiting for the outcome.
    Pending,
    /// The partner asked us.
    Received,
    /// The partner is now a friend.
    Success,
}

/// One entry of the random-chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomChatEvent {
    /// Local identity.
    pub id: Uuid,
    /// Message or notice text.
    pub content: String,
    /// Whether the local user wrote it.
    pub from_self: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// System notice rather than a chat message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub system: bool,
}

impl RandomChatEvent {
    fn new(content: &str, from_self: bool, system: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            content: content.to_string(),
            from_self,
            timestamp: chrono::Utc::now().timestamp_millis(),
            system,
        }
    }

    /// A system notice.
    #[must_use]
    pub fn notice(text: &str) -> Self {
        Self::new(text, false, true)
    }

    /// A chat line written by the local user.
    #[must_use]
    pub fn outgoing(content: &str) -> Self {
        Self::new(content, true, false)
    }

    /// A chat line written by the partner.
    #[must_use]
    pub fn incoming(content: &str) -> Self {
        Self::new(content, false, false)
    }
}

/// Reasons a random-chat intent was rejected.
#[derive(Debug, thiserror::Error)]
pub enum RandomError {
    /// The message was empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// The intent needs an active pairing.
    #[error("not paired with a random partner")]
    NotPaired,

    /// A friend request is already pending or accepted.
    #[error("friend request already in progress")]
    FriendRequestInFlight,

    /// The frame could not be handed to the socket.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Result of a join-queue intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The join frame was sent.
    Sent,
    /// Already queueing or paired; nothing sent.
    AlreadyActive,
    /// The socket is not open; the join happens once it is.
    Deferred,
}

/// Owns the random-chat session.
pub struct RandomMatchCoordinator<S> {
    store: S,
    events_tx: EventSender,
    state: RandomState,
    friend_request: FriendRequestState,
    partner: Option<String>,
    transcript: Vec<RandomChatEvent>,
    had_chat: bool,
    status: String,
    join_deferred: bool,
}

impl<S: KeyValueStore> RandomMatchCoordinator<S> {
    /// Create an idle coordinator persisting into `store`.
    pub fn new(store: S, events_tx: EventSender) -> Self {
        Self {
            store,
            events_tx,
            state: RandomState::Idle,
            friend_request: FriendRequestState::Idle,
            partner: None,
            transcript: Vec::new(),
            had_chat: false,
            status: "Tap Start Whirl to find a partner".to_string(),
            join_deferred: false,
        }
    }

    /// Pairing state.
    #[must_use]
    pub const fn state(&self) -> RandomState {
        self.state
    }

    /// Friend-request sub-state.
    #[must_use]
    pub const fn friend_request(&self) -> FriendRequestState {
        self.friend_request
    }

    /// Transcript in arrival order.
    #[must_use]
    pub fn transcript(&self) -> &[RandomChatEvent] {
        &self.transcript
    }

    /// Partner identity assigned by the server, if any.
    #[must_use]
    pub fn partner(&self) -> Option<&str> {
        self.partner.as_deref()
    }

    /// Current status line.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Whether a join is waiting for the socket to open.
    #[must_use]
    pub const fn is_join_deferred(&self) -> bool {
        self.join_deferred
    }

    /// Load a transcript left behind by a previous process.
    ///
    /// The snapshot is consumed and the session stays idle: the old pairing
    /// is gone server-side, so only the text is shown. Returns the number
    /// of restored events.
    pub fn restore_transcript(&mut self) -> usize {
        if self.state != RandomState::Idle {
            return 0;
        }
        let snapshot = match snapshot::load(&self.store) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!(err = %e, "discarding unreadable random-chat snapshot");
                self.persist();
                return 0;
            }
        };

        tracing::info!(
            events = snapshot.messages.len(),
            state = ?snapshot.random_state,
            "restoring random-chat transcript"
        );
        self.had_chat = snapshot.had_chat;
        for event in snapshot.messages {
            let _ = self.events_tx.send(SessionEvent::RandomEvent(event.clone()));
            self.transcript.push(event);
        }
        self.persist();
        self.transcript.len()
    }

    /// Called once the socket is open. Runs a deferred join, if any.
    pub fn on_connected(&mut self, sink: &impl FrameSink) {
        self.set_status(STATUS_CONNECTED);
        if self.join_deferred {
            tracing::debug!("running deferred join");
            if let Err(e) = self.join_queue(sink) {
                tracing::warn!(err = %e, "deferred join failed");
            }
        }
    }

    /// Enter the match queue.
    ///
    /// # Errors
    ///
    /// Returns [`RandomError::Connection`] if the join frame could not be
    /// handed to the socket.
    pub fn join_queue(&mut self, sink: &impl FrameSink) -> Result<JoinOutcome, RandomError> {
        if self.state != RandomState::Idle {
            tracing::debug!(state = ?self.state, "join ignored: session already active");
            return Ok(JoinOutcome::AlreadyActive);
        }
        if !sink.is_connected() {
            self.join_deferred = true;
            self.set_status(STATUS_CONNECTING);
            return Ok(JoinOutcome::Deferred);
        }

        self.join_deferred = false;
        if let Err(e) = sink.send_frame(&OutboundFrame::JoinQueue) {
            self.set_status(STATUS_SOCKET_NOT_READY);
            return Err(e.into());
        }

        tracing::info!("joined random queue");
        self.clear_transcript();
        self.had_chat = false;
        self.partner = None;
        self.set_state(RandomState::Queueing, FriendRequestState::Idle);
        self.set_status(STATUS_FINDING);
        self.append(RandomChatEvent::notice(NOTICE_JOINING));
        Ok(JoinOutcome::Sent)
    }

    /// Leave the queue or the current match.
    ///
    /// Always ends idle with an empty transcript (apart from the "left the
    /// queue" notice) and no snapshot.
    pub fn leave(&mut self, sink: &impl FrameSink) {
        let was = self.state;
        self.join_deferred = false;
        if was != RandomState::Idle {
            if let Err(e) = sink.send_frame(&OutboundFrame::LeaveQueue) {
                tracing::warn!(err = %e, "leave frame not sent");
            }
        }

        self.partner = None;
        self.set_state(RandomState::Idle, FriendRequestState::Idle);
        match was {
            RandomState::Paired => {
                tracing::info!("left random match");
                self.set_status(STATUS_LEFT_CHAT);
                self.append(RandomChatEvent::notice(NOTICE_LEFT_CHAT));
                self.clear_transcript();
                self.had_chat = false;
            }
            RandomState::Queueing => {
                tracing::info!("left random queue");
                self.set_status(STATUS_LEFT_QUEUE);
                self.clear_transcript();
                self.append(RandomChatEvent::notice(NOTICE_LEFT_QUEUE));
            }
            RandomState::Idle => {}
        }
        self.persist();
    }

    /// Send a chat line to the partner.
    ///
    /// # Errors
    ///
    /// - [`RandomError::EmptyMessage`] if `content` is blank.
    /// - [`RandomError::NotPaired`] unless paired (a notice is appended).
    /// - [`RandomError::Connection`] if the socket refused the frame.
    pub fn send_message(&mut self, sink: &impl FrameSink, content: &str) -> Result<(), RandomError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RandomError::EmptyMessage);
        }
        if self.state != RandomState::Paired {
            self.append(RandomChatEvent::notice(NOTICE_NOT_PAIRED));
            return Err(RandomError::NotPaired);
        }

        let frame = OutboundFrame::RandomMessage {
            content: content.to_string(),
        };
        if let Err(e) = sink.send_frame(&frame) {
            self.set_status(STATUS_SOCKET_NOT_READY);
            return Err(e.into());
        }
        self.had_chat = true;
        self.append(RandomChatEvent::outgoing(content));
        Ok(())
    }

    /// Ask the partner to become a friend.
    ///
    /// # Errors
    ///
    /// - [`RandomError::NotPaired`] unless paired.
    /// - [`RandomError::FriendRequestInFlight`] if already pending or accepted.
    /// - [`RandomError::Connection`] if the socket refused the frame.
    pub fn request_friend(&mut self, sink: &impl FrameSink) -> Result<(), RandomError> {
        if self.state != RandomState::Paired {
            return Err(RandomError::NotPaired);
        }
        if matches!(
            self.friend_request,
            FriendRequestState::Pending | FriendRequestState::Success
        ) {
            return Err(RandomError::FriendRequestInFlight);
        }
        if let Err(e) = sink.send_frame(&OutboundFrame::FriendRequest) {
            self.set_status(STATUS_SOCKET_NOT_READY);
            return Err(e.into());
        }
        tracing::info!("friend request sent");
        self.set_state(self.state, FriendRequestState::Pending);
        self.persist();
        Ok(())
    }

    /// Apply a decoded server frame. Direct messages are not ours and are
    /// ignored here.
    pub fn handle_frame(&mut self, frame: &InboundFrame) {
        match frame {
            InboundFrame::Paired { partner } => self.on_paired(partner.clone()),
            InboundFrame::RandomMessage { content } => {
                if self.state != RandomState::Paired {
                    tracing::debug!("ignoring random message outside a match");
                    return;
                }
                self.had_chat = true;
                self.append(RandomChatEvent::incoming(content));
            }
            InboundFrame::FriendRequestReceived {} => {
                if self.friend_request != FriendRequestState::Pending {
                    self.set_state(self.state, FriendRequestState::Received);
                }
                self.append(RandomChatEvent::notice(NOTICE_FRIEND_REQUEST));
            }
            InboundFrame::FriendRequestAccepted {} => {
                if self.friend_request == FriendRequestState::Success {
                    return;
                }
                tracing::info!("random partner is now a friend");
                self.set_state(self.state, FriendRequestState::Success);
                self.append(RandomChatEvent::notice(NOTICE_FRIENDS));
                let _ = self.events_tx.send(SessionEvent::NavigateToFriends);
            }
            InboundFrame::FriendRequestRejected {} => {
                self.set_state(self.state, FriendRequestState::Idle);
                self.append(RandomChatEvent::notice(NOTICE_FRIEND_FAILED));
            }
            InboundFrame::Notification { .. } if frame.is_partner_left() => self.on_partner_left(),
            InboundFrame::Notification { content } => {
                tracing::debug!(%content, "unhandled notification");
            }
            InboundFrame::Error { code, content } => {
                self.on_server_error(code.as_deref(), content.as_deref());
            }
            InboundFrame::DirectMessage(_) | InboundFrame::Unknown => {}
        }
    }

    /// Surface an undecodable frame as a notice. State is untouched.
    pub fn handle_malformed(&mut self, err: &FrameError) {
        tracing::warn!(err = %err, "malformed frame from server");
        self.append(RandomChatEvent::notice(NOTICE_MALFORMED));
    }

    /// The socket went away: no pairing survives it. The transcript stays
    /// on screen but the snapshot is dropped.
    pub fn on_transport_lost(&mut self) {
        self.join_deferred = false;
        if self.state == RandomState::Idle {
            return;
        }
        tracing::info!(state = ?self.state, "random session reset by socket loss");
        self.partner = None;
        self.set_state(RandomState::Idle, FriendRequestState::Idle);
        self.persist();
    }

    /// Drop everything, including the snapshot.
    pub fn reset(&mut self) {
        self.join_deferred = false;
        self.partner = None;
        self.had_chat = false;
        self.set_state(RandomState::Idle, FriendRequestState::Idle);
        self.clear_transcript();
        self.persist();
    }

    /// Replace the status line.
    pub fn set_status(&mut self, text: &str) {
        if self.status != text {
            self.status = text.to_string();
            let _ = self.events_tx.send(SessionEvent::Status(self.status.clone()));
        }
    }

    fn on_paired(&mut self, partner: Option<String>) {
        if self.state == RandomState::Paired {
            tracing::debug!("duplicate pairing notice ignored");
            return;
        }
        tracing::info!(partner = ?partner, "paired with random partner");
        // The queue-progress notice is superseded by the pairing notice.
        if self.state == RandomState::Queueing {
            self.clear_transcript();
        }
        self.join_deferred = false;
        self.partner = partner;
        self.had_chat = true;
        self.set_state(RandomState::Paired, FriendRequestState::Idle);
        self.set_status(STATUS_PAIRED);
        self.append(RandomChatEvent::notice(NOTICE_PAIRED));
    }

    fn on_partner_left(&mut self) {
        if self.state == RandomState::Idle {
            tracing::debug!("partner-left notice while idle ignored");
            return;
        }
        tracing::info!("random partner left");
        self.end_conversation();
        self.set_status(STATUS_PARTNER_LEFT);
        self.append(RandomChatEvent::notice(NOTICE_PARTNER_LEFT));
    }

    fn on_server_error(&mut self, code: Option<&str>, content: Option<&str>) {
        let content = content.filter(|c| !c.trim().is_empty());
        let code = code.map(ServerErrorCode::parse);
        tracing::warn!(?code, ?content, "server reported an error");

        if code.as_ref().is_some_and(ServerErrorCode::ends_conversation) {
            self.end_conversation();
        }
        self.set_status(content.unwrap_or(STATUS_SERVER_ERROR));
        self.append(RandomChatEvent::notice(content.unwrap_or(NOTICE_SERVER_ERROR)));
        if code == Some(ServerErrorCode::SendMessageFailed) {
            self.append(RandomChatEvent::notice(NOTICE_MATCH_DISCONNECTED));
        }
    }

    fn end_conversation(&mut self) {
        self.partner = None;
        self.had_chat = false;
        self.set_state(RandomState::Idle, FriendRequestState::Idle);
        self.clear_transcript();
        self.persist();
    }

    fn set_state(&mut self, state: RandomState, friend_request: FriendRequestState) {
        if self.state == state && self.friend_request == friend_request {
            return;
        }
        self.state = state;
        self.friend_request = friend_request;
        let _ = self.events_tx.send(SessionEvent::RandomStateChanged {
            state,
            friend_request,
        });
    }

    fn append(&mut self, event: RandomChatEvent) {
        let _ = self.events_tx.send(SessionEvent::RandomEvent(event.clone()));
        self.transcript.push(event);
        self.persist();
    }

    fn clear_transcript(&mut self) {
        if !self.transcript.is_empty() {
            self.transcript.clear();
            let _ = self.events_tx.send(SessionEvent::RandomCleared);
        }
    }

    /// Mirror the session into storage: written while live, removed once idle.
    fn persist(&self) {
        let result = if self.state == RandomState::Idle {
            snapshot::clear(&self.store)
        } else {
            snapshot::save(
                &self.store,
                &SessionSnapshot {
                    messages: self.transcript.clone(),
                    random_state: self.state,
                    had_chat: self.had_chat,
                },
            )
        };
        if let Err(e) = result {
            tracing::warn!(err = %e, "failed to persist random-chat snapshot");
        }
    }
}
