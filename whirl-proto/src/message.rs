//! Wire frame types for the Whirl realtime socket.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Outbound
//! frames are produced by the client; inbound frames are pushed by the
//! server. Field names match the server contract exactly.

use serde::{Deserialize, Serialize};

/// Content of the notification frame announcing that the random partner left.
pub const PARTNER_LEFT: &str = "random_pair_left";

/// Numeric identity of a registered user (also used as a friend id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Wraps a raw server-side user id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frames the client sends over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Enter the random-match queue.
    #[serde(rename = "join_random")]
    JoinQueue,
    /// Leave the queue or the current random match.
    #[serde(rename = "leave_random")]
    LeaveQueue,
    /// A chat line for the current random partner.
    #[serde(rename = "message_random")]
    RandomMessage {
        /// Trimmed message text.
        content: String,
    },
    /// Ask the random partner to become a friend.
    #[serde(rename = "friend_request")]
    FriendRequest,
    /// A persistent message to an existing friend.
    #[serde(rename = "direct_message")]
    DirectMessage {
        /// Recipient user id.
        to: UserId,
        /// Trimmed message text.
        content: String,
    },
}

/// Payload of an inbound `direct_message` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessageFrame {
    /// Sender user id.
    pub from: UserId,
    /// Recipient user id, present on echoes of our own messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Server-assigned message id, when the server includes it.
    #[serde(default, alias = "message_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Server timestamp (RFC 3339), when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Frames the server pushes to the client.
///
/// Unrecognised `type` values decode to [`InboundFrame::Unknown`] so that
/// server-side additions never break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    /// The server paired us with a random partner.
    #[serde(rename = "random_joined")]
    Paired {
        /// Opaque partner identity, if the server discloses one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partner: Option<String>,
    },
    /// A chat line from the random partner.
    #[serde(rename = "message_random")]
    RandomMessage {
        /// Message text.
        #[serde(default)]
        content: String,
    },
    /// The random partner asked to become friends.
    #[serde(rename = "friend_request")]
    FriendRequestReceived {},
    /// Both sides agreed; the partner is now a friend.
    #[serde(rename = "friend_request_success")]
    FriendRequestAccepted {},
    /// The friend request could not be completed.
    #[serde(rename = "friend_request_failed")]
    FriendRequestRejected {},
    /// Free-form server notification (e.g. [`PARTNER_LEFT`]).
    #[serde(rename = "notification")]
    Notification {
        /// Notification body.
        #[serde(default)]
        content: String,
    },
    /// Application-level error reported by the server.
    #[serde(rename = "error")]
    Error {
        /// Machine-readable error code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Human-readable message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// A persistent message from (or echo to) a friend.
    #[serde(rename = "direct_message")]
    DirectMessage(DirectMessageFrame),
    /// Any frame type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Whether this frame is the partner-left notification.
    #[must_use]
    pub fn is_partner_left(&self) -> bool {
        matches!(self, Self::Notification { content } if content == PARTNER_LEFT)
    }

    /// Short label for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Paired { .. } => "random_joined",
            Self::RandomMessage { .. } => "message_random",
            Self::FriendRequestReceived {} => "friend_request",
            Self::FriendRequestAccepted {} => "friend_request_success",
            Self::FriendRequestRejected {} => "friend_request_failed",
            Self::Notification { .. } => "notification",
            Self::Error { .. } => "error",
            Self::DirectMessage(_) => "direct_message",
            Self::Unknown => "unknown",
        }
    }
}
