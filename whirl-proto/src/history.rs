//! Wire types for the paginated message-history API.
//!
//! The history endpoint is cumulative: page `n` returns up to
//! `n * PAGE_SIZE` of the most recent messages, newest first. It does not
//! return a distinct slice per page.

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// Messages per history page, fixed on both client and server.
pub const PAGE_SIZE: usize = 10;

/// Number of messages a full cumulative response holds for `page`.
#[must_use]
pub const fn full_page_len(page: u32) -> usize {
    page as usize * PAGE_SIZE
}

/// One persisted direct message as returned by the history API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Server-assigned message id.
    #[serde(rename = "ID")]
    pub id: u64,
    /// Author.
    #[serde(rename = "SenderID")]
    pub sender: UserId,
    /// Recipient.
    #[serde(rename = "ReceiverID")]
    pub receiver: UserId,
    /// Message text.
    #[serde(rename = "Content")]
    pub content: String,
    /// Server timestamp (RFC 3339).
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

/// Response body of `GET /messages/{friend_id}?page={n}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// HTTP status echoed in the body.
    #[serde(default)]
    pub status: u16,
    /// Cumulative messages, newest first. The server sends `null` when empty.
    #[serde(default)]
    pub messages: Option<Vec<HistoryMessage>>,
}

/// Error body returned by the REST API on non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// HTTP status echoed in the body.
    #[serde(default)]
    pub status: u16,
    /// Human-readable error.
    #[serde(default)]
    pub error: String,
}
