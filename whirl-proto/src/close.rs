//! Close-code and server error-code classification.
//!
//! The client reacts to a socket close differently depending on why it
//! closed, and to a server `error` frame differently depending on its code.
//! Both mappings live here so the server contract is in one place.

/// Normal closure initiated by either side.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (page unload, server restart).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Protocol error.
pub const CLOSE_PROTOCOL: u16 = 1002;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation; the server uses it for a rejected token.
pub const CLOSE_POLICY: u16 = 1008;

/// How the client should react to a socket close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Clean operator-initiated close; nothing to report.
    Normal,
    /// The server rejected our credentials.
    Unauthorized,
    /// The connection died; probe the server before deciding anything.
    Abnormal,
    /// Any other close; the user may retry.
    Retryable,
}

/// Classifies a close by its code (if a close frame arrived) and whether the
/// closing handshake completed.
#[must_use]
pub const fn classify_close(code: Option<u16>, clean: bool) -> CloseKind {
    match code {
        Some(CLOSE_NORMAL | CLOSE_GOING_AWAY) => CloseKind::Normal,
        Some(CLOSE_POLICY) => CloseKind::Unauthorized,
        Some(CLOSE_ABNORMAL | CLOSE_PROTOCOL) | None => CloseKind::Abnormal,
        Some(_) if !clean => CloseKind::Abnormal,
        Some(_) => CloseKind::Retryable,
    }
}

/// Error codes carried by server `error` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorCode {
    /// The peer connection no longer exists.
    ConnectionNotExist,
    /// The message target is not a valid receiver.
    InvalidReceiver,
    /// The server could not forward a message to the partner.
    SendMessageFailed,
    /// Any other code; informational only.
    Other(String),
}

impl ServerErrorCode {
    /// Parses a wire error code.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "CONNECTION_NOT_EXIST" => Self::ConnectionNotExist,
            "INVALID_RECEIVER" => Self::InvalidReceiver,
            "SEND_MESSAGE_FAILED" => Self::SendMessageFailed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this error ends the current random conversation.
    #[must_use]
    pub const fn ends_conversation(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}
