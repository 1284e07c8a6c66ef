//! Friend-chat store.
//!
//! Keeps one [`FriendConversation`] per friend, oldest message first. History
//! arrives from a [`HistoryFetcher`] whose pages are *cumulative*: page `k`
//! holds the `k * PAGE_SIZE` most recent messages. Every page is therefore
//! reduced to its delta by identity before being prepended, and a short page
//! marks the history as exhausted. History newer than the newest confirmed id
//! is the only history that may confirm an unconfirmed local or live message;
//! what it does not confirm is appended, not prepended.
//!
//! Outbound messages are appended optimistically with a transient identity
//! and [`DeliveryState::Pending`]. The transport gives no acknowledgement, so
//! after a fixed delay the message is marked [`DeliveryState::Sent`]; this
//! only means "handed to the socket", never "received".
//!
//! Fetches and timers run as background tasks and report back through the
//! session loop. Their completions carry the store *epoch*, bumped on
//! [`FriendChatStore::clear`], plus the requested page, so a completion that
//! arrives after logout or after a newer request is dropped.

pub mod scroll;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use uuid::Uuid;

use whirl_proto::history::{HistoryMessage, full_page_len};
use whirl_proto::message::{DirectMessageFrame, OutboundFrame, UserId};

use crate::api::{FetchError, HistoryFetcher};
use crate::connection::{ConnectionError, FrameSink};
use crate::event::{EventSender, LoopEvent, LoopSender, SessionEvent};

/// Identity of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageIdentity {
    /// Not yet known to the server.
    Transient {
        /// Client-generated idempotency token.
        token: Uuid,
        /// Provisional numeric id (milliseconds, strictly increasing).
        placeholder: u64,
    },
    /// Server-assigned id.
    Confirmed {
        /// Message id from the server.
        id: u64,
    },
}

/// Local delivery annotation on a message we sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Appended locally, not yet handed off.
    Pending,
    /// Handed to the socket. Not a receipt.
    Sent,
    /// The socket refused it.
    Failed,
}

/// One message in a friend conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Resolved identity.
    pub identity: MessageIdentity,
    /// Idempotency token for messages authored here; kept after confirmation.
    pub token: Option<Uuid>,
    /// Author.
    pub sender: UserId,
    /// Recipient.
    pub receiver: UserId,
    /// Text.
    pub content: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Only set on messages authored here.
    pub delivery: Option<DeliveryState>,
}

impl StoredMessage {
    fn from_history(msg: HistoryMessage) -> Self {
        Self {
            identity: MessageIdentity::Confirmed { id: msg.id },
            token: None,
            sender: msg.sender,
            receiver: msg.receiver,
            content: msg.content,
            timestamp: msg.timestamp,
            delivery: None,
        }
    }

    /// Local message still waiting for its server id.
    fn awaits_confirmation(&self, receiver: UserId, content: &str) -> bool {
        self.token.is_some()
            && matches!(self.identity, MessageIdentity::Transient { .. })
            && self.receiver == receiver
            && self.content == content
    }

    /// Unconfirmed message, ours or a live one without an id, that `msg` is
    /// the server copy of.
    fn is_unconfirmed_copy_of(&self, msg: &HistoryMessage) -> bool {
        matches!(self.identity, MessageIdentity::Transient { .. })
            && self.sender == msg.sender
            && self.receiver == msg.receiver
            && self.content == msg.content
    }

    const fn confirmed_id(&self) -> Option<u64> {
        match self.identity {
            MessageIdentity::Confirmed { id } => Some(id),
            MessageIdentity::Transient { .. } => None,
        }
    }
}

/// Conversation state for one friend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendConversation {
    messages: Vec<StoredMessage>,
    page: u32,
    has_more: bool,
    loading: bool,
}

impl Default for FriendConversation {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            page: 0,
            has_more: true,
            loading: false,
        }
    }
}

impl FriendConversation {
    /// Messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    /// Last history page applied (0 before the first load).
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    /// Whether older history may exist.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    /// Whether a history request is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    fn contains(&self, identity: MessageIdentity) -> bool {
        self.messages.iter().any(|m| m.identity == identity)
    }
}

/// Reasons a direct send was rejected.
#[derive(Debug, thiserror::Error)]
pub enum DirectSendError {
    /// The message was empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// The message was stored as failed because the socket refused it.
    #[error("message {token} not sent: {source}")]
    NotSent {
        /// Token of the failed message.
        token: Uuid,
        /// Why the socket refused it.
        source: ConnectionError,
    },
}

/// Owns all friend conversations.
pub struct FriendChatStore<F> {
    fetcher: Arc<F>,
    me: UserId,
    sent_delay: Duration,
    loop_tx: LoopSender,
    events_tx: EventSender,
    conversations: HashMap<UserId, FriendConversation>,
    epoch: u64,
    last_placeholder: u64,
}

impl<F: HistoryFetcher> FriendChatStore<F> {
    /// Create an empty store for the user `me`.
    pub fn new(
        fetcher: Arc<F>,
        me: UserId,
        sent_delay: Duration,
        loop_tx: LoopSender,
        events_tx: EventSender,
    ) -> Self {
        Self {
            fetcher,
            me,
            sent_delay,
            loop_tx,
            events_tx,
            conversations: HashMap::new(),
            epoch: 0,
            last_placeholder: 0,
        }
    }

    /// Conversation with `friend`, if one exists.
    #[must_use]
    pub fn conversation(&self, friend: UserId) -> Option<&FriendConversation> {
        self.conversations.get(&friend)
    }

    /// Open a thread, fetching page 1 the first time.
    ///
    /// Returns `true` if a fetch was started.
    pub fn open_thread(&mut self, friend: UserId) -> bool {
        let conv = self.conversations.entry(friend).or_default();
        if conv.page > 0 || conv.loading {
            return false;
        }
        self.request(friend, 1);
        true
    }

    /// Fetch the next (older) page.
    ///
    /// No-op while a fetch is in flight, before the first page, or once the
    /// history is exhausted. Returns `true` if a fetch was started.
    pub fn load_older(&mut self, friend: UserId) -> bool {
        let Some(conv) = self.conversations.get(&friend) else {
            return false;
        };
        if conv.loading || !conv.has_more || conv.page == 0 {
            tracing::debug!(
                %friend,
                loading = conv.loading,
                has_more = conv.has_more,
                "load older ignored"
            );
            return false;
        }
        let next = conv.page + 1;
        self.request(friend, next);
        true
    }

    fn request(&mut self, friend: UserId, page: u32) {
        if let Some(conv) = self.conversations.get_mut(&friend) {
            conv.loading = true;
        }
        tracing::debug!(%friend, page, "requesting history page");

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.loop_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = fetcher.fetch_page(friend, page).await;
            let _ = tx.send(LoopEvent::HistoryPage {
                epoch,
                friend,
                page,
                result,
            });
        });
    }

    /// Apply a completed history request.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure so the session can decide whether it is
    /// fatal. The conversation itself is already unlocked.
    pub fn on_page(
        &mut self,
        epoch: u64,
        friend: UserId,
        page: u32,
        result: Result<Vec<HistoryMessage>, FetchError>,
    ) -> Result<(), FetchError> {
        if epoch != self.epoch {
            tracing::debug!(%friend, page, "dropping history page from previous session");
            return Ok(());
        }
        let me = self.me;
        let Some(conv) = self.conversations.get_mut(&friend) else {
            return Ok(());
        };
        if !conv.loading || page != conv.page + 1 {
            tracing::debug!(%friend, page, current = conv.page, "dropping stale history page");
            return Ok(());
        }
        conv.loading = false;

        let newest_first = match result {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(%friend, page, err = %e, "history fetch failed");
                return Err(e);
            }
        };

        let has_more = newest_first.len() >= full_page_len(page);

        // Only history newer than everything already confirmed can be the
        // server copy of an unconfirmed message, and it belongs after the
        // confirmed block rather than in front of it.
        let newest_confirmed = conv
            .messages
            .iter()
            .filter_map(StoredMessage::confirmed_id)
            .max();
        let tail = conv
            .messages
            .iter()
            .rposition(|m| m.confirmed_id().is_some())
            .map_or(0, |i| i + 1);

        let mut older: Vec<StoredMessage> = Vec::new();
        let mut newer: Vec<StoredMessage> = Vec::new();
        for msg in newest_first.into_iter().rev() {
            let identity = MessageIdentity::Confirmed { id: msg.id };
            if conv.contains(identity)
                || older.iter().chain(&newer).any(|m| m.identity == identity)
            {
                continue;
            }
            if newest_confirmed.is_some_and(|newest| msg.id <= newest) {
                older.push(StoredMessage::from_history(msg));
                continue;
            }
            if let Some(local) = conv
                .messages
                .iter_mut()
                .find(|m| m.is_unconfirmed_copy_of(&msg))
            {
                tracing::debug!(%friend, id = msg.id, own = msg.sender == me, "message confirmed by history");
                local.identity = identity;
                continue;
            }
            newer.push(StoredMessage::from_history(msg));
        }

        let added = older.len() + newer.len();
        let tail = tail + older.len();
        conv.messages.splice(0..0, older);
        conv.messages.splice(tail..tail, newer);
        conv.page = page;
        conv.has_more = has_more;
        tracing::info!(%friend, page, added, has_more, "history page applied");

        let event = if page == 1 {
            SessionEvent::ThreadUpdated { friend }
        } else {
            SessionEvent::OlderLoaded {
                friend,
                added,
                has_more,
            }
        };
        let _ = self.events_tx.send(event);
        Ok(())
    }

    /// Send a direct message optimistically.
    ///
    /// Returns the idempotency token of the stored message.
    ///
    /// # Errors
    ///
    /// - [`DirectSendError::EmptyMessage`] if `content` is blank; nothing is stored.
    /// - [`DirectSendError::NotSent`] if the socket refused the frame; the
    ///   message is kept with [`DeliveryState::Failed`].
    pub fn send(
        &mut self,
        sink: &impl FrameSink,
        friend: UserId,
        content: &str,
    ) -> Result<Uuid, DirectSendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(DirectSendError::EmptyMessage);
        }

        let token = Uuid::now_v7();
        let placeholder = self.next_placeholder();
        let message = StoredMessage {
            identity: MessageIdentity::Transient { token, placeholder },
            token: Some(token),
            sender: self.me,
            receiver: friend,
            content: content.to_string(),
            timestamp: now_rfc3339(),
            delivery: Some(DeliveryState::Pending),
        };
        let conv = self.conversations.entry(friend).or_default();
        conv.messages.push(message);
        let _ = self.events_tx.send(SessionEvent::ThreadUpdated { friend });

        let frame = OutboundFrame::DirectMessage {
            to: friend,
            content: content.to_string(),
        };
        if let Err(source) = sink.send_frame(&frame) {
            tracing::warn!(%friend, err = %source, "direct message not sent");
            self.set_delivery(friend, token, DeliveryState::Failed);
            return Err(DirectSendError::NotSent { token, source });
        }

        let tx = self.loop_tx.clone();
        let epoch = self.epoch;
        let delay = self.sent_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LoopEvent::DeliveryTimer {
                epoch,
                friend,
                token,
            });
        });
        Ok(token)
    }

    /// The fixed "sent" delay for `token` elapsed.
    pub fn on_delivery_timer(&mut self, epoch: u64, friend: UserId, token: Uuid) {
        if epoch != self.epoch {
            return;
        }
        let pending = self
            .conversations
            .get(&friend)
            .and_then(|c| c.messages.iter().find(|m| m.token == Some(token)))
            .is_some_and(|m| m.delivery == Some(DeliveryState::Pending));
        if pending {
            self.set_delivery(friend, token, DeliveryState::Sent);
        }
    }

    /// Apply a live `direct_message` frame.
    ///
    /// Echoes of our own messages are never appended; when they carry a
    /// server id they confirm the matching local message. Returns `true` if
    /// a message was appended.
    pub fn handle_inbound(&mut self, frame: &DirectMessageFrame) -> bool {
        if frame.from == self.me {
            self.reconcile_echo(frame);
            return false;
        }

        let friend = frame.from;
        let identity = match frame.id {
            Some(id) => MessageIdentity::Confirmed { id },
            None => MessageIdentity::Transient {
                token: Uuid::now_v7(),
                placeholder: self.next_placeholder(),
            },
        };
        let conv = self.conversations.entry(friend).or_default();
        if conv.contains(identity) {
            tracing::debug!(%friend, ?identity, "duplicate direct message ignored");
            return false;
        }

        conv.messages.push(StoredMessage {
            identity,
            token: None,
            sender: friend,
            receiver: self.me,
            content: frame.content.clone(),
            timestamp: frame.timestamp.clone().unwrap_or_else(now_rfc3339),
            delivery: None,
        });
        let _ = self.events_tx.send(SessionEvent::ThreadUpdated { friend });
        true
    }

    /// Drop every conversation. Completions already in flight are ignored.
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.epoch += 1;
    }

    fn reconcile_echo(&mut self, frame: &DirectMessageFrame) {
        let (Some(friend), Some(id)) = (frame.to, frame.id) else {
            return;
        };
        let Some(conv) = self.conversations.get_mut(&friend) else {
            return;
        };
        let identity = MessageIdentity::Confirmed { id };
        if conv.contains(identity) {
            return;
        }
        if let Some(local) = conv
            .messages
            .iter_mut()
            .find(|m| m.awaits_confirmation(friend, &frame.content))
        {
            tracing::debug!(%friend, id, "local message confirmed by echo");
            local.identity = identity;
            let _ = self.events_tx.send(SessionEvent::ThreadUpdated { friend });
        }
    }

    fn set_delivery(&mut self, friend: UserId, token: Uuid, state: DeliveryState) {
        let Some(message) = self
            .conversations
            .get_mut(&friend)
            .and_then(|c| c.messages.iter_mut().find(|m| m.token == Some(token)))
        else {
            return;
        };
        message.delivery = Some(state);
        let _ = self.events_tx.send(SessionEvent::DeliveryChanged {
            friend,
            token,
            state,
        });
    }

    fn next_placeholder(&mut self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        self.last_placeholder = now.max(self.last_placeholder + 1);
        self.last_placeholder
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
