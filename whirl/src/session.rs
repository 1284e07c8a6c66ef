//! Session context: one authenticated user's live state.
//!
//! A [`Session`] is created on authentication and owns everything with a
//! lifecycle: the [`ConnectionManager`], the [`RandomMatchCoordinator`], the
//! [`FriendChatStore`] and the credentials. All mutation happens on a single
//! task. UI intents arrive as method calls (or [`Intent`]s through
//! [`Session::run`]); background completions arrive on the internal loop
//! channel and are applied in arrival order.
//!
//! # Failure paths
//!
//! | trigger | reason shown |
//! |---|---|
//! | history API answered 401 | "Your session has expired. Please log in again." |
//! | socket closed with 1008 / handshake 401 | "Unauthorized websocket. Please re-login." |
//! | probe failed after abnormal close, or fetch network error | "Server is offline. Please try again later." |
//!
//! Each tears the session down exactly like [`Session::logout`] and then
//! emits [`SessionEvent::ReauthRequired`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use whirl_proto::close::CloseKind;
use whirl_proto::codec;
use whirl_proto::message::{InboundFrame, UserId};

use crate::api::{FetchError, HealthProbe, HistoryFetcher};
use crate::connection::{ConnectionManager, ConnectionStatus, LinkSignal, ProbePolicy};
use crate::event::{LoopEvent, SessionEvent};
use crate::friends::{DirectSendError, FriendChatStore};
use crate::random::{
    JoinOutcome, RandomError, RandomMatchCoordinator, STATUS_DISCONNECTED,
};
use crate::storage::{KeyValueStore, RANDOM_SESSION_KEY, StorageError, TOKEN_KEY, USER_KEY};
use crate::transport::Connector;

/// Authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token for the API and the socket.
    pub token: String,
    /// The user this token belongs to.
    pub user: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    id: UserId,
}

impl Credentials {
    /// Credentials persisted by an earlier session, if both parts exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a stored record is unreadable.
    pub fn load<S: KeyValueStore>(store: &S) -> Result<Option<Self>, StorageError> {
        let Some(token) = store.get::<String>(TOKEN_KEY)? else {
            return Ok(None);
        };
        let Some(user) = store.get::<StoredUser>(USER_KEY)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            token,
            user: user.id,
        }))
    }

    fn save<S: KeyValueStore>(&self, store: &S) -> Result<(), StorageError> {
        store.put(TOKEN_KEY, &self.token)?;
        store.put(USER_KEY, &StoredUser { id: self.user })
    }
}

/// Timing knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Liveness probe after an abnormal close.
    pub probe: ProbePolicy,
    /// Delay before a direct message is marked "sent".
    pub sent_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe: ProbePolicy::default(),
            sent_delay: Duration::from_millis(500),
        }
    }
}

/// Why the session was torn down and re-authentication is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The REST API rejected the token.
    SessionExpired,
    /// The socket rejected the token.
    UnauthorizedSocket,
    /// The server could not be reached.
    ServerOffline,
}

impl FailureReason {
    /// Human-readable reason for the login screen.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SessionExpired => "Your session has expired. Please log in again.",
            Self::UnauthorizedSocket => "Unauthorized websocket. Please re-login.",
            Self::ServerOffline => "Server is offline. Please try again later.",
        }
    }
}

/// UI intents accepted by [`Session::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Open the socket.
    Connect,
    /// Enter the random-match queue.
    JoinQueue,
    /// Leave the queue or the current match.
    LeaveQueue,
    /// Chat line for the random partner.
    SendRandom(String),
    /// Ask the random partner to become a friend.
    RequestFriend,
    /// Open a friend conversation.
    OpenThread(UserId),
    /// Load older history of a friend conversation.
    LoadOlder(UserId),
    /// Direct message to a friend.
    SendDirect {
        /// Recipient.
        to: UserId,
        /// Text.
        content: String,
    },
    /// Log out and clear all session data.
    Logout,
    /// Stop the loop, keeping persisted data for the next start.
    Shutdown,
}

/// One authenticated user's session.
pub struct Session<C, A, S> {
    credentials: Credentials,
    store: Arc<S>,
    connection: ConnectionManager<C, A>,
    random: RandomMatchCoordinator<Arc<S>>,
    friends: FriendChatStore<A>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
    ended: bool,
}

impl<C, A, S> Session<C, A, S>
where
    C: Connector,
    A: HistoryFetcher + HealthProbe,
    S: KeyValueStore,
{
    /// Start a session for `credentials` and persist them.
    ///
    /// Returns the session and the receiver of its [`SessionEvent`]s. The
    /// socket is not opened until [`Session::connect`] (or a join) asks.
    pub fn new(
        credentials: Credentials,
        config: SessionConfig,
        connector: C,
        api: Arc<A>,
        store: Arc<S>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();

        if let Err(e) = credentials.save(store.as_ref()) {
            tracing::warn!(err = %e, "failed to persist credentials");
        }

        let connection = ConnectionManager::new(
            Arc::new(connector),
            Arc::clone(&api),
            config.probe,
            loop_tx.clone(),
            events_tx.clone(),
        );
        let random = RandomMatchCoordinator::new(Arc::clone(&store), events_tx.clone());
        let friends = FriendChatStore::new(
            api,
            credentials.user,
            config.sent_delay,
            loop_tx,
            events_tx.clone(),
        );
        tracing::info!(user = %credentials.user, "session started");

        let session = Self {
            credentials,
            store,
            connection,
            random,
            friends,
            events_tx,
            loop_rx,
            ended: false,
        };
        (session, events_rx)
    }

    /// The authenticated identity.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current socket status.
    #[must_use]
    pub const fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Watch the socket status.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }

    /// Random-chat state.
    #[must_use]
    pub const fn random(&self) -> &RandomMatchCoordinator<Arc<S>> {
        &self.random
    }

    /// Friend conversations.
    #[must_use]
    pub const fn friends(&self) -> &FriendChatStore<A> {
        &self.friends
    }

    /// Whether the session was logged out or failed.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Show the transcript of a random chat interrupted by a restart.
    /// Returns the number of restored events.
    pub fn restore_transcript(&mut self) -> usize {
        self.random.restore_transcript()
    }

    /// Open the socket if it is not open or opening.
    pub fn connect(&mut self) {
        if self.ended {
            return;
        }
        self.connection.connect();
    }

    /// Enter the match queue, connecting first if needed.
    pub fn join_queue(&mut self) {
        if self.ended {
            return;
        }
        match self.random.join_queue(&self.connection) {
            Ok(JoinOutcome::Deferred) => {
                self.connection.connect();
            }
            Ok(JoinOutcome::Sent | JoinOutcome::AlreadyActive) => {}
            Err(e) => tracing::warn!(err = %e, "join failed"),
        }
    }

    /// Leave the queue or the current match.
    pub fn leave_queue(&mut self) {
        if !self.ended {
            self.random.leave(&self.connection);
        }
    }

    /// Send a chat line to the random partner.
    ///
    /// # Errors
    ///
    /// Returns [`RandomError`] if the message was rejected.
    pub fn send_random(&mut self, content: &str) -> Result<(), RandomError> {
        self.random.send_message(&self.connection, content)
    }

    /// Ask the random partner to become a friend.
    ///
    /// # Errors
    ///
    /// Returns [`RandomError`] if the request was rejected.
    pub fn request_friend(&mut self) -> Result<(), RandomError> {
        self.random.request_friend(&self.connection)
    }

    /// Open a friend conversation, fetching its first page once.
    pub fn open_thread(&mut self, friend: UserId) {
        if !self.ended {
            self.friends.open_thread(friend);
        }
    }

    /// Load older history for a friend conversation.
    pub fn load_older(&mut self, friend: UserId) {
        if !self.ended {
            self.friends.load_older(friend);
        }
    }

    /// Send a direct message.
    ///
    /// # Errors
    ///
    /// Returns [`DirectSendError`] if the message is empty or the socket
    /// refused it.
    pub fn send_direct(&mut self, friend: UserId, content: &str) -> Result<Uuid, DirectSendError> {
        self.friends.send(&self.connection, friend, content)
    }

    /// Close the socket and clear every piece of session data.
    pub fn logout(&mut self) {
        if self.ended {
            return;
        }
        tracing::info!(user = %self.credentials.user, "logging out");
        self.teardown();
        let _ = self.events_tx.send(SessionEvent::LoggedOut);
    }

    /// Apply one intent. Returns `false` once the loop should stop.
    pub fn dispatch(&mut self, intent: Intent) -> bool {
        tracing::debug!(?intent, "intent");
        match intent {
            Intent::Connect => self.connect(),
            Intent::JoinQueue => self.join_queue(),
            Intent::LeaveQueue => self.leave_queue(),
            Intent::SendRandom(content) => {
                if let Err(e) = self.send_random(&content) {
                    tracing::debug!(err = %e, "random message rejected");
                }
            }
            Intent::RequestFriend => {
                if let Err(e) = self.request_friend() {
                    tracing::debug!(err = %e, "friend request rejected");
                }
            }
            Intent::OpenThread(friend) => self.open_thread(friend),
            Intent::LoadOlder(friend) => self.load_older(friend),
            Intent::SendDirect { to, content } => {
                if let Err(e) = self.send_direct(to, &content) {
                    tracing::debug!(err = %e, "direct message rejected");
                }
            }
            Intent::Logout => self.logout(),
            Intent::Shutdown => {
                tracing::info!("session shutting down");
                self.connection.close();
                return false;
            }
        }
        !self.ended
    }

    /// Run the session loop until shutdown, logout, a failure path, or
    /// the intent channel closing.
    pub async fn run(mut self, mut intents: mpsc::Receiver<Intent>) {
        loop {
            tokio::select! {
                intent = intents.recv() => {
                    let Some(intent) = intent else {
                        self.connection.close();
                        break;
                    };
                    if !self.dispatch(intent) {
                        break;
                    }
                }
                Some(event) = self.loop_rx.recv() => {
                    self.handle(event);
                    if self.ended {
                        break;
                    }
                }
            }
        }
        tracing::info!("session loop finished");
    }

    /// Wait for and apply the next background completion.
    ///
    /// Returns `false` if no more completions can arrive.
    pub async fn process_next(&mut self) -> bool {
        match self.loop_rx.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    /// Apply every completion already queued, without waiting.
    pub fn process_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.loop_rx.try_recv() {
            self.handle(event);
            applied += 1;
        }
        applied
    }

    fn handle(&mut self, event: LoopEvent) {
        if self.ended {
            tracing::debug!("ignoring completion after session end");
            return;
        }
        match event {
            LoopEvent::Connection { generation, update } => {
                match self.connection.on_update(generation, update) {
                    None => {}
                    Some(LinkSignal::Opened) => self.random.on_connected(&self.connection),
                    Some(LinkSignal::Frame(text)) => self.route_frame(&text),
                    Some(LinkSignal::Closed(kind)) => self.on_closed(kind),
                }
            }
            LoopEvent::Probe {
                generation,
                healthy,
            } => {
                if self.connection.on_probe(generation, healthy) {
                    self.fail(FailureReason::ServerOffline);
                }
            }
            LoopEvent::HistoryPage {
                epoch,
                friend,
                page,
                result,
            } => match self.friends.on_page(epoch, friend, page, result) {
                Ok(()) => {}
                Err(FetchError::Unauthorized) => self.fail(FailureReason::SessionExpired),
                Err(FetchError::Network(_)) => self.fail(FailureReason::ServerOffline),
                Err(_) => {}
            },
            LoopEvent::DeliveryTimer {
                epoch,
                friend,
                token,
            } => self.friends.on_delivery_timer(epoch, friend, token),
        }
    }

    fn route_frame(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(InboundFrame::DirectMessage(dm)) => {
                self.friends.handle_inbound(&dm);
            }
            Ok(InboundFrame::Unknown) => tracing::debug!("ignoring unknown frame type"),
            Ok(frame) => {
                tracing::debug!(kind = frame.kind(), "frame");
                self.random.handle_frame(&frame);
            }
            Err(e) => self.random.handle_malformed(&e),
        }
    }

    fn on_closed(&mut self, kind: CloseKind) {
        match kind {
            CloseKind::Unauthorized => self.fail(FailureReason::UnauthorizedSocket),
            CloseKind::Normal => self.random.on_transport_lost(),
            CloseKind::Abnormal | CloseKind::Retryable => {
                self.random.on_transport_lost();
                self.random.set_status(STATUS_DISCONNECTED);
            }
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        tracing::warn!(?reason, "session failed; re-authentication required");
        self.teardown();
        let _ = self.events_tx.send(SessionEvent::ReauthRequired {
            reason: reason.message().to_string(),
        });
    }

    fn teardown(&mut self) {
        self.connection.close();
        self.random.reset();
        self.friends.clear();
        for key in [TOKEN_KEY, USER_KEY, RANDOM_SESSION_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, err = %e, "failed to clear stored session data");
            }
        }
        self.ended = true;
    }
}
