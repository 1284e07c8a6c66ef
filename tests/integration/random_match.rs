//! Integration tests for the random-match flow.
//!
//! Drives a full [`Session`] over the loopback transport, scripting the
//! server side by hand: join, pairing, chat, leave, partner departure,
//! server errors, malformed frames and restore-after-restart.

use std::sync::Arc;

use tokio::sync::mpsc;

use whirl::api::{FetchError, HealthProbe, HistoryFetcher};
use whirl::connection::ConnectionStatus;
use whirl::event::SessionEvent;
use whirl::random::{FriendRequestState, RandomState};
use whirl::session::{Credentials, Session, SessionConfig};
use whirl::storage::{KeyValueStore, MemoryStore, RANDOM_SESSION_KEY};
use whirl::transport::Outgoing;
use whirl::transport::loopback::{LoopbackConnector, LoopbackPeer, LoopbackServer};

use whirl_proto::history::HistoryMessage;
use whirl_proto::message::UserId;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// API stub: no history, server always healthy.
struct QuietApi;

impl HistoryFetcher for QuietApi {
    async fn fetch_page(&self, _friend: UserId, _page: u32) -> Result<Vec<HistoryMessage>, FetchError> {
        Ok(Vec::new())
    }
}

impl HealthProbe for QuietApi {
    async fn check(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

type TestSession = Session<LoopbackConnector, QuietApi, MemoryStore>;

fn credentials() -> Credentials {
    Credentials {
        token: "jwt".into(),
        user: UserId::new(1),
    }
}

fn new_session(
    store: Arc<MemoryStore>,
) -> (TestSession, mpsc::UnboundedReceiver<SessionEvent>, LoopbackServer) {
    let (connector, server) = LoopbackConnector::new();
    let (session, events) = Session::new(
        credentials(),
        SessionConfig::default(),
        connector,
        Arc::new(QuietApi),
        store,
    );
    (session, events, server)
}

/// Open the socket and apply the `Opened` update.
async fn connect(session: &mut TestSession, server: &LoopbackServer) -> LoopbackPeer {
    session.connect();
    let peer = server.accept().await.unwrap();
    assert!(session.process_next().await);
    assert_eq!(session.connection_status(), ConnectionStatus::Connected);
    peer
}

/// Push a frame from the server and apply it.
async fn deliver(session: &mut TestSession, peer: &LoopbackPeer, frame: &str) {
    peer.push(frame).await.unwrap();
    assert!(session.process_next().await);
}

async fn next_text(peer: &mut LoopbackPeer) -> String {
    match peer.recv().await {
        Some(Outgoing::Text(text)) => text,
        other => panic!("expected text frame, got {other:?}"),
    }
}

/// Connected, queued and paired.
async fn paired(session: &mut TestSession, server: &LoopbackServer) -> LoopbackPeer {
    let mut peer = connect(session, server).await;
    session.join_queue();
    assert_eq!(next_text(&mut peer).await, r#"{"type":"join_random"}"#);
    deliver(session, &peer, r#"{"type":"random_joined"}"#).await;
    assert_eq!(session.random().state(), RandomState::Paired);
    peer
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn contents(session: &TestSession) -> Vec<(String, bool)> {
    session
        .random()
        .transcript()
        .iter()
        .map(|e| (e.content.clone(), e.system))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_pair_and_chat() {
    let store = Arc::new(MemoryStore::new());
    let (mut session, _events, server) = new_session(Arc::clone(&store));
    let mut peer = connect(&mut session, &server).await;

    session.join_queue();
    assert_eq!(next_text(&mut peer).await, r#"{"type":"join_random"}"#);
    assert_eq!(session.random().state(), RandomState::Queueing);
    assert_eq!(
        contents(&session),
        vec![("Joining random queue...".to_string(), true)]
    );

    deliver(&mut session, &peer, r#"{"type":"random_joined"}"#).await;
    deliver(&mut session, &peer, r#"{"type":"message_random","content":"hi"}"#).await;
    session.send_random("  hello  ").unwrap();
    assert_eq!(
        next_text(&mut peer).await,
        r#"{"type":"message_random","content":"hello"}"#
    );

    let transcript = session.random().transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript.iter().filter(|e| e.system).count(), 1);
    assert_eq!(transcript[0].content, "You have been whirled! Start chatting.");
    assert!(!transcript[1].from_self);
    assert_eq!(transcript[1].content, "hi");
    assert!(transcript[2].from_self);
    assert_eq!(transcript[2].content, "hello");
    assert_eq!(session.random().status(), "You are now connected! Say hi.");

    let raw = store.get_raw(RANDOM_SESSION_KEY).unwrap().unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["randomState"], "paired");
    assert_eq!(snapshot["messages"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn join_is_idempotent() {
    let (mut session, _events, server) = new_session(Arc::new(MemoryStore::new()));
    let mut peer = connect(&mut session, &server).await;

    session.join_queue();
    assert_eq!(next_text(&mut peer).await, r#"{"type":"join_random"}"#);
    session.join_queue();
    session.join_queue();
    assert!(peer.drain().is_empty());
    assert_eq!(session.random().transcript().len(), 1);
}

#[tokio::test]
async fn join_before_connect_opens_socket_and_joins() {
    let (mut session, _events, server) = new_session(Arc::new(MemoryStore::new()));

    session.join_queue();
    assert_eq!(session.connection_status(), ConnectionStatus::Connecting);
    assert!(session.random().is_join_deferred());

    let mut peer = server.accept().await.unwrap();
    assert!(session.process_next().await);
    assert_eq!(next_text(&mut peer).await, r#"{"type":"join_random"}"#);
    assert_eq!(session.random().state(), RandomState::Queueing);
    assert!(!session.random().is_join_deferred());
}

#[tokio::test]
async fn leave_match_resets_everything() {
    let store = Arc::new(MemoryStore::new());
    let (mut session, _events, server) = new_session(Arc::clone(&store));
    let mut peer = paired(&mut session, &server).await;
    deliver(&mut session, &peer, r#"{"type":"message_random","content":"yo"}"#).await;
    assert!(store.contains(RANDOM_SESSION_KEY));

    session.leave_queue();
    assert_eq!(next_text(&mut peer).await, r#"{"type":"leave_random"}"#);
    assert_eq!(session.random().state(), RandomState::Idle);
    assert_eq!(session.random().friend_request(), FriendRequestState::Idle);
    assert!(session.random().transcript().is_empty());
    assert!(!store.contains(RANDOM_SESSION_KEY));
    assert_eq!(
        session.random().status(),
        "Left chat. Tap Start Whirl to find a new partner."
    );
}

#[tokio::test]
async fn leave_queue_keeps_only_the_notice() {
    let store = Arc::new(MemoryStore::new());
    let (mut session, _events, server) = new_session(Arc::clone(&store));
    let mut peer = connect(&mut session, &server).await;
    session.join_queue();
    let _ = next_text(&mut peer).await;

    session.leave_queue();
    assert_eq!(next_text(&mut peer).await, r#"{"type":"leave_random"}"#);
    assert_eq!(
        contents(&session),
        vec![("You left the queue.".to_string(), true)]
    );
    assert!(!store.contains(RANDOM_SESSION_KEY));
}

#[tokio::test]
async fn partner_left_returns_to_idle() {
    let store = Arc::new(MemoryStore::new());
    let (mut session, _events, server) = new_session(Arc::clone(&store));
    let peer = paired(&mut session, &server).await;
    deliver(&mut session, &peer, r#"{"type":"message_random","content":"bye"}"#).await;

    deliver(
        &mut session,
        &peer,
        r#"{"type":"notification","content":"random_pair_left"}"#,
    )
    .await;

    assert_eq!(session.random().state(), RandomState::Idle);
    assert_eq!(
        contents(&session),
        vec![(
            "Your match has left. Tap Start Whirl to find another.".to_string(),
            true
        )]
    );
    assert_eq!(
        session.random().status(),
        "Your match left. Re-queue to connect again."
    );
    assert!(!store.contains(RANDOM_SESSION_KEY));
}

#[tokio::test]
async fn send_failure_error_ends_conversation() {
    let (mut session, _events, server) = new_session(Arc::new(MemoryStore::new()));
    let peer = paired(&mut session, &server).await;

    deliver(
        &mut session,
        &peer,
        r#"{"type":"error","code":"SEND_MESSAGE_FAILED","content":"Partner unreachable"}"#,
    )
    .await;

    assert_eq!(session.random().state(), RandomState::Idle);
    assert_eq!(
        contents(&session),
        vec![
            ("Partner unreachable".to_string(), true),
            ("Your match has disconnected.".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn informational_error_keeps_match() {
    let (mut session, _events, server) = new_session(Arc::new(MemoryStore::new()));
    let peer = paired(&mut session, &server).await;

    deliver(&mut session, &peer, r#"{"type":"error","code":"RATE_LIMITED"}"#).await;

    assert_eq!(session.random().state(), RandomState::Paired);
    assert_eq!(session.random().status(), "Error received from server.");
    let last = session.random().transcript().last().unwrap();
    assert_eq!(last.content, "Something went wrong.");
}

#[tokio::test]
async fn malformed_frame_surfaces_notice_without_state_change() {
    let (mut session, _events, server) = new_session(Arc::new(MemoryStore::new()));
    let peer = paired(&mut session, &server).await;

    deliver(&mut session, &peer, "{not json").await;

    assert_eq!(session.random().state(), RandomState::Paired);
    let last = session.random().transcript().last().unwrap();
    assert!(last.system);
    assert_eq!(last.content, "Received malformed message from server.");
}

#[tokio::test]
async fn friend_request_handshake_navigates_to_friends() {
    let (mut session, mut events, server) = new_session(Arc::new(MemoryStore::new()));
    let mut peer = paired(&mut session, &server).await;

    session.request_friend().unwrap();
    assert_eq!(next_text(&mut peer).await, r#"{"type":"friend_request"}"#);
    assert_eq!(session.random().friend_request(), FriendRequestState::Pending);
    assert!(session.request_friend().is_err());

    drain(&mut events);
    deliver(&mut session, &peer, r#"{"type":"friend_request_success"}"#).await;
    assert_eq!(session.random().friend_request(), FriendRequestState::Success);
    assert!(drain(&mut events).contains(&SessionEvent::NavigateToFriends));
}

#[tokio::test]
async fn retryable_close_resets_match_but_keeps_transcript() {
    let store = Arc::new(MemoryStore::new());
    let (mut session, _events, server) = new_session(Arc::clone(&store));
    let peer = paired(&mut session, &server).await;
    deliver(&mut session, &peer, r#"{"type":"message_random","content":"hey"}"#).await;

    peer.close(4000).await.unwrap();
    assert!(session.process_next().await);

    assert_eq!(session.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(session.random().state(), RandomState::Idle);
    assert_eq!(session.random().transcript().len(), 2);
    assert_eq!(session.random().status(), "Disconnected. Tap to retry.");
    assert!(!store.contains(RANDOM_SESSION_KEY));
    assert!(!session.is_ended());
}

#[tokio::test]
async fn transcript_survives_restart_without_pairing() {
    let store = Arc::new(MemoryStore::new());
    {
        let (mut session, _events, server) = new_session(Arc::clone(&store));
        let peer = paired(&mut session, &server).await;
        deliver(&mut session, &peer, r#"{"type":"message_random","content":"still here?"}"#).await;
        // Process exits while paired; nothing else runs.
    }
    assert!(store.contains(RANDOM_SESSION_KEY));

    let (mut session, mut events, _server) = new_session(Arc::clone(&store));
    assert_eq!(session.restore_transcript(), 2);
    assert_eq!(session.random().state(), RandomState::Idle);
    assert_eq!(session.random().transcript()[1].content, "still here?");
    assert!(!store.contains(RANDOM_SESSION_KEY));

    let restored = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::RandomEvent(_)))
        .count();
    assert_eq!(restored, 2);
}

#[tokio::test]
async fn logout_clears_all_session_data() {
    let store = Arc::new(MemoryStore::new());
    let (mut session, mut events, server) = new_session(Arc::clone(&store));
    let mut peer = paired(&mut session, &server).await;
    assert_eq!(Credentials::load(store.as_ref()).unwrap(), Some(credentials()));

    session.logout();

    assert!(session.is_ended());
    assert_eq!(peer.recv().await, Some(Outgoing::Close));
    assert!(Credentials::load(store.as_ref()).unwrap().is_none());
    assert!(!store.contains(RANDOM_SESSION_KEY));
    assert!(drain(&mut events).contains(&SessionEvent::LoggedOut));
}
