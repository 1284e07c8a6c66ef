//! Integration tests for friend conversations.
//!
//! History comes from an in-process axum server that mimics the REST API:
//! `GET /messages/{friend}?page=n` returns the `n * 10` most recent
//! messages, newest first, and rejects any token but `jwt` with 401.
//! Live frames go through the loopback transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use whirl::api::ApiClient;
use whirl::event::SessionEvent;
use whirl::friends::{DeliveryState, MessageIdentity};
use whirl::session::{Credentials, Session, SessionConfig};
use whirl::storage::MemoryStore;
use whirl::transport::Outgoing;
use whirl::transport::loopback::{LoopbackConnector, LoopbackPeer, LoopbackServer};

use whirl_proto::history::{HistoryMessage, PAGE_SIZE};
use whirl_proto::message::UserId;

const ME: UserId = UserId::new(1);
const FRIEND: UserId = UserId::new(2);

// ---------------------------------------------------------------------------
// Mock REST API
// ---------------------------------------------------------------------------

/// Conversations by friend id, oldest first.
#[derive(Default)]
struct MockApi {
    threads: HashMap<u64, Vec<HistoryMessage>>,
}

#[derive(Deserialize)]
struct PageQuery {
    page: usize,
}

async fn messages(
    State(api): State<Arc<MockApi>>,
    Path(friend): Path<u64>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Bearer jwt");
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"status": 401, "error": "invalid token"})),
        )
            .into_response();
    }

    let thread = api.threads.get(&friend).cloned().unwrap_or_default();
    let newest_first: Vec<HistoryMessage> = thread
        .into_iter()
        .rev()
        .take(query.page * PAGE_SIZE)
        .collect();
    let messages = if newest_first.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::to_value(newest_first).unwrap()
    };
    Json(serde_json::json!({"status": 200, "messages": messages})).into_response()
}

async fn start_api(api: MockApi) -> String {
    let app = Router::new()
        .route("/messages/{friend}", get(messages))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(Arc::new(api));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn message(id: u64, sender: UserId, receiver: UserId, content: &str) -> HistoryMessage {
    HistoryMessage {
        id,
        sender,
        receiver,
        content: content.to_string(),
        timestamp: format!("2026-01-01T10:{:02}:00Z", id % 60),
    }
}

/// `count` alternating messages with ids `1..=count`.
fn thread(count: u64) -> Vec<HistoryMessage> {
    (1..=count)
        .map(|id| {
            let (from, to) = if id % 2 == 0 { (ME, FRIEND) } else { (FRIEND, ME) };
            message(id, from, to, &format!("message {id}"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

type TestSession = Session<LoopbackConnector, ApiClient, MemoryStore>;

fn new_session(
    base_url: &str,
    token: &str,
) -> (TestSession, mpsc::UnboundedReceiver<SessionEvent>, LoopbackServer) {
    let api = ApiClient::new(base_url, token, Duration::from_secs(5)).unwrap();
    let (connector, server) = LoopbackConnector::new();
    let config = SessionConfig {
        sent_delay: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let (session, events) = Session::new(
        Credentials {
            token: token.to_string(),
            user: ME,
        },
        config,
        connector,
        Arc::new(api),
        Arc::new(MemoryStore::new()),
    );
    (session, events, server)
}

async fn connect(session: &mut TestSession, server: &LoopbackServer) -> LoopbackPeer {
    session.connect();
    let peer = server.accept().await.unwrap();
    assert!(session.process_next().await);
    peer
}

fn ids(session: &TestSession, friend: UserId) -> Vec<u64> {
    session
        .friends()
        .conversation(friend)
        .unwrap()
        .messages()
        .iter()
        .filter_map(|m| match m.identity {
            MessageIdentity::Confirmed { id } => Some(id),
            MessageIdentity::Transient { .. } => None,
        })
        .collect()
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cumulative_pages_are_reduced_to_deltas() {
    let mut api = MockApi::default();
    api.threads.insert(FRIEND.get(), thread(20));
    let base = start_api(api).await;
    let (mut session, mut events, _server) = new_session(&base, "jwt");

    session.open_thread(FRIEND);
    assert!(session.friends().conversation(FRIEND).unwrap().is_loading());
    assert!(session.process_next().await);

    assert_eq!(ids(&session, FRIEND), (11..=20).collect::<Vec<_>>());
    let conv = session.friends().conversation(FRIEND).unwrap();
    assert_eq!(conv.page(), 1);
    assert!(conv.has_more());
    assert!(drain(&mut events).contains(&SessionEvent::ThreadUpdated { friend: FRIEND }));

    session.load_older(FRIEND);
    assert!(session.process_next().await);
    assert_eq!(ids(&session, FRIEND), (1..=20).collect::<Vec<_>>());
    assert!(drain(&mut events).contains(&SessionEvent::OlderLoaded {
        friend: FRIEND,
        added: 10,
        has_more: true,
    }));

    // Page 3 holds the same 20 messages: nothing new, history exhausted.
    session.load_older(FRIEND);
    assert!(session.process_next().await);
    assert_eq!(ids(&session, FRIEND), (1..=20).collect::<Vec<_>>());
    assert!(!session.friends().conversation(FRIEND).unwrap().has_more());
    assert!(drain(&mut events).contains(&SessionEvent::OlderLoaded {
        friend: FRIEND,
        added: 0,
        has_more: false,
    }));
}

#[tokio::test]
async fn exhausted_history_stops_fetching() {
    let mut api = MockApi::default();
    api.threads.insert(FRIEND.get(), thread(4));
    let base = start_api(api).await;
    let (mut session, _events, _server) = new_session(&base, "jwt");

    session.open_thread(FRIEND);
    assert!(session.process_next().await);
    assert_eq!(ids(&session, FRIEND), vec![1, 2, 3, 4]);
    assert!(!session.friends().conversation(FRIEND).unwrap().has_more());

    session.load_older(FRIEND);
    assert!(!session.friends().conversation(FRIEND).unwrap().is_loading());
    assert_eq!(session.process_ready(), 0);
}

#[tokio::test]
async fn empty_history_is_not_an_error() {
    let base = start_api(MockApi::default()).await;
    let (mut session, _events, _server) = new_session(&base, "jwt");

    session.open_thread(FRIEND);
    assert!(session.process_next().await);
    let conv = session.friends().conversation(FRIEND).unwrap();
    assert!(conv.messages().is_empty());
    assert!(!conv.has_more());
    assert!(!session.is_ended());
}

#[tokio::test]
async fn reopening_a_thread_does_not_refetch() {
    let mut api = MockApi::default();
    api.threads.insert(FRIEND.get(), thread(3));
    let base = start_api(api).await;
    let (mut session, _events, _server) = new_session(&base, "jwt");

    session.open_thread(FRIEND);
    session.open_thread(FRIEND);
    assert!(session.process_next().await);
    session.open_thread(FRIEND);
    assert_eq!(session.process_ready(), 0);
    assert_eq!(ids(&session, FRIEND), vec![1, 2, 3]);
}

#[tokio::test]
async fn live_message_is_not_duplicated_by_history() {
    let mut api = MockApi::default();
    api.threads
        .insert(FRIEND.get(), vec![message(5, FRIEND, ME, "yo")]);
    let base = start_api(api).await;
    let (mut session, _events, server) = new_session(&base, "jwt");
    let peer = connect(&mut session, &server).await;

    for _ in 0..2 {
        peer.push(r#"{"type":"direct_message","from":2,"content":"yo","id":5}"#)
            .await
            .unwrap();
        assert!(session.process_next().await);
    }
    assert_eq!(ids(&session, FRIEND), vec![5]);

    session.open_thread(FRIEND);
    assert!(session.process_next().await);
    assert_eq!(ids(&session, FRIEND), vec![5]);
}

#[tokio::test]
async fn sent_message_is_reconciled_with_history() {
    let mut api = MockApi::default();
    api.threads
        .insert(FRIEND.get(), vec![message(9, ME, FRIEND, "see you")]);
    let base = start_api(api).await;
    let (mut session, _events, server) = new_session(&base, "jwt");
    let mut peer = connect(&mut session, &server).await;

    session.send_direct(FRIEND, "see you").unwrap();
    assert_eq!(
        peer.recv().await,
        Some(Outgoing::Text(
            r#"{"type":"direct_message","to":2,"content":"see you"}"#.into()
        ))
    );

    session.open_thread(FRIEND);
    // The delivery timer and the page race; apply both.
    assert!(session.process_next().await);
    assert!(session.process_next().await);

    let conv = session.friends().conversation(FRIEND).unwrap();
    assert_eq!(conv.messages().len(), 1);
    assert_eq!(
        conv.messages()[0].identity,
        MessageIdentity::Confirmed { id: 9 }
    );
    assert_eq!(conv.messages()[0].delivery, Some(DeliveryState::Sent));
}

#[tokio::test]
async fn echo_with_id_confirms_local_message() {
    let base = start_api(MockApi::default()).await;
    let (mut session, _events, server) = new_session(&base, "jwt");
    let peer = connect(&mut session, &server).await;

    let token = session.send_direct(FRIEND, "ping").unwrap();
    peer.push(r#"{"type":"direct_message","from":1,"to":2,"content":"ping","id":41}"#)
        .await
        .unwrap();
    assert!(session.process_next().await);

    let conv = session.friends().conversation(FRIEND).unwrap();
    assert_eq!(conv.messages().len(), 1);
    assert_eq!(conv.messages()[0].identity, MessageIdentity::Confirmed { id: 41 });
    assert_eq!(conv.messages()[0].token, Some(token));
}

#[tokio::test(start_paused = true)]
async fn optimistic_send_goes_pending_then_sent() {
    let (mut session, mut events, server) = new_session("http://127.0.0.1:9", "jwt");
    let mut peer = connect(&mut session, &server).await;
    drain(&mut events);

    let token = session.send_direct(FRIEND, "  hello  ").unwrap();
    let conv = session.friends().conversation(FRIEND).unwrap();
    assert_eq!(conv.messages()[0].content, "hello");
    assert_eq!(conv.messages()[0].delivery, Some(DeliveryState::Pending));
    assert!(matches!(
        conv.messages()[0].identity,
        MessageIdentity::Transient { token: t, .. } if t == token
    ));
    assert!(matches!(peer.recv().await, Some(Outgoing::Text(_))));

    assert!(session.process_next().await);
    let conv = session.friends().conversation(FRIEND).unwrap();
    assert_eq!(conv.messages()[0].delivery, Some(DeliveryState::Sent));
    assert!(drain(&mut events).contains(&SessionEvent::DeliveryChanged {
        friend: FRIEND,
        token,
        state: DeliveryState::Sent,
    }));
}

#[tokio::test]
async fn send_without_socket_is_kept_as_failed() {
    let (mut session, _events, _server) = new_session("http://127.0.0.1:9", "jwt");

    assert!(session.send_direct(FRIEND, "   ").is_err());
    assert!(session.friends().conversation(FRIEND).is_none());

    assert!(session.send_direct(FRIEND, "anyone?").is_err());
    let conv = session.friends().conversation(FRIEND).unwrap();
    assert_eq!(conv.messages().len(), 1);
    assert_eq!(conv.messages()[0].delivery, Some(DeliveryState::Failed));
}

#[tokio::test]
async fn rejected_token_requires_reauthentication() {
    let mut api = MockApi::default();
    api.threads.insert(FRIEND.get(), thread(3));
    let base = start_api(api).await;
    let (mut session, mut events, _server) = new_session(&base, "expired");

    session.open_thread(FRIEND);
    assert!(session.process_next().await);

    assert!(session.is_ended());
    assert!(session.friends().conversation(FRIEND).is_none());
    assert!(drain(&mut events).contains(&SessionEvent::ReauthRequired {
        reason: "Your session has expired. Please log in again.".into(),
    }));
}

#[tokio::test]
async fn unreachable_api_reports_server_offline() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (mut session, mut events, _server) =
        new_session(&format!("http://127.0.0.1:{port}"), "jwt");

    session.open_thread(FRIEND);
    assert!(session.process_next().await);

    assert!(session.is_ended());
    assert!(drain(&mut events).contains(&SessionEvent::ReauthRequired {
        reason: "Server is offline. Please try again later.".into(),
    }));
}
