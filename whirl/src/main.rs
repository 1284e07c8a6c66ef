//! Whirl — random-match and friend chat in the terminal.
//!
//! A line-oriented front end over the session engine. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/whirl/config.toml`).
//!
//! ```bash
//! cargo run --bin whirl -- --api-url http://localhost:8080 \
//!     --token "$JWT" --user-id 7
//! ```
//!
//! Commands: `/connect`, `/join`, `/leave`, `/friend`, `/open <id>`,
//! `/older <id>`, `/dm <id> <text>`, `/logout`, `/quit`. Any other line is
//! sent to the current random partner.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use whirl::api::ApiClient;
use whirl::config::{CliArgs, ClientConfig};
use whirl::event::SessionEvent;
use whirl::format::format_local;
use whirl::friends::{DeliveryState, FriendChatStore};
use whirl::random::RandomChatEvent;
use whirl::session::{Credentials, Intent, Session};
use whirl::storage::FileStore;
use whirl::transport::websocket::WebSocketConnector;
use whirl_proto::message::UserId;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(api_url = %config.api_url, "whirl starting");

    let store = Arc::new(FileStore::new(&config.data_dir));
    let credentials = match config.credentials() {
        Some(c) => Some(c),
        None => Credentials::load(store.as_ref()).unwrap_or_else(|e| {
            tracing::warn!(err = %e, "stored credentials unreadable");
            None
        }),
    };
    let Some(credentials) = credentials else {
        eprintln!("Not logged in. Pass --token and --user-id (or set WHIRL_TOKEN / WHIRL_USER_ID).");
        return ExitCode::FAILURE;
    };

    let api = match ApiClient::new(&config.api_url, &credentials.token, config.request_timeout) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Invalid API URL: {e}");
            return ExitCode::FAILURE;
        }
    };
    let socket_url = match api.websocket_url() {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid socket URL: {e}");
            return ExitCode::FAILURE;
        }
    };

    let connector = WebSocketConnector::new(socket_url, config.connect_timeout);
    let (session, events) = Session::new(
        credentials,
        config.session_config(),
        connector,
        Arc::new(api),
        store,
    );

    let code = run_repl(session, events, config.channel_capacity).await;
    tracing::info!("whirl exiting");
    code
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never interleave with the chat on stdout.
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("whirl.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

type CliSession = Session<WebSocketConnector, ApiClient, FileStore>;

/// Forward stdin lines as intents until EOF.
async fn read_intents(tx: mpsc::Sender<Intent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let intent = match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(intent)) => intent,
                Ok(None) => continue,
                Err(usage) => {
                    println!("{usage}");
                    continue;
                }
            },
            Ok(None) => Intent::Shutdown,
            Err(e) => {
                tracing::warn!(err = %e, "stdin read failed");
                Intent::Shutdown
            }
        };
        let last = intent == Intent::Shutdown;
        if tx.send(intent).await.is_err() || last {
            return;
        }
    }
}

/// Main loop: intents from stdin in, session events out.
async fn run_repl(
    mut session: CliSession,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    capacity: usize,
) -> ExitCode {
    let restored = session.restore_transcript();
    if restored > 0 {
        println!("-- restored {restored} lines from your last random chat --");
    }
    session.connect();

    let (intents_tx, mut intents) = mpsc::channel(capacity.max(1));
    tokio::spawn(read_intents(intents_tx));

    loop {
        tokio::select! {
            Some(intent) = intents.recv() => {
                if !session.dispatch(intent) {
                    break;
                }
            }
            Some(event) = events.recv() => {
                let ended = matches!(
                    event,
                    SessionEvent::LoggedOut | SessionEvent::ReauthRequired { .. }
                );
                print_event(&session, event);
                if ended {
                    return ExitCode::FAILURE;
                }
            }
            alive = session.process_next() => {
                if !alive {
                    break;
                }
            }
        }
    }

    // Flush whatever the shutdown produced.
    while let Ok(event) = events.try_recv() {
        print_event(&session, event);
    }
    ExitCode::SUCCESS
}

/// Turn one input line into an intent.
///
/// `Ok(None)` for blank lines, `Err(usage)` for malformed commands.
fn parse_line(line: &str) -> Result<Option<Intent>, &'static str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Intent::SendRandom(line.to_string())));
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let intent = match name {
        "connect" => Intent::Connect,
        "join" => Intent::JoinQueue,
        "leave" => Intent::LeaveQueue,
        "friend" => Intent::RequestFriend,
        "open" => Intent::OpenThread(parse_user(rest).ok_or("usage: /open <user-id>")?),
        "older" => Intent::LoadOlder(parse_user(rest).ok_or("usage: /older <user-id>")?),
        "dm" => {
            let (to, content) = rest.split_once(' ').ok_or("usage: /dm <user-id> <text>")?;
            Intent::SendDirect {
                to: parse_user(to).ok_or("usage: /dm <user-id> <text>")?,
                content: content.to_string(),
            }
        }
        "logout" => Intent::Logout,
        "quit" | "exit" => Intent::Shutdown,
        _ => {
            return Err(
                "commands: /connect /join /leave /friend /open <id> /older <id> /dm <id> <text> /logout /quit",
            );
        }
    };
    Ok(Some(intent))
}

fn parse_user(raw: &str) -> Option<UserId> {
    raw.trim().parse().ok().map(UserId::new)
}

fn print_event(session: &CliSession, event: SessionEvent) {
    match event {
        SessionEvent::Connection(status) => println!("[socket] {status}"),
        SessionEvent::Status(text) => println!("[status] {text}"),
        SessionEvent::RandomEvent(event) => print_random(&event),
        SessionEvent::RandomCleared => println!("-- random chat cleared --"),
        SessionEvent::RandomStateChanged {
            state,
            friend_request,
        } => tracing::debug!(?state, ?friend_request, "random state"),
        SessionEvent::NavigateToFriends => {
            println!("[friends] New friend added. Use /open <id> to chat.");
        }
        SessionEvent::ThreadUpdated { friend } => {
            print_thread(session.friends(), friend, usize::MAX);
        }
        SessionEvent::OlderLoaded {
            friend,
            added,
            has_more,
        } => {
            println!("-- {added} older messages with {friend} --");
            print_thread(session.friends(), friend, added);
            if !has_more {
                println!("-- beginning of conversation --");
            }
        }
        SessionEvent::DeliveryChanged {
            friend,
            token,
            state,
        } => match state {
            DeliveryState::Failed => println!("[dm {friend}] message {token} failed to send"),
            DeliveryState::Pending | DeliveryState::Sent => {
                tracing::debug!(%friend, %token, ?state, "delivery");
            }
        },
        SessionEvent::LoggedOut => println!("Logged out."),
        SessionEvent::ReauthRequired { reason } => println!("{reason}"),
    }
}

fn print_random(event: &RandomChatEvent) {
    let when = chrono::DateTime::from_timestamp_millis(event.timestamp)
        .map(|t| format_local(&t.to_rfc3339()))
        .unwrap_or_default();
    if event.system {
        println!("* {}", event.content);
    } else if event.from_self {
        println!("{when} you: {}", event.content);
    } else {
        println!("{when} stranger: {}", event.content);
    }
}

/// Print the first `limit` (oldest) messages of a thread.
fn print_thread<F: whirl::api::HistoryFetcher>(
    store: &FriendChatStore<F>,
    friend: UserId,
    limit: usize,
) {
    let Some(conv) = store.conversation(friend) else {
        return;
    };
    for msg in conv.messages().iter().take(limit) {
        let marker = match msg.delivery {
            Some(DeliveryState::Pending) => " (sending)",
            Some(DeliveryState::Failed) => " (failed)",
            Some(DeliveryState::Sent) | None => "",
        };
        let who = if msg.sender == friend {
            friend.to_string()
        } else {
            "you".to_string()
        };
        println!(
            "[dm {friend}] {} {who}: {}{marker}",
            format_local(&msg.timestamp),
            msg.content
        );
    }
}
