//! Persisted random-chat snapshot.
//!
//! One record under [`RANDOM_SESSION_KEY`] holding the transcript, the
//! pairing state and whether any chat happened. Written wholesale after
//! every mutation of a live session and removed as soon as the session
//! returns to idle.

use serde::{Deserialize, Serialize};

use crate::storage::{KeyValueStore, RANDOM_SESSION_KEY, StorageError};

use super::{RandomChatEvent, RandomState};

/// Durable form of a random-chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Transcript in arrival order.
    pub messages: Vec<RandomChatEvent>,
    /// Pairing state at the time of writing.
    pub random_state: RandomState,
    /// Whether the transcript ever held a chat event.
    #[serde(default)]
    pub had_chat: bool,
}

/// Write `snapshot`, replacing any previous one.
///
/// # Errors
///
/// Returns [`StorageError`] if the record cannot be written.
pub fn save<S: KeyValueStore>(store: &S, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
    store.put(RANDOM_SESSION_KEY, snapshot)
}

/// Read the stored snapshot, if any.
///
/// # Errors
///
/// Returns [`StorageError`] if the record exists but cannot be read.
pub fn load<S: KeyValueStore>(store: &S) -> Result<Option<SessionSnapshot>, StorageError> {
    store.get(RANDOM_SESSION_KEY)
}

/// Remove the stored snapshot.
///
/// # Errors
///
/// Returns [`StorageError`] if the record cannot be removed.
pub fn clear<S: KeyValueStore>(store: &S) -> Result<(), StorageError> {
    store.remove(RANDOM_SESSION_KEY)
}
