//! Queue store contract
//!
//! Everything the evaluator and the match lifecycles share goes through this
//! trait: the score-ordered waiting pool per queue, the per-match player
//! records and the per-player global state.

use crate::types::{MatchId, PlayerId, QueueType, Ticket, UserGlobalState};
use async_trait::async_trait;
use std::collections::HashMap;

/// Errors that can occur in the store
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or a command failed; safe to retry later
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded
    #[error("Corrupt value at {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Storage backing queues, match records and user states
#[async_trait]
pub trait QueueStore: Send + Sync {
    // ------------------------------------------------------------------------
    // Waiting pool
    // ------------------------------------------------------------------------

    /// Add a ticket, replacing any ticket the same player already has in this queue
    async fn enqueue(&self, queue: QueueType, ticket: &Ticket) -> StoreResult<()>;

    /// Remove one player's ticket; returns whether it was present
    async fn remove(&self, queue: QueueType, player_id: &str) -> StoreResult<bool>;

    /// Remove all given players in one atomic step.
    ///
    /// Returns `false` and removes nothing if any of them is no longer queued.
    async fn remove_all(&self, queue: QueueType, player_ids: &[PlayerId]) -> StoreResult<bool>;

    /// All waiting tickets ordered by score ascending
    async fn snapshot(&self, queue: QueueType) -> StoreResult<Vec<Ticket>>;

    // ------------------------------------------------------------------------
    // Per-match records (raw encoded values; decoding is the caller's concern)
    // ------------------------------------------------------------------------

    async fn hash_set(&self, match_id: &str, player_id: &str, record: &str) -> StoreResult<()>;

    /// Overwrite a record that is already stored.
    ///
    /// Returns `false` and writes nothing once the match or the player's record
    /// is gone, so a late write never brings a deleted match back.
    async fn hash_update(&self, match_id: &str, player_id: &str, record: &str) -> StoreResult<bool>;

    async fn hash_get(&self, match_id: &str, player_id: &str) -> StoreResult<Option<String>>;

    async fn hash_get_all(&self, match_id: &str) -> StoreResult<HashMap<PlayerId, String>>;

    /// Delete every record of a match in one step
    async fn hash_delete(&self, match_id: &str) -> StoreResult<()>;

    async fn match_exists(&self, match_id: &str) -> StoreResult<bool>;

    /// Ids of all matches that still have records
    async fn list_matches(&self) -> StoreResult<Vec<MatchId>>;

    // ------------------------------------------------------------------------
    // User global state
    // ------------------------------------------------------------------------

    async fn set_user_state(&self, player_id: &str, state: &UserGlobalState) -> StoreResult<()>;

    /// Current state, `NoState` when none is stored
    async fn get_user_state(&self, player_id: &str) -> StoreResult<UserGlobalState>;

    async fn clear_user_state(&self, player_id: &str) -> StoreResult<()>;

    /// Cheap connectivity check for health reporting
    async fn ping(&self) -> StoreResult<()>;
}
