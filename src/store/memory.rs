//! In-memory queue store
//!
//! Used for local runs and tests. A single lock guards all state, so every
//! operation is trivially atomic with respect to the others.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::traits::{QueueStore, StoreError, StoreResult};
use crate::types::{MatchId, PlayerId, QueueType, Ticket, UserGlobalState};

#[derive(Default)]
struct MemoryState {
    /// Tickets per queue, kept sorted by score ascending
    queues: HashMap<QueueType, Vec<Ticket>>,
    matches: HashMap<MatchId, HashMap<PlayerId, String>>,
    user_states: HashMap<PlayerId, UserGlobalState>,
}

/// In-memory implementation of `QueueStore`
#[derive(Default)]
pub struct InMemoryQueueStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of tickets waiting in a queue
    pub async fn queue_len(&self, queue: QueueType) -> usize {
        let state = self.state.read().await;
        state.queues.get(&queue).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, queue: QueueType, ticket: &Ticket) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let tickets = state.queues.entry(queue).or_default();
        tickets.retain(|t| t.player_id != ticket.player_id);
        let position = tickets.partition_point(|t| t.score <= ticket.score);
        tickets.insert(position, ticket.clone());
        debug!(
            "Enqueued '{}' in {} with score {}",
            ticket.player_id, queue, ticket.score
        );
        Ok(())
    }

    async fn remove(&self, queue: QueueType, player_id: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(tickets) = state.queues.get_mut(&queue) else {
            return Ok(false);
        };
        let before = tickets.len();
        tickets.retain(|t| t.player_id != player_id);
        Ok(tickets.len() != before)
    }

    async fn remove_all(&self, queue: QueueType, player_ids: &[PlayerId]) -> StoreResult<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(tickets) = state.queues.get_mut(&queue) else {
            return Ok(player_ids.is_empty());
        };
        let all_present = player_ids
            .iter()
            .all(|id| tickets.iter().any(|t| &t.player_id == id));
        if !all_present {
            return Ok(false);
        }
        tickets.retain(|t| !player_ids.contains(&t.player_id));
        Ok(true)
    }

    async fn snapshot(&self, queue: QueueType) -> StoreResult<Vec<Ticket>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.queues.get(&queue).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, match_id: &str, player_id: &str, record: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state
            .matches
            .entry(match_id.to_string())
            .or_default()
            .insert(player_id.to_string(), record.to_string());
        Ok(())
    }

    async fn hash_update(&self, match_id: &str, player_id: &str, record: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(existing) = state
            .matches
            .get_mut(match_id)
            .and_then(|records| records.get_mut(player_id))
        else {
            return Ok(false);
        };
        *existing = record.to_string();
        Ok(true)
    }

    async fn hash_get(&self, match_id: &str, player_id: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .matches
            .get(match_id)
            .and_then(|records| records.get(player_id))
            .cloned())
    }

    async fn hash_get_all(&self, match_id: &str) -> StoreResult<HashMap<PlayerId, String>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.matches.get(match_id).cloned().unwrap_or_default())
    }

    async fn hash_delete(&self, match_id: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.matches.remove(match_id);
        Ok(())
    }

    async fn match_exists(&self, match_id: &str) -> StoreResult<bool> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.matches.contains_key(match_id))
    }

    async fn list_matches(&self) -> StoreResult<Vec<MatchId>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.matches.keys().cloned().collect())
    }

    async fn set_user_state(&self, player_id: &str, user_state: &UserGlobalState) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state
            .user_states
            .insert(player_id.to_string(), user_state.clone());
        Ok(())
    }

    async fn get_user_state(&self, player_id: &str) -> StoreResult<UserGlobalState> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .user_states
            .get(player_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_user_state(&self, player_id: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.user_states.remove(player_id);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserState;

    fn ticket(id: &str, score: f64) -> Ticket {
        Ticket::new(id, score, format!("0x{}", id))
    }

    #[tokio::test]
    async fn test_snapshot_is_score_ordered() {
        let store = InMemoryQueueStore::new();
        for (id, score) in [("c", 1500.0), ("a", 1000.0), ("b", 1200.0)] {
            store.enqueue(QueueType::Cs2, &ticket(id, score)).await.unwrap();
        }

        let ids: Vec<_> = store
            .snapshot(QueueType::Cs2)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.player_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_enqueue_replaces_existing_ticket() {
        let store = InMemoryQueueStore::new();
        store.enqueue(QueueType::Cs2, &ticket("a", 1000.0)).await.unwrap();
        store.enqueue(QueueType::Cs2, &ticket("a", 1300.0)).await.unwrap();

        let snapshot = store.snapshot(QueueType::Cs2).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].score, 1300.0);
    }

    #[tokio::test]
    async fn test_remove_all_is_all_or_nothing() {
        let store = InMemoryQueueStore::new();
        store.enqueue(QueueType::Dota2, &ticket("a", 1000.0)).await.unwrap();
        store.enqueue(QueueType::Dota2, &ticket("b", 1010.0)).await.unwrap();

        let ids = vec!["a".to_string(), "gone".to_string()];
        assert!(!store.remove_all(QueueType::Dota2, &ids).await.unwrap());
        assert_eq!(store.queue_len(QueueType::Dota2).await, 2);

        let ids = vec!["a".to_string(), "b".to_string()];
        assert!(store.remove_all(QueueType::Dota2, &ids).await.unwrap());
        assert_eq!(store.queue_len(QueueType::Dota2).await, 0);
    }

    #[tokio::test]
    async fn test_match_records_and_listing() {
        let store = InMemoryQueueStore::new();
        store.hash_set("match_1", "a", "{}").await.unwrap();
        store.hash_set("match_1", "b", "{}").await.unwrap();

        assert!(store.match_exists("match_1").await.unwrap());
        assert_eq!(store.hash_get_all("match_1").await.unwrap().len(), 2);
        assert_eq!(store.list_matches().await.unwrap(), vec!["match_1".to_string()]);

        store.hash_delete("match_1").await.unwrap();
        assert!(!store.match_exists("match_1").await.unwrap());
        assert!(store.hash_get("match_1", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_after_delete_leaves_match_gone() {
        let store = InMemoryQueueStore::new();
        store.hash_set("match_1", "a", "{}").await.unwrap();

        assert!(store.hash_update("match_1", "a", "{\"v\":1}").await.unwrap());
        assert_eq!(
            store.hash_get("match_1", "a").await.unwrap().as_deref(),
            Some("{\"v\":1}")
        );
        assert!(!store.hash_update("match_1", "b", "{}").await.unwrap());

        store.hash_delete("match_1").await.unwrap();
        assert!(!store.hash_update("match_1", "a", "{}").await.unwrap());
        assert!(!store.match_exists("match_1").await.unwrap());
        assert!(store.list_matches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_state_defaults_to_no_state() {
        let store = InMemoryQueueStore::new();
        assert_eq!(
            store.get_user_state("nobody").await.unwrap().state,
            UserState::NoState
        );

        store
            .set_user_state("a", &UserGlobalState::rejoin_queue())
            .await
            .unwrap();
        assert_eq!(
            store.get_user_state("a").await.unwrap().state,
            UserState::RejoinQueue
        );
        store.clear_user_state("a").await.unwrap();
        assert_eq!(store.get_user_state("a").await.unwrap().state, UserState::NoState);
    }

    #[test]
    fn test_unavailable_store_fails_every_call() {
        let store = InMemoryQueueStore::new();
        store.set_unavailable(true);
        let result = tokio_test::block_on(store.snapshot(QueueType::Cs2));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(tokio_test::block_on(store.ping()).is_err());

        store.set_unavailable(false);
        tokio_test::assert_ok!(tokio_test::block_on(store.ping()));
    }
}
