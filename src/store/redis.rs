//! Redis queue store
//!
//! Layout (all keys under the configured prefix):
//! - `<prefix>:players_<queue>`   sorted set, member = player id, score = skill
//! - `<prefix>:tickets:<queue>`   hash, player id -> ticket JSON
//! - `<prefix>:match:<id>`        hash, player id -> match record JSON
//! - `<prefix>:matches`           set of match ids that still have records
//! - `<prefix>:user_state`        hash, player id -> user state JSON

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::store::traits::{QueueStore, StoreError, StoreResult};
use crate::types::{MatchId, PlayerId, QueueType, Ticket, UserGlobalState};

/// Removes every listed member from the score set and the payload hash,
/// or nothing at all if any member is missing.
const REMOVE_ALL_SCRIPT: &str = r#"
for _, member in ipairs(ARGV) do
    if redis.call('ZSCORE', KEYS[1], member) == false then
        return 0
    end
end
if #ARGV > 0 then
    redis.call('ZREM', KEYS[1], unpack(ARGV))
    redis.call('HDEL', KEYS[2], unpack(ARGV))
end
return 1
"#;

/// Overwrites a player's record only while the match hash still holds it.
const UPDATE_RECORD_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Redis implementation of `QueueStore`
pub struct RedisQueueStore {
    conn: ConnectionManager,
    key_prefix: String,
    remove_all_script: redis::Script,
    update_record_script: redis::Script,
}

impl RedisQueueStore {
    /// Connect to Redis and build the store
    pub async fn connect(url: &str, key_prefix: &str) -> StoreResult<Self> {
        info!("Connecting to Redis at {}", url);
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::with_connection(conn, key_prefix))
    }

    pub fn with_connection(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
            remove_all_script: redis::Script::new(REMOVE_ALL_SCRIPT),
            update_record_script: redis::Script::new(UPDATE_RECORD_SCRIPT),
        }
    }

    fn index_key(&self, queue: QueueType) -> String {
        format!("{}:{}", self.key_prefix, queue.index_name())
    }

    fn tickets_key(&self, queue: QueueType) -> String {
        format!("{}:tickets:{}", self.key_prefix, queue)
    }

    fn match_key(&self, match_id: &str) -> String {
        format!("{}:match:{}", self.key_prefix, match_id)
    }

    fn matches_key(&self) -> String {
        format!("{}:matches", self.key_prefix)
    }

    fn user_state_key(&self) -> String {
        format!("{}:user_state", self.key_prefix)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, queue: QueueType, ticket: &Ticket) -> StoreResult<()> {
        let payload = serde_json::to_string(ticket)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .zadd(self.index_key(queue), &ticket.player_id, ticket.score)
            .ignore()
            .hset(self.tickets_key(queue), &ticket.player_id, payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, queue: QueueType, player_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let (removed,): (i64,) = redis::pipe()
            .atomic()
            .zrem(self.index_key(queue), player_id)
            .hdel(self.tickets_key(queue), player_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn remove_all(&self, queue: QueueType, player_ids: &[PlayerId]) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.remove_all_script.prepare_invoke();
        invocation
            .key(self.index_key(queue))
            .key(self.tickets_key(queue));
        for player_id in player_ids {
            invocation.arg(player_id);
        }
        let removed: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(removed == 1)
    }

    async fn snapshot(&self, queue: QueueType) -> StoreResult<Vec<Ticket>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrange_withscores(self.index_key(queue), 0, -1).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&String> = entries.iter().map(|(id, _)| id).collect();
        let payloads: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.tickets_key(queue))
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let tickets = entries
            .iter()
            .zip(payloads)
            .map(|((player_id, score), payload)| {
                let decoded = payload.and_then(|raw| match serde_json::from_str::<Ticket>(&raw) {
                    Ok(ticket) => Some(ticket),
                    Err(e) => {
                        warn!("Unreadable ticket payload for '{}' in {}: {}", player_id, queue, e);
                        None
                    }
                });
                // The sorted set is authoritative for identity and score.
                let mut ticket = decoded.unwrap_or_else(|| Ticket::new(player_id.clone(), *score, ""));
                ticket.player_id = player_id.clone();
                ticket.score = *score;
                ticket
            })
            .collect();
        Ok(tickets)
    }

    async fn hash_set(&self, match_id: &str, player_id: &str, record: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(self.match_key(match_id), player_id, record)
            .ignore()
            .sadd(self.matches_key(), match_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn hash_update(&self, match_id: &str, player_id: &str, record: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .update_record_script
            .key(self.match_key(match_id))
            .arg(player_id)
            .arg(record)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn hash_get(&self, match_id: &str, player_id: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let record: Option<String> = conn.hget(self.match_key(match_id), player_id).await?;
        Ok(record)
    }

    async fn hash_get_all(&self, match_id: &str) -> StoreResult<HashMap<PlayerId, String>> {
        let mut conn = self.conn.clone();
        let records: HashMap<String, String> = conn.hgetall(self.match_key(match_id)).await?;
        Ok(records)
    }

    async fn hash_delete(&self, match_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(self.match_key(match_id))
            .ignore()
            .srem(self.matches_key(), match_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn match_exists(&self, match_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.match_key(match_id)).await?;
        Ok(exists)
    }

    async fn list_matches(&self) -> StoreResult<Vec<MatchId>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(self.matches_key()).await?;
        Ok(ids)
    }

    async fn set_user_state(&self, player_id: &str, state: &UserGlobalState) -> StoreResult<()> {
        let payload = serde_json::to_string(state)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(self.user_state_key(), player_id, payload).await?;
        Ok(())
    }

    async fn get_user_state(&self, player_id: &str) -> StoreResult<UserGlobalState> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.user_state_key(), player_id).await?;
        match raw {
            None => Ok(UserGlobalState::default()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: format!("{}/{}", self.user_state_key(), player_id),
                message: e.to_string(),
            }),
        }
    }

    async fn clear_user_state(&self, player_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(self.user_state_key(), player_id).await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
