//! Player-facing ticket operations
//!
//! These are the calls a transport layer makes on behalf of a connected
//! player: joining and leaving queues, answering a match prompt, submitting a
//! payment and cleaning up after a disconnect.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::store::QueueStore;
use crate::types::{
    Acceptance, CompatibilityData, MatchPlayerRecord, PlayerId, QueueType, Ticket,
    UserGlobalState, UserState,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A request to join a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub player_id: PlayerId,
    pub score: f64,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub compatibility: Option<CompatibilityData>,
}

impl TicketRequest {
    pub fn new(player_id: impl Into<PlayerId>, score: f64) -> Self {
        Self {
            player_id: player_id.into(),
            score,
            wallet_address: String::new(),
            compatibility: None,
        }
    }

    pub fn with_wallet(mut self, wallet_address: impl Into<String>) -> Self {
        self.wallet_address = wallet_address.into();
        self
    }

    pub fn with_compatibility(mut self, compatibility: CompatibilityData) -> Self {
        self.compatibility = Some(compatibility);
        self
    }

    fn validate(&self, queue: QueueType) -> Result<()> {
        let invalid = |reason: &str| -> anyhow::Error {
            MatchmakingError::InvalidTicket {
                reason: reason.to_string(),
            }
            .into()
        };

        if self.player_id.trim().is_empty() {
            return Err(invalid("player id is empty"));
        }
        if !self.score.is_finite() || self.score < 0.0 {
            return Err(invalid("score must be a finite, non-negative number"));
        }
        if queue.requires_compatibility() && self.compatibility.is_none() {
            return Err(invalid("this queue requires time, increment and collateral"));
        }
        Ok(())
    }
}

pub struct TicketService {
    store: Arc<dyn QueueStore>,
    queues: Vec<QueueType>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TicketService {
    pub fn new(store: Arc<dyn QueueStore>, queues: Vec<QueueType>) -> Self {
        Self {
            store,
            queues,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn ensure_enabled(&self, queue: QueueType) -> Result<()> {
        if self.queues.contains(&queue) {
            Ok(())
        } else {
            Err(MatchmakingError::UnknownQueue {
                queue: queue.to_string(),
            }
            .into())
        }
    }

    /// Validate and enqueue a ticket; re-submitting replaces the previous one
    pub async fn submit_ticket(&self, queue: QueueType, request: TicketRequest) -> Result<Ticket> {
        self.ensure_enabled(queue)?;
        request.validate(queue)?;

        let state = self.store.get_user_state(&request.player_id).await?;
        if state.is_in_match() {
            return Err(MatchmakingError::AlreadyInMatch {
                player_id: request.player_id,
                match_id: state.match_id.unwrap_or_default(),
            }
            .into());
        }

        let mut ticket = Ticket::new(request.player_id, request.score, request.wallet_address);
        if let Some(compatibility) = request.compatibility {
            ticket = ticket.with_compatibility(compatibility);
        }
        self.store.enqueue(queue, &ticket).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_ticket_submitted(queue);
        }
        info!(
            "Player '{}' joined {} with score {}",
            ticket.player_id, queue, ticket.score
        );
        Ok(ticket)
    }

    pub async fn leave_queue(&self, queue: QueueType, player_id: &str) -> Result<bool> {
        let removed = self.store.remove(queue, player_id).await?;
        if removed {
            info!("Player '{}' left {}", player_id, queue);
        }
        Ok(removed)
    }

    /// Waiting tickets ordered by score
    pub async fn list_tickets(&self, queue: QueueType) -> Result<Vec<Ticket>> {
        self.ensure_enabled(queue)?;
        Ok(self.store.snapshot(queue).await?)
    }

    /// Record a player's answer to a match prompt
    pub async fn respond_to_match(
        &self,
        match_id: &str,
        player_id: &str,
        accept: bool,
    ) -> Result<MatchPlayerRecord> {
        let mut record = self.load_record(match_id, player_id).await?;
        let answer = if accept {
            Acceptance::Accepted
        } else {
            Acceptance::Declined
        };

        if record.acceptance == answer {
            debug!(
                "Player '{}' repeated answer {:?} for {}",
                player_id, answer, match_id
            );
            return Ok(record);
        }
        if record.acceptance != Acceptance::Pending {
            return Err(MatchmakingError::InvalidResponse {
                reason: format!("answer for {} was already {:?}", match_id, record.acceptance),
            }
            .into());
        }

        record.acceptance = answer;
        self.write_record(match_id, &record).await?;

        if accept {
            let current = self.store.get_user_state(player_id).await?;
            if current.state == UserState::MatchFound
                && current.match_id.as_deref() == Some(match_id)
            {
                let expiry = current.expiry_time.unwrap_or_else(chrono::Utc::now);
                let accepted = UserGlobalState::in_match(UserState::MatchAccepted, match_id, expiry);
                self.store.set_user_state(player_id, &accepted).await?;
            }
        }

        info!("Player '{}' answered {:?} for {}", player_id, answer, match_id);
        Ok(record)
    }

    /// Attach a transaction hash to an accepted player's record
    pub async fn submit_payment(&self, match_id: &str, player_id: &str, txn_hash: &str) -> Result<()> {
        if txn_hash.trim().is_empty() {
            return Err(MatchmakingError::InvalidResponse {
                reason: "transaction hash is empty".to_string(),
            }
            .into());
        }

        let mut record = self.load_record(match_id, player_id).await?;
        if record.acceptance != Acceptance::Accepted {
            return Err(MatchmakingError::InvalidResponse {
                reason: format!("player '{}' has not accepted {}", player_id, match_id),
            }
            .into());
        }

        record.txn_hash = Some(txn_hash.to_string());
        self.write_record(match_id, &record).await?;
        info!("Player '{}' submitted payment for {}", player_id, match_id);
        Ok(())
    }

    /// Drop a disconnected player's ticket. Players inside a lifecycle keep
    /// their state; the lifecycle resolves them.
    pub async fn handle_disconnect(&self, queue: QueueType, player_id: &str) -> Result<bool> {
        let removed = self.store.remove(queue, player_id).await?;
        let state = self.store.get_user_state(player_id).await?;
        if state.is_in_match() {
            debug!(
                "Player '{}' disconnected during {:?}",
                player_id, state.match_id
            );
        } else {
            self.store.clear_user_state(player_id).await?;
        }
        if removed {
            info!("Removed disconnected player '{}' from {}", player_id, queue);
        }
        Ok(removed)
    }

    pub async fn user_state(&self, player_id: &str) -> Result<UserGlobalState> {
        Ok(self.store.get_user_state(player_id).await?)
    }

    /// The match may have been resolved since the record was read
    async fn write_record(&self, match_id: &str, record: &MatchPlayerRecord) -> Result<()> {
        let written = self
            .store
            .hash_update(match_id, &record.player_id, &record.to_json()?)
            .await?;
        if !written {
            debug!(
                "Match {} ended before '{}' could be updated",
                match_id, record.player_id
            );
            return Err(MatchmakingError::MatchNotFound {
                match_id: match_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn load_record(&self, match_id: &str, player_id: &str) -> Result<MatchPlayerRecord> {
        if !self.store.match_exists(match_id).await? {
            return Err(MatchmakingError::MatchNotFound {
                match_id: match_id.to_string(),
            }
            .into());
        }
        let Some(raw) = self.store.hash_get(match_id, player_id).await? else {
            return Err(MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into());
        };
        MatchPlayerRecord::from_json(&raw).map_err(|e| {
            warn!("Unreadable record for '{}' in {}: {}", player_id, match_id, e);
            MatchmakingError::InternalError {
                message: format!("record for '{}' could not be read", player_id),
            }
            .into()
        })
    }
}
