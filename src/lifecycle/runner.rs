//! Per-match lifecycle
//!
//! A `MatchLifecycle` drives one committed candidate from formation to a
//! terminal state. Player answers and payments arrive through the store, so
//! every phase is a poll over the match records. The roster held here is only
//! a fallback for rollback when the records cannot be read back.

use super::state::{
    acceptance_progress, disposition, unpaid_players, AcceptanceProgress, Disposition, MatchState,
    REASON_REQUEUE_FAILED, REASON_UNREADABLE,
};
use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::ports::{EventType, MatchPorts};
use crate::store::{QueueStore, StoreResult};
use crate::types::{
    Acceptance, MatchCandidate, MatchId, MatchPlayerRecord, PlayerId, QueueType, Team, Ticket,
    UserGlobalState, UserState,
};
use crate::utils::deadline_after;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Timing knobs for a lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub accept_timeout: Duration,
    pub payment_timeout: Duration,
    pub poll_interval: Duration,
    /// Payment is verified on every n-th poll of the payment phase
    pub payment_check_every: u32,
    pub external_call_timeout: Duration,
    pub max_store_retries: u32,
    pub store_retry_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from(&MatchmakingSettings::default())
    }
}

impl From<&MatchmakingSettings> for LifecycleConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            accept_timeout: settings.accept_timeout(),
            payment_timeout: settings.payment_timeout(),
            poll_interval: settings.poll_interval(),
            payment_check_every: settings.payment_check_every,
            external_call_timeout: settings.external_call_timeout(),
            max_store_retries: 3,
            store_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Decoded match records, in roster order
#[derive(Debug, Default)]
struct RecordSnapshot {
    records: Vec<MatchPlayerRecord>,
    /// Roster players whose record is missing or undecodable
    unreadable: Vec<PlayerId>,
}

pub struct MatchLifecycle {
    match_id: MatchId,
    queue: QueueType,
    team_a: Vec<Ticket>,
    team_b: Vec<Ticket>,
    quality: f64,
    state: MatchState,
    deadline: DateTime<Utc>,
    payment_polls: u32,
    /// Whether the records were written; rollback before that uses the roster
    initialized: bool,
    store: Arc<dyn QueueStore>,
    ports: MatchPorts,
    config: LifecycleConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchLifecycle {
    pub fn new(
        candidate: MatchCandidate,
        store: Arc<dyn QueueStore>,
        ports: MatchPorts,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            match_id: candidate.match_id,
            queue: candidate.queue,
            team_a: candidate.team_a,
            team_b: candidate.team_b,
            quality: candidate.quality,
            state: MatchState::Formed,
            deadline: Utc::now(),
            payment_polls: 0,
            initialized: false,
            store,
            ports,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rebuild a lifecycle from the records left in the store.
    ///
    /// The phase and its deadline come from the players' global states. Returns
    /// `None` when nothing is left to resume.
    pub async fn resume(
        match_id: &str,
        store: Arc<dyn QueueStore>,
        ports: MatchPorts,
        config: LifecycleConfig,
    ) -> Result<Option<Self>> {
        let raw = store.hash_get_all(match_id).await?;
        if raw.is_empty() {
            return Ok(None);
        }

        let mut records = Vec::new();
        let mut unreadable = Vec::new();
        for (player_id, value) in raw {
            match MatchPlayerRecord::from_json(&value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(
                        "Unreadable record for '{}' in match {}: {}",
                        player_id, match_id, e
                    );
                    unreadable.push(player_id);
                }
            }
        }

        for player_id in &unreadable {
            store.clear_user_state(player_id).await?;
            let payload = json!({ "matchId": match_id, "message": REASON_UNREADABLE });
            if let Err(e) = ports
                .notifier
                .notify(player_id, EventType::Removed, payload)
                .await
            {
                warn!("Could not notify '{}' about match {}: {}", player_id, match_id, e);
            }
        }

        let Some(queue) = records.first().map(|r| r.queue) else {
            store.hash_delete(match_id).await?;
            return Ok(None);
        };

        records.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });

        let mut phase = MatchState::AwaitingAcceptance;
        let mut deadline: Option<DateTime<Utc>> = None;
        let mut pinned = 0;
        for record in &records {
            let state = store.get_user_state(&record.player_id).await?;
            if state.match_id.as_deref() != Some(match_id) {
                continue;
            }
            pinned += 1;
            if matches!(state.state, UserState::PaymentPending | UserState::Paid) {
                phase = MatchState::AwaitingPayment;
            }
            if let Some(expiry) = state.expiry_time {
                deadline = Some(deadline.map_or(expiry, |d| d.max(expiry)));
            }
        }

        // Every player already moved on; the records are leftovers
        if pinned == 0 && unreadable.is_empty() {
            warn!(
                "Discarding match {}: none of its {} players is still in it",
                match_id,
                records.len()
            );
            store.hash_delete(match_id).await?;
            return Ok(None);
        }

        let state = if unreadable.is_empty() {
            phase
        } else {
            MatchState::Aborted
        };
        info!(
            "Resuming match {} in {} at {} with {} players",
            match_id,
            queue,
            state,
            records.len()
        );

        let ticket_for = |team: Team| -> Vec<Ticket> {
            records
                .iter()
                .filter(|r| r.team == team)
                .map(MatchPlayerRecord::to_ticket)
                .collect()
        };

        Ok(Some(Self {
            match_id: match_id.to_string(),
            queue,
            team_a: ticket_for(Team::A),
            team_b: ticket_for(Team::B),
            quality: 0.0,
            state,
            deadline: deadline.unwrap_or_else(Utc::now),
            payment_polls: 0,
            initialized: true,
            store,
            ports,
            config,
            metrics: None,
        }))
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Deadline of the current phase
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Drive the match to a terminal state, rolling back on failure
    pub async fn run(mut self) -> MatchState {
        debug!(
            "Lifecycle for match {} in {} starting at {}",
            self.match_id, self.queue, self.state
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        if self.state == MatchState::Formed {
            self.state = self.initialize().await;
        }

        while !self.state.is_terminal() {
            ticker.tick().await;
            let next = match self.state {
                MatchState::Formed => self.initialize().await,
                MatchState::AwaitingAcceptance => self.poll_acceptance().await,
                MatchState::AwaitingPayment => self.poll_payment().await,
                MatchState::Scheduling => self.schedule().await,
                terminal => terminal,
            };
            if next != self.state {
                info!("Match {}: {} -> {}", self.match_id, self.state, next);
            }
            self.state = next;
        }

        if self.state.is_rollback() {
            self.rollback(self.state).await;
        }
        self.state
    }

    fn roster(&self) -> impl Iterator<Item = (Team, &Ticket)> {
        self.team_a
            .iter()
            .map(|t| (Team::A, t))
            .chain(self.team_b.iter().map(|t| (Team::B, t)))
    }

    fn candidate(&self) -> MatchCandidate {
        MatchCandidate {
            match_id: self.match_id.clone(),
            queue: self.queue,
            team_a: self.team_a.clone(),
            team_b: self.team_b.clone(),
            quality: self.quality,
        }
    }

    fn unless_expired(&self, waiting: MatchState, expired: MatchState) -> MatchState {
        if Utc::now() >= self.deadline {
            expired
        } else {
            waiting
        }
    }

    /// Write a pending record per player, pin their states and announce the match
    async fn initialize(&mut self) -> MatchState {
        for (team, ticket) in self.roster() {
            let record = MatchPlayerRecord::from_ticket(self.queue, team, ticket);
            let raw = match record.to_json() {
                Ok(raw) => raw,
                Err(e) => {
                    error!(
                        "Could not encode record for '{}' in match {}: {}",
                        ticket.player_id, self.match_id, e
                    );
                    return MatchState::Aborted;
                }
            };
            if let Err(e) = self
                .store
                .hash_set(&self.match_id, &ticket.player_id, &raw)
                .await
            {
                error!(
                    "Could not write record for '{}' in match {}: {}",
                    ticket.player_id, self.match_id, e
                );
                self.record_store_error("hash_set");
                return MatchState::Aborted;
            }
        }
        self.initialized = true;
        self.deadline = deadline_after(self.config.accept_timeout);

        let found = UserGlobalState::in_match(UserState::MatchFound, &self.match_id, self.deadline);
        for (_, ticket) in self.roster() {
            if let Err(e) = self.store.set_user_state(&ticket.player_id, &found).await {
                warn!(
                    "Could not set state for '{}' in match {}: {}",
                    ticket.player_id, self.match_id, e
                );
                self.record_store_error("set_user_state");
            }
        }

        let payload = self.match_found_payload();
        for (_, ticket) in self.roster() {
            self.notify(&ticket.player_id, EventType::MatchFound, payload.clone())
                .await;
        }

        info!(
            "Match {} in {} awaiting acceptance from {} players until {}",
            self.match_id,
            self.queue,
            self.team_a.len() + self.team_b.len(),
            self.deadline
        );
        MatchState::AwaitingAcceptance
    }

    fn match_found_payload(&self) -> Value {
        let summary = |team: &[Ticket]| -> Vec<Value> {
            team.iter()
                .map(|t| json!({ "playerId": t.player_id, "score": t.score }))
                .collect()
        };
        json!({
            "matchId": self.match_id,
            "queue": self.queue,
            "quality": self.quality,
            "teamA": summary(&self.team_a),
            "teamB": summary(&self.team_b),
            "expiryTime": self.deadline,
        })
    }

    async fn poll_acceptance(&mut self) -> MatchState {
        // Answers that land after the deadline do not count
        if Utc::now() > self.deadline {
            return MatchState::AcceptTimedOut;
        }

        let snapshot = match self.load_records().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Could not read records for match {}: {}", self.match_id, e);
                self.record_store_error("hash_get_all");
                return self.unless_expired(MatchState::AwaitingAcceptance, MatchState::AcceptTimedOut);
            }
        };
        if !snapshot.unreadable.is_empty() {
            return MatchState::Aborted;
        }

        match acceptance_progress(&snapshot.records) {
            AcceptanceProgress::AnyDeclined => MatchState::Declined,
            AcceptanceProgress::AllAccepted => self.begin_payment().await,
            AcceptanceProgress::Waiting => {
                self.unless_expired(MatchState::AwaitingAcceptance, MatchState::AcceptTimedOut)
            }
        }
    }

    /// Every player accepted: run the pre-match hook and open the payment window
    async fn begin_payment(&mut self) -> MatchState {
        let candidate = self.candidate();
        if let Err(e) = self
            .bounded("prepare_match", self.ports.scheduler.prepare_match(&candidate))
            .await
        {
            warn!("Pre-match hook failed for match {}: {}", self.match_id, e);
            return MatchState::ScheduleFailed;
        }

        self.deadline = deadline_after(self.config.payment_timeout);
        self.payment_polls = 0;

        let pending =
            UserGlobalState::in_match(UserState::PaymentPending, &self.match_id, self.deadline);
        let required = self.queue.requires_payment();
        for (_, ticket) in self.roster() {
            if let Err(e) = self.store.set_user_state(&ticket.player_id, &pending).await {
                warn!(
                    "Could not set state for '{}' in match {}: {}",
                    ticket.player_id, self.match_id, e
                );
                self.record_store_error("set_user_state");
            }
            if required {
                let payload = json!({
                    "matchId": self.match_id,
                    "expiryTime": self.deadline,
                    "walletAddress": ticket.wallet_address,
                });
                self.notify(&ticket.player_id, EventType::PaymentPending, payload)
                    .await;
            }
        }
        MatchState::AwaitingPayment
    }

    async fn poll_payment(&mut self) -> MatchState {
        if !self.queue.requires_payment() {
            return MatchState::Scheduling;
        }

        let snapshot = match self.load_records().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Could not read records for match {}: {}", self.match_id, e);
                self.record_store_error("hash_get_all");
                return self.unless_expired(MatchState::AwaitingPayment, MatchState::PaymentTimedOut);
            }
        };
        if !snapshot.unreadable.is_empty() {
            return MatchState::Aborted;
        }

        let unpaid: Vec<PlayerId> = unpaid_players(self.queue, &snapshot.records)
            .into_iter()
            .map(|r| r.player_id.clone())
            .collect();
        if unpaid.is_empty() {
            return MatchState::Scheduling;
        }
        if Utc::now() >= self.deadline {
            return MatchState::PaymentTimedOut;
        }

        self.payment_polls += 1;
        if self.payment_polls % self.config.payment_check_every.max(1) != 0 {
            return MatchState::AwaitingPayment;
        }

        let mut outstanding = 0;
        for player_id in &unpaid {
            let checked = self
                .bounded(
                    "check_payment",
                    self.ports.payments.check_payment(player_id, &self.match_id),
                )
                .await;
            match checked {
                Ok(true) => self.mark_paid(player_id).await,
                Ok(false) => outstanding += 1,
                Err(e) => {
                    warn!(
                        "Payment check for '{}' in match {} failed: {}",
                        player_id, self.match_id, e
                    );
                    outstanding += 1;
                }
            }
        }

        if outstanding == 0 {
            MatchState::Scheduling
        } else {
            debug!(
                "Match {} waiting on {} payments",
                self.match_id, outstanding
            );
            MatchState::AwaitingPayment
        }
    }

    async fn mark_paid(&self, player_id: &str) {
        let mut record = match self.store.hash_get(&self.match_id, player_id).await {
            Ok(Some(raw)) => match MatchPlayerRecord::from_json(&raw) {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        "Unreadable record for '{}' in match {}: {}",
                        player_id, self.match_id, e
                    );
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                warn!("Could not mark '{}' paid in match {}: {}", player_id, self.match_id, e);
                self.record_store_error("hash_get");
                return;
            }
        };
        record.paid = true;

        let written = match record.to_json() {
            Ok(raw) => self.store.hash_update(&self.match_id, player_id, &raw).await,
            Err(e) => Err(e.into()),
        };
        match written {
            Ok(true) => {}
            Ok(false) => {
                debug!("Record for '{}' left match {} before payment", player_id, self.match_id);
                return;
            }
            Err(e) => {
                warn!("Could not mark '{}' paid in match {}: {}", player_id, self.match_id, e);
                self.record_store_error("hash_update");
                return;
            }
        }

        let paid = UserGlobalState::in_match(UserState::Paid, &self.match_id, self.deadline);
        if let Err(e) = self.store.set_user_state(player_id, &paid).await {
            warn!("Could not set state for '{}' in match {}: {}", player_id, self.match_id, e);
            self.record_store_error("set_user_state");
        }
        info!("Payment confirmed for '{}' in match {}", player_id, self.match_id);
    }

    async fn schedule(&mut self) -> MatchState {
        debug!("Match {} scheduling", self.match_id);
        let created = self
            .bounded(
                "create_external_match",
                self.ports.scheduler.create_external_match(
                    self.queue,
                    &self.team_a,
                    &self.team_b,
                    &self.match_id,
                ),
            )
            .await;

        match created {
            Ok(external_id) => {
                self.complete(&external_id).await;
                MatchState::Completed
            }
            Err(e) => {
                warn!("Could not create match {}: {}", self.match_id, e);
                MatchState::ScheduleFailed
            }
        }
    }

    /// Tell everyone, drop their connections and states, then the records
    async fn complete(&self, external_id: &str) {
        info!(
            "Match {} in {} created as {}",
            self.match_id, self.queue, external_id
        );

        let payload = json!({
            "matchId": self.match_id,
            "externalId": external_id,
            "queue": self.queue,
            "state": "matchCreated",
        });
        for (_, ticket) in self.roster() {
            self.notify(&ticket.player_id, EventType::Info, payload.clone())
                .await;
            if let Err(e) = self
                .bounded("disconnect", self.ports.notifier.disconnect(&ticket.player_id))
                .await
            {
                warn!("Could not disconnect '{}': {}", ticket.player_id, e);
            }
        }

        for (_, ticket) in self.roster() {
            if let Err(e) = self
                .retry_store("clear_user_state", || {
                    self.store.clear_user_state(&ticket.player_id)
                })
                .await
            {
                error!(
                    "Could not clear state for '{}' after match {}: {}",
                    ticket.player_id, self.match_id, e
                );
            }
        }

        self.delete_records().await;
    }

    /// Give every player a disposition for `terminal`, then delete the records
    async fn rollback(&self, terminal: MatchState) {
        warn!(
            "Rolling back match {} in {} after {}",
            self.match_id, self.queue, terminal
        );

        let snapshot = if self.initialized {
            match self
                .retry_store("hash_get_all", || self.load_records())
                .await
            {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(
                        "Could not read records for match {}, using roster: {}",
                        self.match_id, e
                    );
                    self.roster_snapshot(terminal)
                }
            }
        } else {
            self.roster_snapshot(terminal)
        };

        for record in &snapshot.records {
            match disposition(terminal, record) {
                Some(Disposition::Requeue { message }) => self.requeue(record, message).await,
                Some(Disposition::Remove { message }) => {
                    self.remove_player(&record.player_id, message).await
                }
                None => {}
            }
        }
        for player_id in &snapshot.unreadable {
            self.remove_player(player_id, REASON_UNREADABLE).await;
        }

        self.delete_records().await;
    }

    /// Records rebuilt from the roster. Players past acceptance are known to have accepted.
    fn roster_snapshot(&self, terminal: MatchState) -> RecordSnapshot {
        let accepted = matches!(
            terminal,
            MatchState::PaymentTimedOut | MatchState::ScheduleFailed
        );
        let records = self
            .roster()
            .map(|(team, ticket)| {
                let mut record = MatchPlayerRecord::from_ticket(self.queue, team, ticket);
                if accepted {
                    record.acceptance = Acceptance::Accepted;
                }
                record
            })
            .collect();
        RecordSnapshot {
            records,
            unreadable: Vec::new(),
        }
    }

    async fn requeue(&self, record: &MatchPlayerRecord, message: &'static str) {
        let ticket = record.to_ticket();
        if let Err(e) = self
            .retry_store("enqueue", || self.store.enqueue(self.queue, &ticket))
            .await
        {
            error!(
                "Could not requeue '{}' from match {}: {}",
                record.player_id, self.match_id, e
            );
            self.remove_player(&record.player_id, REASON_REQUEUE_FAILED)
                .await;
            return;
        }

        let rejoin = UserGlobalState::rejoin_queue();
        if let Err(e) = self
            .retry_store("set_user_state", || {
                self.store.set_user_state(&record.player_id, &rejoin)
            })
            .await
        {
            error!(
                "Could not set state for '{}' after match {}: {}",
                record.player_id, self.match_id, e
            );
        }

        let payload = json!({
            "matchId": self.match_id,
            "state": "rejoinQueue",
            "message": message,
        });
        self.notify(&record.player_id, EventType::Info, payload).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_requeued(self.queue);
        }
        info!(
            "Requeued '{}' into {} after match {}",
            record.player_id, self.queue, self.match_id
        );
    }

    async fn remove_player(&self, player_id: &str, message: &'static str) {
        if let Err(e) = self
            .retry_store("clear_user_state", || self.store.clear_user_state(player_id))
            .await
        {
            error!(
                "Could not clear state for '{}' after match {}: {}",
                player_id, self.match_id, e
            );
        }

        let payload = json!({ "matchId": self.match_id, "message": message });
        self.notify(player_id, EventType::Removed, payload).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_removed(self.queue);
        }
        info!(
            "Removed '{}' from matchmaking after match {}: {}",
            player_id, self.match_id, message
        );
    }

    async fn delete_records(&self) {
        if let Err(e) = self
            .retry_store("hash_delete", || self.store.hash_delete(&self.match_id))
            .await
        {
            error!("Could not delete records for match {}: {}", self.match_id, e);
        }
    }

    async fn load_records(&self) -> StoreResult<RecordSnapshot> {
        let mut raw = self.store.hash_get_all(&self.match_id).await?;
        let mut snapshot = RecordSnapshot::default();
        for (_, ticket) in self.roster() {
            match raw.remove(&ticket.player_id) {
                Some(value) => match MatchPlayerRecord::from_json(&value) {
                    Ok(record) => snapshot.records.push(record),
                    Err(e) => {
                        error!(
                            "Unreadable record for '{}' in match {}: {}",
                            ticket.player_id, self.match_id, e
                        );
                        snapshot.unreadable.push(ticket.player_id.clone());
                    }
                },
                None => {
                    error!(
                        "Record for '{}' missing from match {}",
                        ticket.player_id, self.match_id
                    );
                    snapshot.unreadable.push(ticket.player_id.clone());
                }
            }
        }
        Ok(snapshot)
    }

    async fn notify(&self, player_id: &str, event: EventType, payload: Value) {
        if let Err(e) = self
            .bounded("notify", self.ports.notifier.notify(player_id, event, payload))
            .await
        {
            warn!(
                "Could not notify '{}' about match {}: {}",
                player_id, self.match_id, e
            );
        }
    }

    /// Run an external call under the configured timeout
    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.config.external_call_timeout, call).await {
            Ok(result) => result.map_err(|e| {
                anyhow::Error::from(MatchmakingError::ExternalCallFailed {
                    operation: operation.to_string(),
                    message: format!("{:#}", e),
                })
            }),
            Err(_) => Err(MatchmakingError::ExternalCallTimedOut {
                operation: operation.to_string(),
                seconds: self.config.external_call_timeout.as_secs_f64(),
            }
            .into()),
        }
    }

    /// Retry a store operation with doubling delay
    async fn retry_store<T, F, Fut>(&self, operation: &str, mut attempt_once: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.config.max_store_retries.max(1);
        let mut delay = self.config.store_retry_delay;
        let mut attempt = 1;
        loop {
            match attempt_once().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.record_store_error(operation);
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    warn!(
                        "Store {} failed for match {} (attempt {}/{}): {}",
                        operation, self.match_id, attempt, max_attempts, e
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    fn record_store_error(&self, operation: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_store_error(operation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::state::{
        REASON_ACCEPT_EXPIRED, REASON_DECLINED, REASON_MATCH_CANCELLED,
        REASON_OPPONENT_DID_NOT_ACCEPT, REASON_PAYMENT_EXPIRED,
    };
    use crate::ports::notification::MockNotificationPort;
    use crate::ports::payment::MockPaymentPort;
    use crate::ports::scheduling::MockSchedulingPort;
    use crate::store::InMemoryQueueStore;
    use std::sync::Mutex;

    type Sent = Arc<Mutex<Vec<(String, EventType, Value)>>>;

    fn test_config() -> LifecycleConfig {
        LifecycleConfig {
            accept_timeout: Duration::from_millis(300),
            payment_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            payment_check_every: 1,
            external_call_timeout: Duration::from_millis(200),
            max_store_retries: 3,
            store_retry_delay: Duration::from_millis(1),
        }
    }

    fn candidate(queue: QueueType) -> MatchCandidate {
        MatchCandidate {
            match_id: "match_test".to_string(),
            queue,
            team_a: vec![Ticket::new("alice", 1000.0, "0xa")],
            team_b: vec![Ticket::new("bob", 1010.0, "0xb")],
            quality: 0.83,
        }
    }

    fn recording_notifier() -> (MockNotificationPort, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let mut notifier = MockNotificationPort::new();
        notifier
            .expect_notify()
            .returning(move |player, event, payload| {
                sink.lock().unwrap().push((player.to_string(), event, payload));
                Ok(())
            });
        notifier.expect_disconnect().returning(|_| Ok(()));
        (notifier, sent)
    }

    fn scheduler(create_ok: bool) -> MockSchedulingPort {
        let mut scheduler = MockSchedulingPort::new();
        scheduler.expect_prepare_match().returning(|_| Ok(()));
        scheduler
            .expect_create_external_match()
            .returning(move |_, _, _, _| {
                if create_ok {
                    Ok("ext_1".to_string())
                } else {
                    Err(anyhow::anyhow!("lobby service down"))
                }
            });
        scheduler
    }

    fn ports(
        notifier: MockNotificationPort,
        scheduler: MockSchedulingPort,
        payments: MockPaymentPort,
    ) -> MatchPorts {
        MatchPorts::new(Arc::new(notifier), Arc::new(scheduler), Arc::new(payments))
    }

    async fn wait_for_records(store: &InMemoryQueueStore, match_id: &str, count: usize) {
        for _ in 0..100 {
            if store.hash_get_all(match_id).await.unwrap().len() == count {
                return;
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("records for {} never appeared", match_id);
    }

    async fn answer(store: &InMemoryQueueStore, match_id: &str, player_id: &str, acceptance: Acceptance) {
        let raw = store.hash_get(match_id, player_id).await.unwrap().unwrap();
        let mut record = MatchPlayerRecord::from_json(&raw).unwrap();
        record.acceptance = acceptance;
        store
            .hash_set(match_id, player_id, &record.to_json().unwrap())
            .await
            .unwrap();
    }

    fn messages_for(sent: &Sent, player: &str, event: EventType) -> Vec<Value> {
        sent.lock()
            .unwrap()
            .iter()
            .filter(|(p, e, _)| p == player && *e == event)
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_accepted_match_completes_and_cleans_up() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store.clone(),
            ports(notifier, scheduler(true), MockPaymentPort::new()),
            test_config(),
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        assert_eq!(
            store.get_user_state("alice").await.unwrap().state,
            UserState::MatchFound
        );
        answer(&store, "match_test", "alice", Acceptance::Accepted).await;
        answer(&store, "match_test", "bob", Acceptance::Accepted).await;

        assert_eq!(handle.await.unwrap(), MatchState::Completed);
        assert!(!store.match_exists("match_test").await.unwrap());
        assert_eq!(
            store.get_user_state("bob").await.unwrap(),
            UserGlobalState::default()
        );
        assert_eq!(messages_for(&sent, "alice", EventType::MatchFound).len(), 1);
        assert!(messages_for(&sent, "alice", EventType::PaymentPending).is_empty());
        let info = messages_for(&sent, "bob", EventType::Info);
        assert_eq!(info[0]["externalId"], "ext_1");
    }

    #[tokio::test]
    async fn test_decline_requeues_the_accepted_player() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store.clone(),
            ports(notifier, MockSchedulingPort::new(), MockPaymentPort::new()),
            test_config(),
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        answer(&store, "match_test", "alice", Acceptance::Accepted).await;
        answer(&store, "match_test", "bob", Acceptance::Declined).await;

        assert_eq!(handle.await.unwrap(), MatchState::Declined);
        let waiting = store.snapshot(QueueType::Cs2).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].player_id, "alice");
        assert_eq!(waiting[0].score, 1000.0);
        assert_eq!(
            store.get_user_state("alice").await.unwrap().state,
            UserState::RejoinQueue
        );
        assert_eq!(
            store.get_user_state("bob").await.unwrap().state,
            UserState::NoState
        );
        assert_eq!(
            messages_for(&sent, "alice", EventType::Info)[0]["message"],
            REASON_OPPONENT_DID_NOT_ACCEPT
        );
        assert_eq!(
            messages_for(&sent, "bob", EventType::Removed)[0]["message"],
            REASON_DECLINED
        );
        assert!(!store.match_exists("match_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_acceptance_timeout_removes_pending_players() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let mut config = test_config();
        config.accept_timeout = Duration::from_millis(40);
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Dota2),
            store.clone(),
            ports(notifier, MockSchedulingPort::new(), MockPaymentPort::new()),
            config,
        );

        assert_eq!(lifecycle.run().await, MatchState::AcceptTimedOut);
        assert!(store.snapshot(QueueType::Dota2).await.unwrap().is_empty());
        for player in ["alice", "bob"] {
            assert_eq!(
                messages_for(&sent, player, EventType::Removed)[0]["message"],
                REASON_ACCEPT_EXPIRED
            );
        }
    }

    #[tokio::test]
    async fn test_schedule_failure_requeues_everyone() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store.clone(),
            ports(notifier, scheduler(false), MockPaymentPort::new()),
            test_config(),
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        answer(&store, "match_test", "alice", Acceptance::Accepted).await;
        answer(&store, "match_test", "bob", Acceptance::Accepted).await;

        assert_eq!(handle.await.unwrap(), MatchState::ScheduleFailed);
        assert_eq!(store.snapshot(QueueType::Cs2).await.unwrap().len(), 2);
        assert_eq!(
            messages_for(&sent, "bob", EventType::Info)[0]["message"],
            REASON_MATCH_CANCELLED
        );
    }

    #[tokio::test]
    async fn test_confirmed_payment_schedules_match() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let mut payments = MockPaymentPort::new();
        payments.expect_check_payment().returning(|_, _| Ok(true));
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Lichess),
            store.clone(),
            ports(notifier, scheduler(true), payments),
            test_config(),
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        answer(&store, "match_test", "alice", Acceptance::Accepted).await;
        answer(&store, "match_test", "bob", Acceptance::Accepted).await;

        assert_eq!(handle.await.unwrap(), MatchState::Completed);
        assert_eq!(messages_for(&sent, "alice", EventType::PaymentPending).len(), 1);
    }

    #[tokio::test]
    async fn test_payment_timeout_drops_unpaid_players() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let mut payments = MockPaymentPort::new();
        payments
            .expect_check_payment()
            .returning(|player, _| Ok(player == "alice"));
        let mut scheduler = MockSchedulingPort::new();
        scheduler.expect_prepare_match().returning(|_| Ok(()));
        scheduler.expect_create_external_match().never();
        let mut config = test_config();
        config.payment_timeout = Duration::from_millis(60);
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Lichess),
            store.clone(),
            ports(notifier, scheduler, payments),
            config,
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        answer(&store, "match_test", "alice", Acceptance::Accepted).await;
        answer(&store, "match_test", "bob", Acceptance::Accepted).await;

        assert_eq!(handle.await.unwrap(), MatchState::PaymentTimedOut);
        let waiting = store.snapshot(QueueType::Lichess).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].player_id, "alice");
        assert_eq!(
            messages_for(&sent, "bob", EventType::Removed)[0]["message"],
            REASON_PAYMENT_EXPIRED
        );
    }

    #[tokio::test]
    async fn test_unpaid_match_removes_everyone() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let mut payments = MockPaymentPort::new();
        payments.expect_check_payment().returning(|_, _| Ok(false));
        let mut scheduler = MockSchedulingPort::new();
        scheduler.expect_prepare_match().returning(|_| Ok(()));
        scheduler.expect_create_external_match().never();
        let mut config = test_config();
        config.payment_timeout = Duration::from_millis(60);
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Lichess),
            store.clone(),
            ports(notifier, scheduler, payments),
            config,
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        answer(&store, "match_test", "alice", Acceptance::Accepted).await;
        answer(&store, "match_test", "bob", Acceptance::Accepted).await;

        assert_eq!(handle.await.unwrap(), MatchState::PaymentTimedOut);
        assert!(store.snapshot(QueueType::Lichess).await.unwrap().is_empty());
        for player in ["alice", "bob"] {
            assert_eq!(
                messages_for(&sent, player, EventType::Removed)[0]["message"],
                REASON_PAYMENT_EXPIRED
            );
            assert!(messages_for(&sent, player, EventType::Info).is_empty());
            assert_eq!(
                store.get_user_state(player).await.unwrap(),
                UserGlobalState::default()
            );
        }
        assert!(!store.match_exists("match_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_accepts_after_deadline_time_out() {
        let store = Arc::new(InMemoryQueueStore::new());
        let expired = Utc::now() - chrono::Duration::seconds(10);
        for (team, ticket) in candidate(QueueType::Cs2).players() {
            let mut record = MatchPlayerRecord::from_ticket(QueueType::Cs2, team, ticket);
            record.acceptance = Acceptance::Accepted;
            store
                .hash_set("match_test", &ticket.player_id, &record.to_json().unwrap())
                .await
                .unwrap();
            store
                .set_user_state(
                    &ticket.player_id,
                    &UserGlobalState::in_match(UserState::MatchAccepted, "match_test", expired),
                )
                .await
                .unwrap();
        }

        let mut scheduler = MockSchedulingPort::new();
        scheduler.expect_prepare_match().never();
        scheduler.expect_create_external_match().never();
        let (notifier, sent) = recording_notifier();
        let lifecycle = MatchLifecycle::resume(
            "match_test",
            store.clone(),
            ports(notifier, scheduler, MockPaymentPort::new()),
            test_config(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(lifecycle.state(), MatchState::AwaitingAcceptance);
        assert_eq!(lifecycle.run().await, MatchState::AcceptTimedOut);
        assert_eq!(store.snapshot(QueueType::Cs2).await.unwrap().len(), 2);
        assert_eq!(
            messages_for(&sent, "bob", EventType::Info)[0]["message"],
            REASON_OPPONENT_DID_NOT_ACCEPT
        );
        assert!(!store.match_exists("match_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_settled_payment_phase_moves_to_scheduling() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, _sent) = recording_notifier();
        let mut scheduler = MockSchedulingPort::new();
        scheduler.expect_create_external_match().never();
        let mut lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store,
            ports(notifier, scheduler, MockPaymentPort::new()),
            test_config(),
        );
        lifecycle.state = MatchState::AwaitingPayment;

        assert_eq!(lifecycle.poll_payment().await, MatchState::Scheduling);
    }

    #[tokio::test]
    async fn test_port_errors_name_the_failed_call() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, _sent) = recording_notifier();
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store,
            ports(notifier, MockSchedulingPort::new(), MockPaymentPort::new()),
            test_config(),
        );

        let err = lifecycle
            .bounded("create_external_match", async {
                Err::<String, _>(anyhow::anyhow!("lobby service down"))
            })
            .await
            .unwrap_err();
        match err.downcast::<MatchmakingError>().unwrap() {
            MatchmakingError::ExternalCallFailed { operation, message } => {
                assert_eq!(operation, "create_external_match");
                assert!(message.contains("lobby service down"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_record_aborts_match() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, sent) = recording_notifier();
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store.clone(),
            ports(notifier, MockSchedulingPort::new(), MockPaymentPort::new()),
            test_config(),
        );

        let handle = tokio::spawn(lifecycle.run());
        wait_for_records(&store, "match_test", 2).await;
        store
            .hash_set("match_test", "bob", "{not json")
            .await
            .unwrap();

        assert_eq!(handle.await.unwrap(), MatchState::Aborted);
        let waiting = store.snapshot(QueueType::Cs2).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].player_id, "alice");
        assert_eq!(
            messages_for(&sent, "bob", EventType::Removed)[0]["message"],
            REASON_UNREADABLE
        );
    }

    #[tokio::test]
    async fn test_store_outage_at_start_requeues_roster() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, _sent) = recording_notifier();
        store.set_unavailable(true);
        let mut config = test_config();
        config.store_retry_delay = Duration::from_millis(20);
        let lifecycle = MatchLifecycle::new(
            candidate(QueueType::Cs2),
            store.clone(),
            ports(notifier, MockSchedulingPort::new(), MockPaymentPort::new()),
            config,
        );

        let handle = tokio::spawn(lifecycle.run());
        sleep(Duration::from_millis(5)).await;
        store.set_unavailable(false);

        assert_eq!(handle.await.unwrap(), MatchState::Aborted);
        assert_eq!(store.snapshot(QueueType::Cs2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_continues_payment_phase() {
        let store = Arc::new(InMemoryQueueStore::new());
        let expiry = deadline_after(Duration::from_millis(300));
        for (team, ticket) in candidate(QueueType::Lichess).players() {
            let mut record = MatchPlayerRecord::from_ticket(QueueType::Lichess, team, ticket);
            record.acceptance = Acceptance::Accepted;
            record.paid = true;
            store
                .hash_set("match_test", &ticket.player_id, &record.to_json().unwrap())
                .await
                .unwrap();
            store
                .set_user_state(
                    &ticket.player_id,
                    &UserGlobalState::in_match(UserState::Paid, "match_test", expiry),
                )
                .await
                .unwrap();
        }

        let (notifier, _sent) = recording_notifier();
        let lifecycle = MatchLifecycle::resume(
            "match_test",
            store.clone(),
            ports(notifier, scheduler(true), MockPaymentPort::new()),
            test_config(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(lifecycle.state(), MatchState::AwaitingPayment);
        assert_eq!(lifecycle.queue(), QueueType::Lichess);
        assert_eq!(lifecycle.deadline(), expiry);
        assert_eq!(lifecycle.run().await, MatchState::Completed);
        assert!(!store.match_exists("match_test").await.unwrap());
    }

    #[tokio::test]
    async fn test_resume_discards_match_nobody_is_in() {
        let store = Arc::new(InMemoryQueueStore::new());
        let ticket = Ticket::new("alice", 1000.0, "0xa");
        let mut record = MatchPlayerRecord::from_ticket(QueueType::Cs2, Team::A, &ticket);
        record.acceptance = Acceptance::Accepted;
        store
            .hash_set("match_test", "alice", &record.to_json().unwrap())
            .await
            .unwrap();
        store
            .set_user_state("alice", &UserGlobalState::rejoin_queue())
            .await
            .unwrap();

        let mut scheduler = MockSchedulingPort::new();
        scheduler.expect_create_external_match().never();
        let (notifier, _sent) = recording_notifier();
        let resumed = MatchLifecycle::resume(
            "match_test",
            store.clone(),
            ports(notifier, scheduler, MockPaymentPort::new()),
            test_config(),
        )
        .await
        .unwrap();

        assert!(resumed.is_none());
        assert!(store.list_matches().await.unwrap().is_empty());
        assert_eq!(
            store.get_user_state("alice").await.unwrap().state,
            UserState::RejoinQueue
        );
        assert!(store.snapshot(QueueType::Cs2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_of_unknown_match_is_none() {
        let store = Arc::new(InMemoryQueueStore::new());
        let (notifier, _sent) = recording_notifier();
        let resumed = MatchLifecycle::resume(
            "match_missing",
            store,
            ports(notifier, MockSchedulingPort::new(), MockPaymentPort::new()),
            test_config(),
        )
        .await
        .unwrap();
        assert!(resumed.is_none());
    }
}
