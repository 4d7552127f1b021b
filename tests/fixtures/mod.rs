//! Test fixtures and scripted port implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use mmf::config::MatchmakingSettings;
use mmf::error::{MatchmakingError, Result};
use mmf::lifecycle::{LifecycleConfig, LifecycleLauncher};
use mmf::matching::MatchEvaluator;
use mmf::ports::notification::{EventType, NotificationPort};
use mmf::ports::payment::PaymentPort;
use mmf::ports::scheduling::SchedulingPort;
use mmf::ports::MatchPorts;
use mmf::service::TicketService;
use mmf::store::{InMemoryQueueStore, QueueStore};
use mmf::types::{Collateral, CompatibilityData, MatchCandidate, QueueType, Ticket};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Captured notification
#[derive(Debug, Clone)]
pub struct SentEvent {
    pub player_id: String,
    pub event: EventType,
    pub payload: serde_json::Value,
}

/// Notifier that records everything it is asked to send
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEvent>>,
    disconnected: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SentEvent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, player_id: &str) -> Vec<SentEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.player_id == player_id)
            .collect()
    }

    pub fn count(&self, event: EventType) -> usize {
        self.events().iter().filter(|e| e.event == event).count()
    }

    /// The `message` field of the last event of this kind sent to the player
    pub fn last_message(&self, player_id: &str, event: EventType) -> Option<String> {
        self.events_for(player_id)
            .into_iter()
            .rev()
            .find(|e| e.event == event)
            .and_then(|e| e.payload["message"].as_str().map(str::to_string))
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.disconnected
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn notify(
        &self,
        player_id: &str,
        event: EventType,
        payload: serde_json::Value,
    ) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentEvent {
                player_id: player_id.to_string(),
                event,
                payload,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, player_id: &str) -> Result<()> {
        if let Ok(mut disconnected) = self.disconnected.lock() {
            disconnected.push(player_id.to_string());
        }
        Ok(())
    }
}

/// Scheduler whose failures are switched on per test
#[derive(Debug, Default)]
pub struct ScriptedScheduler {
    fail_create: AtomicBool,
    created: Mutex<Vec<String>>,
}

impl ScriptedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let scheduler = Self::default();
        scheduler.fail_create.store(true, Ordering::SeqCst);
        scheduler
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SchedulingPort for ScriptedScheduler {
    async fn prepare_match(&self, _candidate: &MatchCandidate) -> Result<()> {
        Ok(())
    }

    async fn create_external_match(
        &self,
        queue: QueueType,
        _team_a: &[Ticket],
        _team_b: &[Ticket],
        match_id: &str,
    ) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MatchmakingError::ExternalCallFailed {
                operation: "create_external_match".to_string(),
                message: format!("{} platform rejected {}", queue, match_id),
            }
            .into());
        }
        if let Ok(mut created) = self.created.lock() {
            created.push(match_id.to_string());
        }
        Ok(format!("ext-{}", match_id))
    }
}

/// Payment port that confirms only the players marked as paid
#[derive(Debug, Default)]
pub struct ScriptedPayments {
    paid: Mutex<HashSet<String>>,
}

impl ScriptedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_paid(&self, player_id: &str) {
        if let Ok(mut paid) = self.paid.lock() {
            paid.insert(player_id.to_string());
        }
    }
}

#[async_trait]
impl PaymentPort for ScriptedPayments {
    async fn check_payment(&self, player_id: &str, _match_id: &str) -> Result<bool> {
        Ok(self
            .paid
            .lock()
            .map(|paid| paid.contains(player_id))
            .unwrap_or(false))
    }
}

pub fn ticket(player_id: &str, score: f64) -> Ticket {
    Ticket::new(player_id, score, format!("wallet-{}", player_id))
}

pub fn blitz() -> CompatibilityData {
    CompatibilityData {
        time: 3,
        increment: 2,
        collateral: Collateral::Practice,
    }
}

pub fn chess_ticket(player_id: &str, score: f64) -> Ticket {
    ticket(player_id, score).with_compatibility(blitz())
}

/// Timeouts short enough for tests
pub fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        accept_timeout: Duration::from_millis(300),
        payment_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
        payment_check_every: 1,
        external_call_timeout: Duration::from_millis(200),
        max_store_retries: 3,
        store_retry_delay: Duration::from_millis(5),
    }
}

pub fn small_team_settings() -> MatchmakingSettings {
    MatchmakingSettings {
        team_size: 1,
        quality_threshold: 0.5,
        score_range: 200.0,
        ..MatchmakingSettings::default()
    }
}

/// Everything a lifecycle needs, wired against the in-memory store
pub struct TestSystem {
    pub store: Arc<InMemoryQueueStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<ScriptedScheduler>,
    pub payments: Arc<ScriptedPayments>,
    pub launcher: LifecycleLauncher,
    pub evaluator: MatchEvaluator,
    pub tickets: TicketService,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_scheduler(ScriptedScheduler::new())
    }

    pub fn with_scheduler(scheduler: ScriptedScheduler) -> Self {
        let store = Arc::new(InMemoryQueueStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = Arc::new(scheduler);
        let payments = Arc::new(ScriptedPayments::new());

        let dyn_store: Arc<dyn QueueStore> = store.clone();
        let ports = MatchPorts::new(notifier.clone(), scheduler.clone(), payments.clone());
        let launcher = LifecycleLauncher::new(dyn_store.clone(), ports, fast_config());
        let settings = small_team_settings();
        let evaluator = MatchEvaluator::new(dyn_store.clone(), settings.clone());
        let tickets = TicketService::new(dyn_store, settings.queues);

        Self {
            store,
            notifier,
            scheduler,
            payments,
            launcher,
            evaluator,
            tickets,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    /// Wait until every player of the match has been told about it
    pub async fn wait_for_match_found(&self, players: &[&str]) {
        for _ in 0..100 {
            let notified = players.iter().all(|p| {
                self.notifier
                    .events_for(p)
                    .iter()
                    .any(|e| e.event == EventType::MatchFound)
            });
            if notified {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("players {:?} never received MatchFound", players);
    }
}

/// Candidate with one player per side
pub fn duel(match_id: &str, queue: QueueType, a: Ticket, b: Ticket) -> MatchCandidate {
    MatchCandidate {
        match_id: match_id.to_string(),
        queue,
        team_a: vec![a],
        team_b: vec![b],
        quality: 0.9,
    }
}
