//! Spawning and tracking lifecycle tasks

use super::runner::{LifecycleConfig, MatchLifecycle};
use super::state::MatchState;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::ports::MatchPorts;
use crate::store::QueueStore;
use crate::types::{MatchCandidate, QueueType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, info_span, Instrument};

/// Starts one independent task per committed match
#[derive(Clone)]
pub struct LifecycleLauncher {
    store: Arc<dyn QueueStore>,
    ports: MatchPorts,
    config: LifecycleConfig,
    metrics: Option<Arc<MetricsCollector>>,
    active: Arc<AtomicUsize>,
}

impl LifecycleLauncher {
    pub fn new(store: Arc<dyn QueueStore>, ports: MatchPorts, config: LifecycleConfig) -> Self {
        Self {
            store,
            ports,
            config,
            metrics: None,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Number of lifecycles still running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn launch(&self, candidate: MatchCandidate) -> JoinHandle<MatchState> {
        let mut lifecycle = MatchLifecycle::new(
            candidate,
            self.store.clone(),
            self.ports.clone(),
            self.config.clone(),
        );
        if let Some(metrics) = &self.metrics {
            lifecycle = lifecycle.with_metrics(metrics.clone());
        }
        self.spawn(lifecycle)
    }

    /// Pick up every match the store still lists, e.g. after a restart
    pub async fn resume_all(&self) -> Result<Vec<JoinHandle<MatchState>>> {
        let mut handles = Vec::new();
        for match_id in self.store.list_matches().await? {
            let resumed = MatchLifecycle::resume(
                &match_id,
                self.store.clone(),
                self.ports.clone(),
                self.config.clone(),
            )
            .await;
            match resumed {
                Ok(Some(mut lifecycle)) => {
                    if let Some(metrics) = &self.metrics {
                        lifecycle = lifecycle.with_metrics(metrics.clone());
                    }
                    handles.push(self.spawn(lifecycle));
                }
                Ok(None) => {}
                Err(e) => error!("Could not resume match {}: {}", match_id, e),
            }
        }
        if !handles.is_empty() {
            info!("Resumed {} in-flight matches", handles.len());
        }
        Ok(handles)
    }

    /// Wait until no lifecycle is running; false if `limit` passed first
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let give_up = Instant::now() + limit;
        while self.active() > 0 {
            if Instant::now() >= give_up {
                return false;
            }
            sleep(Duration::from_millis(50)).await;
        }
        true
    }

    fn spawn(&self, lifecycle: MatchLifecycle) -> JoinHandle<MatchState> {
        let queue: QueueType = lifecycle.queue();
        let span = info_span!("match", match_id = %lifecycle.match_id(), queue = %queue);
        let active = self.active.clone();
        let metrics = self.metrics.clone();

        active.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &metrics {
            metrics.lifecycle_started();
        }

        tokio::spawn(
            async move {
                let outcome = lifecycle.run().await;
                active.fetch_sub(1, Ordering::SeqCst);
                if let Some(metrics) = &metrics {
                    metrics.lifecycle_finished(queue, outcome.as_str());
                }
                outcome
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ConnectionRegistry, LocalScheduler, SubmittedHashVerifier};
    use crate::store::InMemoryQueueStore;
    use crate::types::{Acceptance, MatchPlayerRecord, Team, Ticket, UserGlobalState, UserState};
    use crate::utils::deadline_after;

    fn launcher(store: Arc<InMemoryQueueStore>) -> LifecycleLauncher {
        let ports = MatchPorts::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(LocalScheduler::new()),
            Arc::new(SubmittedHashVerifier::new(store.clone())),
        );
        let config = LifecycleConfig {
            accept_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            store_retry_delay: Duration::from_millis(1),
            ..LifecycleConfig::default()
        };
        LifecycleLauncher::new(store, ports, config)
    }

    #[tokio::test]
    async fn test_launch_tracks_active_lifecycles() {
        let store = Arc::new(InMemoryQueueStore::new());
        let launcher = launcher(store.clone());
        let candidate = MatchCandidate {
            match_id: "match_launch".to_string(),
            queue: QueueType::Cs2,
            team_a: vec![Ticket::new("a", 1000.0, "")],
            team_b: vec![Ticket::new("b", 1000.0, "")],
            quality: 0.8,
        };

        let handle = launcher.launch(candidate);
        assert_eq!(launcher.active(), 1);
        assert_eq!(handle.await.unwrap(), MatchState::AcceptTimedOut);
        assert_eq!(launcher.active(), 0);
        assert!(launcher.wait_idle(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_resume_all_picks_up_listed_matches() {
        let store = Arc::new(InMemoryQueueStore::new());
        let expiry = deadline_after(Duration::from_millis(200));
        for (id, team) in [("a", Team::A), ("b", Team::B)] {
            let mut record =
                MatchPlayerRecord::from_ticket(QueueType::Dota2, team, &Ticket::new(id, 900.0, ""));
            record.acceptance = Acceptance::Accepted;
            store
                .hash_set("match_old", id, &record.to_json().unwrap())
                .await
                .unwrap();
            store
                .set_user_state(
                    id,
                    &UserGlobalState::in_match(UserState::MatchAccepted, "match_old", expiry),
                )
                .await
                .unwrap();
        }

        let launcher = launcher(store.clone());
        let handles = launcher.resume_all().await.unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), MatchState::Completed);
        }
        assert!(store.list_matches().await.unwrap().is_empty());
    }
}
