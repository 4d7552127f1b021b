//! External match scheduling
//!
//! Creating the actual game (lobby, chess pairing, rules-engine record) is
//! delegated to the target platform through `SchedulingPort`.

use crate::error::Result;
use crate::types::{MatchCandidate, QueueType, Ticket};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchedulingPort: Send + Sync {
    /// Hook run once every player accepted, before payment starts
    async fn prepare_match(&self, candidate: &MatchCandidate) -> Result<()>;

    /// Create the match on the target platform, returning its external id
    async fn create_external_match(
        &self,
        queue: QueueType,
        team_a: &[Ticket],
        team_b: &[Ticket],
        match_id: &str,
    ) -> Result<String>;
}

/// Scheduler that only records matches locally and issues random external ids.
/// Used when no game platform is wired in.
#[derive(Debug, Default)]
pub struct LocalScheduler {
    created: AtomicU64,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of matches created so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchedulingPort for LocalScheduler {
    async fn prepare_match(&self, candidate: &MatchCandidate) -> Result<()> {
        info!(
            "Prepared match {} in {} for {} players",
            candidate.match_id,
            candidate.queue,
            candidate.len()
        );
        Ok(())
    }

    async fn create_external_match(
        &self,
        queue: QueueType,
        team_a: &[Ticket],
        team_b: &[Ticket],
        match_id: &str,
    ) -> Result<String> {
        let external_id = format!("ext_{}", Uuid::new_v4());
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(
            "Scheduled {} match {} as {} ({} vs {})",
            queue,
            match_id,
            external_id,
            team_a.len(),
            team_b.len()
        );
        Ok(external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_scheduler_issues_unique_ids() {
        let scheduler = LocalScheduler::new();
        let a = vec![Ticket::new("a", 1000.0, "")];
        let b = vec![Ticket::new("b", 1000.0, "")];

        let first = scheduler
            .create_external_match(QueueType::Cs2, &a, &b, "match_1")
            .await
            .unwrap();
        let second = scheduler
            .create_external_match(QueueType::Cs2, &a, &b, "match_2")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("ext_"));
        assert_eq!(scheduler.created(), 2);
    }
}
