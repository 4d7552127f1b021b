//! Matchmaking and match-lifecycle tuning

use crate::types::QueueType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Quality strategy: "trueskill" or "glicko" (anything else falls back to trueskill)
    pub mode: String,
    /// Seconds between evaluation ticks of one queue
    pub crawl_interval_seconds: u64,
    /// Players per team
    pub team_size: usize,
    /// Minimum (exclusive) quality for a window to become a match
    pub quality_threshold: f64,
    /// Largest allowed score spread inside one window
    pub score_range: f64,
    /// Seconds players have to accept a found match
    pub accept_timeout_seconds: u64,
    /// Seconds players have to pay once everyone accepted
    pub payment_timeout_seconds: u64,
    /// Lifecycle polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Payment is verified on every n-th payment poll
    pub payment_check_every: u32,
    /// Upper bound for any single scheduling or payment call
    pub external_call_timeout_seconds: u64,
    /// Queues evaluated by the crawler
    pub queues: Vec<QueueType>,
    /// Queues paired two at a time with per-player widening tolerance
    pub quick_pair_queues: Vec<QueueType>,
    pub loosening: LooseningSettings,
}

/// Widening score tolerance for quick-pair queues
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LooseningSettings {
    pub initial_tolerance: f64,
    pub max_tolerance: f64,
    /// Wait after which a player's tolerance reaches the cap
    pub grace_period_seconds: u64,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            mode: "trueskill".to_string(),
            crawl_interval_seconds: 5,
            team_size: 5,
            quality_threshold: 0.8,
            score_range: 100.0,
            accept_timeout_seconds: 30,
            payment_timeout_seconds: 60,
            poll_interval_ms: 2000,
            payment_check_every: 3,
            external_call_timeout_seconds: 10,
            queues: QueueType::all().to_vec(),
            quick_pair_queues: Vec::new(),
            loosening: LooseningSettings::default(),
        }
    }
}

impl Default for LooseningSettings {
    fn default() -> Self {
        Self {
            initial_tolerance: 50.0,
            max_tolerance: 250.0,
            grace_period_seconds: 60,
        }
    }
}

impl LooseningSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    /// Acceptable score difference for a player who has waited `waited`.
    /// Grows linearly from the initial tolerance to the cap over the grace period.
    pub fn tolerance_for(&self, waited: Duration) -> f64 {
        let grace = self.grace_period().as_secs_f64();
        if grace <= 0.0 {
            return self.max_tolerance;
        }
        let progress = (waited.as_secs_f64() / grace).min(1.0);
        self.initial_tolerance + (self.max_tolerance - self.initial_tolerance) * progress
    }
}

impl MatchmakingSettings {
    pub fn crawl_interval(&self) -> Duration {
        Duration::from_secs(self.crawl_interval_seconds)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_seconds)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_seconds)
    }

    pub fn is_quick_pair(&self, queue: QueueType) -> bool {
        self.quick_pair_queues.contains(&queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = MatchmakingSettings::default();
        assert_eq!(settings.team_size, 5);
        assert_eq!(settings.quality_threshold, 0.8);
        assert_eq!(settings.score_range, 100.0);
        assert_eq!(settings.accept_timeout(), Duration::from_secs(30));
        assert_eq!(settings.payment_timeout(), Duration::from_secs(60));
        assert_eq!(settings.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.queues.len(), 3);
    }

    #[test]
    fn test_tolerance_widens_with_wait() {
        let loosening = LooseningSettings::default();
        assert_eq!(loosening.tolerance_for(Duration::ZERO), 50.0);
        assert_eq!(loosening.tolerance_for(Duration::from_secs(30)), 150.0);
        assert_eq!(loosening.tolerance_for(Duration::from_secs(60)), 250.0);
        assert_eq!(loosening.tolerance_for(Duration::from_secs(600)), 250.0);
    }

    #[test]
    fn test_zero_grace_period_uses_cap() {
        let loosening = LooseningSettings {
            grace_period_seconds: 0,
            ..Default::default()
        };
        assert_eq!(loosening.tolerance_for(Duration::ZERO), 250.0);
    }
}
