//! Queue evaluation
//!
//! `MatchPlanner` is the pure part: bucketing, windowing, team formation and
//! scoring over a list of tickets. `MatchEvaluator` runs the planner against
//! the live store once per tick and commits each proposal by atomically
//! removing its tickets.

use crate::config::{validate_matchmaking, MatchmakingSettings};
use crate::error::Result;
use crate::matching::formation::form_teams;
use crate::matching::quality::{scorer_for_mode, QualityScorer};
use crate::matching::quick_pair::pair_bucket;
use crate::metrics::MetricsCollector;
use crate::store::QueueStore;
use crate::types::{MatchCandidate, PlayerId, QueueType, Ticket};
use crate::utils::generate_match_id;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Bucket used by queues without compatibility constraints
pub const DEFAULT_BUCKET: &str = "all";

/// A window that passed the spread and quality checks, not yet committed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedMatch {
    pub queue: QueueType,
    pub bucket: String,
    pub team_a: Vec<Ticket>,
    pub team_b: Vec<Ticket>,
    pub quality: f64,
}

impl ProposedMatch {
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.team_a
            .iter()
            .chain(self.team_b.iter())
            .map(|t| t.player_id.clone())
            .collect()
    }

    pub fn into_candidate(self, match_id: String) -> MatchCandidate {
        MatchCandidate {
            match_id,
            queue: self.queue,
            team_a: self.team_a,
            team_b: self.team_b,
            quality: self.quality,
        }
    }
}

/// Partition score-ordered tickets into compatibility buckets.
///
/// A player id seen twice is kept only at its first (lowest-scored) position.
/// Queues that need compatibility data skip tickets without it.
pub fn bucket_tickets(queue: QueueType, tickets: &[Ticket]) -> BTreeMap<String, Vec<Ticket>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut buckets: BTreeMap<String, Vec<Ticket>> = BTreeMap::new();

    for ticket in tickets {
        if !seen.insert(ticket.player_id.as_str()) {
            debug!("Duplicate ticket for '{}' in {} ignored", ticket.player_id, queue);
            continue;
        }
        let key = if queue.requires_compatibility() {
            match &ticket.compatibility {
                Some(data) => data.bucket_key(),
                None => {
                    debug!(
                        "Ticket for '{}' in {} has no compatibility data, skipping",
                        ticket.player_id, queue
                    );
                    continue;
                }
            }
        } else {
            DEFAULT_BUCKET.to_string()
        };
        buckets.entry(key).or_default().push(ticket.clone());
    }

    buckets
}

/// Pure matching logic shared by live evaluation and dry runs
pub struct MatchPlanner {
    settings: MatchmakingSettings,
    scorer: Box<dyn QualityScorer>,
}

impl MatchPlanner {
    pub fn new(settings: MatchmakingSettings) -> Self {
        let scorer = scorer_for_mode(&settings.mode);
        Self { settings, scorer }
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    pub fn scorer(&self) -> &dyn QualityScorer {
        self.scorer.as_ref()
    }

    /// Number of tickets one match of this queue consumes
    pub fn window_size(&self, queue: QueueType) -> usize {
        if self.settings.is_quick_pair(queue) {
            2
        } else {
            queue.effective_team_size(self.settings.team_size) * 2
        }
    }

    /// Propose matches from score-ordered tickets. Proposals never share a player.
    pub fn plan(&self, queue: QueueType, tickets: &[Ticket], now: DateTime<Utc>) -> Vec<ProposedMatch> {
        if tickets.len() < self.window_size(queue) {
            return Vec::new();
        }

        let mut proposals = Vec::new();
        for (key, bucket) in bucket_tickets(queue, tickets) {
            if self.settings.is_quick_pair(queue) {
                proposals.extend(pair_bucket(
                    queue,
                    &key,
                    &bucket,
                    &self.settings.loosening,
                    self.scorer(),
                    now,
                ));
            } else {
                proposals.extend(self.scan_bucket(queue, &key, &bucket));
            }
        }
        proposals
    }

    /// Slide a window over one bucket, skipping past every window that forms a match
    fn scan_bucket(&self, queue: QueueType, key: &str, bucket: &[Ticket]) -> Vec<ProposedMatch> {
        let width = self.window_size(queue);
        let mut proposals = Vec::new();
        let mut start = 0;

        while start + width <= bucket.len() {
            let window = &bucket[start..start + width];
            let spread = window[width - 1].score - window[0].score;
            if spread > self.settings.score_range {
                start += 1;
                continue;
            }

            let (team_a, team_b) = form_teams(window);
            let quality = self.scorer.quality(&team_a, &team_b);
            if quality > self.settings.quality_threshold {
                debug!(
                    "Window {}..{} in {}/{} qualifies with quality {:.4}",
                    start,
                    start + width,
                    queue,
                    key,
                    quality
                );
                proposals.push(ProposedMatch {
                    queue,
                    bucket: key.to_string(),
                    team_a,
                    team_b,
                    quality,
                });
                start += width;
            } else {
                start += 1;
            }
        }

        proposals
    }
}

/// Outcome of one evaluation tick for one queue
#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub tickets_seen: usize,
    pub eligible: usize,
    pub candidates: Vec<MatchCandidate>,
    /// Proposals dropped because a ticket left the queue before removal
    pub stale: usize,
}

/// Runs the planner against the live store
pub struct MatchEvaluator {
    store: Arc<dyn QueueStore>,
    planner: MatchPlanner,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchEvaluator {
    pub fn new(store: Arc<dyn QueueStore>, settings: MatchmakingSettings) -> Self {
        Self {
            store,
            planner: MatchPlanner::new(settings),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn planner(&self) -> &MatchPlanner {
        &self.planner
    }

    /// Dry run over arbitrary tickets: nothing is removed and no lifecycle starts
    pub fn preview(&self, queue: QueueType, tickets: &[Ticket]) -> Vec<ProposedMatch> {
        let mut ordered = tickets.to_vec();
        ordered.sort_by(|a, b| a.score.total_cmp(&b.score));
        self.planner.plan(queue, &ordered, Utc::now())
    }

    /// Evaluate one queue once.
    ///
    /// Returned candidates have already been removed from the queue; the caller
    /// owns them and must start a lifecycle for each.
    pub async fn evaluate(&self, queue: QueueType) -> Result<EvaluationReport> {
        validate_matchmaking(self.planner.settings())
            .with_context(|| format!("Refusing to evaluate {}", queue))?;

        let started = Instant::now();
        let tickets = match self.store.snapshot(queue).await {
            Ok(tickets) => tickets,
            Err(e) => {
                self.record_store_error("snapshot");
                return Err(e).with_context(|| format!("Failed to read tickets for {}", queue));
            }
        };

        let mut report = EvaluationReport {
            tickets_seen: tickets.len(),
            ..Default::default()
        };

        if tickets.len() < self.planner.window_size(queue) {
            debug!(
                "Not enough tickets in {} ({} < {})",
                queue,
                tickets.len(),
                self.planner.window_size(queue)
            );
            self.record_evaluation(queue, started, report.tickets_seen);
            return Ok(report);
        }

        let eligible = self.eligible_tickets(queue, tickets).await?;
        report.eligible = eligible.len();

        for proposal in self.planner.plan(queue, &eligible, Utc::now()) {
            let player_ids = proposal.player_ids();
            match self.store.remove_all(queue, &player_ids).await {
                Ok(true) => {
                    let match_id = generate_match_id();
                    info!(
                        "Formed match {} in {} (bucket {}, quality {:.4}): {:?}",
                        match_id, queue, proposal.bucket, proposal.quality, player_ids
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_match_formed(queue, proposal.quality);
                    }
                    report.candidates.push(proposal.into_candidate(match_id));
                }
                Ok(false) => {
                    debug!(
                        "Skipping proposal in {}: a ticket left the queue ({:?})",
                        queue, player_ids
                    );
                    report.stale += 1;
                }
                Err(e) => {
                    // Nothing from this proposal was removed; its tickets stay queued.
                    error!("Failed to remove matched tickets from {}: {}", queue, e);
                    self.record_store_error("remove_all");
                    break;
                }
            }
        }

        let consumed: usize = report.candidates.iter().map(MatchCandidate::len).sum();
        self.record_evaluation(queue, started, report.tickets_seen - consumed);
        Ok(report)
    }

    /// Drop tickets whose player is already pinned to a live match
    async fn eligible_tickets(&self, queue: QueueType, tickets: Vec<Ticket>) -> Result<Vec<Ticket>> {
        let mut eligible = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let state = match self.store.get_user_state(&ticket.player_id).await {
                Ok(state) => state,
                Err(e) => {
                    self.record_store_error("get_user_state");
                    return Err(e).with_context(|| {
                        format!("Failed to read state of '{}' in {}", ticket.player_id, queue)
                    });
                }
            };
            if state.is_in_match() {
                warn!(
                    "Ticket for '{}' in {} ignored: player is in match {:?} ({:?})",
                    ticket.player_id, queue, state.match_id, state.state
                );
                continue;
            }
            eligible.push(ticket);
        }
        Ok(eligible)
    }

    fn record_evaluation(&self, queue: QueueType, started: Instant, waiting: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_evaluation(queue, started.elapsed(), waiting);
        }
    }

    fn record_store_error(&self, operation: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_store_error(operation);
        }
    }
}
