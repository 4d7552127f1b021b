//! Quick pairing with per-player widening tolerance
//!
//! Queues in this mode skip the fixed window and threshold. Every waiting
//! player accepts opponents within a score tolerance that starts narrow and
//! widens the longer they wait; two players form a 1v1 as soon as each one is
//! inside the other's current tolerance.

use crate::config::LooseningSettings;
use crate::matching::evaluator::ProposedMatch;
use crate::matching::quality::QualityScorer;
use crate::types::{QueueType, Ticket};
use chrono::{DateTime, Utc};

/// Pair players of one score-ordered bucket greedily with their nearest
/// higher-scored mutually acceptable neighbour.
pub fn pair_bucket(
    queue: QueueType,
    bucket_key: &str,
    bucket: &[Ticket],
    loosening: &LooseningSettings,
    scorer: &dyn QualityScorer,
    now: DateTime<Utc>,
) -> Vec<ProposedMatch> {
    let tolerances: Vec<f64> = bucket
        .iter()
        .map(|t| loosening.tolerance_for(t.waited(now)))
        .collect();
    let mut matched = vec![false; bucket.len()];
    let mut proposals = Vec::new();

    for i in 0..bucket.len() {
        if matched[i] {
            continue;
        }
        for j in (i + 1)..bucket.len() {
            if matched[j] {
                continue;
            }
            let gap = bucket[j].score - bucket[i].score;
            if gap > tolerances[i] {
                // Sorted ascending: everyone further up is even further away.
                break;
            }
            if gap <= tolerances[j] {
                matched[i] = true;
                matched[j] = true;
                let team_a = vec![bucket[i].clone()];
                let team_b = vec![bucket[j].clone()];
                let quality = scorer.quality(&team_a, &team_b);
                proposals.push(ProposedMatch {
                    queue,
                    bucket: bucket_key.to_string(),
                    team_a,
                    team_b,
                    quality,
                });
                break;
            }
        }
    }

    proposals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::quality::GlickoScorer;

    fn waiting(id: &str, score: f64, waited_secs: i64, now: DateTime<Utc>) -> Ticket {
        Ticket::new(id, score, "").joined_at(now - chrono::Duration::seconds(waited_secs))
    }

    #[test]
    fn test_fresh_players_need_narrow_gap() {
        let now = Utc::now();
        let bucket = vec![
            waiting("a", 1000.0, 0, now),
            waiting("b", 1040.0, 0, now),
            waiting("c", 1200.0, 0, now),
            waiting("d", 1400.0, 0, now),
        ];
        let proposals = pair_bucket(
            QueueType::Lichess,
            "5_0_practice",
            &bucket,
            &LooseningSettings::default(),
            &GlickoScorer,
            now,
        );
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].team_a[0].player_id, "a");
        assert_eq!(proposals[0].team_b[0].player_id, "b");
    }

    #[test]
    fn test_tolerance_must_be_mutual() {
        let now = Utc::now();
        // "a" has waited out the grace period (±250) but "b" just arrived (±50).
        let bucket = vec![waiting("a", 1000.0, 120, now), waiting("b", 1200.0, 0, now)];
        let proposals = pair_bucket(
            QueueType::Lichess,
            "all",
            &bucket,
            &LooseningSettings::default(),
            &GlickoScorer,
            now,
        );
        assert!(proposals.is_empty());

        let bucket = vec![waiting("a", 1000.0, 120, now), waiting("b", 1200.0, 120, now)];
        let proposals = pair_bucket(
            QueueType::Lichess,
            "all",
            &bucket,
            &LooseningSettings::default(),
            &GlickoScorer,
            now,
        );
        assert_eq!(proposals.len(), 1);
    }

    #[test]
    fn test_each_player_used_once() {
        let now = Utc::now();
        let bucket = vec![
            waiting("a", 1000.0, 300, now),
            waiting("b", 1010.0, 300, now),
            waiting("c", 1020.0, 300, now),
        ];
        let proposals = pair_bucket(
            QueueType::Lichess,
            "all",
            &bucket,
            &LooseningSettings::default(),
            &GlickoScorer,
            now,
        );
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].player_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
