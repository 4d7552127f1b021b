//! Match quality scoring
//!
//! Two interchangeable strategies turn a pair of teams into a single quality
//! value; the evaluator compares it against the configured threshold.

use crate::types::Ticket;
use skillratings::trueskill::{
    match_quality_two_teams as match_quality_teams, TrueSkillConfig, TrueSkillRating,
};

/// Strategy producing a match-quality value from two teams
pub trait QualityScorer: Send + Sync {
    fn quality(&self, team_a: &[Ticket], team_b: &[Ticket]) -> f64;

    /// Mode name used in logs and configuration
    fn name(&self) -> &'static str;
}

/// Selectable scoring strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    TrueSkill,
    Glicko,
}

impl ScoringMode {
    /// Parse a configured mode; unrecognized names fall back to TrueSkill
    pub fn from_mode(mode: &str) -> Self {
        match mode.trim().to_lowercase().as_str() {
            "glicko" => ScoringMode::Glicko,
            _ => ScoringMode::TrueSkill,
        }
    }

    pub fn scorer(&self) -> Box<dyn QualityScorer> {
        match self {
            ScoringMode::TrueSkill => Box::new(TrueSkillScorer),
            ScoringMode::Glicko => Box::new(GlickoScorer),
        }
    }
}

/// Build the scorer for a configured mode string
pub fn scorer_for_mode(mode: &str) -> Box<dyn QualityScorer> {
    ScoringMode::from_mode(mode).scorer()
}

/// TrueSkill two-team draw quality.
///
/// Every player gets mean = score and deviation = score / 3. Beta is 1.5x the
/// average deviation of everyone in the match, tau is beta / 100 and the draw
/// probability is fixed at 0.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueSkillScorer;

impl TrueSkillScorer {
    fn ratings(team: &[Ticket]) -> Vec<TrueSkillRating> {
        team.iter()
            .map(|t| TrueSkillRating {
                rating: t.score,
                uncertainty: t.score / 3.0,
            })
            .collect()
    }
}

impl QualityScorer for TrueSkillScorer {
    fn quality(&self, team_a: &[Ticket], team_b: &[Ticket]) -> f64 {
        if team_a.is_empty() || team_b.is_empty() {
            return 0.0;
        }

        let ratings_a = Self::ratings(team_a);
        let ratings_b = Self::ratings(team_b);

        let player_count = (ratings_a.len() + ratings_b.len()) as f64;
        let avg_sigma = ratings_a
            .iter()
            .chain(ratings_b.iter())
            .map(|r| r.uncertainty)
            .sum::<f64>()
            / player_count;
        let beta = avg_sigma * 1.5;

        let config = TrueSkillConfig {
            draw_probability: 0.1,
            beta,
            default_dynamics: beta / 100.0,
        };

        let quality = match_quality_teams(&ratings_a, &ratings_b, &config);
        if quality.is_finite() {
            quality
        } else {
            0.0
        }
    }

    fn name(&self) -> &'static str {
        "trueskill"
    }
}

/// Elo-style quality from the teams' average scores.
///
/// quality = 1.5 - 1 / (1 + 10^((avgA - avgB) / 400)). The value is not
/// clamped and is not symmetric under team swap: it exceeds 1.0 whenever
/// team A is the stronger side.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlickoScorer;

fn average(team: &[Ticket]) -> f64 {
    team.iter().map(|t| t.score).sum::<f64>() / team.len() as f64
}

impl QualityScorer for GlickoScorer {
    fn quality(&self, team_a: &[Ticket], team_b: &[Ticket]) -> f64 {
        if team_a.is_empty() || team_b.is_empty() {
            return 0.0;
        }
        let diff = average(team_a) - average(team_b);
        let win_probability = 1.0 / (1.0 + 10f64.powf(diff / 400.0));
        1.5 - win_probability
    }

    fn name(&self) -> &'static str {
        "glicko"
    }
}
