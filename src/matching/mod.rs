//! Match evaluation
//!
//! Turns waiting tickets into match candidates: compatibility bucketing,
//! windowing, team formation and quality scoring.

pub mod evaluator;
pub mod formation;
pub mod quality;
pub mod quick_pair;

pub use evaluator::{bucket_tickets, EvaluationReport, MatchEvaluator, MatchPlanner, ProposedMatch};
pub use formation::form_teams;
pub use quality::{scorer_for_mode, GlickoScorer, QualityScorer, ScoringMode, TrueSkillScorer};
