//! mmf - matchmaking function for queued team and 1v1 games
//!
//! Tickets wait in score-ordered queues. A periodic crawl windows each queue,
//! forms balanced teams, scores them, and hands every good enough match to a
//! lifecycle task that drives acceptance, payment and scheduling, rolling the
//! players back into matchmaking when any phase fails.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod matching;
pub mod metrics;
pub mod ports;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use lifecycle::{LifecycleLauncher, MatchLifecycle, MatchState};
pub use matching::{MatchEvaluator, MatchPlanner};
pub use store::{InMemoryQueueStore, QueueStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
