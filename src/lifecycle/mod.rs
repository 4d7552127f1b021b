//! Match lifecycle: acceptance, payment, scheduling and rollback

pub mod launcher;
pub mod runner;
pub mod state;

pub use launcher::LifecycleLauncher;
pub use runner::{LifecycleConfig, MatchLifecycle};
pub use state::{disposition, Disposition, MatchState};
