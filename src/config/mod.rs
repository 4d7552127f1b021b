//! Configuration management for the matchmaking service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod app;
pub mod matchmaking;

// Re-export commonly used types
pub use app::{
    validate_config, validate_matchmaking, AppConfig, ServiceSettings, StoreBackend,
    StoreSettings,
};
pub use matchmaking::{LooseningSettings, MatchmakingSettings};
