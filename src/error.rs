//! Error types for the matchmaking service
//!
//! Application-level operations return `anyhow::Result`, with the
//! `MatchmakingError` variants below used where callers need to tell
//! failure kinds apart (rejected tickets, unknown matches, bad config).

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid ticket: {reason}")]
    InvalidTicket { reason: String },

    #[error("Player {player_id} is already part of match {match_id}")]
    AlreadyInMatch { player_id: String, match_id: String },

    #[error("Unknown queue: {queue}")]
    UnknownQueue { queue: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: String },

    #[error("Invalid match response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("External call '{operation}' failed: {message}")]
    ExternalCallFailed { operation: String, message: String },

    #[error("External call '{operation}' timed out after {seconds}s")]
    ExternalCallTimedOut { operation: String, seconds: f64 },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for configuration failures
    pub fn config(message: impl Into<String>) -> Self {
        MatchmakingError::ConfigurationError {
            message: message.into(),
        }
    }
}
