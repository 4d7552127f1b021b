//! Payment verification

use crate::error::Result;
use crate::store::QueueStore;
use crate::types::MatchPlayerRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentPort: Send + Sync {
    /// Whether the player's stake for this match has been confirmed
    async fn check_payment(&self, player_id: &str, match_id: &str) -> Result<bool>;
}

/// Treats a submitted transaction hash as proof of payment.
///
/// Suitable for practice stakes and local runs; real deployments plug in a
/// verifier that checks the transaction on chain.
pub struct SubmittedHashVerifier {
    store: Arc<dyn QueueStore>,
}

impl SubmittedHashVerifier {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PaymentPort for SubmittedHashVerifier {
    async fn check_payment(&self, player_id: &str, match_id: &str) -> Result<bool> {
        let Some(raw) = self.store.hash_get(match_id, player_id).await? else {
            return Ok(false);
        };
        match MatchPlayerRecord::from_json(&raw) {
            Ok(record) => Ok(record
                .txn_hash
                .map(|hash| !hash.trim().is_empty())
                .unwrap_or(false)),
            Err(e) => {
                warn!(
                    "Unreadable record for '{}' in {} during payment check: {}",
                    player_id, match_id, e
                );
                Ok(false)
            }
        }
    }
}
