//! Player notifications
//!
//! The lifecycle only ever talks to players through `NotificationPort`. The
//! default implementation is a registry of live player connections, each an
//! outbound channel owned by the transport layer.

use crate::error::{MatchmakingError, Result};
use crate::types::PlayerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Kind of message pushed to a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Info,
    Error,
    MatchFound,
    PaymentPending,
    Removed,
}

/// Sends messages to players and tears down their connections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, player_id: &str, event: EventType, payload: serde_json::Value) -> Result<()>;

    /// Close the player's connection, if any
    async fn disconnect(&self, player_id: &str) -> Result<()>;
}

/// Message as delivered on a player's connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: serde_json::Value,
}

/// Live connections keyed by player id
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<PlayerId, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the transport reads outbound messages from the returned receiver.
    /// A newer connection for the same player replaces the old one.
    pub async fn register(&self, player_id: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .connections
            .write()
            .await
            .insert(player_id.to_string(), tx);
        if previous.is_some() {
            info!("Replaced existing connection for '{}'", player_id);
        }
        rx
    }

    /// Forget a connection; returns whether one was registered
    pub async fn unregister(&self, player_id: &str) -> bool {
        self.connections.write().await.remove(player_id).is_some()
    }

    pub async fn is_connected(&self, player_id: &str) -> bool {
        self.connections.read().await.contains_key(player_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl NotificationPort for ConnectionRegistry {
    async fn notify(&self, player_id: &str, event: EventType, payload: serde_json::Value) -> Result<()> {
        let sender = self.connections.read().await.get(player_id).cloned();
        let Some(sender) = sender else {
            return Err(MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into());
        };

        let message = OutboundMessage {
            event_type: event,
            message: payload,
        };
        if sender.send(message).is_err() {
            // Receiver dropped: the transport already went away.
            self.unregister(player_id).await;
            return Err(MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into());
        }
        debug!("Sent {:?} to '{}'", event, player_id);
        Ok(())
    }

    async fn disconnect(&self, player_id: &str) -> Result<()> {
        if self.unregister(player_id).await {
            info!("Disconnected '{}'", player_id);
        }
        Ok(())
    }
}
