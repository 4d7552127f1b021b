//! Service health: the running flag, a store ping and a snapshot of queue load

use crate::service::app::AppState;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Worse of the two
    fn combine(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }

    /// Value exported on the health gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    /// Time a check that yields `Err(reason)` when the component is down
    async fn timed<F>(name: &str, check: F) -> Self
    where
        F: Future<Output = std::result::Result<(), String>>,
    {
        let started = Instant::now();
        let (status, message) = match check.await {
            Ok(()) => (HealthStatus::Healthy, None),
            Err(reason) => (HealthStatus::Unhealthy, Some(reason)),
        };
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Waiting tickets per queue
    pub waiting_by_queue: BTreeMap<String, usize>,
    pub players_waiting: usize,
    pub active_lifecycles: usize,
    pub connected_players: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Full check; also refreshes the health gauges
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let running = Self::running(&app_state).await;
        let store = Self::store(&app_state).await;
        let status = running.status.combine(store.status);
        app_state.metrics().update_health_status(status.as_gauge());

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: crate::VERSION.to_string(),
            timestamp: Utc::now(),
            checks: vec![running, store],
            stats: Self::stats(&app_state).await,
        })
    }

    /// Alive as long as the service has not been shut down
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        Ok(Self::running(&app_state).await.status)
    }

    /// Ready when running and the store answers
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        let running = Self::running(&app_state).await.status;
        if running == HealthStatus::Unhealthy {
            return Ok(running);
        }
        Ok(Self::store(&app_state).await.status)
    }

    async fn running(app_state: &AppState) -> ComponentCheck {
        ComponentCheck::timed("service_running", async {
            if app_state.is_running().await {
                Ok(())
            } else {
                Err("service is not running".to_string())
            }
        })
        .await
    }

    async fn store(app_state: &AppState) -> ComponentCheck {
        let check = ComponentCheck::timed("store", async {
            app_state.store().ping().await.map_err(|e| {
                warn!("Store ping failed: {}", e);
                e.to_string()
            })
        })
        .await;
        app_state
            .metrics()
            .update_component_health("store", check.status == HealthStatus::Healthy);
        check
    }

    async fn stats(app_state: &AppState) -> ServiceStats {
        let mut stats = ServiceStats {
            active_lifecycles: app_state.launcher().active(),
            connected_players: app_state.registry().connected_count().await,
            uptime_seconds: app_state.uptime().as_secs(),
            ..Default::default()
        };

        let store = app_state.store();
        for &queue in app_state.crawler().queues() {
            match store.snapshot(queue).await {
                Ok(tickets) => {
                    stats.players_waiting += tickets.len();
                    stats.waiting_by_queue.insert(queue.to_string(), tickets.len());
                }
                Err(e) => debug!("Skipping {} in health stats: {}", queue, e),
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_status_combination() {
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }

    #[tokio::test]
    async fn test_check_before_start_is_unhealthy() {
        let app = Arc::new(AppState::new(AppConfig::default()).await.unwrap());
        let health = HealthCheck::check(app.clone()).await.unwrap();

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.checks.len(), 2);
        assert_eq!(health.checks[0].message.as_deref(), Some("service is not running"));
        assert_eq!(health.checks[1].status, HealthStatus::Healthy);
        assert_eq!(health.stats.players_waiting, 0);
        assert_eq!(
            HealthCheck::readiness_check(app).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_started_service_counts_waiting_players() {
        let app = Arc::new(AppState::new(AppConfig::default()).await.unwrap());
        app.start().await.unwrap();
        app.tickets()
            .submit_ticket(
                crate::types::QueueType::Cs2,
                crate::service::TicketRequest::new("p1", 1200.0),
            )
            .await
            .unwrap();

        let health = HealthCheck::check(app.clone()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.stats.players_waiting, 1);
        assert_eq!(health.stats.waiting_by_queue.get("cs2queue"), Some(&1));

        app.shutdown().await.unwrap();
    }
}
