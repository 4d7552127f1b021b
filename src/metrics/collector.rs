//! Metrics collection using Prometheus
//!
//! All metrics are registered on a dedicated registry and prefixed `mmf_`.

use crate::types::QueueType;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    lifecycle_metrics: LifecycleMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    pub component_health: IntGaugeVec,

    /// Failed store operations by operation name
    pub store_errors_total: IntCounterVec,
}

/// Waiting pool and evaluation metrics
#[derive(Clone)]
pub struct QueueMetrics {
    pub tickets_submitted_total: IntCounterVec,

    pub players_waiting: IntGaugeVec,

    pub evaluations_total: IntCounterVec,

    pub evaluation_duration: HistogramVec,

    pub matches_formed_total: IntCounterVec,

    /// Quality of committed matches
    pub match_quality: Histogram,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct LifecycleMetrics {
    pub active_lifecycles: IntGauge,

    /// Finished lifecycles by queue and terminal state
    pub outcomes_total: IntCounterVec,

    pub players_requeued_total: IntCounterVec,

    pub players_removed_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let lifecycle_metrics = LifecycleMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            lifecycle_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queues(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn lifecycles(&self) -> &LifecycleMetrics {
        &self.lifecycle_metrics
    }

    pub fn record_ticket_submitted(&self, queue: QueueType) {
        self.queue_metrics
            .tickets_submitted_total
            .with_label_values(&[queue.as_str()])
            .inc();
    }

    /// Record one evaluation tick and the pool size it saw
    pub fn record_evaluation(&self, queue: QueueType, duration: Duration, waiting: usize) {
        let label = queue.as_str();
        self.queue_metrics
            .evaluations_total
            .with_label_values(&[label])
            .inc();
        self.queue_metrics
            .evaluation_duration
            .with_label_values(&[label])
            .observe(duration.as_secs_f64());
        self.queue_metrics
            .players_waiting
            .with_label_values(&[label])
            .set(waiting as i64);
    }

    pub fn record_match_formed(&self, queue: QueueType, quality: f64) {
        self.queue_metrics
            .matches_formed_total
            .with_label_values(&[queue.as_str()])
            .inc();
        self.queue_metrics.match_quality.observe(quality);
    }

    pub fn lifecycle_started(&self) {
        self.lifecycle_metrics.active_lifecycles.inc();
    }

    pub fn lifecycle_finished(&self, queue: QueueType, outcome: &str) {
        self.lifecycle_metrics.active_lifecycles.dec();
        self.lifecycle_metrics
            .outcomes_total
            .with_label_values(&[queue.as_str(), outcome])
            .inc();
    }

    pub fn record_requeued(&self, queue: QueueType) {
        self.lifecycle_metrics
            .players_requeued_total
            .with_label_values(&[queue.as_str()])
            .inc();
    }

    pub fn record_removed(&self, queue: QueueType) {
        self.lifecycle_metrics
            .players_removed_total
            .with_label_values(&[queue.as_str()])
            .inc();
    }

    pub fn record_store_error(&self, operation: &str) {
        self.service_metrics
            .store_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_component_health(&self, component: &str, healthy: bool) {
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(if healthy { 1 } else { 0 });
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("mmf_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "mmf_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("mmf_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let store_errors_total = IntCounterVec::new(
            Opts::new("mmf_store_errors_total", "Failed store operations"),
            &["operation"],
        )?;
        registry.register(Box::new(store_errors_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            store_errors_total,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let tickets_submitted_total = IntCounterVec::new(
            Opts::new("mmf_tickets_submitted_total", "Tickets accepted into a queue"),
            &["queue"],
        )?;
        registry.register(Box::new(tickets_submitted_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new("mmf_players_waiting", "Players waiting at the last evaluation"),
            &["queue"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let evaluations_total = IntCounterVec::new(
            Opts::new("mmf_evaluations_total", "Evaluation ticks run"),
            &["queue"],
        )?;
        registry.register(Box::new(evaluations_total.clone()))?;

        let evaluation_duration = HistogramVec::new(
            HistogramOpts::new(
                "mmf_evaluation_duration_seconds",
                "Time spent in one evaluation tick",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["queue"],
        )?;
        registry.register(Box::new(evaluation_duration.clone()))?;

        let matches_formed_total = IntCounterVec::new(
            Opts::new("mmf_matches_formed_total", "Matches committed by the evaluator"),
            &["queue"],
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let match_quality = Histogram::with_opts(
            HistogramOpts::new("mmf_match_quality", "Quality of committed matches")
                .buckets(vec![0.5, 0.6, 0.7, 0.8, 0.85, 0.9, 0.95, 1.0, 1.25, 1.5]),
        )?;
        registry.register(Box::new(match_quality.clone()))?;

        Ok(Self {
            tickets_submitted_total,
            players_waiting,
            evaluations_total,
            evaluation_duration,
            matches_formed_total,
            match_quality,
        })
    }
}

impl LifecycleMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_lifecycles =
            IntGauge::new("mmf_active_lifecycles", "Match lifecycles in progress")?;
        registry.register(Box::new(active_lifecycles.clone()))?;

        let outcomes_total = IntCounterVec::new(
            Opts::new("mmf_lifecycle_outcomes_total", "Finished match lifecycles"),
            &["queue", "outcome"],
        )?;
        registry.register(Box::new(outcomes_total.clone()))?;

        let players_requeued_total = IntCounterVec::new(
            Opts::new("mmf_players_requeued_total", "Players returned to their queue"),
            &["queue"],
        )?;
        registry.register(Box::new(players_requeued_total.clone()))?;

        let players_removed_total = IntCounterVec::new(
            Opts::new("mmf_players_removed_total", "Players dropped from matchmaking"),
            &["queue"],
        )?;
        registry.register(Box::new(players_removed_total.clone()))?;

        Ok(Self {
            active_lifecycles,
            outcomes_total,
            players_requeued_total,
            players_removed_total,
        })
    }
}
