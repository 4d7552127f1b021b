//! Main application state and service coordination
//!
//! `AppState` wires the store, ports, evaluator, lifecycle launcher and crawl
//! loops together and owns their background tasks.

use crate::config::{validate_config, AppConfig};
use crate::lifecycle::{LifecycleConfig, LifecycleLauncher};
use crate::matching::MatchEvaluator;
use crate::metrics::MetricsCollector;
use crate::ports::{ConnectionRegistry, LocalScheduler, MatchPorts, SubmittedHashVerifier};
use crate::service::crawler::Crawler;
use crate::service::tickets::TicketService;
use crate::store::{build_store, QueueStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    store: Arc<dyn QueueStore>,
    registry: Arc<ConnectionRegistry>,
    tickets: Arc<TicketService>,
    evaluator: Arc<MatchEvaluator>,
    launcher: LifecycleLauncher,
    crawler: Crawler,
    metrics: Arc<MetricsCollector>,
    started_at: Instant,
    is_running: Arc<RwLock<bool>>,
    shutdown_tx: watch::Sender<bool>,
    crawl_tasks: Mutex<Vec<JoinHandle<()>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Build the service from configuration with the default adapters
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        info!(
            "Initializing {} with {:?} store",
            config.service.name, config.store.backend
        );
        let store = build_store(&config.store)
            .await
            .map_err(|e| ServiceError::Store {
                message: format!("Failed to open store: {}", e),
            })?;

        let registry = Arc::new(ConnectionRegistry::new());
        let ports = MatchPorts::new(
            registry.clone(),
            Arc::new(LocalScheduler::new()),
            Arc::new(SubmittedHashVerifier::new(store.clone())),
        );
        Self::with_components(config, store, registry, ports)
    }

    /// Build the service around an existing store and ports
    pub fn with_components(
        config: AppConfig,
        store: Arc<dyn QueueStore>,
        registry: Arc<ConnectionRegistry>,
        ports: MatchPorts,
    ) -> Result<Self, ServiceError> {
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let settings = config.matchmaking.clone();
        let evaluator = Arc::new(
            MatchEvaluator::new(store.clone(), settings.clone()).with_metrics(metrics.clone()),
        );
        let launcher = LifecycleLauncher::new(
            store.clone(),
            ports,
            LifecycleConfig::from(&settings),
        )
        .with_metrics(metrics.clone());
        let crawler = Crawler::new(
            evaluator.clone(),
            launcher.clone(),
            settings.queues.clone(),
            settings.crawl_interval(),
        );
        let tickets = Arc::new(
            TicketService::new(store.clone(), settings.queues.clone())
                .with_metrics(metrics.clone()),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            registry,
            tickets,
            evaluator,
            launcher,
            crawler,
            metrics,
            started_at: Instant::now(),
            is_running: Arc::new(RwLock::new(false)),
            shutdown_tx,
            crawl_tasks: Mutex::new(Vec::new()),
            background_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Resume in-flight matches, then start the crawl loops and maintenance tasks
    pub async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting {}", self.config.service.name);
        *self.is_running.write().await = true;

        match self.launcher.resume_all().await {
            Ok(resumed) => debug!("{} lifecycles resumed", resumed.len()),
            Err(e) => {
                return Err(ServiceError::Store {
                    message: format!("Failed to list in-flight matches: {}", e),
                })
            }
        }

        let crawl = self.crawler.spawn(self.shutdown_tx.subscribe());
        info!("{} crawl loops started", crawl.len());
        self.crawl_tasks.lock().await.extend(crawl);

        let health_task = {
            let metrics = self.metrics.clone();
            let store = self.store.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;
            let mut shutdown = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(15));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    if !*is_running.read().await {
                        break;
                    }
                    metrics.update_uptime(started_at.elapsed());
                    let store_ok = store.ping().await.is_ok();
                    metrics.update_component_health("store", store_ok);
                    metrics.update_health_status(if store_ok { 2 } else { 0 });
                }
                debug!("Health metrics task stopped");
            })
        };
        self.background_tasks.lock().await.push(health_task);

        info!("{} started", self.config.service.name);
        Ok(())
    }

    /// Stop crawling, let in-flight lifecycles finish within the shutdown timeout
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);
        *self.is_running.write().await = false;
        let _ = self.shutdown_tx.send(true);

        let crawl: Vec<_> = self.crawl_tasks.lock().await.drain(..).collect();
        for task in crawl {
            if let Err(e) = task.await {
                error!("Crawl loop ended abnormally: {}", e);
            }
        }

        let limit = self.config.shutdown_timeout();
        if !self.launcher.wait_idle(limit).await {
            warn!(
                "{} lifecycles still running after {:?}; their records stay for the next start",
                self.launcher.active(),
                limit
            );
        }

        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }

        info!("{} shutdown completed", self.config.service.name);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn tickets(&self) -> Arc<TicketService> {
        self.tickets.clone()
    }

    pub fn evaluator(&self) -> Arc<MatchEvaluator> {
        self.evaluator.clone()
    }

    pub fn launcher(&self) -> &LifecycleLauncher {
        &self.launcher
    }

    pub fn crawler(&self) -> &Crawler {
        &self.crawler
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }
}
