//! mmf daemon: crawls the configured queues, runs match lifecycles and serves
//! health and metrics endpoints until SIGINT/SIGTERM.

use anyhow::{bail, Context, Result};
use clap::Parser;
use mmf::config::{validate_config, AppConfig, StoreBackend};
use mmf::metrics::{HealthServer, HealthServerConfig, MetricsService};
use mmf::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Extra time on top of the lifecycle drain for stopping everything else
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "mmf",
    version,
    about = "Matchmaking function for queued team and 1v1 games",
    long_about = "mmf crawls score-ordered player queues, forms balanced teams scored with \
                  TrueSkill or Glicko, and drives every formed match through acceptance, \
                  payment and external scheduling, returning players to the queue when a \
                  phase fails."
)]
struct Args {
    /// TOML configuration file; the environment is used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start, run one health check, print it and exit non-zero unless healthy
    #[arg(long)]
    health_check: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG still wins
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Same as --log-level debug
    #[arg(short, long)]
    debug: bool,

    /// Store backend (memory, redis)
    #[arg(long, value_name = "BACKEND")]
    store: Option<String>,

    #[arg(long, value_name = "URL")]
    redis_url: Option<String>,

    #[arg(long, value_name = "PORT")]
    health_port: Option<u16>,

    /// Scoring mode (trueskill, glicko)
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Players per team
    #[arg(long, value_name = "N")]
    team_size: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(level) = &self.log_level {
            config.service.log_level = level.clone();
        }
        if self.debug {
            config.service.log_level = "debug".to_string();
        }
        if let Some(backend) = &self.store {
            config.store.backend = match backend.as_str() {
                "memory" => StoreBackend::Memory,
                "redis" => StoreBackend::Redis,
                other => bail!("Unknown store backend '{}'", other),
            };
        }
        if let Some(url) = &self.redis_url {
            config.store.redis_url = url.clone();
        }
        if let Some(port) = self.health_port {
            config.service.health_port = port;
        }
        if let Some(mode) = &self.mode {
            config.matchmaking.mode = mode.clone();
        }
        if let Some(team_size) = self.team_size {
            config.matchmaking.team_size = team_size;
        }
        Ok(())
    }

    fn load_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::from_env()?,
        };
        self.apply(&mut config)?;
        validate_config(&config)?;
        Ok(config)
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Logging already initialized")
}

fn log_settings(config: &AppConfig) {
    let mm = &config.matchmaking;
    let queues: Vec<_> = mm.queues.iter().map(|q| q.as_str()).collect();
    info!(
        "{} v{} | store {:?} | health port {}",
        config.service.name,
        mmf::VERSION,
        config.store.backend,
        config.service.health_port
    );
    info!(
        "Matching {} with {} (team size {}, threshold {}, range {}), crawl every {}s",
        queues.join(", "),
        mm.mode,
        mm.team_size,
        mm.quality_threshold,
        mm.score_range,
        mm.crawl_interval_seconds
    );
    info!(
        "Accept window {}s, payment window {}s, quick pair on {:?}",
        mm.accept_timeout_seconds, mm.payment_timeout_seconds, mm.quick_pair_queues
    );
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("SIGINT received"),
            Err(e) => {
                error!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("SIGTERM received");
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}

async fn health_check_once(config: AppConfig) -> Result<ExitCode> {
    let app = Arc::new(AppState::new(config).await?);
    app.start().await?;
    let report = HealthCheck::check(app.clone()).await;
    app.shutdown().await?;

    let report = report?;
    println!("{}: {}", report.service, report.status);
    for check in &report.checks {
        match &check.message {
            Some(message) => println!("  {:<16} {} ({})", check.name, check.status, message),
            None => println!("  {:<16} {}", check.name, check.status),
        }
    }
    println!("  waiting players  {}", report.stats.players_waiting);

    Ok(if report.status == HealthStatus::Healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn spawn_health_server(app: &Arc<AppState>) -> MetricsService {
    let server_config = HealthServerConfig {
        port: app.config().service.health_port,
        ..HealthServerConfig::default()
    };
    let server = HealthServer::new(server_config, app.metrics()).with_app_state(app.clone());
    let service = MetricsService::new(app.metrics(), Arc::new(server));

    let serving = service.clone();
    tokio::spawn(async move {
        if let Err(e) = serving.start().await {
            error!("Health server exited: {:#}", e);
        }
    });
    service
}

async fn serve(config: AppConfig) -> Result<()> {
    let app = Arc::new(AppState::new(config).await?);
    app.start().await?;

    let health_server = app
        .config()
        .service
        .enable_metrics
        .then(|| spawn_health_server(&app));

    info!("{} is matching; Ctrl+C stops it", app.config().service.name);
    shutdown_signal().await;
    info!("Stopping: crawl loops first, then waiting for in-flight matches");

    if let Some(server) = &health_server {
        if let Err(e) = server.stop().await {
            warn!("Health server did not stop cleanly: {}", e);
        }
    }

    let limit = app.config().shutdown_timeout() + SHUTDOWN_SLACK;
    match tokio::time::timeout(limit, app.shutdown()).await {
        Ok(result) => result?,
        Err(_) => warn!(
            "Shutdown exceeded {:?}; unfinished matches resume on next start",
            limit
        ),
    }
    info!("{} stopped", app.config().service.name);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    if args.dry_run {
        log_settings(&config);
        info!("Configuration is valid; dry run, not starting");
        return ExitCode::SUCCESS;
    }

    if args.health_check {
        return match health_check_once(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Health check failed: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    log_settings(&config);
    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
