//! Pairing preview CLI tool
//!
//! Reads tickets from a JSON file and prints the matches the evaluator would
//! form for them. Nothing is removed from any queue and no lifecycle starts.
//!
//! Usage:
//!   cargo run --bin pairing-preview -- --queue d2queue --tickets tickets.json
//!   cargo run --bin pairing-preview -- --queue lcqueue --tickets chess.json --quick-pair
//!   cargo run --bin pairing-preview -- --queue cs2queue --tickets t.json --team-size 2 --threshold 0.6

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use mmf::config::{validate_matchmaking, AppConfig, MatchmakingSettings};
use mmf::matching::MatchPlanner;
use mmf::types::{QueueType, Ticket};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pairing-preview")]
#[command(about = "Dry-run the matchmaking evaluator over a JSON ticket list")]
struct Cli {
    /// Queue the tickets belong to (cs2queue, d2queue, lcqueue)
    #[arg(short, long)]
    queue: QueueType,

    /// JSON array of tickets: [{"playerId": "...", "score": 1000, ...}]
    #[arg(short, long, value_name = "FILE")]
    tickets: PathBuf,

    /// Base configuration file; defaults apply otherwise
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scoring mode (trueskill, glicko)
    #[arg(short, long)]
    mode: Option<String>,

    #[arg(long)]
    team_size: Option<usize>,

    /// Minimum quality a window must reach
    #[arg(long)]
    threshold: Option<f64>,

    /// Maximum score spread inside a window
    #[arg(long)]
    range: Option<f64>,

    /// Evaluate the queue in loosened-over-time mode
    #[arg(long)]
    quick_pair: bool,
}

fn settings_from(cli: &Cli) -> Result<MatchmakingSettings> {
    let mut settings = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.matchmaking,
        None => MatchmakingSettings::default(),
    };

    if let Some(mode) = &cli.mode {
        settings.mode = mode.clone();
    }
    if let Some(team_size) = cli.team_size {
        settings.team_size = team_size;
    }
    if let Some(threshold) = cli.threshold {
        settings.quality_threshold = threshold;
    }
    if let Some(range) = cli.range {
        settings.score_range = range;
    }
    if cli.quick_pair && !settings.is_quick_pair(cli.queue) {
        settings.quick_pair_queues.push(cli.queue);
    }

    validate_matchmaking(&settings)?;
    Ok(settings)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = settings_from(&cli)?;

    let raw = std::fs::read_to_string(&cli.tickets)
        .with_context(|| format!("Failed to read tickets from {}", cli.tickets.display()))?;
    let mut tickets: Vec<Ticket> =
        serde_json::from_str(&raw).context("Tickets file is not a JSON ticket array")?;
    tickets.sort_by(|a, b| a.score.total_cmp(&b.score));

    let planner = MatchPlanner::new(settings);
    let proposals = planner.plan(cli.queue, &tickets, Utc::now());

    let matched: usize = proposals.iter().map(|p| p.player_ids().len()).sum();
    let report = json!({
        "queue": cli.queue,
        "mode": planner.settings().mode,
        "windowSize": planner.window_size(cli.queue),
        "tickets": tickets.len(),
        "matchedPlayers": matched,
        "matches": proposals,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
