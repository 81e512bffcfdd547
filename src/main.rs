//! Headless battle runner. Plays seeded skirmishes through the phase engine.
//!
//! Usage:
//!   battle-phase-engine --players 3 --rounds 8 --seed 7
//!   battle-phase-engine --config battle_engine.toml --save-dir ./saves --json

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use battle_phase_engine::engine::config::{load_config, load_default_config};
use battle_phase_engine::engine::session::{run_session, SessionConfig};

#[derive(Parser)]
#[command(name = "battle-phase-engine", about = "Run a headless battle through the round/phase engine")]
struct Cli {
    /// Number of players
    #[arg(long, default_value = "2", env = "BATTLE_ENGINE_PLAYERS")]
    players: usize,

    /// Units per player
    #[arg(long, default_value = "3")]
    units: usize,

    /// Round at which the largest surviving force is declared the winner
    #[arg(long, default_value = "10")]
    rounds: u32,

    /// Random seed
    #[arg(long, default_value = "42", env = "BATTLE_ENGINE_SEED")]
    seed: u64,

    /// Path to battle_engine.toml (default: auto-discover)
    #[arg(long, env = "BATTLE_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Write checkpoints to this directory instead of keeping them in memory
    #[arg(long, env = "BATTLE_ENGINE_SAVE_DIR")]
    save_dir: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let engine = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_default_config(),
    };
    let save_dir = cli
        .save_dir
        .clone()
        .or_else(|| cli.config.is_some().then(|| engine.autosave.directory.clone()));

    let config = SessionConfig {
        players: cli.players,
        units_per_player: cli.units,
        seed: cli.seed,
        round_limit: cli.rounds,
        engine,
        save_dir,
        ..SessionConfig::default()
    };
    tracing::info!(
        players = config.players,
        seed = config.seed,
        rounds = config.round_limit,
        "starting session"
    );

    let summary = tokio::task::spawn_blocking(move || run_session(&config)).await??;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.summary());
    }
    Ok(())
}
