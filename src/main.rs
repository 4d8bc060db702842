//! botengine — bot engine core (Rust edition).
//!
//! Usage:
//!   botengine run           Start the supervisor (agent registry + lifecycle loops + dispatcher)
//!   botengine init          First-time setup: write default config, seed a user/bot/location
//!   botengine status        Show every bot's derived state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use botengine::agent::registry::AgentRegistry;
use botengine::commands::root_router;
use botengine::config::{self, EngineConfig};
use botengine::dispatch::{self, MessageDispatcher};
use botengine::lifecycle::{heartbeat, restart, state_update};
use botengine::model::{BotState, TerrainType};
use botengine::state::Database;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "botengine")]
#[command(version = "0.1.0")]
#[command(about = "Supervises untrusted bot subprocesses over a line-JSON wire protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the botengine home directory.
    #[arg(long, default_value_t = default_home_dir_str())]
    home: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the supervisor: agent registry, lifecycle loops, dispatcher.
    Run,

    /// First-time setup: write default config and seed a user/bot/location.
    Init,

    /// Show every registered bot's derived state.
    Status,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let home_dir = PathBuf::from(shellexpand::tilde(&cli.home).into_owned());

    match cli.command {
        Commands::Run => cmd_run(&home_dir).await,
        Commands::Init => cmd_init(&home_dir).await,
        Commands::Status => cmd_status(&home_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_init(home_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(home_dir)
        .with_context(|| format!("failed to create home directory: {}", home_dir.display()))?;

    let config_path = home_dir.join("botengine.toml");
    let config = if config_path.exists() {
        println!("{} config already exists at {:?}, leaving it alone", "==>".cyan().bold(), config_path);
        config::load_config(&config_path)?
    } else {
        let config = EngineConfig::default();
        config::save_config(&config, &config_path)?;
        println!("{} wrote default config to {:?}", "==>".green().bold(), config_path);
        config
    };

    std::fs::create_dir_all(config.resolved_base_dir())
        .with_context(|| format!("failed to create bots directory: {}", config.resolved_base_dir()))?;

    let db_path = config.resolved_db_path();
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory: {}", parent.display()))?;
    }
    let db = Database::open(Path::new(&db_path)).context("failed to open database")?;

    let existing = db.list_bots().context("failed to list bots")?;
    if existing.is_empty() {
        let user = db.create_user(10).context("failed to seed default user")?;
        let bot = db
            .create_bot(user.gid, "first-bot", "first-bot/main.py")
            .context("failed to seed default bot")?;
        let spawn = db
            .get_or_create_location(0, 0, TerrainType::Plains)
            .context("failed to seed spawn location")?;
        let army = db
            .create_starting_army(bot.gid, spawn.gid, &config.generators.army.starting_units)
            .context("failed to seed starting army")?;
        println!(
            "{} seeded user {} and bot '{}' ({})",
            "==>".green().bold(),
            user.gid,
            bot.name,
            bot.gid
        );
        println!("    starting army {} at ({}, {})", army.gid, spawn.x, spawn.y);
        println!(
            "    drop its entry point at {}/{}",
            config.resolved_base_dir(),
            bot.entry_point
        );
    } else {
        println!("{} {} bot(s) already registered, nothing to seed", "==>".cyan().bold(), existing.len());
    }

    println!("{} ready — run `botengine run` to start the supervisor", "==>".green().bold());
    Ok(())
}

async fn cmd_status(home_dir: &Path) -> Result<()> {
    let (config, db) = bootstrap(home_dir)?;
    let bots = db.list_bots().context("failed to list bots")?;

    println!();
    println!("{}", "=== Bot Engine Status ===".bold());
    println!();

    if bots.is_empty() {
        println!("  no bots registered — run `botengine init` first");
        println!();
        return Ok(());
    }

    let now = chrono::Utc::now();
    for bot in &bots {
        let state = bot.state(now, config.lifecycle.heartbeat.timeout_secs);
        let heartbeat_age = bot
            .heartbeat_age(now)
            .map(|d| format!("{:.1}s ago", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "never".into());
        let uptime =
            bot.uptime(now).map(|d| format!("{:.0}s", d.num_milliseconds() as f64 / 1000.0)).unwrap_or_else(|| "-".into());

        println!("  {} {}", colorize_state(state), bot.name.bold());
        println!("    gid:        {}", bot.gid);
        println!("    entry:      {}", bot.entry_point);
        println!("    heartbeat:  {}", heartbeat_age);
        println!("    uptime:     {}", uptime);

        let armies = db.list_armies_for_bot(bot.gid).unwrap_or_default();
        println!("    armies:     {}", armies.len());
        println!();
    }

    Ok(())
}

async fn cmd_run(home_dir: &Path) -> Result<()> {
    let (config, db) = bootstrap(home_dir)?;
    let config = Arc::new(config);
    let db = Arc::new(Mutex::new(db));
    let registry = Arc::new(AgentRegistry::new());

    let router = root_router((*config).clone());
    let dispatcher = Arc::new(MessageDispatcher::new(db.clone(), router, registry.clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let on_message = dispatch::on_message(tx);

    println!("{} starting botengine supervisor", ">>>".green().bold());
    info!(home = %home_dir.display(), "supervisor starting");

    let cancel = CancellationToken::new();

    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(rx, cancel).await })
    };

    let restart_handle = {
        let db = db.clone();
        let registry = registry.clone();
        let config = config.clone();
        let on_message = on_message.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { restart::run(db, registry, config, on_message, cancel).await })
    };

    let heartbeat_handle = {
        let db = db.clone();
        let registry = registry.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { heartbeat::run(db, registry, config, cancel).await })
    };

    let state_update_handle = {
        let db = db.clone();
        let registry = registry.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { state_update::run(db, registry, config, cancel).await })
    };

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    println!("\n{} shutting down gracefully...", "<<<".red().bold());

    cancel.cancel();

    let shutdown_timeout = tokio::time::Duration::from_secs(10);
    let joined = tokio::time::timeout(shutdown_timeout, async {
        if let Err(e) = dispatcher_handle.await {
            warn!(error = %e, "dispatcher task join error");
        }
        if let Err(e) = restart_handle.await {
            warn!(error = %e, "restart loop task join error");
        }
        if let Err(e) = heartbeat_handle.await {
            warn!(error = %e, "heartbeat loop task join error");
        }
        if let Err(e) = state_update_handle.await {
            warn!(error = %e, "state-update loop task join error");
        }
    })
    .await;
    if joined.is_err() {
        warn!("shutdown timed out waiting for supervisor tasks, proceeding anyway");
    }

    registry.remove_all().await;

    info!("supervisor shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bootstrap(home_dir: &Path) -> Result<(EngineConfig, Database)> {
    if !home_dir.exists() {
        std::fs::create_dir_all(home_dir)
            .with_context(|| format!("failed to create home directory: {}", home_dir.display()))?;
    }

    let config_path = home_dir.join("botengine.toml");
    if !config_path.exists() {
        eprintln!(
            "{} no config found at {:?}. Run `botengine init` first.",
            "Error:".red().bold(),
            config_path
        );
        std::process::exit(1);
    }

    let config = config::load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let db_path = config.resolved_db_path();
    let db_path = Path::new(&db_path);
    if let Some(parent) = db_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory: {}", parent.display()))?;
        }
    }

    let db = Database::open(db_path).with_context(|| format!("failed to open database at {}", db_path.display()))?;
    Ok((config, db))
}

fn default_home_dir_str() -> String {
    config::default_home_dir().to_string_lossy().into_owned()
}

fn colorize_state(state: BotState) -> String {
    let label = state.to_string();
    match state {
        BotState::Running => label.green().to_string(),
        BotState::Starting | BotState::Restarting => label.yellow().to_string(),
        BotState::Unresponsive => label.red().to_string(),
        BotState::Disabled => label.dimmed().to_string(),
    }
}
