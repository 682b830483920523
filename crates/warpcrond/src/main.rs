//! warpcrond: the warpcron daemon.
//!
//! Runs the schedule engine in a single process:
//! - Resource store (redb)
//! - Manifest loader
//! - Workflow and template watchers
//! - Schedule manager + cron engine
//! - Execution dispatcher
//!
//! # Usage
//!
//! ```text
//! warpcrond init --path warpcron.toml
//! warpcrond standalone --config warpcron.toml --data-dir /var/lib/warpcron --manifests ./manifests
//! warpcrond identity --cron "0 3 * * *" --timezone Europe/Warsaw --config browser=firefox
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use warpcron_core::{EngineConfig, ScheduleIdentity, ScheduleSpec};
use warpcron_state::StateStore;
use warpcron_trigger::CronEngine;
use warpcrond::{EngineOptions, ManifestLoader, build_service};

const DEFAULT_LOG_FILTER: &str = "info,warpcrond=debug,warpcron=debug";

#[derive(Parser)]
#[command(name = "warpcrond", about = "warpcron schedule daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine against a local store (single process).
    Standalone {
        /// Path to warpcron.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/warpcron")]
        data_dir: PathBuf,

        /// Directory of workflow/template manifests (overrides config).
        #[arg(long)]
        manifests: Option<PathBuf>,

        /// Environment to watch (overrides config).
        #[arg(long)]
        environment: Option<String>,
    },

    /// Write a scaffolded warpcron.toml.
    Init {
        #[arg(long, default_value = "warpcron.toml")]
        path: PathBuf,

        /// Environment id to put in the scaffold.
        #[arg(long, default_value = "default")]
        environment: String,
    },

    /// Print the identity of a schedule.
    Identity {
        #[arg(long)]
        cron: String,

        #[arg(long)]
        timezone: Option<String>,

        /// Config override as key=value; repeatable.
        #[arg(long = "config", value_parser = parse_key_value)]
        config: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            data_dir,
            manifests,
            environment,
        } => run_standalone(config, data_dir, manifests, environment).await,
        Command::Init { path, environment } => run_init(&path, &environment),
        Command::Identity {
            cron,
            timezone,
            config,
        } => run_identity(cron, timezone, config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

async fn run_standalone(
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    manifests: Option<PathBuf>,
    environment: Option<String>,
) -> anyhow::Result<()> {
    info!("warpcron daemon starting in standalone mode");

    let config = match &config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let mut options = EngineOptions::from_config(&config)?;
    if let Some(environment) = environment {
        options.environment_id = environment;
    }

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("warpcron.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Engine ─────────────────────────────────────────────────

    let cron = Arc::new(CronEngine::new());
    cron.start();
    let service = build_service(&store, cron, &options);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let loader_handle = match manifests.or_else(|| config.manifests_dir()) {
        Some(dir) => {
            let interval = config.rescan_interval()?;
            let loader = ManifestLoader::new(dir, store.clone(), options.environment_id.clone());
            Some(tokio::spawn(loader.run(interval, shutdown_rx.clone())))
        }
        None => {
            info!("no manifest directory configured");
            None
        }
    };

    let service_handle = tokio::spawn(service.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    service_handle.await?;
    if let Some(handle) = loader_handle {
        handle.await?;
    }

    info!("warpcron daemon stopped");
    Ok(())
}

fn run_init(path: &Path, environment: &str) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let config = EngineConfig::scaffold(environment);
    std::fs::write(path, config.to_toml_string()?)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn run_identity(
    cron: String,
    timezone: Option<String>,
    config: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let mut spec = ScheduleSpec::new(cron);
    if let Some(timezone) = timezone {
        spec = spec.with_timezone(timezone);
    }
    for (key, value) in config {
        spec = spec.with_config(key, value);
    }

    // Reject what the cron engine would reject.
    warpcron_trigger::parse_spec(&spec.trigger_spec())?;

    println!("identity: {}", ScheduleIdentity::of(&spec)?);
    println!("trigger:  {}", spec.trigger_spec());
    Ok(())
}
