//! Command-line interface for FleetWire.

mod config;
mod context;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetwire_core::config::{context_keys, defaults, env_vars};
use fleetwire_core::{Lifecycle, LifecycleExt, LifecycleStatus};
use fleetwire_devices::CodecRegistry;

use crate::config::FleetConfig;
use crate::context::{build_assets, FleetContext};

/// FleetWire - device event and command pipeline.
#[derive(Parser, Debug)]
#[command(name = "fleetwire")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to $FLEETWIRE_CONFIG or fleetwire.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble and start every component, print the state tree, then stop.
    Check,
    /// Decode a payload file and print the events as JSON.
    Decode {
        /// Payload kind (decoder name).
        #[arg(short, long, default_value = "json-batch")]
        kind: String,
        /// Payload file.
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Asset federation commands.
    Assets {
        #[command(subcommand)]
        assets_cmd: AssetsCommand,
    },
}

/// Asset subcommands.
#[derive(Subcommand, Debug)]
enum AssetsCommand {
    /// Search one asset module.
    Search {
        /// Module id.
        module: String,
        /// Criteria: empty, `key=value`, or free text.
        #[arg(default_value = "")]
        criteria: String,
    },
    /// Refresh every asset module.
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config_path = args.config.unwrap_or_else(env_vars::config_path);

    match args.command {
        Command::Check => run_check(FleetConfig::load(&config_path)?).await,
        Command::Decode { kind, file } => run_decode(&kind, &file),
        Command::Assets { assets_cmd } => {
            run_assets_cmd(FleetConfig::load(&config_path)?, assets_cmd).await
        }
    }
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(defaults::LOG_FILTER));

    if env_vars::log_json() {
        // JSON format for production/container environments
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run_check(config: FleetConfig) -> Result<()> {
    let context = FleetContext::build(&config)?;
    let supervisor = context.supervisor.clone();

    let started = supervisor.lifecycle_start().await;
    supervisor.component().log_state();
    print!("{}", supervisor.component().state_tree());

    println!("decoders: {}", context.registry.decoder_kinds().join(", "));
    println!(
        "pipelines: {}, asset modules: {}",
        context.pipelines.len(),
        context.assets.module_ids().len()
    );
    let metrics = context.destination.metrics();
    println!(
        "stored events: {}, batch operations: {}, commands delivered: {}",
        context.management.event_count(),
        context.batch.operation_ids().len(),
        metrics.delivered
    );

    if supervisor.component().status() == LifecycleStatus::Started {
        supervisor.lifecycle_stop().await?;
    }
    context.shutdown();

    started.context("FleetWire failed to start")?;
    println!("ok");
    Ok(())
}

fn run_decode(kind: &str, file: &Path) -> Result<()> {
    let payload =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let mut codec_context = HashMap::new();
    codec_context.insert(
        context_keys::ENQUEUE_TIME.to_string(),
        chrono::Utc::now().timestamp_millis().to_string(),
    );
    codec_context.insert(context_keys::SOURCE_ID.to_string(), "cli".to_string());

    let registry = CodecRegistry::with_defaults();
    let events = registry.decode(kind, &payload, &codec_context)?;
    tracing::debug!(kind, count = events.len(), "Payload decoded");
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

async fn run_assets_cmd(config: FleetConfig, cmd: AssetsCommand) -> Result<()> {
    let assets = build_assets(&config)?;
    assets.lifecycle_start().await?;

    let result = match cmd {
        AssetsCommand::Search { module, criteria } => assets
            .search(&module, &criteria)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|found| Ok(serde_json::to_string_pretty(&found)?)),
        AssetsCommand::Refresh => {
            let responses = assets.refresh_modules().await;
            serde_json::to_string_pretty(&responses).map_err(anyhow::Error::from)
        }
    };

    assets.lifecycle_stop().await?;
    println!("{}", result?);
    Ok(())
}
