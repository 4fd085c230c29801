mod commands;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{prelude::*, EnvFilter};
use wormhole_core::config::{self, AppConfig};

use crate::commands::Workspace;

#[derive(Parser)]
#[command(
    name = "wormholes",
    version,
    about = "Inspect and edit wormhole chest channels in saved worlds",
    arg_required_else_help = true
)]
struct Cli {
    /// Save root holding one directory per world (default from config)
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,
    /// Waive link costs for this invocation
    #[arg(long, global = true)]
    free: bool,
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List worlds with saved channel data, most recent first
    Worlds,
    /// Show every channel of a world with its members and contents
    Channels {
        /// World name
        world: String,
    },
    /// Show container to channel bindings of a world
    Members {
        /// World name
        world: String,
    },
    /// Price of the next create or link in a world
    Cost {
        /// World name
        world: String,
    },
    /// Create a channel or link a container into an existing one
    Link {
        /// World name
        world: String,
        /// Container id
        container: u32,
        /// Channel name
        channel: String,
        /// Resources the container holds, as KIND=COUNT (repeatable)
        #[arg(long = "item", value_parser = commands::parse_item)]
        items: Vec<(u32, u32)>,
        /// Currency available to pay for the link (unlimited when omitted)
        #[arg(long)]
        budget: Option<u64>,
    },
    /// Remove a container from its channel, as if it was destroyed
    Unlink {
        /// World name
        world: String,
        /// Container id
        container: u32,
    },
    /// Delete channels that no container is linked to
    Prune {
        /// World name
        world: String,
    },
    /// Write the default config file if missing and print the effective config
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    config::ensure_default_config()?;
    let mut config = AppConfig::load()?;
    if let Some(root) = cli.data_root.clone() {
        config.data_root = Some(root);
    }
    if cli.free {
        config.free_mode = true;
    }
    init_logging()?;

    let workspace = Workspace::new(config, cli.json);
    match cli.command {
        Command::Worlds => workspace.worlds(),
        Command::Channels { world } => workspace.channels(&world),
        Command::Members { world } => workspace.members(&world),
        Command::Cost { world } => workspace.cost(&world),
        Command::Link {
            world,
            container,
            channel,
            items,
            budget,
        } => workspace.link(&world, container, &channel, &items, budget),
        Command::Unlink { world, container } => workspace.unlink(&world, container),
        Command::Prune { world } => workspace.prune(&world),
        Command::Config => workspace.show_config(),
    }
}

fn init_logging() -> Result<()> {
    let log_dir = config::log_dir();
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("wormholes.log");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}
