pub mod commands;
pub mod core;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::commands::{ConfigCommand, ModsCommand, EXIT_FAILURE};

#[derive(Debug, Parser)]
#[command(name = "msc", version, about = "Minecraft server companion")]
pub struct Cli {
    /// Server root directory (contains .msc.json)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the declarative mods manifest
    #[command(subcommand)]
    Mods(ModsCommand),
    /// Manage per-user defaults
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Parse the command line, run it, and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable.
    let default_filter = if cli.verbose {
        "info,msc_lib=debug"
    } else {
        "warn,msc_lib=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: could not start async runtime: {e}");
            return EXIT_FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Mods(command) => commands::mods(cli.root.as_deref(), command).await,
            Commands::Config(command) => commands::config(command),
        }
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            commands::exit_code(&e)
        }
    }
}
