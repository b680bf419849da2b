mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "trolley")]
#[command(about = "Autonomous grocery shopping for a metro.ca shopping list", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory (defaults to ~/.trolley)
    #[arg(long, global = true)]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and a starter shopping list
    Init {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show configuration and shopping-list status
    Status,

    /// Shop every pending item on the list
    Shop {
        /// Shopping list file (overrides the default location)
        #[arg(short, long)]
        list: Option<PathBuf>,

        /// Run the browser headless
        #[arg(long)]
        headless: bool,

        /// Worker count, or "len" for one worker per item
        #[arg(long)]
        concurrency: Option<String>,
    },

    /// Open the store login page and wait for a manual sign-in
    Auth {
        /// Seconds to wait for the session to become valid
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let paths = match cli.home {
        Some(base) => trolley_core::Paths::with_base(base),
        None => trolley_core::Paths::new(),
    };

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(&paths, force).await?;
        }
        Commands::Status => {
            commands::status::run(&paths).await?;
        }
        Commands::Shop {
            list,
            headless,
            concurrency,
        } => {
            commands::shop::run(&paths, list, headless, concurrency).await?;
        }
        Commands::Auth { timeout } => {
            commands::auth::run(&paths, timeout).await?;
        }
    }

    Ok(())
}
