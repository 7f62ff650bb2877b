//! ipwarden CLI - administer a running ipwarden server
//!
//! Usage:
//!   ipwarden block <IP>            Add an address to the block list
//!   ipwarden unblock <IP>          Remove an address from the block list
//!   ipwarden blocked               List blocked addresses
//!   ipwarden flags [--limit N]     Show recent suspicious IP flags
//!   ipwarden scan                  Run an anomaly scan now

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ipwarden")]
#[command(version)]
#[command(about = "Manage IP blocking and anomaly flags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server URL
    #[arg(long, global = true, env = "IPWARDEN_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Admin API token
    #[arg(long, global = true, env = "IPWARDEN_ADMIN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an IP address to the block list
    Block {
        /// IPv4 or IPv6 address
        ip: String,
    },

    /// Remove an IP address from the block list
    Unblock {
        /// IPv4 or IPv6 address
        ip: String,
    },

    /// List blocked IP addresses
    Blocked,

    /// Show recent suspicious IP flags
    Flags {
        /// Maximum number of flags to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Run an anomaly scan now
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},ipwarden_cli=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = config::Config::new(&cli.url, cli.token);
    tracing::debug!("Using server {}", config.server_url);

    match cli.command {
        Commands::Block { ip } => {
            commands::blocklist::block(&config, &ip).await?;
        }

        Commands::Unblock { ip } => {
            commands::blocklist::unblock(&config, &ip).await?;
        }

        Commands::Blocked => {
            commands::blocklist::list(&config).await?;
        }

        Commands::Flags { limit } => {
            commands::scan::flags(&config, limit).await?;
        }

        Commands::Scan => {
            commands::scan::scan(&config).await?;
        }
    }

    Ok(())
}
