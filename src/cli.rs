use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "spot-wizard",
    version,
    about = "EC2 spot/on-demand pricing aggregator (CLI + HTTP API)"
)]
pub struct Cli {
    #[arg(short, long, global = true, env = "SPOT_WIZARD_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh pricing in the background and serve the HTTP API.
    Serve(ServeArgs),
    /// Check the pricing cache and re-download it if stale.
    Refresh(RefreshArgs),
    /// Print on-demand rates for one region and operating system.
    Pricing(PricingArgs),
    /// Print a summary of the spot advisor dataset.
    SpotData,
    /// List running instances across regions using AWS_* credentials.
    Inventory(InventoryArgs),
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Overrides `host` from config
    #[arg(long)]
    pub host: Option<String>,
    /// Overrides `port` from config
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub allow_remote: bool,
}

#[derive(Debug, Parser)]
pub struct RefreshArgs {
    /// Download even when the cached document is fresh
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct PricingArgs {
    #[arg(long)]
    pub region: String,
    #[arg(long, default_value = "Linux")]
    pub os: String,
}

#[derive(Debug, Parser)]
pub struct InventoryArgs {
    #[arg(long, value_delimiter = ',', required = true)]
    pub regions: Vec<String>,
    /// Print instance type counts instead of individual instances
    #[arg(long)]
    pub summary: bool,
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: String,
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: String,
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,
}
