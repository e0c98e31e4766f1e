//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Display name advertised to peers
    #[arg(short, long)]
    pub name: Option<String>,

    /// TCP port to accept connections on
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Become discoverable and wait for a peer to connect
    Listen,
    /// Discover nearby peers and pick one to connect to
    Scan,
    /// Connect directly to a known peer address (host:port)
    Connect {
        /// Peer address
        address: String,
    },
    /// Print the effective configuration as TOML
    Config,
}
