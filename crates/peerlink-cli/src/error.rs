//! Error handling for the peerlink CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Arbitration error: {0}")]
    Arbiter(#[from] peerlink_core::ArbiterError),

    #[error("Transport error: {0}")]
    Transport(#[from] peerlink_core::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
