//! Peerlink CLI library
//!
//! Terminal chat between two devices on the same network. The
//! [`RoleArbiter`](peerlink_core::RoleArbiter) from `peerlink-core` decides
//! who connects to whom; this crate supplies a LAN transport, a terminal
//! presenter and the command loop.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod lan;
pub mod presenter;

pub use app::PeerlinkApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use lan::{LanTransport, LanTransportConfig};
pub use presenter::TerminalPresenter;
