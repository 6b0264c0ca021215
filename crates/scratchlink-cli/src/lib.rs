//! scratchlink agent library
//!
//! Command line, configuration and WebSocket server for the `scratchlink`
//! binary. The protocol itself lives in `scratchlink-core`.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod server;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, ConfigError};
pub use error::{CliError, Result};
pub use server::Server;
