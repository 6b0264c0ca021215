//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Listen address, overriding the configuration (e.g. 127.0.0.1:20110)
    #[arg(short, long, global = true)]
    pub address: Option<String>,
}

impl Cli {
    /// The command to run; serving is the default
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the WebSocket agent (default)
    Serve,
    /// Scan for peripherals and print what is found
    Peers {
        /// Only report peripherals with exactly this name
        #[arg(long)]
        filter_name: Option<String>,
        /// Only report peripherals whose name starts with this prefix
        #[arg(long)]
        name_prefix: Option<String>,
        /// How long to scan
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
    /// Print a commented default configuration file
    ExampleConfig,
}
