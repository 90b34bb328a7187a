use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "key-pool",
    version,
    about = "Manage a pool of API keys with load balancing and cooldowns",
    long_about = "Register API keys, inspect their health and cooldown state, and tune \
                  the request distribution pool shared by translation and enrichment callers."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "KEY_POOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "warn", env = "RUST_LOG")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "KEY_POOL_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Key management commands
    Keys {
        #[command(subcommand)]
        action: KeyCommands,
    },

    /// Show pool status
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set parallel calls per batch (1-16)
    Concurrency {
        #[arg(value_name = "N")]
        value: usize,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Generate configuration templates
    Generate {
        #[command(subcommand)]
        template: GenerateCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// List all registered keys and their status
    List {
        /// Show counters and last error
        #[arg(short, long)]
        verbose: bool,
    },

    /// Register a new key
    Add {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Raw key; prefer the environment variable to keep it out of shell history
        #[arg(short, long, env = "KEY_POOL_SECRET", hide_env_values = true)]
        secret: String,
    },

    /// Remove a key
    Remove { id: String },

    /// Clear a key's error streak and cooldown
    Reset { id: String },

    /// Put a key back into rotation
    Enable { id: String },

    /// Take a key out of rotation
    Disable { id: String },

    /// Rename a key
    Rename { id: String, name: String },

    /// Make a key the active key for single-key callers
    Activate { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GenerateCommands {
    /// Generate example configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "key_pool.yaml")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
