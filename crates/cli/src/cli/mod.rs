pub mod chat;
pub mod config;
pub mod run;
pub mod tools;

use clap::{Parser, Subcommand};

/// Threadweave: a streaming, tool-calling conversation engine.
#[derive(Debug, Parser)]
#[command(name = "threadweave", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a single message and print the response.
    Run {
        /// The message to send.
        message: String,
        /// Model override (e.g. "gpt-4o").
        #[arg(long)]
        model: Option<String>,
        /// Print the full run output as JSON instead of streaming text.
        #[arg(long)]
        json: bool,
        /// Override `engine.max_rounds` for this call.
        #[arg(long)]
        max_rounds: Option<u32>,
    },
    /// Interactive chat with history carried across turns.
    Chat {
        /// Model override (e.g. "gpt-4o").
        #[arg(long)]
        model: Option<String>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// List the tools offered to the model.
    Tools,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `TW_CONFIG` (or `config.toml`).
/// A missing file yields the defaults. Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(tw_domain::config::Config, String)> {
    let config_path = std::env::var("TW_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<tw_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(tw_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
