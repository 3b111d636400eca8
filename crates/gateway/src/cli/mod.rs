pub mod chat;
pub mod config;
pub mod pid;
pub mod run;

use clap::{Parser, Subcommand};

use tern_domain::config::Config;

/// Tern — a conversational assistant gateway.
#[derive(Debug, Parser)]
#[command(name = "tern", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway server (also the default with no subcommand).
    Serve,
    /// Ask one question and print the answer.
    Run {
        /// Message text to send.
        message: String,
        /// Continue this session instead of minting a new one.
        #[arg(long)]
        session: Option<String>,
        /// Answer through this transport id (e.g. "anthropic").
        #[arg(long)]
        transport: Option<String>,
        /// Model name passed through to the transport.
        #[arg(long)]
        model: Option<String>,
        /// Emit the whole turn as JSON rather than plain text.
        #[arg(long)]
        json: bool,
    },
    /// Chat interactively in the terminal.
    Chat {
        /// Resume this session instead of minting a new one.
        #[arg(long)]
        session: Option<String>,
        /// Answer through this transport id (e.g. "anthropic").
        #[arg(long)]
        transport: Option<String>,
        /// Model name passed through to the transport.
        #[arg(long)]
        model: Option<String>,
    },
    /// Inspect or check the config file.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Show the version and exit.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Check the config file and list every problem found.
    Validate,
    /// Print the effective configuration, defaults filled in, as TOML.
    Show,
}

// ── Config file loading ───────────────────────────────────────────────

/// Read the config named by `TERN_CONFIG` (default `config.toml`).
/// A missing file yields the built-in defaults so `tern` works out of
/// the box; every subcommand boots through here.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let path = std::env::var("TERN_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = match std::fs::read_to_string(&path) {
        Ok(raw) => toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => anyhow::bail!("reading {path}: {e}"),
    };

    Ok((config, path))
}
