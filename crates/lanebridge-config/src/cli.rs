//! CLI surface (spec §6 "CLI / environment").
//!
//! Grounded on the teacher's `bin_telegram::Cli` (`clap::Parser` with a
//! handful of flags plus an `EnvFilter`-driven log level).

use clap::Parser;

/// `--model`, `--project`, `--log-level`, `--config-file`,
/// `--list-models`, `--help`, `--version` (spec §6). `--help`/`--version`
/// are handled by `clap` itself.
#[derive(Debug, Parser)]
#[command(name = "lanebridge", about = "Chat-to-agent gateway", version)]
pub struct Cli {
    /// Override the session's model for this run.
    #[arg(long)]
    pub model: Option<String>,

    /// Project directory passed to `Agent::create_session`.
    #[arg(long)]
    pub project: Option<String>,

    /// Overrides `GatewayConfig::log_level` / `LANEBRIDGE_LOG_LEVEL`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to the TOML config file.
    #[arg(long, default_value = "lanebridge.toml")]
    pub config_file: String,

    /// List the agent backend's available models and exit.
    #[arg(long, default_value_t = false)]
    pub list_models: bool,
}
