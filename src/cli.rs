use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::command::CommandTemplate;
use crate::config::HotRestartConfig;
use crate::logging::LogFormat;
use crate::supervisor::StartMode;

/// Restart a development server whenever its source files change.
///
/// hot-restart watches a project tree, and on every relevant change stops any
/// running instance of the server and starts a fresh one, never more than one
/// at a time and never more often than the heartbeat threshold allows.
#[derive(Parser, Debug)]
#[command(
    name = "hot-restart",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    /// Log filter (e.g. "debug" or "hot_restart=trace"). Defaults to RUST_LOG, then "info".
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the project and restart the managed server on changes.
    Watch {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Do not start the server at launch; wait for the first change.
        #[arg(long)]
        no_initial_start: bool,
    },

    /// Report how many instances of the managed server are running.
    Status {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Run the stop command once.
    Stop {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// Options shared by every subcommand. Each flag overrides the matching key
/// in `hot-restart.toml`.
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Project root to watch; also where hot-restart.toml is looked up.
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Read configuration from this file instead of <PATH>/hot-restart.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Watched file extensions (comma-separated, e.g. "php,env").
    #[arg(long = "ext", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Top-level directories to ignore (comma-separated).
    #[arg(long = "ignore-dir", value_delimiter = ',')]
    pub ignore_dirs: Vec<String>,

    /// Minimum seconds between restarts.
    #[arg(long = "heartbeat")]
    pub heartbeat_secs: Option<f64>,

    /// Milliseconds to wait after stopping before starting again.
    #[arg(long = "grace-ms")]
    pub grace_period_ms: Option<u64>,

    /// Substring identifying the server in the process listing.
    ///
    /// Prefer setting this in hot-restart.toml: with the default stop command
    /// (`pkill -f {identity}`) a token on our own command line matches us too.
    #[arg(long)]
    pub identity: Option<String>,

    /// Process listing command.
    #[arg(long = "list-cmd")]
    pub list_command: Option<String>,

    /// Start command template; `{action}` becomes "start".
    #[arg(long = "start-cmd")]
    pub start_command: Option<String>,

    /// Stop command template; `{identity}` becomes the identity token.
    #[arg(long = "stop-cmd")]
    pub stop_command: Option<String>,

    /// How to run the start command.
    #[arg(long, value_enum)]
    pub start_mode: Option<StartMode>,
}

impl SettingsArgs {
    /// Convert the flags that were actually given into a config overlay.
    pub fn overrides(&self) -> HotRestartConfig {
        HotRestartConfig {
            extensions: non_empty(&self.extensions),
            ignore_dirs: non_empty(&self.ignore_dirs),
            heartbeat_secs: self.heartbeat_secs,
            grace_period_ms: self.grace_period_ms,
            identity: self.identity.clone(),
            list_command: self.list_command.as_deref().map(CommandTemplate::line),
            start_command: self.start_command.as_deref().map(CommandTemplate::line),
            stop_command: self.stop_command.as_deref().map(CommandTemplate::line),
            start_mode: self.start_mode,
            shutdown_timeout_secs: None,
            start_on_launch: None,
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
