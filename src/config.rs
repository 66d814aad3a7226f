use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::command::CommandTemplate;
use crate::error::ConfigError;
use crate::filter::{ExtensionFilter, IgnoreRules};
use crate::supervisor::StartMode;

/// Name of the optional configuration file in the watched root.
pub const CONFIG_FILE: &str = "hot-restart.toml";

pub const DEFAULT_EXTENSIONS: &[&str] = &["php"];
pub const DEFAULT_IGNORE_DIRS: &[&str] = &["storage"];
pub const DEFAULT_IDENTITY: &str = "swoole:http";
pub const DEFAULT_LIST_COMMAND: &str = "ps -ef";
pub const DEFAULT_START_COMMAND: &str = "php artisan swoole:http {action}";
pub const DEFAULT_STOP_COMMAND: &str = "pkill -f {identity}";
pub const DEFAULT_HEARTBEAT_SECS: f64 = 1.0;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 1000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: f64 = 5.0;

/// Configuration loaded from `hot-restart.toml`. Every field is optional; CLI
/// flags are layered on top with [`HotRestartConfig::merged`].
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct HotRestartConfig {
    /// File extensions whose changes trigger a restart.
    pub extensions: Option<Vec<String>>,
    /// Top-level directories (relative to the root) that never trigger a restart.
    pub ignore_dirs: Option<Vec<String>>,
    /// Minimum seconds between two restart cycles.
    pub heartbeat_secs: Option<f64>,
    /// Wait after a successful kill before starting again.
    pub grace_period_ms: Option<u64>,
    /// Substring identifying the managed process in the process listing.
    pub identity: Option<String>,
    pub list_command: Option<CommandTemplate>,
    pub start_command: Option<CommandTemplate>,
    pub stop_command: Option<CommandTemplate>,
    pub start_mode: Option<StartMode>,
    pub shutdown_timeout_secs: Option<f64>,
    /// Run one cycle as soon as the supervisor starts.
    pub start_on_launch: Option<bool>,
}

impl HotRestartConfig {
    /// Load configuration from `hot-restart.toml` in the given root directory.
    ///
    /// Returns a default (empty) configuration if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        Self::load_file(&root.join(CONFIG_FILE))
    }

    pub fn load_file(config_path: &Path) -> Self {
        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %config_path.display(), error = %err, "failed to parse config; using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %config_path.display(), error = %err, "failed to read config; using defaults");
                Self::default()
            }
        }
    }

    /// Layer `overrides` on top of `self`; any value set in `overrides` wins.
    pub fn merged(self, overrides: Self) -> Self {
        Self {
            extensions: overrides.extensions.or(self.extensions),
            ignore_dirs: overrides.ignore_dirs.or(self.ignore_dirs),
            heartbeat_secs: overrides.heartbeat_secs.or(self.heartbeat_secs),
            grace_period_ms: overrides.grace_period_ms.or(self.grace_period_ms),
            identity: overrides.identity.or(self.identity),
            list_command: overrides.list_command.or(self.list_command),
            start_command: overrides.start_command.or(self.start_command),
            stop_command: overrides.stop_command.or(self.stop_command),
            start_mode: overrides.start_mode.or(self.start_mode),
            shutdown_timeout_secs: overrides.shutdown_timeout_secs.or(self.shutdown_timeout_secs),
            start_on_launch: overrides.start_on_launch.or(self.start_on_launch),
        }
    }
}

/// Fully resolved, validated settings. Immutable once the supervisor starts.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub ignore_dirs: Vec<String>,
    pub extensions: ExtensionFilter,
    pub heartbeat: Duration,
    pub grace_period: Duration,
    pub identity: String,
    pub list_command: CommandTemplate,
    pub start_command: CommandTemplate,
    pub stop_command: CommandTemplate,
    pub start_mode: StartMode,
    pub shutdown_timeout: Duration,
    pub start_on_launch: bool,
}

impl Settings {
    /// Apply defaults to `config` and validate the result.
    pub fn resolve(root: PathBuf, config: HotRestartConfig) -> Result<Self, ConfigError> {
        let extensions = match config.extensions {
            Some(exts) => ExtensionFilter::new(exts),
            None => ExtensionFilter::new(DEFAULT_EXTENSIONS),
        };
        if extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        let identity = config
            .identity
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());
        if identity.trim().is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }

        let list_command = command_or_default(config.list_command, DEFAULT_LIST_COMMAND, "list")?;
        let start_command = command_or_default(config.start_command, DEFAULT_START_COMMAND, "start")?;
        let stop_command = command_or_default(config.stop_command, DEFAULT_STOP_COMMAND, "stop")?;

        let heartbeat = seconds(
            "heartbeat_secs",
            config.heartbeat_secs.unwrap_or(DEFAULT_HEARTBEAT_SECS),
        )?;
        let shutdown_timeout = seconds(
            "shutdown_timeout_secs",
            config
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        )?;

        let ignore_dirs = config.ignore_dirs.unwrap_or_else(|| {
            DEFAULT_IGNORE_DIRS.iter().map(|d| d.to_string()).collect()
        });

        Ok(Self {
            root,
            ignore_dirs,
            extensions,
            heartbeat,
            grace_period: Duration::from_millis(
                config.grace_period_ms.unwrap_or(DEFAULT_GRACE_PERIOD_MS),
            ),
            identity,
            list_command,
            start_command,
            stop_command,
            start_mode: config.start_mode.unwrap_or_default(),
            shutdown_timeout,
            start_on_launch: config.start_on_launch.unwrap_or(true),
        })
    }

    pub fn ignore_rules(&self) -> Result<IgnoreRules, ConfigError> {
        Ok(IgnoreRules::new(&self.root, &self.ignore_dirs)?)
    }
}

fn command_or_default(
    command: Option<CommandTemplate>,
    default: &str,
    name: &'static str,
) -> Result<CommandTemplate, ConfigError> {
    let command = command.unwrap_or_else(|| CommandTemplate::line(default));
    if command.is_empty() {
        return Err(ConfigError::EmptyCommand { name });
    }
    Ok(command)
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { name, value })
}
