//! Restart a long-running development server whenever its source files change,
//! keeping at most one instance alive and never restarting more often than a
//! configured heartbeat.

pub mod cli;
pub mod command;
pub mod config;
pub mod debounce;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod logging;
pub mod output;
pub mod supervisor;
pub mod watcher;

use std::path::Path;

use anyhow::Context;

use config::{HotRestartConfig, Settings};

/// Load `hot-restart.toml` (or `config_file`), apply `overrides` and resolve
/// against the canonical project root.
pub fn load_settings(
    root: &Path,
    config_file: Option<&Path>,
    overrides: HotRestartConfig,
) -> anyhow::Result<Settings> {
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot open project root {}", root.display()))?;

    let file_config = match config_file {
        Some(path) => HotRestartConfig::load_file(path),
        None => HotRestartConfig::load(&root),
    };

    Settings::resolve(root, file_config.merged(overrides)).context("invalid configuration")
}
