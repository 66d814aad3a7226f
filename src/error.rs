use thiserror::Error;

/// Failure of a single external command invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command template is empty")]
    Empty,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed (exit code {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// The process-listing command could not be run, so the running state is unknown.
#[derive(Debug, Error)]
#[error("process listing failed: {0}")]
pub struct DiscoveryError(#[from] pub CommandError);

/// Why a restart cycle was aborted.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("stop command failed: {0}")]
    Stop(CommandError),

    #[error("start command failed: {0}")]
    Start(CommandError),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

/// Invalid resolved configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one file extension must be configured")]
    NoExtensions,

    #[error("process identity must not be empty")]
    EmptyIdentity,

    #[error("{name} command must not be empty")]
    EmptyCommand { name: &'static str },

    #[error("{name} must be a non-negative number of seconds, got {value}")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("invalid ignore rule: {0}")]
    IgnoreRule(#[from] ignore::Error),
}
