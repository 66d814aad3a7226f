use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::CommandError;

/// Value substituted for the `{action}` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// A configured command line with `{action}` and `{identity}` placeholders.
///
/// In TOML this is either a single string, split on whitespace, or an array of
/// arguments for commands whose arguments contain spaces.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandTemplate {
    Line(String),
    Argv(Vec<String>),
}

impl CommandTemplate {
    pub fn line(line: impl Into<String>) -> Self {
        Self::Line(line.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Line(line) => line.trim().is_empty(),
            Self::Argv(argv) => argv.iter().all(|a| a.trim().is_empty()),
        }
    }

    /// Substitute placeholders and split into program + arguments.
    ///
    /// `{action}` is left untouched when `action` is `None`.
    pub fn render(&self, identity: &str, action: Option<Action>) -> Result<CommandLine, CommandError> {
        let substitute = |word: &str| {
            let word = word.replace("{identity}", identity);
            match action {
                Some(action) => word.replace("{action}", action.as_str()),
                None => word,
            }
        };

        let mut argv: Vec<String> = match self {
            Self::Line(line) => line.split_whitespace().map(substitute).collect(),
            Self::Argv(argv) => argv
                .iter()
                .filter(|a| !a.is_empty())
                .map(|a| substitute(a))
                .collect(),
        };

        if argv.is_empty() {
            return Err(CommandError::Empty);
        }
        let program = argv.remove(0);
        Ok(CommandLine {
            program,
            args: argv,
        })
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(line) => f.write_str(line),
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

/// A rendered command, ready to execute without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes external commands on behalf of the supervisor.
///
/// Injected so restart cycles can be tested without spawning real processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A spawn failure or non-zero exit is an error.
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput, CommandError>;

    /// Spawn without waiting for exit and return the child's pid.
    async fn spawn_detached(&self, command: &CommandLine) -> Result<u32, CommandError>;

    /// Kill a child previously returned by `spawn_detached`.
    async fn terminate_detached(&self, pid: u32);
}

/// Runs commands as real child processes via `tokio::process`.
#[derive(Default)]
pub struct SystemRunner {
    /// Kill switches for detached children, removed once the child is reaped.
    detached: Arc<Mutex<HashMap<u32, oneshot::Sender<()>>>>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput, CommandError> {
        debug!(%command, "running command");
        // A cancelled cycle drops this future; the child must not outlive it.
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    async fn spawn_detached(&self, command: &CommandLine) -> Result<u32, CommandError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let Some(pid) = child.id() else {
            // Already exited and reaped before we could look at it.
            let status = child.wait().await.ok().and_then(|s| s.code());
            return Err(CommandError::Failed {
                command: command.to_string(),
                code: status,
                stderr: "process exited immediately".to_string(),
            });
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        self.detached.lock().insert(pid, kill_tx);

        let detached = Arc::clone(&self.detached);
        let label = command.to_string();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!(pid, command = %label, %status, "detached process exited"),
                    Err(err) => warn!(pid, command = %label, error = %err, "failed to wait on detached process"),
                },
                _ = kill_rx => {
                    if let Err(err) = child.kill().await {
                        warn!(pid, error = %err, "failed to kill detached process");
                    } else {
                        info!(pid, "detached process killed");
                    }
                }
            }
            detached.lock().remove(&pid);
        });

        Ok(pid)
    }

    async fn terminate_detached(&self, pid: u32) {
        let kill_tx = self.detached.lock().remove(&pid);
        match kill_tx {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!(pid, "detached process already gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_line_template_with_action() {
        let template = CommandTemplate::line("php artisan swoole:http {action}");
        let cmd = template.render("swoole:http", Some(Action::Start)).unwrap();
        assert_eq!(cmd.program, "php");
        assert_eq!(cmd.args, vec!["artisan", "swoole:http", "start"]);
        assert_eq!(cmd.to_string(), "php artisan swoole:http start");
    }

    #[test]
    fn test_render_identity_placeholder() {
        let template = CommandTemplate::line("pkill -f {identity}");
        let cmd = template.render("swoole:http", Some(Action::Stop)).unwrap();
        assert_eq!(cmd.to_string(), "pkill -f swoole:http");
    }

    #[test]
    fn test_render_without_action_keeps_placeholder() {
        let template = CommandTemplate::line("echo {action}");
        let cmd = template.render("x", None).unwrap();
        assert_eq!(cmd.args, vec!["{action}"]);
    }

    #[test]
    fn test_argv_template_keeps_spaces_inside_arguments() {
        let template = CommandTemplate::Argv(vec![
            "sh".to_string(),
            "-c".to_string(),
            "php artisan swoole:http {action} --daemon".to_string(),
        ]);
        let cmd = template.render("swoole:http", Some(Action::Stop)).unwrap();
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args[1], "php artisan swoole:http stop --daemon");
    }

    #[test]
    fn test_empty_template_is_an_error() {
        assert!(matches!(
            CommandTemplate::line("   ").render("x", None),
            Err(CommandError::Empty)
        ));
        assert!(CommandTemplate::Argv(vec![]).is_empty());
    }

    #[test]
    fn test_template_deserializes_from_string_or_array() {
        #[derive(Deserialize)]
        struct Holder {
            a: CommandTemplate,
            b: CommandTemplate,
        }
        let holder: Holder = toml::from_str("a = \"ps -ef\"\nb = [\"ps\", \"-ef\"]").unwrap();
        assert_eq!(holder.a, CommandTemplate::line("ps -ef"));
        assert_eq!(
            holder.b,
            CommandTemplate::Argv(vec!["ps".to_string(), "-ef".to_string()])
        );
    }

    #[tokio::test]
    async fn test_system_runner_captures_stdout() {
        let runner = SystemRunner::new();
        let cmd = CommandTemplate::line("echo hello {identity}")
            .render("world", None)
            .unwrap();
        let output = runner.run(&cmd).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_system_runner_reports_non_zero_exit() {
        let runner = SystemRunner::new();
        let cmd = CommandTemplate::line("false").render("x", None).unwrap();
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, CommandError::Failed { code: Some(1), .. }), "{err}");
    }

    #[tokio::test]
    async fn test_system_runner_reports_spawn_failure() {
        let runner = SystemRunner::new();
        let cmd = CommandTemplate::line("definitely-not-a-real-binary-4242")
            .render("x", None)
            .unwrap();
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_detached_child_can_be_terminated() {
        let runner = SystemRunner::new();
        let cmd = CommandTemplate::line("sleep 30").render("x", None).unwrap();
        let pid = runner.spawn_detached(&cmd).await.unwrap();
        assert!(runner.detached.lock().contains_key(&pid));

        runner.terminate_detached(pid).await;
        assert!(!runner.detached.lock().contains_key(&pid));
    }
}
