use std::sync::Arc;

use tracing::debug;

use crate::command::{CommandRunner, CommandTemplate};
use crate::error::DiscoveryError;

/// Counts running instances of the managed process by scanning a process listing.
pub struct ProcessDiscovery {
    runner: Arc<dyn CommandRunner>,
    list_command: CommandTemplate,
    /// Our own pid, skipped so the supervisor never counts itself.
    own_pid: Option<u32>,
}

impl ProcessDiscovery {
    pub fn new(runner: Arc<dyn CommandRunner>, list_command: CommandTemplate) -> Self {
        Self {
            runner,
            list_command,
            own_pid: Some(std::process::id()),
        }
    }

    /// Disable own-pid exclusion. Used by tests whose fake listings carry arbitrary pids.
    pub fn without_self_exclusion(mut self) -> Self {
        self.own_pid = None;
        self
    }

    /// Run the listing command and count lines containing `identity`.
    pub async fn count_running_instances(&self, identity: &str) -> Result<usize, DiscoveryError> {
        let command = self.list_command.render(identity, None)?;
        let output = self.runner.run(&command).await?;
        let count = count_matching_lines(&output.stdout, identity, self.own_pid);
        debug!(%command, identity, count, "process listing scanned");
        Ok(count)
    }
}

/// Count non-empty lines of `listing` that contain `identity`.
///
/// Lines whose second column (the PID column of `ps -ef` and `ps aux`) equals
/// `own_pid` are skipped.
pub fn count_matching_lines(listing: &str, identity: &str, own_pid: Option<u32>) -> usize {
    listing
        .lines()
        .filter(|line| !line.is_empty() && line.contains(identity))
        .filter(|line| match own_pid {
            Some(pid) => line
                .split_whitespace()
                .nth(1)
                .and_then(|col| col.parse::<u32>().ok())
                != Some(pid),
            None => true,
        })
        .count()
}
