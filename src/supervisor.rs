//! Restart-cycle state machine.
//!
//! A [`Supervisor`] owns the debounce state and a single worker task. File
//! change notifications only enqueue work; the worker runs one cycle at a time:
//!
//! ```text
//! Idle -> Checking -> [Killing -> GracePeriod] -> Starting -> Idle
//! ```
//!
//! The queue holds at most one pending cycle. Triggers arriving while a cycle
//! is pending are coalesced into it, so cycles never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::ValueEnum;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command::{Action, CommandRunner, CommandTemplate};
use crate::config::Settings;
use crate::debounce::should_restart;
use crate::discovery::ProcessDiscovery;
use crate::error::{CommandError, SupervisorError};
use crate::filter::{ExtensionFilter, is_relevant};
use crate::watcher::event::WatchEvent;

/// How the start command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Wait for the start command to exit; it is expected to daemonize the server.
    #[default]
    Await,
    /// Spawn the start command and keep its handle; the server runs in the foreground.
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Checking,
    Killing,
    GracePeriod,
    Starting,
}

/// What happened to a restart trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The changed file's extension is not watched.
    Irrelevant,
    /// Too soon after the last restart.
    Debounced,
    /// A new cycle was queued.
    Scheduled,
    /// A cycle is already pending; this trigger folds into it.
    Coalesced,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was running; one instance was started.
    Started,
    /// `stopped` running instances were killed before starting a new one.
    Restarted { stopped: usize },
}

/// Running totals, published after every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub completed: u64,
    pub started: u64,
    pub restarted: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct SupervisorState {
    /// Set once any cycle has brought the managed process up.
    pub started: bool,
    pub last_restart_at: Option<Instant>,
    pub heartbeat_threshold: Duration,
}

impl SupervisorState {
    fn allows(&self, now: Instant) -> bool {
        match self.last_restart_at {
            Some(last) => should_restart(now, last, self.heartbeat_threshold),
            None => true,
        }
    }
}

#[derive(Debug)]
struct CycleRequest {
    stamped_at: Instant,
    previous: Option<Instant>,
}

pub struct Supervisor {
    identity: String,
    extensions: ExtensionFilter,
    grace_period: Duration,
    start_command: CommandTemplate,
    stop_command: CommandTemplate,
    start_mode: StartMode,
    shutdown_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    discovery: ProcessDiscovery,
    state: Mutex<SupervisorState>,
    /// `None` once shutdown has begun.
    queue: Mutex<Option<mpsc::Sender<CycleRequest>>>,
    /// Held for the whole of each cycle, and by the final stop on shutdown.
    cycle_lock: tokio::sync::Mutex<()>,
    /// Cancels the in-flight cycle when shutdown gives up waiting for it.
    cancel: Notify,
    shutting_down: AtomicBool,
    detached_pid: Mutex<Option<u32>>,
    phase: watch::Sender<CyclePhase>,
    stats: watch::Sender<CycleStats>,
}

impl Supervisor {
    /// Build a supervisor and spawn its worker task on the current runtime.
    pub fn launch(settings: &Settings, runner: Arc<dyn CommandRunner>) -> (Arc<Self>, JoinHandle<()>) {
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let discovery = ProcessDiscovery::new(Arc::clone(&runner), settings.list_command.clone());

        let supervisor = Arc::new(Self {
            identity: settings.identity.clone(),
            extensions: settings.extensions.clone(),
            grace_period: settings.grace_period,
            start_command: settings.start_command.clone(),
            stop_command: settings.stop_command.clone(),
            start_mode: settings.start_mode,
            shutdown_timeout: settings.shutdown_timeout,
            runner,
            discovery,
            state: Mutex::new(SupervisorState {
                started: false,
                last_restart_at: None,
                heartbeat_threshold: settings.heartbeat,
            }),
            queue: Mutex::new(Some(queue_tx)),
            cycle_lock: tokio::sync::Mutex::new(()),
            cancel: Notify::new(),
            shutting_down: AtomicBool::new(false),
            detached_pid: Mutex::new(None),
            phase: watch::channel(CyclePhase::Idle).0,
            stats: watch::channel(CycleStats::default()).0,
        });

        let worker = tokio::spawn(Arc::clone(&supervisor).run_worker(queue_rx));
        (supervisor, worker)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SupervisorState {
        self.state.lock().clone()
    }

    pub fn last_restart_at(&self) -> Option<Instant> {
        self.state.lock().last_restart_at
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    pub fn stats(&self) -> CycleStats {
        *self.stats.borrow()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<CycleStats> {
        self.stats.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Schedule the launch cycle. Bypasses the debounce gate.
    pub fn start(&self) -> TriggerOutcome {
        let outcome = self.request_cycle(Instant::now(), true);
        if outcome == TriggerOutcome::Scheduled {
            info!(identity = %self.identity, "initial start scheduled");
        }
        outcome
    }

    /// Handle one file change. Never blocks on the cycle itself.
    pub fn notify(&self, event: &WatchEvent) -> TriggerOutcome {
        if !is_relevant(&event.path, &self.extensions) {
            debug!(path = %event.path.display(), "change ignored: extension not watched");
            return TriggerOutcome::Irrelevant;
        }

        info!(path = %event.path.display(), kind = ?event.kind, "file changed");
        let outcome = self.request_cycle(Instant::now(), false);
        match outcome {
            TriggerOutcome::Scheduled => info!("restart cycle scheduled"),
            TriggerOutcome::Debounced => debug!("restart suppressed: within heartbeat threshold"),
            TriggerOutcome::Coalesced => debug!("restart already pending; change coalesced"),
            TriggerOutcome::ShuttingDown => debug!("change ignored: shutting down"),
            TriggerOutcome::Irrelevant => {}
        }
        outcome
    }

    fn request_cycle(&self, now: Instant, force: bool) -> TriggerOutcome {
        let Some(queue) = self.queue.lock().clone() else {
            return TriggerOutcome::ShuttingDown;
        };

        let mut state = self.state.lock();
        if !force && !state.allows(now) {
            return TriggerOutcome::Debounced;
        }

        let request = CycleRequest {
            stamped_at: now,
            previous: state.last_restart_at,
        };
        match queue.try_send(request) {
            Ok(()) => {
                state.last_restart_at = Some(now);
                TriggerOutcome::Scheduled
            }
            Err(TrySendError::Full(_)) => TriggerOutcome::Coalesced,
            Err(TrySendError::Closed(_)) => TriggerOutcome::ShuttingDown,
        }
    }

    async fn run_worker(self: Arc<Self>, mut queue: mpsc::Receiver<CycleRequest>) {
        while let Some(request) = queue.recv().await {
            let _cycle = self.cycle_lock.lock().await;
            if self.is_shutting_down() {
                debug!("pending restart cycle dropped: shutting down");
                break;
            }

            let result = tokio::select! {
                result = self.execute_cycle() => result,
                _ = self.cancel.notified() => {
                    warn!(phase = ?self.phase(), "restart cycle cancelled by shutdown");
                    Err(SupervisorError::ShuttingDown)
                }
            };
            self.set_phase(CyclePhase::Idle);
            self.record(&request, result);
        }
        debug!("restart worker stopped");
    }

    async fn execute_cycle(&self) -> Result<CycleOutcome, SupervisorError> {
        self.set_phase(CyclePhase::Checking);
        info!(identity = %self.identity, "checking for running instances");
        let running = self.discovery.count_running_instances(&self.identity).await?;
        // A detached child may not show up in the listing under the identity.
        let tracked = self.detached_pid.lock().is_some();

        if running > 0 || tracked {
            self.ensure_active()?;
            self.set_phase(CyclePhase::Killing);
            info!(running, tracked, "stopping running instance(s)");
            self.stop_managed().await.map_err(SupervisorError::Stop)?;

            self.set_phase(CyclePhase::GracePeriod);
            debug!(grace = ?self.grace_period, "waiting for resources to be released");
            tokio::time::sleep(self.grace_period).await;
        }

        self.ensure_active()?;
        self.set_phase(CyclePhase::Starting);
        self.start_managed().await.map_err(SupervisorError::Start)?;

        Ok(if running > 0 || tracked {
            CycleOutcome::Restarted {
                stopped: running.max(usize::from(tracked)),
            }
        } else {
            CycleOutcome::Started
        })
    }

    fn ensure_active(&self) -> Result<(), SupervisorError> {
        if self.is_shutting_down() {
            Err(SupervisorError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Run the stop command once, then kill any child spawned in detach mode.
    pub async fn stop_managed(&self) -> Result<(), CommandError> {
        let result = match self.stop_command.render(&self.identity, Some(Action::Stop)) {
            Ok(command) => {
                info!(%command, "stopping managed process");
                self.runner.run(&command).await.map(|output| {
                    let out = output.stdout.trim();
                    if !out.is_empty() {
                        info!(output = out, "stop command output");
                    }
                })
            }
            Err(err) => Err(err),
        };

        let detached = self.detached_pid.lock().take();
        if let Some(pid) = detached {
            self.runner.terminate_detached(pid).await;
        }

        result
    }

    async fn start_managed(&self) -> Result<(), CommandError> {
        let command = self.start_command.render(&self.identity, Some(Action::Start))?;
        info!(%command, mode = ?self.start_mode, "starting managed process");

        match self.start_mode {
            StartMode::Await => {
                let output = self.runner.run(&command).await?;
                info!(output = output.stdout.trim(), "managed process start result");
            }
            StartMode::Detach => {
                let pid = self.runner.spawn_detached(&command).await?;
                *self.detached_pid.lock() = Some(pid);
                info!(pid, "managed process spawned");
            }
        }
        Ok(())
    }

    /// Stop accepting triggers, let the in-flight step finish, then run the stop
    /// command. A cycle still running after `shutdown_timeout` is cancelled
    /// first. Only the first call does anything.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return Ok(());
        }
        self.queue.lock().take();

        let guard = match tokio::time::timeout(self.shutdown_timeout, self.cycle_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(timeout = ?self.shutdown_timeout, "restart cycle still running; cancelling it");
                self.cancel.notify_one();
                self.cycle_lock.lock().await
            }
        };

        let result = self.stop_managed().await.map_err(SupervisorError::Stop);
        drop(guard);
        result
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.send_replace(phase);
    }

    fn record(&self, request: &CycleRequest, result: Result<CycleOutcome, SupervisorError>) {
        if result.is_ok() {
            self.state.lock().started = true;
        }
        match &result {
            Ok(CycleOutcome::Started) => info!("managed process started"),
            Ok(CycleOutcome::Restarted { stopped }) => info!(stopped, "managed process restarted"),
            Err(SupervisorError::Discovery(err)) => {
                error!(error = %err, "cannot determine running instances; cycle aborted");
                self.restore_stamp(request);
            }
            Err(err @ SupervisorError::Stop(_)) => {
                error!(error = %err, "not starting a new instance while the old one may be alive")
            }
            Err(err @ SupervisorError::Start(_)) => {
                error!(error = %err, "managed process is down until the next change")
            }
            Err(SupervisorError::ShuttingDown) => info!("restart cycle interrupted by shutdown"),
        }

        self.stats.send_modify(|stats| {
            stats.completed += 1;
            match result {
                Ok(CycleOutcome::Started) => stats.started += 1,
                Ok(CycleOutcome::Restarted { .. }) => stats.restarted += 1,
                Err(_) => stats.failed += 1,
            }
        });
    }

    /// Undo the stamp of a cycle that aborted before touching any process.
    fn restore_stamp(&self, request: &CycleRequest) {
        let mut state = self.state.lock();
        if state.last_restart_at == Some(request.stamped_at) {
            state.last_restart_at = request.previous;
        }
    }
}
