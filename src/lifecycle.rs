//! Ties process termination to a final stop of the managed process.
//!
//! Termination sources (signals, panics, the watcher going away) all arrive
//! on one channel. Whichever comes first ends the event loop, after which the
//! supervisor's stop command runs before the program exits.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::supervisor::Supervisor;
use crate::watcher::event::WatchEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Interrupt or external termination request.
    Signal(&'static str),
    /// Uncaught runtime fault (panic).
    Fault(String),
    /// The filesystem watcher stopped delivering events.
    WatcherClosed,
}

impl Termination {
    /// Process exit status once cleanup has run.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Signal(_) => 0,
            Self::Fault(_) | Self::WatcherClosed => 1,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {name}"),
            Self::Fault(msg) => write!(f, "uncaught fault: {msg}"),
            Self::WatcherClosed => f.write_str("file watcher stopped"),
        }
    }
}

/// Cloneable handle for reporting a termination from anywhere.
#[derive(Clone)]
pub struct TerminationHandle {
    tx: mpsc::UnboundedSender<Termination>,
}

impl TerminationHandle {
    pub fn terminate(&self, reason: Termination) {
        // The manager may already be finishing; a second reason is moot.
        let _ = self.tx.send(reason);
    }
}

pub struct LifecycleManager {
    supervisor: Arc<Supervisor>,
    tx: mpsc::UnboundedSender<Termination>,
    rx: mpsc::UnboundedReceiver<Termination>,
}

impl LifecycleManager {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { supervisor, tx, rx }
    }

    pub fn handle(&self) -> TerminationHandle {
        TerminationHandle {
            tx: self.tx.clone(),
        }
    }

    /// Forward SIGINT, SIGTERM, SIGUSR1 and SIGUSR2 as terminations.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let kinds = [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::user_defined1(), "SIGUSR1"),
            (SignalKind::user_defined2(), "SIGUSR2"),
        ];

        for (kind, name) in kinds {
            let mut stream = signal(kind)?;
            let handle = self.handle();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    handle.terminate(Termination::Signal(name));
                }
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        let handle = self.handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.terminate(Termination::Signal("Ctrl-C"));
            }
        });
        Ok(())
    }

    /// Report panics anywhere in the process as faults.
    pub fn install_panic_hook(&self) {
        let handle = self.handle();
        std::panic::set_hook(Box::new(move |info| {
            error!(fault = %info, "uncaught fault");
            handle.terminate(Termination::Fault(info.to_string()));
        }));
    }

    /// Feed watch events to the supervisor until a termination arrives, then
    /// stop the managed process.
    pub async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>) -> Termination {
        let reason = loop {
            tokio::select! {
                reason = self.rx.recv() => {
                    // We hold a sender ourselves, so the channel never closes.
                    break reason.unwrap_or(Termination::WatcherClosed);
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.supervisor.notify(&event);
                    }
                    None => break Termination::WatcherClosed,
                },
            }
        };

        self.finish(&reason).await;
        reason
    }

    async fn finish(&self, reason: &Termination) {
        match reason {
            Termination::Signal(_) => info!(%reason, "shutting down; stopping managed process"),
            _ => warn!(%reason, "shutting down; stopping managed process"),
        }

        if let Err(err) = self.supervisor.shutdown().await {
            warn!(error = %err, "final stop command failed");
        }

        let stats = self.supervisor.stats();
        info!(
            identity = self.supervisor.identity(),
            ever_started = self.supervisor.state().started,
            cycles = stats.completed,
            started = stats.started,
            restarted = stats.restarted,
            failed = stats.failed,
            "clean"
        );
    }
}
