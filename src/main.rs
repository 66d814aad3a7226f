use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use hot_restart::cli::{Cli, Commands, SettingsArgs};
use hot_restart::command::{Action, CommandRunner, SystemRunner};
use hot_restart::config::{HotRestartConfig, Settings};
use hot_restart::discovery::ProcessDiscovery;
use hot_restart::lifecycle::LifecycleManager;
use hot_restart::output::{StatusReport, print_status};
use hot_restart::supervisor::{Supervisor, TriggerOutcome};
use hot_restart::{load_settings, logging, watcher};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref(), cli.log_format)?;

    match cli.command {
        Commands::Watch {
            settings,
            no_initial_start,
        } => {
            let mut overrides = settings.overrides();
            if no_initial_start {
                overrides.start_on_launch = Some(false);
            }
            let settings = resolve(&settings, overrides)?;
            watch(settings).await
        }
        Commands::Status { settings, json } => {
            let settings = resolve(&settings, settings.overrides())?;
            status(settings, json).await
        }
        Commands::Stop { settings } => {
            let settings = resolve(&settings, settings.overrides())?;
            stop(settings).await
        }
    }
}

fn resolve(args: &SettingsArgs, overrides: HotRestartConfig) -> Result<Settings> {
    load_settings(&args.path, args.config.as_deref(), overrides)
}

async fn watch(settings: Settings) -> Result<ExitCode> {
    let runner = Arc::new(SystemRunner::new());
    let (supervisor, _worker) = Supervisor::launch(&settings, runner);

    let lifecycle = LifecycleManager::new(Arc::clone(&supervisor));
    lifecycle
        .install_signal_handlers()
        .context("failed to install signal handlers")?;
    lifecycle.install_panic_hook();

    let ignore = settings.ignore_rules().context("invalid ignore_dirs")?;
    let (_watcher, events) = watcher::start_watcher(&settings.root, ignore)?;

    info!(
        root = %settings.root.display(),
        identity = %settings.identity,
        extensions = ?settings.extensions.as_slice(),
        heartbeat = ?settings.heartbeat,
        "hot-restart ready"
    );

    if settings.start_on_launch && supervisor.start() != TriggerOutcome::Scheduled {
        info!("initial start not scheduled");
    }

    let reason = lifecycle.run(events).await;
    Ok(ExitCode::from(reason.exit_code()))
}

async fn status(settings: Settings, json: bool) -> Result<ExitCode> {
    let discovery = ProcessDiscovery::new(Arc::new(SystemRunner::new()), settings.list_command.clone());

    match discovery.count_running_instances(&settings.identity).await {
        Ok(running) => {
            let report = StatusReport {
                identity: settings.identity,
                list_command: settings.list_command.to_string(),
                running,
            };
            print_status(&report, json);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn stop(settings: Settings) -> Result<ExitCode> {
    let command = settings
        .stop_command
        .render(&settings.identity, Some(Action::Stop))?;
    info!(%command, "stopping managed process");

    match SystemRunner::new().run(&command).await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
