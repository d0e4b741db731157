// SPDX-License-Identifier: MIT

//! fmd: the foreman orchestrator daemon.
//!
//! With `SUPERVISOR_MODE=on` the process runs as a supervisor parent and
//! re-executes itself as the core child; otherwise (or as the child) it
//! boots the core: journal, runtime, reconcile, pool, session manager,
//! and the tool-protocol server on standard streams.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use fm_adapters::DockerCli;
use fm_core::SystemClock;
use fm_engine::{
    reconcile, ContainerPool, DiffStore, PoolConfig, SessionConfig, SessionManager,
};
use fm_journal::Journal;
use fm_plan::PlanStore;

use fm_daemon::{env, facade::Facade, logging, server, supervisor};

/// Journal records older than this are purged at startup.
const RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Idle-pool reaper cadence.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    // The supervisor parent re-executes this binary with a marker; the
    // child must not supervise again.
    if env::supervisor_mode() && std::env::var(env::SUPERVISED_MARKER).is_err() {
        let code = supervisor::run(supervisor::SupervisorConfig::from_env()).await;
        return ExitCode::from(code.clamp(0, 255) as u8);
    }

    match run_core().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run_core() -> Result<(), u8> {
    // Attached to the tool protocol, stdout is the wire: keep the
    // standard streams silent and log to files only.
    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    let _guards = logging::init(&PathBuf::from("./logs"), &env::log_level(), interactive)
        .map_err(|e| {
            // Logging is not up yet; this is the one permissible eprintln,
            // and only when a human is attached.
            if std::io::stderr().is_terminal() {
                eprintln!("fmd: cannot initialize logging: {e}");
            }
            1u8
        })?;

    let clock = SystemClock;

    // Journal unwritable is fatal and propagates to the supervisor.
    let journal = match Journal::open(&env::db_path()) {
        Ok(journal) => Arc::new(journal),
        Err(e) => {
            tracing::error!(error = %e, "journal unavailable");
            return Err(1);
        }
    };

    // Runtime unreachable at boot is fatal too.
    let runtime = match DockerCli::discover().await {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            tracing::error!(error = %e, "container runtime unavailable");
            return Err(1);
        }
    };
    tracing::info!(host = runtime.host(), "container runtime ready");

    // Resolve divergence between the journal and live containers before
    // accepting any calls.
    match reconcile(runtime.as_ref(), &journal, &clock, RETENTION).await {
        Ok(report) => tracing::info!(?report, "startup reconcile done"),
        Err(e) => tracing::warn!(error = %e, "startup reconcile incomplete"),
    }

    let pool = Arc::new(ContainerPool::new(
        Arc::clone(&runtime),
        Arc::clone(&journal),
        clock.clone(),
        PoolConfig { debug_no_cleanup: env::debug_no_cleanup(), ..PoolConfig::default() },
    ));
    let diffs = Arc::new(DiffStore::new(Arc::clone(&journal), clock.clone()));

    // The plan is optional: ad-hoc dispatches work without tasks.json.
    let plan = match PlanStore::open(&PathBuf::from("tasks.json")) {
        Ok(plan) => Some(Arc::new(plan)),
        Err(e) => {
            tracing::info!(error = %e, "no task plan loaded");
            None
        }
    };

    let mut sessions = SessionManager::new(
        Arc::clone(&runtime),
        Arc::clone(&pool),
        Arc::clone(&journal),
        Arc::clone(&diffs),
        clock.clone(),
        SessionConfig::default(),
    );
    if let Some(ref plan) = plan {
        sessions = sessions.with_plan(Arc::clone(plan));
    }
    let sessions = Arc::new(sessions);

    let facade = Arc::new(Facade::new(Arc::clone(&sessions), Arc::clone(&diffs), plan));

    // Idle-pool reaper.
    let shutdown = CancellationToken::new();
    {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => pool.reap_idle().await,
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    // Termination signals end the serve loop gracefully.
    {
        let shutdown = shutdown.clone();
        let mut sigterm = signal(SignalKind::terminate()).map_err(|_| 1u8)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|_| 1u8)?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            tracing::info!("termination signal received");
            shutdown.cancel();
        });
    }

    tracing::info!("tool protocol server ready");
    server::serve(facade, tokio::io::stdin(), tokio::io::stdout(), shutdown.clone()).await;

    // Graceful teardown: drain the pool, settle the journal.
    shutdown.cancel();
    pool.shutdown().await;
    if let Err(e) = journal.compact() {
        tracing::warn!(error = %e, "final journal compaction failed");
    }
    tracing::info!("fmd stopped");
    Ok(())
}
