//! Watchdog daemon and the foreground wait behind `apply --wait`.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use netmode_core::{Orchestrator, PendingTransition, WatchdogStatus, watchdog};

use crate::cli::GlobalOpts;
use crate::commands::status::countdown;
use crate::error::CliError;

// ── Daemon ──────────────────────────────────────────────────────────

/// Run the rollback watchdog until SIGINT or SIGTERM.
pub async fn run(orch: &Orchestrator) -> Result<(), CliError> {
    info!(
        tick_ms = orch.config().watchdog_tick.as_millis(),
        "watchdog starting"
    );
    orch.start_watchdog().await;
    shutdown_signal().await?;
    info!("shutdown signal received");
    orch.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

// ── Foreground wait ─────────────────────────────────────────────────

fn spinner(global: &GlobalOpts) -> Option<ProgressBar> {
    if global.quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template("{spinner} {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

fn progress_message(status: &WatchdogStatus) -> String {
    match (status.to_mode, status.remaining_secs) {
        (Some(mode), Some(secs)) => format!(
            "{mode}: {} left to confirm (run `netmode confirm` from the new network)",
            countdown(secs)
        ),
        (Some(mode), None) => format!("{mode}: resolving"),
        _ => "waiting".to_owned(),
    }
}

/// Enforce the confirmation window in the foreground. Returns the final
/// record, or `None` if interrupted first; the persisted deadline is left
/// for the watchdog service in that case.
pub async fn wait_for_resolution(
    orch: &Orchestrator,
    transition: &PendingTransition,
    global: &GlobalOpts,
) -> Result<Option<PendingTransition>, CliError> {
    let interrupt = CancellationToken::new();
    let pb = spinner(global);

    let mut status_rx = orch.watchdog_status();
    let progress = pb.clone().map(|pb| {
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let message = progress_message(&status_rx.borrow_and_update());
                pb.set_message(message);
            }
        })
    });

    let on_ctrl_c = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        })
    };

    let result = watchdog::run_until_resolved(orch, transition.id, &interrupt).await;

    on_ctrl_c.abort();
    if let Some(handle) = progress {
        handle.abort();
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_message_shows_countdown() {
        let status = WatchdogStatus {
            transition: None,
            status: None,
            to_mode: Some(netmode_core::ModeId::Relay),
            remaining_secs: Some(90),
        };
        assert!(progress_message(&status).starts_with("relay: 1m 30s left"));
        assert_eq!(progress_message(&WatchdogStatus::default()), "waiting");
    }
}
