//! Status, history and snapshot handlers.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tabled::Tabled;

use netmode_config::Config;
use netmode_core::{
    ChangeLogEntry, CurrentModeReport, Orchestrator, OrchestratorState, Outcome, SnapshotSummary,
};

use crate::cli::{GlobalOpts, HistoryArgs, SnapshotsArgs, SnapshotsCommand};
use crate::error::CliError;
use crate::output::{self, Tone, paint, should_color};

// ── Formatting helpers ──────────────────────────────────────────────

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub(crate) fn countdown(secs: i64) -> String {
    let secs = u64::try_from(secs).unwrap_or(0);
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

fn state_tone(state: OrchestratorState) -> Tone {
    match state {
        OrchestratorState::Idle => Tone::Good,
        OrchestratorState::Previewing => Tone::Plain,
        OrchestratorState::Applying
        | OrchestratorState::PendingConfirmation
        | OrchestratorState::RollingBack => Tone::Pending,
        OrchestratorState::Error => Tone::Bad,
    }
}

fn status_detail(r: &CurrentModeReport, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Mode:        {} ({})", r.mode_name, r.current_mode);
    let _ = writeln!(
        out,
        "State:       {}",
        paint(&r.state.to_string(), state_tone(r.state), color)
    );
    let _ = writeln!(
        out,
        "Last change: {}",
        r.last_change.map_or_else(|| "never".into(), timestamp)
    );
    if let Some(staged) = &r.staged {
        let _ = writeln!(out, "Staged:      {} (netmode apply)", staged.target_mode);
    }

    if let Some(t) = &r.transition {
        match r.state {
            OrchestratorState::PendingConfirmation if r.rollback_active => {
                let left = paint(&countdown(r.rollback_remaining), Tone::Pending, color);
                let _ = writeln!(
                    out,
                    "Pending:     {} -> {}, {left} left to confirm",
                    t.from_mode, t.to_mode
                );
                let _ = writeln!(out, "             Keep it: netmode confirm");
            }
            OrchestratorState::PendingConfirmation => {
                let _ = writeln!(
                    out,
                    "Pending:     {} -> {}, window closed; rollback is due",
                    t.from_mode, t.to_mode
                );
            }
            OrchestratorState::Error => {
                let _ = writeln!(
                    out,
                    "Error:       {}",
                    paint(
                        t.error.as_deref().unwrap_or("rollback failed"),
                        Tone::Bad,
                        color
                    )
                );
                let _ = writeln!(out, "             Recover: netmode recover --retry");
            }
            _ => {
                let _ = writeln!(
                    out,
                    "Last switch: {} -> {} ({})",
                    t.from_mode, t.to_mode, t.status
                );
            }
        }
    }
    out.trim_end().to_owned()
}

pub fn show(orch: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    let report = orch.current_mode()?;
    let color = should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| status_detail(r, color),
        |r| r.current_mode.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── History ─────────────────────────────────────────────────────────

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl HistoryRow {
    fn new(e: &ChangeLogEntry, color: bool) -> Self {
        let tone = match e.outcome {
            Outcome::Confirmed => Tone::Good,
            Outcome::RolledBack => Tone::Pending,
            Outcome::RollbackFailed => Tone::Bad,
        };
        Self {
            time: timestamp(e.timestamp),
            from: e.from_mode.to_string(),
            to: e.to_mode.to_string(),
            outcome: paint(&e.outcome.to_string(), tone, color),
            reason: e.reason.clone(),
        }
    }
}

pub fn history(orch: &Orchestrator, args: &HistoryArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let entries = orch.history(args.limit)?;
    let color = should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &entries,
        |e| HistoryRow::new(e, color),
        |e| e.transition_id.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Snapshots ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Files")]
    files: usize,
    #[tabled(rename = "Bytes")]
    bytes: u64,
}

impl From<&SnapshotSummary> for SnapshotRow {
    fn from(s: &SnapshotSummary) -> Self {
        Self {
            id: s.id.to_string(),
            created: timestamp(s.created_at),
            files: s.files,
            bytes: s.bytes,
        }
    }
}

pub fn snapshots(
    orch: &Orchestrator,
    args: SnapshotsArgs,
    config: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SnapshotsCommand::List => {
            let list = orch.snapshots()?;
            let out = output::render_list(
                &global.output,
                &list,
                |s| SnapshotRow::from(s),
                |s| s.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
        SnapshotsCommand::Gc { retain } => {
            let retain = retain.unwrap_or(config.transition.snapshot_retain);
            if retain == 0 {
                return Err(CliError::Validation {
                    field: "retain".into(),
                    reason: "must keep at least one snapshot".into(),
                });
            }
            let removed = orch.gc(retain)?;
            let ids: Vec<String> = removed.iter().map(ToString::to_string).collect();
            let out = output::render_list(
                &global.output,
                &ids,
                |id| SnapshotIdRow { id: id.clone() },
                Clone::clone,
            );
            output::print_output(&out, global.quiet);
            output::notice(
                &format!("Removed {} snapshot(s), kept up to {retain}", ids.len()),
                global.quiet,
            );
            Ok(())
        }
    }
}

#[derive(Tabled)]
struct SnapshotIdRow {
    #[tabled(rename = "Removed")]
    id: String,
}
