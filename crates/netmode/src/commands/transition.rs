//! Staging, apply, confirm, rollback and recovery handlers.

use std::fmt::Write as _;

use netmode_core::{
    ModeChangeRequest, Orchestrator, PendingTransition, Preview, RollbackOutcome, RollbackReason,
    TransitionStatus,
};

use crate::cli::{ApplyArgs, GlobalOpts, OutputFormat, PreviewArgs, RecoverArgs, SetArgs};
use crate::commands::{util, watchdog};
use crate::error::CliError;
use crate::output::{self, Tone, paint, should_color};

// ── Detail views ────────────────────────────────────────────────────

fn preview_detail(p: &Preview, color: bool) -> String {
    let mut out = format!("{} -> {}\n", p.from_mode, p.to_mode);
    if p.changes.is_empty() {
        out.push_str("  no changes\n");
    }
    let width = p.changes.iter().map(|c| c.path.len()).max().unwrap_or(0);
    for change in &p.changes {
        let _ = writeln!(out, "  {:<width$}  {}", change.path, change.description);
    }
    for warning in &p.warnings {
        let _ = writeln!(out, "  {} {warning}", paint("!", Tone::Pending, color));
    }
    out.trim_end().to_owned()
}

fn transition_detail(t: &PendingTransition, color: bool) -> String {
    match t.status {
        TransitionStatus::PendingConfirmation => format!(
            "Switched {} -> {}. {}\n\
             Keep it with: netmode confirm\n\
             Otherwise the previous mode is restored at {}",
            t.from_mode,
            t.to_mode,
            paint("Awaiting confirmation.", Tone::Pending, color),
            t.deadline.format("%H:%M:%S UTC"),
        ),
        TransitionStatus::Confirmed => format!(
            "{} {} is now the active mode",
            paint("Confirmed.", Tone::Good, color),
            t.to_mode
        ),
        TransitionStatus::RolledBack => format!(
            "{} {} restored ({})",
            paint("Rolled back.", Tone::Pending, color),
            t.from_mode,
            t.reason
                .as_ref()
                .map_or_else(|| "no reason recorded".to_owned(), ToString::to_string)
        ),
        status => format!(
            "{} -> {}: {}",
            t.from_mode,
            t.to_mode,
            paint(&status.to_string(), Tone::Bad, color)
        ),
    }
}

fn print_transition(t: &PendingTransition, global: &GlobalOpts) {
    let color = should_color(&global.color);
    let out = output::render_single(
        &global.output,
        t,
        |t| transition_detail(t, color),
        |t| t.id.to_string(),
    );
    output::print_output(&out, global.quiet);
}

fn print_preview(p: &Preview, global: &GlobalOpts) {
    let color = should_color(&global.color);
    let out = output::render_single(
        &global.output,
        p,
        |p| preview_detail(p, color),
        |p| {
            p.changes
                .iter()
                .map(|c| c.path.clone())
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    output::print_output(&out, global.quiet);
}

// ── Staging ─────────────────────────────────────────────────────────

pub async fn set(orch: &Orchestrator, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let params = util::parse_params(&args.target.params)?;
    let request = orch.set_mode(&args.target.mode, &params).await?;

    let out = output::render_single(
        &global.output,
        &request,
        |r: &ModeChangeRequest| {
            format!(
                "Staged {}. Review: netmode preview   Apply: netmode apply",
                r.target_mode
            )
        },
        |r| r.target_mode.to_string(),
    );
    output::print_output(&out, global.quiet);

    if args.preview {
        print_preview(&orch.preview_changes().await?, global);
    }
    Ok(())
}

pub async fn preview(
    orch: &Orchestrator,
    args: PreviewArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let preview = match &args.mode {
        Some(mode) => {
            let params = util::parse_params(&args.params)?;
            orch.preview_mode(mode, &params).await?
        }
        None => orch.preview_changes().await?,
    };
    print_preview(&preview, global);
    Ok(())
}

pub async fn cancel(orch: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    let discarded = orch.cancel().await?;
    output::notice(
        if discarded {
            "Staged mode discarded"
        } else {
            "Nothing was staged"
        },
        global.quiet,
    );
    Ok(())
}

// ── Apply ───────────────────────────────────────────────────────────

pub async fn apply(orch: &Orchestrator, args: ApplyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(mode) = &args.mode {
        let params = util::parse_params(&args.params)?;
        orch.set_mode(mode, &params).await?;
    }

    let preview = orch.preview_changes().await?;
    if matches!(global.output, OutputFormat::Table) {
        print_preview(&preview, global);
    }

    let window = humantime::format_duration(orch.config().confirmation_window);
    let prompt = format!(
        "Switch to {}? Unless confirmed within {window}, the current mode is restored.",
        preview.to_mode
    );
    if !util::confirm(&prompt, "apply", global.yes)? {
        output::notice("Aborted; the staged mode is kept", global.quiet);
        return Ok(());
    }

    let transition = orch.apply_mode().await?;
    if !args.wait {
        print_transition(&transition, global);
        return Ok(());
    }

    let Some(resolved) = watchdog::wait_for_resolution(orch, &transition, global).await? else {
        // Interrupted: the persisted deadline still holds for the watchdog service.
        print_transition(&transition, global);
        return Ok(());
    };
    print_transition(&resolved, global);
    match (resolved.status, &resolved.reason) {
        (TransitionStatus::RolledBack, Some(RollbackReason::Timeout)) => {
            Err(CliError::ConfirmationExpired {
                to_mode: resolved.to_mode.to_string(),
            })
        }
        (TransitionStatus::Error, _) => Err(CliError::RollbackFailed {
            reason: resolved.error.unwrap_or_else(|| "unknown".into()),
        }),
        _ => Ok(()),
    }
}

// ── Confirm / rollback ──────────────────────────────────────────────

pub async fn confirm(orch: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    let transition = orch.confirm_mode().await?;
    print_transition(&transition, global);
    Ok(())
}

pub async fn rollback(orch: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    match orch.rollback().await? {
        RollbackOutcome::RolledBack(t) => print_transition(&t, global),
        RollbackOutcome::AlreadyRolledBack(t) => {
            output::notice(
                &format!("Already rolled back to {}; nothing to do", t.from_mode),
                global.quiet,
            );
            print_transition(&t, global);
        }
    }
    Ok(())
}

// ── Recovery ────────────────────────────────────────────────────────

pub async fn recover(
    orch: &Orchestrator,
    args: &RecoverArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.retry {
        let transition = orch.retry_rollback().await?;
        print_transition(&transition, global);
        return Ok(());
    }

    if args.resolve {
        let prompt = "Record the device as restored by hand? No files are changed.";
        if !util::confirm(prompt, "recover --resolve", global.yes)? {
            output::notice("Aborted", global.quiet);
            return Ok(());
        }
        let transition = orch.resolve_manually().await?;
        print_transition(&transition, global);
        return Ok(());
    }

    if let Some(transition) = orch.recover().await? {
        print_transition(&transition, global);
        return Ok(());
    }
    match orch.transition()? {
        Some(t) if t.status == TransitionStatus::Error => Err(CliError::RollbackFailed {
            reason: t.error.unwrap_or_else(|| "an earlier rollback failed".into()),
        }),
        _ => {
            output::notice("Nothing to recover", global.quiet);
            Ok(())
        }
    }
}
