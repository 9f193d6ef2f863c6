//! Mode catalog and parameter validation.

use serde::Serialize;
use tabled::Tabled;

use netmode_core::{Mode, ModeId, Orchestrator, ParamSpec};

use crate::cli::{GlobalOpts, ParamsArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

// ── Serializable view ───────────────────────────────────────────────

#[derive(Serialize)]
struct ModeView {
    id: ModeId,
    name: &'static str,
    description: &'static str,
    features: &'static [&'static str],
    services: Vec<&'static str>,
    files: &'static [&'static str],
    parameters: &'static [ParamSpec],
    current: bool,
}

impl ModeView {
    fn new(mode: &'static Mode, current: ModeId) -> Self {
        Self {
            id: mode.id,
            name: mode.display_name,
            description: mode.description,
            features: mode.features,
            services: mode
                .affected_services
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.name)
                .collect(),
            files: mode.affected_config_paths,
            parameters: mode.parameter_schema,
            current: mode.id == current,
        }
    }
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ModeRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: &'static str,
    #[tabled(rename = "Services")]
    services: String,
    #[tabled(rename = "Parameters")]
    parameters: String,
}

impl From<&ModeView> for ModeRow {
    fn from(m: &ModeView) -> Self {
        Self {
            marker: if m.current { "*" } else { "" },
            id: m.id.to_string(),
            name: m.name,
            services: m.services.join(", "),
            parameters: m
                .parameters
                .iter()
                .map(|p| p.name)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub fn list(orch: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    let current = orch.current_mode()?.current_mode;
    let modes: Vec<ModeView> = orch
        .available_modes()
        .iter()
        .copied()
        .map(|m| ModeView::new(m, current))
        .collect();
    let out = output::render_list(
        &global.output,
        &modes,
        |m| ModeRow::from(m),
        |m| m.id.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

#[derive(Serialize)]
struct ValidationReport {
    mode: String,
    valid: bool,
    errors: Vec<String>,
}

/// Report every issue; exit with a usage error when there is at least one.
pub fn validate(orch: &Orchestrator, args: &ParamsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let params = util::parse_params(&args.params)?;
    let errors = orch.validate_config(&args.mode, &params)?;
    let report = ValidationReport {
        mode: args.mode.clone(),
        valid: errors.is_empty(),
        errors,
    };

    let out = output::render_single(
        &global.output,
        &report,
        |r| {
            if r.valid {
                format!("{}: parameters are valid", r.mode)
            } else {
                r.errors
                    .iter()
                    .map(|e| format!("  - {e}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        },
        |r| r.valid.to_string(),
    );
    output::print_output(&out, global.quiet);

    if report.valid {
        Ok(())
    } else {
        Err(CliError::Validation {
            field: "parameters".into(),
            reason: format!("{} issue(s) for mode {}", report.errors.len(), report.mode),
        })
    }
}
