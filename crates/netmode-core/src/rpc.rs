// ── rpcd method dispatch ──
//
// JSON in, JSON out. Failures never escape as Rust errors: every
// response is an object, and failed calls carry `success: false`, a
// human `error` and a stable `code`.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::CoreError;
use crate::model::Mode;
use crate::orchestrator::{Orchestrator, RollbackOutcome};
use crate::preview::Preview;

/// Method names with their parameter signatures, in rpcd `list` form.
pub const METHODS: &[(&str, &[(&str, &str)])] = &[
    ("get_available_modes", &[]),
    ("get_current_mode", &[]),
    ("set_mode", &[("mode", "str"), ("parameters", "obj")]),
    ("preview_changes", &[]),
    ("apply_mode", &[]),
    ("confirm_mode", &[]),
    ("rollback", &[]),
    ("validate_config", &[("mode", "str"), ("config", "obj")]),
];

/// The object printed for `list`.
pub fn signatures() -> Value {
    let methods: Map<String, Value> = METHODS
        .iter()
        .map(|(name, params)| {
            let params: Map<String, Value> = params
                .iter()
                .map(|(p, ty)| ((*p).to_owned(), Value::String((*ty).to_owned())))
                .collect();
            ((*name).to_owned(), Value::Object(params))
        })
        .collect();
    Value::Object(methods)
}

/// Dispatch one call.
pub async fn call(orch: &Orchestrator, method: &str, params: &Value) -> Value {
    debug!(method, "rpc call");
    let result = match method {
        "get_available_modes" => available_modes(orch),
        "get_current_mode" => current_mode(orch),
        "set_mode" => set_mode(orch, params).await,
        "preview_changes" => orch.preview_changes().await.map(|p| preview_json(&p)),
        "apply_mode" => apply_mode(orch).await,
        "confirm_mode" => confirm_mode(orch).await,
        "rollback" => rollback(orch).await,
        "validate_config" => validate_config(orch, params),
        other => {
            return json!({
                "success": false,
                "error": format!("Unknown method: {other}"),
                "code": "unknown_method",
            });
        }
    };
    result.unwrap_or_else(|e| error_json(&e))
}

pub fn error_json(err: &CoreError) -> Value {
    let mut body = json!({
        "success": false,
        "error": err.to_string(),
        "code": err.code(),
    });
    match err {
        CoreError::Validation { issues } => body["errors"] = json!(issues),
        CoreError::ApplyFailure { rolled_back, .. } => body["rolled_back"] = json!(rolled_back),
        CoreError::AlreadyRolledBack { .. } => body["rolled_back"] = json!(true),
        CoreError::ConfirmationExpired { rolled_back_at, .. } => {
            body["rolled_back"] = json!(true);
            body["rolled_back_at"] = json!(rolled_back_at);
        }
        CoreError::RollbackFailure { .. } => body["manual_recovery"] = json!(true),
        _ => {}
    }
    body
}

// ── Methods ──────────────────────────────────────────────────────────

fn available_modes(orch: &Orchestrator) -> Result<Value, CoreError> {
    let current = orch.current_mode()?.current_mode;
    let modes: Vec<Value> = orch
        .available_modes()
        .iter()
        .map(|mode| mode_json(mode, mode.id == current))
        .collect();
    Ok(json!({ "modes": modes }))
}

fn mode_json(mode: &Mode, current: bool) -> Value {
    json!({
        "id": mode.id,
        "name": mode.display_name,
        "icon": mode.icon,
        "description": mode.description,
        "features": mode.features,
        "current": current,
        "parameters": mode.parameter_schema,
    })
}

fn current_mode(orch: &Orchestrator) -> Result<Value, CoreError> {
    let report = orch.current_mode()?;
    Ok(json!({
        "current_mode": report.current_mode,
        "mode": report.current_mode,
        "mode_name": report.mode_name,
        "description": report.description,
        "last_change": report.last_change,
        "rollback_active": report.rollback_active,
        "rollback_remaining": report.rollback_remaining,
        "state": report.state,
        "status": report.transition.as_ref().map(|t| t.status),
        "staged_mode": report.staged.as_ref().map(|s| s.target_mode),
    }))
}

async fn set_mode(orch: &Orchestrator, params: &Value) -> Result<Value, CoreError> {
    let mode = required_str(params, "mode")?;
    let overrides = string_map(params.get("parameters"))?;
    let request = orch.set_mode(mode, &overrides).await?;
    Ok(json!({
        "success": true,
        "mode": request.target_mode,
        "message": format!("Mode {} staged; preview and apply to switch", request.target_mode),
    }))
}

pub(crate) fn preview_json(preview: &Preview) -> Value {
    let changes: Vec<Value> = preview
        .changes
        .iter()
        .map(|c| json!({ "file": c.path, "change": c.description }))
        .collect();
    json!({
        "success": true,
        "current_mode": preview.from_mode,
        "target_mode": preview.to_mode,
        "changes": changes,
        "warnings": preview.warnings,
    })
}

async fn apply_mode(orch: &Orchestrator) -> Result<Value, CoreError> {
    let transition = orch.apply_mode().await?;
    let remaining = transition
        .remaining(orch.now())
        .map_or(0, |d| d.num_seconds());
    Ok(json!({
        "success": true,
        "message": format!(
            "Switched to {}; confirm within {remaining}s or the change is rolled back",
            transition.to_mode
        ),
        "transition": transition.id,
        "deadline": transition.deadline,
        "rollback_remaining": remaining,
    }))
}

async fn confirm_mode(orch: &Orchestrator) -> Result<Value, CoreError> {
    let transition = orch.confirm_mode().await?;
    Ok(json!({
        "success": true,
        "message": format!("Mode {} confirmed", transition.to_mode),
    }))
}

async fn rollback(orch: &Orchestrator) -> Result<Value, CoreError> {
    let outcome = orch.rollback().await?;
    let message = match &outcome {
        RollbackOutcome::RolledBack(t) => format!("Rolled back to {}", t.from_mode),
        RollbackOutcome::AlreadyRolledBack(t) => format!("Already rolled back to {}", t.from_mode),
    };
    Ok(json!({ "success": true, "message": message }))
}

fn validate_config(orch: &Orchestrator, params: &Value) -> Result<Value, CoreError> {
    let mode = required_str(params, "mode")?;
    let config = string_map(params.get("config"))?;
    let errors = orch.validate_config(mode, &config)?;
    Ok(json!({ "valid": errors.is_empty(), "errors": errors }))
}

// ── Parameter decoding ───────────────────────────────────────────────

fn required_str<'v>(params: &'v Value, key: &str) -> Result<&'v str, CoreError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid(format!("missing string parameter '{key}'")))
}

/// Accepts string, number and boolean values; booleans become `1`/`0`.
fn string_map(value: Option<&Value>) -> Result<BTreeMap<String, String>, CoreError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(BTreeMap::new());
    };
    let Value::Object(map) = value else {
        return Err(CoreError::invalid("parameters must be an object"));
    };
    map.iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Bool(b) => (if *b { "1" } else { "0" }).to_owned(),
                Value::Number(n) => n.to_string(),
                _ => return Err(CoreError::invalid(format!("{k}: expected a scalar value"))),
            };
            Ok((k.clone(), text))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn signatures_list_every_method() {
        let sigs = signatures();
        assert_eq!(sigs.as_object().unwrap().len(), 8);
        assert_eq!(sigs["set_mode"]["mode"], "str");
        assert_eq!(sigs["get_current_mode"], json!({}));
    }

    #[test]
    fn scalar_parameters_become_strings() {
        let input = json!({ "nat_enabled": true, "dhcp_start": 100, "wifi_ssid": "Home" });
        let map = string_map(Some(&input)).unwrap();
        assert_eq!(map["nat_enabled"], "1");
        assert_eq!(map["dhcp_start"], "100");
        assert_eq!(map["wifi_ssid"], "Home");
    }

    #[test]
    fn nested_parameters_are_rejected() {
        let input = json!({ "lan_ports": ["eth0"] });
        assert!(string_map(Some(&input)).unwrap_err().is_validation());
        assert!(string_map(Some(&json!("x"))).is_err());
        assert!(string_map(None).unwrap().is_empty());
    }

    #[test]
    fn errors_carry_codes_and_context() {
        let body = error_json(&CoreError::ApplyFailure {
            mode: "relay".into(),
            cause: "relayd restart timed out".into(),
            rolled_back: true,
        });
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "apply_failure");
        assert_eq!(body["rolled_back"], true);
    }
}
