//! Shared helpers for command handlers.

use std::collections::BTreeMap;
use std::io::{IsTerminal, Read};

use crate::error::CliError;

/// Parse repeated `-p key=value` flags.
pub fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    let mut out = BTreeMap::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            return Err(CliError::Validation {
                field: "param".into(),
                reason: format!("expected KEY=VALUE, got '{item}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Validation {
                field: "param".into(),
                reason: format!("empty key in '{item}'"),
            });
        }
        out.insert(key.to_owned(), value.to_owned());
    }
    Ok(out)
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
/// Without a terminal the prompt cannot be answered, so `--yes` is required.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// RPC params: the argument if given, else stdin when piped, else `{}`.
pub fn read_rpc_params(arg: Option<String>) -> Result<serde_json::Value, CliError> {
    let text = match arg {
        Some(text) => text,
        None if !std::io::stdin().is_terminal() => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        None => String::new(),
    };
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn params_split_on_first_equals() {
        let parsed = parse_params(&["wifi_key=a=b=c".into(), " lan_ipaddr =10.0.0.1".into()]).unwrap();
        assert_eq!(parsed["wifi_key"], "a=b=c");
        assert_eq!(parsed["lan_ipaddr"], "10.0.0.1");
    }

    #[test]
    fn params_without_equals_are_rejected() {
        assert!(parse_params(&["nat_enabled".into()]).is_err());
        assert!(parse_params(&["=1".into()]).is_err());
    }

    #[test]
    fn explicit_rpc_params_win() {
        let value = read_rpc_params(Some(r#"{"mode":"relay"}"#.into())).unwrap();
        assert_eq!(value["mode"], "relay");
        assert!(read_rpc_params(Some("  ".into())).unwrap().as_object().unwrap().is_empty());
    }
}
