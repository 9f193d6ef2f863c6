//! rpcd exec plugin: `list` prints signatures, `call` prints one JSON object.
//!
//! Method failures are reported inside the JSON body and the process still
//! exits 0, which is what rpcd expects from a plugin.

use std::io::Write;

use serde_json::json;

use netmode_core::{Orchestrator, rpc};

use crate::cli::{RpcArgs, RpcCommand};
use crate::commands::util;
use crate::error::CliError;
use crate::output::render_json_compact;

pub async fn handle(orch: &Orchestrator, args: RpcArgs) -> Result<(), CliError> {
    let body = match args.command {
        RpcCommand::List => rpc::signatures(),
        RpcCommand::Call { method, params } => match util::read_rpc_params(params) {
            Ok(params) => rpc::call(orch, &method, &params).await,
            Err(e) => json!({
                "success": false,
                "error": e.to_string(),
                "code": "invalid_params",
            }),
        },
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", render_json_compact(&body))?;
    Ok(())
}
