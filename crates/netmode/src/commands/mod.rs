//! Command dispatch: bridges CLI args -> orchestrator calls -> output formatting.

pub mod config_cmd;
pub mod modes;
pub mod rpc;
pub mod status;
pub mod transition;
pub mod util;
pub mod watchdog;

use netmode_config::Config;
use netmode_core::Orchestrator;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an orchestrator-bound command to its handler.
pub async fn dispatch(
    cmd: Command,
    orch: &Orchestrator,
    config: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Modes => modes::list(orch, global),
        Command::Validate(args) => modes::validate(orch, &args, global),
        Command::Status => status::show(orch, global),
        Command::History(args) => status::history(orch, &args, global),
        Command::Snapshots(args) => status::snapshots(orch, args, config, global),
        Command::Set(args) => transition::set(orch, args, global).await,
        Command::Preview(args) => transition::preview(orch, args, global).await,
        Command::Apply(args) => transition::apply(orch, args, global).await,
        Command::Confirm => transition::confirm(orch, global).await,
        Command::Rollback => transition::rollback(orch, global).await,
        Command::Cancel => transition::cancel(orch, global).await,
        Command::Recover(args) => transition::recover(orch, &args, global).await,
        Command::Watchdog => watchdog::run(orch).await,
        Command::Rpc(args) => rpc::handle(orch, args).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
