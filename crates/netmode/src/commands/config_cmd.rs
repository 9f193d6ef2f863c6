//! Config subcommand handlers.

use netmode_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Load the layered config and apply `--root`.
pub fn resolve(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config::config_path(global.config.as_deref());
    let mut cfg = config::load(&path)?;
    if let Some(root) = &global.root {
        cfg = cfg.with_root(root);
        cfg.validate()?;
    }
    Ok(cfg)
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_path(global.config.as_deref());
    match args.command {
        ConfigCommand::Show => {
            let cfg = resolve(global)?;
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# {e}")),
                |c| c.paths.root.display().to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            config::init(&path, force)?;
            output::notice(
                &format!("Configuration written to {}", path.display()),
                global.quiet,
            );
            Ok(())
        }
    }
}
