//! Clap derive structures for the `netmode` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.
//! Also compiled by `build.rs` for man page generation, so it depends on
//! nothing but clap and clap_complete.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// netmode -- commit-confirmed network mode switching
#[derive(Debug, Parser)]
#[command(
    name = "netmode",
    version,
    about = "Switch OpenWrt network modes with automatic rollback",
    long_about = "Switch an OpenWrt device between router, access point, repeater,\n\
        travel router, bridge and sniffer topologies.\n\n\
        Every switch is commit-confirmed: unless it is confirmed from the new\n\
        network before the window closes, the previous configuration is restored.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (default: $NETMODE_CONFIG, /etc/netmode/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Resolve every managed path under this directory
    #[arg(long, env = "NETMODE_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "NETMODE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the available network modes
    #[command(alias = "ls")]
    Modes,

    /// Show the current mode and any pending transition
    #[command(alias = "st")]
    Status,

    /// Stage a mode change (does not touch the network)
    Set(SetArgs),

    /// Show what a mode change would modify
    Preview(PreviewArgs),

    /// Apply the staged mode change and open the confirmation window
    Apply(ApplyArgs),

    /// Keep the newly applied mode
    Confirm,

    /// Restore the previous mode now
    Rollback,

    /// Discard the staged mode change
    Cancel,

    /// Resolve interrupted or failed transitions
    Recover(RecoverArgs),

    /// Check parameters against a mode without staging
    Validate(ParamsArgs),

    /// Show the mode change log
    History(HistoryArgs),

    /// Manage configuration snapshots
    #[command(alias = "snap")]
    Snapshots(SnapshotsArgs),

    /// Run the rollback watchdog until interrupted
    Watchdog,

    /// rpcd exec plugin entry point
    Rpc(RpcArgs),

    /// Manage the netmode configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Mode selection ───────────────────────────────────────────────────

/// A mode plus `key=value` parameter overrides.
#[derive(Debug, Args)]
pub struct ParamsArgs {
    /// Mode identifier (router, accesspoint, relay, travel, bridge, sniffer)
    pub mode: String,

    /// Parameter override, repeatable (e.g. -p lan_ipaddr=10.0.0.1)
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: ParamsArgs,

    /// Show the preview after staging
    #[arg(long)]
    pub preview: bool,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Preview this mode instead of the staged one
    pub mode: Option<String>,

    /// Parameter override, repeatable (requires MODE)
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", requires = "mode")]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Stage this mode first (shortcut for `set MODE && apply`)
    pub mode: Option<String>,

    /// Parameter override, repeatable (requires MODE)
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", requires = "mode")]
    pub params: Vec<String>,

    /// Stay in the foreground and enforce the confirmation window
    #[arg(long, short = 'w')]
    pub wait: bool,
}

// ── Recovery ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
#[group(required = false, multiple = false)]
pub struct RecoverArgs {
    /// Re-attempt a failed rollback once
    #[arg(long)]
    pub retry: bool,

    /// Record that the device was restored by hand
    #[arg(long)]
    pub resolve: bool,
}

// ── History & snapshots ──────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Maximum entries to show, newest first
    #[arg(long, short = 'l', default_value = "20")]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct SnapshotsArgs {
    #[command(subcommand)]
    pub command: SnapshotsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotsCommand {
    /// List stored snapshots, newest first
    List,

    /// Remove old snapshots
    Gc {
        /// Snapshots to keep (default: transition.snapshot_retain)
        #[arg(long, short = 'r')]
        retain: Option<usize>,
    },
}

// ── RPC ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RpcArgs {
    #[command(subcommand)]
    pub command: RpcCommand,
}

#[derive(Debug, Subcommand)]
pub enum RpcCommand {
    /// Print the method signatures
    List,

    /// Call a method; params are JSON from the argument or stdin
    Call {
        /// Method name
        method: String,

        /// JSON parameters (default: read stdin)
        params: Option<String>,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
