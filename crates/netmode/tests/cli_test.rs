//! Integration tests for the `netmode` binary.
//!
//! Every test runs against a throwaway root with real UCI files and
//! shell-script init.d services that keep their state in marker files,
//! so nothing on the host is touched.
#![allow(clippy::unwrap_used)]
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

// ── Fixture ─────────────────────────────────────────────────────────

const NETWORK: &str = "\
config interface 'loopback'
\toption device 'lo'
\toption proto 'static'
\toption ipaddr '127.0.0.1'

config interface 'lan'
\toption device 'br-lan'
\toption proto 'static'
\toption ipaddr '192.168.1.1'
\toption netmask '255.255.255.0'
";

const FIREWALL: &str = "\
config defaults
\toption input 'ACCEPT'
";

const DHCP: &str = "\
config dhcp 'lan'
\toption interface 'lan'
\toption start '100'
";

const SERVICE: &str = r#"#!/bin/sh
state="@STATE@"
case "$1" in
    enabled) [ -f "$state.enabled" ] ;;
    running) [ -f "$state.running" ] ;;
    enable) touch "$state.enabled" ;;
    disable) rm -f "$state.enabled" ;;
    start|restart|reload) touch "$state.running" ;;
    stop) rm -f "$state.running" ;;
    *) exit 0 ;;
esac
"#;

/// A router image: network, firewall and dnsmasq enabled and running.
struct Device {
    dir: TempDir,
}

impl Device {
    fn router() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let device = Self { dir };
        device.write("etc/config/network", NETWORK);
        device.write("etc/config/firewall", FIREWALL);
        device.write("etc/config/dhcp", DHCP);
        std::fs::create_dir_all(device.path("svc")).unwrap();
        for name in ["network", "firewall", "dnsmasq"] {
            device.install(name);
            device.write(&format!("svc/{name}.enabled"), "");
            device.write(&format!("svc/{name}.running"), "");
        }
        device
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn write(&self, rel: &str, body: &str) {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }

    fn install(&self, name: &str) {
        let state = self.path(&format!("svc/{name}"));
        let script = SERVICE.replace("@STATE@", &state.display().to_string());
        let path = self.path(&format!("etc/init.d/{name}"));
        self.write(&format!("etc/init.d/{name}"), &script);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn running(&self, name: &str) -> bool {
        self.path(&format!("svc/{name}.running")).exists()
    }

    /// The binary with env isolation, rooted at this device.
    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = netmode_cmd();
        cmd.env("NETMODE_ROOT", self.root())
            .env("NETMODE_CONFIG", self.path("netmode.toml"))
            .env("NETMODE_SERVICES__HEALTH_POLL_MS", "10")
            .env("NETMODE_SERVICES__HEALTH_TIMEOUT_SECS", "2")
            .env("NETMODE_WATCHDOG__TICK_MS", "50");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(["-o", "json"]).args(args).output().unwrap();
        assert!(
            output.status.success(),
            "{args:?} failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn rpc(&self, method: &str, params: &str) -> Value {
        let output = self
            .cmd()
            .args(["rpc", "call", method, params])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(0), "rpc must always exit 0");
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn netmode_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("netmode");
    cmd.env("HOME", "/tmp/netmode-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/netmode-cli-test-nonexistent")
        .env_remove("NETMODE_CONFIG")
        .env_remove("NETMODE_ROOT")
        .env_remove("NETMODE_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = netmode_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "{text}");
}

#[test]
fn test_help_lists_commands() {
    netmode_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("apply")
            .and(predicate::str::contains("confirm"))
            .and(predicate::str::contains("rollback"))
            .and(predicate::str::contains("watchdog")),
    );
}

#[test]
fn test_version_flag() {
    netmode_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netmode"));
}

#[test]
fn test_completions_zsh() {
    netmode_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Catalog ─────────────────────────────────────────────────────────

#[test]
fn test_modes_lists_all_six() {
    let device = Device::router();
    let modes = device.json(&["modes"]);
    let ids: Vec<&str> = modes
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        ["router", "accesspoint", "relay", "travel", "bridge", "sniffer"]
    );
    assert_eq!(modes[0]["current"], true);
}

#[test]
fn test_unknown_mode_exits_not_found() {
    let device = Device::router();
    device
        .cmd()
        .args(["set", "mesh"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("mesh"));
}

#[test]
fn test_validate_reports_bad_address() {
    let device = Device::router();
    device
        .cmd()
        .args(["validate", "bridge", "-p", "lan_ipaddr=300.1.1.1"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("lan_ipaddr"));
    device
        .cmd()
        .args(["validate", "bridge", "-p", "lan_ipaddr=10.0.0.2"])
        .assert()
        .success();
}

#[test]
fn test_malformed_param_is_usage_error() {
    let device = Device::router();
    device
        .cmd()
        .args(["set", "bridge", "-p", "dhcp_client"])
        .assert()
        .code(2);
}

// ── Full cycle ──────────────────────────────────────────────────────

#[test]
fn test_apply_then_rollback_restores_router() {
    let device = Device::router();

    let status = device.json(&["status"]);
    assert_eq!(status["current_mode"], "router");
    assert_eq!(status["state"], "idle");

    device.cmd().args(["set", "bridge"]).assert().success();
    let preview = device.json(&["preview"]);
    assert_eq!(preview["to_mode"], "bridge");

    // No terminal and no --yes: refused before anything is written.
    device
        .cmd()
        .arg("apply")
        .write_stdin("")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--yes"));
    assert_eq!(device.read("etc/config/network"), NETWORK);

    device
        .cmd()
        .args(["apply", "-y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Awaiting confirmation"));
    assert!(!device.running("firewall"));
    assert!(!device.running("dnsmasq"));

    let status = device.json(&["status"]);
    assert_eq!(status["state"], "pending_confirmation");
    assert_eq!(status["rollback_active"], true);

    // A second switch is refused while the window is open.
    device.cmd().args(["set", "router"]).assert().code(6);

    device
        .cmd()
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back"));
    assert_eq!(device.read("etc/config/network"), NETWORK);
    assert_eq!(device.read("etc/config/firewall"), FIREWALL);
    assert_eq!(device.read("etc/config/dhcp"), DHCP);
    assert!(device.running("firewall"));
    assert!(device.running("dnsmasq"));

    device
        .cmd()
        .arg("rollback")
        .assert()
        .success()
        .stderr(predicate::str::contains("Already rolled back"));
    device.cmd().arg("confirm").assert().code(6);

    let history = device.json(&["history"]);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["outcome"], "rolled_back");
    assert_eq!(history[0]["to_mode"], "bridge");
}

#[test]
fn test_apply_and_confirm_keeps_new_mode() {
    let device = Device::router();
    device
        .cmd()
        .args(["apply", "bridge", "-p", "dhcp_client=0", "-y"])
        .assert()
        .success();
    device
        .cmd()
        .arg("confirm")
        .assert()
        .success()
        .stdout(predicate::str::contains("Confirmed"));

    let status = device.json(&["status"]);
    assert_eq!(status["current_mode"], "bridge");
    assert_eq!(status["state"], "idle");
    assert_eq!(status["rollback_active"], false);

    // Nothing is pending any more.
    device.cmd().arg("confirm").assert().code(4);
    assert_eq!(device.json(&["snapshots", "list"]).as_array().unwrap().len(), 1);
}

#[test]
fn test_wait_rolls_back_when_window_closes() {
    let device = Device::router();
    device
        .cmd()
        .env("NETMODE_TRANSITION__CONFIRMATION_WINDOW_SECS", "1")
        .args(["apply", "bridge", "-y", "--wait"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(10)
        .stderr(predicate::str::contains("confirmation window closed"));

    assert_eq!(device.read("etc/config/network"), NETWORK);
    assert!(device.running("dnsmasq"));
    assert_eq!(device.json(&["status"])["current_mode"], "router");
}

#[test]
fn test_cancel_discards_staged_mode() {
    let device = Device::router();
    device.cmd().args(["set", "bridge"]).assert().success();
    assert_eq!(device.json(&["status"])["state"], "previewing");
    device
        .cmd()
        .arg("cancel")
        .assert()
        .success()
        .stderr(predicate::str::contains("discarded"));
    assert_eq!(device.json(&["status"])["state"], "idle");
}

#[test]
fn test_recover_with_nothing_to_do() {
    let device = Device::router();
    device
        .cmd()
        .arg("recover")
        .assert()
        .success()
        .stderr(predicate::str::contains("Nothing to recover"));
    device.cmd().args(["recover", "--retry"]).assert().code(4);
}

// ── RPC ─────────────────────────────────────────────────────────────

#[test]
fn test_rpc_list_prints_signatures() {
    let device = Device::router();
    let output = device.cmd().args(["rpc", "list"]).output().unwrap();
    assert!(output.status.success());
    let methods: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(methods["set_mode"]["mode"], "str");
    assert!(methods["get_available_modes"].is_object());
}

#[test]
fn test_rpc_calls_report_errors_in_band() {
    let device = Device::router();

    let current = device.rpc("get_current_mode", "{}");
    assert_eq!(current["current_mode"], "router");

    let unknown = device.rpc("set_mode", r#"{"mode":"mesh"}"#);
    assert_eq!(unknown["success"], false);
    assert_eq!(unknown["code"], "unknown_mode");

    let bogus = device.rpc("reboot", "{}");
    assert_eq!(bogus["code"], "unknown_method");

    let invalid = device.rpc("validate_config", r#"{"mode":"bridge","config":{"lan_ipaddr":"x"}}"#);
    assert_eq!(invalid["valid"], false);
}

#[test]
fn test_rpc_params_from_stdin() {
    let device = Device::router();
    let output = device
        .cmd()
        .args(["rpc", "call", "set_mode"])
        .write_stdin(r#"{"mode":"bridge","parameters":{"dhcp_client":false}}"#)
        .output()
        .unwrap();
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(device.json(&["status"])["staged"]["target_mode"], "bridge");
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_follows_env() {
    let device = Device::router();
    device
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("netmode.toml"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let device = Device::router();
    device.cmd().args(["config", "init"]).assert().success();
    assert!(device.read("netmode.toml").contains("confirmation_window_secs"));
    device.cmd().args(["config", "init"]).assert().failure();
    device.cmd().args(["config", "init", "--force"]).assert().success();
}

#[test]
fn test_invalid_config_is_usage_error() {
    let device = Device::router();
    device.write(
        "netmode.toml",
        "[transition]\nconfirmation_window_secs = 0\n",
    );
    device
        .cmd()
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("confirmation_window_secs"));
}
