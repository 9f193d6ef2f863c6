// ── Preview engine ──
//
// Computes the file and service diff between the current system and a
// target mode. Never writes. Gathering inputs is async (service status queries);
// the diff itself is a pure function of those inputs.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::error::CoreError;
use crate::model::{Mode, ModeId, ModeParameters};
use crate::registry::{DHCP, NETWORK, WIRELESS};
use crate::service::ServiceManager;
use crate::snapshot::SnapshotStore;
use crate::template;
use crate::uci::{UciDocument, UciSection};

const MAX_OPTION_DETAILS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub path: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub from_mode: ModeId,
    pub to_mode: ModeId,
    pub changes: Vec<Change>,
    pub warnings: Vec<String>,
}

/// Observed state of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceView {
    pub installed: bool,
    pub enabled: bool,
}

/// Inputs the diff is computed from.
#[derive(Debug, Clone, Default)]
pub struct CurrentState {
    pub files: BTreeMap<String, Option<Vec<u8>>>,
    pub services: BTreeMap<String, ServiceView>,
}

pub struct PreviewEngine<'a> {
    snapshots: &'a SnapshotStore,
    services: &'a dyn ServiceManager,
}

impl<'a> PreviewEngine<'a> {
    pub fn new(snapshots: &'a SnapshotStore, services: &'a dyn ServiceManager) -> Self {
        Self {
            snapshots,
            services,
        }
    }

    pub async fn preview(
        &self,
        from: &Mode,
        to: &Mode,
        params: &ModeParameters,
    ) -> Result<Preview, CoreError> {
        let current = self.observe(from, to).await?;
        Ok(compute(from, to, params, &current))
    }

    async fn observe(&self, from: &Mode, to: &Mode) -> Result<CurrentState, CoreError> {
        let mut logical: Vec<&str> = to.affected_config_paths.to_vec();
        logical.sort_unstable();
        let files = self.snapshots.read_current(&logical)?;

        let mut services = BTreeMap::new();
        for name in from
            .affected_services
            .iter()
            .chain(to.affected_services)
            .map(|s| s.name)
        {
            if services.contains_key(name) {
                continue;
            }
            let installed = self.services.is_installed(name).await;
            let enabled = installed && self.services.is_enabled(name).await.unwrap_or(false);
            services.insert(name.to_owned(), ServiceView { installed, enabled });
        }
        Ok(CurrentState { files, services })
    }
}

/// Pure diff: same inputs, same output.
pub fn compute(from: &Mode, to: &Mode, params: &ModeParameters, current: &CurrentState) -> Preview {
    let target_docs = template::render_documents(to, params);
    let target_files = template::render(to, params);

    let mut changes = Vec::new();
    for (path, bytes) in &target_files {
        let existing = current.files.get(*path).and_then(Option::as_ref);
        if let Some(description) = describe_file(existing.map(Vec::as_slice), bytes) {
            changes.push(Change {
                path: (*path).to_owned(),
                description,
            });
        }
    }
    changes.extend(service_changes(from, to, current));

    let current_docs: BTreeMap<&str, UciDocument> = current
        .files
        .iter()
        .filter_map(|(path, content)| {
            let text = String::from_utf8_lossy(content.as_ref()?);
            Some((path.as_str(), UciDocument::parse(&text).ok()?))
        })
        .collect();

    Preview {
        from_mode: from.id,
        to_mode: to.id,
        changes,
        warnings: warnings(from, to, &current_docs, &target_docs, current),
    }
}

// ── File diffs ───────────────────────────────────────────────────────

fn describe_file(current: Option<&[u8]>, target: &[u8]) -> Option<String> {
    let Some(current) = current else {
        let sections = UciDocument::parse(&String::from_utf8_lossy(target))
            .map(|d| d.sections.len())
            .unwrap_or_default();
        return Some(format!("create file ({sections} sections)"));
    };
    if current == target {
        return None;
    }

    let before = match UciDocument::parse(&String::from_utf8_lossy(current)) {
        Ok(doc) => doc,
        Err(e) => return Some(format!("replace file (current content is not valid UCI: {e})")),
    };
    let Ok(after) = UciDocument::parse(&String::from_utf8_lossy(target)) else {
        return Some("replace file".into());
    };

    let before_keyed = before.keyed();
    let after_keyed = after.keyed();
    let mut parts = Vec::new();

    for (key, section) in &after_keyed {
        match before_keyed.iter().find(|(k, _)| k == key) {
            None => parts.push(format!("add {key}")),
            Some((_, old)) if old.options != section.options => {
                parts.push(format!("modify {key} ({})", option_diff(old, section)));
            }
            Some(_) => {}
        }
    }
    for (key, _) in &before_keyed {
        if !after_keyed.iter().any(|(k, _)| k == key) {
            parts.push(format!("remove {key}"));
        }
    }

    if parts.is_empty() {
        Some("rewrite in canonical form (no semantic change)".into())
    } else {
        Some(parts.join("; "))
    }
}

fn option_diff(old: &UciSection, new: &UciSection) -> String {
    let mut details = Vec::new();
    for (key, value) in &new.options {
        match old.get(key) {
            None => details.push(format!("+{key}: {value}")),
            Some(prev) if prev != value => details.push(format!("{key}: {prev} → {value}")),
            Some(_) => {}
        }
    }
    for (key, value) in &old.options {
        if new.get(key).is_none() {
            details.push(format!("-{key}: {value}"));
        }
    }

    let extra = details.len().saturating_sub(MAX_OPTION_DETAILS);
    let mut out = details
        .into_iter()
        .take(MAX_OPTION_DETAILS)
        .collect::<Vec<_>>()
        .join(", ");
    if extra > 0 {
        let _ = write!(out, ", +{extra} more");
    }
    out
}

// ── Services ─────────────────────────────────────────────────────────

fn service_changes(from: &Mode, to: &Mode, current: &CurrentState) -> Vec<Change> {
    let mut out = Vec::new();
    let mut push = |name: &str, description: &str| {
        out.push(Change {
            path: format!("/etc/init.d/{name}"),
            description: description.to_owned(),
        });
    };

    for leftover in from
        .affected_services
        .iter()
        .filter(|s| !to.affected_services.iter().any(|t| t.name == s.name))
    {
        if current
            .services
            .get(leftover.name)
            .is_some_and(|v| v.installed && v.enabled)
        {
            push(leftover.name, "disable and stop (not used by the target mode)");
        }
    }

    for spec in to.affected_services {
        let Some(view) = current.services.get(spec.name) else {
            continue;
        };
        if !view.installed {
            continue;
        }
        match (view.enabled, spec.enabled) {
            (false, true) => push(spec.name, "enable and start"),
            (true, false) => push(spec.name, "disable and stop"),
            (true, true) => push(spec.name, "restart"),
            (false, false) => {}
        }
    }
    out
}

// ── Warnings ─────────────────────────────────────────────────────────

fn lan(doc: Option<&UciDocument>) -> Option<&UciSection> {
    doc?.section("interface", "lan")
}

fn warnings(
    from: &Mode,
    to: &Mode,
    current: &BTreeMap<&str, UciDocument>,
    target: &BTreeMap<&'static str, UciDocument>,
    state: &CurrentState,
) -> Vec<String> {
    let mut out = Vec::new();

    if from.id == to.id {
        out.push(format!(
            "{} is already the current mode; its configuration will be re-applied",
            to.display_name
        ));
    }

    if let Some(new_lan) = lan(target.get(NETWORK)) {
        let old_lan = lan(current.get(NETWORK));
        let old_addr = old_lan
            .filter(|s| s.get_str("proto") == Some("static"))
            .and_then(|s| s.get_str("ipaddr"));
        if new_lan.get_str("proto") == Some("dhcp") {
            out.push(
                "The management address will be obtained via DHCP from the upstream network; \
                 find the device in the upstream router's DHCP leases"
                    .to_owned(),
            );
        } else if let Some(new_addr) = new_lan.get_str("ipaddr") {
            match old_addr {
                Some(old) if old == new_addr => {}
                Some(old) => out.push(format!(
                    "LAN address changes from {old} to {new_addr}; active sessions will drop. \
                     Reconnect at http://{new_addr}/ and confirm before the window closes"
                )),
                None => out.push(format!(
                    "LAN address will be {new_addr}; reconnect at http://{new_addr}/ to confirm"
                )),
            }
        }
    }

    let firewall_on_now = state.services.get("firewall").is_some_and(|v| v.enabled);
    let firewall_off_after = to
        .affected_services
        .iter()
        .any(|s| s.name == "firewall" && !s.enabled);
    if firewall_on_now && firewall_off_after {
        out.push("The firewall will be disabled; traffic through the device is not filtered".into());
    }

    let serving = |doc: Option<&UciDocument>| {
        doc.and_then(|d| d.section("dhcp", "lan"))
            .is_some_and(|s| s.get_str("ignore") != Some("1"))
    };
    if serving(current.get(DHCP)) && !serving(target.get(DHCP)) {
        out.push(
            "The local DHCP server will be disabled; LAN clients need an upstream DHCP server"
                .into(),
        );
    }

    if let Some(wireless) = target.get(WIRELESS) {
        for iface in wireless.sections_of("wifi-iface") {
            let ssid = iface.get_str("ssid").unwrap_or_default();
            match iface.get_str("mode") {
                Some("sta") => out.push(format!(
                    "Connectivity depends on the wireless uplink '{ssid}'; if it fails to \
                     associate the device is reachable only from the LAN side"
                )),
                Some("ap") if iface.get_str("encryption") == Some("none") => {
                    out.push(format!("Access point '{ssid}' will be unencrypted"));
                }
                _ => {}
            }
        }
    }

    for spec in to.affected_services.iter().filter(|s| s.enabled) {
        if state.services.get(spec.name).is_some_and(|v| !v.installed) {
            out.push(format!(
                "Service '{}' is required by {} but is not installed; applying will fail",
                spec.name, to.display_name
            ));
        }
    }

    out
}

impl Preview {
    /// True when applying would change at least one file.
    pub fn touches_files(&self) -> bool {
        self.changes.iter().any(|c| !c.path.starts_with("/etc/init.d/"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::registry::ModeRegistry;

    fn params(id: ModeId) -> ModeParameters {
        ModeRegistry
            .resolve(ModeRegistry.get(id), &BTreeMap::new(), &BTreeMap::new())
            .unwrap()
    }

    /// A device currently configured as a default router.
    fn router_state() -> CurrentState {
        let router = ModeRegistry.get(ModeId::Router);
        let files = template::render(router, &params(ModeId::Router))
            .into_iter()
            .map(|(p, b)| (p.to_owned(), Some(b)))
            .collect();
        let services = ["network", "firewall", "dnsmasq"]
            .into_iter()
            .map(|s| {
                (
                    s.to_owned(),
                    ServiceView {
                        installed: true,
                        enabled: true,
                    },
                )
            })
            .chain(std::iter::once((
                "relayd".to_owned(),
                ServiceView {
                    installed: false,
                    enabled: false,
                },
            )))
            .collect();
        CurrentState { files, services }
    }

    #[test]
    fn router_to_access_point_touches_network_and_wireless() {
        let state = router_state();
        let preview = compute(
            ModeRegistry.get(ModeId::Router),
            ModeRegistry.get(ModeId::AccessPoint),
            &params(ModeId::AccessPoint),
            &state,
        );
        let paths: Vec<&str> = preview.changes.iter().map(|c| c.path.as_str()).collect();
        assert!(paths.contains(&"/etc/config/network"));
        assert!(paths.contains(&"/etc/config/wireless"));
        assert!(paths.contains(&"/etc/init.d/firewall"));

        let network = preview
            .changes
            .iter()
            .find(|c| c.path == "/etc/config/network")
            .unwrap();
        assert!(network.description.contains("modify interface 'lan'"));
        assert!(network.description.contains("remove interface 'wan'"));

        let joined = preview.warnings.join("\n");
        assert!(joined.contains("via DHCP"));
        assert!(joined.contains("firewall will be disabled"));
        assert!(joined.contains("DHCP server will be disabled"));
        assert!(joined.contains("unencrypted"));
    }

    #[test]
    fn preview_is_deterministic() {
        let state = router_state();
        let run = || {
            compute(
                ModeRegistry.get(ModeId::Router),
                ModeRegistry.get(ModeId::Travel),
                &params(ModeId::Travel),
                &state,
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn same_mode_reports_no_file_changes() {
        let state = router_state();
        let router = ModeRegistry.get(ModeId::Router);
        let preview = compute(router, router, &params(ModeId::Router), &state);
        assert!(!preview.touches_files());
        assert!(preview.warnings.iter().any(|w| w.contains("already the current mode")));
    }

    #[test]
    fn relay_warns_about_uplink_and_missing_relayd() {
        let state = router_state();
        let preview = compute(
            ModeRegistry.get(ModeId::Router),
            ModeRegistry.get(ModeId::Relay),
            &params(ModeId::Relay),
            &state,
        );
        let joined = preview.warnings.join("\n");
        assert!(joined.contains("LAN address changes from 192.168.1.1 to 192.168.2.1"));
        assert!(joined.contains("http://192.168.2.1/"));
        assert!(joined.contains("wireless uplink 'Upstream-WiFi'"));
        assert!(joined.contains("'relayd' is required"));
    }

    #[test]
    fn missing_files_are_created() {
        let preview = compute(
            ModeRegistry.get(ModeId::Router),
            ModeRegistry.get(ModeId::Bridge),
            &params(ModeId::Bridge),
            &CurrentState::default(),
        );
        assert!(
            preview
                .changes
                .iter()
                .filter(|c| c.path.starts_with("/etc/config/"))
                .all(|c| c.description.starts_with("create file"))
        );
    }
}
