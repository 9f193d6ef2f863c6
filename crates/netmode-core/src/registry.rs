// ── Mode registry ──
//
// Static catalog of the supported topologies. Everything here is decided
// at build time; the registry only looks things up and validates.

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::model::{Mode, ModeId, ModeParameters, ParamKind, ParamSpec, ServiceSpec};

pub const NETWORK: &str = "/etc/config/network";
pub const WIRELESS: &str = "/etc/config/wireless";
pub const FIREWALL: &str = "/etc/config/firewall";
pub const DHCP: &str = "/etc/config/dhcp";
/// The current-mode record. Captured in every snapshot.
pub const MODE_RECORD: &str = "/etc/config/network-modes";

const WIFI_PATHS: &[&str] = &[NETWORK, WIRELESS, FIREWALL, DHCP];
const WIRED_PATHS: &[&str] = &[NETWORK, FIREWALL, DHCP];

const CHANNELS: &[&str] = &[
    "auto", "1", "6", "11", "36", "40", "44", "48", "149", "153", "157", "161",
];
const HTMODES: &[&str] = &[
    "HT20", "HT40", "VHT20", "VHT40", "VHT80", "VHT160", "HE20", "HE40", "HE80", "HE160",
];
const WAN_PROTOS: &[&str] = &["dhcp", "static", "pppoe", "dhcpv6"];
const ENCRYPTIONS: &[&str] = &["none", "psk2", "sae", "sae-mixed"];

const fn param(
    name: &'static str,
    kind: ParamKind,
    default: &'static str,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        default,
        optional: false,
        description,
    }
}

const fn optional(
    name: &'static str,
    kind: ParamKind,
    default: &'static str,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        default,
        optional: true,
        description,
    }
}

const fn on(name: &'static str) -> ServiceSpec {
    ServiceSpec {
        name,
        enabled: true,
    }
}

const fn off(name: &'static str) -> ServiceSpec {
    ServiceSpec {
        name,
        enabled: false,
    }
}

// ── Catalog ──────────────────────────────────────────────────────────

static ROUTER: Mode = Mode {
    id: ModeId::Router,
    display_name: "Router",
    icon: "🌐",
    description: "Full router with WAN uplink, NAT, firewall and DHCP server",
    features: &["NAT", "Firewall", "DHCP server", "WiFi access point"],
    parameter_schema: &[
        param("wan_interface", ParamKind::Interface, "eth1", "External network interface"),
        param(
            "wan_protocol",
            ParamKind::Choice { options: WAN_PROTOS },
            "dhcp",
            "WAN addressing protocol",
        ),
        param("lan_ports", ParamKind::Text, "eth0", "Ports bridged into br-lan"),
        param("lan_ipaddr", ParamKind::Ipv4, "192.168.1.1", "LAN management address"),
        param("lan_netmask", ParamKind::Netmask, "255.255.255.0", "LAN netmask"),
        param("nat_enabled", ParamKind::Flag, "1", "Masquerade LAN traffic on WAN"),
        param(
            "dhcp_start",
            ParamKind::Range { min: 1, max: 254 },
            "100",
            "First DHCP lease offset",
        ),
        param(
            "dhcp_limit",
            ParamKind::Range { min: 1, max: 254 },
            "150",
            "Number of DHCP leases",
        ),
        param("wifi_ssid", ParamKind::Ssid, "OpenWrt", "Access point SSID"),
        param("wifi_key", ParamKind::Passphrase, "", "Access point passphrase"),
        param(
            "wifi_channel",
            ParamKind::Choice { options: CHANNELS },
            "auto",
            "WiFi channel",
        ),
    ],
    affected_services: &[on("network"), on("firewall"), on("dnsmasq")],
    affected_config_paths: WIFI_PATHS,
};

static ACCESS_POINT: Mode = Mode {
    id: ModeId::AccessPoint,
    display_name: "Access Point",
    icon: "📡",
    description: "WiFi access point bridged to an upstream router",
    features: &["Bridged LAN", "802.11k/v roaming", "Band steering", "No local DHCP"],
    parameter_schema: &[
        param("bridge_ports", ParamKind::Text, "eth0 eth1", "Ports bridged into br-lan"),
        param("dhcp_client", ParamKind::Flag, "1", "Obtain the management address via DHCP"),
        param("lan_ipaddr", ParamKind::Ipv4, "192.168.1.2", "Static management address"),
        param("lan_netmask", ParamKind::Netmask, "255.255.255.0", "Static netmask"),
        param("lan_gateway", ParamKind::Ipv4, "192.168.1.1", "Upstream router address"),
        param("wifi_ssid", ParamKind::Ssid, "OpenWrt", "Access point SSID"),
        param("wifi_key", ParamKind::Passphrase, "", "Access point passphrase"),
        param(
            "wifi_channel",
            ParamKind::Choice { options: CHANNELS },
            "auto",
            "WiFi channel",
        ),
        param(
            "wifi_htmode",
            ParamKind::Choice { options: HTMODES },
            "VHT80",
            "Channel width",
        ),
        param(
            "wifi_txpower",
            ParamKind::Range { min: 1, max: 30 },
            "20",
            "Transmit power in dBm",
        ),
        param("roaming_enabled", ParamKind::Flag, "1", "Enable 802.11k/v roaming"),
        param("band_steering", ParamKind::Flag, "1", "Steer clients to 5GHz"),
    ],
    affected_services: &[on("network"), off("firewall"), off("dnsmasq")],
    affected_config_paths: WIFI_PATHS,
};

static RELAY: Mode = Mode {
    id: ModeId::Relay,
    display_name: "Repeater / Extender",
    icon: "🔁",
    description: "Extends an upstream WiFi network through relayd",
    features: &["Wireless uplink", "relayd bridge", "Local access point"],
    parameter_schema: &[
        param("uplink_radio", ParamKind::Interface, "radio0", "Radio used for the uplink"),
        param("uplink_ssid", ParamKind::Ssid, "Upstream-WiFi", "Upstream network SSID"),
        param(
            "uplink_encryption",
            ParamKind::Choice { options: ENCRYPTIONS },
            "psk2",
            "Upstream encryption",
        ),
        param("uplink_key", ParamKind::Passphrase, "", "Upstream passphrase"),
        param("lan_ports", ParamKind::Text, "eth0", "Ports bridged into br-lan"),
        param("lan_ipaddr", ParamKind::Ipv4, "192.168.2.1", "Repeater management address"),
        param("lan_netmask", ParamKind::Netmask, "255.255.255.0", "LAN netmask"),
        param("ap_ssid", ParamKind::Ssid, "OpenWrt-Repeater", "Extended network SSID"),
        param("ap_key", ParamKind::Passphrase, "", "Extended network passphrase"),
        param("mss_clamping", ParamKind::Flag, "1", "Clamp MSS on the relayed zone"),
    ],
    affected_services: &[on("network"), on("firewall"), on("dnsmasq"), on("relayd")],
    affected_config_paths: WIFI_PATHS,
};

static TRAVEL: Mode = Mode {
    id: ModeId::Travel,
    display_name: "Travel Router",
    icon: "✈️",
    description: "Connects to a hotel or venue WiFi and shares it on a private hotspot",
    features: &["WiFi WAN client", "MAC cloning", "Private encrypted hotspot", "NAT"],
    parameter_schema: &[
        param("client_radio", ParamKind::Interface, "radio1", "Radio used for the uplink"),
        param("client_ssid", ParamKind::Ssid, "Hotel-WiFi", "Venue network SSID"),
        param(
            "client_encryption",
            ParamKind::Choice { options: ENCRYPTIONS },
            "sae-mixed",
            "Venue network encryption",
        ),
        param("client_key", ParamKind::Passphrase, "", "Venue network passphrase"),
        optional("clone_mac", ParamKind::Mac, "", "MAC address presented to the venue"),
        param("hotspot_radio", ParamKind::Interface, "radio0", "Radio used for the hotspot"),
        param("hotspot_ssid", ParamKind::Ssid, "SecuBox-Travel", "Hotspot SSID"),
        param("hotspot_key", ParamKind::Passphrase, "TravelSafe123!", "Hotspot passphrase"),
        param("lan_ports", ParamKind::Text, "eth0", "Ports bridged into br-lan"),
        param("lan_ipaddr", ParamKind::Ipv4, "10.77.0.1", "Hotspot gateway address"),
        param("lan_netmask", ParamKind::Netmask, "255.255.255.0", "Hotspot netmask"),
    ],
    affected_services: &[on("network"), on("firewall"), on("dnsmasq")],
    affected_config_paths: WIFI_PATHS,
};

static BRIDGE: Mode = Mode {
    id: ModeId::Bridge,
    display_name: "Bridge",
    icon: "🌉",
    description: "Transparent layer-2 bridge between all wired ports",
    features: &["Layer-2 bridge", "No routing", "No local DHCP"],
    parameter_schema: &[
        param("bridge_ports", ParamKind::Text, "eth0 eth1", "Ports bridged into br-lan"),
        param("dhcp_client", ParamKind::Flag, "1", "Obtain the management address via DHCP"),
        param("lan_ipaddr", ParamKind::Ipv4, "192.168.1.2", "Static management address"),
        param("lan_netmask", ParamKind::Netmask, "255.255.255.0", "Static netmask"),
        param("lan_gateway", ParamKind::Ipv4, "192.168.1.1", "Upstream router address"),
    ],
    affected_services: &[on("network"), off("firewall"), off("dnsmasq")],
    affected_config_paths: WIRED_PATHS,
};

static SNIFFER: Mode = Mode {
    id: ModeId::Sniffer,
    display_name: "Sniffer / Passthrough",
    icon: "🔍",
    description: "Transparent bridge for network analysis with deep packet inspection",
    features: &["Transparent bridge", "Promiscuous capture", "Netifyd DPI"],
    parameter_schema: &[
        param("bridge_name", ParamKind::Interface, "br-lan", "Bridge device name"),
        param("bridge_ports", ParamKind::Text, "eth0 eth1", "Ports bridged for inspection"),
        param("capture_interface", ParamKind::Interface, "eth0", "Physical capture interface"),
        param("promiscuous", ParamKind::Flag, "1", "Promiscuous mode on the bridge"),
    ],
    affected_services: &[on("network"), off("firewall"), off("dnsmasq"), on("netifyd")],
    affected_config_paths: WIRED_PATHS,
};

static MODES: [&Mode; 6] = [&ROUTER, &ACCESS_POINT, &RELAY, &TRAVEL, &BRIDGE, &SNIFFER];

// ── Registry ─────────────────────────────────────────────────────────

/// Read-only lookup over the built-in modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeRegistry;

impl ModeRegistry {
    pub fn list(self) -> &'static [&'static Mode] {
        &MODES
    }

    pub fn get(self, id: ModeId) -> &'static Mode {
        match id {
            ModeId::Router => &ROUTER,
            ModeId::AccessPoint => &ACCESS_POINT,
            ModeId::Relay => &RELAY,
            ModeId::Travel => &TRAVEL,
            ModeId::Bridge => &BRIDGE,
            ModeId::Sniffer => &SNIFFER,
        }
    }

    /// Look a mode up by its wire name.
    pub fn lookup(self, name: &str) -> Result<&'static Mode, CoreError> {
        name.parse::<ModeId>()
            .map(|id| self.get(id))
            .map_err(|_| CoreError::UnknownMode {
                mode: name.to_owned(),
            })
    }

    /// Every config path any mode may write, plus the mode record.
    pub fn managed_paths(self) -> Vec<&'static str> {
        let mut paths: Vec<&'static str> = MODES
            .iter()
            .flat_map(|m| m.affected_config_paths.iter().copied())
            .chain(std::iter::once(MODE_RECORD))
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    /// Every service any mode manages, in first-seen declaration order.
    pub fn managed_services(self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for svc in MODES.iter().flat_map(|m| m.affected_services.iter()) {
            if !out.contains(&svc.name) {
                out.push(svc.name);
            }
        }
        out
    }

    /// Check a parameter map against a mode's schema and collect every issue.
    pub fn validate(self, mode: &Mode, values: &BTreeMap<String, String>) -> Vec<String> {
        let mut issues = Vec::new();
        for (name, value) in values {
            match mode.param(name) {
                Some(spec) => {
                    if let Err(issue) = spec.validate(value) {
                        issues.push(issue);
                    }
                }
                None => issues.push(format!("{name}: unknown parameter for mode {}", mode.id)),
            }
        }
        issues
    }

    /// Layer schema defaults, stored settings and explicit overrides.
    ///
    /// Stored settings may carry keys the schema does not know (display
    /// names, descriptions); those are ignored. Unknown override keys are
    /// rejected.
    pub fn resolve(
        self,
        mode: &Mode,
        stored: &BTreeMap<String, String>,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ModeParameters, CoreError> {
        let mut issues = self.validate(mode, overrides);

        let mut values: BTreeMap<String, String> = BTreeMap::new();
        for spec in mode.parameter_schema {
            let value = overrides
                .get(spec.name)
                .or_else(|| stored.get(spec.name))
                .map_or(spec.default, String::as_str);
            if !overrides.contains_key(spec.name) {
                if let Err(issue) = spec.validate(value) {
                    issues.push(format!("{issue} [stored setting]"));
                }
            }
            values.insert(spec.name.to_owned(), value.to_owned());
        }

        if issues.is_empty() {
            Ok(ModeParameters::from_map(values))
        } else {
            Err(CoreError::Validation { issues })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn every_default_satisfies_its_schema() {
        for mode in ModeRegistry.list() {
            for spec in mode.parameter_schema {
                assert!(
                    spec.validate(spec.default).is_ok(),
                    "{}.{} default is invalid",
                    mode.id,
                    spec.name
                );
            }
        }
    }

    #[test]
    fn get_returns_matching_id() {
        for mode in ModeRegistry.list() {
            assert_eq!(ModeRegistry.get(mode.id).id, mode.id);
        }
    }

    #[test]
    fn every_mode_restarts_network_first() {
        for mode in ModeRegistry.list() {
            assert_eq!(mode.affected_services.first().map(|s| s.name), Some("network"));
        }
    }

    #[test]
    fn lookup_rejects_unknown_mode() {
        let err = ModeRegistry.lookup("mesh").err();
        assert!(matches!(err, Some(CoreError::UnknownMode { mode }) if mode == "mesh"));
    }

    #[test]
    fn resolve_layers_defaults_stored_and_overrides() {
        let mode = ModeRegistry.get(ModeId::AccessPoint);
        let stored = map(&[("wifi_txpower", "15"), ("name", "Access Point"), ("wifi_ssid", "Home")]);
        let overrides = map(&[("wifi_ssid", "Office")]);

        let params = ModeRegistry.resolve(mode, &stored, &overrides).ok();
        let params = params.as_ref();
        assert_eq!(params.map(|p| p.get("wifi_txpower")), Some("15"));
        assert_eq!(params.map(|p| p.get("wifi_ssid")), Some("Office"));
        assert_eq!(params.map(|p| p.get("wifi_htmode")), Some("VHT80"));
        assert_eq!(params.map(|p| p.get("name")), Some(""));
    }

    #[test]
    fn resolve_collects_all_issues() {
        let mode = ModeRegistry.get(ModeId::Router);
        let overrides = map(&[("lan_ipaddr", "300.1.1.1"), ("bogus", "1")]);
        match ModeRegistry.resolve(mode, &BTreeMap::new(), &overrides) {
            Err(CoreError::Validation { issues }) => assert_eq!(issues.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn managed_paths_cover_every_mode() {
        let paths = ModeRegistry.managed_paths();
        for mode in ModeRegistry.list() {
            for path in mode.affected_config_paths {
                assert!(paths.contains(path));
            }
        }
        assert!(paths.contains(&MODE_RECORD));
        assert_eq!(
            ModeRegistry.managed_services(),
            vec!["network", "firewall", "dnsmasq", "relayd", "netifyd"]
        );
    }
}
