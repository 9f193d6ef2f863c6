// ── Per-mode configuration templates ──
//
// Each mode renders every file in its `affected_config_paths` from the
// resolved parameters. Identical parameters yield byte-identical output.

use std::collections::BTreeMap;

use crate::model::{Mode, ModeId, ModeParameters};
use crate::registry::{DHCP, FIREWALL, NETWORK, WIRELESS};
use crate::uci::{UciDocument, UciSection};

const HEADER: &str = "# Managed by netmode. Local edits are replaced on the next mode change.\n\n";

/// Rendered documents keyed by logical path.
pub fn render_documents(mode: &Mode, params: &ModeParameters) -> BTreeMap<&'static str, UciDocument> {
    let mut docs = BTreeMap::new();
    let (network, wireless, firewall, dhcp) = match mode.id {
        ModeId::Router => router(params),
        ModeId::AccessPoint => access_point(params),
        ModeId::Relay => relay(params),
        ModeId::Travel => travel(params),
        ModeId::Bridge => bridge(params),
        ModeId::Sniffer => sniffer(params),
    };
    docs.insert(NETWORK, network);
    docs.insert(FIREWALL, firewall);
    docs.insert(DHCP, dhcp);
    if let Some(wireless) = wireless {
        docs.insert(WIRELESS, wireless);
    }
    docs.retain(|path, _| mode.touches(path));
    docs
}

/// Rendered file contents keyed by logical path.
pub fn render(mode: &Mode, params: &ModeParameters) -> BTreeMap<&'static str, Vec<u8>> {
    render_documents(mode, params)
        .into_iter()
        .map(|(path, doc)| (path, format!("{HEADER}{}", doc.render()).into_bytes()))
        .collect()
}

type Files = (UciDocument, Option<UciDocument>, UciDocument, UciDocument);

// ── Shared building blocks ───────────────────────────────────────────

fn words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_owned).collect()
}

fn loopback() -> UciSection {
    UciSection::named("interface", "loopback")
        .opt("device", "lo")
        .opt("proto", "static")
        .opt("ipaddr", "127.0.0.1")
        .opt("netmask", "255.0.0.0")
}

fn bridge_device(name: &str, ports: &str) -> UciSection {
    UciSection::anonymous("device")
        .opt("name", name)
        .opt("type", "bridge")
        .list("ports", words(ports))
}

fn static_lan(p: &ModeParameters) -> UciSection {
    UciSection::named("interface", "lan")
        .opt("device", "br-lan")
        .opt("proto", "static")
        .opt("ipaddr", p.get("lan_ipaddr"))
        .opt("netmask", p.get("lan_netmask"))
}

/// LAN for modes that sit behind an upstream router.
fn client_lan(p: &ModeParameters) -> UciSection {
    if p.flag("dhcp_client") {
        UciSection::named("interface", "lan")
            .opt("device", "br-lan")
            .opt("proto", "dhcp")
    } else {
        static_lan(p)
            .opt("gateway", p.get("lan_gateway"))
            .list("dns", [p.get("lan_gateway")])
    }
}

fn radio(name: &str, channel: &str) -> UciSection {
    UciSection::named("wifi-device", name)
        .opt("type", "mac80211")
        .opt("channel", channel)
        .opt("disabled", "0")
}

fn access_iface(name: &str, device: &str, ssid: &str, key: &str) -> UciSection {
    let iface = UciSection::named("wifi-iface", name)
        .opt("device", device)
        .opt("network", "lan")
        .opt("mode", "ap")
        .opt("ssid", ssid);
    if key.is_empty() {
        iface.opt("encryption", "none")
    } else {
        iface.opt("encryption", "psk2").opt("key", key)
    }
}

fn station_iface(name: &str, device: &str, ssid: &str, encryption: &str, key: &str) -> UciSection {
    let iface = UciSection::named("wifi-iface", name)
        .opt("device", device)
        .opt("network", "wwan")
        .opt("mode", "sta")
        .opt("ssid", ssid)
        .opt("encryption", encryption);
    if encryption == "none" {
        iface
    } else {
        iface.opt_nonempty("key", key)
    }
}

fn firewall_defaults(forward: &str) -> UciSection {
    UciSection::anonymous("defaults")
        .opt("syn_flood", "1")
        .opt("input", "ACCEPT")
        .opt("output", "ACCEPT")
        .opt("forward", forward)
}

fn zone(name: &str, networks: &[&str], input: &str, forward: &str) -> UciSection {
    UciSection::anonymous("zone")
        .opt("name", name)
        .list("network", networks.iter().copied())
        .opt("input", input)
        .opt("output", "ACCEPT")
        .opt("forward", forward)
}

fn forwarding(src: &str, dest: &str) -> UciSection {
    UciSection::anonymous("forwarding")
        .opt("src", src)
        .opt("dest", dest)
}

fn dnsmasq() -> UciSection {
    UciSection::anonymous("dnsmasq")
        .opt("domainneeded", "1")
        .opt("localise_queries", "1")
        .opt("local", "/lan/")
        .opt("domain", "lan")
        .opt("authoritative", "1")
        .opt("leasefile", "/tmp/dhcp.leases")
}

fn dhcp_pool(interface: &str, start: &str, limit: &str) -> UciSection {
    UciSection::named("dhcp", interface)
        .opt("interface", interface)
        .opt("start", start)
        .opt("limit", limit)
        .opt("leasetime", "12h")
}

fn dhcp_ignored(interface: &str) -> UciSection {
    UciSection::named("dhcp", interface)
        .opt("interface", interface)
        .opt("ignore", "1")
}

fn doc(sections: impl IntoIterator<Item = UciSection>) -> UciDocument {
    UciDocument {
        sections: sections.into_iter().collect(),
    }
}

// ── Modes ────────────────────────────────────────────────────────────

fn router(p: &ModeParameters) -> Files {
    let wan = p.get("wan_interface");
    let network = doc([
        loopback(),
        bridge_device("br-lan", p.get("lan_ports")),
        static_lan(p),
        UciSection::named("interface", "wan")
            .opt("device", wan)
            .opt("proto", p.get("wan_protocol")),
        UciSection::named("interface", "wan6")
            .opt("device", wan)
            .opt("proto", "dhcpv6"),
    ]);
    let wireless = doc([
        radio("radio0", p.get("wifi_channel")),
        access_iface("default_radio0", "radio0", p.get("wifi_ssid"), p.get("wifi_key")),
    ]);
    let mut wan_zone = zone("wan", &["wan", "wan6"], "REJECT", "REJECT");
    if p.flag("nat_enabled") {
        wan_zone = wan_zone.opt("masq", "1").opt("mtu_fix", "1");
    }
    let firewall = doc([
        firewall_defaults("REJECT"),
        zone("lan", &["lan"], "ACCEPT", "ACCEPT"),
        wan_zone,
        forwarding("lan", "wan"),
    ]);
    let dhcp = doc([
        dnsmasq(),
        dhcp_pool("lan", p.get("dhcp_start"), p.get("dhcp_limit")),
        dhcp_ignored("wan"),
    ]);
    (network, Some(wireless), firewall, dhcp)
}

fn access_point(p: &ModeParameters) -> Files {
    let network = doc([
        loopback(),
        bridge_device("br-lan", p.get("bridge_ports")),
        client_lan(p),
    ]);

    let mut radio0 = radio("radio0", p.get("wifi_channel"))
        .opt("htmode", p.get("wifi_htmode"))
        .opt("txpower", p.get("wifi_txpower"));
    if p.flag("band_steering") {
        radio0 = radio0.opt("band", "5g");
    }
    let mut ap = access_iface("ap0", "radio0", p.get("wifi_ssid"), p.get("wifi_key"));
    if p.flag("roaming_enabled") {
        ap = ap
            .opt("ieee80211k", "1")
            .opt("bss_transition", "1")
            .opt("wnm_sleep_mode", "1");
    }
    let wireless = doc([radio0, ap]);

    let firewall = doc([
        firewall_defaults("ACCEPT"),
        zone("lan", &["lan"], "ACCEPT", "ACCEPT"),
    ]);
    let dhcp = doc([dnsmasq(), dhcp_ignored("lan")]);
    (network, Some(wireless), firewall, dhcp)
}

fn relay(p: &ModeParameters) -> Files {
    let uplink_radio = p.get("uplink_radio");
    let network = doc([
        loopback(),
        bridge_device("br-lan", p.get("lan_ports")),
        static_lan(p),
        UciSection::named("interface", "wwan").opt("proto", "dhcp"),
        UciSection::named("interface", "repeater_bridge")
            .opt("proto", "relay")
            .list("network", ["lan", "wwan"]),
    ]);

    let mut radios = vec![radio("radio0", "auto")];
    if uplink_radio != "radio0" {
        radios.push(radio(uplink_radio, "auto"));
    }
    let mut wireless = doc(radios);
    wireless
        .push(station_iface(
            "wwan",
            uplink_radio,
            p.get("uplink_ssid"),
            p.get("uplink_encryption"),
            p.get("uplink_key"),
        ))
        .push(access_iface("ap0", "radio0", p.get("ap_ssid"), p.get("ap_key")));

    let mut lan_zone = zone("lan", &["lan", "wwan", "repeater_bridge"], "ACCEPT", "ACCEPT");
    if p.flag("mss_clamping") {
        lan_zone = lan_zone.opt("mtu_fix", "1");
    }
    let firewall = doc([firewall_defaults("ACCEPT"), lan_zone]);
    let dhcp = doc([dnsmasq(), dhcp_ignored("lan")]);
    (network, Some(wireless), firewall, dhcp)
}

fn travel(p: &ModeParameters) -> Files {
    let client_radio = p.get("client_radio");
    let hotspot_radio = p.get("hotspot_radio");
    let network = doc([
        loopback(),
        bridge_device("br-lan", p.get("lan_ports")),
        static_lan(p),
        UciSection::named("interface", "wwan").opt("proto", "dhcp"),
    ]);

    let mut names = vec![hotspot_radio, client_radio];
    names.sort_unstable();
    names.dedup();
    let mut wireless = doc(names.into_iter().map(|name| radio(name, "auto")));
    wireless
        .push(
            station_iface(
                "wwan",
                client_radio,
                p.get("client_ssid"),
                p.get("client_encryption"),
                p.get("client_key"),
            )
            .opt_nonempty("macaddr", p.get("clone_mac")),
        )
        .push(access_iface(
            "hotspot",
            hotspot_radio,
            p.get("hotspot_ssid"),
            p.get("hotspot_key"),
        ));

    let firewall = doc([
        firewall_defaults("REJECT"),
        zone("lan", &["lan"], "ACCEPT", "ACCEPT"),
        zone("wan", &["wwan"], "REJECT", "REJECT")
            .opt("masq", "1")
            .opt("mtu_fix", "1"),
        forwarding("lan", "wan"),
    ]);
    let dhcp = doc([dnsmasq(), dhcp_pool("lan", "100", "150"), dhcp_ignored("wwan")]);
    (network, Some(wireless), firewall, dhcp)
}

fn bridge(p: &ModeParameters) -> Files {
    let network = doc([
        loopback(),
        bridge_device("br-lan", p.get("bridge_ports")),
        client_lan(p),
    ]);
    let firewall = doc([
        firewall_defaults("ACCEPT"),
        zone("lan", &["lan"], "ACCEPT", "ACCEPT"),
    ]);
    let dhcp = doc([dnsmasq(), dhcp_ignored("lan")]);
    (network, None, firewall, dhcp)
}

fn sniffer(p: &ModeParameters) -> Files {
    let bridge_name = p.get("bridge_name");
    let mut device = bridge_device(bridge_name, p.get("bridge_ports"));
    if p.flag("promiscuous") {
        device = device.opt("promisc", "1");
    }
    let network = doc([
        loopback(),
        device,
        UciSection::named("interface", "lan")
            .opt("device", bridge_name)
            .opt("proto", "dhcp"),
        UciSection::named("interface", "capture")
            .opt("device", p.get("capture_interface"))
            .opt("proto", "none"),
    ]);
    let firewall = doc([
        firewall_defaults("ACCEPT"),
        zone("lan", &["lan", "capture"], "ACCEPT", "ACCEPT"),
    ]);
    let dhcp = doc([dnsmasq(), dhcp_ignored("lan")]);
    (network, None, firewall, dhcp)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::ModeRegistry;

    fn defaults(id: ModeId) -> ModeParameters {
        let mode = ModeRegistry.get(id);
        ModeRegistry
            .resolve(mode, &BTreeMap::new(), &BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn renders_exactly_the_affected_paths() {
        for mode in ModeRegistry.list() {
            let files = render(mode, &defaults(mode.id));
            let paths: Vec<&str> = files.keys().copied().collect();
            let mut expected = mode.affected_config_paths.to_vec();
            expected.sort_unstable();
            assert_eq!(paths, expected, "mode {}", mode.id);
        }
    }

    #[test]
    fn rendering_is_deterministic_and_parses() {
        for mode in ModeRegistry.list() {
            let params = defaults(mode.id);
            let first = render(mode, &params);
            assert_eq!(first, render(mode, &params));
            for (path, bytes) in &first {
                let text = String::from_utf8(bytes.clone()).unwrap();
                assert!(UciDocument::parse(&text).is_ok(), "{path} for {}", mode.id);
            }
        }
    }

    #[test]
    fn access_point_lan_uses_dhcp_by_default() {
        let mode = ModeRegistry.get(ModeId::AccessPoint);
        let docs = render_documents(mode, &defaults(ModeId::AccessPoint));
        let lan = docs[NETWORK].section("interface", "lan").unwrap();
        assert_eq!(lan.get_str("proto"), Some("dhcp"));
        assert_eq!(
            docs[DHCP].section("dhcp", "lan").and_then(|s| s.get_str("ignore")),
            Some("1")
        );
    }

    #[test]
    fn travel_clones_mac_only_when_set() {
        let mode = ModeRegistry.get(ModeId::Travel);
        let docs = render_documents(mode, &defaults(ModeId::Travel));
        let wwan = docs[WIRELESS].section("wifi-iface", "wwan").unwrap();
        assert_eq!(wwan.get_str("macaddr"), None);

        let overrides: BTreeMap<String, String> =
            [("clone_mac".to_owned(), "aa:bb:cc:00:11:22".to_owned())].into();
        let params = ModeRegistry.resolve(mode, &BTreeMap::new(), &overrides).unwrap();
        let docs = render_documents(mode, &params);
        let wwan = docs[WIRELESS].section("wifi-iface", "wwan").unwrap();
        assert_eq!(wwan.get_str("macaddr"), Some("aa:bb:cc:00:11:22"));
    }
}
