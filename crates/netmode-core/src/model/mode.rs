// ── Mode domain types ──

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Stable identifier of an operating topology.
///
/// The lowercase form is the wire name used in RPC calls, UCI sections,
/// and persisted state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModeId {
    Router,
    AccessPoint,
    Relay,
    Travel,
    Bridge,
    Sniffer,
}

/// Value domain of a mode parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Interface,
    Flag,
    Choice { options: &'static [&'static str] },
    Range { min: i64, max: i64 },
    Ipv4,
    Netmask,
    Mac,
    Ssid,
    Passphrase,
}

/// One entry of a mode's parameter schema.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub default: &'static str,
    /// An empty value is accepted and means "not set".
    pub optional: bool,
    pub description: &'static str,
}

impl ParamSpec {
    /// Check a raw value against this parameter's domain.
    pub fn validate(&self, value: &str) -> Result<(), String> {
        if value.is_empty() {
            if self.optional || matches!(self.kind, ParamKind::Passphrase) {
                return Ok(());
            }
            return Err(format!("{}: must not be empty", self.name));
        }

        let fail = |reason: &str| Err(format!("{}: {reason} (got '{value}')", self.name));

        match self.kind {
            ParamKind::Text => {
                if value.contains(['\'', '\n', '\r']) {
                    return fail("must not contain quotes or line breaks");
                }
            }
            ParamKind::Interface => {
                let valid = value.len() <= 15
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
                if !valid {
                    return fail("not a valid interface name");
                }
            }
            ParamKind::Flag => {
                if value != "0" && value != "1" {
                    return fail("expected 0 or 1");
                }
            }
            ParamKind::Choice { options } => {
                if !options.contains(&value) {
                    return Err(format!(
                        "{}: expected one of {} (got '{value}')",
                        self.name,
                        options.join(", ")
                    ));
                }
            }
            ParamKind::Range { min, max } => match value.parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => {}
                _ => return Err(format!("{}: expected an integer in {min}..={max} (got '{value}')", self.name)),
            },
            ParamKind::Ipv4 => {
                if value.parse::<Ipv4Addr>().is_err() {
                    return fail("not an IPv4 address");
                }
            }
            ParamKind::Netmask => {
                let Ok(mask) = value.parse::<Ipv4Addr>() else {
                    return fail("not an IPv4 netmask");
                };
                let bits = u32::from(mask);
                if bits.leading_ones() + bits.trailing_zeros() != 32 {
                    return fail("netmask bits are not contiguous");
                }
            }
            ParamKind::Mac => {
                let octets: Vec<&str> = value.split(':').collect();
                let valid = octets.len() == 6
                    && octets
                        .iter()
                        .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
                if !valid {
                    return fail("not a MAC address");
                }
            }
            ParamKind::Ssid => {
                if value.len() > 32 || value.contains(['\'', '\n', '\r']) {
                    return fail("SSID must be 1-32 bytes without quotes");
                }
            }
            ParamKind::Passphrase => {
                if !(8..=63).contains(&value.len()) || value.contains(['\'', '\n', '\r']) {
                    return fail("passphrase must be 8-63 characters");
                }
            }
        }
        Ok(())
    }
}

/// A service a mode restarts, with the enablement the mode requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub name: &'static str,
    pub enabled: bool,
}

/// A mode definition. Immutable and defined at build time.
#[derive(Debug, Serialize)]
pub struct Mode {
    pub id: ModeId,
    pub display_name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub features: &'static [&'static str],
    pub parameter_schema: &'static [ParamSpec],
    /// Restart order is declaration order.
    pub affected_services: &'static [ServiceSpec],
    pub affected_config_paths: &'static [&'static str],
}

impl Mode {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameter_schema.iter().find(|p| p.name == name)
    }

    pub fn touches(&self, path: &str) -> bool {
        self.affected_config_paths.contains(&path)
    }
}

/// Validated parameter values for one mode, including defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeParameters(BTreeMap<String, String>);

impl ModeParameters {
    pub(crate) fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    /// The value of a parameter, or `""` when absent.
    pub fn get(&self, name: &str) -> &str {
        self.0.get(name).map_or("", String::as_str)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name) == "1"
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ParamKind) -> ParamSpec {
        ParamSpec {
            name: "p",
            kind,
            default: "",
            optional: false,
            description: "",
        }
    }

    #[test]
    fn mode_id_wire_names() {
        assert_eq!(ModeId::AccessPoint.to_string(), "accesspoint");
        assert_eq!("relay".parse::<ModeId>().ok(), Some(ModeId::Relay));
        assert!("wizard".parse::<ModeId>().is_err());
        assert_eq!(
            serde_json::to_string(&ModeId::Sniffer).ok().as_deref(),
            Some("\"sniffer\"")
        );
    }

    #[test]
    fn netmask_must_be_contiguous() {
        let s = spec(ParamKind::Netmask);
        assert!(s.validate("255.255.255.0").is_ok());
        assert!(s.validate("255.0.255.0").is_err());
    }

    #[test]
    fn range_and_flag() {
        assert!(spec(ParamKind::Range { min: 1, max: 30 }).validate("20").is_ok());
        assert!(spec(ParamKind::Range { min: 1, max: 30 }).validate("31").is_err());
        assert!(spec(ParamKind::Flag).validate("yes").is_err());
    }

    #[test]
    fn passphrase_may_be_empty_but_not_short() {
        let s = spec(ParamKind::Passphrase);
        assert!(s.validate("").is_ok());
        assert!(s.validate("short").is_err());
        assert!(s.validate("long enough").is_ok());
    }

    #[test]
    fn mac_and_interface() {
        assert!(spec(ParamKind::Mac).validate("aa:bb:cc:dd:ee:ff").is_ok());
        assert!(spec(ParamKind::Mac).validate("aa-bb-cc-dd-ee-ff").is_err());
        assert!(spec(ParamKind::Interface).validate("br-lan").is_ok());
        assert!(spec(ParamKind::Interface).validate("eth0; reboot").is_err());
    }
}
