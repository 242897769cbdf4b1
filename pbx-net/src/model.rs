//! LAN interface records and the patches applied to them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::subnet::normalize_subnet;

/// Hostname used when the uplink record carries none.
pub const DEFAULT_HOSTNAME: &str = "pbx";

/// Topology assigned to records the engine creates.
pub const DEFAULT_TOPOLOGY: &str = "private";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    Dhcp,
    Static,
}

impl AddressingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressingMode::Dhcp => "dhcp",
            AddressingMode::Static => "static",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dhcp" | "1" => Some(AddressingMode::Dhcp),
            "static" | "0" => Some(AddressingMode::Static),
            _ => None,
        }
    }
}

/// One persisted LAN interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceRecord {
    pub id: i64,
    /// Display label.
    pub name: String,
    /// Physical OS device this record binds to.
    pub interface: String,
    /// 0 when the record is not a VLAN.
    pub vlan_id: u16,
    pub addressing: AddressingMode,
    pub ip_address: String,
    pub subnet: String,
    pub gateway: String,
    pub primary_dns: String,
    pub secondary_dns: String,
    /// Uplink flag.
    pub internet: bool,
    pub disabled: bool,
    /// Set when the engine disabled the record because its device vanished.
    pub device_missing: bool,
    pub hostname: String,
    pub domain: String,
    pub topology: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InterfaceRecord {
    pub fn is_vlan(&self) -> bool {
        self.vlan_id > 0
    }

    /// OS device name: `vlan<id>` for VLANs, otherwise the physical device.
    pub fn device_name(&self) -> String {
        if self.is_vlan() {
            format!("vlan{}", self.vlan_id)
        } else {
            self.interface.clone()
        }
    }

    /// VLANs are always statically addressed.
    pub fn effective_mode(&self) -> AddressingMode {
        if self.is_vlan() {
            AddressingMode::Static
        } else {
            self.addressing
        }
    }

    pub fn is_dhcp(&self) -> bool {
        self.effective_mode() == AddressingMode::Dhcp
    }

    /// Upstream nameservers configured on this record, without blanks
    /// and without the local caching resolver.
    pub fn upstream_dns(&self) -> Vec<String> {
        [&self.primary_dns, &self.secondary_dns]
            .into_iter()
            .map(|dns| dns.trim())
            .filter(|dns| !dns.is_empty() && *dns != crate::resolver::LOOPBACK_RESOLVER)
            .map(str::to_string)
            .collect()
    }

    /// Merge DNS servers advertised by a DHCP server.
    ///
    /// Primary is written only when empty. A differing advertised primary
    /// lands in an empty secondary, and an advertised secondary fills a
    /// secondary that is still empty. Returns whether anything changed.
    pub fn merge_dns(&mut self, primary: &str, secondary: &str) -> bool {
        let primary = primary.trim();
        let secondary = secondary.trim();
        let mut changed = false;

        if !primary.is_empty() {
            if self.primary_dns.is_empty() {
                self.primary_dns = primary.to_string();
                changed = true;
            } else if self.primary_dns != primary && self.secondary_dns.is_empty() {
                self.secondary_dns = primary.to_string();
                changed = true;
            }
        }

        if !secondary.is_empty() && self.secondary_dns.is_empty() {
            self.secondary_dns = secondary.to_string();
            changed = true;
        }

        changed
    }
}

/// Values for a record the engine creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInterface {
    pub name: String,
    pub interface: String,
    pub vlan_id: u16,
    pub addressing: AddressingMode,
    pub internet: bool,
    pub disabled: bool,
    pub hostname: String,
    pub topology: String,
}

impl NewInterface {
    /// A DHCP record for a freshly discovered physical device.
    pub fn discovered(device: &str) -> Self {
        Self {
            name: format!("LAN {device}"),
            interface: device.to_string(),
            vlan_id: 0,
            addressing: AddressingMode::Dhcp,
            internet: false,
            disabled: false,
            hostname: DEFAULT_HOSTNAME.to_string(),
            topology: DEFAULT_TOPOLOGY.to_string(),
        }
    }

    pub fn uplink(mut self, internet: bool) -> Self {
        self.internet = internet;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[cfg(test)]
    pub(crate) fn vlan(mut self, vlan_id: u16) -> Self {
        self.vlan_id = vlan_id;
        self.addressing = AddressingMode::Static;
        self
    }
}

/// Partial update of a record. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfacePatch {
    pub addressing: Option<AddressingMode>,
    pub ip_address: Option<String>,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    pub primary_dns: Option<String>,
    pub secondary_dns: Option<String>,
    pub hostname: Option<String>,
    pub domain: Option<String>,
}

impl InterfacePatch {
    /// Address, subnet and gateway in one go, as the DHCP hooks persist them.
    pub fn address(
        ip_address: impl Into<String>,
        subnet: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            subnet: Some(subnet.into()),
            gateway: Some(gateway.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a record; subnets are normalized to a bit count.
    /// Returns whether the record changed.
    pub fn apply_to(&self, record: &mut InterfaceRecord) -> bool {
        let before = record.clone();

        if let Some(mode) = self.addressing {
            record.addressing = mode;
        }
        if let Some(ip) = &self.ip_address {
            record.ip_address = ip.trim().to_string();
        }
        if let Some(subnet) = &self.subnet {
            record.subnet = normalize_subnet(subnet);
        }
        if let Some(gateway) = &self.gateway {
            record.gateway = gateway.trim().to_string();
        }
        if let Some(dns) = &self.primary_dns {
            record.primary_dns = dns.trim().to_string();
        }
        if let Some(dns) = &self.secondary_dns {
            record.secondary_dns = dns.trim().to_string();
        }
        if let Some(hostname) = &self.hostname {
            record.hostname = hostname.trim().to_string();
        }
        if let Some(domain) = &self.domain {
            record.domain = domain.trim().to_string();
        }

        *record != before
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: i64, interface: &str) -> InterfaceRecord {
    let now = Utc::now();
    InterfaceRecord {
        id,
        name: format!("LAN {interface}"),
        interface: interface.to_string(),
        vlan_id: 0,
        addressing: AddressingMode::Dhcp,
        ip_address: String::new(),
        subnet: String::new(),
        gateway: String::new(),
        primary_dns: String::new(),
        secondary_dns: String::new(),
        internet: false,
        disabled: false,
        device_missing: false,
        hostname: DEFAULT_HOSTNAME.to_string(),
        domain: String::new(),
        topology: DEFAULT_TOPOLOGY.to_string(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlan_device_name_and_mode() {
        let mut record = sample_record(1, "eth0");
        assert_eq!(record.device_name(), "eth0");
        assert_eq!(record.effective_mode(), AddressingMode::Dhcp);

        record.vlan_id = 12;
        assert_eq!(record.device_name(), "vlan12");
        assert_eq!(record.effective_mode(), AddressingMode::Static);
    }

    #[test]
    fn test_merge_dns_fills_empty_primary() {
        let mut record = sample_record(1, "eth0");
        assert!(record.merge_dns("1.1.1.1", "9.9.9.9"));
        assert_eq!(record.primary_dns, "1.1.1.1");
        assert_eq!(record.secondary_dns, "9.9.9.9");
    }

    #[test]
    fn test_merge_dns_keeps_existing_primary() {
        let mut record = sample_record(1, "eth0");
        record.primary_dns = "4.4.4.4".to_string();

        assert!(record.merge_dns("1.1.1.1", ""));
        assert_eq!(record.primary_dns, "4.4.4.4");
        assert_eq!(record.secondary_dns, "1.1.1.1");

        // Both slots taken: nothing moves.
        assert!(!record.merge_dns("8.8.4.4", "9.9.9.9"));
        assert_eq!(record.primary_dns, "4.4.4.4");
        assert_eq!(record.secondary_dns, "1.1.1.1");
    }

    #[test]
    fn test_merge_dns_same_primary_takes_secondary() {
        let mut record = sample_record(1, "eth0");
        record.primary_dns = "1.1.1.1".to_string();

        assert!(record.merge_dns("1.1.1.1", "9.9.9.9"));
        assert_eq!(record.secondary_dns, "9.9.9.9");
        assert!(!record.merge_dns("1.1.1.1", "9.9.9.9"));
    }

    #[test]
    fn test_upstream_dns_skips_loopback() {
        let mut record = sample_record(1, "eth0");
        record.primary_dns = "127.0.0.1".to_string();
        record.secondary_dns = " 8.8.4.4 ".to_string();
        assert_eq!(record.upstream_dns(), vec!["8.8.4.4".to_string()]);
    }

    #[test]
    fn test_patch_normalizes_subnet() {
        let mut record = sample_record(1, "eth0");
        let patch = InterfacePatch::address("10.0.0.2", "255.255.255.0", "10.0.0.1");

        assert!(patch.apply_to(&mut record));
        assert_eq!(record.ip_address, "10.0.0.2");
        assert_eq!(record.subnet, "24");
        assert_eq!(record.gateway, "10.0.0.1");

        assert!(!patch.apply_to(&mut record));
        assert!(InterfacePatch::default().is_empty());
    }
}
