//! Live interface status from busybox `ifconfig` and `route -n`.

use serde::Serialize;

use crate::subnet::net_mask_to_cidr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    pub name: String,
    pub mac: String,
    pub ip_address: String,
    /// Prefix length, empty when no address is assigned.
    pub subnet: String,
    pub up: bool,
    pub gateway: String,
    pub dns: Vec<String>,
}

/// Value following `key` up to the next whitespace.
fn field_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    text[start..].split_whitespace().next()
}

/// Fill MAC, address, prefix and the UP flag from `ifconfig <dev>` output.
pub fn parse_ifconfig(name: &str, output: &str) -> InterfaceStatus {
    let mask = field_after(output, "Mask:").unwrap_or_default();

    InterfaceStatus {
        name: name.to_string(),
        mac: field_after(output, "HWaddr ").unwrap_or_default().to_string(),
        ip_address: field_after(output, "inet addr:")
            .unwrap_or_default()
            .to_string(),
        subnet: if mask.is_empty() {
            String::new()
        } else {
            net_mask_to_cidr(mask).to_string()
        },
        up: output
            .lines()
            .any(|line| line.split_whitespace().next() == Some("UP")),
        ..Default::default()
    }
}

/// Default gateway through `device` from `route -n` output.
pub fn parse_default_gateway(route_output: &str, device: &str) -> Option<String> {
    route_output.lines().find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        match cols.as_slice() {
            ["0.0.0.0", gateway, .., iface] if *iface == device => Some(gateway.to_string()),
            _ => None,
        }
    })
}
