//! IPv4 netmask helpers.
//!
//! Records store the subnet either as a dotted-quad mask (`255.255.255.0`)
//! or as a prefix length (`24`). Everything downstream works with the
//! prefix length.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// Count the set bits of a dotted-quad netmask, octet by octet.
///
/// Octets that do not parse contribute nothing, so `""` yields `0`.
pub fn net_mask_to_cidr(mask: &str) -> u8 {
    mask.trim()
        .split('.')
        .filter_map(|octet| octet.trim().parse::<u8>().ok())
        .fold(0u8, |bits, octet| bits.saturating_add(octet.count_ones() as u8))
}

/// Dotted-quad netmask for a prefix length. Lengths above 32 clamp to 32.
pub fn cidr_to_netmask(prefix: u8) -> Ipv4Addr {
    Ipv4Net::new(Ipv4Addr::UNSPECIFIED, prefix.min(32))
        .map(|net| net.netmask())
        .unwrap_or(Ipv4Addr::BROADCAST)
}

pub fn is_ipv4(value: &str) -> bool {
    value.trim().parse::<Ipv4Addr>().is_ok()
}

/// Prefix length of a stored subnet, accepting both notations.
/// Non-contiguous dotted masks are rejected.
pub fn prefix_len(subnet: &str) -> Option<u8> {
    let subnet = subnet.trim();
    if let Ok(mask) = subnet.parse::<Ipv4Addr>() {
        return ipnet::ipv4_mask_to_prefix(mask).ok();
    }
    subnet
        .trim_start_matches('/')
        .parse::<u8>()
        .ok()
        .filter(|prefix| *prefix <= 32)
}

/// Rewrite a dotted mask as its bit count; anything else is returned trimmed.
pub fn normalize_subnet(subnet: &str) -> String {
    let subnet = subnet.trim();
    if is_ipv4(subnet) {
        net_mask_to_cidr(subnet).to_string()
    } else {
        subnet.to_string()
    }
}

/// Validate a static address/subnet pair.
pub fn static_network(address: &str, subnet: &str) -> Result<Ipv4Net> {
    let ip: Ipv4Addr = address
        .trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    let invalid_subnet = || Error::InvalidSubnet {
        address: address.to_string(),
        subnet: subnet.to_string(),
    };
    let prefix = prefix_len(subnet).ok_or_else(invalid_subnet)?;
    Ipv4Net::new(ip, prefix).map_err(|_| invalid_subnet())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_mask_to_cidr() {
        assert_eq!(net_mask_to_cidr("255.255.255.0"), 24);
        assert_eq!(net_mask_to_cidr("255.255.0.0"), 16);
        assert_eq!(net_mask_to_cidr("255.255.255.255"), 32);
        assert_eq!(net_mask_to_cidr("255.255.255.128"), 25);
        assert_eq!(net_mask_to_cidr("0.0.0.0"), 0);
        assert_eq!(net_mask_to_cidr(""), 0);
    }

    #[test]
    fn test_cidr_to_netmask() {
        assert_eq!(cidr_to_netmask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(cidr_to_netmask(20), Ipv4Addr::new(255, 255, 240, 0));
        assert_eq!(cidr_to_netmask(0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(cidr_to_netmask(40), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_prefix_len_accepts_both_notations() {
        assert_eq!(prefix_len("255.255.255.0"), Some(24));
        assert_eq!(prefix_len("24"), Some(24));
        assert_eq!(prefix_len("/16"), Some(16));
        assert_eq!(prefix_len("33"), None);
        assert_eq!(prefix_len("255.0.255.0"), None);
        assert_eq!(prefix_len("255.255.255.1"), None);
        assert_eq!(prefix_len(""), None);
    }

    #[test]
    fn test_normalize_subnet() {
        assert_eq!(normalize_subnet("255.255.255.0"), "24");
        assert_eq!(normalize_subnet(" 16 "), "16");
        assert_eq!(normalize_subnet(""), "");
    }

    #[test]
    fn test_static_network_validation() {
        let net = static_network("10.0.0.5", "255.255.255.0").unwrap();
        assert_eq!(net.addr(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(net.prefix_len(), 24);

        assert!(matches!(
            static_network("10.0.0.300", "24"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            static_network("", "24"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            static_network("10.0.0.5", "abc"),
            Err(Error::InvalidSubnet { .. })
        ));
        assert!(matches!(
            static_network("10.0.0.2", "255.0.255.0"),
            Err(Error::InvalidSubnet { .. })
        ));
    }
}
