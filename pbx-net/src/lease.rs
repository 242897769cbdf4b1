//! DHCP client hook input.
//!
//! Both supported DHCP clients report a lease through environment
//! variables, under different names. The values are parsed once here into
//! typed events; invalid addresses are dropped rather than passed on.

use std::net::{IpAddr, Ipv4Addr};

use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable names used by one DHCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseKeys {
    pub interface: &'static str,
    pub ip: &'static str,
    pub subnet: &'static str,
    pub router: &'static str,
    pub dns: &'static str,
    pub hostname: &'static str,
    pub domain: &'static str,
    pub broadcast: &'static str,
    pub lease: &'static str,
    pub nis_servers: &'static str,
}

/// busybox udhcpc.
pub const UDHCPC_KEYS: LeaseKeys = LeaseKeys {
    interface: "interface",
    ip: "ip",
    subnet: "subnet",
    router: "router",
    dns: "dns",
    hostname: "hostname",
    domain: "domain",
    broadcast: "broadcast",
    lease: "lease",
    nis_servers: "namesvr",
};

/// ISC dhclient.
pub const DHCLIENT_KEYS: LeaseKeys = LeaseKeys {
    interface: "new_interface",
    ip: "new_ip_address",
    subnet: "new_subnet_mask",
    router: "new_routers",
    dns: "new_domain_name_servers",
    hostname: "new_host_name",
    domain: "new_domain_name",
    broadcast: "new_broadcast_address",
    lease: "new_dhcp_lease_time",
    nis_servers: "new_netbios_name_servers",
};

/// Key both clients fall back to for the interface name.
const PLAIN_INTERFACE_KEY: &str = "interface";

/// A bound or renewed lease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseEvent {
    pub interface: String,
    pub ip: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub broadcast: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    /// Advertised nameservers, in order.
    pub dns: Vec<String>,
    pub hostname: String,
    pub domain: String,
    pub lease_secs: Option<u64>,
    pub nis_servers: Vec<String>,
}

impl LeaseEvent {
    /// Build from a key lookup (the process environment in production).
    pub fn from_env<F>(keys: &LeaseKeys, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let interface = interface_name(keys, &lookup)?;

        Ok(Self {
            ip: parse_v4(keys.ip, &get(keys.ip)),
            subnet: parse_v4(keys.subnet, &get(keys.subnet)),
            broadcast: parse_v4(keys.broadcast, &get(keys.broadcast)),
            routers: get(keys.router)
                .split_whitespace()
                .filter_map(|r| parse_v4(keys.router, r))
                .collect(),
            dns: address_list(&get(keys.dns)),
            hostname: get(keys.hostname),
            domain: get(keys.domain),
            lease_secs: get(keys.lease).parse().ok(),
            nis_servers: address_list(&get(keys.nis_servers)),
            interface,
        })
    }

    pub fn from_process_env(keys: &LeaseKeys) -> Result<Self> {
        Self::from_env(keys, |key| std::env::var(key).ok())
    }

    /// Subnet as a prefix length, or empty when the lease has no valid
    /// address or mask.
    pub fn cidr(&self) -> String {
        match (self.ip, self.subnet) {
            (Some(_), Some(mask)) => mask.to_bits().count_ones().to_string(),
            _ => String::new(),
        }
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.routers.first().copied()
    }

    pub fn primary_dns(&self) -> &str {
        self.dns.first().map(String::as_str).unwrap_or_default()
    }

    pub fn secondary_dns(&self) -> &str {
        self.dns.get(1).map(String::as_str).unwrap_or_default()
    }
}

/// The client gave up the lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeconfigEvent {
    pub interface: String,
}

impl DeconfigEvent {
    pub fn from_env<F>(keys: &LeaseKeys, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            interface: interface_name(keys, &lookup)?,
        })
    }

    pub fn from_process_env(keys: &LeaseKeys) -> Result<Self> {
        Self::from_env(keys, |key| std::env::var(key).ok())
    }
}

fn interface_name<F>(keys: &LeaseKeys, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    [keys.interface, PLAIN_INTERFACE_KEY]
        .into_iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| Error::MissingEnv(keys.interface.to_string()))
}

fn parse_v4(key: &str, value: &str) -> Option<Ipv4Addr> {
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            warn!(key, value, "Ignoring invalid IPv4 address from DHCP client");
            None
        }
    }
}

fn address_list(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .filter(|addr| addr.parse::<IpAddr>().is_ok())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_udhcpc_lease() {
        let lease = LeaseEvent::from_env(
            &UDHCPC_KEYS,
            env(&[
                ("interface", "eth0"),
                ("ip", "192.168.1.50"),
                ("subnet", "255.255.255.0"),
                ("router", "192.168.1.1 192.168.1.2"),
                ("dns", "1.1.1.1 bogus 8.8.8.8"),
                ("domain", "lan"),
                ("lease", "3600"),
            ]),
        )
        .unwrap();

        assert_eq!(lease.interface, "eth0");
        assert_eq!(lease.ip, Some(Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(lease.cidr(), "24");
        assert_eq!(lease.gateway(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(lease.routers.len(), 2);
        assert_eq!(lease.primary_dns(), "1.1.1.1");
        assert_eq!(lease.secondary_dns(), "8.8.8.8");
        assert_eq!(lease.domain, "lan");
        assert_eq!(lease.lease_secs, Some(3600));
        assert_eq!(lease.broadcast, None);
    }

    #[test]
    fn test_dhclient_lease() {
        let lease = LeaseEvent::from_env(
            &DHCLIENT_KEYS,
            env(&[
                ("new_interface", "enp3s0"),
                ("new_ip_address", "10.1.2.3"),
                ("new_subnet_mask", "255.255.0.0"),
                ("new_routers", "10.1.0.1"),
                ("new_domain_name_servers", "10.1.0.53"),
            ]),
        )
        .unwrap();

        assert_eq!(lease.interface, "enp3s0");
        assert_eq!(lease.cidr(), "16");
        assert_eq!(lease.primary_dns(), "10.1.0.53");
        assert_eq!(lease.secondary_dns(), "");
    }

    #[test]
    fn test_invalid_ip_clears_subnet() {
        let lease = LeaseEvent::from_env(
            &UDHCPC_KEYS,
            env(&[
                ("interface", "eth0"),
                ("ip", "999.1.1.1"),
                ("subnet", "255.255.255.0"),
            ]),
        )
        .unwrap();

        assert_eq!(lease.ip, None);
        assert_eq!(lease.cidr(), "");
        assert!(lease.routers.is_empty());
    }

    #[test]
    fn test_interface_fallback_and_missing() {
        let event =
            DeconfigEvent::from_env(&DHCLIENT_KEYS, env(&[("interface", "eth1")])).unwrap();
        assert_eq!(event.interface, "eth1");

        let missing = DeconfigEvent::from_env(&UDHCPC_KEYS, env(&[("ip", "10.0.0.1")]));
        assert!(matches!(missing, Err(Error::MissingEnv(key)) if key == "interface"));
    }
}
