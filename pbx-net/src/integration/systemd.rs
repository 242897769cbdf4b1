//! ifupdown stanza files under `/etc/network/interfaces.d`, driven by
//! systemd. dhclient configures leased addresses itself, so the lease
//! hooks only persist state.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ApplyOutcome, Integration, run_logged};
use crate::config::{OsMode, Settings, write_file};
use crate::error::{Error, Result};
use crate::exec::{CommandSpec, Executor};
use crate::lease::{DHCLIENT_KEYS, LeaseEvent, LeaseKeys};
use crate::model::{AddressingMode, InterfaceRecord};
use crate::resolver::{LOOPBACK_RESOLVER, render_resolved_conf};
use crate::routes::StaticRoutes;
use crate::subnet::static_network;

pub struct SystemdIntegration {
    exec: Arc<dyn Executor>,
    settings: Arc<Settings>,
}

impl SystemdIntegration {
    pub fn new(exec: Arc<dyn Executor>, settings: Arc<Settings>) -> Self {
        Self { exec, settings }
    }

    async fn systemctl(&self, action: &str, unit: &str) -> bool {
        let cmd = CommandSpec::new(&self.settings.systemctl).args([action, unit]);
        run_logged(self.exec.as_ref(), &cmd).await
    }

    async fn remove_stanza(&self, record: &InterfaceRecord) -> Result<()> {
        let device = record.device_name();
        let cmd = CommandSpec::new(&self.settings.ifdown).arg(&device);
        run_logged(self.exec.as_ref(), &cmd).await;

        let path = self.settings.interfaces_dir.join(&device);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(device = %device, "Removed interface stanza");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

/// ifupdown stanza for one enabled record.
///
/// Static and VLAN stanzas carry the prefix length in `netmask`, and
/// point `dns-nameservers` at the local cache.
pub fn render_interface_config(record: &InterfaceRecord, routes: &StaticRoutes) -> Result<String> {
    let device = record.device_name();
    let mut lines = Vec::new();

    match record.effective_mode() {
        AddressingMode::Dhcp => {
            lines.push(format!("auto {device}"));
            lines.push(format!("iface {device} inet dhcp"));
        }
        AddressingMode::Static => {
            let net = static_network(&record.ip_address, &record.subnet)?;
            let label = if record.is_vlan() {
                format!("{}.{}", record.interface, record.vlan_id)
            } else {
                device.clone()
            };

            lines.push(format!("auto {label}"));
            lines.push(format!("iface {label} inet static"));
            lines.push(format!("address {}", net.addr()));
            lines.push(format!("netmask {}", net.prefix_len()));
            let gateway = record.gateway.trim();
            if !gateway.is_empty() {
                lines.push(format!("gateway {gateway}"));
            }
            lines.push(format!("dns-nameservers {LOOPBACK_RESOLVER}"));
            if record.is_vlan() {
                lines.push(format!("vlan_raw_device {}", record.interface));
            }
        }
    }

    let (post_up, pre_down) = routes.ifupdown_hooks(&device);
    lines.extend(post_up);
    lines.extend(pre_down);

    Ok(lines.iter().map(|line| format!("{line}\n")).collect())
}

#[async_trait]
impl Integration for SystemdIntegration {
    fn mode(&self) -> OsMode {
        OsMode::Systemd
    }

    fn lease_keys(&self) -> &'static LeaseKeys {
        &DHCLIENT_KEYS
    }

    async fn apply_interfaces(
        &self,
        interfaces: &[InterfaceRecord],
        _hostname: &str,
        routes: &StaticRoutes,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        self.systemctl("stop", "networking").await;
        let modprobe = CommandSpec::new(&self.settings.modprobe).arg("8021q");
        if !run_logged(self.exec.as_ref(), &modprobe).await {
            outcome.failed_commands += 1;
        }

        for record in interfaces {
            let device = record.device_name();

            if record.disabled {
                if let Err(e) = self.remove_stanza(record).await {
                    warn!(device = %device, error = %e, "Failed to remove interface stanza");
                }
                continue;
            }

            let config = match render_interface_config(record, routes) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        device = %device,
                        error = %e,
                        "Skipping interface with invalid configuration"
                    );
                    outcome.skipped.push(device);
                    continue;
                }
            };

            let path = self.settings.interfaces_dir.join(&device);
            match write_file(&path, &config).await {
                Ok(()) => outcome.configured.push(device),
                Err(e) => {
                    warn!(device = %device, error = %e, "Failed to write interface stanza");
                    outcome.skipped.push(device);
                }
            }
        }

        if !self.systemctl("start", "networking").await {
            outcome.failed_commands += 1;
        }

        info!(
            configured = outcome.configured.len(),
            skipped = outcome.skipped.len(),
            "Interface stanzas written"
        );
        outcome
    }

    async fn write_resolver(&self, domain: &str, _nameservers: &[String]) -> Result<()> {
        write_file(&self.settings.resolved_conf, &render_resolved_conf(domain)).await?;
        self.systemctl("restart", "systemd-resolved").await;
        Ok(())
    }

    async fn start_dns_cache(&self) -> Result<()> {
        self.systemctl("restart", "pdnsd").await;
        Ok(())
    }

    async fn apply_lease(
        &self,
        lease: &LeaseEvent,
        _is_uplink: bool,
        _routes: &StaticRoutes,
    ) -> Result<()> {
        debug!(device = %lease.interface, "Lease configured by dhclient");
        Ok(())
    }

    async fn apply_fallback_address(&self, interface: &str) -> Result<()> {
        debug!(device = interface, "Fallback address left to dhclient");
        Ok(())
    }

    async fn configure_loopback(&self) -> Result<()> {
        Ok(())
    }
}
