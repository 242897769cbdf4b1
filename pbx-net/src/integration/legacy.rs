//! busybox `ifconfig`/`route` with `udhcpc`, for hosts without systemd.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    ApplyOutcome, FALLBACK_ADDRESS, FALLBACK_PREFIX, Integration, run_logged, spawn_mtu_hook,
};
use crate::config::{OsMode, Settings, write_file};
use crate::error::Result;
use crate::exec::{CommandOutput, CommandSpec, Executor, run_batch};
use crate::lease::{LeaseEvent, LeaseKeys, UDHCPC_KEYS};
use crate::model::{AddressingMode, InterfaceRecord};
use crate::resolver::render_resolv_conf;
use crate::routes::StaticRoutes;
use crate::subnet::{cidr_to_netmask, static_network};

/// Upper bound on `route del default` attempts per lease.
pub const MAX_ROUTE_FLUSH_ATTEMPTS: usize = 16;

/// `route del` is silent while it removes something. Any output, or a
/// failed run, means no default route is left on the device.
pub fn route_flush_exhausted(output: &CommandOutput) -> bool {
    !output.success || !output.combined().is_empty()
}

pub struct LegacyIntegration {
    exec: Arc<dyn Executor>,
    settings: Arc<Settings>,
}

impl LegacyIntegration {
    pub fn new(exec: Arc<dyn Executor>, settings: Arc<Settings>) -> Self {
        Self { exec, settings }
    }

    /// Kill the background udhcpc left over from a previous pass.
    async fn stop_renewal_client(&self, device: &str) {
        let pid_file = self.settings.udhcpc_pid_file(device);

        let mut pids = self.exec.pid_of(&pid_file.to_string_lossy());
        if let Ok(content) = tokio::fs::read_to_string(&pid_file).await
            && let Ok(pid) = content.trim().parse::<u32>()
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }

        for pid in pids {
            match self.exec.kill(pid) {
                Ok(()) => debug!(device, pid, "Stopped previous udhcpc"),
                Err(e) => warn!(device, pid, error = %e, "Failed to stop udhcpc"),
            }
        }
    }

    /// Remove default routes from `device` until none is left.
    async fn flush_default_routes(&self, device: &str) -> usize {
        let cmd = CommandSpec::new(&self.settings.route).args([
            "del", "default", "gw", "0.0.0.0", "dev", device,
        ]);

        let mut attempts = 0;
        while attempts < MAX_ROUTE_FLUSH_ATTEMPTS {
            attempts += 1;
            let exhausted = match self.exec.run(&cmd).await {
                Ok(output) => route_flush_exhausted(&output),
                Err(e) => {
                    warn!(device, error = %e, "Failed to run route");
                    true
                }
            };
            if exhausted || self.settings.debug {
                break;
            }
        }
        debug!(device, attempts, "Default routes flushed");
        attempts
    }
}

/// Commands that configure one enabled record.
///
/// Static records are validated first; an invalid address or mask yields
/// an error and no commands at all.
pub fn interface_commands(
    settings: &Settings,
    record: &InterfaceRecord,
    hostname: &str,
) -> Result<Vec<CommandSpec>> {
    let device = record.device_name();
    let dev = device.as_str();
    let network = match record.effective_mode() {
        AddressingMode::Static => Some(static_network(&record.ip_address, &record.subnet)?),
        AddressingMode::Dhcp => None,
    };

    let busybox = || CommandSpec::new(&settings.busybox);
    let mut commands = Vec::new();

    if record.is_vlan() {
        commands.push(
            CommandSpec::new(&settings.vconfig).args(["set_name_type", "VLAN_PLUS_VID_NO_PAD"]),
        );
        commands.push(CommandSpec::new(&settings.vconfig).args([
            "add".to_string(),
            record.interface.clone(),
            record.vlan_id.to_string(),
        ]));
    }

    commands.push(busybox().args(["ifconfig", dev, "down"]));
    commands.push(busybox().args(["ifconfig", dev, "0.0.0.0"]));

    match network {
        None => {
            let hostname_opt = format!("hostname:{hostname}");
            let script = settings.dhcp_script.to_string_lossy();
            let pid_file = settings.udhcpc_pid_file(dev);
            let pid_file = pid_file.to_string_lossy();

            // One synchronous attempt, then a background client that renews.
            commands.push(CommandSpec::new(&settings.udhcpc).args([
                "-t", "6", "-T", "5", "-q", "-n", "-i", dev, "-x", &*hostname_opt, "-s", &*script,
            ]));
            commands.push(
                CommandSpec::new(&settings.udhcpc)
                    .args([
                        "-t", "6", "-T", "5", "-S", "-b", "-n", "-p", &*pid_file, "-i", dev,
                        "-x", &*hostname_opt, "-s", &*script,
                    ])
                    .detached(),
            );
        }
        Some(net) => {
            let netmask = cidr_to_netmask(net.prefix_len()).to_string();
            let address = net.addr().to_string();
            commands.push(busybox().args([
                "ifconfig",
                dev,
                address.as_str(),
                "netmask",
                netmask.as_str(),
            ]));
            commands.push(busybox().args(["route", "del", "default", dev]));

            if record.internet {
                let gateway = record.gateway.trim();
                let mut route = busybox().args(["route", "add", "default"]);
                if !gateway.is_empty() {
                    route = route.args(["gw", gateway]);
                }
                commands.push(route.args(["dev", dev]));
            }

            commands.push(busybox().args(["ifconfig", dev, "up"]));
        }
    }

    Ok(commands)
}

#[async_trait]
impl Integration for LegacyIntegration {
    fn mode(&self) -> OsMode {
        OsMode::Legacy
    }

    fn lease_keys(&self) -> &'static LeaseKeys {
        &UDHCPC_KEYS
    }

    async fn apply_interfaces(
        &self,
        interfaces: &[InterfaceRecord],
        hostname: &str,
        routes: &StaticRoutes,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut batch = Vec::new();
        let mut static_devices = Vec::new();

        for record in interfaces.iter().filter(|r| !r.disabled) {
            let device = record.device_name();

            match interface_commands(&self.settings, record, hostname) {
                Ok(commands) => {
                    if record.is_dhcp() {
                        self.stop_renewal_client(&device).await;
                    } else {
                        static_devices.push(device.clone());
                    }
                    batch.extend(commands);
                    outcome.configured.push(device);
                }
                Err(e) => {
                    warn!(
                        device = %device,
                        error = %e,
                        "Skipping interface with invalid configuration"
                    );
                    outcome.skipped.push(device);
                }
            }
        }

        outcome.failed_commands = run_batch(self.exec.as_ref(), &batch).await;
        if !routes.is_empty() {
            outcome.failed_commands += run_batch(self.exec.as_ref(), &routes.commands()).await;
        }
        spawn_mtu_hook(self.exec.as_ref(), &self.settings, &static_devices).await;

        info!(
            configured = outcome.configured.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed_commands,
            "Interfaces configured"
        );
        outcome
    }

    async fn write_resolver(&self, domain: &str, nameservers: &[String]) -> Result<()> {
        write_file(
            &self.settings.resolv_conf,
            &render_resolv_conf(domain, nameservers),
        )
        .await
    }

    async fn start_dns_cache(&self) -> Result<()> {
        let conf = self.settings.pdnsd_conf.to_string_lossy();
        let cmd = CommandSpec::new(&self.settings.pdnsd).args(["-c", &*conf, "-4"]);
        run_logged(self.exec.as_ref(), &cmd).await;
        Ok(())
    }

    async fn apply_lease(
        &self,
        lease: &LeaseEvent,
        is_uplink: bool,
        routes: &StaticRoutes,
    ) -> Result<()> {
        let device = lease.interface.as_str();

        if let Some(ip) = lease.ip {
            let mut cmd = CommandSpec::new(&self.settings.busybox).args(["ifconfig", device]);
            cmd = cmd.arg(ip.to_string());
            if let Some(broadcast) = lease.broadcast {
                cmd = cmd.arg("broadcast").arg(broadcast.to_string());
            }
            if let Some(mask) = lease.subnet {
                cmd = cmd.arg("netmask").arg(mask.to_string());
            }
            run_logged(self.exec.as_ref(), &cmd).await;
        }

        self.flush_default_routes(device).await;

        if is_uplink {
            for router in &lease.routers {
                let cmd = CommandSpec::new(&self.settings.route).args([
                    "add".to_string(),
                    "default".to_string(),
                    "gw".to_string(),
                    router.to_string(),
                    "dev".to_string(),
                    device.to_string(),
                ]);
                run_logged(self.exec.as_ref(), &cmd).await;
            }
        }

        run_batch(self.exec.as_ref(), &routes.commands_for(device)).await;
        spawn_mtu_hook(self.exec.as_ref(), &self.settings, &[device.to_string()]).await;

        info!(device, ip = ?lease.ip, uplink = is_uplink, "Lease applied");
        Ok(())
    }

    async fn apply_fallback_address(&self, interface: &str) -> Result<()> {
        let netmask = cidr_to_netmask(FALLBACK_PREFIX).to_string();
        let cmd = CommandSpec::new(&self.settings.busybox).args([
            "ifconfig".to_string(),
            interface.to_string(),
            FALLBACK_ADDRESS.to_string(),
            "netmask".to_string(),
            netmask,
        ]);
        run_logged(self.exec.as_ref(), &cmd).await;
        Ok(())
    }

    async fn configure_loopback(&self) -> Result<()> {
        let cmd = CommandSpec::new(&self.settings.busybox).args(["ifconfig", "lo", "127.0.0.1"]);
        run_logged(self.exec.as_ref(), &cmd).await;
        Ok(())
    }
}
