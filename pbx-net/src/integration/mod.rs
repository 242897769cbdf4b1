//! OS integration strategies.
//!
//! The engine runs one reconciliation algorithm. What differs between a
//! busybox/init-script host and an ifupdown/systemd host lives behind
//! [`Integration`].

pub mod legacy;
pub mod systemd;

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{OsMode, Settings};
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use crate::lease::{LeaseEvent, LeaseKeys};
use crate::model::InterfaceRecord;
use crate::routes::StaticRoutes;

pub use legacy::LegacyIntegration;
pub use systemd::SystemdIntegration;

/// Address assigned when a DHCP client loses its lease.
pub const FALLBACK_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 1);
pub const FALLBACK_PREFIX: u8 = 24;

/// What an apply pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Devices whose configuration was emitted.
    pub configured: Vec<String>,
    /// Devices skipped because their configuration was invalid.
    pub skipped: Vec<String>,
    pub failed_commands: usize,
}

#[async_trait]
pub trait Integration: Send + Sync {
    fn mode(&self) -> OsMode;

    /// Environment keys the DHCP client of this mode uses.
    fn lease_keys(&self) -> &'static LeaseKeys;

    /// Bring the OS in line with the reconciled records.
    async fn apply_interfaces(
        &self,
        interfaces: &[InterfaceRecord],
        hostname: &str,
        routes: &StaticRoutes,
    ) -> ApplyOutcome;

    /// Point the system resolver at the local cache.
    async fn write_resolver(&self, domain: &str, nameservers: &[String]) -> Result<()>;

    /// Start pdnsd after its configuration changed.
    async fn start_dns_cache(&self) -> Result<()>;

    /// Configure the device for a freshly bound lease.
    async fn apply_lease(
        &self,
        lease: &LeaseEvent,
        is_uplink: bool,
        routes: &StaticRoutes,
    ) -> Result<()>;

    /// Configure the fallback address after the lease was lost.
    async fn apply_fallback_address(&self, interface: &str) -> Result<()>;

    async fn configure_loopback(&self) -> Result<()>;
}

pub fn for_mode(
    mode: OsMode,
    exec: Arc<dyn Executor>,
    settings: Arc<Settings>,
) -> Arc<dyn Integration> {
    match mode {
        OsMode::Legacy => Arc::new(LegacyIntegration::new(exec, settings)),
        OsMode::Systemd => Arc::new(SystemdIntegration::new(exec, settings)),
    }
}

/// Run a single command, logging a failure instead of returning it.
pub(crate) async fn run_logged(exec: &dyn Executor, cmd: &CommandSpec) -> bool {
    match exec.run(cmd).await {
        Ok(output) if output.success => {
            debug!(command = %cmd, "Command succeeded");
            true
        }
        Ok(output) => {
            warn!(command = %cmd, stderr = %output.stderr.trim(), "Command failed");
            false
        }
        Err(e) => {
            warn!(command = %cmd, error = %e, "Command failed");
            false
        }
    }
}

/// Start the MTU hook for `devices` in the background.
pub(crate) async fn spawn_mtu_hook(exec: &dyn Executor, settings: &Settings, devices: &[String]) {
    let Some(hook) = &settings.mtu_hook else {
        return;
    };
    if devices.is_empty() || !hook.is_file() {
        return;
    }

    let cmd = CommandSpec::new(hook.to_string_lossy())
        .args(devices.iter().cloned())
        .detached();
    if let Err(e) = exec.spawn_detached(&cmd).await {
        warn!(command = %cmd, error = %e, "Failed to start MTU hook");
    }
}
