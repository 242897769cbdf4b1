//! Interface reconciliation engine.
//!
//! One pass reads the persisted records, compares them with the devices
//! the OS can see, persists the differences and hands the result to the
//! OS integration. The DHCP hooks write lease data back into the same
//! records.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{OsMode, Settings, write_file};
use crate::discovery::Discovery;
use crate::error::{Error, Result};
use crate::exec::{CommandSpec, Executor};
use crate::firewall::Firewall;
use crate::hosts::{self, HostName};
use crate::integration::{FALLBACK_ADDRESS, FALLBACK_PREFIX, Integration};
use crate::lease::{DeconfigEvent, LeaseEvent, LeaseKeys};
use crate::model::{InterfacePatch, InterfaceRecord, NewInterface};
use crate::resolver::{self, parse_nameservers, upstream_nameservers};
use crate::routes::StaticRoutes;
use crate::status::{self, InterfaceStatus};
use crate::store::InterfaceStore;

/// Result of [`NetworkEngine::reconcile_and_apply`].
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub mode: OsMode,
    pub interfaces: Vec<InterfaceRecord>,
    pub configured: Vec<String>,
    pub skipped: Vec<String>,
    pub failed_commands: usize,
}

pub struct NetworkEngine {
    store: Arc<dyn InterfaceStore>,
    exec: Arc<dyn Executor>,
    discovery: Arc<dyn Discovery>,
    firewall: Arc<dyn Firewall>,
    integration: Arc<dyn Integration>,
    settings: Arc<Settings>,
}

impl NetworkEngine {
    pub fn new(
        store: Arc<dyn InterfaceStore>,
        exec: Arc<dyn Executor>,
        discovery: Arc<dyn Discovery>,
        firewall: Arc<dyn Firewall>,
        integration: Arc<dyn Integration>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            exec,
            discovery,
            firewall,
            integration,
            settings,
        }
    }

    pub fn mode(&self) -> OsMode {
        self.integration.mode()
    }

    pub fn lease_keys(&self) -> &'static LeaseKeys {
        self.integration.lease_keys()
    }

    // ========== Reconciliation ==========

    /// Devices the OS currently exposes.
    pub fn interface_names(&self) -> Vec<String> {
        self.discovery.physical_interfaces()
    }

    /// Reconcile the records with the visible devices and persist the
    /// result. Returns the records as they are after the pass.
    pub fn general_net_settings(&self) -> Result<Vec<InterfaceRecord>> {
        let observed = self.interface_names();
        let records = self.store.list()?;

        if records.is_empty() {
            self.bootstrap(&observed)?;
        } else {
            let mut unmatched = observed.clone();

            for mut record in records {
                if observed.contains(&record.interface) {
                    if !record.is_vlan() {
                        unmatched.retain(|device| device != &record.interface);
                    }
                    if record.disabled && record.device_missing {
                        record.disabled = false;
                        record.device_missing = false;
                        self.store.update(&record)?;
                        info!(
                            device = %record.device_name(),
                            "Device is back, interface re-enabled"
                        );
                    }
                } else if !record.disabled {
                    record.disabled = true;
                    record.device_missing = true;
                    record.internet = false;
                    self.store.update(&record)?;
                    warn!(device = %record.device_name(), "Device not found, interface disabled");
                } else if record.internet {
                    record.internet = false;
                    self.store.update(&record)?;
                }
            }

            for device in &unmatched {
                self.store
                    .insert(&NewInterface::discovered(device).disabled(true))?;
                info!(device = %device, "New device found, added as disabled interface");
            }
        }

        self.enforce_single_uplink()
    }

    fn bootstrap(&self, observed: &[String]) -> Result<()> {
        for (index, device) in observed.iter().enumerate() {
            self.store
                .insert(&NewInterface::discovered(device).uplink(index == 0))?;
        }
        if !observed.is_empty() {
            info!(devices = ?observed, "Created initial interface records");
        }
        Ok(())
    }

    /// Keep the first enabled uplink, clear the flag everywhere else and
    /// promote the first enabled record when there is none.
    fn enforce_single_uplink(&self) -> Result<Vec<InterfaceRecord>> {
        let mut records = self.store.list()?;
        let mut has_uplink = false;
        let mut changed = false;

        for record in records.iter_mut().filter(|r| r.internet) {
            if record.disabled || has_uplink {
                record.internet = false;
                self.store.update(record)?;
                changed = true;
                debug!(device = %record.device_name(), "Cleared extra uplink flag");
            } else {
                has_uplink = true;
            }
        }

        if !has_uplink && let Some(record) = records.iter_mut().find(|r| !r.disabled) {
            record.internet = true;
            self.store.update(record)?;
            changed = true;
            info!(device = %record.device_name(), "Interface promoted to uplink");
        }

        // Updates bump updated_at; hand back what the store now holds.
        if changed {
            records = self.store.list()?;
        }
        Ok(records)
    }

    /// Full pass: reconcile, configure the OS, firewall and hostname.
    /// Only store failures are returned as errors.
    pub async fn reconcile_and_apply(&self) -> Result<ReconcileReport> {
        info!(mode = ?self.mode(), "Reconciling LAN interfaces");

        let interfaces = self.general_net_settings()?;
        let host = host_name_of(&interfaces);
        let routes = StaticRoutes::load_or_empty(&self.settings.static_routes).await;

        let outcome = self
            .integration
            .apply_interfaces(&interfaces, &host.hostname, &routes)
            .await;

        self.apply_firewall(&interfaces).await;

        if let Err(e) = hosts::apply(&self.settings, self.exec.as_ref(), &host).await {
            warn!(error = %e, "Failed to configure hostname");
        }

        Ok(ReconcileReport {
            mode: self.mode(),
            interfaces,
            configured: outcome.configured,
            skipped: outcome.skipped,
            failed_commands: outcome.failed_commands,
        })
    }

    async fn apply_firewall(&self, interfaces: &[InterfaceRecord]) {
        if let Err(e) = self.firewall.apply_config(interfaces).await {
            warn!(error = %e, "Failed to apply firewall rules");
        }
    }

    // ========== Resolver ==========

    /// Hostname and domain of the uplink.
    pub fn host_name(&self) -> Result<HostName> {
        Ok(self
            .store
            .uplink()?
            .map(|r| HostName::new(&r.hostname, &r.domain))
            .unwrap_or_default())
    }

    /// Nameservers configured on the uplink.
    pub fn host_dns(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .uplink()?
            .map(|r| r.upstream_dns())
            .unwrap_or_default())
    }

    /// Regenerate resolver configuration from the uplink's nameservers.
    pub async fn resolv_conf_generate(&self) -> Result<()> {
        let dns = self.host_dns()?;
        self.apply_resolver_config(&dns).await
    }

    /// Write resolver pointer and pdnsd config, then restart pdnsd.
    pub async fn apply_resolver_config(&self, nameservers: &[String]) -> Result<()> {
        let upstream = upstream_nameservers(nameservers);
        let host = self.host_name().unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read hostname, using default");
            HostName::default()
        });

        if let Err(e) = self.integration.write_resolver(&host.domain, &upstream).await {
            warn!(error = %e, "Failed to write resolver configuration");
        }

        let cache_dir =
            resolver::prepare_cache_dir(&self.settings.temp_dir, &self.settings.spool_dir).await;
        let conf =
            resolver::render_pdnsd_conf(&cache_dir, &self.settings.pdnsd_pid_file, &upstream);
        write_file(&self.settings.pdnsd_conf, &conf).await?;

        for pid in self.exec.pid_of(&self.settings.pdnsd) {
            if let Err(e) = self.exec.kill(pid) {
                warn!(pid, error = %e, "Failed to stop pdnsd");
            }
        }
        if let Err(e) = self.integration.start_dns_cache().await {
            warn!(error = %e, "Failed to start pdnsd");
        }

        info!(nameservers = ?upstream, "Resolver configured");
        Ok(())
    }

    // ========== DHCP hooks ==========

    /// A lease was bound or renewed.
    pub async fn on_lease_bound(&self, lease: &LeaseEvent) -> Result<()> {
        let record = self.store.get_by_interface(&lease.interface)?;
        let is_uplink = record.as_ref().is_some_and(|r| r.internet);

        let routes = StaticRoutes::load_or_empty(&self.settings.static_routes).await;
        if let Err(e) = self.integration.apply_lease(lease, is_uplink, &routes).await {
            warn!(device = %lease.interface, error = %e, "Failed to apply lease");
        }

        if is_uplink && let Err(e) = self.apply_resolver_config(&lease.dns).await {
            warn!(error = %e, "Failed to update resolver after lease");
        }

        let Some(mut record) = record else {
            debug!(device = %lease.interface, "No interface record, lease not persisted");
            return Ok(());
        };

        let ip = lease.ip.map(|ip| ip.to_string()).unwrap_or_default();
        let gateway = lease.gateway().map(|gw| gw.to_string()).unwrap_or_default();
        let mut changed = InterfacePatch::address(ip, lease.cidr(), gateway).apply_to(&mut record);
        changed |= record.merge_dns(lease.primary_dns(), lease.secondary_dns());

        if changed {
            self.store.update(&record)?;
        }
        debug!(
            device = %lease.interface,
            hostname = %lease.hostname,
            nis_servers = ?lease.nis_servers,
            "Lease options not persisted"
        );
        info!(
            device = %lease.interface,
            ip = ?lease.ip,
            uplink = is_uplink,
            lease_secs = ?lease.lease_secs,
            domain = %lease.domain,
            "Lease bound"
        );
        Ok(())
    }

    /// The DHCP client lost its lease.
    pub async fn on_deconfig(&self, event: &DeconfigEvent) -> Result<()> {
        if let Err(e) = self.integration.apply_fallback_address(&event.interface).await {
            warn!(device = %event.interface, error = %e, "Failed to set fallback address");
        }

        let patch = InterfacePatch::address(
            FALLBACK_ADDRESS.to_string(),
            FALLBACK_PREFIX.to_string(),
            "",
        );
        self.update_if_settings(&event.interface, &patch)?;
        info!(device = %event.interface, "Lease lost, fallback address set");
        Ok(())
    }

    // ========== Record updates ==========

    /// Patch the non-VLAN record of a device. Returns false when there is
    /// no such record.
    pub fn update_if_settings(&self, interface: &str, patch: &InterfacePatch) -> Result<bool> {
        let Some(mut record) = self.store.get_by_interface(interface)? else {
            return Ok(false);
        };
        if !patch.is_empty() && patch.apply_to(&mut record) {
            self.store.update(&record)?;
        }
        Ok(true)
    }

    /// Merge advertised nameservers into a device's record.
    pub fn update_dns_settings(
        &self,
        interface: &str,
        primary: &str,
        secondary: &str,
    ) -> Result<bool> {
        let Some(mut record) = self.store.get_by_interface(interface)? else {
            return Ok(false);
        };
        if record.merge_dns(primary, secondary) {
            self.store.update(&record)?;
        }
        Ok(true)
    }

    /// Patch the uplink, or the first record (which becomes the uplink)
    /// when none is flagged.
    pub fn update_net_settings(&self, patch: &InterfacePatch) -> Result<bool> {
        let (mut record, promote) = match self.store.uplink()? {
            Some(record) => (record, false),
            None => match self.store.list()?.into_iter().next() {
                Some(record) => (record, true),
                None => return Ok(false),
            },
        };

        let mut changed = patch.apply_to(&mut record);
        if promote {
            record.internet = true;
            changed = true;
        }
        if changed {
            self.store.update(&record)?;
        }
        Ok(true)
    }

    // ========== Queries ==========

    pub fn enabled_interfaces(&self) -> Result<Vec<InterfaceRecord>> {
        Ok(self.store.enabled()?)
    }

    /// Physical device of a record, if the record exists.
    pub fn interface_name_by_id(&self, id: i64) -> Result<Option<String>> {
        Ok(self.store.get(id)?.map(|r| r.interface))
    }

    pub async fn configure_loopback(&self) -> Result<()> {
        self.integration.configure_loopback().await
    }

    /// Live status of one device.
    pub async fn interface_status(&self, name: &str) -> Result<InterfaceStatus> {
        let busybox = |args: [&str; 2]| CommandSpec::new(&self.settings.busybox).args(args);

        let output = self.exec.run(&busybox(["ifconfig", name])).await?;
        if !output.success {
            return Err(Error::CommandFailed {
                command: format!("ifconfig {name}"),
                stderr: output.stderr.trim().to_string(),
            });
        }
        let mut status = status::parse_ifconfig(name, &output.stdout);

        match self.exec.run(&busybox(["route", "-n"])).await {
            Ok(routes) => {
                status.gateway =
                    status::parse_default_gateway(&routes.stdout, name).unwrap_or_default();
            }
            Err(e) => debug!(device = name, error = %e, "Cannot read routing table"),
        }

        status.dns = tokio::fs::read_to_string(&self.settings.resolv_conf)
            .await
            .map(|conf| parse_nameservers(&conf))
            .unwrap_or_default();

        Ok(status)
    }

    /// Live status of every visible device.
    pub async fn interfaces_status(&self) -> Vec<InterfaceStatus> {
        let mut statuses = Vec::new();
        for name in self.interface_names() {
            match self.interface_status(&name).await {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(device = %name, error = %e, "Cannot read interface status"),
            }
        }
        statuses
    }
}

fn host_name_of(interfaces: &[InterfaceRecord]) -> HostName {
    interfaces
        .iter()
        .find(|r| r.internet)
        .map(|r| HostName::new(&r.hostname, &r.domain))
        .unwrap_or_default()
}
