//! Hostname and `/etc/hosts`.

use tracing::{info, warn};

use crate::config::{Settings, write_file};
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use crate::model::DEFAULT_HOSTNAME;

/// Hostname and domain of the appliance, taken from the uplink record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostName {
    pub hostname: String,
    pub domain: String,
}

impl Default for HostName {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            domain: String::new(),
        }
    }
}

impl HostName {
    pub fn new(hostname: &str, domain: &str) -> Self {
        let hostname = hostname.trim();
        Self {
            hostname: if hostname.is_empty() {
                DEFAULT_HOSTNAME.to_string()
            } else {
                hostname.to_string()
            },
            domain: domain.trim().to_string(),
        }
    }

    pub fn fqdn(&self) -> Option<String> {
        (!self.domain.is_empty()).then(|| format!("{}.{}", self.hostname, self.domain))
    }
}

pub fn render_hosts(host: &HostName) -> String {
    let names = match host.fqdn() {
        Some(fqdn) => format!("{fqdn} {}", host.hostname),
        None => host.hostname.clone(),
    };
    format!("127.0.0.1 localhost\n127.0.0.1 {names}\n")
}

/// Write `/etc/hostname` and `/etc/hosts`, then set the kernel hostname.
pub async fn apply(settings: &Settings, exec: &dyn Executor, host: &HostName) -> Result<()> {
    write_file(&settings.hostname_file, &format!("{}\n", host.hostname)).await?;
    write_file(&settings.hosts_file, &render_hosts(host)).await?;

    let cmd = CommandSpec::new(&settings.hostname_bin).arg(&host.hostname);
    match exec.run(&cmd).await {
        Ok(output) if output.success => {}
        Ok(output) => warn!(
            hostname = %host.hostname,
            stderr = %output.stderr.trim(),
            "Failed to set hostname"
        ),
        Err(e) => warn!(hostname = %host.hostname, error = %e, "Failed to set hostname"),
    }

    info!(hostname = %host.hostname, domain = %host.domain, "Hostname configured");
    Ok(())
}
