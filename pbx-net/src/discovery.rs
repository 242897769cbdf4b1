//! Physical network device discovery via sysfs.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// Source of the physical devices currently visible to the OS.
pub trait Discovery: Send + Sync {
    /// Sorted names of PCI-backed network devices. Errors yield an empty list.
    fn physical_interfaces(&self) -> Vec<String>;
}

/// Reads `/sys/class/net`. Each entry is a symlink into `/sys/devices`;
/// physical NICs resolve below a `pci*` bus directory, virtual devices
/// (loopback, VLANs, bridges) below `virtual/`.
#[derive(Debug, Clone)]
pub struct SysfsDiscovery {
    net_dir: PathBuf,
}

impl Default for SysfsDiscovery {
    fn default() -> Self {
        Self::new("/sys/class/net")
    }
}

impl SysfsDiscovery {
    pub fn new(net_dir: impl Into<PathBuf>) -> Self {
        Self {
            net_dir: net_dir.into(),
        }
    }

    fn is_pci_backed(link: &Path) -> bool {
        let Ok(target) = fs::read_link(link) else {
            return false;
        };
        target.components().any(|component| {
            matches!(
                component,
                Component::Normal(name) if name.to_string_lossy().starts_with("pci")
            )
        })
    }
}

impl Discovery for SysfsDiscovery {
    fn physical_interfaces(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.net_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.net_dir.display(), error = %e, "Cannot list network devices");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| Self::is_pci_backed(&entry.path()))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        debug!(devices = ?names, "Discovered physical network devices");
        names
    }
}
