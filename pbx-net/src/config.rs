//! Runtime settings: filesystem locations, binaries and the OS mode.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::exec::Executor;

/// How interfaces are brought up on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsMode {
    /// busybox ifconfig/route with udhcpc.
    Legacy,
    /// ifupdown stanza files driven by systemd.
    Systemd,
}

/// Mode requested on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ModeSelection {
    /// systemd when `systemctl` is on the PATH, legacy otherwise.
    #[default]
    Auto,
    Legacy,
    Systemd,
}

impl ModeSelection {
    pub fn resolve(self, exec: &dyn Executor) -> OsMode {
        match self {
            ModeSelection::Legacy => OsMode::Legacy,
            ModeSelection::Systemd => OsMode::Systemd,
            ModeSelection::Auto if exec.which("systemctl").is_some() => OsMode::Systemd,
            ModeSelection::Auto => OsMode::Legacy,
        }
    }
}

/// Paths and binaries used by the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Debug mode shortens retry loops.
    pub debug: bool,
    pub temp_dir: PathBuf,
    /// Fallback cache directory for pdnsd.
    pub spool_dir: PathBuf,
    /// Directory for DHCP client pid files.
    pub run_dir: PathBuf,

    pub resolv_conf: PathBuf,
    pub resolved_conf: PathBuf,
    pub pdnsd_conf: PathBuf,
    pub pdnsd_pid_file: PathBuf,
    pub interfaces_dir: PathBuf,
    pub static_routes: PathBuf,
    pub hostname_file: PathBuf,
    pub hosts_file: PathBuf,

    /// Script udhcpc calls back into on lease changes.
    pub dhcp_script: PathBuf,
    pub mtu_hook: Option<PathBuf>,
    pub firewall_hook: Option<PathBuf>,

    pub busybox: String,
    pub route: String,
    pub udhcpc: String,
    pub vconfig: String,
    pub pdnsd: String,
    pub systemctl: String,
    pub modprobe: String,
    pub ifdown: String,
    pub hostname_bin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            temp_dir: PathBuf::from("/var/tmp/pbx"),
            spool_dir: PathBuf::from("/var/spool"),
            run_dir: PathBuf::from("/var/run"),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            resolved_conf: PathBuf::from("/etc/systemd/resolved.conf"),
            pdnsd_conf: PathBuf::from("/etc/pdnsd.conf"),
            pdnsd_pid_file: PathBuf::from("/var/run/pdnsd.pid"),
            interfaces_dir: PathBuf::from("/etc/network/interfaces.d"),
            static_routes: PathBuf::from("/etc/static-routes"),
            hostname_file: PathBuf::from("/etc/hostname"),
            hosts_file: PathBuf::from("/etc/hosts"),
            dhcp_script: PathBuf::from("/etc/rc/udhcpc.configure"),
            mtu_hook: Some(PathBuf::from("/etc/rc/networking.set.mtu")),
            firewall_hook: None,
            busybox: "/bin/busybox".to_string(),
            route: "route".to_string(),
            udhcpc: "/sbin/udhcpc".to_string(),
            vconfig: "/sbin/vconfig".to_string(),
            pdnsd: "/usr/sbin/pdnsd".to_string(),
            systemctl: "systemctl".to_string(),
            modprobe: "modprobe".to_string(),
            ifdown: "ifdown".to_string(),
            hostname_bin: "hostname".to_string(),
        }
    }
}

impl Settings {
    /// Rebase every file path below `root`. Binaries stay untouched.
    pub fn with_root(mut self, root: &Path) -> Self {
        let rebase = |path: &Path| root.join(path.strip_prefix("/").unwrap_or(path));

        for path in [
            &mut self.temp_dir,
            &mut self.spool_dir,
            &mut self.run_dir,
            &mut self.resolv_conf,
            &mut self.resolved_conf,
            &mut self.pdnsd_conf,
            &mut self.pdnsd_pid_file,
            &mut self.interfaces_dir,
            &mut self.static_routes,
            &mut self.hostname_file,
            &mut self.hosts_file,
            &mut self.dhcp_script,
        ] {
            *path = rebase(path);
        }
        for hook in [&mut self.mtu_hook, &mut self.firewall_hook] {
            if let Some(path) = hook {
                *path = rebase(path);
            }
        }
        self
    }

    /// pid file of the background udhcpc renewing `device`.
    pub fn udhcpc_pid_file(&self, device: &str) -> PathBuf {
        self.run_dir.join(format!("udhcpc_{device}"))
    }
}

/// Write a generated config file, creating its directory first.
pub(crate) async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::io(path, e))
}
