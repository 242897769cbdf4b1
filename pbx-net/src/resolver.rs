//! Resolver configuration rendering.
//!
//! Local clients always resolve through the pdnsd cache on 127.0.0.1;
//! pdnsd forwards to the upstream servers learned from the uplink.

use std::path::{Path, PathBuf};

use tracing::warn;

pub const LOOPBACK_RESOLVER: &str = "127.0.0.1";

/// Used when no upstream nameserver is known.
pub const FALLBACK_NAMESERVER: &str = "8.8.8.8";

/// Upstream servers for pdnsd: blanks, loopback and duplicates removed,
/// falling back to [`FALLBACK_NAMESERVER`] when nothing is left.
pub fn upstream_nameservers(candidates: &[String]) -> Vec<String> {
    let mut servers: Vec<String> = Vec::new();
    for candidate in candidates {
        let candidate = candidate.trim();
        if candidate.is_empty() || candidate == LOOPBACK_RESOLVER {
            continue;
        }
        if !servers.iter().any(|s| s == candidate) {
            servers.push(candidate.to_string());
        }
    }

    if servers.is_empty() {
        servers.push(FALLBACK_NAMESERVER.to_string());
    }
    servers
}

pub fn render_pdnsd_conf(cache_dir: &Path, pid_file: &Path, nameservers: &[String]) -> String {
    format!(
        "global {{\n\
         \tperm_cache=10240;\n\
         \tcache_dir=\"{cache}\";\n\
         \tpid_file = {pid};\n\
         \tserver_ip = {LOOPBACK_RESOLVER};\n\
         \tstatus_ctl = on;\n\
         \tquery_method=udp_tcp;\n\
         \tmin_ttl=15m;\n\
         \tmax_ttl=1w;\n\
         \ttimeout=10;\n\
         \tneg_domain_pol=on;\n\
         \trun_as=root;\n\
         \tdaemon=on;\n\
         }}\n\
         server {{\n\
         \tlabel = \"main\";\n\
         \tip = {servers};\n\
         \tinterface=lo;\n\
         \tuptest=if;\n\
         \tinterval=10m;\n\
         \tpurge_cache=off;\n\
         }}\n",
        cache = cache_dir.display(),
        pid = pid_file.display(),
        servers = nameservers.join(", "),
    )
}

/// `/etc/resolv.conf` for the legacy mode: the local cache first, then
/// the upstream servers.
pub fn render_resolv_conf(domain: &str, nameservers: &[String]) -> String {
    let mut out = String::new();
    if !domain.is_empty() {
        out.push_str(&format!("domain {domain}\n"));
    }
    out.push_str(&format!("nameserver {LOOPBACK_RESOLVER}\n"));
    for server in nameservers.iter().filter(|s| *s != LOOPBACK_RESOLVER) {
        out.push_str(&format!("nameserver {server}\n"));
    }
    out
}

/// `resolved.conf` pointing systemd-resolved at the local cache.
pub fn render_resolved_conf(domain: &str) -> String {
    let mut out = format!("[Resolve]\nDNS={LOOPBACK_RESOLVER}\n");
    if !domain.is_empty() {
        out.push_str(&format!("Domains={domain}\n"));
    }
    out
}

/// Create the pdnsd cache directory below `temp_dir`, or fall back to
/// `spool_dir` when that fails.
pub async fn prepare_cache_dir(temp_dir: &Path, spool_dir: &Path) -> PathBuf {
    let cache_dir = temp_dir.join("pdnsd").join("cache");
    match tokio::fs::create_dir_all(&cache_dir).await {
        Ok(()) => cache_dir,
        Err(e) => {
            warn!(
                dir = %cache_dir.display(),
                error = %e,
                "Cannot create pdnsd cache dir, using spool"
            );
            spool_dir.to_path_buf()
        }
    }
}

/// Nameservers listed in a resolv.conf.
pub fn parse_nameservers(resolv_conf: &str) -> Vec<String> {
    resolv_conf
        .lines()
        .filter_map(|line| line.trim().strip_prefix("nameserver"))
        .map(str::trim)
        .filter(|server| !server.is_empty())
        .map(str::to_string)
        .collect()
}
