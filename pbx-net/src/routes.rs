//! Manually maintained static routes.
//!
//! The file holds plain `route ...` command lines; anything after `;` on a
//! line is a comment. Lines that do not start with `rout` are ignored.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::exec::CommandSpec;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRoutes {
    lines: Vec<String>,
}

impl StaticRoutes {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("rout"))
            .filter_map(|line| line.split(';').next())
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect();
        Self { lines }
    }

    /// Read the routes file, creating it empty when it does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Creating empty static routes file");
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::io(parent, e))?;
                }
                tokio::fs::write(path, "")
                    .await
                    .map_err(|e| Error::io(path, e))?;
                Ok(Self::default())
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Like [`load`](Self::load), but an unreadable file counts as empty.
    pub async fn load_or_empty(path: &Path) -> Self {
        Self::load(path).await.unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring static routes");
            Self::default()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.lines
            .iter()
            .filter_map(|line| CommandSpec::from_line(line))
            .collect()
    }

    /// Commands that name `device` as one of their words.
    pub fn commands_for(&self, device: &str) -> Vec<CommandSpec> {
        self.lines
            .iter()
            .filter(|line| line.split_whitespace().any(|word| word == device))
            .filter_map(|line| CommandSpec::from_line(line))
            .collect()
    }

    /// ifupdown hook lines for routes bound with `dev <device>`.
    ///
    /// Each route yields a `post-up` line and a `pre-down` line with the
    /// `add` verb turned into `del`. The trailing `dev <device>` is dropped
    /// because ifupdown runs the hook for that device already.
    pub fn ifupdown_hooks(&self, device: &str) -> (Vec<String>, Vec<String>) {
        let mut post_up = Vec::new();
        let mut pre_down = Vec::new();

        for line in &self.lines {
            let words: Vec<&str> = line.split_whitespace().collect();
            let Some((head, tail)) = words.split_at_checked(words.len().saturating_sub(2)) else {
                continue;
            };
            if tail != ["dev", device] || head.is_empty() {
                continue;
            }

            post_up.push(format!("post-up {}", head.join(" ")));

            let mut removal: Vec<&str> = head.to_vec();
            if let Some(verb) = removal.iter_mut().find(|word| **word == "add") {
                *verb = "del";
            }
            pre_down.push(format!("pre-down {}", removal.join(" ")));
        }

        (post_up, pre_down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTES: &str = "\
# managed by hand
route add -net 10.10.0.0 netmask 255.255.0.0 gw 192.168.1.254 dev eth0 ; office
route add -host 172.16.5.5 gw 192.168.2.1 dev eth10
  routes are not commands
ip route add 1.2.3.0/24 via 192.168.1.1
route add -net 10.20.0.0/16 gw 192.168.1.254
";

    #[test]
    fn test_parse_keeps_route_lines_only() {
        let routes = StaticRoutes::parse(ROUTES);
        let commands = routes.commands();

        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands[0].to_string(),
            "route add -net 10.10.0.0 netmask 255.255.0.0 gw 192.168.1.254 dev eth0"
        );
        // "routes are not commands" starts with "rout" and is kept verbatim.
        assert_eq!(commands[2].program(), "routes");
        assert!(commands.iter().all(|c| c.program() != "ip"));
    }

    #[test]
    fn test_commands_for_device_matches_whole_words() {
        let routes = StaticRoutes::parse(ROUTES);

        let eth0: Vec<String> = routes
            .commands_for("eth0")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            eth0,
            vec!["route add -net 10.10.0.0 netmask 255.255.0.0 gw 192.168.1.254 dev eth0"]
        );
        assert_eq!(routes.commands_for("eth1").len(), 0);
        assert_eq!(routes.commands_for("eth10").len(), 1);
    }

    #[test]
    fn test_ifupdown_hooks() {
        let routes = StaticRoutes::parse(ROUTES);
        let (up, down) = routes.ifupdown_hooks("eth0");

        assert_eq!(
            up,
            vec!["post-up route add -net 10.10.0.0 netmask 255.255.0.0 gw 192.168.1.254"]
        );
        assert_eq!(
            down,
            vec!["pre-down route del -net 10.10.0.0 netmask 255.255.0.0 gw 192.168.1.254"]
        );

        let (up, down) = routes.ifupdown_hooks("eth1");
        assert!(up.is_empty() && down.is_empty());
    }

    #[tokio::test]
    async fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/static-routes");

        let routes = StaticRoutes::load(&path).await.unwrap();
        assert!(routes.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        std::fs::write(&path, "route add default gw 10.0.0.1 dev eth0\n").unwrap();
        let routes = StaticRoutes::load(&path).await.unwrap();
        assert_eq!(routes.commands().len(), 1);
    }
}
