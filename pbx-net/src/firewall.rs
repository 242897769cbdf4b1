//! Firewall re-application after interface changes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::exec::{CommandSpec, Executor};
use crate::model::InterfaceRecord;

/// Applies firewall rules for the current interface set.
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn apply_config(&self, interfaces: &[InterfaceRecord]) -> Result<()>;
}

/// Runs an external rules script.
///
/// The script receives the uplink device first, followed by every other
/// enabled device. No script configured means nothing to do.
pub struct HookFirewall {
    exec: Arc<dyn Executor>,
    hook: Option<PathBuf>,
}

impl HookFirewall {
    pub fn new(exec: Arc<dyn Executor>, hook: Option<PathBuf>) -> Self {
        Self { exec, hook }
    }
}

/// Hook arguments: enabled devices, uplink first.
pub fn hook_args(interfaces: &[InterfaceRecord]) -> Vec<String> {
    let enabled = interfaces.iter().filter(|r| !r.disabled);
    let (uplink, rest): (Vec<_>, Vec<_>) = enabled.partition(|r| r.internet);
    uplink
        .into_iter()
        .chain(rest)
        .map(InterfaceRecord::device_name)
        .collect()
}

#[async_trait]
impl Firewall for HookFirewall {
    async fn apply_config(&self, interfaces: &[InterfaceRecord]) -> Result<()> {
        let Some(hook) = &self.hook else {
            debug!("No firewall hook configured");
            return Ok(());
        };
        if !hook.is_file() {
            debug!(hook = %hook.display(), "Firewall hook not present");
            return Ok(());
        }

        let args = hook_args(interfaces);
        let cmd = CommandSpec::new(hook.to_string_lossy()).args(args.iter().cloned());
        let output = self.exec.run(&cmd).await?;

        if !output.success {
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        info!(devices = ?args, "Firewall rules applied");
        Ok(())
    }
}
