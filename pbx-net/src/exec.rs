//! Structured command execution.
//!
//! Commands are a program plus an argument vector. Nothing is ever handed
//! to a shell, so record values cannot inject extra commands.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A command to run: program, arguments and whether to detach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    detached: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            detached: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Start the command in the background and do not wait for it.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Split a command line on whitespace. Quoting is not supported.
    pub fn from_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// Process-level access to the host.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion and capture output.
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Start in the background; the child is never awaited.
    async fn spawn_detached(&self, cmd: &CommandSpec) -> Result<()>;

    /// Resolve a program name against `PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Pids of processes whose command line contains `pattern`.
    fn pid_of(&self, pattern: &str) -> Vec<u32>;

    fn kill(&self, pid: u32) -> Result<()>;
}

/// Run `commands` in order. A failing command is logged and the batch
/// continues. Returns the number of failures.
pub async fn run_batch(exec: &dyn Executor, commands: &[CommandSpec]) -> usize {
    let mut failures = 0;
    for cmd in commands {
        let result = if cmd.is_detached() {
            exec.spawn_detached(cmd).await
        } else {
            match exec.run(cmd).await {
                Ok(output) if output.success => Ok(()),
                Ok(output) => Err(Error::CommandFailed {
                    command: cmd.to_string(),
                    stderr: output.stderr.trim().to_string(),
                }),
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            warn!(command = %cmd, error = %e, "Command failed");
            failures += 1;
        }
    }
    failures
}

/// Executor for the real host: tokio processes, `/proc` and signals.
#[derive(Debug, Default, Clone)]
pub struct SystemExecutor {
    proc_dir: Option<PathBuf>,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn proc_dir(&self) -> &Path {
        self.proc_dir.as_deref().unwrap_or(Path::new("/proc"))
    }
}

#[async_trait]
impl Executor for SystemExecutor {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %cmd, "Running command");

        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, cmd: &CommandSpec) -> Result<()> {
        debug!(command = %cmd, "Spawning detached command");

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        debug!(command = %cmd, pid = ?child.id(), "Detached command started");
        Ok(())
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return path.is_file().then_some(path);
        }

        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    fn pid_of(&self, pattern: &str) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir(self.proc_dir()) else {
            return Vec::new();
        };
        let own_pid = std::process::id();

        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| *pid != own_pid)
            .filter(|pid| {
                std::fs::read(self.proc_dir().join(pid.to_string()).join("cmdline"))
                    .map(|raw| cmdline_matches(&raw, pattern))
                    .unwrap_or(false)
            })
            .collect();
        pids.sort_unstable();
        pids
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let pid = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
        match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `/proc/<pid>/cmdline` holds NUL-separated arguments.
fn cmdline_matches(raw: &[u8], pattern: &str) -> bool {
    if raw.is_empty() || pattern.is_empty() {
        return false;
    }
    let cmdline = String::from_utf8_lossy(raw).replace('\0', " ");
    cmdline.contains(pattern)
}
