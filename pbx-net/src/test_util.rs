//! Test doubles for driving the engine without touching the host.
//!
//! [`TestBed`] wires a [`NetworkEngine`] to an in-memory store, a
//! recording executor, a fixed device list and a recording firewall, with
//! every configuration path rebased into a temporary directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{OsMode, Settings};
use crate::discovery::Discovery;
use crate::engine::NetworkEngine;
use crate::error::Result;
use crate::exec::{CommandOutput, CommandSpec, Executor};
use crate::firewall::Firewall;
use crate::integration;
use crate::model::InterfaceRecord;
use crate::store::SqliteStore;

/// Executor that records commands instead of running them.
///
/// Commands succeed with empty output unless a response was scripted for
/// a prefix of their command line. Scripted responses are consumed in
/// order; the last one repeats.
#[derive(Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<(String, Vec<CommandOutput>)>>,
    pids: Mutex<HashMap<String, Vec<u32>>>,
    killed: Mutex<Vec<u32>>,
    binaries: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output of commands whose line starts with `prefix`.
    pub fn respond(&self, prefix: &str, outputs: Vec<CommandOutput>) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), outputs));
    }

    pub fn set_pids(&self, pattern: &str, pids: Vec<u32>) {
        self.pids.lock().unwrap().insert(pattern.to_string(), pids);
    }

    pub fn add_binary(&self, program: &str) {
        self.binaries.lock().unwrap().push(program.to_string());
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    /// Every recorded command as a display line.
    pub fn lines(&self) -> Vec<String> {
        self.commands().iter().map(ToString::to_string).collect()
    }

    /// Recorded lines starting with `prefix`.
    pub fn lines_starting_with(&self, prefix: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
        self.killed.lock().unwrap().clear();
    }

    fn output_for(&self, line: &str) -> CommandOutput {
        let mut responses = self.responses.lock().unwrap();
        for (prefix, outputs) in responses.iter_mut() {
            if line.starts_with(prefix.as_str()) && !outputs.is_empty() {
                return if outputs.len() > 1 {
                    outputs.remove(0)
                } else {
                    outputs[0].clone()
                };
            }
        }
        CommandOutput::ok("")
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(cmd.clone());
        Ok(self.output_for(&cmd.to_string()))
    }

    async fn spawn_detached(&self, cmd: &CommandSpec) -> Result<()> {
        self.commands.lock().unwrap().push(cmd.clone().detached());
        Ok(())
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        self.binaries
            .lock()
            .unwrap()
            .iter()
            .any(|b| b == program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }

    fn pid_of(&self, pattern: &str) -> Vec<u32> {
        self.pids
            .lock()
            .unwrap()
            .get(pattern)
            .cloned()
            .unwrap_or_default()
    }

    fn kill(&self, pid: u32) -> Result<()> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}

/// Discovery returning a settable device list.
#[derive(Default)]
pub struct StaticDiscovery {
    devices: Mutex<Vec<String>>,
}

impl StaticDiscovery {
    pub fn new(devices: &[&str]) -> Self {
        let discovery = Self::default();
        discovery.set(devices);
        discovery
    }

    pub fn set(&self, devices: &[&str]) {
        let mut sorted: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
        sorted.sort();
        *self.devices.lock().unwrap() = sorted;
    }
}

impl Discovery for StaticDiscovery {
    fn physical_interfaces(&self) -> Vec<String> {
        self.devices.lock().unwrap().clone()
    }
}

/// Firewall that remembers what it was asked to apply.
#[derive(Default)]
pub struct RecordingFirewall {
    calls: AtomicUsize,
    last: Mutex<Vec<InterfaceRecord>>,
}

impl RecordingFirewall {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Vec<InterfaceRecord> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Firewall for RecordingFirewall {
    async fn apply_config(&self, interfaces: &[InterfaceRecord]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = interfaces.to_vec();
        Ok(())
    }
}

/// An engine wired to test doubles.
pub struct TestBed {
    pub root: tempfile::TempDir,
    pub settings: Arc<Settings>,
    pub store: Arc<SqliteStore>,
    pub exec: Arc<RecordingExecutor>,
    pub discovery: Arc<StaticDiscovery>,
    pub firewall: Arc<RecordingFirewall>,
    pub engine: NetworkEngine,
}

impl TestBed {
    pub fn new(mode: OsMode, devices: &[&str]) -> Self {
        Self::with_settings(mode, devices, |settings| settings)
    }

    /// Like [`TestBed::new`], with a chance to adjust settings after they
    /// were rebased into the temporary root.
    pub fn with_settings(
        mode: OsMode,
        devices: &[&str],
        adjust: impl FnOnce(Settings) -> Settings,
    ) -> Self {
        let root = tempfile::tempdir().expect("temp dir");
        let settings = Arc::new(adjust(Settings::default().with_root(root.path())));
        let store = Arc::new(SqliteStore::in_memory().expect("in-memory store"));
        let exec = Arc::new(RecordingExecutor::new());
        let discovery = Arc::new(StaticDiscovery::new(devices));
        let firewall = Arc::new(RecordingFirewall::default());

        let integration = integration::for_mode(mode, exec.clone(), settings.clone());
        let engine = NetworkEngine::new(
            store.clone(),
            exec.clone(),
            discovery.clone(),
            firewall.clone(),
            integration,
            settings.clone(),
        );

        Self {
            root,
            settings,
            store,
            exec,
            discovery,
            firewall,
            engine,
        }
    }

    pub fn read(&self, path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }
}
