//! pbx-net - LAN interface reconciliation for the PBX appliance.
//!
//! Keeps the persisted LAN interface records in line with the devices the
//! kernel exposes, configures them through busybox/udhcpc or ifupdown,
//! and maintains the resolver and hostname files. The DHCP client scripts
//! call back into the same engine.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod exec;
pub mod firewall;
pub mod hosts;
pub mod integration;
pub mod lease;
pub mod model;
pub mod resolver;
pub mod routes;
pub mod status;
pub mod store;
pub mod subnet;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use config::{ModeSelection, OsMode, Settings};
pub use engine::{NetworkEngine, ReconcileReport};
pub use error::{Error, Result};
