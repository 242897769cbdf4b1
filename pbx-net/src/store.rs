//! SQLite storage for LAN interface records.

use chrono::{DateTime, Utc};
use refinery::embed_migrations;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::model::{AddressingMode, InterfaceRecord, NewInterface};

embed_migrations!("migrations");

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    #[error("Invalid value in column {column}: {value:?}")]
    InvalidValue { column: &'static str, value: String },

    #[error("Interface record not found: {0}")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistence of interface records.
///
/// Listing is always ordered by `(interface, vlan_id)`; the reconciliation
/// pass relies on that order to pick the uplink deterministically.
pub trait InterfaceStore: Send + Sync {
    fn list(&self) -> Result<Vec<InterfaceRecord>>;

    fn get(&self, id: i64) -> Result<Option<InterfaceRecord>>;

    /// The non-VLAN record bound to a physical device.
    fn get_by_interface(&self, interface: &str) -> Result<Option<InterfaceRecord>>;

    fn insert(&self, new: &NewInterface) -> Result<InterfaceRecord>;

    /// Persist every mutable field of `record` and bump `updated_at`.
    fn update(&self, record: &InterfaceRecord) -> Result<()>;

    /// First record carrying the uplink flag.
    fn uplink(&self) -> Result<Option<InterfaceRecord>> {
        Ok(self.list()?.into_iter().find(|r| r.internet))
    }

    fn enabled(&self) -> Result<Vec<InterfaceRecord>> {
        Ok(self.list()?.into_iter().filter(|r| !r.disabled).collect())
    }
}

const COLUMNS: &str = "id, name, interface, vlan_id, addressing, ip_address, subnet, gateway, \
     primary_dns, secondary_dns, internet, disabled, device_missing, hostname, domain, topology, \
     created_at, updated_at";

/// Interface store backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        // Run migrations
        migrations::runner().run(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;

        migrations::runner().run(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_to_record(row: &Row) -> Result<InterfaceRecord> {
        let addressing: String = row.get(4)?;
        let created_at: String = row.get(16)?;
        let updated_at: String = row.get(17)?;

        Ok(InterfaceRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            interface: row.get(2)?,
            vlan_id: row.get(3)?,
            addressing: AddressingMode::parse(&addressing).ok_or_else(|| {
                StorageError::InvalidValue {
                    column: "addressing",
                    value: addressing.clone(),
                }
            })?,
            ip_address: row.get(5)?,
            subnet: row.get(6)?,
            gateway: row.get(7)?,
            primary_dns: row.get(8)?,
            secondary_dns: row.get(9)?,
            internet: row.get(10)?,
            disabled: row.get(11)?,
            device_missing: row.get(12)?,
            hostname: row.get(13)?,
            domain: row.get(14)?,
            topology: row.get(15)?,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        })
    }
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidValue {
            column,
            value: value.to_string(),
        })
}

impl InterfaceStore for SqliteStore {
    fn list(&self) -> Result<Vec<InterfaceRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM lan_interfaces ORDER BY interface, vlan_id, id"
        ))?;

        let records = stmt
            .query_map([], |row| Ok(Self::row_to_record(row)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(records)
    }

    fn get(&self, id: i64) -> Result<Option<InterfaceRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM lan_interfaces WHERE id = ?1"),
            params![id],
            |row| Ok(Self::row_to_record(row)),
        )
        .optional()?
        .transpose()
    }

    fn get_by_interface(&self, interface: &str) -> Result<Option<InterfaceRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM lan_interfaces WHERE interface = ?1 AND vlan_id = 0
                 ORDER BY id LIMIT 1"
            ),
            params![interface],
            |row| Ok(Self::row_to_record(row)),
        )
        .optional()?
        .transpose()
    }

    fn insert(&self, new: &NewInterface) -> Result<InterfaceRecord> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO lan_interfaces (name, interface, vlan_id, addressing, internet, disabled,
                                         hostname, topology, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                new.name,
                new.interface,
                new.vlan_id,
                new.addressing.as_str(),
                new.internet,
                new.disabled,
                new.hostname,
                new.topology,
                now.to_rfc3339(),
            ],
        )?;

        Ok(InterfaceRecord {
            id: conn.last_insert_rowid(),
            name: new.name.clone(),
            interface: new.interface.clone(),
            vlan_id: new.vlan_id,
            addressing: new.addressing,
            ip_address: String::new(),
            subnet: String::new(),
            gateway: String::new(),
            primary_dns: String::new(),
            secondary_dns: String::new(),
            internet: new.internet,
            disabled: new.disabled,
            device_missing: false,
            hostname: new.hostname.clone(),
            domain: String::new(),
            topology: new.topology.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&self, record: &InterfaceRecord) -> Result<()> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE lan_interfaces SET
                name = ?2, interface = ?3, vlan_id = ?4, addressing = ?5, ip_address = ?6,
                subnet = ?7, gateway = ?8, primary_dns = ?9, secondary_dns = ?10, internet = ?11,
                disabled = ?12, device_missing = ?13, hostname = ?14, domain = ?15, topology = ?16,
                updated_at = ?17
             WHERE id = ?1",
            params![
                record.id,
                record.name,
                record.interface,
                record.vlan_id,
                record.addressing.as_str(),
                record.ip_address,
                record.subnet,
                record.gateway,
                record.primary_dns,
                record.secondary_dns,
                record.internet,
                record.disabled,
                record.device_missing,
                record.hostname,
                record.domain,
                record.topology,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if rows == 0 {
            return Err(StorageError::NotFound(record.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_list_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert(&NewInterface::discovered("eth1")).unwrap();
        store
            .insert(&NewInterface::discovered("eth0").vlan(20))
            .unwrap();
        store
            .insert(&NewInterface::discovered("eth0").uplink(true))
            .unwrap();

        let records = store.list().unwrap();
        let keys: Vec<_> = records
            .iter()
            .map(|r| (r.interface.as_str(), r.vlan_id))
            .collect();
        assert_eq!(keys, vec![("eth0", 0), ("eth0", 20), ("eth1", 0)]);
        assert!(records[0].internet);
        assert_eq!(records[1].addressing, AddressingMode::Static);
    }

    #[test]
    fn test_get_by_interface_ignores_vlans() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert(&NewInterface::discovered("eth0").vlan(5))
            .unwrap();
        assert!(store.get_by_interface("eth0").unwrap().is_none());

        let plain = store.insert(&NewInterface::discovered("eth0")).unwrap();
        let found = store.get_by_interface("eth0").unwrap().unwrap();
        assert_eq!(found.id, plain.id);
        assert_eq!(found.vlan_id, 0);
    }

    #[test]
    fn test_update_persists_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let mut record = store.insert(&NewInterface::discovered("eth0")).unwrap();

        record.addressing = AddressingMode::Static;
        record.ip_address = "10.0.0.2".to_string();
        record.subnet = "24".to_string();
        record.disabled = true;
        record.device_missing = true;
        record.domain = "example.org".to_string();
        store.update(&record).unwrap();

        let loaded = store.get(record.id).unwrap().unwrap();
        assert_eq!(loaded.addressing, AddressingMode::Static);
        assert_eq!(loaded.ip_address, "10.0.0.2");
        assert_eq!(loaded.subnet, "24");
        assert!(loaded.disabled);
        assert!(loaded.device_missing);
        assert_eq!(loaded.domain, "example.org");
        assert!(loaded.updated_at >= record.created_at);
    }

    #[test]
    fn test_update_missing_record() {
        let store = SqliteStore::in_memory().unwrap();
        let mut record = store.insert(&NewInterface::discovered("eth0")).unwrap();
        record.id = 42;

        assert!(matches!(
            store.update(&record),
            Err(StorageError::NotFound(42))
        ));
    }

    #[test]
    fn test_uplink_and_enabled() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert(&NewInterface::discovered("eth0")).unwrap();
        store
            .insert(&NewInterface::discovered("eth1").uplink(true))
            .unwrap();
        store
            .insert(&NewInterface::discovered("eth2").disabled(true))
            .unwrap();

        assert_eq!(store.uplink().unwrap().unwrap().interface, "eth1");
        assert_eq!(store.enabled().unwrap().len(), 2);
    }

    #[test]
    fn test_persistent_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert(&NewInterface::discovered("eth0")).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
