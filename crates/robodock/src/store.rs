//! Client-side persistence
//!
//! A small rusqlite key/value store for state that has to survive a
//! restart: paired robot connections, access point credentials and saved
//! networks. Values are JSON. Schema changes go through numbered
//! migrations tracked in `schema_versions`.
//!
//! SQLite calls are blocking. Async callers go through `spawn_blocking`.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use robodock_protocol::PairedConnection;

pub const PAIRED_CONNECTIONS_KEY: &str = "paired_robot_connections";
pub const ACCESS_POINT_KEY: &str = "access_point_credentials";
pub const SAVED_NETWORKS_KEY: &str = "saved_networks";

/// Paired connections keyed by nickname
pub type PairedConnections = BTreeMap<String, PairedConnection>;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "client_store",
        "CREATE TABLE IF NOT EXISTS client_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    ),
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value for {key} is not valid: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Credentials for the robot's own Wi-Fi access point
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointCredentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for AccessPointCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPointCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct ClientStore {
    conn: Mutex<Connection>,
}

impl ClientStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        run_migrations(&mut conn)?;
        debug!(
            component = "store",
            event = "store.opened",
            path = %path.display(),
            "Client store opened"
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .lock()
            .query_row(
                "SELECT value FROM client_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.lock().execute(
            "INSERT INTO client_store (key, value, updated_at)
             VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw],
        )?;
        Ok(())
    }

    /// Returns true if the key existed
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .lock()
            .execute("DELETE FROM client_store WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    pub fn access_point(&self) -> Result<Option<AccessPointCredentials>, StoreError> {
        self.get(ACCESS_POINT_KEY)
    }

    pub fn set_access_point(&self, credentials: &AccessPointCredentials) -> Result<(), StoreError> {
        self.put(ACCESS_POINT_KEY, credentials)
    }

    pub fn saved_networks(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.get(SAVED_NETWORKS_KEY)?.unwrap_or_default())
    }

    /// Append an SSID to the saved list; no-op if it's already there
    pub fn remember_network(&self, ssid: &str) -> Result<(), StoreError> {
        let mut networks = self.saved_networks()?;
        if networks.iter().any(|n| n == ssid) {
            return Ok(());
        }
        networks.push(ssid.to_string());
        self.put(SAVED_NETWORKS_KEY, &networks)
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )?;

    let applied: HashSet<i64> = conn
        .prepare("SELECT version FROM schema_versions")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for (version, name, sql) in MIGRATIONS {
        if applied.contains(version) {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
        info!(
            component = "migrations",
            event = "migration.applied",
            version = version,
            name = %name,
            "Applied migration"
        );
    }
    Ok(())
}
