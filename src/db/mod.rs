mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::adapter::Adapter;
use crate::error::{Error, StorageError};
use crate::models::GateSet;

pub const DEFAULT_FEATURES_TABLE: &str = "features";
pub const DEFAULT_GATES_TABLE: &str = "feature_gates";

/// Names of the tables holding features and their gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    features_table: String,
    gates_table: String,
}

impl StorageLocation {
    /// Table names are interpolated into SQL, so only plain identifiers
    /// (`[A-Za-z_][A-Za-z0-9_]*`) are accepted.
    pub fn new(
        features_table: impl Into<String>,
        gates_table: impl Into<String>,
    ) -> Result<Self, Error> {
        let features_table = features_table.into();
        let gates_table = gates_table.into();
        validate_identifier(&features_table)?;
        validate_identifier(&gates_table)?;
        if features_table == gates_table {
            return Err(Error::validation(
                "features and gates tables must have different names",
            ));
        }
        Ok(Self {
            features_table,
            gates_table,
        })
    }

    pub fn features_table(&self) -> &str {
        &self.features_table
    }

    pub fn gates_table(&self) -> &str {
        &self.gates_table
    }
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self {
            features_table: DEFAULT_FEATURES_TABLE.to_string(),
            gates_table: DEFAULT_GATES_TABLE.to_string(),
        }
    }
}

fn validate_identifier(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid table name: {:?}", name)))
    }
}

/// SQLite-backed [`Adapter`].
///
/// Each feature is one row in the features table, and each gate value one row
/// in the gates table, linked by `feature_key`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: StorageLocation,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        Self::open_with(path, StorageLocation::default())
    }

    pub fn open_with(path: PathBuf, location: StorageLocation) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        tracing::debug!("Opened database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open_with(default_path()?, StorageLocation::default())
    }

    pub fn open_memory() -> Result<Self> {
        Self::open_memory_with(StorageLocation::default())
    }

    pub fn open_memory_with(location: StorageLocation) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    /// Another handle on the same connection, storing into `location`.
    pub fn with_location(&self, location: StorageLocation) -> Self {
        Self {
            conn: self.conn.clone(),
            location,
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        schema::run_migrations(&conn, &self.location)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

/// `gatekeeper.db` in the platform data directory.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "gatekeeper")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("gatekeeper.db"))
}

impl Adapter for Database {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn features(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key FROM {} ORDER BY id",
            self.location.features_table
        ))?;

        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<GateSet>, StorageError> {
        let mut conn = self.lock()?;
        // Both reads see the same snapshot when other processes write
        let tx = conn.transaction()?;

        let exists: i32 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE key = ?",
                self.location.features_table
            ),
            [key],
            |row| row.get(0),
        )?;

        if exists == 0 {
            return Ok(None);
        }

        let rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT key, value FROM {} WHERE feature_key = ? ORDER BY id",
                self.location.gates_table
            ))?;
            let rows = stmt
                .query_map([key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.commit()?;
        Ok(Some(GateSet::from_rows(rows)))
    }

    fn write(&self, key: &str, gates: &GateSet) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            &format!(
                "INSERT INTO {} (key, created_at, updated_at) VALUES (?1, ?2, ?2)
                 ON CONFLICT(key) DO UPDATE SET updated_at = excluded.updated_at",
                self.location.features_table
            ),
            (key, &now),
        )?;

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE feature_key = ?",
                self.location.gates_table
            ),
            [key],
        )?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (feature_key, key, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                self.location.gates_table
            ))?;
            for (kind, value) in gates.to_rows() {
                stmt.execute((key, kind.as_str(), &value, &now))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE feature_key = ?",
                self.location.gates_table
            ),
            [key],
        )?;
        let rows = tx.execute(
            &format!("DELETE FROM {} WHERE key = ?", self.location.features_table),
            [key],
        )?;

        tx.commit()?;
        Ok(rows > 0)
    }
}
