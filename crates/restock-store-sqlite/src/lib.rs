use std::path::Path;

use anyhow::{anyhow, Context, Result};
use restock_core::{MemoryEntry, MemorySnapshot};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS match_memory (
  pos_name_normalized TEXT PRIMARY KEY CHECK (length(pos_name_normalized) > 0),
  production_name_normalized TEXT NOT NULL CHECK (length(production_name_normalized) > 0),
  confirmed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_match_memory_confirmed_at ON match_memory(confirmed_at);
";

/// SQLite-backed Match Memory: one row per normalized POS name, holding the
/// confirmed production counterpart and when it was last confirmed.
pub struct MatchMemoryStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl MatchMemoryStore {
    /// Open a SQLite-backed match memory and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to create match_memory table")?;
        let now = now_rfc3339()?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now],
        )
        .context("failed to record migration version 1")?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(())
    }

    /// Look up the confirmed production counterpart for one normalized POS name.
    ///
    /// # Errors
    /// Returns an error when the point query fails.
    pub fn lookup(&self, pos_name_normalized: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT production_name_normalized FROM match_memory WHERE pos_name_normalized = ?1",
        )?;
        let value = stmt
            .query_row(params![pos_name_normalized], |row| row.get::<_, String>(0))
            .optional()
            .context("failed to query match memory")?;
        Ok(value)
    }

    /// Upsert one confirmed pairing; the last confirmation for a POS key wins.
    ///
    /// # Errors
    /// Returns an error when either key is blank or the upsert fails — a lost
    /// confirmation must never be silent.
    pub fn confirm(
        &mut self,
        pos_name_normalized: &str,
        production_name_normalized: &str,
    ) -> Result<MemoryEntry> {
        if pos_name_normalized.trim().is_empty() {
            return Err(anyhow!("pos_name_normalized MUST be non-empty"));
        }
        if production_name_normalized.trim().is_empty() {
            return Err(anyhow!("production_name_normalized MUST be non-empty"));
        }

        let confirmed_at = OffsetDateTime::now_utc();
        self.conn
            .execute(
                "INSERT INTO match_memory(pos_name_normalized, production_name_normalized, confirmed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(pos_name_normalized) DO UPDATE SET
                   production_name_normalized = excluded.production_name_normalized,
                   confirmed_at = excluded.confirmed_at",
                params![pos_name_normalized, production_name_normalized, rfc3339(confirmed_at)?],
            )
            .context("failed to upsert match memory entry")?;

        Ok(MemoryEntry {
            pos_name_normalized: pos_name_normalized.to_string(),
            production_name_normalized: production_name_normalized.to_string(),
            confirmed_at,
        })
    }

    /// Delete one confirmed pairing; returns whether a row existed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn forget(&mut self, pos_name_normalized: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM match_memory WHERE pos_name_normalized = ?1",
                params![pos_name_normalized],
            )
            .context("failed to delete match memory entry")?;
        Ok(deleted > 0)
    }

    /// Load the full confirmed-match map for one reconciliation run.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn snapshot(&self) -> Result<MemorySnapshot> {
        let mut stmt = self.conn.prepare(
            "SELECT pos_name_normalized, production_name_normalized FROM match_memory
             ORDER BY pos_name_normalized ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(MemorySnapshot::from_entries(entries))
    }

    /// List all persisted confirmations with their timestamps.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_entries(&self) -> Result<Vec<MemoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT pos_name_normalized, production_name_normalized, confirmed_at
             FROM match_memory
             ORDER BY pos_name_normalized ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let confirmed_at_raw: String = row.get(2)?;
            entries.push(MemoryEntry {
                pos_name_normalized: row.get(0)?,
                production_name_normalized: row.get(1)?,
                confirmed_at: parse_rfc3339(&confirmed_at_raw)?,
            });
        }

        Ok(entries)
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")?;
    Ok(version.unwrap_or(0))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format timestamp as RFC 3339")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("failed to parse RFC 3339 timestamp: {value}"))
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
            .as_nanos();
        std::env::temp_dir().join(format!("restock-store-{}-{now}.sqlite3", std::process::id()))
    }

    fn open_migrated(path: &Path) -> MatchMemoryStore {
        let mut store = match MatchMemoryStore::open(path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("store should migrate: {err}");
        }
        store
    }

    // Test IDs: TMEM-001
    #[test]
    fn confirm_then_lookup_round_trips() -> Result<()> {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        store.confirm("og kush prerol", "og kush preroll")?;
        let target = store.lookup("og kush prerol")?;
        assert_eq!(target.as_deref(), Some("og kush preroll"));
        assert_eq!(store.lookup("unknown key")?, None);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TMEM-002
    #[test]
    fn reconfirm_overwrites_with_last_write_wins() -> Result<()> {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        store.confirm("bd special", "blue dream")?;
        store.confirm("bd special", "boysenberry dream")?;

        assert_eq!(store.lookup("bd special")?.as_deref(), Some("boysenberry dream"));
        assert_eq!(store.list_entries()?.len(), 1);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TMEM-003
    #[test]
    fn forget_removes_entry_and_reports_presence() -> Result<()> {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        store.confirm("bd special", "blue dream")?;
        assert!(store.forget("bd special")?);
        assert!(!store.forget("bd special")?);
        assert_eq!(store.lookup("bd special")?, None);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TMEM-004
    #[test]
    fn snapshot_mirrors_persisted_entries() -> Result<()> {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        store.confirm("bd special", "blue dream")?;
        store.confirm("og prerol", "og kush preroll")?;

        let snapshot = store.snapshot()?;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.lookup("bd special"), Some("blue dream"));
        assert_eq!(snapshot.lookup("og prerol"), Some("og kush preroll"));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TMEM-005
    #[test]
    fn migrate_is_idempotent_and_reports_schema_status() -> Result<()> {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert_eq!(status.target_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TMEM-006
    #[test]
    fn confirm_rejects_blank_keys() {
        let db_path = unique_temp_db_path();
        let mut store = open_migrated(&db_path);

        let err = match store.confirm("  ", "blue dream") {
            Ok(_) => panic!("expected blank POS key to be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("pos_name_normalized MUST be non-empty"));

        let _ = std::fs::remove_file(&db_path);
    }
}
