//! SQLite database for snapshot persistence

use crate::store::SnapshotStore;
use crate::types::{ExcludeZone, Lineage, NewSnapshot, Snapshot};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use snapdiff_compare::{DiffMask, Rectangle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const SNAPSHOT_COLUMNS: &str = "id, test_case_name, step_id, environment_id, version_id, browser, \
     display_name, image_path, width, height, reference_id, diff_mask, too_many_diffs, computed, \
     computing_error, diff_tolerance, created_at";

const LINEAGE_FILTER: &str = "test_case_name = ?1 AND step_id = ?2 AND environment_id = ?3 \
     AND version_id = ?4 AND browser = ?5 AND display_name = ?6";

/// Database wrapper for snapshot persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // WAL lets readers proceed while the worker writes results
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Snapshots table. reference_id is a weak pointer, not a foreign key.
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_case_name TEXT NOT NULL,
                step_id INTEGER NOT NULL,
                environment_id INTEGER NOT NULL,
                version_id INTEGER NOT NULL,
                browser TEXT NOT NULL,
                display_name TEXT NOT NULL,
                image_path TEXT,
                width INTEGER NOT NULL DEFAULT 0,
                height INTEGER NOT NULL DEFAULT 0,
                reference_id INTEGER,
                diff_mask TEXT,
                too_many_diffs INTEGER NOT NULL DEFAULT 0,
                computed INTEGER NOT NULL DEFAULT 0,
                computing_error TEXT NOT NULL DEFAULT '',
                diff_tolerance REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_lineage
                ON snapshots(test_case_name, step_id, environment_id, version_id, browser, display_name);
            CREATE INDEX IF NOT EXISTS idx_snapshots_reference ON snapshots(reference_id);
            CREATE INDEX IF NOT EXISTS idx_snapshots_computed ON snapshots(computed);

            -- Exclusion zones, owned by exactly one snapshot
            CREATE TABLE IF NOT EXISTS exclude_zones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exclude_zones_snapshot ON exclude_zones(snapshot_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Query helpers
    // ========================================================================

    fn query_snapshots<P: Params>(&self, filter: &str, params: P) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM snapshots WHERE {}",
            SNAPSHOT_COLUMNS, filter
        ))?;

        let rows = stmt
            .query_map(params, RawSnapshot::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawSnapshot::parse).collect()
    }

    fn query_snapshot<P: Params>(&self, filter: &str, params: P) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM snapshots WHERE {}", SNAPSHOT_COLUMNS, filter),
                params,
                RawSnapshot::from_row,
            )
            .optional()?;

        raw.map(RawSnapshot::parse).transpose()
    }
}

impl SnapshotStore for Database {
    fn insert(&self, snapshot: &NewSnapshot) -> Result<Snapshot> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let lineage = &snapshot.lineage;

        conn.execute(
            "INSERT INTO snapshots (test_case_name, step_id, environment_id, version_id, browser,
                 display_name, image_path, width, height, reference_id, computed, diff_tolerance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                lineage.test_case_name,
                lineage.step_id,
                lineage.environment_id,
                lineage.version_id,
                lineage.browser,
                lineage.display_name,
                path_to_column(snapshot.image_path.as_deref()),
                snapshot.width,
                snapshot.height,
                snapshot.reference_id,
                snapshot.computed,
                snapshot.diff_tolerance_percent,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Inserted snapshot {} ({})", id, lineage);
        Ok(Snapshot {
            id,
            lineage: lineage.clone(),
            image_path: snapshot.image_path.clone(),
            width: snapshot.width,
            height: snapshot.height,
            reference_id: snapshot.reference_id,
            diff_mask: None,
            too_many_diffs: false,
            computed: snapshot.computed,
            computing_error: String::new(),
            diff_tolerance_percent: snapshot.diff_tolerance_percent,
            created_at: now,
        })
    }

    fn get(&self, id: i64) -> Result<Option<Snapshot>> {
        self.query_snapshot("id = ?1", params![id])
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mask = snapshot.diff_mask.as_ref().map(DiffMask::to_json).transpose()?;
        let conn = self.conn.lock();

        let updated = conn.execute(
            "UPDATE snapshots SET image_path = ?1, width = ?2, height = ?3, reference_id = ?4,
                 diff_mask = ?5, too_many_diffs = ?6, computed = ?7, computing_error = ?8,
                 diff_tolerance = ?9
             WHERE id = ?10",
            params![
                path_to_column(snapshot.image_path.as_deref()),
                snapshot.width,
                snapshot.height,
                snapshot.reference_id,
                mask,
                snapshot.too_many_diffs,
                snapshot.computed,
                snapshot.computing_error,
                snapshot.diff_tolerance_percent,
                snapshot.id,
            ],
        )?;

        if updated == 0 {
            return Err(Error::snapshot_not_found(snapshot.id));
        }

        debug!("Saved snapshot {}", snapshot.id);
        Ok(())
    }

    fn set_computed(&self, id: i64, computed: bool) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE snapshots SET computed = ?1 WHERE id = ?2",
            params![computed, id],
        )?;

        if updated == 0 {
            return Err(Error::snapshot_not_found(id));
        }
        Ok(())
    }

    fn mark_failed(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE snapshots SET computed = 1, computing_error = ?1 WHERE id = ?2",
            params![message, id],
        )?;

        if updated == 0 {
            return Err(Error::snapshot_not_found(id));
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;

        debug!("Deleted snapshot {}", id);
        Ok(deleted > 0)
    }

    fn exclude_zones(&self, snapshot_id: i64) -> Result<Vec<ExcludeZone>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, snapshot_id, x, y, width, height FROM exclude_zones
             WHERE snapshot_id = ?1 ORDER BY id",
        )?;

        let zones = stmt
            .query_map(params![snapshot_id], |row| {
                Ok(ExcludeZone {
                    id: row.get(0)?,
                    snapshot_id: row.get(1)?,
                    rect: Rectangle::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(zones)
    }

    fn add_exclude_zone(&self, snapshot_id: i64, rect: Rectangle) -> Result<ExcludeZone> {
        let conn = self.conn.lock();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM snapshots WHERE id = ?1)",
            params![snapshot_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::snapshot_not_found(snapshot_id));
        }

        conn.execute(
            "INSERT INTO exclude_zones (snapshot_id, x, y, width, height) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![snapshot_id, rect.x, rect.y, rect.width, rect.height],
        )?;

        let zone = ExcludeZone {
            id: conn.last_insert_rowid(),
            snapshot_id,
            rect,
        };
        debug!("Added exclude zone {} to snapshot {}", rect, snapshot_id);
        Ok(zone)
    }

    fn lineage_snapshots(&self, lineage: &Lineage) -> Result<Vec<Snapshot>> {
        self.query_snapshots(
            &format!("{} ORDER BY id", LINEAGE_FILTER),
            lineage_params(lineage),
        )
    }

    fn dependents(&self, reference_id: i64) -> Result<Vec<Snapshot>> {
        self.query_snapshots("reference_id = ?1 ORDER BY id", params![reference_id])
    }

    fn latest_reference(&self, lineage: &Lineage, below_id: Option<i64>) -> Result<Option<Snapshot>> {
        let below_id = below_id.unwrap_or(i64::MAX);
        self.query_snapshot(
            &format!(
                "{} AND reference_id IS NULL AND id < ?7 ORDER BY id DESC LIMIT 1",
                LINEAGE_FILTER
            ),
            params![
                lineage.test_case_name,
                lineage.step_id,
                lineage.environment_id,
                lineage.version_id,
                lineage.browser,
                lineage.display_name,
                below_id,
            ],
        )
    }

    fn latest_reference_in_previous_versions(&self, lineage: &Lineage) -> Result<Option<Snapshot>> {
        self.query_snapshot(
            "test_case_name = ?1 AND step_id = ?2 AND environment_id = ?3 AND version_id < ?4
                 AND browser = ?5 AND display_name = ?6 AND reference_id IS NULL
             ORDER BY version_id DESC, id DESC LIMIT 1",
            lineage_params(lineage),
        )
    }

    fn pending(&self) -> Result<Vec<Snapshot>> {
        self.query_snapshots("computed = 0 ORDER BY id", params![])
    }
}

fn lineage_params(lineage: &Lineage) -> impl Params + '_ {
    (
        &lineage.test_case_name,
        lineage.step_id,
        lineage.environment_id,
        lineage.version_id,
        &lineage.browser,
        &lineage.display_name,
    )
}

fn path_to_column(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

/// Raw database row
struct RawSnapshot {
    id: i64,
    lineage: Lineage,
    image_path: Option<String>,
    width: u32,
    height: u32,
    reference_id: Option<i64>,
    diff_mask: Option<String>,
    too_many_diffs: bool,
    computed: bool,
    computing_error: String,
    diff_tolerance: f64,
    created_at: i64,
}

impl RawSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            lineage: Lineage {
                test_case_name: row.get(1)?,
                step_id: row.get(2)?,
                environment_id: row.get(3)?,
                version_id: row.get(4)?,
                browser: row.get(5)?,
                display_name: row.get(6)?,
            },
            image_path: row.get(7)?,
            width: row.get(8)?,
            height: row.get(9)?,
            reference_id: row.get(10)?,
            diff_mask: row.get(11)?,
            too_many_diffs: row.get(12)?,
            computed: row.get(13)?,
            computing_error: row.get(14)?,
            diff_tolerance: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn parse(self) -> Result<Snapshot> {
        let diff_mask = self.diff_mask.as_deref().map(DiffMask::from_json).transpose()?;

        Ok(Snapshot {
            id: self.id,
            lineage: self.lineage,
            image_path: self.image_path.map(PathBuf::from),
            width: self.width,
            height: self.height,
            reference_id: self.reference_id,
            diff_mask,
            too_many_diffs: self.too_many_diffs,
            computed: self.computed,
            computing_error: self.computing_error,
            diff_tolerance_percent: self.diff_tolerance,
            created_at: self.created_at,
        })
    }
}
