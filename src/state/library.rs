use chrono::{NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::{Path, PathBuf};

use super::data::{
    FrameType, ImageRecord, JournalEntry, JournalStatus, PlateSolution, SolveErrorRow, DATE_FORMAT,
};
use crate::config::{check_table_name, Config, TableNames};
use crate::error::{CatalogError, Result};

/// How `write_table` treats an existing table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop and recreate the table, then insert
    Replace,
    /// Create the table if needed, then insert
    Append,
}

/// A struct that can be stored as one row of a named table
pub trait TableRow: Sized {
    /// Column names and SQL declarations, in `to_values` order
    const COLUMNS: &'static [(&'static str, &'static str)];

    fn to_values(&self) -> Vec<Value>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::Text(s.to_string()))
}

fn path_text(path: &Path) -> Value {
    Value::Text(path.to_string_lossy().to_string())
}

fn conversion_error(index: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

impl TableRow for ImageRecord {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("id", "INTEGER PRIMARY KEY"),
        ("file", "TEXT NOT NULL"),
        ("folder", "TEXT NOT NULL"),
        ("object", "TEXT"),
        ("obs_date", "TEXT"),
        ("ra", "TEXT"),
        ("dec", "TEXT"),
        ("x", "INTEGER"),
        ("y", "INTEGER"),
        ("frame_type", "TEXT"),
        ("filter", "TEXT"),
        ("focal_length", "REAL"),
        ("exposure", "REAL"),
        ("camera", "TEXT"),
        ("telescope", "TEXT"),
        ("md5sum", "TEXT"),
        ("orig_folder", "TEXT"),
        ("orig_file", "TEXT"),
    ];

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.file.clone()),
            path_text(&self.folder),
            text(self.object.as_deref()),
            self.obs_date
                .map_or(Value::Null, |d| Value::Text(d.format(DATE_FORMAT).to_string())),
            text(self.ra.as_deref()),
            text(self.dec.as_deref()),
            self.x.map_or(Value::Null, Value::Integer),
            self.y.map_or(Value::Null, Value::Integer),
            text(self.frame_type.as_ref().map(FrameType::as_str)),
            Value::Text(self.filter.clone()),
            self.focal_length.map_or(Value::Null, Value::Real),
            self.exposure.map_or(Value::Null, Value::Real),
            Value::Text(self.camera.clone()),
            text(self.telescope.as_deref()),
            text(self.md5sum.as_deref()),
            self.orig_folder.as_deref().map_or(Value::Null, path_text),
            text(self.orig_file.as_deref()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let obs_date = match row.get::<_, Option<String>>(4)? {
            Some(s) => Some(
                NaiveDateTime::parse_from_str(&s, DATE_FORMAT)
                    .map_err(|e| conversion_error(4, e))?,
            ),
            None => None,
        };

        Ok(ImageRecord {
            id: row.get(0)?,
            file: row.get(1)?,
            folder: PathBuf::from(row.get::<_, String>(2)?),
            object: row.get(3)?,
            obs_date,
            ra: row.get(5)?,
            dec: row.get(6)?,
            x: row.get(7)?,
            y: row.get(8)?,
            frame_type: row
                .get::<_, Option<String>>(9)?
                .map(|t| FrameType::parse(&t)),
            filter: row
                .get::<_, Option<String>>(10)?
                .unwrap_or_else(|| crate::fits::extract::NO_FILTER.to_string()),
            focal_length: row.get(11)?,
            exposure: row.get(12)?,
            camera: row
                .get::<_, Option<String>>(13)?
                .unwrap_or_else(|| crate::fits::instruments::UNKNOWN.to_string()),
            telescope: row.get(14)?,
            md5sum: row.get(15)?,
            orig_folder: row.get::<_, Option<String>>(16)?.map(PathBuf::from),
            orig_file: row.get(17)?,
        })
    }
}

impl TableRow for PlateSolution {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("index", "INTEGER"),
        ("ra_solved", "REAL"),
        ("dec_solved", "REAL"),
        ("angle_solved", "REAL"),
        ("pixscale", "REAL"),
    ];

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.index),
            Value::Real(self.ra_solved),
            Value::Real(self.dec_solved),
            Value::Real(self.angle_solved),
            Value::Real(self.pixscale),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PlateSolution {
            index: row.get(0)?,
            ra_solved: row.get(1)?,
            dec_solved: row.get(2)?,
            angle_solved: row.get(3)?,
            pixscale: row.get(4)?,
        })
    }
}

impl TableRow for SolveErrorRow {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("index", "INTEGER"),
        ("file", "TEXT"),
        ("folder", "TEXT"),
        ("error", "TEXT"),
    ];

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.index),
            Value::Text(self.file.clone()),
            path_text(&self.folder),
            Value::Text(self.error.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SolveErrorRow {
            index: row.get(0)?,
            file: row.get(1)?,
            folder: PathBuf::from(row.get::<_, String>(2)?),
            error: row.get(3)?,
        })
    }
}

fn column_list<T: TableRow>() -> String {
    T::COLUMNS
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_sql<T: TableRow>(table: &str, if_not_exists: bool) -> String {
    let columns = T::COLUMNS
        .iter()
        .map(|(name, decl)| format!("\"{name}\" {decl}"))
        .collect::<Vec<_>>()
        .join(", ");
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    format!("CREATE TABLE {guard}\"{table}\" ({columns})")
}

/// The Library manages the SQLite catalog database.
/// It holds the permanent catalog, the staging tables written by each run,
/// the plate-solve tables and the move journal.
pub struct Library {
    conn: Connection,
    db_path: PathBuf,
    tables: TableNames,
}

impl Library {
    /// Open (or create) the catalog database named in the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let db_path = config.library_db.clone();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "Catalog database opened");

        Self::with_connection(conn, db_path, config.tables.clone())
    }

    /// Catalog that lives only as long as the value, for previews and tests
    pub fn open_in_memory(tables: TableNames) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"), tables)
    }

    fn with_connection(conn: Connection, db_path: PathBuf, tables: TableNames) -> Result<Self> {
        for name in [
            &tables.library,
            &tables.staging,
            &tables.reorganized,
            &tables.solved,
            &tables.solve_errors,
            &tables.journal,
        ] {
            check_table_name(name)?;
        }

        let library = Library {
            conn,
            db_path,
            tables,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Create the permanent catalog and move journal if they don't exist
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute(&create_sql::<ImageRecord>(&self.tables.library, true), [])?;

        self.conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{0}_md5sum\" ON \"{0}\"(md5sum)",
                self.tables.library
            ),
            [],
        )?;

        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_id   INTEGER NOT NULL,
                    from_path   TEXT NOT NULL,
                    to_path     TEXT NOT NULL,
                    status      TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                )",
                self.tables.journal
            ),
            [],
        )?;

        tracing::debug!("Catalog schema initialized");
        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Get a count of images in the permanent catalog
    pub fn image_count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.tables.library),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Read every row of `name`, ordered by its first column
    pub fn read_table<T: TableRow>(&self, name: &str) -> Result<Vec<T>> {
        check_table_name(name)?;
        if !self.table_exists(name)? {
            return Err(CatalogError::MissingTable(name.to_string()));
        }

        let first = T::COLUMNS[0].0;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM \"{name}\" ORDER BY \"{first}\"",
            column_list::<T>()
        ))?;

        let rows = stmt.query_map([], |row| T::from_row(row))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Write `rows` to `name` in one transaction
    pub fn write_table<T: TableRow>(&self, name: &str, rows: &[T], mode: WriteMode) -> Result<()> {
        check_table_name(name)?;
        let tx = self.conn.unchecked_transaction()?;

        match mode {
            WriteMode::Replace => {
                tx.execute(&format!("DROP TABLE IF EXISTS \"{name}\""), [])?;
                tx.execute(&create_sql::<T>(name, false), [])?;
            }
            WriteMode::Append => {
                tx.execute(&create_sql::<T>(name, true), [])?;
            }
        }

        {
            let placeholders = (1..=T::COLUMNS.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{name}\" ({}) VALUES ({placeholders})",
                column_list::<T>()
            ))?;
            for row in rows {
                stmt.execute(params_from_iter(row.to_values()))?;
            }
        }

        tx.commit()?;
        tracing::debug!(table = name, rows = rows.len(), ?mode, "Table written");
        Ok(())
    }

    /// Snapshot of the permanent catalog
    pub fn load_library(&self) -> Result<Vec<ImageRecord>> {
        self.read_table(&self.tables.library)
    }

    /// Permanent catalog entries that are LIGHT frames
    pub fn load_light_frames(&self) -> Result<Vec<ImageRecord>> {
        Ok(self
            .load_library()?
            .into_iter()
            .filter(ImageRecord::is_light)
            .collect())
    }

    /// Highest identifier in the permanent catalog
    pub fn max_id(&self) -> Result<Option<i64>> {
        let id: Option<i64> = self.conn.query_row(
            &format!("SELECT MAX(id) FROM \"{}\"", self.tables.library),
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Read the default staging table
    pub fn read_staged(&self) -> Result<Vec<ImageRecord>> {
        self.read_table(&self.tables.staging)
    }

    /// Replace the default staging table with `records`
    pub fn write_staged(&self, records: &[ImageRecord]) -> Result<()> {
        self.write_table(&self.tables.staging, records, WriteMode::Replace)
    }

    /// Append the staging table to the permanent catalog, keeping staged ids
    ///
    /// Runs in one transaction: an id already present in the catalog aborts
    /// the whole merge.
    pub fn merge_staged(&self) -> Result<usize> {
        let staging = &self.tables.staging;
        if !self.table_exists(staging)? {
            return Err(CatalogError::MissingTable(staging.clone()));
        }

        let columns = column_list::<ImageRecord>();
        let tx = self.conn.unchecked_transaction()?;
        let merged = tx.execute(
            &format!(
                "INSERT INTO \"{}\" ({columns}) SELECT {columns} FROM \"{staging}\"",
                self.tables.library
            ),
            [],
        )?;
        tx.commit()?;

        tracing::info!(merged, staging = %staging, "Merged staged records into catalog");
        Ok(merged)
    }

    /// Delete permanent catalog rows by id
    pub fn remove_records(&self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "DELETE FROM \"{}\" WHERE id = ?1",
                self.tables.library
            ))?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Record a new location for a catalogued file
    pub fn update_location(&self, id: i64, folder: &Path, file: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                "UPDATE \"{}\" SET folder = ?1, file = ?2 WHERE id = ?3",
                self.tables.library
            ),
            params![folder.to_string_lossy(), file, id],
        )?;
        Ok(())
    }

    /// Store the content hash for a catalogued file
    pub fn update_hash(&self, id: i64, md5sum: &str) -> Result<()> {
        self.conn.execute(
            &format!("UPDATE \"{}\" SET md5sum = ?1 WHERE id = ?2", self.tables.library),
            params![md5sum, id],
        )?;
        Ok(())
    }

    /// Journal a move before the filesystem call is made
    pub fn journal_begin(&self, record_id: i64, from: &Path, to: &Path) -> Result<i64> {
        let seq = self.conn.query_row(
            &format!(
                "INSERT INTO \"{}\" (record_id, from_path, to_path, status, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING seq",
                self.tables.journal
            ),
            params![
                record_id,
                from.to_string_lossy(),
                to.to_string_lossy(),
                JournalStatus::Pending.as_str(),
                Utc::now().timestamp(),
            ],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(seq)
    }

    /// Record the outcome of a journaled move
    pub fn journal_finish(&self, seq: i64, status: JournalStatus) -> Result<()> {
        self.conn.execute(
            &format!("UPDATE \"{}\" SET status = ?1 WHERE seq = ?2", self.tables.journal),
            params![status.as_str(), seq],
        )?;
        Ok(())
    }

    /// Every journal entry, oldest first
    pub fn journal_entries(&self) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT seq, record_id, from_path, to_path, status FROM \"{}\" ORDER BY seq",
            self.tables.journal
        ))?;

        let entries = stmt.query_map([], |row| {
            let status: String = row.get(4)?;
            Ok(JournalEntry {
                seq: row.get(0)?,
                record_id: row.get(1)?,
                from_path: PathBuf::from(row.get::<_, String>(2)?),
                to_path: PathBuf::from(row.get::<_, String>(3)?),
                status: JournalStatus::parse(&status).unwrap_or(JournalStatus::Pending),
            })
        })?;

        let mut out = Vec::new();
        for entry in entries {
            out.push(entry?);
        }
        Ok(out)
    }

    /// Moves that were journaled but never confirmed, i.e. an interrupted run
    pub fn unfinished_moves(&self) -> Result<Vec<JournalEntry>> {
        Ok(self
            .journal_entries()?
            .into_iter()
            .filter(|e| e.status == JournalStatus::Pending)
            .collect())
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .field("tables", &self.tables)
            .finish()
    }
}
