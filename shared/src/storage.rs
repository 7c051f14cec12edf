//! SQLite storage for readings
//!
//! A single append-only table. Each append commits on its own, so a crash
//! loses at most the row being written.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::protocol::STORAGE_TIME_FORMAT;
use crate::Reading;

/// Expected `(column, declared type)` set of the `data` table
pub const SCHEMA_DESCRIPTOR: [(&str, &str); 5] = [
    ("row_ID", "INTEGER"),
    ("ID", "VARCHAR"),
    ("Time", "DATETIME"),
    ("Value", "REAL"),
    ("Debug", "INTEGER"),
];

const CREATE_TABLE: &str = "CREATE TABLE data(
    row_ID INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    ID VARCHAR,
    Time DATETIME,
    Value REAL,
    Debug INTEGER
)";

/// Errors raised by the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database {} does not match the expected schema: {reason}", .path.display())]
    Schema { path: PathBuf, reason: String },

    #[error("Database file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid stored row {row_id}: {reason}")]
    CorruptRow { row_id: i64, reason: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A reading as read back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub row_id: i64,
    pub reading: Reading,
}

/// One point of the chart query
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub time: String,
    pub id: String,
    pub value: f64,
}

/// Handle to the readings database
#[derive(Debug)]
pub struct Storage {
    conn: Connection,
    path: PathBuf,
}

impl Storage {
    /// Open or create the database file.
    ///
    /// - no file: a fresh table is created
    /// - `overwrite`: any existing file is deleted and recreated
    /// - existing valid file: opened untouched
    /// - existing invalid file: [`StorageError::Schema`]
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if overwrite && path.exists() {
            fs::remove_file(&path)?;
        }

        if path.exists() {
            let storage = Self::open_existing(&path)?;
            return Ok(storage);
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self { conn, path })
    }

    /// Open an existing database and validate it; never creates a file
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }

        let conn = Connection::open(&path)?;
        let storage = Self { conn, path };
        storage.validate()?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compare the live column set against [`SCHEMA_DESCRIPTOR`]
    pub fn validate(&self) -> Result<(), StorageError> {
        let columns = self.columns().map_err(|err| self.schema_error(err.to_string()))?;

        let mut actual: Vec<(String, String)> = columns
            .into_iter()
            .map(|(name, ty)| (name, ty.to_ascii_uppercase()))
            .collect();
        actual.sort();

        let mut expected: Vec<(String, String)> = SCHEMA_DESCRIPTOR
            .iter()
            .map(|(name, ty)| (name.to_string(), ty.to_string()))
            .collect();
        expected.sort();

        if actual != expected {
            return Err(self.schema_error(format!(
                "expected columns {expected:?}, found {actual:?}"
            )));
        }
        Ok(())
    }

    fn columns(&self) -> rusqlite::Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(data)")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
        rows.collect()
    }

    fn schema_error(&self, reason: String) -> StorageError {
        StorageError::Schema {
            path: self.path.clone(),
            reason,
        }
    }

    /// Insert one reading and return its row id
    pub fn append(&self, reading: &Reading) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO data (ID, Time, Value, Debug) VALUES (?1, ?2, ?3, ?4)",
            params![
                reading.sensor_id,
                reading.storage_time(),
                reading.value,
                i64::from(reading.is_debug),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM data", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Most recent `limit` rows, newest first
    pub fn latest(&self, limit: usize) -> Result<Vec<StoredRow>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT row_ID, ID, Time, Value, Debug
             FROM data
             ORDER BY row_ID DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (row_id, id, time, value, debug) = row?;
            let timestamp = NaiveDateTime::parse_from_str(&time, STORAGE_TIME_FORMAT).map_err(
                |err| StorageError::CorruptRow {
                    row_id,
                    reason: format!("invalid time '{time}': {err}"),
                },
            )?;
            let reading = Reading::new(id, timestamp, value, debug != 0).ok_or_else(|| {
                StorageError::CorruptRow {
                    row_id,
                    reason: format!("non-finite value {value}"),
                }
            })?;
            out.push(StoredRow { row_id, reading });
        }
        Ok(out)
    }

    /// Points with `start <= Time <= end`, oldest first.
    ///
    /// Bounds are passed through SQLite's `datetime()`, so any format it
    /// accepts works (`YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, ...).
    pub fn range(&self, start: &str, end: &str) -> Result<Vec<ChartPoint>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT Time, ID, Value
             FROM data
             WHERE Time BETWEEN datetime(?1) AND datetime(?2)
             ORDER BY Time ASC, row_ID ASC",
        )?;

        let points = stmt.query_map(params![start, end], |row| {
            Ok(ChartPoint {
                time: row.get(0)?,
                id: row.get(1)?,
                value: row.get(2)?,
            })
        })?;

        Ok(points.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Earliest and latest timestamps among non-debug rows
    pub fn debug_free_span(&self) -> Result<Option<(String, String)>, StorageError> {
        let span = self
            .conn
            .query_row(
                "SELECT min(Time), max(Time) FROM data WHERE Debug = 0",
                [],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        Ok(match span {
            Some((Some(min), Some(max))) => Some((min, max)),
            _ => None,
        })
    }
}

/// Render chart points as CSV with a `Datetime,ID,Value` header
pub fn to_csv(points: &[ChartPoint]) -> String {
    let mut csv = String::from("Datetime,ID,Value\n");
    for point in points {
        csv.push_str(&format!(
            "{},{},{}\n",
            csv_field(&point.time),
            csv_field(&point.id),
            point.value
        ));
    }
    csv
}

/// Quote a field containing a separator, quote or line break
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
