//! SQLite recorder implementation.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, TransactionBehavior, params};
use tracing::debug;

use crate::{Recorder, Result, SensorId};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

enum Target {
    /// A database file. Every operation opens its own connection and drops
    /// it before returning. Writes take the write lock up front.
    File(PathBuf),
    /// A private in-memory database, reachable only through this one
    /// connection. Operations take turns on it.
    Memory(Mutex<Connection>),
}

/// SQLite-backed recorder with unbounded, append-only retention.
pub struct SqliteRecorder {
    target: Target,
}

impl SqliteRecorder {
    /// Open or create a recorder database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        init_schema(&open_connection(&path)?)?;
        Ok(Self {
            target: Target::File(path),
        })
    }

    /// Create a private in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            target: Target::Memory(Mutex::new(conn)),
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        match &self.target {
            Target::File(path) => f(&mut open_connection(path)?),
            Target::Memory(conn) => {
                let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
                f(&mut *conn)
            }
        }
    }

    /// Store or replace the display label for a sensor.
    pub fn set_alias(&self, sensor_id: &SensorId, alias: &str) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO aliases (sensor_id, alias) VALUES (?1, ?2)
                 ON CONFLICT(sensor_id) DO UPDATE SET alias = excluded.alias",
                params![sensor_id.as_str(), alias],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// All stored display labels.
    pub fn aliases(&self) -> Result<HashMap<SensorId, String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT sensor_id, alias FROM aliases")?;
            let aliases = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let alias: String = row.get(1)?;
                    Ok((SensorId::new(id), alias))
                })?
                .collect::<rusqlite::Result<_>>()?;
            Ok(aliases)
        })
    }
}

impl Recorder for SqliteRecorder {
    fn record(&self, sensor_id: &SensorId, timestamp: DateTime<Utc>) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO events (sensor_id, timestamp) VALUES (?1, ?2)",
                params![sensor_id.as_str(), encode_timestamp(timestamp)],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        debug!(sensor = %sensor_id, "event stored");
        Ok(())
    }

    fn recent_history(&self, sensor_id: &SensorId, limit: usize) -> Result<Vec<DateTime<Utc>>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp FROM events
                 WHERE sensor_id = ?1 ORDER BY timestamp DESC, seq DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![sensor_id.as_str(), limit], |row| {
                row.get::<_, String>(0)
            })?;
            decode_rows(rows)
        })
    }

    fn known_sensors(&self) -> Result<BTreeSet<SensorId>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT sensor_id FROM events")?;
            let sensors = stmt
                .query_map([], |row| row.get::<_, String>(0).map(SensorId::new))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(sensors)
        })
    }

    fn events_in_window(
        &self,
        sensor_id: &SensorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp FROM events
                 WHERE sensor_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC, seq ASC",
            )?;
            let rows = stmt.query_map(
                params![
                    sensor_id.as_str(),
                    encode_timestamp(from),
                    encode_timestamp(to)
                ],
                |row| row.get::<_, String>(0),
            )?;
            decode_rows(rows)
        })
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_sensor
            ON events(sensor_id, timestamp);
        CREATE TABLE IF NOT EXISTS aliases (
            sensor_id TEXT PRIMARY KEY,
            alias TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

// Fixed width, nanosecond precision, and always `Z`, so text order is time
// order and nothing is lost on the way back.
fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

fn decode_rows(
    rows: impl Iterator<Item = rusqlite::Result<String>>,
) -> Result<Vec<DateTime<Utc>>> {
    rows.map(|row| decode_timestamp(&row?)).collect()
}
