//! SQLite-backed record store.
//!
//! Records live in one `forecast` table keyed by `(place, date)`. A replace
//! runs as a single transaction, and the committed set is pushed to the
//! place's watch channel while the connection lock is still held so
//! observers see replaces in commit order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use common::{Error, ForecastRecord};
use dashmap::DashMap;
use rusqlite::{params, Connection};
use tokio::sync::watch;
use tracing::debug;

use super::{normalize_batch, RecordStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS forecast (
    place       TEXT    NOT NULL,
    date        INTEGER NOT NULL,
    ave_temp    REAL    NOT NULL,
    pressure    INTEGER NOT NULL,
    humidity    INTEGER NOT NULL,
    description TEXT    NOT NULL DEFAULT '',
    fetched_at  INTEGER NOT NULL,
    PRIMARY KEY (place, date)
);
";

pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    feeds: DashMap<String, watch::Sender<Vec<ForecastRecord>>>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("watched_places", &self.feeds.len())
            .finish_non_exhaustive()
    }
}

fn store_err(context: &str, err: rusqlite::Error) -> Error {
    Error::Store(format!("{context}: {err}"))
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            store_err(&format!("failed to open SQLite database at {}", path.display()), e)
        })?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .map_err(|e| store_err("failed to open in-memory SQLite database", e))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| store_err("failed to create schema", e))?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            feeds: DashMap::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("connection lock poisoned".into()))
    }
}

fn load_records(conn: &Connection, place: &str) -> Result<Vec<ForecastRecord>, Error> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT place, date, ave_temp, pressure, humidity, description, fetched_at
             FROM forecast WHERE place = ?1 ORDER BY date",
        )
        .map_err(|e| store_err("failed to prepare select", e))?;

    let rows = stmt
        .query_map(params![place], |row| {
            Ok(ForecastRecord {
                place: row.get(0)?,
                date: row.get(1)?,
                average_temperature: row.get(2)?,
                pressure: row.get(3)?,
                humidity: row.get(4)?,
                description: row.get(5)?,
                fetched_at: row.get(6)?,
            })
        })
        .map_err(|e| store_err("failed to query records", e))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| store_err("failed to read record row", e))
}

impl RecordStore for SqliteStore {
    fn get_records(&self, place: &str) -> Result<Vec<ForecastRecord>, Error> {
        let conn = self.lock()?;
        load_records(&conn, place)
    }

    fn watch(&self, place: &str) -> Result<watch::Receiver<Vec<ForecastRecord>>, Error> {
        if let Some(tx) = self.feeds.get(place) {
            return Ok(tx.subscribe());
        }
        // Seed under the connection lock so a concurrent replace cannot slip
        // between the read and the channel insert.
        let conn = self.lock()?;
        let current = load_records(&conn, place)?;
        let tx = self
            .feeds
            .entry(place.to_string())
            .or_insert_with(|| watch::channel(current).0);
        Ok(tx.subscribe())
    }

    fn has_fresh_data(&self, place: &str, count: i64, cutoff: i64) -> Result<bool, Error> {
        if count <= 0 {
            return Ok(true);
        }
        let conn = self.lock()?;
        let (selected, fresh): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(fetched_at >= ?3), 0)
                 FROM (SELECT fetched_at FROM forecast WHERE place = ?1 ORDER BY date LIMIT ?2)",
                params![place, count, cutoff],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| store_err("failed to check freshness", e))?;
        Ok(selected == count && fresh == count)
    }

    fn replace_all(&self, place: &str, records: Vec<ForecastRecord>) -> Result<(), Error> {
        let records = normalize_batch(place, records);
        let mut conn = self.lock()?;

        let tx = conn
            .transaction()
            .map_err(|e| store_err("failed to begin transaction", e))?;
        tx.execute("DELETE FROM forecast WHERE place = ?1", params![place])
            .map_err(|e| store_err("failed to clear place", e))?;
        {
            let mut insert = tx
                .prepare_cached(
                    "INSERT INTO forecast
                     (place, date, ave_temp, pressure, humidity, description, fetched_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(|e| store_err("failed to prepare insert", e))?;
            for r in &records {
                insert
                    .execute(params![
                        r.place,
                        r.date,
                        r.average_temperature,
                        r.pressure,
                        r.humidity,
                        r.description,
                        r.fetched_at
                    ])
                    .map_err(|e| store_err("failed to insert record", e))?;
            }
        }
        tx.commit()
            .map_err(|e| store_err("failed to commit replace", e))?;

        debug!("Replaced {} records for {:?}", records.len(), place);

        if let Some(feed) = self.feeds.get(place) {
            feed.send_replace(records);
        }
        Ok(())
    }
}
