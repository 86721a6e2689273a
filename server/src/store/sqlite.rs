use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::{PricePoint, StoreError, TickStore};
use crate::data_sources::Tick;
use crate::decimal::{format_decimal, parse_decimal};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle reader connections kept open between reads.
const READER_POOL_SIZE: usize = 4;

/// SQLite-backed store.
///
/// Prices are kept as their decimal text so no precision is lost, and
/// timestamps as microseconds since the epoch. The database runs in WAL
/// mode with one writer connection and a pool of read-only connections,
/// so range reads never wait on an append or on each other.
#[derive(Debug, Clone)]
pub struct SqliteTickStore {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<ReaderPool>,
}

impl SqliteTickStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(db_path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;

        writer.execute(
            "CREATE TABLE IF NOT EXISTS ticks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                price TEXT NOT NULL,
                observed_at INTEGER NOT NULL
            )",
            [],
        )?;
        writer.execute(
            "CREATE INDEX IF NOT EXISTS idx_ticks_symbol_observed_at ON ticks(symbol, observed_at)",
            [],
        )?;

        let readers = ReaderPool::new(db_path, READER_POOL_SIZE);
        // fail at startup, not on the first query
        let first_reader = open_reader(db_path)?;
        readers.checkin(first_reader);

        info!(path = %db_path.display(), "SQLite tick store opened");

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
        })
    }
}

fn open_reader(path: &Path) -> Result<Connection, StoreError> {
    let reader = Connection::open(path)?;
    reader.busy_timeout(BUSY_TIMEOUT)?;
    reader.pragma_update(None, "query_only", true)?;
    Ok(reader)
}

/// Read-only connections handed out one per read. When none is idle a new
/// one is opened; at most `max_idle` go back into the pool.
#[derive(Debug)]
struct ReaderPool {
    path: PathBuf,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn new(path: &Path, max_idle: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            max_idle: max_idle.max(1),
            idle: Mutex::new(Vec::with_capacity(max_idle)),
        }
    }

    fn checkout(&self) -> Result<Connection, StoreError> {
        let pooled = lock(&self.idle)?.pop();
        match pooled {
            Some(reader) => Ok(reader),
            None => {
                debug!(path = %self.path.display(), "Opening extra SQLite reader");
                open_reader(&self.path)
            }
        }
    }

    fn checkin(&self, reader: Connection) {
        // a poisoned pool just closes the connection
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(reader);
            }
        }
    }

    fn with_reader<T>(
        &self,
        read: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let reader = self.checkout()?;
        let result = read(&reader);
        self.checkin(reader);
        result
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
}

async fn run_blocking<T, F>(task: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| StoreError::Unavailable(format!("store task failed: {error}")))?
}

#[async_trait]
impl TickStore for SqliteTickStore {
    async fn append(&self, tick: &Tick) -> Result<(), StoreError> {
        let writer = Arc::clone(&self.writer);
        let symbol = tick.symbol.clone();
        let price = format_decimal(&tick.price);
        let observed_at = tick.observed_at.timestamp_micros();

        run_blocking(move || {
            let conn = lock(&writer)?;
            conn.execute(
                "INSERT INTO ticks (symbol, price, observed_at) VALUES (?1, ?2, ?3)",
                params![symbol, price, observed_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn query_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let readers = Arc::clone(&self.readers);
        let symbol = symbol.to_string();
        let from = from.timestamp_micros();
        let to = to.timestamp_micros();

        run_blocking(move || {
            readers.with_reader(|conn| read_range(conn, &symbol, from, to))
        })
        .await
    }
}

fn read_range(
    conn: &Connection,
    symbol: &str,
    from: i64,
    to: i64,
) -> Result<Vec<PricePoint>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, price, observed_at FROM ticks
         WHERE symbol = ?1 AND observed_at >= ?2 AND observed_at <= ?3
         ORDER BY observed_at ASC, id ASC",
    )?;

    let rows = stmt.query_map(params![symbol, from, to], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut points = Vec::new();
    for row in rows {
        let (id, price, observed_at) = row?;
        let price = parse_decimal(&price).map_err(|error| StoreError::CorruptRow {
            id,
            reason: error.to_string(),
        })?;
        let observed_at =
            DateTime::from_timestamp_micros(observed_at).ok_or_else(|| StoreError::CorruptRow {
                id,
                reason: format!("timestamp {observed_at} out of range"),
            })?;
        points.push(PricePoint { price, observed_at });
    }

    Ok(points)
}
