//! Connection pool for SQLite with thread-safe resource management

use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use stratum_core::{DatabaseError, EngineKind};

/// Connection pool for SQLite with configurable size and thread safety
pub struct SqlitePool {
    available_connections: Arc<Mutex<Vec<Connection>>>,
    path: PathBuf,
    pool_size: usize,
    config: ConnectionConfig,
    active_connections: Arc<Mutex<usize>>,
}

/// Configuration for SQLite connections
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) wal_mode: bool,
    pub(crate) cache_size_kb: i32,
    pub(crate) busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            cache_size_kb: 64 * 1024,
            busy_timeout_ms: 5000,
        }
    }
}

impl SqlitePool {
    /// Validate database path for security (prevent path traversal)
    fn validate_database_path(path: &Path) -> Result<PathBuf, DatabaseError> {
        let path_str = path.to_string_lossy();

        if path_str.contains("..") {
            return Err(DatabaseError::configuration(
                "Invalid database path: path traversal detected",
            ));
        }

        Ok(path.to_path_buf())
    }

    /// Translate a rusqlite error without leaking full statement text.
    pub(crate) fn translate_error(error: &rusqlite::Error) -> DatabaseError {
        let reason = match error {
            rusqlite::Error::QueryReturnedNoRows => "No rows returned".to_string(),
            rusqlite::Error::InvalidColumnIndex(_) => "Invalid column index".to_string(),
            rusqlite::Error::InvalidColumnName(_) => "Invalid column name".to_string(),
            rusqlite::Error::InvalidPath(_) => "Invalid database path".to_string(),
            other => other.to_string(),
        };
        DatabaseError::connection(EngineKind::Sqlite, reason)
    }

    /// Create a new connection pool with the specified size
    pub fn new(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, DatabaseError> {
        let path = Self::validate_database_path(path.as_ref())?;
        let config = ConnectionConfig::default();

        let mut available = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            // Tables may not exist yet, so no validation on initial connections
            let conn = Self::create_connection(&path, &config)?;
            available.push(conn);
        }

        Ok(Self {
            available_connections: Arc::new(Mutex::new(available)),
            path,
            pool_size,
            config,
            active_connections: Arc::new(Mutex::new(0)),
        })
    }

    /// Create a new SQLite connection with WAL mode and pragmas applied
    fn create_connection(
        path: &Path,
        config: &ConnectionConfig,
    ) -> Result<Connection, DatabaseError> {
        let conn = Connection::open(path).map_err(|e| Self::translate_error(&e))?;

        let cache_pragma = format!("PRAGMA cache_size = -{};", config.cache_size_kb);
        let timeout_pragma = format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms);

        let mut pragmas = Vec::new();
        if config.wal_mode {
            pragmas.push("PRAGMA journal_mode = WAL;");
        }
        pragmas.push("PRAGMA synchronous = NORMAL;");
        pragmas.push(&cache_pragma);
        pragmas.push(&timeout_pragma);
        pragmas.push("PRAGMA foreign_keys = ON;");

        conn.execute_batch(&pragmas.join("\n")).map_err(|e| {
            DatabaseError::connection(
                EngineKind::Sqlite,
                format!("Failed to configure SQLite: {e}"),
            )
        })?;

        Ok(conn)
    }

    /// Pre-ping: verify the connection still responds before reuse.
    fn validate_connection(conn: &Connection) -> Result<(), DatabaseError> {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| Self::translate_error(&e))
    }

    fn lock_failure(what: &str) -> DatabaseError {
        DatabaseError::connection(EngineKind::Sqlite, format!("Failed to lock {what}"))
    }

    /// Get a connection from the pool, creating one if under the size limit.
    pub fn acquire(&self) -> Result<PooledConnection, DatabaseError> {
        loop {
            let conn = {
                let mut available = self
                    .available_connections
                    .lock()
                    .map_err(|_| Self::lock_failure("connection pool"))?;
                available.pop()
            };

            let Some(conn) = conn else { break };

            if let Err(err) = Self::validate_connection(&conn) {
                tracing::warn!(error = %err, "Discarding stale pooled SQLite connection");
                drop(conn);
                continue;
            }

            let mut active = self
                .active_connections
                .lock()
                .map_err(|_| Self::lock_failure("active connection counter"))?;
            *active += 1;

            return Ok(PooledConnection::new(
                conn,
                Arc::clone(&self.available_connections),
                self.pool_size,
                Arc::clone(&self.active_connections),
            ));
        }

        let mut active = self
            .active_connections
            .lock()
            .map_err(|_| Self::lock_failure("active connection counter"))?;

        if *active >= self.pool_size {
            return Err(DatabaseError::connection(
                EngineKind::Sqlite,
                format!(
                    "Connection pool exhausted: {} active connections (max: {})",
                    *active, self.pool_size
                ),
            ));
        }

        let conn = Self::create_connection(&self.path, &self.config)?;
        *active += 1;

        Ok(PooledConnection::new(
            conn,
            Arc::clone(&self.available_connections),
            self.pool_size,
            Arc::clone(&self.active_connections),
        ))
    }

    /// Drop every pooled connection. Used by backend close/reset.
    pub fn drain(&self) {
        if let Ok(mut available) = self.available_connections.lock() {
            available.clear();
        }
    }
}

/// RAII wrapper that returns the connection to the pool on drop
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<Mutex<Vec<Connection>>>,
    pool_size: usize,
    active_connections: Arc<Mutex<usize>>,
}

impl PooledConnection {
    fn new(
        connection: Connection,
        pool: Arc<Mutex<Vec<Connection>>>,
        pool_size: usize,
        active_connections: Arc<Mutex<usize>>,
    ) -> Self {
        Self {
            connection: Some(connection),
            pool,
            pool_size,
            active_connections,
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("BUG: PooledConnection has None connection")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("BUG: PooledConnection has None connection")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let (Ok(mut available), Ok(mut active)) =
                (self.pool.lock(), self.active_connections.lock())
            {
                *active = active.saturating_sub(1);
                if available.len() < self.pool_size {
                    available.push(conn);
                } else {
                    tracing::warn!(
                        available = available.len(),
                        pool_size = self.pool_size,
                        "Pool is full when returning connection"
                    );
                }
            } else {
                tracing::error!("Failed to lock pool for connection return - connection dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pool_acquire_and_return() {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::new(dir.path().join("pool.db"), 2).unwrap();

        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        }

        // Returned connection is reused and still sees the table.
        let conn = pool.acquire().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 't'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_pool_exhaustion() {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::new(dir.path().join("small.db"), 1).unwrap();

        let _held = pool.acquire().unwrap();
        let err = pool
            .acquire()
            .err()
            .expect("second acquire must exhaust a pool of one");
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_pool_rejects_traversal_path() {
        assert!(SqlitePool::new("../outside.db", 1).is_err());
    }
}
