//! SQLite storage backend
//!
//! On-disk databases go through a thread-safe connection pool with WAL mode
//! and pre-ping validation. `:memory:` configs use a single shared in-process
//! connection instead, bypassing pooling entirely: pooled connections would
//! each see their own private in-memory database.

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use stratum_core::{DatabaseError, EngineKind};

use crate::backend::{DatabaseInfo, StorageBackend};
use crate::config::{DatabaseConfig, SQLITE_DEFAULT_FILE};

pub mod pool;

pub use pool::{PooledConnection, SqlitePool};

enum SqliteHandle {
    Pooled(SqlitePool),
    /// Single shared connection for ephemeral in-memory use.
    Shared(Mutex<Connection>),
}

/// SQLite-based storage backend
pub struct SqliteBackend {
    handle: SqliteHandle,
    config: DatabaseConfig,
    closed: AtomicBool,
}

impl SqliteBackend {
    /// Open the backend for the given config.
    pub fn connect(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let name = config.name.as_deref().unwrap_or(SQLITE_DEFAULT_FILE);

        let handle = if name == ":memory:" {
            let conn = Connection::open_in_memory()
                .map_err(|e| SqlitePool::translate_error(&e))?;
            tracing::debug!("Opened shared in-memory SQLite connection");
            SqliteHandle::Shared(Mutex::new(conn))
        } else {
            let pool_size = config.effective_pool_size().get();
            tracing::debug!(path = %name, pool_size, "Opening pooled SQLite backend");
            SqliteHandle::Pooled(SqlitePool::new(name, pool_size)?)
        };

        Ok(Self {
            handle,
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::connection(
                EngineKind::Sqlite,
                "backend is closed",
            ));
        }
        Ok(())
    }

    /// Run a closure against a live connection, whichever mode we are in.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        self.ensure_open()?;
        match &self.handle {
            SqliteHandle::Pooled(pool) => {
                let conn = pool.acquire()?;
                f(&conn)
            }
            SqliteHandle::Shared(conn) => {
                let conn = conn.lock().map_err(|_| {
                    DatabaseError::connection(
                        EngineKind::Sqlite,
                        "Failed to lock shared connection",
                    )
                })?;
                f(&conn)
            }
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn validate_config(&self) -> Result<(), DatabaseError> {
        let report = self.config.validate();
        for warning in &report.warnings {
            tracing::warn!(warning = %warning, "SQLite configuration warning");
        }
        if !report.is_valid {
            return Err(DatabaseError::configuration(report.errors.join("; ")));
        }
        Ok(())
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| SqlitePool::translate_error(&e))
        })
    }

    async fn execute_transactional(&self, sql: &str) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SqlitePool::translate_error(&e))?;
            tx.execute_batch(sql)
                .map_err(|e| SqlitePool::translate_error(&e))?;
            tx.commit().map_err(|e| SqlitePool::translate_error(&e))
        })
    }

    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DatabaseError> {
        self.with_conn(|conn| {
            conn.execute(sql, rusqlite::params_from_iter(params.iter().copied()))
                .map(|n| n as u64)
                .map_err(|e| SqlitePool::translate_error(&e))
        })
    }

    async fn query_text(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DatabaseError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| SqlitePool::translate_error(&e))?;
            let column_count = stmt.column_count();

            let mut rows = stmt
                .query([])
                .map_err(|e| SqlitePool::translate_error(&e))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| SqlitePool::translate_error(&e))? {
                let mut columns = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value = row
                        .get_ref(i)
                        .map_err(|e| SqlitePool::translate_error(&e))?;
                    columns.push(match value {
                        ValueRef::Null => None,
                        ValueRef::Integer(v) => Some(v.to_string()),
                        ValueRef::Real(v) => Some(v.to_string()),
                        ValueRef::Text(v) => Some(String::from_utf8_lossy(v).into_owned()),
                        ValueRef::Blob(_) => None,
                    });
                }
                out.push(columns);
            }
            Ok(out)
        })
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| SqlitePool::translate_error(&e))
        })
    }

    async fn database_info(&self) -> Result<DatabaseInfo, DatabaseError> {
        self.ensure_open()?;
        let pool_size = match &self.handle {
            SqliteHandle::Pooled(_) => self.config.effective_pool_size().get(),
            SqliteHandle::Shared(_) => 1,
        };
        Ok(DatabaseInfo {
            engine: EngineKind::Sqlite,
            server_version: rusqlite::version().to_string(),
            database: Some(
                self.config
                    .name
                    .clone()
                    .unwrap_or_else(|| SQLITE_DEFAULT_FILE.to_string()),
            ),
            pool_size,
            ssl_mode: self.config.ssl_mode.clone(),
        })
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.closed.store(true, Ordering::SeqCst);
        if let SqliteHandle::Pooled(pool) = &self.handle {
            pool.drain();
        }
        tracing::debug!("Closed SQLite backend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_backend() -> SqliteBackend {
        let config = DatabaseConfig::for_engine(EngineKind::Sqlite).with_name(":memory:");
        SqliteBackend::connect(config).unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_shares_one_connection() {
        let backend = memory_backend();
        backend
            .execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
            .await
            .unwrap();
        backend
            .execute("INSERT INTO notes (body) VALUES (?)", &["hello"])
            .await
            .unwrap();

        // A second operation must see the same in-memory database.
        let rows = backend
            .query_text("SELECT body FROM notes")
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Some("hello".to_string())]]);
    }

    #[tokio::test]
    async fn test_query_text_renders_nulls_and_integers() {
        let backend = memory_backend();
        backend
            .execute_batch("CREATE TABLE t (a INTEGER, b TEXT)")
            .await
            .unwrap();
        backend
            .execute_batch("INSERT INTO t VALUES (42, NULL)")
            .await
            .unwrap();

        let rows = backend.query_text("SELECT a, b FROM t").await.unwrap();
        assert_eq!(rows, vec![vec![Some("42".to_string()), None]]);
    }

    #[tokio::test]
    async fn test_ping_and_close() {
        let backend = memory_backend();
        backend.ping().await.unwrap();

        backend.close().await.unwrap();
        let err = backend.ping().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_database_info_snapshot() {
        let backend = memory_backend();
        let info = backend.database_info().await.unwrap();
        assert_eq!(info.engine, EngineKind::Sqlite);
        assert_eq!(info.database.as_deref(), Some(":memory:"));
        assert_eq!(info.pool_size, 1);
        assert!(!info.server_version.is_empty());
    }

    #[tokio::test]
    async fn test_create_schema_runs_opaque_ddl() {
        use crate::backend::ModelSchema;

        let backend = memory_backend();
        let schema = ModelSchema::new([
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)",
            "CREATE TABLE sessions (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id))",
        ]);
        backend.create_schema(&schema).await.unwrap();

        let rows = backend
            .query_text("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .await
            .unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("2"));
    }
}
