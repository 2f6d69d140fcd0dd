//! PostgreSQL storage backend
//!
//! Builds a dialect-correct `tokio_postgres::Config` from the canonical
//! configuration, pools validated client connections, and translates driver
//! errors at the boundary of every operation.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};

use stratum_core::{DatabaseError, EngineKind, SslMode};

use crate::backend::{DatabaseInfo, StorageBackend};
use crate::config::DatabaseConfig;

pub mod pool;

pub use pool::{PooledClient, PostgresPool};

/// PostgreSQL storage backend
pub struct PostgresBackend {
    config: DatabaseConfig,
    pool: std::sync::OnceLock<PostgresPool>,
    closed: AtomicBool,
}

impl PostgresBackend {
    /// Create the backend. Construction is pure: no connection is attempted
    /// until the first operation, so the factory can validate first.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: std::sync::OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Build the tokio_postgres connect configuration from components,
    /// embedding application_name and connect_timeout as connect arguments.
    fn pg_config(&self) -> Result<tokio_postgres::Config, DatabaseError> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::configuration("postgresql requires 'host'"))?;
        let name = self
            .config
            .name
            .as_deref()
            .ok_or_else(|| DatabaseError::configuration("postgresql requires 'name'"))?;
        let user = self
            .config
            .user
            .as_deref()
            .ok_or_else(|| DatabaseError::configuration("postgresql requires 'user'"))?;

        let mut pg = tokio_postgres::Config::new();
        pg.host(host)
            .port(self.config.port.unwrap_or(5432))
            .dbname(name)
            .user(user)
            .application_name(
                self.config
                    .application_name
                    .as_deref()
                    .unwrap_or("stratum-db"),
            )
            .connect_timeout(Duration::from_secs(self.config.connect_timeout.unwrap_or(30)));

        if let Some(password) = &self.config.password {
            pg.password(password);
        }

        if let Some(ssl_mode) = &self.config.ssl_mode {
            let mode = SslMode::from_str(ssl_mode)
                .map_err(|e| DatabaseError::configuration(e.to_string()))?;
            pg.ssl_mode(match mode {
                SslMode::Disable => tokio_postgres::config::SslMode::Disable,
                SslMode::Allow | SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
                SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                    tokio_postgres::config::SslMode::Require
                }
            });
        }

        Ok(pg)
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::connection(
                EngineKind::Postgres,
                "backend is closed",
            ));
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<PooledClient, DatabaseError> {
        self.ensure_open()?;
        if self.pool.get().is_none() {
            let pg_config = self.pg_config()?;
            let max_connections = self.config.effective_pool_size().get()
                + self.config.max_overflow.unwrap_or(0) as usize;
            let recycle = self.config.pool_recycle.map(Duration::from_secs);
            let _ = self
                .pool
                .set(PostgresPool::new(pg_config, max_connections, recycle));
        }
        self.pool
            .get()
            .expect("pool initialized above")
            .acquire()
            .await
    }
}

/// Rewrite uniform `?` placeholders to PostgreSQL's numbered `$n` form.
fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 4);
    let mut n = 0;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

fn column_as_text(
    row: &tokio_postgres::Row,
    index: usize,
) -> Result<Option<String>, DatabaseError> {
    let ty = row.columns()[index].type_();
    let rendered = match *ty {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(index)
            .map_err(|e| PostgresPool::translate_error(&e))?,
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map_err(|e| PostgresPool::translate_error(&e))?
            .map(|v| v.to_string()),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map_err(|e| PostgresPool::translate_error(&e))?
            .map(|v| v.to_string()),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)
            .map_err(|e| PostgresPool::translate_error(&e))?
            .map(|v| v.to_string()),
        Type::BOOL => row
            .try_get::<_, Option<bool>>(index)
            .map_err(|e| PostgresPool::translate_error(&e))?
            .map(|v| v.to_string()),
        _ => {
            tracing::debug!(column_type = %ty, "Unrenderable column type, returning NULL");
            None
        }
    };
    Ok(rendered)
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn validate_config(&self) -> Result<(), DatabaseError> {
        let report = self.config.validate();
        let mut errors = report.errors;

        if self.config.normalize().user.is_none() {
            errors.push("postgresql requires 'user'".to_string());
        }

        if !errors.is_empty() {
            return Err(DatabaseError::configuration(errors.join("; ")));
        }
        Ok(())
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        let client = self.acquire().await?;
        client
            .client()
            .batch_execute(sql)
            .await
            .map_err(|e| PostgresPool::translate_error(&e))
    }

    async fn execute_transactional(&self, sql: &str) -> Result<(), DatabaseError> {
        let client = self.acquire().await?;
        client
            .client()
            .batch_execute("BEGIN")
            .await
            .map_err(|e| PostgresPool::translate_error(&e))?;

        if let Err(err) = client.client().batch_execute(sql).await {
            if let Err(rollback_err) = client.client().batch_execute("ROLLBACK").await {
                tracing::warn!(error = %rollback_err, "Rollback after failed batch also failed");
            }
            return Err(PostgresPool::translate_error(&err));
        }

        client
            .client()
            .batch_execute("COMMIT")
            .await
            .map_err(|e| PostgresPool::translate_error(&e))
    }

    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DatabaseError> {
        let client = self.acquire().await?;
        let sql = numbered_placeholders(sql);
        let pg_params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        client
            .client()
            .execute(&sql, &pg_params)
            .await
            .map_err(|e| PostgresPool::translate_error(&e))
    }

    async fn query_text(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DatabaseError> {
        let client = self.acquire().await?;
        let rows = client
            .client()
            .query(sql, &[])
            .await
            .map_err(|e| PostgresPool::translate_error(&e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut columns = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                columns.push(column_as_text(row, i)?);
            }
            out.push(columns);
        }
        Ok(out)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let client = self.acquire().await?;
        client
            .client()
            .query_one("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|e| PostgresPool::translate_error(&e))
    }

    async fn database_info(&self) -> Result<DatabaseInfo, DatabaseError> {
        let client = self.acquire().await?;
        let version: String = client
            .client()
            .query_one("SHOW server_version", &[])
            .await
            .map_err(|e| PostgresPool::translate_error(&e))?
            .get(0);
        let database: String = client
            .client()
            .query_one("SELECT current_database()", &[])
            .await
            .map_err(|e| PostgresPool::translate_error(&e))?
            .get(0);

        Ok(DatabaseInfo {
            engine: EngineKind::Postgres,
            server_version: version,
            database: Some(database),
            pool_size: self.config.effective_pool_size().get(),
            ssl_mode: self.config.ssl_mode.clone(),
        })
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.get() {
            pool.drain().await;
        }
        tracing::debug!("Closed PostgreSQL backend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> DatabaseConfig {
        DatabaseConfig::for_engine(EngineKind::Postgres)
            .with_host("db.internal")
            .with_name("sandbox")
            .with_user("app")
    }

    #[test]
    fn test_validate_requires_user() {
        let mut config = valid_config();
        config.user = None;
        let backend = PostgresBackend::new(config);
        let err = backend.validate_config().unwrap_err();
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_validate_rejects_bad_ssl_mode() {
        let mut config = valid_config();
        config.ssl_mode = Some("mandatory".to_string());
        let backend = PostgresBackend::new(config);
        assert!(backend.validate_config().is_err());
    }

    #[test]
    fn test_pg_config_builds_from_components() {
        let mut config = valid_config();
        config.ssl_mode = Some("require".to_string());
        config.connect_timeout = Some(7);
        let backend = PostgresBackend::new(config);
        let pg = backend.pg_config().unwrap();

        assert_eq!(pg.get_dbname(), Some("sandbox"));
        assert_eq!(pg.get_user(), Some("app"));
        assert_eq!(pg.get_ports(), &[5432]);
        assert_eq!(pg.get_connect_timeout(), Some(&Duration::from_secs(7)));
    }

    #[test]
    fn test_placeholder_rewrite() {
        assert_eq!(
            numbered_placeholders("INSERT INTO t (a, b) VALUES (?, ?)"),
            "INSERT INTO t (a, b) VALUES ($1, $2)"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }
}
