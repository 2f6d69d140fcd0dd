//! MySQL/MariaDB storage backend
//!
//! Served by sqlx's MySQL driver; MariaDB shares this code path. The pool is
//! created lazily (`connect_lazy_with`) so the factory can validate the
//! configuration before any socket is opened. Pooling honors `pool_size`
//! plus `max_overflow`, recycles connections after `pool_recycle` seconds,
//! and pre-pings connections before reuse.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::Row;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stratum_core::{DatabaseError, EngineKind, SslMode};

use crate::backend::{DatabaseInfo, StorageBackend};
use crate::config::DatabaseConfig;

/// MySQL/MariaDB storage backend
pub struct MySqlBackend {
    config: DatabaseConfig,
    pool: MySqlPool,
    closed: AtomicBool,
}

impl MySqlBackend {
    /// Build the backend with a lazily-connecting pool.
    pub fn connect_lazy(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let options = Self::connect_options(&config)?;

        let max_connections =
            config.effective_pool_size().get() as u32 + config.max_overflow.unwrap_or(0);

        let mut pool_options = MySqlPoolOptions::new()
            .max_connections(max_connections.max(1))
            .test_before_acquire(true) // pre-ping
            .acquire_timeout(Duration::from_secs(config.connect_timeout.unwrap_or(30)));

        if let Some(recycle) = config.pool_recycle {
            pool_options = pool_options.max_lifetime(Some(Duration::from_secs(recycle)));
        }

        let pool = pool_options.connect_lazy_with(options);
        tracing::debug!(max_connections, "Created lazy MySQL pool");

        Ok(Self {
            config,
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Compose dialect-correct connect options from components.
    fn connect_options(config: &DatabaseConfig) -> Result<MySqlConnectOptions, DatabaseError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::configuration("mysql requires 'host'"))?;
        let name = config
            .name
            .as_deref()
            .ok_or_else(|| DatabaseError::configuration("mysql requires 'name'"))?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(config.port.unwrap_or(3306))
            .database(name);

        if let Some(user) = &config.user {
            options = options.username(user);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        if let Some(charset) = &config.charset {
            options = options.charset(charset);
        }
        if let Some(ssl_mode) = &config.ssl_mode {
            let mode = SslMode::from_str(ssl_mode)
                .map_err(|e| DatabaseError::configuration(e.to_string()))?;
            options = options.ssl_mode(match mode {
                SslMode::Disable => MySqlSslMode::Disabled,
                SslMode::Allow | SslMode::Prefer => MySqlSslMode::Preferred,
                SslMode::Require => MySqlSslMode::Required,
                SslMode::VerifyCa => MySqlSslMode::VerifyCa,
                SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
            });
        }

        Ok(options)
    }

    fn translate_error(error: sqlx::Error) -> DatabaseError {
        DatabaseError::connection(EngineKind::MySql, error.to_string())
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::connection(
                EngineKind::MySql,
                "backend is closed",
            ));
        }
        Ok(())
    }
}

fn column_as_text(row: &sqlx::mysql::MySqlRow, index: usize) -> Option<String> {
    // MySQL column types vary per server; try the common decodings in order.
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<u64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    tracing::debug!(index, "Unrenderable MySQL column, returning NULL");
    None
}

#[async_trait]
impl StorageBackend for MySqlBackend {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::MySql
    }

    fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn validate_config(&self) -> Result<(), DatabaseError> {
        let report = self.config.validate();
        if !report.is_valid {
            return Err(DatabaseError::configuration(report.errors.join("; ")));
        }
        Ok(())
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        // sqlx prepares single statements; split the batch on terminators.
        // The split is not quote-aware: a literal ';' inside a string
        // constant breaks the batch. Run such statements through execute()
        // with the value bound as a parameter instead.
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(Self::translate_error)?;
        }
        Ok(())
    }

    async fn execute_transactional(&self, sql: &str) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        // MySQL DDL is not transactional; this still pins the whole batch to
        // one connection and gives DML statements the native guarantees.
        // Statement splitting has the same quote-awareness limitation as
        // execute_batch.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(Self::translate_error)?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(Self::translate_error)?;

        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            if let Err(err) = sqlx::query(statement).execute(&mut *conn).await {
                if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed batch also failed");
                }
                return Err(Self::translate_error(err));
            }
        }

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(Self::translate_error)
    }

    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DatabaseError> {
        self.ensure_open()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(Self::translate_error)?;
        Ok(result.rows_affected())
    }

    async fn query_text(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DatabaseError> {
        self.ensure_open()?;
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::translate_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut columns = Vec::with_capacity(row.columns().len());
            for i in 0..row.columns().len() {
                columns.push(column_as_text(row, i));
            }
            out.push(columns);
        }
        Ok(out)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(Self::translate_error)
    }

    async fn database_info(&self) -> Result<DatabaseInfo, DatabaseError> {
        self.ensure_open()?;
        let row = sqlx::query("SELECT VERSION(), DATABASE()")
            .fetch_one(&self.pool)
            .await
            .map_err(Self::translate_error)?;

        Ok(DatabaseInfo {
            engine: EngineKind::MySql,
            server_version: column_as_text(&row, 0).unwrap_or_default(),
            database: column_as_text(&row, 1),
            pool_size: self.config.effective_pool_size().get(),
            ssl_mode: self.config.ssl_mode.clone(),
        })
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.closed.store(true, Ordering::SeqCst);
        self.pool.close().await;
        tracing::debug!("Closed MySQL backend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> DatabaseConfig {
        DatabaseConfig::for_engine(EngineKind::MySql)
            .with_host("db.internal")
            .with_name("sandbox")
            .with_user("app")
    }

    #[tokio::test]
    async fn test_connect_lazy_is_pure() {
        // No server anywhere near this test; lazy construction must succeed.
        let backend = MySqlBackend::connect_lazy(valid_config()).unwrap();
        assert_eq!(backend.engine_kind(), EngineKind::MySql);
        backend.validate_config().unwrap();
    }

    #[test]
    fn test_connect_options_require_host_and_name() {
        let mut config = valid_config();
        config.host = None;
        assert!(MySqlBackend::connect_options(&config).is_err());

        let mut config = valid_config();
        config.name = None;
        assert!(MySqlBackend::connect_options(&config).is_err());
    }

    #[test]
    fn test_ssl_mode_mapping_rejects_unknown() {
        let mut config = valid_config();
        config.ssl_mode = Some("sometimes".to_string());
        assert!(MySqlBackend::connect_lazy(config).is_err());
    }

    #[tokio::test]
    async fn test_validate_reports_config_errors() {
        let mut config = valid_config();
        config.pool_size = Some(0);
        // Options still build; validation is what rejects the pool size.
        let backend = MySqlBackend::connect_lazy(config).unwrap();
        let err = backend.validate_config().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }
}
