//! Storage backend contract and factory
//!
//! One capability set regardless of engine: every backend exposes config
//! validation, a minimal SQL surface for the migration framework, schema
//! creation over opaque model DDL, a connectivity probe, and an
//! introspection snapshot. [`create_database`] resolves the configured
//! engine kind to the concrete implementation and refuses to hand out a
//! half-valid backend.

use async_trait::async_trait;

use stratum_core::{DatabaseError, EngineKind};

use crate::config::DatabaseConfig;

/// Opaque application model definitions: the set of DDL statements needed to
/// create all persisted entity tables. The core never inspects their content.
#[derive(Debug, Clone, Default)]
pub struct ModelSchema {
    statements: Vec<String>,
}

impl ModelSchema {
    pub fn new(statements: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Minimal introspection snapshot produced by a trivial query against the
/// live engine.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseInfo {
    pub engine: EngineKind,
    pub server_version: String,
    pub database: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: Option<String>,
}

/// Polymorphic handle over the concrete engine implementations.
///
/// The SQL surface is deliberately small: batch execution for DDL,
/// parameterized single statements (uniform `?` placeholders, rewritten per
/// dialect), and text-shaped row queries. That is everything the migration
/// framework and the health probes need, and it keeps each engine
/// implementation honest about translating its driver errors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn engine_kind(&self) -> EngineKind;

    fn config(&self) -> &DatabaseConfig;

    /// Engine-specific validation of the canonical config. Called by the
    /// factory immediately after construction.
    fn validate_config(&self) -> Result<(), DatabaseError>;

    /// Execute a batch of SQL statements (DDL, migration scripts).
    async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError>;

    /// Execute a batch inside one transaction on a single connection,
    /// rolling back on failure. Engines without transactional DDL give only
    /// their native guarantees here.
    async fn execute_transactional(&self, sql: &str) -> Result<(), DatabaseError>;

    /// Execute one statement with text parameters bound to `?` placeholders.
    /// Returns the affected row count.
    async fn execute(&self, sql: &str, params: &[&str]) -> Result<u64, DatabaseError>;

    /// Run a query and return every row as text columns (NULL as `None`).
    async fn query_text(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DatabaseError>;

    /// Open a session and run a trivial probe query.
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Produce the introspection snapshot for admin surfaces.
    async fn database_info(&self) -> Result<DatabaseInfo, DatabaseError>;

    /// Execute the opaque model DDL ("create all tables").
    async fn create_schema(&self, schema: &ModelSchema) -> Result<(), DatabaseError> {
        for statement in schema.statements() {
            self.execute_batch(statement).await?;
        }
        Ok(())
    }

    /// Explicitly shut the backend down. Operations after close fail with a
    /// connection error.
    async fn close(&self) -> Result<(), DatabaseError>;
}

/// Construct the engine implementation selected by `config` and validate it
/// before returning.
///
/// `mariadb` resolves to the MySQL implementation (shared code path); a
/// missing engine kind is [`DatabaseError::MissingEngineType`]. Any
/// validation failure, including a backend compiled out of this build, is
/// surfaced as a single [`DatabaseError::Configuration`] so no half-valid
/// backend reaches the caller.
pub fn create_database(config: &DatabaseConfig) -> Result<Box<dyn StorageBackend>, DatabaseError> {
    let config = config.normalize();
    let engine = config.engine.ok_or(DatabaseError::MissingEngineType)?;

    let backend: Box<dyn StorageBackend> = match engine {
        #[cfg(feature = "sqlite")]
        EngineKind::Sqlite => Box::new(crate::sqlite::SqliteBackend::connect(config)?),
        #[cfg(feature = "postgres")]
        EngineKind::Postgres => Box::new(crate::postgres::PostgresBackend::new(config)),
        #[cfg(feature = "mysql")]
        EngineKind::MySql => Box::new(crate::mysql::MySqlBackend::connect_lazy(config)?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(DatabaseError::configuration(format!(
                "support for {other} is not compiled into this build"
            )));
        }
    };

    backend
        .validate_config()
        .map_err(|e| DatabaseError::configuration(e.to_string()))?;

    tracing::debug!(engine = %engine, "Constructed database backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn config_for(type_str: &str) -> DatabaseConfig {
        DatabaseConfig {
            engine: Some(EngineKind::from_str(type_str).unwrap()),
            host: Some("localhost".to_string()),
            name: Some("sandbox".to_string()),
            user: Some("app".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_factory_resolves_all_engine_aliases() {
        for (alias, expected) in [
            ("postgres", EngineKind::Postgres),
            ("postgresql", EngineKind::Postgres),
            ("mysql", EngineKind::MySql),
            ("mariadb", EngineKind::MySql),
        ] {
            let backend = create_database(&config_for(alias)).unwrap();
            assert_eq!(backend.engine_kind(), expected, "{alias}");
        }

        let sqlite = DatabaseConfig::for_engine(EngineKind::Sqlite).with_name(":memory:");
        let backend = create_database(&sqlite).unwrap();
        assert_eq!(backend.engine_kind(), EngineKind::Sqlite);
    }

    #[test]
    fn test_factory_missing_type() {
        let err = create_database(&DatabaseConfig::default())
            .err()
            .expect("engineless config must be rejected");
        assert!(matches!(err, DatabaseError::MissingEngineType));
    }

    #[test]
    fn test_factory_validation_failure_is_configuration_error() {
        // Postgres without a user fails the engine-specific validation.
        let mut config = config_for("postgresql");
        config.user = None;
        let err = create_database(&config)
            .err()
            .expect("userless postgres config must be rejected");
        assert!(matches!(err, DatabaseError::Configuration { .. }));
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_factory_resolves_engine_from_url_alone() {
        let config = DatabaseConfig {
            url: Some("postgresql://app@db:5432/sandbox".to_string()),
            ..Default::default()
        };
        let backend = create_database(&config).unwrap();
        assert_eq!(backend.engine_kind(), EngineKind::Postgres);
    }

    #[test]
    fn test_model_schema_holds_opaque_statements() {
        let schema = ModelSchema::new(["CREATE TABLE a (id INTEGER)", "CREATE TABLE b (id INTEGER)"]);
        assert_eq!(schema.statements().len(), 2);
        assert!(!schema.is_empty());
        assert!(ModelSchema::default().is_empty());
    }
}
