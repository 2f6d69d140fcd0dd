//! High-level database handle
//!
//! [`Database`] bundles a constructed backend with its connection manager
//! and migration manager, so application startup is one call chain:
//! connect, validate connectivity, run migrations, serve.

use std::sync::Arc;

use stratum_core::DatabaseError;

use crate::backend::{DatabaseInfo, ModelSchema, StorageBackend, create_database};
use crate::config::DatabaseConfig;
use crate::manager::{ConnectionManager, ConnectionProbe, HealthStatus};
use crate::migrations::{
    Migration, MigrationManager, MigrationRunReport, MigrationStatus, MigrationValidationReport,
};

/// One handle owning the backend plus its resilience and migration layers.
pub struct Database {
    backend: Arc<dyn StorageBackend>,
    connections: ConnectionManager,
    migrations: MigrationManager,
}

impl Database {
    /// Construct the backend for `config` and attach the migration set.
    /// No IO happens here; connectivity is checked lazily or via
    /// [`Database::validate_startup_connection`].
    pub fn connect(
        config: &DatabaseConfig,
        migrations: impl IntoIterator<Item = Migration>,
    ) -> Result<Self, DatabaseError> {
        let backend: Arc<dyn StorageBackend> = Arc::from(create_database(config)?);
        Ok(Self {
            connections: ConnectionManager::new(Arc::clone(&backend)),
            migrations: MigrationManager::new(Arc::clone(&backend)).with_migrations(migrations),
            backend,
        })
    }

    /// Replace the default retry policy on the connection manager.
    pub fn with_retry_policy(
        mut self,
        max_retries: usize,
        base_delay: std::time::Duration,
    ) -> Self {
        self.connections = self.connections.with_retry_policy(max_retries, base_delay);
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn migrations(&self) -> &MigrationManager {
        &self.migrations
    }

    /// Probe connectivity with retries; a soft outcome for callers that
    /// want to decide policy themselves.
    pub async fn test_connection(&self) -> ConnectionProbe {
        self.connections.test_connection().await
    }

    /// Probe connectivity and fail hard. Startup code calls this to refuse
    /// to serve against an unreachable database.
    pub async fn validate_startup_connection(&self) -> Result<(), DatabaseError> {
        let probe = self.test_connection().await;
        if probe.success {
            Ok(())
        } else {
            Err(DatabaseError::connection(
                self.backend.engine_kind(),
                probe
                    .error
                    .unwrap_or_else(|| "connection validation failed".to_string()),
            ))
        }
    }

    pub async fn health_status(&self) -> HealthStatus {
        self.connections.health_status().await
    }

    /// Create the tracking tables and apply every pending migration in
    /// order, halting at the first failure.
    pub async fn run_migrations(&self) -> Result<MigrationRunReport, DatabaseError> {
        self.migrations.ensure_tables().await?;
        self.migrations.migrate_to_latest().await
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus, DatabaseError> {
        self.migrations.status().await
    }

    pub async fn validate_migrations(&self) -> Result<MigrationValidationReport, DatabaseError> {
        self.migrations.validate_migrations().await
    }

    /// Roll back one migration by version string. Unknown versions are a
    /// configuration error; a failed or refused rollback is `Ok(false)`.
    pub async fn rollback_migration(&self, version: &str) -> Result<bool, DatabaseError> {
        let migration = self
            .migrations
            .find(version)
            .ok_or_else(|| {
                DatabaseError::configuration(format!("no registered migration with version {version}"))
            })?
            .clone();
        self.migrations.rollback_migration(&migration).await
    }

    /// Execute the opaque application model DDL.
    pub async fn create_schema(&self, schema: &ModelSchema) -> Result<(), DatabaseError> {
        self.backend.create_schema(schema).await
    }

    pub async fn database_info(&self) -> Result<DatabaseInfo, DatabaseError> {
        self.backend.database_info().await
    }

    pub async fn close(&self) -> Result<(), DatabaseError> {
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::EngineKind;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig::for_engine(EngineKind::Sqlite).with_name(":memory:")
    }

    fn initial_migration() -> Migration {
        Migration::new(
            "1.0.0",
            "create_notes",
            "Create the notes table",
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
        )
        .unwrap()
        .with_down_sql("DROP TABLE notes")
    }

    #[tokio::test]
    async fn test_connect_validate_and_migrate() {
        let db = Database::connect(&memory_config(), [initial_migration()]).unwrap();
        db.validate_startup_connection().await.unwrap();

        let report = db.run_migrations().await.unwrap();
        assert!(report.success);
        assert_eq!(report.applied, ["1.0.0"]);

        let status = db.migration_status().await.unwrap();
        assert_eq!(status.current_version.as_deref(), Some("1.0.0"));
        assert_eq!(status.pending_migrations, 0);
        assert!(status.validation.is_valid);
    }

    #[tokio::test]
    async fn test_rollback_by_version() {
        let db = Database::connect(&memory_config(), [initial_migration()]).unwrap();
        db.run_migrations().await.unwrap();

        assert!(db.rollback_migration("1.0.0").await.unwrap());
        let status = db.migration_status().await.unwrap();
        assert_eq!(status.current_version, None);
        assert_eq!(status.pending_migrations, 1);
    }

    #[tokio::test]
    async fn test_rollback_unknown_version_is_config_error() {
        let db = Database::connect(&memory_config(), [initial_migration()]).unwrap();
        let err = db.rollback_migration("9.9.9").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_reports_serialize_for_admin_surfaces() {
        let db = Database::connect(&memory_config(), [initial_migration()]).unwrap();
        db.run_migrations().await.unwrap();

        let status = serde_json::to_value(db.migration_status().await.unwrap()).unwrap();
        assert_eq!(status["current_version"], "1.0.0");
        assert_eq!(status["pending_migrations"], 0);
        assert_eq!(status["validation"]["is_valid"], true);

        let health = serde_json::to_value(db.health_status().await).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["database_type"], "sqlite");
    }

    #[tokio::test]
    async fn test_create_schema_then_query() {
        let db = Database::connect(&memory_config(), []).unwrap();
        let schema = ModelSchema::new(["CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)"]);
        db.create_schema(&schema).await.unwrap();

        db.backend()
            .execute("INSERT INTO kv (k, v) VALUES (?, ?)", &["a", "1"])
            .await
            .unwrap();
        let rows = db.backend().query_text("SELECT v FROM kv").await.unwrap();
        assert_eq!(rows, vec![vec![Some("1".to_string())]]);
    }
}
