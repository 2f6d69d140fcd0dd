//! Schema migration framework
//!
//! Versioned, checksum-identified migrations with rollback support and an
//! append-only audit history, behaving identically across all three engines.
//!
//! Durable state lives in two tables:
//!
//! - `schema_migrations` holds one row per *currently applied* migration
//!   (the forward pointer set); rollback deletes the row.
//! - `migration_history` is append-only: one row per apply/rollback attempt,
//!   successful or not, never updated. Rollback preserves the record of the
//!   original apply.
//!
//! Failures inside an upgrade or downgrade are recorded in history and
//! reported as a `false` outcome rather than an error, so the orchestrator
//! can decide whether to halt. Only bookkeeping failures (the history insert
//! itself failing, connectivity loss) surface as errors.
//!
//! Concurrent invocation is out of scope: the manager assumes a single
//! writer advances the schema version. Multi-process deployments must
//! serialize migration runs externally.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use stratum_core::{DatabaseError, EngineKind, MigrationVersion};

use crate::backend::StorageBackend;

/// An atomic, versioned schema change with forward and reverse operations.
///
/// Identity is `(version, checksum)` and never mutates after construction.
#[derive(Debug, Clone)]
pub struct Migration {
    version: MigrationVersion,
    name: String,
    description: String,
    up_sql: String,
    down_sql: Option<String>,
}

impl Migration {
    /// Define a migration. The version string must be a dotted numeric
    /// version (`1.2.0`); anything else is a configuration error.
    pub fn new(
        version: &str,
        name: impl Into<String>,
        description: impl Into<String>,
        up_sql: impl Into<String>,
    ) -> Result<Self, DatabaseError> {
        let version = MigrationVersion::from_str(version)
            .map_err(|e| DatabaseError::configuration(e.to_string()))?;
        Ok(Self {
            version,
            name: name.into(),
            description: description.into(),
            up_sql: up_sql.into(),
            down_sql: None,
        })
    }

    /// Attach the reverse operation.
    pub fn with_down_sql(mut self, down_sql: impl Into<String>) -> Self {
        self.down_sql = Some(down_sql.into());
        self
    }

    pub fn version(&self) -> MigrationVersion {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Content checksum: hex SHA-256 over version, name, description, and
    /// both SQL scripts. A pure function of the declared identity, so
    /// recomputing for an unchanged definition always matches the recorded
    /// value, and any drift in metadata *or* transformation logic is caught.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.name.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.description.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.up_sql.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.down_sql.as_deref().unwrap_or("").as_bytes());

        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// Outcome of a [`MigrationManager::migrate_to_latest`] run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunReport {
    pub success: bool,
    /// Versions applied during this run, in order.
    pub applied: Vec<String>,
    /// Version at which the run halted, if any.
    pub failed_version: Option<String>,
}

/// Drift report from [`MigrationManager::validate_migrations`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationValidationReport {
    pub is_valid: bool,
    pub checksum_mismatches: usize,
    /// Applied versions with no registered definition.
    pub missing_definitions: usize,
    pub issues: Vec<String>,
}

/// Aggregate status report for administrative callers.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub current_version: Option<String>,
    pub pending_migrations: usize,
    pub pending_migration_list: Vec<String>,
    pub validation: MigrationValidationReport,
}

/// Orchestrator over the ordered migration set and the applied history.
pub struct MigrationManager {
    backend: Arc<dyn StorageBackend>,
    migrations: Vec<Migration>,
}

impl MigrationManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            migrations: Vec::new(),
        }
    }

    /// Register a migration. The list stays version-sorted no matter the
    /// registration order.
    pub fn register(&mut self, migration: Migration) {
        self.migrations.push(migration);
        self.migrations.sort_by_key(|m| m.version);
    }

    pub fn with_migrations(mut self, migrations: impl IntoIterator<Item = Migration>) -> Self {
        for migration in migrations {
            self.register(migration);
        }
        self
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Look up a registered migration by version string.
    pub fn find(&self, version: &str) -> Option<&Migration> {
        let version = MigrationVersion::from_str(version).ok()?;
        self.migrations.iter().find(|m| m.version == version)
    }

    /// Create the tracking tables if they do not exist. Idempotent.
    pub async fn ensure_tables(&self) -> Result<(), DatabaseError> {
        let (pointer_ddl, history_ddl) = tracking_table_ddl(self.backend.engine_kind());
        self.backend.execute_batch(pointer_ddl).await?;
        self.backend.execute_batch(history_ddl).await?;
        Ok(())
    }

    /// Highest successfully applied version, or `None` on a fresh database.
    pub async fn current_version(&self) -> Result<Option<MigrationVersion>, DatabaseError> {
        Ok(self.applied_versions().await?.into_iter().max())
    }

    async fn applied_versions(&self) -> Result<Vec<MigrationVersion>, DatabaseError> {
        self.ensure_tables().await?;
        let rows = self
            .backend
            .query_text("SELECT version FROM schema_migrations")
            .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(Some(raw)) = row.into_iter().next() else {
                continue;
            };
            match MigrationVersion::from_str(&raw) {
                Ok(version) => versions.push(version),
                Err(_) => tracing::warn!(version = %raw, "Unparseable version in schema_migrations"),
            }
        }
        Ok(versions)
    }

    /// Registered migrations not yet applied, in ascending version order.
    pub async fn pending(&self) -> Result<Vec<&Migration>, DatabaseError> {
        let applied: HashSet<MigrationVersion> =
            self.applied_versions().await?.into_iter().collect();
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }

    async fn record_history(
        &self,
        migration: &Migration,
        direction: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let version = migration.version.to_string();
        let checksum = migration.checksum();
        // success is inlined as a literal so the column can stay a plain
        // integer across dialects; everything else is bound.
        let result = match error {
            Some(error) => {
                self.backend
                    .execute(
                        "INSERT INTO migration_history \
                         (version, name, checksum, direction, success, error) \
                         VALUES (?, ?, ?, ?, 0, ?)",
                        &[&version, migration.name(), &checksum, direction, error],
                    )
                    .await
            }
            None => {
                let success_literal = if success { "1" } else { "0" };
                self.backend
                    .execute(
                        &format!(
                            "INSERT INTO migration_history \
                             (version, name, checksum, direction, success) \
                             VALUES (?, ?, ?, ?, {success_literal})"
                        ),
                        &[&version, migration.name(), &checksum, direction],
                    )
                    .await
            }
        };

        // A bookkeeping failure is a hard error: history must stay consistent.
        result.map(|_| ()).map_err(|err| DatabaseError::Migration {
            version,
            reason: format!("failed to record history: {err}"),
        })
    }

    /// Apply one migration: `pending -> applying -> applied | failed`.
    ///
    /// A failure inside the upgrade appends a failed history row carrying
    /// the error text and returns `Ok(false)`; it never raises, so batch
    /// application can decide whether to halt.
    pub async fn apply_migration(&self, migration: &Migration) -> Result<bool, DatabaseError> {
        self.ensure_tables().await?;
        let version = migration.version.to_string();

        tracing::info!(version = %version, name = %migration.name, "Applying migration");
        match self.backend.execute_transactional(&migration.up_sql).await {
            Ok(()) => {
                self.backend
                    .execute(
                        "INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)",
                        &[&version, migration.name(), &migration.checksum()],
                    )
                    .await?;
                self.record_history(migration, "apply", true, None).await?;
                Ok(true)
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(version = %version, error = %reason, "Migration failed");
                self.record_history(migration, "apply", false, Some(&reason))
                    .await?;
                Ok(false)
            }
        }
    }

    /// Reverse one migration: `applied -> rolling_back -> rolled_back | failed`.
    ///
    /// The pointer row is removed on success; the history of the original
    /// apply is preserved and a rollback row is appended.
    pub async fn rollback_migration(&self, migration: &Migration) -> Result<bool, DatabaseError> {
        self.ensure_tables().await?;
        let version = migration.version.to_string();

        let Some(down_sql) = migration.down_sql.as_deref() else {
            let reason = format!("Migration {version} has no down migration defined");
            tracing::warn!(version = %version, "Rollback refused: no down migration");
            self.record_history(migration, "rollback", false, Some(&reason))
                .await?;
            return Ok(false);
        };

        tracing::info!(version = %version, name = %migration.name, "Rolling back migration");
        match self.backend.execute_transactional(down_sql).await {
            Ok(()) => {
                self.backend
                    .execute(
                        "DELETE FROM schema_migrations WHERE version = ?",
                        &[&version],
                    )
                    .await?;
                self.record_history(migration, "rollback", true, None)
                    .await?;
                Ok(true)
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(version = %version, error = %reason, "Rollback failed");
                self.record_history(migration, "rollback", false, Some(&reason))
                    .await?;
                Ok(false)
            }
        }
    }

    /// Apply all pending migrations strictly in ascending version order,
    /// halting at the first failure. Idempotent once everything is applied.
    pub async fn migrate_to_latest(&self) -> Result<MigrationRunReport, DatabaseError> {
        let pending: Vec<Migration> = self.pending().await?.into_iter().cloned().collect();

        let mut applied = Vec::new();
        for migration in &pending {
            if self.apply_migration(migration).await? {
                applied.push(migration.version.to_string());
            } else {
                return Ok(MigrationRunReport {
                    success: false,
                    applied,
                    failed_version: Some(migration.version.to_string()),
                });
            }
        }

        Ok(MigrationRunReport {
            success: true,
            applied,
            failed_version: None,
        })
    }

    /// Drift detection: recompute each applied migration's checksum from its
    /// current definition and compare with the value recorded at apply time.
    /// Mismatches are reported, never auto-remediated.
    pub async fn validate_migrations(&self) -> Result<MigrationValidationReport, DatabaseError> {
        self.ensure_tables().await?;
        let rows = self
            .backend
            .query_text("SELECT version, checksum FROM schema_migrations")
            .await?;

        let mut report = MigrationValidationReport {
            is_valid: true,
            checksum_mismatches: 0,
            missing_definitions: 0,
            issues: Vec::new(),
        };

        for row in rows {
            let mut cols = row.into_iter();
            let (Some(Some(version)), Some(Some(recorded))) = (cols.next(), cols.next()) else {
                continue;
            };

            match self.find(&version) {
                Some(migration) => {
                    let current = migration.checksum();
                    if current != recorded {
                        report.checksum_mismatches += 1;
                        report.issues.push(format!(
                            "Checksum mismatch for migration {version}: recorded {recorded}, current {current}"
                        ));
                    }
                }
                None => {
                    report.missing_definitions += 1;
                    report.issues.push(format!(
                        "Applied migration {version} has no registered definition"
                    ));
                }
            }
        }

        report.is_valid = report.checksum_mismatches == 0 && report.missing_definitions == 0;
        Ok(report)
    }

    /// Aggregate report for administrative callers.
    pub async fn status(&self) -> Result<MigrationStatus, DatabaseError> {
        let current_version = self.current_version().await?.map(|v| v.to_string());
        let pending = self.pending().await?;

        Ok(MigrationStatus {
            current_version,
            pending_migrations: pending.len(),
            pending_migration_list: pending.iter().map(|m| m.name.clone()).collect(),
            validation: self.validate_migrations().await?,
        })
    }
}

/// Tracking-table DDL per dialect: autoincrement, timestamp defaults, and
/// key-length rules differ across engines.
fn tracking_table_ddl(engine: EngineKind) -> (&'static str, &'static str) {
    match engine {
        EngineKind::Sqlite => (
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
            "CREATE TABLE IF NOT EXISTS migration_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                direction TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                recorded_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        ),
        EngineKind::Postgres => (
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );",
            "CREATE TABLE IF NOT EXISTS migration_history (
                id BIGSERIAL PRIMARY KEY,
                version TEXT NOT NULL,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                direction TEXT NOT NULL,
                success SMALLINT NOT NULL,
                error TEXT,
                recorded_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );",
        ),
        EngineKind::MySql => (
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version VARCHAR(32) PRIMARY KEY,
                name VARCHAR(128) NOT NULL,
                checksum VARCHAR(64) NOT NULL,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
            "CREATE TABLE IF NOT EXISTS migration_history (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                version VARCHAR(32) NOT NULL,
                name VARCHAR(128) NOT NULL,
                checksum VARCHAR(64) NOT NULL,
                direction VARCHAR(16) NOT NULL,
                success SMALLINT NOT NULL,
                error TEXT,
                recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Migration {
        Migration::new(
            "1.0.0",
            "create_users",
            "Create the users table",
            "CREATE TABLE users (id INTEGER PRIMARY KEY)",
        )
        .unwrap()
        .with_down_sql("DROP TABLE users")
    }

    #[test]
    fn test_checksum_is_deterministic() {
        assert_eq!(sample().checksum(), sample().checksum());
        assert_eq!(sample().checksum().len(), 64); // hex sha-256
    }

    #[test]
    fn test_checksum_changes_with_identity() {
        let base = sample();

        let renamed = Migration::new(
            "1.0.0",
            "create_accounts",
            "Create the users table",
            "CREATE TABLE users (id INTEGER PRIMARY KEY)",
        )
        .unwrap()
        .with_down_sql("DROP TABLE users");
        assert_ne!(base.checksum(), renamed.checksum());

        let redescribed = Migration::new(
            "1.0.0",
            "create_users",
            "Create the users table, now with feelings",
            "CREATE TABLE users (id INTEGER PRIMARY KEY)",
        )
        .unwrap()
        .with_down_sql("DROP TABLE users");
        assert_ne!(base.checksum(), redescribed.checksum());

        let rewritten = Migration::new(
            "1.0.0",
            "create_users",
            "Create the users table",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)",
        )
        .unwrap()
        .with_down_sql("DROP TABLE users");
        assert_ne!(base.checksum(), rewritten.checksum());
    }

    #[test]
    fn test_migration_rejects_bad_version() {
        assert!(Migration::new("v1", "x", "y", "SELECT 1").is_err());
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let backend: Arc<dyn StorageBackend> = Arc::from(
            crate::backend::create_database(
                &crate::config::DatabaseConfig::for_engine(EngineKind::Sqlite)
                    .with_name(":memory:"),
            )
            .unwrap(),
        );

        let mut manager = MigrationManager::new(backend);
        manager.register(Migration::new("2.0.0", "second", "", "SELECT 2").unwrap());
        manager.register(Migration::new("1.10.0", "later_minor", "", "SELECT 1").unwrap());
        manager.register(Migration::new("1.2.0", "first", "", "SELECT 1").unwrap());

        let versions: Vec<String> = manager
            .migrations()
            .iter()
            .map(|m| m.version().to_string())
            .collect();
        assert_eq!(versions, ["1.2.0", "1.10.0", "2.0.0"]);
    }
}
