//! # Stratum DB
//!
//! Multi-engine database abstraction and migration subsystem.
//!
//! One configuration model, one polymorphic [`StorageBackend`] contract,
//! and one migration framework across SQLite, PostgreSQL, and
//! MySQL/MariaDB. Engines are feature-gated; the factory refuses engines
//! compiled out of the build.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stratum_db::{Database, DatabaseConfig, Migration};
//! use stratum_core::EngineKind;
//!
//! # async fn run() -> Result<(), stratum_core::DatabaseError> {
//! let config = DatabaseConfig::for_engine(EngineKind::Sqlite).with_name("app.db");
//!
//! let migration = Migration::new(
//!     "1.0.0",
//!     "create_users",
//!     "Create the users table",
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)",
//! )?
//! .with_down_sql("DROP TABLE users");
//!
//! let db = Database::connect(&config, [migration])?;
//! db.validate_startup_connection().await?;
//! let report = db.run_migrations().await?;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: connection configuration, URL parsing, normalization,
//!   validation
//! - [`backend`]: the [`StorageBackend`] contract and [`create_database`]
//!   factory
//! - [`manager`]: retrying connectivity probes, health snapshots, and the
//!   [`DatabaseContext`] lifecycle holder
//! - [`migrations`]: versioned, checksummed migrations with rollback and
//!   append-only history
//! - [`database`]: the [`Database`] facade tying the layers together

pub mod backend;
pub mod config;
pub mod database;
pub mod manager;
pub mod migrations;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{DatabaseInfo, ModelSchema, StorageBackend, create_database};
pub use config::{DatabaseConfig, ValidationReport};
pub use database::Database;
pub use manager::{ConnectionManager, ConnectionProbe, DatabaseContext, HealthStatus};
pub use migrations::{
    Migration, MigrationManager, MigrationRunReport, MigrationStatus, MigrationValidationReport,
};

pub use stratum_core::{DatabaseError, EngineKind, MigrationVersion};
