//! # stratum-core
//!
//! Validated configuration primitives and the shared error taxonomy for the
//! stratum database layer.
//!
//! # Design Philosophy
//!
//! - **Parse-don't-validate**: types enforce invariants at construction time
//! - **Single source of truth**: no duplicate validation logic across backends
//! - **Exhaustive engines**: [`EngineKind`] is a closed enum, so every engine
//!   dispatch site is checked at compile time
//!
//! # Example
//!
//! ```rust
//! use stratum_core::{EngineKind, PoolSize};
//!
//! let engine: EngineKind = "mariadb".parse().expect("mariadb aliases mysql");
//! assert_eq!(engine, EngineKind::MySql);
//!
//! let pool = PoolSize::new(20).expect("20 is valid");
//! assert_eq!(pool.get(), 20);
//! ```

pub mod error;
pub mod types;

pub use error::DatabaseError;
pub use types::{
    DatabaseName, DatabaseNameError, EngineKind, EngineKindError, HostAddress, HostAddressError, MigrationVersion,
    MigrationVersionError, PoolSize, PoolSizeError, SslMode, SslModeError,
};
