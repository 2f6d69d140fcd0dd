//! # Error Types
//!
//! The shared error taxonomy for the stratum database layer. Low-level
//! driver errors are translated into these variants at the boundary of each
//! public operation; callers above the subsystem never see raw driver
//! exceptions.
//!
//! Construction-time problems are always fatal ([`DatabaseError::Configuration`]
//! and friends). Retryable connectivity problems surface as
//! [`DatabaseError::Connection`] internally, but the public probe operations
//! report them as soft outcomes (boolean plus message) rather than errors.

use crate::types::EngineKind;

/// Main error type for stratum database operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    /// Configuration is missing required fields or failed validation.
    /// Fatal at construction time, never retried.
    #[error("Database configuration error: {reason}")]
    Configuration { reason: String },

    /// Configuration did not name an engine type at all.
    #[error("Database configuration error: missing database type")]
    MissingEngineType,

    /// Configuration named an engine type outside the supported set.
    #[error("Unsupported database type: {provided}")]
    UnsupportedEngineType { provided: String },

    /// A connection string could not be parsed.
    #[error("Invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },

    /// A connection-level failure, translated from the engine driver.
    #[error("Database connection failed ({engine}): {reason}")]
    Connection { engine: EngineKind, reason: String },

    /// A failure inside a migration upgrade or downgrade operation.
    #[error("Migration {version} failed: {reason}")]
    Migration { version: String, reason: String },

    /// The database context was read before initialization or after reset.
    #[error("Database not initialized. Call initialize() first.")]
    NotInitialized,
}

impl DatabaseError {
    /// Shorthand for a configuration error with a formatted reason.
    pub fn configuration(reason: impl Into<String>) -> Self {
        DatabaseError::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for a connection error against one engine.
    pub fn connection(engine: EngineKind, reason: impl Into<String>) -> Self {
        DatabaseError::Connection {
            engine,
            reason: reason.into(),
        }
    }

    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Connection { .. })
    }
}

impl From<crate::types::EngineKindError> for DatabaseError {
    fn from(err: crate::types::EngineKindError) -> Self {
        match err {
            crate::types::EngineKindError::Unsupported { provided } => {
                DatabaseError::UnsupportedEngineType { provided }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DatabaseError::configuration("host is required");
        assert_eq!(
            err.to_string(),
            "Database configuration error: host is required"
        );

        let err = DatabaseError::connection(EngineKind::Postgres, "refused");
        assert_eq!(
            err.to_string(),
            "Database connection failed (postgresql): refused"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DatabaseError::connection(EngineKind::MySql, "timeout").is_transient());
        assert!(!DatabaseError::MissingEngineType.is_transient());
        assert!(!DatabaseError::configuration("bad").is_transient());
    }

    #[test]
    fn test_engine_kind_error_conversion() {
        let err: DatabaseError = "oracle".parse::<EngineKind>().unwrap_err().into();
        assert!(matches!(
            err,
            DatabaseError::UnsupportedEngineType { ref provided } if provided == "oracle"
        ));
    }
}
