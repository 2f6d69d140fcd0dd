//! Validated database configuration types
//!
//! Shared, parse-don't-validate types used by every backend: pool sizing,
//! database names, host addresses, engine kinds, SSL modes, and migration
//! versions. Each type rejects invalid values at construction so the backends
//! never have to re-check them.

use serde::{Deserialize, Serialize};

/// Connection pool size constrained to valid range (1-100)
///
/// Pool sizes are limited to prevent resource exhaustion:
/// - Minimum of 1 ensures at least one connection is available
/// - Maximum of 100 prevents excessive resource consumption
///
/// # Examples
///
/// ```rust
/// use stratum_core::PoolSize;
///
/// let pool = PoolSize::new(20).unwrap();
/// assert_eq!(pool.get(), 20);
///
/// assert!(PoolSize::new(0).is_none());
/// assert!(PoolSize::new(101).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct PoolSize(u8);

impl PoolSize {
    /// Minimum allowed pool size
    pub const MIN: u8 = 1;
    /// Maximum allowed pool size
    pub const MAX: u8 = 100;

    /// Create a pool size (1-100), `None` if out of range.
    pub const fn new(size: u8) -> Option<Self> {
        if size < Self::MIN || size > Self::MAX {
            None
        } else {
            Some(Self(size))
        }
    }

    /// Create a pool size from usize (for compatibility with loosely-typed config).
    pub fn from_usize(size: usize) -> Option<Self> {
        if size < Self::MIN as usize || size > Self::MAX as usize {
            None
        } else {
            Some(Self(size as u8))
        }
    }

    /// Get the pool size as a usize
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Default pool size for production use (10 connections)
    pub const fn default_size() -> Self {
        Self(10)
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::default_size()
    }
}

impl TryFrom<usize> for PoolSize {
    type Error = PoolSizeError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::from_usize(size).ok_or(PoolSizeError::OutOfRange { size })
    }
}

impl From<PoolSize> for usize {
    fn from(pool: PoolSize) -> Self {
        pool.get()
    }
}

impl std::fmt::Display for PoolSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating a PoolSize
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolSizeError {
    /// Pool size is out of the valid range (1-100)
    #[error("Pool size {size} is out of range (must be {}-{})", PoolSize::MIN, PoolSize::MAX)]
    OutOfRange { size: usize },
}

/// Database name with validation
///
/// Database names are validated to:
/// - Not be empty
/// - Not exceed maximum length (63 chars for PostgreSQL compatibility)
/// - Contain only alphanumeric characters, underscores, and hyphens
/// - Not start with a hyphen
///
/// The SQLite pseudo-name `:memory:` is admitted as a special case so the
/// in-memory mode can flow through the same configuration path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Maximum length for database names (PostgreSQL limit)
    pub const MAX_LENGTH: usize = 63;

    /// SQLite in-memory pseudo-name
    pub const IN_MEMORY: &'static str = ":memory:";

    /// Create a database name with validation
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();

        if name == Self::IN_MEMORY {
            return Some(Self(name));
        }

        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return None;
        }

        if name.starts_with('-') {
            return None;
        }

        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return None;
        }

        Some(Self(name))
    }

    /// Get the database name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the SQLite `:memory:` pseudo-name.
    pub fn is_in_memory(&self) -> bool {
        self.0 == Self::IN_MEMORY
    }
}

impl TryFrom<String> for DatabaseName {
    type Error = DatabaseNameError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name.clone()).ok_or(DatabaseNameError::Invalid { name })
    }
}

impl From<DatabaseName> for String {
    fn from(name: DatabaseName) -> Self {
        name.0
    }
}

impl std::fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DatabaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating a DatabaseName
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseNameError {
    /// Database name is invalid
    #[error("Invalid database name: {name}")]
    Invalid { name: String },
}

/// Host address with validation
///
/// Host addresses can be IPv4/IPv6 addresses or hostnames. Validation
/// prevents path traversal sequences, empty hostnames, and hostnames past
/// the DNS length limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAddress(String);

impl HostAddress {
    /// Maximum length for host addresses (DNS hostname limit)
    pub const MAX_LENGTH: usize = 253;

    /// Create a host address with validation
    pub fn new(host: impl Into<String>) -> Option<Self> {
        let host = host.into();

        if host.is_empty() || host.len() > Self::MAX_LENGTH {
            return None;
        }

        if host.contains("..") {
            return None;
        }

        // Reject consecutive slashes, but allow IPv6 shorthand
        if host.contains("//") && !host.starts_with("::") {
            return None;
        }

        Some(Self(host))
    }

    /// Get the host address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HostAddress {
    type Error = HostAddressError;

    fn try_from(host: String) -> Result<Self, Self::Error> {
        Self::new(host.clone()).ok_or(HostAddressError::Invalid { host })
    }
}

impl From<HostAddress> for String {
    fn from(host: HostAddress) -> Self {
        host.0
    }
}

impl std::fmt::Display for HostAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for HostAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating a HostAddress
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostAddressError {
    /// Host address is invalid
    #[error("Invalid host address: {host}")]
    Invalid { host: String },
}

/// The supported database engine families.
///
/// MariaDB is served by the MySQL implementation (shared code path), so it
/// maps to [`EngineKind::MySql`] rather than getting its own variant. Every
/// dispatch over engines is an exhaustive match on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    Postgres,
    MySql,
}

impl EngineKind {
    /// All recognized engine kinds, in declaration order.
    pub const ALL: [EngineKind; 3] = [EngineKind::Sqlite, EngineKind::Postgres, EngineKind::MySql];

    /// Canonical connection-string scheme for this engine.
    pub const fn scheme(self) -> &'static str {
        match self {
            EngineKind::Sqlite => "sqlite",
            EngineKind::Postgres => "postgresql",
            EngineKind::MySql => "mysql",
        }
    }

    /// Default TCP port, `None` for in-process engines.
    pub const fn default_port(self) -> Option<u16> {
        match self {
            EngineKind::Sqlite => None,
            EngineKind::Postgres => Some(5432),
            EngineKind::MySql => Some(3306),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = EngineKindError;

    /// Parse an engine type string, accepting the common aliases:
    /// `postgres` for PostgreSQL, `mariadb` and driver-suffixed forms such
    /// as `mysql+pymysql` for the MySQL family.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "sqlite" => Ok(EngineKind::Sqlite),
            "postgresql" | "postgres" => Ok(EngineKind::Postgres),
            "mysql" | "mariadb" => Ok(EngineKind::MySql),
            other if other.starts_with("mysql+") => Ok(EngineKind::MySql),
            other if other.starts_with("mariadb+") => Ok(EngineKind::MySql),
            _ => Err(EngineKindError::Unsupported {
                provided: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Sqlite => write!(f, "sqlite"),
            EngineKind::Postgres => write!(f, "postgresql"),
            EngineKind::MySql => write!(f, "mysql"),
        }
    }
}

/// Errors that can occur when parsing an EngineKind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineKindError {
    /// Engine type string is not recognized
    #[error("Unsupported database type: {provided}")]
    Unsupported { provided: String },
}

/// SSL/TLS negotiation mode, restricted to the PostgreSQL-style allow-list.
///
/// Anything outside this set is a validation error, never silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// The full allow-list, used in validation error messages.
    pub const ALLOWED: [&'static str; 6] = [
        "disable",
        "allow",
        "prefer",
        "require",
        "verify-ca",
        "verify-full",
    ];

    /// Wire representation used in connection strings.
    pub const fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = SslModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(SslModeError::Invalid {
                provided: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur when parsing an SslMode
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SslModeError {
    /// SSL mode is outside the allow-list
    #[error("Invalid ssl_mode '{provided}' (allowed: {})", SslMode::ALLOWED.join(", "))]
    Invalid { provided: String },
}

/// Dotted semantic migration version (`major.minor.patch`).
///
/// Ordering is numeric per component, so `1.10.0` sorts after `1.2.0` where
/// a lexicographic comparison would get it wrong. Minor and patch may be
/// omitted on input; `Display` always canonicalizes to three components.
///
/// ```rust
/// use stratum_core::MigrationVersion;
///
/// let a: MigrationVersion = "1.2.0".parse().unwrap();
/// let b: MigrationVersion = "1.10".parse().unwrap();
/// assert!(a < b);
/// assert_eq!(b.to_string(), "1.10.0");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationVersion {
    major: u64,
    minor: u64,
    patch: u64,
}

impl MigrationVersion {
    /// Create a version from numeric components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::str::FromStr for MigrationVersion {
    type Err = MigrationVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MigrationVersionError::Invalid {
            version: s.to_string(),
        };

        let mut parts = s.trim().split('.');
        let mut component = |required: bool| -> Result<u64, MigrationVersionError> {
            match parts.next() {
                Some(p) => p.parse::<u64>().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };

        let major = component(true)?;
        let minor = component(false)?;
        let patch = component(false)?;

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl std::fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for MigrationVersion {
    type Error = MigrationVersionError;

    fn try_from(version: String) -> Result<Self, Self::Error> {
        version.parse()
    }
}

impl From<MigrationVersion> for String {
    fn from(version: MigrationVersion) -> Self {
        version.to_string()
    }
}

/// Errors that can occur when parsing a MigrationVersion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationVersionError {
    /// Version string is not a dotted numeric version
    #[error("Invalid migration version: {version}")]
    Invalid { version: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_validation() {
        assert!(PoolSize::new(0).is_none());
        assert!(PoolSize::new(1).is_some());
        assert!(PoolSize::new(50).is_some());
        assert!(PoolSize::new(100).is_some());
        assert!(PoolSize::new(101).is_none());
        assert_eq!(PoolSize::default_size().get(), 10);
    }

    #[test]
    fn test_database_name_validation() {
        assert!(DatabaseName::new("my_database").is_some());
        assert!(DatabaseName::new("db-123").is_some());
        assert!(DatabaseName::new("app.db").is_some());

        assert!(DatabaseName::new("").is_none());
        assert!(DatabaseName::new("-invalid").is_none());
        assert!(DatabaseName::new("has spaces").is_none());
        assert!(DatabaseName::new("a".repeat(64)).is_none());
    }

    #[test]
    fn test_database_name_in_memory() {
        let name = DatabaseName::new(":memory:").unwrap();
        assert!(name.is_in_memory());
        assert!(!DatabaseName::new("real.db").unwrap().is_in_memory());
    }

    #[test]
    fn test_host_address_validation() {
        assert!(HostAddress::new("localhost").is_some());
        assert!(HostAddress::new("127.0.0.1").is_some());
        assert!(HostAddress::new("db.example.com").is_some());
        assert!(HostAddress::new("::1").is_some());

        assert!(HostAddress::new("").is_none());
        assert!(HostAddress::new("../etc").is_none());
        assert!(HostAddress::new("host/../path").is_none());
    }

    #[test]
    fn test_engine_kind_aliases() {
        let cases = [
            ("sqlite", EngineKind::Sqlite),
            ("postgresql", EngineKind::Postgres),
            ("postgres", EngineKind::Postgres),
            ("POSTGRES", EngineKind::Postgres),
            ("mysql", EngineKind::MySql),
            ("mariadb", EngineKind::MySql),
            ("mysql+pymysql", EngineKind::MySql),
            ("mysql+mysqldb", EngineKind::MySql),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<EngineKind>().unwrap(), expected, "{input}");
        }

        assert!("oracle".parse::<EngineKind>().is_err());
        assert!("".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_engine_kind_defaults() {
        assert_eq!(EngineKind::Postgres.default_port(), Some(5432));
        assert_eq!(EngineKind::MySql.default_port(), Some(3306));
        assert_eq!(EngineKind::Sqlite.default_port(), None);
    }

    #[test]
    fn test_ssl_mode_allow_list() {
        for allowed in SslMode::ALLOWED {
            let mode: SslMode = allowed.parse().unwrap();
            assert_eq!(mode.as_str(), allowed);
        }
        assert!("required".parse::<SslMode>().is_err());
        assert!("tls".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_migration_version_ordering() {
        let v1: MigrationVersion = "1.0.0".parse().unwrap();
        let v2: MigrationVersion = "1.2.0".parse().unwrap();
        let v10: MigrationVersion = "1.10.0".parse().unwrap();
        let v2_major: MigrationVersion = "2.0.0".parse().unwrap();

        assert!(v1 < v2);
        assert!(v2 < v10); // numeric, not lexicographic
        assert!(v10 < v2_major);
    }

    #[test]
    fn test_migration_version_parsing() {
        assert_eq!(
            "1.2".parse::<MigrationVersion>().unwrap(),
            MigrationVersion::new(1, 2, 0)
        );
        assert_eq!(
            "3".parse::<MigrationVersion>().unwrap(),
            MigrationVersion::new(3, 0, 0)
        );
        assert_eq!(
            "1.2.3".parse::<MigrationVersion>().unwrap().to_string(),
            "1.2.3"
        );

        assert!("".parse::<MigrationVersion>().is_err());
        assert!("1.2.3.4".parse::<MigrationVersion>().is_err());
        assert!("v1.2.3".parse::<MigrationVersion>().is_err());
        assert!("1.x".parse::<MigrationVersion>().is_err());
    }

    #[test]
    fn test_pool_size_serde() {
        let pool = PoolSize::new(20).unwrap();
        let json = serde_json::to_string(&pool).unwrap();
        assert_eq!(json, "20");

        let deserialized: PoolSize = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, pool);
    }

    #[test]
    fn test_migration_version_serde() {
        let version = MigrationVersion::new(1, 4, 2);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"1.4.2\"");

        let deserialized: MigrationVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, version);
    }
}
