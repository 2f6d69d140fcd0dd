//! PostgreSQL connection pool with pre-ping validation
//!
//! Connections are created on demand up to `pool_size + max_overflow` and
//! returned on drop. Before a pooled client is reused it is validated with a
//! trivial query; stale clients, and clients older than the configured
//! recycle age, are discarded and replaced.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_postgres::{Client, Config, Error as PgError, NoTls};

use stratum_core::{DatabaseError, EngineKind};

/// An idle connection waiting in the pool, tagged with its creation time so
/// recycling can retire it.
struct IdleClient {
    client: Client,
    created: Instant,
}

/// True once a client has outlived the recycle age.
fn is_expired(created: Instant, recycle: Option<Duration>) -> bool {
    match recycle {
        Some(max_age) => created.elapsed() >= max_age,
        None => false,
    }
}

/// A pooled PostgreSQL connection with RAII cleanup
pub struct PooledClient {
    client: Option<Client>,
    created: Instant,
    pool: Arc<Mutex<Vec<IdleClient>>>,
    active: Arc<RwLock<usize>>,
    max_connections: usize,
}

impl PooledClient {
    fn new(
        client: Client,
        created: Instant,
        pool: Arc<Mutex<Vec<IdleClient>>>,
        active: Arc<RwLock<usize>>,
        max_connections: usize,
    ) -> Self {
        Self {
            client: Some(client),
            created,
            pool,
            active,
            max_connections,
        }
    }

    /// Get reference to the underlying client
    pub fn client(&self) -> &Client {
        self.client.as_ref().expect("client taken before drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Return synchronously with try_lock; if the pool is busy the
            // connection is simply dropped, which is safe for tokio-postgres.
            if let Ok(mut pool) = self.pool.try_lock() {
                if pool.len() < self.max_connections {
                    pool.push(IdleClient {
                        client,
                        created: self.created,
                    });
                }
            }
            if let Ok(mut active) = self.active.try_write() {
                *active = active.saturating_sub(1);
            }
        }
    }
}

/// PostgreSQL connection pool
pub struct PostgresPool {
    pg_config: Config,
    connections: Arc<Mutex<Vec<IdleClient>>>,
    active: Arc<RwLock<usize>>,
    max_connections: usize,
    recycle: Option<Duration>,
}

impl PostgresPool {
    /// Create a pool around a prepared `tokio_postgres::Config`. No
    /// connections are opened until first acquire. Clients older than
    /// `recycle` are retired on acquire instead of being reused.
    pub fn new(pg_config: Config, max_connections: usize, recycle: Option<Duration>) -> Self {
        Self {
            pg_config,
            connections: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(RwLock::new(0)),
            max_connections,
            recycle,
        }
    }

    /// Translate driver errors without leaking connection details.
    pub(crate) fn translate_error(error: &PgError) -> DatabaseError {
        let text = error.to_string();
        let reason = if error.as_db_error().is_some() {
            text
        } else if text.contains("authentication") {
            "Authentication failed".to_string()
        } else if text.contains("timeout") {
            "Operation timed out".to_string()
        } else {
            format!("Connection failed: {text}")
        };
        DatabaseError::connection(EngineKind::Postgres, reason)
    }

    async fn validate_client(client: &Client) -> Result<(), DatabaseError> {
        client
            .query_one("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|e| Self::translate_error(&e))
    }

    async fn connect(&self) -> Result<Client, DatabaseError> {
        let (client, connection) = self
            .pg_config
            .connect(NoTls)
            .await
            .map_err(|e| Self::translate_error(&e))?;

        // The connection object drives the socket; it must be polled for the
        // client to make progress.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection task ended with error");
            }
        });

        Ok(client)
    }

    /// Acquire a validated connection from the pool.
    pub async fn acquire(&self) -> Result<PooledClient, DatabaseError> {
        loop {
            let existing = {
                let mut pool = self.connections.lock().await;
                pool.pop()
            };

            let Some(idle) = existing else { break };

            if is_expired(idle.created, self.recycle) {
                tracing::debug!("Retiring pooled PostgreSQL connection past recycle age");
                continue;
            }

            // Pre-ping before reuse
            if Self::validate_client(&idle.client).await.is_ok() {
                let mut active = self.active.write().await;
                *active += 1;
                return Ok(PooledClient::new(
                    idle.client,
                    idle.created,
                    Arc::clone(&self.connections),
                    Arc::clone(&self.active),
                    self.max_connections,
                ));
            }
            tracing::warn!("Discarding stale pooled PostgreSQL connection");
        }

        {
            let active = self.active.read().await;
            if *active >= self.max_connections {
                return Err(DatabaseError::connection(
                    EngineKind::Postgres,
                    format!(
                        "Connection pool exhausted: {} active connections (max: {})",
                        *active, self.max_connections
                    ),
                ));
            }
        }

        let client = self.connect().await?;
        Self::validate_client(&client).await?;

        let mut active = self.active.write().await;
        *active += 1;

        Ok(PooledClient::new(
            client,
            Instant::now(),
            Arc::clone(&self.connections),
            Arc::clone(&self.active),
            self.max_connections,
        ))
    }

    /// Drop every pooled connection. Used by backend close/reset.
    pub async fn drain(&self) {
        let mut pool = self.connections.lock().await;
        pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycle_age_check() {
        let created = Instant::now();

        // No recycle configured: clients never age out.
        assert!(!is_expired(created, None));

        // Zero age retires every client immediately.
        assert!(is_expired(created, Some(Duration::ZERO)));

        // A generous age keeps a fresh client.
        assert!(!is_expired(created, Some(Duration::from_secs(3600))));
    }
}
