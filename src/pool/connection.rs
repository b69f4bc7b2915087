use std::sync::Arc;

use bb8::PooledConnection;
use tracing::debug;
use deadpool_postgres::Object as PostgresObject;
use tokio_postgres::Client;

use super::standard::PgManager;
use super::types::Backend;
use crate::error::PgCompatError;
use crate::postgres::transaction::TransactCompat;

/// A connection a statement runs on: checked out of either backend, or the
/// connection pinned by an open transaction.
pub enum Conn {
    Pool(PostgresObject),
    Standard(PooledConnection<'static, PgManager>),
    Tx(Arc<TransactCompat>),
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("Conn::Pool"),
            Self::Standard(_) => f.write_str("Conn::Standard"),
            Self::Tx(_) => f.write_str("Conn::Tx"),
        }
    }
}

impl Conn {
    /// The `tokio_postgres` client behind this connection.
    ///
    /// # Errors
    /// Returns `PgCompatError::TransactionFinished` for a transaction that was
    /// already committed or rolled back.
    pub fn client(&self) -> Result<&Client, PgCompatError> {
        match self {
            Conn::Pool(obj) => {
                let client: &Client = obj;
                Ok(client)
            }
            Conn::Standard(conn) => {
                let client: &Client = conn;
                Ok(client)
            }
            Conn::Tx(tx) => tx.client(),
        }
    }
}

impl Backend {
    /// Check out a connection.
    ///
    /// On the standard backend an empty pool connects in the caller's task
    /// first, so a refused connect returns the driver's error at once
    /// instead of a checkout timeout.
    ///
    /// # Errors
    /// Returns the pool's checkout error or the driver's connect error.
    pub async fn checkout(&self) -> Result<Conn, PgCompatError> {
        match self {
            Backend::Pool(pool) => Ok(Conn::Pool(pool.get().await?)),
            Backend::Standard { pool, .. } => {
                if pool.state().connections == 0 {
                    let client = pool.dedicated_connection().await?;
                    if pool.add(client).is_err() {
                        debug!("standard pool refused the seeded connection");
                    }
                }
                Ok(Conn::Standard(pool.get_owned().await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pool::tls::Tls;

    #[tokio::test]
    async fn standard_checkout_returns_the_connect_error() {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host("127.0.0.1")
            .port(1)
            .user("nobody")
            .connect_timeout(Duration::from_secs(2));
        let manager = PgManager::new(cfg, Tls::Plain);
        let shutdown = manager.shutdown_handle();
        let backend = Backend::Standard {
            pool: manager.build_pool(2),
            shutdown,
        };

        let err = tokio::time::timeout(Duration::from_secs(10), backend.checkout())
            .await
            .expect("checkout should fail before the pool timeout")
            .unwrap_err();
        assert!(matches!(err, PgCompatError::PostgresError(_)), "{err:?}");

        backend.close();
        assert!(backend.is_closed());
        assert!(matches!(backend.checkout().await, Err(PgCompatError::Closed)));
    }
}
