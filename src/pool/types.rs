use bb8::Pool as Bb8Pool;
use deadpool_postgres::Pool as DeadpoolPostgresPool;

use super::standard::{PgManager, ShutdownHandle};
use crate::types::Driver;

/// The live backend of a client. Exactly one variant is ever populated.
#[derive(Clone)]
pub enum Backend {
    /// `deadpool-postgres` pool
    Pool(DeadpoolPostgresPool),
    /// bb8 pool of standard `tokio_postgres` clients
    Standard {
        pool: Bb8Pool<PgManager>,
        shutdown: ShutdownHandle,
    },
}

// Manual Debug implementation to keep the pool internals out of logs
impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool(pool) => f.debug_tuple("Pool").field(&pool.status()).finish(),
            Self::Standard { pool, .. } => f
                .debug_tuple("Standard")
                .field(&pool.state().connections)
                .finish(),
        }
    }
}

impl Backend {
    #[must_use]
    pub fn driver(&self) -> Driver {
        match self {
            Backend::Pool(_) => Driver::Deadpool,
            Backend::Standard { .. } => Driver::Postgres,
        }
    }

    /// Release the backend. The deadpool pool closes at once; the standard
    /// backend stops handing out connections and drops each one as it returns.
    pub fn close(&self) {
        match self {
            Backend::Pool(pool) => pool.close(),
            Backend::Standard { shutdown, .. } => shutdown.shut_down(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Backend::Pool(pool) => pool.is_closed(),
            Backend::Standard { shutdown, .. } => shutdown.is_shut_down(),
        }
    }
}
