//! The `Postgres` facade.
//!
//! - config: connection settings, validation and DSN construction
//! - connect: backend selection
//! - executor: queries, execution and search path handling
//! - statement: prepared statements
//! - transaction: `transact` and isolation levels
//! - lifecycle: close and schema forks
//! - params / query: value binding and row wrappers

pub mod config;
mod connect;
mod executor;
mod lifecycle;
pub mod params;
pub mod query;
pub mod statement;
pub mod transaction;

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::{Mutex, OnceCell};

use crate::error::PgCompatError;
use crate::pool::tls::Tls;
use crate::pool::{Backend, Conn, PgManager};
use crate::tracer::QueryTracer;
use crate::types::Driver;

pub use config::ConnectConfig;
pub use params::Params;
pub use query::{ExecResultCompat, Row, RowCompat, RowsCompat};
pub use statement::StmtCompat;
pub use transaction::{IsolationLevel, TransactCompat, Transaction};

/// Client over either the pool backend or the standard backend.
///
/// Cloning is cheap and every clone shares the same backend.
#[derive(Clone)]
pub struct Postgres {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: ConnectConfig,
    pg_config: tokio_postgres::Config,
    tls: Tls,
    pub(crate) backend: Backend,
    search_path: RwLock<String>,
    closed: Mutex<bool>,
    tx: Option<Arc<TransactCompat>>,
    origin: Option<Origin>,
    clone_once: Arc<OnceCell<()>>,
    query_tracer: Option<QueryTracer>,
}

/// The client a fork was made from, and the schema the fork owns.
pub(crate) struct Origin {
    conn: Weak<Inner>,
    config: ConnectConfig,
    schema: String,
}

impl std::fmt::Debug for Postgres {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Postgres")
            .field("config", &self.inner.config)
            .field("backend", &self.inner.backend)
            .field("search_path", &self.stored_search_path())
            .field("in_transaction", &self.in_transaction())
            .field("forked", &self.inner.origin.is_some())
            .finish_non_exhaustive()
    }
}

impl Postgres {
    /// True for the client handed to a [`Postgres::transact`] callback.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.tx.is_some()
    }

    /// Copy of the validated configuration.
    #[must_use]
    pub fn config(&self) -> ConnectConfig {
        self.inner.config.clone()
    }

    #[must_use]
    pub fn backend_kind(&self) -> Driver {
        self.inner.backend.driver()
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    /// Current search path, one entry per schema.
    #[must_use]
    pub fn search_path(&self) -> Vec<String> {
        self.stored_search_path()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// A bb8 pool of standard clients for code that wants its own handle.
    ///
    /// On the standard backend this is the client's own pool. On the pool
    /// backend a new pool is built from the same connection settings.
    #[must_use]
    pub fn standard_pool(&self) -> bb8::Pool<PgManager> {
        match &self.inner.backend {
            Backend::Standard { pool, .. } => pool.clone(),
            Backend::Pool(_) => {
                let max = u32::try_from(self.inner.config.max_open_conns).unwrap_or(u32::MAX);
                PgManager::new(self.inner.pg_config.clone(), self.inner.tls.clone()).build_pool(max)
            }
        }
    }

    #[must_use]
    pub async fn is_closed(&self) -> bool {
        *self.inner.closed.lock().await
    }

    pub(crate) fn stored_search_path(&self) -> String {
        self.inner
            .search_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn store_search_path(&self, path: &str) {
        let mut guard = self
            .inner
            .search_path
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = path.to_string();
    }

    /// The transaction's connection, or a fresh checkout.
    pub(crate) async fn conn(&self) -> Result<Conn, PgCompatError> {
        match &self.inner.tx {
            Some(tx) => Ok(Conn::Tx(Arc::clone(tx))),
            None if self.inner.backend.is_closed() => Err(PgCompatError::Closed),
            None => self.inner.backend.checkout().await,
        }
    }

    /// Run `fut` inside the query tracer's span when one is attached.
    pub(crate) async fn traced<F, T>(&self, sql: &str, fut: F) -> Result<T, PgCompatError>
    where
        F: Future<Output = Result<T, PgCompatError>>,
    {
        match &self.inner.query_tracer {
            Some(tracer) => tracer.trace(sql, fut).await,
            None => fut.await,
        }
    }

    pub(crate) fn query_tracer(&self) -> Option<QueryTracer> {
        self.inner.query_tracer.clone()
    }

    /// Client sharing this one's backend and state, bound to `tx`.
    pub(crate) async fn with_transaction(&self, tx: Arc<TransactCompat>) -> Postgres {
        let closed = *self.inner.closed.lock().await;
        Postgres {
            inner: Arc::new(Inner {
                config: self.inner.config.clone(),
                pg_config: self.inner.pg_config.clone(),
                tls: self.inner.tls.clone(),
                backend: self.inner.backend.clone(),
                search_path: RwLock::new(self.stored_search_path()),
                closed: Mutex::new(closed),
                tx: Some(tx),
                origin: None,
                clone_once: Arc::clone(&self.inner.clone_once),
                query_tracer: self.inner.query_tracer.clone(),
            }),
        }
    }
}
