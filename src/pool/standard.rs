use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bb8::{ErrorSink, ManageConnection, Pool};
use tokio_postgres::Client;

use super::tls::Tls;
use crate::error::PgCompatError;

/// bb8 manager for the standard backend's `tokio_postgres` clients.
#[derive(Debug)]
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
    pub(crate) tls: Tls,
    shutdown: ShutdownHandle,
}

/// Flag shared between a manager and its owner. Once raised, the manager
/// refuses new connections and reports pooled ones as broken.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shut_down(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl PgManager {
    pub(crate) fn new(config: tokio_postgres::Config, tls: Tls) -> Self {
        Self {
            config,
            tls,
            shutdown: ShutdownHandle::default(),
        }
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Build a pool from this manager without opening any connection yet.
    ///
    /// Failed connects are not retried; background failures are logged.
    #[must_use]
    pub fn build_pool(self, max_size: u32) -> Pool<PgManager> {
        Pool::builder()
            .max_size(max_size.max(1))
            .test_on_check_out(true)
            .retry_connection(false)
            .error_sink(Box::new(LogErrorSink))
            .build_unchecked(self)
    }
}

/// Logs connection errors raised inside the bb8 pool's own tasks.
#[derive(Debug, Clone, Copy)]
struct LogErrorSink;

impl ErrorSink<PgCompatError> for LogErrorSink {
    fn sink(&self, error: PgCompatError) {
        tracing::warn!(error = %error, "standard backend connection error");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<PgCompatError>> {
        Box::new(*self)
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = PgCompatError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        let tls = self.tls.clone();
        let shutdown = self.shutdown.clone();
        async move {
            if shutdown.is_shut_down() {
                return Err(PgCompatError::Closed);
            }
            tracing::debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "standard backend connect"
            );
            tls.connect(&cfg).await
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let shut_down = self.shutdown.is_shut_down();
        async move {
            if shut_down {
                return Err(PgCompatError::Closed);
            }
            conn.simple_query("").await?;
            Ok(())
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.shutdown.is_shut_down() || conn.is_closed()
    }
}
