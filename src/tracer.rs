//! Query tracing for the pool backend.
//!
//! A [`Tracer`] opens one `tracing` span per statement. The connector wraps it in
//! a [`QueryTracer`] that carries the connection identity, so spans say which
//! database a statement ran against.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::Instrument;

use crate::error::PgCompatError;

/// Connection identity attached to every traced statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbInfo {
    pub user: String,
    pub host: String,
    pub port: String,
    pub db_name: String,
    pub ssl_mode: String,
}

pub trait Tracer: Send + Sync + fmt::Debug {
    /// Open the span a statement will run in.
    fn query_span(&self, info: &DbInfo, sql: &str) -> tracing::Span;
}

/// Default tracer: an `info`-level span with OpenTelemetry-style field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanTracer;

impl Tracer for SpanTracer {
    fn query_span(&self, info: &DbInfo, sql: &str) -> tracing::Span {
        tracing::info_span!(
            "postgres.query",
            db.system = "postgresql",
            db.user = %info.user,
            server.address = %info.host,
            server.port = %info.port,
            db.name = %info.db_name,
            db.sslmode = %info.ssl_mode,
            db.statement = %sql,
            otel.status_code = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    }
}

/// Tracer bound to one connection's identity.
#[derive(Debug, Clone)]
pub struct QueryTracer {
    info: DbInfo,
    tracer: Arc<dyn Tracer>,
}

impl QueryTracer {
    #[must_use]
    pub fn new(info: DbInfo, tracer: Arc<dyn Tracer>) -> Self {
        Self { info, tracer }
    }

    #[must_use]
    pub fn info(&self) -> &DbInfo {
        &self.info
    }

    /// Run `fut` inside the statement's span and record its outcome there.
    pub(crate) async fn trace<F, T>(&self, sql: &str, fut: F) -> Result<T, PgCompatError>
    where
        F: Future<Output = Result<T, PgCompatError>>,
    {
        let span = self.tracer.query_span(&self.info, sql);
        let res = fut.instrument(span.clone()).await;
        match &res {
            Ok(_) => {
                span.record("otel.status_code", "OK");
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("error", tracing::field::display(err));
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingTracer {
        spans: AtomicUsize,
    }

    impl Tracer for CountingTracer {
        fn query_span(&self, _info: &DbInfo, _sql: &str) -> tracing::Span {
            self.spans.fetch_add(1, Ordering::SeqCst);
            tracing::Span::none()
        }
    }

    #[tokio::test]
    async fn trace_opens_one_span_per_statement_and_passes_result_through() {
        let counting = Arc::new(CountingTracer::default());
        let tracer = QueryTracer::new(DbInfo::default(), counting.clone());

        let ok = tracer.trace("SELECT 1", async { Ok::<_, PgCompatError>(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let err = tracer
            .trace("SELECT boom", async { Err::<(), _>(PgCompatError::NoRows) })
            .await;
        assert!(matches!(err, Err(PgCompatError::NoRows)));
        assert_eq!(counting.spans.load(Ordering::SeqCst), 2);
    }
}
