use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::config::ConnectConfig;
use super::{Inner, Origin, Postgres};
use crate::context::Context;
use crate::dsn::pg_config_from_dsn;
use crate::error::PgCompatError;
use crate::pool::tls::Tls;
use crate::pool::{Backend, PgManager};
use crate::tracer::{DbInfo, QueryTracer};
use crate::types::Driver;

const DEFAULT_SEARCH_PATH: &str = "public";

impl Postgres {
    /// Validate `config` and open the backend it names.
    ///
    /// Pools open their connections on first use, so a reachable server is
    /// not required here.
    ///
    /// ```rust,no_run
    /// use pg_compat_middleware::prelude::*;
    ///
    /// # async fn demo() -> Result<(), PgCompatError> {
    /// let mut cfg = ConnectConfig::new(Driver::Deadpool);
    /// cfg.username = "app".into();
    /// cfg.password = "secret".into();
    /// cfg.host = "localhost".into();
    /// cfg.port = "5432".into();
    /// cfg.dbname = "app".into();
    ///
    /// let ctx = Context::background();
    /// let db = Postgres::connect(&ctx, cfg).await?;
    /// db.ping(&ctx).await?;
    /// db.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns the validation error, `DsnError` for settings that do not form
    /// a connection string, or `ConnectionError` if the backend cannot be built.
    pub async fn connect(ctx: &Context, config: ConnectConfig) -> Result<Postgres, PgCompatError> {
        Self::open(ctx, config, None, Arc::new(OnceCell::new())).await
    }

    pub(crate) async fn open(
        ctx: &Context,
        mut config: ConnectConfig,
        origin: Option<Origin>,
        clone_once: Arc<OnceCell<()>>,
    ) -> Result<Postgres, PgCompatError> {
        config.validate()?;
        let (_, attrs) = config.dsn()?;
        let pg_config = pg_config_from_dsn(&attrs)?;
        let tls = Tls::for_ssl_mode(&config.ssl_mode)?;
        let driver = config.driver_kind()?;

        let backend = ctx
            .run(async { build_backend(driver, &config, &pg_config, &tls) })
            .await?;

        let query_tracer = match (&backend, &config.tracer) {
            (Backend::Pool(_), Some(tracer)) => Some(QueryTracer::new(
                DbInfo {
                    user: config.username.clone(),
                    host: config.host.clone(),
                    port: config.port.clone(),
                    db_name: config.dbname.clone(),
                    ssl_mode: config.ssl_mode.clone(),
                },
                Arc::clone(tracer),
            )),
            _ => None,
        };

        let search_path = if config.search_path.is_empty() {
            DEFAULT_SEARCH_PATH.to_string()
        } else {
            config.search_path.clone()
        };

        debug!(
            driver = %driver,
            host = %config.host,
            port = %config.port,
            dbname = %config.dbname,
            search_path = %search_path,
            forked = origin.is_some(),
            "postgres client opened"
        );

        Ok(Postgres {
            inner: Arc::new(Inner {
                config,
                pg_config,
                tls,
                backend,
                search_path: RwLock::new(search_path),
                closed: Mutex::new(false),
                tx: None,
                origin,
                clone_once,
                query_tracer,
            }),
        })
    }
}

fn build_backend(
    driver: Driver,
    config: &ConnectConfig,
    pg_config: &tokio_postgres::Config,
    tls: &Tls,
) -> Result<Backend, PgCompatError> {
    match driver {
        Driver::Deadpool => {
            let manager = tls.deadpool_manager(pg_config.clone());
            let pool = deadpool_postgres::Pool::builder(manager)
                .max_size(config.max_open_conns)
                .build()
                .map_err(|e| {
                    PgCompatError::ConnectionError(format!("Failed to create Postgres pool: {e}"))
                })?;
            Ok(Backend::Pool(pool))
        }
        Driver::Postgres | Driver::Libpq => {
            let manager = PgManager::new(pg_config.clone(), tls.clone());
            let shutdown = manager.shutdown_handle();
            let max = u32::try_from(config.max_open_conns).unwrap_or(u32::MAX);
            Ok(Backend::Standard {
                pool: manager.build_pool(max),
                shutdown,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::SpanTracer;

    fn unreachable_config(driver: Driver) -> ConnectConfig {
        ConnectConfig {
            username: "nobody".into(),
            password: "nothing".into(),
            host: "127.0.0.1".into(),
            port: "1".into(),
            dbname: "none".into(),
            ..ConnectConfig::new(driver)
        }
    }

    #[tokio::test]
    async fn connect_is_lazy_on_both_backends() {
        for driver in [Driver::Deadpool, Driver::Postgres, Driver::Libpq] {
            let ctx = Context::background();
            let db = Postgres::connect(&ctx, unreachable_config(driver))
                .await
                .unwrap();

            assert!(!db.in_transaction());
            assert_eq!(db.search_path(), vec!["public".to_string()]);
            assert_eq!(db.backend_kind(), driver.canonical());

            let cfg = db.config();
            assert_eq!(cfg.driver, driver.canonical().as_str());
            assert_eq!(cfg.ssl_mode, "disable");
            assert_eq!(cfg.max_open_conns, 10);

            db.close().await.unwrap();
            db.close().await.unwrap();
            assert!(db.is_closed().await);
            assert!(db.backend().is_closed());
        }
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let ctx = Context::background();
        let mut cfg = unreachable_config(Driver::Deadpool);
        cfg.password.clear();
        let err = Postgres::connect(&ctx, cfg).await.unwrap_err();
        assert_eq!(err.to_string(), "postgres: password cannot be empty");

        let mut cfg = unreachable_config(Driver::Deadpool);
        cfg.port = "not-a-port".into();
        assert!(Postgres::connect(&ctx, cfg).await.is_err());
    }

    #[tokio::test]
    async fn connect_honours_cancelled_context() {
        let ctx = Context::background().with_cancel();
        ctx.cancel();
        let err = Postgres::connect(&ctx, unreachable_config(Driver::Postgres))
            .await
            .unwrap_err();
        assert!(matches!(err, PgCompatError::Cancelled));
    }

    #[tokio::test]
    async fn configured_search_path_is_stored() {
        let ctx = Context::background();
        let mut cfg = unreachable_config(Driver::Postgres);
        cfg.search_path = "tenant_a, public".into();
        let db = Postgres::connect(&ctx, cfg).await.unwrap();
        assert_eq!(db.search_path(), vec!["tenant_a", "public"]);
    }

    #[tokio::test]
    async fn tracer_is_attached_to_the_pool_backend_only() {
        let ctx = Context::background();

        let mut pooled = unreachable_config(Driver::Deadpool);
        pooled.tracer = Some(Arc::new(SpanTracer));
        let db = Postgres::connect(&ctx, pooled).await.unwrap();
        let tracer = db.query_tracer().unwrap();
        assert_eq!(tracer.info().user, "nobody");
        assert_eq!(tracer.info().ssl_mode, "disable");

        let mut standard = unreachable_config(Driver::Postgres);
        standard.tracer = Some(Arc::new(SpanTracer));
        let db = Postgres::connect(&ctx, standard).await.unwrap();
        assert!(db.query_tracer().is_none());
    }

    #[tokio::test]
    async fn pool_backend_can_hand_out_a_standard_pool() {
        let ctx = Context::background();
        let db = Postgres::connect(&ctx, unreachable_config(Driver::Deadpool))
            .await
            .unwrap();
        let pool = db.standard_pool();
        assert_eq!(pool.state().connections, 0);
    }
}
