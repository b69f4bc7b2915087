use postgresql_embedded::PostgreSQL;

use super::super::SHARED_RUNTIME;
use crate::context::Context;
use crate::postgres::{ConnectConfig, Postgres};
use crate::types::Driver;

/// Represents a running embedded `PostgreSQL` instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    pub database_url: String,
    /// Working connection settings for the created database
    pub config: ConnectConfig,
}

impl EmbeddedPostgres {
    /// Connection settings for `driver` against this instance.
    #[must_use]
    pub fn config_for(&self, driver: Driver) -> ConnectConfig {
        ConnectConfig {
            driver: driver.as_str().to_string(),
            ..self.config.clone()
        }
    }
}

/// Set up an embedded `PostgreSQL` instance and create `db_name` in it.
///
/// # Errors
/// Returns an error if the embedded server cannot be set up or started, the
/// database cannot be created, or the post-start connectivity check fails.
pub fn setup_postgres_embedded(
    db_name: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();

        // Setup PostgreSQL binaries (bundled, so no download conflicts)
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let host = settings.host.clone();
        let user = settings.username.clone();
        let password = settings.password.clone();

        postgresql.create_database(db_name).await?;

        let database_url = format!("postgres://{user}:{password}@{host}:{port}/{db_name}");

        let config = ConnectConfig {
            username: user,
            password,
            host,
            port: port.to_string(),
            dbname: db_name.to_string(),
            ..ConnectConfig::new(Driver::Postgres)
        };

        // Quick connection test
        let ctx = Context::background();
        let db = Postgres::connect(&ctx, config.clone()).await?;
        db.ping(&ctx).await?;
        db.close().await?;

        Ok(EmbeddedPostgres {
            postgresql,
            port,
            database_url,
            config,
        })
    })
}

/// Stop a previously started embedded `PostgreSQL` instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}
