use tokio::io::{AsyncRead, AsyncWrite};
use tokio_postgres::{Client, Connection, NoTls};

use crate::error::PgCompatError;

/// TLS connector chosen from the configured `sslmode`.
#[derive(Clone)]
pub(crate) enum Tls {
    Plain,
    #[cfg(feature = "native-tls")]
    Native(postgres_native_tls::MakeTlsConnector),
}

impl std::fmt::Debug for Tls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tls::Plain => f.write_str("Plain"),
            #[cfg(feature = "native-tls")]
            Tls::Native(_) => f.write_str("Native"),
        }
    }
}

impl Tls {
    /// # Errors
    /// Returns `PgCompatError::ConnectionError` if the TLS connector cannot be built.
    #[cfg(feature = "native-tls")]
    pub(crate) fn for_ssl_mode(ssl_mode: &str) -> Result<Self, PgCompatError> {
        let mut builder = native_tls::TlsConnector::builder();
        match ssl_mode {
            "" | "disable" => return Ok(Tls::Plain),
            // libpq does not check certificates below verify-ca
            "allow" | "prefer" | "require" => {
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
            "verify-ca" => {
                builder.danger_accept_invalid_hostnames(true);
            }
            _ => {}
        }
        let connector = builder.build().map_err(|e| {
            PgCompatError::ConnectionError(format!("Failed to build TLS connector: {e}"))
        })?;
        Ok(Tls::Native(postgres_native_tls::MakeTlsConnector::new(
            connector,
        )))
    }

    /// Without the `native-tls` feature every mode connects in plain text; `require`
    /// and stricter modes then fail at connect time.
    #[cfg(not(feature = "native-tls"))]
    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn for_ssl_mode(_ssl_mode: &str) -> Result<Self, PgCompatError> {
        Ok(Tls::Plain)
    }

    /// Open one client and drive its connection on the runtime.
    ///
    /// # Errors
    /// Returns the driver's connect error.
    pub(crate) async fn connect(
        &self,
        config: &tokio_postgres::Config,
    ) -> Result<Client, PgCompatError> {
        match self {
            Tls::Plain => {
                let (client, connection) = config.connect(NoTls).await?;
                spawn_connection(connection);
                Ok(client)
            }
            #[cfg(feature = "native-tls")]
            Tls::Native(connector) => {
                let (client, connection) = config.connect(connector.clone()).await?;
                spawn_connection(connection);
                Ok(client)
            }
        }
    }

    pub(crate) fn deadpool_manager(
        &self,
        config: tokio_postgres::Config,
    ) -> deadpool_postgres::Manager {
        let manager_config = deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        };
        match self {
            Tls::Plain => deadpool_postgres::Manager::from_config(config, NoTls, manager_config),
            #[cfg(feature = "native-tls")]
            Tls::Native(connector) => {
                deadpool_postgres::Manager::from_config(config, connector.clone(), manager_config)
            }
        }
    }
}

fn spawn_connection<S, T>(connection: Connection<S, T>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "postgres connection error");
        }
    });
}
