use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgCompatError {
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[error(transparent)]
    PoolError(#[from] deadpool_postgres::PoolError),

    #[error("postgres: {0} cannot be empty")]
    MissingField(&'static str),

    #[error("postgres: driver {0} is not supported")]
    UnsupportedDriver(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("DSN error: {0}")]
    DsnError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("no rows in result set")]
    NoRows,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("a DB Transact function was called on a DB already in a transaction")]
    AlreadyInTransaction,

    #[error("isolation level {0} is not supported")]
    UnsupportedIsolationLevel(String),

    #[error("transaction has already been committed or rolled back")]
    TransactionFinished,

    #[error("failed to rollback: {0}")]
    RollbackFailed(Box<PgCompatError>),

    #[error("failed to commit: {0}")]
    CommitFailed(Box<PgCompatError>),

    #[error("{}", JoinedDisplay(.0))]
    Joined(Vec<PgCompatError>),

    #[error("connection is closed")]
    Closed,

    #[error("Other database error: {0}")]
    Other(String),
}

impl PgCompatError {
    /// Combine several failures into one value. A single error is returned as is.
    #[must_use]
    pub fn join(mut errors: Vec<PgCompatError>) -> Self {
        if errors.len() == 1 {
            return errors.remove(0);
        }
        PgCompatError::Joined(errors)
    }

    /// Individual causes of a joined error, or the error itself.
    #[must_use]
    pub fn causes(&self) -> Vec<&PgCompatError> {
        match self {
            PgCompatError::Joined(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}

impl From<bb8::RunError<PgCompatError>> for PgCompatError {
    fn from(err: bb8::RunError<PgCompatError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            bb8::RunError::TimedOut => PgCompatError::ConnectionError(
                "timed out waiting for a standard backend connection".to_string(),
            ),
        }
    }
}

impl From<url::ParseError> for PgCompatError {
    fn from(err: url::ParseError) -> Self {
        PgCompatError::DsnError(err.to_string())
    }
}

struct JoinedDisplay<'a>(&'a [PgCompatError]);

impl fmt::Display for JoinedDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, err) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
