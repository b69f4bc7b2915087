//! Cancellation and deadlines for backend round trips.
//!
//! Every network operation of [`crate::Postgres`] takes a `&Context`. When the
//! context is cancelled or its deadline passes, the in-flight future is dropped
//! and the call returns [`PgCompatError::Cancelled`] or
//! [`PgCompatError::DeadlineExceeded`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PgCompatError;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context cancelled together with `self`, or on its own via [`Context::cancel`].
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context whose deadline is `timeout` from now, or the parent's if earlier.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drive `fut` until it completes, the context is cancelled, or the deadline passes.
    ///
    /// # Errors
    /// Returns the future's own error, `Cancelled`, or `DeadlineExceeded`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, PgCompatError>
    where
        F: Future<Output = Result<T, PgCompatError>>,
    {
        if self.token.is_cancelled() {
            return Err(PgCompatError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(PgCompatError::DeadlineExceeded);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(PgCompatError::Cancelled),
            () = expired => Err(PgCompatError::DeadlineExceeded),
            res = fut => res,
        }
    }
}
