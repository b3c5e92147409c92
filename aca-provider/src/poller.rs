//! Long-running remote operations.

use crate::error::{ProviderError, Result};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

type OperationFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Handle to a long-running operation that has been accepted by the service.
///
/// The outcome is only known once [`Poller::result`] resolves; nothing about the
/// remote resource should be trusted before that.
#[must_use = "a poller must be awaited to learn the operation outcome"]
pub struct Poller<T> {
    operation: String,
    future: OperationFuture<T>,
}

impl<T: Send + 'static> Poller<T> {
    pub fn new<F>(operation: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            operation: operation.into(),
            future: Box::pin(future),
        }
    }

    /// An operation the service completed synchronously.
    pub fn done(operation: impl Into<String>, value: T) -> Self {
        Self::new(operation, async move { Ok(value) })
    }

    pub fn failed(operation: impl Into<String>, error: ProviderError) -> Self {
        Self::new(operation, async move { Err(error) })
    }
}

impl<T> Poller<T> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Waits for the terminal result of the operation.
    pub async fn result(self) -> Result<T> {
        self.future.await
    }
}

impl<T> IntoFuture for Poller<T> {
    type Output = Result<T>;
    type IntoFuture = OperationFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

impl<T> fmt::Debug for Poller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}
