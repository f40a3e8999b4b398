use crate::error::BrokerError;

use std::fmt::Debug;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A live subscription on a stream.
#[async_trait]
pub trait BrokerSubscription
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the subscription.
    type Error: BrokerError;

    /// Waits until the broker stops pushing.
    ///
    /// Resolves with `Ok` after an unsubscribe or once the sink has closed,
    /// and with an error when the broker lost the subscription (stream
    /// deleted, connection dropped).
    async fn wait(&self) -> Result<(), Self::Error>;

    /// Stops pushing and releases broker-side resources. Idempotent.
    async fn unsubscribe(&self) -> Result<(), Self::Error>;
}

/// Subscription backed by a spawned receive loop.
///
/// The loop is handed a cancellation token and must return once it fires.
/// Dropping the subscription cancels the loop.
#[derive(Debug)]
pub struct SubscriptionTask<E>
where
    E: BrokerError,
{
    stream: String,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<Result<(), E>>>>,
}

impl<E> SubscriptionTask<E>
where
    E: BrokerError,
{
    /// Spawns the receive loop for `stream`.
    pub fn spawn<F, Fut>(stream: impl Into<String>, receive: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(receive(cancel.child_token()));

        Self {
            stream: stream.into(),
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Name of the subscribed stream.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl<E> BrokerSubscription for SubscriptionTask<E>
where
    E: BrokerError,
{
    type Error = E;

    async fn wait(&self) -> Result<(), E> {
        let mut guard = self.handle.lock().await;

        let Some(handle) = guard.as_mut() else {
            return Ok(());
        };

        let outcome = handle.await;
        *guard = None;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                if e.is_panic() {
                    error!(stream = %self.stream, "receive loop panicked");
                }
                Ok(())
            }
        }
    }

    async fn unsubscribe(&self) -> Result<(), E> {
        self.cancel.cancel();

        let handle = self.handle.lock().await.take();

        if let Some(handle) = handle {
            if let Ok(Err(e)) = handle.await {
                debug!(stream = %self.stream, error = %e, "receive loop ended with error during unsubscribe");
            }
        }

        Ok(())
    }
}

impl<E> Drop for SubscriptionTask<E>
where
    E: BrokerError,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ErrorKind;

    use thiserror::Error;
    use tokio::sync::oneshot;

    #[derive(Clone, Debug, Error)]
    #[error("stream gone")]
    struct Gone;

    impl BrokerError for Gone {
        fn kind(&self) -> ErrorKind {
            ErrorKind::StreamNotFound
        }
    }

    #[tokio::test]
    async fn test_wait_reports_loop_error() {
        let subscription =
            SubscriptionTask::<Gone>::spawn("orders", |_cancel| async { Err(Gone) });

        let result = subscription.wait().await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::StreamNotFound);

        // Once observed, the outcome is not reported twice.
        assert!(subscription.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_cancels_loop() {
        let (done_tx, done_rx) = oneshot::channel();

        let subscription = SubscriptionTask::<Gone>::spawn("orders", |cancel| async move {
            cancel.cancelled().await;
            let _ = done_tx.send(());
            Ok(())
        });

        subscription.unsubscribe().await.unwrap();
        done_rx.await.unwrap();

        assert!(subscription.wait().await.is_ok());
        assert!(subscription.unsubscribe().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_cancels_loop() {
        let (done_tx, done_rx) = oneshot::channel();

        let subscription = SubscriptionTask::<Gone>::spawn("orders", |cancel| async move {
            cancel.cancelled().await;
            let _ = done_tx.send(());
            Ok(())
        });

        drop(subscription);
        done_rx.await.unwrap();
    }
}
