//! Sends payloads to streams, recovering from missing streams and flaky
//! connections.

use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::{Cause, Error, StepError};
use crate::registry::StreamRegistry;
use crate::retry::{Attempt, RetryPolicy};

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_broker::{Broker, BrokerConnection, BrokerError, ErrorKind};
use tracing::{debug, instrument, trace, warn};

/// Sends messages to named streams.
///
/// A send that finds its stream gone recreates it and resends, at most
/// `recreate_attempts` times. Transient failures are retried with the send
/// policy. Nothing is buffered beyond a single call.
pub struct Producer<B>
where
    B: Broker,
{
    connections: ConnectionManager<B>,
    registry: StreamRegistry<B>,
    retry: RetryPolicy,
    operation_timeout: Duration,
    recreate_attempts: u32,
}

impl<B> Clone for Producer<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
            registry: self.registry.clone(),
            retry: self.retry,
            operation_timeout: self.operation_timeout,
            recreate_attempts: self.recreate_attempts,
        }
    }
}

impl<B> Debug for Producer<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("retry", &self.retry)
            .field("operation_timeout", &self.operation_timeout)
            .field("recreate_attempts", &self.recreate_attempts)
            .finish_non_exhaustive()
    }
}

impl<B> Producer<B>
where
    B: Broker,
{
    /// Creates a producer sharing the given connection and registry.
    #[must_use]
    pub fn new(
        connections: ConnectionManager<B>,
        registry: StreamRegistry<B>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            connections,
            registry,
            retry: config.send_retry,
            operation_timeout: config.operation_timeout,
            recreate_attempts: config.recreate_attempts,
        }
    }

    /// Sends `payload` to `stream` and returns the offset the broker
    /// assigned to it.
    ///
    /// # Errors
    ///
    /// [`Error::SendFailed`] once retries or recreations are exhausted, or
    /// on a non-retryable broker error. [`Error::InvalidStreamName`] and
    /// [`Error::Shutdown`] are passed through.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn send(&self, stream: &str, payload: Bytes) -> Result<u64, Error> {
        let mut attempts = 0;
        let mut recreations = 0;

        loop {
            let epoch = match self.registry.ensure_stream(stream).await {
                Ok(epoch) => epoch,
                Err(e @ (Error::InvalidStreamName(_) | Error::Shutdown)) => return Err(e),
                Err(e) => return Err(self.failed(stream, attempts, Arc::new(e))),
            };

            let connections = &self.connections;
            let payload = &payload;

            let result = self
                .retry
                .run("send", self.operation_timeout, StepError::decision, |attempt| async move {
                    let handle = connections.connection().await.map_err(StepError::Connection)?;

                    trace!(%stream, attempt, "sending");

                    match handle.connection().send(stream, payload.clone()).await {
                        Ok(offset) => Ok(offset),
                        Err(e) => {
                            if e.kind().is_transient() {
                                connections
                                    .report_if_unhealthy(&handle, Arc::new(e.clone()))
                                    .await;
                            }
                            Err(StepError::Broker(e))
                        }
                    }
                })
                .await;

            let e = match result {
                Ok(offset) => {
                    debug!(%stream, offset, "message sent");
                    return Ok(offset);
                }
                Err(e) => e,
            };

            attempts += e.attempts;

            let stream_missing = e
                .error()
                .is_some_and(|e| matches!(e, StepError::Broker(e) if e.kind() == ErrorKind::StreamNotFound));

            if stream_missing && recreations < self.recreate_attempts {
                recreations += 1;
                warn!(%stream, recreations, "stream missing, recreating");
                self.registry.mark_missing_at(stream, epoch);
                continue;
            }

            return Err(match e.last {
                Attempt::Failed(StepError::Connection(Error::Shutdown)) => Error::Shutdown,
                last => self.failed(stream, attempts, Arc::new(last)),
            });
        }
    }

    /// Serializes `message` and sends it.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the message cannot be encoded, otherwise
    /// as [`Self::send`].
    pub async fn send_message<M>(&self, stream: &str, message: M) -> Result<u64, Error>
    where
        M: TryInto<Bytes>,
        M::Error: std::error::Error + Send + Sync + 'static,
    {
        let payload = message.try_into().map_err(Error::serialization)?;

        self.send(stream, payload).await
    }

    fn failed(&self, stream: &str, attempts: u32, cause: Cause) -> Error {
        warn!(%stream, attempts, error = %cause, "send failed");

        Error::SendFailed {
            stream: stream.to_string(),
            attempts,
            cause,
        }
    }
}
