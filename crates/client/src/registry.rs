//! Cache of known streams and the only place streams get created.
//!
//! The cached state is advisory; the broker is authoritative. A send that
//! finds its stream gone marks it missing here, and the next ensure creates
//! it again. Each entry carries an epoch that grows whenever the stream
//! becomes available, so that several failure reports about the same
//! incarnation trigger one recreation, not one each.

use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::{Error, StepError, validate_stream_name};
use crate::inflight::InFlight;
use crate::retry::{Attempt, RetryPolicy};

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use courier_broker::{Broker, BrokerConnection, BrokerError, ErrorKind};
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

/// Last known availability of a stream.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum StreamState {
    /// Never ensured.
    #[default]
    Unknown,

    /// Created or confirmed to exist.
    Exists,

    /// Known to be gone; the next ensure recreates it.
    Missing,

    /// Being created again after it went missing.
    Recreating,
}

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    state: StreamState,
    epoch: u64,
}

/// Outcome of [`StreamRegistry::init_streams`], in input order.
#[derive(Clone, Debug, Default)]
pub struct InitReport {
    /// Streams that exist now.
    pub created: Vec<String>,

    /// Streams that could not be ensured, with the reason.
    pub failed: Vec<(String, Error)>,
}

impl InitReport {
    /// Whether every stream was ensured.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The failure for one stream, if it failed.
    #[must_use]
    pub fn failure(&self, name: &str) -> Option<&Error> {
        self.failed
            .iter()
            .find(|(failed, _)| failed == name)
            .map(|(_, e)| e)
    }
}

struct Inner<B>
where
    B: Broker,
{
    connections: ConnectionManager<B>,
    streams: DashMap<String, Entry>,
    inflight: InFlight<String, u64>,
    retry: RetryPolicy,
    operation_timeout: Duration,
}

/// Tracks streams and ensures they exist.
///
/// Clones share the same cache.
pub struct StreamRegistry<B>
where
    B: Broker,
{
    inner: Arc<Inner<B>>,
}

impl<B> Clone for StreamRegistry<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> Debug for StreamRegistry<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.known_streams())
            .finish_non_exhaustive()
    }
}

impl<B> StreamRegistry<B>
where
    B: Broker,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new(connections: ConnectionManager<B>, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections,
                streams: DashMap::new(),
                inflight: InFlight::new(),
                retry: config.create_retry,
                operation_timeout: config.operation_timeout,
            }),
        }
    }

    /// Cached state of a stream.
    #[must_use]
    pub fn state(&self, name: &str) -> StreamState {
        self.inner
            .streams
            .get(name)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Every stream the registry has seen, sorted.
    #[must_use]
    pub fn known_streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .streams
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Makes sure the stream exists, creating it if needed.
    ///
    /// Concurrent calls for the same stream share a single create request.
    /// A stream that already exists on the broker counts as success.
    /// Returns the stream's epoch.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStreamName`] for blank names,
    /// [`Error::StreamCreateFailed`] on rejection or once retries run out.
    pub async fn ensure_stream(&self, name: &str) -> Result<u64, Error> {
        validate_stream_name(name)?;

        let cached = self.inner.streams.get(name).map(|entry| *entry);

        if let Some(Entry {
            state: StreamState::Exists,
            epoch,
        }) = cached
        {
            return Ok(epoch);
        }

        let registry = self.clone();
        let owned = name.to_string();

        self.inner
            .inflight
            .run(name.to_string(), move || async move { registry.create(owned).await })
            .await
    }

    /// Forgets that a stream exists, so the next ensure creates it.
    pub fn mark_missing(&self, name: &str) {
        let mut entry = self.inner.streams.entry(name.to_string()).or_default();

        if entry.state != StreamState::Recreating {
            entry.state = StreamState::Missing;
        }
    }

    /// Marks a stream missing only if it still is the incarnation `epoch`
    /// refers to. Returns whether the state changed.
    pub(crate) fn mark_missing_at(&self, name: &str, epoch: u64) -> bool {
        match self.inner.streams.get_mut(name) {
            Some(mut entry) if entry.state == StreamState::Exists && entry.epoch == epoch => {
                entry.state = StreamState::Missing;
                debug!(stream = %name, epoch, "stream marked missing");
                true
            }
            _ => false,
        }
    }

    /// Ensures every stream in `names`, reporting each outcome separately.
    pub async fn init_streams<I, S>(&self, names: I) -> InitReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        let outcomes = join_all(names.iter().map(|name| self.ensure_stream(name))).await;

        let mut report = InitReport::default();

        for (name, outcome) in names.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => {
                    info!(stream = %name, "stream initialized");
                    report.created.push(name);
                }
                Err(e) => {
                    error!(stream = %name, error = %e, "stream initialization failed");
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "stream initialization finished"
        );

        report
    }

    /// Deletes a stream on the broker and marks it missing.
    ///
    /// Deleting a stream that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// [`Error::StreamDeleteFailed`] if the broker call fails or times out,
    /// or the connection errors of [`ConnectionManager::connection`].
    #[instrument(skip(self))]
    pub async fn delete_stream(&self, name: &str) -> Result<(), Error> {
        validate_stream_name(name)?;

        let handle = self.inner.connections.connection().await?;
        let timeout = self.inner.operation_timeout;

        let result = tokio::time::timeout(timeout, handle.connection().delete_stream(name)).await;

        self.mark_missing(name);

        let cause = match result {
            Ok(Ok(())) => {
                info!(stream = %name, "stream deleted");
                return Ok(());
            }
            Ok(Err(e)) if e.kind() == ErrorKind::StreamNotFound => {
                debug!(stream = %name, "stream already gone");
                return Ok(());
            }
            Ok(Err(e)) => {
                if e.kind().is_transient() {
                    self.inner
                        .connections
                        .report_if_unhealthy(&handle, Arc::new(e.clone()))
                        .await;
                }
                Attempt::Failed(e)
            }
            Err(_) => Attempt::TimedOut(timeout),
        };

        Err(Error::StreamDeleteFailed {
            stream: name.to_string(),
            cause: Arc::new(cause),
        })
    }

    #[instrument(skip(self))]
    async fn create(&self, name: String) -> Result<u64, Error> {
        {
            let mut entry = self.inner.streams.entry(name.clone()).or_default();

            match entry.state {
                StreamState::Exists => return Ok(entry.epoch),
                StreamState::Missing => entry.state = StreamState::Recreating,
                StreamState::Unknown | StreamState::Recreating => {}
            }
        }

        let inner = &*self.inner;
        let stream = name.as_str();

        let result = inner
            .retry
            .run(
                "create_stream",
                inner.operation_timeout,
                StepError::decision,
                |attempt| async move {
                    let handle = inner
                        .connections
                        .connection()
                        .await
                        .map_err(StepError::Connection)?;

                    debug!(%stream, attempt, "creating stream");

                    match handle.connection().create_stream(stream).await {
                        Ok(()) => Ok(true),
                        Err(e) if e.kind() == ErrorKind::StreamAlreadyExists => Ok(false),
                        Err(e) => {
                            if e.kind().is_transient() {
                                inner
                                    .connections
                                    .report_if_unhealthy(&handle, Arc::new(e.clone()))
                                    .await;
                            }
                            Err(StepError::Broker(e))
                        }
                    }
                },
            )
            .await;

        match result {
            Ok(created) => {
                let epoch = {
                    let mut entry = inner.streams.entry(name.clone()).or_default();
                    entry.state = StreamState::Exists;
                    entry.epoch += 1;
                    entry.epoch
                };

                if created {
                    info!(%stream, epoch, "stream created");
                } else {
                    debug!(%stream, epoch, "stream already exists");
                }

                Ok(epoch)
            }
            Err(e) => {
                if let Some(mut entry) = inner.streams.get_mut(stream) {
                    if entry.state == StreamState::Recreating {
                        entry.state = StreamState::Missing;
                    }
                }

                match e.last {
                    Attempt::Failed(StepError::Connection(
                        error @ (Error::Shutdown | Error::Configuration(_)),
                    )) => Err(error),
                    last => {
                        warn!(%stream, attempts = e.attempts, error = %last, "failed to create stream");
                        Err(Error::StreamCreateFailed {
                            stream: name,
                            attempts: e.attempts,
                            cause: Arc::new(last),
                        })
                    }
                }
            }
        }
    }
}
