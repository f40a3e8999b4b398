//! Owner of the single shared broker connection.

use crate::config::ClientConfig;
use crate::error::{Cause, Error};
use crate::inflight::InFlight;
use crate::retry::{Decision, RetryPolicy};

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use courier_broker::{Broker, BrokerConnection, BrokerError, Credentials, Endpoint, ErrorKind};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Health of the shared connection.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ConnectionState {
    /// No connection, and none being established.
    #[default]
    Disconnected,

    /// A connection attempt is in progress.
    Connecting,

    /// A healthy connection is available.
    Connected,

    /// The last connection broke or could not be established.
    Failed,
}

/// Notification that the connection transitioned to [`ConnectionState::Failed`].
#[derive(Clone, Debug)]
pub struct ConnectionLost {
    /// Generation of the connection that was lost, or of the last one that
    /// existed when reconnecting failed.
    pub generation: u64,

    /// Why.
    pub cause: Cause,
}

type LostHandler = Arc<dyn Fn(&ConnectionLost) + Send + Sync>;

/// A health check reported an unhealthy connection.
#[derive(Clone, Copy, Debug, Error)]
#[error("connection generation {0} failed its health check")]
pub struct Unhealthy(pub u64);

/// Read-only view of one physical connection.
///
/// The generation identifies the connection, so failure reports about a
/// connection that has already been replaced can be ignored.
pub struct ConnectionHandle<B>
where
    B: Broker,
{
    generation: u64,
    connection: B::Connection,
}

impl<B> ConnectionHandle<B>
where
    B: Broker,
{
    /// Generation of the connection. Starts at 1 and grows with every
    /// successful connect.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The broker connection.
    #[must_use]
    pub const fn connection(&self) -> &B::Connection {
        &self.connection
    }
}

impl<B> Clone for ConnectionHandle<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            connection: self.connection.clone(),
        }
    }
}

impl<B> Debug for ConnectionHandle<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

struct Inner<B>
where
    B: Broker,
{
    broker: B,
    endpoint: Endpoint,
    credentials: Credentials,
    retry: RetryPolicy,
    connect_timeout: Duration,
    operation_timeout: Duration,
    current: Mutex<Option<ConnectionHandle<B>>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    inflight: InFlight<(), ConnectionHandle<B>>,
    lost_handlers: Mutex<Vec<LostHandler>>,
    shut_down: AtomicBool,
}

/// Establishes, health-checks and re-establishes the broker connection.
///
/// Clones share the same connection.
pub struct ConnectionManager<B>
where
    B: Broker,
{
    inner: Arc<Inner<B>>,
}

impl<B> Clone for ConnectionManager<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> Debug for ConnectionManager<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn classify<E: BrokerError>(error: &E) -> Decision {
    if error.kind() == ErrorKind::Configuration {
        Decision::Abort
    } else {
        Decision::Retry
    }
}

impl<B> ConnectionManager<B>
where
    B: Broker,
{
    /// Creates a manager. Nothing is contacted until the first request.
    #[must_use]
    pub fn new(broker: B, config: &ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                broker,
                endpoint: config.endpoint.clone(),
                credentials: config.credentials.clone(),
                retry: config.connect_retry,
                connect_timeout: config.connect_timeout,
                operation_timeout: config.operation_timeout,
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                state,
                inflight: InFlight::new(),
                lost_handlers: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Where the manager connects to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Current health state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Generation of the current connection, if connected.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.inner.current.lock().as_ref().map(ConnectionHandle::generation)
    }

    /// Registers a callback run every time the connection fails.
    pub fn on_connection_lost<F>(&self, handler: F)
    where
        F: Fn(&ConnectionLost) + Send + Sync + 'static,
    {
        self.inner.lost_handlers.lock().push(Arc::new(handler));
    }

    /// Establishes the connection unless one is already up.
    ///
    /// An existing connection is returned as is, without contacting the
    /// broker.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] on bad address or credentials,
    /// [`Error::ConnectionUnavailable`] once retries are exhausted,
    /// [`Error::Shutdown`] after [`Self::shutdown`].
    pub async fn connect(&self) -> Result<ConnectionHandle<B>, Error> {
        self.ensure_running()?;

        if let Some(handle) = self.inner.current.lock().clone() {
            return Ok(handle);
        }

        self.reconnect().await
    }

    /// Returns a healthy connection, reconnecting if the current one is gone
    /// or fails its health check.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn connection(&self) -> Result<ConnectionHandle<B>, Error> {
        self.ensure_running()?;

        let current = self.inner.current.lock().clone();

        if let Some(handle) = current {
            if handle.connection.is_healthy().await {
                return Ok(handle);
            }

            self.report_failure(&handle, Arc::new(Unhealthy(handle.generation)));
        }

        self.reconnect().await
    }

    /// Reports an I/O failure seen on `handle`.
    ///
    /// Moves the manager from `Connected` to `Failed` if `handle` is still
    /// the current connection; reports about replaced connections are
    /// ignored. Returns whether the report was acted upon.
    pub fn report_failure(&self, handle: &ConnectionHandle<B>, cause: Cause) -> bool {
        let lost = {
            let mut current = self.inner.current.lock();

            match current.as_ref() {
                Some(active) if active.generation == handle.generation => current.take(),
                _ => None,
            }
        };

        let Some(lost) = lost else {
            debug!(
                generation = handle.generation,
                "ignoring failure report for replaced connection"
            );
            return false;
        };

        warn!(generation = lost.generation, error = %cause, "broker connection lost");

        self.inner.state.send_replace(ConnectionState::Failed);

        let timeout = self.inner.operation_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, lost.connection.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(generation = lost.generation, error = %e, "error closing lost connection");
                }
                Err(_) => debug!(generation = lost.generation, "closing lost connection timed out"),
            }
        });

        self.notify_lost(&ConnectionLost {
            generation: lost.generation,
            cause,
        });

        true
    }

    /// Reports `cause` only if the connection behind `handle` is actually
    /// unhealthy. Used after transient broker errors, which may also come
    /// from a healthy connection.
    pub(crate) async fn report_if_unhealthy(&self, handle: &ConnectionHandle<B>, cause: Cause) {
        if !handle.connection.is_healthy().await {
            self.report_failure(handle, cause);
        }
    }

    /// Closes the connection. Every later request fails with
    /// [`Error::Shutdown`].
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let current = self.inner.current.lock().take();

        if let Some(handle) = current {
            let timeout = self.inner.operation_timeout;

            match tokio::time::timeout(timeout, handle.connection.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(generation = handle.generation, error = %e, "error closing connection");
                }
                Err(_) => warn!(generation = handle.generation, ?timeout, "closing connection timed out"),
            }
        }

        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("connection manager shut down");
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }

    fn notify_lost(&self, lost: &ConnectionLost) {
        let handlers = self.inner.lost_handlers.lock().clone();

        for handler in handlers {
            handler(lost);
        }
    }

    async fn reconnect(&self) -> Result<ConnectionHandle<B>, Error> {
        let manager = self.clone();

        self.inner
            .inflight
            .run((), move || async move { manager.establish().await })
            .await
    }

    #[instrument(skip(self), fields(endpoint = %self.inner.endpoint))]
    async fn establish(&self) -> Result<ConnectionHandle<B>, Error> {
        if let Some(handle) = self.inner.current.lock().clone() {
            return Ok(handle);
        }

        self.inner.state.send_replace(ConnectionState::Connecting);

        let inner = &self.inner;
        let result = inner
            .retry
            .run("connect", inner.connect_timeout, classify::<B::Error>, |attempt| {
                debug!(attempt, "connecting to broker");
                inner.broker.connect(&inner.endpoint, &inner.credentials)
            })
            .await;

        match result {
            Ok(connection) => {
                if self.ensure_running().is_err() {
                    let _ = connection.close().await;
                    return Err(Error::Shutdown);
                }

                let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let handle = ConnectionHandle {
                    generation,
                    connection,
                };

                *inner.current.lock() = Some(handle.clone());
                inner.state.send_replace(ConnectionState::Connected);

                info!(generation, "connected to broker");

                Ok(handle)
            }
            Err(e) => {
                let attempts = e.attempts;
                let configuration = e.error().is_some_and(|e| e.kind() == ErrorKind::Configuration);
                let cause: Cause = Arc::new(e.last);

                inner.state.send_replace(ConnectionState::Failed);
                self.notify_lost(&ConnectionLost {
                    generation: inner.generation.load(Ordering::SeqCst),
                    cause: cause.clone(),
                });

                if configuration {
                    warn!(error = %cause, "broker rejected configuration");
                    Err(Error::Configuration(cause))
                } else {
                    warn!(attempts, error = %cause, "giving up connecting to broker");
                    Err(Error::ConnectionUnavailable { attempts, cause })
                }
            }
        }
    }
}
