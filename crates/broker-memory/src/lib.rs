//! In-memory implementation of the broker interface.
//!
//! Streams live in a shared map owned by the [`MemoryBroker`]; every clone
//! of the broker and every connection it opens sees the same streams. The
//! broker can be told to misbehave (refuse connections, drop them, fail
//! creates or sends, lose streams) and counts the requests it receives, which
//! makes it the backend of choice for exercising recovery paths in tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connection;
mod error;

pub use connection::MemoryConnection;
pub use error::Error;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::{Broker, Credentials, Endpoint};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// How many more times an injected fault fires.
#[derive(Clone, Copy, Debug, Default)]
enum Budget {
    #[default]
    Off,
    Times(u32),
    Always,
}

impl Budget {
    const fn times(n: u32) -> Self {
        if n == 0 { Self::Off } else { Self::Times(n) }
    }

    /// Consumes one firing, returning whether the fault applies.
    fn take(&mut self) -> bool {
        match *self {
            Self::Off => false,
            Self::Always => true,
            Self::Times(n) => {
                *self = Self::times(n - 1);
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    refuse_connections: Budget,
    fail_creates: Budget,
    fail_sends: Budget,
    rejected_streams: HashSet<String>,
    delay: Option<Duration>,
}

#[derive(Debug)]
struct StreamLog {
    incarnation: u64,
    messages: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    creates: AtomicU64,
    sends: AtomicU64,
    creates_by_stream: Mutex<HashMap<String, u64>>,
}

#[derive(Debug)]
struct State {
    streams: Mutex<HashMap<String, StreamLog>>,
    incarnations: AtomicU64,
    connection_epoch: AtomicU64,
    credentials: Mutex<Option<Credentials>>,
    faults: Mutex<Faults>,
    counters: Counters,
    active_subscriptions: AtomicUsize,
    version: watch::Sender<u64>,
}

impl State {
    /// Wakes every receive loop so it re-reads the streams.
    fn notify(&self) {
        self.version.send_modify(|version| *version = version.wrapping_add(1));
    }

    async fn delay(&self) {
        let delay = self.faults.lock().delay;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for State {
    fn default() -> Self {
        let (version, _) = watch::channel(0);

        Self {
            streams: Mutex::default(),
            incarnations: AtomicU64::default(),
            connection_epoch: AtomicU64::default(),
            credentials: Mutex::default(),
            faults: Mutex::default(),
            counters: Counters::default(),
            active_subscriptions: AtomicUsize::default(),
            version,
        }
    }
}

/// In-process broker with fault injection.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl MemoryBroker {
    /// Creates an empty broker that accepts any credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept connections presenting these credentials.
    #[must_use]
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        *self.state.credentials.lock() = Some(credentials);
        self
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_connections(&self, n: u32) {
        self.state.faults.lock().refuse_connections = Budget::times(n);
    }

    /// Refuses every connection attempt until [`Self::clear_faults`].
    pub fn refuse_all_connections(&self) {
        self.state.faults.lock().refuse_connections = Budget::Always;
    }

    /// Fails the next `n` create requests with a transient error.
    pub fn fail_creates(&self, n: u32) {
        self.state.faults.lock().fail_creates = Budget::times(n);
    }

    /// Fails every create request with a transient error.
    pub fn fail_all_creates(&self) {
        self.state.faults.lock().fail_creates = Budget::Always;
    }

    /// Fails the next `n` sends with a transient error.
    pub fn fail_sends(&self, n: u32) {
        self.state.faults.lock().fail_sends = Budget::times(n);
    }

    /// Fails every send with a transient error.
    pub fn fail_all_sends(&self) {
        self.state.faults.lock().fail_sends = Budget::Always;
    }

    /// Refuses, permanently, to create a stream with this name.
    pub fn reject_stream(&self, name: impl Into<String>) {
        self.state.faults.lock().rejected_streams.insert(name.into());
    }

    /// Delays every request by `delay` before it is handled.
    pub fn delay_operations(&self, delay: Duration) {
        self.state.faults.lock().delay = Some(delay);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        *self.state.faults.lock() = Faults::default();
    }

    /// Breaks every open connection, ending their subscriptions with an error.
    pub fn drop_connections(&self) {
        debug!("dropping all memory broker connections");
        self.state.connection_epoch.fetch_add(1, Ordering::SeqCst);
        self.state.notify();
    }

    /// Deletes a stream behind the clients' backs.
    ///
    /// Returns whether the stream existed.
    pub fn remove_stream(&self, name: &str) -> bool {
        let removed = self.state.streams.lock().remove(name).is_some();

        if removed {
            debug!(stream = %name, "stream removed externally");
            self.state.notify();
        }

        removed
    }

    /// Whether a stream currently exists.
    #[must_use]
    pub fn stream_exists(&self, name: &str) -> bool {
        self.state.streams.lock().contains_key(name)
    }

    /// Names of all existing streams, sorted.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.streams.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Payloads stored in a stream, in offset order.
    #[must_use]
    pub fn messages(&self, name: &str) -> Vec<Bytes> {
        self.state
            .streams
            .lock()
            .get(name)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Connection attempts received, including refused ones.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.state.counters.connects.load(Ordering::SeqCst)
    }

    /// Create requests received across all streams.
    #[must_use]
    pub fn create_count(&self) -> u64 {
        self.state.counters.creates.load(Ordering::SeqCst)
    }

    /// Create requests received for one stream.
    #[must_use]
    pub fn create_count_for(&self, name: &str) -> u64 {
        self.state
            .counters
            .creates_by_stream
            .lock()
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Send requests received, including failed ones.
    #[must_use]
    pub fn send_count(&self) -> u64 {
        self.state.counters.sends.load(Ordering::SeqCst)
    }

    /// Subscriptions whose receive loop is still running.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.state.active_subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Error = Error;
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<MemoryConnection, Error> {
        self.state.delay().await;
        self.state.counters.connects.fetch_add(1, Ordering::SeqCst);

        if endpoint.host.trim().is_empty() || endpoint.port == 0 {
            return Err(Error::InvalidEndpoint(endpoint.to_string()));
        }

        if self.state.faults.lock().refuse_connections.take() {
            debug!(%endpoint, "refusing connection");
            return Err(Error::ConnectionRefused);
        }

        if let Some(expected) = self.state.credentials.lock().as_ref() {
            if expected != credentials {
                return Err(Error::InvalidCredentials(credentials.username.clone()));
            }
        }

        let epoch = self.state.connection_epoch.load(Ordering::SeqCst);
        debug!(%endpoint, epoch, "memory broker connection opened");

        Ok(MemoryConnection::new(self.state.clone(), epoch))
    }
}
