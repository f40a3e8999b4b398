use crate::{Error, State, StreamLog};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::{BrokerConnection, Delivery, DeliverySink, OffsetSpec, SubscriptionTask};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Connection to a [`crate::MemoryBroker`].
///
/// A connection stays usable until it is closed or the broker drops all
/// connections.
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    state: Arc<State>,
    epoch: u64,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    pub(crate) fn new(state: Arc<State>, epoch: u64) -> Self {
        Self {
            state,
            epoch,
            closed: Arc::default(),
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.state.connection_epoch.load(Ordering::SeqCst) == self.epoch
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    type Error = Error;
    type Subscription = SubscriptionTask<Error>;

    async fn create_stream(&self, name: &str) -> Result<(), Error> {
        self.state.delay().await;
        self.ensure_open()?;

        let counters = &self.state.counters;
        counters.creates.fetch_add(1, Ordering::SeqCst);
        *counters
            .creates_by_stream
            .lock()
            .entry(name.to_string())
            .or_default() += 1;

        {
            let mut faults = self.state.faults.lock();

            if faults.rejected_streams.contains(name) {
                return Err(Error::Rejected(name.to_string()));
            }

            if faults.fail_creates.take() {
                return Err(Error::Unavailable);
            }
        }

        let mut streams = self.state.streams.lock();

        if streams.contains_key(name) {
            return Err(Error::StreamAlreadyExists(name.to_string()));
        }

        let incarnation = self.state.incarnations.fetch_add(1, Ordering::SeqCst);
        streams.insert(
            name.to_string(),
            StreamLog {
                incarnation,
                messages: Vec::new(),
            },
        );
        drop(streams);

        debug!(stream = %name, incarnation, "stream created");
        self.state.notify();

        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), Error> {
        self.state.delay().await;
        self.ensure_open()?;

        if self.state.streams.lock().remove(name).is_none() {
            return Err(Error::StreamNotFound(name.to_string()));
        }

        debug!(stream = %name, "stream deleted");
        self.state.notify();

        Ok(())
    }

    async fn send(&self, stream: &str, payload: Bytes) -> Result<u64, Error> {
        self.state.delay().await;
        self.ensure_open()?;

        self.state.counters.sends.fetch_add(1, Ordering::SeqCst);

        if self.state.faults.lock().fail_sends.take() {
            return Err(Error::Unavailable);
        }

        let offset = {
            let mut streams = self.state.streams.lock();
            let log = streams
                .get_mut(stream)
                .ok_or_else(|| Error::StreamNotFound(stream.to_string()))?;

            log.messages.push(payload);
            log.messages.len() as u64 - 1
        };

        trace!(%stream, offset, "message appended");
        self.state.notify();

        Ok(offset)
    }

    async fn subscribe(
        &self,
        stream: &str,
        offset: OffsetSpec,
        sink: DeliverySink,
    ) -> Result<SubscriptionTask<Error>, Error> {
        self.state.delay().await;
        self.ensure_open()?;

        let (incarnation, start) = {
            let streams = self.state.streams.lock();
            let log = streams
                .get(stream)
                .ok_or_else(|| Error::StreamNotFound(stream.to_string()))?;

            let len = log.messages.len() as u64;
            let start = match offset {
                OffsetSpec::First => 0,
                OffsetSpec::Next => len,
                OffsetSpec::Offset(n) => n,
                OffsetSpec::LastN(n) => len.saturating_sub(n),
            };

            (log.incarnation, start)
        };

        debug!(%stream, %offset, start, "subscription started");

        sink.start_at(start);

        let receiver = Receiver {
            _active: ActiveGuard::new(&self.state),
            connection: self.clone(),
            stream: stream.to_string(),
            incarnation,
            next: start,
            sink,
        };

        Ok(SubscriptionTask::spawn(stream, |cancel| receiver.run(cancel)))
    }

    async fn is_healthy(&self) -> bool {
        self.state.delay().await;
        self.is_open()
    }

    async fn close(&self) -> Result<(), Error> {
        self.state.delay().await;

        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("memory broker connection closed");
            self.state.notify();
        }

        Ok(())
    }
}

/// Keeps the active subscription count honest on every exit path.
struct ActiveGuard(Arc<State>);

impl ActiveGuard {
    fn new(state: &Arc<State>) -> Self {
        state.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        Self(state.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Receiver {
    _active: ActiveGuard,
    connection: MemoryConnection,
    stream: String,
    incarnation: u64,
    next: u64,
    sink: DeliverySink,
}

impl Receiver {
    /// Pending messages from `next` onwards, or the reason the subscription
    /// cannot continue.
    fn pending(&self) -> Result<Vec<Bytes>, Error> {
        self.connection.ensure_open()?;

        let streams = self.connection.state.streams.lock();

        match streams.get(&self.stream) {
            Some(log) if log.incarnation == self.incarnation => {
                let from = usize::try_from(self.next).unwrap_or(usize::MAX);
                Ok(log.messages.get(from..).map(<[Bytes]>::to_vec).unwrap_or_default())
            }
            _ => Err(Error::StreamNotFound(self.stream.clone())),
        }
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<(), Error> {
        let mut version = self.connection.state.version.subscribe();

        loop {
            version.borrow_and_update();

            let pending = match self.pending() {
                Ok(pending) => pending,
                Err(e) => {
                    debug!(stream = %self.stream, error = %e, "subscription lost");
                    return Err(e);
                }
            };

            for payload in pending {
                let delivery = Delivery::new(self.stream.clone(), self.next, payload);

                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    pushed = self.sink.push(delivery) => {
                        if pushed.is_err() {
                            return Ok(());
                        }
                    }
                }

                self.next += 1;
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = self.sink.closed() => return Ok(()),
                changed = version.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
