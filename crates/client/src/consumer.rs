//! Subscriptions exposed as sequential, cancellable feeds.
//!
//! The broker pushes into a bounded buffer; the application pulls from a
//! [`Feed`]. A supervisor task per feed owns the broker subscription and
//! re-establishes it after connection or stream loss, resuming where the
//! buffer left off.

use crate::config::ClientConfig;
use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::error::{Cause, Error, validate_stream_name};
use crate::registry::StreamRegistry;
use crate::retry::{Attempt, RetryPolicy};

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use courier_broker::{
    Broker, BrokerConnection, BrokerError, BrokerSubscription, Delivery, DeliverySink, ErrorKind,
    OffsetSpec,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

type Subscription<B> = <<B as Broker>::Connection as BrokerConnection>::Subscription;

/// Lifecycle of a feed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FeedState {
    /// No broker subscription. Initial state, and final state after the
    /// subscription was lost for good.
    #[default]
    Unsubscribed,

    /// Setting up the first broker subscription.
    Subscribing,

    /// Receiving.
    Active,

    /// The broker subscription ended unexpectedly.
    Lost,

    /// Setting up a replacement broker subscription.
    Resubscribing,

    /// Closed by the application. Final.
    Cancelled,
}

/// Why opening a broker subscription failed.
enum OpenError {
    /// The registry or connection manager gave up; already retried.
    Upstream(Error),

    /// The stream is gone; it has been marked missing.
    StreamMissing(Cause),

    /// Anything else.
    Failed(Cause),
}

/// Opens subscriptions.
pub struct Consumer<B>
where
    B: Broker,
{
    connections: ConnectionManager<B>,
    registry: StreamRegistry<B>,
    retry: RetryPolicy,
    operation_timeout: Duration,
    buffer_capacity: usize,
}

impl<B> Clone for Consumer<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
            registry: self.registry.clone(),
            retry: self.retry,
            operation_timeout: self.operation_timeout,
            buffer_capacity: self.buffer_capacity,
        }
    }
}

impl<B> Debug for Consumer<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("retry", &self.retry)
            .field("buffer_capacity", &self.buffer_capacity)
            .finish_non_exhaustive()
    }
}

impl<B> Consumer<B>
where
    B: Broker,
{
    /// Creates a consumer sharing the given connection and registry.
    ///
    /// Resubscribes wait according to the send policy and are bounded by
    /// `resubscribe_attempts`.
    #[must_use]
    pub fn new(
        connections: ConnectionManager<B>,
        registry: StreamRegistry<B>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            connections,
            registry,
            retry: config
                .send_retry
                .with_max_attempts(config.resubscribe_attempts),
            operation_timeout: config.operation_timeout,
            buffer_capacity: config.buffer_capacity,
        }
    }

    /// Subscribes to `stream` starting at `offset`.
    ///
    /// The first broker subscription is set up before this returns, so
    /// setup failures surface here rather than on the feed.
    ///
    /// # Errors
    ///
    /// [`Error::SubscribeFailed`] once setup attempts run out.
    /// [`Error::InvalidStreamName`], [`Error::Configuration`] and
    /// [`Error::Shutdown`] are passed through.
    pub async fn subscribe(&self, stream: &str, offset: OffsetSpec) -> Result<Feed, Error> {
        validate_stream_name(stream)?;

        let (sink, receiver) = DeliverySink::channel(self.buffer_capacity);
        let (state, state_rx) = watch::channel(FeedState::Subscribing);

        let mut attempts = 0;

        let (subscription, handle, epoch) = loop {
            attempts += 1;

            let cause = match self.open(stream, offset, &sink).await {
                Ok(opened) => break opened,
                Err(OpenError::Upstream(
                    e @ (Error::InvalidStreamName(_) | Error::Configuration(_) | Error::Shutdown),
                )) => return Err(e),
                Err(OpenError::Upstream(e)) => {
                    return Err(Error::SubscribeFailed {
                        stream: stream.to_string(),
                        attempts,
                        cause: Arc::new(e),
                    });
                }
                Err(OpenError::StreamMissing(cause) | OpenError::Failed(cause)) => cause,
            };

            let Some(delay) = self.retry.delay_after(attempts) else {
                warn!(%stream, attempts, error = %cause, "giving up subscribing");
                return Err(Error::SubscribeFailed {
                    stream: stream.to_string(),
                    attempts,
                    cause,
                });
            };

            warn!(%stream, attempts, delay = ?delay, error = %cause, "subscribe failed, retrying");
            tokio::time::sleep(delay).await;
        };

        state.send_replace(FeedState::Active);
        info!(%stream, %offset, "subscribed");

        let cancel = CancellationToken::new();
        let outcome = Arc::new(Mutex::new(None));

        let supervisor = Supervisor {
            consumer: self.clone(),
            stream: stream.to_string(),
            offset,
            sink,
            state,
            outcome: outcome.clone(),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(supervisor.run(subscription, handle, epoch));

        Ok(Feed {
            stream: stream.to_string(),
            receiver,
            outcome,
            state: state_rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            _task: task,
            closed: false,
        })
    }

    async fn open(
        &self,
        stream: &str,
        offset: OffsetSpec,
        sink: &DeliverySink,
    ) -> Result<(Subscription<B>, ConnectionHandle<B>, u64), OpenError> {
        let epoch = self
            .registry
            .ensure_stream(stream)
            .await
            .map_err(OpenError::Upstream)?;

        let handle = self
            .connections
            .connection()
            .await
            .map_err(OpenError::Upstream)?;

        let result = tokio::time::timeout(
            self.operation_timeout,
            handle.connection().subscribe(stream, offset, sink.clone()),
        )
        .await;

        match result {
            Ok(Ok(subscription)) => Ok((subscription, handle, epoch)),
            Ok(Err(e)) if e.kind() == ErrorKind::StreamNotFound => {
                self.registry.mark_missing_at(stream, epoch);
                Err(OpenError::StreamMissing(Arc::new(e)))
            }
            Ok(Err(e)) => {
                if e.kind().is_transient() {
                    self.connections
                        .report_if_unhealthy(&handle, Arc::new(e.clone()))
                        .await;
                }
                Err(OpenError::Failed(Arc::new(e)))
            }
            Err(_) => Err(OpenError::Failed(Arc::new(
                Attempt::<B::Error>::TimedOut(self.operation_timeout),
            ))),
        }
    }
}

/// Owns one broker subscription at a time and replaces it when it is lost.
struct Supervisor<B>
where
    B: Broker,
{
    consumer: Consumer<B>,
    stream: String,
    offset: OffsetSpec,
    sink: DeliverySink,
    state: watch::Sender<FeedState>,
    outcome: Arc<Mutex<Option<Error>>>,
    cancel: CancellationToken,
}

impl<B> Supervisor<B>
where
    B: Broker,
{
    async fn run(
        self,
        mut subscription: Subscription<B>,
        mut handle: ConnectionHandle<B>,
        mut epoch: u64,
    ) {
        let max_attempts = self.consumer.retry.max_attempts.max(1);
        let mut attempts = 0;
        let mut progress = self.sink.delivered();

        loop {
            let ended = tokio::select! {
                () = self.cancel.cancelled() => None,
                ended = subscription.wait() => Some(ended),
            };

            let ended = match ended {
                Some(ended) if !self.sink.is_closed() => ended,
                _ => {
                    self.release(&subscription).await;
                    self.state.send_replace(FeedState::Cancelled);
                    debug!(stream = %self.stream, "feed cancelled");
                    return;
                }
            };

            self.state.send_replace(FeedState::Lost);

            let mut stream_lost = false;

            match &ended {
                Ok(()) => warn!(stream = %self.stream, "subscription ended unexpectedly"),
                Err(e) => {
                    warn!(stream = %self.stream, error = %e, "subscription lost");
                    stream_lost = e.kind() == ErrorKind::StreamNotFound;

                    if stream_lost {
                        self.consumer.registry.mark_missing_at(&self.stream, epoch);
                    }

                    if e.kind().is_transient() {
                        self.consumer
                            .connections
                            .report_if_unhealthy(&handle, Arc::new(e.clone()))
                            .await;
                    }
                }
            }

            let delivered = self.sink.delivered();
            if delivered > progress {
                attempts = 0;
                progress = delivered;
            }

            loop {
                if attempts >= max_attempts {
                    warn!(stream = %self.stream, attempts, "giving up resubscribing");
                    let stream = self.stream.clone();
                    self.finish(Error::SubscriptionLost { stream, attempts });
                    return;
                }

                let delay = if attempts == 0 {
                    Duration::ZERO
                } else {
                    self.consumer.retry.delay_after(attempts).unwrap_or_default()
                };

                attempts += 1;
                self.state.send_replace(FeedState::Resubscribing);

                let offset = if stream_lost {
                    OffsetSpec::First
                } else {
                    self.sink
                        .resume_offset()
                        .map_or(self.offset, OffsetSpec::Offset)
                };

                let opened = tokio::select! {
                    () = self.cancel.cancelled() => None,
                    opened = async {
                        tokio::time::sleep(delay).await;
                        if stream_lost {
                            self.sink.reset();
                        }
                        self.consumer.open(&self.stream, offset, &self.sink).await
                    } => Some(opened),
                };

                let Some(opened) = opened else {
                    self.state.send_replace(FeedState::Cancelled);
                    return;
                };

                match opened {
                    Ok((resubscribed, current, incarnation)) => {
                        subscription = resubscribed;
                        handle = current;
                        epoch = incarnation;
                        self.state.send_replace(FeedState::Active);
                        info!(stream = %self.stream, %offset, attempts, "resubscribed");
                        break;
                    }
                    Err(OpenError::Upstream(e @ (Error::Shutdown | Error::Configuration(_)))) => {
                        self.finish(e);
                        return;
                    }
                    Err(OpenError::Upstream(e)) => {
                        warn!(stream = %self.stream, attempts, error = %e, "resubscribe failed");
                    }
                    Err(OpenError::StreamMissing(cause)) => {
                        warn!(stream = %self.stream, attempts, error = %cause, "stream missing, recreating");
                        stream_lost = true;
                    }
                    Err(OpenError::Failed(cause)) => {
                        warn!(stream = %self.stream, attempts, error = %cause, "resubscribe failed");
                    }
                }
            }
        }
    }

    async fn release(&self, subscription: &Subscription<B>) {
        let timeout = self.consumer.operation_timeout;

        match tokio::time::timeout(timeout, subscription.unsubscribe()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(stream = %self.stream, error = %e, "error unsubscribing"),
            Err(_) => warn!(stream = %self.stream, ?timeout, "unsubscribe timed out"),
        }
    }

    /// Ends the feed with `error`, reported after everything still buffered.
    fn finish(self, error: Error) {
        *self.outcome.lock() = Some(error);
        self.state.send_replace(FeedState::Unsubscribed);
    }
}

/// A sequential feed of deliveries from one stream.
///
/// Deliveries arrive in broker order without duplicates or gaps, across
/// reconnects. Closing or dropping the feed releases the broker
/// subscription and discards anything still buffered.
#[derive(Debug)]
pub struct Feed {
    stream: String,
    receiver: mpsc::Receiver<Delivery>,
    outcome: Arc<Mutex<Option<Error>>>,
    state: watch::Receiver<FeedState>,
    cancel: CancellationToken,
    _guard: DropGuard,
    _task: JoinHandle<()>,
    closed: bool,
}

impl Feed {
    /// Waits for the next delivery.
    ///
    /// Returns `None` once the feed is closed. A feed that lost its
    /// subscription for good yields the error once, after every buffered
    /// delivery.
    pub async fn next(&mut self) -> Option<Result<Delivery, Error>> {
        if self.closed {
            return None;
        }

        match self.receiver.recv().await {
            Some(delivery) => Some(Ok(delivery)),
            None => self.outcome.lock().take().map(Err),
        }
    }

    /// Takes the next delivery if one is buffered, without waiting.
    pub fn try_next(&mut self) -> Option<Result<Delivery, Error>> {
        if self.closed {
            return None;
        }

        match self.receiver.try_recv() {
            Ok(delivery) => Some(Ok(delivery)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.outcome.lock().take().map(Err),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// The subscribed stream.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    /// Number of deliveries waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.receiver.len()
    }

    /// Stops the feed. Buffered deliveries are discarded and the broker
    /// subscription is released in the background.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.cancel.cancel();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        self.outcome.lock().take();
    }
}

impl futures::Stream for Feed {
    type Item = Result<Delivery, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.closed {
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(delivery)) => Poll::Ready(Some(Ok(delivery))),
            Poll::Ready(None) => Poll::Ready(this.outcome.lock().take().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use courier_broker::{Credentials, Endpoint};
    use courier_broker_memory::MemoryBroker;
    use tokio::time::timeout;

    struct Fixture {
        broker: MemoryBroker,
        connections: ConnectionManager<MemoryBroker>,
        consumer: Consumer<MemoryBroker>,
        producer: crate::producer::Producer<MemoryBroker>,
    }

    fn fixture(buffer_capacity: usize) -> Fixture {
        let broker = MemoryBroker::new();
        let config = ClientConfig {
            connect_retry: RetryPolicy::fixed(2, Duration::from_millis(10)),
            send_retry: RetryPolicy::fixed(3, Duration::from_millis(10)),
            resubscribe_attempts: 3,
            buffer_capacity,
            ..ClientConfig::default()
        };
        let connections = ConnectionManager::new(broker.clone(), &config);
        let registry = StreamRegistry::new(connections.clone(), &config);

        Fixture {
            broker,
            consumer: Consumer::new(connections.clone(), registry.clone(), &config),
            producer: crate::producer::Producer::new(connections.clone(), registry, &config),
            connections,
        }
    }

    async fn send_all(fixture: &Fixture, stream: &str, range: std::ops::Range<u32>) {
        for i in range {
            fixture
                .producer
                .send(stream, Bytes::from(format!("m{i}")))
                .await
                .unwrap();
        }
    }

    async fn recv(feed: &mut Feed) -> Delivery {
        timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("feed stalled")
            .expect("feed ended")
            .expect("feed failed")
    }

    #[tokio::test]
    async fn test_delivers_in_order_from_first() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..5).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();

        assert_eq!(feed.state(), FeedState::Active);
        assert_eq!(feed.stream_name(), "orders");

        for expected in 0..5 {
            let delivery = recv(&mut feed).await;
            assert_eq!(delivery.offset, expected);
            assert_eq!(delivery.payload, Bytes::from(format!("m{expected}")));
        }

        assert!(feed.try_next().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_creates_missing_stream() {
        let fixture = fixture(16);

        let mut feed = fixture
            .consumer
            .subscribe("fresh", OffsetSpec::Next)
            .await
            .unwrap();

        assert!(fixture.broker.stream_exists("fresh"));

        send_all(&fixture, "fresh", 0..1).await;
        assert_eq!(recv(&mut feed).await.offset, 0);
    }

    #[tokio::test]
    async fn test_resumes_after_connection_loss() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..3).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();

        for expected in 0..3 {
            assert_eq!(recv(&mut feed).await.offset, expected);
        }

        fixture.broker.drop_connections();
        send_all(&fixture, "orders", 3..6).await;

        for expected in 3..6 {
            assert_eq!(recv(&mut feed).await.offset, expected);
        }

        assert_eq!(fixture.connections.generation(), Some(2));
        assert_eq!(fixture.broker.active_subscriptions(), 1);
    }

    /// Appends straight through a fresh broker connection. Completes
    /// without yielding, so the feed's supervisor cannot run in between.
    async fn append_directly(fixture: &Fixture, stream: &str, range: std::ops::Range<u32>) {
        let connection = fixture
            .broker
            .connect(&Endpoint::new("localhost", 4222), &Credentials::default())
            .await
            .unwrap();

        for i in range {
            connection
                .send(stream, Bytes::from(format!("m{i}")))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_next_feed_keeps_messages_sent_while_disconnected() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..2).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::Next)
            .await
            .unwrap();

        fixture.broker.drop_connections();
        append_directly(&fixture, "orders", 2..4).await;

        let first = recv(&mut feed).await;
        assert_eq!(first.offset, 2);
        assert_eq!(first.payload, Bytes::from("m2"));
        assert_eq!(recv(&mut feed).await.offset, 3);
        assert!(feed.try_next().is_none());
    }

    #[tokio::test]
    async fn test_last_n_feed_resumes_at_resolved_start() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..10).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::LastN(3))
            .await
            .unwrap();

        fixture.broker.drop_connections();
        append_directly(&fixture, "orders", 10..12).await;

        let mut offsets = Vec::new();
        for _ in 0..5 {
            offsets.push(recv(&mut feed).await.offset);
        }

        assert_eq!(offsets, vec![7, 8, 9, 10, 11]);
    }

    #[tokio::test]
    async fn test_state_walks_through_resubscription() {
        let fixture = fixture(16);

        let feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();
        assert_eq!(feed.state(), FeedState::Active);

        let mut states = feed.watch_state();
        states.borrow_and_update();

        let observed = tokio::spawn(async move {
            let mut seen = Vec::new();

            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                seen.push(state);

                if state == FeedState::Active {
                    break;
                }
            }

            seen
        });

        tokio::task::yield_now().await;

        // Every broker call now takes a while, so each state is held long
        // enough to be observed.
        fixture.broker.delay_operations(Duration::from_millis(20));
        fixture.broker.drop_connections();

        let seen = timeout(Duration::from_secs(5), observed)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            seen,
            vec![FeedState::Lost, FeedState::Resubscribing, FeedState::Active]
        );
        assert_eq!(feed.state(), FeedState::Active);
    }

    #[tokio::test]
    async fn test_restarts_from_first_after_stream_loss() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..2).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();

        assert_eq!(recv(&mut feed).await.offset, 0);
        assert_eq!(recv(&mut feed).await.offset, 1);

        fixture.broker.remove_stream("orders");

        let mut states = feed.watch_state();
        timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == FeedState::Active && fixture.broker.stream_exists("orders")),
        )
        .await
        .unwrap()
        .unwrap();

        send_all(&fixture, "orders", 10..11).await;

        let delivery = recv(&mut feed).await;
        assert_eq!(delivery.offset, 0);
        assert_eq!(delivery.payload, Bytes::from("m10"));
        assert_eq!(fixture.broker.create_count_for("orders"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_buffered_messages() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..2).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();

        // Let both messages reach the buffer before the connection dies.
        while feed.buffered() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        fixture.broker.refuse_all_connections();
        fixture.broker.drop_connections();

        assert_eq!(recv(&mut feed).await.offset, 0);
        assert_eq!(recv(&mut feed).await.offset, 1);

        let err = feed.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::SubscriptionLost { ref stream, attempts: 3 } if stream == "orders"
        ));
        assert!(feed.next().await.is_none());
        assert_eq!(feed.state(), FeedState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let fixture = fixture(16);
        send_all(&fixture, "orders", 0..3).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();
        assert_eq!(fixture.broker.active_subscriptions(), 1);

        feed.close();

        assert!(feed.next().await.is_none());
        assert!(feed.try_next().is_none());

        let mut states = feed.watch_state();
        timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == FeedState::Cancelled),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(fixture.broker.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_dropping_feed_releases_subscription() {
        let fixture = fixture(16);

        let feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();
        assert_eq!(fixture.broker.active_subscriptions(), 1);

        drop(feed);

        timeout(Duration::from_secs(5), async {
            while fixture.broker.active_subscriptions() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_full_buffer_holds_back_broker() {
        let fixture = fixture(4);
        send_all(&fixture, "orders", 0..20).await;

        let mut feed = fixture
            .consumer
            .subscribe("orders", OffsetSpec::First)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(feed.buffered(), 4);

        let offsets: Vec<u64> = {
            use futures::StreamExt;

            (&mut feed)
                .take(20)
                .map(|delivery| delivery.unwrap().offset)
                .collect()
                .await
        };

        assert_eq!(offsets, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_blank_stream_is_rejected() {
        let fixture = fixture(4);

        let err = fixture
            .consumer
            .subscribe(" ", OffsetSpec::First)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidStreamName(_)));
    }
}
