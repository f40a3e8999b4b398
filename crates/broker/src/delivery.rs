use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message pushed by the broker to a subscriber.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delivery {
    /// Stream the message was read from.
    pub stream: String,

    /// Broker-assigned offset of the message within its stream.
    pub offset: u64,

    /// Opaque payload.
    pub payload: Bytes,
}

impl Delivery {
    /// Creates a new delivery.
    pub fn new(stream: impl Into<String>, offset: u64, payload: Bytes) -> Self {
        Self {
            stream: stream.into(),
            offset,
            payload,
        }
    }

    /// Decodes the payload into a typed message.
    ///
    /// # Errors
    ///
    /// Returns the message type's conversion error if the payload is not a
    /// valid encoding of `M`.
    pub fn decode<M>(&self) -> Result<M, M::Error>
    where
        M: TryFrom<Bytes>,
    {
        M::try_from(self.payload.clone())
    }
}

/// The receiving side of a sink has gone away.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("delivery sink closed")]
pub struct SinkClosed;

#[derive(Debug, Default)]
struct Progress {
    start_offset: Mutex<Option<u64>>,
    last_offset: Mutex<Option<u64>>,
    delivered: AtomicU64,
}

/// Bounded hand-off from a broker receive loop into a subscriber's buffer.
///
/// `push` suspends while the buffer is full, so a slow reader throttles the
/// broker side instead of growing memory. Offsets at or below the last one
/// pushed are skipped, which makes resuming after a reconnect safe.
#[derive(Clone, Debug)]
pub struct DeliverySink {
    tx: mpsc::Sender<Delivery>,
    progress: Arc<Progress>,
}

impl DeliverySink {
    /// Creates a sink and the receiving end of its buffer.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        (
            Self {
                tx,
                progress: Arc::default(),
            },
            rx,
        )
    }

    /// Pushes a delivery, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] once the receiver has been dropped. The
    /// delivery is discarded in that case.
    pub async fn push(&self, delivery: Delivery) -> Result<(), SinkClosed> {
        let offset = delivery.offset;
        let last = *self.progress.last_offset.lock();

        if last.is_some_and(|last| offset <= last) {
            return Ok(());
        }

        self.tx.send(delivery).await.map_err(|_| SinkClosed)?;

        *self.progress.last_offset.lock() = Some(offset);
        self.progress.delivered.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Offset of the most recent delivery accepted into the buffer.
    #[must_use]
    pub fn last_offset(&self) -> Option<u64> {
        *self.progress.last_offset.lock()
    }

    /// Records the absolute offset a broker subscription resolved its
    /// starting position to.
    ///
    /// Brokers call this when a subscription is set up, so that relative
    /// positions such as [`crate::OffsetSpec::Next`] resume at the same
    /// place even if nothing was delivered before the subscription broke.
    pub fn start_at(&self, offset: u64) {
        *self.progress.start_offset.lock() = Some(offset);
    }

    /// Offset a resumed subscription should start from to avoid gaps and
    /// duplicates.
    ///
    /// The offset after the last delivery, or the resolved start offset if
    /// nothing has been delivered yet.
    #[must_use]
    pub fn resume_offset(&self) -> Option<u64> {
        self.last_offset()
            .map(|offset| offset.saturating_add(1))
            .or(*self.progress.start_offset.lock())
    }

    /// Forgets the start and last offsets. Used when the stream itself was
    /// replaced and its offsets start over.
    pub fn reset(&self) {
        *self.progress.start_offset.lock() = None;
        *self.progress.last_offset.lock() = None;
    }

    /// Number of deliveries accepted into the buffer so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.progress.delivered.load(Ordering::Relaxed)
    }

    /// Number of deliveries currently waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes when the receiver has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::{Deserialize, Serialize};
    use tokio::time::{Duration, timeout};

    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    struct ChatMessage {
        room: String,
        body: String,
    }

    impl TryFrom<Bytes> for ChatMessage {
        type Error = serde_json::Error;

        fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
            serde_json::from_slice(&bytes)
        }
    }

    fn delivery(offset: u64) -> Delivery {
        Delivery::new("orders", offset, Bytes::from(format!("message-{offset}")))
    }

    #[tokio::test]
    async fn test_push_in_order() {
        let (sink, mut rx) = DeliverySink::channel(4);

        sink.push(delivery(0)).await.unwrap();
        sink.push(delivery(1)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().offset, 0);
        assert_eq!(rx.recv().await.unwrap().offset, 1);
        assert_eq!(sink.delivered(), 2);
        assert_eq!(sink.resume_offset(), Some(2));
    }

    #[tokio::test]
    async fn test_replayed_offsets_are_skipped() {
        let (sink, mut rx) = DeliverySink::channel(4);

        sink.push(delivery(0)).await.unwrap();
        sink.push(delivery(1)).await.unwrap();
        sink.push(delivery(1)).await.unwrap();
        sink.push(delivery(0)).await.unwrap();
        sink.push(delivery(2)).await.unwrap();

        let offsets: Vec<u64> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|d| d.offset)
        .collect();

        assert_eq!(offsets, vec![0, 1, 2]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resume_from_start_before_any_delivery() {
        let (sink, _rx) = DeliverySink::channel(4);
        assert_eq!(sink.resume_offset(), None);

        sink.start_at(7);
        assert_eq!(sink.resume_offset(), Some(7));

        sink.push(delivery(7)).await.unwrap();
        assert_eq!(sink.resume_offset(), Some(8));

        sink.start_at(8);
        assert_eq!(sink.resume_offset(), Some(8));

        sink.reset();
        assert_eq!(sink.resume_offset(), None);
    }

    #[tokio::test]
    async fn test_reset_accepts_restarted_offsets() {
        let (sink, mut rx) = DeliverySink::channel(4);

        sink.push(delivery(5)).await.unwrap();
        sink.reset();
        sink.push(delivery(0)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().offset, 5);
        assert_eq!(rx.recv().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_blocks_push() {
        let (sink, mut rx) = DeliverySink::channel(2);

        sink.push(delivery(0)).await.unwrap();
        sink.push(delivery(1)).await.unwrap();
        assert_eq!(sink.buffered(), 2);

        let blocked = timeout(Duration::from_millis(50), sink.push(delivery(2))).await;
        assert!(blocked.is_err(), "push should wait for buffer space");

        rx.recv().await.unwrap();
        timeout(Duration::from_millis(50), sink.push(delivery(2)))
            .await
            .expect("push should complete once space frees up")
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (sink, rx) = DeliverySink::channel(2);
        drop(rx);

        assert!(sink.is_closed());
        assert_eq!(sink.push(delivery(0)).await, Err(SinkClosed));
        assert_eq!(sink.delivered(), 0);
    }

    #[test]
    fn test_decode_typed_payload() {
        let message = ChatMessage {
            room: "lobby".to_string(),
            body: "hello".to_string(),
        };
        let payload = Bytes::from(serde_json::to_vec(&message).unwrap());

        let decoded: ChatMessage = Delivery::new("lobby", 0, payload).decode().unwrap();
        assert_eq!(decoded, message);

        let garbage = Delivery::new("lobby", 1, Bytes::from_static(b"not json"));
        assert!(garbage.decode::<ChatMessage>().is_err());
    }
}
