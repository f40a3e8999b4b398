use crate::Error;

use async_nats::Client;
use async_nats::connection::State;
use async_nats::jetstream::consumer::DeliverPolicy;
use async_nats::jetstream::consumer::pull::OrderedConfig;
use async_nats::jetstream::stream::{Config as StreamConfig, Info as StreamInfo};
use async_nats::jetstream::{self, Context as JetStreamContext};
use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::{
    BrokerConnection, BrokerError, Delivery, DeliverySink, ErrorKind, OffsetSpec,
    SubscriptionTask,
};
use futures::StreamExt;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

/// How often a live subscription checks that its stream was not replaced.
const STREAM_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Connection to a NATS server.
#[derive(Clone, Debug)]
pub struct NatsConnection {
    client: Client,
    jetstream: JetStreamContext,
}

impl NatsConnection {
    pub(crate) fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());

        Self { client, jetstream }
    }

    async fn stream(&self, stream: &str) -> Result<jetstream::stream::Stream, Error> {
        self.jetstream
            .get_stream(stream)
            .await
            .map_err(|e| Error::GetStream {
                stream: stream.to_string(),
                kind: e.kind(),
            })
    }

    /// Whether `stream` is gone or no longer the stream `original` describes.
    async fn is_replaced(&self, stream: &str, original: &StreamInfo) -> bool {
        match self.stream(stream).await {
            Ok(current) => current.cached_info().created != original.created,
            Err(e) => e.kind() == ErrorKind::StreamNotFound,
        }
    }
}

/// Deliver policy for `offset` and the absolute sequence it starts at.
fn start_position(info: &StreamInfo, offset: OffsetSpec) -> (DeliverPolicy, u64) {
    let last = info.state.last_sequence;

    let start_sequence = match offset {
        OffsetSpec::First => return (DeliverPolicy::All, info.state.first_sequence.max(1)),
        OffsetSpec::Next => last + 1,
        OffsetSpec::Offset(n) => n.max(1),
        OffsetSpec::LastN(n) => last.saturating_sub(n) + 1,
    };

    (
        DeliverPolicy::ByStartSequence { start_sequence },
        start_sequence,
    )
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    type Error = Error;
    type Subscription = SubscriptionTask<Error>;

    async fn create_stream(&self, name: &str) -> Result<(), Error> {
        self.jetstream
            .create_stream(StreamConfig {
                name: name.to_string(),
                subjects: vec![name.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| Error::CreateStream {
                stream: name.to_string(),
                kind: e.kind(),
            })?;

        debug!(stream = %name, "jetstream stream created");

        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), Error> {
        self.jetstream
            .delete_stream(name)
            .await
            .map_err(|e| Error::DeleteStream {
                stream: name.to_string(),
                kind: e.kind(),
            })?;

        Ok(())
    }

    async fn send(&self, stream: &str, payload: Bytes) -> Result<u64, Error> {
        let publish_error = |e: jetstream::context::PublishError| Error::Publish {
            stream: stream.to_string(),
            kind: e.kind(),
        };

        let ack = self
            .jetstream
            .publish(stream.to_string(), payload)
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        trace!(%stream, sequence = ack.sequence, "publish acknowledged");

        Ok(ack.sequence)
    }

    async fn subscribe(
        &self,
        stream: &str,
        offset: OffsetSpec,
        sink: DeliverySink,
    ) -> Result<SubscriptionTask<Error>, Error> {
        let nats_stream = self.stream(stream).await?;

        let info = nats_stream.cached_info().clone();
        let (deliver_policy, start) = start_position(&info, offset);

        let consumer = nats_stream
            .create_consumer(OrderedConfig {
                deliver_policy,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Consumer {
                stream: stream.to_string(),
                kind: e.kind(),
            })?;

        let mut messages = consumer.messages().await.map_err(|e| Error::Messages {
            stream: stream.to_string(),
            kind: e.kind(),
        })?;

        debug!(%stream, %offset, start, "ordered consumer started");

        sink.start_at(start);

        let connection = self.clone();
        let name = stream.to_string();

        Ok(SubscriptionTask::spawn(stream, move |cancel| async move {
            // The ordered consumer silently re-attaches to a stream recreated
            // under the same name, whose sequences start over.
            let mut checks = tokio::time::interval_at(
                Instant::now() + STREAM_CHECK_INTERVAL,
                STREAM_CHECK_INTERVAL,
            );

            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = sink.closed() => return Ok(()),
                    _ = checks.tick() => {
                        if connection.is_replaced(&name, &info).await {
                            return Err(Error::StreamLost(name));
                        }
                        continue;
                    }
                    next = messages.next() => next,
                };

                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        if connection.is_replaced(&name, &info).await {
                            return Err(Error::StreamLost(name));
                        }

                        return Err(Error::Ordered {
                            stream: name,
                            kind: e.kind(),
                        });
                    }
                    None => return Ok(()),
                };

                let sequence = message
                    .info()
                    .map_err(|e| Error::MessageInfo(e.to_string()))?
                    .stream_sequence;

                let delivery = Delivery::new(name.clone(), sequence, message.message.payload.clone());

                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    pushed = sink.push(delivery) => {
                        if pushed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }))
    }

    async fn is_healthy(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    async fn close(&self) -> Result<(), Error> {
        self.client
            .drain()
            .await
            .map_err(|e| Error::Drain(e.to_string()))
    }
}
