use crate::delivery::DeliverySink;
use crate::endpoint::{Credentials, Endpoint};
use crate::error::BrokerError;
use crate::offset::OffsetSpec;
use crate::subscription::BrokerSubscription;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// A broker client library, able to open connections.
#[async_trait]
pub trait Broker
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the broker.
    type Error: BrokerError;

    /// The connection type opened by the broker.
    type Connection: BrokerConnection<Error = Self::Error>;

    /// Opens a fresh connection.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Self::Connection, Self::Error>;
}

/// A single logical link to the broker.
///
/// Connections are cheap handles; clones share the underlying link.
#[async_trait]
pub trait BrokerConnection
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the connection.
    type Error: BrokerError;

    /// The subscription type returned by `subscribe`.
    type Subscription: BrokerSubscription<Error = Self::Error>;

    /// Creates a stream. Fails with a `StreamAlreadyExists` error if it exists.
    async fn create_stream(&self, name: &str) -> Result<(), Self::Error>;

    /// Deletes a stream and all of its messages.
    async fn delete_stream(&self, name: &str) -> Result<(), Self::Error>;

    /// Appends a message and waits for the broker's acknowledgement.
    /// Returns the offset assigned to the message.
    async fn send(&self, stream: &str, payload: Bytes) -> Result<u64, Self::Error>;

    /// Starts pushing messages from `offset` onwards into `sink` until
    /// unsubscribed, the sink closes, or the subscription is lost.
    ///
    /// Before returning, implementations record the absolute offset
    /// `offset` resolved to with [`DeliverySink::start_at`].
    async fn subscribe(
        &self,
        stream: &str,
        offset: OffsetSpec,
        sink: DeliverySink,
    ) -> Result<Self::Subscription, Self::Error>;

    /// Cheap liveness check that does not round-trip to the broker.
    async fn is_healthy(&self) -> bool;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;
}
