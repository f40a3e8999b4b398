use crate::config::ClientConfig;
use crate::connection::{ConnectionHandle, ConnectionLost, ConnectionManager};
use crate::consumer::{Consumer, Feed};
use crate::error::Error;
use crate::producer::Producer;
use crate::registry::{InitReport, StreamRegistry};

use std::fmt::{self, Debug};

use bytes::Bytes;
use courier_broker::{Broker, OffsetSpec};
use tracing::info;

/// Entry point for applications: one connection, shared by a registry, a
/// producer and a consumer.
///
/// Clones share everything. Create one per broker and pass it around.
pub struct StreamClient<B>
where
    B: Broker,
{
    config: ClientConfig,
    connections: ConnectionManager<B>,
    registry: StreamRegistry<B>,
    producer: Producer<B>,
    consumer: Consumer<B>,
}

impl<B> Clone for StreamClient<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            connections: self.connections.clone(),
            registry: self.registry.clone(),
            producer: self.producer.clone(),
            consumer: self.consumer.clone(),
        }
    }
}

impl<B> Debug for StreamClient<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("connections", &self.connections)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<B> StreamClient<B>
where
    B: Broker,
{
    /// Wires a client for `broker`. Nothing is contacted until first use.
    #[must_use]
    pub fn new(broker: B, config: ClientConfig) -> Self {
        let connections = ConnectionManager::new(broker, &config);
        let registry = StreamRegistry::new(connections.clone(), &config);
        let producer = Producer::new(connections.clone(), registry.clone(), &config);
        let consumer = Consumer::new(connections.clone(), registry.clone(), &config);

        Self {
            config,
            connections,
            registry,
            producer,
            consumer,
        }
    }

    /// Establishes the broker connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<ConnectionHandle<B>, Error> {
        self.connections.connect().await
    }

    /// Ensures every named stream exists. Used at startup.
    pub async fn init_streams<I, S>(&self, names: I) -> InitReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.init_streams(names).await
    }

    /// Ensures one stream exists.
    ///
    /// # Errors
    ///
    /// See [`StreamRegistry::ensure_stream`].
    pub async fn ensure_stream(&self, name: &str) -> Result<(), Error> {
        self.registry.ensure_stream(name).await.map(|_| ())
    }

    /// Sends a payload and returns its offset.
    ///
    /// # Errors
    ///
    /// See [`Producer::send`].
    pub async fn send(&self, stream: &str, payload: impl Into<Bytes>) -> Result<u64, Error> {
        self.producer.send(stream, payload.into()).await
    }

    /// Serializes and sends a typed message.
    ///
    /// # Errors
    ///
    /// See [`Producer::send_message`].
    pub async fn send_message<M>(&self, stream: &str, message: M) -> Result<u64, Error>
    where
        M: TryInto<Bytes>,
        M::Error: std::error::Error + Send + Sync + 'static,
    {
        self.producer.send_message(stream, message).await
    }

    /// Subscribes to a stream.
    ///
    /// # Errors
    ///
    /// See [`Consumer::subscribe`].
    pub async fn subscribe(&self, stream: &str, offset: OffsetSpec) -> Result<Feed, Error> {
        self.consumer.subscribe(stream, offset).await
    }

    /// Registers a callback for connection failures.
    pub fn on_connection_lost<F>(&self, handler: F)
    where
        F: Fn(&ConnectionLost) + Send + Sync + 'static,
    {
        self.connections.on_connection_lost(handler);
    }

    /// Closes the connection. Open feeds end with [`Error::Shutdown`].
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
        info!("stream client shut down");
    }

    /// The configuration the client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The connection manager.
    #[must_use]
    pub const fn connections(&self) -> &ConnectionManager<B> {
        &self.connections
    }

    /// The stream registry.
    #[must_use]
    pub const fn registry(&self) -> &StreamRegistry<B> {
        &self.registry
    }

    /// The producer.
    #[must_use]
    pub const fn producer(&self) -> &Producer<B> {
        &self.producer
    }

    /// The consumer.
    #[must_use]
    pub const fn consumer(&self) -> &Consumer<B> {
        &self.consumer
    }
}
