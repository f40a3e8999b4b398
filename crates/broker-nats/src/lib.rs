//! NATS JetStream implementation of the broker interface.
//!
//! Each stream is a JetStream stream whose only subject is the stream name.
//! Offsets are JetStream stream sequences, which start at 1.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connection;
mod error;

pub use connection::NatsConnection;
pub use error::Error;

use std::time::Duration;

use async_nats::ConnectOptions;
use async_trait::async_trait;
use courier_broker::{Broker, Credentials, Endpoint};
use tracing::{debug, info};

/// Options for the NATS broker.
#[derive(Clone, Debug)]
pub struct NatsBrokerOptions {
    /// Name the client announces to the server.
    pub client_name: Option<String>,

    /// Bound on establishing the TCP connection and handshake.
    pub connection_timeout: Duration,
}

impl Default for NatsBrokerOptions {
    fn default() -> Self {
        Self {
            client_name: None,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens connections to a NATS server with JetStream enabled.
#[derive(Clone, Debug, Default)]
pub struct NatsBroker {
    options: NatsBrokerOptions,
}

impl NatsBroker {
    /// Creates a new broker with the given options.
    #[must_use]
    pub const fn new(options: NatsBrokerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Broker for NatsBroker {
    type Error = Error;
    type Connection = NatsConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<NatsConnection, Error> {
        let mut options = ConnectOptions::with_user_and_password(
            credentials.username.clone(),
            credentials.password.clone(),
        )
        .connection_timeout(self.options.connection_timeout);

        if let Some(name) = &self.options.client_name {
            options = options.name(name);
        }

        debug!(%endpoint, "connecting to nats");

        let client = options
            .connect(endpoint.to_string())
            .await
            .map_err(|e| Error::Connect(e.kind()))?;

        info!(%endpoint, "connected to nats");

        Ok(NatsConnection::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use courier_broker::{
        BrokerConnection, BrokerError, BrokerSubscription, DeliverySink, ErrorKind, OffsetSpec,
    };
    use serial_test::serial;
    use tokio::time::timeout;

    async fn connect() -> NatsConnection {
        NatsBroker::default()
            .connect(&Endpoint::new("localhost", 4222), &Credentials::default())
            .await
            .unwrap()
    }

    async fn fresh_stream(connection: &NatsConnection, name: &str) {
        let _ = connection.delete_stream(name).await;
        connection.create_stream(name).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_send_returns_sequence() {
        let connection = connect().await;
        fresh_stream(&connection, "courier_test_send").await;

        let first = connection
            .send("courier_test_send", Bytes::from("a"))
            .await
            .unwrap();
        let second = connection
            .send("courier_test_send", Bytes::from("b"))
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);

        connection.delete_stream("courier_test_send").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_send_to_missing_stream() {
        let connection = connect().await;
        let _ = connection.delete_stream("courier_test_missing").await;

        let err = connection
            .send("courier_test_missing", Bytes::from("a"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StreamNotFound);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_subscribe_last_n() {
        let connection = connect().await;
        fresh_stream(&connection, "courier_test_last").await;

        for i in 0..5 {
            connection
                .send("courier_test_last", Bytes::from(format!("m{i}")))
                .await
                .unwrap();
        }

        let (sink, mut rx) = DeliverySink::channel(10);
        let subscription = connection
            .subscribe("courier_test_last", OffsetSpec::LastN(2), sink)
            .await
            .unwrap();

        let first = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.offset, 4);
        assert_eq!(first.payload, Bytes::from("m3"));
        assert_eq!(second.offset, 5);

        subscription.unsubscribe().await.unwrap();
        connection.delete_stream("courier_test_last").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_subscribe_next_records_start() {
        let connection = connect().await;
        fresh_stream(&connection, "courier_test_next").await;

        for i in 0..3 {
            connection
                .send("courier_test_next", Bytes::from(format!("m{i}")))
                .await
                .unwrap();
        }

        let (sink, _rx) = DeliverySink::channel(10);
        let subscription = connection
            .subscribe("courier_test_next", OffsetSpec::Next, sink.clone())
            .await
            .unwrap();

        assert_eq!(sink.resume_offset(), Some(4));

        subscription.unsubscribe().await.unwrap();
        connection.delete_stream("courier_test_next").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_replaced_stream_ends_subscription_as_not_found() {
        let connection = connect().await;
        fresh_stream(&connection, "courier_test_replaced").await;

        let (sink, _rx) = DeliverySink::channel(10);
        let subscription = connection
            .subscribe("courier_test_replaced", OffsetSpec::First, sink)
            .await
            .unwrap();

        connection.delete_stream("courier_test_replaced").await.unwrap();
        connection.create_stream("courier_test_replaced").await.unwrap();

        let err = timeout(Duration::from_secs(60), subscription.wait())
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StreamNotFound);

        connection.delete_stream("courier_test_replaced").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_wrong_port_is_unavailable() {
        let err = NatsBroker::new(NatsBrokerOptions {
            connection_timeout: Duration::from_millis(500),
            ..NatsBrokerOptions::default()
        })
        .connect(&Endpoint::new("localhost", 1), &Credentials::default())
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
