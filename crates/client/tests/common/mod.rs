//! Shared setup for client integration tests.

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use courier_broker_memory::MemoryBroker;
use courier_client::{ClientConfig, RetryPolicy, StreamClient};
use serde::{Deserialize, Serialize};

/// Configuration with short delays so failure paths finish quickly.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        connect_retry: RetryPolicy::fixed(3, Duration::from_millis(20)),
        create_retry: RetryPolicy::fixed(3, Duration::from_millis(20)),
        send_retry: RetryPolicy::exponential(
            5,
            Duration::from_millis(10),
            Duration::from_millis(100),
        ),
        connect_timeout: Duration::from_millis(500),
        operation_timeout: Duration::from_secs(1),
        ..ClientConfig::default()
    }
}

/// A client over a fresh memory broker.
pub fn client() -> (MemoryBroker, StreamClient<MemoryBroker>) {
    client_with(fast_config())
}

/// A client over a fresh memory broker with the given configuration.
pub fn client_with(config: ClientConfig) -> (MemoryBroker, StreamClient<MemoryBroker>) {
    let broker = MemoryBroker::new();
    let client = StreamClient::new(broker.clone(), config);

    (broker, client)
}

/// Typed chat message, JSON encoded on the wire.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChatMessage {
    pub room: String,
    pub author: String,
    pub body: String,
}

impl ChatMessage {
    pub fn new(room: &str, author: &str, body: &str) -> Self {
        Self {
            room: room.to_string(),
            author: author.to_string(),
            body: body.to_string(),
        }
    }
}

impl TryFrom<Bytes> for ChatMessage {
    type Error = serde_json::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes)
    }
}

impl TryFrom<ChatMessage> for Bytes {
    type Error = serde_json::Error;

    fn try_from(message: ChatMessage) -> Result<Self, Self::Error> {
        serde_json::to_vec(&message).map(Self::from)
    }
}
