//! Abstract interface to a persistent message-stream broker.
//!
//! The messaging core never speaks a wire protocol itself. It drives a
//! [`Broker`] to open connections, and a [`BrokerConnection`] to create,
//! delete, append to and subscribe to named streams. Backends classify
//! their failures through [`BrokerError::kind`] so the core can tell a
//! missing stream from a flaky network.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Brokers open connections; connections operate on streams.
pub mod connection;

/// Deliveries are pushed by the broker into a bounded sink.
pub mod delivery;

/// Where the broker lives and how to authenticate.
pub mod endpoint;

/// Error classification shared by every backend.
pub mod error;

/// Where a subscription starts reading.
pub mod offset;

/// Live subscriptions on a stream.
pub mod subscription;

pub use connection::{Broker, BrokerConnection};
pub use delivery::{Delivery, DeliverySink, SinkClosed};
pub use endpoint::{Credentials, Endpoint};
pub use error::{BrokerError, ErrorKind};
pub use offset::{OffsetSpec, ParseOffsetError};
pub use subscription::{BrokerSubscription, SubscriptionTask};
