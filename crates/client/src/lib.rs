//! Resilient client for persistent message-stream brokers.
//!
//! A [`StreamClient`] keeps one long-lived connection to the broker,
//! creates streams on demand, and keeps producing and consuming across
//! transient failures:
//!
//! - the [`ConnectionManager`] reconnects with bounded retries,
//! - the [`StreamRegistry`] recreates streams that disappeared,
//! - the [`Producer`] resends after recovery,
//! - the [`Consumer`] resubscribes and resumes where its [`Feed`] left off.
//!
//! The broker itself is reached through the [`courier_broker::Broker`]
//! trait.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod inflight;

/// Client configuration.
pub mod config;

/// Owner of the shared broker connection.
pub mod connection;

/// Subscriptions and feeds.
pub mod consumer;

/// Errors surfaced by the client.
pub mod error;

/// Sending to streams.
pub mod producer;

/// Known streams and their creation.
pub mod registry;

/// Bounded retry with backoff.
pub mod retry;

pub use client::StreamClient;
pub use config::{AddressMode, ClientConfig, ConfigError};
pub use connection::{ConnectionHandle, ConnectionLost, ConnectionManager, ConnectionState};
pub use consumer::{Consumer, Feed, FeedState};
pub use error::{Cause, ClientResult, Error};
pub use producer::Producer;
pub use registry::{InitReport, StreamRegistry, StreamState};
pub use retry::{Attempt, Backoff, Decision, RetryError, RetryPolicy};

pub use courier_broker::{Credentials, Delivery, Endpoint, OffsetSpec};
