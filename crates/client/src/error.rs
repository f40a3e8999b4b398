//! Errors surfaced by the messaging client.
//!
//! Transient broker failures are retried internally and only show up here
//! once a retry budget is exhausted. Every terminal variant carries the
//! stream it concerns, how many attempts were made, and the last cause.

use crate::retry::Decision;

use std::error::Error as StdError;
use std::sync::Arc;

use courier_broker::BrokerError;
use thiserror::Error;

/// Shared, type-erased cause of a failure.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Errors that can occur in the messaging client.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// No connection could be established within the retry budget.
    #[error("broker connection unavailable after {attempts} attempt(s): {cause}")]
    ConnectionUnavailable {
        /// Connection attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        cause: Cause,
    },

    /// The broker address or credentials are wrong. Never retried.
    #[error("invalid broker configuration: {0}")]
    Configuration(#[source] Cause),

    /// Stream names must not be blank.
    #[error("invalid stream name `{0}`")]
    InvalidStreamName(String),

    /// A stream could not be created.
    #[error("failed to create stream `{stream}` after {attempts} attempt(s): {cause}")]
    StreamCreateFailed {
        /// The stream.
        stream: String,
        /// Create attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        cause: Cause,
    },

    /// A stream could not be deleted.
    #[error("failed to delete stream `{stream}`: {cause}")]
    StreamDeleteFailed {
        /// The stream.
        stream: String,
        /// What went wrong.
        #[source]
        cause: Cause,
    },

    /// A message could not be sent.
    #[error("failed to send to `{stream}` after {attempts} attempt(s): {cause}")]
    SendFailed {
        /// The stream.
        stream: String,
        /// Send attempts made, across recreations.
        attempts: u32,
        /// Last failure.
        #[source]
        cause: Cause,
    },

    /// A subscription could not be set up.
    #[error("failed to subscribe to `{stream}` after {attempts} attempt(s): {cause}")]
    SubscribeFailed {
        /// The stream.
        stream: String,
        /// Subscribe attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        cause: Cause,
    },

    /// An established subscription was lost and could not be restored.
    #[error("subscription to `{stream}` lost after {attempts} resubscribe attempt(s)")]
    SubscriptionLost {
        /// The stream.
        stream: String,
        /// Consecutive resubscribe attempts made without progress.
        attempts: u32,
    },

    /// A typed message could not be encoded.
    #[error("failed to serialize message: {0}")]
    Serialization(#[source] Cause),

    /// A payload could not be decoded into a typed message.
    #[error("failed to deserialize message: {0}")]
    Deserialization(#[source] Cause),

    /// The client has been shut down.
    #[error("client has been shut down")]
    Shutdown,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, Error>;

impl Error {
    /// Create a serialization error from any error type.
    pub fn serialization<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Serialization(Arc::new(err))
    }

    /// Create a deserialization error from any error type.
    pub fn deserialization<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Deserialization(Arc::new(err))
    }

    /// Name of the stream the error concerns, if any.
    #[must_use]
    pub fn stream(&self) -> Option<&str> {
        match self {
            Self::InvalidStreamName(stream)
            | Self::StreamCreateFailed { stream, .. }
            | Self::StreamDeleteFailed { stream, .. }
            | Self::SendFailed { stream, .. }
            | Self::SubscribeFailed { stream, .. }
            | Self::SubscriptionLost { stream, .. } => Some(stream),
            _ => None,
        }
    }

    /// Number of attempts made before giving up, if the operation was retried.
    #[must_use]
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::ConnectionUnavailable { attempts, .. }
            | Self::StreamCreateFailed { attempts, .. }
            | Self::SendFailed { attempts, .. }
            | Self::SubscribeFailed { attempts, .. }
            | Self::SubscriptionLost { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Failure of one step that first acquires a connection, then calls the
/// broker.
#[derive(Clone, Debug, Error)]
pub(crate) enum StepError<E>
where
    E: StdError + 'static,
{
    /// No usable connection.
    #[error(transparent)]
    Connection(Error),

    /// The broker call failed.
    #[error(transparent)]
    Broker(E),
}

impl<E> StepError<E>
where
    E: BrokerError,
{
    /// Transient broker failures are worth another attempt; anything else,
    /// including a missing connection, is final for this step.
    pub(crate) fn decision(&self) -> Decision {
        match self {
            Self::Broker(e) if e.kind().is_transient() => Decision::Retry,
            _ => Decision::Abort,
        }
    }
}

/// Checks a stream name before it reaches the broker.
pub(crate) fn validate_stream_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::InvalidStreamName(name.to_string()));
    }

    Ok(())
}
