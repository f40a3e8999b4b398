use courier_broker::{BrokerError, ErrorKind};
use thiserror::Error;

/// Errors that can occur in the in-memory broker.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The broker refused the connection attempt.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection was closed or dropped.
    #[error("connection closed")]
    ConnectionClosed,

    /// The presented credentials were not accepted.
    #[error("invalid credentials for user `{0}`")]
    InvalidCredentials(String),

    /// The endpoint cannot be connected to.
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),

    /// Stream not found.
    #[error("stream `{0}` not found")]
    StreamNotFound(String),

    /// Stream already exists.
    #[error("stream `{0}` already exists")]
    StreamAlreadyExists(String),

    /// The broker refused to create the stream.
    #[error("stream `{0}` rejected")]
    Rejected(String),

    /// Injected transient failure.
    #[error("broker unavailable")]
    Unavailable,
}

impl BrokerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionRefused | Self::ConnectionClosed | Self::Unavailable => {
                ErrorKind::Unavailable
            }
            Self::InvalidCredentials(_) | Self::InvalidEndpoint(_) => ErrorKind::Configuration,
            Self::StreamNotFound(_) => ErrorKind::StreamNotFound,
            Self::StreamAlreadyExists(_) => ErrorKind::StreamAlreadyExists,
            Self::Rejected(_) => ErrorKind::Rejected,
        }
    }
}
