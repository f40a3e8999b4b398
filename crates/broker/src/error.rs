use std::error::Error;
use std::fmt::{self, Debug, Display};

/// Coarse classification of a broker failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The named stream does not exist on the broker.
    StreamNotFound,

    /// A stream with the requested name already exists.
    StreamAlreadyExists,

    /// The broker could not be reached, timed out, or the connection broke.
    Unavailable,

    /// Bad address, bad credentials or similar. Retrying cannot help.
    Configuration,

    /// The broker refused the request for some other reason.
    Rejected,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may succeed if retried.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamNotFound => write!(f, "stream not found"),
            Self::StreamAlreadyExists => write!(f, "stream already exists"),
            Self::Unavailable => write!(f, "broker unavailable"),
            Self::Configuration => write!(f, "configuration error"),
            Self::Rejected => write!(f, "rejected by broker"),
        }
    }
}

/// Marker trait for broker errors.
pub trait BrokerError: Clone + Debug + Error + Send + Sync + 'static {
    /// Classifies the error.
    fn kind(&self) -> ErrorKind;
}
