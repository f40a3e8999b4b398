use async_nats::jetstream::consumer::StreamErrorKind;
use async_nats::jetstream::consumer::pull::OrderedErrorKind;
use async_nats::jetstream::context::{
    CreateStreamErrorKind, GetStreamErrorKind, PublishErrorKind, RequestErrorKind,
};
use async_nats::jetstream::stream::ConsumerErrorKind;
use async_nats::jetstream::{self, ErrorCode};
use async_nats::ConnectErrorKind;
use courier_broker::{BrokerError, ErrorKind};
use thiserror::Error;

/// Errors that can occur in the NATS broker.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Connecting to the server failed.
    #[error("failed to connect: {0}")]
    Connect(ConnectErrorKind),

    /// Stream creation failed.
    #[error("failed to create stream `{stream}`: {kind}")]
    CreateStream {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: CreateStreamErrorKind,
    },

    /// Stream deletion failed.
    #[error("failed to delete stream `{stream}`: {kind}")]
    DeleteStream {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: GetStreamErrorKind,
    },

    /// Looking up a stream failed.
    #[error("failed to get stream `{stream}`: {kind}")]
    GetStream {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: GetStreamErrorKind,
    },

    /// Stream info request failed.
    #[error("failed to get info for stream `{stream}`: {kind}")]
    StreamInfo {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: RequestErrorKind,
    },

    /// Publishing failed.
    #[error("failed to publish to `{stream}`: {kind}")]
    Publish {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: PublishErrorKind,
    },

    /// Creating the ordered consumer failed.
    #[error("failed to create consumer on `{stream}`: {kind}")]
    Consumer {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: ConsumerErrorKind,
    },

    /// Opening the message stream of a consumer failed.
    #[error("failed to open messages on `{stream}`: {kind}")]
    Messages {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: StreamErrorKind,
    },

    /// The ordered consumer broke while receiving.
    #[error("consumer on `{stream}` failed: {kind}")]
    Ordered {
        /// The stream.
        stream: String,
        /// What went wrong.
        kind: OrderedErrorKind,
    },

    /// The stream was deleted, or replaced by a new stream of the same name,
    /// while a subscription was reading it.
    #[error("stream `{0}` was deleted or replaced")]
    StreamLost(String),

    /// A received message carried no usable JetStream metadata.
    #[error("bad message metadata: {0}")]
    MessageInfo(String),

    /// Draining the connection failed.
    #[error("failed to drain connection: {0}")]
    Drain(String),
}

fn code_kind(error: &jetstream::Error) -> ErrorKind {
    match error.error_code() {
        ErrorCode::STREAM_NAME_EXIST => ErrorKind::StreamAlreadyExists,
        ErrorCode::STREAM_NOT_FOUND => ErrorKind::StreamNotFound,
        _ => ErrorKind::Rejected,
    }
}

fn get_stream_kind(kind: &GetStreamErrorKind) -> ErrorKind {
    match kind {
        GetStreamErrorKind::Request => ErrorKind::Unavailable,
        GetStreamErrorKind::EmptyName | GetStreamErrorKind::InvalidStreamName => {
            ErrorKind::Rejected
        }
        GetStreamErrorKind::JetStream(error) => code_kind(error),
    }
}

impl BrokerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(kind) => match kind {
                ConnectErrorKind::ServerParse
                | ConnectErrorKind::Authentication
                | ConnectErrorKind::AuthorizationViolation
                | ConnectErrorKind::Tls => ErrorKind::Configuration,
                _ => ErrorKind::Unavailable,
            },
            Self::CreateStream { kind, .. } => match kind {
                CreateStreamErrorKind::JetStream(error) => code_kind(error),
                CreateStreamErrorKind::NotFound => ErrorKind::StreamNotFound,
                CreateStreamErrorKind::TimedOut
                | CreateStreamErrorKind::JetStreamUnavailable
                | CreateStreamErrorKind::Response => ErrorKind::Unavailable,
                _ => ErrorKind::Rejected,
            },
            Self::DeleteStream { kind, .. } | Self::GetStream { kind, .. } => {
                get_stream_kind(kind)
            }
            Self::Publish { kind, .. } => match kind {
                PublishErrorKind::StreamNotFound => ErrorKind::StreamNotFound,
                PublishErrorKind::TimedOut
                | PublishErrorKind::BrokenPipe
                | PublishErrorKind::Other => ErrorKind::Unavailable,
                _ => ErrorKind::Rejected,
            },
            Self::Consumer { kind, .. } => match kind {
                ConsumerErrorKind::JetStream(error) => code_kind(error),
                ConsumerErrorKind::InvalidConsumerType | ConsumerErrorKind::InvalidName => {
                    ErrorKind::Rejected
                }
                _ => ErrorKind::Unavailable,
            },
            Self::StreamInfo { .. }
            | Self::Messages { .. }
            | Self::Ordered { .. }
            | Self::Drain(_) => ErrorKind::Unavailable,
            Self::StreamLost(_) => ErrorKind::StreamNotFound,
            Self::MessageInfo(_) => ErrorKind::Rejected,
        }
    }
}
