use std::{io, num::NonZeroU16};

use ntex_net::connect::ConnectError;
use ntex_util::future::Either;

use crate::codec::ConnectAckReason;
use crate::config::OptionsError;
use crate::context::ContextError;
use crate::topic::TopicError;

/// Protocol level errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// MQTT decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// MQTT encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Peer violated MQTT protocol specification
    #[error("Protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolationError),
    /// Keep alive timeout
    #[error("Keep Alive timeout")]
    KeepAliveTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolationError {
    #[error("{message}")]
    Custom { message: &'static str },
    #[error("{message}; received packet with type `{packet_type:b}`")]
    UnexpectedPacket { packet_type: u8, message: &'static str },
    #[error("{message}; packet id {packet_id}")]
    UnexpectedAck { packet_id: NonZeroU16, message: &'static str },
}

impl ProtocolError {
    pub(crate) fn generic_violation(message: &'static str) -> Self {
        Self::ProtocolViolation(ProtocolViolationError::Custom { message })
    }

    pub(crate) fn unexpected_packet(packet_type: u8, message: &'static str) -> Self {
        Self::ProtocolViolation(ProtocolViolationError::UnexpectedPacket {
            packet_type,
            message,
        })
    }

    pub(crate) fn unexpected_ack(packet_id: NonZeroU16, message: &'static str) -> Self {
        Self::ProtocolViolation(ProtocolViolationError::UnexpectedAck { packet_id, message })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid protocol")]
    InvalidProtocol,
    #[error("Invalid length")]
    InvalidLength,
    #[error("Malformed packet")]
    MalformedPacket,
    #[error("Unsupported protocol level")]
    UnsupportedProtocolLevel,
    #[error("Connect frame's reserved flag is set")]
    ConnectReservedFlagSet,
    #[error("ConnectAck frame's reserved flag is set")]
    ConnAckReservedFlagSet,
    #[error("Invalid client id")]
    InvalidClientId,
    #[error("Unsupported packet type")]
    UnsupportedPacketType,
    #[error("Packet id is required")]
    PacketIdRequired,
    #[error("Max size exceeded")]
    MaxSizeExceeded,
    #[error("utf8 error")]
    Utf8Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum EncodeError {
    #[error("Invalid length")]
    InvalidLength,
    #[error("Invalid topic name")]
    InvalidTopic,
    #[error("Packet id is required")]
    PacketIdRequired,
    #[error("Malformed packet")]
    MalformedPacket,
}

/// Error category, used by callers to implement their own retry policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad QoS, bad topic, unencodable payload or options; nothing was sent
    Validation,
    /// Caller deadline elapsed
    Timeout,
    /// Caller cancelled the operation
    Cancellation,
    /// No live session
    NotConnected,
    /// Session was torn down while the operation was outstanding
    SessionClosed,
    /// Malformed or unexpected frame, fatal to the session
    Protocol,
    /// Underlying connection failure, fatal to the session
    Transport,
}

/// Errors which can occur when using mqtt client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// QoS value outside of 0, 1, 2
    #[error("Invalid QoS value")]
    InvalidQoS,
    /// Topic name cannot be used for publishing
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    /// Payload serialization failed
    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Client options are not valid
    #[error("Invalid client options: {0}")]
    Options(#[from] OptionsError),
    /// Caller context is cancelled or its deadline is exceeded
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Client does not have live session
    #[error("Client is not connected")]
    NotConnected,
    /// Client already has live session or connect is in progress
    #[error("Client is already connected")]
    AlreadyConnected,
    /// Session is closed while operation was in progress
    #[error("Session is closed")]
    SessionClosed,
    /// All packet identifiers are in use
    #[error("All packet identifiers are in use")]
    PacketIdsExhausted,
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Connect negotiation failed
    #[error("Connect ack failed: {}", .0.reason())]
    Ack(ConnectAckReason),
    /// Handshake timeout
    #[error("Handshake timeout")]
    HandshakeTimeout,
    /// Peer disconnected
    #[error("Peer disconnected, error: {0:?}")]
    Disconnected(Option<io::Error>),
    /// Connect error
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),
}

impl ClientError {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::InvalidQoS
            | ClientError::InvalidTopic(_)
            | ClientError::Encoding(_)
            | ClientError::Options(_)
            | ClientError::AlreadyConnected
            | ClientError::PacketIdsExhausted
            | ClientError::Protocol(ProtocolError::Encode(_)) => ErrorKind::Validation,
            ClientError::Context(ContextError::Cancelled) => ErrorKind::Cancellation,
            ClientError::Context(ContextError::DeadlineExceeded) => ErrorKind::Timeout,
            ClientError::NotConnected => ErrorKind::NotConnected,
            ClientError::SessionClosed => ErrorKind::SessionClosed,
            ClientError::Protocol(_) | ClientError::Ack(_) => ErrorKind::Protocol,
            ClientError::HandshakeTimeout
            | ClientError::Disconnected(_)
            | ClientError::Connect(_) => ErrorKind::Transport,
        }
    }

    #[inline]
    /// Operation is aborted by context cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Context(ContextError::Cancelled))
    }

    #[inline]
    /// Operation is aborted because context deadline is exceeded
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ClientError::Context(ContextError::DeadlineExceeded))
    }
}

impl From<Either<EncodeError, io::Error>> for ClientError {
    fn from(err: Either<EncodeError, io::Error>) -> Self {
        match err {
            Either::Left(err) => ClientError::Protocol(ProtocolError::Encode(err)),
            Either::Right(err) => ClientError::Disconnected(Some(err)),
        }
    }
}

impl From<Either<DecodeError, io::Error>> for ClientError {
    fn from(err: Either<DecodeError, io::Error>) -> Self {
        match err {
            Either::Left(err) => ClientError::Protocol(ProtocolError::Decode(err)),
            Either::Right(err) => ClientError::Disconnected(Some(err)),
        }
    }
}

impl From<EncodeError> for ClientError {
    fn from(err: EncodeError) -> Self {
        ClientError::Protocol(ProtocolError::Encode(err))
    }
}
