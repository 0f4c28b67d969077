use std::num::NonZeroU16;

use ntex_bytes::{ByteString, Bytes};

use crate::types::{packet_type, QoS};

prim_enum! {
    /// CONNACK return code
    pub enum ConnectAckReason {
        ConnectionAccepted = 0,
        UnacceptableProtocolVersion = 1,
        IdentifierRejected = 2,
        ServiceUnavailable = 3,
        BadUserNameOrPassword = 4,
        NotAuthorized = 5
    }
}

impl ConnectAckReason {
    /// Human readable description of the return code
    pub fn reason(self) -> &'static str {
        match self {
            ConnectAckReason::ConnectionAccepted => "Connection Accepted",
            ConnectAckReason::UnacceptableProtocolVersion => {
                "Connection Refused, unacceptable protocol version"
            }
            ConnectAckReason::IdentifierRejected => "Connection Refused, identifier rejected",
            ConnectAckReason::ServiceUnavailable => "Connection Refused, Server unavailable",
            ConnectAckReason::BadUserNameOrPassword => {
                "Connection Refused, bad user name or password"
            }
            ConnectAckReason::NotAuthorized => "Connection Refused, not authorized",
        }
    }

    #[inline]
    pub fn is_accepted(self) -> bool {
        self == ConnectAckReason::ConnectionAccepted
    }
}

/// Will message, published by the broker if the client goes away
/// without DISCONNECT
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: ByteString,
    pub message: Bytes,
}

/// CONNECT packet
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct Connect {
    /// Discard broker side session state
    pub clean_session: bool,
    /// Keep-alive interval in seconds, `0` disables keep-alive
    pub keep_alive: u16,
    pub last_will: Option<LastWill>,
    /// Empty id is allowed only together with `clean_session`
    pub client_id: ByteString,
    pub username: Option<ByteString>,
    pub password: Option<Bytes>,
}

/// PUBLISH packet, in either direction
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Publish {
    /// Re-delivery of an earlier attempt
    pub dup: bool,
    pub retain: bool,
    pub qos: QoS,
    pub topic: ByteString,
    /// Set for QoS 1 and 2 only
    pub packet_id: Option<NonZeroU16>,
    pub payload: Bytes,
}

/// CONNACK packet
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct ConnectAck {
    pub return_code: ConnectAckReason,
    /// Broker has stored state for this client id
    pub session_present: bool,
}

/// Packets used by a publishing client
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnectAck(ConnectAck),
    Publish(Publish),
    /// QoS 1 acknowledgment
    PublishAck { packet_id: NonZeroU16 },
    /// QoS 2, first phase acknowledgment
    PublishReceived { packet_id: NonZeroU16 },
    /// QoS 2, answer to PUBREC
    PublishRelease { packet_id: NonZeroU16 },
    /// QoS 2, final acknowledgment
    PublishComplete { packet_id: NonZeroU16 },
    PingRequest,
    PingResponse,
    Disconnect,
}

impl From<Connect> for Packet {
    fn from(val: Connect) -> Packet {
        Packet::Connect(Box::new(val))
    }
}

impl From<Publish> for Packet {
    fn from(val: Publish) -> Packet {
        Packet::Publish(val)
    }
}

impl Packet {
    /// First byte of the fixed header, publish flags are not included
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Connect(_) => packet_type::CONNECT,
            Packet::ConnectAck(_) => packet_type::CONNACK,
            Packet::Publish(_) => packet_type::PUBLISH_START,
            Packet::PublishAck { .. } => packet_type::PUBACK,
            Packet::PublishReceived { .. } => packet_type::PUBREC,
            Packet::PublishRelease { .. } => packet_type::PUBREL,
            Packet::PublishComplete { .. } => packet_type::PUBCOMP,
            Packet::PingRequest => packet_type::PINGREQ,
            Packet::PingResponse => packet_type::PINGRESP,
            Packet::Disconnect => packet_type::DISCONNECT,
        }
    }
}
