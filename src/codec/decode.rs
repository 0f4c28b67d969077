use std::{mem, num::NonZeroU16};

use ntex_bytes::{Buf, ByteString, Bytes};

use crate::error::DecodeError;
use crate::types::{packet_type, ConnectAckFlags, ConnectFlags, QoS};
use crate::types::{MQTT, MQTT_LEVEL_3, WILL_QOS_SHIFT};

use super::packet::{Connect, ConnectAck, ConnectAckReason, LastWill, Packet, Publish};

/// Decode frame body, `first_byte` is the first byte of the fixed header
pub(crate) fn decode_packet(mut src: Bytes, first_byte: u8) -> Result<Packet, DecodeError> {
    let src = &mut src;
    let pkt = match first_byte {
        packet_type::CONNECT => Packet::Connect(Box::new(decode_connect(src)?)),
        packet_type::CONNACK => Packet::ConnectAck(decode_connect_ack(src)?),
        b if packet_type::is_publish(b) => Packet::Publish(decode_publish(src, b & 0x0F)?),
        packet_type::PUBACK => Packet::PublishAck { packet_id: Decode::decode(src)? },
        packet_type::PUBREC => Packet::PublishReceived { packet_id: Decode::decode(src)? },
        packet_type::PUBREL => Packet::PublishRelease { packet_id: Decode::decode(src)? },
        packet_type::PUBCOMP => Packet::PublishComplete { packet_id: Decode::decode(src)? },
        packet_type::PINGREQ => Packet::PingRequest,
        packet_type::PINGRESP => Packet::PingResponse,
        packet_type::DISCONNECT => Packet::Disconnect,
        _ => return Err(DecodeError::UnsupportedPacketType),
    };
    ensure!(src.is_empty(), DecodeError::InvalidLength);
    Ok(pkt)
}

fn decode_connect(src: &mut Bytes) -> Result<Connect, DecodeError> {
    ensure!(&Bytes::decode(src)?[..] == MQTT, DecodeError::InvalidProtocol);
    ensure!(u8::decode(src)? == MQTT_LEVEL_3, DecodeError::UnsupportedProtocolLevel);

    let flags =
        ConnectFlags::from_bits(u8::decode(src)?).ok_or(DecodeError::ConnectReservedFlagSet)?;
    let keep_alive = u16::decode(src)?;
    let client_id = ByteString::decode(src)?;

    let clean_session = flags.contains(ConnectFlags::CLEAN_SESSION);
    ensure!(clean_session || !client_id.is_empty(), DecodeError::InvalidClientId);

    let last_will =
        flags.contains(ConnectFlags::WILL).then(|| decode_last_will(src, flags)).transpose()?;
    let username =
        flags.contains(ConnectFlags::USERNAME).then(|| ByteString::decode(src)).transpose()?;
    let password =
        flags.contains(ConnectFlags::PASSWORD).then(|| Bytes::decode(src)).transpose()?;

    Ok(Connect { clean_session, keep_alive, last_will, client_id, username, password })
}

fn decode_last_will(src: &mut Bytes, flags: ConnectFlags) -> Result<LastWill, DecodeError> {
    Ok(LastWill {
        qos: QoS::try_from((flags & ConnectFlags::WILL_QOS).bits() >> WILL_QOS_SHIFT)?,
        retain: flags.contains(ConnectFlags::WILL_RETAIN),
        topic: ByteString::decode(src)?,
        message: Bytes::decode(src)?,
    })
}

fn decode_connect_ack(src: &mut Bytes) -> Result<ConnectAck, DecodeError> {
    let flags =
        ConnectAckFlags::from_bits(u8::decode(src)?).ok_or(DecodeError::ConnAckReservedFlagSet)?;
    let return_code = ConnectAckReason::try_from(u8::decode(src)?)?;

    let session_present = flags.contains(ConnectAckFlags::SESSION_PRESENT);
    Ok(ConnectAck { return_code, session_present })
}

/// `flags` are the low four bits of the fixed header
fn decode_publish(src: &mut Bytes, flags: u8) -> Result<Publish, DecodeError> {
    let qos = QoS::try_from((flags & 0b0110) >> 1)?;
    let topic = ByteString::decode(src)?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => Some(NonZeroU16::new(u16::decode(src)?).ok_or(DecodeError::PacketIdRequired)?),
    };

    Ok(Publish {
        dup: flags & 0b1000 != 0,
        retain: flags & 0b0001 != 0,
        qos,
        topic,
        packet_id,
        // payload is the rest of the frame
        payload: mem::take(src),
    })
}

trait Decode: Sized {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError>;
}

impl Decode for u8 {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.has_remaining(), DecodeError::InvalidLength);
        Ok(src.get_u8())
    }
}

impl Decode for u16 {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.remaining() >= 2, DecodeError::InvalidLength);
        Ok(src.get_u16())
    }
}

impl Decode for NonZeroU16 {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        NonZeroU16::new(u16::decode(src)?).ok_or(DecodeError::MalformedPacket)
    }
}

impl Decode for Bytes {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let len = usize::from(u16::decode(src)?);
        ensure!(src.remaining() >= len, DecodeError::InvalidLength);
        Ok(src.split_to(len))
    }
}

impl Decode for ByteString {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ByteString::try_from(Bytes::decode(src)?).map_err(|_| DecodeError::Utf8Error)
    }
}
