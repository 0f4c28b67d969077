use ntex_bytes::{BufMut, ByteString, Bytes, BytesMut};

use crate::error::EncodeError;
use crate::types::{packet_type, ConnectAckFlags, ConnectFlags, QoS};
use crate::types::{MQTT, MQTT_LEVEL_3, WILL_QOS_SHIFT};
use crate::utils::write_variable_length;

use super::packet::{Connect, Packet, Publish};

/// Size of the frame body, fixed header excluded
pub(crate) fn encoded_size(packet: &Packet) -> usize {
    match packet {
        Packet::Connect(connect) => connect_size(connect),
        Packet::Publish(publish) => publish_size(publish),
        Packet::ConnectAck(_)
        | Packet::PublishAck { .. }
        | Packet::PublishReceived { .. }
        | Packet::PublishRelease { .. }
        | Packet::PublishComplete { .. } => 2,
        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => 0,
    }
}

fn connect_size(connect: &Connect) -> usize {
    // protocol name, level, flags, keep-alive
    let header = 2 + MQTT.len() + 1 + 1 + 2;
    let will = connect.last_will.as_ref().map_or(0, |w| 4 + w.topic.len() + w.message.len());
    let username = connect.username.as_ref().map_or(0, |s| 2 + s.len());
    let password = connect.password.as_ref().map_or(0, |s| 2 + s.len());

    header + 2 + connect.client_id.len() + will + username + password
}

fn publish_size(publish: &Publish) -> usize {
    let packet_id = if publish.qos == QoS::AtMostOnce { 0 } else { 2 };
    2 + publish.topic.len() + packet_id + publish.payload.len()
}

/// Write complete frame, `size` must be the value of `encoded_size()`
pub(crate) fn encode(packet: &Packet, dst: &mut BytesMut, size: u32) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(connect) => {
            write_header(packet_type::CONNECT, size, dst)?;
            encode_connect(connect, dst)
        }
        Packet::Publish(publish) => {
            let mut first_byte = packet_type::PUBLISH_START | (u8::from(publish.qos) << 1);
            if publish.dup {
                first_byte |= 0b1000;
            }
            if publish.retain {
                first_byte |= 0b0001;
            }
            write_header(first_byte, size, dst)?;
            encode_publish(publish, dst)
        }
        Packet::ConnectAck(ack) => {
            let mut flags = ConnectAckFlags::empty();
            flags.set(ConnectAckFlags::SESSION_PRESENT, ack.session_present);
            dst.put_slice(&[packet_type::CONNACK, 2, flags.bits(), ack.return_code.into()]);
            Ok(())
        }
        Packet::PublishAck { packet_id }
        | Packet::PublishReceived { packet_id }
        | Packet::PublishRelease { packet_id }
        | Packet::PublishComplete { packet_id } => {
            dst.put_slice(&[packet.packet_type(), 2]);
            dst.put_u16(packet_id.get());
            Ok(())
        }
        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => {
            dst.put_slice(&[packet.packet_type(), 0]);
            Ok(())
        }
    }
}

#[inline]
fn write_header(first_byte: u8, size: u32, dst: &mut BytesMut) -> Result<(), EncodeError> {
    dst.put_u8(first_byte);
    write_variable_length(size, dst)
}

fn encode_connect(connect: &Connect, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let mut flags = ConnectFlags::empty();
    flags.set(ConnectFlags::CLEAN_SESSION, connect.clean_session);
    flags.set(ConnectFlags::USERNAME, connect.username.is_some());
    flags.set(ConnectFlags::PASSWORD, connect.password.is_some());
    if let Some(ref will) = connect.last_will {
        flags |= ConnectFlags::WILL;
        flags.set(ConnectFlags::WILL_RETAIN, will.retain);
        flags |= ConnectFlags::from_bits_truncate(u8::from(will.qos) << WILL_QOS_SHIFT);
    }

    MQTT.encode(dst)?;
    dst.put_u8(MQTT_LEVEL_3);
    dst.put_u8(flags.bits());
    dst.put_u16(connect.keep_alive);
    connect.client_id.encode(dst)?;

    if let Some(ref will) = connect.last_will {
        will.topic.encode(dst)?;
        will.message.encode(dst)?;
    }
    if let Some(ref username) = connect.username {
        username.encode(dst)?;
    }
    if let Some(ref password) = connect.password {
        password.encode(dst)?;
    }
    Ok(())
}

fn encode_publish(publish: &Publish, dst: &mut BytesMut) -> Result<(), EncodeError> {
    publish.topic.encode(dst)?;
    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, None) => (),
        (QoS::AtMostOnce, Some(_)) => return Err(EncodeError::MalformedPacket),
        (_, Some(packet_id)) => dst.put_u16(packet_id.get()),
        (_, None) => return Err(EncodeError::PacketIdRequired),
    }
    dst.put_slice(&publish.payload);
    Ok(())
}

/// Length-prefixed field
trait Encode {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;
}

impl Encode for &[u8] {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let len = u16::try_from(self.len()).map_err(|_| EncodeError::InvalidLength)?;
        buf.put_u16(len);
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        (&self[..]).encode(buf)
    }
}

impl Encode for ByteString {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        self.as_bytes().encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use super::*;
    use crate::codec::{ConnectAck, ConnectAckReason, LastWill};

    fn id(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    fn publish(qos: QoS, packet_id: Option<NonZeroU16>) -> Publish {
        Publish {
            dup: false,
            retain: false,
            qos,
            topic: ByteString::from_static("t"),
            packet_id,
            payload: Bytes::new(),
        }
    }

    fn to_bytes(packet: Packet) -> Result<BytesMut, EncodeError> {
        let mut buf = BytesMut::new();
        encode(&packet, &mut buf, encoded_size(&packet) as u32)?;
        Ok(buf)
    }

    #[test]
    fn test_connect() {
        let pkt = Connect {
            clean_session: true,
            keep_alive: 10,
            last_will: Some(LastWill {
                qos: QoS::AtLeastOnce,
                retain: true,
                topic: ByteString::from_static("w"),
                message: Bytes::from_static(b"wm"),
            }),
            client_id: ByteString::from_static("cid"),
            username: Some(ByteString::from_static("u")),
            password: Some(Bytes::from_static(b"pw")),
        };
        assert_eq!(
            &to_bytes(pkt.into()).unwrap()[..],
            &b"\x10\x1D\x00\x04MQTT\x04\xEE\x00\x0A\x00\x03cid\x00\x01w\x00\x02wm\x00\x01u\x00\x02pw"[..]
        );

        let pkt = Connect { client_id: ByteString::from_static("c"), ..Connect::default() };
        assert_eq!(
            &to_bytes(pkt.into()).unwrap()[..],
            &b"\x10\x0D\x00\x04MQTT\x04\x00\x00\x00\x00\x01c"[..]
        );
    }

    #[test]
    fn test_connect_ack() {
        let pkt = Packet::ConnectAck(ConnectAck {
            return_code: ConnectAckReason::NotAuthorized,
            session_present: true,
        });
        assert_eq!(&to_bytes(pkt).unwrap()[..], &b"\x20\x02\x01\x05"[..]);
    }

    #[test]
    fn test_publish() {
        let pkt = Publish {
            retain: true,
            topic: ByteString::from_static("a/b"),
            payload: Bytes::from_static(b"payload"),
            ..publish(QoS::AtLeastOnce, Some(id(0x0102)))
        };
        assert_eq!(
            &to_bytes(pkt.into()).unwrap()[..],
            &b"\x33\x0E\x00\x03a/b\x01\x02payload"[..]
        );

        let pkt = Publish { dup: true, ..publish(QoS::ExactlyOnce, Some(id(1))) };
        assert_eq!(&to_bytes(pkt.into()).unwrap()[..], &b"\x3C\x05\x00\x01t\x00\x01"[..]);

        // two byte remaining length
        let pkt = Publish {
            payload: Bytes::from(vec![b'x'; 197]),
            ..publish(QoS::AtMostOnce, None)
        };
        let buf = to_bytes(pkt.into()).unwrap();
        assert_eq!(&buf[..6], &b"\x30\xC8\x01\x00\x01t"[..]);
        assert_eq!(buf.len(), 203);
    }

    #[test]
    fn test_publish_errors() {
        let pkt = publish(QoS::AtMostOnce, Some(id(1)));
        assert_eq!(to_bytes(pkt.into()), Err(EncodeError::MalformedPacket));

        let pkt = publish(QoS::AtLeastOnce, None);
        assert_eq!(to_bytes(pkt.into()), Err(EncodeError::PacketIdRequired));

        let pkt = Publish {
            topic: ByteString::from("a".repeat(usize::from(u16::MAX) + 1)),
            ..publish(QoS::AtMostOnce, None)
        };
        assert_eq!(to_bytes(pkt.into()), Err(EncodeError::InvalidLength));
    }

    #[test]
    fn test_acks() {
        assert_eq!(
            &to_bytes(Packet::PublishAck { packet_id: id(7) }).unwrap()[..],
            &b"\x40\x02\x00\x07"[..]
        );
        assert_eq!(
            &to_bytes(Packet::PublishReceived { packet_id: id(0x1234) }).unwrap()[..],
            &b"\x50\x02\x12\x34"[..]
        );
        assert_eq!(
            &to_bytes(Packet::PublishRelease { packet_id: id(u16::MAX) }).unwrap()[..],
            &b"\x62\x02\xFF\xFF"[..]
        );
        assert_eq!(
            &to_bytes(Packet::PublishComplete { packet_id: id(1) }).unwrap()[..],
            &b"\x70\x02\x00\x01"[..]
        );
    }

    #[test]
    fn test_empty_packets() {
        assert_eq!(&to_bytes(Packet::PingRequest).unwrap()[..], &b"\xC0\x00"[..]);
        assert_eq!(&to_bytes(Packet::PingResponse).unwrap()[..], &b"\xD0\x00"[..]);
        assert_eq!(&to_bytes(Packet::Disconnect).unwrap()[..], &b"\xE0\x00"[..]);
    }
}
