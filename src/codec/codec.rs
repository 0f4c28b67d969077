use std::cell::Cell;

use ntex_bytes::{Buf, BytesMut};
use ntex_codec::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError};
use crate::topic::validate_topic;
use crate::types::{FixedHeader, QoS};
use crate::utils::{decode_variable_length, variable_length_size, MAX_VARIABLE_LENGTH};

use super::{decode::decode_packet, encode, Packet, Publish};

#[derive(Debug, Clone)]
/// Mqtt v3.1.1 frame codec
pub struct Codec {
    state: Cell<DecodeState>,
    max_size: Cell<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DecodeState {
    FrameHeader,
    Frame(FixedHeader),
}

impl Codec {
    /// Create `Codec` instance
    pub fn new() -> Self {
        Codec { state: Cell::new(DecodeState::FrameHeader), max_size: Cell::new(0) }
    }

    /// Set max inbound frame size.
    ///
    /// Applies to the remaining length of decoded frames, outbound frames
    /// are not limited. If max size is set to `0`, size is unlimited.
    /// By default max size is set to `0`
    pub fn set_max_size(&self, size: u32) {
        self.max_size.set(size);
    }

    fn check_size(&self, size: u32) -> bool {
        let max_size = self.max_size.get();
        max_size == 0 || size <= max_size
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        let fixed = match self.state.get() {
            DecodeState::Frame(fixed) => fixed,
            DecodeState::FrameHeader => {
                if src.len() < 2 {
                    return Ok(None);
                }
                let Some((remaining_length, consumed)) = decode_variable_length(&src[1..])? else {
                    return Ok(None);
                };
                ensure!(self.check_size(remaining_length), DecodeError::MaxSizeExceeded);

                let fixed = FixedHeader { first_byte: src[0], remaining_length };
                src.advance(consumed + 1);
                self.state.set(DecodeState::Frame(fixed));
                fixed
            }
        };

        let len = fixed.remaining_length as usize;
        if src.len() < len {
            // make room for the whole frame
            src.reserve(len - src.len());
            return Ok(None);
        }
        self.state.set(DecodeState::FrameHeader);
        decode_packet(src.split_to(len).freeze(), fixed.first_byte).map(Some)
    }
}

impl Encoder for Codec {
    type Item = Packet;
    type Error = EncodeError;

    fn encode(&self, item: Self::Item, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if let Packet::Publish(ref publish) = item {
            check_publish(publish)?;
        }

        let size = u32::try_from(encode::encoded_size(&item))
            .ok()
            .filter(|size| *size <= MAX_VARIABLE_LENGTH)
            .ok_or(EncodeError::InvalidLength)?;

        dst.reserve(1 + variable_length_size(size) + size as usize);
        encode::encode(&item, dst, size)
    }
}

/// Publish must be rejected before any bytes are written
fn check_publish(publish: &Publish) -> Result<(), EncodeError> {
    validate_topic(&publish.topic).map_err(|_| EncodeError::InvalidTopic)?;
    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, Some(_)) => Err(EncodeError::MalformedPacket),
        (QoS::AtLeastOnce | QoS::ExactlyOnce, None) => Err(EncodeError::PacketIdRequired),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use ntex_bytes::{ByteString, Bytes};

    use super::*;

    fn publish(topic: &'static str, qos: QoS, packet_id: Option<u16>) -> Publish {
        Publish {
            dup: false,
            retain: false,
            qos,
            topic: ByteString::from_static(topic),
            packet_id: packet_id.and_then(NonZeroU16::new),
            payload: Bytes::from_static(b"data"),
        }
    }

    #[test]
    fn test_max_size() {
        let codec = Codec::new();
        codec.set_max_size(5);

        let mut buf = BytesMut::from(&b"\x30\x09"[..]);
        assert_eq!(codec.decode(&mut buf), Err(DecodeError::MaxSizeExceeded));

        // outbound frames are not limited
        let mut buf = BytesMut::new();
        let pkt = publish("/test", QoS::AtMostOnce, None);
        codec.encode(pkt.into(), &mut buf).unwrap();
        assert_eq!(buf.len(), 13);
        buf.clear();

        let packet_id = NonZeroU16::new(1).unwrap();
        codec.encode(Packet::PublishAck { packet_id }, &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf), Ok(Some(Packet::PublishAck { packet_id })));
    }

    #[test]
    fn test_large_frame() {
        let codec = Codec::new();
        let mut buf = BytesMut::new();

        let pkt = Publish {
            payload: Bytes::from(vec![b'a'; 260 * 1024]),
            ..publish("a/b", QoS::ExactlyOnce, Some(7))
        };
        codec.encode(pkt.clone().into(), &mut buf).unwrap();

        // feed the frame in chunks
        let mut src = BytesMut::new();
        while buf.len() > 4096 {
            src.extend_from_slice(&buf.split_to(4096));
            assert_eq!(codec.decode(&mut src), Ok(None));
        }
        src.extend_from_slice(&buf);
        assert_eq!(codec.decode(&mut src), Ok(Some(Packet::Publish(pkt))));
        assert!(src.is_empty());
    }

    #[test]
    fn test_partial_header() {
        let codec = Codec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"\x40");
        assert_eq!(codec.decode(&mut buf), Ok(None));
        buf.extend_from_slice(b"\x02\x00");
        assert_eq!(codec.decode(&mut buf), Ok(None));
        buf.extend_from_slice(b"\x01\xd0\x00\xe0");
        assert_eq!(
            codec.decode(&mut buf),
            Ok(Some(Packet::PublishAck { packet_id: NonZeroU16::new(1).unwrap() }))
        );
        assert_eq!(codec.decode(&mut buf), Ok(Some(Packet::PingResponse)));
        assert_eq!(codec.decode(&mut buf), Ok(None));
        buf.extend_from_slice(b"\x00");
        assert_eq!(codec.decode(&mut buf), Ok(Some(Packet::Disconnect)));
    }

    #[test]
    fn test_invalid_remaining_length() {
        let codec = Codec::new();
        let mut buf = BytesMut::from(&b"\x30\xff\xff\xff\xff\x01"[..]);
        assert_eq!(codec.decode(&mut buf), Err(DecodeError::InvalidLength));
    }

    #[test]
    fn test_publish_checks() {
        let codec = Codec::new();
        let mut buf = BytesMut::new();

        let pkt = publish("/test", QoS::ExactlyOnce, None);
        assert_eq!(codec.encode(pkt.into(), &mut buf), Err(EncodeError::PacketIdRequired));

        let pkt = publish("/test", QoS::AtMostOnce, Some(1));
        assert_eq!(codec.encode(pkt.into(), &mut buf), Err(EncodeError::MalformedPacket));

        let pkt = publish("a/+", QoS::AtLeastOnce, Some(1));
        assert_eq!(codec.encode(pkt.into(), &mut buf), Err(EncodeError::InvalidTopic));

        let pkt = publish("", QoS::AtMostOnce, None);
        assert_eq!(codec.encode(pkt.into(), &mut buf), Err(EncodeError::InvalidTopic));
        assert!(buf.is_empty());
    }
}
