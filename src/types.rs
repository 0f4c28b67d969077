pub(crate) const MQTT: &[u8] = b"MQTT";
pub(crate) const MQTT_LEVEL_3: u8 = 4;
pub(crate) const WILL_QOS_SHIFT: u8 = 3;

prim_enum! {
    /// Quality of Service
    pub enum QoS {
        /// Fire and forget, nothing is acknowledged
        AtMostOnce = 0,
        /// Acknowledged with PUBACK, broker may see duplicates
        AtLeastOnce = 1,
        /// Four-step PUBLISH, PUBREC, PUBREL, PUBCOMP exchange
        ExactlyOnce = 2
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ConnectFlags: u8 {
        const USERNAME    = 0b1000_0000;
        const PASSWORD    = 0b0100_0000;
        const WILL_RETAIN = 0b0010_0000;
        const WILL_QOS    = 0b0001_1000;
        const WILL        = 0b0000_0100;
        const CLEAN_SESSION = 0b0000_0010;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ConnectAckFlags: u8 {
        const SESSION_PRESENT = 0b0000_0001;
    }
}

pub(crate) mod packet_type {
    pub(crate) const CONNECT: u8 = 0b0001_0000;
    pub(crate) const CONNACK: u8 = 0b0010_0000;
    pub(crate) const PUBLISH_START: u8 = 0b0011_0000;
    pub(crate) const PUBLISH_END: u8 = 0b0011_1111;
    pub(crate) const PUBACK: u8 = 0b0100_0000;
    pub(crate) const PUBREC: u8 = 0b0101_0000;
    pub(crate) const PUBREL: u8 = 0b0110_0010;
    pub(crate) const PUBCOMP: u8 = 0b0111_0000;
    pub(crate) const PINGREQ: u8 = 0b1100_0000;
    pub(crate) const PINGRESP: u8 = 0b1101_0000;
    pub(crate) const DISCONNECT: u8 = 0b1110_0000;

    #[inline]
    pub(crate) fn is_publish(first_byte: u8) -> bool {
        (PUBLISH_START..=PUBLISH_END).contains(&first_byte)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct FixedHeader {
    /// Packet type and flags
    pub(crate) first_byte: u8,
    /// Variable header and payload length
    pub(crate) remaining_length: u32,
}
