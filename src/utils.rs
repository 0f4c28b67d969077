use ntex_bytes::{BufMut, BytesMut};

use crate::error::{DecodeError, EncodeError};

macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e);
        }
    };
}

macro_rules! prim_enum {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $(
                $( #[$enum_item_attr:meta] )*
                $var:ident=$val:expr
            ),+
        }) => {
        $( #[$enum_attr] )*
        #[repr(u8)]
        #[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
        pub enum $name {
            $(
                $( #[$enum_item_attr] )*
                $var = $val
            ),+
        }
        impl std::convert::TryFrom<u8> for $name {
            type Error = $crate::error::DecodeError;
            fn try_from(v: u8) -> Result<Self, Self::Error> {
                match v {
                    $($val => Ok($name::$var)),+
                    ,_ => Err($crate::error::DecodeError::MalformedPacket)
                }
            }
        }
        impl From<$name> for u8 {
            fn from(v: $name) -> Self {
                v as u8
            }
        }
    };
}

/// Max value of the remaining length field (0xFF,0xFF,0xFF,0x7F)
pub(crate) const MAX_VARIABLE_LENGTH: u32 = 268_435_455;

/// Decodes variable length and returns tuple of (length, bytes consumed)
///
/// Returns `Ok(None)` if `src` ends before the length is complete.
pub(crate) fn decode_variable_length(src: &[u8]) -> Result<Option<(u32, usize)>, DecodeError> {
    let mut value: u32 = 0;
    for (idx, byte) in src.iter().enumerate() {
        ensure!(idx < 4, DecodeError::InvalidLength);
        value |= u32::from(byte & 0x7F) << (idx * 7);
        if byte & 0x80 == 0 {
            return Ok(Some((value, idx + 1)));
        }
    }
    if src.len() >= 4 {
        Err(DecodeError::InvalidLength)
    } else {
        Ok(None)
    }
}

/// Number of bytes the remaining length field occupies
pub(crate) fn variable_length_size(size: u32) -> usize {
    if size <= 127 {
        1
    } else if size <= 16_383 {
        2
    } else if size <= 2_097_151 {
        3
    } else {
        4
    }
}

pub(crate) fn write_variable_length(size: u32, dst: &mut BytesMut) -> Result<(), EncodeError> {
    ensure!(size <= MAX_VARIABLE_LENGTH, EncodeError::InvalidLength);

    let mut size = size;
    loop {
        let mut byte = (size % 128) as u8;
        size >>= 7;
        if size > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if size == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_variable_length() {
        assert_eq!(decode_variable_length(b"\x7f\x7f"), Ok(Some((127, 1))));
        assert_eq!(decode_variable_length(b"\x00"), Ok(Some((0, 1))));
        assert_eq!(decode_variable_length(b"\x80\x01"), Ok(Some((128, 2))));
        assert_eq!(decode_variable_length(b"\xff\x7f"), Ok(Some((16383, 2))));
        assert_eq!(decode_variable_length(b"\x80\x80\x01"), Ok(Some((16384, 3))));
        assert_eq!(decode_variable_length(b"\xff\xff\x7f"), Ok(Some((2097151, 3))));
        assert_eq!(decode_variable_length(b"\x80\x80\x80\x01"), Ok(Some((2097152, 4))));
        assert_eq!(decode_variable_length(b"\xff\xff\xff\x7f"), Ok(Some((268435455, 4))));

        assert_eq!(decode_variable_length(b""), Ok(None));
        assert_eq!(decode_variable_length(b"\xff\xff\xff"), Ok(None));
        assert_eq!(
            decode_variable_length(b"\xff\xff\xff\xff\xff\xff"),
            Err(DecodeError::InvalidLength)
        );
    }

    #[test]
    fn test_write_variable_length() {
        for (size, expected) in [
            (0u32, &b"\x00"[..]),
            (127, &b"\x7f"[..]),
            (128, &b"\x80\x01"[..]),
            (16383, &b"\xff\x7f"[..]),
            (16384, &b"\x80\x80\x01"[..]),
            (268435455, &b"\xff\xff\xff\x7f"[..]),
        ] {
            let mut buf = BytesMut::new();
            write_variable_length(size, &mut buf).unwrap();
            assert_eq!(&buf[..], expected);
            assert_eq!(variable_length_size(size), expected.len());
        }

        let mut buf = BytesMut::new();
        assert_eq!(
            write_variable_length(MAX_VARIABLE_LENGTH + 1, &mut buf),
            Err(EncodeError::InvalidLength)
        );
        assert!(buf.is_empty());
    }
}
