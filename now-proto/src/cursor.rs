//! Primitive field encoding.
//!
//! Integers are little-endian. Variable-length fields are prefixed with a
//! VarU32: 1 to 4 bytes, big-endian, where the top two bits of the first
//! byte hold the number of extra bytes.
//!
//! ```text
//! VarStr:  VarU32 len | len bytes UTF-8 | 0x00
//! VarBuf:  VarU32 len | len bytes
//! GUID:    VarStr of the lowercase hyphenated form
//! ```

use crate::error::{DecodeError, EncodeError};
use bytes::{Buf, BufMut, Bytes};
use uuid::Uuid;

/// Largest value representable as a VarU32.
pub const VAR_U32_MAX: u32 = 0x3FFF_FFFF;

/// Encoded size of a GUID (length prefix, 36 characters, terminator).
pub const GUID_SIZE: usize = 1 + 36 + 1;

/// Returns the encoded size of a VarU32. Values above [`VAR_U32_MAX`] are
/// rejected when written.
pub fn var_u32_size(value: u32) -> usize {
    match value {
        0..=0x3F => 1,
        0x40..=0x3FFF => 2,
        0x4000..=0x3F_FFFF => 3,
        _ => 4,
    }
}

/// Converts a length into a VarU32, failing if it does not fit.
pub fn checked_var_u32(value: usize) -> Result<u32, EncodeError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v <= VAR_U32_MAX)
        .ok_or(EncodeError::VarU32OutOfRange(value as u64))
}

/// Returns the encoded size of a VarStr.
pub fn var_str_size(value: &str) -> usize {
    var_u32_size(value.len().min(u32::MAX as usize) as u32) + value.len() + 1
}

/// Returns the encoded size of a VarBuf.
pub fn var_buf_size(value: &[u8]) -> usize {
    var_u32_size(value.len().min(u32::MAX as usize) as u32) + value.len()
}

/// Bounds-checked reader over a message body.
///
/// The cursor owns a [`Bytes`] handle, so buffer fields are sliced out
/// without copying.
#[derive(Debug, Clone)]
pub struct ReadCursor {
    buf: Bytes,
}

impl ReadCursor {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, name: &'static str, needed: usize) -> Result<(), DecodeError> {
        if self.buf.len() < needed {
            return Err(DecodeError::NotEnoughBytes {
                name,
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self, name: &'static str) -> Result<u8, DecodeError> {
        self.ensure(name, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self, name: &'static str) -> Result<u16, DecodeError> {
        self.ensure(name, 2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self, name: &'static str) -> Result<u32, DecodeError> {
        self.ensure(name, 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self, name: &'static str) -> Result<u64, DecodeError> {
        self.ensure(name, 8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_var_u32(&mut self, name: &'static str) -> Result<u32, DecodeError> {
        let first = self.read_u8(name)?;
        let extra = (first >> 6) as usize;
        self.ensure(name, extra)?;

        let mut value = (first & 0x3F) as u32;
        for _ in 0..extra {
            value = (value << 8) | self.buf.get_u8() as u32;
        }
        Ok(value)
    }

    pub fn read_var_str(&mut self, name: &'static str) -> Result<String, DecodeError> {
        let len = self.read_var_u32(name)? as usize;
        self.ensure(name, len + 1)?;

        let raw = self.buf.split_to(len);
        if self.buf.get_u8() != 0 {
            return Err(DecodeError::MissingNulTerminator { name });
        }

        std::str::from_utf8(&raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { name })
    }

    pub fn read_var_buf(&mut self, name: &'static str) -> Result<Bytes, DecodeError> {
        let len = self.read_var_u32(name)? as usize;
        self.ensure(name, len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_guid(&mut self, name: &'static str) -> Result<Uuid, DecodeError> {
        let text = self.read_var_str(name)?;
        Uuid::parse_str(&text).map_err(|_| DecodeError::InvalidGuid(text))
    }
}

/// Writers for the variable-length field types.
pub trait WriteExt: BufMut {
    fn put_var_u32(&mut self, value: u32) -> Result<(), EncodeError> {
        if value > VAR_U32_MAX {
            return Err(EncodeError::VarU32OutOfRange(value as u64));
        }

        match var_u32_size(value) {
            1 => self.put_u8(value as u8),
            2 => self.put_u16(0x4000 | value as u16),
            3 => {
                self.put_u8(0x80 | (value >> 16) as u8);
                self.put_u16(value as u16);
            }
            _ => self.put_u32(0xC000_0000 | value),
        }
        Ok(())
    }

    fn put_var_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.put_var_u32(checked_var_u32(value.len())?)?;
        self.put_slice(value.as_bytes());
        self.put_u8(0);
        Ok(())
    }

    fn put_var_buf(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        self.put_var_u32(checked_var_u32(value.len())?)?;
        self.put_slice(value);
        Ok(())
    }

    fn put_guid(&mut self, value: &Uuid) {
        let mut text = Uuid::encode_buffer();
        let text = value.hyphenated().encode_lower(&mut text);
        // 36 characters always fit a one-byte prefix
        self.put_u8(text.len() as u8);
        self.put_slice(text.as_bytes());
        self.put_u8(0);
    }
}

impl<B: BufMut + ?Sized> WriteExt for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    fn encode_var_u32(value: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_var_u32(value).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_var_u32_vectors() {
        assert_eq!(encode_var_u32(0x00), [0x00]);
        assert_eq!(encode_var_u32(0x3F), [0x3F]);
        assert_eq!(encode_var_u32(0x40), [0x40, 0x40]);
        assert_eq!(encode_var_u32(0x14000), [0x81, 0x40, 0x00]);
        assert_eq!(encode_var_u32(0x3FFF_FFFF), [0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_var_u32_out_of_range() {
        let mut buf = BytesMut::new();
        assert_eq!(
            buf.put_var_u32(0x4000_0000),
            Err(EncodeError::VarU32OutOfRange(0x4000_0000))
        );
        assert!(buf.is_empty());
        assert!(checked_var_u32(0x4000_0000).is_err());
    }

    #[test]
    fn test_var_u32_truncated() {
        let mut cursor = ReadCursor::new(Bytes::from_static(&[0x81, 0x40]));
        assert!(matches!(
            cursor.read_var_u32("len"),
            Err(DecodeError::NotEnoughBytes { name: "len", .. })
        ));
    }

    #[test]
    fn test_var_str_vectors() {
        let mut buf = BytesMut::new();
        buf.put_var_str("hello").unwrap();
        assert_eq!(&buf[..], &[0x05, b'h', b'e', b'l', b'l', b'o', 0x00]);

        let mut buf = BytesMut::new();
        buf.put_var_str("").unwrap();
        assert_eq!(&buf[..], &[0x00, 0x00]);
        assert_eq!(var_str_size(""), 2);
        assert_eq!(var_str_size("hello"), 7);
    }

    #[test]
    fn test_var_str_invalid_utf8() {
        let mut cursor = ReadCursor::new(Bytes::from_static(&[0x01, 0xFF, 0x00]));
        assert_eq!(
            cursor.read_var_str("title"),
            Err(DecodeError::InvalidUtf8 { name: "title" })
        );
    }

    #[test]
    fn test_var_str_missing_terminator() {
        let mut cursor = ReadCursor::new(Bytes::from_static(&[0x02, b'h', b'i', b'!']));
        assert_eq!(
            cursor.read_var_str("message"),
            Err(DecodeError::MissingNulTerminator { name: "message" })
        );
    }

    #[test]
    fn test_var_buf_zero_copy() {
        let mut buf = BytesMut::new();
        buf.put_var_buf(&[1, 2, 3]).unwrap();
        buf.put_u8(0xAA);

        let mut cursor = ReadCursor::new(buf.freeze());
        let data = cursor.read_var_buf("data").unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
        assert_eq!(cursor.read_u8("tail").unwrap(), 0xAA);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_guid_lowercase_hyphenated() {
        let id = Uuid::parse_str("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap();
        let mut buf = BytesMut::new();
        buf.put_guid(&id);

        assert_eq!(buf.len(), GUID_SIZE);
        assert_eq!(buf[0], 36);
        assert_eq!(&buf[1..37], b"67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert_eq!(buf[37], 0);

        let mut cursor = ReadCursor::new(buf.freeze());
        assert_eq!(cursor.read_guid("session id").unwrap(), id);
    }

    #[test]
    fn test_guid_invalid() {
        let mut buf = BytesMut::new();
        buf.put_var_str("not-a-guid").unwrap();
        let mut cursor = ReadCursor::new(buf.freeze());
        assert!(matches!(
            cursor.read_guid("session id"),
            Err(DecodeError::InvalidGuid(_))
        ));
    }

    #[test]
    fn test_integers_little_endian() {
        let mut cursor = ReadCursor::new(Bytes::from_static(&[
            0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x01, 0, 0, 0, 0, 0, 0, 0,
        ]));
        assert_eq!(cursor.read_u16("a").unwrap(), 0x1234);
        assert_eq!(cursor.read_u32("b").unwrap(), 0x1234_5678);
        assert_eq!(cursor.read_u64("c").unwrap(), 1);
        assert!(cursor.read_u8("d").is_err());
    }

    proptest! {
        #[test]
        fn prop_var_u32_size_matches_encoding(value in 0u32..=VAR_U32_MAX) {
            let encoded = encode_var_u32(value);
            prop_assert_eq!(encoded.len(), var_u32_size(value));

            let mut cursor = ReadCursor::new(Bytes::from(encoded));
            prop_assert_eq!(cursor.read_var_u32("v").unwrap(), value);
            prop_assert_eq!(cursor.remaining(), 0);
        }
    }
}
