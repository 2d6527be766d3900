//! Bounds-checked DER reader.
//!
//! Supports the subset of DER that private key containers actually use:
//! single-byte tags, short-form lengths and the one-extra-byte long form
//! (`0x81 nn`). Every read is checked against the remaining buffer.

use crate::error::CodecError;

/// SEQUENCE tag.
pub const TAG_SEQUENCE: u8 = 0x30;
/// INTEGER tag.
pub const TAG_INTEGER: u8 = 0x02;
/// BIT STRING tag.
pub const TAG_BIT_STRING: u8 = 0x03;
/// OCTET STRING tag.
pub const TAG_OCTET_STRING: u8 = 0x04;
/// OBJECT IDENTIFIER tag.
pub const TAG_OID: u8 = 0x06;
/// Context-specific constructed `[0]`.
pub const TAG_CONTEXT_0: u8 = 0xa0;
/// Context-specific constructed `[1]`.
pub const TAG_CONTEXT_1: u8 = 0xa1;

/// A forward-only cursor over a DER buffer.
#[derive(Debug, Clone)]
pub struct DerCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DerCursor<'a> {
    /// Start reading at the beginning of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the whole buffer has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next tag without consuming it.
    pub fn peek_tag(&self) -> Result<u8, CodecError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(CodecError::Truncated {
                offset: self.pos,
                needed: 1,
            })
    }

    /// Consume one byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = self.peek_tag()?;
        self.pos += 1;
        Ok(byte)
    }

    /// Consume a tag byte that must equal `expected`.
    pub fn expect_tag(&mut self, expected: u8) -> Result<(), CodecError> {
        let offset = self.pos;
        let found = self.read_u8()?;
        if found != expected {
            return Err(CodecError::UnexpectedTag {
                offset,
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Consume a length, which must fit in what remains of the buffer.
    pub fn read_length(&mut self) -> Result<usize, CodecError> {
        let offset = self.pos;
        let first = self.read_u8()?;

        let len = match first {
            0x00..=0x7f => usize::from(first),
            0x81 => usize::from(self.read_u8()?),
            _ => return Err(CodecError::UnsupportedLength { offset, first }),
        };

        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        Ok(len)
    }

    /// Consume `expected` tag and its length, returning the length.
    pub fn read_header(&mut self, expected: u8) -> Result<usize, CodecError> {
        self.expect_tag(expected)?;
        self.read_length()
    }

    /// Consume `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Consume bytes that must equal `expected` exactly.
    pub fn expect_bytes(&mut self, expected: &[u8]) -> Result<(), CodecError> {
        let offset = self.pos;
        let found = self.read_bytes(expected.len())?;
        if found != expected {
            return Err(CodecError::invalid_structure(format!(
                "unexpected content at offset {offset}"
            )));
        }
        Ok(())
    }

    /// Consume a complete TLV element with the given tag, returning its content.
    pub fn read_element(&mut self, expected: u8) -> Result<&'a [u8], CodecError> {
        let len = self.read_header(expected)?;
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_length() {
        let mut cursor = DerCursor::new(&[0x30, 0x02, 0x05, 0x00]);
        assert_eq!(cursor.read_header(TAG_SEQUENCE).unwrap(), 2);
        assert_eq!(cursor.read_bytes(2).unwrap(), &[0x05, 0x00]);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_long_form_81() {
        let mut buf = vec![0x04, 0x81, 0x80];
        buf.extend(std::iter::repeat(0xab).take(0x80));
        let mut cursor = DerCursor::new(&buf);
        assert_eq!(cursor.read_element(TAG_OCTET_STRING).unwrap().len(), 0x80);
    }

    #[test]
    fn test_long_form_82_rejected() {
        let mut cursor = DerCursor::new(&[0x30, 0x82, 0x01, 0x00]);
        assert!(matches!(
            cursor.read_header(TAG_SEQUENCE),
            Err(CodecError::UnsupportedLength { first: 0x82, .. })
        ));
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let mut cursor = DerCursor::new(&[0x30, 0x80, 0x00, 0x00]);
        assert!(matches!(
            cursor.read_header(TAG_SEQUENCE),
            Err(CodecError::UnsupportedLength { first: 0x80, .. })
        ));
    }

    #[test]
    fn test_length_past_end() {
        let mut cursor = DerCursor::new(&[0x30, 0x05, 0x00]);
        assert!(matches!(
            cursor.read_header(TAG_SEQUENCE),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_wrong_tag() {
        let mut cursor = DerCursor::new(&[0x02, 0x01, 0x00]);
        assert!(matches!(
            cursor.expect_tag(TAG_SEQUENCE),
            Err(CodecError::UnexpectedTag {
                offset: 0,
                expected: 0x30,
                found: 0x02
            })
        ));
    }

    #[test]
    fn test_empty_buffer() {
        let cursor = DerCursor::new(&[]);
        assert!(cursor.peek_tag().is_err());
    }

    #[test]
    fn test_expect_bytes_mismatch() {
        let mut cursor = DerCursor::new(&[1, 2, 3]);
        assert!(cursor.expect_bytes(&[1, 2, 4]).is_err());
    }
}
