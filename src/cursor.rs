//! Little-endian byte cursor over a borrowed buffer, plus the handful of
//! decode helpers shared by the library container and class-group readers.

use std::{error, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferOverflow { offset: usize, needed: usize, available: usize },
    BadMagic { offset: usize, expected: &'static [u8], found: Vec<u8> },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferOverflow { offset, needed, available } => write!(
                f,
                "buffer overflow at offset {offset:#x}: needed {needed} bytes, {available} available"
            ),
            Self::BadMagic { offset, expected, found } => write!(
                f,
                "bad magic at offset {offset:#x}: expected {expected:02x?}, found {found:02x?}"
            ),
        }
    }
}

impl error::Error for Error {}

#[derive(Clone)]
pub struct Cursor<'input> {
    buffer: &'input [u8],
    offset: usize,
}

impl<'input> Cursor<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'input [u8], Error> {
        let end = self.offset + len;
        let slice = self
            .buffer
            .get(self.offset..end)
            .ok_or(Error::BufferOverflow { offset: self.offset, needed: len, available: self.remaining() })?;
        self.offset = end;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.read_bytes(len)?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read a magic-triple assertion, failing with offset/expected/found context on mismatch.
    pub fn expect_magic(&mut self, magic: &'static [u8; 3]) -> Result<(), Error> {
        let offset = self.offset;
        let found = self.read_bytes(3)?;
        if found != magic {
            return Err(Error::BadMagic { offset, expected: magic, found: found.to_vec() });
        }
        Ok(())
    }

    /// Read a fixed ASCII/null-terminated string of exactly `len` bytes, trimming the
    /// trailing NUL padding libraries pack fixed-width name/comment fields with.
    pub fn read_fixed_ascii(&mut self, len: usize) -> Result<&'input str, Error> {
        let bytes = self.read_bytes(len)?;
        let trimmed = bytes.split(|&b| b == 0).next().unwrap_or(bytes);
        Ok(std::str::from_utf8(trimmed).unwrap_or_default())
    }
}

#[test]
fn test_cursor_primitives() {
    let data = [0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB, 0x10, 0x32, 0x08];
    let mut c = Cursor::new(&data);
    assert_eq!(0x0201, c.read_u16().unwrap());
    assert_eq!(0x0403, c.read_u16().unwrap());
    assert_eq!([0xAA, 0xBB], c.read_bytes(2).unwrap());
    assert!(c.expect_magic(&[0x10, 0x32, 0x08]).is_ok());
    assert!(c.is_at_end());
}

#[test]
fn test_cursor_overflow() {
    let data = [0x01];
    let mut c = Cursor::new(&data);
    assert!(c.read_u32().is_err());
}

#[test]
fn test_expect_magic_mismatch() {
    let data = [0x00, 0x00, 0x00];
    let mut c = Cursor::new(&data);
    let err = c.expect_magic(&[0x10, 0x32, 0x08]).unwrap_err();
    assert!(matches!(err, Error::BadMagic { .. }));
}
