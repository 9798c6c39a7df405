use std::fmt;

use scroll::{Endian, Pread};
use thiserror::Error;

use crate::leb128;

/// An error when reading primitives from a binary buffer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// A read went past the end of the buffer.
    #[error("unexpected end of data at offset {offset:#x}")]
    UnexpectedEof {
        /// Offset at which the read was attempted.
        offset: usize,
    },

    /// A LEB128 value does not fit into 64 bits.
    #[error("LEB128 value at offset {offset:#x} exceeds 64 bits")]
    Leb128Overflow {
        /// Offset of the first byte of the value.
        offset: usize,
    },

    /// A string is not terminated by a NUL byte.
    #[error("unterminated string at offset {offset:#x}")]
    UnterminatedString {
        /// Offset of the first byte of the string.
        offset: usize,
    },

    /// An integer of unsupported width was requested.
    #[error("unsupported value size {size} at offset {offset:#x}")]
    UnsupportedSize {
        /// The requested size in bytes.
        size: u8,
        /// Offset at which the read was attempted.
        offset: usize,
    },

    /// A DWARF initial length uses a reserved value.
    #[error("reserved initial length {value:#x} at offset {offset:#x}")]
    ReservedLength {
        /// The reserved value.
        value: u32,
        /// Offset of the length field.
        offset: usize,
    },
}

impl BufferError {
    /// The offset at which the error occurred.
    pub fn offset(&self) -> usize {
        match *self {
            BufferError::UnexpectedEof { offset }
            | BufferError::Leb128Overflow { offset }
            | BufferError::UnterminatedString { offset }
            | BufferError::UnsupportedSize { offset, .. }
            | BufferError::ReservedLength { offset, .. } => offset,
        }
    }
}

/// A bounds-checked cursor over a byte slice.
///
/// Besides the byte order, the reader carries the target address size (4 or 8 bytes) and the
/// DWARF offset size (4 bytes for 32-bit DWARF, 8 bytes for 64-bit DWARF) which determine the width
/// of [`address`](Self::address) and [`offset`](Self::offset) reads.
///
/// Errors report offsets relative to the slice the outermost reader was created from, also for
/// readers obtained through [`split`](Self::split).
#[derive(Clone)]
pub struct Reader<'data> {
    data: &'data [u8],
    base: usize,
    pos: usize,
    endian: Endian,
    address_size: u8,
    offset_size: u8,
}

impl<'data> Reader<'data> {
    /// Creates a reader over `data` with 8-byte addresses and 4-byte offsets.
    pub fn new(data: &'data [u8], endian: Endian) -> Self {
        Reader {
            data,
            base: 0,
            pos: 0,
            endian,
            address_size: 8,
            offset_size: 4,
        }
    }

    /// Creates a reader positioned at `offset` within `data`.
    pub fn at(data: &'data [u8], offset: usize, endian: Endian) -> Result<Self, BufferError> {
        let mut reader = Self::new(data, endian);
        reader.seek(offset)?;
        Ok(reader)
    }

    /// The byte order of this reader.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The size of a target address in bytes.
    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    /// Sets the size of a target address in bytes.
    pub fn set_address_size(&mut self, size: u8) {
        self.address_size = size;
    }

    /// The size of a section offset in bytes.
    pub fn offset_size(&self) -> u8 {
        self.offset_size
    }

    /// Sets the size of a section offset in bytes.
    pub fn set_offset_size(&mut self, size: u8) {
        self.offset_size = size;
    }

    /// The current position relative to the start of this reader.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The current position relative to the start of the outermost buffer.
    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    /// The number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Returns `true` if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread part of the buffer.
    pub fn rest(&self) -> &'data [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    fn eof(&self) -> BufferError {
        BufferError::UnexpectedEof {
            offset: self.absolute_position(),
        }
    }

    fn read<T>(&mut self) -> Result<T, BufferError>
    where
        T: scroll::ctx::TryFromCtx<'data, Endian, Error = scroll::Error>,
    {
        let offset = self.absolute_position();
        let data = self.data;
        data.gread_with(&mut self.pos, self.endian)
            .map_err(|_| BufferError::UnexpectedEof { offset })
    }

    /// Reads an unsigned byte.
    pub fn u8(&mut self) -> Result<u8, BufferError> {
        self.read()
    }

    /// Reads a signed byte.
    pub fn i8(&mut self) -> Result<i8, BufferError> {
        self.read()
    }

    /// Reads an unsigned 16-bit integer.
    pub fn u16(&mut self) -> Result<u16, BufferError> {
        self.read()
    }

    /// Reads an unsigned 32-bit integer.
    pub fn u32(&mut self) -> Result<u32, BufferError> {
        self.read()
    }

    /// Reads a signed 32-bit integer.
    pub fn i32(&mut self) -> Result<i32, BufferError> {
        self.read()
    }

    /// Reads an unsigned 64-bit integer.
    pub fn u64(&mut self) -> Result<u64, BufferError> {
        self.read()
    }

    /// Reads an unsigned integer of `size` bytes, where `size` is between 1 and 8.
    pub fn uint(&mut self, size: u8) -> Result<u64, BufferError> {
        match size {
            1 => self.u8().map(u64::from),
            2 => self.u16().map(u64::from),
            4 => self.u32().map(u64::from),
            8 => self.u64(),
            3 | 5..=7 => {
                let bytes = self.bytes(usize::from(size))?;
                let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
                Ok(match self.endian {
                    Endian::Little => bytes.iter().rev().fold(0, fold),
                    Endian::Big => bytes.iter().fold(0, fold),
                })
            }
            _ => Err(BufferError::UnsupportedSize {
                size,
                offset: self.absolute_position(),
            }),
        }
    }

    /// Reads a target address of [`address_size`](Self::address_size) bytes.
    pub fn address(&mut self) -> Result<u64, BufferError> {
        self.uint(self.address_size)
    }

    /// Reads a section offset of [`offset_size`](Self::offset_size) bytes.
    pub fn offset(&mut self) -> Result<u64, BufferError> {
        self.uint(self.offset_size)
    }

    /// Reads an unsigned LEB128 value.
    pub fn uleb128(&mut self) -> Result<u64, BufferError> {
        let start = self.pos;
        leb128::read_uleb128(self.data, &mut self.pos).map_err(|e| self.rebase(e, start))
    }

    /// Reads a signed LEB128 value.
    pub fn sleb128(&mut self) -> Result<i64, BufferError> {
        let start = self.pos;
        leb128::read_sleb128(self.data, &mut self.pos).map_err(|e| self.rebase(e, start))
    }

    fn rebase(&self, error: BufferError, start: usize) -> BufferError {
        match error {
            BufferError::UnexpectedEof { .. } => self.eof_at(self.data.len()),
            BufferError::Leb128Overflow { .. } => BufferError::Leb128Overflow {
                offset: self.base + start,
            },
            other => other,
        }
    }

    fn eof_at(&self, pos: usize) -> BufferError {
        BufferError::UnexpectedEof {
            offset: self.base + pos,
        }
    }

    /// Reads a NUL-terminated string and returns its bytes without the terminator.
    pub fn cstr(&mut self) -> Result<&'data [u8], BufferError> {
        let rest = self.rest();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BufferError::UnterminatedString {
                offset: self.absolute_position(),
            })?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    /// Reads `len` raw bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'data [u8], BufferError> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.eof())?;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| self.eof())?;
        self.pos = end;
        Ok(bytes)
    }

    /// Advances the position by `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), BufferError> {
        self.bytes(len).map(|_| ())
    }

    /// Moves to `pos`, relative to the start of this reader.
    pub fn seek(&mut self, pos: usize) -> Result<(), BufferError> {
        if pos > self.data.len() {
            return Err(self.eof_at(pos));
        }
        self.pos = pos;
        Ok(())
    }

    /// Splits off a reader over the next `len` bytes and advances past them.
    ///
    /// The sub-reader inherits byte order, address and offset size.
    pub fn split(&mut self, len: usize) -> Result<Reader<'data>, BufferError> {
        let base = self.absolute_position();
        let data = self.bytes(len)?;
        Ok(Reader {
            data,
            base,
            pos: 0,
            ..*self
        })
    }

    /// Reads a DWARF initial length field.
    ///
    /// The escape value `0xffffffff` announces 64-bit DWARF: the actual length follows as a 64-bit
    /// integer and the reader switches to 8-byte offsets. Otherwise, offsets are 4 bytes.
    pub fn initial_length(&mut self) -> Result<u64, BufferError> {
        let offset = self.absolute_position();
        match self.u32()? {
            0xffff_ffff => {
                self.offset_size = 8;
                self.u64()
            }
            value @ 0xffff_fff0.. => Err(BufferError::ReservedLength { value, offset }),
            value => {
                self.offset_size = 4;
                Ok(u64::from(value))
            }
        }
    }
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("base", &format_args!("{:#x}", self.base))
            .field("position", &format_args!("{:#x}", self.pos))
            .field("len()", &self.data.len())
            .field("endian", &self.endian)
            .field("address_size", &self.address_size)
            .field("offset_size", &self.offset_size)
            .finish()
    }
}

/// Converts a 64-bit file value into a `usize` offset, failing on narrow hosts.
pub(crate) fn to_usize(value: u64, offset: usize) -> Result<usize, BufferError> {
    usize::try_from(value).map_err(|_| BufferError::UnexpectedEof { offset })
}
