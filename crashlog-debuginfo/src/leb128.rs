//! Little-Endian Base 128 variable-length integers.
//!
//! DWARF encodes most counts, offsets and constants in this format: the low seven bits of every
//! byte carry payload, least significant group first, and the high bit marks continuation.

use crate::buffer::BufferError;

/// Decodes an unsigned LEB128 value at `*offset` and advances the offset past it.
///
/// On error, the offset is left untouched.
pub fn read_uleb128(data: &[u8], offset: &mut usize) -> Result<u64, BufferError> {
    let mut pos = *offset;
    let mut result = 0u64;
    let mut shift = 0u32;

    loop {
        let byte = *data
            .get(pos)
            .ok_or(BufferError::UnexpectedEof { offset: pos })?;
        pos += 1;

        let low = u64::from(byte & 0x7f);
        if shift >= 64 {
            if low != 0 {
                return Err(BufferError::Leb128Overflow { offset: *offset });
            }
        } else {
            if shift == 63 && low > 1 {
                return Err(BufferError::Leb128Overflow { offset: *offset });
            }
            result |= low << shift;
        }

        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    *offset = pos;
    Ok(result)
}

/// Decodes a signed LEB128 value at `*offset` and advances the offset past it.
///
/// The value is sign-extended from bit 6 of the terminating byte. On error, the offset is left
/// untouched.
pub fn read_sleb128(data: &[u8], offset: &mut usize) -> Result<i64, BufferError> {
    let mut pos = *offset;
    let mut result = 0i64;
    let mut shift = 0u32;
    let mut byte;

    loop {
        byte = *data
            .get(pos)
            .ok_or(BufferError::UnexpectedEof { offset: pos })?;
        pos += 1;

        let low = i64::from(byte & 0x7f);
        if shift >= 63 {
            // Only sign extension bits may remain.
            let sign = if result < 0 || (shift == 63 && low & 1 != 0) {
                0x7f
            } else {
                0
            };
            if low != sign {
                return Err(BufferError::Leb128Overflow { offset: *offset });
            }
            if shift == 63 {
                result |= low << shift;
            }
        } else {
            result |= low << shift;
        }

        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    if shift < 64 && byte & 0x40 != 0 {
        result |= -1i64 << shift;
    }

    *offset = pos;
    Ok(result)
}

/// Appends the unsigned LEB128 encoding of `value` and returns the number of bytes written.
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u64) -> usize {
    let start = out.len();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.len() - start
}

/// Appends the signed LEB128 encoding of `value` and returns the number of bytes written.
pub fn write_sleb128(out: &mut Vec<u8>, mut value: i64) -> usize {
    let start = out.len();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.len() - start
}
