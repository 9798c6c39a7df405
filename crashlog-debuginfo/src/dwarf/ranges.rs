use std::ops::Range;

use gimli::{constants, DwRle};
use scroll::Endian;

use super::DwarfError;
use crate::buffer::{to_usize, BufferError, Reader};

/// Parameters for decoding the range lists of one unit.
#[derive(Clone, Copy, Debug)]
pub struct RangeListContext {
    /// Byte order of the object.
    pub endian: Endian,
    /// Size of a target address.
    pub address_size: u8,
    /// Initial base address, the `DW_AT_low_pc` of the unit.
    pub base_address: u64,
}

/// Reads a range list from `.debug_ranges`, used before DWARF 5.
///
/// A pair of zeros terminates the list. A pair whose start is the largest representable address
/// selects a new base address for the following entries. Empty ranges are dropped.
pub fn parse_debug_ranges(
    data: &[u8],
    offset: u64,
    context: RangeListContext,
) -> Result<Vec<Range<u64>>, BufferError> {
    let mut reader = Reader::at(data, to_usize(offset, 0)?, context.endian)?;
    reader.set_address_size(context.address_size);

    let max_address = max_address(context.address_size);
    let mut base = context.base_address;
    let mut ranges = Vec::new();

    loop {
        let start = reader.address()?;
        let end = reader.address()?;

        if start == 0 && end == 0 {
            break;
        }

        if start == max_address {
            base = end;
            continue;
        }

        push_range(&mut ranges, base.wrapping_add(start), base.wrapping_add(end));
    }

    Ok(ranges)
}

/// Reads a range list from `.debug_rnglists`, used by DWARF 5.
///
/// `resolve_address` maps indices into `.debug_addr` to addresses for the `x` entry kinds.
pub fn parse_debug_rnglists<F>(
    data: &[u8],
    offset: u64,
    context: RangeListContext,
    mut resolve_address: F,
) -> Result<Vec<Range<u64>>, DwarfError>
where
    F: FnMut(u64) -> Result<u64, DwarfError>,
{
    let mut reader = Reader::at(data, to_usize(offset, 0)?, context.endian)?;
    reader.set_address_size(context.address_size);

    let mut base = context.base_address;
    let mut ranges = Vec::new();

    loop {
        let kind = DwRle(reader.u8()?);
        match kind {
            constants::DW_RLE_end_of_list => break,
            constants::DW_RLE_base_addressx => {
                base = resolve_address(reader.uleb128()?)?;
            }
            constants::DW_RLE_startx_endx => {
                let start = resolve_address(reader.uleb128()?)?;
                let end = resolve_address(reader.uleb128()?)?;
                push_range(&mut ranges, start, end);
            }
            constants::DW_RLE_startx_length => {
                let start = resolve_address(reader.uleb128()?)?;
                let length = reader.uleb128()?;
                push_range(&mut ranges, start, start.wrapping_add(length));
            }
            constants::DW_RLE_offset_pair => {
                let start = reader.uleb128()?;
                let end = reader.uleb128()?;
                push_range(&mut ranges, base.wrapping_add(start), base.wrapping_add(end));
            }
            constants::DW_RLE_base_address => {
                base = reader.address()?;
            }
            constants::DW_RLE_start_end => {
                let start = reader.address()?;
                let end = reader.address()?;
                push_range(&mut ranges, start, end);
            }
            constants::DW_RLE_start_length => {
                let start = reader.address()?;
                let length = reader.uleb128()?;
                push_range(&mut ranges, start, start.wrapping_add(length));
            }
            _ => {
                return Err(DwarfError::UnknownForm {
                    form: u16::from(kind.0),
                    offset: (reader.absolute_position() - 1) as u64,
                })
            }
        }
    }

    Ok(ranges)
}

/// Resolves a `DW_FORM_rnglistx` index to an offset in `.debug_rnglists`.
///
/// The offsets table starts at `base` and holds entries of `offset_size` bytes relative to `base`.
pub fn rnglist_offset(
    data: &[u8],
    base: u64,
    index: u64,
    offset_size: u8,
    endian: Endian,
) -> Result<u64, BufferError> {
    let position = index
        .checked_mul(u64::from(offset_size))
        .and_then(|delta| base.checked_add(delta))
        .ok_or(BufferError::UnexpectedEof { offset: data.len() })?;

    let mut reader = Reader::at(data, to_usize(position, 0)?, endian)?;
    reader.set_offset_size(offset_size);
    Ok(base + reader.offset()?)
}

fn max_address(address_size: u8) -> u64 {
    match address_size {
        8.. => u64::MAX,
        size => (1u64 << (u32::from(size) * 8)) - 1,
    }
}

fn push_range(ranges: &mut Vec<Range<u64>>, start: u64, end: u64) {
    if start < end {
        ranges.push(start..end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crashlog_testutils::ByteWriter;

    fn context(base_address: u64) -> RangeListContext {
        RangeListContext {
            endian: Endian::Little,
            address_size: 8,
            base_address,
        }
    }

    #[test]
    fn test_debug_ranges() {
        let mut w = ByteWriter::new();
        w.u64(0xdead); // unrelated data before the list
        w.u64(0x10).u64(0x20);
        w.u64(0x30).u64(0x30); // empty
        w.u64(u64::MAX).u64(0x2000);
        w.u64(0x0).u64(0x8);
        w.u64(0).u64(0);
        let data = w.into_bytes();

        let ranges = parse_debug_ranges(&data, 8, context(0x1000)).unwrap();
        assert_eq!(ranges, [0x1010..0x1020, 0x2000..0x2008]);
    }

    #[test]
    fn test_debug_ranges_32bit() {
        let mut w = ByteWriter::new();
        w.u32(0xffff_ffff).u32(0x4000);
        w.u32(0x4).u32(0x10);
        w.u32(0).u32(0);
        let data = w.into_bytes();

        let context = RangeListContext {
            address_size: 4,
            ..context(0)
        };
        let ranges = parse_debug_ranges(&data, 0, context).unwrap();
        assert_eq!(ranges, [0x4004..0x4010]);
    }

    #[test]
    fn test_debug_ranges_unterminated() {
        let mut w = ByteWriter::new();
        w.u64(0x10).u64(0x20);
        let data = w.into_bytes();

        let error = parse_debug_ranges(&data, 0, context(0)).unwrap_err();
        assert_eq!(error, BufferError::UnexpectedEof { offset: 16 });
    }

    #[test]
    fn test_debug_rnglists() {
        let addresses = [0x5000u64, 0x5100, 0x6000];

        let mut w = ByteWriter::new();
        w.u8(0x04).uleb(0x10).uleb(0x20); // offset_pair
        w.u8(0x05).u64(0x8000); // base_address
        w.u8(0x04).uleb(0x0).uleb(0x4);
        w.u8(0x06).u64(0x9000).u64(0x9010); // start_end
        w.u8(0x07).u64(0xa000).uleb(0x8); // start_length
        w.u8(0x02).uleb(0).uleb(1); // startx_endx
        w.u8(0x03).uleb(2).uleb(0x40); // startx_length
        w.u8(0x01).uleb(2); // base_addressx
        w.u8(0x04).uleb(0x1).uleb(0x2);
        w.u8(0x04).uleb(0x5).uleb(0x5); // empty
        w.u8(0x00);
        let data = w.into_bytes();

        let ranges = parse_debug_rnglists(&data, 0, context(0x1000), |index| {
            Ok(addresses[index as usize])
        })
        .unwrap();

        assert_eq!(
            ranges,
            [
                0x1010..0x1020,
                0x8000..0x8004,
                0x9000..0x9010,
                0xa000..0xa008,
                0x5000..0x5100,
                0x6000..0x6040,
                0x6001..0x6002,
            ]
        );
    }

    #[test]
    fn test_debug_rnglists_unknown_kind() {
        let data = [0x04, 0x00, 0x01, 0x09];
        let error = parse_debug_rnglists(&data, 0, context(0), |_| Ok(0)).unwrap_err();
        assert!(matches!(
            error,
            DwarfError::UnknownForm { form: 9, offset: 3 }
        ));
    }

    #[test]
    fn test_rnglist_offset() {
        let mut w = ByteWriter::new();
        w.u32(0); // unit header remnant
        w.u32(0x8).u32(0x14);
        let data = w.into_bytes();

        assert_eq!(rnglist_offset(&data, 4, 0, 4, Endian::Little), Ok(0xc));
        assert_eq!(rnglist_offset(&data, 4, 1, 4, Endian::Little), Ok(0x18));
        assert!(rnglist_offset(&data, 4, 2, 4, Endian::Little).is_err());
    }
}
