use std::ops::Range;

use scroll::Endian;

use crate::buffer::{to_usize, BufferError, Reader};

/// An address range in `.debug_aranges`, pointing to the unit that describes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arange {
    /// The covered addresses.
    pub range: Range<u64>,
    /// Offset of the unit header in `.debug_info`.
    pub unit_offset: u64,
}

/// Parses all address range sets in `.debug_aranges`.
///
/// The result is sorted by start address. Sets that cannot be read are skipped with a warning as
/// long as their length is intact, empty ranges are dropped.
pub fn parse_aranges(data: &[u8], endian: Endian) -> Vec<Arange> {
    let mut reader = Reader::new(data, endian);
    let mut aranges = Vec::new();

    while !reader.is_empty() {
        let offset = reader.position();
        let mut set = match split_set(&mut reader) {
            Ok(set) => set,
            Err(error) => {
                tracing::warn!(offset, %error, "stopping at malformed address range set");
                break;
            }
        };

        if let Err(error) = parse_set(&mut set, offset, &mut aranges) {
            tracing::warn!(offset, %error, "skipping malformed address range set");
        }
    }

    aranges.sort_by_key(|arange| (arange.range.start, arange.range.end));
    aranges
}

fn split_set<'data>(reader: &mut Reader<'data>) -> Result<Reader<'data>, BufferError> {
    let offset = reader.absolute_position();
    let length = reader.initial_length()?;
    reader.split(to_usize(length, offset)?)
}

fn parse_set(
    set: &mut Reader<'_>,
    set_offset: usize,
    aranges: &mut Vec<Arange>,
) -> Result<(), BufferError> {
    let _version = set.u16()?;
    let unit_offset = set.offset()?;
    let address_size = set.u8()?;
    let segment_size = set.u8()?;
    set.set_address_size(address_size);

    // Tuples are aligned to their own size, counted from the start of the set.
    let tuple_size = 2 * usize::from(address_size) + usize::from(segment_size);
    if tuple_size > 0 {
        let consumed = set.absolute_position() - set_offset;
        let padding = (tuple_size - consumed % tuple_size) % tuple_size;
        set.skip(padding.min(set.remaining()))?;
    }

    while set.remaining() >= tuple_size && tuple_size > 0 {
        if segment_size > 0 {
            set.uint(segment_size)?;
        }
        let address = set.address()?;
        let length = set.address()?;

        if address == 0 && length == 0 {
            break;
        }

        if length > 0 {
            aranges.push(Arange {
                range: address..address.saturating_add(length),
                unit_offset,
            });
        }
    }

    Ok(())
}

/// Finds the unit covering `address` in a sorted list of address ranges.
pub fn unit_for_address(aranges: &[Arange], address: u64) -> Option<u64> {
    let index = aranges.partition_point(|arange| arange.range.start <= address);
    aranges[..index]
        .iter()
        .rev()
        .find(|arange| arange.range.contains(&address))
        .map(|arange| arange.unit_offset)
}
