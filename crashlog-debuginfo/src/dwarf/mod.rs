//! Support for DWARF debugging information carried by Mach objects.
//!
//! [`DwarfFile`] collects the debug sections of a [`MachObject`] and decodes them on demand. Unit
//! headers, abbreviation tables, the entries of each unit, line programs and the address range
//! table are computed on first access and kept for the lifetime of the file, so repeated lookups
//! against the same object only pay for the tree walk.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use gimli::{constants, DwAt, DwTag};
use once_cell::sync::OnceCell;
use scroll::Endian;
use thiserror::Error;

use crashlog_common::ByteView;

use crate::buffer::{to_usize, BufferError, Reader};
use crate::macho::MachObject;
use crate::symbolication::SymbolicationData;

pub mod abbrev;
pub mod aranges;
pub mod line;
pub mod ranges;
pub mod unit;

use self::abbrev::AbbreviationTable;
use self::aranges::Arange;
use self::line::{LineProgram, LineStrings};
use self::ranges::RangeListContext;
use self::unit::{AttributeValue, Entry, EntryId, Unit, UnitHeader};

/// Nesting limit when following `DW_AT_specification` and `DW_AT_abstract_origin`.
const MAX_REFERENCE_DEPTH: usize = 8;

/// Nesting limit for the scope search in a unit's entry tree.
const MAX_SCOPE_DEPTH: usize = 256;

/// An error handling DWARF debugging information.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DwarfError {
    /// A unit referenced by offset does not exist.
    #[error("compilation unit for offset {0:#x} does not exist")]
    InvalidUnitRef(u64),

    /// An entry uses an abbreviation code missing from its table.
    #[error("invalid abbreviation code {code} at offset {offset:#x}")]
    InvalidAbbrevCode {
        /// The abbreviation code.
        code: u64,
        /// Offset of the entry in `.debug_info`.
        offset: u64,
    },

    /// An attribute, line program entry or range list uses an unknown encoding.
    #[error("unknown form {form:#x} at offset {offset:#x}")]
    UnknownForm {
        /// The raw form or entry kind.
        form: u16,
        /// Offset of the value.
        offset: u64,
    },

    /// A unit or line program declares a version outside of 2 to 5.
    #[error("unsupported DWARF version {version} at offset {offset:#x}")]
    UnsupportedVersion {
        /// The declared version.
        version: u16,
        /// Offset of the unit or program header.
        offset: u64,
    },

    /// A line program header declares parameters that cannot be executed.
    #[error("invalid line program at offset {offset:#x}")]
    InvalidLineProgram {
        /// Offset of the program header in `.debug_line`.
        offset: u64,
    },

    /// A section required for decoding is not present in the object.
    #[error("missing section {0}")]
    MissingSection(&'static str),

    /// The DWARF file is corrupted. See the cause for more information.
    #[error("corrupted dwarf debug data")]
    CorruptedData(#[from] BufferError),
}

/// The debug sections read by [`DwarfFile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DwarfSection {
    /// `__debug_abbrev`
    Abbrev,
    /// `__debug_info`
    Info,
    /// `__debug_str`
    Str,
    /// `__debug_str_offsets`
    StrOffsets,
    /// `__debug_addr`
    Addr,
    /// `__debug_line`
    Line,
    /// `__debug_line_str`
    LineStr,
    /// `__debug_aranges`
    Aranges,
    /// `__debug_ranges`
    Ranges,
    /// `__debug_rnglists`
    Rnglists,
}

impl DwarfSection {
    /// All sections in declaration order.
    pub const ALL: [DwarfSection; 10] = [
        DwarfSection::Abbrev,
        DwarfSection::Info,
        DwarfSection::Str,
        DwarfSection::StrOffsets,
        DwarfSection::Addr,
        DwarfSection::Line,
        DwarfSection::LineStr,
        DwarfSection::Aranges,
        DwarfSection::Ranges,
        DwarfSection::Rnglists,
    ];

    /// The name of the section without the Mach-O `__` prefix.
    pub fn name(self) -> &'static str {
        match self {
            DwarfSection::Abbrev => "debug_abbrev",
            DwarfSection::Info => "debug_info",
            DwarfSection::Str => "debug_str",
            DwarfSection::StrOffsets => "debug_str_offsets",
            DwarfSection::Addr => "debug_addr",
            DwarfSection::Line => "debug_line",
            DwarfSection::LineStr => "debug_line_str",
            DwarfSection::Aranges => "debug_aranges",
            DwarfSection::Ranges => "debug_ranges",
            DwarfSection::Rnglists => "debug_rnglists",
        }
    }
}

impl fmt::Display for DwarfSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Default)]
struct UnitSlot {
    unit: OnceCell<Option<Unit>>,
    line_program: OnceCell<Option<LineProgram>>,
}

/// Lazily decoded DWARF debugging information of one object file.
pub struct DwarfFile<'data> {
    data: ByteView<'data>,
    endian: Endian,
    address_size: u8,
    sections: [Option<Range<usize>>; 10],
    headers: OnceCell<Vec<UnitHeader>>,
    abbreviations: OnceCell<BTreeMap<u64, OnceCell<Option<AbbreviationTable>>>>,
    units: OnceCell<Vec<UnitSlot>>,
    aranges: OnceCell<Vec<Arange>>,
}

impl<'data> DwarfFile<'data> {
    /// Collects the debug sections of a Mach object.
    ///
    /// Fails with [`DwarfError::MissingSection`] if the object has no `__debug_info` section.
    /// Nothing beyond the section table is decoded here.
    pub fn parse(object: &MachObject<'data>) -> Result<Self, DwarfError> {
        let mut sections: [Option<Range<usize>>; 10] = Default::default();
        for (slot, section) in sections.iter_mut().zip(DwarfSection::ALL) {
            *slot = object
                .find_section(&format!("__{}", section.name()))
                .and_then(|s| object.section_file_range(s));
        }

        if sections[DwarfSection::Info as usize].is_none() {
            return Err(DwarfError::MissingSection(DwarfSection::Info.name()));
        }

        Ok(DwarfFile {
            data: object.byte_view().clone(),
            endian: object.endian(),
            address_size: object.address_size(),
            sections,
            headers: OnceCell::new(),
            abbreviations: OnceCell::new(),
            units: OnceCell::new(),
            aranges: OnceCell::new(),
        })
    }

    /// The byte order of the debug information.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns the contents of a debug section, if the object contains it.
    pub fn section_data(&self, section: DwarfSection) -> Option<&[u8]> {
        let range = self.sections[section as usize].clone()?;
        self.data.get(range)
    }

    /// Returns `true` if the object contains the given section.
    pub fn has_section(&self, section: DwarfSection) -> bool {
        self.sections[section as usize].is_some()
    }

    fn require(&self, section: DwarfSection) -> Result<&[u8], DwarfError> {
        self.section_data(section)
            .ok_or(DwarfError::MissingSection(section.name()))
    }

    /// Headers of all units in `.debug_info`.
    pub fn unit_headers(&self) -> &[UnitHeader] {
        self.headers.get_or_init(|| {
            let info = self.section_data(DwarfSection::Info).unwrap_or_default();
            unit::parse_unit_headers(info, self.endian)
        })
    }

    /// The number of units.
    pub fn unit_count(&self) -> usize {
        self.unit_headers().len()
    }

    fn slots(&self) -> &[UnitSlot] {
        self.units.get_or_init(|| {
            std::iter::repeat_with(UnitSlot::default)
                .take(self.unit_count())
                .collect()
        })
    }

    /// Returns the abbreviation table at the given offset of `.debug_abbrev`.
    ///
    /// Only offsets referenced by a unit header are known. A table that fails to parse is logged
    /// and reported as missing.
    pub fn abbreviations(&self, offset: u64) -> Option<&AbbreviationTable> {
        let tables = self.abbreviations.get_or_init(|| {
            self.unit_headers()
                .iter()
                .map(|header| (header.abbrev_offset, OnceCell::new()))
                .collect()
        });

        tables
            .get(&offset)?
            .get_or_init(|| {
                let data = self.section_data(DwarfSection::Abbrev)?;
                let start = usize::try_from(offset).ok()?;
                match AbbreviationTable::parse(data, start, self.endian) {
                    Ok(table) => Some(table),
                    Err(error) => {
                        tracing::warn!(offset, %error, "failed to parse abbreviation table");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Returns the unit at the given index, decoding it on first access.
    ///
    /// A unit that fails to decode is logged and treated as empty, which this reports as `None`.
    /// Other units are not affected.
    ///
    /// Attribute forms are not skipped by size. A form this reader does not know, such as a
    /// vendor extension, makes the remaining entries of the unit unreadable, so the whole unit is
    /// dropped rather than just the attribute. Addresses covered by that unit fall back to the
    /// symbol table.
    pub fn unit(&self, index: usize) -> Option<&Unit> {
        let header = self.unit_headers().get(index)?;
        let slot = self.slots().get(index)?;

        slot.unit
            .get_or_init(|| match self.parse_unit(header) {
                Ok(unit) => Some(unit),
                Err(error) => {
                    tracing::warn!(
                        offset = header.offset,
                        error = &error as &dyn std::error::Error,
                        "skipping malformed compilation unit"
                    );
                    None
                }
            })
            .as_ref()
    }

    fn parse_unit(&self, header: &UnitHeader) -> Result<Unit, DwarfError> {
        let info = self.require(DwarfSection::Info)?;
        let table = self
            .abbreviations(header.abbrev_offset)
            .ok_or(DwarfError::MissingSection(DwarfSection::Abbrev.name()))?;

        let mut unit = unit::parse_unit(info, self.endian, header, table)?;

        if let Some(root) = unit.root().and_then(|id| unit.entry(id)) {
            let string = |name| {
                root.attr(name)
                    .and_then(|value| self.string(&unit, value))
                    .map(Cow::into_owned)
            };
            let name = string(constants::DW_AT_name);
            let comp_dir = string(constants::DW_AT_comp_dir);
            let producer = string(constants::DW_AT_producer);

            let base_address = match root.attr(constants::DW_AT_low_pc) {
                Some(value) => self.address(&unit, value),
                None => None,
            };

            unit.name = name;
            unit.comp_dir = comp_dir;
            unit.producer = producer;
            if let Some(base_address) = base_address {
                unit.base_address = base_address;
            }
        }

        Ok(unit)
    }

    /// Returns the index of the unit whose header starts at `offset`.
    pub fn unit_index_by_offset(&self, offset: u64) -> Option<usize> {
        self.unit_headers()
            .binary_search_by_key(&offset, |header| header.offset)
            .ok()
    }

    /// Returns the index of the unit containing the `.debug_info` offset.
    pub fn unit_index_containing(&self, offset: u64) -> Option<usize> {
        let headers = self.unit_headers();
        let index = headers.partition_point(|header| header.offset <= offset);
        let index = index.checked_sub(1)?;
        headers[index].contains_offset(offset).then_some(index)
    }

    /// Returns the line program of the unit at the given index.
    pub fn line_program(&self, index: usize) -> Option<&LineProgram> {
        let slot = self.slots().get(index)?;
        slot.line_program
            .get_or_init(|| {
                let unit = self.unit(index)?;
                let offset = unit.line_program_offset()?;
                let data = self.section_data(DwarfSection::Line)?;
                let strings = LineStrings {
                    debug_str: self.section_data(DwarfSection::Str).unwrap_or_default(),
                    debug_line_str: self.section_data(DwarfSection::LineStr).unwrap_or_default(),
                };

                let address_size = unit.header().address_size;
                match LineProgram::parse(data, offset, self.endian, address_size, strings) {
                    Ok(program) => Some(program),
                    Err(error) => {
                        tracing::warn!(
                            offset,
                            error = &error as &dyn std::error::Error,
                            "failed to parse line program"
                        );
                        None
                    }
                }
            })
            .as_ref()
    }

    /// The address ranges of `.debug_aranges`, sorted by start address.
    pub fn aranges(&self) -> &[Arange] {
        self.aranges.get_or_init(|| match self.section_data(DwarfSection::Aranges) {
            Some(data) => aranges::parse_aranges(data, self.endian),
            None => Vec::new(),
        })
    }

    /// Resolves a string attribute value.
    ///
    /// Invalid UTF-8 is replaced. Returns `None` for values that are not strings or point outside
    /// of their section.
    pub fn string(&self, unit: &Unit, value: AttributeValue) -> Option<Cow<'_, str>> {
        let (section, offset) = match value {
            AttributeValue::String(offset) => (DwarfSection::Info, offset),
            AttributeValue::StringOffset(offset) => (DwarfSection::Str, offset),
            AttributeValue::LineStringOffset(offset) => (DwarfSection::LineStr, offset),
            AttributeValue::StringIndex(index) => {
                (DwarfSection::Str, self.string_offset(unit, index)?)
            }
            _ => return None,
        };

        let data = self.section_data(section)?;
        let mut reader = Reader::at(data, usize::try_from(offset).ok()?, self.endian).ok()?;
        reader.cstr().ok().map(String::from_utf8_lossy)
    }

    fn string_offset(&self, unit: &Unit, index: u64) -> Option<u64> {
        let offset_size = unit.header().offset_size;
        // Without an explicit base, the offsets follow the header of the first contribution.
        let base = unit
            .bases()
            .str_offsets_base
            .unwrap_or(if offset_size == 8 { 16 } else { 8 });

        let position = base.checked_add(index.checked_mul(u64::from(offset_size))?)?;
        let data = self.section_data(DwarfSection::StrOffsets)?;
        let mut reader = Reader::at(data, usize::try_from(position).ok()?, self.endian).ok()?;
        reader.set_offset_size(offset_size);
        reader.offset().ok()
    }

    /// Resolves an address attribute value, looking up indexed addresses in `.debug_addr`.
    pub fn address(&self, unit: &Unit, value: AttributeValue) -> Option<u64> {
        match value {
            AttributeValue::Address(address) => Some(address),
            AttributeValue::AddressIndex(index) => self.indexed_address(unit, index).ok(),
            _ => None,
        }
    }

    fn indexed_address(&self, unit: &Unit, index: u64) -> Result<u64, DwarfError> {
        let address_size = unit.header().address_size;
        let base = unit.bases().addr_base.unwrap_or(8);
        let data = self.require(DwarfSection::Addr)?;

        let position = index
            .checked_mul(u64::from(address_size))
            .and_then(|delta| base.checked_add(delta))
            .ok_or(BufferError::UnexpectedEof { offset: data.len() })?;

        let mut reader = Reader::at(data, to_usize(position, 0)?, self.endian)?;
        reader.set_address_size(address_size);
        Ok(reader.address()?)
    }

    /// Computes the address ranges covered by an entry.
    ///
    /// Considers `DW_AT_low_pc` with `DW_AT_high_pc` as either an address or a length, and
    /// `DW_AT_ranges`. Empty ranges are omitted.
    pub fn entry_ranges(&self, unit: &Unit, entry: &Entry) -> Result<Vec<Range<u64>>, DwarfError> {
        let mut low_pc = None;
        let mut high_pc = None;

        for attr in &entry.attributes {
            match attr.name {
                constants::DW_AT_ranges => return self.range_list(unit, attr.value),
                constants::DW_AT_low_pc => low_pc = self.address(unit, attr.value),
                constants::DW_AT_high_pc => high_pc = Some(attr.value),
                _ => {}
            }
        }

        let (Some(low), Some(high)) = (low_pc, high_pc) else {
            return Ok(Vec::new());
        };

        let high = match high {
            AttributeValue::Address(_) | AttributeValue::AddressIndex(_) => {
                self.address(unit, high)
            }
            value => value.udata().map(|length| low.wrapping_add(length)),
        };

        Ok(match high {
            Some(high) if low < high => vec![low..high],
            _ => Vec::new(),
        })
    }

    fn range_list(&self, unit: &Unit, value: AttributeValue) -> Result<Vec<Range<u64>>, DwarfError> {
        let header = unit.header();
        let context = RangeListContext {
            endian: self.endian,
            address_size: header.address_size,
            base_address: unit.base_address(),
        };

        if header.version < 5 {
            let Some(offset) = value.section_offset() else {
                return Ok(Vec::new());
            };
            let data = self.require(DwarfSection::Ranges)?;
            return Ok(ranges::parse_debug_ranges(data, offset, context)?);
        }

        let data = self.require(DwarfSection::Rnglists)?;
        let offset = match value {
            AttributeValue::SectionOffset(offset) => offset,
            AttributeValue::RangeListIndex(index) => {
                let offset_size = header.offset_size;
                let base = unit
                    .bases()
                    .rnglists_base
                    .unwrap_or(if offset_size == 8 { 20 } else { 12 });
                ranges::rnglist_offset(data, base, index, offset_size, self.endian)?
            }
            _ => return Ok(Vec::new()),
        };

        ranges::parse_debug_rnglists(data, offset, context, |index| {
            self.indexed_address(unit, index)
        })
    }

    /// Follows a reference attribute to the entry it points to.
    ///
    /// Returns the index of the unit containing the target along with the target entry.
    pub fn resolve_reference(
        &self,
        unit: &Unit,
        value: AttributeValue,
    ) -> Option<(usize, EntryId)> {
        let offset = match value {
            AttributeValue::UnitRef(offset) => unit.header().offset.checked_add(offset)?,
            AttributeValue::DebugInfoRef(offset) => offset,
            _ => return None,
        };

        let index = self.unit_index_containing(offset)?;
        let target = self.unit(index)?;
        Some((index, target.entry_by_offset(offset)?))
    }

    /// Resolves the name of a function entry.
    ///
    /// Prefers `DW_AT_name`, then the name of the declaration or abstract instance the entry
    /// refers to, and finally the linkage name.
    pub fn function_name(&self, unit: &Unit, id: EntryId) -> Option<String> {
        self.function_name_at(unit, id, 0)
    }

    fn function_name_at(&self, unit: &Unit, id: EntryId, depth: usize) -> Option<String> {
        let entry = unit.entry(id)?;

        if let Some(name) = self.attr_string(unit, entry, constants::DW_AT_name) {
            return Some(name);
        }

        if depth < MAX_REFERENCE_DEPTH {
            for name in [constants::DW_AT_specification, constants::DW_AT_abstract_origin] {
                let Some(value) = entry.attr(name) else {
                    continue;
                };
                let Some((index, target)) = self.resolve_reference(unit, value) else {
                    continue;
                };
                let Some(target_unit) = self.unit(index) else {
                    continue;
                };
                if let Some(name) = self.function_name_at(target_unit, target, depth + 1) {
                    return Some(name);
                }
            }
        }

        self.attr_string(unit, entry, constants::DW_AT_linkage_name)
            .or_else(|| self.attr_string(unit, entry, constants::DW_AT_MIPS_linkage_name))
    }

    fn attr_string(&self, unit: &Unit, entry: &Entry, name: DwAt) -> Option<String> {
        let value = entry.attr(name)?;
        self.string(unit, value).map(Cow::into_owned)
    }

    /// Finds the declaration file and line of a function entry, following references.
    fn declaration(&self, unit: &Unit, id: EntryId, depth: usize) -> (Option<u64>, Option<u64>) {
        let Some(entry) = unit.entry(id) else {
            return (None, None);
        };

        let file = entry.attr(constants::DW_AT_decl_file).and_then(AttributeValue::udata);
        let line = entry.attr(constants::DW_AT_decl_line).and_then(AttributeValue::udata);
        if file.is_some() || line.is_some() || depth >= MAX_REFERENCE_DEPTH {
            return (file, line);
        }

        for name in [constants::DW_AT_specification, constants::DW_AT_abstract_origin] {
            let Some((index, target)) = entry
                .attr(name)
                .and_then(|value| self.resolve_reference(unit, value))
            else {
                continue;
            };
            // File indices only make sense within the line program of the same unit.
            if self.unit_headers().get(index).map(|h| h.offset) != Some(unit.header().offset) {
                continue;
            }
            let result = self.declaration(unit, target, depth + 1);
            if result != (None, None) {
                return result;
            }
        }

        (None, None)
    }

    /// Finds the index of the unit covering `address`.
    ///
    /// Uses `.debug_aranges` when it has an entry for the address, and otherwise checks the ranges
    /// of every unit's root entry.
    pub fn unit_for_address(&self, address: u64) -> Result<Option<usize>, DwarfError> {
        if let Some(offset) = aranges::unit_for_address(self.aranges(), address) {
            return self
                .unit_index_by_offset(offset)
                .map(Some)
                .ok_or(DwarfError::InvalidUnitRef(offset));
        }

        for index in 0..self.unit_count() {
            if self.unit_headers()[index].is_type_unit() {
                continue;
            }
            let Some(unit) = self.unit(index) else {
                continue;
            };
            let Some(root) = unit.root().and_then(|id| unit.entry(id)) else {
                continue;
            };

            match self.entry_ranges(unit, root) {
                Ok(ranges) if ranges.iter().any(|range| range.contains(&address)) => {
                    return Ok(Some(index));
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        offset = unit.header().offset,
                        error = &error as &dyn std::error::Error,
                        "failed to read unit ranges"
                    );
                }
            }
        }

        Ok(None)
    }

    /// Resolves an address to its function, source file and line.
    ///
    /// The address is a virtual address in the object's address space, that is the offset into
    /// the image plus the `__TEXT` load address. Addresses not covered by any function yield
    /// [`SymbolicationData::not_found`].
    #[tracing::instrument(level = "debug", skip_all, fields(address = %format_args!("{address:#x}")))]
    pub fn lookup(&self, address: u64) -> Result<SymbolicationData, DwarfError> {
        let Some((index, scopes)) = self.scopes_for_address(address)? else {
            tracing::debug!("no unit covers the address");
            return Ok(SymbolicationData::not_found(address));
        };
        let Some(unit) = self.unit(index) else {
            return Ok(SymbolicationData::not_found(address));
        };

        let Some(function) = scopes
            .iter()
            .rev()
            .copied()
            .find(|&id| unit.entry(id).is_some_and(|entry| is_function(entry.tag)))
        else {
            tracing::debug!(unit = unit.name(), "no function covers the address");
            return Ok(SymbolicationData::not_found(address));
        };

        let symbol = self.function_name(unit, function);
        let program = self.line_program(index);
        let row = program.and_then(|program| program.row_for_address(address));

        let (file_index, line) = match row {
            Some(row) => (Some(row.file_index), (row.line > 0).then_some(row.line)),
            None => self.declaration(unit, function, 0),
        };

        let file = program.zip(file_index).and_then(|(p, i)| p.file_path(i));
        let abs_path = program
            .zip(file_index)
            .and_then(|(p, i)| p.absolute_path(i, unit.comp_dir()));

        Ok(SymbolicationData {
            found: true,
            symbol,
            file,
            abs_path,
            line,
            language: unit.language(),
            address,
        })
    }

    /// Returns the unit covering `address` and the chain of scopes containing it, outermost first.
    ///
    /// Scopes are subprograms, inlined subroutines and lexical blocks. The chain is empty when the
    /// unit covers the address but none of its scopes do.
    pub fn scopes_for_address(
        &self,
        address: u64,
    ) -> Result<Option<(usize, Vec<EntryId>)>, DwarfError> {
        let Some(index) = self.unit_for_address(address)? else {
            return Ok(None);
        };
        let Some(unit) = self.unit(index) else {
            return Ok(None);
        };
        let Some(root) = unit.root() else {
            return Ok(None);
        };

        let mut scopes = Vec::new();
        self.find_scopes(unit, root, address, &mut scopes, 0)?;
        Ok(Some((index, scopes)))
    }

    /// Returns the innermost entry whose ranges contain `address`, together with its unit index.
    ///
    /// Unlike [`lookup`](Self::lookup), this stops at lexical blocks instead of the enclosing
    /// function.
    pub fn innermost_entry(&self, address: u64) -> Result<Option<(usize, EntryId)>, DwarfError> {
        Ok(self
            .scopes_for_address(address)?
            .and_then(|(index, scopes)| Some((index, *scopes.last()?))))
    }

    /// Collects the chain of scopes containing `address` below `parent`, outermost first.
    ///
    /// Scopes whose ranges miss the address are skipped with their subtree. Scopes without any
    /// ranges and all other entries are transparent. The first matching sibling wins.
    fn find_scopes(
        &self,
        unit: &Unit,
        parent: EntryId,
        address: u64,
        scopes: &mut Vec<EntryId>,
        depth: usize,
    ) -> Result<bool, DwarfError> {
        if depth >= MAX_SCOPE_DEPTH {
            return Ok(false);
        }

        for (id, entry) in unit.children(parent) {
            if is_scope(entry.tag) {
                let ranges = self.entry_ranges(unit, entry)?;
                if !ranges.is_empty() {
                    if ranges.iter().any(|range| range.contains(&address)) {
                        scopes.push(id);
                        self.find_scopes(unit, id, address, scopes, depth + 1)?;
                        return Ok(true);
                    }
                    continue;
                }
            }

            if entry.first_child.is_some()
                && self.find_scopes(unit, id, address, scopes, depth + 1)?
            {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

impl fmt::Debug for DwarfFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections: Vec<_> = DwarfSection::ALL
            .into_iter()
            .filter(|section| self.has_section(*section))
            .collect();

        f.debug_struct("DwarfFile")
            .field("endian", &self.endian)
            .field("address_size", &self.address_size)
            .field("sections", &sections)
            .finish()
    }
}

fn is_scope(tag: DwTag) -> bool {
    matches!(
        tag,
        constants::DW_TAG_subprogram
            | constants::DW_TAG_lexical_block
            | constants::DW_TAG_inlined_subroutine
    )
}

fn is_function(tag: DwTag) -> bool {
    matches!(
        tag,
        constants::DW_TAG_subprogram | constants::DW_TAG_inlined_subroutine
    )
}
