use std::fmt;

use gimli::{constants, DwAt, DwForm, DwLang, DwTag, DwUt};
use scroll::Endian;

use crashlog_common::Language;

use super::abbrev::{AbbreviationTable, AttributeSpec};
use super::DwarfError;
use crate::buffer::{BufferError, Reader};

/// `DW_FORM_indirect` chains deeper than this are treated as corrupt.
const MAX_INDIRECTION: usize = 4;

/// The header of a unit in `.debug_info`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitHeader {
    /// Offset of the unit header in `.debug_info`.
    pub offset: u64,
    /// DWARF version, 2 to 5.
    pub version: u16,
    /// Unit type. Units before DWARF 5 are always `DW_UT_compile`.
    pub unit_type: DwUt,
    /// Size of a target address in bytes.
    pub address_size: u8,
    /// Size of a section offset: 4 for 32-bit DWARF, 8 for 64-bit DWARF.
    pub offset_size: u8,
    /// Offset of the abbreviation table in `.debug_abbrev`.
    pub abbrev_offset: u64,
    /// Offset of the first entry in `.debug_info`.
    pub entries_offset: usize,
    /// Offset one past the last byte of this unit in `.debug_info`.
    pub end_offset: usize,
}

impl UnitHeader {
    /// Returns `true` if the given `.debug_info` offset lies within this unit.
    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end_offset as u64
    }

    /// Returns `true` for type units, which never describe code.
    pub fn is_type_unit(&self) -> bool {
        matches!(
            self.unit_type,
            constants::DW_UT_type | constants::DW_UT_split_type
        )
    }
}

/// Parses all unit headers from `.debug_info`.
///
/// Iteration stops at the first header that cannot be read, since the offsets of the following
/// units are unknown from there on. Units with an unsupported version are skipped.
pub fn parse_unit_headers(data: &[u8], endian: Endian) -> Vec<UnitHeader> {
    let mut reader = Reader::new(data, endian);
    let mut headers = Vec::new();

    while !reader.is_empty() {
        let offset = reader.position();
        match parse_unit_header(&mut reader) {
            Ok(Some(header)) => headers.push(header),
            Ok(None) => continue,
            Err(error) => {
                tracing::warn!(offset, %error, "stopping at malformed unit header");
                break;
            }
        }
    }

    headers
}

fn parse_unit_header(reader: &mut Reader<'_>) -> Result<Option<UnitHeader>, DwarfError> {
    let offset = reader.position();
    let length = reader.initial_length()?;
    let offset_size = reader.offset_size();
    let length = crate::buffer::to_usize(length, offset)?;
    let mut unit = reader.split(length)?;

    let version = unit.u16()?;
    let (unit_type, address_size, abbrev_offset) = match version {
        2..=4 => {
            let abbrev_offset = unit.offset()?;
            let address_size = unit.u8()?;
            (constants::DW_UT_compile, address_size, abbrev_offset)
        }
        5 => {
            let unit_type = DwUt(unit.u8()?);
            let address_size = unit.u8()?;
            let abbrev_offset = unit.offset()?;
            match unit_type {
                constants::DW_UT_skeleton | constants::DW_UT_split_compile => {
                    unit.skip(8)?; // dwo_id
                }
                constants::DW_UT_type | constants::DW_UT_split_type => {
                    unit.skip(8)?; // type_signature
                    unit.offset()?; // type_offset
                }
                _ => {}
            }
            (unit_type, address_size, abbrev_offset)
        }
        _ => {
            tracing::warn!(offset, version, "skipping unit with unsupported version");
            return Ok(None);
        }
    };

    Ok(Some(UnitHeader {
        offset: offset as u64,
        version,
        unit_type,
        address_size,
        offset_size,
        abbrev_offset,
        entries_offset: unit.absolute_position(),
        end_offset: reader.position(),
    }))
}

/// The decoded value of an attribute.
///
/// Values referring to other sections are kept as offsets or indices and resolved on demand by
/// [`DwarfFile`](super::DwarfFile), since resolving them requires the bases declared by the unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    /// A target address.
    Address(u64),
    /// An index into `.debug_addr`, relative to `DW_AT_addr_base`.
    AddressIndex(u64),
    /// An unsigned constant.
    Constant(u64),
    /// A signed constant.
    SignedConstant(i64),
    /// A boolean flag.
    Flag(bool),
    /// A string stored inline in `.debug_info` at the given offset.
    String(u64),
    /// An offset into `.debug_str`.
    StringOffset(u64),
    /// An offset into `.debug_line_str`.
    LineStringOffset(u64),
    /// An index into `.debug_str_offsets`, relative to `DW_AT_str_offsets_base`.
    StringIndex(u64),
    /// A reference to an entry in the same unit, relative to the unit header.
    UnitRef(u64),
    /// A reference to an entry anywhere in `.debug_info`.
    DebugInfoRef(u64),
    /// An offset into another debug section, for instance `.debug_line` or `.debug_ranges`.
    SectionOffset(u64),
    /// A block of bytes in `.debug_info`.
    Block {
        /// Offset of the block contents in `.debug_info`.
        offset: u64,
        /// Length of the block.
        len: u64,
    },
    /// A DWARF expression in `.debug_info`.
    Exprloc {
        /// Offset of the expression in `.debug_info`.
        offset: u64,
        /// Length of the expression.
        len: u64,
    },
    /// A 16-byte constant.
    Data16([u8; 16]),
    /// The signature of a type unit.
    TypeSignature(u64),
    /// An index into the offsets table of `.debug_rnglists`.
    RangeListIndex(u64),
    /// An index into the offsets table of `.debug_loclists`.
    LocationListIndex(u64),
}

impl AttributeValue {
    /// Returns the value as an unsigned integer for constant-like values.
    pub fn udata(self) -> Option<u64> {
        match self {
            AttributeValue::Constant(value) => Some(value),
            AttributeValue::SignedConstant(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Returns the value as a section offset.
    ///
    /// Before DWARF 4, section offsets were encoded as `data4` or `data8` constants.
    pub fn section_offset(self) -> Option<u64> {
        match self {
            AttributeValue::SectionOffset(offset) | AttributeValue::Constant(offset) => Some(offset),
            _ => None,
        }
    }
}

/// A decoded attribute of an [`Entry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// The attribute name.
    pub name: DwAt,
    /// The form the value was encoded in.
    pub form: DwForm,
    /// The decoded value.
    pub value: AttributeValue,
}

/// The index of an [`Entry`] in the arena of its [`Unit`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub usize);

impl EntryId {
    /// The synthetic entry at the root of every unit.
    pub const NIL: EntryId = EntryId(0);
}

/// A debugging information entry.
///
/// Relations to other entries are indices into the arena of the owning [`Unit`]. `next` follows
/// depth-first order, `sibling` skips the subtree of this entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Offset of the entry in `.debug_info`.
    pub offset: u64,
    /// The abbreviation code, `0` for the nil entry.
    pub code: u64,
    /// The tag, `DW_TAG_null` for the nil entry.
    pub tag: DwTag,
    /// Decoded attributes in encoding order.
    pub attributes: Vec<Attribute>,
    /// The parent entry. Top-level entries are parented by [`EntryId::NIL`].
    pub parent: Option<EntryId>,
    /// The following entry in depth-first order.
    pub next: Option<EntryId>,
    /// The first child.
    pub first_child: Option<EntryId>,
    /// The next entry with the same parent.
    pub sibling: Option<EntryId>,
}

impl Entry {
    fn nil(offset: u64) -> Self {
        Entry {
            offset,
            code: 0,
            tag: constants::DW_TAG_null,
            attributes: Vec::new(),
            parent: None,
            next: None,
            first_child: None,
            sibling: None,
        }
    }

    /// Returns `true` for the synthetic root entry.
    pub fn is_nil(&self) -> bool {
        self.code == 0
    }

    /// Returns the value of the given attribute.
    pub fn attr(&self, name: DwAt) -> Option<AttributeValue> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value)
    }
}

/// Bases declared by the root entry of a unit, used to resolve indexed values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitBases {
    /// `DW_AT_str_offsets_base`
    pub str_offsets_base: Option<u64>,
    /// `DW_AT_addr_base` or `DW_AT_GNU_addr_base`
    pub addr_base: Option<u64>,
    /// `DW_AT_rnglists_base` or `DW_AT_GNU_ranges_base`
    pub rnglists_base: Option<u64>,
    /// `DW_AT_loclists_base`
    pub loclists_base: Option<u64>,
}

/// A compilation unit with its tree of entries.
#[derive(Clone, PartialEq, Eq)]
pub struct Unit {
    pub(crate) header: UnitHeader,
    pub(crate) entries: Vec<Entry>,
    pub(crate) bases: UnitBases,
    pub(crate) base_address: u64,
    pub(crate) language: Language,
    pub(crate) name: Option<String>,
    pub(crate) comp_dir: Option<String>,
    pub(crate) producer: Option<String>,
    pub(crate) stmt_list: Option<u64>,
}

impl Unit {
    /// The unit header.
    pub fn header(&self) -> &UnitHeader {
        &self.header
    }

    /// All entries in depth-first order, starting with the nil entry.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Returns the entry with the given index.
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    /// The root entry, usually `DW_TAG_compile_unit`.
    pub fn root(&self) -> Option<EntryId> {
        self.entries.first().and_then(|nil| nil.first_child)
    }

    /// Iterates the direct children of an entry.
    pub fn children(&self, id: EntryId) -> Children<'_> {
        Children {
            unit: self,
            next: self.entry(id).and_then(|entry| entry.first_child),
        }
    }

    /// Finds the entry at the given `.debug_info` offset.
    pub fn entry_by_offset(&self, offset: u64) -> Option<EntryId> {
        let entries = self.entries.get(1..)?;
        let index = entries
            .binary_search_by_key(&offset, |entry| entry.offset)
            .ok()?;
        Some(EntryId(index + 1))
    }

    /// The bases used to resolve indexed attribute values.
    pub fn bases(&self) -> &UnitBases {
        &self.bases
    }

    /// The base address for range lists, the `DW_AT_low_pc` of the root entry.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// The source language of this unit.
    pub fn language(&self) -> Language {
        self.language
    }

    /// The name of the primary source file.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The compilation directory.
    pub fn comp_dir(&self) -> Option<&str> {
        self.comp_dir.as_deref()
    }

    /// The producer, usually the compiler and its version.
    pub fn producer(&self) -> Option<&str> {
        self.producer.as_deref()
    }

    /// Offset of this unit's line program in `.debug_line`.
    pub fn line_program_offset(&self) -> Option<u64> {
        self.stmt_list
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("offset", &format_args!("{:#x}", self.header.offset))
            .field("version", &self.header.version)
            .field("name", &self.name)
            .field("language", &self.language)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Iterator over the children of an [`Entry`].
pub struct Children<'u> {
    unit: &'u Unit,
    next: Option<EntryId>,
}

impl<'u> Iterator for Children<'u> {
    type Item = (EntryId, &'u Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let entry = self.unit.entry(id)?;
        self.next = entry.sibling;
        Some((id, entry))
    }
}

/// Maps a `DW_AT_language` value to a [`Language`].
pub fn language_from_dwarf(language: DwLang) -> Language {
    match language {
        constants::DW_LANG_C => Language::C,
        constants::DW_LANG_C11 => Language::C,
        constants::DW_LANG_C89 => Language::C,
        constants::DW_LANG_C99 => Language::C,
        constants::DW_LANG_C_plus_plus => Language::Cpp,
        constants::DW_LANG_C_plus_plus_03 => Language::Cpp,
        constants::DW_LANG_C_plus_plus_11 => Language::Cpp,
        constants::DW_LANG_C_plus_plus_14 => Language::Cpp,
        constants::DW_LANG_D => Language::D,
        constants::DW_LANG_Go => Language::Go,
        constants::DW_LANG_ObjC => Language::ObjC,
        constants::DW_LANG_ObjC_plus_plus => Language::ObjCpp,
        constants::DW_LANG_Rust => Language::Rust,
        constants::DW_LANG_Swift => Language::Swift,
        _ => Language::Unknown,
    }
}

/// Decodes the entries of a unit into an arena.
///
/// The metadata of the returned unit which requires string or address resolution (`name`,
/// `comp_dir`, `producer` and an indexed `low_pc`) is left empty for the caller to fill in.
#[tracing::instrument(level = "trace", name = "Unit::parse", skip_all, fields(offset = header.offset))]
pub fn parse_unit(
    info: &[u8],
    endian: Endian,
    header: &UnitHeader,
    abbreviations: &AbbreviationTable,
) -> Result<Unit, DwarfError> {
    let mut reader = Reader::at(&info[..header.end_offset], header.entries_offset, endian)?;
    reader.set_address_size(header.address_size);
    reader.set_offset_size(header.offset_size);

    let mut entries = vec![Entry::nil(header.offset)];
    // Parents of the current level, with the last child seen on that level.
    let mut stack: Vec<(EntryId, Option<EntryId>)> = vec![(EntryId::NIL, None)];

    while !reader.is_empty() {
        let offset = reader.absolute_position() as u64;
        let code = reader.uleb128()?;

        if code == 0 {
            if stack.len() > 1 {
                stack.pop();
            }
            continue;
        }

        let abbreviation = abbreviations
            .get(code)
            .ok_or(DwarfError::InvalidAbbrevCode { code, offset })?;

        let mut attributes = Vec::with_capacity(abbreviation.attributes.len());
        for spec in &abbreviation.attributes {
            if let Some(value) = read_value(&mut reader, header, spec, spec.form, 0)? {
                attributes.push(Attribute {
                    name: spec.name,
                    form: spec.form,
                    value,
                });
            }
        }

        let id = EntryId(entries.len());
        let (parent, last_child) = stack.last_mut().ok_or(DwarfError::InvalidUnitRef(offset))?;
        let parent = *parent;
        match last_child.replace(id) {
            Some(previous) => entries[previous.0].sibling = Some(id),
            None => entries[parent.0].first_child = Some(id),
        }
        entries[id.0 - 1].next = Some(id);

        entries.push(Entry {
            offset,
            code,
            tag: abbreviation.tag,
            attributes,
            parent: Some(parent),
            next: None,
            first_child: None,
            sibling: None,
        });

        if abbreviation.has_children {
            stack.push((id, None));
        }
    }

    let mut bases = UnitBases::default();
    let mut base_address = 0;
    let mut language = Language::Unknown;
    let mut stmt_list = None;

    if let Some(root) = entries.get(1) {
        for attr in &root.attributes {
            match (attr.name, attr.value) {
                (constants::DW_AT_str_offsets_base, value) => {
                    bases.str_offsets_base = value.section_offset();
                }
                (constants::DW_AT_addr_base | constants::DW_AT_GNU_addr_base, value) => {
                    bases.addr_base = value.section_offset();
                }
                (constants::DW_AT_rnglists_base | constants::DW_AT_GNU_ranges_base, value) => {
                    bases.rnglists_base = value.section_offset();
                }
                (constants::DW_AT_loclists_base, value) => {
                    bases.loclists_base = value.section_offset();
                }
                (constants::DW_AT_low_pc, AttributeValue::Address(address)) => {
                    base_address = address;
                }
                (constants::DW_AT_language, value) => {
                    if let Some(lang) = value.udata() {
                        language = language_from_dwarf(DwLang(lang as u16));
                    }
                }
                (constants::DW_AT_stmt_list, value) => {
                    stmt_list = value.section_offset();
                }
                _ => {}
            }
        }
    }

    tracing::trace!(entries = entries.len(), "parsed unit entries");

    Ok(Unit {
        header: *header,
        entries,
        bases,
        base_address,
        language,
        name: None,
        comp_dir: None,
        producer: None,
        stmt_list,
    })
}

fn read_value(
    reader: &mut Reader<'_>,
    header: &UnitHeader,
    spec: &AttributeSpec,
    form: DwForm,
    depth: usize,
) -> Result<Option<AttributeValue>, DwarfError> {
    let offset = reader.absolute_position();

    let value = match form {
        constants::DW_FORM_addr => AttributeValue::Address(reader.address()?),
        constants::DW_FORM_addrx | constants::DW_FORM_GNU_addr_index => {
            AttributeValue::AddressIndex(reader.uleb128()?)
        }
        constants::DW_FORM_addrx1 => AttributeValue::AddressIndex(reader.uint(1)?),
        constants::DW_FORM_addrx2 => AttributeValue::AddressIndex(reader.uint(2)?),
        constants::DW_FORM_addrx3 => AttributeValue::AddressIndex(reader.uint(3)?),
        constants::DW_FORM_addrx4 => AttributeValue::AddressIndex(reader.uint(4)?),

        constants::DW_FORM_block1 => block(reader, |r| r.uint(1))?,
        constants::DW_FORM_block2 => block(reader, |r| r.uint(2))?,
        constants::DW_FORM_block4 => block(reader, |r| r.uint(4))?,
        constants::DW_FORM_block => block(reader, |r| r.uleb128())?,
        constants::DW_FORM_exprloc => {
            let len = reader.uleb128()?;
            let offset = reader.absolute_position() as u64;
            reader.skip(crate::buffer::to_usize(len, offset as usize)?)?;
            AttributeValue::Exprloc { offset, len }
        }

        constants::DW_FORM_data1 => AttributeValue::Constant(reader.uint(1)?),
        constants::DW_FORM_data2 => AttributeValue::Constant(reader.uint(2)?),
        constants::DW_FORM_data4 => AttributeValue::Constant(reader.uint(4)?),
        constants::DW_FORM_data8 => AttributeValue::Constant(reader.uint(8)?),
        constants::DW_FORM_data16 => {
            let mut data = [0; 16];
            data.copy_from_slice(reader.bytes(16)?);
            AttributeValue::Data16(data)
        }
        constants::DW_FORM_udata => AttributeValue::Constant(reader.uleb128()?),
        constants::DW_FORM_sdata => AttributeValue::SignedConstant(reader.sleb128()?),
        constants::DW_FORM_implicit_const => {
            AttributeValue::SignedConstant(spec.implicit_const.unwrap_or_default())
        }

        constants::DW_FORM_flag => AttributeValue::Flag(reader.u8()? != 0),
        constants::DW_FORM_flag_present => AttributeValue::Flag(true),

        constants::DW_FORM_string => {
            reader.cstr()?;
            AttributeValue::String(offset as u64)
        }
        constants::DW_FORM_strp => AttributeValue::StringOffset(reader.offset()?),
        constants::DW_FORM_line_strp => AttributeValue::LineStringOffset(reader.offset()?),
        constants::DW_FORM_strx | constants::DW_FORM_GNU_str_index => {
            AttributeValue::StringIndex(reader.uleb128()?)
        }
        constants::DW_FORM_strx1 => AttributeValue::StringIndex(reader.uint(1)?),
        constants::DW_FORM_strx2 => AttributeValue::StringIndex(reader.uint(2)?),
        constants::DW_FORM_strx3 => AttributeValue::StringIndex(reader.uint(3)?),
        constants::DW_FORM_strx4 => AttributeValue::StringIndex(reader.uint(4)?),

        constants::DW_FORM_ref1 => AttributeValue::UnitRef(reader.uint(1)?),
        constants::DW_FORM_ref2 => AttributeValue::UnitRef(reader.uint(2)?),
        constants::DW_FORM_ref4 => AttributeValue::UnitRef(reader.uint(4)?),
        constants::DW_FORM_ref8 => AttributeValue::UnitRef(reader.uint(8)?),
        constants::DW_FORM_ref_udata => AttributeValue::UnitRef(reader.uleb128()?),
        constants::DW_FORM_ref_addr => {
            let value = if header.version == 2 {
                reader.address()?
            } else {
                reader.offset()?
            };
            AttributeValue::DebugInfoRef(value)
        }
        constants::DW_FORM_ref_sig8 => AttributeValue::TypeSignature(reader.u64()?),

        constants::DW_FORM_sec_offset => AttributeValue::SectionOffset(reader.offset()?),
        constants::DW_FORM_loclistx => AttributeValue::LocationListIndex(reader.uleb128()?),
        constants::DW_FORM_rnglistx => AttributeValue::RangeListIndex(reader.uleb128()?),

        constants::DW_FORM_indirect => {
            if depth >= MAX_INDIRECTION {
                return Err(DwarfError::UnknownForm {
                    form: form.0,
                    offset: offset as u64,
                });
            }
            let form = DwForm(reader.uleb128()? as u16);
            return read_value(reader, header, spec, form, depth + 1);
        }

        // Supplementary object files are not supported. Skip the value, keep the entry.
        constants::DW_FORM_strp_sup
        | constants::DW_FORM_GNU_strp_alt
        | constants::DW_FORM_GNU_ref_alt => {
            reader.offset()?;
            return Ok(None);
        }
        constants::DW_FORM_ref_sup4 => {
            reader.skip(4)?;
            return Ok(None);
        }
        constants::DW_FORM_ref_sup8 => {
            reader.skip(8)?;
            return Ok(None);
        }

        _ => {
            return Err(DwarfError::UnknownForm {
                form: form.0,
                offset: offset as u64,
            })
        }
    };

    Ok(Some(value))
}

fn block<F>(reader: &mut Reader<'_>, read_len: F) -> Result<AttributeValue, BufferError>
where
    F: FnOnce(&mut Reader<'_>) -> Result<u64, BufferError>,
{
    let len = read_len(reader)?;
    let offset = reader.absolute_position();
    reader.skip(crate::buffer::to_usize(len, offset)?)?;
    Ok(AttributeValue::Block {
        offset: offset as u64,
        len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crashlog_testutils::{compile_unit_v4, compile_unit_v5, ByteWriter};

    fn abbrevs(build: impl FnOnce(&mut ByteWriter)) -> AbbreviationTable {
        let mut w = ByteWriter::new();
        build(&mut w);
        w.u8(0);
        AbbreviationTable::parse(&w.into_bytes(), 0, Endian::Little).unwrap()
    }

    #[test]
    fn test_unit_headers() {
        let first = compile_unit_v4(0, 8, &[0]);
        let second = compile_unit_v5(0x20, 4, &[0]);
        let mut info = first.clone();
        info.extend_from_slice(&second);

        let headers = parse_unit_headers(&info, Endian::Little);
        assert_eq!(headers.len(), 2);

        assert_eq!(headers[0].offset, 0);
        assert_eq!(headers[0].version, 4);
        assert_eq!(headers[0].address_size, 8);
        assert_eq!(headers[0].offset_size, 4);
        assert_eq!(headers[0].entries_offset, 11);
        assert_eq!(headers[0].end_offset, first.len());

        assert_eq!(headers[1].offset, first.len() as u64);
        assert_eq!(headers[1].version, 5);
        assert_eq!(headers[1].unit_type, constants::DW_UT_compile);
        assert_eq!(headers[1].address_size, 4);
        assert_eq!(headers[1].abbrev_offset, 0x20);
        assert_eq!(headers[1].entries_offset, first.len() + 12);
    }

    #[test]
    fn test_unsupported_version_is_skipped() {
        let mut info = ByteWriter::new();
        info.u32(3).u16(7).u8(0);
        let mut info = info.into_bytes();
        info.extend_from_slice(&compile_unit_v4(0, 8, &[0]));

        let headers = parse_unit_headers(&info, Endian::Little);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].offset, 7);
    }

    #[test]
    fn test_truncated_header_stops_iteration() {
        let mut info = compile_unit_v4(0, 8, &[0]);
        info.extend_from_slice(&[0x40, 0, 0, 0, 4]);

        let headers = parse_unit_headers(&info, Endian::Little);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_entry_tree() {
        let table = abbrevs(|w| {
            w.uleb(1).uleb(0x11).u8(1).u8(0).u8(0);
            w.uleb(2).uleb(0x2e).u8(1).uleb(0x03).uleb(0x08).u8(0).u8(0);
            w.uleb(3).uleb(0x0b).u8(0).u8(0).u8(0);
        });

        let mut dies = ByteWriter::new();
        dies.uleb(1);
        dies.uleb(2).cstr("outer");
        dies.uleb(3);
        dies.uleb(3);
        dies.u8(0);
        dies.uleb(2).cstr("other");
        dies.u8(0);
        dies.u8(0);
        let info = compile_unit_v4(0, 8, &dies.into_bytes());

        let header = parse_unit_headers(&info, Endian::Little)[0];
        let unit = parse_unit(&info, Endian::Little, &header, &table).unwrap();

        let tags: Vec<_> = unit.entries().iter().map(|e| e.tag).collect();
        assert_eq!(
            tags,
            [
                constants::DW_TAG_null,
                constants::DW_TAG_compile_unit,
                constants::DW_TAG_subprogram,
                constants::DW_TAG_lexical_block,
                constants::DW_TAG_lexical_block,
                constants::DW_TAG_subprogram,
            ]
        );

        let root = unit.root().unwrap();
        assert_eq!(root, EntryId(1));
        assert!(unit.entry(EntryId::NIL).unwrap().is_nil());
        assert_eq!(unit.entry(root).unwrap().parent, Some(EntryId::NIL));

        let children: Vec<_> = unit.children(root).map(|(id, _)| id).collect();
        assert_eq!(children, [EntryId(2), EntryId(5)]);

        let blocks: Vec<_> = unit.children(EntryId(2)).map(|(id, _)| id).collect();
        assert_eq!(blocks, [EntryId(3), EntryId(4)]);

        let outer = unit.entry(EntryId(2)).unwrap();
        assert_eq!(outer.next, Some(EntryId(3)));
        assert_eq!(outer.sibling, Some(EntryId(5)));
        assert_eq!(unit.entry(EntryId(4)).unwrap().parent, Some(EntryId(2)));
        assert_eq!(unit.entry(EntryId(5)).unwrap().parent, Some(root));

        // "outer" is stored inline right after the abbreviation code.
        assert_eq!(outer.attr(constants::DW_AT_name), Some(AttributeValue::String(13)));
        assert_eq!(unit.entry_by_offset(outer.offset), Some(EntryId(2)));
        assert_eq!(unit.entry_by_offset(outer.offset + 1), None);
    }

    #[test]
    fn test_forms() {
        let table = abbrevs(|w| {
            w.uleb(1).uleb(0x11).u8(0);
            w.uleb(0x11).uleb(0x1b); // low_pc: addrx
            w.uleb(0x03).uleb(0x25); // name: strx1
            w.uleb(0x13).uleb(0x0b); // language: data1
            w.uleb(0x72).uleb(0x17); // str_offsets_base: sec_offset
            w.uleb(0x49).uleb(0x13); // type: ref4
            w.uleb(0x02).uleb(0x18); // location: exprloc
            w.uleb(0x3e).uleb(0x16); // encoding: indirect
            w.uleb(0x3f).uleb(0x19); // external: flag_present
            w.uleb(0x1c).uleb(0x0d); // const_value: sdata
            w.u8(0).u8(0);
        });

        let mut dies = ByteWriter::new();
        dies.uleb(1)
            .uleb(2)
            .u8(5)
            .u8(0x1c) // DW_LANG_Rust
            .u32(8)
            .u32(0x30)
            .uleb(2)
            .raw(&[0x91, 0x08])
            .uleb(0x0b) // data1
            .u8(7)
            .sleb(-3);
        let info = compile_unit_v5(0, 8, &dies.into_bytes());

        let header = parse_unit_headers(&info, Endian::Little)[0];
        let unit = parse_unit(&info, Endian::Little, &header, &table).unwrap();
        let root = unit.entry(unit.root().unwrap()).unwrap();

        assert_eq!(
            root.attributes.iter().map(|a| a.value).collect::<Vec<_>>(),
            [
                AttributeValue::AddressIndex(2),
                AttributeValue::StringIndex(5),
                AttributeValue::Constant(0x1c),
                AttributeValue::SectionOffset(8),
                AttributeValue::UnitRef(0x30),
                AttributeValue::Exprloc { offset: 25, len: 2 },
                AttributeValue::Constant(7),
                AttributeValue::Flag(true),
                AttributeValue::SignedConstant(-3),
            ]
        );
        assert_eq!(unit.language(), Language::Rust);
        assert_eq!(unit.bases().str_offsets_base, Some(8));
    }

    #[test]
    fn test_unknown_form_aborts_unit() {
        let table = abbrevs(|w| {
            w.uleb(1).uleb(0x11).u8(0).uleb(0x03).uleb(0x7f).u8(0).u8(0);
        });
        let info = compile_unit_v4(0, 8, &[1, 0]);

        let header = parse_unit_headers(&info, Endian::Little)[0];
        let error = parse_unit(&info, Endian::Little, &header, &table).unwrap_err();
        assert!(matches!(
            error,
            DwarfError::UnknownForm {
                form: 0x7f,
                offset: 12
            }
        ));
    }

    #[test]
    fn test_supplementary_forms_are_skipped() {
        let table = abbrevs(|w| {
            w.uleb(1).uleb(0x11).u8(0);
            w.uleb(0x03).uleb(0x1d); // name: strp_sup
            w.uleb(0x13).uleb(0x05); // language: data2
            w.u8(0).u8(0);
        });
        let mut dies = ByteWriter::new();
        dies.uleb(1).u32(0x40).u16(0x0c);
        let info = compile_unit_v5(0, 8, &dies.into_bytes());

        let header = parse_unit_headers(&info, Endian::Little)[0];
        let unit = parse_unit(&info, Endian::Little, &header, &table).unwrap();
        let root = unit.entry(unit.root().unwrap()).unwrap();
        assert_eq!(root.attr(constants::DW_AT_name), None);
        assert_eq!(unit.language(), Language::C);
    }

    #[test]
    fn test_invalid_abbreviation_code() {
        let table = abbrevs(|w| {
            w.uleb(1).uleb(0x11).u8(0).u8(0).u8(0);
        });
        let info = compile_unit_v4(0, 8, &[9]);

        let header = parse_unit_headers(&info, Endian::Little)[0];
        let error = parse_unit(&info, Endian::Little, &header, &table).unwrap_err();
        assert!(matches!(
            error,
            DwarfError::InvalidAbbrevCode { code: 9, offset: 11 }
        ));
    }
}
