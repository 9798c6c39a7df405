//! Support for Mach Objects, used on macOS and iOS.
//!
//! A [`MachArchive`] is either a universal ("fat") container holding one object per architecture,
//! or a single thin object. Each [`MachObject`] exposes its header, the raw list of load commands,
//! the segments and sections declared by segment commands, and the symbol table.

use std::error::Error;
use std::fmt;

use goblin::mach::constants::{cputype, S_GB_ZEROFILL, S_THREAD_LOCAL_ZEROFILL, S_ZEROFILL};
use goblin::mach::{fat, header, load_command, symbols};
use once_cell::sync::OnceCell;
use scroll::Endian;
use thiserror::Error;

use crashlog_common::{Arch, ByteView, Uuid};

use crate::buffer::{BufferError, Reader};

const SECTION_TYPE_MASK: u32 = 0x0000_00ff;
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;
const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// The error type for [`MachError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachErrorKind {
    /// The file does not start with a Mach-O or fat magic.
    InvalidMagic,

    /// A header or command structure is cut off.
    Truncated,

    /// A load command declares an impossible size.
    InvalidLoadCommand,

    /// A fat architecture entry points outside of the file.
    InvalidFatArch,
}

impl fmt::Display for MachErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid mach-o magic"),
            Self::Truncated => write!(f, "truncated mach-o data"),
            Self::InvalidLoadCommand => write!(f, "invalid load command size"),
            Self::InvalidFatArch => write!(f, "invalid fat architecture entry"),
        }
    }
}

/// An error when dealing with [`MachObject`] or [`MachArchive`].
#[derive(Debug, Error)]
#[error("{kind} at offset {offset:#x}")]
pub struct MachError {
    kind: MachErrorKind,
    offset: usize,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl MachError {
    fn new(kind: MachErrorKind, offset: usize) -> Self {
        Self {
            kind,
            offset,
            source: None,
        }
    }

    /// Returns the corresponding [`MachErrorKind`] for this error.
    pub fn kind(&self) -> MachErrorKind {
        self.kind
    }

    /// The file offset at which parsing failed.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl From<BufferError> for MachError {
    fn from(e: BufferError) -> Self {
        Self {
            kind: MachErrorKind::Truncated,
            offset: e.offset(),
            source: Some(Box::new(e)),
        }
    }
}

/// Maps a Mach CPU type and subtype to an [`Arch`].
pub fn arch_from_cpu(cputype: u32, cpusubtype: u32) -> Arch {
    let cpusubtype = cpusubtype & !CPU_SUBTYPE_MASK;
    match (cputype, cpusubtype) {
        (cputype::CPU_TYPE_I386, cputype::CPU_SUBTYPE_I386_ALL) => Arch::X86,
        (cputype::CPU_TYPE_I386, _) => Arch::X86Unknown,
        (cputype::CPU_TYPE_X86_64, cputype::CPU_SUBTYPE_X86_64_ALL) => Arch::Amd64,
        (cputype::CPU_TYPE_X86_64, cputype::CPU_SUBTYPE_X86_64_H) => Arch::Amd64h,
        (cputype::CPU_TYPE_X86_64, _) => Arch::Amd64Unknown,
        (cputype::CPU_TYPE_ARM64, cputype::CPU_SUBTYPE_ARM64_ALL) => Arch::Arm64,
        (cputype::CPU_TYPE_ARM64, cputype::CPU_SUBTYPE_ARM64_V8) => Arch::Arm64V8,
        (cputype::CPU_TYPE_ARM64, cputype::CPU_SUBTYPE_ARM64_E) => Arch::Arm64e,
        (cputype::CPU_TYPE_ARM64, _) => Arch::Arm64Unknown,
        (
            cputype::CPU_TYPE_ARM64_32,
            cputype::CPU_SUBTYPE_ARM64_32_ALL | cputype::CPU_SUBTYPE_ARM64_32_V8,
        ) => Arch::Arm64_32,
        (cputype::CPU_TYPE_ARM64_32, _) => Arch::Arm64_32Unknown,
        (cputype::CPU_TYPE_ARM, cputype::CPU_SUBTYPE_ARM_ALL) => Arch::Arm,
        (cputype::CPU_TYPE_ARM, cputype::CPU_SUBTYPE_ARM_V6) => Arch::ArmV6,
        (cputype::CPU_TYPE_ARM, cputype::CPU_SUBTYPE_ARM_V7) => Arch::ArmV7,
        (cputype::CPU_TYPE_ARM, cputype::CPU_SUBTYPE_ARM_V7S) => Arch::ArmV7s,
        (cputype::CPU_TYPE_ARM, cputype::CPU_SUBTYPE_ARM_V7K) => Arch::ArmV7k,
        (cputype::CPU_TYPE_ARM, _) => Arch::ArmUnknown,
        (cputype::CPU_TYPE_POWERPC, _) => Arch::Ppc,
        (cputype::CPU_TYPE_POWERPC64, _) => Arch::Ppc64,
        (_, _) => Arch::Unknown,
    }
}

/// The fixed Mach header at the start of every object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachHeader {
    /// Magic number, in file byte order.
    pub magic: u32,
    /// CPU type, see `CPU_TYPE_*`.
    pub cputype: u32,
    /// CPU subtype, see `CPU_SUBTYPE_*`.
    pub cpusubtype: u32,
    /// File type, for instance `MH_EXECUTE` or `MH_DSYM`.
    pub filetype: u32,
    /// Number of load commands.
    pub ncmds: u32,
    /// Size of all load commands in bytes.
    pub sizeofcmds: u32,
    /// Header flags.
    pub flags: u32,
}

/// A load command as declared in the header, not yet interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadCommand {
    /// Command type, see `LC_*`.
    pub cmd: u32,
    /// Total size of the command in bytes, including `cmd` and `cmdsize`.
    pub cmdsize: u32,
    /// Offset of the command relative to the start of the object.
    pub offset: usize,
}

/// A section within a [`Segment`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    /// Name of the section, at most 16 bytes.
    pub name: String,
    /// Name of the owning segment.
    pub segment_name: String,
    /// Virtual memory address of the section.
    pub address: u64,
    /// Size of the section in bytes.
    pub size: u64,
    /// File offset of the section contents, relative to the start of the object.
    pub offset: u32,
    /// Alignment as a power of two.
    pub align: u32,
    /// Section type and attributes.
    pub flags: u32,
}

impl Section {
    /// Returns `true` if the section occupies no space in the file.
    pub fn is_zerofill(&self) -> bool {
        matches!(
            self.flags & SECTION_TYPE_MASK,
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    /// Returns `true` if the section covers the given virtual address.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size
    }
}

/// A segment declared by an `LC_SEGMENT` or `LC_SEGMENT_64` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Name of the segment, for instance `__TEXT`.
    pub name: String,
    /// Virtual memory address of the segment.
    pub vmaddr: u64,
    /// Virtual memory size of the segment.
    pub vmsize: u64,
    /// File offset of the segment contents.
    pub fileoff: u64,
    /// Number of bytes the segment occupies in the file.
    pub filesize: u64,
    /// Maximum VM protection.
    pub maxprot: u32,
    /// Initial VM protection.
    pub initprot: u32,
    /// Segment flags.
    pub flags: u32,
    /// Sections of this segment, in declaration order.
    pub sections: Vec<Section>,
}

impl Segment {
    /// Looks up a section of this segment by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        let name = truncate_name(name);
        self.sections.iter().find(|section| section.name == name)
    }
}

/// A defined symbol from the `LC_SYMTAB` symbol table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name with the leading underscore removed.
    pub name: String,
    /// Virtual address of the symbol.
    pub address: u64,
    /// Size up to the next symbol or the end of the section, `0` if unknown.
    pub size: u64,
}

impl Symbol {
    /// Returns `true` if the symbol covers the given address.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && (self.size == 0 || address - self.address < self.size)
    }
}

/// Mach-O section names are stored in fixed 16-byte fields.
fn truncate_name(name: &str) -> &str {
    match name.char_indices().nth(16) {
        Some((index, _)) => &name[..index],
        None => name,
    }
}

fn fixed_name(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// A single Mach object for one architecture.
///
/// The header and the list of load commands are parsed eagerly, since they are required to
/// validate the object. Segments and the symbol table are materialized on first access.
pub struct MachObject<'data> {
    data: ByteView<'data>,
    start: usize,
    end: usize,
    endian: Endian,
    is_64: bool,
    header: MachHeader,
    load_commands: Vec<LoadCommand>,
    uuid: Option<Uuid>,
    segments: OnceCell<Vec<Segment>>,
    symbols: OnceCell<Vec<Symbol>>,
}

impl<'data> MachObject<'data> {
    /// Tests whether the buffer could contain a thin Mach object.
    pub fn test(data: &[u8]) -> bool {
        matches!(data.get(..4), Some(magic) if thin_layout(magic).is_some())
    }

    /// Parses a thin Mach object spanning the entire buffer.
    pub fn parse(data: ByteView<'data>) -> Result<Self, MachError> {
        let end = data.len();
        Self::parse_range(data, 0, end)
    }

    #[tracing::instrument(level = "trace", name = "MachObject::parse", skip_all)]
    fn parse_range(data: ByteView<'data>, start: usize, end: usize) -> Result<Self, MachError> {
        let bytes = &data[start..end];
        let (endian, is_64) = bytes
            .get(..4)
            .and_then(thin_layout)
            .ok_or_else(|| MachError::new(MachErrorKind::InvalidMagic, start))?;

        let mut reader = Reader::new(bytes, endian);
        let header = MachHeader {
            magic: reader.u32()?,
            cputype: reader.u32()?,
            cpusubtype: reader.u32()?,
            filetype: reader.u32()?,
            ncmds: reader.u32()?,
            sizeofcmds: reader.u32()?,
            flags: reader.u32()?,
        };
        if is_64 {
            reader.skip(4)?;
        }

        let commands_start = reader.position();
        let commands_end = commands_start.saturating_add(header.sizeofcmds as usize);
        let mut load_commands = Vec::with_capacity(header.ncmds.min(1024) as usize);
        let mut uuid = None;

        for _ in 0..header.ncmds {
            let offset = reader.position();
            let cmd = reader.u32()?;
            let cmdsize = reader.u32()?;

            let command_end = offset.saturating_add(cmdsize as usize);
            if cmdsize < 8 || command_end > bytes.len() || command_end > commands_end {
                return Err(MachError::new(
                    MachErrorKind::InvalidLoadCommand,
                    start + offset,
                ));
            }

            if cmd == load_command::LC_UUID && cmdsize >= 24 {
                uuid = Uuid::from_slice(&bytes[offset + 8..offset + 24]).ok();
            }

            load_commands.push(LoadCommand {
                cmd,
                cmdsize,
                offset,
            });
            reader.seek(command_end)?;
        }

        tracing::trace!(
            commands = load_commands.len(),
            is_64,
            big_endian = endian == Endian::Big,
            "parsed mach header"
        );

        Ok(MachObject {
            data,
            start,
            end,
            endian,
            is_64,
            header,
            load_commands,
            uuid,
            segments: OnceCell::new(),
            symbols: OnceCell::new(),
        })
    }

    /// The raw bytes of this object.
    pub fn data(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// The underlying byte view, which may contain other objects of a fat archive.
    pub fn byte_view(&self) -> &ByteView<'data> {
        &self.data
    }

    /// The Mach header.
    pub fn header(&self) -> &MachHeader {
        &self.header
    }

    /// The byte order of this object.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns `true` for 64-bit objects.
    pub fn is_64(&self) -> bool {
        self.is_64
    }

    /// The CPU architecture.
    pub fn arch(&self) -> Arch {
        arch_from_cpu(self.header.cputype, self.header.cpusubtype)
    }

    /// The size of a pointer in bytes.
    pub fn address_size(&self) -> u8 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    /// Returns `true` if this is a debug companion file (`MH_DSYM`).
    pub fn is_dsym(&self) -> bool {
        self.header.filetype == header::MH_DSYM
    }

    /// The build UUID from `LC_UUID`, if present.
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// All load commands in declaration order.
    pub fn load_commands(&self) -> &[LoadCommand] {
        &self.load_commands
    }

    /// All load commands of the given type, see `LC_*`.
    pub fn load_commands_of_type(&self, cmd: u32) -> impl Iterator<Item = &LoadCommand> + '_ {
        self.load_commands.iter().filter(move |lc| lc.cmd == cmd)
    }

    /// The raw bytes of a load command, including its 8-byte prefix.
    pub fn load_command_data(&self, command: &LoadCommand) -> &[u8] {
        &self.data()[command.offset..command.offset + command.cmdsize as usize]
    }

    /// All segments with their sections.
    pub fn segments(&self) -> &[Segment] {
        self.segments.get_or_init(|| self.parse_segments())
    }

    fn parse_segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();

        for command in &self.load_commands {
            let is_64 = match command.cmd {
                load_command::LC_SEGMENT => false,
                load_command::LC_SEGMENT_64 => true,
                _ => continue,
            };

            match self.parse_segment(command, is_64) {
                Ok(segment) => segments.push(segment),
                Err(error) => tracing::warn!(
                    offset = self.start + command.offset,
                    %error,
                    "skipping malformed segment command"
                ),
            }
        }

        segments
    }

    fn parse_segment(&self, command: &LoadCommand, is_64: bool) -> Result<Segment, BufferError> {
        let mut reader = Reader::new(self.load_command_data(command), self.endian);
        reader.set_address_size(if is_64 { 8 } else { 4 });
        reader.skip(8)?;

        let name = fixed_name(reader.bytes(16)?);
        let vmaddr = reader.address()?;
        let vmsize = reader.address()?;
        let fileoff = reader.address()?;
        let filesize = reader.address()?;
        let maxprot = reader.u32()?;
        let initprot = reader.u32()?;
        let nsects = reader.u32()?;
        let flags = reader.u32()?;

        let mut sections = Vec::with_capacity(nsects.min(256) as usize);
        for _ in 0..nsects {
            let section = Section {
                name: fixed_name(reader.bytes(16)?),
                segment_name: fixed_name(reader.bytes(16)?),
                address: reader.address()?,
                size: reader.address()?,
                offset: reader.u32()?,
                align: reader.u32()?,
                flags: {
                    reader.skip(8)?; // reloff, nreloc
                    reader.u32()?
                },
            };
            reader.skip(if is_64 { 12 } else { 8 })?;

            let section_end = section.address.saturating_add(section.size);
            if section.address < vmaddr || section_end > vmaddr.saturating_add(vmsize) {
                tracing::warn!(
                    section = %section.name,
                    segment = %name,
                    "skipping section outside of its segment"
                );
                continue;
            }

            sections.push(section);
        }

        Ok(Segment {
            name,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            flags,
            sections,
        })
    }

    /// Looks up a segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments().iter().find(|segment| segment.name == name)
    }

    /// Looks up a section by segment and section name.
    pub fn section(&self, segment: &str, name: &str) -> Option<&Section> {
        self.segment(segment)?.section(name)
    }

    /// Looks up a section by name in any segment.
    ///
    /// Names longer than 16 bytes are matched against their truncated form, so
    /// `"__debug_str_offsets"` finds the section stored as `"__debug_str_offs"`.
    pub fn find_section(&self, name: &str) -> Option<&Section> {
        self.segments()
            .iter()
            .find_map(|segment| segment.section(name))
    }

    /// Returns the file contents of a section, or `None` for zero-fill sections or sections that
    /// point outside of the file.
    pub fn section_data(&self, section: &Section) -> Option<&[u8]> {
        if section.is_zerofill() {
            return None;
        }

        let start = section.offset as usize;
        let end = start.checked_add(usize::try_from(section.size).ok()?)?;
        self.data().get(start..end)
    }

    /// The range of a section's contents within [`byte_view`](Self::byte_view).
    pub(crate) fn section_file_range(&self, section: &Section) -> Option<std::ops::Range<usize>> {
        if section.is_zerofill() {
            return None;
        }

        let start = self.start.checked_add(section.offset as usize)?;
        let end = start.checked_add(usize::try_from(section.size).ok()?)?;
        (end <= self.end).then_some(start..end)
    }

    /// Returns the bytes from `address` up to the end of the containing section.
    ///
    /// Returns `None` if no section with file contents covers the address.
    pub fn bytes_at_address(&self, address: u64) -> Option<&[u8]> {
        let section = self
            .segments()
            .iter()
            .flat_map(|segment| &segment.sections)
            .find(|section| section.contains(address))?;

        let data = self.section_data(section)?;
        let offset = usize::try_from(address - section.address).ok()?;
        data.get(offset..)
    }

    /// The virtual address at which the object expects to be loaded, the `__TEXT` `vmaddr`.
    pub fn load_address(&self) -> u64 {
        self.segment("__TEXT").map_or(0, |segment| segment.vmaddr)
    }

    /// Defined section symbols from the symbol table, sorted by address.
    pub fn symbols(&self) -> &[Symbol] {
        self.symbols.get_or_init(|| match self.parse_symbols() {
            Ok(symbols) => symbols,
            Err(error) => {
                tracing::warn!(%error, "skipping malformed symbol table");
                Vec::new()
            }
        })
    }

    fn parse_symbols(&self) -> Result<Vec<Symbol>, BufferError> {
        let Some(command) = self.load_commands_of_type(load_command::LC_SYMTAB).next() else {
            return Ok(Vec::new());
        };

        let mut reader = Reader::new(self.load_command_data(command), self.endian);
        reader.skip(8)?;
        let symoff = reader.u32()? as usize;
        let nsyms = reader.u32()? as usize;
        let stroff = reader.u32()? as usize;
        let strsize = reader.u32()? as usize;

        let data = self.data();
        let strtab = data
            .get(stroff..stroff.saturating_add(strsize))
            .ok_or(BufferError::UnexpectedEof {
                offset: self.start + stroff,
            })?;

        // Section numbers are one-based across all segments.
        let sections: Vec<&Section> = self
            .segments()
            .iter()
            .flat_map(|segment| &segment.sections)
            .collect();

        let mut reader = Reader::at(data, symoff, self.endian)?;
        reader.set_address_size(self.address_size());

        let mut symbols = Vec::new();
        let mut section_ends = Vec::new();
        for _ in 0..nsyms {
            let strx = reader.u32()? as usize;
            let n_type = reader.u8()?;
            let n_sect = reader.u8()?;
            let _n_desc = reader.u16()?;
            let n_value = reader.address()?;

            let n_type = u32::from(n_type);
            if n_type & u32::from(symbols::N_STAB) != 0
                || n_type & u32::from(symbols::N_TYPE) != u32::from(symbols::N_SECT)
            {
                continue;
            }

            let Ok(name) = Reader::at(strtab, strx, self.endian).and_then(|mut r| r.cstr())
            else {
                continue;
            };
            let name = String::from_utf8_lossy(name);
            let name = name.strip_prefix('_').unwrap_or(&name).to_owned();

            let section_end = usize::from(n_sect)
                .checked_sub(1)
                .and_then(|index| sections.get(index))
                .map(|section| section.address.saturating_add(section.size));

            symbols.push(Symbol {
                name,
                address: n_value,
                size: 0,
            });
            section_ends.push(section_end);
        }

        let mut indexed: Vec<_> = symbols.into_iter().zip(section_ends).collect();
        indexed.sort_by_key(|(symbol, _)| symbol.address);
        indexed.dedup_by_key(|(symbol, _)| symbol.address);

        let next_addresses: Vec<Option<u64>> = indexed
            .iter()
            .skip(1)
            .map(|(symbol, _)| Some(symbol.address))
            .chain(std::iter::once(None))
            .collect();

        Ok(indexed
            .into_iter()
            .zip(next_addresses)
            .map(|((mut symbol, section_end), next)| {
                let end = match (next, section_end) {
                    (Some(next), Some(end)) => next.min(end),
                    (Some(end), None) | (None, Some(end)) => end,
                    (None, None) => symbol.address,
                };
                symbol.size = end.saturating_sub(symbol.address);
                symbol
            })
            .collect())
    }

    /// Finds the symbol covering the given virtual address.
    pub fn symbol_for_address(&self, address: u64) -> Option<&Symbol> {
        let symbols = self.symbols();
        let index = symbols.partition_point(|symbol| symbol.address <= address);
        let symbol = symbols.get(index.checked_sub(1)?)?;
        symbol.contains(address).then_some(symbol)
    }
}

impl fmt::Debug for MachObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachObject")
            .field("arch", &self.arch())
            .field("uuid", &self.uuid())
            .field("filetype", &self.header.filetype)
            .field("is_64", &self.is_64)
            .field("endian", &self.endian)
            .field("load_address", &format_args!("{:#x}", self.load_address()))
            .finish()
    }
}

/// Determines byte order and word size from a thin Mach magic.
fn thin_layout(magic: &[u8]) -> Option<(Endian, bool)> {
    let magic = u32::from_le_bytes(magic.try_into().ok()?);
    match magic {
        header::MH_MAGIC => Some((Endian::Little, false)),
        header::MH_CIGAM => Some((Endian::Big, false)),
        header::MH_MAGIC_64 => Some((Endian::Little, true)),
        header::MH_CIGAM_64 => Some((Endian::Big, true)),
        _ => None,
    }
}

/// An entry of a fat header, describing one architecture slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FatArch {
    /// CPU type of the slice.
    pub cputype: u32,
    /// CPU subtype of the slice.
    pub cpusubtype: u32,
    /// File offset of the slice.
    pub offset: u64,
    /// Size of the slice in bytes.
    pub size: u64,
    /// Alignment as a power of two.
    pub align: u32,
}

impl FatArch {
    /// The CPU architecture of the slice.
    pub fn arch(&self) -> Arch {
        arch_from_cpu(self.cputype, self.cpusubtype)
    }
}

/// A universal binary containing multiple Mach objects, or a single thin object.
pub struct MachArchive<'data> {
    data: ByteView<'data>,
    arches: Option<Vec<FatArch>>,
}

impl<'data> MachArchive<'data> {
    /// Tests whether the buffer contains either a fat or a thin Mach object.
    pub fn test(data: &[u8]) -> bool {
        Self::is_fat(data).is_some()
    }

    /// Returns `Some(true)` for fat archives, `Some(false)` for thin objects.
    fn is_fat(data: &[u8]) -> Option<bool> {
        let magic = data.get(..4)?;
        match u32::from_be_bytes(magic.try_into().ok()?) {
            fat::FAT_MAGIC | FAT_MAGIC_64 => Some(true),
            _ if thin_layout(magic).is_some() => Some(false),
            _ => None,
        }
    }

    /// Parses a fat archive or thin object.
    pub fn parse(data: ByteView<'data>) -> Result<Self, MachError> {
        match Self::is_fat(&data) {
            Some(true) => {}
            Some(false) => {
                return Ok(MachArchive { data, arches: None });
            }
            None => return Err(MachError::new(MachErrorKind::InvalidMagic, 0)),
        }

        let mut reader = Reader::new(&data, Endian::Big);
        let is_64 = reader.u32()? == FAT_MAGIC_64;
        let count = reader.u32()?;

        let mut arches = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let entry_offset = reader.position();
            let cputype = reader.u32()?;
            let cpusubtype = reader.u32()?;
            let (offset, size) = if is_64 {
                (reader.u64()?, reader.u64()?)
            } else {
                (u64::from(reader.u32()?), u64::from(reader.u32()?))
            };
            let align = reader.u32()?;
            if is_64 {
                reader.skip(4)?;
            }

            let end = offset.checked_add(size);
            if end.map_or(true, |end| end > data.len() as u64) {
                return Err(MachError::new(MachErrorKind::InvalidFatArch, entry_offset));
            }

            arches.push(FatArch {
                cputype,
                cpusubtype,
                offset,
                size,
                align,
            });
        }

        Ok(MachArchive {
            data,
            arches: Some(arches),
        })
    }

    /// Returns `true` if this is a universal binary.
    pub fn is_multi(&self) -> bool {
        self.arches.is_some()
    }

    /// The fat architecture entries, empty for thin objects.
    pub fn fat_arches(&self) -> &[FatArch] {
        self.arches.as_deref().unwrap_or_default()
    }

    /// The number of objects in this archive.
    pub fn object_count(&self) -> usize {
        match self.arches {
            Some(ref arches) => arches.len(),
            None => 1,
        }
    }

    /// Parses the object at the given index.
    pub fn object_by_index(&self, index: usize) -> Result<Option<MachObject<'data>>, MachError> {
        match self.arches {
            Some(ref arches) => match arches.get(index) {
                Some(arch) => {
                    // Bounds were validated when parsing the fat header.
                    let start = arch.offset as usize;
                    let end = start + arch.size as usize;
                    MachObject::parse_range(self.data.clone(), start, end).map(Some)
                }
                None => Ok(None),
            },
            None if index == 0 => MachObject::parse(self.data.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Iterates over all objects in this archive.
    pub fn objects(&self) -> impl Iterator<Item = Result<MachObject<'data>, MachError>> + '_ {
        (0..self.object_count()).filter_map(move |index| self.object_by_index(index).transpose())
    }

    /// Finds the object for the given architecture.
    pub fn object_by_arch(&self, arch: Arch) -> Result<Option<MachObject<'data>>, MachError> {
        match self.arches {
            Some(ref arches) => match arches.iter().position(|fat| fat.arch() == arch) {
                Some(index) => self.object_by_index(index),
                None => Ok(None),
            },
            None => {
                let object = MachObject::parse(self.data.clone())?;
                Ok((object.arch() == arch).then_some(object))
            }
        }
    }

    /// Finds the object with the given build UUID.
    pub fn object_by_uuid(&self, uuid: Uuid) -> Result<Option<MachObject<'data>>, MachError> {
        for object in self.objects() {
            let object = object?;
            if object.uuid() == Some(uuid) {
                return Ok(Some(object));
            }
        }

        Ok(None)
    }
}

impl fmt::Debug for MachArchive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachArchive")
            .field("is_multi", &self.is_multi())
            .field("object_count", &self.object_count())
            .finish()
    }
}
