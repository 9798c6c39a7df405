use crate::writer::{ByteWriter, Order};

const MH_MAGIC: u32 = 0xfeed_face;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const FAT_MAGIC: u32 = 0xcafe_babe;

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;
const LC_UUID: u32 = 0x1b;

/// `CPU_TYPE_X86_64`
pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
/// `CPU_TYPE_ARM64`
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
/// `CPU_TYPE_POWERPC`
pub const CPU_TYPE_POWERPC: u32 = 18;
/// `MH_EXECUTE`
pub const MH_EXECUTE: u32 = 0x2;
/// `MH_DSYM`
pub const MH_DSYM: u32 = 0xa;

/// A section to be placed into a [`SegmentSpec`].
#[derive(Clone, Debug)]
pub struct SectionSpec {
    /// Section name, truncated to 16 bytes.
    pub name: String,
    /// Virtual address. Defaults to the segment address plus the section's offset in the segment.
    pub addr: Option<u64>,
    /// Section contents.
    pub data: Vec<u8>,
}

impl SectionSpec {
    /// Creates a section with contents and a derived address.
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        SectionSpec {
            name: name.to_owned(),
            addr: None,
            data,
        }
    }

    /// Sets an explicit virtual address.
    pub fn at(mut self, addr: u64) -> Self {
        self.addr = Some(addr);
        self
    }
}

/// A segment load command with its sections.
#[derive(Clone, Debug)]
pub struct SegmentSpec {
    /// Segment name.
    pub name: String,
    /// Virtual address of the segment.
    pub vmaddr: u64,
    /// Virtual size of the segment.
    pub vmsize: u64,
    /// Sections in this segment.
    pub sections: Vec<SectionSpec>,
}

impl SegmentSpec {
    /// Creates an empty segment.
    pub fn new(name: &str, vmaddr: u64, vmsize: u64) -> Self {
        SegmentSpec {
            name: name.to_owned(),
            vmaddr,
            vmsize,
            sections: Vec::new(),
        }
    }

    /// Appends a section.
    pub fn section(mut self, section: SectionSpec) -> Self {
        self.sections.push(section);
        self
    }
}

/// Assembles a thin Mach-O file.
///
/// The layout is: header, load commands (segments, then `LC_UUID`, then `LC_SYMTAB`), section
/// contents in declaration order, symbol table, string table.
#[derive(Clone, Debug)]
pub struct MachOBuilder {
    is_64: bool,
    order: Order,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    flags: u32,
    uuid: Option<[u8; 16]>,
    segments: Vec<SegmentSpec>,
    symbols: Vec<(String, u64)>,
    trailing_commands: Vec<(u32, Vec<u8>)>,
}

impl MachOBuilder {
    /// A 64-bit little-endian x86_64 executable.
    pub fn new() -> Self {
        MachOBuilder {
            is_64: true,
            order: Order::Little,
            cputype: CPU_TYPE_X86_64,
            cpusubtype: 3,
            filetype: MH_EXECUTE,
            flags: 0,
            uuid: None,
            segments: Vec::new(),
            symbols: Vec::new(),
            trailing_commands: Vec::new(),
        }
    }

    /// A 32-bit big-endian PowerPC executable.
    pub fn ppc() -> Self {
        MachOBuilder {
            is_64: false,
            order: Order::Big,
            cputype: CPU_TYPE_POWERPC,
            cpusubtype: 0,
            ..Self::new()
        }
    }

    /// Sets CPU type and subtype.
    pub fn cpu(mut self, cputype: u32, cpusubtype: u32) -> Self {
        self.cputype = cputype;
        self.cpusubtype = cpusubtype;
        self
    }

    /// Sets the file type.
    pub fn filetype(mut self, filetype: u32) -> Self {
        self.filetype = filetype;
        self
    }

    /// Sets the header flags.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Adds an `LC_UUID` command.
    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Adds a segment command.
    pub fn segment(mut self, segment: SegmentSpec) -> Self {
        self.segments.push(segment);
        self
    }

    /// Adds an external symbol defined in the first section.
    pub fn symbol(mut self, name: &str, addr: u64) -> Self {
        self.symbols.push((name.to_owned(), addr));
        self
    }

    /// Appends an arbitrary load command with the given body (excluding `cmd` and `cmdsize`).
    pub fn raw_command(mut self, cmd: u32, body: Vec<u8>) -> Self {
        self.trailing_commands.push((cmd, body));
        self
    }

    fn header_size(&self) -> usize {
        if self.is_64 {
            32
        } else {
            28
        }
    }

    fn segment_command_size(&self, segment: &SegmentSpec) -> usize {
        let (base, per_section) = if self.is_64 { (72, 80) } else { (56, 68) };
        base + per_section * segment.sections.len()
    }

    /// Produces the file contents.
    pub fn build(&self) -> Vec<u8> {
        let mut ncmds = self.segments.len() + self.trailing_commands.len();
        let mut sizeofcmds: usize = self
            .segments
            .iter()
            .map(|s| self.segment_command_size(s))
            .sum();
        sizeofcmds += self
            .trailing_commands
            .iter()
            .map(|(_, body)| 8 + body.len())
            .sum::<usize>();
        if self.uuid.is_some() {
            ncmds += 1;
            sizeofcmds += 24;
        }
        if !self.symbols.is_empty() {
            ncmds += 1;
            sizeofcmds += 24;
        }

        // Lay out section contents after the load commands.
        let mut data_offset = align_up(self.header_size() + sizeofcmds, 16);
        let mut section_offsets = Vec::new();
        for segment in &self.segments {
            let mut offsets = Vec::new();
            for section in &segment.sections {
                offsets.push(data_offset);
                data_offset = align_up(data_offset + section.data.len(), 16);
            }
            section_offsets.push(offsets);
        }

        let nlist_size = if self.is_64 { 16 } else { 12 };
        let symoff = data_offset;
        let stroff = symoff + nlist_size * self.symbols.len();
        let mut strtab = ByteWriter::with_order(self.order);
        strtab.u8(0);
        let mut name_offsets = Vec::new();
        for (name, _) in &self.symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.cstr(name);
        }

        let mut w = ByteWriter::with_order(self.order);
        if self.is_64 {
            w.u32(MH_MAGIC_64);
        } else {
            w.u32(MH_MAGIC);
        }
        w.u32(self.cputype)
            .u32(self.cpusubtype)
            .u32(self.filetype)
            .u32(ncmds as u32)
            .u32(sizeofcmds as u32)
            .u32(self.flags);
        if self.is_64 {
            w.u32(0);
        }

        for (segment, offsets) in self.segments.iter().zip(&section_offsets) {
            let fileoff = offsets.first().copied().unwrap_or(0) as u64;
            let filesize = match (offsets.last(), segment.sections.last()) {
                (Some(&last), Some(section)) => (last + section.data.len()) as u64 - fileoff,
                _ => 0,
            };
            let cmdsize = self.segment_command_size(segment) as u32;
            if self.is_64 {
                w.u32(LC_SEGMENT_64).u32(cmdsize).fixed_str(&segment.name, 16);
                w.u64(segment.vmaddr)
                    .u64(segment.vmsize)
                    .u64(fileoff)
                    .u64(filesize);
            } else {
                w.u32(LC_SEGMENT).u32(cmdsize).fixed_str(&segment.name, 16);
                w.u32(segment.vmaddr as u32)
                    .u32(segment.vmsize as u32)
                    .u32(fileoff as u32)
                    .u32(filesize as u32);
            }
            w.u32(7).u32(5).u32(segment.sections.len() as u32).u32(0);

            for (section, &offset) in segment.sections.iter().zip(offsets) {
                let addr = section
                    .addr
                    .unwrap_or(segment.vmaddr + (offset as u64 - fileoff));
                w.fixed_str(&section.name, 16).fixed_str(&segment.name, 16);
                if self.is_64 {
                    w.u64(addr).u64(section.data.len() as u64);
                } else {
                    w.u32(addr as u32).u32(section.data.len() as u32);
                }
                w.u32(offset as u32).u32(0).u32(0).u32(0).u32(0).u32(0).u32(0);
                if self.is_64 {
                    w.u32(0);
                }
            }
        }

        if let Some(uuid) = self.uuid {
            w.u32(LC_UUID).u32(24).raw(&uuid);
        }

        if !self.symbols.is_empty() {
            w.u32(LC_SYMTAB)
                .u32(24)
                .u32(symoff as u32)
                .u32(self.symbols.len() as u32)
                .u32(stroff as u32)
                .u32(strtab.len() as u32);
        }

        for (cmd, body) in &self.trailing_commands {
            w.u32(*cmd).u32((8 + body.len()) as u32).raw(body);
        }

        for (segment, offsets) in self.segments.iter().zip(&section_offsets) {
            for (section, &offset) in segment.sections.iter().zip(offsets) {
                while w.len() < offset {
                    w.u8(0);
                }
                w.raw(&section.data);
            }
        }

        while w.len() < symoff {
            w.u8(0);
        }
        for ((_, addr), strx) in self.symbols.iter().zip(name_offsets) {
            // N_SECT | N_EXT in section 1
            w.u32(strx).u8(0x0f).u8(1).u16(0);
            if self.is_64 {
                w.u64(*addr);
            } else {
                w.u32(*addr as u32);
            }
        }
        w.raw(&strtab.into_bytes());

        w.into_bytes()
    }
}

impl Default for MachOBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps thin Mach-O slices into a universal (fat) archive.
pub fn fat_archive(slices: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    let mut w = ByteWriter::with_order(Order::Big);
    w.u32(FAT_MAGIC).u32(slices.len() as u32);

    let mut offset = align_up(8 + 20 * slices.len(), 16);
    let mut offsets = Vec::new();
    for (cputype, cpusubtype, data) in slices {
        w.u32(*cputype)
            .u32(*cpusubtype)
            .u32(offset as u32)
            .u32(data.len() as u32)
            .u32(4);
        offsets.push(offset);
        offset = align_up(offset + data.len(), 16);
    }

    for ((_, _, data), offset) in slices.iter().zip(offsets) {
        while w.len() < offset {
            w.u8(0);
        }
        w.raw(data);
    }

    w.into_bytes()
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}
