use crate::macho::{MachOBuilder, SectionSpec, SegmentSpec, MH_DSYM};
use crate::writer::ByteWriter;

/// UUID of the sample object.
pub const SAMPLE_UUID: [u8; 16] = [
    0x6a, 0x12, 0x8a, 0x5e, 0x7b, 0x4c, 0x3d, 0x2e, 0x9f, 0x10, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6,
];
/// Virtual address of the sample `__TEXT` segment.
pub const SAMPLE_TEXT_VMADDR: u64 = 0x1_0000_0000;
/// Start of `main` in the sample object.
pub const SAMPLE_MAIN_ADDR: u64 = 0x1_0000_1000;
/// Start of the lexical block nested in `main`.
pub const SAMPLE_BLOCK_ADDR: u64 = 0x1_0000_1040;
/// Start of `helper` in the sample object.
pub const SAMPLE_HELPER_ADDR: u64 = 0x1_0000_1100;
/// Start of `no_debug`, which only appears in the symbol table.
pub const SAMPLE_NO_DEBUG_ADDR: u64 = 0x1_0000_1200;
/// End of the code described by DWARF.
pub const SAMPLE_DWARF_END: u64 = 0x1_0000_1200;
/// Compilation directory recorded in the sample compile unit.
pub const SAMPLE_COMP_DIR: &str = "/src/app";

/// Raw contents of the debug sections of the sample object.
#[derive(Clone, Debug, Default)]
pub struct SampleSections {
    /// `__debug_abbrev`
    pub abbrev: Vec<u8>,
    /// `__debug_info`
    pub info: Vec<u8>,
    /// `__debug_str`
    pub str: Vec<u8>,
    /// `__debug_line`
    pub line: Vec<u8>,
    /// `__debug_aranges`
    pub aranges: Vec<u8>,
}

/// Collects strings for a `.debug_str` section.
#[derive(Debug, Default)]
pub struct StringTable {
    writer: ByteWriter,
}

impl StringTable {
    /// Creates an empty string table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a string and returns its offset.
    pub fn add(&mut self, value: &str) -> u32 {
        let offset = self.writer.len() as u32;
        self.writer.cstr(value);
        offset
    }

    /// Returns the section contents.
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}

/// Wraps a DIE stream into a DWARF 4 compilation unit with 32-bit offsets.
pub fn compile_unit_v4(abbrev_offset: u32, address_size: u8, dies: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.u32((2 + 4 + 1 + dies.len()) as u32)
        .u16(4)
        .u32(abbrev_offset)
        .u8(address_size)
        .raw(dies);
    w.into_bytes()
}

/// Wraps a DIE stream into a DWARF 5 compilation unit with 32-bit offsets.
pub fn compile_unit_v5(abbrev_offset: u32, address_size: u8, dies: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.u32((2 + 1 + 1 + 4 + dies.len()) as u32)
        .u16(5)
        .u8(0x01) // DW_UT_compile
        .u8(address_size)
        .u32(abbrev_offset)
        .raw(dies);
    w.into_bytes()
}

/// Assembles a DWARF 4 line number program.
///
/// Uses `line_base = -5`, `line_range = 14` and `opcode_base = 13`. `files` pairs a file name with
/// its directory index.
pub fn line_program_v4(include_dirs: &[&str], files: &[(&str, u64)], program: &[u8]) -> Vec<u8> {
    let mut header = ByteWriter::new();
    header
        .u8(1) // minimum_instruction_length
        .u8(1) // maximum_operations_per_instruction
        .u8(1) // default_is_stmt
        .i8(-5)
        .u8(14)
        .u8(13)
        .raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    for dir in include_dirs {
        header.cstr(dir);
    }
    header.u8(0);
    for (name, dir) in files {
        header.cstr(name).uleb(*dir).uleb(0).uleb(0);
    }
    header.u8(0);
    let header = header.into_bytes();

    let mut w = ByteWriter::new();
    w.u32((2 + 4 + header.len() + program.len()) as u32)
        .u16(4)
        .u32(header.len() as u32)
        .raw(&header)
        .raw(program);
    w.into_bytes()
}

/// Encodes a special opcode for the parameters used by [`line_program_v4`].
pub fn special_opcode(address_advance: u8, line_advance: i8) -> u8 {
    let line = (line_advance as i16 + 5) as u8;
    assert!(line < 14, "line advance out of range");
    let opcode = 13u16 + line as u16 + 14 * address_advance as u16;
    assert!(opcode <= 255, "address advance out of range");
    opcode as u8
}

/// Builds the debug sections of the sample object.
///
/// The compile unit `main.c` covers `[SAMPLE_MAIN_ADDR, SAMPLE_DWARF_END)` and contains:
///
/// - `main` at `[0x100001000, 0x100001100)`, declared on line 40, with a lexical block at
///   `[0x100001040, 0x100001080)`
/// - `helper` at `[0x100001100, 0x100001200)`, declared on line 60
///
/// The line table maps `0x1000 -> 40`, `0x1010 -> 41`, `0x1020 -> 42`, `0x1040 -> 43`,
/// `0x1080 -> 50` and `0x1100 -> 60` (relative to `__TEXT`), ending at `0x1200`.
pub fn sample_sections() -> SampleSections {
    let mut strings = StringTable::new();
    let producer = strings.add("crashlog test compiler");
    let cu_name = strings.add("main.c");
    let comp_dir = strings.add(SAMPLE_COMP_DIR);
    let main_name = strings.add("main");

    let mut abbrev = ByteWriter::new();
    // 1: compile unit
    abbrev.uleb(1).uleb(0x11).u8(1);
    abbrev.uleb(0x25).uleb(0x0e); // producer: strp
    abbrev.uleb(0x13).uleb(0x05); // language: data2
    abbrev.uleb(0x03).uleb(0x0e); // name: strp
    abbrev.uleb(0x10).uleb(0x17); // stmt_list: sec_offset
    abbrev.uleb(0x1b).uleb(0x0e); // comp_dir: strp
    abbrev.uleb(0x11).uleb(0x01); // low_pc: addr
    abbrev.uleb(0x12).uleb(0x06); // high_pc: data4
    abbrev.u8(0).u8(0);
    // 2: subprogram with children
    abbrev.uleb(2).uleb(0x2e).u8(1);
    abbrev.uleb(0x11).uleb(0x01);
    abbrev.uleb(0x12).uleb(0x06);
    abbrev.uleb(0x03).uleb(0x0e);
    abbrev.uleb(0x3a).uleb(0x0b); // decl_file: data1
    abbrev.uleb(0x3b).uleb(0x0b); // decl_line: data1
    abbrev.uleb(0x3f).uleb(0x19); // external: flag_present
    abbrev.u8(0).u8(0);
    // 3: lexical block
    abbrev.uleb(3).uleb(0x0b).u8(0);
    abbrev.uleb(0x11).uleb(0x01);
    abbrev.uleb(0x12).uleb(0x06);
    abbrev.u8(0).u8(0);
    // 4: leaf subprogram with an inline name
    abbrev.uleb(4).uleb(0x2e).u8(0);
    abbrev.uleb(0x11).uleb(0x01);
    abbrev.uleb(0x12).uleb(0x06);
    abbrev.uleb(0x03).uleb(0x08); // name: string
    abbrev.uleb(0x3a).uleb(0x0b);
    abbrev.uleb(0x3b).uleb(0x0b);
    abbrev.u8(0).u8(0);
    abbrev.u8(0);

    let mut dies = ByteWriter::new();
    dies.uleb(1)
        .u32(producer)
        .u16(0x0c) // DW_LANG_C99
        .u32(cu_name)
        .u32(0)
        .u32(comp_dir)
        .u64(SAMPLE_MAIN_ADDR)
        .u32((SAMPLE_DWARF_END - SAMPLE_MAIN_ADDR) as u32);
    dies.uleb(2)
        .u64(SAMPLE_MAIN_ADDR)
        .u32(0x100)
        .u32(main_name)
        .u8(1)
        .u8(40);
    dies.uleb(3).u64(SAMPLE_BLOCK_ADDR).u32(0x40);
    dies.u8(0);
    dies.uleb(4)
        .u64(SAMPLE_HELPER_ADDR)
        .u32(0x100)
        .cstr("helper")
        .u8(1)
        .u8(60);
    dies.u8(0);

    let info = compile_unit_v4(0, 8, &dies.into_bytes());

    let mut program = ByteWriter::new();
    program.u8(0).uleb(9).u8(0x02).u64(SAMPLE_MAIN_ADDR); // DW_LNE_set_address
    program.u8(0x03).sleb(39).u8(0x01); // line 40, copy
    program.u8(special_opcode(0x10, 1)); // 0x1010: 41
    program.u8(0x02).uleb(0x10).u8(0x03).sleb(1).u8(0x01); // 0x1020: 42
    program.u8(0x02).uleb(0x20).u8(special_opcode(0, 1)); // 0x1040: 43
    program.u8(0x02).uleb(0x40).u8(0x03).sleb(7).u8(0x01); // 0x1080: 50
    program.u8(0x02).uleb(0x80).u8(0x03).sleb(10).u8(0x01); // 0x1100: 60
    program.u8(0x02).uleb(0x100).u8(0).uleb(1).u8(0x01); // end_sequence at 0x1200
    let line = line_program_v4(&[], &[("main.c", 0)], &program.into_bytes());

    let mut aranges = ByteWriter::new();
    aranges
        .u32(0)
        .u16(2)
        .u32(0)
        .u8(8)
        .u8(0)
        .raw(&[0; 4])
        .u64(SAMPLE_MAIN_ADDR)
        .u64(SAMPLE_DWARF_END - SAMPLE_MAIN_ADDR)
        .u64(0)
        .u64(0);
    let mut aranges = aranges.into_bytes();
    let length = (aranges.len() - 4) as u32;
    aranges[..4].copy_from_slice(&length.to_le_bytes());

    SampleSections {
        abbrev: abbrev.into_bytes(),
        info,
        str: strings.into_bytes(),
        line,
        aranges,
    }
}

/// Builds a 64-bit x86_64 Mach-O object carrying [`sample_sections`] in its `__DWARF` segment.
///
/// The symbol table defines `_main`, `_helper` and `_no_debug`, the latter without any DWARF
/// coverage.
pub fn sample_object() -> Vec<u8> {
    sample_object_builder().build()
}

/// Same as [`sample_object`], but returns the builder for further customization.
pub fn sample_object_builder() -> MachOBuilder {
    let sections = sample_sections();

    let text = SegmentSpec::new("__TEXT", SAMPLE_TEXT_VMADDR, 0x2000).section(
        SectionSpec::new("__text", vec![0x90; 0x300]).at(SAMPLE_MAIN_ADDR),
    );

    let dwarf = SegmentSpec::new("__DWARF", SAMPLE_TEXT_VMADDR + 0x3000, 0x1000)
        .section(SectionSpec::new("__debug_abbrev", sections.abbrev))
        .section(SectionSpec::new("__debug_info", sections.info))
        .section(SectionSpec::new("__debug_str", sections.str))
        .section(SectionSpec::new("__debug_line", sections.line))
        .section(SectionSpec::new("__debug_aranges", sections.aranges));

    MachOBuilder::new()
        .filetype(MH_DSYM)
        .uuid(SAMPLE_UUID)
        .segment(text)
        .segment(dwarf)
        .symbol("_main", SAMPLE_MAIN_ADDR)
        .symbol("_helper", SAMPLE_HELPER_ADDR)
        .symbol("_no_debug", SAMPLE_NO_DEBUG_ADDR)
}
