use std::fmt;

use crashlog_common::{ByteView, Language, Uuid};
use crashlog_debuginfo::dwarf::DwarfSection;
use crashlog_debuginfo::macho::Symbol;
use crashlog_debuginfo::{DwarfError, DwarfFile, MachArchive, MachObject, SymbolicationData};
use crashlog_testutils::{
    compile_unit_v4, compile_unit_v5, fat_archive, sample_object, sample_object_builder,
    sample_sections, ByteWriter, MachOBuilder, SectionSpec, SegmentSpec, StringTable,
    CPU_TYPE_ARM64, CPU_TYPE_X86_64, MH_DSYM, SAMPLE_BLOCK_ADDR, SAMPLE_COMP_DIR,
    SAMPLE_DWARF_END, SAMPLE_HELPER_ADDR, SAMPLE_MAIN_ADDR, SAMPLE_NO_DEBUG_ADDR, SAMPLE_UUID,
};
use gimli::{constants, DwTag};

use similar_asserts::assert_eq;

type Error = Box<dyn std::error::Error>;

/// Helper to create neat snapshots for symbol tables.
struct SymbolsDebug<'a>(&'a [Symbol]);

impl fmt::Debug for SymbolsDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in self.0 {
            writeln!(f, "{:#x} {:#x} {}", symbol.address, symbol.size, symbol.name)?;
        }

        Ok(())
    }
}

fn parse_sample() -> Result<MachObject<'static>, Error> {
    Ok(MachObject::parse(ByteView::from_vec(sample_object()))?)
}

#[test]
fn test_sample_object() -> Result<(), Error> {
    let object = parse_sample()?;

    assert!(object.is_dsym());
    assert_eq!(object.uuid(), Some(Uuid::from_bytes(SAMPLE_UUID)));
    assert_eq!(object.load_address(), 0x1_0000_0000);
    assert!(object.find_section("__debug_info").is_some());
    assert!(object.find_section("__debug_ranges").is_none());

    insta::assert_debug_snapshot!(SymbolsDebug(object.symbols()), @r###"
    0x100001000 0x100 main
    0x100001100 0x100 helper
    0x100001200 0x100 no_debug
    "###);

    Ok(())
}

#[test]
fn test_lookup_main() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    let data = dwarf.lookup(SAMPLE_MAIN_ADDR + 0x20)?;
    insta::assert_debug_snapshot!(data, @r###"
    SymbolicationData {
        found: true,
        symbol: Some(
            "main",
        ),
        file: Some(
            "main.c",
        ),
        abs_path: Some(
            "/src/app/main.c",
        ),
        line: Some(
            42,
        ),
        language: C,
        address: 4294971424,
    }
    "###);

    Ok(())
}

#[test]
fn test_lookup_lexical_block() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    // The block is more specific than `main`, but only functions name symbols.
    let data = dwarf.lookup(SAMPLE_BLOCK_ADDR + 0x10)?;
    assert!(data.found);
    assert_eq!(data.symbol.as_deref(), Some("main"));
    assert_eq!(data.line, Some(43));

    let data = dwarf.lookup(SAMPLE_BLOCK_ADDR + 0x40)?;
    assert_eq!(data.symbol.as_deref(), Some("main"));
    assert_eq!(data.line, Some(50));

    Ok(())
}

#[test]
fn test_innermost_entry() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    let tag_at = |address: u64| -> Result<Option<DwTag>, DwarfError> {
        let Some((index, id)) = dwarf.innermost_entry(address)? else {
            return Ok(None);
        };
        let unit = dwarf.unit(index).expect("unit");
        Ok(unit.entry(id).map(|entry| entry.tag))
    };

    assert_eq!(tag_at(SAMPLE_BLOCK_ADDR + 0x10)?, Some(constants::DW_TAG_lexical_block));
    assert_eq!(tag_at(SAMPLE_MAIN_ADDR + 0x10)?, Some(constants::DW_TAG_subprogram));
    assert_eq!(tag_at(SAMPLE_HELPER_ADDR)?, Some(constants::DW_TAG_subprogram));
    assert_eq!(tag_at(SAMPLE_NO_DEBUG_ADDR)?, None);

    let (index, scopes) = dwarf.scopes_for_address(SAMPLE_BLOCK_ADDR + 0x10)?.expect("scopes");
    let unit = dwarf.unit(index).expect("unit");
    let tags: Vec<_> = scopes
        .iter()
        .filter_map(|&id| unit.entry(id).map(|entry| entry.tag))
        .collect();
    assert_eq!(
        tags,
        [constants::DW_TAG_subprogram, constants::DW_TAG_lexical_block]
    );

    Ok(())
}

#[test]
fn test_lookup_helper() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    let data = dwarf.lookup(SAMPLE_HELPER_ADDR + 0xff)?;
    assert_eq!(
        data,
        SymbolicationData {
            found: true,
            symbol: Some("helper".into()),
            file: Some("main.c".into()),
            abs_path: Some(format!("{SAMPLE_COMP_DIR}/main.c")),
            line: Some(60),
            language: Language::C,
            address: SAMPLE_HELPER_ADDR + 0xff,
        }
    );

    Ok(())
}

#[test]
fn test_lookup_without_debug_info() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    assert_eq!(
        dwarf.lookup(SAMPLE_NO_DEBUG_ADDR)?,
        SymbolicationData::not_found(SAMPLE_NO_DEBUG_ADDR)
    );
    assert_eq!(
        dwarf.lookup(SAMPLE_MAIN_ADDR - 1)?,
        SymbolicationData::not_found(SAMPLE_MAIN_ADDR - 1)
    );

    let symbol = object.symbol_for_address(SAMPLE_NO_DEBUG_ADDR + 4).unwrap();
    assert_eq!(symbol.name, "no_debug");

    Ok(())
}

#[test]
fn test_repeated_lookups() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    let first = dwarf.lookup(SAMPLE_MAIN_ADDR + 0x10)?;
    let second = dwarf.lookup(SAMPLE_MAIN_ADDR + 0x10)?;
    assert_eq!(first, second);
    assert_eq!(first.line, Some(41));

    let unit = dwarf.unit(0).unwrap();
    assert!(std::ptr::eq(unit, dwarf.unit(0).unwrap()));

    Ok(())
}

#[test]
fn test_sample_unit() -> Result<(), Error> {
    let object = parse_sample()?;
    let dwarf = DwarfFile::parse(&object)?;

    assert!(dwarf.has_section(DwarfSection::Aranges));
    assert!(!dwarf.has_section(DwarfSection::Ranges));
    assert_eq!(dwarf.unit_count(), 1);

    let unit = dwarf.unit(0).unwrap();
    assert_eq!(unit.header().version, 4);
    assert_eq!(unit.name(), Some("main.c"));
    assert_eq!(unit.comp_dir(), Some(SAMPLE_COMP_DIR));
    assert_eq!(unit.producer(), Some("crashlog test compiler"));
    assert_eq!(unit.language(), Language::C);
    assert_eq!(unit.base_address(), SAMPLE_MAIN_ADDR);

    let root = unit.entry(unit.root().unwrap()).unwrap();
    assert_eq!(
        dwarf.entry_ranges(unit, root)?,
        [SAMPLE_MAIN_ADDR..SAMPLE_DWARF_END]
    );

    let program = dwarf.line_program(0).unwrap();
    let lines: Vec<_> = program
        .rows()
        .iter()
        .map(|row| (row.address - SAMPLE_MAIN_ADDR, row.line, row.end_sequence))
        .collect();
    assert_eq!(
        lines,
        [
            (0x0, 40, false),
            (0x10, 41, false),
            (0x20, 42, false),
            (0x40, 43, false),
            (0x80, 50, false),
            (0x100, 60, false),
            (0x200, 60, true),
        ]
    );

    Ok(())
}

#[test]
fn test_missing_debug_info() -> Result<(), Error> {
    let data = MachOBuilder::new()
        .segment(
            SegmentSpec::new("__TEXT", 0x1000, 0x1000)
                .section(SectionSpec::new("__text", vec![0xc3; 16])),
        )
        .build();
    let object = MachObject::parse(ByteView::from_vec(data))?;

    let error = DwarfFile::parse(&object).unwrap_err();
    assert!(matches!(error, DwarfError::MissingSection("debug_info")));

    Ok(())
}

#[test]
fn test_unknown_form_skips_unit() -> Result<(), Error> {
    let sections = sample_sections();

    let mut abbrev = sections.abbrev.clone();
    let bad_table = abbrev.len() as u32;
    let mut w = ByteWriter::new();
    w.uleb(1).uleb(0x11).u8(0).uleb(0x03).uleb(0x7f).u8(0).u8(0).u8(0);
    abbrev.extend(w.into_bytes());

    let mut info = sections.info.clone();
    info.extend(compile_unit_v4(bad_table, 8, &[1, 0xaa, 0xbb]));

    let data = MachOBuilder::new()
        .filetype(MH_DSYM)
        .segment(
            SegmentSpec::new("__TEXT", 0x1_0000_0000, 0x2000).section(
                SectionSpec::new("__text", vec![0x90; 0x300]).at(SAMPLE_MAIN_ADDR),
            ),
        )
        .segment(
            SegmentSpec::new("__DWARF", 0x1_0000_3000, 0x1000)
                .section(SectionSpec::new("__debug_abbrev", abbrev))
                .section(SectionSpec::new("__debug_info", info))
                .section(SectionSpec::new("__debug_str", sections.str))
                .section(SectionSpec::new("__debug_line", sections.line))
                .section(SectionSpec::new("__debug_aranges", sections.aranges)),
        )
        .build();

    let object = MachObject::parse(ByteView::from_vec(data))?;
    let dwarf = DwarfFile::parse(&object)?;

    assert_eq!(dwarf.unit_count(), 2);
    assert!(dwarf.unit(0).is_some());
    assert!(dwarf.unit(1).is_none());

    let data = dwarf.lookup(SAMPLE_MAIN_ADDR + 0x20)?;
    assert_eq!(data.symbol.as_deref(), Some("main"));
    assert_eq!(data.line, Some(42));

    Ok(())
}

#[test]
fn test_fat_archive_lookup() -> Result<(), Error> {
    let arm = sample_object_builder()
        .cpu(CPU_TYPE_ARM64, 0)
        .uuid([0x11; 16])
        .build();
    let data = fat_archive(&[(CPU_TYPE_ARM64, 0, arm), (CPU_TYPE_X86_64, 3, sample_object())]);

    let archive = MachArchive::parse(ByteView::from_vec(data))?;
    assert_eq!(archive.object_count(), 2);

    let object = archive
        .object_by_uuid(Uuid::from_bytes(SAMPLE_UUID))?
        .expect("x86_64 slice");
    let dwarf = DwarfFile::parse(&object)?;
    assert_eq!(
        dwarf.lookup(SAMPLE_HELPER_ADDR)?.symbol.as_deref(),
        Some("helper")
    );

    Ok(())
}

const V5_TEXT: u64 = 0x2_0000_0000;

/// Builds a DWARF 5 object whose unit uses indexed strings, indexed addresses and range lists.
///
/// - `compute`: declared without code, defined by a specification entry covering
///   `[0x1000, 0x1100)` and `[0x1300, 0x1310)`
/// - `square`: abstract instance, inlined into `compute` at `[0x1080, 0x10a0)`
/// - `cube`: only has a linkage name, at `[0x1200, 0x1240)`
///
/// There is no `__debug_aranges` section.
fn dwarf5_object() -> Vec<u8> {
    let mut strings = StringTable::new();
    let offsets = [
        strings.add("crashlog test compiler"),
        strings.add("compute"),
        strings.add("square"),
        strings.add("_ZN4math4cubeEv"),
        strings.add("lib.rs"),
        strings.add("/src/math"),
    ];

    let mut str_offsets = ByteWriter::new();
    str_offsets.u32(4 + 4 * offsets.len() as u32).u16(5).u16(0);
    for offset in offsets {
        str_offsets.u32(offset);
    }

    let addresses = [0x1000u64, 0x1080, 0x1200, 0x1300];
    let mut addr = ByteWriter::new();
    addr.u32(4 + 8 * addresses.len() as u32).u16(5).u8(8).u8(0);
    for address in addresses {
        addr.u64(V5_TEXT + address);
    }

    let mut rnglists = ByteWriter::new();
    rnglists.u32(0).u16(5).u8(8).u8(0).u32(1);
    rnglists.u32(4);
    rnglists.u8(0x04).uleb(0).uleb(0x100); // offset_pair
    rnglists.u8(0x03).uleb(3).uleb(0x10); // startx_length
    rnglists.u8(0x00);
    let length = (rnglists.len() - 4) as u32;
    rnglists.patch_u32(0, length);

    let mut abbrev = ByteWriter::new();
    abbrev.uleb(1).uleb(0x11).u8(1);
    abbrev.uleb(0x25).uleb(0x25); // producer: strx1
    abbrev.uleb(0x13).uleb(0x05); // language: data2
    abbrev.uleb(0x03).uleb(0x25); // name: strx1
    abbrev.uleb(0x72).uleb(0x17); // str_offsets_base
    abbrev.uleb(0x73).uleb(0x17); // addr_base
    abbrev.uleb(0x74).uleb(0x17); // rnglists_base
    abbrev.uleb(0x10).uleb(0x17); // stmt_list
    abbrev.uleb(0x1b).uleb(0x25); // comp_dir: strx1
    abbrev.uleb(0x11).uleb(0x1b); // low_pc: addrx
    abbrev.uleb(0x12).uleb(0x06); // high_pc: data4
    abbrev.u8(0).u8(0);
    abbrev.uleb(2).uleb(0x2e).u8(0);
    abbrev.uleb(0x03).uleb(0x25);
    abbrev.uleb(0x3c).uleb(0x19); // declaration
    abbrev.u8(0).u8(0);
    abbrev.uleb(3).uleb(0x2e).u8(1);
    abbrev.uleb(0x47).uleb(0x13); // specification: ref4
    abbrev.uleb(0x55).uleb(0x23); // ranges: rnglistx
    abbrev.u8(0).u8(0);
    abbrev.uleb(4).uleb(0x1d).u8(0);
    abbrev.uleb(0x31).uleb(0x13); // abstract_origin: ref4
    abbrev.uleb(0x11).uleb(0x29); // low_pc: addrx1
    abbrev.uleb(0x12).uleb(0x06);
    abbrev.u8(0).u8(0);
    abbrev.uleb(5).uleb(0x2e).u8(0);
    abbrev.uleb(0x03).uleb(0x25);
    abbrev.uleb(0x20).uleb(0x0b); // inline: data1
    abbrev.u8(0).u8(0);
    abbrev.uleb(6).uleb(0x2e).u8(0);
    abbrev.uleb(0x6e).uleb(0x25); // linkage_name: strx1
    abbrev.uleb(0x11).uleb(0x1b);
    abbrev.uleb(0x12).uleb(0x06);
    abbrev.u8(0).u8(0);
    abbrev.u8(0);

    // Unit-relative references count the 12-byte unit header.
    let mut dies = ByteWriter::new();
    dies.uleb(1)
        .u8(0)
        .u16(0x1c) // DW_LANG_Rust
        .u8(4)
        .u32(8)
        .u32(8)
        .u32(12)
        .u32(0)
        .u8(5)
        .uleb(0)
        .u32(0x400);
    let declaration = 12 + dies.len() as u32;
    dies.uleb(2).u8(1);
    dies.uleb(3).u32(declaration).uleb(0);
    let origin_ref = dies.len() + 1;
    dies.uleb(4).u32(0).u8(1).u32(0x20);
    dies.u8(0);
    let origin = 12 + dies.len() as u32;
    dies.uleb(5).u8(2).u8(1);
    dies.uleb(6).u8(3).uleb(2).u32(0x40);
    dies.u8(0);
    dies.patch_u32(origin_ref, origin);
    let info = compile_unit_v5(0, 8, &dies.into_bytes());

    let mut header = ByteWriter::new();
    header.u8(1).u8(1).u8(1).i8(-5).u8(14).u8(13);
    header.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    header.u8(1).uleb(0x1).uleb(0x08); // directories: path as string
    header.uleb(2).cstr("/src/math").cstr("inline");
    header.u8(2).uleb(0x1).uleb(0x08).uleb(0x2).uleb(0x0b); // files: path, directory_index
    header.uleb(2).cstr("lib.rs").u8(0).cstr("square.rs").u8(1);
    let header = header.into_bytes();

    let mut program = ByteWriter::new();
    program.u8(0).uleb(9).u8(0x02).u64(V5_TEXT + 0x1000);
    program.u8(0x04).uleb(0).u8(0x03).sleb(9).u8(0x01); // 0x1000: lib.rs:10
    program.u8(0x02).uleb(0x80).u8(0x04).uleb(1).u8(0x03).sleb(10).u8(0x01); // 0x1080: square.rs:20
    program.u8(0x02).uleb(0x20).u8(0x04).uleb(0).u8(0x03).sleb(-8).u8(0x01); // 0x10a0: lib.rs:12
    program.u8(0x02).uleb(0x160).u8(0x03).sleb(20).u8(0x01); // 0x1200: lib.rs:32
    program.u8(0x02).uleb(0x200).u8(0).uleb(1).u8(0x01); // end at 0x1400
    let program = program.into_bytes();

    let mut line = ByteWriter::new();
    line.u32((2 + 2 + 4 + header.len() + program.len()) as u32)
        .u16(5)
        .u8(8)
        .u8(0)
        .u32(header.len() as u32)
        .raw(&header)
        .raw(&program);

    MachOBuilder::new()
        .filetype(MH_DSYM)
        .segment(
            SegmentSpec::new("__TEXT", V5_TEXT, 0x2000).section(
                SectionSpec::new("__text", vec![0x90; 0x400]).at(V5_TEXT + 0x1000),
            ),
        )
        .segment(
            SegmentSpec::new("__DWARF", V5_TEXT + 0x3000, 0x10000)
                .section(SectionSpec::new("__debug_abbrev", abbrev.into_bytes()))
                .section(SectionSpec::new("__debug_info", info))
                .section(SectionSpec::new("__debug_str", strings.into_bytes()))
                .section(SectionSpec::new("__debug_str_offsets", str_offsets.into_bytes()))
                .section(SectionSpec::new("__debug_addr", addr.into_bytes()))
                .section(SectionSpec::new("__debug_rnglists", rnglists.into_bytes()))
                .section(SectionSpec::new("__debug_line", line.into_bytes())),
        )
        .build()
}

#[test]
fn test_dwarf5_unit() -> Result<(), Error> {
    let object = MachObject::parse(ByteView::from_vec(dwarf5_object()))?;
    let dwarf = DwarfFile::parse(&object)?;

    assert!(dwarf.has_section(DwarfSection::StrOffsets));
    assert!(!dwarf.has_section(DwarfSection::Aranges));

    let unit = dwarf.unit(0).unwrap();
    assert_eq!(unit.header().version, 5);
    assert_eq!(unit.name(), Some("lib.rs"));
    assert_eq!(unit.comp_dir(), Some("/src/math"));
    assert_eq!(unit.language(), Language::Rust);
    assert_eq!(unit.base_address(), V5_TEXT + 0x1000);

    let program = dwarf.line_program(0).unwrap();
    assert_eq!(program.include_directories(), ["/src/math", "inline"]);
    assert_eq!(program.file_path(1).as_deref(), Some("inline/square.rs"));

    Ok(())
}

#[test]
fn test_dwarf5_lookups() -> Result<(), Error> {
    let object = MachObject::parse(ByteView::from_vec(dwarf5_object()))?;
    let dwarf = DwarfFile::parse(&object)?;

    let lookup = |offset: u64| -> Result<_, DwarfError> {
        let data = dwarf.lookup(V5_TEXT + offset)?;
        Ok((data.symbol, data.file, data.line))
    };

    // Named through the declaration it specifies.
    assert_eq!(
        lookup(0x1010)?,
        (Some("compute".to_owned()), Some("lib.rs".to_owned()), Some(10))
    );
    // The inlined call is the innermost function.
    assert_eq!(
        lookup(0x1088)?,
        (
            Some("square".to_owned()),
            Some("inline/square.rs".to_owned()),
            Some(20)
        )
    );
    assert_eq!(
        lookup(0x10a0)?,
        (Some("compute".to_owned()), Some("lib.rs".to_owned()), Some(12))
    );
    // Second range of `compute` from `.debug_rnglists`.
    assert_eq!(
        lookup(0x1304)?,
        (Some("compute".to_owned()), Some("lib.rs".to_owned()), Some(32))
    );
    // Falls back to the linkage name.
    assert_eq!(
        lookup(0x1210)?,
        (Some("_ZN4math4cubeEv".to_owned()), Some("lib.rs".to_owned()), Some(32))
    );

    let data = dwarf.lookup(V5_TEXT + 0x1088)?;
    assert_eq!(data.abs_path.as_deref(), Some("/src/math/inline/square.rs"));
    assert_eq!(data.language, Language::Rust);

    // Covered by the unit, but by no function.
    assert!(!dwarf.lookup(V5_TEXT + 0x1250)?.found);
    assert!(!dwarf.lookup(V5_TEXT + 0x1500)?.found);

    Ok(())
}
