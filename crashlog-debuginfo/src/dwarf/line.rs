use gimli::{constants, DwForm, DwLnct, DwLne, DwLns};
use scroll::Endian;

use crashlog_common::{clean_path, join_path};

use super::DwarfError;
use crate::buffer::{to_usize, BufferError, Reader};

/// String sections referenced by DWARF 5 line program headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineStrings<'a> {
    /// `.debug_str`
    pub debug_str: &'a [u8],
    /// `.debug_line_str`
    pub debug_line_str: &'a [u8],
}

impl LineStrings<'_> {
    fn get(section: &[u8], offset: u64) -> Result<String, BufferError> {
        let mut reader = Reader::at(section, to_usize(offset, 0)?, Endian::Little)?;
        Ok(String::from_utf8_lossy(reader.cstr()?).into_owned())
    }
}

/// A file declared in the header of a line program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileEntry {
    /// The file name as recorded, usually relative to its directory.
    pub name: String,
    /// Index into the include directories of the program.
    pub directory_index: u64,
}

/// A row of the line number matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineRow {
    /// The instruction address.
    pub address: u64,
    /// Index of the source file, interpreted through [`LineProgram::file`].
    pub file_index: u64,
    /// The one-based source line, or `0` if there is no source line.
    pub line: u64,
    /// The one-based column, or `0` for the whole line.
    pub column: u64,
    /// Whether this is a recommended breakpoint location.
    pub is_stmt: bool,
    /// Marks the first address past the end of a sequence.
    pub end_sequence: bool,
}

/// A decoded line number program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineProgram {
    offset: u64,
    version: u16,
    include_directories: Vec<String>,
    files: Vec<FileEntry>,
    rows: Vec<LineRow>,
}

#[derive(Clone, Copy, Debug)]
struct ProgramHeader {
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
}

#[derive(Clone, Copy, Debug)]
struct Registers {
    address: u64,
    op_index: u64,
    file: u64,
    line: u64,
    column: u64,
    is_stmt: bool,
}

impl Registers {
    fn new(header: &ProgramHeader) -> Self {
        Registers {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: header.default_is_stmt,
        }
    }

    fn advance(&mut self, header: &ProgramHeader, operation_advance: u64) {
        let min_length = u64::from(header.minimum_instruction_length);
        let max_ops = u64::from(header.maximum_operations_per_instruction);

        if max_ops <= 1 {
            self.address = self
                .address
                .wrapping_add(min_length.wrapping_mul(operation_advance));
        } else {
            let op_index = self.op_index.wrapping_add(operation_advance);
            self.address = self
                .address
                .wrapping_add(min_length.wrapping_mul(op_index / max_ops));
            self.op_index = op_index % max_ops;
        }
    }

    fn row(&self, end_sequence: bool) -> LineRow {
        LineRow {
            address: self.address,
            file_index: self.file,
            line: self.line,
            column: self.column,
            is_stmt: self.is_stmt,
            end_sequence,
        }
    }
}

impl LineProgram {
    /// Decodes the line program at `offset` in `.debug_line`.
    ///
    /// `address_size` is used for `DW_LNE_set_address` in programs before DWARF 5, which do not
    /// declare it themselves. Rows are returned sorted by address.
    #[tracing::instrument(level = "trace", name = "LineProgram::parse", skip_all, fields(offset = offset))]
    pub fn parse(
        data: &[u8],
        offset: u64,
        endian: Endian,
        address_size: u8,
        strings: LineStrings<'_>,
    ) -> Result<Self, DwarfError> {
        let mut reader = Reader::at(data, to_usize(offset, 0)?, endian)?;
        reader.set_address_size(address_size);

        let length = reader.initial_length()?;
        let mut unit = reader.split(to_usize(length, offset as usize)?)?;

        let version = unit.u16()?;
        if !(2..=5).contains(&version) {
            return Err(DwarfError::UnsupportedVersion { version, offset });
        }

        if version >= 5 {
            let address_size = unit.u8()?;
            let _segment_selector_size = unit.u8()?;
            unit.set_address_size(address_size);
        }

        let header_length = unit.offset()?;
        let mut header_reader = unit.split(to_usize(header_length, unit.absolute_position())?)?;
        let instructions = unit;

        let header = ProgramHeader {
            minimum_instruction_length: header_reader.u8()?,
            maximum_operations_per_instruction: if version >= 4 {
                header_reader.u8()?
            } else {
                1
            },
            default_is_stmt: header_reader.u8()? != 0,
            line_base: header_reader.i8()?,
            line_range: header_reader.u8()?,
            opcode_base: header_reader.u8()?,
        };

        if header.line_range == 0 {
            return Err(DwarfError::InvalidLineProgram { offset });
        }

        let standard_opcode_lengths = header_reader
            .bytes(usize::from(header.opcode_base.saturating_sub(1)))?;

        let (include_directories, files) = if version >= 5 {
            let directories = read_entries(&mut header_reader, strings)?
                .into_iter()
                .map(|entry| entry.name)
                .collect();
            let files = read_entries(&mut header_reader, strings)?;
            (directories, files)
        } else {
            read_legacy_entries(&mut header_reader)?
        };

        let mut program = LineProgram {
            offset,
            version,
            include_directories,
            files,
            rows: Vec::new(),
        };
        program.run(instructions, &header, standard_opcode_lengths)?;
        program
            .rows
            .sort_by_key(|row| (row.address, !row.end_sequence));

        tracing::trace!(rows = program.rows.len(), "decoded line program");
        Ok(program)
    }

    fn run(
        &mut self,
        mut reader: Reader<'_>,
        header: &ProgramHeader,
        standard_opcode_lengths: &[u8],
    ) -> Result<(), DwarfError> {
        let mut registers = Registers::new(header);

        while !reader.is_empty() {
            let opcode = reader.u8()?;

            if opcode >= header.opcode_base {
                let adjusted = opcode - header.opcode_base;
                let line_advance =
                    i64::from(header.line_base) + i64::from(adjusted % header.line_range);
                registers.advance(header, u64::from(adjusted / header.line_range));
                registers.line = registers.line.wrapping_add_signed(line_advance);
                self.rows.push(registers.row(false));
                continue;
            }

            match DwLns(opcode) {
                DwLns(0) => self.run_extended(&mut reader, header, &mut registers)?,
                constants::DW_LNS_copy => self.rows.push(registers.row(false)),
                constants::DW_LNS_advance_pc => {
                    let advance = reader.uleb128()?;
                    registers.advance(header, advance);
                }
                constants::DW_LNS_advance_line => {
                    let advance = reader.sleb128()?;
                    registers.line = registers.line.wrapping_add_signed(advance);
                }
                constants::DW_LNS_set_file => registers.file = reader.uleb128()?,
                constants::DW_LNS_set_column => registers.column = reader.uleb128()?,
                constants::DW_LNS_negate_stmt => registers.is_stmt = !registers.is_stmt,
                constants::DW_LNS_set_basic_block
                | constants::DW_LNS_set_prologue_end
                | constants::DW_LNS_set_epilogue_begin => {}
                constants::DW_LNS_const_add_pc => {
                    let adjusted = 255 - header.opcode_base;
                    registers.advance(header, u64::from(adjusted / header.line_range));
                }
                constants::DW_LNS_fixed_advance_pc => {
                    let advance = reader.u16()?;
                    registers.address = registers.address.wrapping_add(u64::from(advance));
                    registers.op_index = 0;
                }
                constants::DW_LNS_set_isa => {
                    reader.uleb128()?;
                }
                DwLns(opcode) => {
                    let args = standard_opcode_lengths
                        .get(usize::from(opcode) - 1)
                        .copied()
                        .unwrap_or_default();
                    for _ in 0..args {
                        reader.uleb128()?;
                    }
                }
            }
        }

        Ok(())
    }

    fn run_extended(
        &mut self,
        reader: &mut Reader<'_>,
        header: &ProgramHeader,
        registers: &mut Registers,
    ) -> Result<(), DwarfError> {
        let length = reader.uleb128()?;
        let length = to_usize(length, reader.absolute_position())?;
        if length == 0 {
            return Ok(());
        }

        let mut instruction = reader.split(length)?;
        match DwLne(instruction.u8()?) {
            constants::DW_LNE_end_sequence => {
                self.rows.push(registers.row(true));
                *registers = Registers::new(header);
            }
            constants::DW_LNE_set_address => {
                registers.address = instruction.uint((length - 1) as u8)?;
                registers.op_index = 0;
            }
            constants::DW_LNE_define_file => {
                let name = String::from_utf8_lossy(instruction.cstr()?).into_owned();
                let directory_index = instruction.uleb128()?;
                self.files.push(FileEntry {
                    name,
                    directory_index,
                });
            }
            // DW_LNE_set_discriminator and vendor extensions carry nothing we record.
            _ => {}
        }

        Ok(())
    }

    /// Offset of this program in `.debug_line`.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The DWARF version of this program.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// All rows, sorted by address.
    pub fn rows(&self) -> &[LineRow] {
        &self.rows
    }

    /// Include directories in declaration order.
    pub fn include_directories(&self) -> &[String] {
        &self.include_directories
    }

    /// Files in declaration order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Resolves a file index. Indices are zero-based in DWARF 5 and one-based before.
    pub fn file(&self, index: u64) -> Option<&FileEntry> {
        let index = self.adjust_index(index)?;
        self.files.get(index)
    }

    /// Resolves a directory index. Index `0` denotes the compilation directory before DWARF 5.
    pub fn directory(&self, index: u64) -> Option<&str> {
        let index = self.adjust_index(index)?;
        self.include_directories.get(index).map(String::as_str)
    }

    fn adjust_index(&self, index: u64) -> Option<usize> {
        let index = usize::try_from(index).ok()?;
        if self.version >= 5 {
            Some(index)
        } else {
            index.checked_sub(1)
        }
    }

    /// The path of a file as recorded, joined with its include directory.
    ///
    /// Files in the compilation directory (directory index `0`) are returned as recorded.
    pub fn file_path(&self, index: u64) -> Option<String> {
        let file = self.file(index)?;
        let directory = match file.directory_index {
            0 => None,
            index => self.directory(index),
        };

        Some(match directory {
            Some(directory) => join_path(directory, &file.name),
            None => file.name.clone(),
        })
    }

    /// The absolute path of a file, resolved against the compilation directory and normalized.
    pub fn absolute_path(&self, index: u64, comp_dir: Option<&str>) -> Option<String> {
        let path = self.file_path(index)?;
        let path = join_path(comp_dir.unwrap_or_default(), &path);
        Some(clean_path(&path).into_owned())
    }

    /// Returns the row describing the instruction at `address`.
    ///
    /// This is the last row at or before the address, unless that row ends a sequence.
    pub fn row_for_address(&self, address: u64) -> Option<&LineRow> {
        let index = self.rows.partition_point(|row| row.address <= address);
        let row = self.rows.get(index.checked_sub(1)?)?;
        (!row.end_sequence).then_some(row)
    }
}

fn read_legacy_entries(
    reader: &mut Reader<'_>,
) -> Result<(Vec<String>, Vec<FileEntry>), BufferError> {
    let mut directories = Vec::new();
    loop {
        let directory = reader.cstr()?;
        if directory.is_empty() {
            break;
        }
        directories.push(String::from_utf8_lossy(directory).into_owned());
    }

    let mut files = Vec::new();
    loop {
        let name = reader.cstr()?;
        if name.is_empty() {
            break;
        }
        let directory_index = reader.uleb128()?;
        let _modification_time = reader.uleb128()?;
        let _length = reader.uleb128()?;
        files.push(FileEntry {
            name: String::from_utf8_lossy(name).into_owned(),
            directory_index,
        });
    }

    Ok((directories, files))
}

/// Reads a DWARF 5 entry format description followed by the entries it describes.
fn read_entries(
    reader: &mut Reader<'_>,
    strings: LineStrings<'_>,
) -> Result<Vec<FileEntry>, DwarfError> {
    let format_count = reader.u8()?;
    let mut formats = Vec::with_capacity(usize::from(format_count));
    for _ in 0..format_count {
        let content_type = DwLnct(reader.uleb128()? as u16);
        let form = DwForm(reader.uleb128()? as u16);
        formats.push((content_type, form));
    }

    let count = reader.uleb128()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let mut entry = FileEntry::default();
        for &(content_type, form) in &formats {
            let value = read_entry_value(reader, form, strings)?;
            match (content_type, value) {
                (constants::DW_LNCT_path, EntryValue::String(name)) => entry.name = name,
                (constants::DW_LNCT_directory_index, EntryValue::Unsigned(index)) => {
                    entry.directory_index = index
                }
                _ => {}
            }
        }
        entries.push(entry);
    }

    Ok(entries)
}

enum EntryValue {
    String(String),
    Unsigned(u64),
    Other,
}

fn read_entry_value(
    reader: &mut Reader<'_>,
    form: DwForm,
    strings: LineStrings<'_>,
) -> Result<EntryValue, DwarfError> {
    let offset = reader.absolute_position();
    Ok(match form {
        constants::DW_FORM_string => {
            EntryValue::String(String::from_utf8_lossy(reader.cstr()?).into_owned())
        }
        constants::DW_FORM_line_strp => {
            let offset = reader.offset()?;
            EntryValue::String(LineStrings::get(strings.debug_line_str, offset)?)
        }
        constants::DW_FORM_strp => {
            let offset = reader.offset()?;
            EntryValue::String(LineStrings::get(strings.debug_str, offset)?)
        }
        constants::DW_FORM_udata => EntryValue::Unsigned(reader.uleb128()?),
        constants::DW_FORM_data1 => EntryValue::Unsigned(reader.uint(1)?),
        constants::DW_FORM_data2 => EntryValue::Unsigned(reader.uint(2)?),
        constants::DW_FORM_data4 => EntryValue::Unsigned(reader.uint(4)?),
        constants::DW_FORM_data8 => EntryValue::Unsigned(reader.uint(8)?),
        constants::DW_FORM_data16 => {
            reader.skip(16)?;
            EntryValue::Other
        }
        constants::DW_FORM_block => {
            let len = reader.uleb128()?;
            reader.skip(to_usize(len, offset)?)?;
            EntryValue::Other
        }
        _ => {
            return Err(DwarfError::UnknownForm {
                form: form.0,
                offset: offset as u64,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crashlog_testutils::{line_program_v4, sample_sections, special_opcode, ByteWriter};

    fn row(address: u64, line: u64) -> LineRow {
        LineRow {
            address,
            file_index: 1,
            line,
            column: 0,
            is_stmt: true,
            end_sequence: false,
        }
    }

    #[test]
    fn test_sample_program() {
        let sections = sample_sections();
        let program = LineProgram::parse(
            &sections.line,
            0,
            Endian::Little,
            8,
            LineStrings::default(),
        )
        .unwrap();

        assert_eq!(program.version(), 4);
        assert_eq!(
            program.files(),
            [FileEntry {
                name: "main.c".into(),
                directory_index: 0,
            }]
        );

        let base = 0x1_0000_0000;
        assert_eq!(
            program.rows(),
            [
                row(base + 0x1000, 40),
                row(base + 0x1010, 41),
                row(base + 0x1020, 42),
                row(base + 0x1040, 43),
                row(base + 0x1080, 50),
                row(base + 0x1100, 60),
                LineRow {
                    end_sequence: true,
                    ..row(base + 0x1200, 60)
                },
            ]
        );

        assert_eq!(program.row_for_address(base + 0x1024).map(|r| r.line), Some(42));
        assert_eq!(program.row_for_address(base + 0x11ff).map(|r| r.line), Some(60));
        assert_eq!(program.row_for_address(base + 0x1200), None);
        assert_eq!(program.row_for_address(base + 0xfff), None);

        assert_eq!(program.file_path(1).as_deref(), Some("main.c"));
        assert_eq!(
            program.absolute_path(1, Some("/src/app")).as_deref(),
            Some("/src/app/main.c")
        );
        assert_eq!(program.file_path(0), None);
    }

    #[test]
    fn test_sequences_are_sorted() {
        let mut w = ByteWriter::new();
        w.u8(0).uleb(9).u8(0x02).u64(0x2000);
        w.u8(0x01);
        w.u8(0x02).uleb(0x10).u8(0).uleb(1).u8(0x01);
        w.u8(0).uleb(9).u8(0x02).u64(0x1ff0);
        w.u8(0x03).sleb(9).u8(0x01);
        w.u8(0x02).uleb(0x10).u8(0).uleb(1).u8(0x01);
        let data = line_program_v4(&["include"], &[("a.c", 0), ("b.h", 1)], &w.into_bytes());

        let program =
            LineProgram::parse(&data, 0, Endian::Little, 8, LineStrings::default()).unwrap();

        let addresses: Vec<_> = program
            .rows()
            .iter()
            .map(|row| (row.address, row.end_sequence))
            .collect();
        assert_eq!(
            addresses,
            [(0x1ff0, false), (0x2000, true), (0x2000, false), (0x2010, true)]
        );

        assert_eq!(program.row_for_address(0x2000).map(|r| r.line), Some(1));
        assert_eq!(program.row_for_address(0x1fff).map(|r| r.line), Some(10));

        assert_eq!(program.file_path(2).as_deref(), Some("include/b.h"));
        assert_eq!(
            program.absolute_path(2, Some("/src/./app")).as_deref(),
            Some("/src/app/include/b.h")
        );
    }

    #[test]
    fn test_standard_opcodes() {
        let mut w = ByteWriter::new();
        w.u8(0).uleb(9).u8(0x02).u64(0x1000);
        w.u8(0x05).uleb(7); // set_column
        w.u8(0x06); // negate_stmt
        w.u8(0x04).uleb(2); // set_file
        w.u8(0x08); // const_add_pc: (255 - 13) / 14 = 17
        w.u8(0x01);
        w.u8(0x09).u16(0x100); // fixed_advance_pc
        w.u8(0x0a).u8(0x0b).u8(0x07); // prologue_end, epilogue_begin, basic_block
        w.u8(0x0c).uleb(1); // set_isa
        w.u8(0).uleb(2).u8(0x04).uleb(3); // set_discriminator
        w.u8(special_opcode(2, -5));
        w.u8(0x02).uleb(1).u8(0).uleb(1).u8(0x01);
        let data = line_program_v4(&[], &[("a.c", 0), ("b.c", 0)], &w.into_bytes());

        let program =
            LineProgram::parse(&data, 0, Endian::Little, 8, LineStrings::default()).unwrap();
        let rows = program.rows();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].address, 0x1011);
        assert_eq!(rows[0].file_index, 2);
        assert_eq!(rows[0].column, 7);
        assert!(!rows[0].is_stmt);

        assert_eq!(rows[1].address, 0x1113);
        assert_eq!(rows[1].line, 1u64.wrapping_add_signed(-5));
        assert_eq!(rows[2].address, 0x1114);
        assert!(rows[2].end_sequence);
    }

    #[test]
    fn test_unknown_standard_opcode_is_skipped() {
        let mut header = ByteWriter::new();
        header
            .u8(4) // minimum_instruction_length
            .u8(1)
            .i8(-3)
            .u8(12)
            .u8(14) // opcode_base, declaring opcode 13
            .raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1, 2])
            .u8(0)
            .cstr("x.c")
            .uleb(0)
            .uleb(0)
            .uleb(0)
            .u8(0);
        let header = header.into_bytes();

        let mut program = ByteWriter::new();
        program.u8(0).uleb(5).u8(0x02).u32(0x400);
        program.u8(13).uleb(0x1234).uleb(1); // unknown, two operands
        program.u8(0x02).uleb(2).u8(0x01); // 2 instructions of 4 bytes
        program.u8(0x02).uleb(1).u8(0).uleb(1).u8(0x01);
        let program = program.into_bytes();

        let mut w = ByteWriter::new();
        w.u32((2 + 4 + header.len() + program.len()) as u32)
            .u16(3)
            .u32(header.len() as u32)
            .raw(&header)
            .raw(&program);
        let data = w.into_bytes();

        let program =
            LineProgram::parse(&data, 0, Endian::Little, 4, LineStrings::default()).unwrap();
        assert_eq!(program.rows()[0].address, 0x408);
        assert_eq!(program.rows()[1].address, 0x40c);
        assert!(program.rows()[1].end_sequence);
    }

    #[test]
    fn test_dwarf5_header() {
        let mut line_str = ByteWriter::new();
        line_str.cstr("/src/app").cstr("lib").cstr("main.c").cstr("util.h");
        let line_str = line_str.into_bytes();

        let mut header = ByteWriter::new();
        header.u8(1).u8(1).u8(1).i8(-5).u8(14).u8(13);
        header.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        // directories: path as line_strp
        header.u8(1).uleb(0x1).uleb(0x1f);
        header.uleb(2).u32(0).u32(9);
        // files: path as line_strp, directory index as udata, MD5 as data16
        header.u8(3);
        header.uleb(0x1).uleb(0x1f);
        header.uleb(0x2).uleb(0x0f);
        header.uleb(0x5).uleb(0x1e);
        header.uleb(2);
        header.u32(13).uleb(0).raw(&[0xab; 16]);
        header.u32(20).uleb(1).raw(&[0xcd; 16]);
        let header = header.into_bytes();

        let mut program = ByteWriter::new();
        program.u8(0).uleb(9).u8(0x02).u64(0x1000);
        program.u8(0x04).uleb(1).u8(0x01);
        program.u8(0x02).uleb(4).u8(0).uleb(1).u8(0x01);
        let program = program.into_bytes();

        let mut w = ByteWriter::new();
        w.u32((2 + 2 + 4 + header.len() + program.len()) as u32)
            .u16(5)
            .u8(8)
            .u8(0)
            .u32(header.len() as u32)
            .raw(&header)
            .raw(&program);
        let data = w.into_bytes();

        let strings = LineStrings {
            debug_str: &[],
            debug_line_str: &line_str,
        };
        let program = LineProgram::parse(&data, 0, Endian::Little, 4, strings).unwrap();

        assert_eq!(program.version(), 5);
        assert_eq!(program.include_directories(), ["/src/app", "lib"]);
        assert_eq!(program.file(0).map(|f| f.name.as_str()), Some("main.c"));
        assert_eq!(program.file_path(1).as_deref(), Some("lib/util.h"));
        assert_eq!(
            program.absolute_path(1, Some("/src/app")).as_deref(),
            Some("/src/app/lib/util.h")
        );
        assert_eq!(program.row_for_address(0x1002).map(|r| r.file_index), Some(1));
    }

    #[test]
    fn test_unsupported_version() {
        let mut w = ByteWriter::new();
        w.u32(2).u16(9);
        let error = LineProgram::parse(&w.into_bytes(), 0, Endian::Little, 8, LineStrings::default())
            .unwrap_err();
        assert!(matches!(
            error,
            DwarfError::UnsupportedVersion {
                version: 9,
                offset: 0
            }
        ));
    }
}
