//! The line-number program state machine. Grounded line-for-line in the original `parse_line_table`'s
//! opcode dispatch: standard opcodes 1-12, the four extended opcodes, and
//! the special-opcode address/line advance formula, running against a
//! header of include directories and file-name entries.

use crate::elf::Elf;
use crate::error::Result;
use crate::types::FileAddr;

use super::cursor::Cursor;

const DW_LNS_COPY: u8 = 1;
const DW_LNS_ADVANCE_PC: u8 = 2;
const DW_LNS_ADVANCE_LINE: u8 = 3;
const DW_LNS_SET_FILE: u8 = 4;
const DW_LNS_SET_COLUMN: u8 = 5;
const DW_LNS_NEGATE_STMT: u8 = 6;
const DW_LNS_SET_BASIC_BLOCK: u8 = 7;
const DW_LNS_CONST_ADD_PC: u8 = 8;
const DW_LNS_FIXED_ADVANCE_PC: u8 = 9;
const DW_LNS_SET_PROLOGUE_END: u8 = 10;
const DW_LNS_SET_EPILOGUE_BEGIN: u8 = 11;
const DW_LNS_SET_ISA: u8 = 12;

const DW_LNE_END_SEQUENCE: u8 = 1;
const DW_LNE_SET_ADDRESS: u8 = 2;
const DW_LNE_DEFINE_FILE: u8 = 3;
const DW_LNE_SET_DISCRIMINATOR: u8 = 4;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub dir_index: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LineEntry {
    pub address: FileAddr,
    pub file_index: u64,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub basic_block_start: bool,
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub discriminator: u64,
}

#[derive(Debug)]
struct Header {
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    standard_opcode_lengths: Vec<u8>,
    program_start: usize,
    program_end: usize,
}

pub struct LineTable {
    pub file_names: Vec<FileEntry>,
    pub include_directories: Vec<String>,
    pub entries: Vec<LineEntry>,
}

struct Registers {
    address: u64,
    op_index: u64,
    file: u64,
    line: i64,
    column: u64,
    is_stmt: bool,
    basic_block_start: bool,
    end_sequence: bool,
    prologue_end: bool,
    epilogue_begin: bool,
    discriminator: u64,
}

impl Registers {
    fn initial(default_is_stmt: bool) -> Self {
        Registers {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block_start: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            discriminator: 0,
        }
    }

    /// Resets the per-row flags a line entry carries once it's been
    /// appended, per the line-number program's append-then-reset semantics.
    fn reset_row_flags(&mut self) {
        self.basic_block_start = false;
        self.prologue_end = false;
        self.epilogue_begin = false;
        self.discriminator = 0;
    }
}

pub fn parse_line_table(
    debug_line: &[u8],
    offset: u64,
    elf: &Elf,
    address_size: u8,
) -> Result<LineTable> {
    let mut cursor = Cursor::at(debug_line, offset as usize);
    let unit_length = cursor.u32()? as usize;
    let unit_end = cursor.pos() + unit_length;
    let _version = cursor.u16()?;
    let header_length = cursor.u32()? as usize;
    let program_start = cursor.pos() + header_length;

    let minimum_instruction_length = cursor.u8()?;
    let maximum_operations_per_instruction = cursor.u8()?;
    let default_is_stmt = cursor.u8()? != 0;
    let line_base = cursor.s8()?;
    let line_range = cursor.u8()?;
    let opcode_base = cursor.u8()?;
    let mut standard_opcode_lengths = Vec::with_capacity(opcode_base as usize - 1);
    for _ in 1..opcode_base {
        standard_opcode_lengths.push(cursor.u8()?);
    }

    let mut include_directories = Vec::new();
    loop {
        let dir = cursor.string()?;
        if dir.is_empty() {
            break;
        }
        include_directories.push(dir);
    }

    let mut file_names = vec![FileEntry {
        name: String::new(),
        dir_index: 0,
    }];
    loop {
        let name = cursor.string()?;
        if name.is_empty() {
            break;
        }
        let dir_index = cursor.uleb128()?;
        let _mtime = cursor.uleb128()?;
        let _length = cursor.uleb128()?;
        file_names.push(FileEntry { name, dir_index });
    }

    let header = Header {
        minimum_instruction_length,
        maximum_operations_per_instruction: maximum_operations_per_instruction.max(1),
        default_is_stmt,
        line_base,
        line_range,
        opcode_base,
        standard_opcode_lengths,
        program_start,
        program_end: unit_end,
    };

    let entries = run_program(debug_line, &header, elf, address_size)?;

    Ok(LineTable {
        file_names,
        include_directories,
        entries,
    })
}

fn run_program(
    debug_line: &[u8],
    header: &Header,
    elf: &Elf,
    address_size: u8,
) -> Result<Vec<LineEntry>> {
    let mut cursor = Cursor::at(debug_line, header.program_start);
    let mut regs = Registers::initial(header.default_is_stmt);
    let mut entries = Vec::new();

    let emit = |regs: &Registers, entries: &mut Vec<LineEntry>| {
        entries.push(LineEntry {
            address: FileAddr::new(elf, regs.address),
            file_index: regs.file,
            line: regs.line.max(0) as u64,
            column: regs.column,
            is_stmt: regs.is_stmt,
            basic_block_start: regs.basic_block_start,
            end_sequence: regs.end_sequence,
            prologue_end: regs.prologue_end,
            epilogue_begin: regs.epilogue_begin,
            discriminator: regs.discriminator,
        });
    };

    let advance_address = |regs: &mut Registers, operation_advance: u64, header: &Header| {
        let max_ops = header.maximum_operations_per_instruction as u64;
        let new_op_index = regs.op_index + operation_advance;
        regs.address += header.minimum_instruction_length as u64 * (new_op_index / max_ops);
        regs.op_index = new_op_index % max_ops;
    };

    while cursor.pos() < header.program_end {
        let opcode = cursor.u8()?;
        if opcode == 0 {
            // Extended opcode.
            let len = cursor.uleb128()? as usize;
            let sub_start = cursor.pos();
            let sub_opcode = cursor.u8()?;
            match sub_opcode {
                DW_LNE_END_SEQUENCE => {
                    regs.end_sequence = true;
                    emit(&regs, &mut entries);
                    regs = Registers::initial(header.default_is_stmt);
                }
                DW_LNE_SET_ADDRESS => {
                    regs.address = cursor.address(address_size)?;
                    regs.op_index = 0;
                }
                DW_LNE_DEFINE_FILE => {
                    let _name = cursor.string()?;
                    let _dir = cursor.uleb128()?;
                    let _mtime = cursor.uleb128()?;
                    let _length = cursor.uleb128()?;
                }
                DW_LNE_SET_DISCRIMINATOR => {
                    regs.discriminator = cursor.uleb128()?;
                }
                _ => {}
            }
            // Skip any padding the producer left in this extended
            // instruction that we didn't interpret above.
            let consumed = cursor.pos() - sub_start;
            if consumed < len {
                cursor.skip(len - consumed);
            }
        } else if opcode < header.opcode_base {
            match opcode {
                DW_LNS_COPY => {
                    emit(&regs, &mut entries);
                    regs.reset_row_flags();
                }
                DW_LNS_ADVANCE_PC => {
                    let advance = cursor.uleb128()?;
                    advance_address(&mut regs, advance, header);
                }
                DW_LNS_ADVANCE_LINE => {
                    regs.line += cursor.sleb128()?;
                }
                DW_LNS_SET_FILE => {
                    regs.file = cursor.uleb128()?;
                }
                DW_LNS_SET_COLUMN => {
                    regs.column = cursor.uleb128()?;
                }
                DW_LNS_NEGATE_STMT => {
                    regs.is_stmt = !regs.is_stmt;
                }
                DW_LNS_SET_BASIC_BLOCK => {
                    regs.basic_block_start = true;
                }
                DW_LNS_CONST_ADD_PC => {
                    let adjusted = 255 - header.opcode_base;
                    let advance = (adjusted / header.line_range) as u64;
                    advance_address(&mut regs, advance, header);
                }
                DW_LNS_FIXED_ADVANCE_PC => {
                    regs.address += cursor.u16()? as u64;
                    regs.op_index = 0;
                }
                DW_LNS_SET_PROLOGUE_END => {
                    regs.prologue_end = true;
                }
                DW_LNS_SET_EPILOGUE_BEGIN => {
                    regs.epilogue_begin = true;
                }
                DW_LNS_SET_ISA => {
                    let _isa = cursor.uleb128()?;
                }
                other => {
                    // Unknown standard opcode: skip its declared operands.
                    let nargs = header
                        .standard_opcode_lengths
                        .get(other as usize - 1)
                        .copied()
                        .unwrap_or(0);
                    for _ in 0..nargs {
                        cursor.uleb128()?;
                    }
                }
            }
        } else {
            let adjusted = opcode - header.opcode_base;
            let addr_advance = (adjusted / header.line_range) as u64;
            let line_advance = header.line_base as i64 + (adjusted % header.line_range) as i64;
            advance_address(&mut regs, addr_advance, header);
            regs.line += line_advance;
            emit(&regs, &mut entries);
            regs.reset_row_flags();
        }
    }

    Ok(entries)
}

impl LineTable {
    pub fn get_entry_by_address(&self, addr: FileAddr) -> Option<&LineEntry> {
        let mut best: Option<&LineEntry> = None;
        for pair in self.entries.windows(2) {
            let (start, end) = (&pair[0], &pair[1]);
            if !start.end_sequence && addr >= start.address && addr < end.address {
                best = Some(start);
            }
        }
        best
    }

    pub fn entries_for_file_line(&self, file_index: u64, line: u64) -> Vec<&LineEntry> {
        self.entries
            .iter()
            .filter(|e| !e.end_sequence && e.file_index == file_index && e.line == line)
            .collect()
    }

    pub fn file_name(&self, index: u64) -> Option<&str> {
        self.file_names.get(index as usize).map(|f| f.name.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    /// A minimal ELF64 image with a single `.text` section covering
    /// `[0x1000, 0x3000)`, so `FileAddr::to_virt_addr` has a containing
    /// section for the addresses the line-number program below emits.
    fn write_min_elf_with_text_section() -> tempfile::NamedTempFile {
        let mut shstrtab: Vec<u8> = vec![0];
        let off_shstrtab = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        let off_text = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".text\0");

        let shoff = 64usize;
        let shnum = 3usize; // null, .shstrtab, .text
        let shentsize = 64usize;
        let shstrtab_off = shoff + shnum * shentsize;

        let mut bytes = vec![0u8; shstrtab_off + shstrtab.len()];
        bytes[0..4].copy_from_slice(b"\x7fELF");
        bytes[4] = 2;
        bytes[5] = 1;
        bytes[16..18].copy_from_slice(&2u16.to_le_bytes());
        bytes[24..32].copy_from_slice(&0x1000u64.to_le_bytes());
        bytes[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        bytes[58..60].copy_from_slice(&(shentsize as u16).to_le_bytes());
        bytes[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        bytes[62..64].copy_from_slice(&1u16.to_le_bytes());

        fn write_shdr(buf: &mut [u8], idx: usize, name_off: u32, sh_type: u32, addr: u64, offset: u64, size: u64) {
            let base = 64 + idx * 64;
            buf[base..base + 4].copy_from_slice(&name_off.to_le_bytes());
            buf[base + 4..base + 8].copy_from_slice(&sh_type.to_le_bytes());
            buf[base + 16..base + 24].copy_from_slice(&addr.to_le_bytes());
            buf[base + 24..base + 32].copy_from_slice(&offset.to_le_bytes());
            buf[base + 32..base + 40].copy_from_slice(&size.to_le_bytes());
            buf[base + 48..base + 56].copy_from_slice(&1u64.to_le_bytes());
        }
        write_shdr(&mut bytes, 1, off_shstrtab, 3, 0, shstrtab_off as u64, shstrtab.len() as u64);
        write_shdr(&mut bytes, 2, off_text, 1, 0x1000, 0, 0x2000);

        bytes[shstrtab_off..shstrtab_off + shstrtab.len()].copy_from_slice(&shstrtab);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    /// Builds a `.debug_line` program: `set_address(0x1000)`, `copy`
    /// (line 1), `advance_line(+1)`, `advance_pc(0x10)`, `copy` (line 2),
    /// `end_sequence`.
    fn build_debug_line_program() -> Vec<u8> {
        let mut program = Vec::new();
        program.push(0x00); // extended opcode
        program.push(9); // length: 1 (sub-opcode) + 8 (address)
        program.push(DW_LNE_SET_ADDRESS);
        program.extend_from_slice(&0x1000u64.to_le_bytes());
        program.push(DW_LNS_COPY);
        program.push(DW_LNS_ADVANCE_LINE);
        program.push(0x01); // sleb128(+1)
        program.push(DW_LNS_ADVANCE_PC);
        program.push(0x10); // uleb128(0x10)
        program.push(DW_LNS_COPY);
        program.push(0x00); // extended opcode
        program.push(1);
        program.push(DW_LNE_END_SEQUENCE);
        program
    }

    fn build_debug_line_section() -> Vec<u8> {
        let standard_opcode_lengths: [u8; 12] = [0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

        let mut post_header: Vec<u8> = Vec::new();
        post_header.push(1); // minimum_instruction_length
        post_header.push(1); // maximum_operations_per_instruction
        post_header.push(1); // default_is_stmt
        post_header.push(0xfbu8); // line_base = -5
        post_header.push(14); // line_range
        post_header.push(13); // opcode_base
        post_header.extend_from_slice(&standard_opcode_lengths);
        post_header.push(0x00); // include_directories terminator (none)
        post_header.extend_from_slice(b"test.c\0");
        post_header.push(0x00); // dir_index
        post_header.push(0x00); // mtime
        post_header.push(0x00); // length
        post_header.push(0x00); // file_names terminator

        let header_length = post_header.len() as u32;
        let program = build_debug_line_program();

        let mut rest = Vec::new();
        rest.extend_from_slice(&4u16.to_le_bytes()); // version
        rest.extend_from_slice(&header_length.to_le_bytes());
        rest.extend_from_slice(&post_header);
        rest.extend_from_slice(&program);

        let unit_length = rest.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&unit_length.to_le_bytes());
        out.extend_from_slice(&rest);
        out
    }

    #[test]
    fn interprets_line_number_program() {
        let file = write_min_elf_with_text_section();
        let elf = crate::elf::Elf::parse(file.path()).unwrap();
        let debug_line = build_debug_line_section();

        let table = parse_line_table(&debug_line, 0, &elf, 8).unwrap();
        assert_eq!(table.entries.len(), 3);

        assert_eq!(table.entries[0].address.addr(), 0x1000);
        assert_eq!(table.entries[0].line, 1);
        assert!(!table.entries[0].end_sequence);

        assert_eq!(table.entries[1].address.addr(), 0x1010);
        assert_eq!(table.entries[1].line, 2);
        assert!(!table.entries[1].end_sequence);

        assert_eq!(table.entries[2].address.addr(), 0x1010);
        assert!(table.entries[2].end_sequence);

        let at_1005 = table.get_entry_by_address(crate::types::FileAddr::new(&elf, 0x1005)).unwrap();
        assert_eq!(at_1005.line, 1);

        let for_line2 = table.entries_for_file_line(1, 2);
        assert_eq!(for_line2.len(), 1);
        assert_eq!(table.file_name(1), Some("test.c"));
    }
}
