//! The DWARF engine. Ties together the
//! cursor/abbrev/DIE/line-table/range-list pieces of the sibling modules
//! into the one object the symbolic target talks to: parse every compile
//! unit in `.debug_info` up front, build a flat "arena + index handles"
//! DIE arena, and index every function-shaped DIE once on first use.
//!
//! Grounded in the original `dwarf.cpp`'s `Dwarf` class: `compile_units()`,
//! `compile_unit_containing_address`, `function_containing_address`,
//! `find_functions`, and the lazy `index()` pass that walks every CU once.

pub mod abbrev;
pub mod attr;
pub mod compile_unit;
pub mod cursor;
pub mod die;
pub mod line_table;
pub mod range_list;

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::elf::Elf;
use crate::error::{Error, Result};
use crate::types::FileAddr;

use abbrev::AbbrevTable;
use attr::{AttrValue, FormContext};
use compile_unit::CompileUnit;
use cursor::Cursor;
use die::{Die, DieData, DieHandle, DW_TAG_INLINED_SUBROUTINE, DW_TAG_SUBPROGRAM};

/// Owns every compile unit and DIE parsed out of a single ELF image's
/// `.debug_*` sections, plus a one-shot function-name index built lazily
/// on first lookup.
pub struct Dwarf {
    elf: *const Elf,
    pub(crate) compile_units: Vec<CompileUnit>,
    pub(crate) dies: Vec<DieData>,
    pub(crate) debug_ranges: Vec<u8>,
    abbrev_cache: HashMap<u64, AbbrevTable>,
    function_index: OnceLock<HashMap<String, Vec<DieHandle>>>,
}

unsafe impl Send for Dwarf {}
unsafe impl Sync for Dwarf {}

impl Dwarf {
    /// Parses every compile unit out of `elf`'s `.debug_info`. Matches the
    /// original `Dwarf::Dwarf`'s eager "walk every CU, parse its root DIE
    /// header" pass; everything below the root DIE is still parsed eagerly
    /// here too, since the flat arena shape needs every DIE up
    /// front rather than a lazily-expanding tree.
    pub fn parse(elf: &Elf) -> Result<Self> {
        let debug_info = section_bytes(elf, ".debug_info");
        let debug_abbrev = section_bytes(elf, ".debug_abbrev").to_vec();
        let debug_str = section_bytes(elf, ".debug_str").to_vec();
        let debug_line = section_bytes(elf, ".debug_line").to_vec();
        let debug_ranges = section_bytes(elf, ".debug_ranges").to_vec();

        let mut dwarf = Dwarf {
            elf: elf as *const Elf,
            compile_units: Vec::new(),
            dies: Vec::new(),
            debug_ranges,
            abbrev_cache: HashMap::new(),
            function_index: OnceLock::new(),
        };

        let mut pos = 0usize;
        while pos + 11 <= debug_info.len() {
            let unit_offset = pos as u64;
            let mut header = Cursor::at(&debug_info, pos);
            let unit_length = header.u32()? as u64;
            if unit_length == 0 {
                break;
            }
            let version = header.u16()?;
            if version != 4 {
                return Err(Error::format(format!(
                    "unsupported DWARF version {version}, only DWARF4 is supported"
                )));
            }
            let abbrev_offset = header.u32()? as u64;
            let address_size = header.u8()?;
            if address_size != 8 {
                return Err(Error::format(format!(
                    "unsupported DWARF address size {address_size}, only 8 is supported"
                )));
            }

            let abbrev_table = dwarf
                .abbrev_cache
                .entry(abbrev_offset)
                .or_insert_with(|| {
                    abbrev::parse_abbrev_table(&debug_abbrev, abbrev_offset).unwrap_or_default()
                })
                .clone();

            let root_start = unit_offset + 11;
            let ctx = FormContext {
                debug_str: &debug_str,
                debug_info: &debug_info,
                cu_offset: unit_offset,
                address_size,
                version,
            };
            let cu_index = dwarf.compile_units.len();
            let root = parse_die_tree(
                &mut dwarf.dies,
                &debug_info,
                root_start as usize,
                cu_index,
                &abbrev_table,
                &ctx,
                None,
            )?
            .ok_or_else(|| Error::format("compile unit has no root DIE"))?;

            let low_pc = match dwarf.dies[root].attrs.iter().find(|(a, _)| *a == die::DW_AT_LOW_PC) {
                Some((_, AttrValue::Address(a))) => *a,
                _ => 0,
            };

            dwarf.compile_units.push(CompileUnit {
                offset: unit_offset,
                unit_length,
                version,
                abbrev_offset,
                address_size,
                abbrev_table,
                root,
                low_pc,
                line_table: None,
            });

            pos = (unit_offset + 4 + unit_length) as usize;
        }

        for cu_index in 0..dwarf.compile_units.len() {
            let stmt_list = {
                let root = dwarf.compile_units[cu_index].root;
                dwarf.dies[root]
                    .attrs
                    .iter()
                    .find(|(a, _)| *a == 0x10 /* DW_AT_stmt_list */)
                    .and_then(|(_, v)| v.as_section_offset().or_else(|| v.as_int().map(|i| i as u64)))
            };
            if let Some(offset) = stmt_list {
                let address_size = dwarf.compile_units[cu_index].address_size;
                let table = line_table::parse_line_table(&debug_line, offset, elf, address_size)?;
                dwarf.compile_units[cu_index].line_table = Some(table);
            }
        }

        Ok(dwarf)
    }

    pub fn elf(&self) -> &Elf {
        // SAFETY: see the invariant documented on `types::FileAddr` — the
        // owning `Elf` outlives this `Dwarf` for the whole debug session.
        unsafe { &*self.elf }
    }

    pub fn compile_units(&self) -> impl Iterator<Item = &CompileUnit> {
        self.compile_units.iter()
    }

    pub fn die_at_handle(&self, handle: DieHandle) -> Die<'_> {
        Die { dwarf: self, handle }
    }

    pub fn root_die(&self, cu_index: usize) -> Die<'_> {
        Die {
            dwarf: self,
            handle: self.compile_units[cu_index].root,
        }
    }

    /// Locates the DIE at global `.debug_info` byte offset `offset`,
    /// resolving `DW_FORM_ref_addr`-style absolute references.
    pub fn die_at_offset(&self, offset: u64) -> Option<Die<'_>> {
        self.dies
            .iter()
            .position(|d| d.offset == offset)
            .map(|handle| Die { dwarf: self, handle })
    }

    pub fn compile_unit_containing_address(&self, addr: FileAddr) -> Option<&CompileUnit> {
        self.compile_units
            .iter()
            .find(|cu| self.root_die_for(cu).contains_address(addr))
    }

    fn root_die_for<'d>(&'d self, cu: &CompileUnit) -> Die<'d> {
        Die { dwarf: self, handle: cu.root }
    }

    fn ensure_function_index(&self) -> &HashMap<String, Vec<DieHandle>> {
        self.function_index.get_or_init(|| {
            let mut index: HashMap<String, Vec<DieHandle>> = HashMap::new();
            for handle in 0..self.dies.len() {
                let die = &self.dies[handle];
                if die.tag != DW_TAG_SUBPROGRAM && die.tag != DW_TAG_INLINED_SUBROUTINE {
                    continue;
                }
                let view = Die { dwarf: self, handle };
                if view.low_pc().is_none() && !view.contains(die::DW_AT_RANGES) {
                    continue;
                }
                if let Some(name) = view.name() {
                    index.entry(name).or_default().push(handle);
                }
            }
            index
        })
    }

    /// The innermost non-inlined function whose range contains `addr`.
    pub fn function_containing_address(&self, addr: FileAddr) -> Option<Die<'_>> {
        let index = self.ensure_function_index();
        for handles in index.values() {
            for &handle in handles {
                let die = Die { dwarf: self, handle };
                if die.tag() == DW_TAG_SUBPROGRAM && die.contains_address(addr) {
                    return Some(die);
                }
            }
        }
        None
    }

    /// Every function-shaped DIE named `name`.
    pub fn find_functions(&self, name: &str) -> Vec<Die<'_>> {
        self.ensure_function_index()
            .get(name)
            .map(|handles| handles.iter().map(|&h| Die { dwarf: self, handle: h }).collect())
            .unwrap_or_default()
    }

    /// The chain of inlined-subroutine DIEs nested at `addr`, outer-first,
    /// starting from the enclosing non-inlined function.
    pub fn inline_stack_at_address(&self, addr: FileAddr) -> Vec<Die<'_>> {
        let Some(outer) = self.function_containing_address(addr) else {
            return Vec::new();
        };
        let mut stack = vec![outer];
        loop {
            let current = *stack.last().unwrap();
            let next = current.children().find(|child| {
                child.tag() == DW_TAG_INLINED_SUBROUTINE && child.contains_address(addr)
            });
            match next {
                Some(child) => stack.push(child),
                None => break,
            }
        }
        stack
    }
}

fn section_bytes<'a>(elf: &'a Elf, name: &str) -> &'a [u8] {
    elf.section_named(name)
        .map(|s| elf.section_data(s))
        .unwrap_or(&[])
}

/// Recursively parses a DIE and its children into the flat arena,
/// matching the original's child-iteration rule: a DIE with
/// `has_children` is immediately followed in `.debug_info` by its
/// children, terminated by a null entry (abbreviation code 0).
fn parse_die_tree(
    arena: &mut Vec<DieData>,
    debug_info: &[u8],
    pos: usize,
    cu_index: usize,
    abbrev_table: &AbbrevTable,
    ctx: &FormContext<'_>,
    parent: Option<DieHandle>,
) -> Result<Option<DieHandle>> {
    let mut cursor = Cursor::at(debug_info, pos);
    let offset = cursor.pos() as u64;
    let code = cursor.uleb128()?;
    if code == 0 {
        return Ok(None);
    }
    let decl = abbrev_table
        .get(&code)
        .ok_or_else(|| Error::format(format!("unknown abbreviation code {code}")))?;

    let mut attrs = Vec::with_capacity(decl.attrs.len());
    for spec in &decl.attrs {
        let value = attr::parse_attr_value(&mut cursor, spec, ctx)?;
        attrs.push((spec.attr, value));
    }

    let handle = arena.len();
    arena.push(DieData {
        cu: cu_index,
        offset,
        tag: decl.tag,
        attrs,
        parent,
        children: Vec::new(),
        next_pos: 0,
    });

    let mut next_pos = cursor.pos();
    if decl.has_children {
        let mut children = Vec::new();
        loop {
            match parse_die_tree(
                arena,
                debug_info,
                next_pos,
                cu_index,
                abbrev_table,
                ctx,
                Some(handle),
            )? {
                Some(child) => {
                    children.push(child);
                    next_pos = child_end_pos(arena, debug_info, child, abbrev_table, ctx)?;
                }
                None => {
                    next_pos += 1; // the null-entry terminator byte.
                    break;
                }
            }
        }
        arena[handle].children = children;
    }

    arena[handle].next_pos = next_pos;
    Ok(Some(handle))
}

/// Where a DIE's subtree ends in `.debug_info`, used to resume parsing
/// siblings after a child (and, transitively, all of its own children)
/// has been consumed.
fn child_end_pos(
    arena: &[DieData],
    _debug_info: &[u8],
    handle: DieHandle,
    _abbrev_table: &AbbrevTable,
    _ctx: &FormContext<'_>,
) -> Result<usize> {
    Ok(arena[handle].next_pos)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    /// Hand-assembles a minimal ELF64 image with `.debug_info`/
    /// `.debug_abbrev`/`.debug_str` sections describing one compile unit
    /// covering `[0x1000, 0x1100)` with two subprograms, `foo` at
    /// `[0x1000, 0x1010)` and `bar` at `[0x1020, 0x1030)`, and writes it to
    /// a temp file so `Elf::parse` can mmap it exactly as it would a real
    /// binary.
    fn write_min_elf_with_dwarf() -> tempfile::NamedTempFile {
        let debug_str: Vec<u8> = b"\0foo\0bar\0".to_vec(); // "foo" at 1, "bar" at 5

        #[rustfmt::skip]
        let debug_abbrev: Vec<u8> = vec![
            // code 1: compile_unit, has_children, (low_pc:addr) (high_pc:data4)
            0x01, 0x11, 0x01, 0x11, 0x01, 0x12, 0x06, 0x00, 0x00,
            // code 2: subprogram, no children, (name:strp) (low_pc:addr) (high_pc:data4)
            0x02, 0x2e, 0x00, 0x03, 0x0e, 0x11, 0x01, 0x12, 0x06, 0x00, 0x00,
            // table terminator
            0x00,
        ];

        let mut die_bytes: Vec<u8> = Vec::new();
        die_bytes.push(0x01); // CU
        die_bytes.extend_from_slice(&0x1000u64.to_le_bytes()); // low_pc
        die_bytes.extend_from_slice(&0x100u32.to_le_bytes()); // high_pc (+0x100 -> 0x1100)
        die_bytes.push(0x02); // subprogram "foo"
        die_bytes.extend_from_slice(&1u32.to_le_bytes());
        die_bytes.extend_from_slice(&0x1000u64.to_le_bytes());
        die_bytes.extend_from_slice(&0x10u32.to_le_bytes());
        die_bytes.push(0x02); // subprogram "bar"
        die_bytes.extend_from_slice(&5u32.to_le_bytes());
        die_bytes.extend_from_slice(&0x1020u64.to_le_bytes());
        die_bytes.extend_from_slice(&0x10u32.to_le_bytes());
        die_bytes.push(0x00); // end of CU's children

        let unit_length = (2 + 4 + 1 + die_bytes.len()) as u32;
        let mut debug_info: Vec<u8> = Vec::new();
        debug_info.extend_from_slice(&unit_length.to_le_bytes());
        debug_info.extend_from_slice(&4u16.to_le_bytes()); // version
        debug_info.extend_from_slice(&0u32.to_le_bytes()); // abbrev_offset
        debug_info.push(8); // address_size
        debug_info.extend_from_slice(&die_bytes);

        let mut shstrtab: Vec<u8> = vec![0];
        let off_shstrtab = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        let off_debug_info = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".debug_info\0");
        let off_debug_abbrev = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".debug_abbrev\0");
        let off_debug_str = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".debug_str\0");

        let shoff = 64usize;
        let shnum = 5usize;
        let shentsize = 64usize;
        let data_start = shoff + shnum * shentsize;
        let shstrtab_off = data_start;
        let debug_info_off = shstrtab_off + shstrtab.len();
        let debug_abbrev_off = debug_info_off + debug_info.len();
        let debug_str_off = debug_abbrev_off + debug_abbrev.len();

        let mut bytes = vec![0u8; debug_str_off + debug_str.len()];
        bytes[0..4].copy_from_slice(b"\x7fELF");
        bytes[4] = 2; // ELFCLASS64
        bytes[5] = 1; // little-endian
        bytes[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        bytes[24..32].copy_from_slice(&0x1000u64.to_le_bytes()); // e_entry
        bytes[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        bytes[58..60].copy_from_slice(&(shentsize as u16).to_le_bytes());
        bytes[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        bytes[62..64].copy_from_slice(&1u16.to_le_bytes()); // e_shstrndx

        fn write_shdr(
            buf: &mut [u8],
            idx: usize,
            name_off: u32,
            sh_type: u32,
            offset: u64,
            size: u64,
        ) {
            let base = 64 + idx * 64;
            buf[base..base + 4].copy_from_slice(&name_off.to_le_bytes());
            buf[base + 4..base + 8].copy_from_slice(&sh_type.to_le_bytes());
            buf[base + 48..base + 56].copy_from_slice(&1u64.to_le_bytes()); // addralign
            buf[base + 24..base + 32].copy_from_slice(&offset.to_le_bytes());
            buf[base + 32..base + 40].copy_from_slice(&size.to_le_bytes());
        }
        write_shdr(&mut bytes, 1, off_shstrtab, 3, shstrtab_off as u64, shstrtab.len() as u64);
        write_shdr(&mut bytes, 2, off_debug_info, 1, debug_info_off as u64, debug_info.len() as u64);
        write_shdr(&mut bytes, 3, off_debug_abbrev, 1, debug_abbrev_off as u64, debug_abbrev.len() as u64);
        write_shdr(&mut bytes, 4, off_debug_str, 1, debug_str_off as u64, debug_str.len() as u64);

        bytes[shstrtab_off..shstrtab_off + shstrtab.len()].copy_from_slice(&shstrtab);
        bytes[debug_info_off..debug_info_off + debug_info.len()].copy_from_slice(&debug_info);
        bytes[debug_abbrev_off..debug_abbrev_off + debug_abbrev.len()].copy_from_slice(&debug_abbrev);
        bytes[debug_str_off..debug_str_off + debug_str.len()].copy_from_slice(&debug_str);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn parses_compile_unit_and_indexes_functions() {
        let file = write_min_elf_with_dwarf();
        let elf = crate::elf::Elf::parse(file.path()).unwrap();
        let dwarf = Dwarf::parse(&elf).unwrap();

        assert_eq!(dwarf.compile_units().count(), 1);

        let foo = crate::types::FileAddr::new(&elf, 0x1005);
        let bar = crate::types::FileAddr::new(&elf, 0x1025);
        let gap = crate::types::FileAddr::new(&elf, 0x1015);

        assert!(dwarf.compile_unit_containing_address(foo).is_some());

        let foo_die = dwarf.function_containing_address(foo).expect("foo found");
        assert_eq!(foo_die.name().as_deref(), Some("foo"));

        let bar_die = dwarf.function_containing_address(bar).expect("bar found");
        assert_eq!(bar_die.name().as_deref(), Some("bar"));

        assert!(dwarf.function_containing_address(gap).is_none());
        assert_eq!(dwarf.find_functions("foo").len(), 1);
        assert!(dwarf.find_functions("nonexistent").is_empty());
    }
}
