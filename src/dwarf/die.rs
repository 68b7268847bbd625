//! Debugging Information Entries. `Dwarf` parses
//! every DIE into a flat arena (`Vec<DieData>`) up front and hands out
//! `Die<'d>` views that borrow it — an "arena + index handles" shape used
//! here as the alternative to threading a lifetime parameter through a
//! self-referential tree, and to raw pointers, because the DIE tree,
//! unlike the simpler `Process`/`Elf` back-references elsewhere in this
//! crate, is built once and never mutated after construction — plain
//! borrows are enough.
//!
//! Grounded in the original `die`/`die::children_range::iterator`: a DIE
//! with children is immediately followed by them in `.debug_info`, and a
//! children list is terminated by a null entry (abbreviation code 0).

use crate::types::FileAddr;

use super::attr::AttrValue;
use super::Dwarf;

pub type DieHandle = usize;

pub(crate) struct DieData {
    pub(crate) cu: usize,
    pub(crate) offset: u64,
    pub(crate) tag: u64,
    pub(crate) attrs: Vec<(u64, AttrValue)>,
    pub(crate) parent: Option<DieHandle>,
    pub(crate) children: Vec<DieHandle>,
    /// Byte position just past this DIE's subtree in `.debug_info`,
    /// filled in once the whole subtree has been parsed.
    pub(crate) next_pos: usize,
}

pub const DW_TAG_COMPILE_UNIT: u64 = 0x11;
pub const DW_TAG_SUBPROGRAM: u64 = 0x2e;
pub const DW_TAG_INLINED_SUBROUTINE: u64 = 0x1d;

pub const DW_AT_LOW_PC: u64 = 0x11;
pub const DW_AT_HIGH_PC: u64 = 0x12;
pub const DW_AT_NAME: u64 = 0x03;
pub const DW_AT_SPECIFICATION: u64 = 0x47;
pub const DW_AT_ABSTRACT_ORIGIN: u64 = 0x31;
pub const DW_AT_RANGES: u64 = 0x55;
pub const DW_AT_DECL_FILE: u64 = 0x3a;
pub const DW_AT_DECL_LINE: u64 = 0x3b;
pub const DW_AT_LOCATION: u64 = 0x02;
pub const DW_AT_CALL_FILE: u64 = 0x58;
pub const DW_AT_CALL_LINE: u64 = 0x59;

/// A read-only view onto one parsed DIE.
#[derive(Clone, Copy)]
pub struct Die<'d> {
    pub(crate) dwarf: &'d Dwarf,
    pub(crate) handle: DieHandle,
}

impl<'d> Die<'d> {
    fn data(&self) -> &'d DieData {
        &self.dwarf.dies[self.handle]
    }

    pub fn handle(&self) -> DieHandle {
        self.handle
    }

    pub fn offset(&self) -> u64 {
        self.data().offset
    }

    pub fn tag(&self) -> u64 {
        self.data().tag
    }

    pub fn cu_index(&self) -> usize {
        self.data().cu
    }

    pub fn contains(&self, attr: u64) -> bool {
        self.data().attrs.iter().any(|(a, _)| *a == attr)
    }

    pub fn attribute(&self, attr: u64) -> Option<&'d AttrValue> {
        self.data().attrs.iter().find(|(a, _)| *a == attr).map(|(_, v)| v)
    }

    pub fn parent(&self) -> Option<Die<'d>> {
        self.data().parent.map(|h| Die { dwarf: self.dwarf, handle: h })
    }

    pub fn children(&self) -> impl Iterator<Item = Die<'d>> + 'd {
        let dwarf = self.dwarf;
        self.data().children.iter().map(move |&h| Die { dwarf, handle: h })
    }

    /// Resolves `DW_AT_name` directly, then through `DW_AT_specification`,
    /// then through `DW_AT_abstract_origin`, matching the original's
    /// `die::name()` fallback chain for declarations split across
    /// multiple DIEs.
    pub fn name(&self) -> Option<String> {
        if let Some(AttrValue::Str(s)) = self.attribute(DW_AT_NAME) {
            return Some(s.clone());
        }
        for link in [DW_AT_SPECIFICATION, DW_AT_ABSTRACT_ORIGIN] {
            if let Some(target_offset) = self.attribute(link).and_then(AttrValue::as_reference) {
                if let Some(referenced) = self.dwarf.die_at_offset(target_offset) {
                    if let Some(name) = referenced.name() {
                        return Some(name);
                    }
                }
            }
        }
        None
    }

    /// This DIE's own `DW_AT_low_pc`, ignoring any `DW_AT_ranges`. Most
    /// callers want [`Die::low_pc_ranges_aware`] instead.
    pub fn low_pc(&self) -> Option<FileAddr> {
        let addr = self.attribute(DW_AT_LOW_PC)?.as_address()?;
        Some(FileAddr::new(self.dwarf.elf(), addr))
    }

    /// `DW_AT_high_pc` is either an absolute address (`DW_FORM_addr`) or,
    /// far more commonly, an offset from `DW_AT_low_pc` encoded as a
    /// constant form — the original disambiguates the same way, by form
    /// family rather than a dedicated flag.
    pub fn high_pc(&self) -> Option<FileAddr> {
        let low = self.low_pc()?;
        match self.attribute(DW_AT_HIGH_PC)? {
            AttrValue::Address(a) => Some(FileAddr::new(self.dwarf.elf(), *a)),
            other => other.as_int().map(|offset| low + offset),
        }
    }

    fn ranges(&self) -> Option<Vec<super::range_list::Range>> {
        let ranges_off = self.attribute(DW_AT_RANGES).and_then(AttrValue::as_section_offset)?;
        let cu = &self.dwarf.compile_units[self.cu_index()];
        Some(super::range_list::parse_range_list(
            &self.dwarf.debug_ranges,
            ranges_off,
            self.dwarf.elf(),
            cu.low_pc,
        ))
    }

    /// `low_pc`/`high_pc`, preferring `DW_AT_ranges` when present: the
    /// first range's low bound and the last range's high bound.
    pub fn low_pc_ranges_aware(&self) -> Option<(FileAddr, FileAddr)> {
        if let Some(ranges) = self.ranges() {
            let low = ranges.first()?.low;
            let high = ranges.last()?.high;
            return Some((low, high));
        }
        Some((self.low_pc()?, self.high_pc()?))
    }

    pub fn contains_address(&self, addr: FileAddr) -> bool {
        if let Some(ranges) = self.ranges() {
            return ranges.iter().any(|r| r.contains(addr));
        }
        if let (Some(low), Some(high)) = (self.low_pc(), self.high_pc()) {
            return addr >= low && addr < high;
        }
        false
    }

    pub fn file_index(&self) -> Option<u64> {
        self.attribute(DW_AT_DECL_FILE).and_then(AttrValue::as_int).map(|v| v as u64)
    }

    pub fn line(&self) -> Option<u64> {
        self.attribute(DW_AT_DECL_LINE).and_then(AttrValue::as_int).map(|v| v as u64)
    }

    pub fn call_file(&self) -> Option<u64> {
        self.attribute(DW_AT_CALL_FILE).and_then(AttrValue::as_int).map(|v| v as u64)
    }

    pub fn call_line(&self) -> Option<u64> {
        self.attribute(DW_AT_CALL_LINE).and_then(AttrValue::as_int).map(|v| v as u64)
    }
}
