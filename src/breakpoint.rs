//! High-level breakpoints. A `Breakpoint` is a user-facing request —
//! "stop at this function/line/address" — that `resolve()` turns into one
//! or more low-level [`BreakpointSite`](crate::breakpoint_site::BreakpointSite)s
//! installed through the owning `Process`. This is naturally a tagged
//! variant rather than a virtual base: the common bookkeeping (id, enabled
//! flag, the realized sites, a per-breakpoint site-subid counter) lives on
//! the product type, and only `resolve()` branches on the variant.
//!
//! A `Breakpoint` doesn't *own* its `BreakpointSite`s — `Process` is the
//! sole owner of every site (single ownership, as Rust requires). What
//! `Breakpoint` owns is the *list of ids* it resolved into, looked up
//! through `Process`'s collection whenever the high-level object needs to
//! enable, disable, or describe one of its sites. `Target` calls these
//! methods with its `process`/`elf`/`dwarf` fields passed explicitly
//! rather than a `&mut Target`, so the borrow checker sees them as the
//! disjoint fields they are instead of one aliased whole (see
//! `DESIGN.md`).

use std::sync::atomic::{AtomicI32, Ordering};

use crate::dwarf::die::DW_TAG_SUBPROGRAM;
use crate::dwarf::Dwarf;
use crate::elf::Elf;
use crate::error::Result;
use crate::process::Process;
use crate::types::{FileAddr, VirtAddr};

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

fn next_id() -> i32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub enum BreakpointKind {
    Address { address: VirtAddr },
    Function { name: String },
    Line { file: String, line: u64 },
}

/// A single address this breakpoint resolved to, with the subid used to
/// distinguish multiple sites belonging to the same high-level breakpoint
/// (e.g. a function breakpoint resolving through both a DWARF definition
/// and an ELF alias).
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSite {
    pub site_id: i32,
    pub sub_id: i32,
}

pub struct Breakpoint {
    id: i32,
    kind: BreakpointKind,
    is_hardware: bool,
    is_internal: bool,
    is_enabled: bool,
    sites: Vec<ResolvedSite>,
    next_sub_id: i32,
}

impl Breakpoint {
    pub(crate) fn new(kind: BreakpointKind, is_hardware: bool, is_internal: bool) -> Self {
        Breakpoint {
            id: next_id(),
            kind,
            is_hardware,
            is_internal,
            is_enabled: false,
            sites: Vec::new(),
            next_sub_id: 1,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn kind(&self) -> &BreakpointKind {
        &self.kind
    }

    pub fn is_hardware(&self) -> bool {
        self.is_hardware
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn site_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.sites.iter().map(|s| s.site_id)
    }

    fn has_site_at(&self, process: &Process, address: VirtAddr) -> bool {
        self.sites.iter().any(|s| {
            process
                .breakpoint_sites()
                .get_by_id(s.site_id)
                .map(|site| site.address() == address)
                .unwrap_or(false)
        })
    }

    /// Installs (but does not necessarily enable) a site at `address` if
    /// this breakpoint doesn't already have one there — re-resolution is
    /// idempotent.
    fn add_site(&mut self, process: &mut Process, address: VirtAddr) -> Result<()> {
        if self.has_site_at(process, address) {
            return Ok(());
        }
        let site_id = process.create_breakpoint_site(address, self.is_hardware, self.is_internal);
        if let Some(site) = process.breakpoint_sites_mut().get_by_id_mut(site_id) {
            site.set_parent_id(self.id);
        }
        let sub_id = self.next_sub_id;
        self.next_sub_id += 1;
        self.sites.push(ResolvedSite { site_id, sub_id });
        if self.is_enabled {
            if let Some(site) = process.breakpoint_sites_mut().get_by_id_mut(site_id) {
                site.enable()?;
            }
        }
        Ok(())
    }

    /// Re-derives this breakpoint's realized sites from its variant.
    pub fn resolve(&mut self, process: &mut Process, elf: &Elf, dwarf: &Dwarf) -> Result<()> {
        match self.kind.clone() {
            BreakpointKind::Address { address } => self.add_site(process, address),
            BreakpointKind::Function { name } => self.resolve_function(process, elf, dwarf, &name),
            BreakpointKind::Line { file, line } => self.resolve_line(process, dwarf, &file, line),
        }
    }

    fn resolve_function(
        &mut self,
        process: &mut Process,
        elf: &Elf,
        dwarf: &Dwarf,
        name: &str,
    ) -> Result<()> {
        let dwarf_dies = dwarf.find_functions(name);
        let mut addrs = Vec::new();
        for die in dwarf_dies {
            if die.tag() != DW_TAG_SUBPROGRAM {
                continue;
            }
            let Some((low, _high)) = die.low_pc_ranges_aware() else {
                continue;
            };
            // Skip the prologue for an ordinary definition: the real
            // breakpoint address is the *next* line-table entry after the
            // one at the function's own entry point.
            let cu_index = die.cu_index();
            let skip_addr = dwarf
                .compile_units()
                .nth(cu_index)
                .and_then(|cu| cu.line_table.as_ref())
                .and_then(|lt| {
                    let mut entries = lt.entries.iter().filter(|e| !e.end_sequence);
                    let at_entry = entries.clone().position(|e| e.address == low);
                    at_entry.and_then(|idx| entries.nth(idx + 1)).map(|e| e.address)
                })
                .unwrap_or(low);
            addrs.push(skip_addr.to_virt_addr());
        }

        for symbol in elf.symbols_named(name) {
            if !symbol.is_function() || symbol.value == 0 {
                continue;
            }
            addrs.push(FileAddr::new(elf, symbol.value).to_virt_addr());
        }

        for addr in addrs {
            self.add_site(process, addr)?;
        }
        Ok(())
    }

    fn resolve_line(&mut self, process: &mut Process, dwarf: &Dwarf, file: &str, line: u64) -> Result<()> {
        let mut addrs = Vec::new();
        for (cu_index, cu) in dwarf.compile_units().enumerate() {
            let Some(lt) = cu.line_table.as_ref() else {
                continue;
            };
            let Some(file_index) = lt.file_names.iter().position(|entry| {
                entry.name == file || (!file.starts_with('/') && entry.name.ends_with(file))
            }) else {
                continue;
            };
            for entry in lt.entries_for_file_line(file_index as u64, line) {
                let addr = if is_function_entry(dwarf, entry.address) {
                    next_line_entry_address(dwarf, cu_index, entry.address).unwrap_or(entry.address)
                } else {
                    entry.address
                };
                addrs.push(addr.to_virt_addr());
            }
        }
        for addr in addrs {
            self.add_site(process, addr)?;
        }
        Ok(())
    }

    pub fn enable(&mut self, process: &mut Process) -> Result<()> {
        self.is_enabled = true;
        for site in &self.sites {
            if let Some(s) = process.breakpoint_sites_mut().get_by_id_mut(site.site_id) {
                s.enable()?;
            }
        }
        Ok(())
    }

    pub fn disable(&mut self, process: &mut Process) -> Result<()> {
        self.is_enabled = false;
        for site in &self.sites {
            if let Some(s) = process.breakpoint_sites_mut().get_by_id_mut(site.site_id) {
                s.disable()?;
            }
        }
        Ok(())
    }

    /// Removes every realized site from the owning process, called before
    /// dropping this breakpoint from `Target`'s collection.
    pub(crate) fn remove_all_sites(&mut self, process: &mut Process) {
        for site in self.sites.drain(..) {
            if let Some(mut s) = process.breakpoint_sites_mut().remove_by_id(site.site_id) {
                let _ = s.disable();
            }
        }
    }
}

/// Whether `addr` is exactly the entry point of the single function whose
/// inline stack contains it — the signal used to decide a line hit needs
/// prologue-skipping.
fn is_function_entry(dwarf: &Dwarf, addr: FileAddr) -> bool {
    let stack = dwarf.inline_stack_at_address(addr);
    match stack.as_slice() {
        [only] => only.low_pc_ranges_aware().map(|(low, _)| low == addr).unwrap_or(false),
        _ => false,
    }
}

fn next_line_entry_address(dwarf: &Dwarf, cu_index: usize, at: FileAddr) -> Option<FileAddr> {
    let cu = dwarf.compile_units().nth(cu_index)?;
    let lt = cu.line_table.as_ref()?;
    let mut iter = lt.entries.iter().filter(|e| !e.end_sequence);
    let pos = iter.clone().position(|e| e.address == at)?;
    iter.nth(pos + 1).map(|e| e.address)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_breakpoint_starts_disabled_with_no_sites() {
        let bp = Breakpoint::new(
            BreakpointKind::Address {
                address: VirtAddr::new(0x1000),
            },
            false,
            false,
        );
        assert!(!bp.is_enabled());
        assert_eq!(bp.site_ids().count(), 0);
    }
}
