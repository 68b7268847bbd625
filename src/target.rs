//! The symbolic target. Composes
//! `Process` + `Elf` + `Dwarf` into one object: resolves high-level
//! breakpoints, implements source-level `step-in`/`step-over`/`step-out`
//! including inlined-frame simulation, and maps PC to source lines.
//!
//! Grounded in the original `target.cpp`'s `Target` class, which plays
//! the same composition-root role. `Process`'s `*mut Target` back-pointer
//! (see `process.rs`) is the one place this crate reaches from the
//! low-level layer back up into this one, used only to call
//! [`Target::notify_stop`] right after a stop is classified.

use std::fs;
use std::path::{Path, PathBuf};

use crate::breakpoint::{Breakpoint, BreakpointKind};
use crate::dwarf::die::Die;
use crate::dwarf::line_table::LineEntry;
use crate::dwarf::Dwarf;
use crate::elf::Elf;
use crate::error::{Error, Result};
use crate::process::{Process, ProcessState, StopReason, TrapReason};
use crate::register_info::RegisterId;
use crate::stack::Stack;
use crate::types::{FileAddr, VirtAddr};

/// `AT_ENTRY`, the auxv entry carrying the runtime (post-relocation) entry
/// point of a PIE binary.
const AT_ENTRY: u64 = 9;

pub struct Target {
    process: Box<Process>,
    elf: Box<Elf>,
    dwarf: Dwarf,
    stack: Stack,
    breakpoints: Vec<Breakpoint>,
}

impl Target {
    fn assemble(process: Box<Process>, elf_path: &Path) -> Result<Box<Self>> {
        let mut elf = Box::new(Elf::parse(elf_path)?);
        let auxv = process.read_auxv()?;
        if let Some(&runtime_entry) = auxv.get(&AT_ENTRY) {
            elf.notify_loaded(VirtAddr::new(runtime_entry));
        }
        let dwarf = Dwarf::parse(&elf)?;

        let mut target = Box::new(Target {
            process,
            elf,
            dwarf,
            stack: Stack::new(),
            breakpoints: Vec::new(),
        });
        let self_ptr: *mut Target = &mut *target;
        target.process.set_target(self_ptr);
        Ok(target)
    }

    /// Launches `path` under ptrace and builds the full symbolic target
    /// around it.
    pub fn launch(path: &Path, args: &[String], disable_aslr: bool) -> Result<Box<Self>> {
        let process = Process::launch(path, args, disable_aslr)?;
        Self::assemble(process, path)
    }

    /// Attaches to an already-running process, reading its executable's
    /// path from `/proc/pid/exe` to build the ELF/DWARF side.
    pub fn attach(pid: i32) -> Result<Box<Self>> {
        let process = Process::attach(pid)?;
        let exe_path = fs::read_link(format!("/proc/{pid}/exe")).map_err(|_| Error::os("readlink(/proc/pid/exe)"))?;
        Self::assemble(process, &exe_path)
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut Process {
        &mut self.process
    }

    pub fn elf(&self) -> &Elf {
        &self.elf
    }

    pub fn dwarf(&self) -> &Dwarf {
        &self.dwarf
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    fn pc(&self) -> VirtAddr {
        VirtAddr::new(self.process.registers().read_by_id(RegisterId::rip).as_u64().unwrap_or(0))
    }

    fn pc_file_addr(&self) -> FileAddr {
        self.pc().to_file_addr(&self.elf)
    }

    /// Called by `Process::wait_on_signal` right after every stop. Takes
    /// the PC by value rather than reaching back into `self.process` — see
    /// the SAFETY note where this is invoked.
    pub(crate) fn notify_stop(&mut self, pc: u64) {
        let file_addr = VirtAddr::new(pc).to_file_addr(&self.elf);
        let inline_stack = self.dwarf.inline_stack_at_address(file_addr);
        self.stack.recompute_inline_height(&inline_stack, file_addr);
    }

    /// The line-table entry covering the current PC, if any.
    pub fn line_entry_at_pc(&self) -> Option<&LineEntry> {
        let addr = self.pc_file_addr();
        let cu = self.dwarf.compile_unit_containing_address(addr)?;
        cu.line_table.as_ref()?.get_entry_by_address(addr)
    }

    /// The innermost function (DWARF name, falling back to the ELF symbol)
    /// containing the current PC.
    pub fn function_name_at_pc(&self) -> Option<String> {
        let addr = self.pc_file_addr();
        if let Some(die) = self.dwarf.function_containing_address(addr) {
            if let Some(name) = die.name() {
                return Some(name);
            }
        }
        self.elf
            .symbol_containing_address(addr)
            .map(|s| s.demangled.clone().unwrap_or_else(|| s.name.clone()))
    }

    pub fn inline_stack_at_pc(&self) -> Vec<Die<'_>> {
        self.dwarf.inline_stack_at_address(self.pc_file_addr())
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn breakpoint(&self, id: i32) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|b| b.id() == id)
    }

    /// Creates and immediately resolves a high-level breakpoint.
    pub fn create_breakpoint(&mut self, kind: BreakpointKind, is_hardware: bool) -> Result<i32> {
        let mut bp = Breakpoint::new(kind, is_hardware, false);
        bp.resolve(&mut self.process, &self.elf, &self.dwarf)?;
        let id = bp.id();
        self.breakpoints.push(bp);
        Ok(id)
    }

    pub fn enable_breakpoint(&mut self, id: i32) -> Result<()> {
        let bp = self
            .breakpoints
            .iter_mut()
            .find(|b| b.id() == id)
            .ok_or_else(|| Error::lookup(format!("no such breakpoint {id}")))?;
        bp.enable(&mut self.process)
    }

    pub fn disable_breakpoint(&mut self, id: i32) -> Result<()> {
        let bp = self
            .breakpoints
            .iter_mut()
            .find(|b| b.id() == id)
            .ok_or_else(|| Error::lookup(format!("no such breakpoint {id}")))?;
        bp.disable(&mut self.process)
    }

    pub fn remove_breakpoint(&mut self, id: i32) -> Result<()> {
        let idx = self
            .breakpoints
            .iter()
            .position(|b| b.id() == id)
            .ok_or_else(|| Error::lookup(format!("no such breakpoint {id}")))?;
        let mut bp = self.breakpoints.remove(idx);
        bp.remove_all_sites(&mut self.process);
        Ok(())
    }

    fn synthetic_single_step(&self) -> StopReason {
        StopReason {
            state: ProcessState::Stopped,
            info: 0,
            trap_reason: Some(TrapReason::SingleStep),
            stoppoint_id: None,
        }
    }

    /// Runs until `address`, installing a temporary internal software
    /// breakpoint there first if none already exists. The internal site is always removed before
    /// returning, on every exit path, including errors.
    pub fn run_until_address(&mut self, address: VirtAddr) -> Result<StopReason> {
        let already_armed = self.process.breakpoint_sites().enabled_at_address(address);
        let temp_site_id = if already_armed {
            None
        } else {
            let id = self.process.create_breakpoint_site(address, false, true);
            if let Some(site) = self.process.breakpoint_sites_mut().get_by_id_mut(id) {
                site.enable()?;
            }
            Some(id)
        };

        let outcome = (|| -> Result<StopReason> {
            self.process.resume()?;
            self.process.wait_on_signal()
        })();

        if let Some(id) = temp_site_id {
            if let Some(mut site) = self.process.breakpoint_sites_mut().remove_by_id(id) {
                let _ = site.disable();
            }
        }

        let mut reason = outcome?;
        if reason.state == ProcessState::Stopped && self.pc() == address {
            reason.trap_reason = Some(TrapReason::SingleStep);
        }
        Ok(reason)
    }

    /// A single machine instruction of progress: simulated (no tracee
    /// execution) while inline height > 0, otherwise a real
    /// `PTRACE_SINGLESTEP`.
    pub fn step_instruction(&mut self) -> Result<StopReason> {
        if self.stack.inline_height() > 0 {
            self.stack.pop_inline_frame();
            return Ok(self.synthetic_single_step());
        }
        self.process.step_instruction()
    }

    /// Steps until the source line changes, skipping a landed-on
    /// function's prologue.
    pub fn step_in(&mut self) -> Result<StopReason> {
        if self.stack.inline_height() > 0 {
            self.stack.pop_inline_frame();
            return Ok(self.synthetic_single_step());
        }

        let start_line = self.line_entry_at_pc().map(|e| (e.file_index, e.line));
        loop {
            let reason = self.step_instruction()?;
            if reason.state != ProcessState::Stopped {
                return Ok(reason);
            }
            let entry = self.line_entry_at_pc();
            if entry.map(|e| e.end_sequence).unwrap_or(false) {
                return Ok(reason);
            }
            let current_line = entry.map(|e| (e.file_index, e.line));
            if current_line.is_some() && current_line != start_line {
                // Landing exactly on a function's low_pc means we stepped
                // into its prologue; run to the next line entry instead.
                let pc = self.pc_file_addr();
                let at_function_entry = self
                    .dwarf
                    .function_containing_address(pc)
                    .and_then(|f| f.low_pc_ranges_aware())
                    .map(|(low, _)| low == pc)
                    .unwrap_or(false);
                if at_function_entry {
                    if let Some(next_addr) = self.next_line_entry_address_after(pc) {
                        return self.run_until_address(next_addr.to_virt_addr());
                    }
                }
                return Ok(reason);
            }
        }
    }

    /// Steps over the current line: sets internal breakpoints at the
    /// line's successor and the function's return address, then runs
    /// until either fires.
    pub fn step_over(&mut self) -> Result<StopReason> {
        if self.stack.inline_height() > 0 {
            self.stack.pop_inline_frame();
            return Ok(self.synthetic_single_step());
        }

        let pc = self.pc_file_addr();
        let Some(next_line_addr) = self.next_line_entry_address_after(pc) else {
            return self.step_in();
        };
        let return_addr = self.read_return_address()?;

        let next_site = self.process.create_breakpoint_site(next_line_addr.to_virt_addr(), false, true);
        let was_armed_next = self.arm_internal(next_site)?;
        let return_site = return_addr.map(|addr| self.process.create_breakpoint_site(addr, false, true));
        let was_armed_return = match return_site {
            Some(id) => Some(self.arm_internal(id)?),
            None => None,
        };

        let outcome = (|| -> Result<StopReason> {
            self.process.resume()?;
            self.process.wait_on_signal()
        })();

        if !was_armed_next {
            if let Some(mut site) = self.process.breakpoint_sites_mut().remove_by_id(next_site) {
                let _ = site.disable();
            }
        }
        if let (Some(id), Some(was_armed)) = (return_site, was_armed_return) {
            if !was_armed {
                if let Some(mut site) = self.process.breakpoint_sites_mut().remove_by_id(id) {
                    let _ = site.disable();
                }
            }
        }

        outcome
    }

    /// Returns from the current (simulated or real) frame: decrements
    /// inline height if simulating, otherwise reads the return address
    /// from `[rbp+8]` and runs until it.
    pub fn step_out(&mut self) -> Result<StopReason> {
        if self.stack.inline_height() > 0 {
            self.stack.pop_inline_frame();
            return Ok(self.synthetic_single_step());
        }
        let Some(return_addr) = self.read_return_address()? else {
            return Err(Error::process_state("no return address available to step out to"));
        };
        self.run_until_address(return_addr.to_virt_addr())
    }

    /// Arms a freshly-created internal site unless a (non-internal, or
    /// already-enabled) site already sits at the same address, returning
    /// whether a pre-existing enabled site was found there.
    fn arm_internal(&mut self, site_id: i32) -> Result<bool> {
        let address = self
            .process
            .breakpoint_sites()
            .get_by_id(site_id)
            .map(|s| s.address());
        let Some(address) = address else {
            return Ok(false);
        };
        let already_armed = self
            .process
            .breakpoint_sites()
            .iter()
            .any(|s| {
                s.address() == address
                    && crate::stoppoint_collection::Stoppoint::is_enabled(s)
                    && crate::stoppoint_collection::Stoppoint::id(s) != site_id
            });
        if !already_armed {
            if let Some(site) = self.process.breakpoint_sites_mut().get_by_id_mut(site_id) {
                site.enable()?;
            }
        }
        Ok(already_armed)
    }

    /// The line-table entry address immediately after the one containing
    /// `addr`, within the same compile unit.
    fn next_line_entry_address_after(&self, addr: FileAddr) -> Option<FileAddr> {
        let cu = self.dwarf.compile_unit_containing_address(addr)?;
        let lt = cu.line_table.as_ref()?;
        let mut iter = lt.entries.iter().filter(|e| !e.end_sequence);
        let pos = iter.clone().position(|e| e.address == addr)?;
        iter.nth(pos + 1).map(|e| e.address)
    }

    /// Reads the return address of the current (non-inlined) frame from
    /// `[rbp + 8]`, the standard x86-64 System V frame-pointer convention.
    fn read_return_address(&mut self) -> Result<Option<FileAddr>> {
        let rbp = self.process.registers().read_by_id(RegisterId::rbp).as_u64()?;
        if rbp == 0 {
            return Ok(None);
        }
        let bytes = self.process.read_memory(VirtAddr::new(rbp + 8), 8)?;
        let raw = u64::from_le_bytes(bytes.try_into().unwrap());
        if raw == 0 {
            return Ok(None);
        }
        Ok(Some(VirtAddr::new(raw).to_file_addr(&self.elf)))
    }

    pub fn executable_path(&self) -> &Path {
        self.elf.path()
    }
}

/// Where `/proc/pid/exe` would resolve for a not-yet-attached path; used
/// only by tests that want to sanity-check path plumbing without a live
/// tracee.
pub(crate) fn canonicalize_best_effort(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonicalize_best_effort_falls_back_to_input() {
        let p = Path::new("/does/not/exist/at/all");
        assert_eq!(canonicalize_best_effort(p), p);
    }
}
