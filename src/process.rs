//! `ptrace`-based process control.
//!
//! Grounded in two sources: the original `process.cpp`'s `Launch`/`Attach`
//! /`Resume`/`WaitOnSignal`/memory-access methods, and
//! `samply/src/linux/process.rs`'s `launch_in_suspended_state`, whose
//! `fork` + close-on-exec self-pipe is the idiomatic Rust shape for
//! shipping an `execve` failure back across `fork` — the original's
//! `pipe.cpp` does the same thing by hand.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{ForkResult, Pid};

use crate::breakpoint_site::BreakpointSite;
use crate::error::{Error, Result};
use crate::pipe::Pipe;
use crate::register_info::{self, RegisterId, RegisterType};
use crate::registers::Registers;
use crate::stoppoint_collection::{Stoppoint as _, StoppointCollection};
use crate::target::Target;
use crate::types::{StoppointMode, VirtAddr};
use crate::watchpoint::Watchpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Running,
    Exited,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason {
    SingleStep,
    SoftwareBreak,
    HardwareBreak,
    Syscall,
    Unknown,
}

/// The outcome of the most recent `wait_on_signal`/`resume`/
/// `step_instruction` call, analogous to the original's `StopReason`.
#[derive(Debug, Clone, Copy)]
pub struct StopReason {
    pub state: ProcessState,
    /// Exit code if `state == Exited`, terminating signal if
    /// `state == Terminated`, stop signal if `state == Stopped`.
    pub info: i32,
    /// Only set when `info == SIGTRAP`.
    pub trap_reason: Option<TrapReason>,
    /// Id of the breakpoint site or watchpoint responsible, when known.
    pub stoppoint_id: Option<i32>,
}

/// The four hardware `DR0`-`DR3` slots, each either free or owned by a
/// breakpoint-site/watchpoint id.
#[derive(Default, Clone, Copy)]
struct HardwareSlots([Option<i32>; 4]);

impl HardwareSlots {
    fn allocate(&mut self, owner: i32) -> Result<usize> {
        for (i, slot) in self.0.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(owner);
                return Ok(i);
            }
        }
        Err(Error::process_state(
            "no free hardware breakpoint/watchpoint registers",
        ))
    }

    fn free(&mut self, index: usize) {
        self.0[index] = None;
    }

    fn owner(&self, index: usize) -> Option<i32> {
        self.0[index]
    }
}

pub struct Process {
    pid: Pid,
    terminate_on_end: bool,
    is_attached: bool,
    state: ProcessState,
    registers: Registers,
    breakpoint_sites: StoppointCollection<BreakpointSite>,
    watchpoints: StoppointCollection<Watchpoint>,
    hardware_slots: HardwareSlots,
    mem_fd: Option<File>,
    catch_syscalls: bool,
    /// Set once by `Target::launch`/`Target::attach` right after
    /// construction, used only to invoke `Target::notify_stop` at the end
    /// of `wait_on_signal`. See the back-pointer discussion on
    /// `types::FileAddr`.
    target: Option<*mut Target>,
}

impl Process {
    fn new(pid: Pid, terminate_on_end: bool, is_attached: bool) -> Box<Self> {
        let mut proc = Box::new(Process {
            pid,
            terminate_on_end,
            is_attached,
            state: ProcessState::Stopped,
            registers: Registers::new(std::ptr::null_mut()),
            breakpoint_sites: StoppointCollection::new(),
            watchpoints: StoppointCollection::new(),
            hardware_slots: HardwareSlots::default(),
            mem_fd: None,
            catch_syscalls: false,
            target: None,
        });
        let self_ptr: *mut Process = &mut *proc;
        proc.registers = Registers::new(self_ptr);
        proc
    }

    /// Forks, has the child call `PTRACE_TRACEME` and `execvp`, and waits
    /// for the post-`exec` `SIGTRAP`. Any failure inside the child (the
    /// binary doesn't exist, `execvp` itself fails) is shipped back to the
    /// parent over a close-on-exec pipe, matching `samply`'s
    /// `launch_in_suspended_state` / the original's `pipe.cpp` usage in
    /// `Process::Launch`.
    pub fn launch(path: &Path, args: &[String], disable_aslr: bool) -> Result<Box<Self>> {
        Self::launch_redirecting_stdout(path, args, disable_aslr, None)
    }

    /// As [`Process::launch`], but dup2's `stdout_fd` onto the child's
    /// stdout first when given — used by the `reg_write` boundary scenario
    /// to capture what the tracee printed after a
    /// register write.
    pub fn launch_redirecting_stdout(
        path: &Path,
        args: &[String],
        disable_aslr: bool,
        stdout_fd: Option<RawFd>,
    ) -> Result<Box<Self>> {
        let channel = Pipe::new(true)?;

        // SAFETY: the child only calls async-signal-safe functions
        // (ptrace, personality, dup2, execvp, write, _exit) between fork
        // and exec/exit.
        match unsafe { nix::unistd::fork() }.map_err(|_| Error::os("fork"))? {
            ForkResult::Child => {
                let _ = channel_child_exec(&channel, path, args, disable_aslr, stdout_fd);
                unsafe { libc::_exit(1) };
            }
            ForkResult::Parent { child } => {
                let mut proc = Process::new(child, true, true);
                let err = channel.read()?;
                if !err.is_empty() {
                    waitpid(child, None).ok();
                    return Err(Error::process_state(format!(
                        "child process failed to launch: {}",
                        String::from_utf8_lossy(&err)
                    )));
                }
                proc.wait_on_signal()?;
                proc.read_all_registers()?;
                Ok(proc)
            }
        }
    }

    /// Attaches to an already-running process.
    pub fn attach(pid: i32) -> Result<Box<Self>> {
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid).map_err(|_| Error::os("PTRACE_ATTACH"))?;
        let mut proc = Process::new(pid, false, true);
        proc.wait_on_signal()?;
        proc.read_all_registers()?;
        Ok(proc)
    }

    /// Called once by `Target::launch`/`Target::attach` right after both
    /// halves exist, establishing the back-pointer `wait_on_signal` uses to
    /// invoke `Target::notify_stop`.
    pub(crate) fn set_target(&mut self, target: *mut Target) {
        self.target = Some(target);
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn breakpoint_sites(&self) -> &StoppointCollection<BreakpointSite> {
        &self.breakpoint_sites
    }

    pub fn breakpoint_sites_mut(&mut self) -> &mut StoppointCollection<BreakpointSite> {
        &mut self.breakpoint_sites
    }

    pub fn watchpoints(&self) -> &StoppointCollection<Watchpoint> {
        &self.watchpoints
    }

    pub fn watchpoints_mut(&mut self) -> &mut StoppointCollection<Watchpoint> {
        &mut self.watchpoints
    }

    pub fn create_breakpoint_site(
        &mut self,
        address: VirtAddr,
        is_hardware: bool,
        is_internal: bool,
    ) -> i32 {
        let self_ptr: *mut Process = self;
        let site = BreakpointSite::new(self_ptr, address, is_hardware, is_internal);
        let id = crate::stoppoint_collection::Stoppoint::id(&site);
        self.breakpoint_sites.push(site);
        id
    }

    pub fn create_watchpoint(
        &mut self,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<i32> {
        let self_ptr: *mut Process = self;
        let wp = Watchpoint::new(self_ptr, address, mode, size)?;
        let id = crate::stoppoint_collection::Stoppoint::id(&wp);
        self.watchpoints.push(wp);
        Ok(id)
    }

    /// Continues execution, stepping over a currently-armed software
    /// breakpoint first so the tracee doesn't immediately retrap on its
    /// own `int3`.
    pub fn resume(&mut self) -> Result<()> {
        if matches!(self.state, ProcessState::Exited | ProcessState::Terminated) {
            return Err(Error::process_state(
                "cannot resume a process that has exited or terminated",
            ));
        }
        self.step_over_breakpoint_if_armed()?;
        if self.catch_syscalls {
            ptrace::syscall(self.pid, None).map_err(|_| Error::os("PTRACE_SYSCALL"))?;
        } else {
            ptrace::cont(self.pid, None).map_err(|_| Error::os("PTRACE_CONT"))?;
        }
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Enables or disables syscall-entry/exit stops. Sets `PTRACE_O_TRACESYSGOOD` so the
    /// resulting stop is unambiguously distinguishable from a plain
    /// `SIGTRAP`, matching the original's `Process::SetSyscallCatchPolicy`.
    pub fn set_syscall_catch_policy(&mut self, catch_all: bool) -> Result<()> {
        if catch_all {
            ptrace::setoptions(self.pid, ptrace::Options::PTRACE_O_TRACESYSGOOD)
                .map_err(|_| Error::os("PTRACE_SETOPTIONS"))?;
        }
        self.catch_syscalls = catch_all;
        Ok(())
    }

    pub fn step_instruction(&mut self) -> Result<StopReason> {
        let armed = self.disarm_breakpoint_at_pc()?;
        ptrace::step(self.pid, None).map_err(|_| Error::os("PTRACE_SINGLESTEP"))?;
        self.state = ProcessState::Running;
        let reason = self.wait_on_signal()?;
        if let Some(addr) = armed {
            self.rearm_breakpoint(addr)?;
        }
        Ok(reason)
    }

    fn step_over_breakpoint_if_armed(&mut self) -> Result<()> {
        let pc = self.registers.read_by_id(RegisterId::rip).as_u64()?;
        let addr = VirtAddr::new(pc);
        if !self.breakpoint_sites.enabled_at_address(addr) {
            return Ok(());
        }
        if self
            .breakpoint_sites
            .get_by_address(addr)
            .map(|s| s.is_hardware())
            .unwrap_or(false)
        {
            // Hardware breakpoints don't rewrite memory, nothing to step over.
            return Ok(());
        }
        let saved = self.disarm_breakpoint_at_pc()?;
        if let Some(addr) = saved {
            ptrace::step(self.pid, None).map_err(|_| Error::os("PTRACE_SINGLESTEP"))?;
            self.state = ProcessState::Running;
            waitpid(self.pid, None).map_err(|_| Error::os("waitpid"))?;
            self.rearm_breakpoint(addr)?;
        }
        Ok(())
    }

    fn disarm_breakpoint_at_pc(&mut self) -> Result<Option<VirtAddr>> {
        let pc = self.registers.read_by_id(RegisterId::rip).as_u64()?;
        let addr = VirtAddr::new(pc);
        if !self.breakpoint_sites.enabled_at_address(addr) {
            return Ok(None);
        }
        if let Some(site) = self.breakpoint_sites.get_by_address_mut(addr) {
            if !site.is_hardware() {
                site.disable()?;
                return Ok(Some(addr));
            }
        }
        Ok(None)
    }

    fn rearm_breakpoint(&mut self, addr: VirtAddr) -> Result<()> {
        if let Some(site) = self.breakpoint_sites.get_by_address_mut(addr) {
            site.enable()?;
        }
        Ok(())
    }

    /// Blocks until the tracee stops, exits, or is killed, and classifies
    /// the result.
    pub fn wait_on_signal(&mut self) -> Result<StopReason> {
        let status = waitpid(self.pid, None).map_err(|_| Error::os("waitpid"))?;
        let reason = self.stop_reason_from_status(status)?;
        self.state = reason.state;
        if reason.state == ProcessState::Stopped {
            self.read_all_registers()?;
            if reason.trap_reason == Some(TrapReason::SoftwareBreak) {
                // int3 advances rip past the trap byte; rewind it so it
                // points back at the breakpoint's own address.
                let pc = self.registers.read_by_id(RegisterId::rip).as_u64()?;
                self.registers
                    .write_by_id(RegisterId::rip, crate::registers::RegisterValue::U64(pc - 1))?;
            }
            self.update_watchpoint_data()?;
            if let Some(target) = self.target {
                let pc = self.registers.read_by_id(RegisterId::rip).as_u64()?;
                // SAFETY: see the invariant documented on the `target`
                // field — `Target` outlives every `Process` it owns for
                // the whole debugging session, and `notify_stop` only
                // touches `Target`'s `Dwarf`/`Stack` fields, never the
                // `Process` this call is already borrowing.
                unsafe { (*target).notify_stop(pc) };
            }
        }
        Ok(reason)
    }

    /// Re-snapshots every enabled watchpoint's watched bytes after any stop
    /// that might have changed tracee memory. Called whenever a wait returns.
    fn update_watchpoint_data(&mut self) -> Result<()> {
        let addresses: Vec<VirtAddr> = self
            .watchpoints
            .iter()
            .filter(|w| w.is_enabled())
            .map(|w| crate::stoppoint_collection::Stoppoint::address(w))
            .collect();
        for addr in addresses {
            if let Some(wp) = self.watchpoints.get_by_address_mut(addr) {
                wp.update_data()?;
            }
        }
        Ok(())
    }

    fn stop_reason_from_status(&self, status: WaitStatus) -> Result<StopReason> {
        match status {
            WaitStatus::Exited(_, code) => Ok(StopReason {
                state: ProcessState::Exited,
                info: code,
                trap_reason: None,
                stoppoint_id: None,
            }),
            WaitStatus::Signaled(_, signal, _) => Ok(StopReason {
                state: ProcessState::Terminated,
                info: signal as i32,
                trap_reason: None,
                stoppoint_id: None,
            }),
            WaitStatus::Stopped(_, signal) => {
                let (trap_reason, stoppoint_id) = if signal == Signal::SIGTRAP {
                    self.classify_trap()
                } else {
                    (None, None)
                };
                Ok(StopReason {
                    state: ProcessState::Stopped,
                    info: signal as i32,
                    trap_reason,
                    stoppoint_id,
                })
            }
            WaitStatus::PtraceSyscall(_) => Ok(StopReason {
                state: ProcessState::Stopped,
                info: Signal::SIGTRAP as i32,
                trap_reason: Some(TrapReason::Syscall),
                stoppoint_id: None,
            }),
            _ => Ok(StopReason {
                state: ProcessState::Stopped,
                info: 0,
                trap_reason: Some(TrapReason::Unknown),
                stoppoint_id: None,
            }),
        }
    }

    /// Distinguishes a software breakpoint trap, a hardware
    /// breakpoint/watchpoint trap, and a single-step trap, using
    /// `PTRACE_GETSIGINFO`'s `si_code` and, for the hardware case, `DR6`.
    fn classify_trap(&self) -> (Option<TrapReason>, Option<i32>) {
        let siginfo = match ptrace::getsiginfo(self.pid) {
            Ok(info) => info,
            Err(_) => return (Some(TrapReason::Unknown), None),
        };
        match siginfo.si_code {
            libc::TRAP_BRKPT => {
                let pc = self
                    .registers
                    .read_by_id(RegisterId::rip)
                    .as_u64()
                    .unwrap_or(0);
                let id = self
                    .breakpoint_sites
                    .get_by_address(VirtAddr::new(pc.wrapping_sub(1)))
                    .map(crate::stoppoint_collection::Stoppoint::id);
                (Some(TrapReason::SoftwareBreak), id)
            }
            libc::TRAP_HWBKPT => {
                let dr6 = self.read_debug_register(RegisterId::dr6).unwrap_or(0);
                for i in 0..4 {
                    if dr6 & (1 << i) != 0 {
                        if let Some(owner) = self.hardware_slots.owner(i) {
                            return (Some(TrapReason::HardwareBreak), Some(owner));
                        }
                    }
                }
                (Some(TrapReason::HardwareBreak), None)
            }
            libc::TRAP_TRACE => (Some(TrapReason::SingleStep), None),
            _ => (Some(TrapReason::Unknown), None),
        }
    }

    fn read_all_registers(&mut self) -> Result<()> {
        let gprs = ptrace::getregs(self.pid).map_err(|_| Error::os("PTRACE_GETREGS"))?;
        let gpr_bytes = unsafe {
            std::slice::from_raw_parts(
                &gprs as *const _ as *const u8,
                std::mem::size_of_val(&gprs),
            )
        };
        self.registers.raw_bytes_mut()[..gpr_bytes.len()].copy_from_slice(gpr_bytes);

        let fprs = ptrace::getfpregs(self.pid).map_err(|_| Error::os("PTRACE_GETFPREGS"))?;
        let fpr_bytes = unsafe {
            std::slice::from_raw_parts(
                &fprs as *const _ as *const u8,
                std::mem::size_of_val(&fprs),
            )
        };
        let fpr_base = gpr_bytes.len() + 8;
        self.registers.raw_bytes_mut()[fpr_base..fpr_base + fpr_bytes.len()]
            .copy_from_slice(fpr_bytes);
        Ok(())
    }

    pub(crate) fn write_gprs(&mut self, data: &[u8; 960]) -> Result<()> {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::user_regs_struct>();
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                &mut regs as *mut _ as *mut u8,
                size,
            );
        }
        ptrace::setregs(self.pid, regs).map_err(|_| Error::os("PTRACE_SETREGS"))
    }

    pub(crate) fn write_fprs(&mut self, data: &[u8; 960]) -> Result<()> {
        let gpr_size = std::mem::size_of::<libc::user_regs_struct>();
        let fpr_base = gpr_size + 8;
        let size = std::mem::size_of::<libc::user_fpregs_struct>();
        let mut fprs: libc::user_fpregs_struct = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(
                data[fpr_base..fpr_base + size].as_ptr(),
                &mut fprs as *mut _ as *mut u8,
                size,
            );
        }
        ptrace::setfpregs(self.pid, fprs).map_err(|_| Error::os("PTRACE_SETFPREGS"))
    }

    fn read_debug_register(&self, id: RegisterId) -> Result<u64> {
        let info = register_info::by_id(id);
        debug_assert_eq!(info.kind, RegisterType::Dr);
        let raw = unsafe {
            libc::ptrace(
                libc::PTRACE_PEEKUSER,
                self.pid.as_raw(),
                info.offset as *mut libc::c_void,
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if raw == -1 {
            return Err(Error::os("PTRACE_PEEKUSER"));
        }
        Ok(raw as u64)
    }

    pub(crate) fn write_debug_register(&mut self, id: RegisterId, value: u64) -> Result<()> {
        let info = register_info::by_id(id);
        debug_assert_eq!(info.kind, RegisterType::Dr);
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_POKEUSER,
                self.pid.as_raw(),
                info.offset as *mut libc::c_void,
                value as *mut libc::c_void,
            )
        };
        if ret == -1 {
            return Err(Error::os("PTRACE_POKEUSER"));
        }
        Ok(())
    }

    fn write_dr7(&mut self, dr7: u64) -> Result<()> {
        self.write_debug_register(RegisterId::dr7, dr7)
    }

    fn read_dr7(&self) -> Result<u64> {
        self.read_debug_register(RegisterId::dr7)
    }

    /// Allocates a free `DR0`-`DR3` slot for an execution breakpoint and
    /// arms it in `DR7` (length=1 byte, type=00 execute).
    pub(crate) fn set_hardware_breakpoint(&mut self, owner: i32, address: VirtAddr) -> Result<usize> {
        let index = self.hardware_slots.allocate(owner)?;
        self.arm_debug_register(index, address, 0b00, 0b00)?;
        Ok(index)
    }

    /// Allocates a free slot for a watchpoint, encoding `mode` into the
    /// `DR7` type bits and `size` into the length bits.
    pub(crate) fn set_watchpoint(
        &mut self,
        owner: i32,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<usize> {
        let index = self.hardware_slots.allocate(owner)?;
        let rw = match mode {
            StoppointMode::Write => 0b01,
            StoppointMode::ReadWrite => 0b11,
            StoppointMode::Execute => 0b00,
        };
        let len = match size {
            1 => 0b00,
            2 => 0b01,
            8 => 0b10,
            4 => 0b11,
            _ => return Err(Error::process_state("invalid watchpoint size")),
        };
        self.arm_debug_register(index, address, rw, len)
            .map(|()| index)
    }

    fn arm_debug_register(&mut self, index: usize, address: VirtAddr, rw: u64, len: u64) -> Result<()> {
        let dr_id = match index {
            0 => RegisterId::dr0,
            1 => RegisterId::dr1,
            2 => RegisterId::dr2,
            _ => RegisterId::dr3,
        };
        self.write_debug_register(dr_id, address.addr())?;

        let mut dr7 = self.read_dr7()?;
        let enable_bit = 1u64 << (index * 2);
        let control_shift = 16 + index * 4;
        let control_mask = 0b1111u64 << control_shift;
        dr7 &= !control_mask;
        dr7 |= enable_bit;
        dr7 |= (rw | (len << 2)) << control_shift;
        self.write_dr7(dr7)
    }

    pub(crate) fn clear_hardware_stoppoint(&mut self, index: usize) -> Result<()> {
        let mut dr7 = self.read_dr7()?;
        dr7 &= !(1u64 << (index * 2));
        self.write_dr7(dr7)?;
        self.hardware_slots.free(index);
        Ok(())
    }

    fn mem_file(&mut self) -> Result<&mut File> {
        if self.mem_fd.is_none() {
            let path = format!("/proc/{}/mem", self.pid.as_raw());
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|_| Error::os("open(/proc/pid/mem)"))?;
            self.mem_fd = Some(file);
        }
        Ok(self.mem_fd.as_mut().unwrap())
    }

    /// Reads `size` bytes of tracee memory at `address`, as-is (software
    /// breakpoint `0xCC` bytes included).
    pub fn read_memory(&mut self, address: VirtAddr, size: usize) -> Result<Vec<u8>> {
        let file = self.mem_file()?;
        file.seek(SeekFrom::Start(address.addr()))
            .map_err(|_| Error::os("lseek(/proc/pid/mem)"))?;
        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf)
            .map_err(|_| Error::os("read(/proc/pid/mem)"))?;
        Ok(buf)
    }

    /// Like [`Process::read_memory`], but replaces any byte shadowed by an
    /// enabled software breakpoint with its saved original, so
    /// disassembly and source-level memory inspection never see our own
    /// `int3`s.
    pub fn read_memory_without_traps(&mut self, address: VirtAddr, size: usize) -> Result<Vec<u8>> {
        let mut bytes = self.read_memory(address, size)?;
        let lo = address.addr();
        let hi = lo + size as u64;
        for site in self.breakpoint_sites.iter() {
            if site.is_hardware() || !crate::stoppoint_collection::Stoppoint::is_enabled(site) {
                continue;
            }
            let site_addr = site.address().addr();
            if site_addr >= lo && site_addr < hi {
                bytes[(site_addr - lo) as usize] = site.saved_data();
            }
        }
        Ok(bytes)
    }

    pub fn write_memory(&mut self, address: VirtAddr, data: &[u8]) -> Result<()> {
        let file = self.mem_file()?;
        file.seek(SeekFrom::Start(address.addr()))
            .map_err(|_| Error::os("lseek(/proc/pid/mem)"))?;
        file.write_all(data)
            .map_err(|_| Error::os("write(/proc/pid/mem)"))?;
        Ok(())
    }

    /// Installs `0xCC` at `address`, returning the byte it replaced.
    pub(crate) fn install_software_breakpoint(&mut self, address: VirtAddr) -> Result<u8> {
        let saved = self.read_memory(address, 1)?[0];
        self.write_memory(address, &[0xCC])?;
        Ok(saved)
    }

    pub(crate) fn remove_software_breakpoint(&mut self, address: VirtAddr, saved: u8) -> Result<()> {
        self.write_memory(address, &[saved])
    }

    /// Parses `/proc/pid/auxv` into a map keyed by `AT_*` type, used by
    /// the symbolic target layer to compute the load bias of a PIE binary
    /// from `AT_ENTRY`.
    pub fn read_auxv(&self) -> Result<HashMap<u64, u64>> {
        let mut file = File::open(format!("/proc/{}/auxv", self.pid.as_raw()))
            .map_err(|_| Error::os("open(/proc/pid/auxv)"))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|_| Error::os("read(/proc/pid/auxv)"))?;
        let mut map = HashMap::new();
        for pair in bytes.chunks_exact(16) {
            let ty = u64::from_ne_bytes(pair[0..8].try_into().unwrap());
            let val = u64::from_ne_bytes(pair[8..16].try_into().unwrap());
            if ty == 0 {
                break;
            }
            map.insert(ty, val);
        }
        Ok(map)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.state == ProcessState::Running {
            let _ = nix::sys::signal::kill(self.pid, Signal::SIGSTOP);
            let _ = waitpid(self.pid, Some(WaitPidFlag::empty()));
        }
        if self.is_attached {
            let _ = ptrace::detach(self.pid, None);
            let _ = nix::sys::signal::kill(self.pid, Signal::SIGCONT);
        }
        if self.terminate_on_end {
            let _ = nix::sys::signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

/// Runs entirely inside the forked child: arranges to be traced, resets
/// ASLR if asked, and `execvp`s the target, reporting any failure over
/// `channel` before `_exit`ing.
fn channel_child_exec(
    channel: &Pipe,
    path: &Path,
    args: &[String],
    disable_aslr: bool,
    stdout_fd: Option<RawFd>,
) -> Result<()> {
    ptrace::traceme().map_err(|_| Error::os("PTRACE_TRACEME"))?;

    if disable_aslr {
        unsafe {
            let current = libc::personality(0xffffffff);
            libc::personality((current as libc::c_ulong) | 0x0040_0000);
        }
    }

    if let Some(fd) = stdout_fd {
        if unsafe { libc::dup2(fd, libc::STDOUT_FILENO) } == -1 {
            return Err(Error::os("dup2"));
        }
    }

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::format("NUL in path"))?;
    let mut c_args: Vec<CString> = vec![c_path.clone()];
    for arg in args {
        c_args.push(CString::new(arg.as_bytes()).map_err(|_| Error::format("NUL in argv"))?);
    }
    let err = nix::unistd::execvp(&c_path, &c_args).unwrap_err();
    let msg = format!("execvp failed: {err}");
    let _ = channel.write(msg.as_bytes());
    Ok(())
}
