//! `ldb`: a native, userspace, source-level debugger for x86-64 Linux ELF
//! programs. `ptrace`-based process control, a
//! from-scratch DWARF4 engine, a hand-rolled ELF64 reader, and a symbolic
//! target layer that composes them into source-level stepping and
//! breakpoints.
//!
//! Grounded throughout in `mstange/samply`'s module layout and dependency
//! stack — see `DESIGN.md` for the per-module grounding ledger.

pub mod bit;
pub mod breakpoint;
pub mod breakpoint_site;
pub mod disassembler;
pub mod dwarf;
pub mod elf;
pub mod error;
pub mod pipe;
pub mod process;
pub mod register_info;
pub mod registers;
pub mod stack;
pub mod stoppoint_collection;
pub mod syscall;
pub mod target;
pub mod types;
pub mod watchpoint;

pub use error::{Error, Result};
pub use target::Target;
