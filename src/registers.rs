//! Typed access to a stopped thread's register file. Grounded in the original
//! `Registers.cpp`'s `Read`/`Write`, which index into a raw
//! `user`-sized byte buffer by `RegisterInfo::offset` and widen/narrow
//! through the same `Widen` helper this crate exposes as `bit::to_byte128`.

use std::fmt;

use crate::bit;
use crate::error::{Error, Result};
use crate::process::Process;
use crate::register_info::{self, RegisterFormat, RegisterId, RegisterInfo, RegisterType};
use crate::types::{Byte128, Byte64};

/// A value read from or about to be written to a register, wide enough to
/// hold the largest register (a 128-bit XMM/ST lane) while remaining easy
/// to narrow back down for integer registers.
#[derive(Clone, Copy)]
pub enum RegisterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I64(i64),
    F64(f64),
    Byte64(Byte64),
    Byte128(Byte128),
}

impl fmt::Debug for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::U8(v) => write!(f, "{v:#x}"),
            RegisterValue::U16(v) => write!(f, "{v:#x}"),
            RegisterValue::U32(v) => write!(f, "{v:#x}"),
            RegisterValue::U64(v) => write!(f, "{v:#x}"),
            RegisterValue::I64(v) => write!(f, "{v:#x}"),
            RegisterValue::F64(v) => write!(f, "{v}"),
            RegisterValue::Byte64(v) => write!(f, "{v:02x?}"),
            RegisterValue::Byte128(v) => write!(f, "{v:02x?}"),
        }
    }
}

impl RegisterValue {
    fn to_byte128(self) -> Byte128 {
        match self {
            RegisterValue::U8(v) => bit::to_byte128(v),
            RegisterValue::U16(v) => bit::to_byte128(v),
            RegisterValue::U32(v) => bit::to_byte128(v),
            RegisterValue::U64(v) => bit::to_byte128(v),
            RegisterValue::I64(v) => bit::to_byte128(v),
            RegisterValue::F64(v) => bit::to_byte128(v),
            RegisterValue::Byte64(v) => bit::to_byte128(v),
            RegisterValue::Byte128(v) => v,
        }
    }

    pub fn as_u64(self) -> Result<u64> {
        match self {
            RegisterValue::U8(v) => Ok(v as u64),
            RegisterValue::U16(v) => Ok(v as u64),
            RegisterValue::U32(v) => Ok(v as u64),
            RegisterValue::U64(v) => Ok(v),
            RegisterValue::I64(v) => Ok(v as u64),
            _ => Err(Error::format("register value is not integral")),
        }
    }
}

/// A snapshot of every general-purpose, floating-point, and debug
/// register, laid out exactly as the kernel's `struct user` so that
/// `GETREGS`/`GETFPREGS`/`PEEKUSER` results can be copied in directly and
/// `SETREGS`/`POKEUSER` can copy back out.
///
/// Holds a raw back-pointer to its owning `Process` (the identical
/// pattern as `types::FileAddr`) rather than a lifetime
/// parameter, since `Process` itself owns a `Registers` by value and a
/// self-referential `&'a Process` would be circular.
pub struct Registers {
    data: [u8; 960],
    proc: *mut Process,
}

unsafe impl Send for Registers {}
unsafe impl Sync for Registers {}

impl Registers {
    pub(crate) fn new(proc: *mut Process) -> Self {
        Registers {
            data: [0u8; 960],
            proc,
        }
    }

    fn proc(&self) -> &mut Process {
        // SAFETY: a Registers is only ever reachable through the Process
        // that owns it, which outlives it for the lifetime of the borrow.
        unsafe { &mut *self.proc }
    }

    pub(crate) fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn raw_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reads the register named by `info`, interpreting its bytes per
    /// `info.format`, mirroring the original's `Registers::Read` switch on
    /// `RegisterFormat`.
    pub fn read(&self, info: &RegisterInfo) -> RegisterValue {
        let bytes = &self.data[info.offset..info.offset + info.size];
        match (info.format, info.size) {
            (RegisterFormat::UInt, 1) => RegisterValue::U8(bit::from_bytes(bytes, 0)),
            (RegisterFormat::UInt, 2) => RegisterValue::U16(bit::from_bytes(bytes, 0)),
            (RegisterFormat::UInt, 4) => RegisterValue::U32(bit::from_bytes(bytes, 0)),
            (RegisterFormat::UInt, 8) => RegisterValue::U64(bit::from_bytes(bytes, 0)),
            (RegisterFormat::DoubleFloat, _) => RegisterValue::F64(bit::from_bytes(bytes, 0)),
            (RegisterFormat::LongDouble, _) | (RegisterFormat::Vector, 16) => {
                let mut whole = [0u8; 16];
                whole[..bytes.len()].copy_from_slice(bytes);
                RegisterValue::Byte128(whole)
            }
            (RegisterFormat::Vector, 8) => {
                let mut whole = [0u8; 8];
                whole.copy_from_slice(bytes);
                RegisterValue::Byte64(whole)
            }
            _ => {
                let mut whole = [0u8; 16];
                whole[..bytes.len()].copy_from_slice(bytes);
                RegisterValue::Byte128(whole)
            }
        }
    }

    pub fn read_by_id(&self, id: RegisterId) -> RegisterValue {
        self.read(register_info::by_id(id))
    }

    /// Writes `value` into the in-memory snapshot and flushes the owning
    /// group (GPRs vs FPRs) back to the tracee via `ptrace`, matching the
    /// original's "write-through" semantics: a register write is visible
    /// to the tracee as soon as the call returns.
    pub fn write(&mut self, info: &RegisterInfo, value: RegisterValue) -> Result<()> {
        let wide = value.to_byte128();
        self.data[info.offset..info.offset + info.size].copy_from_slice(&wide[..info.size]);
        match info.kind {
            RegisterType::Fpr => self.proc().write_fprs(&self.data)?,
            RegisterType::Dr => {
                let val: u64 = bit::from_bytes(&self.data, info.offset);
                self.proc().write_debug_register(info.id, val)?;
            }
            RegisterType::Gpr | RegisterType::SubGpr => self.proc().write_gprs(&self.data)?,
        }
        Ok(())
    }

    pub fn write_by_id(&mut self, id: RegisterId, value: RegisterValue) -> Result<()> {
        let info = *register_info::by_id(id);
        self.write(&info, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_back_raw_write() {
        let mut regs = Registers {
            data: [0u8; 960],
            proc: std::ptr::null_mut(),
        };
        let info = register_info::by_id(RegisterId::rax);
        let wide = RegisterValue::U64(0x1122_3344_5566_7788).to_byte128();
        regs.data[info.offset..info.offset + info.size].copy_from_slice(&wide[..info.size]);
        match regs.read(info) {
            RegisterValue::U64(v) => assert_eq!(v, 0x1122_3344_5566_7788),
            other => panic!("unexpected {other:?}"),
        }
    }
}
