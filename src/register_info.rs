//! Register metadata table. Built from a handful of small
//! `macro_rules!` families below, the Rust analogue of the original's
//! `#include <libldb/detail/registers.inc>` X-macro list — together they
//! are the single source of truth for every register's id, DWARF number,
//! name, size, byte offset into the kernel `user` struct, kind, and
//! format.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Gpr,
    SubGpr,
    Fpr,
    Dr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFormat {
    UInt,
    DoubleFloat,
    LongDouble,
    Vector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum RegisterId {
    rax,
    rdx,
    rcx,
    rbx,
    rsi,
    rdi,
    rbp,
    rsp,
    r8,
    r9,
    r10,
    r11,
    r12,
    r13,
    r14,
    r15,
    rip,
    eflags,
    cs,
    fs,
    gs,
    ss,
    ds,
    es,
    orig_rax,

    eax,
    edx,
    ecx,
    ebx,
    esi,
    edi,
    ebp,
    esp,
    r8d,
    r9d,
    r10d,
    r11d,
    r12d,
    r13d,
    r14d,
    r15d,

    ax,
    dx,
    cx,
    bx,
    si,
    di,
    bp,
    sp,
    r8w,
    r9w,
    r10w,
    r11w,
    r12w,
    r13w,
    r14w,
    r15w,

    ah,
    dh,
    ch,
    bh,
    al,
    dl,
    cl,
    bl,
    r8b,
    r9b,
    r10b,
    r11b,
    r12b,
    r13b,
    r14b,
    r15b,

    fcw,
    fsw,
    ftw,
    fop,
    frip,
    frdp,
    mxcsr,
    mxcsr_mask,

    st0,
    st1,
    st2,
    st3,
    st4,
    st5,
    st6,
    st7,

    mm0,
    mm1,
    mm2,
    mm3,
    mm4,
    mm5,
    mm6,
    mm7,

    xmm0,
    xmm1,
    xmm2,
    xmm3,
    xmm4,
    xmm5,
    xmm6,
    xmm7,
    xmm8,
    xmm9,
    xmm10,
    xmm11,
    xmm12,
    xmm13,
    xmm14,
    xmm15,

    dr0,
    dr1,
    dr2,
    dr3,
    dr4,
    dr5,
    dr6,
    dr7,
}

#[derive(Debug, Clone, Copy)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: &'static str,
    pub dwarf_id: i32,
    pub size: usize,
    pub offset: usize,
    pub kind: RegisterType,
    pub format: RegisterFormat,
}

const fn gpr64(i: usize) -> usize {
    i * 8
}
// struct user_regs_struct field order on x86-64.
const R15: usize = gpr64(0);
const R14: usize = gpr64(1);
const R13: usize = gpr64(2);
const R12: usize = gpr64(3);
const RBP: usize = gpr64(4);
const RBX: usize = gpr64(5);
const R11: usize = gpr64(6);
const R10: usize = gpr64(7);
const R9: usize = gpr64(8);
const R8: usize = gpr64(9);
const RAX: usize = gpr64(10);
const RCX: usize = gpr64(11);
const RDX: usize = gpr64(12);
const RSI: usize = gpr64(13);
const RDI: usize = gpr64(14);
const ORIG_RAX: usize = gpr64(15);
const RIP: usize = gpr64(16);
const CS: usize = gpr64(17);
const EFLAGS: usize = gpr64(18);
const RSP: usize = gpr64(19);
const SS: usize = gpr64(20);
#[allow(dead_code)]
const FS_BASE: usize = gpr64(21);
#[allow(dead_code)]
const GS_BASE: usize = gpr64(22);
const DS: usize = gpr64(23);
const ES: usize = gpr64(24);
const FS: usize = gpr64(25);
const GS: usize = gpr64(26);

/// sizeof(struct user_regs_struct) (27 fields * 8 bytes), rounded up to the
/// 8-byte-aligned start of `user::i387` (4 bytes of `u_fpvalid` plus 4
/// bytes of padding).
const FPR_BASE: usize = 27 * 8 + 8;
const FCW: usize = FPR_BASE;
const FSW: usize = FPR_BASE + 2;
const FTW: usize = FPR_BASE + 4;
const FOP: usize = FPR_BASE + 6;
const FRIP: usize = FPR_BASE + 8;
const FRDP: usize = FPR_BASE + 16;
const MXCSR: usize = FPR_BASE + 24;
const MXCSR_MASK: usize = FPR_BASE + 28;
const ST_BASE: usize = FPR_BASE + 32;
const XMM_BASE: usize = ST_BASE + 16 * 8;

/// offsetof(struct user, u_debugreg).
const DR_BASE: usize = 848;

macro_rules! sub {
    ($id:ident, $dwarf:expr, $parent_off:expr, $size:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: $dwarf,
            size: $size,
            offset: $parent_off,
            kind: RegisterType::SubGpr,
            format: RegisterFormat::UInt,
        }
    };
    ($id:ident, $dwarf:expr, $parent_off:expr, $size:expr, high_byte) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: $dwarf,
            size: $size,
            offset: $parent_off + 1,
            kind: RegisterType::SubGpr,
            format: RegisterFormat::UInt,
        }
    };
}

macro_rules! st {
    ($id:ident, $dwarf:expr, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: $dwarf,
            size: 16,
            offset: ST_BASE + $n * 16,
            kind: RegisterType::Fpr,
            format: RegisterFormat::LongDouble,
        }
    };
}

macro_rules! mm {
    ($id:ident, $dwarf:expr, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: $dwarf,
            size: 8,
            offset: ST_BASE + $n * 16,
            kind: RegisterType::Fpr,
            format: RegisterFormat::Vector,
        }
    };
}

macro_rules! xmm {
    ($id:ident, $dwarf:expr, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: $dwarf,
            size: 16,
            offset: XMM_BASE + $n * 16,
            kind: RegisterType::Fpr,
            format: RegisterFormat::Vector,
        }
    };
}

macro_rules! dr {
    ($id:ident, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: -1,
            size: 8,
            offset: DR_BASE + $n * 8,
            kind: RegisterType::Dr,
            format: RegisterFormat::UInt,
        }
    };
}

macro_rules! gpr64_info {
    ($id:ident, $dwarf:expr, $off:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: stringify!($id),
            dwarf_id: $dwarf,
            size: 8,
            offset: $off,
            kind: RegisterType::Gpr,
            format: RegisterFormat::UInt,
        }
    };
}

pub static REGISTER_INFOS: &[RegisterInfo] = &[
    gpr64_info!(rax, 0, RAX),
    gpr64_info!(rdx, 1, RDX),
    gpr64_info!(rcx, 2, RCX),
    gpr64_info!(rbx, 3, RBX),
    gpr64_info!(rsi, 4, RSI),
    gpr64_info!(rdi, 5, RDI),
    gpr64_info!(rbp, 6, RBP),
    gpr64_info!(rsp, 7, RSP),
    gpr64_info!(r8, 8, R8),
    gpr64_info!(r9, 9, R9),
    gpr64_info!(r10, 10, R10),
    gpr64_info!(r11, 11, R11),
    gpr64_info!(r12, 12, R12),
    gpr64_info!(r13, 13, R13),
    gpr64_info!(r14, 14, R14),
    gpr64_info!(r15, 15, R15),
    gpr64_info!(rip, 16, RIP),
    gpr64_info!(eflags, 49, EFLAGS),
    gpr64_info!(cs, 51, CS),
    gpr64_info!(fs, 54, FS),
    gpr64_info!(gs, 55, GS),
    gpr64_info!(ss, 52, SS),
    gpr64_info!(ds, 53, DS),
    gpr64_info!(es, 50, ES),
    gpr64_info!(orig_rax, -1, ORIG_RAX),
    // 32-bit sub-registers (same byte offset as their 64-bit parent).
    sub!(eax, -1, RAX, 4),
    sub!(edx, -1, RDX, 4),
    sub!(ecx, -1, RCX, 4),
    sub!(ebx, -1, RBX, 4),
    sub!(esi, -1, RSI, 4),
    sub!(edi, -1, RDI, 4),
    sub!(ebp, -1, RBP, 4),
    sub!(esp, -1, RSP, 4),
    sub!(r8d, -1, R8, 4),
    sub!(r9d, -1, R9, 4),
    sub!(r10d, -1, R10, 4),
    sub!(r11d, -1, R11, 4),
    sub!(r12d, -1, R12, 4),
    sub!(r13d, -1, R13, 4),
    sub!(r14d, -1, R14, 4),
    sub!(r15d, -1, R15, 4),
    // 16-bit sub-registers.
    sub!(ax, -1, RAX, 2),
    sub!(dx, -1, RDX, 2),
    sub!(cx, -1, RCX, 2),
    sub!(bx, -1, RBX, 2),
    sub!(si, -1, RSI, 2),
    sub!(di, -1, RDI, 2),
    sub!(bp, -1, RBP, 2),
    sub!(sp, -1, RSP, 2),
    sub!(r8w, -1, R8, 2),
    sub!(r9w, -1, R9, 2),
    sub!(r10w, -1, R10, 2),
    sub!(r11w, -1, R11, 2),
    sub!(r12w, -1, R12, 2),
    sub!(r13w, -1, R13, 2),
    sub!(r14w, -1, R14, 2),
    sub!(r15w, -1, R15, 2),
    // 8-bit high-byte sub-registers (ah/bh/ch/dh alias the second byte of
    // the corresponding 16-bit register, the one family with no REX-prefixed
    // equivalent).
    sub!(ah, -1, RAX, 1, high_byte),
    sub!(dh, -1, RDX, 1, high_byte),
    sub!(ch, -1, RCX, 1, high_byte),
    sub!(bh, -1, RBX, 1, high_byte),
    // 8-bit low-byte sub-registers.
    sub!(al, -1, RAX, 1),
    sub!(dl, -1, RDX, 1),
    sub!(cl, -1, RCX, 1),
    sub!(bl, -1, RBX, 1),
    sub!(r8b, -1, R8, 1),
    sub!(r9b, -1, R9, 1),
    sub!(r10b, -1, R10, 1),
    sub!(r11b, -1, R11, 1),
    sub!(r12b, -1, R12, 1),
    sub!(r13b, -1, R13, 1),
    sub!(r14b, -1, R14, 1),
    sub!(r15b, -1, R15, 1),
    // x87/FP control registers.
    RegisterInfo {
        id: RegisterId::fcw,
        name: "fcw",
        dwarf_id: 65,
        size: 2,
        offset: FCW,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::fsw,
        name: "fsw",
        dwarf_id: 66,
        size: 2,
        offset: FSW,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::ftw,
        name: "ftw",
        dwarf_id: -1,
        size: 2,
        offset: FTW,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::fop,
        name: "fop",
        dwarf_id: -1,
        size: 2,
        offset: FOP,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::frip,
        name: "frip",
        dwarf_id: -1,
        size: 8,
        offset: FRIP,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::frdp,
        name: "frdp",
        dwarf_id: -1,
        size: 8,
        offset: FRDP,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::mxcsr,
        name: "mxcsr",
        dwarf_id: 64,
        size: 4,
        offset: MXCSR,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    RegisterInfo {
        id: RegisterId::mxcsr_mask,
        name: "mxcsr_mask",
        dwarf_id: -1,
        size: 4,
        offset: MXCSR_MASK,
        kind: RegisterType::Fpr,
        format: RegisterFormat::UInt,
    },
    st!(st0, 33, 0),
    st!(st1, 34, 1),
    st!(st2, 35, 2),
    st!(st3, 36, 3),
    st!(st4, 37, 4),
    st!(st5, 38, 5),
    st!(st6, 39, 6),
    st!(st7, 40, 7),
    mm!(mm0, 41, 0),
    mm!(mm1, 42, 1),
    mm!(mm2, 43, 2),
    mm!(mm3, 44, 3),
    mm!(mm4, 45, 4),
    mm!(mm5, 46, 5),
    mm!(mm6, 47, 6),
    mm!(mm7, 48, 7),
    xmm!(xmm0, 17, 0),
    xmm!(xmm1, 18, 1),
    xmm!(xmm2, 19, 2),
    xmm!(xmm3, 20, 3),
    xmm!(xmm4, 21, 4),
    xmm!(xmm5, 22, 5),
    xmm!(xmm6, 23, 6),
    xmm!(xmm7, 24, 7),
    xmm!(xmm8, 25, 8),
    xmm!(xmm9, 26, 9),
    xmm!(xmm10, 27, 10),
    xmm!(xmm11, 28, 11),
    xmm!(xmm12, 29, 12),
    xmm!(xmm13, 30, 13),
    xmm!(xmm14, 31, 14),
    xmm!(xmm15, 32, 15),
    dr!(dr0, 0),
    dr!(dr1, 1),
    dr!(dr2, 2),
    dr!(dr3, 3),
    dr!(dr4, 4),
    dr!(dr5, 5),
    dr!(dr6, 6),
    dr!(dr7, 7),
];

pub fn by_id(id: RegisterId) -> &'static RegisterInfo {
    REGISTER_INFOS
        .iter()
        .find(|info| info.id == id)
        .expect("every RegisterId has a REGISTER_INFOS entry")
}

pub fn by_name(name: &str) -> Result<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.name == name)
        .ok_or_else(|| Error::lookup(format!("no such register: {name}")))
}

pub fn by_dwarf(dwarf_id: i32) -> Result<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.dwarf_id == dwarf_id)
        .ok_or_else(|| Error::lookup(format!("no register with DWARF number {dwarf_id}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_id_has_unique_info() {
        let rip = by_id(RegisterId::rip);
        assert_eq!(rip.name, "rip");
        assert_eq!(rip.offset, RIP);
    }

    #[test]
    fn by_name_lookup() {
        assert_eq!(by_name("rax").unwrap().id, RegisterId::rax);
        assert!(by_name("not_a_register").is_err());
    }

    #[test]
    fn sub_gpr_shares_parent_offset() {
        let eax = by_id(RegisterId::eax);
        let rax = by_id(RegisterId::rax);
        assert_eq!(eax.offset, rax.offset);
        assert_eq!(eax.size, 4);
    }

    #[test]
    fn high_byte_register_offset_by_one() {
        let ah = by_id(RegisterId::ah);
        let al = by_id(RegisterId::al);
        assert_eq!(ah.offset, al.offset + 1);
    }
}
