//! Typed address primitives.
//!
//! `FileAddr`/`FileOffset` carry a non-owning pointer back to the `Elf`
//! that produced them, mirroring the original's raw `const Elf*` member —
//! modeled here as raw pointers rather than threading a lifetime parameter
//! through every DWARF and ELF type. The invariant callers must uphold is
//! the obvious one: an
//! `Elf` outlives every `FileAddr`/`FileOffset` derived from it, which
//! holds throughout this crate because `Elf` is owned by `Target` for the
//! entire debugging session.

use std::fmt;
use std::ops::{Add, Sub};

use crate::elf::Elf;

/// A runtime process address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub fn new(addr: u64) -> Self {
        VirtAddr(addr)
    }

    pub fn addr(self) -> u64 {
        self.0
    }

    /// Converts to a file address, provided the virtual address falls
    /// inside a section of `elf`. Returns the null `FileAddr` otherwise —
    /// address conversions return a sentinel (empty) value rather than
    /// panicking when the containing section can't be located.
    pub fn to_file_addr(self, elf: &Elf) -> FileAddr {
        if elf.section_header_containing_address_virt(self).is_none() {
            return FileAddr::null();
        }
        FileAddr::new(elf, self.0.wrapping_sub(elf.load_bias().addr()))
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl Add<i64> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: i64) -> VirtAddr {
        VirtAddr((self.0 as i64 + rhs) as u64)
    }
}

impl Add<u64> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: u64) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}

impl Sub<i64> for VirtAddr {
    type Output = VirtAddr;
    fn sub(self, rhs: i64) -> VirtAddr {
        VirtAddr((self.0 as i64 - rhs) as u64)
    }
}

impl Sub<VirtAddr> for VirtAddr {
    type Output = i64;
    fn sub(self, rhs: VirtAddr) -> i64 {
        self.0 as i64 - rhs.0 as i64
    }
}

/// An address as written in an ELF file, pre-relocation. Arithmetic and
/// ordering are only meaningful between `FileAddr`s that share the same
/// owning `Elf`; comparing across different ELF images is a logic error
/// and panics in debug builds, matching the original's
/// `assert(elf == other.elf)`.
#[derive(Clone, Copy)]
pub struct FileAddr {
    elf: Option<*const Elf>,
    addr: u64,
}

// SAFETY: FileAddr never dereferences its pointer on its own; callers who
// want the referenced Elf go through `elf_file()`, which reconstitutes a
// `&Elf` under the same aliasing rules as any other shared reference. The
// pointer itself is Copy data, like any other address type.
unsafe impl Send for FileAddr {}
unsafe impl Sync for FileAddr {}

impl FileAddr {
    pub fn new(elf: &Elf, addr: u64) -> Self {
        FileAddr {
            elf: Some(elf as *const Elf),
            addr,
        }
    }

    /// The sentinel "no address" value returned when a lookup fails to
    /// locate a containing section or ELF image.
    pub fn null() -> Self {
        FileAddr { elf: None, addr: 0 }
    }

    pub fn is_null(self) -> bool {
        self.elf.is_none()
    }

    pub fn addr(self) -> u64 {
        self.addr
    }

    pub fn elf_file<'a>(self) -> Option<&'a Elf> {
        // SAFETY: see the invariant documented on the module and the Send/Sync impl above.
        self.elf.map(|p| unsafe { &*p })
    }

    pub fn to_virt_addr(self) -> VirtAddr {
        let Some(elf) = self.elf_file() else {
            return VirtAddr::default();
        };
        if elf.section_header_containing_address_file(self).is_none() {
            return VirtAddr::default();
        }
        VirtAddr::new(self.addr.wrapping_add(elf.load_bias().addr()))
    }
}

impl fmt::Debug for FileAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileAddr({:#x})", self.addr)
    }
}

impl PartialEq for FileAddr {
    fn eq(&self, other: &Self) -> bool {
        self.elf == other.elf && self.addr == other.addr
    }
}
impl Eq for FileAddr {}

impl PartialOrd for FileAddr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FileAddr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        debug_assert!(
            self.elf.is_none() || other.elf.is_none() || self.elf == other.elf,
            "comparing FileAddrs from different ELF images"
        );
        self.addr.cmp(&other.addr)
    }
}

impl Add<i64> for FileAddr {
    type Output = FileAddr;
    fn add(self, rhs: i64) -> FileAddr {
        FileAddr {
            elf: self.elf,
            addr: (self.addr as i64 + rhs) as u64,
        }
    }
}

impl Add<u64> for FileAddr {
    type Output = FileAddr;
    fn add(self, rhs: u64) -> FileAddr {
        FileAddr {
            elf: self.elf,
            addr: self.addr + rhs,
        }
    }
}

impl Sub<i64> for FileAddr {
    type Output = FileAddr;
    fn sub(self, rhs: i64) -> FileAddr {
        FileAddr {
            elf: self.elf,
            addr: (self.addr as i64 - rhs) as u64,
        }
    }
}

/// An absolute byte offset into an ELF file's on-disk image.
#[derive(Clone, Copy)]
pub struct FileOffset {
    elf: *const Elf,
    offset: u64,
}

unsafe impl Send for FileOffset {}
unsafe impl Sync for FileOffset {}

impl FileOffset {
    pub fn new(elf: &Elf, offset: u64) -> Self {
        FileOffset {
            elf: elf as *const Elf,
            offset,
        }
    }

    pub fn offset(self) -> u64 {
        self.offset
    }

    pub fn elf_file<'a>(self) -> &'a Elf {
        // SAFETY: see the module-level invariant.
        unsafe { &*self.elf }
    }
}

/// Which kind of hardware stoppoint a breakpoint/watchpoint installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppointMode {
    Write,
    ReadWrite,
    Execute,
}

pub type Byte64 = [u8; 8];
pub type Byte128 = [u8; 16];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn virt_addr_arithmetic() {
        let a = VirtAddr::new(0x1000);
        assert_eq!((a + 4i64).addr(), 0x1004);
        assert_eq!((a - 4i64).addr(), 0xffc);
        assert_eq!((a + 4i64) - a, 4);
    }

    #[test]
    fn file_addr_null_is_distinct() {
        let a = FileAddr::null();
        let b = FileAddr::null();
        assert_eq!(a, b);
        assert!(a.is_null());
    }
}
