//! A generic owning collection of id-addressable, range-addressable stop
//! points, shared by breakpoint sites
//! and watchpoints. Grounded in the original `StoppointCollection<T>`
//! template, reworked here as a `Vec<T>` plus small trait bound instead of
//! a template requiring `T::Id()`/`T::Address()`/`T::AtAddress()` member
//! functions.

use crate::types::VirtAddr;

/// What any stoppoint-like type must expose for the collection to index
/// it by id and by address.
pub trait Stoppoint {
    fn id(&self) -> i32;
    fn address(&self) -> VirtAddr;
    /// Whether this stoppoint, even if disabled, occupies `addr` — used to
    /// find "the stoppoint at this address" regardless of enabled state,
    /// matching the original's `AtAddress`.
    fn at_address(&self, addr: VirtAddr) -> bool {
        self.address() == addr
    }
    fn is_enabled(&self) -> bool;
}

pub struct StoppointCollection<T> {
    points: Vec<T>,
}

impl<T> Default for StoppointCollection<T> {
    fn default() -> Self {
        StoppointCollection { points: Vec::new() }
    }
}

impl<T: Stoppoint> StoppointCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: T) {
        self.points.push(point);
    }

    pub fn contains_id(&self, id: i32) -> bool {
        self.points.iter().any(|p| p.id() == id)
    }

    pub fn contains_address(&self, addr: VirtAddr) -> bool {
        self.points.iter().any(|p| p.at_address(addr))
    }

    /// Whether there is an *enabled* stoppoint at `addr` — what the
    /// resume-step logic needs to ask before treating a trap as a
    /// breakpoint hit.
    pub fn enabled_at_address(&self, addr: VirtAddr) -> bool {
        self.points
            .iter()
            .any(|p| p.at_address(addr) && p.is_enabled())
    }

    pub fn get_by_id(&self, id: i32) -> Option<&T> {
        self.points.iter().find(|p| p.id() == id)
    }

    pub fn get_by_id_mut(&mut self, id: i32) -> Option<&mut T> {
        self.points.iter_mut().find(|p| p.id() == id)
    }

    pub fn get_by_address(&self, addr: VirtAddr) -> Option<&T> {
        self.points.iter().find(|p| p.at_address(addr))
    }

    pub fn get_by_address_mut(&mut self, addr: VirtAddr) -> Option<&mut T> {
        self.points.iter_mut().find(|p| p.at_address(addr))
    }

    pub fn remove_by_id(&mut self, id: i32) -> Option<T> {
        let idx = self.points.iter().position(|p| p.id() == id)?;
        Some(self.points.remove(idx))
    }

    pub fn remove_by_address(&mut self, addr: VirtAddr) -> Option<T> {
        let idx = self.points.iter().position(|p| p.at_address(addr))?;
        Some(self.points.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.points.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.points.iter_mut()
    }

    /// Stoppoints whose address falls in `[low, high)`, used to find
    /// internal single-use breakpoints created for `RunUntilAddress`.
    pub fn in_region(&self, low: VirtAddr, high: VirtAddr) -> impl Iterator<Item = &T> {
        self.points
            .iter()
            .filter(move |p| p.address() >= low && p.address() < high)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Dummy {
        id: i32,
        addr: VirtAddr,
        enabled: bool,
    }
    impl Stoppoint for Dummy {
        fn id(&self) -> i32 {
            self.id
        }
        fn address(&self) -> VirtAddr {
            self.addr
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    #[test]
    fn lookup_by_id_and_address() {
        let mut col = StoppointCollection::new();
        col.push(Dummy {
            id: 1,
            addr: VirtAddr::new(0x400),
            enabled: true,
        });
        assert!(col.contains_id(1));
        assert!(col.contains_address(VirtAddr::new(0x400)));
        assert!(!col.contains_address(VirtAddr::new(0x401)));
        assert!(col.remove_by_id(1).is_some());
        assert!(col.is_empty());
    }

    #[test]
    fn enabled_at_address_respects_flag() {
        let mut col = StoppointCollection::new();
        col.push(Dummy {
            id: 1,
            addr: VirtAddr::new(0x400),
            enabled: false,
        });
        assert!(col.contains_address(VirtAddr::new(0x400)));
        assert!(!col.enabled_at_address(VirtAddr::new(0x400)));
    }
}
