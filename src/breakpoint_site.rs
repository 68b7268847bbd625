//! Low-level breakpoint sites. Grounded in the original
//! `breakpoint_site.cpp`: a software site installs `0xCC` via
//! `PEEKDATA`/`POKEDATA` and restores the saved byte on disable; a
//! hardware site claims one of the four `DR0`-`DR3` slots through the
//! owning `Process`.
//!
//! Holds a raw back-pointer to its owning `Process` and, when created on
//! behalf of a high-level `Breakpoint`, to that `Breakpoint` — see the
//! invariant documented on `types::FileAddr`.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::Result;
use crate::process::Process;
use crate::stoppoint_collection::Stoppoint;
use crate::types::VirtAddr;

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

fn next_id() -> i32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub struct BreakpointSite {
    id: i32,
    proc: *mut Process,
    address: VirtAddr,
    is_enabled: bool,
    is_hardware: bool,
    is_internal: bool,
    /// The byte originally at `address`, saved before installing `0xCC`.
    saved_data: u8,
    /// `DR0..DR3` index, once a hardware site has claimed a slot.
    hardware_register_index: Option<usize>,
    /// The owning high-level `Breakpoint`'s id, if this site was created
    /// through one.
    parent_id: Option<i32>,
}

unsafe impl Send for BreakpointSite {}
unsafe impl Sync for BreakpointSite {}

impl BreakpointSite {
    pub(crate) fn new(
        proc: *mut Process,
        address: VirtAddr,
        is_hardware: bool,
        is_internal: bool,
    ) -> Self {
        BreakpointSite {
            id: next_id(),
            proc,
            address,
            is_enabled: false,
            is_hardware,
            is_internal,
            saved_data: 0,
            hardware_register_index: None,
            parent_id: None,
        }
    }

    pub fn set_parent_id(&mut self, id: i32) {
        self.parent_id = Some(id);
    }

    pub fn parent_id(&self) -> Option<i32> {
        self.parent_id
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn is_hardware(&self) -> bool {
        self.is_hardware
    }

    /// The original byte this site's `0xCC` is shadowing, used to mask
    /// software breakpoints out of trap-free memory reads.
    pub(crate) fn saved_data(&self) -> u8 {
        self.saved_data
    }

    fn proc(&self) -> &mut Process {
        // SAFETY: a BreakpointSite only ever lives inside the Process
        // that created it, which outlives this borrow, and is only
        // reachable through that Process's own &mut borrows.
        unsafe { &mut *self.proc }
    }

    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled {
            return Ok(());
        }
        if self.is_hardware {
            let index = self.proc().set_hardware_breakpoint(self.id, self.address)?;
            self.hardware_register_index = Some(index);
        } else {
            self.saved_data = self.proc().install_software_breakpoint(self.address)?;
        }
        self.is_enabled = true;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        if !self.is_enabled {
            return Ok(());
        }
        if self.is_hardware {
            if let Some(index) = self.hardware_register_index.take() {
                self.proc().clear_hardware_stoppoint(index)?;
            }
        } else {
            self.proc()
                .remove_software_breakpoint(self.address, self.saved_data)?;
        }
        self.is_enabled = false;
        Ok(())
    }

    pub fn address(&self) -> VirtAddr {
        self.address
    }
}

impl Stoppoint for BreakpointSite {
    fn id(&self) -> i32 {
        self.id
    }
    fn address(&self) -> VirtAddr {
        self.address
    }
    fn is_enabled(&self) -> bool {
        self.is_enabled
    }
}
