//! Hardware watchpoints. Grounded in the original `watchpoint.cpp`: construction
//! validates alignment against the requested size, `Enable`/`Disable`
//! delegate to the owning `Process`'s `DR0`-`DR3` allocator (shared with
//! hardware breakpoints), and `UpdateData` snapshots the watched bytes so
//! callers can report what changed.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{Error, Result};
use crate::process::Process;
use crate::stoppoint_collection::Stoppoint;
use crate::types::{Byte64, StoppointMode, VirtAddr};

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

fn next_id() -> i32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub struct Watchpoint {
    id: i32,
    proc: *mut Process,
    address: VirtAddr,
    mode: StoppointMode,
    size: usize,
    is_enabled: bool,
    hardware_register_index: Option<usize>,
    previous_data: Byte64,
    current_data: Byte64,
}

unsafe impl Send for Watchpoint {}
unsafe impl Sync for Watchpoint {}

impl Watchpoint {
    pub(crate) fn new(
        proc: *mut Process,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<Self> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(Error::process_state(format!(
                "invalid watchpoint size {size}, must be 1, 2, 4, or 8"
            )));
        }
        if address.addr() & (size as u64 - 1) != 0 {
            return Err(Error::process_state(format!(
                "watchpoint address {:#x} is not aligned to size {size}",
                address.addr()
            )));
        }
        Ok(Watchpoint {
            id: next_id(),
            proc,
            address,
            mode,
            size,
            is_enabled: false,
            hardware_register_index: None,
            previous_data: [0; 8],
            current_data: [0; 8],
        })
    }

    fn proc(&self) -> &mut Process {
        // SAFETY: see BreakpointSite::proc.
        unsafe { &mut *self.proc }
    }

    pub fn mode(&self) -> StoppointMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn previous_data(&self) -> Byte64 {
        self.previous_data
    }

    pub fn current_data(&self) -> Byte64 {
        self.current_data
    }

    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled {
            return Ok(());
        }
        let index = self
            .proc()
            .set_watchpoint(self.id, self.address, self.mode, self.size)?;
        self.hardware_register_index = Some(index);
        self.is_enabled = true;
        self.update_data()?;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        if !self.is_enabled {
            return Ok(());
        }
        if let Some(index) = self.hardware_register_index.take() {
            self.proc().clear_hardware_stoppoint(index)?;
        }
        self.is_enabled = false;
        Ok(())
    }

    /// Re-reads the watched bytes, demoting the previous `current_data`
    /// into `previous_data` the way `std::exchange` does in the original.
    pub fn update_data(&mut self) -> Result<()> {
        let mut buf = [0u8; 8];
        let read = self.proc().read_memory(self.address, self.size)?;
        buf[..self.size].copy_from_slice(&read);
        self.previous_data = std::mem::replace(&mut self.current_data, buf);
        Ok(())
    }
}

impl Stoppoint for Watchpoint {
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_misaligned_address() {
        let err = Watchpoint::new(std::ptr::null_mut(), VirtAddr::new(0x1003), StoppointMode::Write, 4);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_invalid_size() {
        let err = Watchpoint::new(std::ptr::null_mut(), VirtAddr::new(0x1000), StoppointMode::Write, 3);
        assert!(err.is_err());
    }
}
