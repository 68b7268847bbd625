//! `.debug_ranges` parsing. Grounded in the
//! original `range_list::iterator`: a sequence of `(low, high)` pairs,
//! where a pair of all-1-bits `low` selects a new base address for
//! subsequent entries, and a `(0, 0)` pair terminates the list. Every
//! address here is a file (link-time) address, the same space
//! `DW_AT_low_pc` lives in — there is no virtual-address translation
//! involved in reading a range list itself.

use crate::types::FileAddr;

#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub low: FileAddr,
    pub high: FileAddr,
}

impl Range {
    pub fn contains(&self, addr: FileAddr) -> bool {
        addr >= self.low && addr < self.high
    }
}

/// Parses the range list at byte offset `offset` in `.debug_ranges`,
/// given the compile unit's `DW_AT_low_pc` as the initial base address.
pub fn parse_range_list(
    debug_ranges: &[u8],
    offset: u64,
    elf: &crate::elf::Elf,
    cu_base: u64,
) -> Vec<Range> {
    let mut ranges = Vec::new();
    let mut base = cu_base;
    let mut pos = offset as usize;
    loop {
        if pos + 16 > debug_ranges.len() {
            break;
        }
        let low = u64::from_le_bytes(debug_ranges[pos..pos + 8].try_into().unwrap());
        let high = u64::from_le_bytes(debug_ranges[pos + 8..pos + 16].try_into().unwrap());
        pos += 16;
        if low == 0 && high == 0 {
            break;
        }
        if low == u64::MAX {
            base = high;
            continue;
        }
        ranges.push(Range {
            low: FileAddr::new(elf, base + low),
            high: FileAddr::new(elf, base + high),
        });
    }
    ranges
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range_contains_is_half_open() {
        let low = FileAddr::null();
        let high = FileAddr::null() + 4u64;
        let r = Range { low, high };
        assert!(!r.contains(high));
    }
}
