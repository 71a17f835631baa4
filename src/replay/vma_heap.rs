//! Free list allocator over a range of GPU virtual addresses.

use crate::{
    log::LogLevel::LogWarn,
    util::{align_down, align_up},
};
use std::collections::BTreeMap;

pub struct VmaHeap {
    /// Free holes, start -> size.
    holes: BTreeMap<u64, u64>,
    /// Carve allocations from the top of the highest fitting hole.
    pub alloc_high: bool,
}

impl VmaHeap {
    pub fn new(start: u64, size: u64) -> VmaHeap {
        let mut holes = BTreeMap::new();
        if size > 0 {
            holes.insert(start, size);
        }
        VmaHeap {
            holes,
            alloc_high: true,
        }
    }

    #[cfg(test)]
    pub fn free_bytes(&self) -> u64 {
        self.holes.values().sum()
    }

    #[cfg(test)]
    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    /// Allocate `size` bytes aligned to `align` (a power of two).
    pub fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let found = if self.alloc_high {
            self.holes.iter().rev().find_map(|(&start, &hole)| {
                let end = start + hole;
                let addr = align_down(end.checked_sub(size)?, align);
                if addr >= start {
                    Some((start, addr))
                } else {
                    None
                }
            })
        } else {
            self.holes.iter().find_map(|(&start, &hole)| {
                let addr = align_up(start, align);
                if addr.checked_add(size)? <= start + hole {
                    Some((start, addr))
                } else {
                    None
                }
            })
        };
        let (hole_start, addr) = found?;
        self.carve(hole_start, addr, size);
        Some(addr)
    }

    /// Reserve exactly `[addr, addr + size)`. Fails if any of it is
    /// already allocated or outside the heap.
    pub fn alloc_addr(&mut self, addr: u64, size: u64) -> bool {
        if size == 0 {
            return false;
        }
        let (hole_start, hole) = match self.holes.range(..=addr).next_back() {
            Some((&s, &h)) => (s, h),
            None => return false,
        };
        match addr.checked_add(size) {
            Some(end) if end <= hole_start + hole => {
                self.carve(hole_start, addr, size);
                true
            }
            _ => false,
        }
    }

    /// Return `[addr, addr + size)` to the heap, merging it with adjacent
    /// holes.
    pub fn free(&mut self, addr: u64, size: u64) {
        if size == 0 {
            return;
        }
        let end = addr + size;
        let overlaps = self
            .holes
            .range(..end)
            .next_back()
            .map_or(false, |(&s, &h)| s + h > addr);
        if overlaps {
            log!(
                LogWarn,
                "Freeing {:#x}-{:#x} which is already free",
                addr,
                end
            );
            return;
        }

        let mut start = addr;
        let mut len = size;
        if let Some((&prev, &prev_len)) = self.holes.range(..addr).next_back() {
            if prev + prev_len == addr {
                self.holes.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.holes.remove(&end) {
            len += next_len;
        }
        self.holes.insert(start, len);
    }

    fn carve(&mut self, hole_start: u64, addr: u64, size: u64) {
        let hole = match self.holes.remove(&hole_start) {
            Some(h) => h,
            None => fatal!("No hole at {:#x} to carve {:#x}+{:#x} from", hole_start, addr, size),
        };
        let hole_end = hole_start + hole;
        if addr > hole_start {
            self.holes.insert(hole_start, addr - hole_start);
        }
        if addr + size < hole_end {
            self.holes.insert(addr + size, hole_end - (addr + size));
        }
    }
}
