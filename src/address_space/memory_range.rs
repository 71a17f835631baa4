use std::cmp::{max, min};
use std::fmt::{Display, Formatter, Result};

/// A half-open span of GPU virtual address space.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct MemoryRange {
    start_: u64,
    end_: u64,
}

/// Note: The end point (end_) is implicitly NOT included in the MemoryRange
impl MemoryRange {
    pub fn new_range(addr: u64, num_bytes: u64) -> MemoryRange {
        // Captured descriptors can be garbage; clamp rather than wrap.
        MemoryRange {
            start_: addr,
            end_: addr.saturating_add(num_bytes),
        }
    }

    #[cfg(test)]
    pub fn from_range(addr: u64, end: u64) -> MemoryRange {
        let result = MemoryRange {
            start_: addr,
            end_: end,
        };
        debug_assert!(result.start_ <= result.end_);
        result
    }

    /// Return true iff `other` is an address range fully contained by self.
    pub fn contains(&self, other: &Self) -> bool {
        self.start_ <= other.start_ && other.end_ <= self.end_
    }

    /// Note that we have p < self.end_ and not p <= self.end here.
    pub fn contains_addr(&self, p: u64) -> bool {
        self.start_ <= p && p < self.end_
    }

    #[cfg(test)]
    pub fn intersect(&self, other: &MemoryRange) -> MemoryRange {
        let s = max(self.start_, other.start_);
        let e = min(self.end_, other.end_);
        MemoryRange {
            start_: s,
            end_: max(s, e),
        }
    }

    pub fn intersects(&self, other: &MemoryRange) -> bool {
        let s = max(self.start_, other.start_);
        let e = min(self.end_, other.end_);
        s < e
    }

    pub fn start(&self) -> u64 {
        self.start_
    }
    pub fn end(&self) -> u64 {
        self.end_
    }
    pub fn size(&self) -> u64 {
        self.end_ - self.start_
    }
}

impl Display for MemoryRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{:#x}-{:#x}", self.start_, self.end_)
    }
}

#[cfg(test)]
mod test {
    use super::MemoryRange;

    #[test]
    pub fn test_intersect() {
        let a = MemoryRange::new_range(0x1000, 0x100);
        let b = MemoryRange::from_range(0x1080, 0x1200);
        let c = MemoryRange::new_range(0x1100, 0x10);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.intersect(&b), MemoryRange::from_range(0x1080, 0x1100));
        assert_eq!(a.intersect(&c).size(), 0);
    }

    #[test]
    pub fn test_contains() {
        let a = MemoryRange::new_range(0x1000, 0x100);
        assert!(a.contains_addr(0x1000));
        assert!(a.contains_addr(0x10ff));
        assert!(!a.contains_addr(0x1100));
        assert!(a.contains(&MemoryRange::new_range(0x1010, 0x10)));
        assert!(!a.contains(&MemoryRange::new_range(0x10f0, 0x20)));
    }

    #[test]
    pub fn test_saturating_end() {
        let r = MemoryRange::new_range(u64::MAX - 4, 0x100);
        assert_eq!(r.end(), u64::MAX);
        assert_eq!(r.to_string(), "0xfffffffffffffffb-0xffffffffffffffff");
    }
}
