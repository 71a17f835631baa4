//! Captured GPU buffers, indexed by the GPU address they were mapped at.

use super::{memory_range::MemoryRange, range_tree::RangeTree};
use crate::log::LogLevel::{LogDebug, LogWarn};
use std::convert::TryInto;

/// How many distinct offsets within a single buffer we remember as dumped.
pub const MAX_DUMPED_OFFSETS: usize = 256;

#[derive(Copy, Clone, Debug)]
struct DumpedOffset {
    offset: u64,
    mask: u32,
}

pub struct Buffer {
    hostbuf: Vec<u8>,
    dumped: Vec<DumpedOffset>,
}

impl Buffer {
    fn new(hostbuf: Vec<u8>) -> Buffer {
        Buffer {
            hostbuf,
            dumped: Vec::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.hostbuf
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AddOutcome {
    /// A fresh buffer was indexed.
    Inserted,
    /// A buffer with the same start address was replaced.
    Replaced,
    /// The bytes fell inside an existing buffer and matched it.
    Verified,
    /// The bytes fell inside an existing buffer but differed. The new bytes
    /// were copied in.
    Overwritten,
    /// Overlapping buffers were evicted to make room.
    Evicted(usize),
}

/// The set of captured buffers currently live in GPU address space.
/// Ranges in the index never overlap.
#[derive(Default)]
pub struct BufferSpace {
    buffers: RangeTree<Buffer>,
}

impl BufferSpace {
    pub fn new() -> BufferSpace {
        BufferSpace::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Record that `len` bytes at `gpuaddr` hold `hostbuf`. A short `hostbuf`
    /// is zero filled up to `len`.
    pub fn add_buffer(&mut self, gpuaddr: u64, len: u64, mut hostbuf: Vec<u8>) -> AddOutcome {
        let len_usize = len as usize;
        if hostbuf.len() != len_usize {
            log!(
                LogDebug,
                "buffer at {:#x}: {} bytes of contents for {} byte mapping",
                gpuaddr,
                hostbuf.len(),
                len
            );
            hostbuf.resize(len_usize, 0);
        }
        let new_range = MemoryRange::new_range(gpuaddr, len);

        if let Some((range, existing)) = self.buffers.find_containing_mut(gpuaddr) {
            if range.start() != gpuaddr && range.contains(&new_range) {
                let off = (gpuaddr - range.start()) as usize;
                let dst = &mut existing.hostbuf[off..off + len_usize];
                if dst == hostbuf.as_slice() {
                    return AddOutcome::Verified;
                }
                log!(
                    LogWarn,
                    "Contents of {} differ from the enclosing buffer {}; using the newer bytes",
                    new_range,
                    range
                );
                dst.copy_from_slice(&hostbuf);
                return AddOutcome::Overwritten;
            }
        }

        let mut replaced = false;
        let mut evicted = 0;
        for r in self.buffers.overlapping(&new_range) {
            self.buffers.remove(r.start());
            if r.start() == gpuaddr {
                replaced = true;
            } else {
                log!(LogWarn, "Evicting buffer {} overlapped by {}", r, new_range);
                evicted += 1;
            }
        }
        self.buffers.insert(new_range, Buffer::new(hostbuf));

        if evicted > 0 {
            AddOutcome::Evicted(evicted)
        } else if replaced {
            AddOutcome::Replaced
        } else {
            AddOutcome::Inserted
        }
    }

    /// Host bytes from `gpuaddr` to the end of its enclosing buffer.
    pub fn lookup_host(&self, gpuaddr: u64) -> Option<&[u8]> {
        let (range, buf) = self.buffers.find_containing(gpuaddr)?;
        Some(&buf.hostbuf[(gpuaddr - range.start()) as usize..])
    }

    #[cfg(test)]
    /// Start address of the buffer containing `gpuaddr`, or 0.
    pub fn lookup_base_address(&self, gpuaddr: u64) -> u64 {
        self.buffers
            .find_containing(gpuaddr)
            .map_or(0, |(range, _)| range.start())
    }

    /// Bytes left in the enclosing buffer from `gpuaddr`, or 0.
    pub fn region_length_from(&self, gpuaddr: u64) -> u64 {
        self.buffers
            .find_containing(gpuaddr)
            .map_or(0, |(range, _)| range.end() - gpuaddr)
    }

    /// `len` bytes at `gpuaddr`, if they lie entirely within one buffer.
    pub fn read_bytes(&self, gpuaddr: u64, len: u64) -> Option<&[u8]> {
        let host = self.lookup_host(gpuaddr)?;
        let len: usize = len.try_into().ok()?;
        host.get(..len)
    }

    /// `count` little endian dwords at `gpuaddr`, if they lie entirely within
    /// one buffer.
    pub fn read_dwords(&self, gpuaddr: u64, count: u32) -> Option<Vec<u32>> {
        let bytes = self.read_bytes(gpuaddr, count as u64 * 4)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Whether every bit of `enable_mask` has already been dumped at
    /// `gpuaddr`. If not, the bits are recorded and false is returned.
    /// Addresses outside any buffer, or past the per-buffer offset limit,
    /// are never tracked.
    pub fn has_been_dumped(&mut self, gpuaddr: u64, enable_mask: u32) -> bool {
        let (range, buf) = match self.buffers.find_containing_mut(gpuaddr) {
            Some(found) => found,
            None => return false,
        };
        let offset = gpuaddr - range.start();
        let entry = match buf.dumped.iter_mut().position(|d| d.offset == offset) {
            Some(i) => &mut buf.dumped[i],
            None => {
                if buf.dumped.len() >= MAX_DUMPED_OFFSETS {
                    return false;
                }
                buf.dumped.push(DumpedOffset { offset, mask: 0 });
                let last = buf.dumped.len() - 1;
                &mut buf.dumped[last]
            }
        };
        if entry.mask & enable_mask == enable_mask {
            return true;
        }
        entry.mask |= enable_mask;
        false
    }

    /// Forget every buffer. Called at each top level submit boundary.
    pub fn reset(&mut self) {
        self.buffers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (MemoryRange, &[u8])> {
        self.buffers.iter().map(|(r, b)| (r, b.bytes()))
    }
}
