//! The device operations replay needs, independent of the kernel driver.

use crate::log::LogLevel::LogWarn;
use nix::{
    errno::Errno,
    sys::mman::{mmap, munmap, MapFlags, ProtFlags},
};
use std::{os::unix::io::RawFd, ptr, slice};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: Errno },
    #[error("{op} failed: {source}")]
    Ioctl { op: &'static str, source: Errno },
    #[error("mapping {len} bytes failed: {source}")]
    Mmap { len: usize, source: Errno },
    #[error("no buffer object covers gpu address {0:#x}")]
    UnknownAddress(u64),
    #[error("unknown buffer object {0:?}")]
    UnknownHandle(BoHandle),
}

/// Kernel handle of a buffer object.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct BoHandle(pub u32);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DeviceInfo {
    pub gpu_id: u32,
    pub chip_id: u64,
}

/// One command buffer of a submission.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SubmitCmd {
    pub iova: u64,
    pub dwords: u32,
}

/// A buffer object the submission may access.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SubmitBo {
    pub handle: BoHandle,
    pub iova: u64,
    pub size: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Fence(pub u32);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

pub trait GpuBackend {
    fn info(&self) -> DeviceInfo;

    /// The GPU virtual address range buffers may be placed in.
    fn va_range(&self) -> (u64, u64);

    /// Allocate `size` bytes that the GPU sees at `iova`.
    fn alloc(&mut self, iova: u64, size: u64) -> Result<BoHandle, DeviceError>;

    /// Host view of `bo`. The backend owns the mapping and releases it when
    /// `bo` is freed.
    fn mapping(&mut self, bo: BoHandle) -> Result<&mut MappedRegion, DeviceError>;

    fn free(&mut self, bo: BoHandle) -> Result<(), DeviceError>;

    fn submit(&mut self, cmds: &[SubmitCmd], bos: &[SubmitBo]) -> Result<Fence, DeviceError>;

    fn wait_fence(&mut self, fence: Fence) -> Result<FenceStatus, DeviceError>;
}

/// A host mapping of device memory, unmapped exactly once on drop.
pub struct MappedRegion {
    addr: *mut u8,
    len: usize,
}

impl MappedRegion {
    /// Map `len` bytes of `fd` at `offset`, optionally at a fixed address.
    pub fn map_fd(
        fd: RawFd,
        offset: i64,
        len: usize,
        fixed_addr: Option<u64>,
    ) -> Result<MappedRegion, DeviceError> {
        let mut flags = MapFlags::MAP_SHARED;
        let hint = match fixed_addr {
            Some(a) => {
                flags |= MapFlags::MAP_FIXED;
                a as *mut libc::c_void
            }
            None => ptr::null_mut(),
        };
        let addr = unsafe {
            mmap(
                hint,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                flags,
                fd,
                offset,
            )
        }
        .map_err(|source| DeviceError::Mmap { len, source })?;
        Ok(MappedRegion {
            addr: addr as *mut u8,
            len,
        })
    }

    /// Private zero filled memory, for backends without real device memory.
    pub fn anonymous(len: usize) -> Result<MappedRegion, DeviceError> {
        let addr = unsafe {
            mmap(
                ptr::null_mut(),
                len.max(1),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                -1,
                0,
            )
        }
        .map_err(|source| DeviceError::Mmap { len, source })?;
        Ok(MappedRegion {
            addr: addr as *mut u8,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.addr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.addr, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.addr as *mut libc::c_void, self.len.max(1)) } {
            log!(LogWarn, "munmap of {:p} ({} bytes) failed: {}", self.addr, self.len, e);
        }
    }
}
