//! Qualcomm kgsl backend. Buffers are CPU mapped at their capture address and
//! the GPU sees them at the same address.

#![allow(non_camel_case_types)]

use super::backend::{
    BoHandle, DeviceError, DeviceInfo, Fence, FenceStatus, GpuBackend, MappedRegion, SubmitBo,
    SubmitCmd,
};
use crate::{log::LogLevel::LogDebug, scoped_fd::ScopedFd};
use nix::{errno::Errno, fcntl::OFlag};
use std::{collections::HashMap, convert::TryInto, mem::size_of};

const DEVICE_PATH: &str = "/dev/kgsl-3d0";

const KGSL_IOC_TYPE: u8 = 0x09;

const KGSL_PROP_DEVICE_INFO: u32 = 0x1;

const KGSL_CONTEXT_NO_GMEM_ALLOC: u32 = 0x0000_0002;
const KGSL_CONTEXT_PREAMBLE: u32 = 0x0000_0040;
const KGSL_CONTEXT_TYPE_GL: u32 = 1 << 20;

const KGSL_MEMFLAGS_USE_CPU_MAP: u32 = 0x1000_0000;

const KGSL_CMDLIST_IB: u32 = 0x0000_0001;

const FENCE_TIMEOUT_MS: u32 = 3000;

/// Kgsl hands out no VA range. Captures from Android devices place buffers
/// below this.
const VA_START: u64 = 0x1_0000;
const VA_SIZE: u64 = 0xffff_0000;

#[repr(C)]
pub struct kgsl_device_getproperty {
    type_: u32,
    value: *mut libc::c_void,
    sizebytes: usize,
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_devinfo {
    device_id: u32,
    chip_id: u32,
    mmu_enabled: u32,
    gmem_gpubaseaddr: u64,
    gpu_id: u32,
    gmem_sizebytes: usize,
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_drawctxt_create {
    flags: u32,
    drawctxt_id: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_gpumem_alloc_id {
    id: u32,
    flags: u32,
    size: u64,
    mmapsize: u64,
    gpuaddr: u64,
    pad: [u64; 2],
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_gpumem_free_id {
    id: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_command_object {
    offset: u64,
    gpuaddr: u64,
    size: u64,
    flags: u32,
    id: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_gpu_command {
    flags: u64,
    cmdlist: u64,
    cmdsize: u32,
    numcmds: u32,
    objlist: u64,
    objsize: u32,
    numobjs: u32,
    synclist: u64,
    syncsize: u32,
    numsyncs: u32,
    context_id: u32,
    timestamp: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct kgsl_device_waittimestamp_ctxtid {
    context_id: u32,
    timestamp: u32,
    timeout: u32,
}

assert_eq_size!(kgsl_device_getproperty, [u8; 24]);
assert_eq_size!(kgsl_devinfo, [u8; 40]);
assert_eq_size!(kgsl_gpumem_alloc_id, [u8; 48]);
assert_eq_size!(kgsl_command_object, [u8; 32]);
assert_eq_size!(kgsl_gpu_command, [u8; 64]);
assert_eq_size!(kgsl_device_waittimestamp_ctxtid, [u8; 12]);

nix::ioctl_readwrite!(kgsl_getproperty, KGSL_IOC_TYPE, 0x2, kgsl_device_getproperty);
nix::ioctl_readwrite!(kgsl_drawctxt_create_ioctl, KGSL_IOC_TYPE, 0x13, kgsl_drawctxt_create);
nix::ioctl_readwrite!(kgsl_gpumem_alloc_id_ioctl, KGSL_IOC_TYPE, 0x34, kgsl_gpumem_alloc_id);
nix::ioctl_readwrite!(kgsl_gpumem_free_id_ioctl, KGSL_IOC_TYPE, 0x35, kgsl_gpumem_free_id);
nix::ioctl_readwrite!(kgsl_gpu_command_ioctl, KGSL_IOC_TYPE, 0x4a, kgsl_gpu_command);
nix::ioctl_write_ptr!(
    kgsl_waittimestamp_ctxtid,
    KGSL_IOC_TYPE,
    0x7,
    kgsl_device_waittimestamp_ctxtid
);

pub struct KgslBackend {
    /// Live for as long as the buffer: the mapping is what gives it its
    /// GPU address.
    mappings: HashMap<BoHandle, MappedRegion>,
    fd: ScopedFd,
    context_id: u32,
    info: DeviceInfo,
}

fn ioctl_err(op: &'static str) -> impl FnOnce(Errno) -> DeviceError {
    move |source| DeviceError::Ioctl { op, source }
}

impl KgslBackend {
    pub fn open() -> Result<KgslBackend, DeviceError> {
        let fd = ScopedFd::open_path(DEVICE_PATH, OFlag::O_RDWR | OFlag::O_CLOEXEC).map_err(
            |source| DeviceError::Open {
                path: DEVICE_PATH.into(),
                source,
            },
        )?;

        let mut devinfo = kgsl_devinfo::default();
        let mut prop = kgsl_device_getproperty {
            type_: KGSL_PROP_DEVICE_INFO,
            value: &mut devinfo as *mut kgsl_devinfo as *mut libc::c_void,
            sizebytes: size_of::<kgsl_devinfo>(),
        };
        unsafe { kgsl_getproperty(fd.as_raw(), &mut prop) }
            .map_err(ioctl_err("IOCTL_KGSL_DEVICE_GETPROPERTY"))?;

        let mut ctx = kgsl_drawctxt_create {
            flags: KGSL_CONTEXT_PREAMBLE | KGSL_CONTEXT_NO_GMEM_ALLOC | KGSL_CONTEXT_TYPE_GL,
            drawctxt_id: 0,
        };
        unsafe { kgsl_drawctxt_create_ioctl(fd.as_raw(), &mut ctx) }
            .map_err(ioctl_err("IOCTL_KGSL_DRAWCTXT_CREATE"))?;

        log!(
            LogDebug,
            "Opened {}: gpu_id {} chip_id {:#x} context {}",
            DEVICE_PATH,
            devinfo.gpu_id,
            devinfo.chip_id,
            ctx.drawctxt_id
        );
        Ok(KgslBackend {
            mappings: HashMap::new(),
            fd,
            context_id: ctx.drawctxt_id,
            info: DeviceInfo {
                gpu_id: devinfo.gpu_id,
                chip_id: devinfo.chip_id as u64,
            },
        })
    }

    fn free_id(&self, id: u32) -> Result<(), DeviceError> {
        let mut req = kgsl_gpumem_free_id { id, pad: 0 };
        unsafe { kgsl_gpumem_free_id_ioctl(self.fd.as_raw(), &mut req) }
            .map_err(ioctl_err("IOCTL_KGSL_GPUMEM_FREE_ID"))?;
        Ok(())
    }
}

impl GpuBackend for KgslBackend {
    fn info(&self) -> DeviceInfo {
        self.info
    }

    fn va_range(&self) -> (u64, u64) {
        (VA_START, VA_SIZE)
    }

    fn alloc(&mut self, iova: u64, size: u64) -> Result<BoHandle, DeviceError> {
        let mut req = kgsl_gpumem_alloc_id {
            flags: KGSL_MEMFLAGS_USE_CPU_MAP,
            size,
            ..Default::default()
        };
        unsafe { kgsl_gpumem_alloc_id_ioctl(self.fd.as_raw(), &mut req) }
            .map_err(ioctl_err("IOCTL_KGSL_GPUMEM_ALLOC_ID"))?;

        let offset = (req.id as i64) << 12;
        let fd = self.fd.as_raw();
        let mapping = match MappedRegion::map_fd(fd, offset, size as usize, Some(iova)) {
            Ok(m) => m,
            Err(e) => {
                self.free_id(req.id).unwrap_or(());
                return Err(e);
            }
        };
        let handle = BoHandle(req.id);
        self.mappings.insert(handle, mapping);
        Ok(handle)
    }

    fn mapping(&mut self, bo: BoHandle) -> Result<&mut MappedRegion, DeviceError> {
        self.mappings
            .get_mut(&bo)
            .ok_or(DeviceError::UnknownHandle(bo))
    }

    fn free(&mut self, bo: BoHandle) -> Result<(), DeviceError> {
        self.mappings
            .remove(&bo)
            .ok_or(DeviceError::UnknownHandle(bo))?;
        self.free_id(bo.0)
    }

    fn submit(&mut self, cmds: &[SubmitCmd], bos: &[SubmitBo]) -> Result<Fence, DeviceError> {
        let cmd_objs: Vec<kgsl_command_object> = cmds
            .iter()
            .map(|c| kgsl_command_object {
                gpuaddr: c.iova,
                size: c.dwords as u64 * 4,
                flags: KGSL_CMDLIST_IB,
                ..Default::default()
            })
            .collect();
        // Buffers are referenced by address; the kernel needs no object list.
        log!(LogDebug, "Submitting {} ibs over {} buffers", cmds.len(), bos.len());

        let mut req = kgsl_gpu_command {
            cmdlist: cmd_objs.as_ptr() as u64,
            cmdsize: size_of::<kgsl_command_object>() as u32,
            numcmds: cmd_objs.len().try_into().unwrap_or(u32::MAX),
            context_id: self.context_id,
            ..Default::default()
        };
        unsafe { kgsl_gpu_command_ioctl(self.fd.as_raw(), &mut req) }
            .map_err(ioctl_err("IOCTL_KGSL_GPU_COMMAND"))?;
        Ok(Fence(req.timestamp))
    }

    fn wait_fence(&mut self, fence: Fence) -> Result<FenceStatus, DeviceError> {
        let req = kgsl_device_waittimestamp_ctxtid {
            context_id: self.context_id,
            timestamp: fence.0,
            timeout: FENCE_TIMEOUT_MS,
        };
        match unsafe { kgsl_waittimestamp_ctxtid(self.fd.as_raw(), &req) } {
            Ok(_) => Ok(FenceStatus::Signaled),
            Err(Errno::ETIMEDOUT) => Ok(FenceStatus::TimedOut),
            Err(source) => Err(DeviceError::Ioctl {
                op: "IOCTL_KGSL_DEVICE_WAITTIMESTAMP_CTXTID",
                source,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::{request_code_readwrite, request_code_write};

    #[test]
    pub fn test_ioctl_numbers() {
        assert_eq!(
            request_code_readwrite!(KGSL_IOC_TYPE, 0x4a, size_of::<kgsl_gpu_command>()),
            0xc040_094a
        );
        assert_eq!(
            request_code_write!(
                KGSL_IOC_TYPE,
                0x7,
                size_of::<kgsl_device_waittimestamp_ctxtid>()
            ),
            0x400c_0907
        );
    }
}
