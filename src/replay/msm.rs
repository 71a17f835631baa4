//! DRM msm backend.

#![allow(non_camel_case_types)]

use super::backend::{
    BoHandle, DeviceError, DeviceInfo, Fence, FenceStatus, GpuBackend, MappedRegion, SubmitBo,
    SubmitCmd,
};
use crate::{log::LogLevel::LogDebug, scoped_fd::ScopedFd};
use nix::{
    errno::Errno,
    fcntl::OFlag,
    time::{clock_gettime, ClockId},
};
use std::{collections::HashMap, convert::TryInto};

const DEVICE_PATH: &str = "/dev/dri/renderD128";

const DRM_IOCTL_BASE: u8 = b'd';
const DRM_COMMAND_BASE: u8 = 0x40;

const MSM_PIPE_3D0: u32 = 0x10;

const MSM_PARAM_GPU_ID: u32 = 0x01;
const MSM_PARAM_CHIP_ID: u32 = 0x03;
const MSM_PARAM_VA_START: u32 = 0x0e;
const MSM_PARAM_VA_SIZE: u32 = 0x0f;

const MSM_BO_WC: u32 = 0x0002_0000;

const MSM_INFO_GET_OFFSET: u32 = 0x00;
const MSM_INFO_SET_IOVA: u32 = 0x02;

const MSM_SUBMIT_CMD_BUF: u32 = 0x0001;
const MSM_SUBMIT_BO_READ: u32 = 0x0001;
const MSM_SUBMIT_BO_WRITE: u32 = 0x0002;

const FENCE_TIMEOUT_NS: i64 = 1_000_000_000;

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_param {
    pipe: u32,
    param: u32,
    value: u64,
    len: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_gem_new {
    size: u64,
    flags: u32,
    handle: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_gem_info {
    handle: u32,
    info: u32,
    value: u64,
    len: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_gem_submit_cmd {
    type_: u32,
    submit_idx: u32,
    submit_offset: u32,
    size: u32,
    pad: u32,
    nr_relocs: u32,
    relocs: u64,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_gem_submit_bo {
    flags: u32,
    handle: u32,
    presumed: u64,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_gem_submit {
    flags: u32,
    fence: u32,
    nr_bos: u32,
    nr_cmds: u32,
    bos: u64,
    cmds: u64,
    fence_fd: i32,
    queueid: u32,
    in_syncobjs: u64,
    out_syncobjs: u64,
    nr_in_syncobjs: u32,
    nr_out_syncobjs: u32,
    syncobj_stride: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_timespec {
    tv_sec: i64,
    tv_nsec: i64,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_wait_fence {
    fence: u32,
    flags: u32,
    timeout: drm_msm_timespec,
    queueid: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_msm_submitqueue {
    flags: u32,
    prio: u32,
    id: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct drm_gem_close {
    handle: u32,
    pad: u32,
}

assert_eq_size!(drm_msm_param, [u8; 24]);
assert_eq_size!(drm_msm_gem_new, [u8; 16]);
assert_eq_size!(drm_msm_gem_info, [u8; 24]);
assert_eq_size!(drm_msm_gem_submit_cmd, [u8; 32]);
assert_eq_size!(drm_msm_gem_submit_bo, [u8; 16]);
assert_eq_size!(drm_msm_gem_submit, [u8; 72]);
assert_eq_size!(drm_msm_wait_fence, [u8; 32]);
assert_eq_size!(drm_msm_submitqueue, [u8; 12]);
assert_eq_size!(drm_gem_close, [u8; 8]);

nix::ioctl_readwrite!(msm_get_param, DRM_IOCTL_BASE, DRM_COMMAND_BASE, drm_msm_param);
nix::ioctl_readwrite!(msm_gem_new, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x02, drm_msm_gem_new);
nix::ioctl_readwrite!(msm_gem_info, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x03, drm_msm_gem_info);
nix::ioctl_readwrite!(msm_gem_submit, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x06, drm_msm_gem_submit);
nix::ioctl_write_ptr!(msm_wait_fence, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x07, drm_msm_wait_fence);
nix::ioctl_readwrite!(
    msm_submitqueue_new,
    DRM_IOCTL_BASE,
    DRM_COMMAND_BASE + 0x0a,
    drm_msm_submitqueue
);
nix::ioctl_write_ptr!(drm_gem_close_ioctl, DRM_IOCTL_BASE, 0x09, drm_gem_close);

struct MsmBo {
    size: u64,
    mapping: Option<MappedRegion>,
}

pub struct MsmBackend {
    /// Dropped before `fd` so every mapping goes before the device.
    bos: HashMap<BoHandle, MsmBo>,
    fd: ScopedFd,
    queue_id: u32,
    info: DeviceInfo,
    va_start: u64,
    va_size: u64,
}

fn ioctl_err(op: &'static str) -> impl FnOnce(Errno) -> DeviceError {
    move |source| DeviceError::Ioctl { op, source }
}

impl MsmBackend {
    pub fn open() -> Result<MsmBackend, DeviceError> {
        let fd = ScopedFd::open_path(DEVICE_PATH, OFlag::O_RDWR | OFlag::O_CLOEXEC).map_err(
            |source| DeviceError::Open {
                path: DEVICE_PATH.into(),
                source,
            },
        )?;

        let gpu_id = get_param(&fd, MSM_PARAM_GPU_ID)?;
        let chip_id = get_param(&fd, MSM_PARAM_CHIP_ID)?;
        let va_start = get_param(&fd, MSM_PARAM_VA_START)?;
        let va_size = get_param(&fd, MSM_PARAM_VA_SIZE)?;

        let mut queue = drm_msm_submitqueue::default();
        unsafe { msm_submitqueue_new(fd.as_raw(), &mut queue) }
            .map_err(ioctl_err("DRM_MSM_SUBMITQUEUE_NEW"))?;

        log!(
            LogDebug,
            "Opened {}: gpu_id {} chip_id {:#x} va {:#x}+{:#x}",
            DEVICE_PATH,
            gpu_id,
            chip_id,
            va_start,
            va_size
        );
        Ok(MsmBackend {
            bos: HashMap::new(),
            fd,
            queue_id: queue.id,
            info: DeviceInfo {
                gpu_id: gpu_id as u32,
                chip_id,
            },
            va_start,
            va_size,
        })
    }

    fn gem_info(&self, handle: BoHandle, info: u32, value: u64) -> Result<u64, DeviceError> {
        let mut req = drm_msm_gem_info {
            handle: handle.0,
            info,
            value,
            ..Default::default()
        };
        unsafe { msm_gem_info(self.fd.as_raw(), &mut req) }
            .map_err(ioctl_err("DRM_MSM_GEM_INFO"))?;
        Ok(req.value)
    }

    fn close_handle(&self, handle: BoHandle) -> Result<(), DeviceError> {
        let req = drm_gem_close {
            handle: handle.0,
            pad: 0,
        };
        unsafe { drm_gem_close_ioctl(self.fd.as_raw(), &req) }
            .map_err(ioctl_err("DRM_IOCTL_GEM_CLOSE"))?;
        Ok(())
    }
}

fn get_param(fd: &ScopedFd, param: u32) -> Result<u64, DeviceError> {
    let mut req = drm_msm_param {
        pipe: MSM_PIPE_3D0,
        param,
        ..Default::default()
    };
    unsafe { msm_get_param(fd.as_raw(), &mut req) }.map_err(ioctl_err("DRM_MSM_GET_PARAM"))?;
    Ok(req.value)
}

impl GpuBackend for MsmBackend {
    fn info(&self) -> DeviceInfo {
        self.info
    }

    fn va_range(&self) -> (u64, u64) {
        (self.va_start, self.va_size)
    }

    fn alloc(&mut self, iova: u64, size: u64) -> Result<BoHandle, DeviceError> {
        let mut req = drm_msm_gem_new {
            size,
            flags: MSM_BO_WC,
            handle: 0,
        };
        unsafe { msm_gem_new(self.fd.as_raw(), &mut req) }
            .map_err(ioctl_err("DRM_MSM_GEM_NEW"))?;
        let handle = BoHandle(req.handle);
        if let Err(e) = self.gem_info(handle, MSM_INFO_SET_IOVA, iova) {
            self.close_handle(handle).unwrap_or(());
            return Err(e);
        }
        self.bos.insert(
            handle,
            MsmBo {
                size,
                mapping: None,
            },
        );
        Ok(handle)
    }

    fn mapping(&mut self, bo: BoHandle) -> Result<&mut MappedRegion, DeviceError> {
        let needs_map = match self.bos.get(&bo) {
            Some(b) => b.mapping.is_none(),
            None => return Err(DeviceError::UnknownHandle(bo)),
        };
        if needs_map {
            let offset = self.gem_info(bo, MSM_INFO_GET_OFFSET, 0)?;
            let fd = self.fd.as_raw();
            let entry = self.bos.get_mut(&bo).ok_or(DeviceError::UnknownHandle(bo))?;
            let len = entry.size as usize;
            entry.mapping = Some(MappedRegion::map_fd(fd, offset as i64, len, None)?);
        }
        self.bos
            .get_mut(&bo)
            .and_then(|b| b.mapping.as_mut())
            .ok_or(DeviceError::UnknownHandle(bo))
    }

    fn free(&mut self, bo: BoHandle) -> Result<(), DeviceError> {
        // Unmaps before the handle is closed.
        self.bos.remove(&bo).ok_or(DeviceError::UnknownHandle(bo))?;
        self.close_handle(bo)
    }

    fn submit(&mut self, cmds: &[SubmitCmd], bos: &[SubmitBo]) -> Result<Fence, DeviceError> {
        let submit_bos: Vec<drm_msm_gem_submit_bo> = bos
            .iter()
            .map(|b| drm_msm_gem_submit_bo {
                flags: MSM_SUBMIT_BO_READ | MSM_SUBMIT_BO_WRITE,
                handle: b.handle.0,
                presumed: b.iova,
            })
            .collect();

        let mut submit_cmds = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            let idx = bos
                .iter()
                .position(|b| cmd.iova >= b.iova && cmd.iova < b.iova + b.size)
                .ok_or(DeviceError::UnknownAddress(cmd.iova))?;
            submit_cmds.push(drm_msm_gem_submit_cmd {
                type_: MSM_SUBMIT_CMD_BUF,
                submit_idx: idx as u32,
                submit_offset: (cmd.iova - bos[idx].iova) as u32,
                size: cmd.dwords * 4,
                ..Default::default()
            });
        }

        let mut req = drm_msm_gem_submit {
            flags: MSM_PIPE_3D0,
            nr_bos: submit_bos.len().try_into().unwrap_or(u32::MAX),
            nr_cmds: submit_cmds.len().try_into().unwrap_or(u32::MAX),
            bos: submit_bos.as_ptr() as u64,
            cmds: submit_cmds.as_ptr() as u64,
            queueid: self.queue_id,
            ..Default::default()
        };
        unsafe { msm_gem_submit(self.fd.as_raw(), &mut req) }
            .map_err(ioctl_err("DRM_MSM_GEM_SUBMIT"))?;
        Ok(Fence(req.fence))
    }

    fn wait_fence(&mut self, fence: Fence) -> Result<FenceStatus, DeviceError> {
        // The kernel wants an absolute CLOCK_MONOTONIC deadline.
        let now = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map_err(ioctl_err("clock_gettime"))?;
        let deadline =
            now.tv_sec() as i64 * 1_000_000_000 + now.tv_nsec() as i64 + FENCE_TIMEOUT_NS;
        let req = drm_msm_wait_fence {
            fence: fence.0,
            flags: 0,
            timeout: drm_msm_timespec {
                tv_sec: deadline / 1_000_000_000,
                tv_nsec: deadline % 1_000_000_000,
            },
            queueid: self.queue_id,
        };
        match unsafe { msm_wait_fence(self.fd.as_raw(), &req) } {
            Ok(_) => Ok(FenceStatus::Signaled),
            Err(Errno::ETIMEDOUT) => Ok(FenceStatus::TimedOut),
            Err(source) => Err(DeviceError::Ioctl {
                op: "DRM_MSM_WAIT_FENCE",
                source,
            }),
        }
    }
}
