//! A device that records what it was asked to do.

use super::backend::{
    BoHandle, DeviceError, DeviceInfo, Fence, FenceStatus, GpuBackend, MappedRegion, SubmitBo,
    SubmitCmd,
};
use std::collections::HashMap;

pub struct MockSubmit {
    pub cmds: Vec<SubmitCmd>,
    pub bos: Vec<SubmitBo>,
    /// Command stream dwords as the device would have read them.
    pub words: Vec<Vec<u32>>,
}

struct MockBo {
    iova: u64,
    mapping: MappedRegion,
}

pub struct MockBackend {
    pub allocs: u32,
    pub frees: u32,
    pub submits: Vec<MockSubmit>,
    /// Every fence wait times out.
    pub time_out: bool,
    /// Submits fail with this errno.
    pub fail_submit: Option<nix::errno::Errno>,
    bos: HashMap<BoHandle, MockBo>,
    next_handle: u32,
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend {
            allocs: 0,
            frees: 0,
            submits: Vec::new(),
            time_out: false,
            fail_submit: None,
            bos: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn live_bos(&self) -> usize {
        self.bos.len()
    }

    fn read_dwords(&self, iova: u64, dwords: u32) -> Vec<u32> {
        for bo in self.bos.values() {
            let bytes = bo.mapping.as_slice();
            if iova >= bo.iova && iova < bo.iova + bytes.len() as u64 {
                let start = (iova - bo.iova) as usize;
                return bytes[start..]
                    .chunks_exact(4)
                    .take(dwords as usize)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
            }
        }
        Vec::new()
    }
}

impl GpuBackend for MockBackend {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            gpu_id: 630,
            chip_id: 0x0603_0000,
        }
    }

    fn va_range(&self) -> (u64, u64) {
        (0x1000, 0x1_0000_0000)
    }

    fn alloc(&mut self, iova: u64, size: u64) -> Result<BoHandle, DeviceError> {
        let handle = BoHandle(self.next_handle);
        self.next_handle += 1;
        self.allocs += 1;
        let mapping = MappedRegion::anonymous(size as usize)?;
        self.bos.insert(handle, MockBo { iova, mapping });
        Ok(handle)
    }

    fn mapping(&mut self, bo: BoHandle) -> Result<&mut MappedRegion, DeviceError> {
        self.bos
            .get_mut(&bo)
            .map(|b| &mut b.mapping)
            .ok_or(DeviceError::UnknownHandle(bo))
    }

    fn free(&mut self, bo: BoHandle) -> Result<(), DeviceError> {
        self.bos.remove(&bo).ok_or(DeviceError::UnknownHandle(bo))?;
        self.frees += 1;
        Ok(())
    }

    fn submit(&mut self, cmds: &[SubmitCmd], bos: &[SubmitBo]) -> Result<Fence, DeviceError> {
        if let Some(source) = self.fail_submit {
            return Err(DeviceError::Ioctl {
                op: "submit",
                source,
            });
        }
        let words = cmds
            .iter()
            .map(|c| self.read_dwords(c.iova, c.dwords))
            .collect();
        self.submits.push(MockSubmit {
            cmds: cmds.to_vec(),
            bos: bos.to_vec(),
            words,
        });
        Ok(Fence(self.submits.len() as u32))
    }

    fn wait_fence(&mut self, _fence: Fence) -> Result<FenceStatus, DeviceError> {
        if self.time_out {
            Ok(FenceStatus::TimedOut)
        } else {
            Ok(FenceStatus::Signaled)
        }
    }
}
