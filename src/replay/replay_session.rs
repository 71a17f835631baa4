//! Resubmits the command streams of one capture file to a real GPU.

use super::{
    backend::{BoHandle, DeviceError, FenceStatus, GpuBackend, SubmitBo, SubmitCmd},
    diagnostics,
    generator::{self, GeneratorError},
    vma_heap::VmaHeap,
    ReplayError,
};
use crate::{
    log::LogLevel::{LogDebug, LogInfo, LogWarn},
    trace::{
        capture_reader::CaptureReader,
        section::{AddressDescriptor, Section, SectionType, WriteBufferDirective},
    },
    util::{ceil_page_size, page_size},
};
use std::{
    collections::BTreeMap,
    io::{self, Write},
    mem,
    path::{Path, PathBuf},
};

/// Room handed to an override generator for its own buffers.
pub const SCRATCH_SIZE: u64 = 32 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ReplayOptions {
    /// Only replay submits from processes whose name starts with this.
    pub exe: Option<String>,
    pub override_submit: Option<u32>,
    pub generator: Option<PathBuf>,
    /// Inclusive range of submits to issue. Buffers of the others are still
    /// uploaded.
    pub first_submit: u32,
    pub last_submit: u32,
    /// Write buffers are dumped under here.
    pub output_dir: PathBuf,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            exe: None,
            override_submit: None,
            generator: None,
            first_submit: 0,
            last_submit: u32::MAX,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ReplayOptions {
    fn issues(&self, submit: u32) -> bool {
        submit >= self.first_submit && submit <= self.last_submit
    }
}

#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct ReplayStats {
    pub submits_issued: u32,
    pub timeouts: u32,
}

struct DeviceBuffer {
    handle: BoHandle,
    /// Captured length in bytes.
    len: u64,
    /// Allocated (page rounded) size.
    size: u64,
    /// Reserved in the heap, as opposed to living in the override scratch.
    from_heap: bool,
    /// Uploaded since the last submit.
    used: bool,
}

/// Device state for a single input file. Dropping it frees every device
/// buffer it still holds.
pub struct ReplaySession<B: GpuBackend> {
    buffers: BTreeMap<u64, DeviceBuffer>,
    backend: B,
    options: ReplayOptions,
    heap: VmaHeap,
    out: Box<dyn Write>,
    /// Command streams queued for the next submit.
    cmds: Vec<SubmitCmd>,
    /// A CMDSTREAM_ADDR was seen since the last submit.
    need_submit: bool,
    pending_addr: Option<AddressDescriptor>,
    submit: u32,
    exe_name: Option<String>,
    skip: bool,
    shader_log_iova: Option<u64>,
    cp_log_iova: Option<u64>,
    write_buffers: Vec<WriteBufferDirective>,
    scratch: Option<(u64, u64)>,
    stats: ReplayStats,
}

impl<B: GpuBackend> ReplaySession<B> {
    pub fn new(backend: B, options: ReplayOptions) -> ReplaySession<B> {
        let (va_start, va_size) = backend.va_range();
        let info = backend.info();
        log!(
            LogInfo,
            "Replaying on gpu_id {} chip_id {:#x}, va {:#x}+{:#x}",
            info.gpu_id,
            info.chip_id,
            va_start,
            va_size
        );
        ReplaySession {
            buffers: BTreeMap::new(),
            backend,
            options,
            heap: VmaHeap::new(va_start, va_size),
            out: Box::new(io::stdout()),
            cmds: Vec::new(),
            need_submit: false,
            pending_addr: None,
            submit: 0,
            exe_name: None,
            skip: false,
            shader_log_iova: None,
            cp_log_iova: None,
            write_buffers: Vec::new(),
            scratch: None,
            stats: ReplayStats::default(),
        }
    }

    #[cfg(test)]
    /// Diagnostics go here instead of stdout.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    #[cfg(test)]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn run(&mut self, reader: &mut CaptureReader) -> Result<(), ReplayError> {
        while let Some(section) = reader.next_section()? {
            self.handle(section)?;
        }
        self.flush()?;
        log!(
            LogInfo,
            "Replayed {} of {} submits",
            self.stats.submits_issued,
            self.submit
        );
        Ok(())
    }

    fn handle(&mut self, section: Section) -> Result<(), ReplayError> {
        let t = match section.section_type() {
            Some(t) => t,
            None => {
                log!(LogDebug, "Skipping unknown record type {}", section.raw_type());
                return Ok(());
            }
        };
        match t {
            SectionType::Cmd => {
                let name = section.text().into_owned();
                self.skip = match &self.options.exe {
                    Some(exe) => !name.starts_with(exe.as_str()),
                    None => false,
                };
                if self.skip {
                    log!(LogDebug, "Skipping submits of {}", name);
                }
                self.exe_name = Some(name);
            }
            SectionType::GpuAddr => {
                if self.need_submit {
                    self.flush()?;
                }
                self.pending_addr = AddressDescriptor::parse(&section);
            }
            SectionType::BufferContents => {
                let desc = match self.pending_addr.take() {
                    Some(d) => d,
                    None => {
                        log!(LogWarn, "Buffer contents without a preceding gpu address");
                        return Ok(());
                    }
                };
                if !self.skip {
                    self.upload(desc.gpuaddr, desc.len as u64, section.payload())?;
                }
            }
            SectionType::CmdstreamAddr => self.cmdstream(&section)?,
            SectionType::ShaderLogBuffer => self.shader_log_iova = log_address(&section),
            SectionType::CpLogBuffer => self.cp_log_iova = log_address(&section),
            SectionType::WrtBuffer => match WriteBufferDirective::parse(&section) {
                Some(w) => self.write_buffers.push(w),
                None => log!(LogWarn, "Malformed write buffer record"),
            },
            _ => log!(LogDebug, "Ignoring {} record", t.name()),
        }
        Ok(())
    }

    fn cmdstream(&mut self, section: &Section) -> Result<(), ReplayError> {
        let desc = match AddressDescriptor::parse(section) {
            Some(d) => d,
            None => {
                log!(LogWarn, "Malformed cmdstream record");
                return Ok(());
            }
        };
        let index = self.submit;
        self.submit += 1;
        self.need_submit = true;
        if self.skip || !self.options.issues(index) {
            log!(LogDebug, "Skipped cmdstream {}: {} dwords", index, desc.len);
            return Ok(());
        }

        if self.options.override_submit == Some(index) {
            if let Some(gen) = self.options.generator.clone() {
                let cmds = self.override_cmdstream(&gen)?;
                log!(LogInfo, "Cmdstream {} replaced by {} generated", index, cmds.len());
                self.cmds.extend(cmds);
                return Ok(());
            }
        }
        log!(LogDebug, "Cmdstream {}: {} dwords at {:#x}", index, desc.len, desc.gpuaddr);
        self.cmds.push(SubmitCmd {
            iova: desc.gpuaddr,
            dwords: desc.len,
        });
        Ok(())
    }

    fn scratch(&mut self) -> Result<(u64, u64), ReplayError> {
        if let Some(s) = self.scratch {
            return Ok(s);
        }
        let iova = self
            .heap
            .alloc(SCRATCH_SIZE, page_size() as u64)
            .ok_or(ReplayError::AddressUnavailable {
                iova: 0,
                size: SCRATCH_SIZE,
            })?;
        self.scratch = Some((iova, SCRATCH_SIZE));
        Ok((iova, SCRATCH_SIZE))
    }

    fn override_cmdstream(&mut self, gen: &Path) -> Result<Vec<SubmitCmd>, ReplayError> {
        let (scratch_iova, scratch_size) = self.scratch()?;
        let path = generator::fragment_path()?;
        let sections = generator::generate(gen, &path, scratch_iova, scratch_size)?;

        let mut cmds = Vec::new();
        let mut pending = None;
        for section in sections {
            match section.section_type() {
                Some(SectionType::GpuAddr) => pending = AddressDescriptor::parse(&section),
                Some(SectionType::BufferContents) => {
                    if let Some(d) = pending.take() {
                        self.upload(d.gpuaddr, d.len as u64, section.payload())?;
                    }
                }
                Some(SectionType::CmdstreamAddr) => {
                    if let Some(d) = AddressDescriptor::parse(&section) {
                        cmds.push(SubmitCmd {
                            iova: d.gpuaddr,
                            dwords: d.len,
                        });
                    }
                }
                _ => {}
            }
        }
        if cmds.is_empty() {
            return Err(GeneratorError::NoCommandStream.into());
        }
        Ok(cmds)
    }

    fn in_scratch(&self, iova: u64, end: u64) -> bool {
        self.scratch
            .map_or(false, |(s, n)| iova >= s && end <= s + n)
    }

    /// Make `len` bytes at `iova` hold `bytes` on the device, reallocating
    /// when the captured length changed.
    fn upload(&mut self, iova: u64, len: u64, bytes: &[u8]) -> Result<(), ReplayError> {
        if len == 0 {
            return Ok(());
        }
        let size = ceil_page_size(len);
        let end = iova
            .checked_add(size)
            .ok_or(ReplayError::AddressUnavailable { iova, size })?;
        let reuse = match self.buffers.get(&iova) {
            Some(b) if b.len == len => true,
            Some(_) => {
                self.release(iova)?;
                false
            }
            None => false,
        };

        if !reuse {
            self.evict_overlapping(iova, end)?;
            let from_heap = !self.in_scratch(iova, end);
            if from_heap && !self.heap.alloc_addr(iova, size) {
                return Err(ReplayError::AddressUnavailable { iova, size });
            }
            let handle = match self.backend.alloc(iova, size) {
                Ok(h) => h,
                Err(e) => {
                    if from_heap {
                        self.heap.free(iova, size);
                    }
                    return Err(e.into());
                }
            };
            log!(LogDebug, "Allocated {:#x}+{:#x}", iova, size);
            self.buffers.insert(
                iova,
                DeviceBuffer {
                    handle,
                    len,
                    size,
                    from_heap,
                    used: false,
                },
            );
        }

        let handle = match self.buffers.get_mut(&iova) {
            Some(b) => {
                b.used = true;
                b.handle
            }
            None => return Err(DeviceError::UnknownAddress(iova).into()),
        };
        let dst = self.backend.mapping(handle)?.as_mut_slice();
        let len = (len as usize).min(dst.len());
        let n = bytes.len().min(len);
        dst[..n].copy_from_slice(&bytes[..n]);
        for b in &mut dst[n..len] {
            *b = 0;
        }
        Ok(())
    }

    /// Release every buffer intersecting `[iova, end)`.
    fn evict_overlapping(&mut self, iova: u64, end: u64) -> Result<(), ReplayError> {
        let overlapping: Vec<u64> = self
            .buffers
            .range(..end)
            .filter(|(&start, b)| start.saturating_add(b.size) > iova)
            .map(|(&start, _)| start)
            .collect();
        for start in overlapping {
            log!(
                LogWarn,
                "Buffer at {:#x} overlaps new buffer {:#x}-{:#x}; evicting",
                start,
                iova,
                end
            );
            self.release(start)?;
        }
        Ok(())
    }

    fn release(&mut self, iova: u64) -> Result<(), DeviceError> {
        if let Some(b) = self.buffers.remove(&iova) {
            if b.from_heap {
                self.heap.free(iova, b.size);
            }
            self.backend.free(b.handle)?;
        }
        Ok(())
    }

    /// End of a submission boundary: drop buffers that weren't uploaded for
    /// it, issue the queued command streams and report what they logged.
    fn flush(&mut self) -> Result<(), ReplayError> {
        let unused: Vec<u64> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.used)
            .map(|(&iova, _)| iova)
            .collect();
        if !unused.is_empty() {
            log!(LogDebug, "Freeing {} unused buffers", unused.len());
        }
        for iova in unused {
            self.release(iova)?;
        }

        let cmds = mem::take(&mut self.cmds);
        if !cmds.is_empty() {
            let bos: Vec<SubmitBo> = self
                .buffers
                .iter()
                .map(|(&iova, b)| SubmitBo {
                    handle: b.handle,
                    iova,
                    size: b.size,
                })
                .collect();
            let fence = self.backend.submit(&cmds, &bos)?;
            self.stats.submits_issued += 1;
            match self.backend.wait_fence(fence)? {
                FenceStatus::Signaled => {}
                FenceStatus::TimedOut => {
                    log!(LogWarn, "Timed out waiting for fence {}", fence.0);
                    self.stats.timeouts += 1;
                }
            }
            self.diagnostics()?;
        }

        for b in self.buffers.values_mut() {
            b.used = false;
        }
        self.need_submit = false;
        Ok(())
    }

    fn diagnostics(&mut self) -> Result<(), ReplayError> {
        if let Some(iova) = self.shader_log_iova {
            match device_bytes(&self.buffers, &mut self.backend, iova)? {
                Some(log) => {
                    diagnostics::print_shader_log(log, iova, &mut *self.out)?;
                }
                None => log!(LogWarn, "No buffer holds the shader log at {:#x}", iova),
            }
        }
        if let Some(iova) = self.cp_log_iova {
            match device_bytes(&self.buffers, &mut self.backend, iova)? {
                Some(log) => {
                    diagnostics::print_cp_log(log, iova, &mut *self.out)?;
                }
                None => log!(LogWarn, "No buffer holds the CP log at {:#x}", iova),
            }
        }

        let exe = self.exe_name.clone().unwrap_or_else(|| "unknown".into());
        for w in &self.write_buffers {
            match device_bytes(&self.buffers, &mut self.backend, w.iova)? {
                Some(bytes) => {
                    let n = (w.size as usize).min(bytes.len());
                    let dir = &self.options.output_dir;
                    diagnostics::dump_write_buffer(dir, &exe, &w.name, &bytes[..n])?;
                }
                None => log!(
                    LogWarn,
                    "No buffer holds write buffer {} at {:#x}",
                    w.name,
                    w.iova
                ),
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// The device bytes from `iova` to the end of the buffer holding it.
fn device_bytes<'b, B: GpuBackend>(
    buffers: &BTreeMap<u64, DeviceBuffer>,
    backend: &'b mut B,
    iova: u64,
) -> Result<Option<&'b mut [u8]>, DeviceError> {
    let (start, handle) = match buffers.range(..=iova).next_back() {
        Some((&start, b)) if iova < start + b.len => (start, b.handle),
        _ => return Ok(None),
    };
    let bytes = backend.mapping(handle)?.as_mut_slice();
    Ok(bytes.get_mut((iova - start) as usize..))
}

fn log_address(section: &Section) -> Option<u64> {
    section
        .u64_at_byte(0)
        .or_else(|| section.u32_at(0).map(|v| v as u64))
}

impl<B: GpuBackend> Drop for ReplaySession<B> {
    fn drop(&mut self) {
        let all: Vec<u64> = self.buffers.keys().copied().collect();
        for iova in all {
            if let Err(e) = self.release(iova) {
                log!(LogWarn, "Couldn't free buffer at {:#x}: {}", iova, e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        replay::mock_backend::MockBackend,
        trace::capture_writer::{dwords_to_bytes, CaptureWriter},
    };
    use nix::errno::Errno;
    use std::io::Cursor;

    fn session(options: ReplayOptions) -> ReplaySession<MockBackend> {
        let mut s = ReplaySession::new(MockBackend::new(), options);
        s.set_output(Box::new(io::sink()));
        s
    }

    fn reader(w: CaptureWriter<Vec<u8>>) -> CaptureReader {
        CaptureReader::from_reader(Cursor::new(w.into_inner())).unwrap()
    }

    #[test]
    pub fn test_resized_buffer_is_reallocated() {
        let mut s = session(ReplayOptions::default());
        s.upload(0x2000, 4096, &[1u8; 4096]).unwrap();
        s.upload(0x2000, 8192, &[2u8; 8192]).unwrap();
        assert_eq!(s.backend().frees, 1);
        assert_eq!(s.backend().allocs, 2);
        assert_eq!(s.buffer_count(), 1);
    }

    #[test]
    pub fn test_same_size_buffer_is_reused() {
        let mut s = session(ReplayOptions::default());
        s.upload(0x2000, 4096, &[1u8; 4096]).unwrap();
        s.upload(0x2000, 4096, &[2u8; 4096]).unwrap();
        assert_eq!(s.backend().allocs, 1);
        assert_eq!(s.backend().frees, 0);
        let bytes = device_bytes(&s.buffers, &mut s.backend, 0x2ffc).unwrap().unwrap();
        assert_eq!(bytes, &[2u8; 4][..]);
    }

    #[test]
    pub fn test_overlapping_buffer_is_evicted() {
        let mut s = session(ReplayOptions::default());
        s.upload(0x10000, 0x2000, &[]).unwrap();
        s.upload(0x11000, 0x1000, &[]).unwrap();
        assert_eq!(s.backend().frees, 1);
        assert_eq!(s.buffer_count(), 1);
        assert_eq!(s.heap.free_bytes(), 0x1_0000_0000 - 0x1000);
    }

    #[test]
    pub fn test_buffer_at_top_of_address_space() {
        let mut s = session(ReplayOptions::default());
        s.upload(0x10000, 0x1000, &[]).unwrap();
        let err = s
            .upload(0xffff_ffff_ffff_f800, 0x1000, &[0u8; 0x1000])
            .unwrap_err();
        assert!(matches!(
            err,
            ReplayError::AddressUnavailable {
                iova: 0xffff_ffff_ffff_f800,
                ..
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(s.backend().allocs, 1);
        assert_eq!(s.backend().frees, 0);
        assert_eq!(s.buffer_count(), 1);
    }

    #[test]
    pub fn test_submits_and_collects_garbage() {
        let mut w = CaptureWriter::new(Vec::new());
        w.write_buffer_dwords(0x1000, &[0x4001_0000, 0x2a]).unwrap();
        w.write_buffer(0x8000, &[0u8; 64]).unwrap();
        w.write_cmdstream(0x1000, 2).unwrap();
        // Second submission only re-dumps the command buffer.
        w.write_buffer_dwords(0x1000, &[0x4001_0000, 0x2b]).unwrap();
        w.write_cmdstream(0x1000, 2).unwrap();

        let mut s = session(ReplayOptions::default());
        s.run(&mut reader(w)).unwrap();

        let mock = s.backend();
        assert_eq!(mock.submits.len(), 2);
        assert_eq!(mock.submits[0].bos.len(), 2);
        assert_eq!(mock.submits[0].words[0], vec![0x4001_0000, 0x2a]);
        assert_eq!(mock.submits[1].bos.len(), 1);
        assert_eq!(mock.submits[1].words[0], vec![0x4001_0000, 0x2b]);
        assert_eq!(mock.frees, 1);
        assert_eq!(s.stats().submits_issued, 2);
    }

    #[test]
    pub fn test_nothing_queued_is_not_submitted() {
        let mut w = CaptureWriter::new(Vec::new());
        w.write_buffer(0x1000, &[0u8; 16]).unwrap();
        let mut s = session(ReplayOptions::default());
        s.run(&mut reader(w)).unwrap();
        assert!(s.backend().submits.is_empty());
    }

    #[test]
    pub fn test_submit_range() {
        let mut w = CaptureWriter::new(Vec::new());
        for i in 0..4u32 {
            w.write_buffer_dwords(0x1000, &[i]).unwrap();
            w.write_cmdstream(0x1000, 1).unwrap();
        }
        let mut s = session(ReplayOptions {
            first_submit: 1,
            last_submit: 2,
            ..Default::default()
        });
        s.run(&mut reader(w)).unwrap();
        let words: Vec<u32> = s.backend().submits.iter().map(|m| m.words[0][0]).collect();
        assert_eq!(words, vec![1, 2]);
        // Skipped submits still upload their buffers.
        assert_eq!(s.backend().allocs, 1);
    }

    #[test]
    pub fn test_exe_filter() {
        let mut w = CaptureWriter::new(Vec::new());
        w.write_text(SectionType::Cmd, "glmark2").unwrap();
        w.write_buffer_dwords(0x1000, &[1]).unwrap();
        w.write_cmdstream(0x1000, 1).unwrap();
        w.write_text(SectionType::Cmd, "vkcube").unwrap();
        w.write_buffer_dwords(0x1000, &[2]).unwrap();
        w.write_cmdstream(0x1000, 1).unwrap();
        let mut s = session(ReplayOptions {
            exe: Some("vk".into()),
            ..Default::default()
        });
        s.run(&mut reader(w)).unwrap();
        assert_eq!(s.backend().submits.len(), 1);
        assert_eq!(s.backend().submits[0].words[0], vec![2]);
    }

    #[test]
    pub fn test_timeout_is_not_fatal() {
        let mut w = CaptureWriter::new(Vec::new());
        for _ in 0..2 {
            w.write_buffer_dwords(0x1000, &[0]).unwrap();
            w.write_cmdstream(0x1000, 1).unwrap();
        }
        let mut mock = MockBackend::new();
        mock.time_out = true;
        let mut s = ReplaySession::new(mock, ReplayOptions::default());
        s.set_output(Box::new(io::sink()));
        s.run(&mut reader(w)).unwrap();
        assert_eq!(
            s.stats(),
            ReplayStats {
                submits_issued: 2,
                timeouts: 2
            }
        );
    }

    #[test]
    pub fn test_device_error_is_fatal() {
        let mut w = CaptureWriter::new(Vec::new());
        w.write_buffer_dwords(0x1000, &[0]).unwrap();
        w.write_cmdstream(0x1000, 1).unwrap();
        let mut mock = MockBackend::new();
        mock.fail_submit = Some(Errno::EINVAL);
        let mut s = ReplaySession::new(mock, ReplayOptions::default());
        let err = s.run(&mut reader(w)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    pub fn test_buffers_freed_on_drop() {
        let mut s = session(ReplayOptions::default());
        s.upload(0x1000, 16, &[0u8; 16]).unwrap();
        s.upload(0x9000, 16, &[0u8; 16]).unwrap();
        s.release(0x1000).unwrap();
        assert_eq!(s.backend().live_bos(), 1);
        drop(s);
    }

    #[test]
    pub fn test_shader_log_printed_after_submit() {
        let log_iova = 0x20000u64;
        let mut log = vec![0u8; 32];
        log[..8].copy_from_slice(&(log_iova + 12).to_le_bytes());
        log[8..12].copy_from_slice(&0x3f80_0000u32.to_le_bytes());

        let mut w = CaptureWriter::new(Vec::new());
        w.write_section(SectionType::ShaderLogBuffer, &log_iova.to_le_bytes())
            .unwrap();
        w.write_buffer(log_iova, &log).unwrap();
        w.write_buffer_dwords(0x1000, &[0]).unwrap();
        w.write_cmdstream(0x1000, 1).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("diag.txt");
        let mut s = ReplaySession::new(MockBackend::new(), ReplayOptions::default());
        s.set_output(Box::new(std::fs::File::create(&out_path).unwrap()));
        s.run(&mut reader(w)).unwrap();
        let text = std::fs::read_to_string(&out_path).unwrap();
        assert!(text.contains("Shader Log Entries: 1\n[0] 3f800000 1.0000\n"));
    }

    #[test]
    pub fn test_write_buffer_dumped() {
        let mut wrt = Vec::new();
        wrt.extend_from_slice(&0x3000u64.to_le_bytes());
        wrt.extend_from_slice(&8u64.to_le_bytes());
        wrt.extend_from_slice(&4u64.to_le_bytes());
        wrt.extend_from_slice(b"out\0");

        let mut w = CaptureWriter::new(Vec::new());
        w.write_text(SectionType::Cmd, "deqp").unwrap();
        w.write_section(SectionType::WrtBuffer, &wrt).unwrap();
        w.write_buffer(0x3000, &dwords_to_bytes(&[5, 6, 7])).unwrap();
        w.write_buffer_dwords(0x1000, &[0]).unwrap();
        w.write_cmdstream(0x1000, 1).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut s = session(ReplayOptions {
            output_dir: dir.path().to_owned(),
            ..Default::default()
        });
        s.run(&mut reader(w)).unwrap();
        let dumped = std::fs::read(dir.path().join("deqp").join("out")).unwrap();
        assert_eq!(dumped, dwords_to_bytes(&[5, 6]));
    }

    #[test]
    pub fn test_override_failure_is_not_fatal() {
        let mut w = CaptureWriter::new(Vec::new());
        w.write_buffer_dwords(0x1000, &[0]).unwrap();
        w.write_cmdstream(0x1000, 1).unwrap();
        let mut s = session(ReplayOptions {
            override_submit: Some(0),
            generator: Some(PathBuf::from("/nonexistent/generator")),
            ..Default::default()
        });
        let err = s.run(&mut reader(w)).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Generator(GeneratorError::Spawn { .. })
        ));
        assert!(!err.is_fatal());
    }
}
