//! Drives the decoder over one capture file.

use super::{
    options::DecodeOptions,
    pm4::generation,
    registers::RegisterState,
    sink::{DecodeSink, DeviceId, SubmitInfo},
    walker::{WalkState, Walker},
    DecodeError,
};
use crate::{
    address_space::buffer_space::BufferSpace,
    log::LogLevel::{LogDebug, LogInfo, LogWarn},
    trace::{
        capture_reader::CaptureReader,
        section::{AddressDescriptor, Section, SectionType},
    },
};

/// Decode state for a single input file. Buffers, register shadows and
/// counters never leak from one file into the next.
pub struct DecodeSession<'a> {
    options: &'a DecodeOptions,
    buffers: BufferSpace,
    regs: RegisterState,
    /// Created once the device generation is known.
    walk: Option<WalkState>,
    gpu_id: u32,
    chip_id: u64,
    /// The GPUADDR waiting for its BUFFER_CONTENTS.
    pending_addr: Option<AddressDescriptor>,
    /// Set after a submit; the next buffer starts a new address epoch.
    needs_reset: bool,
    submit: u32,
    frame: u32,
    exe_matches: bool,
}

impl<'a> DecodeSession<'a> {
    pub fn new(options: &'a DecodeOptions) -> DecodeSession<'a> {
        DecodeSession {
            options,
            buffers: BufferSpace::new(),
            regs: RegisterState::new(),
            walk: None,
            gpu_id: 0,
            chip_id: 0,
            pending_addr: None,
            needs_reset: false,
            submit: 0,
            frame: 0,
            exe_matches: options.exe.is_none(),
        }
    }

    pub fn submits(&self) -> u32 {
        self.submit
    }

    pub fn frames(&self) -> u32 {
        self.frame
    }

    pub fn draws(&self) -> u32 {
        self.walk.as_ref().map_or(0, |w| w.draw_count)
    }

    /// Decode every record of `reader` into `sink`.
    pub fn run(
        &mut self,
        reader: &mut CaptureReader,
        sink: &mut dyn DecodeSink,
    ) -> Result<(), DecodeError> {
        while let Some(section) = reader.next_section()? {
            self.handle(section, sink)?;
        }
        if self.walk.is_none() && (self.gpu_id != 0 || self.chip_id != 0) {
            self.device(sink)?;
        }
        log!(
            LogInfo,
            "Decoded {} submits, {} frames, {} draws ({} bytes{})",
            self.submit,
            self.frame,
            self.draws(),
            reader.bytes_consumed(),
            if reader.is_compressed() { ", gzip" } else { "" }
        );
        sink.finish()?;
        Ok(())
    }

    fn handle(&mut self, section: Section, sink: &mut dyn DecodeSink) -> Result<(), DecodeError> {
        let t = match section.section_type() {
            Some(t) => t,
            None => {
                log!(
                    LogDebug,
                    "Skipping record of unknown type {} ({} bytes)",
                    section.raw_type(),
                    section.len()
                );
                return Ok(());
            }
        };
        match t {
            SectionType::Test => sink.test_marker(&section.text())?,
            SectionType::Cmd => {
                let name = section.text();
                if let Some(exe) = &self.options.exe {
                    self.exe_matches = name.starts_with(exe.as_str());
                }
                sink.process_name(&name)?;
            }
            SectionType::GpuId => {
                if self.gpu_id == 0 {
                    self.gpu_id = section.u32_at(0).unwrap_or(0);
                }
            }
            SectionType::ChipId => {
                if self.chip_id == 0 {
                    self.chip_id = section.u64_at_byte(0).unwrap_or(0);
                }
            }
            SectionType::GpuAddr => {
                if self.needs_reset {
                    self.buffers.reset();
                    self.needs_reset = false;
                }
                self.pending_addr = AddressDescriptor::parse(&section);
            }
            SectionType::BufferContents => match self.pending_addr.take() {
                Some(addr) => {
                    self.buffers
                        .add_buffer(addr.gpuaddr, addr.len as u64, section.into_payload());
                }
                None => log!(
                    LogWarn,
                    "Buffer contents ({} bytes) without a preceding address",
                    section.len()
                ),
            },
            SectionType::CmdstreamAddr => {
                let addr = match AddressDescriptor::parse(&section) {
                    Some(addr) => addr,
                    None => {
                        log!(LogWarn, "Short cmdstream address record");
                        return Ok(());
                    }
                };
                self.cmdstream(addr, sink)?;
            }
            SectionType::Flush => self.frame += 1,
            _ => log!(LogDebug, "Skipping {} record ({} bytes)", t, section.len()),
        }
        Ok(())
    }

    fn device(&mut self, sink: &mut dyn DecodeSink) -> Result<(), DecodeError> {
        let gen = generation(self.gpu_id, self.chip_id)
            .or_else(|| self.options.gpu_id.map(|id| id / 100))
            .ok_or(DecodeError::NoDeviceId)?;
        let gpu_id = if self.gpu_id == 0 && self.chip_id == 0 {
            self.options.gpu_id.unwrap_or(0)
        } else {
            self.gpu_id
        };
        sink.device(&DeviceId {
            gpu_id,
            chip_id: self.chip_id,
            generation: gen,
        })?;
        self.walk = Some(WalkState::new(gen));
        Ok(())
    }

    fn selected(&self) -> bool {
        let in_range = self.options.submit.map_or(true, |r| r.contains(self.submit));
        let in_frame = self.options.frame.map_or(true, |f| f == self.frame);
        in_range && in_frame && self.exe_matches
    }

    fn cmdstream(
        &mut self,
        addr: AddressDescriptor,
        sink: &mut dyn DecodeSink,
    ) -> Result<(), DecodeError> {
        if self.walk.is_none() {
            self.device(sink)?;
        }
        if self.selected() {
            let info = SubmitInfo {
                index: self.submit,
                gpuaddr: addr.gpuaddr,
                dwords: addr.len,
            };
            if let Some(walk) = self.walk.as_mut() {
                Walker::new(
                    &mut self.buffers,
                    &mut self.regs,
                    walk,
                    sink,
                    self.options.once,
                )
                .decode_submit(&info)?;
            }
        } else {
            log!(LogDebug, "Skipping submit {}", self.submit);
        }
        self.needs_reset = true;
        self.submit += 1;
        Ok(())
    }
}
