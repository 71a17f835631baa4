//! Builds capture streams for tests.

use super::section::SectionType;
use std::io::{self, Write};

pub struct CaptureWriter<W: Write> {
    out: W,
}

pub fn dwords_to_bytes(dwords: &[u32]) -> Vec<u8> {
    dwords.iter().flat_map(|d| d.to_le_bytes().to_vec()).collect()
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(out: W) -> CaptureWriter<W> {
        CaptureWriter { out }
    }

    pub fn write_section(&mut self, t: SectionType, payload: &[u8]) -> io::Result<()> {
        self.write_raw(t as u32, payload)
    }

    pub fn write_raw(&mut self, raw_type: u32, payload: &[u8]) -> io::Result<()> {
        self.out.write_all(&raw_type.to_le_bytes())?;
        self.out.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.out.write_all(payload)
    }

    pub fn write_padding(&mut self) -> io::Result<()> {
        self.out.write_all(&[0xff; 8])
    }

    pub fn write_text(&mut self, t: SectionType, text: &str) -> io::Result<()> {
        let mut payload = text.as_bytes().to_vec();
        payload.push(0);
        self.write_section(t, &payload)
    }

    pub fn write_gpu_id(&mut self, gpu_id: u32) -> io::Result<()> {
        self.write_section(SectionType::GpuId, &gpu_id.to_le_bytes())
    }

    pub fn write_chip_id(&mut self, chip_id: u64) -> io::Result<()> {
        self.write_section(SectionType::ChipId, &chip_id.to_le_bytes())
    }

    fn write_addr(&mut self, t: SectionType, gpuaddr: u64, len: u32) -> io::Result<()> {
        let d = [gpuaddr as u32, len, (gpuaddr >> 32) as u32];
        self.write_section(t, &dwords_to_bytes(&d))
    }

    /// GPUADDR followed by BUFFER_CONTENTS.
    pub fn write_buffer(&mut self, gpuaddr: u64, contents: &[u8]) -> io::Result<()> {
        self.write_addr(SectionType::GpuAddr, gpuaddr, contents.len() as u32)?;
        self.write_section(SectionType::BufferContents, contents)
    }

    pub fn write_buffer_dwords(&mut self, gpuaddr: u64, dwords: &[u32]) -> io::Result<()> {
        self.write_buffer(gpuaddr, &dwords_to_bytes(dwords))
    }

    pub fn write_cmdstream(&mut self, gpuaddr: u64, dwords: u32) -> io::Result<()> {
        self.write_addr(SectionType::CmdstreamAddr, gpuaddr, dwords)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
