use memchr::memchr;
use std::{borrow::Cow, convert::TryInto, fmt};

#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum SectionType {
    None = 0,
    Test = 1,
    /// Name of the process that produced the following submits.
    Cmd = 2,
    GpuAddr = 3,
    Context = 4,
    Cmdstream = 5,
    CmdstreamAddr = 6,
    Param = 7,
    Flush = 8,
    Program = 9,
    VertShader = 10,
    FragShader = 11,
    BufferContents = 12,
    GpuId = 13,
    ChipId = 14,
    ShaderLogBuffer = 15,
    CpLogBuffer = 16,
    WrtBuffer = 17,
}

impl SectionType {
    pub fn from_raw(raw: u32) -> Option<SectionType> {
        use SectionType::*;
        let t = match raw {
            0 => None,
            1 => Test,
            2 => Cmd,
            3 => GpuAddr,
            4 => Context,
            5 => Cmdstream,
            6 => CmdstreamAddr,
            7 => Param,
            8 => Flush,
            9 => Program,
            10 => VertShader,
            11 => FragShader,
            12 => BufferContents,
            13 => GpuId,
            14 => ChipId,
            15 => ShaderLogBuffer,
            16 => CpLogBuffer,
            17 => WrtBuffer,
            _ => return Option::None,
        };
        Some(t)
    }

    pub fn name(self) -> &'static str {
        use SectionType::*;
        match self {
            None => "none",
            Test => "test",
            Cmd => "cmd",
            GpuAddr => "gpuaddr",
            Context => "context",
            Cmdstream => "cmdstream",
            CmdstreamAddr => "cmdstream-addr",
            Param => "param",
            Flush => "flush",
            Program => "program",
            VertShader => "vert-shader",
            FragShader => "frag-shader",
            BufferContents => "buffer-contents",
            GpuId => "gpu-id",
            ChipId => "chip-id",
            ShaderLogBuffer => "shader-log-buffer",
            CpLogBuffer => "cp-log-buffer",
            WrtBuffer => "wrt-buffer",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One typed record of a capture file.
pub struct Section {
    raw_type: u32,
    /// Payload followed by a single NUL that is not part of the length.
    data: Vec<u8>,
}

impl Section {
    pub fn new(raw_type: u32, mut payload: Vec<u8>) -> Section {
        payload.push(0);
        Section {
            raw_type,
            data: payload,
        }
    }

    pub fn raw_type(&self) -> u32 {
        self.raw_type
    }

    /// None for record types this build does not know about.
    pub fn section_type(&self) -> Option<SectionType> {
        SectionType::from_raw(self.raw_type)
    }

    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Payload text up to the first NUL.
    pub fn text(&self) -> Cow<'_, str> {
        let end = memchr(0, &self.data).unwrap_or_else(|| self.len());
        String::from_utf8_lossy(&self.data[..end])
    }

    pub fn into_payload(mut self) -> Vec<u8> {
        self.data.pop();
        self.data
    }

    pub fn u32_at(&self, index: usize) -> Option<u32> {
        let b = self.payload().get(index * 4..index * 4 + 4)?;
        Some(u32::from_le_bytes(b.try_into().ok()?))
    }

    pub fn u64_at_byte(&self, offset: usize) -> Option<u64> {
        let b = self.payload().get(offset..offset + 8)?;
        Some(u64::from_le_bytes(b.try_into().ok()?))
    }

    pub fn dwords(&self) -> Vec<u32> {
        self.payload()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// GPU address and byte length carried by GPUADDR and CMDSTREAM_ADDR
/// records. CMDSTREAM_ADDR lengths are in dwords.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AddressDescriptor {
    pub gpuaddr: u64,
    pub len: u32,
}

impl AddressDescriptor {
    /// Layout is `[addr_lo, len]` optionally followed by `addr_hi`.
    pub fn parse(section: &Section) -> Option<AddressDescriptor> {
        let lo = section.u32_at(0)?;
        let len = section.u32_at(1)?;
        let hi = if section.len() > 8 {
            section.u32_at(2).unwrap_or(0)
        } else {
            0
        };
        Some(AddressDescriptor {
            gpuaddr: (hi as u64) << 32 | lo as u64,
            len,
        })
    }
}

/// Where to read back a buffer the command stream writes into.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct WriteBufferDirective {
    pub iova: u64,
    pub size: u64,
    pub name: String,
}

impl WriteBufferDirective {
    /// Layout is `{iova: u64, size: u64, name_len: u64, name}`.
    pub fn parse(section: &Section) -> Option<WriteBufferDirective> {
        let iova = section.u64_at_byte(0)?;
        let size = section.u64_at_byte(8)?;
        let name_len: usize = section.u64_at_byte(16)?.try_into().ok()?;
        let raw = section.payload().get(24..24usize.checked_add(name_len)?)?;
        let end = memchr(0, raw).unwrap_or_else(|| raw.len());
        Some(WriteBufferDirective {
            iova,
            size,
            name: String::from_utf8_lossy(&raw[..end]).into_owned(),
        })
    }
}
