//! Command processor packet formats.
//!
//! Generations before a5xx use type0 (register write), type2 (filler) and
//! type3 (opcode) headers. From a5xx on, type4 (register write) and type7
//! (opcode) headers carry odd parity bits over their count and target fields.

use super::DecodeError;
use bit_field::BitField;
use std::fmt;

/// Odd parity of the low 32 bits of `v`, as the command processor computes it.
pub fn odd_parity_bit(v: u32) -> u32 {
    let mut v = v;
    v ^= v >> 16;
    v ^= v >> 8;
    v ^= v >> 4;
    (0x9669 >> (v & 0xf)) & 1
}

macro_rules! opcodes {
    (
        unique { $($variant:ident = $val:literal, $name:literal;)* }
        shared { $($svariant:ident = $sval:literal, $sname:literal;)* }
    ) => {
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
        pub enum Opcode {
            $($variant,)*
            $($svariant,)*
        }

        impl Opcode {
            fn lookup_unique(raw: u32) -> Option<Opcode> {
                match raw {
                    $($val => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                    $(Opcode::$svariant => $sname,)*
                }
            }

            pub fn value(self) -> u32 {
                match self {
                    $(Opcode::$variant => $val,)*
                    $(Opcode::$svariant => $sval,)*
                }
            }
        }
    };
}

opcodes! {
    unique {
        Nop = 0x10, "CP_NOP";
        RecordPfpTimestamp = 0x11, "CP_RECORD_PFP_TIMESTAMP";
        WaitMemWrites = 0x12, "CP_WAIT_MEM_WRITES";
        WaitForMe = 0x13, "CP_WAIT_FOR_ME";
        WaitMemGte = 0x14, "CP_WAIT_MEM_GTE";
        ThreadControl = 0x17, "CP_THREAD_CONTROL";
        SkipIb2EnableGlobal = 0x1d, "CP_SKIP_IB2_ENABLE_GLOBAL";
        RegRmw = 0x21, "CP_REG_RMW";
        DrawIndx = 0x22, "CP_DRAW_INDX";
        SkipIb2EnableLocal = 0x23, "CP_SKIP_IB2_ENABLE_LOCAL";
        DrawAuto = 0x24, "CP_DRAW_AUTO";
        WaitForIdle = 0x26, "CP_WAIT_FOR_IDLE";
        DrawIndirect = 0x28, "CP_DRAW_INDIRECT";
        DrawIndxIndirect = 0x29, "CP_DRAW_INDX_INDIRECT";
        DrawIndirectMulti = 0x2a, "CP_DRAW_INDIRECT_MULTI";
        ImLoadImmediate = 0x2b, "CP_IM_LOAD_IMMEDIATE";
        Blit = 0x2c, "CP_BLIT";
        SetConstant = 0x2d, "CP_SET_CONSTANT";
        SetBinDataOffset5 = 0x2e, "CP_SET_BIN_DATA5_OFFSET";
        SetBinData5 = 0x2f, "CP_SET_BIN_DATA5";
        LoadState6Geom = 0x32, "CP_LOAD_STATE6_GEOM";
        ExecCs = 0x33, "CP_EXEC_CS";
        LoadState6Frag = 0x34, "CP_LOAD_STATE6_FRAG";
        SetSubdrawSize = 0x35, "CP_SET_SUBDRAW_SIZE";
        IndirectBufferPfd = 0x37, "CP_INDIRECT_BUFFER_PFD";
        DrawIndxOffset = 0x38, "CP_DRAW_INDX_OFFSET";
        RegTest = 0x39, "CP_REG_TEST";
        InvalidateState = 0x3b, "CP_INVALIDATE_STATE";
        WaitRegMem = 0x3c, "CP_WAIT_REG_MEM";
        MemWrite = 0x3d, "CP_MEM_WRITE";
        RegToMem = 0x3e, "CP_REG_TO_MEM";
        IndirectBuffer = 0x3f, "CP_INDIRECT_BUFFER";
        Interrupt = 0x40, "CP_INTERRUPT";
        ExecCsIndirect = 0x41, "CP_EXEC_CS_INDIRECT";
        MemToReg = 0x42, "CP_MEM_TO_REG";
        SetDrawState = 0x43, "CP_SET_DRAW_STATE";
        CondExec = 0x44, "CP_COND_EXEC";
        CondWrite5 = 0x45, "CP_COND_WRITE5";
        EventWrite = 0x46, "CP_EVENT_WRITE";
        CondRegExec = 0x47, "CP_COND_REG_EXEC";
        MeInit = 0x48, "CP_ME_INIT";
        AprivCntl = 0x49, "CP_APRIV_CNTL";
        ScratchWrite = 0x4c, "CP_SCRATCH_WRITE";
        StartBin = 0x50, "CP_START_BIN";
        EndBin = 0x51, "CP_END_BIN";
        WaitRegEq = 0x52, "CP_WAIT_REG_EQ";
        SmmuTableUpdate = 0x53, "CP_SMMU_TABLE_UPDATE";
        SetCtxswitchIb = 0x55, "CP_SET_CTXSWITCH_IB";
        IndirectBufferChain = 0x57, "CP_INDIRECT_BUFFER_CHAIN";
        ContextRegBunch = 0x5c, "CP_CONTEXT_REG_BUNCH";
        ContextRegBunch2 = 0x5d, "CP_CONTEXT_REG_BUNCH2";
        SetProtectedMode = 0x5f, "CP_SET_PROTECTED_MODE";
        SetMode = 0x63, "CP_SET_MODE";
        SetVisibilityOverride = 0x64, "CP_SET_VISIBILITY_OVERRIDE";
        SetMarker = 0x65, "CP_SET_MARKER";
        SetSecureMode = 0x66, "CP_SET_SECURE_MODE";
        PreemptEnableGlobal = 0x69, "CP_PREEMPT_ENABLE_GLOBAL";
        PreemptEnableLocal = 0x6a, "CP_PREEMPT_ENABLE_LOCAL";
        ContextSwitchYield = 0x6b, "CP_CONTEXT_SWITCH_YIELD";
        SetRenderMode = 0x6c, "CP_SET_RENDER_MODE";
        RegWrite = 0x6d, "CP_REG_WRITE";
        ComputeCheckpoint = 0x6e, "CP_COMPUTE_CHECKPOINT";
        BootstrapUcode = 0x6f, "CP_BOOTSTRAP_UCODE";
        WaitTwoRegs = 0x70, "CP_WAIT_TWO_REGS";
        MemToMem = 0x73, "CP_MEM_TO_MEM";
        Memcpy = 0x75, "CP_MEMCPY";
        RegWrNoCtxt = 0x78, "CP_REG_WR_NO_CTXT";
        FixedStrideDrawTable = 0x7f, "CP_FIXED_STRIDE_DRAW_TABLE";
    }
    shared {
        LoadState = 0x30, "CP_LOAD_STATE";
        LoadState4 = 0x30, "CP_LOAD_STATE4";
        DrawIndx2 = 0x36, "CP_DRAW_INDX_2";
        LoadState6 = 0x36, "CP_LOAD_STATE6";
    }
}

impl Opcode {
    /// Some opcode values were reassigned between generations.
    pub fn from_raw(raw: u32, gen: u32) -> Option<Opcode> {
        match raw {
            0x30 if gen >= 4 => Some(Opcode::LoadState4),
            0x30 => Some(Opcode::LoadState),
            0x36 if gen >= 5 => Some(Opcode::LoadState6),
            0x36 => Some(Opcode::DrawIndx2),
            _ => Opcode::lookup_unique(raw),
        }
    }

    pub fn is_draw(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            DrawIndx
                | DrawIndx2
                | DrawIndxOffset
                | DrawIndirect
                | DrawIndxIndirect
                | DrawIndirectMulti
                | DrawAuto
                | ExecCs
                | ExecCsIndirect
        )
    }

    pub fn is_indirect_buffer(self) -> bool {
        use Opcode::*;
        matches!(self, IndirectBuffer | IndirectBufferPfd | IndirectBufferChain)
    }

    pub fn is_load_state(self) -> bool {
        matches!(
            self,
            Opcode::LoadState
                | Opcode::LoadState4
                | Opcode::LoadState6
                | Opcode::LoadState6Geom
                | Opcode::LoadState6Frag
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PacketHeader {
    /// Writes `count` consecutive registers starting at `reg`.
    RegWrite { reg: u32, count: u32 },
    /// `count` payload dwords follow the header.
    Opcode { op: Opcode, count: u32 },
    /// Single word filler.
    Type2Nop,
}

impl PacketHeader {
    /// Dwords following the header.
    pub fn payload_len(&self) -> u32 {
        match *self {
            PacketHeader::RegWrite { count, .. } => count,
            PacketHeader::Opcode { count, .. } => count,
            PacketHeader::Type2Nop => 0,
        }
    }
}

const TYPE2_NOP: u32 = 0x8000_0000;

pub fn parse_header(word: u32, gen: u32) -> Result<PacketHeader, DecodeError> {
    if gen >= 5 {
        parse_header_64b(word)
    } else {
        parse_header_32b(word, gen)
    }
}

fn parse_header_64b(word: u32) -> Result<PacketHeader, DecodeError> {
    match word.get_bits(28..32) {
        4 => {
            let count = word.get_bits(0..7);
            let reg = word.get_bits(8..27);
            if word.get_bits(7..8) != odd_parity_bit(count)
                || word.get_bits(27..28) != odd_parity_bit(reg)
            {
                return Err(DecodeError::BadPacket(word));
            }
            Ok(PacketHeader::RegWrite { reg, count })
        }
        7 => {
            let count = word.get_bits(0..14);
            let raw_op = word.get_bits(16..23);
            if word.get_bits(15..16) != odd_parity_bit(count)
                || word.get_bits(23..24) != odd_parity_bit(raw_op)
                || word.get_bits(24..28) != 0
            {
                return Err(DecodeError::BadPacket(word));
            }
            match Opcode::from_raw(raw_op, 5) {
                Some(op) => Ok(PacketHeader::Opcode { op, count }),
                None => Err(DecodeError::UnknownOpcode(raw_op)),
            }
        }
        _ => Err(DecodeError::BadPacket(word)),
    }
}

fn parse_header_32b(word: u32, gen: u32) -> Result<PacketHeader, DecodeError> {
    if word == TYPE2_NOP {
        return Ok(PacketHeader::Type2Nop);
    }
    let count = word.get_bits(16..30) + 1;
    match word.get_bits(30..32) {
        0 => Ok(PacketHeader::RegWrite {
            reg: word.get_bits(0..15),
            count,
        }),
        3 => {
            let raw_op = word.get_bits(8..16);
            match Opcode::from_raw(raw_op, gen) {
                Some(op) => Ok(PacketHeader::Opcode { op, count }),
                None => Err(DecodeError::UnknownOpcode(raw_op)),
            }
        }
        _ => Err(DecodeError::BadPacket(word)),
    }
}

/// Device generation (3 for a3xx, 6 for a6xx...) from whichever id the
/// capture carried.
pub fn generation(gpu_id: u32, chip_id: u64) -> Option<u32> {
    if gpu_id != 0 {
        return Some(gpu_id / 100);
    }
    let gen = ((chip_id >> 24) & 0xff) as u32;
    if gen != 0 {
        Some(gen)
    } else {
        None
    }
}

/// Whether GPU addresses in packets are two dwords wide.
pub fn is_64b(gen: u32) -> bool {
    gen >= 5
}

#[cfg(test)]
pub fn type4_header(reg: u32, count: u32) -> u32 {
    0x4000_0000
        | (count & 0x7f)
        | odd_parity_bit(count) << 7
        | (reg & 0x7ffff) << 8
        | odd_parity_bit(reg) << 27
}

#[cfg(test)]
pub fn type7_header(op: Opcode, count: u32) -> u32 {
    let raw = op.value();
    0x7000_0000
        | (count & 0x3fff)
        | odd_parity_bit(count) << 15
        | (raw & 0x7f) << 16
        | odd_parity_bit(raw) << 23
}

#[cfg(test)]
pub fn type0_header(reg: u32, count: u32) -> u32 {
    ((count - 1) & 0x3fff) << 16 | (reg & 0x7fff)
}

#[cfg(test)]
pub fn type3_header(op: Opcode, count: u32) -> u32 {
    0xc000_0000 | ((count - 1) & 0x3fff) << 16 | (op.value() & 0xff) << 8
}

/// Marker identifiers carried in the first payload dword of a `CP_NOP`.
pub const NOP_MESG: u32 = 0x4d45_5347;
pub const NOP_BEGN: u32 = 0x4245_474e;
pub const NOP_END: u32 = 0x454e_4400;

/// `CP_EVENT_WRITE` event that performs a resolve blit.
pub const EVENT_BLIT: u32 = 30;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StateSource {
    Direct,
    Indirect,
    Bindless,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::TessCtrl => "hs",
            ShaderStage::TessEval => "ds",
            ShaderStage::Geometry => "gs",
            ShaderStage::Fragment => "fs",
            ShaderStage::Compute => "cs",
        }
    }
}

/// Decoded leading dwords of a `CP_LOAD_STATE*` packet.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct LoadState {
    pub dst_off: u32,
    pub state_type: u32,
    pub src: StateSource,
    pub block: u32,
    pub num_unit: u32,
    /// Where the state lives when it is not inline.
    pub ext_addr: u64,
    /// Payload index of the first inline state dword.
    pub inline_start: usize,
    gen: u32,
}

impl LoadState {
    pub fn parse(gen: u32, payload: &[u32]) -> Result<LoadState, DecodeError> {
        let addr_words = if is_64b(gen) { 2 } else { 1 };
        if payload.len() < 1 + addr_words {
            return Err(DecodeError::Truncated {
                needed: 1 + addr_words,
                available: payload.len(),
            });
        }
        let d0 = payload[0];
        let d1 = payload[1];
        let ext_addr = if addr_words == 2 {
            (d1 & !3) as u64 | (payload[2] as u64) << 32
        } else {
            (d1 & !3) as u64
        };

        let ls = if gen >= 6 {
            LoadState {
                dst_off: d0.get_bits(0..14),
                state_type: d0.get_bits(14..16),
                src: match d0.get_bits(16..18) {
                    0 => StateSource::Direct,
                    1 => StateSource::Bindless,
                    _ => StateSource::Indirect,
                },
                block: d0.get_bits(18..22),
                num_unit: d0.get_bits(22..32),
                ext_addr,
                inline_start: 1 + addr_words,
                gen,
            }
        } else if gen >= 4 {
            LoadState {
                dst_off: d0.get_bits(0..14),
                state_type: d1 & 3,
                src: if d0.get_bits(16..18) == 0 {
                    StateSource::Direct
                } else {
                    StateSource::Indirect
                },
                block: d0.get_bits(18..22),
                num_unit: d0.get_bits(22..32),
                ext_addr,
                inline_start: 1 + addr_words,
                gen,
            }
        } else {
            LoadState {
                dst_off: d0.get_bits(0..16),
                state_type: d1 & 3,
                src: if d0.get_bits(16..19) == 0 {
                    StateSource::Direct
                } else {
                    StateSource::Indirect
                },
                block: d0.get_bits(19..22),
                num_unit: d0.get_bits(22..31),
                ext_addr,
                inline_start: 2,
                gen,
            }
        };
        Ok(ls)
    }

    /// The stage this load uploads instructions for, if it is a shader
    /// program load at all.
    pub fn shader_stage(&self) -> Option<ShaderStage> {
        if self.state_type != 0 {
            return None;
        }
        let first = if self.gen >= 4 { 8 } else { 4 };
        let stages: &[ShaderStage] = if self.gen >= 4 {
            &[
                ShaderStage::Vertex,
                ShaderStage::TessCtrl,
                ShaderStage::TessEval,
                ShaderStage::Geometry,
                ShaderStage::Fragment,
                ShaderStage::Compute,
            ]
        } else {
            &[
                ShaderStage::Vertex,
                ShaderStage::Geometry,
                ShaderStage::Fragment,
                ShaderStage::Compute,
            ]
        };
        self.block
            .checked_sub(first)
            .and_then(|i| stages.get(i as usize))
            .copied()
    }

    /// Size of the shader program in dwords.
    pub fn shader_dwords(&self) -> u32 {
        let per_unit = if self.gen >= 4 { 32 } else { 8 };
        self.num_unit * per_unit
    }
}

bitflags! {
    pub struct DrawStateFlags: u32 {
        const DIRTY = 0x1;
        const DISABLE = 0x2;
        const DISABLE_ALL_GROUPS = 0x4;
        const LOAD_IMMED = 0x8;
    }
}

/// One group of a `CP_SET_DRAW_STATE` packet.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DrawStateEntry {
    pub header: u32,
    pub count: u32,
    pub flags: DrawStateFlags,
    pub enable_mask: u32,
    pub group: u32,
    pub addr: u64,
}

impl DrawStateEntry {
    pub fn parse_all(gen: u32, payload: &[u32]) -> Result<Vec<DrawStateEntry>, DecodeError> {
        let stride = if is_64b(gen) { 3 } else { 2 };
        if payload.len() % stride != 0 {
            return Err(DecodeError::Truncated {
                needed: (payload.len() / stride + 1) * stride,
                available: payload.len(),
            });
        }
        Ok(payload
            .chunks_exact(stride)
            .map(|c| {
                let h = c[0];
                let addr = if stride == 3 {
                    c[1] as u64 | (c[2] as u64) << 32
                } else {
                    c[1] as u64
                };
                DrawStateEntry {
                    header: h,
                    count: h.get_bits(0..16),
                    flags: DrawStateFlags::from_bits_truncate(h.get_bits(16..20)),
                    enable_mask: h.get_bits(20..24),
                    group: h.get_bits(24..29),
                    addr,
                }
            })
            .collect())
    }
}

/// Binning pass selection written by `CP_SET_MARKER`, as an enable mask.
pub const MODE_BINNING: u32 = 0x1;
pub const MODE_GMEM: u32 = 0x2;
pub const MODE_BYPASS: u32 = 0x4;
pub const MODE_ALL: u32 = MODE_BINNING | MODE_GMEM | MODE_BYPASS;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RenderMode {
    Unknown,
    Bypass,
    Binning,
    Gmem,
}

impl RenderMode {
    /// From the mode field of a `CP_SET_MARKER` payload.
    pub fn from_marker(dword0: u32) -> Option<RenderMode> {
        match dword0 & 0xf {
            1 => Some(RenderMode::Bypass),
            2 => Some(RenderMode::Binning),
            4 => Some(RenderMode::Gmem),
            _ => None,
        }
    }

    pub fn enable_mask(self) -> u32 {
        match self {
            RenderMode::Unknown => MODE_ALL,
            RenderMode::Bypass => MODE_BYPASS,
            RenderMode::Binning => MODE_BINNING,
            RenderMode::Gmem => MODE_GMEM,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderMode::Unknown => "unknown",
            RenderMode::Bypass => "bypass",
            RenderMode::Binning => "binning",
            RenderMode::Gmem => "gmem",
        }
    }
}

/// Primitive names for the `DRAW_INITIATOR` prim type field.
pub fn primitive_name(prim: u32) -> &'static str {
    match prim {
        0 => "none",
        1 => "points",
        2 => "lines",
        3 => "line_strip",
        4 => "triangles",
        5 => "tri_fan",
        6 => "tri_strip",
        7 => "line_loop",
        8 => "rects",
        _ => "prim",
    }
}
