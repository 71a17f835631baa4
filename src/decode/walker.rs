//! Recursive decoder for command streams.

use super::{
    pm4::{
        is_64b, parse_header, primitive_name, DrawStateEntry, DrawStateFlags, LoadState, Opcode,
        PacketHeader, RenderMode, StateSource, EVENT_BLIT, NOP_BEGN, NOP_END, NOP_MESG,
    },
    registers::RegisterState,
    sink::{
        DecodeSink, DrawInfo, IndirectInfo, IndirectKind, MarkerKind, ShaderLoad, ShaderSource,
        SkipReason, SubmitInfo, SubmitStats,
    },
    DecodeError,
};
use crate::{
    address_space::buffer_space::BufferSpace,
    log::LogLevel::{LogDebug, LogWarn},
};
use std::{cmp::min, collections::HashSet};

/// Nesting beyond this is treated as a runaway chain rather than decoded.
pub const MAX_IB_DEPTH: usize = 64;

/// Group ids are 5 bits wide.
pub const DRAW_STATE_GROUPS: usize = 32;

/// Decoder state that lives for a whole capture file.
pub struct WalkState {
    pub generation: u32,
    pub render_mode: RenderMode,
    pub draw_count: u32,
    /// Shader addresses already reported as uploaded.
    shaders_seen: HashSet<u64>,
    /// Indirect targets currently being decoded, outermost first.
    active: Vec<u64>,
    stats: SubmitStats,
    /// Draw state groups waiting to be loaded by the next draw.
    groups: [Option<DrawStateEntry>; DRAW_STATE_GROUPS],
    loading_groups: bool,
}

impl WalkState {
    pub fn new(generation: u32) -> WalkState {
        WalkState {
            generation,
            render_mode: RenderMode::Unknown,
            draw_count: 0,
            shaders_seen: HashSet::new(),
            active: Vec::new(),
            stats: SubmitStats::default(),
            groups: [None; DRAW_STATE_GROUPS],
            loading_groups: false,
        }
    }
}

fn truncated(needed: usize, available: usize) -> DecodeError {
    DecodeError::Truncated { needed, available }
}

/// `count` dwords of `words` starting at `start`, or a truncation error.
fn take(words: &[u32], start: usize, count: usize) -> Result<&[u32], DecodeError> {
    words
        .get(start..start + count)
        .ok_or_else(|| truncated(count, words.len().saturating_sub(start)))
}

/// Printable ASCII of the little endian bytes of `words`, up to the first NUL.
fn nop_text(words: &[u32]) -> String {
    words
        .iter()
        .flat_map(|w| w.to_le_bytes().to_vec())
        .take_while(|b| *b != 0)
        .filter(|b| b.is_ascii())
        .map(|b| b as char)
        .collect()
}

pub struct Walker<'a> {
    buffers: &'a mut BufferSpace,
    regs: &'a mut RegisterState,
    state: &'a mut WalkState,
    sink: &'a mut dyn DecodeSink,
    once: bool,
}

impl<'a> Walker<'a> {
    pub fn new(
        buffers: &'a mut BufferSpace,
        regs: &'a mut RegisterState,
        state: &'a mut WalkState,
        sink: &'a mut dyn DecodeSink,
        once: bool,
    ) -> Walker<'a> {
        Walker {
            buffers,
            regs,
            state,
            sink,
            once,
        }
    }

    /// Decode one top level command stream.
    pub fn decode_submit(&mut self, submit: &SubmitInfo) -> Result<SubmitStats, DecodeError> {
        self.state.stats = SubmitStats::default();
        self.sink.begin_submit(submit)?;
        match self.buffers.read_dwords(submit.gpuaddr, submit.dwords) {
            Some(words) => {
                let overflow = self.decode(&words, 0)?;
                if overflow > 0 {
                    return Err(truncated(overflow, 0));
                }
            }
            None => log!(
                LogWarn,
                "cmdstream {} at {:#x} ({} dwords) is not in any captured buffer",
                submit.index,
                submit.gpuaddr,
                submit.dwords
            ),
        }
        let stats = self.state.stats;
        self.sink.end_submit(submit, &stats)?;
        Ok(stats)
    }

    /// Decode `words` packet by packet. Returns how far a trailing `CP_NOP`
    /// declared itself past the end of `words`, which only a conditional
    /// execute region may absorb.
    pub fn decode(&mut self, words: &[u32], level: usize) -> Result<usize, DecodeError> {
        let gen = self.state.generation;
        let mut pos = 0;
        while pos < words.len() {
            let rest = &words[pos..];
            let header = parse_header(rest[0], gen)?;
            let n = header.payload_len() as usize;
            let available = rest.len() - 1;
            match header {
                PacketHeader::Type2Nop => {
                    self.sink.type2_nop(level)?;
                    pos += 1;
                }
                PacketHeader::RegWrite { reg, .. } => {
                    let values = take(rest, 1, n)?;
                    self.write_regs(reg, values, false, level)?;
                    pos += 1 + n;
                }
                PacketHeader::Opcode { op, .. } => {
                    if n > available {
                        if op == Opcode::Nop {
                            let payload = &rest[1..];
                            self.sink.opcode(op, rest[0], payload, level)?;
                            self.nop(payload, level)?;
                            return Ok(n - available);
                        }
                        return Err(truncated(n, available));
                    }
                    let payload = &rest[1..1 + n];
                    let after = &rest[1 + n..];
                    let extra = self.opcode(op, rest[0], payload, after, level)?;
                    pos += 1 + n + extra;
                }
            }
        }
        Ok(0)
    }

    fn write_regs(
        &mut self,
        base: u32,
        values: &[u32],
        grouped: bool,
        level: usize,
    ) -> Result<(), DecodeError> {
        for (i, v) in values.iter().enumerate() {
            self.regs.write(base + i as u32, *v);
        }
        self.sink
            .register_write(self.regs, base, values, grouped, level)?;
        Ok(())
    }

    /// Handle one opcode packet. Returns the number of words following the
    /// packet that it consumed as well.
    fn opcode(
        &mut self,
        op: Opcode,
        header: u32,
        payload: &[u32],
        after: &[u32],
        level: usize,
    ) -> Result<usize, DecodeError> {
        if op.is_load_state() {
            self.load_state(op, header, payload, level)?;
            return Ok(0);
        }

        if op.is_draw() {
            self.load_all_groups(level + 1)?;
        }
        self.sink.opcode(op, header, payload, level)?;
        match op {
            Opcode::IndirectBuffer | Opcode::IndirectBufferPfd | Opcode::IndirectBufferChain => {
                self.indirect(op, payload, level)?
            }
            Opcode::SetDrawState => self.set_draw_state(payload, level)?,
            Opcode::CondExec | Opcode::CondRegExec => {
                return self.cond_exec(op, header, payload, after, level)
            }
            Opcode::Nop => self.nop(payload, level)?,
            Opcode::SetMarker => self.set_marker(payload, level)?,
            Opcode::RegWrite => {
                let p = take(payload, 0, 3)?;
                self.write_regs(p[1] & 0xffff, &p[2..3], true, level + 1)?;
            }
            Opcode::ContextRegBunch => self.reg_bunch(payload, level)?,
            Opcode::ContextRegBunch2 => {
                let pairs = payload.get(2..).ok_or_else(|| truncated(2, payload.len()))?;
                self.reg_bunch(pairs, level)?
            }
            Opcode::StartBin => self.start_bin(payload, level)?,
            Opcode::FixedStrideDrawTable => self.fixed_stride_draw_table(payload, level)?,
            Opcode::SetCtxswitchIb => self.ctxswitch_ib(payload, level)?,
            Opcode::EventWrite => {
                if self.state.generation > 5
                    && payload.first().map(|d| d & 0xff) == Some(EVENT_BLIT)
                {
                    self.draw(op, "blit", 0, level)?;
                }
            }
            op if op.is_draw() => self.draw_packet(op, payload, level)?,
            _ => (),
        }
        Ok(0)
    }

    fn recurse(&mut self, ib: IndirectInfo, level: usize) -> Result<(), DecodeError> {
        if self.once
            && self
                .buffers
                .has_been_dumped(ib.addr, self.state.render_mode.enable_mask())
        {
            self.sink.skip_indirect(&ib, SkipReason::AlreadyDumped, level)?;
            return Ok(());
        }
        if self.state.active.contains(&ib.addr) || self.state.active.len() >= MAX_IB_DEPTH {
            log!(
                LogWarn,
                "Not following {:?} to {:#x}: it is already being decoded ({} deep)",
                ib.kind,
                ib.addr,
                self.state.active.len()
            );
            self.sink.skip_indirect(&ib, SkipReason::Cycle, level)?;
            return Ok(());
        }
        let words = match self.buffers.read_dwords(ib.addr, ib.dwords) {
            Some(words) => words,
            None => {
                log!(
                    LogWarn,
                    "Could not find {:?} target {:#x} ({} dwords)",
                    ib.kind,
                    ib.addr,
                    ib.dwords
                );
                self.sink.skip_indirect(&ib, SkipReason::Missing, level)?;
                return Ok(());
            }
        };

        self.sink.begin_indirect(&ib, level)?;
        self.state.active.push(ib.addr);
        let result = self.decode(&words, level + 1);
        self.state.active.pop();
        let overflow = result?;
        if overflow > 0 {
            return Err(truncated(overflow, 0));
        }
        self.sink.end_indirect(&ib, level)?;
        Ok(())
    }

    fn indirect(&mut self, op: Opcode, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let (addr, dwords) = if is_64b(self.state.generation) {
            let p = take(payload, 0, 3)?;
            (p[0] as u64 | (p[1] as u64) << 32, p[2])
        } else {
            let p = take(payload, 0, 2)?;
            (p[0] as u64, p[1])
        };
        self.recurse(
            IndirectInfo {
                kind: IndirectKind::Ib(op),
                addr,
                dwords,
            },
            level,
        )
    }

    fn set_draw_state(&mut self, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let inline = self.sink.inline_draw_state();
        for entry in DrawStateEntry::parse_all(self.state.generation, payload)? {
            self.sink.draw_state(&entry, level + 1)?;
            if entry.flags.contains(DrawStateFlags::DISABLE_ALL_GROUPS) {
                self.state.groups = [None; DRAW_STATE_GROUPS];
                continue;
            }
            let group = entry.group as usize;
            if entry.flags.contains(DrawStateFlags::DISABLE) {
                self.state.groups[group] = None;
                continue;
            }
            if inline || entry.flags.contains(DrawStateFlags::LOAD_IMMED) {
                self.state.groups[group] = None;
                self.load_group(&entry, level + 1)?;
            } else {
                self.state.groups[group] = Some(entry);
            }
        }
        Ok(())
    }

    fn load_group(&mut self, entry: &DrawStateEntry, level: usize) -> Result<(), DecodeError> {
        if entry.count == 0 {
            return Ok(());
        }
        if self.state.generation >= 6 && entry.enable_mask & self.state.render_mode.enable_mask() == 0
        {
            log!(
                LogDebug,
                "draw state group {} not enabled in {} mode",
                entry.group,
                self.state.render_mode.name()
            );
            return Ok(());
        }
        self.recurse(
            IndirectInfo {
                kind: IndirectKind::DrawState(entry.group),
                addr: entry.addr,
                dwords: entry.count,
            },
            level,
        )
    }

    /// Load every pending group for a draw, in group order, then clear them.
    fn load_all_groups(&mut self, level: usize) -> Result<(), DecodeError> {
        if self.state.loading_groups {
            log!(LogWarn, "draw inside a draw state group; not loading groups again");
            return Ok(());
        }
        let groups = std::mem::replace(&mut self.state.groups, [None; DRAW_STATE_GROUPS]);
        self.state.loading_groups = true;
        let result = groups
            .iter()
            .flatten()
            .try_for_each(|entry| self.load_group(entry, level));
        self.state.loading_groups = false;
        result
    }

    /// The true branch is the `after` words counted by the last payload
    /// dword. A `CP_NOP` at the end of the true branch that claims more words
    /// than the branch has left marks the excess as an else branch directly
    /// after it.
    fn cond_exec(
        &mut self,
        op: Opcode,
        header: u32,
        payload: &[u32],
        after: &[u32],
        level: usize,
    ) -> Result<usize, DecodeError> {
        let true_len = *payload.last().ok_or_else(|| truncated(1, 0))? as usize;
        self.sink
            .begin_cond(op, header, payload, true_len as u32, level + 1)?;
        let true_branch = take(after, 0, true_len)?;
        let overflow = self.decode(true_branch, level + 2)?;

        let mut consumed = true_len;
        if overflow > 0 {
            let remaining = after.len() - true_len;
            let else_len = min(overflow, remaining);
            if else_len < overflow {
                log!(
                    LogWarn,
                    "else branch of {} dwords runs past the buffer; decoding {}",
                    overflow,
                    else_len
                );
            }
            self.sink.begin_else(else_len as u32, level + 1)?;
            let else_branch = &after[true_len..true_len + else_len];
            let nested = self.decode(else_branch, level + 2)?;
            if nested > 0 {
                return Err(truncated(nested, 0));
            }
            consumed += else_len;
        }
        self.sink.end_cond(level + 1)?;
        Ok(consumed)
    }

    fn nop(&mut self, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let (kind, text) = match payload.first() {
            Some(&NOP_MESG) => (MarkerKind::Message, nop_text(&payload[1..])),
            Some(&NOP_BEGN) => (MarkerKind::BeginScope, nop_text(&payload[1..])),
            Some(&NOP_END) => (MarkerKind::EndScope, nop_text(&payload[1..])),
            Some(_) => (MarkerKind::Raw, nop_text(payload)),
            None => return Ok(()),
        };
        self.sink.nop_marker(kind, &text, level + 1)?;
        Ok(())
    }

    fn set_marker(&mut self, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        if self.state.generation < 6 {
            return Ok(());
        }
        if let Some(mode) = payload.first().and_then(|d| RenderMode::from_marker(*d)) {
            self.state.render_mode = mode;
            self.sink.render_mode(mode, level + 1)?;
        }
        Ok(())
    }

    fn reg_bunch(&mut self, pairs: &[u32], level: usize) -> Result<(), DecodeError> {
        if pairs.len() % 2 != 0 {
            return Err(truncated(pairs.len() + 1, pairs.len()));
        }
        for p in pairs.chunks_exact(2) {
            self.write_regs(p[0], &p[1..2], true, level + 1)?;
        }
        Ok(())
    }

    fn start_bin(&mut self, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let p = take(payload, 0, 4)?;
        let loopcount = p[0];
        let addr = p[1] as u64 | (p[2] as u64) << 32;
        let size = p[3];
        self.strided(IndirectKind::Bin, addr, size, loopcount, level)
    }

    fn fixed_stride_draw_table(&mut self, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let p = take(payload, 0, 4)?;
        let addr = p[0] as u64 | (p[1] as u64) << 32;
        let size = p[2] >> 20;
        let loopcount = p[3];
        self.strided(IndirectKind::DrawTable, addr, size, loopcount, level)
    }

    /// Follow `count` buffers of `size` dwords laid out back to back from
    /// `addr`. Stops at the first one whose address does not fit in 64 bits.
    fn strided(
        &mut self,
        kind: fn(u32) -> IndirectKind,
        addr: u64,
        size: u32,
        count: u32,
        level: usize,
    ) -> Result<(), DecodeError> {
        for i in 0..count {
            let ib_addr = match (i as u64)
                .checked_mul(size as u64 * 4)
                .and_then(|offset| addr.checked_add(offset))
            {
                Some(a) => a,
                None => {
                    log!(
                        LogWarn,
                        "{:?} at {:#x} + {} * {} dwords overflows the address space",
                        kind(i),
                        addr,
                        i,
                        size
                    );
                    break;
                }
            };
            let ib = IndirectInfo {
                kind: kind(i),
                addr: ib_addr,
                dwords: size,
            };
            self.recurse(ib, level)?;
        }
        Ok(())
    }

    fn ctxswitch_ib(&mut self, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let p = take(payload, 0, 3)?;
        let ib = IndirectInfo {
            kind: IndirectKind::CtxSwitch,
            addr: p[0] as u64 | (p[1] as u64) << 32,
            dwords: p[2] & 0xffff,
        };
        self.recurse(ib, level)
    }

    fn load_state(
        &mut self,
        op: Opcode,
        header: u32,
        payload: &[u32],
        level: usize,
    ) -> Result<(), DecodeError> {
        let ls = LoadState::parse(self.state.generation, payload)?;
        let stage = match (ls.shader_stage(), ls.src) {
            (Some(stage), StateSource::Direct) | (Some(stage), StateSource::Indirect) => stage,
            _ => {
                self.sink.opcode(op, header, payload, level)?;
                return Ok(());
            }
        };

        let (source, code) = if ls.src == StateSource::Direct {
            let code = payload.get(ls.inline_start..).unwrap_or(&[]).to_vec();
            (ShaderSource::Inline, code)
        } else {
            let avail = (self.buffers.region_length_from(ls.ext_addr) / 4) as u32;
            let dwords = min(ls.shader_dwords(), avail);
            let code = self
                .buffers
                .read_dwords(ls.ext_addr, dwords)
                .unwrap_or_default();
            if code.is_empty() {
                log!(LogWarn, "Could not find {} shader at {:#x}", stage.name(), ls.ext_addr);
            }
            let first_upload = !code.is_empty() && self.state.shaders_seen.insert(ls.ext_addr);
            (
                ShaderSource::Indirect {
                    addr: ls.ext_addr,
                    first_upload,
                },
                code,
            )
        };

        let load = ShaderLoad {
            op,
            header,
            payload,
            stage,
            source,
            code: &code,
        };
        self.sink.shader(&load, level)?;
        Ok(())
    }

    fn draw_packet(&mut self, op: Opcode, payload: &[u32], level: usize) -> Result<(), DecodeError> {
        let word = |i: usize| payload.get(i).copied().unwrap_or(0);
        let (prim, num_indices) = match op {
            Opcode::DrawIndx | Opcode::DrawIndx2 => (primitive_name(word(1) & 0x1f), word(2)),
            Opcode::DrawIndxOffset => (primitive_name(word(0) & 0x1f), word(2)),
            Opcode::ExecCs | Opcode::ExecCsIndirect => ("compute", 0),
            _ => (primitive_name(word(0) & 0x1f), 0),
        };
        self.draw(op, prim, num_indices, level)
    }

    fn draw(
        &mut self,
        op: Opcode,
        prim: &'static str,
        num_indices: u32,
        level: usize,
    ) -> Result<(), DecodeError> {
        let info = DrawInfo {
            index: self.state.draw_count,
            op,
            prim,
            num_indices,
            mode: self.state.render_mode,
        };
        self.sink.draw(&info, self.regs, level + 1)?;
        self.regs.end_draw();
        self.state.draw_count += 1;
        self.state.stats.draws += 1;
        self.state.stats.vertices += num_indices as u64;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::{
        pm4::{type0_header, type3_header, type4_header, type7_header},
        sink::RecordingSink,
    };

    struct Fixture {
        buffers: BufferSpace,
        regs: RegisterState,
        state: WalkState,
        sink: RecordingSink,
    }

    impl Fixture {
        fn new(gen: u32) -> Fixture {
            Fixture {
                buffers: BufferSpace::new(),
                regs: RegisterState::new(),
                state: WalkState::new(gen),
                sink: RecordingSink::default(),
            }
        }

        fn add(&mut self, addr: u64, words: &[u32]) {
            let bytes = words.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect();
            self.buffers.add_buffer(addr, words.len() as u64 * 4, bytes);
        }

        fn decode(&mut self, words: &[u32], once: bool) -> Result<usize, DecodeError> {
            let mut w = Walker::new(
                &mut self.buffers,
                &mut self.regs,
                &mut self.state,
                &mut self.sink,
                once,
            );
            w.decode(words, 0)
        }

        fn events(&self) -> Vec<&str> {
            self.sink.events.iter().map(|s| s.as_str()).collect()
        }
    }

    fn ib(addr: u64, dwords: u32) -> Vec<u32> {
        vec![
            type7_header(Opcode::IndirectBuffer, 3),
            addr as u32,
            (addr >> 32) as u32,
            dwords,
        ]
    }

    #[test]
    pub fn test_register_writes_in_order() {
        let mut f = Fixture::new(6);
        let mut words = Vec::new();
        for i in 0..5 {
            words.push(type4_header(0x8800 + i, 1));
            words.push(i * 10);
        }
        assert_eq!(f.decode(&words, false).unwrap(), 0);
        let writes: Vec<_> = f.events().into_iter().filter(|e| e.starts_with("write")).collect();
        assert_eq!(writes.len(), 5);
        assert_eq!(writes[0], "write 0x8800 [0] @0");
        assert_eq!(writes[4], "write 0x8804 [28] @0");
        assert_eq!(f.events().len(), 5);
        assert_eq!(f.regs.val(0x8803), 30);
    }

    #[test]
    pub fn test_multi_register_write() {
        let mut f = Fixture::new(6);
        f.decode(&[type4_header(0x100, 3), 1, 2, 3], false).unwrap();
        assert_eq!(f.regs.val(0x102), 3);
        assert_eq!(f.events(), vec!["write 0x100 [1, 2, 3] @0"]);
    }

    #[test]
    pub fn test_nested_indirect_buffers() {
        let mut f = Fixture::new(6);
        let mut l1 = ib(0x3000, 6);
        l1.extend_from_slice(&[type4_header(0x10, 1), 1]);
        let mut l2 = ib(0x4000, 2);
        l2.extend_from_slice(&[type4_header(0x20, 1), 2]);
        let l3 = vec![type4_header(0x30, 1), 3];
        f.add(0x2000, &l1);
        f.add(0x3000, &l2);
        // Trailing words past the IB size must not be decoded.
        let mut l3_padded = l3.clone();
        l3_padded.extend_from_slice(&[type4_header(0x40, 1), 4]);
        f.add(0x4000, &l3_padded);

        f.decode(&ib(0x2000, 6), false).unwrap();
        assert_eq!(
            f.events(),
            vec![
                "CP_INDIRECT_BUFFER @0",
                "begin Ib(IndirectBuffer) 0x2000 6",
                "CP_INDIRECT_BUFFER @1",
                "begin Ib(IndirectBuffer) 0x3000 6",
                "CP_INDIRECT_BUFFER @2",
                "begin Ib(IndirectBuffer) 0x4000 2",
                "write 0x30 [3] @3",
                "end 0x4000",
                "write 0x20 [2] @2",
                "end 0x3000",
                "write 0x10 [1] @1",
                "end 0x2000",
            ]
        );
        assert!(!f.regs.is_written(0x40));
    }

    #[test]
    pub fn test_missing_and_cyclic_indirect() {
        let mut f = Fixture::new(6);
        f.add(0x5000, &ib(0x5000, 4));
        f.decode(&ib(0x9000, 4), false).unwrap();
        f.decode(&ib(0x5000, 4), false).unwrap();
        let ev = f.events();
        assert_eq!(ev[1], "skip 0x9000 Missing");
        assert!(ev.contains(&"skip 0x5000 Cycle"));
    }

    #[test]
    pub fn test_once() {
        let mut f = Fixture::new(6);
        f.add(0x6000, &[type4_header(0x50, 1), 5]);
        f.decode(&ib(0x6000, 2), true).unwrap();
        f.decode(&ib(0x6000, 2), true).unwrap();
        assert_eq!(f.events().iter().filter(|e| e.starts_with("write")).count(), 1);
        assert_eq!(f.events().last(), Some(&"skip 0x6000 AlreadyDumped"));
    }

    /// Parent buffer:
    ///   0..3  COND_REG_EXEC (true branch is 3 dwords)
    ///   3..5  true branch register write
    ///   5     CP_NOP declaring 2 dwords, none of which are left in the branch
    ///   6..8  else branch register write
    ///   8..10 trailing register write at the parent level
    fn cond_stream() -> Vec<u32> {
        vec![
            type7_header(Opcode::CondRegExec, 2),
            0x8800,
            3,
            type4_header(0x100, 1),
            0xa,
            type7_header(Opcode::Nop, 2),
            type4_header(0x200, 1),
            0xb,
            type4_header(0x300, 1),
            0xc,
        ]
    }

    #[test]
    pub fn test_cond_exec_else_branch() {
        let mut f = Fixture::new(6);
        assert_eq!(f.decode(&cond_stream(), false).unwrap(), 0);
        assert_eq!(
            f.events(),
            vec![
                "CP_COND_REG_EXEC @0",
                "cond 3",
                "write 0x100 [a] @2",
                "CP_NOP @2",
                "else 2",
                "write 0x200 [b] @2",
                "endcond",
                "write 0x300 [c] @0",
            ]
        );
    }

    #[test]
    pub fn test_cond_exec_else_is_clamped() {
        let mut f = Fixture::new(6);
        // The NOP claims 3 else dwords but the buffer ends after 2.
        let words = [
            type7_header(Opcode::CondExec, 1),
            3,
            type4_header(0x100, 1),
            0xa,
            type7_header(Opcode::Nop, 3),
            type4_header(0x200, 1),
            0xb,
        ];
        assert_eq!(f.decode(&words, false).unwrap(), 0);
        assert!(f.events().contains(&"else 2"));
        assert_eq!(f.regs.val(0x200), 0xb);
    }

    #[test]
    pub fn test_nop_overflow_outside_cond() {
        let mut f = Fixture::new(6);
        let words = [type4_header(0x10, 1), 1, type7_header(Opcode::Nop, 4), 0];
        assert_eq!(f.decode(&words, false).unwrap(), 3);
        f.add(0x7000, &words);
        let err = f.decode(&ib(0x7000, 4), false).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    pub fn test_unknown_opcode_is_fatal() {
        let mut f = Fixture::new(3);
        let words = [type0_header(0x10, 1), 1, 0xc000_0100, 0];
        assert!(matches!(
            f.decode(&words, false),
            Err(DecodeError::UnknownOpcode(1))
        ));
    }

    #[test]
    pub fn test_truncated_register_write() {
        let mut f = Fixture::new(6);
        let err = f.decode(&[type4_header(0x10, 4), 1, 2], false).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                needed: 4,
                available: 2
            }
        ));
    }

    fn draw_auto() -> [u32; 2] {
        // triangles
        [type7_header(Opcode::DrawAuto, 1), 4]
    }

    #[test]
    pub fn test_draw_state_loads_at_draw() {
        let mut f = Fixture::new(6);
        f.add(0x8000, &[type4_header(0x60, 1), 6]);
        let mut words = vec![
            type7_header(Opcode::SetDrawState, 6),
            // group 1, enabled in all modes, 2 dwords
            0x0170_0002,
            0x8000,
            0,
            // group 2, empty
            0x0200_0000,
            0x1234,
            0,
        ];
        words.extend_from_slice(&draw_auto());
        words.extend_from_slice(&draw_auto());
        f.decode(&words, false).unwrap();
        assert_eq!(
            f.events(),
            vec![
                "CP_SET_DRAW_STATE @0",
                "draw_state group 1 count 2",
                "draw_state group 2 count 0",
                "begin DrawState(1) 0x8000 2",
                "write 0x60 [6] @2",
                "end 0x8000",
                "CP_DRAW_AUTO @0",
                "draw 0 triangles 0",
                "CP_DRAW_AUTO @0",
                "draw 1 triangles 0",
            ]
        );
    }

    #[test]
    pub fn test_render_mode_at_draw_filters_draw_state() {
        let mut f = Fixture::new(6);
        f.add(0x8000, &[type4_header(0x60, 1), 6]);
        let gmem_only = [type7_header(Opcode::SetDrawState, 3), 0x0120_0002, 0x8000, 0];
        let mut words = gmem_only.to_vec();
        words.extend_from_slice(&[type7_header(Opcode::SetMarker, 1), 2]); // binning
        words.extend_from_slice(&draw_auto());
        words.extend_from_slice(&draw_auto());
        f.decode(&words, false).unwrap();
        assert!(f.events().contains(&"mode binning"));
        assert!(!f.events().iter().any(|e| e.starts_with("begin")));
        assert!(!f.regs.is_written(0x60));

        let mut words = gmem_only.to_vec();
        words.extend_from_slice(&[type7_header(Opcode::SetMarker, 1), 4]); // gmem
        words.extend_from_slice(&draw_auto());
        f.decode(&words, false).unwrap();
        assert_eq!(f.regs.val(0x60), 6);
    }

    #[test]
    pub fn test_draw_state_load_immed_and_disable() {
        let mut f = Fixture::new(6);
        f.add(0x8000, &[type4_header(0x60, 1), 6]);
        f.add(0x9000, &[type4_header(0x61, 1), 7]);
        let mut words = vec![
            type7_header(Opcode::SetDrawState, 6),
            // group 3, LOAD_IMMED
            0x0378_0002,
            0x8000,
            0,
            // group 1
            0x0170_0002,
            0x9000,
            0,
            type7_header(Opcode::SetDrawState, 3),
            // DISABLE group 1
            0x0102_0000,
            0,
            0,
        ];
        words.extend_from_slice(&draw_auto());
        f.decode(&words, false).unwrap();
        let ev = f.events();
        assert_eq!(ev[2], "begin DrawState(3) 0x8000 2");
        assert_eq!(ev.iter().filter(|e| e.starts_with("begin")).count(), 1);
        assert!(!f.regs.is_written(0x61));

        let mut words = vec![
            type7_header(Opcode::SetDrawState, 6),
            0x0170_0002,
            0x9000,
            0,
            // DISABLE_ALL_GROUPS
            0x0004_0000,
            0,
            0,
        ];
        words.extend_from_slice(&draw_auto());
        f.decode(&words, false).unwrap();
        assert!(!f.regs.is_written(0x61));
    }

    #[test]
    pub fn test_reg_write_packets() {
        let mut f = Fixture::new(6);
        let words = [
            type7_header(Opcode::ContextRegBunch, 4),
            0x10,
            1,
            0x11,
            2,
            type7_header(Opcode::RegWrite, 3),
            0,
            0x12,
            3,
        ];
        f.decode(&words, false).unwrap();
        assert_eq!(f.regs.val(0x10), 1);
        assert_eq!(f.regs.val(0x11), 2);
        assert_eq!(f.regs.val(0x12), 3);
    }

    #[test]
    pub fn test_start_bin_loops() {
        let mut f = Fixture::new(6);
        f.add(
            0x9000,
            &[type4_header(0x70, 1), 1, type4_header(0x71, 1), 2],
        );
        let words = [type7_header(Opcode::StartBin, 4), 2, 0x9000, 0, 2];
        f.decode(&words, false).unwrap();
        let ev = f.events();
        assert!(ev.contains(&"begin Bin(0) 0x9000 2"));
        assert!(ev.contains(&"begin Bin(1) 0x9008 2"));
        assert_eq!(f.regs.val(0x71), 2);
    }

    #[test]
    pub fn test_strided_buffers_stop_at_address_overflow() {
        let mut f = Fixture::new(6);
        let words = [
            type7_header(Opcode::StartBin, 4),
            2,
            0xffff_f000,
            0xffff_ffff,
            0x1000,
            type7_header(Opcode::FixedStrideDrawTable, 4),
            0xffff_f000,
            0xffff_ffff,
            0x800 << 20,
            3,
        ];
        assert_eq!(f.decode(&words, false).unwrap(), 0);
        let skips: Vec<_> = f.events().into_iter().filter(|e| e.starts_with("skip")).collect();
        assert_eq!(
            skips,
            vec![
                "skip 0xfffffffffffff000 Missing",
                "skip 0xfffffffffffff000 Missing"
            ]
        );
    }

    #[test]
    pub fn test_truncated_reg_bunch2() {
        let mut f = Fixture::new(6);
        let err = f
            .decode(&[type7_header(Opcode::ContextRegBunch2, 1), 0], false)
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                needed: 2,
                available: 1
            }
        ));
    }

    #[test]
    pub fn test_nop_markers() {
        let mut f = Fixture::new(6);
        let text = u32::from_le_bytes(*b"hi\0\0");
        let words = [type7_header(Opcode::Nop, 2), NOP_MESG, text];
        f.decode(&words, false).unwrap();
        assert_eq!(f.events()[1], "marker Message hi");
    }

    #[test]
    pub fn test_draws_count_and_snapshot_registers() {
        let mut f = Fixture::new(6);
        let words = [
            type4_header(0x10, 1),
            1,
            type7_header(Opcode::DrawIndxOffset, 3),
            4, // triangles
            1,
            36,
            type7_header(Opcode::DrawAuto, 1),
            4,
        ];
        f.decode(&words, false).unwrap();
        assert!(f.events().contains(&"draw 0 triangles 36"));
        assert!(f.events().contains(&"draw 1 triangles 0"));
        assert_eq!(f.state.draw_count, 2);
        assert!(!f.regs.is_rewritten(0x10));
        assert_eq!(f.regs.last_val(0x10), 1);
    }

    #[test]
    pub fn test_indirect_shader_is_uploaded_once() {
        let mut f = Fixture::new(6);
        f.add(0xa000, &[0xdead_beef; 32]);
        // Indirect vertex shader, one unit.
        let d0 = (1 << 22) | (0x8 << 18) | (2 << 16);
        let words = [type7_header(Opcode::LoadState6Geom, 3), d0, 0xa000, 0];
        f.decode(&words, false).unwrap();
        f.decode(&words, false).unwrap();
        let ev = f.events();
        assert_eq!(
            ev[0],
            "shader vs Indirect { addr: 40960, first_upload: true } 32"
        );
        assert_eq!(
            ev[1],
            "shader vs Indirect { addr: 40960, first_upload: false } 32"
        );
    }

    #[test]
    pub fn test_pre_a5xx_stream() {
        let mut f = Fixture::new(3);
        f.add(0xb000, &[type0_header(0x2100, 2), 7, 8]);
        let words = [
            type3_header(Opcode::IndirectBuffer, 2),
            0xb000,
            3,
            0x8000_0000,
        ];
        f.decode(&words, false).unwrap();
        assert_eq!(f.regs.val(0x2101), 8);
        assert_eq!(f.events().last(), Some(&"end 0xb000"));
    }
}
