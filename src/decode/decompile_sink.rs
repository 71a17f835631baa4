//! Renders a decoded command stream as C-like statements that rebuild it.
//!
//! Each submit becomes a function of packet emitting calls. Indirect
//! buffers, draw state groups and conditional regions become nested blocks so
//! a generator can lay them out at fresh addresses. Anything not modelled is
//! emitted as its raw packet.

use super::{
    pm4::{is_64b, DrawStateEntry, Opcode},
    registers::RegisterState,
    sink::{
        DecodeSink, DeviceId, IndirectInfo, IndirectKind, MarkerKind, ShaderLoad, ShaderSource,
        SkipReason, SubmitInfo, SubmitStats,
    },
};
use std::io::{self, Write};

/// Dwords per line in long argument lists.
const WORDS_PER_LINE: usize = 8;

/// Output held back until the next event shows whether it is needed.
enum Pending {
    /// Raw packet to emit unless its contents get decoded as a block.
    Packet(String),
    /// Draw state group to emit raw unless it gets decoded as a block.
    DrawState(DrawStateEntry),
}

pub struct DecompileSink<W: Write> {
    out: W,
    generation: u32,
    depth: usize,
    pending: Option<Pending>,
    /// Headers of the draw state groups being emitted as blocks.
    draw_states: Vec<u32>,
    /// Nesting inside buffers whose packets are covered by a raw packet.
    suppressed: usize,
    submits: Vec<u32>,
}

fn hex_list(words: &[u32]) -> Vec<String> {
    words.iter().map(|w| format!("0x{:08x}", w)).collect()
}

impl<W: Write> DecompileSink<W> {
    pub fn new(out: W, generation: u32) -> DecompileSink<W> {
        DecompileSink {
            out,
            generation,
            depth: 0,
            pending: None,
            draw_states: Vec::new(),
            suppressed: 0,
            submits: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn call(&self, func: &str, args: &[String]) -> String {
        let indent = "\t".repeat(self.depth + 1);
        let mut s = format!("{}{}(ctx", indent, func);
        for (i, a) in args.iter().enumerate() {
            if i > 0 && i % WORDS_PER_LINE == 0 && args.len() > WORDS_PER_LINE {
                s.push_str(",\n");
                s.push_str(&indent);
                s.push('\t');
                s.push_str(a);
            } else {
                s.push_str(", ");
                s.push_str(a);
            }
        }
        s.push_str(");\n");
        s
    }

    fn emit(&mut self, func: &str, args: &[String]) -> io::Result<()> {
        let line = self.call(func, args);
        self.out.write_all(line.as_bytes())
    }

    fn raw_packet(&self, op: Opcode, payload: &[u32]) -> String {
        let func = if is_64b(self.generation) { "pkt7" } else { "pkt3" };
        let mut args = vec![op.name().to_owned(), payload.len().to_string()];
        args.extend(hex_list(payload));
        self.call(func, &args)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.pending.take() {
            Some(Pending::Packet(line)) => self.out.write_all(line.as_bytes()),
            Some(Pending::DrawState(entry)) => self.emit(
                "draw_state_raw",
                &[format!("0x{:08x}", entry.header), format!("0x{:x}", entry.addr)],
            ),
            None => Ok(()),
        }
    }

    fn is_suppressed(&self) -> bool {
        self.suppressed > 0
    }
}

impl<W: Write> DecodeSink for DecompileSink<W> {
    // Groups are regenerated as blocks at the packet that sets them.
    fn inline_draw_state(&self) -> bool {
        true
    }

    fn device(&mut self, id: &DeviceId) -> io::Result<()> {
        self.generation = id.generation;
        write!(
            self.out,
            "/* gpu_id: {}, chip_id: {:#x} */\n\n",
            id.gpu_id, id.chip_id
        )
    }

    fn begin_submit(&mut self, submit: &SubmitInfo) -> io::Result<()> {
        self.depth = 0;
        self.suppressed = 0;
        self.draw_states.clear();
        self.submits.push(submit.index);
        write!(
            self.out,
            "/* cmdstream {:#x}, {} dwords */\nstatic void\nsubmit_{}(struct replay_context *ctx)\n{{\n",
            submit.gpuaddr, submit.dwords, submit.index
        )
    }

    fn end_submit(&mut self, _submit: &SubmitInfo, _stats: &SubmitStats) -> io::Result<()> {
        self.flush()?;
        write!(self.out, "}}\n\n")
    }

    fn register_write(
        &mut self,
        _regs: &RegisterState,
        base: u32,
        values: &[u32],
        grouped: bool,
        _level: usize,
    ) -> io::Result<()> {
        // Grouped writes are part of a packet that is emitted raw.
        if grouped || self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        let func = if is_64b(self.generation) { "pkt4" } else { "pkt0" };
        let mut args = vec![format!("0x{:04x}", base), values.len().to_string()];
        args.extend(hex_list(values));
        self.emit(func, &args)
    }

    fn opcode(&mut self, op: Opcode, _header: u32, payload: &[u32], _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        match op {
            Opcode::SetDrawState | Opcode::CondExec | Opcode::CondRegExec => Ok(()),
            op if op.is_indirect_buffer() || op == Opcode::Nop => {
                self.pending = Some(Pending::Packet(self.raw_packet(op, payload)));
                Ok(())
            }
            op => {
                let line = self.raw_packet(op, payload);
                self.out.write_all(line.as_bytes())
            }
        }
    }

    fn type2_nop(&mut self, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        self.emit("pkt2", &[])
    }

    // The raw CP_NOP carries the marker text.
    fn nop_marker(&mut self, _kind: MarkerKind, _text: &str, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn begin_indirect(&mut self, ib: &IndirectInfo, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            self.suppressed += 1;
            return Ok(());
        }
        match ib.kind {
            IndirectKind::Ib(_) => {
                self.pending = None;
                self.emit("begin_ib", &[])?;
                self.depth += 1;
            }
            IndirectKind::DrawState(_) => {
                let header = match self.pending.take() {
                    Some(Pending::DrawState(entry)) => entry.header,
                    Some(Pending::Packet(line)) => {
                        self.out.write_all(line.as_bytes())?;
                        0
                    }
                    None => 0,
                };
                self.draw_states.push(header);
                self.emit("begin_draw_state", &[])?;
                self.depth += 1;
            }
            IndirectKind::Bin(_) | IndirectKind::DrawTable(_) | IndirectKind::CtxSwitch => {
                self.flush()?;
                self.suppressed = 1;
            }
        }
        Ok(())
    }

    fn end_indirect(&mut self, ib: &IndirectInfo, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            self.suppressed -= 1;
            return Ok(());
        }
        self.flush()?;
        match ib.kind {
            IndirectKind::Ib(_) => {
                self.depth = self.depth.saturating_sub(1);
                self.emit("end_ib", &[])
            }
            IndirectKind::DrawState(_) => {
                self.depth = self.depth.saturating_sub(1);
                let header = self.draw_states.pop().unwrap_or(0);
                self.emit("end_draw_state", &[format!("0x{:08x}", header)])
            }
            _ => Ok(()),
        }
    }

    fn skip_indirect(&mut self, _ib: &IndirectInfo, _reason: SkipReason, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()
    }

    fn draw_state(&mut self, entry: &DrawStateEntry, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        self.pending = Some(Pending::DrawState(*entry));
        Ok(())
    }

    fn begin_cond(
        &mut self,
        op: Opcode,
        _header: u32,
        payload: &[u32],
        _true_dwords: u32,
        _level: usize,
    ) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        let operands = &payload[..payload.len().saturating_sub(1)];
        let mut args = vec![op.name().to_owned()];
        args.extend(hex_list(operands));
        self.emit("begin_cond", &args)?;
        self.depth += 1;
        Ok(())
    }

    fn begin_else(&mut self, _else_dwords: u32, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        // The CP_NOP that declared the else region is regenerated by
        // begin_else itself.
        if let Some(Pending::Packet(_)) = self.pending {
            self.pending = None;
        }
        self.flush()?;
        self.depth = self.depth.saturating_sub(1);
        self.emit("begin_else", &[])?;
        self.depth += 1;
        Ok(())
    }

    fn end_cond(&mut self, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        self.depth = self.depth.saturating_sub(1);
        self.emit("end_cond", &[])
    }

    fn shader(&mut self, load: &ShaderLoad<'_>, _level: usize) -> io::Result<()> {
        if self.is_suppressed() {
            return Ok(());
        }
        self.flush()?;
        match load.source {
            ShaderSource::Indirect { addr, first_upload } if !load.code.is_empty() => {
                if first_upload {
                    let mut args = vec![format!("0x{:x}", addr), load.code.len().to_string()];
                    args.extend(hex_list(load.code));
                    self.emit("upload_shader", &args)?;
                }
                self.emit(
                    "load_shader",
                    &[
                        load.op.name().to_owned(),
                        format!("0x{:08x}", load.payload.first().copied().unwrap_or(0)),
                        format!("shader_iova(ctx, 0x{:x})", addr),
                    ],
                )
            }
            _ => {
                let line = self.raw_packet(load.op, load.payload);
                self.out.write_all(line.as_bytes())
            }
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush()?;
        write!(self.out, "void\nreplay(struct replay_context *ctx)\n{{\n")?;
        for i in &self.submits {
            write!(self.out, "\tsubmit_{}(ctx);\n", i)?;
        }
        write!(self.out, "}}\n")?;
        self.out.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        address_space::buffer_space::BufferSpace,
        decode::{
            pm4::{type4_header, type7_header},
            walker::{WalkState, Walker},
        },
    };

    fn decompile(buffers: &mut BufferSpace, words: &[u32]) -> String {
        let mut sink = DecompileSink::new(Vec::new(), 6);
        let mut regs = RegisterState::new();
        let mut state = WalkState::new(6);
        Walker::new(buffers, &mut regs, &mut state, &mut sink, false)
            .decode(words, 0)
            .unwrap();
        sink.flush().unwrap();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    fn add(buffers: &mut BufferSpace, addr: u64, words: &[u32]) {
        let bytes = words.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect();
        buffers.add_buffer(addr, words.len() as u64 * 4, bytes);
    }

    #[test]
    pub fn test_indirect_buffer_block() {
        let mut buffers = BufferSpace::new();
        add(&mut buffers, 0x2000, &[type4_header(0x10, 1), 1]);
        let words = [
            type7_header(Opcode::IndirectBuffer, 3),
            0x2000,
            0,
            2,
            type7_header(Opcode::IndirectBuffer, 3),
            0x9000,
            0,
            2,
        ];
        assert_eq!(
            decompile(&mut buffers, &words),
            "\tbegin_ib(ctx);\n\
             \t\tpkt4(ctx, 0x0010, 1, 0x00000001);\n\
             \tend_ib(ctx);\n\
             \tpkt7(ctx, CP_INDIRECT_BUFFER, 3, 0x00009000, 0x00000000, 0x00000002);\n"
        );
    }

    #[test]
    pub fn test_cond_else() {
        let mut buffers = BufferSpace::new();
        let words = [
            type7_header(Opcode::CondRegExec, 2),
            0x8800,
            3,
            type4_header(0x100, 1),
            0xa,
            type7_header(Opcode::Nop, 2),
            type4_header(0x200, 1),
            0xb,
        ];
        assert_eq!(
            decompile(&mut buffers, &words),
            "\tbegin_cond(ctx, CP_COND_REG_EXEC, 0x00008800);\n\
             \t\tpkt4(ctx, 0x0100, 1, 0x0000000a);\n\
             \tbegin_else(ctx);\n\
             \t\tpkt4(ctx, 0x0200, 1, 0x0000000b);\n\
             \tend_cond(ctx);\n"
        );
    }

    #[test]
    pub fn test_draw_state_groups() {
        let mut buffers = BufferSpace::new();
        add(&mut buffers, 0x3000, &[type4_header(0x20, 1), 2]);
        let words = [
            type7_header(Opcode::SetDrawState, 6),
            0x0170_0002,
            0x3000,
            0,
            0x0204_0000,
            0,
            0,
        ];
        assert_eq!(
            decompile(&mut buffers, &words),
            "\tbegin_draw_state(ctx);\n\
             \t\tpkt4(ctx, 0x0020, 1, 0x00000002);\n\
             \tend_draw_state(ctx, 0x01700002);\n\
             \tdraw_state_raw(ctx, 0x02040000, 0x0);\n"
        );
    }

    #[test]
    pub fn test_shader_uploaded_once() {
        let mut buffers = BufferSpace::new();
        add(&mut buffers, 0x4000, &[0x11; 32]);
        let d0 = (1 << 22) | (0xc << 18) | (2 << 16);
        let load = [type7_header(Opcode::LoadState6Frag, 3), d0, 0x4000, 0];
        let mut words = load.to_vec();
        words.extend_from_slice(&load);
        let out = decompile(&mut buffers, &words);
        assert_eq!(out.matches("upload_shader(ctx, 0x4000, 32,").count(), 1);
        assert_eq!(
            out.matches("load_shader(ctx, CP_LOAD_STATE6_FRAG, 0x00720000, shader_iova(ctx, 0x4000));")
                .count(),
            2
        );
    }

    #[test]
    pub fn test_submit_functions() {
        let mut sink = DecompileSink::new(Vec::new(), 6);
        let submit = SubmitInfo {
            index: 3,
            gpuaddr: 0x1000,
            dwords: 0,
        };
        sink.begin_submit(&submit).unwrap();
        sink.end_submit(&submit, &SubmitStats::default()).unwrap();
        sink.finish().unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.contains("static void\nsubmit_3(struct replay_context *ctx)\n{\n}\n"));
        assert!(out.ends_with("replay(struct replay_context *ctx)\n{\n\tsubmit_3(ctx);\n}\n"));
    }
}
