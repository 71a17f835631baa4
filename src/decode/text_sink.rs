//! Human readable rendering of a decoded command stream.

use super::{
    disasm::ShaderDisassembler,
    options::{DecodeOptions, QueryMode},
    pm4::{DrawStateEntry, Opcode, RenderMode},
    registers::{resolve_query, RegisterDatabase, RegisterState},
    sink::{
        DecodeSink, DeviceId, DrawInfo, IndirectInfo, IndirectKind, MarkerKind, ShaderLoad,
        ShaderSource, SkipReason, SubmitInfo, SubmitStats,
    },
};
use std::io::{self, Write};

const BOLD_BLUE: &str = "\x1b[0;1;34m";
const BOLD_YELLOW: &str = "\x1b[0;1;33m";
const RED: &str = "\x1b[0;31m";
const RESET: &str = "\x1b[0m";

/// Indentation stops growing past this nesting level.
const MAX_INDENT: usize = 9;

pub struct TextSink<'a, W: Write> {
    out: W,
    options: &'a DecodeOptions,
    regdb: Box<dyn RegisterDatabase>,
    disasm: Box<dyn ShaderDisassembler>,
    generation: u32,
    /// Register offsets named by `--query`.
    queries: Vec<u32>,
    /// Index of the next draw; output is filtered against it.
    next_draw: u32,
    /// Open `BEGN` marker scopes.
    scope: usize,
}

impl<'a, W: Write> TextSink<'a, W> {
    pub fn new(
        out: W,
        options: &'a DecodeOptions,
        regdb: Box<dyn RegisterDatabase>,
        disasm: Box<dyn ShaderDisassembler>,
    ) -> TextSink<'a, W> {
        let queries = options
            .query
            .iter()
            .flat_map(|q| resolve_query(regdb.as_ref(), q))
            .collect();
        TextSink {
            out,
            options,
            regdb,
            disasm,
            generation: options.gpu_id.map_or(0, |id| id / 100),
            queries,
            next_draw: 0,
            scope: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Output at `lvl` is suppressed by the draw filter, and higher levels
    /// also by the summary, query and script modes.
    fn quiet(&self, lvl: u32) -> bool {
        if let Some(draw) = self.options.draw {
            if draw != self.next_draw {
                return true;
            }
        }
        let condensed = self.options.is_query() || self.options.script.is_some();
        (lvl >= 3 && (self.options.summary || condensed)) || (lvl >= 2 && condensed)
    }

    fn indent(&self, level: usize) -> String {
        "\t".repeat((level + self.scope).min(MAX_INDENT) + 1)
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.options.color {
            format!("{}{}{}", color, text, RESET)
        } else {
            text.to_owned()
        }
    }

    fn reg_name(&self, reg: u32) -> String {
        match self.regdb.name(reg) {
            Some(name) => name.to_owned(),
            None => format!("0x{:04x}", reg),
        }
    }

    /// Eight dwords per row, with runs of all zero rows collapsed to `*`.
    fn dump_hex(&mut self, words: &[u32], level: usize) -> io::Result<()> {
        let indent = self.indent(level);
        let mut last_zero = false;
        for (row, chunk) in words.chunks(8).enumerate() {
            let zero = row > 0 && chunk.iter().all(|w| *w == 0);
            if zero && !last_zero {
                write!(self.out, "{}*\n", indent)?;
            }
            last_zero = zero;
            if zero {
                continue;
            }
            write!(self.out, "{}{:04x}:", indent, row * 8)?;
            for w in chunk {
                write!(self.out, " {:08x}", w)?;
            }
            write!(self.out, "\n")?;
        }
        Ok(())
    }

    fn opcode_line(&mut self, op: Opcode, header: u32, payload: &[u32], level: usize) -> io::Result<()> {
        if self.quiet(2) {
            return Ok(());
        }
        let name = self.paint(BOLD_BLUE, op.name());
        write!(
            self.out,
            "{}opcode: {} ({:02x}) ({} dwords)\n",
            self.indent(level),
            name,
            op.value(),
            payload.len() + 1
        )?;
        if self.options.verbose {
            let mut words = Vec::with_capacity(payload.len() + 1);
            words.push(header);
            words.extend_from_slice(payload);
            self.dump_hex(&words, level + 1)?;
        }
        Ok(())
    }

    fn query_matches(&self, regs: &RegisterState) -> bool {
        match self.options.query_mode {
            QueryMode::All => true,
            QueryMode::Written => self.queries.iter().any(|r| regs.is_rewritten(*r)),
            QueryMode::Delta => self.queries.iter().any(|r| regs.changed_since_draw(*r)),
        }
    }

    fn dump_query(&mut self, draw: &DrawInfo, regs: &RegisterState) -> io::Result<()> {
        if !self.query_matches(regs) {
            return Ok(());
        }
        let mut n = 0;
        for i in 0..self.queries.len() {
            let reg = self.queries[i];
            if !regs.is_written(reg) {
                continue;
            }
            let val = regs.val(reg);
            let mut line = format!("{:4}: {}:{}:", draw.index, draw.prim, draw.num_indices);
            if self.generation >= 5 {
                line.push_str(draw.mode.name());
                line.push(':');
            }
            write!(
                self.out,
                "{}\t{:08x}{}{} {}\n",
                line,
                val,
                if val != regs.last_val(reg) { "!" } else { " " },
                if regs.is_rewritten(reg) { "+" } else { " " },
                self.reg_name(reg)
            )?;
            n += 1;
        }
        if n > 1 {
            write!(self.out, "\n")?;
        }
        Ok(())
    }

    /// Registers written since the previous draw (or all of them with
    /// `--allregs`), flagged `!` if changed and `+` if rewritten.
    fn dump_register_summary(&mut self, regs: &RegisterState, level: usize) -> io::Result<()> {
        let shown: Vec<u32> = if self.options.allregs {
            regs.written_regs().collect()
        } else {
            regs.rewritten_regs().collect()
        };
        let indent = self.indent(level);
        for reg in shown {
            let val = regs.val(reg);
            write!(
                self.out,
                "{}{}{}\t{:08x}\t{}\n",
                indent,
                if regs.changed_since_draw(reg) { "!" } else { " " },
                if regs.is_rewritten(reg) { "+" } else { " " },
                val,
                self.reg_name(reg)
            )?;
        }
        Ok(())
    }
}

impl<'a, W: Write> DecodeSink for TextSink<'a, W> {
    fn device(&mut self, id: &DeviceId) -> io::Result<()> {
        self.generation = id.generation;
        if id.gpu_id != 0 {
            write!(self.out, "gpu_id: {}\n", id.gpu_id)?;
        }
        if id.chip_id != 0 {
            write!(self.out, "chip_id: {:#x}\n", id.chip_id)?;
        }
        Ok(())
    }

    fn test_marker(&mut self, text: &str) -> io::Result<()> {
        if !self.quiet(1) {
            write!(self.out, "test: {}\n", text)?;
        }
        Ok(())
    }

    fn process_name(&mut self, name: &str) -> io::Result<()> {
        if !self.quiet(1) {
            write!(self.out, "cmd: {}\n", name)?;
        }
        Ok(())
    }

    fn begin_submit(&mut self, submit: &SubmitInfo) -> io::Result<()> {
        if self.quiet(1) {
            return Ok(());
        }
        write!(
            self.out,
            "############################################################\n"
        )?;
        write!(
            self.out,
            "cmdstream[{}]: {} dwords at {:#x}\n",
            submit.index, submit.dwords, submit.gpuaddr
        )
    }

    fn end_submit(&mut self, _submit: &SubmitInfo, stats: &SubmitStats) -> io::Result<()> {
        if self.quiet(1) {
            return Ok(());
        }
        write!(
            self.out,
            "############################################################\n"
        )?;
        write!(self.out, "draws: {}\nvertices: {}\n", stats.draws, stats.vertices)
    }

    fn register_write(
        &mut self,
        _regs: &RegisterState,
        base: u32,
        values: &[u32],
        _grouped: bool,
        level: usize,
    ) -> io::Result<()> {
        if self.quiet(3) {
            return Ok(());
        }
        let indent = self.indent(level);
        for (i, val) in values.iter().enumerate() {
            let reg = base + i as u32;
            let name = self.paint(BOLD_YELLOW, &self.reg_name(reg));
            write!(
                self.out,
                "{}write {} ({:04x}) <- {:08x}\n",
                indent, name, reg, val
            )?;
        }
        Ok(())
    }

    fn opcode(&mut self, op: Opcode, header: u32, payload: &[u32], level: usize) -> io::Result<()> {
        self.opcode_line(op, header, payload, level)
    }

    fn type2_nop(&mut self, level: usize) -> io::Result<()> {
        if !self.quiet(3) {
            write!(self.out, "{}nop\n", self.indent(level))?;
        }
        Ok(())
    }

    fn nop_marker(&mut self, kind: MarkerKind, text: &str, level: usize) -> io::Result<()> {
        if self.quiet(2) {
            return Ok(());
        }
        match kind {
            MarkerKind::Message => write!(self.out, "{}marker: {}\n", self.indent(level), text)?,
            MarkerKind::BeginScope => {
                write!(self.out, "{}begin: {}\n", self.indent(level), text)?;
                self.scope += 1;
            }
            MarkerKind::EndScope => {
                self.scope = self.scope.saturating_sub(1);
                write!(self.out, "{}end: {}\n", self.indent(level), text)?;
            }
            MarkerKind::Raw if self.options.markers && !text.is_empty() => {
                write!(self.out, "{}\"{}\"\n", self.indent(level), text)?
            }
            MarkerKind::Raw => (),
        }
        Ok(())
    }

    fn begin_indirect(&mut self, ib: &IndirectInfo, level: usize) -> io::Result<()> {
        if self.quiet(2) {
            return Ok(());
        }
        let indent = self.indent(level + 1);
        match ib.kind {
            IndirectKind::Ib(_) => write!(
                self.out,
                "{}ibaddr: {:#018x}\n{}ibsize: {:#010x}\n",
                indent, ib.addr, indent, ib.dwords
            ),
            IndirectKind::Bin(i) => write!(
                self.out,
                "{}bin {}: {:#x} ({} dwords)\n",
                indent, i, ib.addr, ib.dwords
            ),
            IndirectKind::DrawTable(i) => write!(
                self.out,
                "{}draw {}: {:#x} ({} dwords)\n",
                indent, i, ib.addr, ib.dwords
            ),
            IndirectKind::CtxSwitch => write!(self.out, "{}addr={:#x}\n", indent, ib.addr),
            IndirectKind::DrawState(_) => Ok(()),
        }
    }

    fn skip_indirect(&mut self, ib: &IndirectInfo, reason: SkipReason, level: usize) -> io::Result<()> {
        if self.quiet(2) {
            return Ok(());
        }
        let what = match reason {
            SkipReason::Missing => self.paint(RED, "not captured"),
            SkipReason::AlreadyDumped => "already dumped".to_owned(),
            SkipReason::Cycle => self.paint(RED, "recursive"),
        };
        write!(
            self.out,
            "{}{:#x} ({} dwords): {}\n",
            self.indent(level + 1),
            ib.addr,
            ib.dwords,
            what
        )
    }

    fn draw_state(&mut self, entry: &DrawStateEntry, level: usize) -> io::Result<()> {
        if self.quiet(2) {
            return Ok(());
        }
        write!(
            self.out,
            "{}group {}: count={}, flags={:?}, enable_mask={:#x}, addr={:#x}\n",
            self.indent(level),
            entry.group,
            entry.count,
            entry.flags,
            entry.enable_mask,
            entry.addr
        )
    }

    fn begin_cond(
        &mut self,
        op: Opcode,
        header: u32,
        payload: &[u32],
        true_dwords: u32,
        level: usize,
    ) -> io::Result<()> {
        self.opcode_line(op, header, payload, level.saturating_sub(1))?;
        if !self.quiet(2) {
            write!(self.out, "{}then: {} dwords\n", self.indent(level), true_dwords)?;
        }
        Ok(())
    }

    fn begin_else(&mut self, else_dwords: u32, level: usize) -> io::Result<()> {
        if !self.quiet(2) {
            write!(self.out, "{}else: {} dwords\n", self.indent(level), else_dwords)?;
        }
        Ok(())
    }

    fn shader(&mut self, load: &ShaderLoad<'_>, level: usize) -> io::Result<()> {
        self.opcode_line(load.op, load.header, load.payload, level)?;
        if self.quiet(3) {
            return Ok(());
        }
        let indent = self.indent(level + 1);
        match load.source {
            ShaderSource::Inline => write!(
                self.out,
                "{}{} shader: {} dwords inline\n",
                indent,
                load.stage.name(),
                load.code.len()
            )?,
            ShaderSource::Indirect { addr, first_upload } => write!(
                self.out,
                "{}{} shader: {} dwords at {:#x}{}\n",
                indent,
                load.stage.name(),
                load.code.len(),
                addr,
                if first_upload { "" } else { " (seen before)" }
            )?,
        }
        if !load.code.is_empty() {
            let indent = self.indent(level + 2);
            self.disasm
                .disassemble(self.generation, load.stage, load.code, &indent, &mut self.out)?;
        }
        Ok(())
    }

    fn render_mode(&mut self, mode: RenderMode, level: usize) -> io::Result<()> {
        if !self.quiet(2) {
            write!(self.out, "{}mode: {}\n", self.indent(level), mode.name())?;
        }
        Ok(())
    }

    fn draw(&mut self, draw: &DrawInfo, regs: &RegisterState, level: usize) -> io::Result<()> {
        let filtered = self.options.draw.map_or(false, |d| d != draw.index);
        if !filtered && self.options.is_query() {
            self.dump_query(draw, regs)?;
        }
        if !self.quiet(2) {
            let indent = self.indent(level);
            write!(
                self.out,
                "{}draw:          {}\n{}prim_type:     {}\n{}num_indices:   {}\n",
                indent, draw.index, indent, draw.prim, indent, draw.num_indices
            )?;
            if draw.num_indices > 0 || self.options.allregs {
                self.dump_register_summary(regs, level)?;
            }
        }
        self.next_draw = draw.index + 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::{
        disasm::HexDisassembler,
        pm4::ShaderStage,
        registers::{JsonRegisterDatabase, NumericRegisters},
    };

    fn sink(options: &DecodeOptions) -> TextSink<'_, Vec<u8>> {
        TextSink::new(
            Vec::new(),
            options,
            Box::new(NumericRegisters),
            Box::new(HexDisassembler),
        )
    }

    fn text(s: TextSink<'_, Vec<u8>>) -> String {
        String::from_utf8(s.into_inner()).unwrap()
    }

    fn draw(index: u32) -> DrawInfo {
        DrawInfo {
            index,
            op: Opcode::DrawIndxOffset,
            prim: "triangles",
            num_indices: 3,
            mode: RenderMode::Gmem,
        }
    }

    #[test]
    pub fn test_register_lines() {
        let options = DecodeOptions::default();
        let mut s = sink(&options);
        let regs = RegisterState::new();
        s.register_write(&regs, 0x8800, &[1, 2], false, 0).unwrap();
        assert_eq!(
            text(s),
            "\twrite 0x8800 (8800) <- 00000001\n\twrite 0x8801 (8801) <- 00000002\n"
        );
    }

    #[test]
    pub fn test_register_names_and_color() {
        let options = DecodeOptions {
            color: true,
            ..Default::default()
        };
        let db = JsonRegisterDatabase::from_json(r#"{"registers": {"RB_X": "0x10"}}"#).unwrap();
        let mut s = TextSink::new(Vec::new(), &options, Box::new(db), Box::new(HexDisassembler));
        s.register_write(&RegisterState::new(), 0x10, &[7], false, 1)
            .unwrap();
        assert_eq!(
            text(s),
            "\t\twrite \x1b[0;1;33mRB_X\x1b[0m (0010) <- 00000007\n"
        );
    }

    #[test]
    pub fn test_summary_hides_register_writes() {
        let options = DecodeOptions {
            summary: true,
            ..Default::default()
        };
        let mut s = sink(&options);
        let mut regs = RegisterState::new();
        regs.write(0x20, 5);
        s.register_write(&regs, 0x20, &[5], false, 0).unwrap();
        s.opcode(Opcode::DrawIndxOffset, 0, &[4, 0, 3], 0).unwrap();
        s.draw(&draw(0), &regs, 1).unwrap();
        let out = text(s);
        assert!(!out.contains("write"));
        assert!(out.contains("opcode: CP_DRAW_INDX_OFFSET (38) (4 dwords)"));
        assert!(out.contains("!+\t00000005\t0x0020"));
    }

    #[test]
    pub fn test_draw_filter() {
        let options = DecodeOptions {
            draw: Some(1),
            ..Default::default()
        };
        let mut s = sink(&options);
        let regs = RegisterState::new();
        s.register_write(&regs, 0x1, &[1], false, 0).unwrap();
        s.draw(&draw(0), &regs, 0).unwrap();
        s.register_write(&regs, 0x2, &[2], false, 0).unwrap();
        s.draw(&draw(1), &regs, 0).unwrap();
        s.register_write(&regs, 0x3, &[3], false, 0).unwrap();
        let out = text(s);
        assert!(!out.contains("(0001)"));
        assert!(out.contains("(0002)"));
        assert!(!out.contains("(0003)"));
    }

    #[test]
    pub fn test_draw_filter_keeps_one_draw() {
        use crate::{
            address_space::buffer_space::BufferSpace,
            decode::{
                pm4::{type4_header, type7_header},
                walker::{WalkState, Walker},
            },
        };

        let options = DecodeOptions {
            draw: Some(1),
            ..Default::default()
        };
        let mut s = sink(&options);
        let mut words = Vec::new();
        for reg in 1..=3 {
            words.extend_from_slice(&[type4_header(reg, 1), reg]);
            words.extend_from_slice(&[type7_header(Opcode::DrawAuto, 1), 4]);
        }
        let mut buffers = BufferSpace::new();
        let mut regs = RegisterState::new();
        let mut state = WalkState::new(6);
        Walker::new(&mut buffers, &mut regs, &mut state, &mut s, false)
            .decode(&words, 0)
            .unwrap();
        let out = text(s);
        assert!(out.contains("(0002) <- 00000002"));
        assert!(out.contains("draw:          1\n"));
        assert_eq!(out.matches("CP_DRAW_AUTO").count(), 1);
        assert!(!out.contains("(0001)"));
        assert!(!out.contains("(0003)"));
        assert!(!out.contains("draw:          0\n"));
        assert!(!out.contains("draw:          2\n"));
    }

    #[test]
    pub fn test_query_modes() {
        let options = DecodeOptions {
            query: vec!["0x30".to_owned()],
            query_mode: QueryMode::Delta,
            ..Default::default()
        };
        let mut s = sink(&options);
        s.generation = 6;
        let mut regs = RegisterState::new();
        regs.write(0x30, 9);
        s.draw(&draw(0), &regs, 0).unwrap();
        regs.end_draw();
        regs.write(0x30, 9);
        s.draw(&draw(1), &regs, 0).unwrap();
        let out = text(s);
        assert_eq!(out, "   0: triangles:3:gmem:\t00000009!+ 0x0030\n");
    }

    #[test]
    pub fn test_markers_and_scopes() {
        let options = DecodeOptions::default();
        let mut s = sink(&options);
        s.nop_marker(MarkerKind::BeginScope, "pass", 0).unwrap();
        s.nop_marker(MarkerKind::Message, "hello", 0).unwrap();
        s.nop_marker(MarkerKind::Raw, "junk", 0).unwrap();
        s.nop_marker(MarkerKind::EndScope, "pass", 0).unwrap();
        assert_eq!(text(s), "\tbegin: pass\n\t\tmarker: hello\n\tend: pass\n");
    }

    #[test]
    pub fn test_verbose_hex() {
        let options = DecodeOptions {
            verbose: true,
            ..Default::default()
        };
        let mut s = sink(&options);
        let mut payload = vec![1];
        payload.extend_from_slice(&[0; 16]);
        s.opcode(Opcode::Nop, 0x7010_0011, &payload, 0).unwrap();
        let out = text(s);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "\topcode: CP_NOP (10) (18 dwords)");
        assert!(lines[1].starts_with("\t\t0000: 70100011 00000001 00000000"));
        assert_eq!(lines[2], "\t\t*");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    pub fn test_shader_disassembly() {
        let options = DecodeOptions::default();
        let mut s = sink(&options);
        let load = ShaderLoad {
            op: Opcode::LoadState6Frag,
            header: 0,
            payload: &[0, 0x1000, 0],
            stage: ShaderStage::Fragment,
            source: ShaderSource::Indirect {
                addr: 0x1000,
                first_upload: true,
            },
            code: &[0xaa, 0xbb],
        };
        s.shader(&load, 0).unwrap();
        let out = text(s);
        assert!(out.contains("\t\tfs shader: 2 dwords at 0x1000\n"));
        assert!(out.contains("\t\t\t0000: 000000bb000000aa\n"));
    }
}
