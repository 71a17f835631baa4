//! The events a command stream walk produces, and the trait output formats
//! implement to receive them.

use super::{
    pm4::{DrawStateEntry, Opcode, RenderMode, ShaderStage},
    registers::RegisterState,
};
use std::io;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DeviceId {
    pub gpu_id: u32,
    pub chip_id: u64,
    pub generation: u32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SubmitInfo {
    pub index: u32,
    pub gpuaddr: u64,
    pub dwords: u32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct SubmitStats {
    pub draws: u32,
    pub vertices: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum IndirectKind {
    /// `CP_INDIRECT_BUFFER` and friends.
    Ib(Opcode),
    /// One iteration of a `CP_START_BIN` loop.
    Bin(u32),
    /// One entry of a `CP_FIXED_STRIDE_DRAW_TABLE`.
    DrawTable(u32),
    CtxSwitch,
    /// The buffer of a `CP_SET_DRAW_STATE` group.
    DrawState(u32),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct IndirectInfo {
    pub kind: IndirectKind,
    pub addr: u64,
    pub dwords: u32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SkipReason {
    /// No captured buffer covers the target.
    Missing,
    /// Decode-once mode has already shown this target.
    AlreadyDumped,
    /// The target is already being decoded further up the stack.
    Cycle,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MarkerKind {
    Message,
    BeginScope,
    EndScope,
    /// A `CP_NOP` payload without a marker identifier.
    Raw,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ShaderSource {
    Inline,
    Indirect { addr: u64, first_upload: bool },
}

pub struct ShaderLoad<'a> {
    pub op: Opcode,
    pub header: u32,
    pub payload: &'a [u32],
    pub stage: ShaderStage,
    pub source: ShaderSource,
    /// Instruction dwords, empty if the shader could not be resolved.
    pub code: &'a [u32],
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DrawInfo {
    /// Index of this draw within the file.
    pub index: u32,
    pub op: Opcode,
    pub prim: &'static str,
    pub num_indices: u32,
    pub mode: RenderMode,
}

/// Receives a decoded command stream. Every method defaults to doing
/// nothing, so a sink only implements what it shows.
pub trait DecodeSink {
    /// Follow each `CP_SET_DRAW_STATE` group where the packet sets it instead
    /// of loading the enabled groups at the next draw.
    fn inline_draw_state(&self) -> bool {
        false
    }

    fn device(&mut self, _id: &DeviceId) -> io::Result<()> {
        Ok(())
    }

    fn test_marker(&mut self, _text: &str) -> io::Result<()> {
        Ok(())
    }

    fn process_name(&mut self, _name: &str) -> io::Result<()> {
        Ok(())
    }

    fn begin_submit(&mut self, _submit: &SubmitInfo) -> io::Result<()> {
        Ok(())
    }

    fn end_submit(&mut self, _submit: &SubmitInfo, _stats: &SubmitStats) -> io::Result<()> {
        Ok(())
    }

    /// `values` go to consecutive registers from `base`. `grouped` writes come
    /// from inside an opcode packet that was already reported.
    fn register_write(
        &mut self,
        _regs: &RegisterState,
        _base: u32,
        _values: &[u32],
        _grouped: bool,
        _level: usize,
    ) -> io::Result<()> {
        Ok(())
    }

    fn opcode(&mut self, _op: Opcode, _header: u32, _payload: &[u32], _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn type2_nop(&mut self, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn nop_marker(&mut self, _kind: MarkerKind, _text: &str, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn begin_indirect(&mut self, _ib: &IndirectInfo, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn end_indirect(&mut self, _ib: &IndirectInfo, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn skip_indirect(&mut self, _ib: &IndirectInfo, _reason: SkipReason, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn draw_state(&mut self, _entry: &DrawStateEntry, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn begin_cond(
        &mut self,
        _op: Opcode,
        _header: u32,
        _payload: &[u32],
        _true_dwords: u32,
        _level: usize,
    ) -> io::Result<()> {
        Ok(())
    }

    fn begin_else(&mut self, _else_dwords: u32, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn end_cond(&mut self, _level: usize) -> io::Result<()> {
        Ok(())
    }

    /// Replaces `opcode` for packets that load shader instructions.
    fn shader(&mut self, _load: &ShaderLoad<'_>, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn render_mode(&mut self, _mode: RenderMode, _level: usize) -> io::Result<()> {
        Ok(())
    }

    fn draw(&mut self, _draw: &DrawInfo, _regs: &RegisterState, _level: usize) -> io::Result<()> {
        Ok(())
    }

    /// Called once the whole capture has been walked.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Forwards every event to two sinks in turn.
pub struct TeeSink<'a> {
    first: &'a mut dyn DecodeSink,
    second: &'a mut dyn DecodeSink,
}

impl<'a> TeeSink<'a> {
    pub fn new(first: &'a mut dyn DecodeSink, second: &'a mut dyn DecodeSink) -> TeeSink<'a> {
        TeeSink { first, second }
    }
}

macro_rules! tee {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {{
        $self.first.$method($($arg),*)?;
        $self.second.$method($($arg),*)
    }};
}

impl<'a> DecodeSink for TeeSink<'a> {
    fn inline_draw_state(&self) -> bool {
        self.first.inline_draw_state() || self.second.inline_draw_state()
    }

    fn device(&mut self, id: &DeviceId) -> io::Result<()> {
        tee!(self.device(id))
    }

    fn test_marker(&mut self, text: &str) -> io::Result<()> {
        tee!(self.test_marker(text))
    }

    fn process_name(&mut self, name: &str) -> io::Result<()> {
        tee!(self.process_name(name))
    }

    fn begin_submit(&mut self, submit: &SubmitInfo) -> io::Result<()> {
        tee!(self.begin_submit(submit))
    }

    fn end_submit(&mut self, submit: &SubmitInfo, stats: &SubmitStats) -> io::Result<()> {
        tee!(self.end_submit(submit, stats))
    }

    fn register_write(
        &mut self,
        regs: &RegisterState,
        base: u32,
        values: &[u32],
        grouped: bool,
        level: usize,
    ) -> io::Result<()> {
        tee!(self.register_write(regs, base, values, grouped, level))
    }

    fn opcode(&mut self, op: Opcode, header: u32, payload: &[u32], level: usize) -> io::Result<()> {
        tee!(self.opcode(op, header, payload, level))
    }

    fn type2_nop(&mut self, level: usize) -> io::Result<()> {
        tee!(self.type2_nop(level))
    }

    fn nop_marker(&mut self, kind: MarkerKind, text: &str, level: usize) -> io::Result<()> {
        tee!(self.nop_marker(kind, text, level))
    }

    fn begin_indirect(&mut self, ib: &IndirectInfo, level: usize) -> io::Result<()> {
        tee!(self.begin_indirect(ib, level))
    }

    fn end_indirect(&mut self, ib: &IndirectInfo, level: usize) -> io::Result<()> {
        tee!(self.end_indirect(ib, level))
    }

    fn skip_indirect(&mut self, ib: &IndirectInfo, reason: SkipReason, level: usize) -> io::Result<()> {
        tee!(self.skip_indirect(ib, reason, level))
    }

    fn draw_state(&mut self, entry: &DrawStateEntry, level: usize) -> io::Result<()> {
        tee!(self.draw_state(entry, level))
    }

    fn begin_cond(
        &mut self,
        op: Opcode,
        header: u32,
        payload: &[u32],
        true_dwords: u32,
        level: usize,
    ) -> io::Result<()> {
        tee!(self.begin_cond(op, header, payload, true_dwords, level))
    }

    fn begin_else(&mut self, else_dwords: u32, level: usize) -> io::Result<()> {
        tee!(self.begin_else(else_dwords, level))
    }

    fn end_cond(&mut self, level: usize) -> io::Result<()> {
        tee!(self.end_cond(level))
    }

    fn shader(&mut self, load: &ShaderLoad<'_>, level: usize) -> io::Result<()> {
        tee!(self.shader(load, level))
    }

    fn render_mode(&mut self, mode: RenderMode, level: usize) -> io::Result<()> {
        tee!(self.render_mode(mode, level))
    }

    fn draw(&mut self, draw: &DrawInfo, regs: &RegisterState, level: usize) -> io::Result<()> {
        tee!(self.draw(draw, regs, level))
    }

    fn finish(&mut self) -> io::Result<()> {
        tee!(self.finish())
    }
}

/// Records events as strings, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<String>,
}

#[cfg(test)]
impl DecodeSink for RecordingSink {
    fn device(&mut self, id: &DeviceId) -> io::Result<()> {
        self.events.push(format!("device {}", id.gpu_id));
        Ok(())
    }

    fn begin_submit(&mut self, submit: &SubmitInfo) -> io::Result<()> {
        self.events.push(format!("submit {}", submit.index));
        Ok(())
    }

    fn register_write(
        &mut self,
        _regs: &RegisterState,
        base: u32,
        values: &[u32],
        _grouped: bool,
        level: usize,
    ) -> io::Result<()> {
        self.events
            .push(format!("write {:#x} {:x?} @{}", base, values, level));
        Ok(())
    }

    fn opcode(&mut self, op: Opcode, _header: u32, _payload: &[u32], level: usize) -> io::Result<()> {
        self.events.push(format!("{} @{}", op, level));
        Ok(())
    }

    fn nop_marker(&mut self, kind: MarkerKind, text: &str, _level: usize) -> io::Result<()> {
        self.events.push(format!("marker {:?} {}", kind, text));
        Ok(())
    }

    fn begin_indirect(&mut self, ib: &IndirectInfo, _level: usize) -> io::Result<()> {
        self.events
            .push(format!("begin {:?} {:#x} {}", ib.kind, ib.addr, ib.dwords));
        Ok(())
    }

    fn end_indirect(&mut self, ib: &IndirectInfo, _level: usize) -> io::Result<()> {
        self.events.push(format!("end {:#x}", ib.addr));
        Ok(())
    }

    fn skip_indirect(&mut self, ib: &IndirectInfo, reason: SkipReason, _level: usize) -> io::Result<()> {
        self.events.push(format!("skip {:#x} {:?}", ib.addr, reason));
        Ok(())
    }

    fn draw_state(&mut self, entry: &DrawStateEntry, _level: usize) -> io::Result<()> {
        self.events
            .push(format!("draw_state group {} count {}", entry.group, entry.count));
        Ok(())
    }

    fn begin_cond(
        &mut self,
        _op: Opcode,
        _header: u32,
        _payload: &[u32],
        true_dwords: u32,
        _level: usize,
    ) -> io::Result<()> {
        self.events.push(format!("cond {}", true_dwords));
        Ok(())
    }

    fn begin_else(&mut self, else_dwords: u32, _level: usize) -> io::Result<()> {
        self.events.push(format!("else {}", else_dwords));
        Ok(())
    }

    fn end_cond(&mut self, _level: usize) -> io::Result<()> {
        self.events.push("endcond".to_owned());
        Ok(())
    }

    fn shader(&mut self, load: &ShaderLoad<'_>, _level: usize) -> io::Result<()> {
        self.events.push(format!(
            "shader {} {:?} {}",
            load.stage.name(),
            load.source,
            load.code.len()
        ));
        Ok(())
    }

    fn render_mode(&mut self, mode: RenderMode, _level: usize) -> io::Result<()> {
        self.events.push(format!("mode {}", mode.name()));
        Ok(())
    }

    fn draw(&mut self, draw: &DrawInfo, _regs: &RegisterState, _level: usize) -> io::Result<()> {
        self.events
            .push(format!("draw {} {} {}", draw.index, draw.prim, draw.num_indices));
        Ok(())
    }
}
