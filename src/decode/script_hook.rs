//! Feeds decode events to an external program as JSON lines on its stdin.

use super::{
    registers::RegisterState,
    sink::{DecodeSink, DrawInfo, SubmitInfo, SubmitStats},
};
use crate::log::LogLevel::{LogDebug, LogWarn};
use serde::Serialize;
use std::{
    io::{self, BufWriter, Write},
    path::Path,
    process::{Child, ChildStdin, Command, Stdio},
};

#[derive(Serialize, Debug)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ScriptEvent<'a> {
    Submit {
        index: u32,
        gpuaddr: u64,
        dwords: u32,
    },
    EndSubmit {
        index: u32,
        draws: u32,
        vertices: u64,
    },
    RegisterWrite {
        reg: u32,
        value: u32,
    },
    Draw {
        index: u32,
        primitive: &'a str,
        num_indices: u32,
        mode: &'a str,
        /// Registers written since the previous draw.
        rewritten: Vec<(u32, u32)>,
    },
    End,
}

pub struct ScriptHook<W: Write> {
    /// None once the script's input has been closed.
    out: Option<W>,
    child: Option<Child>,
}

impl ScriptHook<BufWriter<ChildStdin>> {
    pub fn spawn(path: &Path) -> io::Result<ScriptHook<BufWriter<ChildStdin>>> {
        let mut child = Command::new(path).stdin(Stdio::piped()).spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "script has no stdin"))?;
        log!(LogDebug, "Started script {:?} as pid {}", path, child.id());
        Ok(ScriptHook {
            out: Some(BufWriter::new(stdin)),
            child: Some(child),
        })
    }
}

impl<W: Write> ScriptHook<W> {
    pub fn new(out: W) -> ScriptHook<W> {
        ScriptHook {
            out: Some(out),
            child: None,
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.out
    }

    fn send(&mut self, event: &ScriptEvent<'_>) -> io::Result<()> {
        let out = match self.out.as_mut() {
            Some(out) => out,
            None => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "script input closed")),
        };
        serde_json::to_writer(&mut *out, event)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        out.write_all(b"\n")
    }
}

impl<W: Write> DecodeSink for ScriptHook<W> {
    fn begin_submit(&mut self, submit: &SubmitInfo) -> io::Result<()> {
        self.send(&ScriptEvent::Submit {
            index: submit.index,
            gpuaddr: submit.gpuaddr,
            dwords: submit.dwords,
        })
    }

    fn end_submit(&mut self, submit: &SubmitInfo, stats: &SubmitStats) -> io::Result<()> {
        self.send(&ScriptEvent::EndSubmit {
            index: submit.index,
            draws: stats.draws,
            vertices: stats.vertices,
        })
    }

    fn register_write(
        &mut self,
        _regs: &RegisterState,
        base: u32,
        values: &[u32],
        _grouped: bool,
        _level: usize,
    ) -> io::Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.send(&ScriptEvent::RegisterWrite {
                reg: base + i as u32,
                value: *value,
            })?;
        }
        Ok(())
    }

    fn draw(&mut self, draw: &DrawInfo, regs: &RegisterState, _level: usize) -> io::Result<()> {
        let rewritten = regs.rewritten_regs().map(|r| (r, regs.val(r))).collect();
        self.send(&ScriptEvent::Draw {
            index: draw.index,
            primitive: draw.prim,
            num_indices: draw.num_indices,
            mode: draw.mode.name(),
            rewritten,
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.send(&ScriptEvent::End)?;
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }
        if let Some(mut child) = self.child.take() {
            // The script sees EOF once its stdin is closed.
            self.out = None;
            let status = child.wait()?;
            if !status.success() {
                log!(LogWarn, "Script exited with {}", status);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::pm4::{Opcode, RenderMode};
    use serde_json::Value;

    #[test]
    pub fn test_json_lines() {
        let mut hook = ScriptHook::new(Vec::new());
        let mut regs = RegisterState::new();
        let submit = SubmitInfo {
            index: 1,
            gpuaddr: 0x1000,
            dwords: 4,
        };
        hook.begin_submit(&submit).unwrap();
        regs.write(0x10, 7);
        hook.register_write(&regs, 0x10, &[7], false, 0).unwrap();
        let draw = DrawInfo {
            index: 0,
            op: Opcode::DrawIndxOffset,
            prim: "triangles",
            num_indices: 3,
            mode: RenderMode::Bypass,
        };
        hook.draw(&draw, &regs, 0).unwrap();
        hook.finish().unwrap();

        let text = String::from_utf8(hook.into_inner().unwrap()).unwrap();
        let events: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["event"], "submit");
        assert_eq!(events[0]["gpuaddr"], 0x1000);
        assert_eq!(events[1]["event"], "register_write");
        assert_eq!(events[1]["reg"], 0x10);
        assert_eq!(events[2]["primitive"], "triangles");
        assert_eq!(events[2]["rewritten"][0][1], 7);
        assert_eq!(events[3]["event"], "end");
    }
}
