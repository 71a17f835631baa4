pub mod decompile_sink;
pub mod disasm;
pub mod options;
pub mod pm4;
pub mod registers;
pub mod script_hook;
pub mod session;
pub mod sink;
pub mod text_sink;
pub mod walker;

use crate::trace::capture_reader::CaptureError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown packet opcode {0:#04x}")]
    UnknownOpcode(u32),
    #[error("bad packet header {0:#010x}")]
    BadPacket(u32),
    #[error("packet needs {needed} dwords, only {available} remain")]
    Truncated { needed: usize, available: usize },
    #[error("capture has no gpu or chip id; pass --gpu-id")]
    NoDeviceId,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("error writing output: {0}")]
    Io(#[from] io::Error),
}
