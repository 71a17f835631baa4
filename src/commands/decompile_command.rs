use super::{
    exit_result::ExitResult,
    gpurd_options::{GpuRdOptions, GpuRdSubCommand},
};
use crate::{
    commands::RdCommand,
    decode::{
        decompile_sink::DecompileSink, options::DecodeOptions, session::DecodeSession,
        DecodeError,
    },
    trace::capture_reader::CaptureReader,
};
use std::{
    io::{self, stdout, Write},
    path::{Path, PathBuf},
};

pub struct DecompileCommand {
    options: DecodeOptions,
    inputs: Vec<PathBuf>,
}

impl DecompileCommand {
    pub fn new(options: &GpuRdOptions) -> DecompileCommand {
        match options.cmd.clone() {
            GpuRdSubCommand::Decompile {
                submit,
                exe,
                frame,
                inputs,
            } => DecompileCommand {
                options: DecodeOptions {
                    gpu_id: options.gpu_id,
                    submit,
                    exe,
                    frame,
                    ..Default::default()
                },
                inputs,
            },
            _ => panic!("Unexpected GpuRdSubCommand variant. Not a Decompile variant!"),
        }
    }

    fn decompile_file<W: Write>(&self, input: &Path, out: W) -> Result<W, DecodeError> {
        let mut reader = CaptureReader::open(input)?;
        let generation = self.options.gpu_id.map_or(0, |id| id / 100);
        let mut sink = DecompileSink::new(out, generation);
        DecodeSession::new(&self.options).run(&mut reader, &mut sink)?;
        Ok(sink.into_inner())
    }
}

impl RdCommand for DecompileCommand {
    fn run(&mut self) -> ExitResult<()> {
        let stdout = stdout();
        let mut out = stdout.lock();
        for input in &self.inputs {
            match self.decompile_file(input, &mut out) {
                Ok(o) => {
                    if let Err(e) = o.flush() {
                        return ExitResult::err_from(e, 1);
                    }
                }
                Err(e) => {
                    return ExitResult::err_from(
                        io::Error::new(io::ErrorKind::Other, format!("{:?}: {}", input, e)),
                        1,
                    )
                }
            }
        }
        ExitResult::Ok(())
    }
}
