use super::{
    exit_result::ExitResult,
    gpurd_options::{GpuRdOptions, GpuRdSubCommand},
};
use crate::{
    commands::RdCommand,
    log::LogLevel::{LogInfo, LogWarn},
    replay::{
        backend::GpuBackend,
        open_default_backend,
        replay_session::{ReplayOptions, ReplaySession, ReplayStats},
        ReplayError,
    },
    trace::capture_reader::CaptureReader,
};
use std::{io, path::PathBuf};

pub struct ReplayCommand {
    options: ReplayOptions,
    inputs: Vec<PathBuf>,
}

impl ReplayCommand {
    pub fn new(options: &GpuRdOptions) -> ReplayCommand {
        match options.cmd.clone() {
            GpuRdSubCommand::Replay {
                exe,
                override_submit,
                generator,
                first,
                last,
                output_dir,
                inputs,
            } => ReplayCommand {
                options: ReplayOptions {
                    exe,
                    override_submit,
                    generator,
                    first_submit: first,
                    last_submit: last,
                    output_dir,
                },
                inputs,
            },
            _ => panic!("Unexpected GpuRdSubCommand variant. Not a Replay variant!"),
        }
    }
}

/// Replay one capture on `backend`. The backend, and every buffer allocated
/// on it, is released when this returns.
fn replay_file<B: GpuBackend>(
    backend: B,
    options: &ReplayOptions,
    reader: &mut CaptureReader,
) -> Result<ReplayStats, ReplayError> {
    let mut session = ReplaySession::new(backend, options.clone());
    session.run(reader)?;
    Ok(session.stats())
}

impl RdCommand for ReplayCommand {
    fn run(&mut self) -> ExitResult<()> {
        let mut failed = 0;
        for input in &self.inputs {
            let mut reader = match CaptureReader::open(input) {
                Ok(r) => r,
                Err(e) => {
                    log!(LogWarn, "Can't open {:?}: {}", input, e);
                    failed += 1;
                    continue;
                }
            };
            let backend = match open_default_backend() {
                Ok(b) => b,
                Err(e) => return ExitResult::err_from(e, 1),
            };
            log!(LogInfo, "Replaying {:?}", input);
            match replay_file(backend, &self.options, &mut reader) {
                Ok(stats) => log!(
                    LogInfo,
                    "{:?}: issued {} submits, {} timed out",
                    input,
                    stats.submits_issued,
                    stats.timeouts
                ),
                Err(e) if e.is_fatal() => return ExitResult::err_from(e, 1),
                Err(e) => {
                    log!(LogWarn, "{:?}: {}", input, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return ExitResult::err_from(
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} of {} inputs failed", failed, self.inputs.len()),
                ),
                1,
            );
        }
        ExitResult::Ok(())
    }
}
