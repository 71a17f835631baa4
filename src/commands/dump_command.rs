use super::{
    exit_result::ExitResult,
    gpurd_options::{GpuRdOptions, GpuRdSubCommand},
};
use crate::{
    commands::RdCommand,
    decode::{
        disasm::HexDisassembler,
        options::DecodeOptions,
        registers::{JsonRegisterDatabase, NumericRegisters, RegisterDatabase},
        script_hook::ScriptHook,
        session::DecodeSession,
        sink::TeeSink,
        text_sink::TextSink,
        DecodeError,
    },
    log::LogLevel::{LogInfo, LogWarn},
    trace::capture_reader::CaptureReader,
    util::stdout_is_tty,
};
use std::{
    io::{self, stdout, BufWriter, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

pub struct DumpCommand {
    options: DecodeOptions,
    regdb: Option<PathBuf>,
    pager: bool,
    inputs: Vec<PathBuf>,
}

impl DumpCommand {
    pub fn new(options: &GpuRdOptions) -> DumpCommand {
        match options.cmd.clone() {
            GpuRdSubCommand::Dump {
                verbose,
                color,
                no_color,
                pager,
                frame,
                draw,
                submit,
                exe,
                query,
                query_mode,
                summary,
                allregs,
                once,
                markers,
                script,
                regdb,
                inputs,
            } => {
                if let Some(path) = &regdb {
                    if !path.is_file() {
                        clean_fatal!("Register database {:?} not found", path);
                    }
                }
                DumpCommand {
                    options: DecodeOptions {
                        gpu_id: options.gpu_id,
                        verbose,
                        color: color || (!no_color && (pager || stdout_is_tty())),
                        frame,
                        draw,
                        submit,
                        exe,
                        query,
                        query_mode,
                        summary,
                        allregs,
                        once,
                        markers,
                        script,
                    },
                    regdb,
                    pager,
                    inputs,
                }
            }
            _ => panic!("Unexpected GpuRdSubCommand variant. Not a Dump variant!"),
        }
    }

    fn register_database(&self) -> io::Result<Box<dyn RegisterDatabase>> {
        match &self.regdb {
            Some(path) => Ok(Box::new(JsonRegisterDatabase::load(path)?)),
            None => Ok(Box::new(NumericRegisters)),
        }
    }

    fn dump_file(&self, input: &Path, out: &mut dyn Write) -> Result<(), DecodeError> {
        log!(LogInfo, "Reading {:?}", input);
        let mut reader = CaptureReader::open(input)?;
        let mut text = TextSink::new(
            out,
            &self.options,
            self.register_database()?,
            Box::new(HexDisassembler),
        );
        let mut session = DecodeSession::new(&self.options);
        match &self.options.script {
            Some(path) => {
                let mut hook = ScriptHook::spawn(path)?;
                let mut tee = TeeSink::new(&mut text, &mut hook);
                session.run(&mut reader, &mut tee)
            }
            None => session.run(&mut reader, &mut text),
        }
    }
}

/// `less -R` reading everything written to it.
struct Pager {
    child: Child,
    input: Option<BufWriter<std::process::ChildStdin>>,
}

impl Pager {
    fn spawn() -> io::Result<Pager> {
        let mut child = Command::new("less")
            .arg("-R")
            .stdin(Stdio::piped())
            .spawn()?;
        let input = child.stdin.take().map(BufWriter::new);
        Ok(Pager { child, input })
    }

    fn writer(&mut self) -> io::Result<&mut dyn Write> {
        match self.input.as_mut() {
            Some(w) => Ok(w),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "pager has no stdin")),
        }
    }

    /// Close the pager's input and wait for the user to quit it.
    fn finish(mut self) -> io::Result<()> {
        if let Some(mut w) = self.input.take() {
            w.flush().unwrap_or(());
        }
        self.child.wait()?;
        Ok(())
    }
}

fn is_broken_pipe(e: &DecodeError) -> bool {
    match e {
        DecodeError::Io(io) => io.kind() == io::ErrorKind::BrokenPipe,
        _ => false,
    }
}

impl RdCommand for DumpCommand {
    fn run(&mut self) -> ExitResult<()> {
        let mut pager = if self.pager {
            match Pager::spawn() {
                Ok(p) => Some(p),
                Err(e) => {
                    log!(LogWarn, "Can't start pager: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let stdout = stdout();
        let mut stdout_lock = stdout.lock();

        let mut failed = 0;
        for input in &self.inputs {
            let out: &mut dyn Write = match pager.as_mut() {
                Some(p) => match p.writer() {
                    Ok(w) => w,
                    Err(e) => return ExitResult::err_from(e, 1),
                },
                None => &mut stdout_lock,
            };
            let result = self.dump_file(input, out).and_then(|_| Ok(out.flush()?));
            match result {
                Ok(()) => (),
                // The pager was quit early.
                Err(ref e) if is_broken_pipe(e) => break,
                Err(e) => {
                    eprintln!("gpurd: {:?}: {}", input, e);
                    failed += 1;
                }
            }
        }

        if let Some(p) = pager {
            if let Err(e) = p.finish() {
                log!(LogWarn, "Pager failed: {}", e);
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        decode::{options::QueryMode, pm4::type4_header},
        trace::capture_writer::CaptureWriter,
    };
    use std::fs::File;

    fn command(inputs: Vec<PathBuf>) -> DumpCommand {
        let options = GpuRdOptions {
            gpu_id: None,
            cmd: GpuRdSubCommand::Dump {
                verbose: false,
                color: false,
                no_color: true,
                pager: false,
                frame: None,
                draw: None,
                submit: None,
                exe: None,
                query: Vec::new(),
                query_mode: QueryMode::All,
                summary: false,
                allregs: false,
                once: false,
                markers: false,
                script: None,
                regdb: None,
                inputs,
            },
        };
        DumpCommand::new(&options)
    }

    #[test]
    pub fn test_dump_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.rd");
        let mut w = CaptureWriter::new(File::create(&path).unwrap());
        w.write_gpu_id(630).unwrap();
        w.write_buffer_dwords(0x1000, &[type4_header(0x8800, 1), 0x2a])
            .unwrap();
        w.write_cmdstream(0x1000, 2).unwrap();
        drop(w.into_inner());

        let cmd = command(vec![path.clone()]);
        let mut out = Vec::new();
        cmd.dump_file(&path, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().any(|l| l == "gpu_id: 630"));
        assert!(text.contains("(8800) <- 0000002a"));
    }

    #[test]
    pub fn test_failed_input_sets_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = command(vec![dir.path().join("missing.rd")]);
        assert_eq!(cmd.run().report(), 1);
    }
}
