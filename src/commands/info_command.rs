use super::{
    exit_result::ExitResult,
    gpurd_options::{GpuRdOptions, GpuRdSubCommand},
};
use crate::{
    commands::RdCommand,
    trace::{
        capture_reader::{CaptureError, CaptureReader},
        section::SectionType,
    },
};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub struct InfoCommand {
    inputs: Vec<PathBuf>,
}

impl InfoCommand {
    pub fn new(options: &GpuRdOptions) -> InfoCommand {
        match options.cmd.clone() {
            GpuRdSubCommand::Info { inputs } => InfoCommand { inputs },
            _ => panic!("Unexpected GpuRdSubCommand variant. Not an `Info` variant!"),
        }
    }
}

#[derive(Serialize, Default, Debug)]
#[serde(rename_all = "camelCase")]
struct CaptureSummary {
    file: String,
    gpu_id: u32,
    chip_id: u64,
    processes: Vec<String>,
    submits: u32,
    buffers: u32,
    buffer_bytes: u64,
    frames: u32,
}

fn summarize(file: &Path, reader: &mut CaptureReader) -> Result<CaptureSummary, CaptureError> {
    let mut summary = CaptureSummary {
        file: file.to_string_lossy().into_owned(),
        ..Default::default()
    };
    while let Some(section) = reader.next_section()? {
        match section.section_type() {
            Some(SectionType::GpuId) if summary.gpu_id == 0 => {
                summary.gpu_id = section.u32_at(0).unwrap_or(0)
            }
            Some(SectionType::ChipId) if summary.chip_id == 0 => {
                summary.chip_id = section.u64_at_byte(0).unwrap_or(0)
            }
            Some(SectionType::Cmd) => {
                let name = section.text().into_owned();
                if !summary.processes.contains(&name) {
                    summary.processes.push(name);
                }
            }
            Some(SectionType::CmdstreamAddr) => summary.submits += 1,
            Some(SectionType::BufferContents) => {
                summary.buffers += 1;
                summary.buffer_bytes += section.len() as u64;
            }
            Some(SectionType::Flush) => summary.frames += 1,
            _ => (),
        }
    }
    Ok(summary)
}

impl RdCommand for InfoCommand {
    fn run(&mut self) -> ExitResult<()> {
        for input in &self.inputs {
            let summary = match CaptureReader::open(input).and_then(|mut r| summarize(input, &mut r))
            {
                Ok(s) => s,
                Err(e) => return ExitResult::err_from(e, 1),
            };
            match serde_json::to_string(&summary) {
                Ok(serialized) => println!("{}", serialized),
                Err(e) => return ExitResult::err_from(e, 1),
            }
        }
        ExitResult::Ok(())
    }
}
