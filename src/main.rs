#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

#[macro_use]
mod log;
mod address_space;
mod commands;
mod decode;
mod replay;
mod scoped_fd;
mod trace;
mod util;

use crate::commands::{
    decompile_command::DecompileCommand,
    dump_command::DumpCommand,
    gpurd_options::{GpuRdOptions, GpuRdSubCommand},
    info_command::InfoCommand,
    replay_command::ReplayCommand,
    RdCommand,
};
use structopt::StructOpt;

fn main() {
    let options = GpuRdOptions::from_args();

    let result = match &options.cmd {
        GpuRdSubCommand::Dump { .. } => DumpCommand::new(&options).run(),
        GpuRdSubCommand::Decompile { .. } => DecompileCommand::new(&options).run(),
        GpuRdSubCommand::Replay { .. } => ReplayCommand::new(&options).run(),
        GpuRdSubCommand::Info { .. } => InfoCommand::new(&options).run(),
    };
    std::process::exit(result.report());
}
