use exit_result::ExitResult;

pub mod decompile_command;
pub mod dump_command;
pub mod exit_result;
pub mod gpurd_options;
pub mod info_command;
pub mod replay_command;

pub trait RdCommand {
    fn run(&mut self) -> ExitResult<()>;
}
