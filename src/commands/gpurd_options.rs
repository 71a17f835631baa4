use crate::decode::{
    options::{QueryMode, SubmitRange},
    registers::parse_number,
};
use std::{error::Error, path::PathBuf};
use structopt::{clap, clap::AppSettings, StructOpt};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "gpurd",
    about = "Decode and replay freedreno GPU command stream captures",
    after_help = "Use GPURD_LOG to control logging; e.g. GPURD_LOG=all:warn,replay_session:debug"
)]
#[structopt(global_settings = &[AppSettings::UnifiedHelpMessage])]
pub struct GpuRdOptions {
    /// Gpu id to assume when a capture records neither a gpu id nor a chip
    /// id, e.g. 630.
    #[structopt(long, global = true, parse(try_from_str = parse_u32))]
    pub gpu_id: Option<u32>,

    #[structopt(subcommand)]
    pub cmd: GpuRdSubCommand,
}

#[derive(StructOpt, Debug, Clone)]
pub enum GpuRdSubCommand {
    /// Print the command streams of one or more captures as text
    #[structopt(name = "dump")]
    Dump {
        /// Hex dump every packet
        #[structopt(short = "v", long)]
        verbose: bool,

        /// Force colored output
        #[structopt(long, conflicts_with = "no-color")]
        color: bool,

        /// Never color output. By default output is colored when stdout is a tty
        #[structopt(long)]
        no_color: bool,

        /// Pipe output through `less -R`
        #[structopt(long)]
        pager: bool,

        /// Only decode frame <frame>
        #[structopt(long, parse(try_from_str = parse_u32))]
        frame: Option<u32>,

        /// Only print draw <draw>
        #[structopt(long, parse(try_from_str = parse_u32))]
        draw: Option<u32>,

        /// Only decode submits <first> to <last> inclusive, e.g. `3` or `3-10`
        #[structopt(long, parse(try_from_str = parse_submit_range))]
        submit: Option<SubmitRange>,

        /// Only decode submits from processes whose name starts with <exe>
        #[structopt(long)]
        exe: Option<String>,

        /// At each draw print only these registers. A register name, an
        /// offset or a regular expression over names. May be repeated
        #[structopt(long, number_of_values = 1)]
        query: Vec<String>,

        /// Which queried registers to print: `all`, `written` or `delta`
        #[structopt(long, default_value = "all")]
        query_mode: QueryMode,

        /// Print a summary of the registers rewritten at each draw
        #[structopt(long)]
        summary: bool,

        /// With --summary, print all written registers at each draw
        #[structopt(long)]
        allregs: bool,

        /// Decode each indirect buffer only the first time it is seen
        #[structopt(long)]
        once: bool,

        /// Decode CP_NOP payloads as marker strings
        #[structopt(long)]
        markers: bool,

        /// Feed decode events as JSON lines to the program at <script>
        #[structopt(long, parse(from_os_str))]
        script: Option<PathBuf>,

        /// JSON register database used to name registers
        #[structopt(long, parse(from_os_str))]
        regdb: Option<PathBuf>,

        /// Capture files, `-` for stdin. May be gzip compressed
        #[structopt(required = true, parse(from_os_str))]
        inputs: Vec<PathBuf>,
    },

    /// Turn the command streams of a capture into replayable source
    #[structopt(name = "decompile")]
    Decompile {
        /// Only decompile submits <first> to <last> inclusive
        #[structopt(long, parse(try_from_str = parse_submit_range))]
        submit: Option<SubmitRange>,

        /// Only decompile submits from processes whose name starts with <exe>
        #[structopt(long)]
        exe: Option<String>,

        /// Only decompile frame <frame>
        #[structopt(long, parse(try_from_str = parse_u32))]
        frame: Option<u32>,

        #[structopt(required = true, parse(from_os_str))]
        inputs: Vec<PathBuf>,
    },

    /// Resubmit the command streams of captures to the local GPU
    #[structopt(name = "replay")]
    Replay {
        /// Only replay submits from processes whose name starts with <exe>
        #[structopt(long)]
        exe: Option<String>,

        /// Replace submit <override> with the output of --generator
        #[structopt(
            long = "override",
            requires = "generator",
            parse(try_from_str = parse_u32)
        )]
        override_submit: Option<u32>,

        /// Program invoked as `<generator> <output> <scratch-iova> <scratch-size>`
        /// to write a replacement capture fragment
        #[structopt(long, parse(from_os_str))]
        generator: Option<PathBuf>,

        /// First submit to issue
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        first: u32,

        /// Last submit to issue
        #[structopt(long, default_value = "4294967295", parse(try_from_str = parse_u32))]
        last: u32,

        /// Directory write buffers are dumped into, one subdirectory per process
        #[structopt(long, default_value = ".", parse(from_os_str))]
        output_dir: PathBuf,

        #[structopt(required = true, parse(from_os_str))]
        inputs: Vec<PathBuf>,
    },

    /// Summarize captures in JSON format.
    #[structopt(name = "info")]
    Info {
        #[structopt(required = true, parse(from_os_str))]
        inputs: Vec<PathBuf>,
    },
}

fn parse_u32(s: &str) -> Result<u32, Box<dyn Error>> {
    match parse_number(s) {
        Some(n) => Ok(n),
        None => Err(Box::new(clap::Error::with_description(
            &format!("`{}' is not a decimal or 0x prefixed hex number", s),
            clap::ErrorKind::InvalidValue,
        ))),
    }
}

fn parse_submit_range(range_or_single: &str) -> Result<SubmitRange, Box<dyn Error>> {
    let args: Vec<&str> = range_or_single.splitn(2, '-').collect();
    let first = parse_u32(args[0])?;
    let last = if args.len() == 2 {
        parse_u32(args[1])?
    } else {
        first
    };
    if last < first {
        return Err(Box::new(clap::Error::with_description(
            "The end of a submit range cannot come before its start",
            clap::ErrorKind::InvalidValue,
        )));
    }
    Ok(SubmitRange { first, last })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn test_parse_submit_range() {
        assert_eq!(
            parse_submit_range("3").unwrap(),
            SubmitRange { first: 3, last: 3 }
        );
        assert_eq!(
            parse_submit_range("3-0x10").unwrap(),
            SubmitRange { first: 3, last: 16 }
        );
        assert!(parse_submit_range("5-2").is_err());
        assert!(parse_submit_range("x").is_err());
    }

    #[test]
    pub fn test_dump_options() {
        let options = GpuRdOptions::from_iter_safe(&[
            "gpurd",
            "--gpu-id",
            "630",
            "dump",
            "--query",
            "RB_.*",
            "--query",
            "0x8801",
            "--query-mode",
            "delta",
            "--submit",
            "1-2",
            "a.rd",
            "b.rd.gz",
        ])
        .unwrap();
        assert_eq!(options.gpu_id, Some(630));
        match options.cmd {
            GpuRdSubCommand::Dump {
                query,
                query_mode,
                submit,
                inputs,
                ..
            } => {
                assert_eq!(query, vec!["RB_.*", "0x8801"]);
                assert_eq!(query_mode, QueryMode::Delta);
                assert_eq!(submit, Some(SubmitRange { first: 1, last: 2 }));
                assert_eq!(inputs.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    pub fn test_override_requires_generator() {
        let missing = &["gpurd", "replay", "--override", "3", "a.rd"];
        assert!(GpuRdOptions::from_iter_safe(missing).is_err());
        assert!(GpuRdOptions::from_iter_safe(&[
            "gpurd",
            "replay",
            "--override",
            "3",
            "--generator",
            "./gen",
            "a.rd"
        ])
        .is_ok());
    }
}
