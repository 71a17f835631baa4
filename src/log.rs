use backtrace::Backtrace;
use nix::errno::{errno, Errno};
use std::{
    collections::HashMap,
    env,
    env::var_os,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Result, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

#[derive(Clone)]
struct LogModule {
    name: String,
    level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    log_modules_cache: HashMap<String, LogModule>,
    /// Possibly buffered
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
}

extern "C" fn flush_log_buffer() {
    let mut maybe_log_lock = LOG_GLOBALS.lock();
    match &mut maybe_log_lock {
        Ok(lock) => {
            lock.log_file.flush().unwrap_or(());
        }
        Err(e) => panic!(
            "Could not obtain lock on gpurd log. Can't flush log buffer: {:?}",
            e
        ),
    };
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let maybe_filename = var_os("GPURD_LOG_FILE");
        let maybe_append_filename = var_os("GPURD_APPEND_LOG_FILE");
        let mut f: Box<dyn Write + Sync + Send>;
        if let Some(filename) = maybe_filename {
            f = Box::new(File::create(&filename).unwrap_or_else(|e| panic!("Error. Could not create filename `{:?}' specified in environment variable GPURD_LOG_FILE: {}", filename, e)));
        } else if let Some(append_filename) = maybe_append_filename {
            f = Box::new(OpenOptions::new().append(true).create(true).open(&append_filename).unwrap_or_else(|e| panic!("Error. Could not append to filename `{:?}' specified in env variable GPURD_APPEND_LOG_FILE: {}", append_filename, e)));
        } else {
            f = Box::new(io::stderr());
        }

        if let Ok(buf_size) = env::var("GPURD_LOG_BUFFER") {
            let log_buffer_size = buf_size.parse::<usize>().unwrap_or_else(|_| panic!("Error. Could not parse `{:?}' in environment var `GPURD_LOG_BUFFER' as a number", buf_size));
            f = Box::new(BufWriter::with_capacity(log_buffer_size, f));
        }

        let ret = unsafe {
            libc::atexit(flush_log_buffer)
        };
        assert_eq!(ret, 0);

        let (default_level, level_map) = match env::var("GPURD_LOG") {
            Ok(gpurd_log) => init_log_levels(&gpurd_log),
            Err(_) => (LogWarn, HashMap::new())
        };

        Mutex::new(LogGlobals {
            level_map,
            log_modules_cache: HashMap::new(),
            log_file: f,
            default_level,
        })
    };
}

fn log_level_string_to_level(log_level_string: &str) -> LogLevel {
    match log_level_string {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        "debug" => LogDebug,
        _ => LogWarn,
    }
}

fn init_log_levels(gpurd_log: &str) -> (LogLevel, HashMap<String, LogLevel>) {
    let mut hm: HashMap<String, LogLevel> = HashMap::new();
    let mut default_level = LogWarn;
    for mod_colon_level in gpurd_log.split(',') {
        let res: Vec<&str> = mod_colon_level.splitn(2, ':').collect();
        if res.len() == 2 {
            let mod_name = res[0].trim();
            let log_level_string = res[1].trim();
            if mod_name == "all" {
                default_level = log_level_string_to_level(log_level_string);
            } else {
                hm.insert(
                    mod_name.to_owned(),
                    log_level_string_to_level(log_level_string),
                );
            }
        }
    }
    (default_level, hm)
}

/// Given a module name, what is its log level?
fn get_log_level(module_name: &str, l: &MutexGuard<LogGlobals>) -> LogLevel {
    // We DONT lowercase here as filenames are usually case sensitive on Linux.
    match l.level_map.get(module_name) {
        Some(log_level) => *log_level,
        None => l.default_level,
    }
}

/// Given a filename what is the corresponding module name?
fn filename_to_module_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Given the filename get the corresponding LogModule.
fn get_log_module(filename: &str, l: &mut MutexGuard<LogGlobals>) -> LogModule {
    if let Some(log_module) = l.log_modules_cache.get(filename) {
        return log_module.to_owned();
    }

    let name = filename_to_module_name(filename);
    let level = get_log_level(&name, l);
    let m = LogModule { level, name };
    l.log_modules_cache.insert(filename.to_owned(), m.clone());
    m
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

pub struct NewLineTerminatingOstream {
    enabled: bool,
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        module_path: &str,
        always_enabled: bool,
    ) -> Option<NewLineTerminatingOstream> {
        // A poisoned lock only means another thread panicked mid-message.
        let mut lock = match LOG_GLOBALS.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        let m = get_log_module(filename, &mut lock);
        let enabled = always_enabled || level <= m.level;
        if enabled {
            let mut stream = NewLineTerminatingOstream {
                message: Vec::new(),
                enabled,
                lock,
            };
            if level == LogDebug {
                write!(stream, "[{}] ", m.name).unwrap_or(());
            } else {
                write_prefix(&mut stream, level, filename, line, module_path);
            }

            Some(stream)
        } else {
            None
        }
    }
}

/// Low level. Use is_logging!() macro instead.
pub fn is_logging(level: LogLevel, filename: &str, _line: u32, _func_name: &str) -> bool {
    let mut lock = match LOG_GLOBALS.lock() {
        Ok(lock) => lock,
        Err(poisoned) => poisoned.into_inner(),
    };
    let m = get_log_module(filename, &mut lock);
    level <= m.level
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        if self.enabled {
            self.write(b"\n").unwrap_or(0);
            // This flushes self.message *to* the log file but does NOT flush the
            // log file itself.
            self.flush().unwrap_or(());
        }
    }
}

impl Write for NewLineTerminatingOstream {
    /// Write the text stored in the `message` member to the log file.
    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() && self.enabled {
            self.lock.log_file.write_all(&self.message)?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.enabled {
            self.message.extend_from_slice(buf);
        }

        // Need to pretend these were written even if buffer was not enabled.
        // Otherwise we get a `WriteZero` error.
        Ok(buf.len())
    }
}

pub fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    filename: &str,
    line: u32,
    _module_path: &str,
) {
    write!(stream, "[{} {}:{}", log_name(level), filename, line).unwrap_or(());

    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {}", Errno::from_i32(err)).unwrap_or(());
    }
    write!(stream, "] ").unwrap_or(());
}

/// This is almost always not the method you want. Use log!() macro instead
pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
    always_enabled: bool,
) -> Option<NewLineTerminatingOstream> {
    NewLineTerminatingOstream::new(log_level, filename, line, module_path, always_enabled)
}

/// Outputs to (possibly write buffered) log file (or stderr if no log file was specified)
/// After this program continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            let maybe_stream = crate::log::log(
                $log_level,
                file!(),
                line!(),
                module_path!(),
                false
            );
            match maybe_stream {
                Some(mut stream) => write!(stream, $($args)+).unwrap_or(()),
                None => ()
            }
        }
    };
}

macro_rules! is_logging {
    ($log_level:expr) => {
        crate::log::is_logging($log_level, file!(), line!(), module_path!())
    };
}

/// Outputs to (possibly write buffered) log file (or stderr if no log file was specified)
/// Prints out the backtrace to stderr and aborts.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use std::io::Write;
                use crate::log::LogFatal;
                let maybe_stream = crate::log::log(
                    LogFatal,
                    file!(),
                    line!(),
                    module_path!(),
                    true
                );
                match maybe_stream {
                   Some(mut stream) => write!(stream, $($args)+).unwrap_or(()),
                   None => ()
                }
            }
            crate::log::notifying_abort(backtrace::Backtrace::new());
            unreachable!();
        }
    };
}

/// Output to stderr always. No backtrace -- simply exit.
macro_rules! clean_fatal {
    ($($args:tt)+) => {
        {
            use std::io::stderr;
            crate::log::write_prefix(&mut stderr(), crate::log::LogLevel::LogFatal, file!(), line!(), module_path!());
            eprintln!($($args)+);
            std::process::exit(1);
        }
    };
}

/// Dump the stacktrace and abort.
pub fn notifying_abort(bt: Backtrace) {
    flush_log_buffer();
    dump_gpurd_stack(bt);
    std::process::abort();
}

/// Write the backtrace to stderr.
fn dump_gpurd_stack(bt: Backtrace) {
    eprintln!("=== Start gpurd backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End gpurd backtrace");
}
