use nix::{
    sys::stat::Mode,
    unistd::{access, isatty, sysconf, AccessFlags, SysconfVar::PAGE_SIZE},
};
use std::{
    convert::TryInto,
    env,
    ffi::OsString,
    fs,
    io,
    os::unix::fs::DirBuilderExt,
    path::Path,
};

lazy_static! {
    static ref SYSTEM_PAGE_SIZE: usize = page_size_init();
}

fn page_size_init() -> usize {
    match sysconf(PAGE_SIZE) {
        Ok(Some(sz)) => sz.try_into().unwrap_or(4096),
        _ => 4096,
    }
}

pub fn page_size() -> usize {
    *SYSTEM_PAGE_SIZE
}

pub fn ceil_page_size(size: u64) -> u64 {
    align_up(size, page_size() as u64)
}

/// `alignment` must be a power of two.
pub fn align_up(v: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (v + alignment - 1) & !(alignment - 1)
}

/// `alignment` must be a power of two.
pub fn align_down(v: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    v & !(alignment - 1)
}

pub fn stdout_is_tty() -> bool {
    isatty(libc::STDOUT_FILENO).unwrap_or(false)
}

/// Returns $GPURD_TMPDIR, $TMPDIR or "/tmp". We call ensure_dir to make sure
/// the directory exists and is writeable.
pub fn tmp_dir() -> io::Result<OsString> {
    for var in &["GPURD_TMPDIR", "TMPDIR"] {
        if let Ok(dir) = env::var(var) {
            ensure_dir(Path::new(&dir), Mode::S_IRWXU)?;
            return Ok(OsString::from(dir));
        }
    }

    // Don't try to create "/tmp", that probably won't work well.
    if access("/tmp", AccessFlags::W_OK).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "Can't write to temporary file directory /tmp",
        ));
    }

    Ok(OsString::from("/tmp"))
}

/// Create directory `dir`, creating parent directories as needed. Fails if
/// the resulting directory is not writeable.
pub fn ensure_dir(dir: &Path, mode: Mode) -> io::Result<()> {
    if !dir.is_dir() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode.bits())
            .create(dir)?;
    }
    if access(dir, AccessFlags::W_OK).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{:?} is not writeable", dir),
        ));
    }
    Ok(())
}
