use nix::{
    fcntl::{open, OFlag},
    sys::stat::Mode,
    unistd::close,
    NixPath,
};
use std::os::unix::io::RawFd;

/// Device file descriptor closed on drop. Not Copy or Clone because of the
/// Drop.
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn open_path<P: ?Sized + NixPath>(path: &P, oflag: OFlag) -> nix::Result<Self> {
        let fd = open(path, oflag, Mode::empty())?;
        Ok(ScopedFd { fd })
    }

    pub fn as_raw(&self) -> RawFd {
        self.fd
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // Nothing useful to do about a failed close of a device fd.
            close(self.fd).unwrap_or(());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg};

    #[test]
    pub fn test_open_path() {
        let fd = ScopedFd::open_path("/dev/null", OFlag::O_RDONLY | OFlag::O_CLOEXEC).unwrap();
        let flags = fcntl(fd.as_raw(), FcntlArg::F_GETFD).unwrap();
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
        assert!(ScopedFd::open_path("/nonexistent/gpurd", OFlag::O_RDONLY).is_err());
    }
}
