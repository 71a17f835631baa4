use super::section::Section;
use crate::log::LogLevel::LogDebug;
use flate2::bufread::MultiGzDecoder;
use nix::unistd::dup;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    os::unix::io::{FromRawFd, RawFd},
    path::Path,
};
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Header words that mark alignment padding between records.
const PADDING: u32 = 0xffff_ffff;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("error reading capture: {0}")]
    Io(#[from] io::Error),
    #[error("record of type {raw_type} at offset {offset} has negative length {len}")]
    NegativeLength { raw_type: u32, len: i32, offset: u64 },
    #[error("record of type {raw_type} at offset {offset} needs {expected} bytes, only {got} present")]
    Truncated {
        raw_type: u32,
        expected: usize,
        got: usize,
        offset: u64,
    },
    #[error("truncated record header at offset {0}")]
    TruncatedHeader(u64),
}

/// CaptureReader opens a capture file (optionally gzip compressed) and
/// yields its records one at a time.
pub struct CaptureReader {
    input: Box<dyn BufRead>,
    /// Position in the (decompressed) stream.
    offset: u64,
    compressed: bool,
    eof: bool,
}

impl CaptureReader {
    /// `-` means standard input.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<CaptureReader, CaptureError> {
        let path = path.as_ref();
        if path == Path::new("-") {
            let fd = dup(libc::STDIN_FILENO).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            return CaptureReader::from_fd(fd);
        }
        let f = File::open(path)?;
        CaptureReader::from_reader(f)
    }

    /// Takes ownership of `fd`.
    pub fn from_fd(fd: RawFd) -> Result<CaptureReader, CaptureError> {
        let f = unsafe { File::from_raw_fd(fd) };
        CaptureReader::from_reader(f)
    }

    pub fn from_reader<R: Read + 'static>(r: R) -> Result<CaptureReader, CaptureError> {
        let mut raw = BufReader::new(r);
        let compressed = raw.fill_buf()?.starts_with(&GZIP_MAGIC);
        let input: Box<dyn BufRead> = if compressed {
            log!(LogDebug, "capture is gzip compressed");
            Box::new(BufReader::new(MultiGzDecoder::new(raw)))
        } else {
            Box::new(raw)
        };
        Ok(CaptureReader {
            input,
            offset: 0,
            compressed,
            eof: false,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Bytes of (decompressed) stream consumed so far, padding included.
    pub fn bytes_consumed(&self) -> u64 {
        self.offset
    }

    /// The next record, or `None` at a clean end of stream.
    pub fn next_section(&mut self) -> Result<Option<Section>, CaptureError> {
        loop {
            if self.eof {
                return Ok(None);
            }
            let header_offset = self.offset;
            let mut header = [0u8; 8];
            let n = read_full(&mut self.input, &mut header)?;
            self.offset += n as u64;
            if n == 0 {
                self.eof = true;
                return Ok(None);
            }
            if n < header.len() {
                self.eof = true;
                return Err(CaptureError::TruncatedHeader(header_offset));
            }

            let raw_type = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let raw_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if raw_type == PADDING && raw_len == PADDING {
                continue;
            }
            let len = raw_len as i32;
            if len < 0 {
                self.eof = true;
                return Err(CaptureError::NegativeLength {
                    raw_type,
                    len,
                    offset: header_offset,
                });
            }

            let len = len as usize;
            // Grows with what is actually read, not with the declared length.
            let mut payload = Vec::new();
            let got = (&mut self.input)
                .take(len as u64)
                .read_to_end(&mut payload)?;
            self.offset += got as u64;
            if got < len {
                self.eof = true;
                return Err(CaptureError::Truncated {
                    raw_type,
                    expected: len,
                    got,
                    offset: header_offset,
                });
            }
            let section = Section::new(raw_type, payload);
            if is_logging!(LogDebug) {
                let name = section.section_type().map_or("unknown", |t| t.name());
                log!(LogDebug, "{} record, {} bytes at {:#x}", name, len, header_offset);
            }
            return Ok(Some(section));
        }
    }

    pub fn sections(&mut self) -> Sections<'_> {
        Sections { reader: self }
    }
}

pub struct Sections<'a> {
    reader: &'a mut CaptureReader,
}

impl<'a> Iterator for Sections<'a> {
    type Item = Result<Section, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_section().transpose()
    }
}

/// Like `read_exact` but reports how much was read before end of stream.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
