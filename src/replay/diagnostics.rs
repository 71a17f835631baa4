//! Readback of the log and write buffers a capture declares, after each
//! submit.

use crate::util::ensure_dir;
use nix::sys::stat::Mode;
use std::{
    convert::TryInto,
    fs,
    io::{self, Write},
    path::Path,
};

/// The shader log starts with the GPU address of the next free entry.
const SHADER_LOG_HEADER: usize = 8;
/// The CP log header is `{cur_iova, tmp, first_entry_size}`.
const CP_LOG_FIRST_ENTRY: usize = 16;

fn u64_at(bytes: &[u8], offset: usize) -> Option<u64> {
    let b = bytes.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(b.try_into().ok()?))
}

fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(b.try_into().ok()?))
}

fn put_u64(bytes: &mut [u8], offset: usize, v: u64) {
    if let Some(b) = bytes.get_mut(offset..offset + 8) {
        b.copy_from_slice(&v.to_le_bytes());
    }
}

/// Print the entries shaders appended to the log at `log_iova` (mapped as
/// `log`), then rewind the log. Returns the number of entries printed.
pub fn print_shader_log(log: &mut [u8], log_iova: u64, out: &mut dyn Write) -> io::Result<usize> {
    let cur_iova = match u64_at(log, 0) {
        Some(v) => v,
        None => return Ok(0),
    };
    let first = log_iova + SHADER_LOG_HEADER as u64;
    let available = (log.len().saturating_sub(SHADER_LOG_HEADER) / 4) as u64;
    let count = (cur_iova.saturating_sub(first) / 4).min(available) as usize;

    writeln!(out, "Shader Log Entries: {}", count)?;
    for i in 0..count {
        let raw = u32_at(log, SHADER_LOG_HEADER + i * 4).unwrap_or(0);
        writeln!(out, "[{}] {:08x} {:.4}", i, raw, f32::from_bits(raw))?;
    }
    writeln!(out, "========================================")?;

    put_u64(log, 0, first);
    Ok(count)
}

/// Print the CP log at `log_iova`: a chain of `{size: u64, data}` entries
/// starting at the header's third word and ending at a zero size.
pub fn print_cp_log(log: &mut [u8], log_iova: u64, out: &mut dyn Write) -> io::Result<usize> {
    let mut offset = CP_LOG_FIRST_ENTRY;
    let mut idx = 0;
    while let Some(size) = u64_at(log, offset) {
        if size == 0 {
            break;
        }
        let data = offset + 8;
        let dwords = (size / 4) as usize;
        writeln!(out, "CP Log [{}]:", idx)?;
        for i in 0..dwords {
            let v = match u32_at(log, data + i * 4) {
                Some(v) => v,
                None => break,
            };
            if i % 8 == 0 {
                write!(out, "\t")?;
            }
            write!(out, "{:08x} ", v)?;
            if i % 8 == 7 {
                writeln!(out)?;
            }
        }
        writeln!(out)?;
        idx += 1;
        offset = match (data as u64).checked_add(size) {
            Some(next) if next < log.len() as u64 => next as usize,
            _ => break,
        };
    }

    if idx > 0 {
        put_u64(log, 0, log_iova + CP_LOG_FIRST_ENTRY as u64);
        put_u64(log, CP_LOG_FIRST_ENTRY, 0);
    }
    Ok(idx)
}

/// Write `bytes` to `dir/exe/name`. Only the last path component of `name`
/// is used.
pub fn dump_write_buffer(dir: &Path, exe: &str, name: &str, bytes: &[u8]) -> io::Result<()> {
    let file_name = Path::new(name).file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bad write buffer name {:?}", name),
        )
    })?;
    let exe_dir = dir.join(exe);
    ensure_dir(&exe_dir, Mode::S_IRWXU)?;
    fs::write(exe_dir.join(file_name), bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn test_shader_log() {
        let iova = 0x8000u64;
        let mut log = vec![0u8; 64];
        put_u64(&mut log, 0, iova + 8 + 2 * 4);
        log[8..12].copy_from_slice(&0x3f80_0000u32.to_le_bytes());
        log[12..16].copy_from_slice(&7u32.to_le_bytes());

        let mut out = Vec::new();
        assert_eq!(print_shader_log(&mut log, iova, &mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[0] 3f800000 1.0000\n"));
        assert!(text.contains("[1] 00000007 "));
        // Rewound to the first entry.
        assert_eq!(u64_at(&log, 0), Some(iova + 8));

        let mut out = Vec::new();
        assert_eq!(print_shader_log(&mut log, iova, &mut out).unwrap(), 0);
    }

    #[test]
    pub fn test_shader_log_count_is_bounded() {
        let mut log = vec![0u8; 16];
        put_u64(&mut log, 0, 0xffff_ffff);
        let mut out = Vec::new();
        assert_eq!(print_shader_log(&mut log, 0, &mut out).unwrap(), 2);
    }

    #[test]
    pub fn test_cp_log() {
        let iova = 0x4000u64;
        let mut log = vec![0u8; 128];
        put_u64(&mut log, 16, 8);
        log[24..28].copy_from_slice(&0xaau32.to_le_bytes());
        log[28..32].copy_from_slice(&0xbbu32.to_le_bytes());
        put_u64(&mut log, 32, 4);
        log[40..44].copy_from_slice(&0xccu32.to_le_bytes());

        let mut out = Vec::new();
        assert_eq!(print_cp_log(&mut log, iova, &mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "CP Log [0]:\n\t000000aa 000000bb \nCP Log [1]:\n\t000000cc \n"
        );
        assert_eq!(u64_at(&log, 0), Some(iova + 16));
        assert_eq!(u64_at(&log, 16), Some(0));
    }

    #[test]
    pub fn test_dump_write_buffer() {
        let dir = tempfile::tempdir().unwrap();
        dump_write_buffer(dir.path(), "vkcube", "../color.bin", &[1, 2, 3]).unwrap();
        let written = fs::read(dir.path().join("vkcube").join("color.bin")).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
    }
}
