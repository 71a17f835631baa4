//! Runs the external program that produces replacement command streams.

use crate::{
    log::LogLevel::{LogDebug, LogWarn},
    trace::{
        capture_reader::{CaptureError, CaptureReader},
        section::Section,
    },
    util::tmp_dir,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("cannot run {path:?}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("{path:?} exited with {status}")]
    ExitStatus { path: PathBuf, status: ExitStatus },
    #[error("cannot parse generated capture: {0}")]
    Parse(#[from] CaptureError),
    #[error("generated capture has no command stream")]
    NoCommandStream,
}

/// Where the generator is asked to write its capture fragment.
pub fn fragment_path() -> io::Result<PathBuf> {
    let mut path = PathBuf::from(tmp_dir()?);
    path.push(format!("gpurd-override-{}.rd", std::process::id()));
    Ok(path)
}

/// Run `generator output scratch_iova scratch_size` and read back the
/// records it wrote. The generator must keep its buffers inside the scratch
/// range.
pub fn generate(
    generator: &Path,
    output: &Path,
    scratch_iova: u64,
    scratch_size: u64,
) -> Result<Vec<Section>, GeneratorError> {
    log!(
        LogDebug,
        "Running {:?} {:?} {:#x} {:#x}",
        generator,
        output,
        scratch_iova,
        scratch_size
    );
    let status = Command::new(generator)
        .arg(output)
        .arg(format!("{:#x}", scratch_iova))
        .arg(format!("{:#x}", scratch_size))
        .status()
        .map_err(|source| GeneratorError::Spawn {
            path: generator.to_owned(),
            source,
        })?;
    if !status.success() {
        return Err(GeneratorError::ExitStatus {
            path: generator.to_owned(),
            status,
        });
    }

    let sections = read_fragment(output);
    if let Err(e) = fs::remove_file(output) {
        log!(LogWarn, "Couldn't remove {:?}: {}", output, e);
    }
    sections
}

fn read_fragment(path: &Path) -> Result<Vec<Section>, GeneratorError> {
    let mut reader = CaptureReader::open(path)?;
    let sections = reader.sections().collect::<Result<Vec<_>, _>>()?;
    Ok(sections)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::trace::{capture_writer::CaptureWriter, section::SectionType};
    use std::{fs::File, io::Write, os::unix::fs::PermissionsExt};

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("gen.sh");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{}", body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    pub fn test_generate_reads_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("fixture.rd");
        let mut w = CaptureWriter::new(File::create(&fixture).unwrap());
        w.write_buffer_dwords(0x10_0000, &[0x1234, 0x5678]).unwrap();
        w.write_cmdstream(0x10_0000, 2).unwrap();
        drop(w.into_inner());

        // Checks it was passed the scratch range, then writes the fixture.
        let gen = script(
            dir.path(),
            &format!(
                "[ \"$2\" = 0x100000 ] && [ \"$3\" = 0x2000000 ] && cp {:?} \"$1\"",
                fixture
            ),
        );
        let out = dir.path().join("out.rd");
        let sections = generate(&gen, &out, 0x10_0000, 0x200_0000).unwrap();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[2].section_type(), Some(SectionType::CmdstreamAddr));
        assert!(!out.exists());
    }

    #[test]
    pub fn test_generator_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gen = script(dir.path(), "exit 3");
        let out = dir.path().join("out.rd");
        match generate(&gen, &out, 0, 0x1000) {
            Err(GeneratorError::ExitStatus { status, .. }) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected {:?}", other.map(|s| s.len())),
        }

        let missing = dir.path().join("does-not-exist");
        assert!(matches!(
            generate(&missing, &out, 0, 0x1000),
            Err(GeneratorError::Spawn { .. })
        ));
    }
}
