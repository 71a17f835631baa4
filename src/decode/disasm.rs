use super::pm4::ShaderStage;
use std::io::{self, Write};

/// Renders shader instruction words for the text output.
pub trait ShaderDisassembler {
    fn disassemble(
        &mut self,
        gen: u32,
        stage: ShaderStage,
        code: &[u32],
        indent: &str,
        out: &mut dyn Write,
    ) -> io::Result<()>;
}

/// Prints instructions as rows of hex dwords, two 64-bit instructions
/// per row.
pub struct HexDisassembler;

impl ShaderDisassembler for HexDisassembler {
    fn disassemble(
        &mut self,
        _gen: u32,
        _stage: ShaderStage,
        code: &[u32],
        indent: &str,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        for (i, row) in code.chunks(4).enumerate() {
            write!(out, "{}{:04x}:", indent, i * 2)?;
            for pair in row.chunks(2) {
                write!(out, " ")?;
                for w in pair.iter().rev() {
                    write!(out, "{:08x}", w)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn test_hex_rows() {
        let mut out = Vec::new();
        let code = [1, 2, 3, 4, 5];
        HexDisassembler
            .disassemble(6, ShaderStage::Fragment, &code, "\t", &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\t0000: 0000000200000001 0000000400000003\n\t0002: 00000005\n"
        );
    }
}
