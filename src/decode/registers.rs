//! Register shadow state and symbolic register naming.

use crate::log::LogLevel::LogWarn;
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::Path,
};

/// Number of register offsets we shadow.
pub const REG_COUNT: usize = 0x10000;

struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn new(bits: usize) -> BitSet {
        BitSet {
            words: vec![0; (bits + 63) / 64],
        }
    }

    fn get(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    fn clear(&mut self) {
        for w in self.words.iter_mut() {
            *w = 0;
        }
    }
}

/// Shadow of every register value written by the command stream so far.
pub struct RegisterState {
    vals: Vec<u32>,
    /// Value at the previous draw.
    lastvals: Vec<u32>,
    written: BitSet,
    /// Written since the previous draw.
    rewritten: BitSet,
    warned_range: bool,
}

impl Default for RegisterState {
    fn default() -> Self {
        RegisterState::new()
    }
}

impl RegisterState {
    pub fn new() -> RegisterState {
        RegisterState {
            vals: vec![0; REG_COUNT],
            lastvals: vec![0; REG_COUNT],
            written: BitSet::new(REG_COUNT),
            rewritten: BitSet::new(REG_COUNT),
            warned_range: false,
        }
    }

    pub fn write(&mut self, reg: u32, val: u32) {
        let r = reg as usize;
        if r >= REG_COUNT {
            if !self.warned_range {
                log!(LogWarn, "register offset {:#x} is out of range", reg);
                self.warned_range = true;
            }
            return;
        }
        self.vals[r] = val;
        self.written.set(r);
        self.rewritten.set(r);
    }

    pub fn val(&self, reg: u32) -> u32 {
        self.vals.get(reg as usize).copied().unwrap_or(0)
    }

    pub fn last_val(&self, reg: u32) -> u32 {
        self.lastvals.get(reg as usize).copied().unwrap_or(0)
    }

    pub fn is_written(&self, reg: u32) -> bool {
        (reg as usize) < REG_COUNT && self.written.get(reg as usize)
    }

    pub fn is_rewritten(&self, reg: u32) -> bool {
        (reg as usize) < REG_COUNT && self.rewritten.get(reg as usize)
    }

    pub fn changed_since_draw(&self, reg: u32) -> bool {
        self.val(reg) != self.last_val(reg)
    }

    /// Registers written at any point, in offset order.
    pub fn written_regs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..REG_COUNT as u32).filter(move |r| self.written.get(*r as usize))
    }

    /// Registers written since the previous draw, in offset order.
    pub fn rewritten_regs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..REG_COUNT as u32).filter(move |r| self.rewritten.get(*r as usize))
    }

    /// Snapshot the current values as the "previous draw" baseline.
    pub fn end_draw(&mut self) {
        self.lastvals.copy_from_slice(&self.vals);
        self.rewritten.clear();
    }

    pub fn reset(&mut self) {
        for v in self.vals.iter_mut().chain(self.lastvals.iter_mut()) {
            *v = 0;
        }
        self.written.clear();
        self.rewritten.clear();
    }
}

/// Translates register offsets to symbolic names.
pub trait RegisterDatabase {
    fn name(&self, reg: u32) -> Option<&str>;
    fn lookup(&self, name: &str) -> Option<u32>;
    /// Every known (name, offset) pair.
    fn entries(&self) -> Vec<(&str, u32)>;
}

/// Knows no names; registers print as offsets.
pub struct NumericRegisters;

impl RegisterDatabase for NumericRegisters {
    fn name(&self, _reg: u32) -> Option<&str> {
        None
    }

    fn lookup(&self, _name: &str) -> Option<u32> {
        None
    }

    fn entries(&self) -> Vec<(&str, u32)> {
        Vec::new()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegOffset {
    Number(u32),
    Text(String),
}

#[derive(Deserialize)]
struct RegDbFile {
    registers: BTreeMap<String, RegOffset>,
}

/// A register database loaded from a JSON file of the form
/// `{"registers": {"RB_RENDER_CNTL": "0x8801", ...}}`.
pub struct JsonRegisterDatabase {
    by_name: HashMap<String, u32>,
    by_offset: HashMap<u32, String>,
}

impl JsonRegisterDatabase {
    pub fn load(path: &Path) -> io::Result<JsonRegisterDatabase> {
        let text = fs::read_to_string(path)?;
        JsonRegisterDatabase::from_json(&text)
    }

    pub fn from_json(text: &str) -> io::Result<JsonRegisterDatabase> {
        let file: RegDbFile = serde_json::from_str(text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut by_name = HashMap::new();
        let mut by_offset = HashMap::new();
        for (name, off) in file.registers {
            let off = match off {
                RegOffset::Number(n) => n,
                RegOffset::Text(t) => parse_number(&t).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("bad offset `{}' for register {}", t, name),
                    )
                })?,
            };
            by_offset.entry(off).or_insert_with(|| name.clone());
            by_name.insert(name, off);
        }
        Ok(JsonRegisterDatabase { by_name, by_offset })
    }
}

impl RegisterDatabase for JsonRegisterDatabase {
    fn name(&self, reg: u32) -> Option<&str> {
        self.by_offset.get(&reg).map(|s| s.as_str())
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    fn entries(&self) -> Vec<(&str, u32)> {
        let mut v: Vec<(&str, u32)> = self.by_name.iter().map(|(n, o)| (n.as_str(), *o)).collect();
        v.sort_by_key(|e| e.1);
        v
    }
}

/// Decimal or `0x` prefixed hexadecimal.
pub fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Resolve a `--query` argument to register offsets. Accepts a number, an
/// exact register name, or a regular expression matched against whole names.
pub fn resolve_query(db: &dyn RegisterDatabase, query: &str) -> Vec<u32> {
    if let Some(n) = parse_number(query) {
        return vec![n];
    }
    if let Some(n) = db.lookup(query) {
        return vec![n];
    }
    let re = match Regex::new(&format!("^(?:{})$", query)) {
        Ok(re) => re,
        Err(e) => {
            log!(LogWarn, "Ignoring bad register query `{}': {}", query, e);
            return Vec::new();
        }
    };
    let found: Vec<u32> = db
        .entries()
        .into_iter()
        .filter(|(name, _)| re.is_match(name))
        .map(|(_, off)| off)
        .collect();
    if found.is_empty() {
        log!(LogWarn, "No register matches `{}'", query);
    }
    found
}

#[cfg(test)]
mod test {
    use super::*;

    const DB: &str = r#"{"registers": {
        "RB_RENDER_CNTL": "0x8801",
        "RB_DEPTH_CNTL": 34944,
        "SP_FS_CTRL_REG0": "0xa980"
    }}"#;

    #[test]
    pub fn test_register_state() {
        let mut r = RegisterState::new();
        r.write(0x8801, 5);
        r.write(0x20000, 1);
        assert!(r.is_written(0x8801));
        assert!(r.is_rewritten(0x8801));
        assert!(!r.is_written(0x20000));
        assert!(r.changed_since_draw(0x8801));
        r.end_draw();
        assert!(!r.is_rewritten(0x8801));
        assert!(r.is_written(0x8801));
        assert_eq!(r.last_val(0x8801), 5);
        r.write(0x8801, 5);
        assert!(!r.changed_since_draw(0x8801));
        assert_eq!(r.rewritten_regs().collect::<Vec<_>>(), vec![0x8801]);
        r.reset();
        assert_eq!(r.written_regs().count(), 0);
    }

    #[test]
    pub fn test_json_db() {
        let db = JsonRegisterDatabase::from_json(DB).unwrap();
        assert_eq!(db.name(0x8801), Some("RB_RENDER_CNTL"));
        assert_eq!(db.lookup("RB_DEPTH_CNTL"), Some(0x8880));
        assert_eq!(db.entries().first().map(|e| e.1), Some(0x8801));
        assert!(JsonRegisterDatabase::from_json(r#"{"registers": {"X": "zz"}}"#).is_err());
    }

    #[test]
    pub fn test_resolve_query() {
        let db = JsonRegisterDatabase::from_json(DB).unwrap();
        assert_eq!(resolve_query(&db, "0x10"), vec![0x10]);
        assert_eq!(resolve_query(&db, "RB_RENDER_CNTL"), vec![0x8801]);
        let mut rb = resolve_query(&db, "RB_.*");
        rb.sort();
        assert_eq!(rb, vec![0x8801, 0x8880]);
        assert!(resolve_query(&db, "RB_").is_empty());
        assert!(resolve_query(&NumericRegisters, "FOO").is_empty());
    }
}
