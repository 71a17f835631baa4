use std::{path::PathBuf, str::FromStr};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum QueryMode {
    /// Print queried registers at every draw.
    All,
    /// Only once a register has been written.
    Written,
    /// Only when a register changed since the previous draw.
    Delta,
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(QueryMode::All),
            "written" => Ok(QueryMode::Written),
            "delta" => Ok(QueryMode::Delta),
            _ => Err(format!(
                "Unknown query mode `{}'. Expected one of all, written, delta",
                s
            )),
        }
    }
}

/// Inclusive range of submit indices.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SubmitRange {
    pub first: u32,
    pub last: u32,
}

impl SubmitRange {
    pub fn contains(&self, submit: u32) -> bool {
        self.first <= submit && submit <= self.last
    }
}

/// Everything that shapes a decode run. Built once from the command line and
/// passed by reference to each per-file session.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Used when the capture carries neither a gpu id nor a chip id.
    pub gpu_id: Option<u32>,
    pub verbose: bool,
    pub color: bool,
    pub frame: Option<u32>,
    pub draw: Option<u32>,
    pub submit: Option<SubmitRange>,
    pub exe: Option<String>,
    pub query: Vec<String>,
    pub query_mode: QueryMode,
    pub summary: bool,
    pub allregs: bool,
    /// Decode each indirect buffer only the first time it is seen.
    pub once: bool,
    pub markers: bool,
    pub script: Option<PathBuf>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            gpu_id: None,
            verbose: false,
            color: false,
            frame: None,
            draw: None,
            submit: None,
            exe: None,
            query: Vec::new(),
            query_mode: QueryMode::All,
            summary: false,
            allregs: false,
            once: false,
            markers: false,
            script: None,
        }
    }
}

impl DecodeOptions {
    pub fn is_query(&self) -> bool {
        !self.query.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn test_query_mode() {
        assert_eq!("delta".parse::<QueryMode>(), Ok(QueryMode::Delta));
        assert!("changed".parse::<QueryMode>().is_err());
    }

    #[test]
    pub fn test_submit_range() {
        let r = SubmitRange { first: 2, last: 4 };
        assert!(!r.contains(1));
        assert!(r.contains(2));
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }
}
