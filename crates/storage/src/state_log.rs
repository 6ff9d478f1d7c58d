//! Optional monitored-site transition log. Sites with `Site::monitor` set
//! have every select/merge disposition change appended here as a
//! human-auditable row, independent of the structured index/journal files.
//! Append-only, UTF-8 text, one row per line — deliberately simpler than
//! the binary formats elsewhere since this file exists to be read by a
//! person debugging one site.

use shepherd_core::footprint::Footprint;
use shepherd_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One state-log row: a footprint, the stage that produced it, an
/// action tag, and up to two stage-specific integer arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLogEntry {
    /// The affected URL's footprint.
    pub fp: Footprint,
    /// Stage name (`"merge"`, `"select"`, ...).
    pub source: String,
    /// Action tag (`"ok"`, `"sleep"`, `"discard"`, `"zombie"`, ...).
    pub action: String,
    /// First stage-specific argument (0 if unused).
    pub arg1: i64,
    /// Second stage-specific argument (0 if unused).
    pub arg2: i64,
}

fn format_entry(e: &StateLogEntry) -> String {
    format!(
        "{} {} {} {} {}\n",
        e.fp, e.source, e.action, e.arg1, e.arg2
    )
}

fn parse_entry(line: &str) -> Result<StateLogEntry> {
    let mut parts = line.split_whitespace();
    let fp_str = parts
        .next()
        .ok_or_else(|| Error::Corruption("state-log line missing footprint".into()))?;
    let fp = Footprint::parse_hex(fp_str)?;
    let source = parts
        .next()
        .ok_or_else(|| Error::Corruption("state-log line missing source".into()))?
        .to_string();
    let action = parts
        .next()
        .ok_or_else(|| Error::Corruption("state-log line missing action".into()))?
        .to_string();
    let arg1 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corruption("state-log line missing arg1".into()))?;
    let arg2 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corruption("state-log line missing arg2".into()))?;
    Ok(StateLogEntry {
        fp,
        source,
        action,
        arg1,
        arg2,
    })
}

/// An append-only state-transition log.
pub struct StateLog {
    file: File,
    path: PathBuf,
}

impl StateLog {
    /// Open (creating if absent) a state log for appending.
    pub fn open(path: &Path) -> Result<StateLog> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(StateLog {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one row.
    pub fn append(&mut self, entry: &StateLogEntry) -> Result<()> {
        self.file.write_all(format_entry(entry).as_bytes())?;
        Ok(())
    }

    /// Read every row written so far, in order.
    pub fn read_all(&self) -> Result<Vec<StateLogEntry>> {
        let reader = BufReader::new(File::open(&self.path)?);
        reader.lines().map(|l| parse_entry(&l?)).collect()
    }
}
