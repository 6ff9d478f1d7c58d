//! The append-only checkpoint log. Each record is written in a strict
//! order — `buckets_flush → journal_flush → contrib_flush → urls_flush →
//! checkpoint append` — so a checkpoint record is only ever durable once
//! every file position it names is itself durable. A fixed-size payload
//! trailed by a CRC32, one record per write, no shared header.

use shepherd_core::{Checkpoint, Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const RECORD_SIZE: usize = 4 + 8 + 8 + 8 + 8;
const CRC_SIZE: usize = 4;
const FRAME_SIZE: usize = RECORD_SIZE + CRC_SIZE;

fn encode(cp: &Checkpoint) -> [u8; FRAME_SIZE] {
    let mut buf = [0u8; FRAME_SIZE];
    buf[0..4].copy_from_slice(&cp.time.to_le_bytes());
    buf[4..12].copy_from_slice(&cp.buckets_pos.to_le_bytes());
    buf[12..20].copy_from_slice(&cp.journal_pos.to_le_bytes());
    buf[20..28].copy_from_slice(&cp.contrib_pos.to_le_bytes());
    buf[28..36].copy_from_slice(&cp.urls_pos.to_le_bytes());
    let crc = crc32fast::hash(&buf[0..RECORD_SIZE]);
    buf[RECORD_SIZE..FRAME_SIZE].copy_from_slice(&crc.to_le_bytes());
    buf
}

fn decode(buf: &[u8]) -> Result<Checkpoint> {
    if buf.len() < FRAME_SIZE {
        return Err(Error::Corruption("short checkpoint record".into()));
    }
    let crc = u32::from_le_bytes(buf[RECORD_SIZE..FRAME_SIZE].try_into().unwrap());
    if crc32fast::hash(&buf[0..RECORD_SIZE]) != crc {
        return Err(Error::Corruption("checkpoint record CRC mismatch".into()));
    }
    Ok(Checkpoint {
        time: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        buckets_pos: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
        journal_pos: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
        contrib_pos: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
        urls_pos: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
    })
}

/// An append-only log of [`Checkpoint`] records.
pub struct CheckpointLog {
    file: File,
    path: PathBuf,
    count: u64,
}

impl CheckpointLog {
    /// Open (creating if absent) a checkpoint log, truncating any
    /// trailing partial record left by a crash mid-write — a partial
    /// tail fails CRC/length validation and is simply not counted, not
    /// treated as corruption, since the checkpoint it would have
    /// recorded was never durable.
    pub fn open(path: &Path, writable: bool) -> Result<CheckpointLog> {
        let mut file = OpenOptions::new()
            .create(writable)
            .read(true)
            .write(writable)
            .open(path)?;
        let len = file.metadata()?.len();
        let whole_records = len / FRAME_SIZE as u64;
        let usable_len = whole_records * FRAME_SIZE as u64;
        if usable_len != len && writable {
            file.set_len(usable_len)?;
        }
        Ok(CheckpointLog {
            file,
            path: path.to_path_buf(),
            count: whole_records,
        })
    }

    /// Number of checkpoints recorded.
    pub fn len(&self) -> u64 {
        self.count
    }

    /// True if no checkpoint has ever been taken.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append a new checkpoint.
    pub fn append(&mut self, cp: &Checkpoint) -> Result<()> {
        let frame = encode(cp);
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&frame)?;
        self.file.sync_all()?;
        self.count += 1;
        Ok(())
    }

    /// The most recent checkpoint, or [`Checkpoint::ZERO`] if none has
    /// been taken yet.
    pub fn latest(&mut self) -> Result<Checkpoint> {
        if self.count == 0 {
            return Ok(Checkpoint::ZERO);
        }
        self.get(self.count - 1)
    }

    /// Read checkpoint `i`.
    pub fn get(&mut self, i: u64) -> Result<Checkpoint> {
        if i >= self.count {
            return Err(Error::Corruption(format!("checkpoint index {i} out of range")));
        }
        let mut buf = [0u8; FRAME_SIZE];
        self.file.seek(SeekFrom::Start(i * FRAME_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        decode(&buf)
    }

    /// All checkpoints in order, oldest first.
    pub fn all(&mut self) -> Result<Vec<Checkpoint>> {
        (0..self.count).map(|i| self.get(i)).collect()
    }
}
