//! The `index` and `journal` files: a packed array of
//! [`UrlState`](shepherd_core::UrlState) records. Both files share the same
//! fixed-record codec; `index` is a random-access array addressed by
//! record number, `journal` is an append-only stream of the same record
//! shape where a duplicate footprint is only legal for `Skey`/`TempError`
//! records. `UrlIndex` serves both uses — callers that need journal's
//! append-only duplicate rule enforce it themselves via
//! [`UrlIndex::append_journal`].

use shepherd_core::url_state::{Oid, UrlFlags, UrlKind};
use shepherd_core::{Error, Footprint, Result, UrlState};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed on-disk size of one `UrlState` record.
pub const RECORD_SIZE: usize = 32 + 4 + 4 + 1 + 1 + 2 + 1 + 1 + 2 + 1 + 1 + 2 + 2;

fn kind_to_u8(kind: UrlKind) -> u8 {
    match kind {
        UrlKind::Sleeping => 0,
        UrlKind::New => 1,
        UrlKind::Ok => 2,
        UrlKind::Error => 3,
        UrlKind::Skey => 4,
        UrlKind::TempError => 5,
        UrlKind::Zombie => 6,
    }
}

fn kind_from_u8(b: u8) -> Result<UrlKind> {
    Ok(match b {
        0 => UrlKind::Sleeping,
        1 => UrlKind::New,
        2 => UrlKind::Ok,
        3 => UrlKind::Error,
        4 => UrlKind::Skey,
        5 => UrlKind::TempError,
        6 => UrlKind::Zombie,
        other => return Err(Error::Corruption(format!("unknown url_state kind {other}"))),
    })
}

/// Encode one record to its fixed `RECORD_SIZE`-byte layout.
pub fn encode(rec: &UrlState) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    let mut at = 0;
    buf[at..at + 16].copy_from_slice(&rec.fp.site_fp);
    at += 16;
    buf[at..at + 16].copy_from_slice(&rec.fp.rest_fp);
    at += 16;
    buf[at..at + 4].copy_from_slice(&rec.oid.0.to_le_bytes());
    at += 4;
    buf[at..at + 4].copy_from_slice(&rec.last_seen.to_le_bytes());
    at += 4;
    buf[at] = rec.retry_count;
    at += 1;
    buf[at] = rec.weight;
    at += 1;
    buf[at..at + 2].copy_from_slice(&rec.flags.bits().to_le_bytes());
    at += 2;
    buf[at] = kind_to_u8(rec.kind);
    at += 1;
    buf[at] = rec.no_target as u8;
    at += 1;
    buf[at..at + 2].copy_from_slice(&rec.stable_time.to_le_bytes());
    at += 2;
    buf[at] = rec.refresh_freq;
    at += 1;
    buf[at] = rec.download_time;
    at += 1;
    buf[at..at + 2].copy_from_slice(&rec.section.to_le_bytes());
    at += 2;
    buf[at..at + 2].copy_from_slice(&rec.area.to_le_bytes());
    at += 2;
    debug_assert_eq!(at, RECORD_SIZE);
    buf
}

/// Decode one record from its fixed `RECORD_SIZE`-byte layout.
pub fn decode(buf: &[u8]) -> Result<UrlState> {
    if buf.len() < RECORD_SIZE {
        return Err(Error::Corruption("short url_state record".into()));
    }
    let mut site_fp = [0u8; 16];
    let mut rest_fp = [0u8; 16];
    site_fp.copy_from_slice(&buf[0..16]);
    rest_fp.copy_from_slice(&buf[16..32]);
    let mut at = 32;
    let oid = Oid(u32::from_le_bytes(buf[at..at + 4].try_into().unwrap()));
    at += 4;
    let last_seen = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
    at += 4;
    let retry_count = buf[at];
    at += 1;
    let weight = buf[at];
    at += 1;
    let flags_bits = u16::from_le_bytes(buf[at..at + 2].try_into().unwrap());
    let flags = UrlFlags::from_bits(flags_bits)
        .ok_or_else(|| Error::Corruption("unknown url_state flag bits".into()))?;
    at += 2;
    let kind = kind_from_u8(buf[at])?;
    at += 1;
    let no_target = buf[at] != 0;
    at += 1;
    let stable_time = u16::from_le_bytes(buf[at..at + 2].try_into().unwrap());
    at += 2;
    let refresh_freq = buf[at];
    at += 1;
    let download_time = buf[at];
    at += 1;
    let section = u16::from_le_bytes(buf[at..at + 2].try_into().unwrap());
    at += 2;
    let area = u16::from_le_bytes(buf[at..at + 2].try_into().unwrap());
    Ok(UrlState {
        fp: Footprint::new(site_fp, rest_fp),
        oid,
        last_seen,
        retry_count,
        weight,
        flags,
        kind,
        no_target,
        stable_time,
        refresh_freq,
        download_time,
        section,
        area,
    })
}

/// A random-access or append-only array of `UrlState` records.
pub struct UrlIndex {
    file: File,
    path: PathBuf,
    len: u64,
}

impl UrlIndex {
    /// Open (creating if absent) the file at `path`.
    pub fn open(path: &Path, writable: bool) -> Result<UrlIndex> {
        let file = OpenOptions::new()
            .create(writable)
            .read(true)
            .write(writable)
            .open(path)?;
        let byte_len = file.metadata()?.len();
        if byte_len % RECORD_SIZE as u64 != 0 {
            return Err(Error::Corruption(format!(
                "{} is not a whole number of url_state records",
                path.display()
            )));
        }
        Ok(UrlIndex {
            file,
            path: path.to_path_buf(),
            len: byte_len / RECORD_SIZE as u64,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently stored.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the file holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read record `i`.
    pub fn get(&mut self, i: u64) -> Result<UrlState> {
        if i >= self.len {
            return Err(Error::Corruption(format!("record index {i} out of range")));
        }
        let mut buf = [0u8; RECORD_SIZE];
        self.file.seek(SeekFrom::Start(i * RECORD_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        decode(&buf)
    }

    /// Overwrite record `i` in place (used by select/sort to rewrite
    /// dispositions without reappending).
    pub fn set(&mut self, i: u64, rec: &UrlState) -> Result<()> {
        if i >= self.len {
            return Err(Error::Corruption(format!("record index {i} out of range")));
        }
        self.file.seek(SeekFrom::Start(i * RECORD_SIZE as u64))?;
        self.file.write_all(&encode(rec))?;
        Ok(())
    }

    /// Append a record to the end of the file, returning its index.
    pub fn append(&mut self, rec: &UrlState) -> Result<u64> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&encode(rec))?;
        let i = self.len;
        self.len += 1;
        Ok(i)
    }

    /// Append a journal record, enforcing the duplicate-footprint rule:
    /// a footprint already present in `recent` may only be re-appended
    /// if the new record is `Skey` or `TempError`.
    pub fn append_journal(
        &mut self,
        rec: &UrlState,
        recent: &std::collections::HashSet<Footprint>,
    ) -> Result<u64> {
        if recent.contains(&rec.fp)
            && !matches!(rec.kind, UrlKind::Skey | UrlKind::TempError)
        {
            return Err(Error::InvariantViolation(format!(
                "duplicate journal footprint {:?} for non-Skey/TempError record",
                rec.fp
            )));
        }
        self.append(rec)
    }

    /// fsync the file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Iterate all records in file order.
    pub fn iter(&mut self) -> Result<Vec<UrlState>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut out = Vec::with_capacity(self.len as usize);
        let mut buf = [0u8; RECORD_SIZE];
        for _ in 0..self.len {
            self.file.read_exact(&mut buf)?;
            out.push(decode(&buf)?);
        }
        Ok(out)
    }

    /// Truncate (or, harmlessly, no-op if already shorter) to exactly
    /// `new_len` records. Used by the sort stage after a unique-key
    /// sort collapses duplicate footprints and the rewritten index is
    /// shorter than before.
    pub fn truncate(&mut self, new_len: u64) -> Result<()> {
        self.file.set_len(new_len * RECORD_SIZE as u64)?;
        self.len = new_len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::footprint::Footprint as Fp;
    use tempfile::tempdir;

    fn sample(n: u8) -> UrlState {
        UrlState::new(Fp::new([n; 16], [n; 16]), n, UrlFlags::empty())
    }

    #[test]
    fn record_roundtrips_through_encode_decode() {
        let rec = sample(7);
        let decoded = decode(&encode(&rec)).unwrap();
        assert_eq!(rec, decoded);
    }

    #[test]
    fn append_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let mut idx = UrlIndex::open(&dir.path().join("index"), true).unwrap();
        idx.append(&sample(1)).unwrap();
        idx.append(&sample(2)).unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(1).unwrap(), sample(2));
    }

    #[test]
    fn set_overwrites_in_place_without_growing_file() {
        let dir = tempdir().unwrap();
        let mut idx = UrlIndex::open(&dir.path().join("index"), true).unwrap();
        idx.append(&sample(1)).unwrap();
        idx.set(0, &sample(9)).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get(0).unwrap(), sample(9));
    }

    #[test]
    fn journal_rejects_duplicate_footprint_for_ordinary_kind() {
        let dir = tempdir().unwrap();
        let mut idx = UrlIndex::open(&dir.path().join("journal"), true).unwrap();
        let mut recent = std::collections::HashSet::new();
        let rec = sample(3);
        recent.insert(rec.fp);
        assert!(idx.append_journal(&rec, &recent).is_err());
    }

    #[test]
    fn journal_allows_duplicate_footprint_for_skey() {
        let dir = tempdir().unwrap();
        let mut idx = UrlIndex::open(&dir.path().join("journal"), true).unwrap();
        let mut recent = std::collections::HashSet::new();
        let skey = UrlState::new_skey([4u8; 16], 0x0A000001);
        recent.insert(skey.fp);
        assert!(idx.append_journal(&skey, &recent).is_ok());
    }

    #[test]
    fn reopen_rejects_truncated_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");
        {
            let mut idx = UrlIndex::open(&path, true).unwrap();
            idx.append(&sample(1)).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.pop();
        std::fs::write(&path, bytes).unwrap();
        assert!(UrlIndex::open(&path, false).is_err());
    }
}
