//! The append-only contribution queue and its in-memory dedup hash.

use shepherd_core::contrib::{ContribFlags, ContribRecord};
use shepherd_core::footprint::Footprint;
use shepherd_core::{Error, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed-field prefix size, before the variable-length URL text.
const FIXED_PREFIX: usize = 32 + 2 + 2 + 1 + 2 + 1;

fn encode(rec: &ContribRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(rec.padded_len());
    buf.extend_from_slice(&rec.fp.site_fp);
    buf.extend_from_slice(&rec.fp.rest_fp);
    buf.extend_from_slice(&rec.area.to_le_bytes());
    buf.extend_from_slice(&rec.url_len.to_le_bytes());
    buf.push(rec.weight);
    buf.extend_from_slice(&rec.section.to_le_bytes());
    buf.push(rec.flags.bits());
    buf.extend_from_slice(rec.url.as_bytes());
    while buf.len() % 16 != 0 {
        buf.push(0);
    }
    buf
}

fn decode_fixed(buf: &[u8]) -> Result<(Footprint, u16, u16, u8, u16, ContribFlags)> {
    if buf.len() < FIXED_PREFIX {
        return Err(Error::Corruption("short contrib record prefix".into()));
    }
    let mut site_fp = [0u8; 16];
    let mut rest_fp = [0u8; 16];
    site_fp.copy_from_slice(&buf[0..16]);
    rest_fp.copy_from_slice(&buf[16..32]);
    let area = u16::from_le_bytes(buf[32..34].try_into().unwrap());
    let url_len = u16::from_le_bytes(buf[34..36].try_into().unwrap());
    let weight = buf[36];
    let section = u16::from_le_bytes(buf[37..39].try_into().unwrap());
    let flags = ContribFlags::from_bits(buf[39])
        .ok_or_else(|| Error::Corruption("unknown contrib flag bits".into()))?;
    Ok((Footprint::new(site_fp, rest_fp), area, url_len, weight, section, flags))
}

/// An append-only contribution log plus its bounded in-memory dedup
/// hash, keyed by footprint (the cheapest stable key, since two
/// contributions for the same URL text always share a footprint).
pub struct ContribStore {
    file: File,
    path: PathBuf,
    end: u64,
    /// footprint -> byte offset of the most recent contribution seen
    /// this cache generation.
    seen: HashMap<Footprint, u64>,
    seen_bytes: usize,
    cache_limit: usize,
}

impl ContribStore {
    /// Open (creating if absent) a contribution store.
    pub fn open(path: &Path, writable: bool, cache_limit: usize) -> Result<ContribStore> {
        let file = OpenOptions::new()
            .create(writable)
            .read(true)
            .write(writable)
            .open(path)?;
        let end = file.metadata()?.len();
        Ok(ContribStore {
            file,
            path: path.to_path_buf(),
            end,
            seen: HashMap::new(),
            seen_bytes: 0,
            cache_limit,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size in bytes.
    pub fn len(&self) -> u64 {
        self.end
    }

    /// True once no contributions have been appended.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// True if a contribution with this footprint has been seen since
    /// the dedup cache was last reset.
    pub fn is_duplicate(&self, fp: &Footprint) -> bool {
        self.seen.contains_key(fp)
    }

    /// Append one contribution, returning its byte offset (the
    /// caller's `oid = offset >> 4`). If the in-memory dedup cache
    /// would exceed `cache_limit`, it is flushed (cleared) first — in
    /// hash-iteration order, which is not a meaningful order and is
    /// left nondeterministic by design.
    pub fn append(&mut self, rec: &ContribRecord) -> Result<u64> {
        let encoded = encode(rec);
        if self.seen_bytes + encoded.len() > self.cache_limit {
            self.seen.clear();
            self.seen_bytes = 0;
        }
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&encoded)?;
        let offset = self.end;
        self.end += encoded.len() as u64;
        self.seen.insert(rec.fp, offset);
        self.seen_bytes += encoded.len();
        Ok(offset)
    }

    /// fsync the file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Read one contribution record back by byte offset.
    pub fn fetch(&mut self, offset: u64) -> Result<ContribRecord> {
        let mut prefix = [0u8; FIXED_PREFIX];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut prefix)?;
        let (fp, area, url_len, weight, section, flags) = decode_fixed(&prefix)?;
        let mut url_bytes = vec![0u8; url_len as usize];
        self.file.read_exact(&mut url_bytes)?;
        let url = String::from_utf8(url_bytes)
            .map_err(|e| Error::Corruption(format!("contrib url is not UTF-8: {e}")))?;
        Ok(ContribRecord {
            fp,
            area,
            url_len,
            weight,
            section,
            flags,
            url,
        })
    }

    /// Stream every contribution record in file order.
    pub fn scan(&self) -> Result<ContribScan> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        Ok(ContribScan {
            file,
            offset: 0,
            end: self.end,
        })
    }
}

/// A streaming, forward-only scan over a contribution store.
pub struct ContribScan {
    file: File,
    offset: u64,
    end: u64,
}

impl Iterator for ContribScan {
    type Item = Result<ContribRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let result = (|| -> Result<ContribRecord> {
            let mut prefix = [0u8; FIXED_PREFIX];
            self.file.seek(SeekFrom::Start(self.offset))?;
            self.file.read_exact(&mut prefix)?;
            let (fp, area, url_len, weight, section, flags) = decode_fixed(&prefix)?;
            let mut url_bytes = vec![0u8; url_len as usize];
            self.file.read_exact(&mut url_bytes)?;
            let url = String::from_utf8(url_bytes)
                .map_err(|e| Error::Corruption(format!("contrib url is not UTF-8: {e}")))?;
            let mut consumed = FIXED_PREFIX + url_len as usize;
            while consumed % 16 != 0 {
                consumed += 1;
            }
            self.offset += consumed as u64;
            Ok(ContribRecord {
                fp,
                area,
                url_len,
                weight,
                section,
                flags,
                url,
            })
        })();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(url: &str) -> ContribRecord {
        ContribRecord {
            fp: Footprint::new([1u8; 16], [2u8; 16]),
            area: 1,
            url_len: url.len() as u16,
            weight: 100,
            section: 0,
            flags: ContribFlags::empty(),
            url: url.to_string(),
        }
    }

    #[test]
    fn append_then_fetch_roundtrips() {
        let dir = tempdir().unwrap();
        let mut store = ContribStore::open(&dir.path().join("contrib"), true, 1 << 20).unwrap();
        let offset = store.append(&sample("http://example.com/a")).unwrap();
        let got = store.fetch(offset).unwrap();
        assert_eq!(got.url, "http://example.com/a");
    }

    #[test]
    fn dedup_cache_flags_repeat_footprints() {
        let dir = tempdir().unwrap();
        let mut store = ContribStore::open(&dir.path().join("contrib"), true, 1 << 20).unwrap();
        let rec = sample("http://example.com/b");
        assert!(!store.is_duplicate(&rec.fp));
        store.append(&rec).unwrap();
        assert!(store.is_duplicate(&rec.fp));
    }

    #[test]
    fn scan_visits_all_records_in_order() {
        let dir = tempdir().unwrap();
        let mut store = ContribStore::open(&dir.path().join("contrib"), true, 1 << 20).unwrap();
        store.append(&sample("http://a/")).unwrap();
        store.append(&sample("http://bb/")).unwrap();
        let urls: Vec<String> = store.scan().unwrap().map(|r| r.unwrap().url).collect();
        assert_eq!(urls, vec!["http://a/", "http://bb/"]);
    }

    #[test]
    fn cache_reset_clears_dedup_once_limit_exceeded() {
        let dir = tempdir().unwrap();
        let mut store = ContribStore::open(&dir.path().join("contrib"), true, 48).unwrap();
        let a = sample("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        store.append(&a).unwrap();
        assert!(store.is_duplicate(&a.fp));
        let b = sample("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        store.append(&b).unwrap();
        // `a`'s cache entry may or may not have survived depending on
        // exactly when the limit tripped; what must hold is that the
        // cache never exceeds its configured byte budget by more than
        // one record's worth.
        assert!(store.seen_bytes <= 48 + b.padded_len());
    }
}
