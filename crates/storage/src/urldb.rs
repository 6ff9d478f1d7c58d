//! The optional URL database: an append-only `(oid, footprint, url)`
//! log, plus a sorted derivative built from it. Existence of this file is
//! itself optional (sites with very large crawl footprints may disable it
//! to save space); callers check [`UrlDb::open`]'s `Option` rather than the
//! crate exposing a can't-fail-but-actually-absent API.

use shepherd_core::footprint::Footprint;
use shepherd_core::url_state::Oid;
use shepherd_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic identifying a `urls` log.
pub const URLDB_MAGIC: u32 = 0x9a27_36ab;
/// Current on-disk format version.
pub const URLDB_VERSION: u16 = 0x3b00;

const HEADER_SIZE: u64 = 6;
const FIXED_RECORD_PREFIX: usize = 4 + 32 + 2;

/// One entry: the bucket oid a URL's content lives at, its footprint,
/// and the URL text itself (kept for human-readable dumps and
/// duplicate-detection by URL rather than just footprint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlDbEntry {
    /// Bucket oid holding this URL's downloaded content.
    pub oid: Oid,
    /// The URL's footprint.
    pub fp: Footprint,
    /// Canonical URL text.
    pub url: String,
}

fn encode(e: &UrlDbEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_RECORD_PREFIX + e.url.len());
    buf.extend_from_slice(&e.oid.0.to_le_bytes());
    buf.extend_from_slice(&e.fp.site_fp);
    buf.extend_from_slice(&e.fp.rest_fp);
    buf.extend_from_slice(&(e.url.len() as u16).to_le_bytes());
    buf.extend_from_slice(e.url.as_bytes());
    buf
}

/// An append-only URL database log.
pub struct UrlDb {
    file: File,
    path: PathBuf,
    end: u64,
}

impl UrlDb {
    /// Open (creating if absent) a URL database at `path`.
    pub fn open(path: &Path, writable: bool) -> Result<UrlDb> {
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .create(writable)
            .read(true)
            .write(writable)
            .open(path)?;
        if !exists {
            file.write_all(&URLDB_MAGIC.to_le_bytes())?;
            file.write_all(&URLDB_VERSION.to_le_bytes())?;
        } else {
            let mut header = [0u8; HEADER_SIZE as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
            if magic != URLDB_MAGIC {
                return Err(Error::Corruption("bad urls-file magic".into()));
            }
        }
        let end = file.metadata()?.len();
        Ok(UrlDb {
            file,
            path: path.to_path_buf(),
            end,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, returning its byte offset.
    pub fn append(&mut self, entry: &UrlDbEntry) -> Result<u64> {
        let encoded = encode(entry);
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&encoded)?;
        let offset = self.end;
        self.end += encoded.len() as u64;
        Ok(offset)
    }

    /// fsync the file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Stream every entry, in file order, skipping the header.
    pub fn scan(&self) -> Result<UrlDbScan> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        Ok(UrlDbScan {
            file,
            offset: HEADER_SIZE,
            end: self.end,
        })
    }

    /// Build the sorted derivative (by footprint) as an in-memory
    /// vector. No dedicated on-disk format for it is defined, so it's
    /// produced on demand from the log via [`crate::sort`] rather than
    /// kept as a second persisted file.
    pub fn sorted_by_footprint(&self) -> Result<Vec<UrlDbEntry>> {
        let mut entries: Vec<UrlDbEntry> = self.scan()?.collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.fp);
        Ok(entries)
    }
}

/// A streaming, forward-only scan over a URL database.
pub struct UrlDbScan {
    file: File,
    offset: u64,
    end: u64,
}

impl Iterator for UrlDbScan {
    type Item = Result<UrlDbEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let result = (|| -> Result<UrlDbEntry> {
            let mut prefix = [0u8; FIXED_RECORD_PREFIX];
            self.file.seek(SeekFrom::Start(self.offset))?;
            self.file.read_exact(&mut prefix)?;
            let oid = Oid(u32::from_le_bytes(prefix[0..4].try_into().unwrap()));
            let mut site_fp = [0u8; 16];
            let mut rest_fp = [0u8; 16];
            site_fp.copy_from_slice(&prefix[4..20]);
            rest_fp.copy_from_slice(&prefix[20..36]);
            let url_len = u16::from_le_bytes(prefix[36..38].try_into().unwrap());
            let mut url_bytes = vec![0u8; url_len as usize];
            self.file.read_exact(&mut url_bytes)?;
            let url = String::from_utf8(url_bytes)
                .map_err(|e| Error::Corruption(format!("urldb url is not UTF-8: {e}")))?;
            self.offset += (FIXED_RECORD_PREFIX + url_len as usize) as u64;
            Ok(UrlDbEntry {
                oid,
                fp: Footprint::new(site_fp, rest_fp),
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

    fn sample(oid: u32, url: &str) -> UrlDbEntry {
        UrlDbEntry {
            oid: Oid(oid),
            fp: Footprint::new([1u8; 16], [2u8; 16]),
            url: url.to_string(),
        }
    }

    #[test]
    fn append_then_scan_roundtrips() {
        let dir = tempdir().unwrap();
        let mut db = UrlDb::open(&dir.path().join("urls"), true).unwrap();
        db.append(&sample(1, "http://a/")).unwrap();
        db.append(&sample(2, "http://bb/")).unwrap();
        let entries: Vec<UrlDbEntry> = db.scan().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(entries, vec![sample(1, "http://a/"), sample(2, "http://bb/")]);
    }

    #[test]
    fn reopen_validates_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("urls");
        {
            UrlDb::open(&path, true).unwrap();
        }
        UrlDb::open(&path, false).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        assert!(UrlDb::open(&path, false).is_err());
    }

    #[test]
    fn sorted_by_footprint_orders_across_sites() {
        let dir = tempdir().unwrap();
        let mut db = UrlDb::open(&dir.path().join("urls"), true).unwrap();
        db.append(&UrlDbEntry {
            oid: Oid(1),
            fp: Footprint::new([9u8; 16], [0u8; 16]),
            url: "http://z/".to_string(),
        })
        .unwrap();
        db.append(&UrlDbEntry {
            oid: Oid(2),
            fp: Footprint::new([1u8; 16], [0u8; 16]),
            url: "http://a/".to_string(),
        })
        .unwrap();
        let sorted = db.sorted_by_footprint().unwrap();
        assert_eq!(sorted[0].url, "http://a/");
        assert_eq!(sorted[1].url, "http://z/");
    }
}
