//! The bucket store: an append-only, oid-addressed blob file. # Layout
//! ```text ┌──────────────┬───────────────┬──────┬─────────────────┐ │
//! Header (16B) │ Body (N bytes)│ Pad │ Trailer magic(4)│
//! └──────────────┴───────────────┴──────┴─────────────────┘ ``` Every
//! record is aligned to 16 bytes; `oid = offset >> 4`. This mirrors the
//! teacher's WAL-segment framing (length-prefixed, magic bracketed,
//! `create`/`open_append`/`truncate`) but adds random-access
//! `fetch`/`delete` by oid, since buckets (unlike WAL records) are read
//! back out of order by the planner and reaper.

use shepherd_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Marks the start of a complete bucket header.
pub const HEADER_MAGIC: u32 = 0xdead_f00d;
/// Marks a header whose body was only partially written (write torn by
/// a crash); `fsck` treats these as recoverable garbage, not corruption.
pub const INCOMPLETE_HEADER_MAGIC: u32 = 0xdead_fee1;
/// Marks the end of a complete bucket record.
pub const TRAILER_MAGIC: u32 = 0xfeed_cafe;
/// All records are aligned to this many bytes (`CONFIG_BUCKET_SHIFT = 4`).
pub const ALIGN: u64 = 16;
/// Fixed header size in bytes: magic(4) + oid(4) + length(4) + type(1) + pad(3).
pub const HEADER_SIZE: u64 = 16;
/// Trailer size in bytes.
pub const TRAILER_SIZE: u64 = 4;

/// Bucket oid value written into the header once a bucket is deleted;
/// the slot (and its body bytes) are left in place.
pub const DELETED_OID: u32 = u32::MAX - 2;

/// What kind of payload a bucket holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BucketType {
    /// A downloaded page body.
    Page = 0,
    /// A downloaded `robots.txt`.
    Robots = 1,
    /// A synthesized bucket (auto-go-root, filter-generated reply).
    Synthetic = 2,
}

impl BucketType {
    fn from_u8(b: u8) -> Result<BucketType> {
        match b {
            0 => Ok(BucketType::Page),
            1 => Ok(BucketType::Robots),
            2 => Ok(BucketType::Synthetic),
            other => Err(Error::Corruption(format!("unknown bucket type {other}"))),
        }
    }
}

/// On-disk bucket header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketHeader {
    /// Oid assigned at creation time (`offset >> 4`), or [`DELETED_OID`].
    pub oid: u32,
    /// Body length in bytes (unpadded).
    pub length: u32,
    /// Payload type.
    pub kind: BucketType,
}

fn round_up_align(n: u64) -> u64 {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// Total on-disk footprint of a bucket with the given body length,
/// including header, padding, and trailer (used by the shakedown pass,
/// which checks that the file's size equals the sum of every live
/// bucket's `bucket_size`).
pub fn bucket_size(length: u32) -> u64 {
    round_up_align(HEADER_SIZE + length as u64) + TRAILER_SIZE
}

/// An open bucket store.
pub struct BucketStore {
    file: File,
    path: PathBuf,
    writable: bool,
    /// Effective cap on file size, leaving head-room for in-progress
    /// appends and (optionally) a shakedown safety buffer.
    max_size: u64,
    next_offset: u64,
}

/// In-progress append: allocated but not yet finalised with a trailer.
pub struct BucketWriter<'a> {
    store: &'a mut BucketStore,
    offset: u64,
    body: Vec<u8>,
}

impl BucketStore {
    /// Open (creating if absent) a bucket file, validating the trailer
    /// of the last bucket if any exist.
    pub fn open(path: &Path, writable: bool, max_size: u64, shake_reserve: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(writable)
            .read(true)
            .write(writable)
            .open(path)?;
        let len = file.metadata()?.len();
        let mut store = BucketStore {
            file,
            path: path.to_path_buf(),
            writable,
            max_size: max_size.saturating_sub(shake_reserve),
            next_offset: len,
        };
        if len > 0 {
            store.validate_last_trailer(len)?;
        }
        Ok(store)
    }

    fn validate_last_trailer(&mut self, len: u64) -> Result<()> {
        if len < TRAILER_SIZE {
            return Err(Error::Corruption("bucket file shorter than one trailer".into()));
        }
        let mut buf = [0u8; TRAILER_SIZE as usize];
        self.file.seek(SeekFrom::Start(len - TRAILER_SIZE))?;
        self.file.read_exact(&mut buf)?;
        let magic = u32::from_le_bytes(buf);
        if magic != TRAILER_MAGIC {
            return Err(Error::Corruption(
                "pool corrupted: trailer magic mismatch at end of file".into(),
            ));
        }
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size.
    pub fn len(&self) -> u64 {
        self.next_offset
    }

    /// True if the store holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.next_offset == 0
    }

    /// Read the header at `oid`, failing on magic/backlink mismatch.
    pub fn find_by_oid(&mut self, oid: u32) -> Result<BucketHeader> {
        let offset = (oid as u64) << 4;
        self.read_header_at(offset, oid)
    }

    fn read_header_at(&mut self, offset: u64, expected_oid: u32) -> Result<BucketHeader> {
        if offset + HEADER_SIZE > self.next_offset {
            return Err(Error::Corruption(format!(
                "oid {expected_oid} out of range"
            )));
        }
        let mut buf = [0u8; HEADER_SIZE as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != HEADER_MAGIC {
            return Err(Error::Corruption(format!(
                "pool corrupted: bad header magic at offset {offset}"
            )));
        }
        let oid = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if oid != DELETED_OID && oid != expected_oid {
            return Err(Error::Corruption(format!(
                "pool corrupted: oid backlink mismatch at offset {offset} (expected {expected_oid}, found {oid})"
            )));
        }
        let length = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let kind = BucketType::from_u8(buf[12])?;
        Ok(BucketHeader { oid, length, kind })
    }

    /// Read the full body of one bucket.
    pub fn fetch(&mut self, oid: u32) -> Result<Vec<u8>> {
        let offset = (oid as u64) << 4;
        let header = self.read_header_at(offset, oid)?;
        if header.oid == DELETED_OID {
            return Err(Error::Corruption(format!("bucket {oid} is deleted")));
        }
        let mut body = vec![0u8; header.length as usize];
        self.file.seek(SeekFrom::Start(offset + HEADER_SIZE))?;
        self.file.read_exact(&mut body)?;
        Ok(body)
    }

    /// Begin appending exactly one bucket. Call [`BucketWriter::write`]
    /// to add body bytes, then [`BucketStore::create_end`] to finalise.
    pub fn create(&mut self) -> Result<BucketWriter<'_>> {
        if !self.writable {
            return Err(Error::Corruption("bucket store is read-only".into()));
        }
        let offset = self.next_offset;
        Ok(BucketWriter {
            store: self,
            offset,
            body: Vec::new(),
        })
    }

    /// Finalise an in-progress append, aborting instead if writing the
    /// padded record would cross `max_size`.
    pub fn create_end(&mut self, writer: BucketWriter<'_>, kind: BucketType) -> Result<BucketHeader> {
        let BucketWriter { offset, body, .. } = writer;
        let length = body.len() as u32;
        let total = bucket_size(length);
        if offset + total > self.max_size {
            return Err(Error::DiskPressure(format!(
                "appending {length}-byte bucket would cross max_size {}",
                self.max_size
            )));
        }
        let oid = (offset >> 4) as u32;

        let mut record = Vec::with_capacity(total as usize);
        record.extend_from_slice(&HEADER_MAGIC.to_le_bytes());
        record.extend_from_slice(&oid.to_le_bytes());
        record.extend_from_slice(&length.to_le_bytes());
        record.push(kind as u8);
        record.extend_from_slice(&[0u8; 3]);
        record.extend_from_slice(&body);
        let padded = round_up_align(HEADER_SIZE + length as u64);
        while (record.len() as u64) < padded {
            record.push(0);
        }
        record.extend_from_slice(&TRAILER_MAGIC.to_le_bytes());
        debug_assert_eq!(record.len() as u64, total);

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&record)?;
        self.file.sync_data()?;
        self.next_offset = offset + total;

        Ok(BucketHeader { oid, length, kind })
    }

    /// Mark a bucket deleted, leaving its slot (and body bytes) in
    /// place so offsets of later buckets stay valid.
    pub fn delete(&mut self, oid: u32) -> Result<()> {
        if !self.writable {
            return Err(Error::Corruption("bucket store is read-only".into()));
        }
        let offset = (oid as u64) << 4;
        self.read_header_at(offset, oid)?; // validates magic/backlink
        self.file.seek(SeekFrom::Start(offset + 4))?;
        self.file.write_all(&DELETED_OID.to_le_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Begin a streaming scan starting at `from_oid` (or `None` for the
    /// start of the file). Scans hold their own file handle, so they
    /// don't interfere with concurrent appenders or other scans.
    pub fn slurp(&self, from_oid: Option<u32>) -> Result<BucketScan> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let offset = from_oid.map(|oid| (oid as u64) << 4).unwrap_or(0);
        Ok(BucketScan {
            file,
            offset,
            end: self.next_offset,
        })
    }

    /// Rewrite the file in place, compacting out dead buckets.
    ///
    /// `callback` is invoked once per live bucket with `(old_header,
    /// new_oid, body)` and returns a [`ShakeAction`]. `backup` selects
    /// security level 2 (back up each window to EOF before overwriting,
    /// recoverable by truncation on crash) over level 1 (fsync after
    /// each window).
    pub fn shakedown(
        &mut self,
        buf_size: usize,
        backup: bool,
        mut callback: impl FnMut(BucketHeader, u32, &[u8]) -> ShakeAction,
    ) -> Result<()> {
        if !self.writable {
            return Err(Error::Corruption("bucket store is read-only".into()));
        }
        let original_len = self.next_offset;
        let mut read_offset = 0u64;
        let mut write_offset = 0u64;
        let mut pending = Vec::with_capacity(buf_size);

        while read_offset < original_len {
            let header = self.read_header_at(read_offset, (read_offset >> 4) as u32)?;
            let padded = round_up_align(HEADER_SIZE + header.length as u64);
            let total = padded + TRAILER_SIZE;

            if header.oid != DELETED_OID {
                let mut body = vec![0u8; header.length as usize];
                self.file.seek(SeekFrom::Start(read_offset + HEADER_SIZE))?;
                self.file.read_exact(&mut body)?;

                let new_oid = (write_offset >> 4) as u32;
                let action = callback(header, new_oid, &body);
                if let ShakeAction::Keep(new_body) = action {
                    let body = new_body.unwrap_or(body);
                    let length = body.len() as u32;
                    let mut record = Vec::with_capacity(bucket_size(length) as usize);
                    record.extend_from_slice(&HEADER_MAGIC.to_le_bytes());
                    record.extend_from_slice(&new_oid.to_le_bytes());
                    record.extend_from_slice(&length.to_le_bytes());
                    record.push(header.kind as u8);
                    record.extend_from_slice(&[0u8; 3]);
                    record.extend_from_slice(&body);
                    let inner_padded = round_up_align(HEADER_SIZE + length as u64);
                    while (record.len() as u64) < inner_padded {
                        record.push(0);
                    }
                    record.extend_from_slice(&TRAILER_MAGIC.to_le_bytes());

                    pending.extend_from_slice(&record);
                    write_offset += record.len() as u64;
                }
            }

            read_offset += total;

            if pending.len() >= buf_size || read_offset >= original_len {
                self.flush_shake_window(write_offset, &mut pending, backup)?;
            }
        }

        self.file.set_len(write_offset)?;
        self.file.sync_all()?;
        self.next_offset = write_offset;
        Ok(())
    }

    fn flush_shake_window(&mut self, write_end: u64, pending: &mut Vec<u8>, backup: bool) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let write_start = write_end - pending.len() as u64;
        if backup {
            // Level 2: append this window past the current logical EOF
            // before overwriting it in place, so a crash mid-window can
            // be recovered by truncating back to `write_start`.
            self.file.seek(SeekFrom::End(0))?;
            self.file.write_all(pending)?;
            self.file.sync_all()?;
        }
        self.file.seek(SeekFrom::Start(write_start))?;
        self.file.write_all(pending)?;
        self.file.sync_all()?;
        pending.clear();
        Ok(())
    }

    /// Walk the whole file classifying every 16-byte-aligned slot,
    /// rewriting unreadable stretches as synthetic deleted buckets.
    /// Returns the number of `(ok, deleted, rewritten)` slots found.
    pub fn fsck(&mut self) -> Result<FsckReport> {
        let mut report = FsckReport::default();
        let mut offset = 0u64;
        let total = self.next_offset;
        while offset < total {
            match self.read_header_at(offset, (offset >> 4) as u32) {
                Ok(header) if header.oid == DELETED_OID => {
                    report.deleted += 1;
                    offset += round_up_align(HEADER_SIZE + header.length as u64) + TRAILER_SIZE;
                }
                Ok(header) => {
                    report.ok += 1;
                    offset += round_up_align(HEADER_SIZE + header.length as u64) + TRAILER_SIZE;
                }
                Err(_) => {
                    // Unreadable slot: rewrite as a synthetic deleted
                    // bucket of minimal size and keep scanning.
                    self.file.seek(SeekFrom::Start(offset))?;
                    self.file.write_all(&HEADER_MAGIC.to_le_bytes())?;
                    self.file.write_all(&DELETED_OID.to_le_bytes())?;
                    self.file.write_all(&0u32.to_le_bytes())?;
                    self.file.write_all(&[BucketType::Page as u8, 0, 0, 0])?;
                    self.file.write_all(&TRAILER_MAGIC.to_le_bytes())?;
                    report.rewritten += 1;
                    offset += HEADER_SIZE + TRAILER_SIZE;
                }
            }
        }
        self.file.sync_all()?;
        Ok(report)
    }
}

impl<'a> BucketWriter<'a> {
    /// Append bytes to the in-progress bucket body.
    pub fn write(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Access the store being written to, e.g. to check remaining
    /// budget before writing a large body.
    pub fn store(&self) -> &BucketStore {
        self.store
    }
}

/// What [`BucketStore::shakedown`]'s callback decided for one bucket.
pub enum ShakeAction {
    /// Drop the bucket.
    Drop,
    /// Keep the bucket, optionally with a replacement (shorter) body —
    /// `Some(body)` signals the payload was modified in place.
    Keep(Option<Vec<u8>>),
}

/// Result of an `fsck` pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsckReport {
    /// Readable, live buckets.
    pub ok: u64,
    /// Readable, already-deleted buckets.
    pub deleted: u64,
    /// Unreadable stretches rewritten as synthetic deleted buckets.
    pub rewritten: u64,
}

/// A streaming, one-shot, forward-only scan over a bucket file,
/// independent of the store's own file handle.
pub struct BucketScan {
    file: File,
    offset: u64,
    end: u64,
}

impl Iterator for BucketScan {
    type Item = Result<(BucketHeader, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let result = (|| -> Result<(BucketHeader, Vec<u8>)> {
            let mut hbuf = [0u8; HEADER_SIZE as usize];
            self.file.seek(SeekFrom::Start(self.offset))?;
            self.file.read_exact(&mut hbuf)?;
            let magic = u32::from_le_bytes(hbuf[0..4].try_into().unwrap());
            if magic != HEADER_MAGIC {
                return Err(Error::Corruption("pool corrupted during scan".into()));
            }
            let oid = u32::from_le_bytes(hbuf[4..8].try_into().unwrap());
            let length = u32::from_le_bytes(hbuf[8..12].try_into().unwrap());
            let kind = BucketType::from_u8(hbuf[12])?;
            let mut body = vec![0u8; length as usize];
            self.file.read_exact(&mut body)?;
            let padded = round_up_align(HEADER_SIZE + length as u64);
            self.offset += padded + TRAILER_SIZE;
            Ok((BucketHeader { oid, length, kind }, body))
        })();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh_store(dir: &Path) -> BucketStore {
        BucketStore::open(&dir.join("buckets"), true, 1 << 30, 0).unwrap()
    }

    #[test]
    fn create_then_fetch_roundtrips() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        let mut w = store.create().unwrap();
        w.write(b"hello world");
        let header = store.create_end(w, BucketType::Page).unwrap();
        let body = store.fetch(header.oid).unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn oid_equals_offset_shifted() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        let mut w = store.create().unwrap();
        w.write(b"first");
        let h1 = store.create_end(w, BucketType::Page).unwrap();
        assert_eq!(h1.oid, 0);

        let mut w2 = store.create().unwrap();
        w2.write(b"second");
        let h2 = store.create_end(w2, BucketType::Page).unwrap();
        assert_eq!((h2.oid as u64) << 4, bucket_size(5));
    }

    #[test]
    fn delete_keeps_slot_but_marks_deleted() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        let mut w = store.create().unwrap();
        w.write(b"victim");
        let header = store.create_end(w, BucketType::Page).unwrap();
        store.delete(header.oid).unwrap();
        assert!(store.fetch(header.oid).is_err());
    }

    #[test]
    fn create_end_aborts_past_max_size() {
        let dir = tempdir().unwrap();
        let mut store = BucketStore::open(&dir.join("buckets"), true, 32, 0).unwrap();
        let mut w = store.create().unwrap();
        w.write(&vec![0u8; 100]);
        assert!(store.create_end(w, BucketType::Page).is_err());
    }

    #[test]
    fn slurp_scans_all_live_buckets_in_order() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        for payload in [&b"a"[..], &b"bb"[..], &b"ccc"[..]] {
            let mut w = store.create().unwrap();
            w.write(payload);
            store.create_end(w, BucketType::Page).unwrap();
        }
        let bodies: Vec<Vec<u8>> = store
            .slurp(None)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(bodies, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn shakedown_drops_deleted_and_compacts() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        let lengths = [1000usize, 10, 5000];
        let mut oids = Vec::new();
        for len in lengths {
            let mut w = store.create().unwrap();
            w.write(&vec![7u8; len]);
            let h = store.create_end(w, BucketType::Page).unwrap();
            oids.push(h.oid);
        }
        store.delete(oids[1]).unwrap();

        store
            .shakedown(1 << 20, false, |_old, _new_oid, _body| ShakeAction::Keep(None))
            .unwrap();

        let expected = bucket_size(1000) + bucket_size(5000);
        assert_eq!(store.len(), expected);

        let survivors: Vec<_> = store.slurp(None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].0.oid, 0);
        assert_eq!((survivors[1].0.oid as u64) << 4, bucket_size(1000));
    }

    #[test]
    fn shakedown_with_backup_level_still_compacts() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        let mut w = store.create().unwrap();
        w.write(b"keep me");
        store.create_end(w, BucketType::Page).unwrap();

        store
            .shakedown(64, true, |_old, _new_oid, _body| ShakeAction::Keep(None))
            .unwrap();
        assert_eq!(store.len(), bucket_size(7));
    }

    #[test]
    fn reopen_validates_trailer_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("buckets");
        {
            let mut store = BucketStore::open(&path, true, 1 << 30, 0).unwrap();
            let mut w = store.create().unwrap();
            w.write(b"x");
            store.create_end(w, BucketType::Page).unwrap();
        }
        BucketStore::open(&path, false, 1 << 30, 0).unwrap();

        // Corrupt the trailer and confirm reopen fails.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        assert!(BucketStore::open(&path, false, 1 << 30, 0).is_err());
    }

    #[test]
    fn fsck_counts_live_and_deleted() {
        let dir = tempdir().unwrap();
        let mut store = fresh_store(dir.path());
        for _ in 0..3 {
            let mut w = store.create().unwrap();
            w.write(b"x");
            store.create_end(w, BucketType::Page).unwrap();
        }
        store.delete(0).unwrap();
        let report = store.fsck().unwrap();
        assert_eq!(report.ok, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.rewritten, 0);
    }
}
