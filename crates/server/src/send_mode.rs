//! The `SEND_MODE` sub-session: once a connection sends `SEND_MODE` and
//! gets back `Reply::SendMode`, every subsequent request on that connection
//! is one of [`Request::is_send_mode_sub_request`]'s eight commands instead
//! of a control-mode one. A real daemon forks a subprocess to hold the
//! state lock for the session's lifetime; here that's modeled as the caller
//! (`connection.rs`) holding a [`crate::lock_registry::ConnectionLocks`]
//! borrow across the whole sub-session instead, since Tokio tasks are
//! cheaper and safer than a forked child for this purpose and the effect —
//! the lock outlives any single request/reply — is the same.

use shepherd_core::footprint::Footprint;
use shepherd_core::Result;
use shepherd_storage::bucket::BucketStore;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::urldb::UrlDb;
use shepherd_wire::{Attr, Message, Mode, Reply};
use std::io::Read;
use std::path::Path;

/// Chunk size for streamed raw-file transfers. Arbitrary but generous
/// enough that a whole bucket file rarely needs more than a handful of
/// blocks.
const BLOCK_SIZE: usize = 64 * 1024;

fn data_end(id: u32) -> Message {
    Message::empty(Mode::SendMode, Reply::DataEnd as u8, id)
}

fn data_block(id: u32, bytes: Vec<u8>) -> Message {
    Message::raw(Mode::SendMode, Reply::DataBlock as u8, id, bytes)
}

/// `SEND_RAW_BUCKETS`/`SEND_RAW_INDEX`/`SEND_RAW_SITES`/`SEND_RAW_PARAMS`:
/// stream one on-disk file verbatim as fixed-size blocks.
pub fn stream_raw_file(path: &Path, id: u32) -> Result<Vec<Message>> {
    let mut file = std::fs::File::open(path)?;
    let mut messages = Vec::new();
    loop {
        let mut buf = vec![0u8; BLOCK_SIZE];
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        messages.push(data_block(id, buf));
    }
    messages.push(data_end(id));
    Ok(messages)
}

/// `SEND_BUCKETS`: stream every live bucket body as its own block.
pub fn stream_buckets(store: &BucketStore, id: u32) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for entry in store.slurp(None)? {
        let (_, body) = entry?;
        messages.push(data_block(id, body));
    }
    messages.push(data_end(id));
    Ok(messages)
}

/// `SEND_URLS`: stream `(oid, footprint, url)` rows from the optional
/// URL database, resuming from `from_offset` when given.
pub fn stream_urls(urldb: &UrlDb, id: u32, from_offset: Option<u64>) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for entry in urldb.scan()? {
        let entry = entry?;
        if let Some(from) = from_offset {
            if (entry.oid.0 as u64) < from {
                continue;
            }
        }
        let attrs = vec![
            Attr::u64(entry.oid.0 as u64),
            Attr::footprint(&entry.fp),
            Attr::str(&entry.url),
        ];
        messages.push(Message::attrs(Mode::SendMode, Reply::DataBlock as u8, id, attrs));
    }
    messages.push(data_end(id));
    Ok(messages)
}

/// `SEND_BUCKET`: look up one footprint in `index` and, if found,
/// stream back the matching bucket's body. A linear scan is acceptable
/// here — `SEND_BUCKET` is an interactive, one-off lookup, not a hot
/// path the way `select`'s per-cycle scans are.
pub fn send_bucket(
    index: &mut UrlIndex,
    store: &mut BucketStore,
    fp: Footprint,
    id: u32,
) -> Result<Message> {
    for i in 0..index.len() {
        let rec = index.get(i)?;
        if rec.fp == fp {
            let body = store.fetch(rec.oid.0)?;
            return Ok(data_block(id, body));
        }
    }
    Ok(Message::empty(Mode::SendMode, Reply::NoSuchState as u8, id))
}

/// `SEND_FEEDBACK`: accept an uploaded feedback file for the next
/// `Feedback` phase to pick up. Overwrites any prior upload; only one
/// feedback round can be pending at a time.
pub fn receive_feedback(dest_path: &Path, payload: &[u8]) -> Result<()> {
    std::fs::write(dest_path, payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_storage::bucket::BucketType;
    use shepherd_storage::urldb::UrlDbEntry;
    use shepherd_core::url_state::Oid;
    use tempfile::tempdir;

    #[test]
    fn stream_raw_file_chunks_and_terminates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params");
        std::fs::write(&path, vec![7u8; 10]).unwrap();
        let messages = stream_raw_file(&path, 1).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.last().unwrap().cmd, Reply::DataEnd as u8);
    }

    #[test]
    fn stream_buckets_emits_one_block_per_bucket() {
        let dir = tempdir().unwrap();
        let mut store = BucketStore::open(&dir.path().join("buckets"), true, 1 << 30, 0).unwrap();
        for body in [&b"a"[..], &b"bb"[..]] {
            let mut w = store.create().unwrap();
            w.write(body);
            store.create_end(w, BucketType::Page).unwrap();
        }
        let messages = stream_buckets(&store, 1).unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn stream_urls_honors_offset() {
        let dir = tempdir().unwrap();
        let mut db = UrlDb::open(&dir.path().join("urls"), true).unwrap();
        db.append(&UrlDbEntry {
            oid: Oid(1),
            fp: Footprint::new([1u8; 16], [0u8; 16]),
            url: "http://a/".to_string(),
        })
        .unwrap();
        db.append(&UrlDbEntry {
            oid: Oid(5),
            fp: Footprint::new([2u8; 16], [0u8; 16]),
            url: "http://b/".to_string(),
        })
        .unwrap();
        let all = stream_urls(&db, 1, None).unwrap();
        assert_eq!(all.len(), 3);
        let from_five = stream_urls(&db, 1, Some(5)).unwrap();
        assert_eq!(from_five.len(), 2);
    }

    #[test]
    fn send_bucket_finds_matching_footprint() {
        let dir = tempdir().unwrap();
        let mut store = BucketStore::open(&dir.path().join("buckets"), true, 1 << 30, 0).unwrap();
        let mut w = store.create().unwrap();
        w.write(b"payload");
        let header = store.create_end(w, BucketType::Page).unwrap();

        let mut index = UrlIndex::open(&dir.path().join("index"), true).unwrap();
        let fp = Footprint::new([3u8; 16], [4u8; 16]);
        let mut rec = shepherd_core::UrlState::new(fp, 0, shepherd_core::url_state::UrlFlags::empty());
        rec.oid = Oid(header.oid);
        index.append(&rec).unwrap();

        let reply = send_bucket(&mut index, &mut store, fp, 9).unwrap();
        assert_eq!(reply.cmd, Reply::DataBlock as u8);
    }

    #[test]
    fn send_bucket_misses_unknown_footprint() {
        let dir = tempdir().unwrap();
        let mut store = BucketStore::open(&dir.path().join("buckets"), true, 1 << 30, 0).unwrap();
        let mut index = UrlIndex::open(&dir.path().join("index"), true).unwrap();
        let reply = send_bucket(&mut index, &mut store, Footprint::new([9u8; 16], [9u8; 16]), 1).unwrap();
        assert_eq!(reply.cmd, Reply::NoSuchState as u8);
    }
}
