//! Cross-crate integration test: take a checkpoint against real files,
//! append past it, then roll back and confirm every tracked file is
//! truncated to the checkpoint's recorded length.

use shepherd_core::Checkpoint;
use shepherd_durability::checkpoint::CheckpointLog;
use shepherd_durability::recovery::{rollback_to_checkpoint, CheckpointedFiles};
use std::fs;
use std::io::Write;

fn file_with(path: &std::path::Path, contents: &[u8]) {
    let mut f = fs::File::create(path).unwrap();
    f.write_all(contents).unwrap();
}

#[test]
fn rollback_truncates_every_tracked_file_to_its_checkpointed_length() {
    let dir = tempfile::tempdir().unwrap();
    let buckets = dir.path().join("buckets");
    let journal = dir.path().join("journal");
    let contrib = dir.path().join("contrib");
    let urls = dir.path().join("urls");

    file_with(&buckets, b"0123456789");
    file_with(&journal, b"abcdefgh");
    file_with(&contrib, b"xyz");
    file_with(&urls, b"123456");

    let mut log = CheckpointLog::open(&dir.path().join("checkpoint"), true).unwrap();
    log.append(&Checkpoint {
        time: 1,
        buckets_pos: 5,
        journal_pos: 4,
        contrib_pos: 3,
        urls_pos: 2,
    })
    .unwrap();

    // Simulate more work happening after the checkpoint.
    let mut f = fs::OpenOptions::new().append(true).open(&buckets).unwrap();
    f.write_all(b"MORE").unwrap();

    let cp = log.latest().unwrap();
    let files = CheckpointedFiles {
        buckets: &buckets,
        journal: &journal,
        contrib: &contrib,
        urls: &urls,
    };
    rollback_to_checkpoint(&files, &cp).unwrap();

    assert_eq!(fs::read(&buckets).unwrap(), b"01234");
    assert_eq!(fs::read(&journal).unwrap(), b"abcd");
    assert_eq!(fs::read(&contrib).unwrap(), b"xyz");
    assert_eq!(fs::read(&urls).unwrap(), b"12");
}

#[test]
fn empty_log_rolls_back_to_checkpoint_zero() {
    let dir = tempfile::tempdir().unwrap();
    let buckets = dir.path().join("buckets");
    let journal = dir.path().join("journal");
    let contrib = dir.path().join("contrib");
    let urls = dir.path().join("urls");
    for p in [&buckets, &journal, &contrib, &urls] {
        file_with(p, b"leftover");
    }

    let mut log = CheckpointLog::open(&dir.path().join("checkpoint"), true).unwrap();
    assert!(log.is_empty());
    let cp = log.latest().unwrap();
    assert_eq!(cp, Checkpoint::ZERO);

    let files = CheckpointedFiles {
        buckets: &buckets,
        journal: &journal,
        contrib: &contrib,
        urls: &urls,
    };
    rollback_to_checkpoint(&files, &cp).unwrap();
    for p in [&buckets, &journal, &contrib, &urls] {
        assert!(fs::read(p).unwrap().is_empty());
    }
}
