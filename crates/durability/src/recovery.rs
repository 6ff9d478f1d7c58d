//! Crash recovery: journal replay and rollback to a prior checkpoint.

use shepherd_core::{Checkpoint, Result};
use shepherd_storage::index::UrlIndex;
use std::collections::HashMap;
use std::path::Path;

/// The four append-only files a [`Checkpoint`] records positions for.
pub struct CheckpointedFiles<'a> {
    /// Bucket store path.
    pub buckets: &'a Path,
    /// Journal path.
    pub journal: &'a Path,
    /// Contribution store path.
    pub contrib: &'a Path,
    /// URL database path.
    pub urls: &'a Path,
}

/// Truncate each of the four reap-cycle files back to the lengths
/// recorded in `cp`, discarding anything written since.
pub fn rollback_to_checkpoint(files: &CheckpointedFiles<'_>, cp: &Checkpoint) -> Result<()> {
    truncate_to(files.buckets, cp.buckets_pos)?;
    truncate_to(files.journal, cp.journal_pos)?;
    truncate_to(files.contrib, cp.contrib_pos)?;
    truncate_to(files.urls, cp.urls_pos)?;
    Ok(())
}

fn truncate_to(path: &Path, len: u64) -> Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    if file.metadata()?.len() > len {
        file.set_len(len)?;
        file.sync_all()?;
    }
    Ok(())
}

/// Replay journal records from `from_record` onward into `index`,
/// overwriting any existing record that shares a footprint (the normal
/// case: a journal row supersedes the index row it was derived from)
/// and appending otherwise. Returns the journal record count to resume
/// replay from next time (i.e. `journal.len()` at the time of the
/// call), so a caller can track replay progress across restarts
/// without re-reading the whole journal each time.
pub fn replay_journal_into_index(
    journal: &mut UrlIndex,
    index: &mut UrlIndex,
    from_record: u64,
) -> Result<u64> {
    let total = journal.len();
    if from_record >= total {
        return Ok(total);
    }

    let mut by_fp: HashMap<_, u64> = HashMap::new();
    for i in 0..index.len() {
        let rec = index.get(i)?;
        by_fp.insert(rec.fp, i);
    }

    for i in from_record..total {
        let rec = journal.get(i)?;
        if let Some(&existing) = by_fp.get(&rec.fp) {
            index.set(existing, &rec)?;
        } else {
            let new_i = index.append(&rec)?;
            by_fp.insert(rec.fp, new_i);
        }
    }
    index.sync()?;
    Ok(total)
}
