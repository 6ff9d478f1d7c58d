//! The sort stage: impose a footprint-unique total order on the index and
//! flip `ParamsFlags::SORTED`. A thin wrapper over `shepherd-storage`'s
//! [`ExternalSorter`]/[`UrlIndex`]/`StateDir`, since the actual sorting
//! algorithm is already fully general there.

use shepherd_core::{Footprint, Result, UrlState};
use shepherd_storage::sort::{ExternalSorter, SortOrder};
use shepherd_storage::state_dir::StateDir;
use shepherd_storage::UrlIndex;

/// Counters from one sort pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Records written to the sorted index.
    pub written: u64,
    /// Duplicate footprints collapsed into one record.
    pub duplicates_collapsed: u64,
}

/// Sort `index`'s records by footprint via `sorter`, collapse any
/// duplicate footprints (keeping the last one seen, matching the
/// journal-replay precedent in `shepherd-durability::recovery`),
/// rewrite the index in place, and mark the owning state directory
/// sorted.
pub fn sort_index(
    index: &mut UrlIndex,
    sorter: &dyn ExternalSorter,
    state_dir: &mut StateDir,
) -> Result<SortStats> {
    let records = index.iter()?;
    let sorted = sorter.sort(Box::new(records.into_iter().map(Ok)), SortOrder::ByFootprint)?;

    let mut last_fp: Option<Footprint> = None;
    let mut deduped: Vec<UrlState> = Vec::new();
    let mut stats = SortStats::default();

    for rec in sorted {
        let rec = rec?;
        if last_fp == Some(rec.fp) {
            stats.duplicates_collapsed += 1;
            *deduped.last_mut().unwrap() = rec;
        } else {
            last_fp = Some(rec.fp);
            deduped.push(rec);
        }
    }

    let original_len = index.len();
    for (i, rec) in deduped.iter().enumerate() {
        if (i as u64) < original_len {
            index.set(i as u64, rec)?;
        } else {
            index.append(rec)?;
        }
    }
    if (deduped.len() as u64) < original_len {
        index.truncate(deduped.len() as u64)?;
    }
    stats.written = deduped.len() as u64;

    index.sync()?;
    state_dir.set_sorted(true)?;

    Ok(stats)
}
