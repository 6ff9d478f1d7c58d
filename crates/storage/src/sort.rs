//! Abstract external-sort interface. The original's coroutine-style scan
//! cursors map cleanly onto a lazy, finite, one-shot sequence of records —
//! a plain `Iterator` — so `ExternalSorter` returns a boxed iterator rather
//! than a collected `Vec`, keeping peak memory bounded regardless of how
//! large the sorted set is. The default implementation ([`InMemorySorter`])
//! just collects-then-sorts, suitable for the local/test path named in
//! `shepherd-libsorter`'s Non-goals; a real external merge-sort belongs
//! behind the same trait without callers changing.

use shepherd_core::footprint::Footprint;
use shepherd_core::url_state::Oid;
use shepherd_core::{Result, UrlState};

/// Which field to sort `UrlState` records by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Sort by footprint.
    ByFootprint,
    /// Sort by bucket oid (used when compacting the bucket store
    /// alongside a shakedown).
    ByOid,
}

fn key_footprint(rec: &UrlState) -> Footprint {
    rec.fp
}

fn key_oid(rec: &UrlState) -> Oid {
    rec.oid
}

/// A one-shot, forward-only, already-sorted sequence of records.
pub type SortedStream = Box<dyn Iterator<Item = Result<UrlState>>>;

/// Sorts a (possibly large) input sequence of `UrlState` records.
pub trait ExternalSorter {
    /// Consume `input`, returning a stream of the same records in
    /// `order`. Ties within the same key preserve input order (a
    /// stable sort), matching the planner's expectation that entries
    /// sharing a priority retain their natural discovery order.
    fn sort(
        &self,
        input: Box<dyn Iterator<Item = Result<UrlState>>>,
        order: SortOrder,
    ) -> Result<SortedStream>;
}

/// Collect-then-sort implementation suitable for the local path and
/// for tests; bounded only by available memory.
#[derive(Debug, Default)]
pub struct InMemorySorter;

impl ExternalSorter for InMemorySorter {
    fn sort(
        &self,
        input: Box<dyn Iterator<Item = Result<UrlState>>>,
        order: SortOrder,
    ) -> Result<SortedStream> {
        let mut records = input.collect::<Result<Vec<_>>>()?;
        match order {
            SortOrder::ByFootprint => records.sort_by_key(key_footprint),
            SortOrder::ByOid => records.sort_by_key(key_oid),
        }
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::footprint::Footprint as Fp;
    use shepherd_core::url_state::UrlFlags;

    fn rec(site: u8, rest: u8, oid: u32) -> UrlState {
        let mut r = UrlState::new(Fp::new([site; 16], [rest; 16]), 10, UrlFlags::empty());
        r.oid = Oid(oid);
        r
    }

    #[test]
    fn sorts_by_footprint_ascending() {
        let input: Vec<Result<UrlState>> = vec![Ok(rec(3, 0, 1)), Ok(rec(1, 0, 2)), Ok(rec(2, 0, 3))];
        let sorter = InMemorySorter;
        let out: Vec<UrlState> = sorter
            .sort(Box::new(input.into_iter()), SortOrder::ByFootprint)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(out.iter().map(|r| r.fp.site_fp[0]).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn sorts_by_oid() {
        let input: Vec<Result<UrlState>> = vec![Ok(rec(1, 0, 30)), Ok(rec(2, 0, 10)), Ok(rec(3, 0, 20))];
        let sorter = InMemorySorter;
        let out: Vec<UrlState> = sorter
            .sort(Box::new(input.into_iter()), SortOrder::ByOid)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(out.iter().map(|r| r.oid.0).collect::<Vec<_>>(), vec![10, 20, 30]);
    }

    #[test]
    fn propagates_errors_from_input() {
        let input: Vec<Result<UrlState>> =
            vec![Ok(rec(1, 0, 1)), Err(shepherd_core::Error::Corruption("bad".into()))];
        let sorter = InMemorySorter;
        assert!(sorter
            .sort(Box::new(input.into_iter()), SortOrder::ByFootprint)
            .is_err());
    }
}
