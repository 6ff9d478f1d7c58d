//! The `verify_contrib` pipeline: classify a candidate contribution through
//! an external content filter, dedup it against the contribution store's
//! in-memory hash, and append it.

use shepherd_core::contrib::{ContribFlags, ContribRecord};
use shepherd_core::footprint::{footprint, UrlParts};
use shepherd_core::{Error, Result};
use shepherd_storage::contrib_store::ContribStore;

/// A content filter's verdict on one candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The URL may be crawled, tagged with the given classifier values.
    Accept {
        /// Classifier tag.
        area: u16,
        /// Classifier tag.
        section: u16,
    },
    /// The URL is rejected outright.
    Reject {
        /// Filter-provided numeric code.
        code: i32,
        /// Human-readable rejection reason.
        message: String,
    },
}

/// The external content-filter collaborator.
pub trait ContentFilter {
    /// Classify one candidate URL.
    fn classify(&self, url: &str) -> FilterVerdict;
}

/// A filter that accepts everything untagged, sufficient to drive the
/// local reap path end-to-end in tests without a real filter library.
#[derive(Debug, Default)]
pub struct AcceptAllFilter;

impl ContentFilter for AcceptAllFilter {
    fn classify(&self, _url: &str) -> FilterVerdict {
        FilterVerdict::Accept { area: 0, section: 0 }
    }
}

/// One not-yet-verified contribution, as extracted from a downloaded
/// page's links.
pub struct Candidate<'a> {
    /// Already-canonicalised URL parts.
    pub parts: UrlParts<'a>,
    /// The canonical URL text, stored alongside the footprint.
    pub url: &'a str,
    /// Weight to assign (already gapped from the parent page's weight
    /// by `Config::contrib_gap`).
    pub weight: u8,
    /// Flags to carry onto the contribution.
    pub flags: ContribFlags,
}

/// Run one candidate through the filter, dedup it against `store`'s
/// in-memory hash, and append it if it survives both.
///
/// Returns `Ok(Some(offset))` if appended, `Ok(None)` if silently
/// dropped as a duplicate, or `Err(Error::FilterRejected)` if the
/// filter rejected it (the caller decides whether a rejection is
/// merely logged or escalated).
pub fn verify_contrib(
    filter: &dyn ContentFilter,
    store: &mut ContribStore,
    candidate: Candidate<'_>,
) -> Result<Option<u64>> {
    let fp = footprint(&candidate.parts);
    if store.is_duplicate(&fp) {
        return Ok(None);
    }

    let (area, section) = match filter.classify(candidate.url) {
        FilterVerdict::Accept { area, section } => (area, section),
        FilterVerdict::Reject { code, message } => {
            return Err(Error::FilterRejected { code, message })
        }
    };

    let rec = ContribRecord {
        fp,
        area,
        url_len: candidate.url.len() as u16,
        weight: candidate.weight,
        section,
        flags: candidate.flags,
        url: candidate.url.to_string(),
    };
    let offset = store.append(&rec)?;
    Ok(Some(offset))
}
