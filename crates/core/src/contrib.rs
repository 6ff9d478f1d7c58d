//! Contribution records: URLs observed as links on a downloaded page,
//! buffered until the next merge phase.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// User/filter-supplied flags carried from the contribution into the
    /// `NEW` index record the merge stage creates for it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ContribFlags: u8 {
        /// Contributor marked this URL for unconditional re-fetch.
        const REGATHER = 1 << 0;
        /// This contribution is the auto-go-root synthetic root page.
        const AUTO_GO_ROOT = 1 << 1;
    }
}

/// One append-only contribution-store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContribRecord {
    /// Footprint of the contributed URL.
    pub fp: crate::footprint::Footprint,
    /// Classifier tag inherited from the filter.
    pub area: u16,
    /// Byte length of `url`.
    pub url_len: u16,
    /// Parent-page weight minus the configured contribution gap.
    pub weight: u8,
    /// Classifier tag inherited from the filter.
    pub section: u16,
    /// See [`ContribFlags`].
    pub flags: ContribFlags,
    /// The canonicalised URL text.
    pub url: String,
}

impl ContribRecord {
    /// Size in bytes this record occupies once encoded and padded to a
    /// 16-byte boundary, used to size the in-memory dedup hash against
    /// `Config::contrib_cache_size`.
    pub fn padded_len(&self) -> usize {
        // fp(32) + area(2) + url_len(2) + weight(1) + section(2) + flags(1) + url
        let raw = 32 + 2 + 2 + 1 + 2 + 1 + self.url.len();
        (raw + 15) & !15
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::Footprint;

    #[test]
    fn padded_len_rounds_up_to_16() {
        let rec = ContribRecord {
            fp: Footprint::new([0; 16], [0; 16]),
            area: 0,
            url_len: 1,
            weight: 10,
            section: 0,
            flags: ContribFlags::empty(),
            url: "a".to_string(),
        };
        assert_eq!(rec.padded_len() % 16, 0);
        assert!(rec.padded_len() >= 41);
    }
}
