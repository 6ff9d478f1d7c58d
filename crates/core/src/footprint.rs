//! URL footprints: the 256-bit identity used to sort, merge and dedup
//! every URL in the system. A footprint is `(site_fp, rest_fp)`, each half
//! an MD5 digest. Keeping the two halves separate (rather than hashing the
//! whole URL at once) is what lets the merge stage group records by site
//! without re-parsing the URL: it just compares the first sixteen bytes.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// `rest_fp` for a site's `/robots.txt`.
pub const ROBOTS_TXT: [u8; 16] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// `rest_fp` for a site's root page (`/`).
pub const ROOT: [u8; 16] = [
    0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// `rest_fp` marking a synthetic `SKEY` record (all-zero).
pub const SKEY: [u8; 16] = [0u8; 16];

/// A 256-bit URL identity: `(site_fp, rest_fp)`.
///
/// Total order is lexicographic on `(site_fp, rest_fp)` — this is the
/// total order the `index` file is kept sorted under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    /// MD5 of `(protocol_id, port, host)`.
    pub site_fp: [u8; 16],
    /// MD5 of the URL path + query.
    pub rest_fp: [u8; 16],
}

impl Footprint {
    /// Build a footprint directly from its two halves.
    pub const fn new(site_fp: [u8; 16], rest_fp: [u8; 16]) -> Self {
        Footprint { site_fp, rest_fp }
    }

    /// First 32 bits of `site_fp`, used as the hash-table bucket key for
    /// the site table.
    pub fn site_hash32(&self) -> u32 {
        u32::from_be_bytes(self.site_fp[0..4].try_into().unwrap())
    }

    /// True if `rest_fp` is the well-known `SKEY` marker.
    pub fn is_skey(&self) -> bool {
        self.rest_fp == SKEY
    }

    /// True if `rest_fp` is the well-known robots.txt marker.
    pub fn is_robots(&self) -> bool {
        self.rest_fp == ROBOTS_TXT
    }

    /// A footprint sharing this one's `site_fp` but with `rest_fp` set to
    /// [`SKEY`] — used to find/create a site's synthetic SKEY record.
    pub fn skey_of_site(site_fp: [u8; 16]) -> Self {
        Footprint::new(site_fp, SKEY)
    }

    /// Parse the `site_fp:rest_fp` hex form produced by [`Display`],
    /// used by text-based formats such as the state log.
    ///
    /// [`Display`]: fmt::Display
    pub fn parse_hex(s: &str) -> Result<Self, crate::Error> {
        let (site, rest) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::Corruption(format!("malformed footprint {s:?}")))?;
        Ok(Footprint::new(parse_hex16(site)?, parse_hex16(rest)?))
    }
}

fn parse_hex16(s: &str) -> Result<[u8; 16], crate::Error> {
    if s.len() != 32 {
        return Err(crate::Error::Corruption(format!(
            "expected 32 hex chars, got {}",
            s.len()
        )));
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|_| crate::Error::Corruption(format!("invalid hex in footprint {s:?}")))?;
    }
    Ok(out)
}

impl fmt::Debug for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Footprint({}:{})", hex(&self.site_fp), hex(&self.rest_fp))
    }
}

impl fmt::Display for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex(&self.site_fp), hex(&self.rest_fp))
    }
}

impl PartialOrd for Footprint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Footprint {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.site_fp, self.rest_fp).cmp(&(other.site_fp, other.rest_fp))
    }
}

fn hex(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Protocol identifiers used when hashing `site_fp``).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    /// `http://`
    Http = 0,
    /// `https://`
    Https = 1,
}

/// Compute `site_fp = md5(protocol_id || port_be16 || host_bytes)`.
pub fn site_fp(protocol: Protocol, port: u16, host: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([protocol as u8]);
    hasher.update(port.to_be_bytes());
    hasher.update(host.to_ascii_lowercase().as_bytes());
    hasher.finalize().into()
}

/// Compute `rest_fp = md5(path + query)`. The well-known constants
/// ([`ROBOTS_TXT`], [`ROOT`], [`SKEY`]) are never produced by this
/// function in practice (an MD5 collision with them is astronomically
/// unlikely); callers that need the synthetic footprints use the
/// constants directly rather than hashing `"/robots.txt"`.
pub fn rest_fp(path_and_query: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(path_and_query.as_bytes());
    hasher.finalize().into()
}

/// A minimally parsed URL: enough to derive a footprint without pulling
/// in a full URL-parsing dependency. Canonicalisation (percent-decoding,
/// default-port stripping, path normalisation) is the contribution
/// filter's job; this type expects already-canonical parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts<'a> {
    /// Scheme (`http` or `https`).
    pub protocol: Protocol,
    /// Host, already lower-cased.
    pub host: &'a str,
    /// Port, with the scheme default already filled in.
    pub port: u16,
    /// Path + query, already normalised.
    pub path_and_query: &'a str,
}

/// Compute the full footprint of a canonical URL.
pub fn footprint(url: &UrlParts<'_>) -> Footprint {
    Footprint::new(
        site_fp(url.protocol, url.port, url.host),
        rest_fp(url.path_and_query),
    )
}
