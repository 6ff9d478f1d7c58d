//! Queueing keys: the 64-bit `(channel, port, skey)` value the reaper
//! schedules on.

use serde::{Deserialize, Serialize};

/// A host's resolved IPv4 address (or one of the reserved pseudo-skeys
/// below), the 32-bit component of a [`Qkey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Skey(pub u32);

/// Top byte of the reserved `UNRESOLVED` skey range.
const UNRESOLVED_PREFIX: u32 = 0x0000_0000;
/// Top byte of the reserved `NONEXISTENT` skey range.
const NONEXISTENT_PREFIX: u32 = 0x7f02_0000;
/// Top byte of the reserved `NONIP` skey range.
const NONIP_PREFIX: u32 = 0x7f01_0000;
/// Mask isolating the reserved bucket index within a pseudo-skey.
const PSEUDO_MASK: u32 = 0x0000_ffff;

impl Skey {
    /// Build an `UNRESOLVED` pseudo-skey, randomised into one of
    /// `max_resolvers` buckets so resolver work fans out instead of
    /// serialising on a single qnode.
    pub fn unresolved(bucket: u32, max_resolvers: u32) -> Skey {
        debug_assert!(max_resolvers > 0);
        Skey(UNRESOLVED_PREFIX | (bucket % max_resolvers))
    }

    /// Build a `NONEXISTENT` pseudo-skey, randomised into one of
    /// `max_flushers` buckets.
    pub fn nonexistent(bucket: u32, max_flushers: u32) -> Skey {
        debug_assert!(max_flushers > 0);
        Skey(NONEXISTENT_PREFIX | (bucket % max_flushers))
    }

    /// Build the single `NONIP` pseudo-skey for a site whose host
    /// resolves to something other than an IPv4 address.
    pub fn nonip(bucket: u32) -> Skey {
        Skey(NONIP_PREFIX | (bucket & PSEUDO_MASK))
    }

    /// True if this is a real resolved IPv4 address rather than a
    /// reserved pseudo-skey.
    pub fn is_resolved(&self) -> bool {
        !self.is_unresolved() && !self.is_nonexistent() && !self.is_nonip()
    }

    /// True if within the `UNRESOLVED` range.
    pub fn is_unresolved(&self) -> bool {
        (self.0 & !PSEUDO_MASK) == UNRESOLVED_PREFIX
    }

    /// True if within the `NONEXISTENT` range.
    pub fn is_nonexistent(&self) -> bool {
        (self.0 & !PSEUDO_MASK) == NONEXISTENT_PREFIX
    }

    /// True if within the `NONIP` range.
    pub fn is_nonip(&self) -> bool {
        (self.0 & !PSEUDO_MASK) == NONIP_PREFIX
    }
}

/// Channel assignment within a host. Normal hosts use channel 0; the
/// planner may assign additional channels to a host whose site record
/// supports concurrent downloads.
pub type Channel = u8;

/// `(channel: u8, port: u16, skey: u32)` packed into 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Qkey(pub u64);

impl Qkey {
    /// Pack a queueing key.
    pub fn new(channel: Channel, port: u16, skey: Skey) -> Qkey {
        Qkey(((channel as u64) << 48) | ((port as u64) << 32) | skey.0 as u64)
    }

    /// Unpack the channel.
    pub fn channel(&self) -> Channel {
        (self.0 >> 48) as u8
    }

    /// Unpack the port.
    pub fn port(&self) -> u16 {
        (self.0 >> 32) as u16
    }

    /// Unpack the skey.
    pub fn skey(&self) -> Skey {
        Skey(self.0 as u32)
    }

    /// A copy of this qkey forced to channel 0, used when migrating a
    /// qsite after its site's skey changed").
    pub fn with_channel_zero(&self) -> Qkey {
        Qkey::new(0, self.port(), self.skey())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_pack_unpack() {
        let q = Qkey::new(3, 8080, Skey(0x0102_0304));
        assert_eq!(q.channel(), 3);
        assert_eq!(q.port(), 8080);
        assert_eq!(q.skey(), Skey(0x0102_0304));
    }

    #[test]
    fn unresolved_bucket_is_within_range() {
        let s = Skey::unresolved(5, 16);
        assert!(s.is_unresolved());
        assert_eq!(s.0, 5);
    }

    #[test]
    fn nonexistent_bucket_is_in_reserved_prefix() {
        let s = Skey::nonexistent(3, 8);
        assert!(s.is_nonexistent());
        assert!(!s.is_resolved());
    }

    #[test]
    fn resolved_ip_is_outside_all_reserved_ranges() {
        let s = Skey(0x0A00_0001); // 10.0.0.1
        assert!(s.is_resolved());
        assert!(!s.is_unresolved());
        assert!(!s.is_nonexistent());
        assert!(!s.is_nonip());
    }

    #[test]
    fn with_channel_zero_preserves_port_and_skey() {
        let q = Qkey::new(2, 443, Skey(7));
        let z = q.with_channel_zero();
        assert_eq!(z.channel(), 0);
        assert_eq!(z.port(), 443);
        assert_eq!(z.skey(), Skey(7));
    }
}
