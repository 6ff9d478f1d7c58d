//! IP-based authorisation.

use std::net::IpAddr;

/// True if `peer` may use the control protocol. An empty
/// `Config::authorized_ips` list means no restriction is configured —
/// the daemon's own default, matching every other optional allow-list
/// in `Config` (empty means "don't filter").
pub fn is_authorized(authorized_ips: &[String], peer: IpAddr) -> bool {
    if authorized_ips.is_empty() {
        return true;
    }
    let peer_text = peer.to_string();
    authorized_ips.iter().any(|allowed| allowed == &peer_text)
}
