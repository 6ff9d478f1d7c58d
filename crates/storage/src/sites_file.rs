//! The `sites` file codec. Layout: a 4-byte magic, then for each site a
//! fixed-size `site_list_entry` record immediately followed by its
//! NUL-terminated host string.

use shepherd_core::qkey::Skey;
use shepherd_core::site::Site;
use shepherd_core::{Error, Result};
use std::io::{Read, Write};

/// Magic identifying a `sites` file.
pub const SITES_MAGIC: u32 = 0xb4b6_b293;

const FIXED_ENTRY_SIZE: usize = 16 + 16 + 1 + 2 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 1 + 1 + 1 + 1 + 4 + 4 + 4;

fn encode_entry(site: &Site) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_ENTRY_SIZE + site.host.len() + 1);
    buf.extend_from_slice(&site.fp);
    buf.extend_from_slice(&site.norm_fp);
    buf.push(site.proto);
    buf.extend_from_slice(&site.port.to_le_bytes());
    buf.extend_from_slice(&site.skey.0.to_le_bytes());
    buf.extend_from_slice(&site.soft_limit.to_le_bytes());
    buf.extend_from_slice(&site.hard_limit.to_le_bytes());
    buf.extend_from_slice(&site.fresh_limit.to_le_bytes());
    buf.extend_from_slice(&site.min_delay.to_le_bytes());
    buf.extend_from_slice(&site.queue_bonus.to_le_bytes());
    buf.extend_from_slice(&site.select_bonus.to_le_bytes());
    buf.push(site.max_conn);
    buf.push(site.monitor as u8);
    buf.push(site.refresh_schema);
    buf.push(site.refresh_boost);
    buf.push(site.rejected as u8);
    buf.extend_from_slice(&site.num_active.to_le_bytes());
    buf.extend_from_slice(&site.num_inactive.to_le_bytes());
    buf.extend_from_slice(&site.num_fresh.to_le_bytes());
    buf.extend_from_slice(site.host.as_bytes());
    buf.push(0);
    buf
}

fn decode_entry<R: Read>(r: &mut R) -> Result<Site> {
    let mut fixed = vec![0u8; FIXED_ENTRY_SIZE];
    r.read_exact(&mut fixed)?;
    let mut at = 0;
    let mut fp = [0u8; 16];
    fp.copy_from_slice(&fixed[at..at + 16]);
    at += 16;
    let mut norm_fp = [0u8; 16];
    norm_fp.copy_from_slice(&fixed[at..at + 16]);
    at += 16;
    let proto = fixed[at];
    at += 1;
    let port = u16::from_le_bytes(fixed[at..at + 2].try_into().unwrap());
    at += 2;
    let skey = Skey(u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap()));
    at += 4;
    let soft_limit = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let hard_limit = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let fresh_limit = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let min_delay = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let queue_bonus = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let select_bonus = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let max_conn = fixed[at];
    at += 1;
    let monitor = fixed[at] != 0;
    at += 1;
    let refresh_schema = fixed[at];
    at += 1;
    let refresh_boost = fixed[at];
    at += 1;
    let rejected = fixed[at] != 0;
    at += 1;
    let num_active = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let num_inactive = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    let num_fresh = u32::from_le_bytes(fixed[at..at + 4].try_into().unwrap());
    at += 4;
    debug_assert_eq!(at, FIXED_ENTRY_SIZE);

    let mut host = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        host.push(byte[0]);
    }
    let host = String::from_utf8(host)
        .map_err(|e| Error::Corruption(format!("site host is not UTF-8: {e}")))?;

    Ok(Site {
        fp,
        norm_fp,
        proto,
        host,
        port,
        skey,
        soft_limit,
        hard_limit,
        fresh_limit,
        min_delay,
        queue_bonus,
        select_bonus,
        max_conn,
        monitor,
        refresh_schema,
        refresh_boost,
        rejected,
        num_active,
        num_inactive,
        num_fresh,
    })
}

/// Write a full `sites` file.
pub fn write_sites<W: Write>(w: &mut W, sites: &[Site]) -> Result<()> {
    w.write_all(&SITES_MAGIC.to_le_bytes())?;
    for site in sites {
        w.write_all(&encode_entry(site))?;
    }
    Ok(())
}

/// Read a full `sites` file.
pub fn read_sites<R: Read>(r: &mut R) -> Result<Vec<Site>> {
    let mut magic_buf = [0u8; 4];
    r.read_exact(&mut magic_buf)?;
    if u32::from_le_bytes(magic_buf) != SITES_MAGIC {
        return Err(Error::Corruption("bad sites-file magic".into()));
    }
    let mut sites = Vec::new();
    loop {
        match decode_entry(r) {
            Ok(site) => sites.push(site),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(sites)
}
