//! The in-memory site hash and its `sites`-file I/O.

use rustc_hash::FxHashMap;
use shepherd_core::qkey::Skey;
use shepherd_core::site::Site;
use shepherd_core::{Config, Result};
use shepherd_storage::sites_file;
use std::io::{Read, Write};
use std::path::Path;

/// An in-memory table of [`Site`] records keyed by `site_fp`, backed by
/// `rustc-hash` for the footprint keys, rebuilt wholesale from the `sites`
/// file at `prepare` time; it isn't itself durable between cycles.
#[derive(Debug, Default)]
pub struct SiteTable {
    sites: FxHashMap<[u8; 16], Site>,
}

impl SiteTable {
    /// An empty table.
    pub fn new() -> SiteTable {
        SiteTable::default()
    }

    /// Load a table from an already-open `sites` file reader.
    pub fn load<R: Read>(r: &mut R) -> Result<SiteTable> {
        let sites = sites_file::read_sites(r)?;
        let mut table = FxHashMap::default();
        for site in sites {
            table.insert(site.fp, site);
        }
        Ok(SiteTable { sites: table })
    }

    /// Persist the table to a `sites` file writer, sites in `site_fp`
    /// order so the save is idempotent byte-for-byte across runs with
    /// unchanged input.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut sites: Vec<&Site> = self.sites.values().collect();
        sites.sort_by_key(|s| s.fp);
        let owned: Vec<Site> = sites.into_iter().cloned().collect();
        sites_file::write_sites(w, &owned)
    }

    /// Number of sites in the table.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// True if the table holds no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Look up a site by footprint.
    pub fn get(&self, fp: &[u8; 16]) -> Option<&Site> {
        self.sites.get(fp)
    }

    /// Mutably look up a site by footprint.
    pub fn get_mut(&mut self, fp: &[u8; 16]) -> Option<&mut Site> {
        self.sites.get_mut(fp)
    }

    /// Fetch a site, creating it on demand with an `UNRESOLVED`
    /// pseudo-skey and config-derived defaults.
    pub fn get_or_create(
        &mut self,
        fp: [u8; 16],
        proto: u8,
        host: &str,
        port: u16,
        cfg: &Config,
        resolver_bucket: u32,
    ) -> &mut Site {
        self.sites.entry(fp).or_insert_with(|| Site {
            fp,
            norm_fp: fp,
            proto,
            host: host.to_string(),
            port,
            skey: Skey::unresolved(resolver_bucket, cfg.max_resolvers),
            soft_limit: u32::MAX,
            hard_limit: u32::MAX,
            fresh_limit: u32::MAX,
            min_delay: 1,
            queue_bonus: 0,
            select_bonus: 0,
            max_conn: 1,
            monitor: false,
            refresh_schema: 0,
            refresh_boost: 0,
            rejected: false,
            num_active: 0,
            num_inactive: 0,
            num_fresh: 0,
        })
    }

    /// Iterate all sites.
    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    /// Iterate all sites, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Site> {
        self.sites.values_mut()
    }

    /// Drop a site from the table outright (used when a site is
    /// rejected by the content filter at load time).
    pub fn remove(&mut self, fp: &[u8; 16]) -> Option<Site> {
        self.sites.remove(fp)
    }
}
