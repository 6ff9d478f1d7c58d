//! The record stage: materialises `CONTRIB`-flagged index records into real
//! bucket entries (or, for `AutoGoRoot` candidates, synthesizes a bucket
//! directly), drops stale `Skey`/`Robots` records whose site vanished from
//! the site table, and appends the URL database entry for anything newly
//! materialised.

use shepherd_core::footprint::{Footprint, SKEY};
use shepherd_core::url_state::{Oid, UrlFlags, UrlKind};
use shepherd_core::{Error, Result, UrlState};
use shepherd_storage::bucket::{BucketStore, BucketType};
use shepherd_storage::urldb::{UrlDb, UrlDbEntry};

use crate::reap::FetchOutcome;
use crate::site_table::SiteTable;

/// Counters from one record pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Records materialised into a real (downloaded) bucket.
    pub materialised: u64,
    /// `AutoGoRoot` candidates synthesized into a placeholder bucket.
    pub synthesized: u64,
    /// Stale `Skey`/`Robots` records dropped (their site vanished).
    pub stale_dropped: u64,
    /// URL-database rows appended.
    pub urldb_rows: u64,
}

/// Materialise one successfully fetched record: write its body into a
/// real bucket, clear `CONTRIB`, set `oid`/`kind`/`download_time`, and
/// (if a URL database is attached) append its row.
pub fn materialise_fetch(
    rec: &mut UrlState,
    outcome: &FetchOutcome,
    url: &str,
    buckets: &mut BucketStore,
    urldb: Option<&mut UrlDb>,
) -> Result<()> {
    // Robots bodies are stored as plain pages; only synthesized
    // (never-fetched) buckets use `BucketType::Synthetic`.
    let mut writer = buckets.create()?;
    writer.write(&outcome.body);
    let header = buckets.create_end(writer, BucketType::Page)?;

    rec.oid = Oid(header.oid);
    rec.kind = UrlKind::Ok;
    rec.download_time = UrlState::encode_download_time(outcome.download_time_tenths);
    rec.flags.remove(UrlFlags::CONTRIB);

    if let Some(db) = urldb {
        db.append(&UrlDbEntry {
            oid: rec.oid,
            fp: rec.fp,
            url: url.to_string(),
        })?;
    }
    Ok(())
}

/// Synthesize a placeholder bucket for an `AutoGoRoot` candidate that
/// was never actually fetched: a zero-length `Synthetic` bucket, just
/// enough for the oid to resolve.
pub fn synthesize_auto_go_root(rec: &mut UrlState, buckets: &mut BucketStore) -> Result<()> {
    let writer = buckets.create()?;
    let header = buckets.create_end(writer, BucketType::Synthetic)?;
    rec.oid = Oid(header.oid);
    rec.kind = UrlKind::Ok;
    rec.flags.remove(UrlFlags::CONTRIB);
    Ok(())
}

/// True if a `Skey`/`Robots` record's owning site is no longer in the
/// site table.
pub fn is_stale(rec: &UrlState, sites: &SiteTable) -> bool {
    let per_site_record = matches!(rec.kind, UrlKind::Skey) || rec.flags.contains(UrlFlags::ROBOTS);
    per_site_record && sites.get(&rec.fp.site_fp).is_none()
}

/// Run one record pass over every index record flagged `CONTRIB`,
/// dispatching each to [`materialise_fetch`] (if `fetch_results`
/// carries an outcome for it) or [`synthesize_auto_go_root`] (if it
/// carries `ContribFlags::AUTO_GO_ROOT` provenance and no real fetch
/// happened), and dropping any stale per-site record along the way.
pub fn record_pass(
    records: &mut [UrlState],
    fetch_results: &std::collections::HashMap<Footprint, (FetchOutcome, String)>,
    auto_go_root_fps: &std::collections::HashSet<Footprint>,
    sites: &SiteTable,
    buckets: &mut BucketStore,
    mut urldb: Option<&mut UrlDb>,
) -> Result<RecordStats> {
    let mut stats = RecordStats::default();

    for rec in records.iter_mut() {
        if is_stale(rec, sites) {
            rec.oid = Oid::DELETED;
            stats.stale_dropped += 1;
            continue;
        }

        if !rec.flags.contains(UrlFlags::CONTRIB) {
            continue;
        }

        if let Some((outcome, url)) = fetch_results.get(&rec.fp) {
            materialise_fetch(rec, outcome, url, buckets, urldb.as_deref_mut())?;
            stats.materialised += 1;
            if urldb.is_some() {
                stats.urldb_rows += 1;
            }
        } else if auto_go_root_fps.contains(&rec.fp) {
            synthesize_auto_go_root(rec, buckets)?;
            stats.synthesized += 1;
        }
    }

    Ok(stats)
}

/// Build (or find) a site's synthetic `SKEY` record, materialising it
/// with its resolved server-key value directly.
pub fn skey_footprint(site_fp: [u8; 16]) -> Footprint {
    Footprint::new(site_fp, SKEY)
}

/// Guard against accidentally materialising a record that has no
/// fetch target.
pub fn assert_has_target(rec: &UrlState) -> Result<()> {
    if rec.no_target {
        return Err(Error::InvariantViolation(
            "attempted to materialise a no_target record".into(),
        ));
    }
    Ok(())
}
