//! `shep-dump`: render a state directory's `index`, `sites` and
//! `buckets` as readable text, for debugging and support requests.

use anyhow::{Context, Result};
use clap::Parser;
use shepherd_engine::site_table::SiteTable;
use shepherd_storage::bucket::BucketStore;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::state_dir::{files, StateDir};
use std::path::PathBuf;

/// Dump a state directory's contents as text.
#[derive(Parser, Debug)]
#[command(name = "shep-dump", version, about)]
struct Args {
    /// State directory to read.
    state: PathBuf,

    /// Also list every live bucket's oid and length.
    #[arg(long)]
    buckets: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let state_dir = StateDir::open(&args.state).context("opening state directory")?;
    let params = state_dir.params();
    println!(
        "params: format_version={:#x} sorted={}",
        params.format_version,
        params.flags.contains(shepherd_storage::state_dir::ParamsFlags::SORTED)
    );

    let mut index = UrlIndex::open(&state_dir.file(files::INDEX), false)
        .context("opening index")?;
    println!("index: {} records", index.len());
    for rec in index.iter()? {
        println!(
            "  fp={:02x?} oid={} kind={:?} weight={} last_seen={} retry={}",
            rec.fp.site_fp, rec.oid.0, rec.kind, rec.weight, rec.last_seen, rec.retry_count
        );
    }

    let mut sites_file = std::fs::File::open(state_dir.file(files::SITES))
        .context("opening sites file")?;
    let sites = SiteTable::load(&mut sites_file)?;
    println!("sites: {} entries", sites.len());
    for site in sites.iter() {
        println!("  host={} port={} fp={:02x?}", site.host, site.port, site.fp);
    }

    if args.buckets {
        let store = BucketStore::open(&state_dir.file(files::BUCKETS), false, u64::MAX, 0)
            .context("opening buckets")?;
        for entry in store.slurp(None)? {
            let (header, body) = entry?;
            println!("  bucket oid={} kind={:?} len={}", header.oid, header.kind, body.len());
        }
    }

    Ok(())
}
