//! `shep-init`: create an empty, freshly-formatted state directory
//! with no index records, no sites, and no contributions — the starting
//! point a fresh crawl or a test fixture boots from.

use anyhow::{Context, Result};
use clap::Parser;
use shepherd_storage::bucket::BucketStore;
use shepherd_storage::contrib_store::ContribStore;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::state_dir::{files, StateDir};
use std::path::PathBuf;

/// Create an empty Shepherd state directory.
#[derive(Parser, Debug)]
#[command(name = "shep-init", version, about)]
struct Args {
    /// Path to create. Must not already exist.
    state: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let state_dir = StateDir::create(&args.state).context("creating state directory")?;

    UrlIndex::open(&state_dir.file(files::INDEX), true).context("creating index file")?;
    BucketStore::open(&state_dir.file(files::BUCKETS), true, u64::MAX, 0)
        .context("creating buckets file")?;
    ContribStore::open(&state_dir.file(files::CONTRIB), true, 0)
        .context("creating contrib file")?;

    let mut sites_file = std::fs::File::create(state_dir.file(files::SITES))
        .context("creating sites file")?;
    shepherd_engine::site_table::SiteTable::new()
        .save(&mut sites_file)
        .context("writing empty site table")?;

    println!("initialized empty state directory at {}", args.state.display());
    Ok(())
}
