//! `shep-cleanup`: offline housekeeping between reap cycles — drop index
//! records tombstoned by a prior manual operation or discard pass, and
//! report the URL database's footprint-sorted view without mutating it. Run
//! this only while the daemon holds no lock on the target state directory
//! (typically after `SetCleanup`/`SET_CLEANUP` has taken effect and the
//! daemon has gone idle).

use anyhow::{Context, Result};
use clap::Parser;
use shepherd_core::url_state::Oid;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::state_dir::{files, StateDir};
use shepherd_storage::urldb::UrlDb;
use std::path::PathBuf;

/// Compact a state directory's index, physically dropping tombstoned
/// (`Oid::DELETED`) records.
#[derive(Parser, Debug)]
#[command(name = "shep-cleanup", version, about)]
struct Args {
    /// State directory to clean up.
    state: PathBuf,

    /// Only report what would be dropped; don't rewrite the index.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let state_dir = StateDir::open(&args.state).context("opening state directory")?;
    let mut index = UrlIndex::open(&state_dir.file(files::INDEX), !args.dry_run)
        .context("opening index")?;
    let records = index.iter()?;

    let live: Vec<_> = records.iter().filter(|r| r.oid != Oid::DELETED).cloned().collect();
    let dropped = records.len() - live.len();
    println!("{} of {} records tombstoned", dropped, records.len());

    if !args.dry_run && dropped > 0 {
        for (i, rec) in live.iter().enumerate() {
            index.set(i as u64, rec)?;
        }
        index.truncate(live.len() as u64)?;
        index.sync()?;
        println!("compacted index to {} records", live.len());
    }

    let urls_path = state_dir.file(files::URLS);
    if urls_path.exists() {
        let urldb = UrlDb::open(&urls_path, false).context("opening url database")?;
        let sorted = urldb.sorted_by_footprint()?;
        println!("url database: {} rows", sorted.len());
    }

    Ok(())
}
