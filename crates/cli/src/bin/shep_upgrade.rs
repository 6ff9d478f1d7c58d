//! `shep-upgrade`: migrate a state directory's `params.format_version`.
//! Only ever moves the version forward; refuses a state directory whose
//! on-disk version is already newer than this binary understands.

use anyhow::{Context, Result};
use clap::Parser;
use shepherd_storage::state_dir::{StateDir, FORMAT_VERSION};
use std::path::PathBuf;

/// Upgrade a state directory's on-disk format version in place.
#[derive(Parser, Debug)]
#[command(name = "shep-upgrade", version, about)]
struct Args {
    /// State directory to upgrade.
    state: PathBuf,

    /// Target format version. Defaults to this build's current version.
    #[arg(long)]
    to: Option<u16>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut state_dir = StateDir::open(&args.state).context("opening state directory")?;
    let before = state_dir.params().format_version;
    let target = args.to.unwrap_or(FORMAT_VERSION);

    if before == target {
        println!("already at format_version {:#x}", before);
        return Ok(());
    }

    state_dir
        .upgrade_format_version(target)
        .context("upgrading format_version")?;
    println!("upgraded format_version {:#x} -> {:#x}", before, target);
    Ok(())
}
