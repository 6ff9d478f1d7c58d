//! `shep-urls`: manual-control operations over a state directory's
//! index — select a subset by site, section, URL pattern, qkey range or
//! footprint, or every sacred/zombie record, optionally narrowed by
//! record kind/flag/age/area, then apply a weight override, a flag
//! change, or a deletion to the whole selection in one rewrite pass.

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use shepherd_core::url_state::UrlFlags;
use shepherd_engine::manual::{
    apply_flag, apply_weight_override, delete_set, parse_kind_name, select_by_section,
    select_by_site, select_sacred, select_zombies, Limiters, Selector as MatchSelector,
    SiteMatchSet, UrlSet,
};
use shepherd_engine::site_table::SiteTable;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::state_dir::{files, StateDir};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Select a subset of a state directory's index and apply one action.
#[derive(Parser, Debug)]
#[command(name = "shep-urls", version, about)]
struct Args {
    /// State directory to operate on.
    state: PathBuf,

    #[command(flatten)]
    selector: Selector,

    #[command(flatten)]
    limiters: LimiterArgs,

    #[command(subcommand)]
    action: Action,
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
struct Selector {
    /// Select every record belonging to this site (hex-encoded fp).
    #[arg(long)]
    site: Option<String>,

    /// Select every record tagged with this classifier section.
    #[arg(long)]
    section: Option<u16>,

    /// Select every sacred record.
    #[arg(long)]
    sacred: bool,

    /// Select every zombie record.
    #[arg(long)]
    zombies: bool,

    /// Select by a `proto://host[:port]/rest` glob pattern, e.g.
    /// `http://*.example.com/*`.
    #[arg(long = "url-pattern")]
    url_pattern: Option<String>,

    /// Select an exact `site_fp:rest_fp` hex pair (either half may be
    /// `*` for a wildcard).
    #[arg(long)]
    fp: Option<String>,

    /// Select by qkey range, as `[port:]skeyhex[/prefixlen]` or one of
    /// `non-ip`, `invalid`, `unresolved`.
    #[arg(long)]
    qkey: Option<String>,
}

#[derive(ClapArgs, Debug, Default)]
struct LimiterArgs {
    /// Only records of this kind (repeatable).
    #[arg(long = "only-type")]
    only_type: Vec<String>,

    /// Only records with classifier area equal to this value.
    #[arg(long = "only-area")]
    only_area: Option<u16>,

    /// Only records at least this many seconds old.
    #[arg(long = "older-than")]
    older_than: Option<u32>,

    /// Only records at most this many seconds old.
    #[arg(long = "newer-than")]
    newer_than: Option<u32>,
}

impl LimiterArgs {
    fn build(&self) -> Result<Limiters> {
        let mut lim = Limiters::default();
        if !self.only_type.is_empty() {
            let mut kinds = Vec::new();
            for name in &self.only_type {
                kinds.push(
                    parse_kind_name(name)
                        .ok_or_else(|| anyhow::anyhow!("unknown record kind `{name}`"))?,
                );
            }
            lim.type_mask = kinds.into_iter().fold(0u8, |acc, bit| acc | bit);
        }
        if let Some(area) = self.only_area {
            lim = lim.only_area(area);
        }
        if let Some(secs) = self.older_than {
            lim = lim.older_than(secs);
        }
        if let Some(secs) = self.newer_than {
            lim = lim.newer_than(secs);
        }
        Ok(lim)
    }

    fn is_default(&self) -> bool {
        self.only_type.is_empty()
            && self.only_area.is_none()
            && self.older_than.is_none()
            && self.newer_than.is_none()
    }
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Overwrite the selection's weight.
    SetWeight {
        /// New weight, 0-255.
        weight: u8,
    },
    /// Set or clear the `SACRED` flag on the selection.
    Sacred {
        /// `true` to set, `false` to clear.
        on: bool,
    },
    /// Mark the selection deleted (tombstoned, not physically removed).
    Delete,
    /// Print the selection's footprints without changing anything.
    List,
}

fn parse_site_fp(s: &str) -> Result<[u8; 16]> {
    let bytes = hex_decode(s)?;
    if bytes.len() != 16 {
        bail!("--site must be exactly 16 hex-encoded bytes, got {}", bytes.len());
    }
    let mut fp = [0u8; 16];
    fp.copy_from_slice(&bytes);
    Ok(fp)
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("hex string must have an even length");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("invalid hex digit"))
        .collect()
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let state_dir = StateDir::open(&args.state).context("opening state directory")?;
    let mut index = UrlIndex::open(&state_dir.file(files::INDEX), true)
        .context("opening index")?;
    let mut records = index.iter()?;

    let set: UrlSet = if let Some(site) = &args.selector.site {
        select_by_site(&records, &parse_site_fp(site)?)
    } else if let Some(section) = args.selector.section {
        select_by_section(&records, section)
    } else if args.selector.sacred {
        select_sacred(&records)
    } else if args.selector.zombies {
        select_zombies(&records)
    } else if args.selector.url_pattern.is_some()
        || args.selector.fp.is_some()
        || args.selector.qkey.is_some()
    {
        let mut f = std::fs::File::open(state_dir.file(files::SITES)).context("opening sites")?;
        let sites = SiteTable::load(&mut f)?;
        let mut matchers = SiteMatchSet::new();
        if let Some(pattern) = &args.selector.url_pattern {
            matchers
                .add_url_pattern(&sites, pattern)
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        if let Some(fp) = &args.selector.fp {
            matchers.add_footprint(fp).map_err(|e| anyhow::anyhow!(e))?;
        }
        if let Some(qkey) = &args.selector.qkey {
            matchers
                .add_qkey(&sites, qkey)
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        let selector = MatchSelector {
            matchers,
            limiters: Limiters::default(),
        };
        selector.select(&records, now_secs(), None)
    } else {
        bail!("no selector given");
    };

    // Limiters narrow whatever the selector above matched, regardless of
    // which matcher picked it.
    let set = if args.limiters.is_default() {
        set
    } else {
        let lim = args.limiters.build()?;
        let now = now_secs();
        UrlSet::from_footprints(
            records
                .iter()
                .filter(|r| set.contains(&r.fp) && lim.matches(r, now))
                .map(|r| r.fp)
                .collect(),
        )
    };

    println!("selected {} records", set.len());

    let touched = match args.action {
        Action::SetWeight { weight } => apply_weight_override(&mut records, &set, weight),
        Action::Sacred { on } => apply_flag(&mut records, &set, UrlFlags::SACRED, on),
        Action::Delete => delete_set(&mut records, &set),
        Action::List => {
            for fp in set.iter() {
                println!("  {:02x?}", fp.site_fp);
            }
            return Ok(());
        }
    };

    for (i, rec) in records.iter().enumerate() {
        index.set(i as u64, rec)?;
    }
    index.sync()?;
    println!("applied action to {touched} records");
    Ok(())
}
