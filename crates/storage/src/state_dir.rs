//! State-directory layout: `params`, the `control` phase file, and
//! atomic whole-directory replacement. A state directory is a plain
//! directory containing the fixed file set (`params`, `control`, `index`,
//! `journal`, `contrib`, `buckets`, `sites`, `plan`, `urls`, `checkpoint`).
//! A new state is always built under a sibling temporary name and promoted
//! into place with a single `rename(2)`, so a crash mid-build never leaves
//! `current` pointing at a half-written tree.

use shepherd_core::{Error, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic identifying a `params` file.
pub const PARAMS_MAGIC: u32 = 0xaa8a_9b55;
/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 0x3b00;

bitflags::bitflags! {
    /// Flags stored in `params`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParamsFlags: u32 {
        /// The `index` file is sorted by footprint.
        const SORTED = 1 << 0;
    }
}

/// The `params` file: identifies and versions a state directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Must equal [`PARAMS_MAGIC`].
    pub magic: u32,
    /// On-disk format version this directory was written with.
    pub format_version: u16,
    /// See [`ParamsFlags`].
    pub flags: ParamsFlags,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            magic: PARAMS_MAGIC,
            format_version: FORMAT_VERSION,
            flags: ParamsFlags::empty(),
        }
    }
}

impl Params {
    /// Serialize to the fixed 10-byte on-disk layout.
    pub fn encode(&self) -> [u8; 10] {
        let mut buf = [0u8; 10];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }

    /// Parse the fixed 10-byte on-disk layout.
    pub fn decode(buf: &[u8]) -> Result<Params> {
        if buf.len() < 10 {
            return Err(Error::Corruption("params file truncated".into()));
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != PARAMS_MAGIC {
            return Err(Error::Corruption("bad params magic".into()));
        }
        let format_version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let flags_bits = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        let flags = ParamsFlags::from_bits(flags_bits)
            .ok_or_else(|| Error::Corruption("unknown params flag bits".into()))?;
        Ok(Params {
            magic,
            format_version,
            flags,
        })
    }

    fn read(path: &Path) -> Result<Params> {
        let mut buf = Vec::new();
        fs::File::open(path)?.read_to_end(&mut buf)?;
        Params::decode(&buf)
    }

    fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.encode())?;
        Ok(())
    }
}

/// A phase in the master loop's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No cycle in progress; `current` is a stable, servable state.
    Closed,
    /// Opening a new working state from `current`.
    Prepare,
    /// Planner running, building the `plan` file.
    Plan,
    /// Reaper fetching according to `plan`.
    Reap,
    /// Reap budget exhausted; winding down in-flight jobs.
    Cork,
    /// All reap jobs have completed or been aborted.
    Corked,
    /// Merging contributions into the index.
    Merge,
    /// External feedback collaborator running over the merged index.
    Feedback,
    /// External equivalence collaborator running.
    Equiv,
    /// Select stage computing OK/SLEEP/DISCARD dispositions.
    Select,
    /// Record stage materialising contributions into buckets.
    Record,
    /// Sort stage imposing a footprint-unique order.
    Sort,
    /// Final housekeeping before promotion to `Closed`.
    Finish,
    /// Crash recovery in progress.
    Recover,
    /// Rolling back to the last closed state after an aborted cycle.
    Rollback,
    /// Background disk cleanup of orphaned working states.
    Cleanup,
    /// Lent out to a peer via `BORROW_STATE`; local mutation forbidden.
    Borrowed,
}

impl Phase {
    /// On-disk single-word tag (the `control` file body).
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Closed => "closed",
            Phase::Prepare => "prepare",
            Phase::Plan => "plan",
            Phase::Reap => "reap",
            Phase::Cork => "cork",
            Phase::Corked => "corked",
            Phase::Merge => "merge",
            Phase::Feedback => "feedback",
            Phase::Equiv => "equiv",
            Phase::Select => "select",
            Phase::Record => "record",
            Phase::Sort => "sort",
            Phase::Finish => "finish",
            Phase::Recover => "recover",
            Phase::Rollback => "rollback",
            Phase::Cleanup => "cleanup",
            Phase::Borrowed => "borrowed",
        }
    }

    /// Parse the `control` file body.
    pub fn parse(s: &str) -> Result<Phase> {
        Ok(match s.trim() {
            "closed" => Phase::Closed,
            "prepare" => Phase::Prepare,
            "plan" => Phase::Plan,
            "reap" => Phase::Reap,
            "cork" => Phase::Cork,
            "corked" => Phase::Corked,
            "merge" => Phase::Merge,
            "feedback" => Phase::Feedback,
            "equiv" => Phase::Equiv,
            "select" => Phase::Select,
            "record" => Phase::Record,
            "sort" => Phase::Sort,
            "finish" => Phase::Finish,
            "recover" => Phase::Recover,
            "rollback" => Phase::Rollback,
            "cleanup" => Phase::Cleanup,
            "borrowed" => Phase::Borrowed,
            other => {
                return Err(Error::Corruption(format!(
                    "unknown control-file phase {other:?}"
                )))
            }
        })
    }

    /// Phases reachable directly from this one along the happy path or
    /// a recognised recovery edge. A transition not listed here is
    /// rejected by [`StateDir::set_phase`] rather than silently applied.
    pub fn allowed_next(&self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Closed => &[Prepare, Cleanup, Borrowed],
            Prepare => &[Plan, Rollback],
            Plan => &[Reap, Rollback],
            Reap => &[Cork, Rollback],
            Cork => &[Corked, Rollback],
            Corked => &[Merge, Rollback],
            Merge => &[Feedback, Rollback],
            Feedback => &[Equiv, Rollback],
            Equiv => &[Select, Rollback],
            Select => &[Record, Rollback],
            Record => &[Sort, Rollback],
            Sort => &[Finish, Rollback],
            Finish => &[Closed],
            Recover => &[Closed, Rollback],
            Rollback => &[Closed],
            Cleanup => &[Closed],
            Borrowed => &[Closed],
        }
    }

    /// True if `next` is a legal transition from this phase.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        self.allowed_next().contains(&next)
    }
}

/// An open state directory.
pub struct StateDir {
    path: PathBuf,
    params: Params,
}

const CONTROL_FILE: &str = "control";
const PARAMS_FILE: &str = "params";

/// Fixed file names making up a state directory, for callers (storage
/// sub-modules, durability) that need to build a path within one.
pub mod files {
    /// Packed `UrlState` array.
    pub const INDEX: &str = "index";
    /// Append-only `UrlState` stream.
    pub const JOURNAL: &str = "journal";
    /// Append-only contribution queue.
    pub const CONTRIB: &str = "contrib";
    /// Bucket store.
    pub const BUCKETS: &str = "buckets";
    /// Site table.
    pub const SITES: &str = "sites";
    /// Planner output.
    pub const PLAN: &str = "plan";
    /// URL database log.
    pub const URLS: &str = "urls";
    /// Checkpoint log.
    pub const CHECKPOINT: &str = "checkpoint";
}

impl StateDir {
    /// Create a brand-new, empty state directory at `path`, which must
    /// not already exist.
    pub fn create(path: &Path) -> Result<StateDir> {
        fs::create_dir(path)?;
        let params = Params::default();
        params.write(&path.join(PARAMS_FILE))?;
        fs::write(path.join(CONTROL_FILE), Phase::Closed.as_str())?;
        Ok(StateDir {
            path: path.to_path_buf(),
            params,
        })
    }

    /// Open an existing state directory, validating its `params`.
    pub fn open(path: &Path) -> Result<StateDir> {
        let params = Params::read(&path.join(PARAMS_FILE))?;
        if params.format_version > FORMAT_VERSION {
            return Err(Error::InvalidTransition(format!(
                "state directory format_version {:#x} is newer than supported {:#x}",
                params.format_version, FORMAT_VERSION
            )));
        }
        Ok(StateDir {
            path: path.to_path_buf(),
            params,
        })
    }

    /// The directory's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// This directory's `params`.
    pub fn params(&self) -> Params {
        self.params
    }

    /// Mark the `SORTED` flag and persist it.
    pub fn set_sorted(&mut self, sorted: bool) -> Result<()> {
        if sorted {
            self.params.flags.insert(ParamsFlags::SORTED);
        } else {
            self.params.flags.remove(ParamsFlags::SORTED);
        }
        self.params.write(&self.path.join(PARAMS_FILE))
    }

    /// Rewrite `params.format_version`, refusing to move backwards.
    pub fn upgrade_format_version(&mut self, new_version: u16) -> Result<()> {
        if new_version < self.params.format_version {
            return Err(Error::InvalidTransition(format!(
                "refusing to downgrade format_version {:#x} to {:#x}",
                self.params.format_version, new_version
            )));
        }
        self.params.format_version = new_version;
        self.params.write(&self.path.join(PARAMS_FILE))
    }

    /// Path to one of the fixed files within this state directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Read the current phase from the `control` file.
    pub fn phase(&self) -> Result<Phase> {
        let text = fs::read_to_string(self.path.join(CONTROL_FILE))?;
        Phase::parse(&text)
    }

    /// Advance to `next`, rejecting the write if `next` isn't reachable
    /// from the current phase.
    pub fn set_phase(&mut self, next: Phase) -> Result<()> {
        let current = self.phase()?;
        if !current.can_advance_to(next) {
            return Err(Error::InvalidTransition(format!(
                "{:?} cannot advance to {:?}",
                current, next
            )));
        }
        let mut f = fs::File::create(self.path.join(CONTROL_FILE))?;
        f.write_all(next.as_str().as_bytes())?;
        f.sync_all()?;
        Ok(())
    }

    /// Atomically replace `dest` with this state directory: rename this
    /// directory into `dest`'s place. `self` must live alongside `dest`
    /// on the same filesystem for the rename to be atomic. Any prior
    /// directory at `dest` is moved aside to `previous` rather than
    /// deleted, so a crash during promotion still leaves a recoverable
    /// `current`.
    pub fn promote_to(self, dest: &Path) -> Result<StateDir> {
        if self.phase()? != Phase::Closed {
            return Err(Error::InvalidTransition(
                "only a closed state directory may be promoted".into(),
            ));
        }
        if dest.exists() {
            let previous = dest
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("previous");
            if previous.exists() {
                fs::remove_dir_all(&previous)?;
            }
            fs::rename(dest, &previous)?;
        }
        fs::rename(&self.path, dest)?;
        StateDir::open(dest)
    }
}
