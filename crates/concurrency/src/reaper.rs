//! The qnode/qsite scheduler driving the reap job life cycle.
//!
//! Two levels, mirroring the real queue manager: a *qnode* owns one
//! physical queueing key (`Qkey` — host, port and channel) and carries
//! the politeness delay between dispatches on that key; a *qsite* is one
//! planned site's plan window and priority, and several qsites can
//! share one qnode (several virtual hosts resolving to the same IP, or
//! sites that otherwise collide on `Qkey`). At most one qsite per qnode
//! is ever active at a time, so two sites sharing a host never dispatch
//! concurrently and the host-wide delay is actually enforced host-wide.
//!
//! `waiting_heap` orders qnodes by the wall-clock time their delay
//! expires; `ready_heap` orders qnodes whose delay has expired by
//! `(qpriority desc, sequence desc)` — the priority of the best site
//! queued on that node, with a node relinked more recently breaking
//! ties. Resolver/nonexistent-host qnodes (`Skey::is_unresolved`/
//! `is_nonexistent`) are pinned to [`RESOLVER_PRIORITY`] so they always
//! sort first; their population is bounded elsewhere
//! (`Config::max_resolvers`/`max_flushers`), which is what keeps them
//! from starving ordinary hosts rather than any priority discipline
//! here. Within one qnode's `site_heap`, sites order by priority alone
//! — real qsites never carry a distinguishing sequence number (it's
//! left zero), so ties break by insertion order for determinism instead
//! of leaving them to heap-internal chance.

use shepherd_core::qkey::Qkey;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Reserved priority forcing resolver/nonexistent-host qnodes to the
/// front of the ready heap.
pub const RESOLVER_PRIORITY: u32 = u32::MAX;

/// A qnode's current scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No sites attached.
    Idle,
    /// One of its sites has a job in flight.
    Active,
    /// Politeness delay in effect; sitting in `waiting_heap`.
    Waiting,
    /// Delay expired and a site is queued; sitting in `ready_heap`.
    Ready,
}

/// A qsite's current scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    /// No plan entries pending.
    Idle,
    /// Currently dispatched (its qnode is `Active`).
    Active,
    /// Plan entries pending, queued in its qnode's `site_heap`.
    Waiting,
}

/// Opaque handle to a qsite held by a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QsiteId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct QnodeId(u32);

/// Per-site scheduling state.
#[derive(Debug, Clone)]
pub struct Qsite {
    /// The queueing key this site's qnode schedules under.
    pub qkey: Qkey,
    /// Current scheduling state.
    pub state: SiteState,
    /// Priority of the site's next not-yet-dispatched plan entry.
    pub qpriority: u32,
    /// Plan entries still pending dispatch.
    pub pending: u32,
    qnode: QnodeId,
    insert_seq: u32,
}

struct Qnode {
    qkey: Qkey,
    state: NodeState,
    qpriority: u32,
    sequence: u32,
    delay_secs: u32,
    last_access: Option<u64>,
    wait_until: u64,
    active_site: Option<QsiteId>,
    site_heap: BinaryHeap<SiteHeapEntry>,
}

#[derive(Clone, Copy)]
struct SiteHeapEntry {
    qpriority: u32,
    insert_seq: u32,
    id: u32,
}

impl PartialEq for SiteHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.qpriority == other.qpriority && self.insert_seq == other.insert_seq
    }
}
impl Eq for SiteHeapEntry {}
impl PartialOrd for SiteHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SiteHeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.qpriority
            .cmp(&other.qpriority)
            .then_with(|| self.insert_seq.cmp(&other.insert_seq))
    }
}

#[derive(Clone, Copy)]
struct NodeHeapEntry {
    qpriority: u32,
    sequence: u32,
    id: u32,
}

impl PartialEq for NodeHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.qpriority == other.qpriority && self.sequence == other.sequence
    }
}
impl Eq for NodeHeapEntry {}
impl PartialOrd for NodeHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NodeHeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.qpriority
            .cmp(&other.qpriority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

struct WaitEntry {
    wait_until: u64,
    id: u32,
}

impl PartialEq for WaitEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wait_until == other.wait_until
    }
}
impl Eq for WaitEntry {}
impl PartialOrd for WaitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for WaitEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.wait_until.cmp(&other.wait_until)
    }
}

/// The qnode/qsite scheduler.
#[derive(Default)]
pub struct Scheduler {
    sites: Vec<Option<Qsite>>,
    site_free: Vec<u32>,
    nodes: Vec<Option<Qnode>>,
    node_free: Vec<u32>,
    node_by_qkey: HashMap<Qkey, u32>,
    ready_heap: BinaryHeap<NodeHeapEntry>,
    waiting_heap: BinaryHeap<Reverse<WaitEntry>>,
    sequence_counter: u32,
    insert_counter: u32,
}

impl Scheduler {
    /// A fresh, empty scheduler.
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    fn node_priority(qkey: Qkey, best: u32) -> u32 {
        let skey = qkey.skey();
        if skey.is_unresolved() || skey.is_nonexistent() {
            RESOLVER_PRIORITY
        } else {
            best
        }
    }

    fn get_or_create_node(&mut self, qkey: Qkey, delay_secs: u32) -> QnodeId {
        if let Some(&idx) = self.node_by_qkey.get(&qkey) {
            self.nodes[idx as usize].as_mut().unwrap().delay_secs = delay_secs;
            return QnodeId(idx);
        }
        let node = Qnode {
            qkey,
            state: NodeState::Idle,
            qpriority: 0,
            sequence: 0,
            delay_secs,
            last_access: None,
            wait_until: 0,
            active_site: None,
            site_heap: BinaryHeap::new(),
        };
        let idx = match self.node_free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as u32
            }
        };
        self.node_by_qkey.insert(qkey, idx);
        QnodeId(idx)
    }

    /// Unlink a qnode from whatever list/heap it currently sits in,
    /// optionally inserting `site` into its `site_heap`, then
    /// recompute its priority and re-enqueue it to `ready_heap` or
    /// `waiting_heap` as appropriate. Mirrors `relink_qnode`.
    fn relink(&mut self, node_id: QnodeId, insert_site: Option<(QsiteId, u32)>, now: u64) {
        let idx = node_id.0 as usize;

        if let Some((site_id, qpriority)) = insert_site {
            let node = self.nodes[idx].as_mut().unwrap();
            node.site_heap.push(SiteHeapEntry {
                qpriority,
                insert_seq: self.sites[site_id.0 as usize].as_ref().unwrap().insert_seq,
                id: site_id.0,
            });
        }

        let node = self.nodes[idx].as_mut().unwrap();
        if node.active_site.is_some() {
            // A site sharing this already-dispatched qnode just queued;
            // get_site's own completion (put_site, which clears
            // active_site before calling back in here) is what relinks
            // next, picking up whatever now sits on top of site_heap.
            return;
        }
        // Waiting/ready_heap entries are removed lazily: a stale entry
        // for this node may still be sitting in either heap, but it's
        // validated against `node.state` at pop time (see `get_site`,
        // `time_step`) so it's harmless once superseded by the fresh
        // entry pushed below.

        let best = node.site_heap.peek().copied();
        let Some(best) = best else {
            node.state = NodeState::Idle;
            return;
        };

        node.qpriority = Self::node_priority(node.qkey, best.qpriority);
        self.sequence_counter += 1;
        node.sequence = self.sequence_counter;

        let delay = if node.qkey.skey().is_unresolved() {
            0
        } else {
            node.delay_secs
        };
        node.wait_until = match node.last_access {
            None => now,
            Some(last) => last + delay as u64,
        };

        if node.wait_until > now {
            node.state = NodeState::Waiting;
            self.waiting_heap.push(Reverse(WaitEntry {
                wait_until: node.wait_until,
                id: idx as u32,
            }));
        } else {
            node.state = NodeState::Ready;
            self.ready_heap.push(NodeHeapEntry {
                qpriority: node.qpriority,
                sequence: node.sequence,
                id: idx as u32,
            });
        }
    }

    /// Register a new qsite with `pending` plan entries, the first due
    /// at `priority`, attaching it to (creating if needed) the qnode
    /// for `qkey`.
    pub fn insert(&mut self, qkey: Qkey, delay_secs: u32, priority: u32, pending: u32) -> QsiteId {
        let node_id = self.get_or_create_node(qkey, delay_secs);
        self.insert_counter += 1;
        let site = Qsite {
            qkey,
            state: SiteState::Waiting,
            qpriority: priority,
            pending,
            qnode: node_id,
            insert_seq: self.insert_counter,
        };
        let site_id = match self.site_free.pop() {
            Some(idx) => {
                self.sites[idx as usize] = Some(site);
                idx
            }
            None => {
                self.sites.push(Some(site));
                (self.sites.len() - 1) as u32
            }
        };
        let id = QsiteId(site_id);
        if pending == 0 {
            self.sites[site_id as usize].as_mut().unwrap().state = SiteState::Idle;
        } else {
            self.relink(node_id, Some((id, priority)), 0);
        }
        id
    }

    /// Number of qsites currently tracked (in any state).
    pub fn len(&self) -> usize {
        self.sites.iter().filter(|s| s.is_some()).count()
    }

    /// Read a qsite's current record.
    pub fn get(&self, id: QsiteId) -> Option<&Qsite> {
        self.sites.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    /// Advance the scheduler's clock to `now`, moving any qnode whose
    /// politeness delay has expired from `waiting_heap` to
    /// `ready_heap`. Returns how many qnodes became ready.
    pub fn time_step(&mut self, now: u64) -> usize {
        let mut promoted = 0;
        while let Some(Reverse(top)) = self.waiting_heap.peek() {
            if top.wait_until > now {
                break;
            }
            let Reverse(entry) = self.waiting_heap.pop().unwrap();
            let Some(node) = self.nodes[entry.id as usize].as_mut() else {
                continue;
            };
            if node.state != NodeState::Waiting {
                continue;
            }
            node.state = NodeState::Ready;
            self.ready_heap.push(NodeHeapEntry {
                qpriority: node.qpriority,
                sequence: node.sequence,
                id: entry.id,
            });
            promoted += 1;
        }
        promoted
    }

    /// Pop the best ready qsite (highest qnode priority, breaking ties
    /// by the most recently relinked node, then the highest-priority
    /// site on that node) and mark both its qnode and itself `Active`.
    pub fn get_site(&mut self) -> Option<QsiteId> {
        loop {
            let top = self.ready_heap.pop()?;
            let idx = top.id as usize;
            let Some(node) = self.nodes[idx].as_mut() else {
                continue;
            };
            if node.state != NodeState::Ready {
                continue;
            }
            node.state = NodeState::Active;
            let best = node.site_heap.pop().expect("ready qnode has no site queued");
            node.active_site = Some(QsiteId(best.id));
            let site = self.sites[best.id as usize].as_mut().unwrap();
            site.state = SiteState::Active;
            return Some(QsiteId(best.id));
        }
    }

    /// Return a qsite after its job completes, with `next_priority`
    /// the priority of its new first pending entry (ignored if
    /// `remaining_pending` is zero). Mirrors `put_site`.
    pub fn put_site(&mut self, id: QsiteId, now: u64, remaining_pending: u32, next_priority: u32) {
        let site_idx = id.0 as usize;
        let node_id = {
            let Some(site) = self.sites[site_idx].as_mut() else {
                return;
            };
            site.pending = remaining_pending;
            site.qnode
        };
        {
            let node = self.nodes[node_id.0 as usize].as_mut().unwrap();
            node.last_access = Some(now);
            node.active_site = None;
        }

        if remaining_pending == 0 {
            self.sites[site_idx].as_mut().unwrap().state = SiteState::Idle;
            self.relink(node_id, None, now);
        } else {
            let site = self.sites[site_idx].as_mut().unwrap();
            site.state = SiteState::Waiting;
            site.qpriority = next_priority;
            self.relink(node_id, Some((id, next_priority)), now);
        }
    }

    /// Remove a qsite entirely, freeing its arena slot for reuse.
    pub fn remove(&mut self, id: QsiteId) {
        if self.sites[id.0 as usize].take().is_some() {
            self.site_free.push(id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::qkey::Skey;

    fn qkey(n: u32) -> Qkey {
        Qkey::new(0, 80, Skey(n))
    }

    #[test]
    fn inserted_site_is_ready_immediately() {
        let mut sched = Scheduler::new();
        let id = sched.insert(qkey(1), 5, 10, 3);
        assert_eq!(sched.get(id).unwrap().state, SiteState::Waiting);
        assert_eq!(sched.get_site(), Some(id));
    }

    #[test]
    fn put_site_with_delay_goes_to_waiting_then_ready() {
        let mut sched = Scheduler::new();
        let id = sched.insert(qkey(1), 10, 10, 5);
        sched.get_site();
        sched.put_site(id, 100, 2, 10);
        assert_eq!(sched.get_site(), None);

        let promoted = sched.time_step(109);
        assert_eq!(promoted, 0);
        assert_eq!(sched.get_site(), None);

        let promoted = sched.time_step(110);
        assert_eq!(promoted, 1);
        assert_eq!(sched.get_site(), Some(id));
    }

    #[test]
    fn put_site_with_zero_delay_is_immediately_ready() {
        let mut sched = Scheduler::new();
        let id = sched.insert(qkey(1), 0, 10, 5);
        sched.get_site();
        sched.put_site(id, 0, 2, 10);
        assert_eq!(sched.get_site(), Some(id));
    }

    #[test]
    fn put_site_with_no_remaining_work_goes_idle() {
        let mut sched = Scheduler::new();
        let id = sched.insert(qkey(1), 5, 10, 1);
        sched.get_site();
        sched.put_site(id, 0, 0, 0);
        assert_eq!(sched.get(id).unwrap().state, SiteState::Idle);
        assert_eq!(sched.get_site(), None);
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let mut sched = Scheduler::new();
        let id = sched.insert(qkey(1), 0, 10, 1);
        sched.get_site();
        sched.put_site(id, 0, 0, 0);
        sched.remove(id);
        assert_eq!(sched.len(), 0);
        let reused = sched.insert(qkey(2), 0, 10, 1);
        assert_eq!(reused, id);
    }

    #[test]
    fn two_sites_sharing_a_qkey_never_dispatch_concurrently() {
        let mut sched = Scheduler::new();
        let a = sched.insert(qkey(1), 0, 5, 1);
        let b = sched.insert(qkey(1), 0, 9, 1);
        // Higher priority site on the shared qnode comes out first.
        let first = sched.get_site().unwrap();
        assert_eq!(first, b);
        // The qnode is active (on site b), so a's own qnode is already
        // occupied; getting the next ready site must not also be a,
        // since the qnode itself never queues twice.
        assert_eq!(sched.get_site(), None);
        sched.put_site(first, 0, 0, 0);
        assert_eq!(sched.get_site(), Some(a));
    }

    #[test]
    fn higher_priority_site_is_preferred_within_one_qnode() {
        let mut sched = Scheduler::new();
        let low = sched.insert(qkey(1), 0, 1, 1);
        let high = sched.insert(qkey(1), 0, 100, 1);
        assert_eq!(sched.get_site(), Some(high));
        sched.put_site(high, 0, 0, 0);
        assert_eq!(sched.get_site(), Some(low));
    }

    #[test]
    fn higher_priority_qnode_is_preferred_across_qkeys() {
        let mut sched = Scheduler::new();
        let low_node = sched.insert(qkey(1), 0, 1, 1);
        let high_node = sched.insert(qkey(2), 0, 50, 1);
        assert_eq!(sched.get_site(), Some(high_node));
        sched.put_site(high_node, 0, 0, 0);
        assert_eq!(sched.get_site(), Some(low_node));
    }

    #[test]
    fn unresolved_skey_qnode_always_sorts_first() {
        let mut sched = Scheduler::new();
        let normal = sched.insert(qkey(1), 0, 1_000_000, 1);
        let resolver = sched.insert(Qkey::new(0, 80, Skey::unresolved(0, 16)), 0, 1, 1);
        assert_eq!(sched.get_site(), Some(resolver));
        sched.put_site(resolver, 0, 0, 0);
        assert_eq!(sched.get_site(), Some(normal));
    }
}
