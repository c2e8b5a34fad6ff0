//! Single-process consensus engine: all replicas of a group share one
//! in-memory log core, so "replication" is immediate delivery to every
//! attached replica's apply channel.
//!
//! This is not a consensus implementation. Leadership is assigned from the
//! outside (`set_leader`), which is exactly what the group-server executable
//! and the integration harness need; a real deployment would implement
//! `ConsensusEngine` over an actual Raft.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use crate::consensus::{
    ApplyItem, ApplyReceiver, ConsensusEngine, LogIndex, ReplicaId, Term,
};

use tokio::sync::mpsc;

/// Per-entry bookkeeping overhead counted into the persisted log size.
const ENTRY_OVERHEAD: usize = 8;

/// Shared log core of one replica group.
pub struct LocalGroup {
    inner: StdMutex<GroupCore>,
}

struct GroupCore {
    /// Current leadership term.
    term: Term,

    /// Replica currently assigned leadership, if any.
    leader: Option<ReplicaId>,

    /// Highest log index covered by the compaction snapshot (0 = none).
    snap_index: LogIndex,

    /// Latest compaction snapshot bytes.
    snapshot: Option<Vec<u8>>,

    /// Live log suffix; `entries[i]` occupies index `snap_index + 1 + i`.
    entries: Vec<Vec<u8>>,

    /// Persisted size of the live log suffix in bytes.
    log_bytes: usize,

    /// Apply channel sender of each attached replica.
    subscribers: HashMap<ReplicaId, mpsc::UnboundedSender<ApplyItem>>,
}

impl LocalGroup {
    /// Creates a new group core with no leader assigned.
    pub fn new() -> Arc<Self> {
        Arc::new(LocalGroup {
            inner: StdMutex::new(GroupCore {
                term: 0,
                leader: None,
                snap_index: 0,
                snapshot: None,
                entries: vec![],
                log_bytes: 0,
                subscribers: HashMap::new(),
            }),
        })
    }

    /// Assigns leadership, bumping the term. `None` leaves the group
    /// leaderless (all proposals rejected).
    pub fn set_leader(&self, leader: Option<ReplicaId>) {
        let mut core = self.inner.lock().unwrap();
        core.term += 1;
        core.leader = leader;
    }

    /// Replica currently assigned leadership.
    pub fn leader(&self) -> Option<ReplicaId> {
        self.inner.lock().unwrap().leader
    }

    /// Attaches replica `me` to the group, returning its engine handle and
    /// the receiving half of its apply channel. Catch-up is replayed
    /// immediately: the compaction snapshot first (if any), then the live
    /// log suffix.
    pub fn attach(
        self: &Arc<Self>,
        me: ReplicaId,
    ) -> (LocalEngine, ApplyReceiver) {
        let mut core = self.inner.lock().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(snapshot) = &core.snapshot {
            let _ = tx.send(ApplyItem::Snapshot {
                index: core.snap_index,
                data: snapshot.clone(),
            });
        }
        for (offset, data) in core.entries.iter().enumerate() {
            let _ = tx.send(ApplyItem::Command {
                index: core.snap_index + 1 + offset as LogIndex,
                data: data.clone(),
            });
        }

        core.subscribers.insert(me, tx);
        (
            LocalEngine {
                me,
                group: self.clone(),
            },
            rx,
        )
    }
}

/// One replica's handle onto a `LocalGroup`.
pub struct LocalEngine {
    me: ReplicaId,
    group: Arc<LocalGroup>,
}

impl ConsensusEngine for LocalEngine {
    fn start(&self, data: Vec<u8>) -> Option<(LogIndex, Term)> {
        let mut core = self.group.inner.lock().unwrap();
        if core.leader != Some(self.me) {
            return None;
        }

        let index = core.snap_index + core.entries.len() as LogIndex + 1;
        core.log_bytes += data.len() + ENTRY_OVERHEAD;
        core.entries.push(data.clone());

        // single process: commit == append, deliver to everyone right away
        core.subscribers.retain(|_, tx| {
            tx.send(ApplyItem::Command {
                index,
                data: data.clone(),
            })
            .is_ok()
        });

        Some((index, core.term))
    }

    fn get_state(&self) -> (Term, bool) {
        let core = self.group.inner.lock().unwrap();
        (core.term, core.leader == Some(self.me))
    }

    fn snapshot(&self, index: LogIndex, data: Vec<u8>) {
        let mut core = self.group.inner.lock().unwrap();
        let core = &mut *core;
        if index <= core.snap_index {
            return; // another replica already compacted past here
        }

        let drop_n = (index - core.snap_index) as usize;
        debug_assert!(drop_n <= core.entries.len());
        let drop_n = drop_n.min(core.entries.len());
        for entry in core.entries.drain(..drop_n) {
            core.log_bytes -= entry.len() + ENTRY_OVERHEAD;
        }
        core.snap_index = index;
        core.snapshot = Some(data);
    }

    fn log_size(&self) -> usize {
        self.group.inner.lock().unwrap().log_bytes
    }

    fn kill(&self) {
        let mut core = self.group.inner.lock().unwrap();
        core.subscribers.remove(&self.me);
        if core.leader == Some(self.me) {
            core.leader = None;
        }
    }
}
