//! Interface to the consensus engine backing each replica group.
//!
//! The engine is an external collaborator: it elects leaders, replicates and
//! persists the log, and feeds committed items back in index order over an
//! apply channel handed to it at construction. The group server never mutates
//! state except by consuming that channel.

use tokio::sync::mpsc;

/// Server replica ID type.
pub type ReplicaId = u8;

/// Log slot index type. Index 0 is never occupied by a command.
pub type LogIndex = u64;

/// Leadership term number type.
pub type Term = u64;

/// Item delivered in order on the engine's apply channel.
#[derive(Debug, Clone)]
pub enum ApplyItem {
    /// A committed command at `index`, carrying the proposed bytes verbatim.
    Command { index: LogIndex, data: Vec<u8> },

    /// A state snapshot covering everything up to and including `index`.
    /// Delivered when this replica is caught up from a compacted log.
    Snapshot { index: LogIndex, data: Vec<u8> },
}

/// Apply channel receiver half handed to the group server.
pub type ApplyReceiver = mpsc::UnboundedReceiver<ApplyItem>;

/// Consensus engine operations consumed by the group server. All calls are
/// non-blocking; committed results surface on the apply channel only.
pub trait ConsensusEngine: Send + Sync + 'static {
    /// Proposes a command. Returns the log index and term it would occupy if
    /// committed, or `None` if this replica is not the leader. A returned
    /// index is no commitment: a different command may end up in that slot.
    fn start(&self, data: Vec<u8>) -> Option<(LogIndex, Term)>;

    /// Reports the current term and whether this replica believes it is the
    /// leader.
    fn get_state(&self) -> (Term, bool);

    /// Hands the engine a state snapshot covering the log up to and
    /// including `index`, allowing it to compact its persisted log.
    fn snapshot(&self, index: LogIndex, data: Vec<u8>);

    /// Size in bytes of the engine's persisted log, used to decide when to
    /// trigger snapshot compaction.
    fn log_size(&self) -> usize;

    /// Detaches this replica from the engine. No further items will arrive
    /// on the apply channel.
    fn kill(&self);
}
