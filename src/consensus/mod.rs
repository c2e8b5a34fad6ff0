//! Consensus substrate interface and the bundled single-process engine.

mod engine;
mod local;

pub use engine::{
    ApplyItem, ApplyReceiver, ConsensusEngine, LogIndex, ReplicaId, Term,
};
pub use local::{LocalEngine, LocalGroup};
