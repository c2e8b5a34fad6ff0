//! Shard controller functionality modules: configuration types, the
//! controller service, and its client-facing query stub.

mod config;
mod service;
mod stub;

pub use config::{key_to_shard, Config, ConfigNum, Gid, ShardId, NSHARDS};
pub use service::CtrlService;
pub use stub::CtrlStub;

pub(crate) use service::{CtrlReply, CtrlRequest};
