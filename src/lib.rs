//! Public interface to the Shardset core library, linked by the group server,
//! shard controller, and client executables.

#[macro_use]
mod utils;

mod client;
mod consensus;
mod ctrl;
mod server;

pub use client::{ClientApiStub, ClientConfig, ShardsetClient};
pub use consensus::{
    ApplyItem, ApplyReceiver, ConsensusEngine, LocalEngine, LocalGroup,
    LogIndex, ReplicaId, Term,
};
pub use ctrl::{
    key_to_shard, Config, ConfigNum, CtrlService, CtrlStub, Gid, ShardId,
    NSHARDS,
};
pub use server::{
    gen_client_id, ApiReply, ApiRequest, ClientId, Command, ErrCode, ReqNum,
    ServerConfig, ShardServer, LOCAL_CLIENT,
};
pub use utils::ShardsetError;
