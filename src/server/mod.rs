//! Shardset's group server functionality modules.

mod applier;
mod external;
mod migrate;
mod ops;
mod peers;
mod poller;
mod replica;
mod session;
mod snapshot;

pub use external::{ApiReply, ApiRequest, Command};
pub use ops::{
    gen_client_id, ClientId, ErrCode, ReqNum, LOCAL_CLIENT,
};
pub use replica::{ServerConfig, ShardServer};

pub(crate) use ops::{gen_nonce, Op, OpKind, NONCE_ORPHAN};
pub(crate) use peers::{request_shard_state, PullArgs, PullReply};
pub(crate) use replica::ServerState;
pub(crate) use session::{is_stale_replay, Session, SessionKey};
