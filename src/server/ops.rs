//! Command descriptors flowing through the consensus log, and the error code
//! set surfaced to callers.

use crate::ctrl::{key_to_shard, Config, ShardId};

use rand::Rng;

use serde::{Deserialize, Serialize};

/// Client ID type; uniform random in `[1, 2^62)`.
pub type ClientId = u64;

/// Per-client request number type; starts at 1 and increases monotonically.
pub type ReqNum = u64;

/// Proposal nonce type; uniform random in `[0, 2^62)`.
pub type Nonce = u64;

/// Reserved client ID for self-proposed configuration changes. Sessions of
/// this client never leave their group during migration.
pub const LOCAL_CLIENT: ClientId = 0;

/// Nonce sentinel written into a log record whose apply failed the ownership
/// check, so that its waiter observes a conflict instead of success.
pub(crate) const NONCE_ORPHAN: Nonce = u64::MAX;

/// Generates a fresh proposal nonce.
pub(crate) fn gen_nonce() -> Nonce {
    rand::thread_rng().gen_range(0..(1u64 << 62))
}

/// Generates a fresh random client ID.
pub fn gen_client_id() -> ClientId {
    rand::thread_rng().gen_range(1..(1u64 << 62))
}

/// Error code set carried in replies.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ErrCode {
    /// Request succeeded.
    Ok,

    /// This replica is not the consensus leader; try another.
    WrongLeader,

    /// This group does not own the key's shard under its current config.
    WrongGroup,

    /// The proposed configuration is older than the group's current one.
    HigherConfigNum,

    /// The source group has not yet reached the requested configuration.
    LowerConfigNum,

    /// The log slot was filled by a different proposal; retry.
    CommitConflict,

    /// The proposal did not commit within the wait bound; retry.
    CommitTimeout,
}

/// Payload variant of a command descriptor.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub(crate) enum OpKind {
    Get { key: String },
    Put { key: String, value: String },
    Append { key: String, value: String },
    ChangeConfig { config: Config },
}

impl OpKind {
    /// Shard this operation is keyed on. Configuration changes take a fixed
    /// slot; any fixed slot works since local sessions never migrate.
    pub(crate) fn shard(&self) -> ShardId {
        match self {
            OpKind::Get { key }
            | OpKind::Put { key, .. }
            | OpKind::Append { key, .. } => key_to_shard(key),
            OpKind::ChangeConfig { .. } => 0,
        }
    }

    /// Short operation name for log lines.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            OpKind::Get { .. } => "Get",
            OpKind::Put { .. } => "Put",
            OpKind::Append { .. } => "Append",
            OpKind::ChangeConfig { .. } => "ChangeConfig",
        }
    }
}

/// Command descriptor as proposed to (and applied from) the consensus log.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub(crate) struct Op {
    /// Fresh per-proposal nonce; distinguishes "my command committed" from
    /// "my slot was stolen" after a log conflict.
    pub nonce: Nonce,

    /// Issuing client's request number.
    pub req_num: ReqNum,

    /// Issuing client's ID (`LOCAL_CLIENT` for config changes).
    pub client: ClientId,

    /// Shard this operation is keyed on.
    pub shard: ShardId,

    /// Operation payload.
    pub kind: OpKind,
}

#[cfg(test)]
mod ops_tests {
    use super::*;

    #[test]
    fn nonce_range() {
        for _ in 0..1000 {
            let nonce = gen_nonce();
            assert!(nonce < (1u64 << 62));
            assert_ne!(nonce, NONCE_ORPHAN);
        }
    }

    #[test]
    fn client_id_reserved() {
        for _ in 0..1000 {
            assert_ne!(gen_client_id(), LOCAL_CLIENT);
        }
    }

    #[test]
    fn kind_shard_consistent() {
        let get = OpKind::Get { key: "k".into() };
        let put = OpKind::Put {
            key: "k".into(),
            value: "v".into(),
        };
        assert_eq!(get.shard(), put.shard());
        assert_eq!(get.shard(), key_to_shard("k"));
        assert_eq!(
            OpKind::ChangeConfig {
                config: Config::empty()
            }
            .shard(),
            0
        );
    }
}
