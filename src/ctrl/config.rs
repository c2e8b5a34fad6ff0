//! Shard configuration types and the key-to-shard mapping.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Number of shards the key space is partitioned into. Identical across all
/// groups and the controller.
pub const NSHARDS: usize = 10;

/// Replica group ID type. Gid 0 is reserved for "no owner".
pub type Gid = u64;

/// Configuration epoch number type.
pub type ConfigNum = u64;

/// Shard number type.
pub type ShardId = usize;

/// One numbered shard-to-group assignment published by the controller.
///
/// `shards[s]` names the group owning shard `s` (0 = unowned); `groups` maps
/// each group to the group-facing addresses of its member servers.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Epoch number. Epoch 0 is the empty configuration.
    pub num: ConfigNum,

    /// Shard number -> owning group ID.
    pub shards: [Gid; NSHARDS],

    /// Group ID -> list of member server addresses.
    pub groups: HashMap<Gid, Vec<SocketAddr>>,
}

impl Config {
    /// Creates the empty epoch-0 configuration with no ownership.
    pub fn empty() -> Self {
        Config {
            num: 0,
            shards: [0; NSHARDS],
            groups: HashMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::empty()
    }
}

/// Maps a key deterministically onto `[0, NSHARDS)`. Every group and the
/// controller must agree on this function.
pub fn key_to_shard(key: &str) -> ShardId {
    let mut hasher = DefaultHasher::new();
    key.as_bytes().hash(&mut hasher);
    (hasher.finish() as usize) % NSHARDS
}
