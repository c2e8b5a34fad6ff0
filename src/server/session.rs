//! Per-(client, shard) sessions enforcing at-most-once application.
//!
//! Sessions are keyed per shard, not per client alone: shards migrate
//! independently, and a session merged in from another group must not
//! suppress the client's activity on shards this group has always owned.

use crate::consensus::LogIndex;
use crate::server::{ClientId, Op};
use crate::ctrl::ShardId;

use serde::{Deserialize, Serialize};

/// Session table key. A pair absent from the table has no session.
pub(crate) type SessionKey = (ClientId, ShardId);

/// Last applied operation record for one (client, shard) pair.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub(crate) struct Session {
    /// The operation last applied for this pair.
    pub last_op: Op,

    /// Log index `last_op` was applied at. `None` for sessions merged in
    /// during migration: they describe activity on another group's log and
    /// must never match a local log record.
    pub last_index: Option<LogIndex>,
}

/// Decides whether applying `op` at `index` would be a stale replay: the
/// session has already seen this request number (or a later one) at an
/// earlier index, so the state machine must not be mutated again.
pub(crate) fn is_stale_replay(
    session: Option<&Session>,
    op: &Op,
    index: LogIndex,
) -> bool {
    match session {
        Some(s) => {
            s.last_index.map_or(true, |last| last < index)
                && op.req_num <= s.last_op.req_num
        }
        None => false,
    }
}
