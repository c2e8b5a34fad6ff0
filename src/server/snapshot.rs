//! Shardset server -- snapshot encoding, triggering, and installation.

use std::collections::HashMap;

use crate::consensus::{ApplyItem, LogIndex};
use crate::server::{ServerState, Session, SessionKey, ShardServer};
use crate::ctrl::Config;
use crate::utils::ShardsetError;

use serde::{Deserialize, Serialize};

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

/// State captured by a compaction snapshot. Which log index it covers is the
/// consensus engine's bookkeeping, not ours.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    /// The key-value map.
    pub kv: HashMap<String, String>,

    /// The session table.
    pub sessions: HashMap<SessionKey, Session>,

    /// The configuration in effect.
    pub config: Config,
}

impl Snapshot {
    /// Encodes the snapshot to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ShardsetError> {
        Ok(encode_to_vec(self)?)
    }

    /// Decodes a snapshot from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ShardsetError> {
        Ok(decode_from_slice(data)?)
    }
}

// ShardServer snapshot trigger & installation implementation
impl ShardServer {
    /// Called under the state mutex after each applied command: if the
    /// engine's persisted log has outgrown the configured threshold, drops
    /// the log records whose waiters have been released, serializes the
    /// state, and hands it to the engine for compaction up to `index`.
    pub(crate) fn maybe_snapshot(
        &self,
        st: &mut ServerState,
        index: LogIndex,
    ) -> Result<(), ShardsetError> {
        if self.config.max_log_size == 0 {
            return Ok(()); // snapshotting disabled
        }
        if self.engine.log_size() < self.config.max_log_size {
            return Ok(());
        }

        let ServerState {
            log_record,
            confirmed,
            ..
        } = &mut *st;
        log_record.retain(|slot, _| !confirmed.remove(slot));

        let snapshot = Snapshot {
            kv: st.kv.clone(),
            sessions: st.sessions.clone(),
            config: st.config.clone(),
        };
        self.engine.snapshot(index, snapshot.encode()?);
        pf_debug!(self.me; "created snapshot up to #{}", index);
        Ok(())
    }

    /// Handler of a snapshot item from the apply channel: replaces the whole
    /// state. Pending waiters whose slot fell behind `index` will time out
    /// and be retried by their clients.
    pub(crate) async fn install_snapshot(
        &self,
        index: LogIndex,
        data: Vec<u8>,
    ) -> Result<(), ShardsetError> {
        let snapshot = Snapshot::decode(&data)?;

        let mut st = self.mu.lock().await;
        st.kv = snapshot.kv;
        st.sessions = snapshot.sessions;
        st.config = snapshot.config;
        st.last_applied = index;

        pf_info!(self.me; "installed snapshot up to #{} (config {})",
                          index, st.config.num);
        Ok(())
    }

    /// Handler of one apply channel item.
    pub(crate) async fn handle_apply_item(
        &self,
        item: ApplyItem,
    ) -> Result<(), ShardsetError> {
        match item {
            ApplyItem::Command { index, data } => {
                self.apply_command(index, data).await
            }
            ApplyItem::Snapshot { index, data } => {
                self.install_snapshot(index, data).await
            }
        }
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;
    use crate::server::{gen_nonce, Op, OpKind};

    #[test]
    fn codec_round_trip() -> Result<(), ShardsetError> {
        let mut kv = HashMap::new();
        kv.insert("x".into(), "1y".into());
        kv.insert("door".into(), "open".into());

        let kind = OpKind::Append {
            key: "x".into(),
            value: "y".into(),
        };
        let op = Op {
            nonce: gen_nonce(),
            req_num: 2,
            client: 77,
            shard: kind.shard(),
            kind,
        };
        let mut sessions = HashMap::new();
        sessions.insert(
            (op.client, op.shard),
            Session {
                last_op: op,
                last_index: Some(9),
            },
        );

        let mut config = Config::empty();
        config.num = 4;
        config.shards = [2; crate::ctrl::NSHARDS];
        config
            .groups
            .insert(2, vec!["127.0.0.1:52801".parse().unwrap()]);

        let snapshot = Snapshot {
            kv,
            sessions,
            config,
        };
        let decoded = Snapshot::decode(&snapshot.encode()?)?;
        assert_eq!(decoded, snapshot);
        Ok(())
    }
}
