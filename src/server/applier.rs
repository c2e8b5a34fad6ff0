//! Shardset server -- apply loop.
//!
//! The single consumer of the consensus engine's apply channel, and the only
//! place the state machine is ever mutated.

use std::sync::Arc;

use crate::consensus::{ApplyReceiver, LogIndex};
use crate::ctrl::key_to_shard;
use crate::server::{
    is_stale_replay, Op, OpKind, Session, ShardServer, NONCE_ORPHAN,
};
use crate::utils::ShardsetError;

use rmp_serde::decode::from_slice as decode_from_slice;

// ShardServer apply loop implementation
impl ShardServer {
    /// Apply loop thread function.
    pub(crate) async fn applier_task(
        self: Arc<Self>,
        mut apply_rx: ApplyReceiver,
    ) {
        pf_debug!(self.me; "applier thread spawned");

        while let Some(item) = apply_rx.recv().await {
            if self.is_dead() {
                break;
            }
            if let Err(e) = self.handle_apply_item(item).await {
                // an undecodable committed item means corrupted state
                pf_error!(self.me; "error applying item: {}", e);
                panic!("apply loop hit undecodable item: {}", e);
            }
        }

        pf_debug!(self.me; "applier thread exitted");
    }

    /// Handler of one committed command from the apply channel.
    pub(crate) async fn apply_command(
        &self,
        index: LogIndex,
        data: Vec<u8>,
    ) -> Result<(), ShardsetError> {
        let op: Op = decode_from_slice(&data)?;
        let skey = (op.client, op.shard);

        let mut st = self.mu.lock().await;
        if st.last_applied + 1 != index {
            pf_warn!(self.me; "applying #{} after #{}, out of order",
                              index, st.last_applied);
        }
        st.log_record.insert(index, op.clone());
        st.last_applied = index;

        // stable operation: update session bookkeeping only, leave the state
        // machine untouched
        if is_stale_replay(st.sessions.get(&skey), &op, index) {
            pf_debug!(self.me; "stable op #{} for [{}]${}, not re-applied",
                               index, op.client, op.req_num);
            st.sessions.insert(
                skey,
                Session {
                    last_op: op,
                    last_index: Some(index),
                },
            );
            return Ok(());
        }

        // configuration changes may block on cross-group pulls, so they get
        // the release/reacquire treatment around the migration
        if let OpKind::ChangeConfig { config: next } = &op.kind {
            if next.num > st.config.num {
                let old = st.config.clone();
                let next = next.clone();
                drop(st);
                self.pull_missing_shards(&old, &next).await;
                st = self.mu.lock().await;
                pf_info!(self.me; "group {} changed config {} -> {}",
                                  self.gid, old.num, next.num);
                st.config = next;
            }
            st.sessions.insert(
                skey,
                Session {
                    last_op: op,
                    last_index: Some(index),
                },
            );
            return self.maybe_snapshot(&mut st, index);
        }

        let applied = match &op.kind {
            OpKind::Get { key } => {
                st.config.shards[key_to_shard(key)] == self.gid
            }
            OpKind::Put { key, value } => {
                if st.config.shards[key_to_shard(key)] == self.gid {
                    st.kv.insert(key.clone(), value.clone());
                    true
                } else {
                    false
                }
            }
            OpKind::Append { key, value } => {
                if st.config.shards[key_to_shard(key)] == self.gid {
                    st.kv.entry(key.clone()).or_default().push_str(value);
                    true
                } else {
                    false
                }
            }
            OpKind::ChangeConfig { .. } => true, // handled above
        };

        if applied {
            pf_trace!(self.me; "applied {} #{} for [{}]${}",
                               op.kind.name(), index, op.client, op.req_num);
            st.sessions.insert(
                skey,
                Session {
                    last_op: op,
                    last_index: Some(index),
                },
            );
        } else {
            // ownership moved between propose and apply: orphan the slot so
            // the waiter reports a conflict and its client retries elsewhere
            pf_debug!(self.me; "op {} #{} not owned, orphaning slot",
                               op.kind.name(), index);
            if let Some(rec) = st.log_record.get_mut(&index) {
                rec.nonce = NONCE_ORPHAN;
            }
        }

        self.maybe_snapshot(&mut st, index)
    }
}
