//! Shardset server -- cross-group shard migration.
//!
//! Invoked while applying a `ChangeConfig`: the destination pulls shard
//! state from each prior owner. The state mutex is released for the duration
//! of the outbound pulls and reacquired for each merge; new client admissions
//! are meanwhile blocked by the poller holding the client mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use crate::ctrl::{key_to_shard, Config, ConfigNum, Gid, ShardId, NSHARDS};
use crate::server::{
    request_shard_state, ErrCode, PullArgs, PullReply, ShardServer,
    LOCAL_CLIENT,
};

use futures::future::join_all;

use tokio::time::{self, Duration};

// ShardServer migration destination-side implementation
impl ShardServer {
    /// Computes which shards must be pulled from which prior owner when
    /// moving from `old` to `next`, for the group `gid`.
    pub(crate) fn incoming_sets(
        old: &Config,
        next: &Config,
        gid: Gid,
    ) -> BTreeMap<Gid, BTreeSet<ShardId>> {
        let mut sets: BTreeMap<Gid, BTreeSet<ShardId>> = BTreeMap::new();
        for shard in 0..NSHARDS {
            if old.shards[shard] != gid && next.shards[shard] == gid {
                sets.entry(old.shards[shard]).or_default().insert(shard);
            }
        }
        sets.remove(&0); // previously unowned shards have nothing to pull
        sets
    }

    /// Pulls every needed shard from its prior owner, all source groups
    /// worked concurrently. Returns only once all pulls have merged (or this
    /// replica dies).
    pub(crate) async fn pull_missing_shards(&self, old: &Config, next: &Config) {
        // nothing is pulled out of the initial empty configuration
        if old.num == 0 {
            return;
        }

        let sets = Self::incoming_sets(old, next, self.gid);
        if sets.is_empty() {
            return;
        }
        pf_info!(self.me; "group {} pulling shards for config {}: {:?}",
                          self.gid, next.num, sets);

        let pullers = sets.into_iter().map(|(src_gid, shards)| {
            // source servers come from the old configuration; the new one
            // may no longer list the group at all
            let servers =
                old.groups.get(&src_gid).cloned().unwrap_or_default();
            self.pull_from_group(src_gid, servers, shards, next.num)
        });
        join_all(pullers).await;
    }

    /// Pull worker for one source group: round-robins its servers until one
    /// answers OK, retrying forever with backoff, then merges the returned
    /// state under the state mutex.
    async fn pull_from_group(
        &self,
        src_gid: Gid,
        servers: Vec<SocketAddr>,
        shards: BTreeSet<ShardId>,
        config_num: ConfigNum,
    ) {
        let args = PullArgs {
            gid: self.gid,
            me: self.me,
            shards,
            config_num,
        };
        let backoff = Duration::from_millis(self.config.migrate_backoff_ms);

        loop {
            for (si, &server) in servers.iter().enumerate() {
                if self.is_dead() {
                    return;
                }
                match request_shard_state(server, &args).await {
                    Ok(reply) if reply.err == ErrCode::Ok => {
                        self.merge_pulled_state(reply).await;
                        pf_info!(self.me; "pulled {:?} from group {} [{}]",
                                          args.shards, src_gid, si);
                        return;
                    }
                    Ok(reply) => {
                        pf_debug!(self.me; "group {} [{}] answered pull: {:?}",
                                           src_gid, si, reply.err);
                    }
                    Err(e) => {
                        pf_debug!(self.me; "pull to group {} [{}] failed: {}",
                                           src_gid, si, e);
                    }
                }
            }
            time::sleep(backoff).await;
        }
    }

    /// Merges one pull reply into local state. Transferred sessions lose
    /// their log index: they describe activity on another group's log and
    /// must never match a local log record.
    async fn merge_pulled_state(&self, reply: PullReply) {
        let mut st = self.mu.lock().await;
        for (key, value) in reply.kv {
            st.kv.insert(key, value);
        }
        for (skey, mut session) in reply.sessions {
            session.last_index = None;
            st.sessions.insert(skey, session);
        }
    }
}

// ShardServer migration source-side implementation
impl ShardServer {
    /// Handler of a shard-state pull from another group. Copies out the
    /// requested subsets without deleting anything; served-away keys simply
    /// become unreachable through the ownership filter.
    pub(crate) async fn handle_shard_pull(&self, args: PullArgs) -> PullReply {
        pf_debug!(self.me; "pull of {:?} from group {} [{}]",
                           args.shards, args.gid, args.me);

        if !self.engine.get_state().1 {
            return PullReply::fail(ErrCode::WrongLeader);
        }

        let st = self.mu.lock().await;
        if st.config.num < args.config_num {
            pf_debug!(self.me; "pull wants config {}, still at {}",
                               args.config_num, st.config.num);
            return PullReply::fail(ErrCode::LowerConfigNum);
        }

        let kv = st
            .kv
            .iter()
            .filter(|(key, _)| args.shards.contains(&key_to_shard(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let sessions = st
            .sessions
            .iter()
            .filter(|((client, _), session)| {
                *client != LOCAL_CLIENT
                    && args.shards.contains(&session.last_op.shard)
            })
            .map(|(skey, session)| (*skey, session.clone()))
            .collect();

        PullReply {
            err: ErrCode::Ok,
            kv,
            sessions,
        }
    }
}

#[cfg(test)]
mod migrate_tests {
    use super::*;

    fn config_with(num: ConfigNum, shards: [Gid; NSHARDS]) -> Config {
        Config {
            num,
            shards,
            groups: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn incoming_groups_by_source() {
        let old = config_with(1, [1, 1, 2, 2, 3, 3, 1, 2, 3, 1]);
        let mut shards = old.shards;
        shards[0] = 3; // from group 1
        shards[2] = 3; // from group 2
        shards[3] = 3; // from group 2
        let next = config_with(2, shards);

        let sets = ShardServer::incoming_sets(&old, &next, 3);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[&1], BTreeSet::from([0]));
        assert_eq!(sets[&2], BTreeSet::from([2, 3]));
    }

    #[test]
    fn incoming_skips_unowned() {
        let old = config_with(1, [0; NSHARDS]);
        let next = config_with(2, [7; NSHARDS]);
        // everything comes from "nobody": nothing to pull
        assert!(ShardServer::incoming_sets(&old, &next, 7).is_empty());
    }

    #[test]
    fn incoming_ignores_kept_shards() {
        let old = config_with(3, [4; NSHARDS]);
        let next = config_with(4, [4; NSHARDS]);
        assert!(ShardServer::incoming_sets(&old, &next, 4).is_empty());
    }
}
