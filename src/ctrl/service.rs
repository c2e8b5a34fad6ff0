//! Shard controller service: an in-memory ordered sequence of configurations
//! served over framed TCP.
//!
//! The controller only ever appends: `Join`/`Leave`/`Move` each publish a new
//! numbered configuration derived from the latest one. Groups never observe a
//! configuration being edited in place.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use crate::ctrl::{Config, ConfigNum, Gid, ShardId, NSHARDS};
use crate::utils::{read_frame, tcp_bind_with_retry, write_frame, ShardsetError};

use serde::{Deserialize, Serialize};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Request to the controller service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum CtrlRequest {
    /// Fetch configuration `num`; `None` means latest.
    Query { num: Option<ConfigNum> },

    /// Add (or replace) a group and publish a rebalanced configuration.
    Join { gid: Gid, servers: Vec<SocketAddr> },

    /// Remove a group and publish a rebalanced configuration.
    Leave { gid: Gid },

    /// Pin one shard to a group and publish the result.
    Move { shard: ShardId, gid: Gid },
}

/// Reply from the controller service. Mutating requests echo the newly
/// published configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CtrlReply {
    pub config: Config,
}

/// The shard controller service module.
pub struct CtrlService {
    /// Ordered configuration sequence; `configs[n].num == n` always holds.
    configs: StdMutex<Vec<Config>>,

    /// Actual bound address of the query listener.
    local_addr: SocketAddr,

    /// Join handles of the acceptor thread and all servant threads.
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

// CtrlService public API implementation
impl CtrlService {
    /// Creates a controller service, binds its listener, and spawns the
    /// connection acceptor thread.
    pub async fn new_and_setup(
        bind_addr: SocketAddr,
    ) -> Result<Arc<Self>, ShardsetError> {
        let listener = tcp_bind_with_retry(bind_addr, 1).await?;
        let local_addr = listener.local_addr()?;

        let service = Arc::new(CtrlService {
            configs: StdMutex::new(vec![Config::empty()]),
            local_addr,
            handles: StdMutex::new(vec![]),
        });

        let acceptor_handle =
            tokio::spawn(Self::acceptor_task(service.clone(), listener));
        service.handles.lock().unwrap().push(acceptor_handle);

        pf_info!("ctrl"; "controller service bound at '{}'", local_addr);
        Ok(service)
    }

    /// Actual bound address of the query listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fetches configuration `num` (`None` or out-of-range means latest).
    pub fn query(&self, num: Option<ConfigNum>) -> Config {
        let configs = self.configs.lock().unwrap();
        match num {
            Some(n) if (n as usize) < configs.len() => {
                configs[n as usize].clone()
            }
            _ => configs.last().unwrap().clone(),
        }
    }

    /// Adds (or replaces) group `gid`, publishing a rebalanced configuration.
    /// Gid 0 is reserved for "no owner" and cannot join.
    pub fn join(&self, gid: Gid, servers: Vec<SocketAddr>) -> Config {
        let mut configs = self.configs.lock().unwrap();
        let mut next = configs.last().unwrap().clone();
        if gid == 0 || servers.is_empty() {
            return next;
        }
        next.num += 1;
        next.groups.insert(gid, servers);
        rebalance(&mut next.shards, &next.groups);
        configs.push(next.clone());
        pf_info!("ctrl"; "published config {} after join of group {}",
                         next.num, gid);
        next
    }

    /// Removes group `gid`, publishing a rebalanced configuration. A no-op
    /// if the group is not present.
    pub fn leave(&self, gid: Gid) -> Config {
        let mut configs = self.configs.lock().unwrap();
        let mut next = configs.last().unwrap().clone();
        if next.groups.remove(&gid).is_none() {
            return next;
        }
        next.num += 1;
        rebalance(&mut next.shards, &next.groups);
        configs.push(next.clone());
        pf_info!("ctrl"; "published config {} after leave of group {}",
                         next.num, gid);
        next
    }

    /// Pins `shard` to `gid`, publishing the result. A no-op if the group is
    /// not present.
    pub fn move_shard(&self, shard: ShardId, gid: Gid) -> Config {
        let mut configs = self.configs.lock().unwrap();
        let mut next = configs.last().unwrap().clone();
        if shard >= NSHARDS || !next.groups.contains_key(&gid) {
            return next;
        }
        next.num += 1;
        next.shards[shard] = gid;
        configs.push(next.clone());
        pf_info!("ctrl"; "published config {} moving shard {} to group {}",
                         next.num, shard, gid);
        next
    }

    /// Shuts the service down by aborting its threads.
    pub fn kill(&self) {
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
        pf_debug!("ctrl"; "controller service killed");
    }
}

// CtrlService acceptor & servant thread implementations
impl CtrlService {
    /// Connection acceptor thread function.
    async fn acceptor_task(self: Arc<Self>, listener: TcpListener) {
        pf_debug!("ctrl"; "acceptor thread spawned");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let servant_handle = tokio::spawn(
                        Self::servant_task(self.clone(), stream, peer),
                    );
                    self.handles.lock().unwrap().push(servant_handle);
                }
                Err(e) => {
                    pf_warn!("ctrl"; "error accepting connection: {}", e);
                }
            }
        }
    }

    /// Per-connection request servant thread function.
    async fn servant_task(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) {
        pf_debug!("ctrl"; "servant thread for '{}' spawned", peer);

        loop {
            let req: CtrlRequest = match read_frame(&mut stream).await {
                Ok(req) => req,
                Err(_) => break, // connection closed or broken
            };

            let config = match req {
                CtrlRequest::Query { num } => self.query(num),
                CtrlRequest::Join { gid, servers } => self.join(gid, servers),
                CtrlRequest::Leave { gid } => self.leave(gid),
                CtrlRequest::Move { shard, gid } => self.move_shard(shard, gid),
            };

            if let Err(e) =
                write_frame(&mut stream, &CtrlReply { config }).await
            {
                pf_warn!("ctrl"; "error replying to '{}': {}", peer, e);
                break;
            }
        }

        pf_debug!("ctrl"; "servant thread for '{}' exitted", peer);
    }
}

/// Rebalances shard ownership across the given groups: spreads shards as
/// evenly as possible while moving as few shards as necessary. Deterministic
/// so that every controller replica would compute the same assignment.
fn rebalance(
    shards: &mut [Gid; NSHARDS],
    groups: &std::collections::HashMap<Gid, Vec<SocketAddr>>,
) {
    if groups.is_empty() {
        *shards = [0; NSHARDS];
        return;
    }

    let mut gids: Vec<Gid> = groups.keys().copied().collect();
    gids.sort_unstable();

    // per-gid target count: NSHARDS split evenly, remainder to lowest gids
    let base = NSHARDS / gids.len();
    let extra = NSHARDS % gids.len();
    let target = |pos: usize| base + usize::from(pos < extra);

    // collect shards currently owned per live gid, in shard order
    let mut owned: BTreeMap<Gid, Vec<ShardId>> =
        gids.iter().map(|&gid| (gid, vec![])).collect();
    let mut orphans: Vec<ShardId> = vec![];
    for (shard, &gid) in shards.iter().enumerate() {
        match owned.get_mut(&gid) {
            Some(list) => list.push(shard),
            None => orphans.push(shard), // owner left, or never owned
        }
    }

    // release the excess of over-loaded groups (highest shard numbers first)
    for (pos, gid) in gids.iter().enumerate() {
        let list = owned.get_mut(gid).unwrap();
        while list.len() > target(pos) {
            orphans.push(list.pop().unwrap());
        }
    }
    orphans.sort_unstable();

    // hand orphans to under-loaded groups in gid order
    let mut orphans = orphans.into_iter();
    for (pos, gid) in gids.iter().enumerate() {
        let deficit = target(pos) - owned[gid].len();
        for _ in 0..deficit {
            let shard = orphans.next().unwrap();
            shards[shard] = *gid;
        }
    }
    debug_assert!(orphans.next().is_none());
}

#[cfg(test)]
mod service_tests {
    use super::*;
    use std::collections::HashMap;

    fn dummy_servers(port: u16) -> Vec<SocketAddr> {
        vec![format!("127.0.0.1:{}", port).parse().unwrap()]
    }

    fn counts(shards: &[Gid; NSHARDS]) -> HashMap<Gid, usize> {
        let mut counts = HashMap::new();
        for &gid in shards {
            *counts.entry(gid).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn rebalance_even_and_total() {
        let mut shards = [0; NSHARDS];
        let mut groups = HashMap::new();
        groups.insert(1, dummy_servers(10001));
        groups.insert(2, dummy_servers(10002));
        groups.insert(3, dummy_servers(10003));
        rebalance(&mut shards, &groups);

        let counts = counts(&shards);
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 3 || c == 4));
    }

    #[test]
    fn rebalance_moves_few() {
        let mut shards = [0; NSHARDS];
        let mut groups = HashMap::new();
        groups.insert(1, dummy_servers(10001));
        rebalance(&mut shards, &groups);
        let before = shards;

        groups.insert(2, dummy_servers(10002));
        rebalance(&mut shards, &groups);

        // group 1 should keep exactly its target share of what it had
        let kept = shards
            .iter()
            .zip(before.iter())
            .filter(|(now, was)| now == was)
            .count();
        assert_eq!(kept, NSHARDS / 2);
    }

    #[test]
    fn rebalance_orphans_on_leave() {
        let mut shards = [0; NSHARDS];
        let mut groups = HashMap::new();
        groups.insert(1, dummy_servers(10001));
        groups.insert(2, dummy_servers(10002));
        rebalance(&mut shards, &groups);

        groups.remove(&1);
        rebalance(&mut shards, &groups);
        assert!(shards.iter().all(|&gid| gid == 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_one_epoch_back() -> Result<(), ShardsetError> {
        let service =
            CtrlService::new_and_setup("127.0.0.1:0".parse()?).await?;
        assert_eq!(service.query(None).num, 0);

        service.join(1, dummy_servers(10001));
        service.join(2, dummy_servers(10002));
        assert_eq!(service.query(None).num, 2);
        assert_eq!(service.query(Some(1)).num, 1);
        assert!(service.query(Some(1)).shards.iter().all(|&gid| gid == 1));

        service.kill();
        Ok(())
    }
}
