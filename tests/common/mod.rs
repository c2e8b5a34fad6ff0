//! Shared harness for multi-replica, multi-group integration scenarios.
//!
//! Groups run in-process over the bundled local consensus engine, but every
//! RPC surface (client API, group-to-group pulls, controller queries) goes
//! over real localhost TCP, with every listener bound to an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use shardset::{
    key_to_shard, Config, ConfigNum, CtrlService, Gid, LocalGroup, ReplicaId,
    ShardServer, ShardsetError,
};

use tokio::time::{self, Duration, Instant};

/// Binds-to-any ephemeral localhost address.
pub fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Starts a controller service on an ephemeral port.
pub async fn start_ctrl() -> Result<Arc<CtrlService>, ShardsetError> {
    CtrlService::new_and_setup(any_addr()).await
}

/// One replica group running in-process: the shared log core plus its
/// servers. A `None` slot is a killed replica awaiting restart.
pub struct TestGroup {
    pub gid: Gid,
    pub core: Arc<LocalGroup>,
    pub servers: Vec<Option<Arc<ShardServer>>>,
    ctrl_addr: SocketAddr,
    config_str: Option<String>,
}

impl TestGroup {
    /// Starts a fresh group of `population` replicas, with replica 0
    /// assigned initial leadership.
    pub async fn start(
        gid: Gid,
        population: usize,
        ctrl_addr: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, ShardsetError> {
        let core = LocalGroup::new();
        core.set_leader(Some(0));

        let mut group = TestGroup {
            gid,
            core,
            servers: vec![],
            ctrl_addr,
            config_str: config_str.map(str::to_string),
        };
        for id in 0..population {
            let server = group.spawn_replica(id as ReplicaId).await?;
            group.servers.push(Some(server));
        }
        Ok(group)
    }

    async fn spawn_replica(
        &self,
        id: ReplicaId,
    ) -> Result<Arc<ShardServer>, ShardsetError> {
        let (engine, apply_rx) = self.core.attach(id);
        ShardServer::new_and_setup(
            id,
            self.gid,
            any_addr(),
            any_addr(),
            self.ctrl_addr,
            Arc::new(engine),
            apply_rx,
            self.config_str.as_deref(),
        )
        .await
    }

    /// Client API addresses of all live replicas.
    pub fn api_addrs(&self) -> Vec<SocketAddr> {
        self.servers
            .iter()
            .flatten()
            .map(|server| server.api_addr())
            .collect()
    }

    /// Group-to-group addresses of all live replicas.
    pub fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.servers
            .iter()
            .flatten()
            .map(|server| server.peer_addr())
            .collect()
    }

    /// The replica currently assigned leadership.
    pub fn leader(&self) -> Arc<ShardServer> {
        let id = self.core.leader().expect("group has no leader");
        self.servers[id as usize]
            .clone()
            .expect("leader replica is killed")
    }

    /// Reassigns leadership to the given replica.
    pub fn set_leader(&self, id: ReplicaId) {
        self.core.set_leader(Some(id));
    }

    /// Crashes one replica: its tasks die and it detaches from the engine.
    pub fn kill_replica(&mut self, id: ReplicaId) {
        if let Some(server) = self.servers[id as usize].take() {
            server.kill();
        }
    }

    /// Restarts a previously killed replica; it catches up from the
    /// engine's snapshot and log tail.
    pub async fn restart_replica(
        &mut self,
        id: ReplicaId,
    ) -> Result<(), ShardsetError> {
        assert!(self.servers[id as usize].is_none());
        let server = self.spawn_replica(id).await?;
        self.servers[id as usize] = Some(server);
        Ok(())
    }

    /// Kills every live replica of the group.
    pub fn kill_all(&mut self) {
        for slot in self.servers.iter_mut() {
            if let Some(server) = slot.take() {
                server.kill();
            }
        }
    }

    /// Waits until every live replica has advanced to configuration `num`,
    /// panicking after `timeout`.
    pub async fn wait_for_config(&self, num: ConfigNum, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let mut caught_up = true;
            for server in self.servers.iter().flatten() {
                if server.config_num().await < num {
                    caught_up = false;
                    break;
                }
            }
            if caught_up {
                return;
            }
            if Instant::now() >= deadline {
                panic!(
                    "group {} did not reach config {} in {:?}",
                    self.gid, num, timeout
                );
            }
            time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Picks a short key whose shard is owned by `gid` under `config` and which
/// is not already taken.
pub fn key_owned_by(config: &Config, gid: Gid, taken: &[&str]) -> String {
    for i in 0..1000 {
        let key = format!("key-{}", i);
        if config.shards[key_to_shard(&key)] == gid
            && !taken.contains(&key.as_str())
        {
            return key;
        }
    }
    panic!("no key found for group {}", gid);
}
