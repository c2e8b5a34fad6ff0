//! Shardset linearizable client with leader caching and retry.
//!
//! Operations rotate through the whole server list (all replicas of all
//! groups) until one accepts: a deposed leader answers `WrongLeader`, a
//! group that lost the key's shard answers `WrongGroup`, and the right
//! leader eventually answers `Ok`. The client never gives up.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::client::ClientApiStub;
use crate::server::{
    gen_client_id, ApiReply, ApiRequest, ClientId, Command, ErrCode, ReqNum,
};
use crate::utils::ShardsetError;

use serde::Deserialize;

use tokio::time::{self, Duration};

/// Configuration parameters struct.
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Which server index to try first.
    pub init_server: usize,

    /// Pause between full sweeps of the server list in millisecs.
    pub sweep_pause_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            init_server: 0,
            sweep_pause_ms: 20,
        }
    }
}

/// Shardset client stub.
pub struct ShardsetClient {
    /// My client ID, random in `[1, 2^62)`.
    id: ClientId,

    /// Configuration parameters struct.
    config: ClientConfig,

    /// Client API addresses of every server of every group.
    servers: Vec<SocketAddr>,

    /// Index of the server last known to accept a request.
    leader: usize,

    /// Next request number; starts at 1 and increases monotonically.
    req_num: ReqNum,

    /// Established connection stubs, by server index.
    conns: HashMap<usize, ClientApiStub>,
}

impl ShardsetClient {
    /// Creates a new client stub with a fresh random ID.
    pub fn new(
        servers: Vec<SocketAddr>,
        config_str: Option<&str>,
    ) -> Result<Self, ShardsetError> {
        if servers.is_empty() {
            return logged_err!("client"; "empty server list given");
        }
        let config = parsed_config!(config_str => ClientConfig;
                                    init_server, sweep_pause_ms)?;
        let leader = config.init_server % servers.len();

        Ok(ShardsetClient {
            id: gen_client_id(),
            config,
            servers,
            leader,
            req_num: 1,
            conns: HashMap::new(),
        })
    }

    /// My client ID.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Fetches the current value for a key ("" if the key does not exist).
    /// Keeps trying forever in the face of all errors.
    pub async fn get(&mut self, key: &str) -> Result<String, ShardsetError> {
        let reply = self
            .call(Command::Get {
                key: key.to_string(),
            })
            .await?;
        Ok(reply.value.unwrap_or_default())
    }

    /// Puts a value into a key.
    pub async fn put(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), ShardsetError> {
        self.call(Command::Put {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Appends to the value of a key.
    pub async fn append(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), ShardsetError> {
        self.call(Command::Append {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Issues one command and retries until some server accepts it: start
    /// from the cached leader, rotate on any failure, and pause briefly
    /// after sweeping the whole list.
    async fn call(&mut self, cmd: Command) -> Result<ApiReply, ShardsetError> {
        let req = ApiRequest {
            client: self.id,
            req_num: self.req_num,
            cmd,
        };
        self.req_num += 1;

        let mut server = self.leader;
        let mut tried = 0;
        loop {
            if tried == self.servers.len() {
                tried = 0;
                time::sleep(Duration::from_millis(self.config.sweep_pause_ms))
                    .await;
            }
            tried += 1;

            match self.round_trip(server, &req).await {
                Ok(reply) if reply.err == ErrCode::Ok => {
                    self.leader = server;
                    pf_debug!(self.id; "${} {:?} answered by server {}",
                                       req.req_num, reply.err, server);
                    return Ok(reply);
                }
                Ok(reply) => {
                    pf_debug!(self.id; "${} server {} answered {:?}",
                                       req.req_num, server, reply.err);
                }
                Err(e) => {
                    // connection is broken; drop it so the next attempt
                    // reconnects afresh
                    pf_debug!(self.id; "${} server {} unreachable: {}",
                                       req.req_num, server, e);
                    self.conns.remove(&server);
                }
            }
            server = (server + 1) % self.servers.len();
        }
    }

    /// Makes one request round-trip to the given server index, connecting
    /// lazily if needed.
    async fn round_trip(
        &mut self,
        server: usize,
        req: &ApiRequest,
    ) -> Result<ApiReply, ShardsetError> {
        if !self.conns.contains_key(&server) {
            let stub =
                ClientApiStub::new_by_connect(self.id, self.servers[server])
                    .await?;
            self.conns.insert(server, stub);
        }

        let stub = self.conns.get_mut(&server).unwrap();
        stub.send_req(req).await?;
        stub.recv_reply().await
    }
}
