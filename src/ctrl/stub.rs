//! Client stub for talking to the shard controller service.

use std::net::SocketAddr;

use crate::ctrl::{Config, ConfigNum, CtrlReply, CtrlRequest, Gid, ShardId};
use crate::utils::{read_frame, tcp_connect_with_retry, write_frame, ShardsetError};

/// Controller connection stub. Connections are made per request; callers of
/// the poller cadence do not benefit from a held-open stream.
#[derive(Debug, Clone)]
pub struct CtrlStub {
    /// Controller service address.
    ctrl_addr: SocketAddr,
}

impl CtrlStub {
    /// Creates a new controller stub.
    pub fn new(ctrl_addr: SocketAddr) -> Self {
        CtrlStub { ctrl_addr }
    }

    /// Fetches configuration `num` from the controller (`None` for latest).
    pub async fn query(
        &self,
        num: Option<ConfigNum>,
    ) -> Result<Config, ShardsetError> {
        self.call(CtrlRequest::Query { num }).await
    }

    /// Registers a group with the controller.
    pub async fn join(
        &self,
        gid: Gid,
        servers: Vec<SocketAddr>,
    ) -> Result<Config, ShardsetError> {
        self.call(CtrlRequest::Join { gid, servers }).await
    }

    /// Deregisters a group from the controller.
    pub async fn leave(&self, gid: Gid) -> Result<Config, ShardsetError> {
        self.call(CtrlRequest::Leave { gid }).await
    }

    /// Pins a shard to a group.
    pub async fn move_shard(
        &self,
        shard: ShardId,
        gid: Gid,
    ) -> Result<Config, ShardsetError> {
        self.call(CtrlRequest::Move { shard, gid }).await
    }

    /// Makes one request round-trip to the controller.
    async fn call(&self, req: CtrlRequest) -> Result<Config, ShardsetError> {
        let mut conn = tcp_connect_with_retry(self.ctrl_addr, 0).await?;
        write_frame(&mut conn, &req).await?;
        let reply: CtrlReply = read_frame(&mut conn).await?;
        Ok(reply.config)
    }
}
