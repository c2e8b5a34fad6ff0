//! Shardset server -- group-to-group shard transfer surface.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::consensus::ReplicaId;
use crate::ctrl::{ConfigNum, Gid, ShardId};
use crate::server::{ErrCode, Session, SessionKey, ShardServer};
use crate::utils::{
    read_frame, tcp_connect_with_retry, write_frame, ShardsetError,
};

use serde::{Deserialize, Serialize};

use tokio::net::{TcpListener, TcpStream};

/// Shard-state pull request sent by a migrating destination group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PullArgs {
    /// Requesting group's ID.
    pub gid: Gid,

    /// Requesting replica's ID, for log correlation.
    pub me: ReplicaId,

    /// Shards whose state is wanted.
    pub shards: BTreeSet<ShardId>,

    /// Configuration epoch the requester is moving into. The source must
    /// have reached at least this epoch to answer.
    pub config_num: ConfigNum,
}

/// Shard-state pull reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PullReply {
    /// Resolution code.
    pub err: ErrCode,

    /// Subset of the source's map restricted to the requested shards.
    pub kv: HashMap<String, String>,

    /// Subset of the source's sessions whose last activity was on the
    /// requested shards (local sessions excluded).
    pub sessions: HashMap<SessionKey, Session>,
}

impl PullReply {
    /// Shapes a non-OK reply.
    pub fn fail(err: ErrCode) -> Self {
        PullReply {
            err,
            kv: HashMap::new(),
            sessions: HashMap::new(),
        }
    }
}

/// Makes one shard-state pull round-trip to the given source server. The
/// caller owns all retrying.
pub(crate) async fn request_shard_state(
    server: SocketAddr,
    args: &PullArgs,
) -> Result<PullReply, ShardsetError> {
    let mut conn = tcp_connect_with_retry(server, 0).await?;
    write_frame(&mut conn, args).await?;
    read_frame(&mut conn).await
}

// ShardServer group-to-group listener implementation
impl ShardServer {
    /// Group connection acceptor thread function.
    pub(crate) async fn peer_acceptor_task(
        self: Arc<Self>,
        listener: TcpListener,
    ) {
        pf_debug!(self.me; "peer acceptor thread spawned");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    pf_warn!(self.me; "error accepting group peer: {}", e);
                    continue;
                }
            };

            let servant_handle = tokio::spawn(Self::peer_servant_task(
                self.clone(),
                stream,
                peer,
            ));
            self.handles.lock().unwrap().push(servant_handle);
        }
    }

    /// Per-connection pull servant thread function.
    async fn peer_servant_task(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) {
        pf_debug!(self.me; "peer servant thread for '{}' spawned", peer);

        loop {
            let args: PullArgs = match read_frame(&mut stream).await {
                Ok(args) => args,
                Err(_) => break, // connection closed or broken
            };
            if self.is_dead() {
                break;
            }

            let reply = self.handle_shard_pull(args).await;
            if let Err(e) = write_frame(&mut stream, &reply).await {
                pf_warn!(self.me; "error replying to '{}': {}", peer, e);
                break;
            }
        }

        pf_debug!(self.me; "peer servant thread for '{}' exitted", peer);
    }
}
