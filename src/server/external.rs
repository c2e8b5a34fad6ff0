//! Shardset server -- external client-facing API module.
//!
//! Wire types for client requests, plus the listener: an acceptor thread
//! takes connections (each opened with a `u64` client-ID handshake) and
//! spawns one servant thread per client connection.

use std::sync::Arc;

use crate::server::{ClientId, ErrCode, OpKind, ReqNum, ShardServer};
use crate::utils::{read_frame, write_frame};

use serde::{Deserialize, Serialize};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Command to the key-value state machine, as issued by clients.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Get the value of given key ("" if absent).
    Get { key: String },

    /// Put a new value into key.
    Put { key: String, value: String },

    /// Append to the value of key.
    Append { key: String, value: String },
}

impl From<Command> for OpKind {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Get { key } => OpKind::Get { key },
            Command::Put { key, value } => OpKind::Put { key, value },
            Command::Append { key, value } => OpKind::Append { key, value },
        }
    }
}

/// Request received from client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Issuing client's ID.
    pub client: ClientId,

    /// Client's request number, monotonically increasing from 1.
    pub req_num: ReqNum,

    /// Command to the state machine.
    pub cmd: Command,
}

/// Reply back to client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ApiReply {
    /// Resolution code; anything but `Ok` means "rotate and retry".
    pub err: ErrCode,

    /// Fetched value for a successful `Get`.
    pub value: Option<String>,
}

// ShardServer external API implementation
impl ShardServer {
    /// Client connection acceptor thread function.
    pub(crate) async fn api_acceptor_task(
        self: Arc<Self>,
        listener: TcpListener,
    ) {
        pf_debug!(self.me; "api acceptor thread spawned");

        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    pf_warn!(self.me; "error accepting client: {}", e);
                    continue;
                }
            };

            // connections open with the client sending its ID
            let id = match stream.read_u64().await {
                Ok(id) => id,
                Err(e) => {
                    pf_warn!(self.me; "error receiving client ID: {}", e);
                    continue;
                }
            };
            pf_debug!(self.me; "accepted client {} from '{}'", id, peer);

            let servant_handle = tokio::spawn(Self::api_servant_task(
                self.clone(),
                id,
                stream,
            ));
            self.handles.lock().unwrap().push(servant_handle);
        }
    }

    /// Per-client request servant thread function. Requests on one
    /// connection are served strictly in order; the issuing client awaits
    /// each reply before sending the next request anyway.
    async fn api_servant_task(
        self: Arc<Self>,
        id: ClientId,
        mut stream: TcpStream,
    ) {
        pf_debug!(self.me; "api servant thread for {} spawned", id);

        loop {
            let req: ApiRequest = match read_frame(&mut stream).await {
                Ok(req) => req,
                Err(_) => break, // connection closed or broken
            };
            if self.is_dead() {
                break;
            }
            pf_trace!(self.me; "request from [{}]${}: {:?}",
                               req.client, req.req_num, req.cmd);

            let reply = self.handle_client_request(req).await;
            if let Err(e) = write_frame(&mut stream, &reply).await {
                pf_warn!(self.me; "error replying to {}: {}", id, e);
                break;
            }
        }

        pf_debug!(self.me; "api servant thread for {} exitted", id);
    }

    /// Handler of one client request: takes the client admission mutex for
    /// its whole duration (so reconfigurations exclude client traffic), then
    /// runs the command submit path.
    async fn handle_client_request(&self, req: ApiRequest) -> ApiReply {
        let _ck = self.ck_mu.lock().await;

        match self
            .handle_command(req.client, req.req_num, req.cmd.into())
            .await
        {
            Ok(outcome) => ApiReply {
                err: outcome.err,
                value: outcome.value,
            },
            Err(e) => {
                pf_error!(self.me; "error handling [{}]${}: {}",
                                   req.client, req.req_num, e);
                ApiReply {
                    err: ErrCode::CommitTimeout,
                    value: None,
                }
            }
        }
    }
}
