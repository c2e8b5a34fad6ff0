//! Shardset client API communication stub implementation.

use std::net::SocketAddr;

use crate::server::{ApiReply, ApiRequest, ClientId};
use crate::utils::{
    read_frame, tcp_connect_with_retry, write_frame, ShardsetError,
};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Client API connection stub to one server. Strictly request-reply: the
/// owning client awaits every reply before sending its next request.
pub struct ClientApiStub {
    /// My client ID.
    id: ClientId,

    /// The TCP connection stream.
    conn: TcpStream,
}

impl ClientApiStub {
    /// Connects to the given server address, sending the opening client-ID
    /// handshake.
    pub async fn new_by_connect(
        id: ClientId,
        addr: SocketAddr,
    ) -> Result<Self, ShardsetError> {
        let mut conn = tcp_connect_with_retry(addr, 0).await?;
        conn.write_u64(id).await?; // send my client ID
        Ok(ClientApiStub { id, conn })
    }

    /// Sends a request to established server connection.
    pub async fn send_req(
        &mut self,
        req: &ApiRequest,
    ) -> Result<(), ShardsetError> {
        pf_trace!(self.id; "send req {:?}", req);
        write_frame(&mut self.conn, req).await
    }

    /// Receives a reply from established server connection.
    pub async fn recv_reply(&mut self) -> Result<ApiReply, ShardsetError> {
        let reply = read_frame(&mut self.conn).await?;
        pf_trace!(self.id; "recv reply {:?}", reply);
        Ok(reply)
    }
}
