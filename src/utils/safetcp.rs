//! Safe TCP bind/connect helpers and length-prefixed MessagePack framing.

use std::marker::Unpin;
use std::net::SocketAddr;

use crate::utils::ShardsetError;

use serde::de::DeserializeOwned;
use serde::Serialize;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

/// Receives an object of type `T` from a TCP readable connection. A frame is
/// a big-endian `u64` length followed by that many bytes of MessagePack.
pub(crate) async fn read_frame<T, Conn>(
    conn_read: &mut Conn,
) -> Result<T, ShardsetError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    let obj_len = conn_read.read_u64().await?; // receive length first
    let mut obj_buf: Vec<u8> = vec![0; obj_len as usize];
    conn_read.read_exact(&mut obj_buf[..]).await?;
    let obj = decode_from_slice(&obj_buf)?;
    Ok(obj)
}

/// Sends an object of type `T` through a TCP writable connection, framed the
/// same way `read_frame` expects.
pub(crate) async fn write_frame<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), ShardsetError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    Ok(())
}

/// Wrapper over tokio `TcpListener::bind()` that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, ShardsetError> {
    loop {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.set_nodelay(true)?;
        socket.bind(bind_addr)?;

        match socket.listen(1024) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, ShardsetError> {
    loop {
        match TcpStream::connect(conn_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod safetcp_tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct TestFrame {
        seq: u64,
        body: String,
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frame_round_trip() -> Result<(), ShardsetError> {
        let listener =
            tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;

        let echoer = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let frame: TestFrame = read_frame(&mut conn).await.unwrap();
            write_frame(&mut conn, &frame).await.unwrap();
        });

        let mut conn = tcp_connect_with_retry(addr, 1).await?;
        let sent = TestFrame {
            seq: 7,
            body: "over the wire".into(),
        };
        write_frame(&mut conn, &sent).await?;
        let echoed: TestFrame = read_frame(&mut conn).await?;
        assert_eq!(echoed, sent);

        echoer.await?;
        Ok(())
    }
}
