//! In-process UDP servers for driving the engine end to end.
#![allow(dead_code)]

use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// A datagram for the mock server to send back.
pub enum Reply {
    /// From the server's own socket.
    Send(Vec<u8>),
    /// From an unrelated socket, to check that the client ignores it.
    Stranger(Vec<u8>),
}

/// Bind a server on localhost that answers each request with `respond`'s replies.
pub async fn spawn_server<F>(mut respond: F) -> SocketAddr
where
    F: FnMut(&[u8]) -> Vec<Reply> + Send + 'static,
{
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, from)) = server.recv_from(&mut buf).await {
            for reply in respond(&buf[..len]) {
                let _ = match reply {
                    Reply::Send(data) => server.send_to(&data, from).await,
                    Reply::Stranger(data) => stranger.send_to(&data, from).await,
                };
            }
        }
    });
    addr
}
