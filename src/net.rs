use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::{debug, trace};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{QueryError, Result};

/// Per-exchange deadline used when the caller doesn't pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_535;

/// What to do with a datagram that just arrived.
#[derive(Debug)]
pub enum Control {
    /// Not ours or not finished yet; keep listening.
    Wait,
    /// The exchange is done; resolve with this payload.
    Close(Vec<u8>),
    /// The exchange failed; resolve with this error.
    Error(QueryError),
}

/// One UDP association with a single remote endpoint.
///
/// Serves one in-flight exchange at a time (`send` takes `&mut self`).
/// Query different servers concurrently through separate instances.
#[derive(Debug)]
pub struct Transport {
    remote: SocketAddr,
    timeout: Duration,
}

impl Transport {
    pub fn new(remote: SocketAddr, timeout_dur: Option<Duration>) -> Self {
        Transport {
            remote,
            timeout: timeout_dur.unwrap_or(DEFAULT_TIMEOUT),
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `payload` and feed every inbound datagram to `classify` until it
    /// returns [Control::Close] or [Control::Error], or the deadline passes.
    ///
    /// A fresh socket is bound for each exchange and dropped on every exit
    /// path, so nothing keeps listening once this returns.
    pub async fn send<F>(&mut self, payload: &[u8], mut classify: F) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8], SocketAddr) -> Control,
    {
        if self.remote.ip().is_unspecified() {
            return Err(QueryError::Configuration("remote address is unset"));
        }
        if self.remote.port() == 0 {
            return Err(QueryError::Configuration("remote port is unset"));
        }
        if payload.is_empty() {
            return Err(QueryError::Configuration("payload is empty"));
        }

        // just arbitrarily bind any port, doesn't matter really
        let local: SocketAddr = match self.remote.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let sock: UdpSocket = UdpSocket::bind(local)
            .await
            .map_err(QueryError::FailedPortBind)?;

        debug!(
            "sending {} byte(s) to {}, waiting up to {:?}",
            payload.len(),
            self.remote,
            self.timeout()
        );
        trace!("payload {:02x?}", payload);
        sock.send_to(payload, self.remote)
            .await
            .map_err(QueryError::SendError)?;

        let exchange = async {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match sock.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => return Err(QueryError::ReceiveError(e)),
                };
                trace!("received {} byte(s) from {}", len, from);

                match classify(&buf[..len], from) {
                    Control::Wait => continue,
                    Control::Close(data) => return Ok(data),
                    Control::Error(e) => {
                        debug!("exchange with {} failed: {}", self.remote, e);
                        return Err(e);
                    }
                }
            }
        };

        let outcome = timeout(self.timeout, exchange).await;
        debug!("closing socket for {}", self.remote);
        outcome?
    }
}
