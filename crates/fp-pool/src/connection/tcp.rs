//! TCP connection factory for FastDFS trackers

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use fp_core::error::ConnectionError;
use fp_core::traits::ConnectionFactory;
use fp_core::types::TrackerAddress;
use fp_protocol::{Packet, PacketCodec};

/// Upper bound on the polite QUIT + shutdown sequence
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One framed TCP connection to a tracker
pub struct TrackerConnection {
    framed: Framed<TcpStream, PacketCodec>,
    peer: SocketAddr,
}

impl TrackerConnection {
    /// Wrap an established stream
    pub fn new(stream: TcpStream) -> Result<Self, ConnectionError> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            framed: Framed::new(stream, PacketCodec::new()),
            peer,
        })
    }

    /// Address of the tracker on the other end
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one packet
    pub async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        self.framed.send(packet).await?;
        Ok(())
    }

    /// Receive one packet
    pub async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        match self.framed.next().await {
            Some(packet) => Ok(packet?),
            None => Err(ConnectionError::Closed),
        }
    }

    /// Send a request and return the body of its successful response
    pub async fn request(&mut self, packet: Packet) -> Result<Bytes, ConnectionError> {
        self.send(packet).await?;
        let response = self.recv().await?;
        Ok(response.into_response_body()?)
    }

    /// Direct access to the framed stream for storage requests
    pub fn framed_mut(&mut self) -> &mut Framed<TcpStream, PacketCodec> {
        &mut self.framed
    }
}

impl std::fmt::Debug for TrackerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerConnection")
            .field("peer", &self.peer)
            .finish()
    }
}

/// Opens plain TCP connections and probes them with `ACTIVE_TEST`
#[derive(Debug, Clone, Default)]
pub struct TrackerConnector;

impl TrackerConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for TrackerConnector {
    type Connection = TrackerConnection;

    async fn connect(&self, address: &TrackerAddress) -> Result<Self::Connection, ConnectionError> {
        let mut last_err = None;
        for addr in tokio::net::lookup_host((address.host.as_str(), address.port)).await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return TrackerConnection::new(stream);
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => e.into(),
            None => ConnectionError::Resolve(address.to_string()),
        })
    }

    async fn probe(&self, conn: &mut Self::Connection) -> Result<(), ConnectionError> {
        let body = conn.request(Packet::active_test()).await?;
        if !body.is_empty() {
            return Err(ConnectionError::ProbeFailed(format!(
                "unexpected {} byte body in active-test response",
                body.len()
            )));
        }
        Ok(())
    }

    async fn close(&self, mut conn: Self::Connection) {
        let peer = conn.peer;
        let result = tokio::time::timeout(CLOSE_TIMEOUT, async {
            conn.send(Packet::quit()).await?;
            conn.framed.get_mut().shutdown().await?;
            Ok::<(), ConnectionError>(())
        })
        .await;

        match result {
            Ok(Ok(())) => tracing::trace!(%peer, "Closed tracker connection"),
            Ok(Err(e)) => tracing::debug!(%peer, error = %e, "Error while closing tracker connection"),
            Err(_) => tracing::debug!(%peer, "Timed out closing tracker connection"),
        }
    }
}
