use std::net::SocketAddr;
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::trace;


/// This is an abstraction for connectionless, best effort datagram I/O. It decouples the
///  engines from `tokio::net::UdpSocket` so tests can record and inject packets without
///  binding real sockets (see [crate::test_util::tracking_socket::TrackingSocket]).
///
/// Any `Err` returned from here is a transport failure, i.e. something the caller can not
///  recover from locally.
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// Waits for the next datagram. Callers race this against their cancellation token,
    ///  so implementations must be cancel safe.
    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> anyhow::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        UdpSocket::send_to(self, buf, to).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(UdpSocket::local_addr(self)?)
    }
}
