use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::messaging::transport::DatagramSocket;


enum Inbound {
    Packet(Vec<u8>, SocketAddr),
    Failure,
}

/// In-memory [DatagramSocket]: everything sent is recorded for inspection, and 'received'
///  datagrams are whatever the test injects.
pub struct TrackingSocket {
    local_addr: SocketAddr,
    sent: RwLock<Vec<(SocketAddr, Vec<u8>)>>,
    inbound_sender: mpsc::UnboundedSender<Inbound>,
    inbound_receiver: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    fail_sends: AtomicBool,
}

impl TrackingSocket {
    pub fn new(local_addr: SocketAddr) -> TrackingSocket {
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
        TrackingSocket {
            local_addr,
            sent: Default::default(),
            inbound_sender,
            inbound_receiver: Mutex::new(inbound_receiver),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// queue a datagram to be returned by the next call to `recv_from`
    pub fn inject(&self, buf: &[u8], from: SocketAddr) {
        let _ = self.inbound_sender.send(Inbound::Packet(buf.to_vec(), from));
    }

    /// make the next call to `recv_from` fail
    pub fn inject_receive_failure(&self) {
        let _ = self.inbound_sender.send(Inbound::Failure);
    }

    pub fn set_failing_sends(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::Release);
    }

    /// returns sent datagrams as text, clearing the internal buffer
    pub async fn sent_packets(&self) -> Vec<(SocketAddr, String)> {
        let mut lock = self.sent.write().await;
        std::mem::take(&mut *lock)
            .into_iter()
            .map(|(to, buf)| (to, String::from_utf8_lossy(&buf).into_owned()))
            .collect()
    }

    pub async fn num_sent(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl DatagramSocket for TrackingSocket {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            bail!("simulated send failure to {:?}", to);
        }
        self.sent.write().await.push((to, buf.to_vec()));
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let mut receiver = self.inbound_receiver.lock().await;
        match receiver.recv().await {
            Some(Inbound::Packet(data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            Some(Inbound::Failure) => Err(anyhow!("simulated receive failure")),
            // we hold a sender ourselves, so this is unreachable in practice
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
