use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use tokio::select;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::messaging::transport::DatagramSocket;
use crate::messaging::wire::MAX_DATAGRAM_SIZE;
use crate::simulator::link_conditions::{Direction, DirectionConditions, LinkConditions};
use crate::simulator::simulator_config::SimulatorConfig;
use crate::util::random::{Random, RngRandom};


/// The dice roll for a single packet
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ForwardDecision {
    Drop,
    Delay,
    Forward,
}
impl ForwardDecision {
    /// Rolls 1..=100 against the drop chance and, if the packet survives, rolls again against
    ///  the delay chance. A chance of 0 never triggers, a chance of 100 always does.
    pub fn decide<R: Random>(conditions: &DirectionConditions) -> ForwardDecision {
        if R::gen_u32_range(1..=100) <= conditions.drop_chance {
            return ForwardDecision::Drop;
        }
        if R::gen_u32_range(1..=100) <= conditions.delay_chance {
            return ForwardDecision::Delay;
        }
        ForwardDecision::Forward
    }
}

/// What happened to a packet handed to [NetworkSimulator::handle_packet]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ForwardOutcome {
    Dropped,
    /// a detached task forwards it later
    Delayed,
    Forwarded,
    /// server -> client traffic before any client was seen
    NoPeer,
}


/// A man-in-the-middle for datagram traffic between a single client and a fixed target. Every
///  packet from the target goes to the most recently seen client, every other packet goes to
///  the target - its sender becoming the new client.
///
/// Each packet is dropped, delayed or forwarded based on the live [LinkConditions] for its
///  direction. Delayed packets are forwarded by detached tasks, so they can overtake each
///  other or be overtaken by later packets. They are not cancelled on shutdown.
///
/// NB: There is a single learned peer. A second client talking through the simulator at the
///  same time takes over the mapping, and acknowledgments for the first client are misrouted.
pub struct NetworkSimulator<R: Random = RngRandom> {
    config: Arc<SimulatorConfig>,
    socket: Arc<dyn DatagramSocket>,
    conditions: Arc<RwLock<LinkConditions>>,
    peer: RwLock<Option<SocketAddr>>,
    _random: PhantomData<fn() -> R>,
}

impl <R: Random> NetworkSimulator<R> {
    pub fn new(config: Arc<SimulatorConfig>, socket: Arc<dyn DatagramSocket>) -> anyhow::Result<NetworkSimulator<R>> {
        config.validate()?;

        let conditions = Arc::new(RwLock::new(config.initial_conditions));
        Ok(NetworkSimulator {
            config,
            socket,
            conditions,
            peer: Default::default(),
            _random: PhantomData,
        })
    }

    /// The live conditions, shared with whoever reconfigures them (typically the operator
    ///  console)
    pub fn conditions(&self) -> Arc<RwLock<LinkConditions>> {
        self.conditions.clone()
    }

    pub async fn learned_peer(&self) -> Option<SocketAddr> {
        *self.peer.read().await
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("starting network simulator on {:?}, forwarding to {:?}", self.socket.local_addr()?, self.config.target_addr);
        info!("  client: {}", self.conditions.read().await.client);
        info!("  server: {}", self.conditions.read().await.server);

        let result = self.forward_loop(&cancel).await;
        if let Err(e) = &result {
            error!("forwarding failed, shutting down: {}", e);
            cancel.cancel();
        }
        result
    }

    async fn forward_loop(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            select! {
                _ = cancel.cancelled() => return Ok(()),
                recv_result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = recv_result?;
                    self.handle_packet(Bytes::copy_from_slice(&buf[..len]), from).await?;
                }
            }
        }
    }

    /// Routes a single packet. `Err` means that forwarding it right away failed - failures of
    ///  delayed forwards are only logged.
    pub async fn handle_packet(&self, packet: Bytes, from: SocketAddr) -> anyhow::Result<ForwardOutcome> {
        let direction = if from == self.config.target_addr {
            Direction::Downstream
        }
        else {
            Direction::Upstream
        };

        let to = match direction {
            Direction::Upstream => {
                let mut peer = self.peer.write().await;
                if *peer != Some(from) {
                    debug!("learned peer {:?} (was {:?})", from, *peer);
                    *peer = Some(from);
                }
                self.config.target_addr
            }
            Direction::Downstream => {
                match *self.peer.read().await {
                    Some(peer) => peer,
                    None => {
                        warn!("packet from {:?} before any client was seen - dropping it", from);
                        return Ok(ForwardOutcome::NoPeer);
                    }
                }
            }
        };

        let conditions = self.conditions.read().await.for_direction(direction);

        match ForwardDecision::decide::<R>(&conditions) {
            ForwardDecision::Drop => {
                trace!("{:?}: dropping {:?} from {:?}", direction, packet, from);
                Ok(ForwardOutcome::Dropped)
            }
            ForwardDecision::Delay => {
                let delay = conditions.delay_time();
                trace!("{:?}: delaying {:?} from {:?} by {:?}", direction, packet, from, delay);

                let socket = self.socket.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Err(e) = socket.send_to(to, &packet).await {
                        warn!("delayed forward to {:?} failed: {}", to, e);
                    }
                });
                Ok(ForwardOutcome::Delayed)
            }
            ForwardDecision::Forward => {
                trace!("{:?}: forwarding {:?} from {:?} to {:?}", direction, packet, from, to);
                self.socket.send_to(to, &packet).await?;
                Ok(ForwardOutcome::Forwarded)
            }
        }
    }
}
