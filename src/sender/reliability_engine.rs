use std::marker::PhantomData;
use std::sync::Arc;
use anyhow::bail;
use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::messaging::transport::DatagramSocket;
use crate::messaging::wire::{fragment_message, parse_slots, validate_message_len, Ack, SessionId, MAX_DATAGRAM_SIZE, MAX_SESSION_ID, MIN_SESSION_ID};
use crate::metrics::MetricsSink;
use crate::sender::pending::{PendingAction, PendingEntry};
use crate::sender::sender_config::SenderConfig;
use crate::util::random::{Random, RngRandom};


/// A message whose fragments are due for transmission, collected while holding the lock on
///  the pending table and sent after releasing it
struct Transmission {
    session: SessionId,
    message: Vec<char>,
    is_retransmission: bool,
}

/// The sender side of the protocol. It owns the table of messages that were accepted but not
///  acknowledged yet, and it runs two activities on that table concurrently:
///
/// * the acknowledgment listener retires entries when the receiver echoes a complete buffer
/// * the retransmission driver sends new entries, re-sends timed out entries (always the
///    whole message) and gives up on entries that ran out of retries
///
/// All access to the table - from these two tasks and from [ReliabilityEngine::submit] - goes
///  through a single lock, and every read-modify-write happens under one write lock.
pub struct ReliabilityEngine<R: Random = RngRandom> {
    config: Arc<SenderConfig>,
    socket: Arc<dyn DatagramSocket>,
    metrics: Arc<dyn MetricsSink>,
    pending: RwLock<FxHashMap<SessionId, PendingEntry>>,
    _random: PhantomData<fn() -> R>,
}

impl <R: Random> ReliabilityEngine<R> {
    pub fn new(config: Arc<SenderConfig>, socket: Arc<dyn DatagramSocket>, metrics: Arc<dyn MetricsSink>) -> anyhow::Result<ReliabilityEngine<R>> {
        config.validate()?;

        Ok(ReliabilityEngine {
            config,
            socket,
            metrics,
            pending: Default::default(),
            _random: PhantomData,
        })
    }

    /// Accepts a message for delivery, returning the session id it was assigned. The message
    ///  is sent by the retransmission driver on its next scan.
    pub async fn submit(&self, message: &str) -> anyhow::Result<SessionId> {
        let message = validate_message_len(message)?;

        let mut pending = self.pending.write().await;
        if pending.len() >= self.config.max_pending {
            bail!("{} messages are in flight already - try again later", pending.len());
        }

        let session = loop {
            let candidate = R::gen_u32_range(MIN_SESSION_ID..=MAX_SESSION_ID);
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };

        debug!("accepted message {:?} as session {}", message.iter().collect::<String>(), session);
        pending.insert(session, PendingEntry::new(message, Instant::now()));
        Ok(session)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_pending(&self, session: SessionId) -> bool {
        self.pending.read().await.contains_key(&session)
    }

    /// Runs the acknowledgment listener and the retransmission driver as separate tasks until
    ///  `cancel` is triggered. A transport failure in either task cancels the token, taking
    ///  down everything else that shares it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("starting reliability engine, sending to {:?}", self.config.target_addr);

        let ack_listener = tokio::spawn(self.clone().ack_listener_loop(cancel.clone()));
        let retransmission_driver = tokio::spawn(self.clone().retransmission_loop(cancel.clone()));

        for handle in [ack_listener, retransmission_driver] {
            if let Err(e) = handle.await {
                error!("sender task terminated abnormally: {}", e);
                cancel.cancel();
            }
        }
        info!("reliability engine stopped with {} messages pending", self.pending_count().await);
    }

    async fn ack_listener_loop(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.listen_for_acks(&cancel).await {
            error!("acknowledgment listener failed, shutting down: {}", e);
            cancel.cancel();
        }
    }

    async fn listen_for_acks(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            select! {
                _ = cancel.cancelled() => return Ok(()),
                recv_result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = recv_result?;
                    if from != self.config.target_addr {
                        trace!("ignoring datagram from {:?} which is not the target", from);
                        continue;
                    }
                    trace!("received acknowledgment from {:?}: {:?}", from, String::from_utf8_lossy(&buf[..len]));
                    self.on_ack(&buf[..len]).await?;
                }
            }
        }
    }

    /// Handles a single acknowledgment datagram. Acknowledgments for unknown sessions (typically
    ///  ones that were acknowledged already) and incomplete buffer snapshots are ignored.
    ///
    /// Returns `Err` only if the datagram's framing is broken.
    pub async fn on_ack(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.metrics.record_packet_received();

        let (session, slots) = Ack::try_split_frame(buf)?;

        let mut pending = self.pending.write().await;
        let Some(entry) = pending.get(&session) else {
            trace!("acknowledgment for session {} which is not pending - ignoring", session);
            return Ok(());
        };

        let slots = match parse_slots(slots) {
            Ok(slots) => slots,
            Err(e) => {
                debug!("acknowledgment for session {} with unparsable slots - ignoring: {}", session, e);
                return Ok(());
            }
        };

        if entry.is_acknowledged_by(&slots) {
            let latency = entry.latency(Instant::now());
            let message = entry.message().iter().collect::<String>();
            pending.remove(&session);

            self.metrics.record_message_received();
            self.metrics.record_message_latency(latency);
            info!("message acknowledged: {}: {:?} after {:?}", session, message, latency);
        }
        Ok(())
    }

    async fn retransmission_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.retransmission_pass().await {
                error!("retransmission driver failed, shutting down: {}", e);
                cancel.cancel();
                return;
            }

            select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.retry_interval) => {}
            }
        }
    }

    /// A single scan of the pending table: sends what is due and retires what ran out of retries
    pub async fn retransmission_pass(&self) -> anyhow::Result<()> {
        let now = Instant::now();
        let mut transmissions = Vec::new();

        {
            let mut pending = self.pending.write().await;
            pending.retain(|&session, entry| {
                match entry.next_action(now, self.config.ack_timeout) {
                    PendingAction::Wait => true,
                    PendingAction::SendInitial | PendingAction::Resend => {
                        let is_retransmission = entry.on_transmitted(now);
                        if !is_retransmission {
                            self.metrics.record_message_sent();
                        }
                        transmissions.push(Transmission {
                            session,
                            message: entry.message().to_vec(),
                            is_retransmission,
                        });
                        true
                    }
                    PendingAction::GiveUp => {
                        self.metrics.record_message_lost();
                        warn!("message lost: {}: {:?}", session, entry.message().iter().collect::<String>());
                        false
                    }
                }
            });
        }

        for transmission in transmissions {
            self.transmit(&transmission).await?;
        }
        Ok(())
    }

    async fn transmit(&self, transmission: &Transmission) -> anyhow::Result<()> {
        if transmission.is_retransmission {
            debug!("resending session {}", transmission.session);
        }

        for fragment in fragment_message(transmission.session, &transmission.message) {
            if transmission.is_retransmission {
                self.metrics.record_packet_retransmitted();
            }
            self.metrics.record_packet_sent();
            self.socket.send_to(self.config.target_addr, fragment.ser().as_bytes()).await?;
        }
        Ok(())
    }
}
