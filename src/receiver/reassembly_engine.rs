use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::bail;
use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::messaging::transport::DatagramSocket;
use crate::messaging::wire::{Ack, Fragment, SessionId, MAX_DATAGRAM_SIZE, MAX_MESSAGE_LEN};


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeliveredMessage {
    pub session: SessionId,
    pub text: String,
    pub from: SocketAddr,
}

/// Receive buffer for a single session. Its size is fixed by the first fragment seen for the
///  session, and it is never removed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReassemblyEntry {
    slots: Vec<Option<char>>,
}
impl ReassemblyEntry {
    fn new(expected_length: usize) -> ReassemblyEntry {
        ReassemblyEntry {
            slots: vec![None; expected_length],
        }
    }

    pub fn expected_length(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Option<char>] {
        &self.slots
    }

    /// Writes a character to its slot, overwriting whatever was there. Returns `false` if the
    ///  index is outside the buffer.
    fn place(&mut self, index: usize, payload: char) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(payload);
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn assembled(&self) -> String {
        self.slots.iter().flatten().collect()
    }
}


/// The receiver side of the protocol: places incoming fragments by their explicit index (so
///  duplicates and reordering are harmless), answers every placed fragment with a snapshot of
///  the session's buffer, and delivers the message when the buffer is full.
///
/// NB: Delivery is not deduplicated - a fragment arriving for a session that is complete
///  already delivers the message again.
pub struct ReassemblyEngine {
    socket: Arc<dyn DatagramSocket>,
    entries: FxHashMap<SessionId, ReassemblyEntry>,
    delivery: Option<mpsc::UnboundedSender<DeliveredMessage>>,
}

impl ReassemblyEngine {
    pub fn new(socket: Arc<dyn DatagramSocket>) -> ReassemblyEngine {
        ReassemblyEngine {
            socket,
            entries: Default::default(),
            delivery: None,
        }
    }

    /// delivered messages are logged, and additionally sent to this channel
    pub fn with_delivery_channel(mut self, delivery: mpsc::UnboundedSender<DeliveredMessage>) -> ReassemblyEngine {
        self.delivery = Some(delivery);
        self
    }

    pub fn entry(&self, session: SessionId) -> Option<&ReassemblyEntry> {
        self.entries.get(&session)
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("starting reassembly engine on {:?}", self.socket.local_addr()?);

        let result = self.receive_loop(&cancel).await;
        if let Err(e) = &result {
            error!("receiving failed, shutting down: {}", e);
            cancel.cancel();
        }
        result
    }

    async fn receive_loop(&mut self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            select! {
                _ = cancel.cancelled() => return Ok(()),
                recv_result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = recv_result?;
                    self.handle_inbound(&buf[..len], from).await?;
                }
            }
        }
    }

    /// Processes a single datagram, returning the reassembled message if the buffer is complete
    ///  after placing this fragment. Invalid packets are discarded - `Err` means that sending the
    ///  acknowledgment failed.
    pub async fn handle_inbound(&mut self, packet: &[u8], from: SocketAddr) -> anyhow::Result<Option<String>> {
        trace!("received packet from {:?}: {:?}", from, String::from_utf8_lossy(packet));

        let fragment = match self.validate(packet) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!("discarded invalid packet from {:?}: {}", from, e);
                return Ok(None);
            }
        };

        let entry = self.entries.entry(fragment.session)
            .or_insert_with(|| ReassemblyEntry::new(fragment.total_length as usize));
        if !entry.place(fragment.index as usize, fragment.payload) {
            // validated against the entry's length before
            return Ok(None);
        }

        let ack = Ack {
            session: fragment.session,
            slots: entry.slots().to_vec(),
        };
        let delivered = if entry.is_complete() {
            Some(entry.assembled())
        }
        else {
            None
        };

        self.socket.send_to(from, ack.ser().as_bytes()).await?;

        if let Some(text) = &delivered {
            info!("received message: {}", text);
            if let Some(delivery) = &self.delivery {
                if delivery.send(DeliveredMessage { session: fragment.session, text: text.clone(), from }).is_err() {
                    debug!("delivery channel is closed");
                }
            }
        }
        Ok(delivered)
    }

    fn validate(&self, packet: &[u8]) -> anyhow::Result<Fragment> {
        let fragment = Fragment::try_deser(packet)?;

        if fragment.total_length == 0 || fragment.total_length as usize > MAX_MESSAGE_LEN {
            bail!("total length {} is outside of 1..={}", fragment.total_length, MAX_MESSAGE_LEN);
        }

        // NB: a session's length is fixed by the first fragment for it - a reused session id
        //      with a different length is checked against the stale entry
        let expected_length = self.entries.get(&fragment.session)
            .map(|e| e.expected_length())
            .unwrap_or(fragment.total_length as usize);
        if fragment.index as usize >= expected_length {
            bail!("index {} is out of range for session {} with length {}", fragment.index, fragment.session, expected_length);
        }
        Ok(fragment)
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::test_util::addr::test_addr_from_number;
    use crate::test_util::tracking_socket::TrackingSocket;
    use super::*;

    fn engine() -> (ReassemblyEngine, Arc<TrackingSocket>) {
        let socket = Arc::new(TrackingSocket::new(test_addr_from_number(1)));
        (ReassemblyEngine::new(socket.clone()), socket)
    }

    fn fragments_for(session: SessionId, message: &str) -> Vec<String> {
        let chars = message.chars().collect::<Vec<_>>();
        crate::messaging::wire::fragment_message(session, &chars)
            .iter()
            .map(Fragment::ser)
            .collect()
    }

    #[tokio::test]
    async fn test_in_order_delivery_with_acks() {
        let (mut engine, socket) = engine();
        let client = test_addr_from_number(5);

        assert_eq!(engine.handle_inbound(b"7:2:h:0", client).await.unwrap(), None);
        assert_eq!(engine.handle_inbound(b"7:2:i:1", client).await.unwrap(), Some("hi".to_string()));

        assert_eq!(socket.sent_packets().await, vec![
            (client, "7:['h', None]".to_string()),
            (client, "7:['h', 'i']".to_string()),
        ]);
    }

    #[rstest]
    #[case::reversed(vec![4, 3, 2, 1, 0])]
    #[case::shuffled(vec![2, 0, 4, 1, 3])]
    #[case::with_duplicates(vec![1, 1, 0, 3, 0, 2, 4])]
    #[tokio::test]
    async fn test_any_arrival_order_delivers_once(#[case] order: Vec<usize>) {
        let (mut engine, socket) = engine();
        let fragments = fragments_for(42, "hello");

        let mut delivered = Vec::new();
        for i in order.iter() {
            if let Some(text) = engine.handle_inbound(fragments[*i].as_bytes(), test_addr_from_number(5)).await.unwrap() {
                delivered.push(text);
            }
        }
        assert_eq!(delivered, vec!["hello".to_string()]);
        assert_eq!(socket.sent_packets().await.len(), order.len());
        assert!(engine.entry(42).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_duplicate_is_idempotent() {
        let (mut engine, socket) = engine();
        let client = test_addr_from_number(5);

        engine.handle_inbound(b"3:3:a:1", client).await.unwrap();
        let before = engine.entry(3).unwrap().clone();
        engine.handle_inbound(b"3:3:a:1", client).await.unwrap();
        assert_eq!(engine.entry(3).unwrap(), &before);

        let acks = socket.sent_packets().await;
        assert_eq!(acks[0], acks[1]);
    }

    #[tokio::test]
    async fn test_complete_session_redelivers_on_later_fragment() {
        let (mut engine, _) = engine();
        let client = test_addr_from_number(5);

        assert_eq!(engine.handle_inbound(b"9:1:x:0", client).await.unwrap(), Some("x".to_string()));
        assert_eq!(engine.handle_inbound(b"9:1:x:0", client).await.unwrap(), Some("x".to_string()));
    }

    #[rstest]
    #[case::too_few_fields(b"1:2:a")]
    #[case::non_numeric(b"a:2:a:0")]
    #[case::index_out_of_range(b"1:2:a:2")]
    #[case::zero_length(b"1:0:a:0")]
    #[case::length_above_max(b"1:21:a:0")]
    #[case::garbage(b"\xff\xfe")]
    #[tokio::test]
    async fn test_invalid_packets_are_discarded(#[case] packet: &[u8]) {
        let (mut engine, socket) = engine();
        assert_eq!(engine.handle_inbound(packet, test_addr_from_number(5)).await.unwrap(), None);
        assert_eq!(socket.num_sent().await, 0);
        assert!(engine.entry(1).is_none());
    }

    #[tokio::test]
    async fn test_first_fragment_fixes_session_length() {
        let (mut engine, socket) = engine();
        let client = test_addr_from_number(5);

        engine.handle_inbound(b"4:2:a:0", client).await.unwrap();
        // same session, claims a bigger message: checked against the stale length
        assert_eq!(engine.handle_inbound(b"4:5:b:3", client).await.unwrap(), None);
        assert_eq!(engine.entry(4).unwrap().expected_length(), 2);

        // in range for the stale entry: placed, even though the declared length differs
        assert_eq!(engine.handle_inbound(b"4:5:b:1", client).await.unwrap(), Some("ab".to_string()));
        assert_eq!(socket.sent_packets().await.len(), 2);
    }

    #[tokio::test]
    async fn test_ack_goes_to_source_address() {
        let (mut engine, socket) = engine();
        engine.handle_inbound(b"1:1:a:0", test_addr_from_number(8)).await.unwrap();
        engine.handle_inbound(b"2:1:b:0", test_addr_from_number(9)).await.unwrap();

        let sent = socket.sent_packets().await;
        assert_eq!(sent[0].0, test_addr_from_number(8));
        assert_eq!(sent[1].0, test_addr_from_number(9));
    }

    #[tokio::test]
    async fn test_run_delivers_to_channel_until_cancelled() {
        let socket = Arc::new(TrackingSocket::new(test_addr_from_number(1)));
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let engine = ReassemblyEngine::new(socket.clone()).with_delivery_channel(sender);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        socket.inject(b"11:2:o:0", test_addr_from_number(5));
        socket.inject(b"not a fragment", test_addr_from_number(5));
        socket.inject(b"11:2:k:1", test_addr_from_number(5));

        let delivered = receiver.recv().await.unwrap();
        assert_eq!(delivered, DeliveredMessage { session: 11, text: "ok".to_string(), from: test_addr_from_number(5) });

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_cancels_on_transport_failure() {
        let (engine, socket) = engine();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        socket.inject_receive_failure();

        cancel.cancelled().await;
        assert!(handle.await.unwrap().is_err());
    }
}
