//! Line based operator input for the sender and the simulator. Input is any `AsyncBufRead`
//!  (stdin in the front ends), and both loops end on end of input or when the cancellation
//!  token is triggered, whichever comes first.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::select;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sender::reliability_engine::ReliabilityEngine;
use crate::simulator::link_conditions::LinkConditions;
use crate::util::random::Random;


/// Submits every input line as a message. Rejected messages are reported, and the loop goes on.
pub async fn run_sender_console<R: Random>(engine: &ReliabilityEngine<R>, input: impl AsyncBufRead + Unpin, cancel: &CancellationToken) -> anyhow::Result<()> {
    info!("enter messages of 1 to 20 characters, one per line");

    let mut lines = input.lines();
    loop {
        let line = select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("end of input");
            return Ok(());
        };

        match engine.submit(&line).await {
            Ok(session) => debug!("submitted {:?} as session {}", line, session),
            Err(e) => warn!("message rejected: {}", e),
        }
    }
}

/// Applies every input line as a `key: value, ...` update to the live link conditions. Parse
///  errors are reported, and the loop goes on.
pub async fn run_simulator_console(conditions: &RwLock<LinkConditions>, input: impl AsyncBufRead + Unpin, cancel: &CancellationToken) -> anyhow::Result<()> {
    info!("enter parameter updates as 'key: value, ...' - keys are c_drop_chance, c_delay_chance, c_delay_time, s_drop_chance, s_delay_chance, s_delay_time");

    let mut lines = input.lines();
    loop {
        let line = select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("end of input");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        if let Err(e) = LinkConditions::apply_update(conditions, &line).await {
            warn!("invalid parameter update, earlier fields of the line remain applied: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use crate::metrics::StatsCollector;
    use crate::sender::sender_config::SenderConfig;
    use crate::simulator::link_conditions::DirectionConditions;
    use crate::test_util::addr::test_addr_from_number;
    use crate::test_util::tracking_socket::TrackingSocket;
    use crate::util::random::RngRandom;
    use super::*;

    fn engine() -> ReliabilityEngine<RngRandom> {
        let config = Arc::new(SenderConfig::new(test_addr_from_number(2)));
        let socket = Arc::new(TrackingSocket::new(test_addr_from_number(1)));
        ReliabilityEngine::new(config, socket, Arc::new(StatsCollector::new())).unwrap()
    }

    #[tokio::test]
    async fn test_sender_console_submits_valid_lines() {
        let engine = engine();
        let input: &[u8] = b"hi\n\nthis line is way too long for a message\nabc\n";

        run_sender_console(&engine, input, &CancellationToken::new()).await.unwrap();
        assert_eq!(engine.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_sender_console_stops_when_cancelled() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (_keep_open, input) = tokio::io::duplex(64);
        run_sender_console(&engine, tokio::io::BufReader::new(input), &cancel).await.unwrap();
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_simulator_console_applies_updates() {
        let conditions = RwLock::new(LinkConditions::default());
        let input: &[u8] = b"c_drop_chance: 150\ns_delay_chance: 5, s_delay_time: x, s_drop_chance: 7\n\nc_delay_time: 12.5\n";

        run_simulator_console(&conditions, input, &CancellationToken::new()).await.unwrap();
        assert_eq!(*conditions.read().await, LinkConditions {
            client: DirectionConditions::new(100, 0, 12.5),
            server: DirectionConditions::new(0, 5, 0.0),
        });
    }

    #[tokio::test]
    async fn test_simulator_console_stops_when_cancelled() {
        let conditions = RwLock::new(LinkConditions::default());
        let cancel = CancellationToken::new();

        let (_keep_open, input) = tokio::io::duplex(64);
        let console = run_simulator_console(&conditions, tokio::io::BufReader::new(input), &cancel);
        cancel.cancel();
        console.await.unwrap();
    }
}
