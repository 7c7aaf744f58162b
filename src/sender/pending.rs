use std::time::Duration;
use tokio::time::Instant;

/// Number of transmissions a message gets before it is given up: one initial send plus nine
///  retransmissions
pub const INITIAL_RETRIES: u32 = 10;

/// What the retransmission driver has to do with a pending message on its current scan
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PendingAction {
    /// never sent so far
    SendInitial,
    /// sent before, and the most recent transmission timed out
    Resend,
    /// sent before, still waiting for an acknowledgment
    Wait,
    /// no retries left - the message is lost
    GiveUp,
}

/// Sender side state for a single message that was accepted but not acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    retries_remaining: u32,
    message: Vec<char>,
    last_attempt: Instant,
    first_attempt: Instant,
}

impl PendingEntry {
    pub fn new(message: Vec<char>, now: Instant) -> PendingEntry {
        PendingEntry {
            retries_remaining: INITIAL_RETRIES,
            message,
            last_attempt: now,
            first_attempt: now,
        }
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    pub fn message(&self) -> &[char] {
        &self.message
    }

    pub fn next_action(&self, now: Instant, ack_timeout: Duration) -> PendingAction {
        match self.retries_remaining {
            0 => PendingAction::GiveUp,
            INITIAL_RETRIES => PendingAction::SendInitial,
            _ => {
                if now.saturating_duration_since(self.last_attempt) > ack_timeout {
                    PendingAction::Resend
                }
                else {
                    PendingAction::Wait
                }
            }
        }
    }

    /// Records that all fragments are (about to be) sent. Returns `true` if this is a
    ///  retransmission.
    ///
    /// NB: Latency is measured from the first transmission, so `first_attempt` is only reset
    ///  for the initial send
    pub fn on_transmitted(&mut self, now: Instant) -> bool {
        let is_retransmission = self.retries_remaining != INITIAL_RETRIES;
        if !is_retransmission {
            self.first_attempt = now;
        }
        self.last_attempt = now;
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        is_retransmission
    }

    /// The receiver echoes its complete reassembly buffer, so the message counts as delivered
    ///  only if that buffer is the message, in order and without gaps.
    pub fn is_acknowledged_by(&self, slots: &[Option<char>]) -> bool {
        slots.len() == self.message.len()
            && slots.iter()
                .zip(&self.message)
                .all(|(slot, c)| *slot == Some(*c))
    }

    pub fn latency(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_attempt)
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::time;
    use super::*;

    fn entry(message: &str) -> PendingEntry {
        PendingEntry::new(message.chars().collect(), Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_sequence_until_give_up() {
        let timeout = Duration::from_secs(2);
        let mut entry = entry("hi");

        assert_eq!(entry.next_action(Instant::now(), timeout), PendingAction::SendInitial);
        assert!(!entry.on_transmitted(Instant::now()));

        for expected_remaining in (0..INITIAL_RETRIES - 1).rev() {
            assert_eq!(entry.next_action(Instant::now(), timeout), PendingAction::Wait);
            time::advance(timeout).await;
            // 'exceeds' the timeout - exactly the timeout is not enough
            assert_eq!(entry.next_action(Instant::now(), timeout), PendingAction::Wait);
            time::advance(Duration::from_millis(1)).await;
            assert_eq!(entry.next_action(Instant::now(), timeout), PendingAction::Resend);

            assert!(entry.on_transmitted(Instant::now()));
            assert_eq!(entry.retries_remaining(), expected_remaining);
        }

        assert_eq!(entry.next_action(Instant::now(), timeout), PendingAction::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_from_first_attempt() {
        let mut entry = entry("x");
        time::advance(Duration::from_millis(50)).await;
        entry.on_transmitted(Instant::now());

        time::advance(Duration::from_millis(100)).await;
        entry.on_transmitted(Instant::now());

        time::advance(Duration::from_millis(7)).await;
        assert_eq!(entry.latency(Instant::now()), Duration::from_millis(107));
    }

    #[rstest]
    #[case::complete(vec![Some('h'), Some('i')], true)]
    #[case::gap(vec![Some('h'), None], false)]
    #[case::wrong_order(vec![Some('i'), Some('h')], false)]
    #[case::too_short(vec![Some('h')], false)]
    #[case::too_long(vec![Some('h'), Some('i'), Some('!')], false)]
    #[case::empty(vec![], false)]
    fn test_is_acknowledged_by(#[case] slots: Vec<Option<char>>, #[case] expected: bool) {
        assert_eq!(entry("hi").is_acknowledged_by(&slots), expected);
    }
}
