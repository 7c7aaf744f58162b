use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

use crate::messaging::wire::{MAX_SESSION_ID, MIN_SESSION_ID};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// where fragments are sent: the receiver, or a network simulator in front of it
    pub target_addr: SocketAddr,

    /// a message that was not acknowledged this long after its most recent transmission is
    ///  sent again (all of its fragments)
    pub ack_timeout: Duration,

    /// interval between two scans of the pending table
    pub retry_interval: Duration,

    /// upper bound for the number of messages in flight at the same time. It can not exceed
    ///  the size of the session id space.
    pub max_pending: usize,
}

impl SenderConfig {
    pub fn new(target_addr: SocketAddr) -> SenderConfig {
        SenderConfig {
            target_addr,
            ack_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_millis(10),
            max_pending: (MAX_SESSION_ID - MIN_SESSION_ID + 1) as usize,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_interval.is_zero() {
            bail!("retry interval must be positive");
        }
        if self.max_pending == 0 || self.max_pending > (MAX_SESSION_ID - MIN_SESSION_ID + 1) as usize {
            bail!("max pending must be between 1 and the number of available session ids");
        }
        Ok(())
    }
}
