use std::net::SocketAddr;
use anyhow::bail;

use crate::simulator::link_conditions::{DirectionConditions, LinkConditions, MAX_CHANCE, MAX_DELAY_TIME_MS};

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// the address clients send to - the simulator sits in place of the receiver
    pub listen_addr: SocketAddr,

    /// the receiver. Packets from this address are server -> client traffic, packets from
    ///  anywhere else are client -> server traffic.
    pub target_addr: SocketAddr,

    /// drop / delay parameters at startup. They can be changed while running.
    pub initial_conditions: LinkConditions,
}

impl SimulatorConfig {
    pub fn new(listen_addr: SocketAddr, target_addr: SocketAddr) -> SimulatorConfig {
        SimulatorConfig {
            listen_addr,
            target_addr,
            initial_conditions: Default::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr == self.target_addr {
            bail!("listen address and target address must be different, were both {:?}", self.listen_addr);
        }
        Self::validate_direction("client", &self.initial_conditions.client)?;
        Self::validate_direction("server", &self.initial_conditions.server)?;
        Ok(())
    }

    fn validate_direction(name: &str, conditions: &DirectionConditions) -> anyhow::Result<()> {
        if conditions.drop_chance > MAX_CHANCE || conditions.delay_chance > MAX_CHANCE {
            bail!("{} drop and delay chance must be percentages, were {} and {}", name, conditions.drop_chance, conditions.delay_chance);
        }
        if !(0.0..=MAX_DELAY_TIME_MS).contains(&conditions.delay_time_ms) {
            bail!("{} delay time must be between 0 and {} ms, was {}", name, MAX_DELAY_TIME_MS, conditions.delay_time_ms);
        }
        Ok(())
    }
}
