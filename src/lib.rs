//! Reliable message delivery over an unreliable datagram transport, and a network simulator
//!  to put that to the test.
//!
//! * [sender::reliability_engine::ReliabilityEngine] fragments messages into one datagram per
//!    character, re-sends them until the receiver confirms the complete message, and gives up
//!    after a fixed number of attempts
//! * [receiver::reassembly_engine::ReassemblyEngine] places fragments by index in whatever
//!    order they arrive and acknowledges each one with a snapshot of its buffer
//! * [simulator::network_simulator::NetworkSimulator] sits between the two and drops or delays
//!    packets per direction, based on parameters that can be changed while it is running
//!
//! Runnable front ends for all three are in the crate's `demos/` directory.

pub mod console;
pub mod messaging;
pub mod metrics;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod test_util;
pub mod util;
