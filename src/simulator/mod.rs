pub mod link_conditions;
pub mod network_simulator;
pub mod simulator_config;
