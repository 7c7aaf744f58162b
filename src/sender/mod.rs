pub mod pending;
pub mod reliability_engine;
pub mod sender_config;
