pub mod reassembly_engine;
pub mod receiver_config;
