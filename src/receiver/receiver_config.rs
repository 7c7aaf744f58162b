use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen_addr: SocketAddr,
}

impl ReceiverConfig {
    pub fn new(listen_addr: SocketAddr) -> ReceiverConfig {
        ReceiverConfig {
            listen_addr,
        }
    }
}
