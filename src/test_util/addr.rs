use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// convenience method for unit test code: create a [SocketAddr] based on a number, the same
///  number generating the same address and different numbers different addresses
pub fn test_addr_from_number(number: u16) -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, number).into()
}
