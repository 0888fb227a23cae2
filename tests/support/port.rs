use std::net::{Ipv4Addr, TcpListener};

/// A loopback port nothing is listening on once this returns.
pub fn free_port() -> std::io::Result<u16> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?
        .local_addr()
        .map(|addr| addr.port())
}
