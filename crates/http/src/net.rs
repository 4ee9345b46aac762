//! Listener socket construction.
//!
//! Listeners are built through `socket2` so the runtime controls
//! `SO_REUSEADDR`/`SO_REUSEPORT` and the backlog before handing the socket
//! to mio. In reuseport mode every worker binds its own listener on the
//! same address and the kernel hashes incoming SYNs across them.

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Binds a non-blocking TCP listener.
pub fn bind_listener(addr: SocketAddr, backlog: u32, reuseport: bool) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if reuseport {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_listener(addr, 128, false).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn reuseport_allows_second_listener_on_same_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let first = bind_listener(addr, 128, true).unwrap();
        let bound = first.local_addr().unwrap();

        let second = bind_listener(bound, 128, true).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), bound.port());
    }
}
