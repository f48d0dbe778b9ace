//! Socket helpers

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

/// A connected pair of loopback TCP sockets, returned as `(server, client)`.
///
/// Both ends are non-blocking with Nagle disabled.
pub fn socket_pair() -> io::Result<(Socket, Socket)> {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    listener.set_reuse_address(true)?;
    listener.bind(&SockAddr::from(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))))?;
    listener.listen(1)?;
    let addr = listener.local_addr()?;

    let client = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    client.connect(&addr)?;
    let (server, _) = listener.accept()?;

    for socket in [&server, &client] {
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
    }
    Ok((server, client))
}
