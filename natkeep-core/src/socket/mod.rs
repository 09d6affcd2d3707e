use anyhow::Context;
use socket2::Protocol;
use std::net::SocketAddr;

pub(crate) fn bind_udp_ops(addr: SocketAddr, only_v6: bool) -> anyhow::Result<socket2::Socket> {
    let socket = if addr.is_ipv4() {
        socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?
    } else {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV6,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket
            .set_only_v6(only_v6)
            .with_context(|| format!("set_only_v6 failed: {}", &addr))?;
        socket
    };
    // the listening TCP side of an application usually holds the same port
    socket
        .set_reuse_address(true)
        .with_context(|| format!("set_reuse_address failed: {}", &addr))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Bind a non-blocking UDP socket and hand it to the tokio reactor.
///
/// Must be called from within a tokio runtime.
pub fn bind_udp(addr: SocketAddr) -> anyhow::Result<tokio::net::UdpSocket> {
    let socket = bind_udp_ops(addr, true).with_context(|| format!("bind_udp {}", addr))?;
    let socket: std::net::UdpSocket = socket.into();
    Ok(tokio::net::UdpSocket::from_std(socket)?)
}
