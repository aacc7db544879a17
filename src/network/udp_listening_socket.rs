use crate::network::net_util::get_local_interfaces;
use mio_v06::net::UdpSocket;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

fn new_listening_socket(addr: IpAddr, port: u16, reuse_addr: bool) -> io::Result<UdpSocket> {
    let raw_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    raw_socket.set_reuse_address(reuse_addr)?;
    raw_socket.bind(&SockAddr::from(SocketAddr::new(addr, port)))?;

    let udp_socket = std::net::UdpSocket::from(raw_socket);
    udp_socket.set_nonblocking(true)?;
    UdpSocket::from_socket(udp_socket)
}

/// port 0 lets the OS pick, the chosen one is in `local_addr()`
pub fn new_unicast(addr: IpAddr, port: u16) -> io::Result<UdpSocket> {
    new_listening_socket(addr, port, false)
}

pub fn new_multicast(addr: IpAddr, port: u16, multicast_group: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = new_listening_socket(addr, port, true)?;

    let local_interfaces = get_local_interfaces();
    for li in local_interfaces {
        match li {
            IpAddr::V4(a) => {
                socket.join_multicast_v4(&multicast_group, &a)?;
            }
            IpAddr::V6(_) => continue,
        }
    }
    Ok(socket)
}
