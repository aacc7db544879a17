use crate::message::submessage::element::Locator;
use crate::network::{net_util, Transport};
use log::{error, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::UdpSocket;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

/// Transport over UDPv4 with one unicast socket and a multicast socket per interface
pub struct UdpTransport {
    unicast_socket: UdpSocket,
    multicast_sockets: Vec<UdpSocket>,
}

impl UdpTransport {
    pub fn new(sender_port: u16) -> io::Result<Self> {
        // if 0.0.0.0 is binded to sender socket, source IP is decided automatic
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), sender_port);
        let unicast_socket = UdpSocket::bind(addr)?;
        unicast_socket.set_multicast_loop_v4(true)?;

        let local_interfaces = net_util::get_local_interfaces();
        let mut multicast_sockets: Vec<UdpSocket> = Vec::new();
        // multicast datagrams go out on every interface because the interfaces
        // leading to the joined nodes are unknown
        for li in local_interfaces {
            let a = match li {
                IpAddr::V4(a) => a,
                IpAddr::V6(_) => continue,
            };
            let raw_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            raw_socket.set_multicast_if_v4(&a)?;
            raw_socket.bind(&SockAddr::from(SocketAddr::new(li, 0)))?;
            let mc_socket = UdpSocket::from(raw_socket);
            mc_socket.set_multicast_loop_v4(true)?;
            multicast_sockets.push(mc_socket);
        }
        Ok(Self {
            unicast_socket,
            multicast_sockets,
        })
    }

    pub fn send_to_unicast(&self, data: &[u8], addr: SocketAddr) -> bool {
        match self.unicast_socket.send_to(data, addr) {
            Ok(_) => true,
            Err(e) => {
                error!("failed send data to {} because '{:?}'", addr, e);
                false
            }
        }
    }

    pub fn send_to_multicast(&self, data: &[u8], multicast_group: SocketAddr) -> bool {
        if self.multicast_sockets.is_empty() {
            return self.send_to_unicast(data, multicast_group);
        }
        let mut sent = false;
        for msocket in &self.multicast_sockets {
            match msocket.send_to(data, multicast_group) {
                Ok(_) => sent = true,
                Err(e) => error!(
                    "failed send data to {} because '{:?}'",
                    multicast_group, e
                ),
            }
        }
        sent
    }
}

impl Transport for UdpTransport {
    fn send(
        &self,
        data: &[u8],
        locator: &Locator,
        max_blocking_time_point: Option<Instant>,
    ) -> bool {
        if let Some(deadline) = max_blocking_time_point {
            if Instant::now() > deadline {
                warn!("UdpTransport drops datagram to {}: deadline expired", locator);
                return false;
            }
        }
        match locator.to_socket_addr() {
            Some(addr) if addr.ip().is_multicast() => self.send_to_multicast(data, addr),
            Some(addr) => self.send_to_unicast(data, addr),
            None => {
                warn!("UdpTransport can't send to {:?}", locator);
                false
            }
        }
    }
}
