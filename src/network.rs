//! transports the RTPS engine sends through and listens on

pub mod net_util;
pub mod transport;
pub mod udp_listening_socket;
pub mod udp_transport;

pub use transport::Transport;
pub use udp_transport::UdpTransport;
