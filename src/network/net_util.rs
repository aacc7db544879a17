use if_addrs::get_if_addrs;
use log::warn;
use std::net::IpAddr;

// rtps 2.3 spec 9.6.1.1 Default Port Numbers
const PB: u16 = 7400;
const DG: u16 = 250;
const PG: u16 = 2;
const D2: u16 = 1;
const D3: u16 = 11;

pub fn usertraffic_multicast_port(domain_id: u16) -> u16 {
    PB + DG * domain_id + D2
}

pub fn usertraffic_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
    PB + DG * domain_id + D3 + PG * participant_id
}

/// non-loopback addresses of the local interfaces, empty when they can't be listed
pub fn get_local_interfaces() -> Vec<IpAddr> {
    match get_if_addrs() {
        Ok(local_interface) => local_interface
            .iter()
            .filter(|s| !s.is_loopback())
            .map(|s| s.ip())
            .collect(),
        Err(e) => {
            warn!("couldn't list local interfaces: {:?}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_user_ports() {
        assert_eq!(usertraffic_multicast_port(0), 7401);
        assert_eq!(usertraffic_unicast_port(0, 0), 7411);
        assert_eq!(usertraffic_unicast_port(1, 2), 7665);
    }
}
