use crate::error::IoResult;
use crate::message::submessage::{
    element::*,
    submessage_flag::{InfoReplyFlag, InfoReplyIp4Flag},
};
use bytes::Bytes;
use enumflags2::BitFlags;
use speedy::{Endianness, Readable};

#[derive(Clone, Debug, PartialEq)]
pub struct InfoReply {
    pub unicast_locator_list: Vec<Locator>,
    pub multicast_locator_list: Option<Vec<Locator>>,
}

fn read_locator_list(
    endianness: Endianness,
    buffer: &Bytes,
    readed_byte: &mut usize,
) -> IoResult<Vec<Locator>> {
    let (num_locators, len) = read_element::<u32>(endianness, buffer, *readed_byte)?;
    *readed_byte += len;
    // every Locator takes 24 octets
    let mut locators = Vec::with_capacity(core::cmp::min(num_locators as usize, buffer.len() / 24));
    for _ in 0..num_locators {
        let (locator, len) = read_element::<Locator>(endianness, buffer, *readed_byte)?;
        *readed_byte += len;
        locators.push(locator);
    }
    Ok(locators)
}

impl InfoReply {
    pub fn deserialize(buffer: &Bytes, flags: BitFlags<InfoReplyFlag>) -> IoResult<Self> {
        let endiannes = if flags.contains(InfoReplyFlag::Endianness) {
            Endianness::LittleEndian
        } else {
            Endianness::BigEndian
        };
        let mut readed_byte = 0;
        let unicast_locator_list = read_locator_list(endiannes, buffer, &mut readed_byte)?;
        let multicast_locator_list = if flags.contains(InfoReplyFlag::Multicast) {
            Some(read_locator_list(endiannes, buffer, &mut readed_byte)?)
        } else {
            None
        };
        Ok(Self {
            unicast_locator_list,
            multicast_locator_list,
        })
    }
}

/// rtps 2.3 spec 9.4.5.13 InfoReplyIp4: a single UDPv4 locator per list
#[derive(Readable, Clone, Copy, Debug, PartialEq)]
pub struct LocatorUdpV4 {
    pub address: u32,
    pub port: u32,
}

impl From<LocatorUdpV4> for Locator {
    fn from(l: LocatorUdpV4) -> Self {
        Locator::new_from_ipv4(l.port, l.address.to_be_bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InfoReplyIp4 {
    pub unicast_locator: LocatorUdpV4,
    pub multicast_locator: Option<LocatorUdpV4>,
}

impl InfoReplyIp4 {
    pub fn deserialize(buffer: &Bytes, flags: BitFlags<InfoReplyIp4Flag>) -> IoResult<Self> {
        let endiannes = if flags.contains(InfoReplyIp4Flag::Endianness) {
            Endianness::LittleEndian
        } else {
            Endianness::BigEndian
        };
        let (unicast_locator, len) = read_element::<LocatorUdpV4>(endiannes, buffer, 0)?;
        let multicast_locator = if flags.contains(InfoReplyIp4Flag::Multicast) {
            Some(read_element::<LocatorUdpV4>(endiannes, buffer, len)?.0)
        } else {
            None
        };
        Ok(Self {
            unicast_locator,
            multicast_locator,
        })
    }
}
