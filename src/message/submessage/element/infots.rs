use crate::error::IoResult;
use crate::message::submessage::{element::*, submessage_flag::InfoTimestampFlag};
use bytes::Bytes;
use enumflags2::BitFlags;
use speedy::{Endianness, Readable};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InfoTimestamp {
    /// None when the Invalidate flag is set
    pub timestamp: Option<Timestamp>,
}

impl InfoTimestamp {
    pub fn deserialize(buffer: &Bytes, flags: BitFlags<InfoTimestampFlag>) -> IoResult<Self> {
        if flags.contains(InfoTimestampFlag::Invalidate) {
            return Ok(Self { timestamp: None });
        }
        let endiannes = if flags.contains(InfoTimestampFlag::Endianness) {
            Endianness::LittleEndian
        } else {
            Endianness::BigEndian
        };
        let timestamp = Timestamp::read_from_buffer_with_ctx(endiannes, buffer)?;
        Ok(Self {
            timestamp: Some(timestamp),
        })
    }
}
