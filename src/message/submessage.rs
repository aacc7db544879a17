pub mod element;
pub mod submessage_flag;

use crate::error::{IoError, IoResult};
use crate::message::submessage::element::{
    acknack::AckNack,
    data::Data,
    datafrag::DataFrag,
    gap::Gap,
    heartbeat::Heartbeat,
    heartbeatfrag::HeartbeatFrag,
    infodst::InfoDestination,
    inforeply::{InfoReply, InfoReplyIp4},
    infosrc::InfoSource,
    infots::InfoTimestamp,
    nackfrag::NackFrag,
};
use crate::message::submessage::submessage_flag::*;
use alloc::fmt;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;
use enumflags2::BitFlags;
use speedy::{Endianness, Readable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMessageHeader {
    submessage_id: u8,
    flags: u8,
    submessage_length: u16, // Indicates the length of the Submessage. Given an RTPS Message
                            // consists of a concatenation of Submessages, the Submessage length
                            // can be used to skip to the next Submessage.
                            // (not including the Submessage header)
}

impl SubMessageHeader {
    pub const LEN: usize = 4;

    pub fn new(id: u8, flags: u8, length: u16) -> Self {
        Self {
            submessage_id: id,
            flags,
            submessage_length: length,
        }
    }

    /// the length field is encoded in the endianness bit 0 of `flags` selects
    pub fn deserialize(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < Self::LEN {
            return None;
        }
        let flags = buffer[1];
        let submessage_length = if flags & 0x01 == 0 {
            BigEndian::read_u16(&buffer[2..4])
        } else {
            LittleEndian::read_u16(&buffer[2..4])
        };
        Some(Self::new(buffer[0], flags, submessage_length))
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [self.submessage_id, self.flags, 0, 0];
        match self.get_endian() {
            Endianness::LittleEndian => {
                LittleEndian::write_u16(&mut bytes[2..4], self.submessage_length)
            }
            Endianness::BigEndian => BigEndian::write_u16(&mut bytes[2..4], self.submessage_length),
        }
        bytes
    }

    pub fn get_submessage_id(&self) -> u8 {
        self.submessage_id
    }

    pub fn get_content_len(&self) -> u16 {
        self.submessage_length
    }

    pub fn get_flags(&self) -> u8 {
        self.flags
    }

    pub fn get_endian(&self) -> Endianness {
        if (self.flags & 0x01) == 0 {
            Endianness::BigEndian
        } else {
            Endianness::LittleEndian
        }
    }

    pub fn get_submessagekind(&self) -> SubMessageKind {
        SubMessageKind::from(self.submessage_id)
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SubMessageKind {
    PAD = 0x01,
    ACKNACK = 0x06,
    HEARTBEAT = 0x07,
    GAP = 0x08,
    INFO_TS = 0x09,
    INFO_SRC = 0x0c,
    INFO_REPLY_IP4 = 0x0d,
    INFO_DST = 0x0e,
    INFO_REPLY = 0x0f,
    NACK_FRAG = 0x12,
    HEARTBEAT_FRAG = 0x13,
    DATA = 0x15,
    DATA_FRAG = 0x16,
    UNKNOWN_RTPS,
    VENDORSPECIFIC,
}

impl From<u8> for SubMessageKind {
    fn from(id: u8) -> Self {
        match id {
            0x01 => SubMessageKind::PAD,
            0x06 => SubMessageKind::ACKNACK,
            0x07 => SubMessageKind::HEARTBEAT,
            0x08 => SubMessageKind::GAP,
            0x09 => SubMessageKind::INFO_TS,
            0x0c => SubMessageKind::INFO_SRC,
            0x0d => SubMessageKind::INFO_REPLY_IP4,
            0x0e => SubMessageKind::INFO_DST,
            0x0f => SubMessageKind::INFO_REPLY,
            0x12 => SubMessageKind::NACK_FRAG,
            0x13 => SubMessageKind::HEARTBEAT_FRAG,
            0x15 => SubMessageKind::DATA,
            0x16 => SubMessageKind::DATA_FRAG,
            0x00..=0x7f => SubMessageKind::UNKNOWN_RTPS,
            0x80..=0xff => SubMessageKind::VENDORSPECIFIC,
        }
    }
}

impl fmt::Debug for SubMessageKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PAD => fmt.write_str("PAD"),
            Self::ACKNACK => fmt.write_str("ACKNACK"),
            Self::HEARTBEAT => fmt.write_str("HEARTBEAT"),
            Self::GAP => fmt.write_str("GAP"),
            Self::INFO_TS => fmt.write_str("INFO_TS"),
            Self::INFO_SRC => fmt.write_str("INFO_SRC"),
            Self::INFO_REPLY_IP4 => fmt.write_str("INFO_REPLY_IP4"),
            Self::INFO_DST => fmt.write_str("INFO_DST"),
            Self::INFO_REPLY => fmt.write_str("INFO_REPLY"),
            Self::NACK_FRAG => fmt.write_str("NACK_FRAG"),
            Self::HEARTBEAT_FRAG => fmt.write_str("HEARTBEAT_FRAG"),
            Self::DATA => fmt.write_str("DATA"),
            Self::DATA_FRAG => fmt.write_str("DATA_FRAG"),
            Self::UNKNOWN_RTPS => fmt.write_str("UNKNOWN_RTPS"),
            Self::VENDORSPECIFIC => fmt.write_str("VENDORSPECIFIC"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubMessage {
    pub header: SubMessageHeader,
    pub body: SubMessageBody,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubMessageBody {
    Entity(EntitySubmessage),
    Interpreter(InterpreterSubmessage),
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntitySubmessage {
    AckNack(AckNack, BitFlags<AckNackFlag>),
    Data(Data, BitFlags<DataFlag>),
    DataFrag(DataFrag, BitFlags<DataFragFlag>),
    Gap(Gap, BitFlags<GapFlag>),
    HeartBeat(Heartbeat, BitFlags<HeartbeatFlag>),
    HeartbeatFrag(HeartbeatFrag, BitFlags<HeartbeatFragFlag>),
    NackFrag(NackFrag, BitFlags<NackFragFlag>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InterpreterSubmessage {
    InfoSource(InfoSource, BitFlags<InfoSourceFlag>),
    InfoDestination(InfoDestination, BitFlags<InfoDestinationFlag>),
    InfoReply(InfoReply, BitFlags<InfoReplyFlag>),
    InfoReplyIp4(InfoReplyIp4, BitFlags<InfoReplyIp4Flag>),
    InfoTimestamp(InfoTimestamp, BitFlags<InfoTimestampFlag>),
}

impl SubMessage {
    /// Ok(None) for PAD and for submessage kinds this implementation does not understand
    pub fn deserialize(header: SubMessageHeader, body_buf: &Bytes) -> IoResult<Option<Self>> {
        let e = header.get_endian();
        let flags = header.get_flags();
        let body = match header.get_submessagekind() {
            // entity
            SubMessageKind::DATA => {
                let f = BitFlags::<DataFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::Data(
                    Data::deserialize_data(body_buf, f)?,
                    f,
                ))
            }
            SubMessageKind::DATA_FRAG => {
                let f = BitFlags::<DataFragFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::DataFrag(
                    DataFrag::deserialize(body_buf, f)?,
                    f,
                ))
            }
            SubMessageKind::HEARTBEAT => {
                let f = BitFlags::<HeartbeatFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::HeartBeat(
                    Heartbeat::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            SubMessageKind::HEARTBEAT_FRAG => {
                let f = BitFlags::<HeartbeatFragFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::HeartbeatFrag(
                    HeartbeatFrag::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            SubMessageKind::GAP => {
                let f = BitFlags::<GapFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::Gap(
                    Gap::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            SubMessageKind::ACKNACK => {
                let f = BitFlags::<AckNackFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::AckNack(
                    AckNack::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            SubMessageKind::NACK_FRAG => {
                let f = BitFlags::<NackFragFlag>::from_bits_truncate(flags);
                SubMessageBody::Entity(EntitySubmessage::NackFrag(
                    NackFrag::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            // interpreter
            SubMessageKind::INFO_SRC => {
                let f = BitFlags::<InfoSourceFlag>::from_bits_truncate(flags);
                SubMessageBody::Interpreter(InterpreterSubmessage::InfoSource(
                    InfoSource::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            SubMessageKind::INFO_DST => {
                let f = BitFlags::<InfoDestinationFlag>::from_bits_truncate(flags);
                SubMessageBody::Interpreter(InterpreterSubmessage::InfoDestination(
                    InfoDestination::read_from_buffer_with_ctx(e, body_buf)?,
                    f,
                ))
            }
            SubMessageKind::INFO_TS => {
                let f = BitFlags::<InfoTimestampFlag>::from_bits_truncate(flags);
                SubMessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(
                    InfoTimestamp::deserialize(body_buf, f)?,
                    f,
                ))
            }
            SubMessageKind::INFO_REPLY => {
                let f = BitFlags::<InfoReplyFlag>::from_bits_truncate(flags);
                SubMessageBody::Interpreter(InterpreterSubmessage::InfoReply(
                    InfoReply::deserialize(body_buf, f)?,
                    f,
                ))
            }
            SubMessageKind::INFO_REPLY_IP4 => {
                let f = BitFlags::<InfoReplyIp4Flag>::from_bits_truncate(flags);
                SubMessageBody::Interpreter(InterpreterSubmessage::InfoReplyIp4(
                    InfoReplyIp4::deserialize(body_buf, f)?,
                    f,
                ))
            }
            SubMessageKind::PAD | SubMessageKind::UNKNOWN_RTPS | SubMessageKind::VENDORSPECIFIC => {
                return Ok(None)
            }
        };
        Ok(Some(SubMessage { header, body }))
    }
}

/// Splits the submessages which follow the RTPS header.
///
/// Yields each submessage header together with its body. A submessage whose
/// declared length runs past the end of the message yields an error and ends
/// the iteration.
pub struct SubMessageIter {
    buffer: Bytes,
    readed_byte: usize,
}

impl SubMessageIter {
    pub fn new(buffer: Bytes, start: usize) -> Self {
        Self {
            buffer,
            readed_byte: start,
        }
    }
}

impl Iterator for SubMessageIter {
    type Item = IoResult<(SubMessageHeader, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        let length = self.buffer.len();
        if self.readed_byte >= length {
            return None;
        }
        let header = match SubMessageHeader::deserialize(&self.buffer[self.readed_byte..]) {
            Some(h) => h,
            None => {
                let remain = length - self.readed_byte;
                self.readed_byte = length;
                return Some(Err(IoError::Malformed(format!(
                    "{} trailing bytes are not a submessage header",
                    remain
                ))));
            }
        };
        let body_start = self.readed_byte + SubMessageHeader::LEN;
        let body_len = match (header.get_content_len(), header.get_submessagekind()) {
            // rtps 2.3 spec 9.4.5.1.3: zero length declares the last submessage,
            // except for PAD and INFO_TS which have no body of their own
            (0, SubMessageKind::PAD) | (0, SubMessageKind::INFO_TS) => 0,
            (0, _) => length - body_start,
            (len, _) => len as usize,
        };
        if body_start + body_len > length {
            self.readed_byte = length;
            return Some(Err(IoError::Malformed(format!(
                "submessage {:?} declares {} bytes but only {} remain",
                header.get_submessagekind(),
                body_len,
                length - body_start
            ))));
        }
        let body = self.buffer.slice(body_start..body_start + body_len);
        self.readed_byte = body_start + body_len;
        Some(Ok((header, body)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn submessage_iter_splits_and_detects_overrun() {
        let mut buf = vec![0_u8; 20];
        // INFO_TS with invalidate flag, zero length
        buf.extend_from_slice(&[0x09, 0x03, 0x00, 0x00]);
        // INFO_DST little endian
        buf.extend_from_slice(&[0x0e, 0x01, 0x0c, 0x00]);
        buf.extend_from_slice(&[7; 12]);
        // HEARTBEAT claiming 28 bytes with only 4 present
        buf.extend_from_slice(&[0x07, 0x00, 0x00, 0x1c, 0, 0, 0, 0]);
        let mut iter = SubMessageIter::new(Bytes::from(buf), 20);

        let (h, body) = iter.next().unwrap().unwrap();
        assert_eq!(h.get_submessagekind(), SubMessageKind::INFO_TS);
        assert!(body.is_empty());
        let (h, body) = iter.next().unwrap().unwrap();
        assert_eq!(h.get_submessagekind(), SubMessageKind::INFO_DST);
        assert_eq!(body.len(), 12);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn zero_length_submessage_extends_to_end() {
        let mut buf = vec![0_u8; 20];
        buf.extend_from_slice(&[0x0e, 0x00, 0x00, 0x00]);
        buf.extend_from_slice(&[1; 12]);
        let mut iter = SubMessageIter::new(Bytes::from(buf), 20);
        let (header, body) = iter.next().unwrap().unwrap();
        let submessage = SubMessage::deserialize(header, &body).unwrap().unwrap();
        match submessage.body {
            SubMessageBody::Interpreter(InterpreterSubmessage::InfoDestination(dst, _)) => {
                assert_eq!(dst.guid_prefix.guid_prefix, [1; 12])
            }
            _ => panic!("INFO_DST expected"),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn header_length_follows_endianness_flag() {
        let le = SubMessageHeader::new(0x15, 0x05, 0x0102);
        assert_eq!(le.to_bytes(), [0x15, 0x05, 0x02, 0x01]);
        let be = SubMessageHeader::new(0x15, 0x04, 0x0102);
        assert_eq!(be.to_bytes(), [0x15, 0x04, 0x01, 0x02]);
        assert_eq!(SubMessageHeader::deserialize(&le.to_bytes()), Some(le));
        assert_eq!(
            SubMessage::deserialize(SubMessageHeader::new(0x01, 0, 0), &Bytes::new()).unwrap(),
            None
        );
    }
}
