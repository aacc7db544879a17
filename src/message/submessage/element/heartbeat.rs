use crate::message::submessage::element::*;
use crate::structure::EntityId;
use speedy::{Readable, Writable};

/// GroupInfo elements are never emitted and ignored on receive
#[derive(Readable, Writable, Clone, Debug, PartialEq)]
pub struct Heartbeat {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    pub count: Count,
}

impl Heartbeat {
    pub fn new(
        reader_id: EntityId,
        writer_id: EntityId,
        first_sn: SequenceNumber,
        last_sn: SequenceNumber,
        count: Count,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            first_sn,
            last_sn,
            count,
        }
    }

    pub fn is_valid(&self) -> bool {
        // rtps 2.3 spec 8.3.7.5 Heartbeat
        if self.first_sn <= SequenceNumber(0) {
            // first_sn is zero or negative
            return false;
        }
        if self.last_sn < SequenceNumber(0) {
            // last_sn is negative
            return false;
        }
        // lastSN.value < firstSN.value - 1, last_sn == 0 announces an empty writer
        self.last_sn >= self.first_sn - SequenceNumber(1) || self.last_sn == SequenceNumber(0)
    }

    /// first_sn > last_sn: the writer holds no changes
    pub fn is_empty_range(&self) -> bool {
        self.first_sn > self.last_sn
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use speedy::{Endianness, Readable};

    #[test]
    fn test_deserialize() {
        const TEST_HEARTBEAT: [u8; 28] = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0xC2, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00,
        ];
        const E: Endianness = Endianness::LittleEndian;
        let test_heartbeat = Bytes::from_static(&TEST_HEARTBEAT);
        let heartbeat = match Heartbeat::read_from_buffer_with_ctx(E, &test_heartbeat) {
            Ok(h) => h,
            Err(e) => panic!("{:?}", e),
        };
        assert_eq!(heartbeat.first_sn, SequenceNumber(4));
        assert_eq!(heartbeat.last_sn, SequenceNumber(4));
        assert_eq!(heartbeat.count, 5);
        assert!(heartbeat.is_valid());
    }

    #[test]
    fn validity() {
        let hb = |first, last| {
            Heartbeat::new(
                EntityId::UNKNOW,
                EntityId::UNKNOW,
                SequenceNumber(first),
                SequenceNumber(last),
                1,
            )
        };
        assert!(hb(6, 5).is_valid());
        assert!(hb(6, 5).is_empty_range());
        assert!(hb(1, 0).is_valid());
        assert!(hb(8, 0).is_valid());
        assert!(!hb(8, 3).is_valid());
        assert!(!hb(0, 3).is_valid());
        assert!(!hb(1, -1).is_valid());
    }
}
