use crate::message::submessage::element::*;
use crate::structure::EntityId;
use speedy::{Readable, Writable};

#[derive(Readable, Writable, Clone, Debug, PartialEq)]
pub struct HeartbeatFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub last_fragment_num: FragmentNumber,
    pub count: Count,
}

impl HeartbeatFrag {
    pub fn is_valid(&self) -> bool {
        // rtps 2.3 spec 8.3.7.6 HeartBeatFrag
        self.writer_sn > SequenceNumber(0) && self.last_fragment_num.0 > 0
    }
}
