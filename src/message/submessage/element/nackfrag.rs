use crate::message::submessage::element::*;
use crate::structure::EntityId;
use speedy::{Readable, Writable};

#[derive(Readable, Writable, Clone, Debug, PartialEq)]
pub struct NackFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_number_state: FragmentNumberSet,
    pub count: Count,
}

impl NackFrag {
    pub fn is_valid(&self) -> bool {
        // rtps 2.3 spec 8.3.7.9 NackFrag
        self.writer_sn > SequenceNumber(0) && self.fragment_number_state.is_valid()
    }
}
