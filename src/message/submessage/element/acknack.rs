use crate::message::submessage::element::*;
use crate::structure::EntityId;
use speedy::{Readable, Writable};

#[derive(Readable, Writable, Clone, Debug, PartialEq)]
pub struct AckNack {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    /// base: every change below it is acknowledged,
    /// set: changes the reader is missing
    pub reader_sn_state: SequenceNumberSet,
    pub count: Count,
}

impl AckNack {
    pub fn new(
        reader_id: EntityId,
        writer_id: EntityId,
        reader_sn_state: SequenceNumberSet,
        count: Count,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            reader_sn_state,
            count,
        }
    }

    pub fn is_valid(&self) -> bool {
        // rtps 2.3 spec 8.3.7.1 AckNack
        self.reader_sn_state.is_valid()
    }
}
