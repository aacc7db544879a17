use crate::message::submessage::element::*;
use crate::structure::EntityId;
use speedy::{Readable, Writable};

/// GroupInfo (gapStartGSN, gapEndGSN) is never emitted and ignored on receive
#[derive(Readable, Writable, Clone, Debug, PartialEq)]
pub struct Gap {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

impl Gap {
    pub fn new(
        reader_id: EntityId,
        writer_id: EntityId,
        gap_start: SequenceNumber,
        gap_list: SequenceNumberSet,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            gap_start,
            gap_list,
        }
    }

    /// every sequence number the GAP declares irrelevant:
    /// [gap_start, gap_list.base) plus the members of gap_list
    pub fn irrelevant_changes(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        (self.gap_start.0..self.gap_list.base().0)
            .map(SequenceNumber)
            .chain(self.gap_list.set())
    }

    pub fn is_valid(&self) -> bool {
        // rtps 2.3 spec 8.3.7.4 Gap
        // validation
        if self.gap_start <= SequenceNumber(0) {
            // gapStart is zero or negative
            return false;
        }
        if !self.gap_list.is_valid() {
            // gapList is invalid
            return false;
        }
        // gapList.base < gapStart
        self.gap_list.base() >= self.gap_start
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn irrelevant_changes_cover_range_and_list() {
        let gap = Gap::new(
            EntityId::UNKNOW,
            EntityId::UNKNOW,
            SequenceNumber(3),
            SequenceNumberSet::from_vec(SequenceNumber(5), vec![SequenceNumber(7)]),
        );
        assert!(gap.is_valid());
        assert_eq!(
            gap.irrelevant_changes().collect::<Vec<_>>(),
            vec![SequenceNumber(3), SequenceNumber(4), SequenceNumber(7)]
        );
        let zero_start = Gap::new(
            EntityId::UNKNOW,
            EntityId::UNKNOW,
            SequenceNumber(0),
            SequenceNumberSet::new_empty(SequenceNumber(1)),
        );
        assert!(!zero_start.is_valid());
    }
}
