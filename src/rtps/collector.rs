use crate::message::submessage::element::{FragmentNumber, SequenceNumber, SequenceNumberSet};
use crate::structure::GUID;
use alloc::collections::{BTreeMap, BTreeSet};

/// One DATA or DATA_FRAG due, with every destination it is due to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectorItem<D> {
    pub seq_num: SequenceNumber,
    /// None for a change sent as a whole DATA
    pub fragment: Option<FragmentNumber>,
    pub destinations: Vec<D>,
}

/// Groups what a Writer has to send by (sequence number, fragment) so every
/// piece is serialized once, for the union of its destinations.
///
/// A StatefulWriter collects Reader GUIDs, a StatelessWriter collects Locators.
pub struct RTPSWriterCollector<D> {
    items: BTreeMap<(SequenceNumber, u32), Vec<D>>,
}

impl<D: PartialEq> Default for RTPSWriterCollector<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: PartialEq> RTPSWriterCollector<D> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, seq_num: SequenceNumber, fragment: Option<FragmentNumber>, destination: D) {
        let key = (seq_num, fragment.map_or(0, |f| f.0));
        let destinations = self.items.entry(key).or_default();
        if !destinations.contains(&destination) {
            destinations.push(destination);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// items in (sequence number, fragment) order
    pub fn into_items(self) -> Vec<CollectorItem<D>> {
        self.items
            .into_iter()
            .map(|((seq_num, fragment), destinations)| CollectorItem {
                seq_num,
                fragment: if fragment == 0 {
                    None
                } else {
                    Some(FragmentNumber(fragment))
                },
                destinations,
            })
            .collect()
    }
}

/// Sequence numbers every Reader has to be told about with a GAP.
///
/// Readers owed the same set share the GAP submessages.
#[derive(Default)]
pub struct StatefulWriterOrganizer {
    per_reader: BTreeMap<GUID, BTreeSet<SequenceNumber>>,
}

impl StatefulWriterOrganizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, reader: GUID, seq_num: SequenceNumber) {
        self.per_reader.entry(reader).or_default().insert(seq_num);
    }

    pub fn is_empty(&self) -> bool {
        self.per_reader.is_empty()
    }

    /// (readers, sorted sequence numbers) for every distinct set
    pub fn groups(self) -> Vec<(Vec<GUID>, Vec<SequenceNumber>)> {
        let mut by_set: BTreeMap<Vec<SequenceNumber>, Vec<GUID>> = BTreeMap::new();
        for (reader, seqs) in self.per_reader {
            by_set
                .entry(seqs.into_iter().collect())
                .or_default()
                .push(reader);
        }
        by_set
            .into_iter()
            .map(|(seqs, readers)| (readers, seqs))
            .collect()
    }
}

/// Cover `seqs` (sorted, deduplicated) with GAP (gapStart, gapList) pairs.
///
/// A GAP marks [gapStart, gapList.base) plus the members of gapList, so a
/// contiguous run becomes the range and what follows within the bitmap
/// window joins the list.
pub fn gap_ranges(seqs: &[SequenceNumber]) -> Vec<(SequenceNumber, SequenceNumberSet)> {
    let mut gaps = Vec::new();
    let mut i = 0;
    while i < seqs.len() {
        let gap_start = seqs[i];
        let mut end = gap_start;
        i += 1;
        while i < seqs.len() && seqs[i] == end + SequenceNumber(1) {
            end = seqs[i];
            i += 1;
        }
        let base = end + SequenceNumber(1);
        let window_end = base + SequenceNumber(SequenceNumberSet::MAX_BITS as i64);
        let mut members = Vec::new();
        while i < seqs.len() && seqs[i] < window_end {
            members.push(seqs[i]);
            i += 1;
        }
        gaps.push((gap_start, SequenceNumberSet::from_vec(base, members)));
    }
    gaps
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::submessage::element::Locator;
    use crate::structure::{EntityId, GuidPrefix, TopicKind};

    fn seqs(v: &[i64]) -> Vec<SequenceNumber> {
        v.iter().map(|s| SequenceNumber(*s)).collect()
    }

    fn reader(key: u8) -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([key; 12]),
            EntityId::new_reader(1, TopicKind::NoKey),
        )
    }

    #[test]
    fn collector_merges_destinations_per_piece() {
        let mut collector = RTPSWriterCollector::new();
        let a = Locator::new_from_ipv4(7411, [127, 0, 0, 1]);
        let b = Locator::new_from_ipv4(7412, [127, 0, 0, 1]);
        collector.add(SequenceNumber(2), None, a);
        collector.add(SequenceNumber(1), Some(FragmentNumber(2)), a);
        collector.add(SequenceNumber(1), Some(FragmentNumber(1)), b);
        collector.add(SequenceNumber(2), None, b);
        collector.add(SequenceNumber(2), None, a);
        let items = collector.into_items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].fragment, Some(FragmentNumber(1)));
        assert_eq!(items[1].fragment, Some(FragmentNumber(2)));
        assert_eq!(items[2].seq_num, SequenceNumber(2));
        assert_eq!(items[2].fragment, None);
        assert_eq!(items[2].destinations, vec![a, b]);
    }

    #[test]
    fn organizer_groups_readers_with_equal_sets() {
        let mut organizer = StatefulWriterOrganizer::new();
        organizer.add(reader(1), SequenceNumber(3));
        organizer.add(reader(2), SequenceNumber(3));
        organizer.add(reader(3), SequenceNumber(4));
        let groups = organizer.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], (vec![reader(1), reader(2)], seqs(&[3])));
        assert_eq!(groups[1], (vec![reader(3)], seqs(&[4])));
    }

    #[test]
    fn gap_ranges_cover_runs_and_holes() {
        let gaps = gap_ranges(&seqs(&[2, 3, 4, 7, 9]));
        assert_eq!(gaps.len(), 1);
        let (start, list) = &gaps[0];
        assert_eq!(*start, SequenceNumber(2));
        assert_eq!(list.base(), SequenceNumber(5));
        assert_eq!(list.set(), seqs(&[7, 9]));

        let far = gap_ranges(&seqs(&[1, 1000]));
        assert_eq!(far.len(), 2);
        assert_eq!(far[1].0, SequenceNumber(1000));
        assert_eq!(far[1].1.base(), SequenceNumber(1001));
        assert!(far[1].1.is_empty());
        assert!(gap_ranges(&[]).is_empty());
    }
}
