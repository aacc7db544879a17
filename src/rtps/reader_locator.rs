use crate::message::submessage::element::{FragmentNumber, Locator, SequenceNumber};
use crate::rtps::cache::{ChangeForReader, ChangeForReaderStatusKind};
use crate::structure::GUID;
use alloc::collections::BTreeMap;

/// A destination of a StatelessWriter: one locator, the remote Readers
/// listening on it, and the changes still to send there.
///
/// Nothing is acknowledged, a change leaves the queue once it was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderLocator {
    locator: Locator,
    remote_readers: Vec<GUID>,
    unsent_changes: BTreeMap<SequenceNumber, ChangeForReader>,
    expects_inline_qos: bool,
    // added by hand, stays without remote Readers
    pinned: bool,
}

impl ReaderLocator {
    pub fn new(locator: Locator, expects_inline_qos: bool) -> Self {
        Self {
            locator,
            remote_readers: Vec::new(),
            unsent_changes: BTreeMap::new(),
            expects_inline_qos,
            pinned: false,
        }
    }

    pub fn new_pinned(locator: Locator, expects_inline_qos: bool) -> Self {
        Self {
            pinned: true,
            ..Self::new(locator, expects_inline_qos)
        }
    }

    pub fn locator(&self) -> Locator {
        self.locator
    }

    pub fn expects_inline_qos(&self) -> bool {
        self.expects_inline_qos
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn remote_readers(&self) -> &[GUID] {
        &self.remote_readers
    }

    pub fn add_reader(&mut self, reader: GUID, expects_inline_qos: bool) {
        if !self.remote_readers.contains(&reader) {
            self.remote_readers.push(reader);
        }
        self.expects_inline_qos |= expects_inline_qos;
    }

    /// true when `reader` was listening here
    pub fn remove_reader(&mut self, reader: GUID) -> bool {
        let before = self.remote_readers.len();
        self.remote_readers.retain(|r| *r != reader);
        before != self.remote_readers.len()
    }

    /// no Reader left and not pinned
    pub fn is_unused(&self) -> bool {
        !self.pinned && self.remote_readers.is_empty()
    }

    /// queue `seq_num` for sending, all of its fragments when it has some
    pub fn add_change(&mut self, seq_num: SequenceNumber, fragment_count: u32) {
        self.unsent_changes.insert(
            seq_num,
            ChangeForReader::new(
                seq_num,
                ChangeForReaderStatusKind::Unsent,
                true,
                fragment_count,
            ),
        );
    }

    pub fn unsent_changes(&self) -> impl Iterator<Item = &ChangeForReader> {
        self.unsent_changes.values()
    }

    pub fn has_unsent_changes(&self) -> bool {
        !self.unsent_changes.is_empty()
    }

    pub fn is_unsent(&self, seq_num: SequenceNumber) -> bool {
        self.unsent_changes.contains_key(&seq_num)
    }

    /// `fragment` (or the whole change) went out, true once nothing of it is left
    pub fn mark_sent(&mut self, seq_num: SequenceNumber, fragment: Option<FragmentNumber>) -> bool {
        let done = match (self.unsent_changes.get_mut(&seq_num), fragment) {
            (Some(change), Some(fragment)) => change.mark_fragment_as_sent(fragment),
            (Some(_), None) => true,
            (None, _) => return true,
        };
        if done {
            self.unsent_changes.remove(&seq_num);
        }
        done
    }

    /// the history dropped `seq_num`
    pub fn remove_change(&mut self, seq_num: SequenceNumber) -> bool {
        self.unsent_changes.remove(&seq_num).is_some()
    }

    pub fn clear(&mut self) {
        self.unsent_changes.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::structure::{EntityId, GuidPrefix, TopicKind};

    fn reader(key: u8) -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([key; 12]),
            EntityId::new_reader(1, TopicKind::NoKey),
        )
    }

    #[test]
    fn queue_drains_as_changes_are_sent() {
        let mut locator = ReaderLocator::new(Locator::new_from_ipv4(7400, [127, 0, 0, 1]), false);
        locator.add_change(SequenceNumber(1), 0);
        locator.add_change(SequenceNumber(2), 2);
        assert!(locator.mark_sent(SequenceNumber(1), None));
        assert!(!locator.mark_sent(SequenceNumber(2), Some(FragmentNumber(1))));
        assert!(locator.is_unsent(SequenceNumber(2)));
        assert!(locator.mark_sent(SequenceNumber(2), Some(FragmentNumber(2))));
        assert!(!locator.has_unsent_changes());
    }

    #[test]
    fn readers_come_and_go() {
        let mut locator = ReaderLocator::new(Locator::new_from_ipv4(7400, [127, 0, 0, 1]), false);
        locator.add_reader(reader(1), false);
        locator.add_reader(reader(1), true);
        assert_eq!(locator.remote_readers(), &[reader(1)]);
        assert!(locator.expects_inline_qos());
        assert!(locator.remove_reader(reader(1)));
        assert!(!locator.remove_reader(reader(1)));
        assert!(locator.is_unused());
        let pinned = ReaderLocator::new_pinned(Locator::new_from_ipv4(7400, [239, 255, 0, 1]), false);
        assert!(!pinned.is_unused());
    }
}
