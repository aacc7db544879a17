use crate::dds::qos::policy::{History, HistoryQosKind, ResourceLimits, LENGTH_UNLIMITED};
use crate::error::{RtpsError, RtpsResult};
use crate::message::submessage::element::SequenceNumber;
use crate::rtps::cache::{CacheChange, HCKey};
use crate::structure::GUID;
use alloc::collections::{BTreeMap, VecDeque};

fn capacity_of(history: History, resource_limits: ResourceLimits) -> Option<usize> {
    let max_samples = if resource_limits.max_samples == LENGTH_UNLIMITED {
        None
    } else {
        Some(resource_limits.max_samples.max(1) as usize)
    };
    match history.kind {
        HistoryQosKind::KeepLast => {
            let depth = history.depth.max(1) as usize;
            Some(max_samples.map_or(depth, |m| m.min(depth)))
        }
        HistoryQosKind::KeepAll => max_samples,
    }
}

/// changes of one Writer ordered by sequence number
///
/// The history only assigns sequence numbers and enforces its bound.
/// Which change has to leave when it is full is decided by the owning
/// writer, which also has to tell its proxies.
pub struct WriterHistory {
    changes: BTreeMap<SequenceNumber, CacheChange>,
    last_sequence_number: SequenceNumber,
    history: History,
    capacity: Option<usize>,
}

impl WriterHistory {
    pub fn new(history: History, resource_limits: ResourceLimits) -> Self {
        Self {
            changes: BTreeMap::new(),
            last_sequence_number: SequenceNumber::ZERO,
            history,
            capacity: capacity_of(history, resource_limits),
        }
    }

    pub fn history_kind(&self) -> HistoryQosKind {
        self.history.kind
    }

    /// the sequence number the next added change gets
    pub fn next_sequence_number(&self) -> SequenceNumber {
        self.last_sequence_number + SequenceNumber(1)
    }

    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.last_sequence_number
    }

    /// stamp `change` with the next sequence number and store it
    pub fn add_change(&mut self, mut change: CacheChange) -> RtpsResult<SequenceNumber> {
        if self.is_full() {
            return Err(RtpsError::HistoryFull);
        }
        let seq_num = self.next_sequence_number();
        change.sequence_number = seq_num;
        self.changes.insert(seq_num, change);
        self.last_sequence_number = seq_num;
        Ok(seq_num)
    }

    pub fn get_change(&self, seq_num: SequenceNumber) -> Option<&CacheChange> {
        self.changes.get(&seq_num)
    }

    pub fn contains(&self, seq_num: SequenceNumber) -> bool {
        self.changes.contains_key(&seq_num)
    }

    pub fn remove_change(&mut self, seq_num: SequenceNumber) -> Option<CacheChange> {
        self.changes.remove(&seq_num)
    }

    pub fn remove_min_change(&mut self) -> Option<CacheChange> {
        self.changes.pop_first().map(|(_, c)| c)
    }

    pub fn get_min_change(&self) -> Option<&CacheChange> {
        self.changes.values().next()
    }

    pub fn get_max_change(&self) -> Option<&CacheChange> {
        self.changes.values().next_back()
    }

    /// first sequence number still held, `next_sequence_number()` when empty
    pub fn seq_num_min(&self) -> SequenceNumber {
        self.changes
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.next_sequence_number())
    }

    /// last sequence number written, `seq_num_min() - 1` when empty
    pub fn seq_num_max(&self) -> SequenceNumber {
        match self.changes.keys().next_back() {
            Some(s) => *s,
            None => self.next_sequence_number() - SequenceNumber(1),
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CacheChange> {
        self.changes.values()
    }

    pub fn sequence_numbers(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.changes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|c| self.changes.len() >= c)
    }
}

/// changes received from matched Writers, keyed by (sequence number, writer)
///
/// KEEP_LAST keeps the last `depth` changes of every Writer. When
/// `max_samples` bounds the whole history, KEEP_LAST evicts the change
/// that arrived first and KEEP_ALL refuses the new one.
pub struct ReaderHistory {
    changes: BTreeMap<HCKey, CacheChange>,
    // keys in arrival order
    arrivals: VecDeque<HCKey>,
    history: History,
    max_samples: Option<usize>,
}

impl ReaderHistory {
    pub fn new(history: History, resource_limits: ResourceLimits) -> Self {
        let max_samples = if resource_limits.max_samples == LENGTH_UNLIMITED {
            None
        } else {
            Some(resource_limits.max_samples.max(1) as usize)
        };
        Self {
            changes: BTreeMap::new(),
            arrivals: VecDeque::new(),
            history,
            max_samples,
        }
    }

    /// Ok(false) when the change is already held
    pub fn add_change(&mut self, change: CacheChange) -> RtpsResult<bool> {
        let key = HCKey::new(change.writer_guid, change.sequence_number);
        if self.changes.contains_key(&key) {
            return Ok(false);
        }
        if self.history.kind == HistoryQosKind::KeepLast {
            let depth = self.history.depth.max(1) as usize;
            let of_writer = self
                .changes
                .keys()
                .filter(|k| k.guid == key.guid)
                .count();
            if of_writer >= depth {
                // keys order by sequence number first
                if let Some(oldest) = self.changes.keys().find(|k| k.guid == key.guid).copied() {
                    self.evict(oldest);
                }
            }
        }
        if self.max_samples.is_some_and(|m| self.changes.len() >= m) {
            match self.history.kind {
                HistoryQosKind::KeepLast => {
                    if let Some(first) = self.arrivals.front().copied() {
                        self.evict(first);
                    }
                }
                HistoryQosKind::KeepAll => return Err(RtpsError::HistoryFull),
            }
        }
        self.changes.insert(key, change);
        self.arrivals.push_back(key);
        Ok(true)
    }

    fn evict(&mut self, key: HCKey) {
        self.changes.remove(&key);
        self.arrivals.retain(|k| *k != key);
    }

    pub fn get_change(&self, writer_guid: GUID, seq_num: SequenceNumber) -> Option<&CacheChange> {
        self.changes.get(&HCKey::new(writer_guid, seq_num))
    }

    pub fn remove_change(
        &mut self,
        writer_guid: GUID,
        seq_num: SequenceNumber,
    ) -> Option<CacheChange> {
        let key = HCKey::new(writer_guid, seq_num);
        self.arrivals.retain(|k| *k != key);
        self.changes.remove(&key)
    }

    /// drop every change received from `writer_guid`
    pub fn remove_changes_of(&mut self, writer_guid: GUID) {
        self.changes.retain(|k, _| k.guid != writer_guid);
        self.arrivals.retain(|k| k.guid != writer_guid);
    }

    /// hand every held change to the application, oldest first
    pub fn take_changes(&mut self) -> Vec<CacheChange> {
        self.arrivals.clear();
        core::mem::take(&mut self.changes).into_values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheChange> {
        self.changes.values()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
