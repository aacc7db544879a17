use crate::message::submessage::element::{
    FragmentNumber, SequenceNumber, SerializedPayload, Timestamp,
};
use crate::structure::GUID;
use alloc::collections::BTreeSet;
use alloc::fmt;
use bytes::Bytes;

/// One sample of a Writer. Immutable once it is in a history.
#[derive(PartialEq, Eq, Clone)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: GUID,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Timestamp,
    data_value: Option<SerializedPayload>,
    // encapsulation header + value, the stream DATA_FRAG splits
    serialized: Option<Bytes>,
    instance_handle: InstanceHandle, // In DDS, the value of the fields
                                     // labeled as ‘key’ within the data
                                     // uniquely identify each data-
                                     // object.
    // 0 when the change travels as a single DATA
    fragment_size: u16,
}

impl CacheChange {
    pub fn new(
        kind: ChangeKind,
        writer_guid: GUID,
        sequence_number: SequenceNumber,
        source_timestamp: Timestamp,
        data_value: Option<SerializedPayload>,
        instance_handle: InstanceHandle,
    ) -> Self {
        let serialized = data_value.as_ref().map(|d| d.to_bytes());
        Self {
            kind,
            writer_guid,
            sequence_number,
            source_timestamp,
            data_value,
            serialized,
            instance_handle,
            fragment_size: 0,
        }
    }

    pub fn data_value(&self) -> Option<&SerializedPayload> {
        self.data_value.as_ref()
    }

    pub fn instance_handle(&self) -> InstanceHandle {
        self.instance_handle
    }

    /// size of the serialized payload including its encapsulation header
    pub fn serialized_size(&self) -> usize {
        self.serialized.as_ref().map_or(0, |s| s.len())
    }

    pub fn fragment_size(&self) -> u16 {
        self.fragment_size
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragment_size != 0
    }

    /// split the payload in `fragment_size` octet pieces when it is larger than that
    pub(crate) fn set_fragment_size(&mut self, fragment_size: u16) {
        if fragment_size != 0 && self.serialized_size() > fragment_size as usize {
            self.fragment_size = fragment_size;
        } else {
            self.fragment_size = 0;
        }
    }

    pub fn fragment_count(&self) -> u32 {
        if self.fragment_size == 0 {
            return 0;
        }
        (self.serialized_size() as u32).div_ceil(self.fragment_size as u32)
    }

    /// bytes of fragment `fragment_number` (1 origin)
    pub fn fragment(&self, fragment_number: FragmentNumber) -> Option<Bytes> {
        let serialized = self.serialized.as_ref()?;
        if self.fragment_size == 0 || fragment_number.0 == 0 {
            return None;
        }
        let start = (fragment_number.0 as usize - 1) * self.fragment_size as usize;
        if start >= serialized.len() {
            return None;
        }
        let end = core::cmp::min(start + self.fragment_size as usize, serialized.len());
        Some(serialized.slice(start..end))
    }
}

impl fmt::Debug for CacheChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheChange {{ kind: {:?}, writer: {}, sn: {}, size: {} }}",
            self.kind,
            self.writer_guid,
            self.sequence_number,
            self.serialized_size()
        )
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ChangeKind {
    Alive,
    AliveFiltered,
    NotAliveDisposed,
    NotAliveUnregistered,
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    // rtps 2.3 spec 9.6.3.9 StatusInfo_t: D and U bits of the last octet
    const DISPOSED: u8 = 0b01;
    const UNREGISTERED: u8 = 0b10;

    pub fn status_info(&self) -> u8 {
        match self {
            Self::Alive | Self::AliveFiltered => 0,
            Self::NotAliveDisposed => Self::DISPOSED,
            Self::NotAliveUnregistered => Self::UNREGISTERED,
            Self::NotAliveDisposedUnregistered => Self::DISPOSED | Self::UNREGISTERED,
        }
    }

    pub fn from_status_info(flags: u8) -> Self {
        match (flags & Self::DISPOSED != 0, flags & Self::UNREGISTERED != 0) {
            (false, false) => Self::Alive,
            (true, false) => Self::NotAliveDisposed,
            (false, true) => Self::NotAliveUnregistered,
            (true, true) => Self::NotAliveDisposedUnregistered,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive | Self::AliveFiltered)
    }
}

/// rtps 2.3 spec 9.6.3.8 KeyHash_t
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    pub const NIL: Self = Self([0; 16]);

    /// the serialized key itself when it fits in 16 octets, its MD5 digest otherwise
    pub fn from_key(serialized_key: &[u8]) -> Self {
        if serialized_key.len() <= 16 {
            let mut bytes = [0; 16];
            bytes[..serialized_key.len()].copy_from_slice(serialized_key);
            Self(bytes)
        } else {
            Self(md5::compute(serialized_key).0)
        }
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeForReaderStatusKind {
    Unsent,
    Unacknowledged,
    Requested,
    Acknowledged,
    Underway,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeFromWriterStatusKind {
    Lost,
    Missing,
    Received,
    Unknown,
}

/// per reader delivery state of one change held by a StatefulWriter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeForReader {
    pub seq_num: SequenceNumber,
    pub status: ChangeForReaderStatusKind,
    pub is_relevant: bool,
    // fragments still to send, empty for unfragmented changes
    pub unsent_fragments: BTreeSet<FragmentNumber>,
    pub fragment_count: u32,
}

impl ChangeForReader {
    pub fn new(
        seq_num: SequenceNumber,
        status: ChangeForReaderStatusKind,
        is_relevant: bool,
        fragment_count: u32,
    ) -> Self {
        let mut change = Self {
            seq_num,
            status,
            is_relevant,
            unsent_fragments: BTreeSet::new(),
            fragment_count,
        };
        change.mark_all_fragments_as_unsent();
        change
    }

    pub fn mark_all_fragments_as_unsent(&mut self) {
        self.unsent_fragments = (1..=self.fragment_count).map(FragmentNumber).collect();
    }

    /// true once every fragment went out
    pub fn mark_fragment_as_sent(&mut self, fragment: FragmentNumber) -> bool {
        self.unsent_fragments.remove(&fragment);
        self.unsent_fragments.is_empty()
    }
}

/// per writer reception state of one sequence number held by a StatefulReader
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeFromWriter {
    pub seq_num: SequenceNumber,
    pub is_relevant: bool,
    pub status: ChangeFromWriterStatusKind,
}

impl ChangeFromWriter {
    pub fn new(
        seq_num: SequenceNumber,
        status: ChangeFromWriterStatusKind,
        is_relevant: bool,
    ) -> Self {
        Self {
            seq_num,
            status,
            is_relevant,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct HCKey {
    pub guid: GUID,
    pub seq_num: SequenceNumber,
}
impl HCKey {
    pub fn new(guid: GUID, seq_num: SequenceNumber) -> Self {
        Self { guid, seq_num }
    }
}
impl PartialOrd for HCKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HCKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seq_num
            .cmp(&other.seq_num)
            .then_with(|| self.guid.cmp(&other.guid))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::submessage::element::CDR_LE;

    fn change_of(len: usize) -> CacheChange {
        let value: Vec<u8> = (0..len).map(|i| i as u8).collect();
        CacheChange::new(
            ChangeKind::Alive,
            GUID::UNKNOW,
            SequenceNumber(1),
            Timestamp::TIME_ZERO,
            Some(SerializedPayload::new(CDR_LE, Bytes::from(value))),
            InstanceHandle::NIL,
        )
    }

    #[test]
    fn fragments_cover_serialized_payload() {
        let mut change = change_of(96);
        change.set_fragment_size(40);
        assert_eq!(change.serialized_size(), 100);
        assert_eq!(change.fragment_count(), 3);
        assert_eq!(change.fragment(FragmentNumber(3)).unwrap().len(), 20);
        assert!(change.fragment(FragmentNumber(4)).is_none());
        let mut joined = Vec::new();
        for n in 1..=3 {
            joined.extend_from_slice(&change.fragment(FragmentNumber(n)).unwrap());
        }
        assert_eq!(
            Bytes::from(joined),
            change.data_value().unwrap().to_bytes()
        );

        let mut small = change_of(8);
        small.set_fragment_size(40);
        assert!(!small.is_fragmented());
        assert_eq!(small.fragment_count(), 0);
    }

    #[test]
    fn status_info_round_trip_and_key_hash() {
        for kind in [
            ChangeKind::Alive,
            ChangeKind::NotAliveDisposed,
            ChangeKind::NotAliveUnregistered,
            ChangeKind::NotAliveDisposedUnregistered,
        ] {
            assert_eq!(ChangeKind::from_status_info(kind.status_info()), kind);
        }
        let short = InstanceHandle::from_key(&[1, 2, 3]);
        assert_eq!(&short.0[..4], &[1, 2, 3, 0]);
        let long = InstanceHandle::from_key(&[7; 20]);
        assert_eq!(long.0, md5::compute([7_u8; 20]).0);
    }

    #[test]
    fn change_for_reader_tracks_fragments() {
        let mut c = ChangeForReader::new(
            SequenceNumber(1),
            ChangeForReaderStatusKind::Unsent,
            true,
            2,
        );
        assert!(!c.mark_fragment_as_sent(FragmentNumber(1)));
        assert!(c.mark_fragment_as_sent(FragmentNumber(2)));
        c.mark_all_fragments_as_unsent();
        assert_eq!(c.unsent_fragments.len(), 2);
    }
}
