//! reassembly of changes received as DATA_FRAG

use crate::message::message_group::change_attributes_of;
use crate::message::submessage::element::{
    datafrag::DataFrag, FragmentNumber, FragmentNumberSet, SequenceNumber, SerializedPayload,
    Timestamp,
};
use crate::rtps::cache::{CacheChange, ChangeKind, InstanceHandle};
use crate::structure::GUID;
use alloc::collections::{BTreeMap, BTreeSet};
use bytes::BytesMut;
use log::{trace, warn};

struct ChangeInProgress {
    kind: ChangeKind,
    instance_handle: InstanceHandle,
    source_timestamp: Timestamp,
    data_size: u32,
    fragment_size: u16,
    buffer: BytesMut,
    received: BTreeSet<FragmentNumber>,
}

impl ChangeInProgress {
    fn new(data_frag: &DataFrag, source_timestamp: Timestamp) -> Self {
        let (kind, instance_handle) = change_attributes_of(data_frag.inline_qos.as_ref());
        Self {
            kind,
            instance_handle,
            source_timestamp,
            data_size: data_frag.data_size,
            fragment_size: data_frag.fragment_size,
            buffer: BytesMut::zeroed(data_frag.data_size as usize),
            received: BTreeSet::new(),
        }
    }

    fn total_fragments(&self) -> u32 {
        self.data_size.div_ceil(self.fragment_size as u32)
    }

    fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_fragments()
    }

    /// false when `data_frag` contradicts what earlier fragments declared
    fn merge(&mut self, data_frag: &DataFrag) -> bool {
        if data_frag.data_size != self.data_size || data_frag.fragment_size != self.fragment_size {
            return false;
        }
        if data_frag.inline_qos.is_some() {
            let (kind, instance_handle) = change_attributes_of(data_frag.inline_qos.as_ref());
            self.kind = kind;
            self.instance_handle = instance_handle;
        }
        let fragment_size = self.fragment_size as usize;
        let payload = &data_frag.serialized_payload;
        for i in 0..data_frag.fragments_in_submessage as usize {
            let number = data_frag.fragment_starting_num.0 as usize + i;
            let offset = (number - 1) * fragment_size;
            if offset >= self.buffer.len() {
                break;
            }
            let len = core::cmp::min(fragment_size, self.buffer.len() - offset);
            let src = i * fragment_size;
            if src + len > payload.len() {
                break;
            }
            self.buffer[offset..offset + len].copy_from_slice(&payload[src..src + len]);
            self.received.insert(FragmentNumber(number as u32));
        }
        true
    }

    fn missing(&self, last_fragment: FragmentNumber) -> Vec<FragmentNumber> {
        let last = core::cmp::min(last_fragment.0, self.total_fragments());
        (1..=last)
            .map(FragmentNumber)
            .filter(|f| !self.received.contains(f))
            .collect()
    }
}

/// Holds the partial payloads of fragmented changes until every fragment
/// arrived, keyed by (writer, sequence number).
pub struct FragmentedChangePitStop {
    changes: BTreeMap<(GUID, SequenceNumber), ChangeInProgress>,
    // largest sample a DATA_FRAG may announce
    max_sample_size: u32,
}

impl FragmentedChangePitStop {
    pub fn new(max_sample_size: u32) -> Self {
        Self {
            changes: BTreeMap::new(),
            max_sample_size,
        }
    }

    /// Merge the fragments carried by `data_frag`, the reassembled change is
    /// returned once the received fragments cover the whole sample.
    pub fn add_fragments_to_change(
        &mut self,
        writer_guid: GUID,
        data_frag: &DataFrag,
        source_timestamp: Timestamp,
    ) -> Option<CacheChange> {
        if !data_frag.is_valid() {
            warn!(
                "invalid DATA_FRAG {} dropped\n\tWriter: {}",
                data_frag.writer_sn, writer_guid
            );
            return None;
        }
        if data_frag.data_size > self.max_sample_size {
            warn!(
                "DATA_FRAG {} announces {} bytes, more than the {} allowed\n\tWriter: {}",
                data_frag.writer_sn, data_frag.data_size, self.max_sample_size, writer_guid
            );
            return None;
        }
        let key = (writer_guid, data_frag.writer_sn);
        let in_progress = self
            .changes
            .entry(key)
            .or_insert_with(|| ChangeInProgress::new(data_frag, source_timestamp));
        if !in_progress.merge(data_frag) {
            warn!(
                "DATA_FRAG of {} disagrees on sample size\n\tWriter: {}",
                data_frag.writer_sn, writer_guid
            );
            return None;
        }
        if !in_progress.is_complete() {
            trace!(
                "{}/{} fragments of {}\n\tWriter: {}",
                in_progress.received.len(),
                in_progress.total_fragments(),
                data_frag.writer_sn,
                writer_guid
            );
            return None;
        }
        let done = self.changes.remove(&key)?;
        let payload = match SerializedPayload::from_bytes(&done.buffer.freeze()) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "reassembled {} is not a serialized payload: {}\n\tWriter: {}",
                    data_frag.writer_sn, e, writer_guid
                );
                return None;
            }
        };
        Some(CacheChange::new(
            done.kind,
            writer_guid,
            data_frag.writer_sn,
            done.source_timestamp,
            Some(payload),
            done.instance_handle,
        ))
    }

    /// fragments up to `last_fragment` not received yet, None for an unknown change
    pub fn missing_fragments(
        &self,
        writer_guid: GUID,
        seq_num: SequenceNumber,
        last_fragment: FragmentNumber,
    ) -> Option<FragmentNumberSet> {
        let in_progress = self.changes.get(&(writer_guid, seq_num))?;
        let missing = in_progress.missing(last_fragment);
        let base = missing.first().copied().unwrap_or(FragmentNumber(1));
        let window_end = base.0 + FragmentNumberSet::MAX_BITS;
        Some(FragmentNumberSet::from_vec(
            base,
            missing.into_iter().filter(|f| f.0 < window_end).collect(),
        ))
    }

    pub fn contains(&self, writer_guid: GUID, seq_num: SequenceNumber) -> bool {
        self.changes.contains_key(&(writer_guid, seq_num))
    }

    pub fn remove_change(&mut self, writer_guid: GUID, seq_num: SequenceNumber) -> bool {
        self.changes.remove(&(writer_guid, seq_num)).is_some()
    }

    /// drop what `writer_guid` superseded, the partial changes below `seq_num`
    pub fn remove_changes_before(&mut self, writer_guid: GUID, seq_num: SequenceNumber) -> usize {
        let before = self.changes.len();
        self.changes
            .retain(|(writer, s), _| *writer != writer_guid || *s >= seq_num);
        before - self.changes.len()
    }

    pub fn remove_writer(&mut self, writer_guid: GUID) -> usize {
        let before = self.changes.len();
        self.changes.retain(|(writer, _), _| *writer != writer_guid);
        before - self.changes.len()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
