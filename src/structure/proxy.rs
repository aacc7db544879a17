use crate::dds::qos::{
    policy::{Durability, ReliabilityQosKind},
    ReaderQos, WriterQos,
};
use crate::message::submessage::element::{
    Count, FragmentNumber, FragmentNumberSet, Locator, SequenceNumber, SequenceNumberSet,
};
use crate::rtps::cache::{
    ChangeForReader, ChangeForReaderStatusKind, ChangeFromWriter, ChangeFromWriterStatusKind,
};
use crate::rtps::timed_event::{TimedEventKind, TimerFactory, TimerHandle};
use crate::structure::guid::GUID;
use alloc::collections::BTreeMap;
use core::time::Duration as CoreDuration;
use log::{debug, trace};

/// what discovery tells about a remote Reader
#[derive(Clone, Debug, PartialEq)]
pub struct ReaderProxyData {
    pub remote_reader_guid: GUID,
    pub expects_inline_qos: bool,
    pub unicast_locator_list: Vec<Locator>,
    pub multicast_locator_list: Vec<Locator>,
    pub qos: ReaderQos,
}

impl ReaderProxyData {
    pub fn new(
        remote_reader_guid: GUID,
        unicast_locator_list: Vec<Locator>,
        multicast_locator_list: Vec<Locator>,
        qos: ReaderQos,
    ) -> Self {
        Self {
            remote_reader_guid,
            expects_inline_qos: false,
            unicast_locator_list,
            multicast_locator_list,
            qos,
        }
    }

    /// unicast locators when the Reader has any, its multicast locators otherwise
    pub fn locators(&self) -> &[Locator] {
        if self.unicast_locator_list.is_empty() {
            &self.multicast_locator_list
        } else {
            &self.unicast_locator_list
        }
    }
}

/// what discovery tells about a remote Writer
#[derive(Clone, Debug, PartialEq)]
pub struct WriterProxyData {
    pub remote_writer_guid: GUID,
    pub unicast_locator_list: Vec<Locator>,
    pub multicast_locator_list: Vec<Locator>,
    pub qos: WriterQos,
}

impl WriterProxyData {
    pub fn new(
        remote_writer_guid: GUID,
        unicast_locator_list: Vec<Locator>,
        multicast_locator_list: Vec<Locator>,
        qos: WriterQos,
    ) -> Self {
        Self {
            remote_writer_guid,
            unicast_locator_list,
            multicast_locator_list,
            qos,
        }
    }

    pub fn locators(&self) -> &[Locator] {
        if self.unicast_locator_list.is_empty() {
            &self.multicast_locator_list
        } else {
            &self.unicast_locator_list
        }
    }
}

/// Writer side state of one matched remote Reader.
///
/// Changes at or below `changes_low_mark` are acknowledged and not tracked
/// any more; the low mark never goes back.
///
/// Status transitions of a tracked change:
/// - ACKNOWLEDGED is terminal, every status may move to it
/// - only REQUESTED may go back to UNSENT
/// - UNSENT never becomes REQUESTED
pub struct ReaderProxy {
    data: ReaderProxyData,
    is_active: bool,
    changes_for_reader: BTreeMap<SequenceNumber, ChangeForReader>,
    changes_low_mark: SequenceNumber,
    last_acknack_count: Count,
    last_nackfrag_count: Count,
    nack_supression: Option<TimerHandle>,
    nack_response: Option<TimerHandle>,
}

impl Default for ReaderProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderProxy {
    /// an inactive proxy, ready to sit in a pool until `start`
    pub fn new() -> Self {
        Self {
            data: ReaderProxyData::new(GUID::UNKNOW, Vec::new(), Vec::new(), ReaderQos::default()),
            is_active: false,
            changes_for_reader: BTreeMap::new(),
            changes_low_mark: SequenceNumber(0),
            last_acknack_count: 0,
            last_nackfrag_count: 0,
            nack_supression: None,
            nack_response: None,
        }
    }

    pub fn start(
        &mut self,
        data: ReaderProxyData,
        writer_guid: GUID,
        nack_response_delay: CoreDuration,
        nack_supression_duration: CoreDuration,
        timers: &TimerFactory,
    ) {
        let reader = data.remote_reader_guid;
        self.is_active = true;
        self.data = data;
        if self.is_reliable() {
            self.nack_supression = Some(timers.create(
                TimedEventKind::NackSupression {
                    writer: writer_guid,
                    reader,
                },
                nack_supression_duration,
            ));
            self.nack_response = Some(timers.create(
                TimedEventKind::NackResponseDelay {
                    writer: writer_guid,
                    reader,
                },
                nack_response_delay,
            ));
        }
        debug!(
            "ReaderProxy started\n\tWriter: {}\n\tReader: {}",
            writer_guid, reader
        );
    }

    /// back to the pool: timers are cancelled and every state is forgotten
    pub fn stop(&mut self) {
        self.is_active = false;
        self.nack_supression = None;
        self.nack_response = None;
        self.changes_for_reader.clear();
        self.changes_low_mark = SequenceNumber(0);
        self.last_acknack_count = 0;
        self.last_nackfrag_count = 0;
        self.data.remote_reader_guid = GUID::UNKNOW;
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn guid(&self) -> GUID {
        self.data.remote_reader_guid
    }

    pub fn data(&self) -> &ReaderProxyData {
        &self.data
    }

    pub fn update_data(&mut self, data: ReaderProxyData) {
        self.data = data;
    }

    pub fn is_reliable(&self) -> bool {
        self.data.qos.reliability().kind == ReliabilityQosKind::Reliable
    }

    pub fn durability(&self) -> Durability {
        self.data.qos.durability()
    }

    pub fn expects_inline_qos(&self) -> bool {
        self.data.expects_inline_qos
    }

    pub fn locators(&self) -> &[Locator] {
        self.data.locators()
    }

    pub fn changes_low_mark(&self) -> SequenceNumber {
        self.changes_low_mark
    }

    /// track a change written after the ones already tracked
    pub fn add_change(&mut self, change: ChangeForReader, restart_nack_supression: bool) {
        if restart_nack_supression {
            self.restart_nack_supression();
        }
        if change.seq_num <= self.changes_low_mark {
            return;
        }
        // best-effort Readers acknowledge on send
        if change.status == ChangeForReaderStatusKind::Acknowledged {
            if self.changes_for_reader.is_empty()
                && change.seq_num == self.changes_low_mark + SequenceNumber(1)
            {
                self.changes_low_mark = change.seq_num;
            }
            return;
        }
        self.changes_for_reader.insert(change.seq_num, change);
    }

    pub fn has_changes(&self) -> bool {
        !self.changes_for_reader.is_empty()
    }

    pub fn change_is_acked(&self, seq_num: SequenceNumber) -> bool {
        if seq_num <= self.changes_low_mark {
            return true;
        }
        match self.changes_for_reader.get(&seq_num) {
            Some(c) => !c.is_relevant || c.status == ChangeForReaderStatusKind::Acknowledged,
            // a hole left by a removed change
            None => true,
        }
    }

    pub fn status_of(&self, seq_num: SequenceNumber) -> Option<ChangeForReaderStatusKind> {
        if seq_num <= self.changes_low_mark {
            return Some(ChangeForReaderStatusKind::Acknowledged);
        }
        self.changes_for_reader.get(&seq_num).map(|c| c.status)
    }

    pub fn change_for_reader(&self, seq_num: SequenceNumber) -> Option<&ChangeForReader> {
        self.changes_for_reader.get(&seq_num)
    }

    pub fn changes(&self) -> impl Iterator<Item = &ChangeForReader> {
        self.changes_for_reader.values()
    }

    /// sequence numbers tracked with `status`, in order
    pub fn changes_with_status(
        &self,
        status: ChangeForReaderStatusKind,
    ) -> impl Iterator<Item = &ChangeForReader> + '_ {
        self.changes_for_reader
            .values()
            .filter(move |c| c.status == status)
    }

    /// every change below `base` is acknowledged, true when the low mark moved
    pub fn acked_changes_set(&mut self, base: SequenceNumber) -> bool {
        let future_low_mark = base - SequenceNumber(1);
        if future_low_mark <= self.changes_low_mark {
            return false;
        }
        self.changes_for_reader = self.changes_for_reader.split_off(&base);
        self.changes_low_mark = future_low_mark;
        self.advance_low_mark();
        true
    }

    /// Marks `seq_num_set` REQUESTED.
    ///
    /// Returns whether any change was marked and the requested sequence
    /// numbers this proxy does not track (removed or never relevant).
    pub fn requested_changes_set(
        &mut self,
        seq_num_set: &[SequenceNumber],
    ) -> (bool, Vec<SequenceNumber>) {
        let mut some_requested = false;
        let mut untracked = Vec::new();
        for seq_num in seq_num_set {
            if *seq_num <= self.changes_low_mark {
                continue;
            }
            match self.changes_for_reader.get_mut(seq_num) {
                Some(c) => match c.status {
                    ChangeForReaderStatusKind::Unacknowledged
                    | ChangeForReaderStatusKind::Underway => {
                        c.status = ChangeForReaderStatusKind::Requested;
                        c.mark_all_fragments_as_unsent();
                        some_requested = true;
                    }
                    ChangeForReaderStatusKind::Requested => some_requested = true,
                    _ => (),
                },
                None => untracked.push(*seq_num),
            }
        }
        if some_requested {
            trace!(
                "requested changes {:?}\n\tReader: {}",
                seq_num_set,
                self.guid()
            );
        }
        (some_requested, untracked)
    }

    pub fn set_change_to_status(
        &mut self,
        seq_num: SequenceNumber,
        status: ChangeForReaderStatusKind,
        restart_nack_supression: bool,
    ) -> bool {
        if restart_nack_supression && self.is_reliable() {
            self.restart_nack_supression();
        }
        if seq_num <= self.changes_low_mark {
            return false;
        }
        let status = if status == ChangeForReaderStatusKind::Underway && !self.is_reliable() {
            ChangeForReaderStatusKind::Acknowledged
        } else {
            status
        };
        let change = match self.changes_for_reader.get_mut(&seq_num) {
            Some(c) => c,
            None => {
                if status == ChangeForReaderStatusKind::Acknowledged
                    && seq_num == self.changes_low_mark + SequenceNumber(1)
                {
                    self.changes_low_mark = seq_num;
                    self.advance_low_mark();
                    return true;
                }
                return false;
            }
        };
        let allowed = match (change.status, status) {
            (current, next) if current == next => false,
            (ChangeForReaderStatusKind::Acknowledged, _) => false,
            (_, ChangeForReaderStatusKind::Acknowledged) => true,
            (ChangeForReaderStatusKind::Requested, ChangeForReaderStatusKind::Unsent) => true,
            (_, ChangeForReaderStatusKind::Unsent) => false,
            (ChangeForReaderStatusKind::Unsent, ChangeForReaderStatusKind::Requested) => false,
            _ => true,
        };
        if !allowed {
            return false;
        }
        change.status = status;
        if status == ChangeForReaderStatusKind::Acknowledged {
            self.advance_low_mark();
        }
        true
    }

    /// Some(true) when `fragment` was the last unsent one of the change
    pub fn mark_fragment_as_sent_for_change(
        &mut self,
        seq_num: SequenceNumber,
        fragment: FragmentNumber,
    ) -> Option<bool> {
        if seq_num <= self.changes_low_mark {
            return None;
        }
        self.changes_for_reader
            .get_mut(&seq_num)
            .map(|c| c.mark_fragment_as_sent(fragment))
    }

    /// UNDERWAY changes were not nacked in time, they may be requested again
    pub fn perform_nack_supression(&mut self) -> bool {
        if let Some(t) = self.nack_supression.as_mut() {
            t.on_fired();
        }
        self.convert_status_on_all_changes(
            ChangeForReaderStatusKind::Underway,
            ChangeForReaderStatusKind::Unacknowledged,
        )
    }

    /// REQUESTED changes are due for resending
    pub fn perform_acknack_response(&mut self) -> bool {
        if let Some(t) = self.nack_response.as_mut() {
            t.on_fired();
        }
        self.convert_status_on_all_changes(
            ChangeForReaderStatusKind::Requested,
            ChangeForReaderStatusKind::Unsent,
        )
    }

    fn convert_status_on_all_changes(
        &mut self,
        previous: ChangeForReaderStatusKind,
        next: ChangeForReaderStatusKind,
    ) -> bool {
        let mut modified = false;
        for c in self.changes_for_reader.values_mut() {
            if c.status == previous {
                c.status = next;
                modified = true;
            }
        }
        modified
    }

    /// the history dropped `seq_num`, its data can not be sent any more
    pub fn change_has_been_removed(&mut self, seq_num: SequenceNumber) {
        if let Some(c) = self.changes_for_reader.get_mut(&seq_num) {
            if c.status == ChangeForReaderStatusKind::Acknowledged {
                self.changes_for_reader.remove(&seq_num);
            } else {
                c.is_relevant = false;
            }
        }
    }

    pub fn has_unacknowledged(&self) -> bool {
        self.changes_for_reader.values().any(|c| {
            c.is_relevant
                && matches!(
                    c.status,
                    ChangeForReaderStatusKind::Underway
                        | ChangeForReaderStatusKind::Unacknowledged
                        | ChangeForReaderStatusKind::Requested
                )
        })
    }

    pub fn requested_fragment_set(
        &mut self,
        seq_num: SequenceNumber,
        fragments: &FragmentNumberSet,
    ) -> bool {
        let change = match self.changes_for_reader.get_mut(&seq_num) {
            Some(c) => c,
            None => return false,
        };
        for f in fragments.set() {
            if f.0 >= 1 && f.0 <= change.fragment_count {
                change.unsent_fragments.insert(f);
            }
        }
        // an UNSENT change goes out whole anyway
        if change.status != ChangeForReaderStatusKind::Unsent
            && change.status != ChangeForReaderStatusKind::Acknowledged
        {
            change.status = ChangeForReaderStatusKind::Requested;
        }
        true
    }

    pub fn process_nack_frag(
        &mut self,
        reader_guid: GUID,
        nack_count: Count,
        seq_num: SequenceNumber,
        fragments: &FragmentNumberSet,
    ) -> bool {
        if self.guid() != reader_guid || nack_count <= self.last_nackfrag_count {
            return false;
        }
        self.last_nackfrag_count = nack_count;
        self.requested_fragment_set(seq_num, fragments)
    }

    /// false for a count already seen, which makes the ACKNACK a duplicate
    pub fn check_and_set_acknack_count(&mut self, acknack_count: Count) -> bool {
        if acknack_count > self.last_acknack_count {
            self.last_acknack_count = acknack_count;
            true
        } else {
            false
        }
    }

    pub fn restart_nack_supression(&mut self) {
        if let Some(t) = self.nack_supression.as_mut() {
            t.restart_timer();
        }
    }

    /// arm the nack response timer unless it is already running
    pub fn start_nack_response(&mut self) {
        if let Some(t) = self.nack_response.as_mut() {
            if !t.is_armed() {
                t.restart_timer();
            }
        }
    }

    pub fn is_nack_response_armed(&self) -> bool {
        self.nack_response.as_ref().is_some_and(|t| t.is_armed())
    }

    // acknowledged changes right above the low mark leave the collection
    fn advance_low_mark(&mut self) {
        while let Some(entry) = self.changes_for_reader.first_entry() {
            let next = self.changes_low_mark + SequenceNumber(1);
            let c = entry.get();
            if c.seq_num == next && c.status == ChangeForReaderStatusKind::Acknowledged {
                entry.remove();
                self.changes_low_mark = next;
            } else {
                break;
            }
        }
    }
}

/// Reader side state of one matched remote Writer.
///
/// Every sequence number at or below `changes_low_mark` was received or is
/// lost. Above it `changes_from_writer` holds the RECEIVED and LOST ones,
/// what is not in there is MISSING up to `max_available` and UNKNOWN after.
pub struct WriterProxy {
    data: WriterProxyData,
    is_active: bool,
    changes_from_writer: BTreeMap<SequenceNumber, ChangeFromWriter>,
    changes_low_mark: SequenceNumber,
    max_available: SequenceNumber,
    last_heartbeat_count: Count,
    last_heartbeatfrag_count: Count,
    acknack_count: Count,
    nackfrag_count: Count,
    reply_locators: Option<Vec<Locator>>,
    heartbeat_response: Option<TimerHandle>,
    initial_acknack: Option<TimerHandle>,
}

impl Default for WriterProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterProxy {
    pub fn new() -> Self {
        Self {
            data: WriterProxyData::new(GUID::UNKNOW, Vec::new(), Vec::new(), WriterQos::default()),
            is_active: false,
            changes_from_writer: BTreeMap::new(),
            changes_low_mark: SequenceNumber(0),
            max_available: SequenceNumber(0),
            last_heartbeat_count: 0,
            last_heartbeatfrag_count: 0,
            acknack_count: 0,
            nackfrag_count: 0,
            reply_locators: None,
            heartbeat_response: None,
            initial_acknack: None,
        }
    }

    /// `initial_sequence`: the first sequence number this proxy cares about
    pub fn start(
        &mut self,
        data: WriterProxyData,
        reader_guid: GUID,
        initial_sequence: SequenceNumber,
        heartbeat_response_delay: CoreDuration,
        initial_acknack_delay: CoreDuration,
        timers: &TimerFactory,
    ) {
        let writer = data.remote_writer_guid;
        self.is_active = true;
        self.data = data;
        self.changes_low_mark = initial_sequence - SequenceNumber(1);
        self.max_available = self.changes_low_mark;
        self.heartbeat_response = Some(timers.create(
            TimedEventKind::HeartbeatResponseDelay {
                reader: reader_guid,
                writer,
            },
            heartbeat_response_delay,
        ));
        let mut initial_acknack = timers.create(
            TimedEventKind::InitialAckNack {
                reader: reader_guid,
                writer,
            },
            initial_acknack_delay,
        );
        initial_acknack.restart_timer();
        self.initial_acknack = Some(initial_acknack);
        debug!(
            "WriterProxy started\n\tReader: {}\n\tWriter: {}",
            reader_guid, writer
        );
    }

    pub fn stop(&mut self) {
        self.is_active = false;
        self.heartbeat_response = None;
        self.initial_acknack = None;
        self.changes_from_writer.clear();
        self.changes_low_mark = SequenceNumber(0);
        self.max_available = SequenceNumber(0);
        self.last_heartbeat_count = 0;
        self.last_heartbeatfrag_count = 0;
        self.reply_locators = None;
        self.data.remote_writer_guid = GUID::UNKNOW;
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn guid(&self) -> GUID {
        self.data.remote_writer_guid
    }

    pub fn data(&self) -> &WriterProxyData {
        &self.data
    }

    pub fn update_data(&mut self, data: WriterProxyData) {
        self.data = data;
    }

    /// where ACKNACKs go: the INFO_REPLY locators when the Writer sent any
    pub fn reply_locators(&self) -> &[Locator] {
        match &self.reply_locators {
            Some(l) if !l.is_empty() => l,
            _ => self.data.locators(),
        }
    }

    pub fn set_reply_locators(&mut self, locators: Vec<Locator>) {
        self.reply_locators = Some(locators);
    }

    /// every change up to the returned one was received or is lost
    pub fn available_changes_max(&self) -> SequenceNumber {
        self.changes_low_mark
    }

    pub fn status_of(&self, seq_num: SequenceNumber) -> ChangeFromWriterStatusKind {
        if seq_num <= self.changes_low_mark {
            return ChangeFromWriterStatusKind::Received;
        }
        match self.changes_from_writer.get(&seq_num) {
            Some(c) => c.status,
            None if seq_num <= self.max_available => ChangeFromWriterStatusKind::Missing,
            None => ChangeFromWriterStatusKind::Unknown,
        }
    }

    /// the Writer announced changes up to `last_available`
    pub fn missing_changes_update(&mut self, last_available: SequenceNumber) {
        if last_available > self.max_available {
            self.max_available = last_available;
        }
    }

    /// changes below `first_available` will never come, returns how many were lost
    pub fn lost_changes_update(&mut self, first_available: SequenceNumber) -> i64 {
        let future_low_mark = first_available - SequenceNumber(1);
        if future_low_mark <= self.changes_low_mark {
            return 0;
        }
        let kept = self.changes_from_writer.split_off(&first_available);
        let received_below = self.changes_from_writer.len() as i64;
        let lost = (future_low_mark - self.changes_low_mark).0 - received_below;
        self.changes_from_writer = kept;
        self.changes_low_mark = future_low_mark;
        if self.max_available < future_low_mark {
            self.max_available = future_low_mark;
        }
        self.advance_low_mark();
        lost
    }

    /// false when the change was already received
    pub fn received_change_set(&mut self, seq_num: SequenceNumber) -> bool {
        self.change_set(seq_num, true)
    }

    /// a GAP told `seq_num` is not meant for this Reader
    pub fn irrelevant_change_set(&mut self, seq_num: SequenceNumber) -> bool {
        self.change_set(seq_num, false)
    }

    fn change_set(&mut self, seq_num: SequenceNumber, is_relevant: bool) -> bool {
        if seq_num <= self.changes_low_mark || self.changes_from_writer.contains_key(&seq_num) {
            return false;
        }
        self.changes_from_writer.insert(
            seq_num,
            ChangeFromWriter::new(seq_num, ChangeFromWriterStatusKind::Received, is_relevant),
        );
        if seq_num > self.max_available {
            self.max_available = seq_num;
        }
        self.advance_low_mark();
        true
    }

    pub fn are_there_missing_changes(&self) -> bool {
        let total = (self.max_available - self.changes_low_mark).0;
        total > self.changes_from_writer.len() as i64
    }

    /// the ACKNACK set: base is the first not yet received change
    pub fn missing_changes(&self) -> SequenceNumberSet {
        let base = self.changes_low_mark + SequenceNumber(1);
        let window_end = core::cmp::min(
            self.max_available,
            base + SequenceNumber(SequenceNumberSet::MAX_BITS as i64 - 1),
        );
        let missing: Vec<SequenceNumber> = (base.0..=window_end.0)
            .map(SequenceNumber)
            .filter(|s| !self.changes_from_writer.contains_key(s))
            .collect();
        SequenceNumberSet::from_vec(base, missing)
    }

    /// false for a count already seen
    pub fn check_and_set_heartbeat_count(&mut self, count: Count) -> bool {
        if count > self.last_heartbeat_count {
            self.last_heartbeat_count = count;
            true
        } else {
            false
        }
    }

    pub fn check_and_set_heartbeatfrag_count(&mut self, count: Count) -> bool {
        if count > self.last_heartbeatfrag_count {
            self.last_heartbeatfrag_count = count;
            true
        } else {
            false
        }
    }

    pub fn next_acknack_count(&mut self) -> Count {
        self.acknack_count += 1;
        self.acknack_count
    }

    pub fn next_nackfrag_count(&mut self) -> Count {
        self.nackfrag_count += 1;
        self.nackfrag_count
    }

    /// arm the heartbeat response timer unless it is already running
    pub fn start_heartbeat_response(&mut self) {
        if let Some(t) = self.heartbeat_response.as_mut() {
            if !t.is_armed() {
                t.restart_timer();
            }
        }
    }

    pub fn on_heartbeat_response_fired(&mut self) {
        if let Some(t) = self.heartbeat_response.as_mut() {
            t.on_fired();
        }
    }

    /// the initial ACKNACK is not needed once the Writer spoke first
    pub fn cancel_initial_acknack(&mut self) {
        if let Some(t) = self.initial_acknack.as_mut() {
            t.cancel_timer();
        }
    }

    pub fn on_initial_acknack_fired(&mut self) {
        if let Some(t) = self.initial_acknack.as_mut() {
            t.on_fired();
        }
    }

    fn advance_low_mark(&mut self) {
        while let Some(entry) = self.changes_from_writer.first_entry() {
            if *entry.key() == self.changes_low_mark + SequenceNumber(1) {
                entry.remove();
                self.changes_low_mark += SequenceNumber(1);
            } else {
                break;
            }
        }
    }
}
