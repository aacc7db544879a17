//! Writer which keeps a ReaderProxy for every matched Reader
//!
//! Each matched Reader has its own record of every change the history holds,
//! so reliable Readers get what they request, and the Writer knows when every
//! Reader acknowledged a change.

use crate::dds::qos::{
    policy::{Durability, HistoryQosKind},
    WriterQos,
};
use crate::error::{RtpsError, RtpsResult};
use crate::message::message_group::RTPSMessageGroup;
use crate::message::submessage::element::{
    acknack::AckNack, nackfrag::NackFrag, Count, FragmentNumber, Locator, SequenceNumber,
    SequenceNumberSet, SerializedPayload, Timestamp,
};
use crate::rtps::cache::{
    CacheChange, ChangeForReader, ChangeForReaderStatusKind, ChangeKind, InstanceHandle,
};
use crate::rtps::collector::{
    gap_ranges, CollectorItem, RTPSWriterCollector, StatefulWriterOrganizer,
};
use crate::rtps::history::WriterHistory;
use crate::rtps::timed_event::{TimedEventKind, TimerHandle};
use crate::rtps::writer::{
    DataWriterStatusChanged, PublicationMatchedStatus, RtpsWriter, StatusNotifier,
    WriterAttributes, WriterContext, WriterIngredients, WriterMode,
};
use crate::structure::{
    EntityId, GuidPrefix, RTPSEntity, ReaderProxy, ReaderProxyData, TopicKind, GUID,
};
use log::{debug, error, info, trace, warn};
use std::time::Instant;

pub struct StatefulWriter {
    guid: GUID,
    topic_kind: TopicKind,
    qos: WriterQos,
    attributes: WriterAttributes,
    context: WriterContext,
    history: WriterHistory,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    matched_readers: Vec<ReaderProxy>,
    // stopped proxies waiting for the next match
    proxy_pool: Vec<ReaderProxy>,
    heartbeat_count: Count,
    heartbeat_frag_count: Count,
    periodic_heartbeat: TimerHandle,
    // ChangeReceivedByAll was reported up to here
    acked_by_all_up_to: SequenceNumber,
    total_matched: i32,
    notifier: StatusNotifier<DataWriterStatusChanged>,
}

// who a piece goes to once the Readers sharing it are merged
struct Destination {
    locators: Vec<Locator>,
    prefixes: Vec<GuidPrefix>,
    reader_id: EntityId,
    expects_inline_qos: bool,
}

// a tracked submessage of a send pass and the Readers it was for
enum SentUnit {
    Gap {
        readers: Vec<GUID>,
        seqs: Vec<SequenceNumber>,
    },
    Change {
        seq_num: SequenceNumber,
        fragment: Option<FragmentNumber>,
        readers: Vec<GUID>,
    },
}

fn destination_of(proxies: &[ReaderProxy], readers: &[GUID]) -> Destination {
    let mut locators = Vec::new();
    let mut prefixes = Vec::new();
    let mut expects_inline_qos = false;
    for proxy in proxies.iter().filter(|p| readers.contains(&p.guid())) {
        locators.extend_from_slice(proxy.locators());
        prefixes.push(proxy.guid().guid_prefix);
        expects_inline_qos |= proxy.expects_inline_qos();
    }
    locators.sort();
    locators.dedup();
    prefixes.sort();
    prefixes.dedup();
    let reader_id = match readers {
        [only] => only.entity_id,
        _ => EntityId::UNKNOW,
    };
    Destination {
        locators,
        prefixes,
        reader_id,
        expects_inline_qos,
    }
}

impl StatefulWriter {
    pub fn new(ingredients: WriterIngredients, context: WriterContext) -> Self {
        let qos = ingredients.qos;
        let attributes = ingredients.attributes;
        let guid = ingredients.guid;
        let periodic_heartbeat = context.timers.create(
            TimedEventKind::PeriodicHeartbeat { writer: guid },
            attributes.times.heartbeat_period.into(),
        );
        let proxy_pool = (0..attributes.max_matched_readers)
            .map(|_| ReaderProxy::new())
            .collect();
        debug!(
            "StatefulWriter created\n\tWriter: {}\n\treliable: {}",
            guid,
            qos.is_reliable()
        );
        Self {
            guid,
            topic_kind: ingredients.topic_kind,
            qos,
            attributes,
            context,
            history: WriterHistory::new(qos.history(), qos.resource_limits()),
            unicast_locator_list: ingredients.unicast_locator_list,
            multicast_locator_list: ingredients.multicast_locator_list,
            matched_readers: Vec::new(),
            proxy_pool,
            heartbeat_count: 0,
            heartbeat_frag_count: 0,
            periodic_heartbeat,
            acked_by_all_up_to: SequenceNumber::ZERO,
            total_matched: 0,
            notifier: StatusNotifier::new(ingredients.status_sender),
        }
    }

    pub fn topic_kind(&self) -> TopicKind {
        self.topic_kind
    }

    pub fn qos(&self) -> WriterQos {
        self.qos
    }

    pub fn attributes(&self) -> &WriterAttributes {
        &self.attributes
    }

    pub fn unicast_locator_list(&self) -> &[Locator] {
        &self.unicast_locator_list
    }

    pub fn multicast_locator_list(&self) -> &[Locator] {
        &self.multicast_locator_list
    }

    pub fn matched_readers_count(&self) -> usize {
        self.matched_readers.len()
    }

    pub fn reader_proxy(&self, reader_guid: GUID) -> Option<&ReaderProxy> {
        self.matched_readers.iter().find(|p| p.guid() == reader_guid)
    }

    pub fn is_periodic_heartbeat_armed(&self) -> bool {
        self.periodic_heartbeat.is_armed()
    }

    /// HEARTBEAT with the Liveliness flag to every matched reliable Reader
    pub fn assert_liveliness(&mut self) -> RtpsResult<()> {
        let readers: Vec<GUID> = self
            .matched_readers
            .iter()
            .filter(|p| p.is_reliable())
            .map(|p| p.guid())
            .collect();
        if readers.is_empty() {
            return Ok(());
        }
        trace!("assert liveliness\n\tWriter: {}", self.guid);
        self.send_heartbeat_to(&readers, true, true)
    }

    fn proxy_mut(&mut self, reader_guid: GUID) -> Option<&mut ReaderProxy> {
        self.matched_readers
            .iter_mut()
            .find(|p| p.guid() == reader_guid)
    }

    fn has_reliable_readers(&self) -> bool {
        self.matched_readers.iter().any(|p| p.is_reliable())
    }

    // make room for one change: what everybody has first, the oldest for KeepLast
    fn make_room(&mut self) -> RtpsResult<()> {
        let min = match self.history.get_min_change() {
            Some(c) => c.sequence_number,
            None => return Ok(()),
        };
        if self.is_acked_by_all(min) {
            self.remove_change(min);
            return Ok(());
        }
        match self.history.history_kind() {
            HistoryQosKind::KeepLast => {
                debug!(
                    "history full, change {} leaves unacknowledged\n\tWriter: {}",
                    min, self.guid
                );
                self.remove_change(min);
                Ok(())
            }
            HistoryQosKind::KeepAll => {
                warn!(
                    "history full of unacknowledged changes\n\tWriter: {}",
                    self.guid
                );
                Err(RtpsError::HistoryFull)
            }
        }
    }

    // hand unsent changes to the sending side this Writer is configured with
    fn dispatch_unsent(&mut self, max_blocking_time_point: Option<Instant>) -> RtpsResult<()> {
        match self.attributes.mode {
            WriterMode::Synchronous => self.send_any_unsent_changes(max_blocking_time_point),
            WriterMode::Asynchronous => {
                match &self.context.async_waker {
                    Some(waker) => waker.wake(self.guid),
                    None => error!(
                        "asynchronous Writer without async writer thread\n\tWriter: {}",
                        self.guid
                    ),
                }
                Ok(())
            }
        }
    }

    // first HEARTBEAT after a match is sent initial_heartbeat_delay later
    fn arm_periodic_heartbeat(&mut self) {
        if !self.qos.is_reliable() || self.periodic_heartbeat.is_armed() {
            return;
        }
        let period = self.periodic_heartbeat.interval();
        self.periodic_heartbeat
            .update_interval(self.attributes.times.initial_heartbeat_delay.into());
        self.periodic_heartbeat.restart_timer();
        self.periodic_heartbeat.update_interval(period);
    }

    fn send_heartbeat_to(
        &mut self,
        readers: &[GUID],
        is_final: bool,
        liveliness: bool,
    ) -> RtpsResult<()> {
        let context = self.context.clone();
        let mut group =
            context.message_group(self.guid.guid_prefix, self.attributes.max_message_size, None)?;
        let destination = destination_of(&self.matched_readers, readers);
        group.set_destination(&destination.locators, &destination.prefixes)?;
        self.heartbeat_count += 1;
        group.add_heartbeat(
            self.guid.entity_id,
            destination.reader_id,
            self.history.seq_num_min(),
            self.history.seq_num_max(),
            self.heartbeat_count,
            is_final,
            liveliness,
        )?;
        group.flush()
    }

    fn send_gap_to(&mut self, reader: GUID, seqs: &[SequenceNumber]) -> RtpsResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let context = self.context.clone();
        let mut group =
            context.message_group(self.guid.guid_prefix, self.attributes.max_message_size, None)?;
        let destination = destination_of(&self.matched_readers, &[reader]);
        group.set_destination(&destination.locators, &destination.prefixes)?;
        for (gap_start, gap_list) in gap_ranges(seqs) {
            group.add_gap(self.guid.entity_id, reader.entity_id, gap_start, gap_list)?;
        }
        group.flush()
    }

    // what a newly matched reliable Reader learns at once: the GAPs of what it
    // will never get and the range of what it can request
    fn send_initial(&mut self, reader: GUID) -> RtpsResult<()> {
        let irrelevant: Vec<SequenceNumber> = match self.proxy_mut(reader) {
            Some(proxy) => proxy
                .changes()
                .filter(|c| !c.is_relevant)
                .map(|c| c.seq_num)
                .collect(),
            None => return Ok(()),
        };
        self.send_gap_to(reader, &irrelevant)?;
        if let Some(proxy) = self.proxy_mut(reader) {
            for seq_num in &irrelevant {
                proxy.set_change_to_status(*seq_num, ChangeForReaderStatusKind::Underway, false);
            }
        }
        self.send_heartbeat_to(&[reader], false, false)
    }

    fn send_periodic_heartbeat(&mut self) {
        let readers: Vec<GUID> = self
            .matched_readers
            .iter()
            .filter(|p| p.is_reliable() && p.has_unacknowledged())
            .map(|p| p.guid())
            .collect();
        if readers.is_empty() {
            trace!(
                "every change acknowledged, periodic heartbeat stops\n\tWriter: {}",
                self.guid
            );
            return;
        }
        if let Err(e) = self.send_heartbeat_to(&readers, false, false) {
            warn!("periodic heartbeat failed: {}\n\tWriter: {}", e, self.guid);
        }
        self.periodic_heartbeat.restart_timer();
    }

    fn add_gaps_to(
        &self,
        group: &mut RTPSMessageGroup<'_>,
        organizer: StatefulWriterOrganizer,
        units: &mut Vec<SentUnit>,
        dropped: &mut Vec<usize>,
    ) -> RtpsResult<()> {
        for (readers, seqs) in organizer.groups() {
            let destination = destination_of(&self.matched_readers, &readers);
            group.set_destination(&destination.locators, &destination.prefixes)?;
            for (gap_start, gap_list) in gap_ranges(&seqs) {
                let covered: Vec<SequenceNumber> = seqs
                    .iter()
                    .copied()
                    .filter(|s| (*s >= gap_start && *s < gap_list.base()) || gap_list.contains(*s))
                    .collect();
                let unit = SentUnit::Gap {
                    readers: readers.clone(),
                    seqs: covered,
                };
                match group.add_gap(self.guid.entity_id, destination.reader_id, gap_start, gap_list)
                {
                    Ok(()) => group.track(units.len()),
                    Err(RtpsError::Timeout) => return Err(RtpsError::Timeout),
                    Err(e) => {
                        warn!("GAP from {} not sent: {}\n\tWriter: {}", gap_start, e, self.guid);
                        dropped.push(units.len());
                    }
                }
                units.push(unit);
            }
        }
        Ok(())
    }

    fn add_changes_to(
        &mut self,
        group: &mut RTPSMessageGroup<'_>,
        items: Vec<CollectorItem<GUID>>,
        units: &mut Vec<SentUnit>,
        dropped: &mut Vec<usize>,
    ) -> RtpsResult<()> {
        let piggyback_threshold = self.attributes.heartbeat_piggyback_threshold;
        // a HEARTBEAT rides at most once in every datagram
        let mut piggybacked_in: Option<usize> = None;
        for item in items {
            let change = match self.history.get_change(item.seq_num) {
                Some(c) => c,
                None => continue,
            };
            let destination = destination_of(&self.matched_readers, &item.destinations);
            group.set_destination(&destination.locators, &destination.prefixes)?;
            let added = match item.fragment {
                Some(fragment) => group.add_data_frag(
                    change,
                    fragment,
                    destination.reader_id,
                    destination.expects_inline_qos,
                ),
                None => group.add_data(
                    change,
                    destination.reader_id,
                    destination.expects_inline_qos,
                ),
            };
            match added {
                Ok(()) => group.track(units.len()),
                Err(RtpsError::Timeout) => return Err(RtpsError::Timeout),
                Err(e) => {
                    error!(
                        "change {} not sent: {}\n\tWriter: {}",
                        item.seq_num, e, self.guid
                    );
                    dropped.push(units.len());
                }
            }
            units.push(SentUnit::Change {
                seq_num: item.seq_num,
                fragment: item.fragment,
                readers: item.destinations,
            });

            let due = (piggyback_threshold > 0 && group.current_size() >= piggyback_threshold)
                || self.history.is_full();
            if due && self.qos.is_reliable() && piggybacked_in != Some(group.sent_datagrams()) {
                self.heartbeat_count += 1;
                group.add_heartbeat(
                    self.guid.entity_id,
                    destination.reader_id,
                    self.history.seq_num_min(),
                    self.history.seq_num_max(),
                    self.heartbeat_count,
                    false,
                    false,
                )?;
                piggybacked_in = Some(group.sent_datagrams());
            }
        }
        Ok(())
    }

    fn mark_unit_sent(&mut self, unit: &SentUnit) {
        match unit {
            SentUnit::Gap { readers, seqs } => {
                for proxy in self
                    .matched_readers
                    .iter_mut()
                    .filter(|p| readers.contains(&p.guid()))
                {
                    for seq_num in seqs {
                        proxy.set_change_to_status(
                            *seq_num,
                            ChangeForReaderStatusKind::Underway,
                            false,
                        );
                    }
                }
            }
            SentUnit::Change {
                seq_num,
                fragment,
                readers,
            } => {
                for proxy in self
                    .matched_readers
                    .iter_mut()
                    .filter(|p| readers.contains(&p.guid()))
                {
                    let whole = match fragment {
                        Some(fragment) => {
                            proxy.mark_fragment_as_sent_for_change(*seq_num, *fragment)
                                == Some(true)
                        }
                        None => true,
                    };
                    if whole {
                        proxy.set_change_to_status(
                            *seq_num,
                            ChangeForReaderStatusKind::Underway,
                            true,
                        );
                    }
                }
            }
        }
    }

    // after acknowledgements moved: report and (volatile) forget what everybody has
    fn on_acks_changed(&mut self) {
        if self.matched_readers.is_empty() {
            return;
        }
        let newly_acked: Vec<SequenceNumber> = self
            .history
            .sequence_numbers()
            .filter(|s| *s > self.acked_by_all_up_to)
            .take_while(|s| self.is_acked_by_all(*s))
            .collect();
        for seq_num in newly_acked {
            self.acked_by_all_up_to = seq_num;
            trace!(
                "change {} acknowledged by all Readers\n\tWriter: {}",
                seq_num,
                self.guid
            );
            self.notifier
                .notify(self.guid, DataWriterStatusChanged::ChangeReceivedByAll(seq_num));
        }
        if self.qos.durability() == Durability::Volatile {
            self.try_remove_acked();
        }
    }

    /// remove every change all matched Readers acknowledged
    pub fn try_remove_acked(&mut self) -> usize {
        let acked: Vec<SequenceNumber> = self
            .history
            .sequence_numbers()
            .take_while(|s| self.is_acked_by_all(*s))
            .collect();
        for seq_num in &acked {
            self.remove_change(*seq_num);
        }
        acked.len()
    }
}

impl RTPSEntity for StatefulWriter {
    fn guid(&self) -> GUID {
        self.guid
    }
}

impl RtpsWriter for StatefulWriter {
    fn write(
        &mut self,
        kind: ChangeKind,
        data: Option<SerializedPayload>,
        handle: InstanceHandle,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<SequenceNumber> {
        let mut change = CacheChange::new(
            kind,
            self.guid,
            SequenceNumber::ZERO,
            Timestamp::now().unwrap_or(Timestamp::TIME_INVALID),
            data,
            handle,
        );
        change.set_fragment_size(self.attributes.effective_fragment_size());
        let fragment_count = change.fragment_count();
        if self.history.is_full() {
            self.make_room()?;
        }
        let seq_num = self.history.add_change(change)?;
        let push_mode = self.attributes.push_mode;
        for proxy in self.matched_readers.iter_mut() {
            let status = if push_mode || !proxy.is_reliable() {
                ChangeForReaderStatusKind::Unsent
            } else {
                ChangeForReaderStatusKind::Unacknowledged
            };
            proxy.add_change(
                ChangeForReader::new(seq_num, status, true, fragment_count),
                false,
            );
        }
        trace!(
            "change {} written ({:?}, {} fragments)\n\tWriter: {}",
            seq_num,
            kind,
            fragment_count,
            self.guid
        );
        let sent = self.dispatch_unsent(max_blocking_time_point);
        if self.has_reliable_readers() {
            self.arm_periodic_heartbeat();
        }
        match sent {
            Ok(()) => Ok(seq_num),
            Err(RtpsError::Timeout) => Err(RtpsError::Timeout),
            Err(e) => {
                // the change stays UNSENT and leaves with the next send
                warn!(
                    "change {} not sent yet: {}\n\tWriter: {}",
                    seq_num, e, self.guid
                );
                Ok(seq_num)
            }
        }
    }

    fn send_any_unsent_changes(
        &mut self,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<()> {
        let mut collector = RTPSWriterCollector::new();
        let mut organizer = StatefulWriterOrganizer::new();
        for proxy in &self.matched_readers {
            for c in proxy.changes_with_status(ChangeForReaderStatusKind::Unsent) {
                match self.history.get_change(c.seq_num) {
                    Some(change) if c.is_relevant => {
                        if change.is_fragmented() {
                            for fragment in &c.unsent_fragments {
                                collector.add(c.seq_num, Some(*fragment), proxy.guid());
                            }
                        } else {
                            collector.add(c.seq_num, None, proxy.guid());
                        }
                    }
                    _ => organizer.add(proxy.guid(), c.seq_num),
                }
            }
        }
        if collector.is_empty() && organizer.is_empty() {
            return Ok(());
        }

        let context = self.context.clone();
        let mut group = context.message_group(
            self.guid.guid_prefix,
            self.attributes.max_message_size,
            max_blocking_time_point,
        )?;
        let mut units = Vec::new();
        let mut dropped = Vec::new();
        let result = self
            .add_gaps_to(&mut group, organizer, &mut units, &mut dropped)
            .and_then(|()| {
                self.add_changes_to(&mut group, collector.into_items(), &mut units, &mut dropped)
            })
            .and_then(|()| group.flush());
        let flushed = group.take_flushed();
        drop(group);

        // only what left (or can never leave) moves on from UNSENT
        for i in flushed.into_iter().chain(dropped) {
            self.mark_unit_sent(&units[i]);
        }
        if let Err(RtpsError::Timeout) = result {
            debug!(
                "send stopped at the blocking deadline, the rest stays unsent\n\tWriter: {}",
                self.guid
            );
        }
        self.on_acks_changed();
        result
    }

    fn matched_reader_add(&mut self, data: ReaderProxyData) -> RtpsResult<()> {
        let reader_guid = data.remote_reader_guid;
        if let Err(msg) = data.qos.is_compatible(&self.qos) {
            warn!(
                "Reader is not compatible with Writer: {}\n\tWriter: {}\n\tReader: {}",
                msg, self.guid, reader_guid
            );
            return Err(RtpsError::InvalidArgument(msg));
        }
        let writer_guid = self.guid;
        if let Some(proxy) = self.proxy_mut(reader_guid) {
            debug!(
                "matched Reader updated\n\tWriter: {}\n\tReader: {}",
                writer_guid, reader_guid
            );
            proxy.update_data(data);
            return Ok(());
        }
        let max = self.attributes.max_matched_readers;
        if max != 0 && self.matched_readers.len() >= max {
            warn!(
                "no room for one more matched Reader, {} already\n\tWriter: {}\n\tReader: {}",
                max, self.guid, reader_guid
            );
            return Err(RtpsError::ResourceExhausted(format!(
                "{} matched readers",
                max
            )));
        }

        let mut proxy = self.proxy_pool.pop().unwrap_or_default();
        proxy.start(
            data,
            self.guid,
            self.attributes.times.nack_response_delay.into(),
            self.attributes.times.nack_supression_duration.into(),
            &self.context.timers,
        );
        let relevant = proxy.durability() >= Durability::TransientLocal
            && self.qos.durability() == Durability::TransientLocal;
        let reliable = proxy.is_reliable();
        for change in self.history.iter() {
            let status = if relevant && reliable {
                ChangeForReaderStatusKind::Unacknowledged
            } else {
                ChangeForReaderStatusKind::Unsent
            };
            proxy.add_change(
                ChangeForReader::new(
                    change.sequence_number,
                    status,
                    relevant,
                    change.fragment_count(),
                ),
                false,
            );
        }
        let has_unsent = proxy
            .changes_with_status(ChangeForReaderStatusKind::Unsent)
            .next()
            .is_some();
        self.matched_readers.push(proxy);
        self.total_matched += 1;

        info!(
            "Writer matched with Reader\n\tWriter: {}\n\tReader: {}",
            self.guid, reader_guid
        );
        self.notifier.notify(
            self.guid,
            DataWriterStatusChanged::PublicationMatched(PublicationMatchedStatus::new(
                self.total_matched,
                1,
                self.matched_readers.len() as i32,
                1,
                reader_guid,
            )),
        );

        if reliable {
            if let Err(e) = self.send_initial(reader_guid) {
                warn!(
                    "initial HEARTBEAT not sent: {}\n\tWriter: {}\n\tReader: {}",
                    e, self.guid, reader_guid
                );
            }
            self.arm_periodic_heartbeat();
        } else if has_unsent {
            if let Err(e) = self.dispatch_unsent(None) {
                warn!("unsent changes not sent: {}\n\tWriter: {}", e, self.guid);
            }
        }
        Ok(())
    }

    fn matched_reader_remove(&mut self, reader_guid: GUID) -> bool {
        let index = match self
            .matched_readers
            .iter()
            .position(|p| p.guid() == reader_guid)
        {
            Some(i) => i,
            None => return false,
        };
        let mut proxy = self.matched_readers.swap_remove(index);
        proxy.stop();
        self.proxy_pool.push(proxy);
        info!(
            "Writer unmatched Reader\n\tWriter: {}\n\tReader: {}",
            self.guid, reader_guid
        );
        self.notifier.notify(
            self.guid,
            DataWriterStatusChanged::PublicationMatched(PublicationMatchedStatus::new(
                self.total_matched,
                0,
                self.matched_readers.len() as i32,
                -1,
                reader_guid,
            )),
        );
        self.on_acks_changed();
        true
    }

    fn matched_reader_is_matched(&self, reader_guid: GUID) -> bool {
        self.reader_proxy(reader_guid).is_some()
    }

    fn process_acknack(&mut self, reader_guid: GUID, acknack: &AckNack, is_final: bool) -> bool {
        if acknack.writer_id != self.guid.entity_id && acknack.writer_id != EntityId::UNKNOW {
            return false;
        }
        let writer_guid = self.guid;
        let last_sequence_number = self.history.last_sequence_number();
        let proxy = match self.proxy_mut(reader_guid) {
            Some(p) => p,
            None => {
                trace!(
                    "ACKNACK from unmatched Reader\n\tWriter: {}\n\tReader: {}",
                    writer_guid,
                    reader_guid
                );
                return false;
            }
        };
        if !proxy.check_and_set_acknack_count(acknack.count) {
            trace!(
                "duplicate ACKNACK count {}\n\tWriter: {}\n\tReader: {}",
                acknack.count,
                writer_guid,
                reader_guid
            );
            return false;
        }
        proxy.acked_changes_set(acknack.reader_sn_state.base());
        let requested = acknack.reader_sn_state.set();
        let (some_requested, untracked) = proxy.requested_changes_set(&requested);
        if some_requested {
            proxy.start_nack_response();
        }
        // requested but gone before this Reader matched
        let unknown: Vec<SequenceNumber> = untracked
            .into_iter()
            .filter(|s| *s >= SequenceNumber(1) && *s <= last_sequence_number)
            .collect();
        if let Err(e) = self.send_gap_to(reader_guid, &unknown) {
            warn!(
                "GAP answering ACKNACK not sent: {}\n\tWriter: {}\n\tReader: {}",
                e, writer_guid, reader_guid
            );
        }
        if requested.is_empty() && !is_final {
            if let Err(e) = self.send_heartbeat_to(&[reader_guid], true, false) {
                warn!(
                    "HEARTBEAT answering ACKNACK not sent: {}\n\tWriter: {}\n\tReader: {}",
                    e, writer_guid, reader_guid
                );
            }
        }
        self.on_acks_changed();
        true
    }

    fn process_nack_frag(&mut self, reader_guid: GUID, nack_frag: &NackFrag) -> bool {
        if nack_frag.writer_id != self.guid.entity_id && nack_frag.writer_id != EntityId::UNKNOW {
            return false;
        }
        let seq_num = nack_frag.writer_sn;
        let proxy = match self.proxy_mut(reader_guid) {
            Some(p) => p,
            None => return false,
        };
        if !proxy.process_nack_frag(
            reader_guid,
            nack_frag.count,
            seq_num,
            &nack_frag.fragment_number_state,
        ) {
            return false;
        }
        proxy.start_nack_response();
        let last_fragment = match self.history.get_change(seq_num) {
            Some(c) if c.is_fragmented() => FragmentNumber(c.fragment_count()),
            _ => return true,
        };
        let context = self.context.clone();
        let sent = context
            .message_group(self.guid.guid_prefix, self.attributes.max_message_size, None)
            .and_then(|mut group| {
                let destination = destination_of(&self.matched_readers, &[reader_guid]);
                group.set_destination(&destination.locators, &destination.prefixes)?;
                self.heartbeat_frag_count += 1;
                group.add_heartbeat_frag(
                    self.guid.entity_id,
                    reader_guid.entity_id,
                    seq_num,
                    last_fragment,
                    self.heartbeat_frag_count,
                )?;
                group.flush()
            });
        if let Err(e) = sent {
            warn!(
                "HEARTBEAT_FRAG not sent: {}\n\tWriter: {}\n\tReader: {}",
                e, self.guid, reader_guid
            );
        }
        true
    }

    fn on_timed_event(&mut self, event: TimedEventKind) {
        match event {
            TimedEventKind::PeriodicHeartbeat { .. } => {
                self.periodic_heartbeat.on_fired();
                self.send_periodic_heartbeat();
            }
            TimedEventKind::NackResponseDelay { reader, .. } => {
                let resend = match self.proxy_mut(reader) {
                    Some(proxy) => proxy.perform_acknack_response(),
                    None => false,
                };
                if resend {
                    if let Err(e) = self.send_any_unsent_changes(None) {
                        warn!(
                            "requested changes not sent: {}\n\tWriter: {}\n\tReader: {}",
                            e, self.guid, reader
                        );
                    }
                }
            }
            TimedEventKind::NackSupression { reader, .. } => {
                if let Some(proxy) = self.proxy_mut(reader) {
                    proxy.perform_nack_supression();
                }
            }
            other => debug!("Writer got a Reader timer {:?}\n\tWriter: {}", other, self.guid),
        }
    }

    fn is_acked_by_all(&self, seq_num: SequenceNumber) -> bool {
        self.matched_readers
            .iter()
            .all(|p| p.change_is_acked(seq_num))
    }

    fn all_changes_acked(&self) -> bool {
        self.history
            .sequence_numbers()
            .all(|s| self.is_acked_by_all(s))
    }

    fn remove_change(&mut self, seq_num: SequenceNumber) -> bool {
        if self.history.remove_change(seq_num).is_none() {
            return false;
        }
        for proxy in self.matched_readers.iter_mut() {
            proxy.change_has_been_removed(seq_num);
        }
        true
    }

    fn history(&self) -> &WriterHistory {
        &self.history
    }

    fn mode(&self) -> WriterMode {
        self.attributes.mode
    }

    fn is_reliable(&self) -> bool {
        self.qos.is_reliable()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dds::qos::{
        policy::{History, Reliability, ResourceLimits},
        ReaderQosBuilder, WriterQosBuilder,
    };
    use crate::message::send_buffers::SendBuffersManager;
    use crate::message::submessage::{EntitySubmessage, SubMessage, SubMessageBody, SubMessageKind};
    use crate::message::submessage::element::{FragmentNumberSet, CDR_LE};
    use crate::network::transport::test_transport::RecordingTransport;
    use crate::rtps::timed_event::TimerFactory;
    use alloc::sync::Arc;
    use bytes::Bytes;
    use core::time::Duration as CoreDuration;
    use mio_extras::channel as mio_channel;

    fn writer_guid() -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([1; 12]),
            EntityId::new_writer(1, TopicKind::NoKey),
        )
    }

    fn reader_guid(key: u8) -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([key; 12]),
            EntityId::new_reader(1, TopicKind::NoKey),
        )
    }

    fn reader_data(key: u8, reliable: bool, durability: Durability) -> ReaderProxyData {
        let reliability = if reliable {
            Reliability::default_reliable()
        } else {
            Reliability::default_besteffort()
        };
        ReaderProxyData::new(
            reader_guid(key),
            vec![Locator::new_from_ipv4(7400 + key as u32, [127, 0, 0, 1])],
            Vec::new(),
            ReaderQosBuilder::new()
                .reliability(reliability)
                .durability(durability)
                .build(),
        )
    }

    struct Fixture {
        writer: StatefulWriter,
        transport: Arc<RecordingTransport>,
        statuses: mio_channel::Receiver<DataWriterStatusChanged>,
    }

    fn fixture(qos: WriterQos, attributes: WriterAttributes) -> Fixture {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, statuses) = mio_channel::channel();
        let context = WriterContext {
            transport: transport.clone(),
            send_buffers: SendBuffersManager::new(1, 65536, 0),
            security: None,
            timers: TimerFactory::detached(),
            async_waker: None,
        };
        let writer = StatefulWriter::new(
            WriterIngredients {
                guid: writer_guid(),
                topic_kind: TopicKind::NoKey,
                qos,
                attributes,
                unicast_locator_list: Vec::new(),
                multicast_locator_list: Vec::new(),
                status_sender: Some(sender),
            },
            context,
        );
        Fixture {
            writer,
            transport,
            statuses,
        }
    }

    fn keep_all_qos(durability: Durability) -> WriterQos {
        WriterQosBuilder::new()
            .durability(durability)
            .history(History {
                kind: HistoryQosKind::KeepAll,
                depth: 0,
            })
            .build()
    }

    fn payload(len: usize) -> Option<SerializedPayload> {
        Some(SerializedPayload::new(CDR_LE, Bytes::from(vec![3_u8; len])))
    }

    fn write(writer: &mut StatefulWriter, len: usize) -> SequenceNumber {
        writer
            .write(ChangeKind::Alive, payload(len), InstanceHandle::NIL, None)
            .unwrap()
    }

    fn acknack(base: i64, requested: &[i64], count: Count) -> AckNack {
        AckNack::new(
            EntityId::UNKNOW,
            writer_guid().entity_id,
            SequenceNumberSet::from_vec(
                SequenceNumber(base),
                requested.iter().map(|s| SequenceNumber(*s)).collect(),
            ),
            count,
        )
    }

    fn entity_submessages(sent: Vec<(Locator, SubMessage)>) -> Vec<EntitySubmessage> {
        sent.into_iter()
            .filter_map(|(_, s)| match s.body {
                SubMessageBody::Entity(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn data_seqs(submessages: &[EntitySubmessage]) -> Vec<i64> {
        submessages
            .iter()
            .filter_map(|s| match s {
                EntitySubmessage::Data(d, _) => Some(d.writer_sn.0),
                _ => None,
            })
            .collect()
    }

    fn heartbeats(submessages: &[EntitySubmessage]) -> Vec<(i64, i64)> {
        submessages
            .iter()
            .filter_map(|s| match s {
                EntitySubmessage::HeartBeat(h, _) => Some((h.first_sn.0, h.last_sn.0)),
                _ => None,
            })
            .collect()
    }

    fn gap_members(submessages: &[EntitySubmessage]) -> Vec<i64> {
        submessages
            .iter()
            .filter_map(|s| match s {
                EntitySubmessage::Gap(g, _) => Some(g.irrelevant_changes().map(|s| s.0).collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn empty_writer_announces_empty_range_to_new_reader() {
        let mut f = fixture(WriterQos::default(), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(heartbeats(&sent), vec![(1, 0)]);
        assert!(f.writer.is_periodic_heartbeat_armed());
        match f.statuses.try_recv().unwrap() {
            DataWriterStatusChanged::PublicationMatched(s) => {
                assert_eq!(s.current_count, 1);
                assert_eq!(s.guid, reader_guid(2));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn late_joiner_gets_history_only_when_transient_local() {
        let mut f = fixture(
            keep_all_qos(Durability::TransientLocal),
            WriterAttributes::default(),
        );
        for _ in 0..3 {
            write(&mut f.writer, 8);
        }
        assert_eq!(f.transport.datagrams(), 0);

        f.writer
            .matched_reader_add(reader_data(2, true, Durability::TransientLocal))
            .unwrap();
        let sent = entity_submessages(f.transport.take_submessages());
        assert!(data_seqs(&sent).is_empty());
        assert!(gap_members(&sent).is_empty());
        assert_eq!(heartbeats(&sent), vec![(1, 3)]);

        assert!(f.writer.process_acknack(reader_guid(2), &acknack(1, &[1, 2, 3], 1), false));
        assert!(f.writer.reader_proxy(reader_guid(2)).unwrap().is_nack_response_armed());
        f.writer.on_timed_event(TimedEventKind::NackResponseDelay {
            writer: writer_guid(),
            reader: reader_guid(2),
        });
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(data_seqs(&sent), vec![1, 2, 3]);

        // a volatile late joiner is told the history is not for it
        f.writer
            .matched_reader_add(reader_data(3, true, Durability::Volatile))
            .unwrap();
        let sent = entity_submessages(f.transport.take_submessages());
        assert!(data_seqs(&sent).is_empty());
        assert_eq!(gap_members(&sent), vec![1, 2, 3]);
        assert_eq!(heartbeats(&sent), vec![(1, 3)]);
    }

    #[test]
    fn transient_local_reader_acknowledges_whole_history() {
        let mut f = fixture(
            keep_all_qos(Durability::TransientLocal),
            WriterAttributes::default(),
        );
        for expected in 1..=5 {
            assert_eq!(write(&mut f.writer, 16), SequenceNumber(expected));
        }
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::TransientLocal))
            .unwrap();
        let proxy = f.writer.reader_proxy(reader_guid(2)).unwrap();
        for seq in 1..=5 {
            assert_eq!(
                proxy.status_of(SequenceNumber(seq)),
                Some(ChangeForReaderStatusKind::Unacknowledged)
            );
        }
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(heartbeats(&sent), vec![(1, 5)]);

        assert!(f.writer.process_acknack(reader_guid(2), &acknack(6, &[], 1), true));
        let proxy = f.writer.reader_proxy(reader_guid(2)).unwrap();
        assert_eq!(proxy.changes_low_mark(), SequenceNumber(5));
        for seq in 1..=5 {
            assert_eq!(
                proxy.status_of(SequenceNumber(seq)),
                Some(ChangeForReaderStatusKind::Acknowledged)
            );
        }
        // transient local keeps what everybody has
        assert_eq!(f.writer.history().len(), 5);
        assert!(f.writer.all_changes_acked());
    }

    #[test]
    fn duplicate_acknack_is_ignored() {
        let mut f = fixture(keep_all_qos(Durability::TransientLocal), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        write(&mut f.writer, 8);
        write(&mut f.writer, 8);
        f.transport.take();
        assert!(f.writer.process_acknack(reader_guid(2), &acknack(2, &[2], 4), false));
        let low_mark = f.writer.reader_proxy(reader_guid(2)).unwrap().changes_low_mark();
        assert!(!f.writer.process_acknack(reader_guid(2), &acknack(3, &[], 4), false));
        assert!(!f.writer.process_acknack(reader_guid(2), &acknack(3, &[], 3), false));
        let proxy = f.writer.reader_proxy(reader_guid(2)).unwrap();
        assert_eq!(proxy.changes_low_mark(), low_mark);
        assert_eq!(
            proxy.status_of(SequenceNumber(2)),
            Some(ChangeForReaderStatusKind::Requested)
        );
        // unmatched Readers and foreign Writers are not answered
        assert!(!f.writer.process_acknack(reader_guid(9), &acknack(3, &[], 5), false));
        let mut foreign = acknack(3, &[], 5);
        foreign.writer_id = EntityId::new_writer(7, TopicKind::NoKey);
        assert!(!f.writer.process_acknack(reader_guid(2), &foreign, false));
    }

    #[test]
    fn acknowledged_changes_are_reported_and_volatile_history_forgets_them() {
        let mut f = fixture(keep_all_qos(Durability::Volatile), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        assert!(matches!(
            f.statuses.try_recv(),
            Ok(DataWriterStatusChanged::PublicationMatched(_))
        ));
        write(&mut f.writer, 8);
        write(&mut f.writer, 8);
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(data_seqs(&sent), vec![1, 2]);
        assert!(!f.writer.all_changes_acked());

        assert!(f.writer.process_acknack(reader_guid(2), &acknack(3, &[], 1), true));
        assert!(f.writer.all_changes_acked());
        assert!(f.writer.history().is_empty());
        let mut acked = Vec::new();
        while let Ok(status) = f.statuses.try_recv() {
            if let DataWriterStatusChanged::ChangeReceivedByAll(seq) = status {
                acked.push(seq.0);
            }
        }
        assert_eq!(acked, vec![1, 2]);
        // a final ACKNACK without requests needs no answer
        assert_eq!(f.transport.datagrams(), 0);
    }

    #[test]
    fn keep_all_rejects_and_keep_last_evicts_unacknowledged() {
        let qos = WriterQosBuilder::new()
            .history(History {
                kind: HistoryQosKind::KeepAll,
                depth: 0,
            })
            .resource_limits(ResourceLimits {
                max_samples: 2,
                ..ResourceLimits::default()
            })
            .build();
        let mut f = fixture(qos, WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        write(&mut f.writer, 8);
        write(&mut f.writer, 8);
        assert!(matches!(
            f.writer
                .write(ChangeKind::Alive, payload(8), InstanceHandle::NIL, None),
            Err(RtpsError::HistoryFull)
        ));

        let qos = WriterQosBuilder::new()
            .history(History {
                kind: HistoryQosKind::KeepLast,
                depth: 2,
            })
            .build();
        let mut f = fixture(qos, WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        for _ in 0..3 {
            write(&mut f.writer, 8);
        }
        assert!(f.writer.history().get_change(SequenceNumber(1)).is_none());
        f.transport.take();

        // the evicted change is answered with GAP, never with DATA
        assert!(f.writer.process_acknack(reader_guid(2), &acknack(1, &[1, 2], 1), false));
        f.writer.on_timed_event(TimedEventKind::NackResponseDelay {
            writer: writer_guid(),
            reader: reader_guid(2),
        });
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(gap_members(&sent), vec![1]);
        assert_eq!(data_seqs(&sent), vec![2]);
    }

    #[test]
    fn fragmented_change_and_nack_frag() {
        let attributes = WriterAttributes {
            fragment_size: 100,
            ..WriterAttributes::default()
        };
        let mut f = fixture(keep_all_qos(Durability::Volatile), attributes);
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        f.transport.take();
        // 4 octets of encapsulation + 246 = 3 fragments
        let seq = write(&mut f.writer, 246);
        let sent = entity_submessages(f.transport.take_submessages());
        let fragments: Vec<u32> = sent
            .iter()
            .filter_map(|s| match s {
                EntitySubmessage::DataFrag(d, _) => Some(d.fragment_starting_num.0),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec![1, 2, 3]);
        assert_eq!(
            f.writer.reader_proxy(reader_guid(2)).unwrap().status_of(seq),
            Some(ChangeForReaderStatusKind::Underway)
        );

        let nack_frag = NackFrag {
            reader_id: reader_guid(2).entity_id,
            writer_id: writer_guid().entity_id,
            writer_sn: seq,
            fragment_number_state: FragmentNumberSet::from_vec(
                FragmentNumber(2),
                vec![FragmentNumber(2)],
            ),
            count: 1,
        };
        assert!(f.writer.process_nack_frag(reader_guid(2), &nack_frag));
        assert!(!f.writer.process_nack_frag(reader_guid(2), &nack_frag));
        let sent = entity_submessages(f.transport.take_submessages());
        match sent.as_slice() {
            [EntitySubmessage::HeartbeatFrag(h, _)] => {
                assert_eq!(h.writer_sn, seq);
                assert_eq!(h.last_fragment_num, FragmentNumber(3));
            }
            other => panic!("HEARTBEAT_FRAG expected, got {:?}", other.len()),
        }
        f.writer.on_timed_event(TimedEventKind::NackResponseDelay {
            writer: writer_guid(),
            reader: reader_guid(2),
        });
        let resent: Vec<u32> = entity_submessages(f.transport.take_submessages())
            .iter()
            .filter_map(|s| match s {
                EntitySubmessage::DataFrag(d, _) => Some(d.fragment_starting_num.0),
                _ => None,
            })
            .collect();
        assert_eq!(resent, vec![2]);
    }

    #[test]
    fn matching_checks_compatibility_and_pool_bound() {
        let attributes = WriterAttributes {
            max_matched_readers: 1,
            ..WriterAttributes::default()
        };
        let mut f = fixture(WriterQos::default(), attributes);
        assert!(matches!(
            f.writer
                .matched_reader_add(reader_data(2, true, Durability::TransientLocal)),
            Err(RtpsError::InvalidArgument(_))
        ));
        f.writer
            .matched_reader_add(reader_data(2, false, Durability::Volatile))
            .unwrap();
        // matching again only updates
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        assert!(matches!(
            f.writer
                .matched_reader_add(reader_data(3, true, Durability::Volatile)),
            Err(RtpsError::ResourceExhausted(_))
        ));
        assert!(f.writer.matched_reader_remove(reader_guid(2)));
        assert!(!f.writer.matched_reader_is_matched(reader_guid(2)));
        f.writer
            .matched_reader_add(reader_data(3, true, Durability::Volatile))
            .unwrap();
        assert_eq!(f.writer.matched_readers_count(), 1);
    }

    #[test]
    fn periodic_heartbeat_stops_once_everything_is_acked() {
        let mut f = fixture(keep_all_qos(Durability::TransientLocal), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        write(&mut f.writer, 8);
        f.transport.take();
        let fire = TimedEventKind::PeriodicHeartbeat {
            writer: writer_guid(),
        };
        f.writer.on_timed_event(fire);
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(heartbeats(&sent), vec![(1, 1)]);
        assert!(f.writer.is_periodic_heartbeat_armed());

        assert!(f.writer.process_acknack(reader_guid(2), &acknack(2, &[], 1), true));
        f.writer.on_timed_event(fire);
        assert_eq!(f.transport.datagrams(), 0);
        assert!(!f.writer.is_periodic_heartbeat_armed());
        assert_eq!(
            f.writer.periodic_heartbeat.interval(),
            CoreDuration::from_secs(3)
        );
    }

    #[test]
    fn best_effort_reader_gets_data_once() {
        let mut f = fixture(keep_all_qos(Durability::TransientLocal), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, false, Durability::Volatile))
            .unwrap();
        write(&mut f.writer, 8);
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(data_seqs(&sent), vec![1]);
        assert!(heartbeats(&sent).is_empty());
        assert!(f.writer.is_acked_by_all(SequenceNumber(1)));
        f.writer.send_any_unsent_changes(None).unwrap();
        assert_eq!(f.transport.datagrams(), 0);
    }

    fn unsent_to(writer: &StatefulWriter, key: u8) -> Vec<i64> {
        writer
            .reader_proxy(reader_guid(key))
            .unwrap()
            .changes_with_status(ChangeForReaderStatusKind::Unsent)
            .map(|c| c.seq_num.0)
            .collect()
    }

    #[test]
    fn changes_cut_off_by_the_deadline_stay_unsent() {
        let attributes = WriterAttributes {
            mode: WriterMode::Asynchronous,
            fragment_size: u16::MAX,
            ..WriterAttributes::default()
        };
        let mut f = fixture(keep_all_qos(Durability::Volatile), attributes);
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        f.transport.take();
        // two DATA which do not share a datagram
        write(&mut f.writer, 40000);
        write(&mut f.writer, 40000);
        assert_eq!(unsent_to(&f.writer, 2), vec![1, 2]);

        *f.transport.delay.lock() = Some(CoreDuration::from_millis(30));
        let deadline = Instant::now() + CoreDuration::from_millis(20);
        assert!(matches!(
            f.writer.send_any_unsent_changes(Some(deadline)),
            Err(RtpsError::Timeout)
        ));
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(data_seqs(&sent), vec![1]);
        assert_eq!(unsent_to(&f.writer, 2), vec![2]);

        *f.transport.delay.lock() = None;
        f.writer.send_any_unsent_changes(None).unwrap();
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(data_seqs(&sent), vec![2]);
        assert!(unsent_to(&f.writer, 2).is_empty());
    }

    #[test]
    fn write_past_its_deadline_reports_timeout_and_keeps_the_change() {
        let mut f = fixture(keep_all_qos(Durability::Volatile), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        f.transport.take();
        let deadline = Instant::now() - CoreDuration::from_millis(1);
        assert!(matches!(
            f.writer
                .write(ChangeKind::Alive, payload(8), InstanceHandle::NIL, Some(deadline)),
            Err(RtpsError::Timeout)
        ));
        assert_eq!(f.transport.datagrams(), 0);
        assert_eq!(unsent_to(&f.writer, 2), vec![1]);

        write(&mut f.writer, 8);
        let sent = entity_submessages(f.transport.take_submessages());
        assert_eq!(data_seqs(&sent), vec![1, 2]);
    }

    #[test]
    fn liveliness_heartbeat_is_final() {
        let mut f = fixture(WriterQos::default(), WriterAttributes::default());
        f.writer
            .matched_reader_add(reader_data(2, true, Durability::Volatile))
            .unwrap();
        f.transport.take();
        f.writer.assert_liveliness().unwrap();
        let sent = f.transport.take_submessages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1.header.get_submessagekind(), SubMessageKind::HEARTBEAT);
        match &sent[1].1.body {
            SubMessageBody::Entity(EntitySubmessage::HeartBeat(_, flags)) => {
                use crate::message::submessage::submessage_flag::HeartbeatFlag;
                assert!(flags.contains(HeartbeatFlag::Liveliness));
                assert!(flags.contains(HeartbeatFlag::Final));
            }
            _ => panic!("HEARTBEAT expected"),
        }
    }
}
