//! best-effort Writer which only knows where its Readers listen

use crate::dds::qos::{
    policy::{Durability, HistoryQosKind},
    WriterQos,
};
use crate::error::{RtpsError, RtpsResult};
use crate::message::message_group::RTPSMessageGroup;
use crate::message::submessage::element::{
    acknack::AckNack, nackfrag::NackFrag, Locator, SequenceNumber, SerializedPayload, Timestamp,
};
use crate::rtps::cache::{CacheChange, ChangeKind, InstanceHandle};
use crate::rtps::collector::{CollectorItem, RTPSWriterCollector};
use crate::rtps::history::WriterHistory;
use crate::rtps::reader_locator::ReaderLocator;
use crate::rtps::timed_event::TimedEventKind;
use crate::rtps::writer::{
    DataWriterStatusChanged, PublicationMatchedStatus, RtpsWriter, StatusNotifier,
    WriterAttributes, WriterContext, WriterIngredients, WriterMode,
};
use crate::structure::{EntityId, GuidPrefix, RTPSEntity, ReaderProxyData, TopicKind, GUID};
use alloc::collections::{BTreeMap, BTreeSet};
use log::{debug, error, info, trace, warn};
use std::time::Instant;

pub struct StatelessWriter {
    guid: GUID,
    topic_kind: TopicKind,
    qos: WriterQos,
    attributes: WriterAttributes,
    context: WriterContext,
    history: WriterHistory,
    reader_locators: Vec<ReaderLocator>,
    matched_readers: BTreeMap<GUID, ReaderProxyData>,
    total_matched: i32,
    notifier: StatusNotifier<DataWriterStatusChanged>,
}

impl StatelessWriter {
    pub fn new(ingredients: WriterIngredients, context: WriterContext) -> Self {
        debug!("StatelessWriter created\n\tWriter: {}", ingredients.guid);
        Self {
            guid: ingredients.guid,
            topic_kind: ingredients.topic_kind,
            qos: ingredients.qos,
            attributes: ingredients.attributes,
            context,
            history: WriterHistory::new(
                ingredients.qos.history(),
                ingredients.qos.resource_limits(),
            ),
            reader_locators: Vec::new(),
            matched_readers: BTreeMap::new(),
            total_matched: 0,
            notifier: StatusNotifier::new(ingredients.status_sender),
        }
    }

    pub fn topic_kind(&self) -> TopicKind {
        self.topic_kind
    }

    pub fn reader_locators(&self) -> &[ReaderLocator] {
        &self.reader_locators
    }

    pub fn reader_locator(&self, locator: Locator) -> Option<&ReaderLocator> {
        self.reader_locators.iter().find(|l| l.locator() == locator)
    }

    /// a destination without a known Reader, kept until removed by hand
    pub fn reader_locator_add(&mut self, locator: Locator, expects_inline_qos: bool) -> bool {
        if self.reader_locator(locator).is_some() {
            return false;
        }
        self.reader_locators
            .push(ReaderLocator::new_pinned(locator, expects_inline_qos));
        debug!(
            "ReaderLocator {} added\n\tWriter: {}",
            locator, self.guid
        );
        true
    }

    pub fn reader_locator_remove(&mut self, locator: Locator) -> bool {
        let before = self.reader_locators.len();
        self.reader_locators.retain(|l| l.locator() != locator);
        before != self.reader_locators.len()
    }

    /// queue the whole history again for every destination
    pub fn unsent_changes_reset(&mut self) -> RtpsResult<()> {
        let changes: Vec<(SequenceNumber, u32)> = self
            .history
            .iter()
            .map(|c| (c.sequence_number, c.fragment_count()))
            .collect();
        for locator in self.reader_locators.iter_mut() {
            for (seq_num, fragment_count) in &changes {
                locator.add_change(*seq_num, *fragment_count);
            }
        }
        trace!(
            "{} changes queued again\n\tWriter: {}",
            changes.len(),
            self.guid
        );
        self.dispatch_unsent(None)
    }

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

    fn make_room(&mut self) -> RtpsResult<()> {
        let min = match self.history.get_min_change() {
            Some(c) => c.sequence_number,
            None => return Ok(()),
        };
        if self.is_acked_by_all(min) || self.history.history_kind() == HistoryQosKind::KeepLast {
            self.remove_change(min);
            Ok(())
        } else {
            warn!("history full of unsent changes\n\tWriter: {}", self.guid);
            Err(RtpsError::HistoryFull)
        }
    }

    // DATA and DATA_FRAG for every collected piece, tagged with its index
    fn add_changes_to(
        &self,
        group: &mut RTPSMessageGroup<'_>,
        items: &[CollectorItem<Locator>],
        dropped: &mut Vec<usize>,
    ) -> RtpsResult<()> {
        for (i, item) in items.iter().enumerate() {
            let change = match self.history.get_change(item.seq_num) {
                Some(c) => c,
                None => continue,
            };
            let mut readers: Vec<GUID> = Vec::new();
            let mut expects_inline_qos = false;
            for locator in self
                .reader_locators
                .iter()
                .filter(|l| item.destinations.contains(&l.locator()))
            {
                readers.extend_from_slice(locator.remote_readers());
                expects_inline_qos |= locator.expects_inline_qos();
            }
            readers.sort();
            readers.dedup();
            let mut prefixes: Vec<GuidPrefix> = readers.iter().map(|r| r.guid_prefix).collect();
            prefixes.dedup();
            let reader_id = match readers.as_slice() {
                [only] => only.entity_id,
                _ => EntityId::UNKNOW,
            };
            group.set_destination(&item.destinations, &prefixes)?;
            let added = match item.fragment {
                Some(fragment) => {
                    group.add_data_frag(change, fragment, reader_id, expects_inline_qos)
                }
                None => group.add_data(change, reader_id, expects_inline_qos),
            };
            match added {
                Ok(()) => group.track(i),
                Err(RtpsError::Timeout) => return Err(RtpsError::Timeout),
                Err(e) => {
                    error!(
                        "change {} not sent: {}\n\tWriter: {}",
                        item.seq_num, e, self.guid
                    );
                    dropped.push(i);
                }
            }
        }
        Ok(())
    }

    // a change no destination still queues is received by all as far as
    // best-effort goes, a volatile Writer forgets it then
    fn on_changes_sent(&mut self, seqs: BTreeSet<SequenceNumber>) {
        let volatile = self.qos.durability() == Durability::Volatile;
        for seq_num in seqs {
            if !self.history.contains(seq_num) || !self.is_acked_by_all(seq_num) {
                continue;
            }
            trace!(
                "change {} sent to every destination\n\tWriter: {}",
                seq_num,
                self.guid
            );
            self.notifier
                .notify(self.guid, DataWriterStatusChanged::ChangeReceivedByAll(seq_num));
            if volatile {
                self.remove_change(seq_num);
            }
        }
    }

    fn notify_matched(&self, reader: GUID, change: i32) {
        self.notifier.notify(
            self.guid,
            DataWriterStatusChanged::PublicationMatched(PublicationMatchedStatus::new(
                self.total_matched,
                change.max(0),
                self.matched_readers.len() as i32,
                change,
                reader,
            )),
        );
    }
}

impl RTPSEntity for StatelessWriter {
    fn guid(&self) -> GUID {
        self.guid
    }
}

impl RtpsWriter for StatelessWriter {
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
        for locator in self.reader_locators.iter_mut() {
            locator.add_change(seq_num, fragment_count);
        }
        match self.dispatch_unsent(max_blocking_time_point) {
            Ok(()) => Ok(seq_num),
            Err(RtpsError::Timeout) => Err(RtpsError::Timeout),
            Err(e) => {
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
        let history = &self.history;
        for locator in self.reader_locators.iter_mut() {
            let gone: Vec<SequenceNumber> = locator
                .unsent_changes()
                .map(|c| c.seq_num)
                .filter(|s| !history.contains(*s))
                .collect();
            for seq_num in gone {
                locator.remove_change(seq_num);
            }
            for c in locator.unsent_changes() {
                if c.fragment_count == 0 {
                    collector.add(c.seq_num, None, locator.locator());
                } else {
                    for fragment in &c.unsent_fragments {
                        collector.add(c.seq_num, Some(*fragment), locator.locator());
                    }
                }
            }
        }
        if collector.is_empty() {
            return Ok(());
        }

        let context = self.context.clone();
        let mut group = context.message_group(
            self.guid.guid_prefix,
            self.attributes.max_message_size,
            max_blocking_time_point,
        )?;
        let items = collector.into_items();
        let mut dropped = Vec::new();
        let result = self
            .add_changes_to(&mut group, &items, &mut dropped)
            .and_then(|()| group.flush());
        let flushed = group.take_flushed();
        drop(group);

        // only what left (or can never leave) stops being unsent
        let mut touched = BTreeSet::new();
        for i in flushed.into_iter().chain(dropped) {
            let item = &items[i];
            touched.insert(item.seq_num);
            for locator in self
                .reader_locators
                .iter_mut()
                .filter(|l| item.destinations.contains(&l.locator()))
            {
                locator.mark_sent(item.seq_num, item.fragment);
            }
        }
        self.on_changes_sent(touched);
        if let Err(RtpsError::Timeout) = result {
            debug!(
                "send stopped at the blocking deadline, the rest stays queued\n\tWriter: {}",
                self.guid
            );
        }
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
        let is_new = !self.matched_readers.contains_key(&reader_guid);
        let max = self.attributes.max_matched_readers;
        if is_new && max != 0 && self.matched_readers.len() >= max {
            return Err(RtpsError::ResourceExhausted(format!(
                "{} matched readers",
                max
            )));
        }
        if !is_new {
            for locator in self.reader_locators.iter_mut() {
                locator.remove_reader(reader_guid);
            }
        }
        let history: Vec<(SequenceNumber, u32)> = if is_new
            && data.qos.durability() >= Durability::TransientLocal
            && self.qos.durability() == Durability::TransientLocal
        {
            self.history
                .iter()
                .map(|c| (c.sequence_number, c.fragment_count()))
                .collect()
        } else {
            Vec::new()
        };
        for locator in data.locators() {
            let index = match self
                .reader_locators
                .iter()
                .position(|l| l.locator() == *locator)
            {
                Some(i) => i,
                None => {
                    self.reader_locators
                        .push(ReaderLocator::new(*locator, data.expects_inline_qos));
                    self.reader_locators.len() - 1
                }
            };
            let reader_locator = &mut self.reader_locators[index];
            reader_locator.add_reader(reader_guid, data.expects_inline_qos);
            for (seq_num, fragment_count) in &history {
                reader_locator.add_change(*seq_num, *fragment_count);
            }
        }
        self.reader_locators.retain(|l| !l.is_unused());
        self.matched_readers.insert(reader_guid, data);
        if !is_new {
            return Ok(());
        }
        self.total_matched += 1;
        info!(
            "Writer matched with Reader\n\tWriter: {}\n\tReader: {}",
            self.guid, reader_guid
        );
        self.notify_matched(reader_guid, 1);
        if !history.is_empty() {
            if let Err(e) = self.dispatch_unsent(None) {
                warn!("history not sent: {}\n\tWriter: {}", e, self.guid);
            }
        }
        Ok(())
    }

    fn matched_reader_remove(&mut self, reader_guid: GUID) -> bool {
        if self.matched_readers.remove(&reader_guid).is_none() {
            return false;
        }
        for locator in self.reader_locators.iter_mut() {
            locator.remove_reader(reader_guid);
        }
        self.reader_locators.retain(|l| !l.is_unused());
        info!(
            "Writer unmatched Reader\n\tWriter: {}\n\tReader: {}",
            self.guid, reader_guid
        );
        self.notify_matched(reader_guid, -1);
        true
    }

    fn matched_reader_is_matched(&self, reader_guid: GUID) -> bool {
        self.matched_readers.contains_key(&reader_guid)
    }

    fn process_acknack(&mut self, reader_guid: GUID, _acknack: &AckNack, _is_final: bool) -> bool {
        trace!(
            "best-effort Writer ignores ACKNACK\n\tWriter: {}\n\tReader: {}",
            self.guid,
            reader_guid
        );
        false
    }

    fn process_nack_frag(&mut self, _reader_guid: GUID, _nack_frag: &NackFrag) -> bool {
        false
    }

    fn on_timed_event(&mut self, event: TimedEventKind) {
        debug!(
            "StatelessWriter has no timers, {:?} ignored\n\tWriter: {}",
            event, self.guid
        );
    }

    /// Nothing is acknowledged here: a change counts as received by all once
    /// no destination still has it queued.
    fn is_acked_by_all(&self, seq_num: SequenceNumber) -> bool {
        self.reader_locators.iter().all(|l| !l.is_unsent(seq_num))
    }

    fn all_changes_acked(&self) -> bool {
        self.reader_locators.iter().all(|l| !l.has_unsent_changes())
    }

    fn remove_change(&mut self, seq_num: SequenceNumber) -> bool {
        if self.history.remove_change(seq_num).is_none() {
            return false;
        }
        for locator in self.reader_locators.iter_mut() {
            locator.remove_change(seq_num);
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
        false
    }
}
