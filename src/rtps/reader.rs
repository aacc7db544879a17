//! RTPS Readers: the reliable StatefulReader and the best-effort StatelessReader

use crate::dds::qos::ReaderQos;
use crate::error::{RtpsError, RtpsResult};
use crate::message::message_group::{change_attributes_of, RTPSMessageGroup};
use crate::message::send_buffers::SendBuffersManager;
use crate::message::submessage::element::{
    data::Data, datafrag::DataFrag, gap::Gap, heartbeat::Heartbeat,
    heartbeatfrag::HeartbeatFrag, FragmentNumber, Locator, SequenceNumber, Timestamp,
};
use crate::network::Transport;
use crate::rtps::cache::{CacheChange, ChangeFromWriterStatusKind};
use crate::rtps::fragment::FragmentedChangePitStop;
use crate::rtps::history::ReaderHistory;
use crate::rtps::timed_event::{TimedEventKind, TimerFactory};
use crate::rtps::writer::StatusNotifier;
use crate::security::SecurityPlugin;
use crate::structure::{
    Duration, GuidPrefix, RTPSEntity, TopicKind, WriterProxy, WriterProxyData, GUID,
};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, error, info, trace, warn};
use mio_extras::channel as mio_channel;
use serde::{Deserialize, Serialize};

/// the engine side of a Reader, fed by the MessageReceiver
pub trait RtpsReader: RTPSEntity + Send {
    /// false when the change was not taken: unknown Writer, duplicate or no room
    fn process_data(&mut self, writer_guid: GUID, data: &Data, source_timestamp: Timestamp)
        -> bool;
    fn process_data_frag(
        &mut self,
        writer_guid: GUID,
        data_frag: &DataFrag,
        source_timestamp: Timestamp,
    ) -> bool;
    fn process_heartbeat(
        &mut self,
        writer_guid: GUID,
        heartbeat: &Heartbeat,
        is_final: bool,
        liveliness: bool,
    ) -> bool;
    fn process_heartbeat_frag(&mut self, writer_guid: GUID, heartbeat_frag: &HeartbeatFrag)
        -> bool;
    fn process_gap(&mut self, writer_guid: GUID, gap: &Gap) -> bool;
    /// locators an INFO_REPLY named for answers to `writer_guid`
    fn set_reply_locators(&mut self, writer_guid: GUID, locators: Vec<Locator>);

    fn matched_writer_add(&mut self, data: WriterProxyData) -> RtpsResult<()>;
    fn matched_writer_remove(&mut self, writer_guid: GUID) -> bool;
    fn matched_writer_is_matched(&self, writer_guid: GUID) -> bool;

    fn on_timed_event(&mut self, event: TimedEventKind);

    fn history(&self) -> &ReaderHistory;
    /// hand the received changes to the application
    fn take_changes(&mut self) -> Vec<CacheChange>;
    fn is_reliable(&self) -> bool;
}

/// Fast RTPS defaults for the protocol delays of a Reader
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderTimes {
    pub heartbeat_response_delay: Duration,
    pub initial_acknack_delay: Duration,
}

impl Default for ReaderTimes {
    fn default() -> Self {
        Self {
            heartbeat_response_delay: Duration::from_millis(5),
            initial_acknack_delay: Duration::from_millis(70),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReaderAttributes {
    pub expects_inline_qos: bool,
    pub max_message_size: usize,
    /// DATA_FRAG announcing a larger sample is dropped unread
    pub max_sample_size: u32,
    pub times: ReaderTimes,
}

impl Default for ReaderAttributes {
    fn default() -> Self {
        Self {
            expects_inline_qos: false,
            max_message_size: 65500,
            max_sample_size: 16 * 1024 * 1024,
            times: ReaderTimes::default(),
        }
    }
}

/// Participant wide resources every Reader answers with
#[derive(Clone)]
pub struct ReaderContext {
    pub transport: Arc<dyn Transport>,
    pub send_buffers: Arc<SendBuffersManager>,
    pub security: Option<Arc<dyn SecurityPlugin>>,
    pub timers: TimerFactory,
}

impl ReaderContext {
    pub fn message_group(
        &self,
        source: GuidPrefix,
        max_message_size: usize,
    ) -> RtpsResult<RTPSMessageGroup<'_>> {
        RTPSMessageGroup::new(
            &*self.transport,
            &self.send_buffers,
            self.security.as_deref(),
            source,
            max_message_size,
            None,
        )
    }
}

/// everything a Reader is built from
pub struct ReaderIngredients {
    pub guid: GUID,
    pub topic_kind: TopicKind,
    pub qos: ReaderQos,
    pub attributes: ReaderAttributes,
    pub unicast_locator_list: Vec<Locator>,
    pub multicast_locator_list: Vec<Locator>,
    pub status_sender: Option<mio_channel::Sender<DataReaderStatusChanged>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataReaderStatusChanged {
    /// a change entered the history
    NewCacheChangeAdded {
        writer: GUID,
        seq_num: SequenceNumber,
    },
    SubscriptionMatched(SubscriptionMatchedStatus),
    /// changes of `writer` which will never arrive
    SampleLost { writer: GUID, count: i64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: i32,
    pub total_count_change: i32,
    pub current_count: i32,
    pub current_count_change: i32,
    /// The GUID is remote writer's one.
    pub guid: GUID,
}

impl SubscriptionMatchedStatus {
    pub fn new(
        total_count: i32,
        total_count_change: i32,
        current_count: i32,
        current_count_change: i32,
        guid: GUID,
    ) -> Self {
        Self {
            total_count,
            total_count_change,
            current_count,
            current_count_change,
            guid,
        }
    }
}

fn change_of(writer_guid: GUID, data: &Data, source_timestamp: Timestamp) -> CacheChange {
    let (kind, handle) = change_attributes_of(data.inline_qos.as_ref());
    CacheChange::new(
        kind,
        writer_guid,
        data.writer_sn,
        source_timestamp,
        data.serialized_payload.clone(),
        handle,
    )
}

/// Reliable Reader keeping one WriterProxy per matched Writer.
pub struct StatefulReader {
    guid: GUID,
    topic_kind: TopicKind,
    qos: ReaderQos,
    attributes: ReaderAttributes,
    context: ReaderContext,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    history: ReaderHistory,
    matched_writers: BTreeMap<GUID, WriterProxy>,
    pit_stop: FragmentedChangePitStop,
    total_matched: i32,
    notifier: StatusNotifier<DataReaderStatusChanged>,
}

impl StatefulReader {
    pub fn new(ingredients: ReaderIngredients, context: ReaderContext) -> Self {
        info!(
            "StatefulReader created, unicast: {:?}, multicast: {:?}\n\tReader: {}",
            ingredients.unicast_locator_list, ingredients.multicast_locator_list, ingredients.guid
        );
        Self {
            guid: ingredients.guid,
            topic_kind: ingredients.topic_kind,
            qos: ingredients.qos,
            attributes: ingredients.attributes,
            context,
            unicast_locator_list: ingredients.unicast_locator_list,
            multicast_locator_list: ingredients.multicast_locator_list,
            history: ReaderHistory::new(
                ingredients.qos.history(),
                ingredients.qos.resource_limits(),
            ),
            matched_writers: BTreeMap::new(),
            pit_stop: FragmentedChangePitStop::new(ingredients.attributes.max_sample_size),
            total_matched: 0,
            notifier: StatusNotifier::new(ingredients.status_sender),
        }
    }

    pub fn topic_kind(&self) -> TopicKind {
        self.topic_kind
    }

    pub fn qos(&self) -> &ReaderQos {
        &self.qos
    }

    pub fn unicast_locator_list(&self) -> &[Locator] {
        &self.unicast_locator_list
    }

    pub fn multicast_locator_list(&self) -> &[Locator] {
        &self.multicast_locator_list
    }

    pub fn writer_proxy(&self, writer_guid: GUID) -> Option<&WriterProxy> {
        self.matched_writers.get(&writer_guid)
    }

    pub fn fragments_in_progress(&self) -> usize {
        self.pit_stop.len()
    }

    fn commit_change(&mut self, change: CacheChange) -> bool {
        let writer_guid = change.writer_guid;
        let seq_num = change.sequence_number;
        match self.history.add_change(change) {
            Ok(added) => {
                if let Some(proxy) = self.matched_writers.get_mut(&writer_guid) {
                    proxy.received_change_set(seq_num);
                }
                if added {
                    debug!(
                        "Reader added change {}\n\tReader: {}\n\tWriter: {}",
                        seq_num, self.guid, writer_guid
                    );
                    self.notifier.notify(
                        self.guid,
                        DataReaderStatusChanged::NewCacheChangeAdded {
                            writer: writer_guid,
                            seq_num,
                        },
                    );
                }
                added
            }
            Err(e) => {
                // not marked received, the Writer sends it again
                warn!(
                    "change {} rejected: {}\n\tReader: {}\n\tWriter: {}",
                    seq_num, e, self.guid, writer_guid
                );
                false
            }
        }
    }

    fn is_new_change(&self, writer_guid: GUID, seq_num: SequenceNumber) -> bool {
        match self.matched_writers.get(&writer_guid) {
            Some(proxy) => proxy.status_of(seq_num) != ChangeFromWriterStatusKind::Received,
            None => {
                trace!(
                    "change from unmatched Writer ignored\n\tReader: {}\n\tWriter: {}",
                    self.guid,
                    writer_guid
                );
                false
            }
        }
    }

    fn answer_heartbeat(&mut self, writer_guid: GUID) {
        if self.attributes.times.heartbeat_response_delay.is_zero() {
            self.send_acknack(writer_guid, false);
        } else if let Some(proxy) = self.matched_writers.get_mut(&writer_guid) {
            proxy.start_heartbeat_response();
        }
    }

    /// ACKNACK with the missing changes, NACK_FRAG for the partially received ones
    fn send_acknack(&mut self, writer_guid: GUID, ask_for_heartbeat: bool) {
        let proxy = match self.matched_writers.get_mut(&writer_guid) {
            Some(p) => p,
            None => return,
        };
        let missing = proxy.missing_changes();
        let nack_frags: Vec<_> = missing
            .set()
            .into_iter()
            .filter_map(|seq_num| {
                self.pit_stop
                    .missing_fragments(writer_guid, seq_num, FragmentNumber(u32::MAX))
                    .filter(|f| !f.is_empty())
                    .map(|f| (seq_num, f))
            })
            .collect();
        // final: nothing missing, no HEARTBEAT needed in return
        let is_final = missing.is_empty() && !ask_for_heartbeat;
        let count = proxy.next_acknack_count();
        let nack_frags: Vec<_> = nack_frags
            .into_iter()
            .map(|(seq_num, set)| (seq_num, set, proxy.next_nackfrag_count()))
            .collect();
        let locators = proxy.reply_locators().to_vec();
        if locators.is_empty() {
            error!(
                "no locator to send ACKNACK to\n\tReader: {}\n\tWriter: {}",
                self.guid, writer_guid
            );
            return;
        }
        trace!(
            "Reader sends ACKNACK base {} missing {:?}\n\tReader: {}\n\tWriter: {}",
            missing.base(),
            missing.set(),
            self.guid,
            writer_guid
        );

        let send = || -> RtpsResult<()> {
            let mut group = self
                .context
                .message_group(self.guid.guid_prefix, self.attributes.max_message_size)?;
            group.set_destination(&locators, &[writer_guid.guid_prefix])?;
            group.add_acknack(
                self.guid.entity_id,
                writer_guid.entity_id,
                missing,
                count,
                is_final,
            )?;
            for (seq_num, set, count) in nack_frags {
                group.add_nackfrag(
                    self.guid.entity_id,
                    writer_guid.entity_id,
                    seq_num,
                    set,
                    count,
                )?;
            }
            group.flush()
        };
        if let Err(e) = send() {
            error!(
                "ACKNACK not sent: {}\n\tReader: {}\n\tWriter: {}",
                e, self.guid, writer_guid
            );
        }
    }

    fn send_nack_frag(&mut self, writer_guid: GUID, seq_num: SequenceNumber, last: FragmentNumber) {
        let set = match self.pit_stop.missing_fragments(writer_guid, seq_num, last) {
            Some(set) if !set.is_empty() => set,
            _ => return,
        };
        let proxy = match self.matched_writers.get_mut(&writer_guid) {
            Some(p) => p,
            None => return,
        };
        let count = proxy.next_nackfrag_count();
        let locators = proxy.reply_locators().to_vec();
        let send = || -> RtpsResult<()> {
            let mut group = self
                .context
                .message_group(self.guid.guid_prefix, self.attributes.max_message_size)?;
            group.set_destination(&locators, &[writer_guid.guid_prefix])?;
            group.add_nackfrag(self.guid.entity_id, writer_guid.entity_id, seq_num, set, count)?;
            group.flush()
        };
        if let Err(e) = send() {
            error!(
                "NACK_FRAG not sent: {}\n\tReader: {}\n\tWriter: {}",
                e, self.guid, writer_guid
            );
        }
    }

    fn notify_matched(&self, writer_guid: GUID, change: i32) {
        self.notifier.notify(
            self.guid,
            DataReaderStatusChanged::SubscriptionMatched(SubscriptionMatchedStatus::new(
                self.total_matched,
                change.max(0),
                self.matched_writers.len() as i32,
                change,
                writer_guid,
            )),
        );
    }
}

impl RTPSEntity for StatefulReader {
    fn guid(&self) -> GUID {
        self.guid
    }
}

impl RtpsReader for StatefulReader {
    fn process_data(
        &mut self,
        writer_guid: GUID,
        data: &Data,
        source_timestamp: Timestamp,
    ) -> bool {
        if data.writer_sn <= SequenceNumber::ZERO || !self.is_new_change(writer_guid, data.writer_sn)
        {
            return false;
        }
        self.pit_stop.remove_change(writer_guid, data.writer_sn);
        self.commit_change(change_of(writer_guid, data, source_timestamp))
    }

    fn process_data_frag(
        &mut self,
        writer_guid: GUID,
        data_frag: &DataFrag,
        source_timestamp: Timestamp,
    ) -> bool {
        if !self.is_new_change(writer_guid, data_frag.writer_sn) {
            return false;
        }
        match self
            .pit_stop
            .add_fragments_to_change(writer_guid, data_frag, source_timestamp)
        {
            Some(change) => self.commit_change(change),
            None => true,
        }
    }

    fn process_heartbeat(
        &mut self,
        writer_guid: GUID,
        heartbeat: &Heartbeat,
        is_final: bool,
        liveliness: bool,
    ) -> bool {
        if !heartbeat.is_valid() {
            warn!(
                "invalid HEARTBEAT [{}, {}] dropped\n\tReader: {}\n\tWriter: {}",
                heartbeat.first_sn, heartbeat.last_sn, self.guid, writer_guid
            );
            return false;
        }
        let proxy = match self.matched_writers.get_mut(&writer_guid) {
            Some(p) => p,
            None => {
                trace!(
                    "HEARTBEAT from unmatched Writer ignored\n\tReader: {}\n\tWriter: {}",
                    self.guid,
                    writer_guid
                );
                return false;
            }
        };
        if !proxy.check_and_set_heartbeat_count(heartbeat.count) {
            trace!(
                "duplicate HEARTBEAT {} ignored\n\tReader: {}\n\tWriter: {}",
                heartbeat.count,
                self.guid,
                writer_guid
            );
            return false;
        }
        trace!(
            "Reader handles HEARTBEAT [{}, {}]\n\tReader: {}\n\tWriter: {}",
            heartbeat.first_sn,
            heartbeat.last_sn,
            self.guid,
            writer_guid
        );
        proxy.cancel_initial_acknack();
        proxy.missing_changes_update(heartbeat.last_sn);
        let lost = proxy.lost_changes_update(heartbeat.first_sn);
        let missing = proxy.are_there_missing_changes();
        if lost > 0 {
            self.pit_stop
                .remove_changes_before(writer_guid, heartbeat.first_sn);
            debug!(
                "{} changes lost\n\tReader: {}\n\tWriter: {}",
                lost, self.guid, writer_guid
            );
            self.notifier.notify(
                self.guid,
                DataReaderStatusChanged::SampleLost {
                    writer: writer_guid,
                    count: lost,
                },
            );
        }
        if !is_final || (!liveliness && missing) {
            self.answer_heartbeat(writer_guid);
        }
        true
    }

    fn process_heartbeat_frag(
        &mut self,
        writer_guid: GUID,
        heartbeat_frag: &HeartbeatFrag,
    ) -> bool {
        if !heartbeat_frag.is_valid() {
            return false;
        }
        match self.matched_writers.get_mut(&writer_guid) {
            Some(proxy) => {
                if !proxy.check_and_set_heartbeatfrag_count(heartbeat_frag.count) {
                    return false;
                }
            }
            None => return false,
        }
        self.send_nack_frag(
            writer_guid,
            heartbeat_frag.writer_sn,
            heartbeat_frag.last_fragment_num,
        );
        true
    }

    fn process_gap(&mut self, writer_guid: GUID, gap: &Gap) -> bool {
        if !gap.is_valid() {
            warn!(
                "invalid GAP from {} dropped\n\tReader: {}\n\tWriter: {}",
                gap.gap_start, self.guid, writer_guid
            );
            return false;
        }
        let proxy = match self.matched_writers.get_mut(&writer_guid) {
            Some(p) => p,
            None => return false,
        };
        let base = gap.gap_list.base();
        if gap.gap_start <= proxy.available_changes_max() + SequenceNumber(1) {
            // the range joins what is already accounted for
            proxy.lost_changes_update(base);
        } else {
            let mut seq_num = gap.gap_start;
            while seq_num < base {
                proxy.irrelevant_change_set(seq_num);
                seq_num += SequenceNumber(1);
            }
        }
        for seq_num in gap.gap_list.set() {
            proxy.irrelevant_change_set(seq_num);
            self.pit_stop.remove_change(writer_guid, seq_num);
        }
        self.pit_stop.remove_changes_before(writer_guid, base);
        trace!(
            "GAP [{}, {}) applied\n\tReader: {}\n\tWriter: {}",
            gap.gap_start,
            base,
            self.guid,
            writer_guid
        );
        true
    }

    fn set_reply_locators(&mut self, writer_guid: GUID, locators: Vec<Locator>) {
        if let Some(proxy) = self.matched_writers.get_mut(&writer_guid) {
            proxy.set_reply_locators(locators);
        }
    }

    fn matched_writer_add(&mut self, data: WriterProxyData) -> RtpsResult<()> {
        let writer_guid = data.remote_writer_guid;
        if let Err(msg) = self.qos.is_compatible(&data.qos) {
            warn!(
                "Reader requested incompatible qos from Writer: {}\n\tReader: {}\n\tWriter: {}",
                msg, self.guid, writer_guid
            );
            return Err(RtpsError::InvalidArgument(msg));
        }
        if let Some(proxy) = self.matched_writers.get_mut(&writer_guid) {
            if *proxy.data() != data {
                info!(
                    "Reader update matched Writer info\n\tReader: {}\n\tWriter: {}",
                    self.guid, writer_guid
                );
                proxy.update_data(data);
            }
            return Ok(());
        }
        let mut proxy = WriterProxy::new();
        proxy.start(
            data,
            self.guid,
            SequenceNumber(1),
            self.attributes.times.heartbeat_response_delay.into(),
            self.attributes.times.initial_acknack_delay.into(),
            &self.context.timers,
        );
        self.matched_writers.insert(writer_guid, proxy);
        self.total_matched += 1;
        info!(
            "Reader found matched Writer\n\tReader: {}\n\tWriter: {}",
            self.guid, writer_guid
        );
        self.notify_matched(writer_guid, 1);
        Ok(())
    }

    fn matched_writer_remove(&mut self, writer_guid: GUID) -> bool {
        let mut proxy = match self.matched_writers.remove(&writer_guid) {
            Some(p) => p,
            None => return false,
        };
        proxy.stop();
        self.pit_stop.remove_writer(writer_guid);
        info!(
            "Reader unmatched Writer\n\tReader: {}\n\tWriter: {}",
            self.guid, writer_guid
        );
        self.notify_matched(writer_guid, -1);
        true
    }

    fn matched_writer_is_matched(&self, writer_guid: GUID) -> bool {
        self.matched_writers.contains_key(&writer_guid)
    }

    fn on_timed_event(&mut self, event: TimedEventKind) {
        match event {
            TimedEventKind::HeartbeatResponseDelay { writer, .. } => {
                if let Some(proxy) = self.matched_writers.get_mut(&writer) {
                    proxy.on_heartbeat_response_fired();
                    self.send_acknack(writer, false);
                }
            }
            TimedEventKind::InitialAckNack { writer, .. } => {
                if let Some(proxy) = self.matched_writers.get_mut(&writer) {
                    proxy.on_initial_acknack_fired();
                    self.send_acknack(writer, true);
                }
            }
            other => debug!(
                "Reader got a Writer timer {:?}\n\tReader: {}",
                other, self.guid
            ),
        }
    }

    fn history(&self) -> &ReaderHistory {
        &self.history
    }

    fn take_changes(&mut self) -> Vec<CacheChange> {
        self.history.take_changes()
    }

    fn is_reliable(&self) -> bool {
        true
    }
}

/// Best-effort Reader: takes whatever is newer than the last change of each Writer.
pub struct StatelessReader {
    guid: GUID,
    topic_kind: TopicKind,
    qos: ReaderQos,
    history: ReaderHistory,
    matched_writers: BTreeMap<GUID, WriterProxyData>,
    last_received: BTreeMap<GUID, SequenceNumber>,
    pit_stop: FragmentedChangePitStop,
    total_matched: i32,
    notifier: StatusNotifier<DataReaderStatusChanged>,
}

impl StatelessReader {
    pub fn new(ingredients: ReaderIngredients) -> Self {
        info!(
            "StatelessReader created, unicast: {:?}, multicast: {:?}\n\tReader: {}",
            ingredients.unicast_locator_list, ingredients.multicast_locator_list, ingredients.guid
        );
        Self {
            guid: ingredients.guid,
            topic_kind: ingredients.topic_kind,
            qos: ingredients.qos,
            history: ReaderHistory::new(
                ingredients.qos.history(),
                ingredients.qos.resource_limits(),
            ),
            matched_writers: BTreeMap::new(),
            last_received: BTreeMap::new(),
            pit_stop: FragmentedChangePitStop::new(ingredients.attributes.max_sample_size),
            total_matched: 0,
            notifier: StatusNotifier::new(ingredients.status_sender),
        }
    }

    pub fn topic_kind(&self) -> TopicKind {
        self.topic_kind
    }

    /// the last change taken from `writer_guid`
    pub fn last_received(&self, writer_guid: GUID) -> SequenceNumber {
        self.last_received
            .get(&writer_guid)
            .copied()
            .unwrap_or(SequenceNumber::ZERO)
    }

    fn is_newer(&self, writer_guid: GUID, seq_num: SequenceNumber) -> bool {
        if !self.matched_writers.contains_key(&writer_guid) {
            trace!(
                "change from unmatched Writer ignored\n\tReader: {}\n\tWriter: {}",
                self.guid,
                writer_guid
            );
            return false;
        }
        if seq_num <= self.last_received(writer_guid) {
            debug!(
                "BestEffort Reader receive change whose sequence_number < expected_seq_num\n\tReader: {}\n\tWriter: {}",
                self.guid, writer_guid
            );
            return false;
        }
        true
    }

    fn commit_change(&mut self, change: CacheChange) -> bool {
        let writer_guid = change.writer_guid;
        let seq_num = change.sequence_number;
        match self.history.add_change(change) {
            Ok(_) => {
                self.last_received.insert(writer_guid, seq_num);
                self.pit_stop
                    .remove_changes_before(writer_guid, seq_num + SequenceNumber(1));
                self.notifier.notify(
                    self.guid,
                    DataReaderStatusChanged::NewCacheChangeAdded {
                        writer: writer_guid,
                        seq_num,
                    },
                );
                true
            }
            Err(e) => {
                warn!(
                    "change {} rejected: {}\n\tReader: {}\n\tWriter: {}",
                    seq_num, e, self.guid, writer_guid
                );
                false
            }
        }
    }
}

impl RTPSEntity for StatelessReader {
    fn guid(&self) -> GUID {
        self.guid
    }
}

impl RtpsReader for StatelessReader {
    fn process_data(
        &mut self,
        writer_guid: GUID,
        data: &Data,
        source_timestamp: Timestamp,
    ) -> bool {
        if data.writer_sn <= SequenceNumber::ZERO || !self.is_newer(writer_guid, data.writer_sn) {
            return false;
        }
        self.commit_change(change_of(writer_guid, data, source_timestamp))
    }

    fn process_data_frag(
        &mut self,
        writer_guid: GUID,
        data_frag: &DataFrag,
        source_timestamp: Timestamp,
    ) -> bool {
        if !self.is_newer(writer_guid, data_frag.writer_sn) {
            return false;
        }
        // a newer change supersedes the partial older ones
        self.pit_stop
            .remove_changes_before(writer_guid, data_frag.writer_sn);
        match self
            .pit_stop
            .add_fragments_to_change(writer_guid, data_frag, source_timestamp)
        {
            Some(change) => self.commit_change(change),
            None => true,
        }
    }

    fn process_heartbeat(
        &mut self,
        _writer_guid: GUID,
        _heartbeat: &Heartbeat,
        _is_final: bool,
        _liveliness: bool,
    ) -> bool {
        false
    }

    fn process_heartbeat_frag(
        &mut self,
        _writer_guid: GUID,
        _heartbeat_frag: &HeartbeatFrag,
    ) -> bool {
        false
    }

    fn process_gap(&mut self, _writer_guid: GUID, _gap: &Gap) -> bool {
        false
    }

    fn set_reply_locators(&mut self, _writer_guid: GUID, _locators: Vec<Locator>) {}

    fn matched_writer_add(&mut self, data: WriterProxyData) -> RtpsResult<()> {
        let writer_guid = data.remote_writer_guid;
        if let Err(msg) = self.qos.is_compatible(&data.qos) {
            warn!(
                "Reader requested incompatible qos from Writer: {}\n\tReader: {}\n\tWriter: {}",
                msg, self.guid, writer_guid
            );
            return Err(RtpsError::InvalidArgument(msg));
        }
        if self.matched_writers.insert(writer_guid, data).is_some() {
            return Ok(());
        }
        self.total_matched += 1;
        info!(
            "Reader found matched Writer\n\tReader: {}\n\tWriter: {}",
            self.guid, writer_guid
        );
        self.notifier.notify(
            self.guid,
            DataReaderStatusChanged::SubscriptionMatched(SubscriptionMatchedStatus::new(
                self.total_matched,
                1,
                self.matched_writers.len() as i32,
                1,
                writer_guid,
            )),
        );
        Ok(())
    }

    fn matched_writer_remove(&mut self, writer_guid: GUID) -> bool {
        if self.matched_writers.remove(&writer_guid).is_none() {
            return false;
        }
        self.last_received.remove(&writer_guid);
        self.pit_stop.remove_writer(writer_guid);
        info!(
            "Reader unmatched Writer\n\tReader: {}\n\tWriter: {}",
            self.guid, writer_guid
        );
        self.notifier.notify(
            self.guid,
            DataReaderStatusChanged::SubscriptionMatched(SubscriptionMatchedStatus::new(
                self.total_matched,
                0,
                self.matched_writers.len() as i32,
                -1,
                writer_guid,
            )),
        );
        true
    }

    fn matched_writer_is_matched(&self, writer_guid: GUID) -> bool {
        self.matched_writers.contains_key(&writer_guid)
    }

    fn on_timed_event(&mut self, event: TimedEventKind) {
        debug!(
            "StatelessReader has no timers, {:?} ignored\n\tReader: {}",
            event, self.guid
        );
    }

    fn history(&self) -> &ReaderHistory {
        &self.history
    }

    fn take_changes(&mut self) -> Vec<CacheChange> {
        self.history.take_changes()
    }

    fn is_reliable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dds::qos::{
        policy::{Durability, History, HistoryQosKind, Reliability},
        ReaderQosBuilder, WriterQosBuilder,
    };
    use crate::message::submessage::element::{
        FragmentNumberSet, SequenceNumberSet, SerializedPayload, CDR_LE,
    };
    use crate::message::submessage::{EntitySubmessage, SubMessageBody};
    use crate::network::transport::test_transport::RecordingTransport;
    use crate::structure::EntityId;
    use bytes::Bytes;
    use mio_extras::channel as mio_channel;

    const KEEP_ALL: History = History {
        kind: HistoryQosKind::KeepAll,
        depth: 1,
    };

    fn reader_guid() -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([2; 12]),
            EntityId::new_reader(1, TopicKind::NoKey),
        )
    }

    fn writer_guid() -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([1; 12]),
            EntityId::new_writer(1, TopicKind::NoKey),
        )
    }

    fn writer_locator() -> Locator {
        Locator::new_from_ipv4(7411, [127, 0, 0, 1])
    }

    fn writer_data(reliable: bool) -> WriterProxyData {
        let reliability = if reliable {
            Reliability::default_reliable()
        } else {
            Reliability::default_besteffort()
        };
        WriterProxyData::new(
            writer_guid(),
            vec![writer_locator()],
            Vec::new(),
            WriterQosBuilder::new()
                .reliability(reliability)
                .durability(Durability::TransientLocal)
                .build(),
        )
    }

    fn data(seq: i64) -> Data {
        Data::new(
            reader_guid().entity_id,
            writer_guid().entity_id,
            SequenceNumber(seq),
            None,
            Some(SerializedPayload::new(
                CDR_LE,
                Bytes::from(vec![seq as u8; 8]),
            )),
        )
    }

    fn heartbeat(first: i64, last: i64, count: i32) -> Heartbeat {
        Heartbeat::new(
            reader_guid().entity_id,
            writer_guid().entity_id,
            SequenceNumber(first),
            SequenceNumber(last),
            count,
        )
    }

    struct Fixture {
        reader: StatefulReader,
        transport: Arc<RecordingTransport>,
        status: mio_channel::Receiver<DataReaderStatusChanged>,
    }

    fn fixture(times: ReaderTimes) -> Fixture {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, status) = mio_channel::channel();
        let context = ReaderContext {
            transport: transport.clone(),
            send_buffers: SendBuffersManager::new(1, 65536, 0),
            security: None,
            timers: TimerFactory::detached(),
        };
        let mut reader = StatefulReader::new(
            ReaderIngredients {
                guid: reader_guid(),
                topic_kind: TopicKind::NoKey,
                qos: ReaderQosBuilder::new()
                    .reliability(Reliability::default_reliable())
                    .history(KEEP_ALL)
                    .build(),
                attributes: ReaderAttributes {
                    times,
                    ..ReaderAttributes::default()
                },
                unicast_locator_list: Vec::new(),
                multicast_locator_list: Vec::new(),
                status_sender: Some(sender),
            },
            context,
        );
        reader.matched_writer_add(writer_data(true)).unwrap();
        Fixture {
            reader,
            transport,
            status,
        }
    }

    fn immediate() -> ReaderTimes {
        ReaderTimes {
            heartbeat_response_delay: Duration::ZERO,
            initial_acknack_delay: Duration::ZERO,
        }
    }

    fn sent_acknacks(transport: &RecordingTransport) -> Vec<(Locator, SequenceNumberSet, bool)> {
        transport
            .take_submessages()
            .into_iter()
            .filter_map(|(locator, s)| match s.body {
                SubMessageBody::Entity(EntitySubmessage::AckNack(a, flags)) => Some((
                    locator,
                    a.reader_sn_state,
                    flags.contains(crate::message::submessage::submessage_flag::AckNackFlag::Final),
                )),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn changes_enter_the_history_once() {
        let mut f = fixture(ReaderTimes::default());
        assert!(matches!(
            f.status.try_recv(),
            Ok(DataReaderStatusChanged::SubscriptionMatched(_))
        ));
        assert!(f.reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO));
        assert!(!f.reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO));
        assert!(f.reader.process_data(writer_guid(), &data(2), Timestamp::TIME_ZERO));
        assert_eq!(f.reader.history().len(), 2);
        assert_eq!(
            f.status.try_recv().unwrap(),
            DataReaderStatusChanged::NewCacheChangeAdded {
                writer: writer_guid(),
                seq_num: SequenceNumber(1)
            }
        );
        assert_eq!(
            f.reader
                .writer_proxy(writer_guid())
                .unwrap()
                .available_changes_max(),
            SequenceNumber(2)
        );
        let taken = f.reader.take_changes();
        assert_eq!(taken.len(), 2);
        // taken changes stay received
        assert!(!f.reader.process_data(writer_guid(), &data(2), Timestamp::TIME_ZERO));

        let stranger = GUID::new(GuidPrefix::from_bytes([9; 12]), writer_guid().entity_id);
        assert!(!f.reader.process_data(stranger, &data(3), Timestamp::TIME_ZERO));
    }

    #[test]
    fn heartbeat_with_missing_changes_gets_an_acknack() {
        let mut f = fixture(immediate());
        f.reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO);
        f.reader.process_data(writer_guid(), &data(3), Timestamp::TIME_ZERO);
        assert!(f
            .reader
            .process_heartbeat(writer_guid(), &heartbeat(1, 4, 1), true, false));
        let acknacks = sent_acknacks(&f.transport);
        assert_eq!(acknacks.len(), 1);
        let (locator, set, is_final) = &acknacks[0];
        assert_eq!(*locator, writer_locator());
        assert_eq!(set.base(), SequenceNumber(2));
        assert_eq!(set.set(), vec![SequenceNumber(2), SequenceNumber(4)]);
        assert!(!is_final);

        // same count again
        assert!(!f
            .reader
            .process_heartbeat(writer_guid(), &heartbeat(1, 4, 1), false, false));
        assert_eq!(f.transport.datagrams(), 0);
        // final, nothing asked: silence is fine when nothing is missing
        f.reader.process_data(writer_guid(), &data(2), Timestamp::TIME_ZERO);
        f.reader.process_data(writer_guid(), &data(4), Timestamp::TIME_ZERO);
        assert!(f
            .reader
            .process_heartbeat(writer_guid(), &heartbeat(1, 4, 2), true, false));
        assert_eq!(f.transport.datagrams(), 0);
        // non final always gets an answer
        assert!(f
            .reader
            .process_heartbeat(writer_guid(), &heartbeat(1, 4, 3), false, false));
        let acknacks = sent_acknacks(&f.transport);
        assert_eq!(acknacks[0].1.base(), SequenceNumber(5));
        assert!(acknacks[0].1.is_empty());
        assert!(acknacks[0].2);
    }

    #[test]
    fn delayed_response_waits_for_the_timer() {
        let mut f = fixture(ReaderTimes::default());
        f.reader
            .process_heartbeat(writer_guid(), &heartbeat(1, 2, 1), false, false);
        assert_eq!(f.transport.datagrams(), 0);
        f.reader.on_timed_event(TimedEventKind::HeartbeatResponseDelay {
            reader: reader_guid(),
            writer: writer_guid(),
        });
        let acknacks = sent_acknacks(&f.transport);
        assert_eq!(
            acknacks[0].1.set(),
            vec![SequenceNumber(1), SequenceNumber(2)]
        );
    }

    #[test]
    fn initial_acknack_asks_for_a_heartbeat_at_reply_locator() {
        let mut f = fixture(ReaderTimes::default());
        let reply = Locator::new_from_ipv4(7500, [127, 0, 0, 1]);
        f.reader.set_reply_locators(writer_guid(), vec![reply]);
        f.reader.on_timed_event(TimedEventKind::InitialAckNack {
            reader: reader_guid(),
            writer: writer_guid(),
        });
        let acknacks = sent_acknacks(&f.transport);
        assert_eq!(acknacks.len(), 1);
        assert_eq!(acknacks[0].0, reply);
        assert_eq!(acknacks[0].1.base(), SequenceNumber(1));
        assert!(acknacks[0].1.is_empty());
        assert!(!acknacks[0].2);
    }

    #[test]
    fn gap_and_lost_changes_advance_the_writer_proxy() {
        let mut f = fixture(immediate());
        f.reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO);
        f.reader.process_data(writer_guid(), &data(3), Timestamp::TIME_ZERO);
        let gap = Gap::new(
            reader_guid().entity_id,
            writer_guid().entity_id,
            SequenceNumber(2),
            SequenceNumberSet::new_empty(SequenceNumber(3)),
        );
        assert!(f.reader.process_gap(writer_guid(), &gap));
        let proxy = f.reader.writer_proxy(writer_guid()).unwrap();
        assert_eq!(proxy.available_changes_max(), SequenceNumber(3));
        // a GAP never brings a change into the history
        assert_eq!(f.reader.history().len(), 2);

        while f.status.try_recv().is_ok() {}
        assert!(f
            .reader
            .process_heartbeat(writer_guid(), &heartbeat(6, 7, 1), true, false));
        assert_eq!(
            f.status.try_recv().unwrap(),
            DataReaderStatusChanged::SampleLost {
                writer: writer_guid(),
                count: 2
            }
        );
        let acknacks = sent_acknacks(&f.transport);
        assert_eq!(acknacks[0].1.base(), SequenceNumber(6));
    }

    #[test]
    fn fragments_are_reassembled_and_nacked() {
        let mut f = fixture(immediate());
        let payload = SerializedPayload::new(CDR_LE, Bytes::from(vec![4_u8; 196]));
        let serialized = payload.to_bytes();
        let fragment = |n: u32| {
            let start = (n as usize - 1) * 100;
            let end = core::cmp::min(start + 100, serialized.len());
            DataFrag::new(
                reader_guid().entity_id,
                writer_guid().entity_id,
                SequenceNumber(1),
                FragmentNumber(n),
                1,
                100,
                serialized.len() as u32,
                None,
                serialized.slice(start..end),
            )
        };
        assert!(f
            .reader
            .process_data_frag(writer_guid(), &fragment(1), Timestamp::TIME_ZERO));
        assert_eq!(f.reader.history().len(), 0);
        assert_eq!(f.reader.fragments_in_progress(), 1);

        let heartbeat_frag = HeartbeatFrag {
            reader_id: reader_guid().entity_id,
            writer_id: writer_guid().entity_id,
            writer_sn: SequenceNumber(1),
            last_fragment_num: FragmentNumber(2),
            count: 1,
        };
        assert!(f
            .reader
            .process_heartbeat_frag(writer_guid(), &heartbeat_frag));
        let nack_frags: Vec<FragmentNumberSet> = f
            .transport
            .take_submessages()
            .into_iter()
            .filter_map(|(_, s)| match s.body {
                SubMessageBody::Entity(EntitySubmessage::NackFrag(n, _)) => {
                    Some(n.fragment_number_state)
                }
                _ => None,
            })
            .collect();
        assert_eq!(nack_frags.len(), 1);
        assert_eq!(nack_frags[0].set(), vec![FragmentNumber(2)]);

        assert!(f
            .reader
            .process_data_frag(writer_guid(), &fragment(2), Timestamp::TIME_ZERO));
        assert_eq!(f.reader.fragments_in_progress(), 0);
        let change = f.reader.history().get_change(writer_guid(), SequenceNumber(1));
        assert_eq!(change.unwrap().data_value(), Some(&payload));
    }

    #[test]
    fn incompatible_writer_is_refused() {
        let mut f = fixture(ReaderTimes::default());
        let mut best_effort = writer_data(false);
        best_effort.remote_writer_guid =
            GUID::new(GuidPrefix::from_bytes([3; 12]), writer_guid().entity_id);
        assert!(f.reader.matched_writer_add(best_effort).is_err());
        assert!(f.reader.matched_writer_remove(writer_guid()));
        assert!(!f.reader.matched_writer_is_matched(writer_guid()));
        assert!(!f.reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO));
    }

    #[test]
    fn best_effort_reader_only_moves_forward() {
        let (sender, status) = mio_channel::channel();
        let mut reader = StatelessReader::new(ReaderIngredients {
            guid: reader_guid(),
            topic_kind: TopicKind::NoKey,
            qos: ReaderQosBuilder::new().history(KEEP_ALL).build(),
            attributes: ReaderAttributes::default(),
            unicast_locator_list: Vec::new(),
            multicast_locator_list: Vec::new(),
            status_sender: Some(sender),
        });
        assert!(!reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO));
        reader.matched_writer_add(writer_data(false)).unwrap();
        assert!(reader.process_data(writer_guid(), &data(2), Timestamp::TIME_ZERO));
        assert!(!reader.process_data(writer_guid(), &data(1), Timestamp::TIME_ZERO));
        assert!(!reader.process_data(writer_guid(), &data(2), Timestamp::TIME_ZERO));
        assert!(reader.process_data(writer_guid(), &data(5), Timestamp::TIME_ZERO));
        assert_eq!(reader.last_received(writer_guid()), SequenceNumber(5));
        assert_eq!(reader.history().len(), 2);
        assert!(!reader.process_heartbeat(writer_guid(), &heartbeat(1, 5, 1), false, false));
        assert!(matches!(
            status.try_recv(),
            Ok(DataReaderStatusChanged::SubscriptionMatched(_))
        ));
        assert!(reader.matched_writer_remove(writer_guid()));
        assert_eq!(reader.last_received(writer_guid()), SequenceNumber::ZERO);
    }
}
