//! what the StatefulWriter and the StatelessWriter have in common

use crate::dds::qos::WriterQos;
use crate::error::{RtpsError, RtpsResult};
use crate::message::message_group::RTPSMessageGroup;
use crate::message::send_buffers::SendBuffersManager;
use crate::message::submessage::element::{
    acknack::AckNack, nackfrag::NackFrag, Locator, SequenceNumber, SerializedPayload,
};
use crate::network::Transport;
use crate::rtps::async_writer::AsyncWaker;
use crate::rtps::cache::{ChangeKind, InstanceHandle};
use crate::rtps::history::WriterHistory;
use crate::rtps::timed_event::{TimedEventKind, TimerFactory};
use crate::security::SecurityPlugin;
use crate::structure::{Duration, GuidPrefix, RTPSEntity, ReaderProxyData, TopicKind, GUID};
use alloc::sync::Arc;
use core::time::Duration as CoreDuration;
use log::{debug, trace};
use mio_extras::channel as mio_channel;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// the engine side of a Writer, driven through a `WriterHandle`
pub trait RtpsWriter: RTPSEntity + Send {
    /// Add a change to the history and hand it to the matched Readers.
    ///
    /// A send cut short by `max_blocking_time_point` returns
    /// `RtpsError::Timeout`. The change is in the history by then and leaves
    /// with a later send like anything else still unsent.
    fn write(
        &mut self,
        kind: ChangeKind,
        data: Option<SerializedPayload>,
        handle: InstanceHandle,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<SequenceNumber>;

    fn send_any_unsent_changes(&mut self, max_blocking_time_point: Option<Instant>)
        -> RtpsResult<()>;

    fn matched_reader_add(&mut self, data: ReaderProxyData) -> RtpsResult<()>;
    fn matched_reader_remove(&mut self, reader_guid: GUID) -> bool;
    fn matched_reader_is_matched(&self, reader_guid: GUID) -> bool;

    /// false when the ACKNACK was not for this Writer or was a duplicate
    fn process_acknack(&mut self, reader_guid: GUID, acknack: &AckNack, is_final: bool) -> bool;
    fn process_nack_frag(&mut self, reader_guid: GUID, nack_frag: &NackFrag) -> bool;

    fn on_timed_event(&mut self, event: TimedEventKind);

    fn is_acked_by_all(&self, seq_num: SequenceNumber) -> bool;
    /// every change held by the history is acknowledged by every matched Reader
    fn all_changes_acked(&self) -> bool;
    fn remove_change(&mut self, seq_num: SequenceNumber) -> bool;

    fn history(&self) -> &WriterHistory;
    fn mode(&self) -> WriterMode;
    fn is_reliable(&self) -> bool;
}

/// A Writer behind its lock.
///
/// The condition variable is notified every time an operation leaves the
/// Writer with all of its changes acknowledged.
pub struct WriterHandle<W: ?Sized> {
    all_acked: Condvar,
    writer: Mutex<W>,
}

impl<W: RtpsWriter> WriterHandle<W> {
    pub fn new(writer: W) -> Self {
        Self {
            all_acked: Condvar::new(),
            writer: Mutex::new(writer),
        }
    }
}

impl<W: RtpsWriter + ?Sized> WriterHandle<W> {
    pub fn lock(&self) -> MutexGuard<'_, W> {
        self.writer.lock()
    }

    /// lock, giving up at `max_blocking_time_point`
    pub fn lock_until(
        &self,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<MutexGuard<'_, W>> {
        match max_blocking_time_point {
            Some(deadline) => self
                .writer
                .try_lock_until(deadline)
                .ok_or(RtpsError::Timeout),
            None => Ok(self.writer.lock()),
        }
    }

    pub fn write(
        &self,
        kind: ChangeKind,
        data: Option<SerializedPayload>,
        handle: InstanceHandle,
        max_blocking_time: Option<CoreDuration>,
    ) -> RtpsResult<SequenceNumber> {
        let deadline = max_blocking_time.map(|d| Instant::now() + d);
        let mut writer = self.lock_until(deadline)?;
        let result = writer.write(kind, data, handle, deadline);
        self.notify_if_all_acked(&writer);
        result
    }

    pub fn send_any_unsent_changes(
        &self,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<()> {
        let mut writer = self.lock_until(max_blocking_time_point)?;
        let result = writer.send_any_unsent_changes(max_blocking_time_point);
        self.notify_if_all_acked(&writer);
        result
    }

    pub fn matched_reader_add(&self, data: ReaderProxyData) -> RtpsResult<()> {
        self.lock().matched_reader_add(data)
    }

    pub fn matched_reader_remove(&self, reader_guid: GUID) -> bool {
        let mut writer = self.lock();
        let removed = writer.matched_reader_remove(reader_guid);
        self.notify_if_all_acked(&writer);
        removed
    }

    pub fn process_acknack(&self, reader_guid: GUID, acknack: &AckNack, is_final: bool) -> bool {
        let mut writer = self.lock();
        let processed = writer.process_acknack(reader_guid, acknack, is_final);
        if processed {
            self.notify_if_all_acked(&writer);
        }
        processed
    }

    pub fn process_nack_frag(&self, reader_guid: GUID, nack_frag: &NackFrag) -> bool {
        self.lock().process_nack_frag(reader_guid, nack_frag)
    }

    pub fn on_timed_event(&self, event: TimedEventKind) {
        let mut writer = self.lock();
        writer.on_timed_event(event);
        self.notify_if_all_acked(&writer);
    }

    /// wait until every matched Reader acknowledged every change, false on timeout
    pub fn wait_for_all_acked(&self, max_wait: CoreDuration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut writer = self.writer.lock();
        while !writer.all_changes_acked() {
            if self.all_acked.wait_until(&mut writer, deadline).timed_out() {
                let acked = writer.all_changes_acked();
                debug!(
                    "wait_for_all_acked timed out, acked: {}\n\tWriter: {}",
                    acked,
                    writer.guid()
                );
                return acked;
            }
        }
        true
    }

    fn notify_if_all_acked(&self, writer: &MutexGuard<'_, W>) {
        if writer.all_changes_acked() {
            trace!("all changes acked\n\tWriter: {}", writer.guid());
            self.all_acked.notify_all();
        }
    }
}

/// Fast RTPS defaults for the protocol delays of a Writer
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriterTimes {
    pub heartbeat_period: Duration,
    pub nack_response_delay: Duration,
    pub nack_supression_duration: Duration,
    pub initial_heartbeat_delay: Duration,
}

impl Default for WriterTimes {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(3),
            nack_response_delay: Duration::from_millis(5),
            nack_supression_duration: Duration::ZERO,
            initial_heartbeat_delay: Duration::from_millis(12),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterMode {
    /// `write` sends before it returns
    Synchronous,
    /// `write` only queues, the async writer thread sends
    Asynchronous,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriterAttributes {
    /// send new changes without waiting for Readers to request them
    pub push_mode: bool,
    pub mode: WriterMode,
    pub max_message_size: usize,
    /// payloads larger than this travel as DATA_FRAG
    pub fragment_size: u16,
    /// piggyback a HEARTBEAT once a message holds this many octets, 0 disables it
    pub heartbeat_piggyback_threshold: usize,
    /// bound of the ReaderProxy pool, 0 = unlimited
    pub max_matched_readers: usize,
    pub times: WriterTimes,
}

impl Default for WriterAttributes {
    fn default() -> Self {
        Self {
            push_mode: true,
            mode: WriterMode::Synchronous,
            max_message_size: 65500,
            fragment_size: 1024,
            heartbeat_piggyback_threshold: 0,
            max_matched_readers: 0,
            times: WriterTimes::default(),
        }
    }
}

impl WriterAttributes {
    // room DATA_FRAG needs besides the fragment: RTPS header, INFO_DST,
    // INFO_TS, DATA_FRAG header and an inline QoS of KEY_HASH and STATUS_INFO
    const DATA_FRAG_OVERHEAD: usize = 20 + 16 + 12 + 36 + 36;

    /// fragment size which leaves a DATA_FRAG within max_message_size
    pub fn effective_fragment_size(&self) -> u16 {
        let room = self
            .max_message_size
            .saturating_sub(Self::DATA_FRAG_OVERHEAD)
            .clamp(1, u16::MAX as usize) as u16;
        core::cmp::min(self.fragment_size, room)
    }
}

/// Participant wide resources every Writer sends with
#[derive(Clone)]
pub struct WriterContext {
    pub transport: Arc<dyn Transport>,
    pub send_buffers: Arc<SendBuffersManager>,
    pub security: Option<Arc<dyn SecurityPlugin>>,
    pub timers: TimerFactory,
    pub async_waker: Option<AsyncWaker>,
}

impl WriterContext {
    pub fn message_group(
        &self,
        source: GuidPrefix,
        max_message_size: usize,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<RTPSMessageGroup<'_>> {
        RTPSMessageGroup::new(
            &*self.transport,
            &self.send_buffers,
            self.security.as_deref(),
            source,
            max_message_size,
            max_blocking_time_point,
        )
    }
}

/// everything a Writer is built from
pub struct WriterIngredients {
    pub guid: GUID,
    pub topic_kind: TopicKind,
    pub qos: WriterQos,
    pub attributes: WriterAttributes,
    pub unicast_locator_list: Vec<Locator>,
    pub multicast_locator_list: Vec<Locator>,
    pub status_sender: Option<mio_channel::Sender<DataWriterStatusChanged>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataWriterStatusChanged {
    /// every matched Reader acknowledged the change
    ChangeReceivedByAll(SequenceNumber),
    PublicationMatched(PublicationMatchedStatus),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublicationMatchedStatus {
    pub total_count: i32,
    pub total_count_change: i32,
    pub current_count: i32,
    pub current_count_change: i32,
    /// This is diffarent form DDS spec.
    /// The GUID is remote reader's one.
    pub guid: GUID,
}

impl PublicationMatchedStatus {
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

/// Sends statuses of one endpoint, a gone receiver only costs a debug line.
pub(crate) struct StatusNotifier<S> {
    sender: Option<mio_channel::Sender<S>>,
}

impl<S> StatusNotifier<S> {
    pub(crate) fn new(sender: Option<mio_channel::Sender<S>>) -> Self {
        Self { sender }
    }

    pub(crate) fn notify(&self, endpoint: GUID, status: S) {
        if let Some(sender) = &self.sender {
            if sender.send(status).is_err() {
                debug!("status receiver of {} is gone", endpoint);
            }
        }
    }
}
