//! RTPS Participant: owns the threads and the endpoints of one GuidPrefix
//!
//! The receive thread polls the listening sockets and feeds a
//! `MessageReceiver`, the timer reactor fires protocol delays, and the async
//! writer thread sends for Writers in Asynchronous mode. Endpoints are
//! matched by hand with `match_local` or with proxy data of remote endpoints.

use crate::dds::qos::{ReaderQos, WriterQos};
use crate::error::{RtpsError, RtpsResult};
use crate::message::message_receiver::MessageReceiver;
use crate::message::send_buffers::SendBuffersManager;
use crate::message::submessage::element::Locator;
use crate::network::net_util::{
    get_local_interfaces, usertraffic_multicast_port, usertraffic_unicast_port,
};
use crate::network::udp_listening_socket::{new_multicast, new_unicast};
use crate::network::udp_transport::UdpTransport;
use crate::network::Transport;
use crate::rtps::async_writer::AsyncWriterThread;
use crate::rtps::reader::{
    DataReaderStatusChanged, ReaderAttributes, ReaderContext, ReaderIngredients,
    StatefulReader, StatelessReader,
};
use crate::rtps::registry::{EndpointRegistry, SharedReader, SharedWriter};
use crate::rtps::stateful_writer::StatefulWriter;
use crate::rtps::stateless_writer::StatelessWriter;
use crate::rtps::timed_event::TimedEventResource;
use crate::rtps::tokens::{STOP_POLL_TOKEN, USERTRAFFIC_TOKEN_BASE};
use crate::rtps::writer::{
    DataWriterStatusChanged, WriterAttributes, WriterContext, WriterHandle, WriterIngredients,
};
use crate::security::SecurityPlugin;
use crate::structure::{
    EntityId, GuidPrefix, RTPSEntity, ReaderProxyData, TopicKind, WriterProxyData, GUID,
};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use bytes::{Bytes, BytesMut};
use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicU32, Ordering};
use log::{debug, error, info, trace, warn};
use mio_extras::channel as mio_channel;
use mio_v06::net::UdpSocket;
use mio_v06::{Events, Poll, PollOpt, Ready, Token};
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::thread::{self, JoinHandle};

const MAX_MESSAGE_SIZE: usize = 64 * 1024; // This is max we can get from UDP.
const MAX_PARTICIPANTS_PER_HOST: u16 = 120;
const USERTRAFFIC_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAttributes {
    pub domain_id: u16,
    /// address the unicast locators announce, every interface when None
    pub unicast_address: Option<IpAddr>,
    pub use_multicast: bool,
    pub send_buffers_initial: usize,
    /// 0 = the pool grows without bound
    pub send_buffers_max: usize,
}

impl Default for ParticipantAttributes {
    fn default() -> Self {
        Self {
            domain_id: 0,
            unicast_address: None,
            use_multicast: true,
            send_buffers_initial: 2,
            send_buffers_max: 0,
        }
    }
}

/// how a Writer is created
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriterConfig {
    pub topic_kind: TopicKind,
    pub qos: WriterQos,
    pub attributes: WriterAttributes,
}

/// how a Reader is created
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReaderConfig {
    pub topic_kind: TopicKind,
    pub qos: ReaderQos,
    pub attributes: ReaderAttributes,
}

pub struct RtpsParticipant {
    guid: GUID,
    attributes: ParticipantAttributes,
    participant_id: u16,
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn Transport>,
    send_buffers: Arc<SendBuffersManager>,
    security: Option<Arc<dyn SecurityPlugin>>,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    local_writers: RwLock<BTreeMap<GUID, WriterProxyData>>,
    local_readers: RwLock<BTreeMap<GUID, ReaderProxyData>>,
    entity_key_generator: AtomicU32,
    // dropped in this order: receive thread, async writer, timers
    receive_stop: Option<mio_channel::Sender<()>>,
    receive_thread: Option<JoinHandle<()>>,
    async_writer: AsyncWriterThread,
    timed_events: TimedEventResource,
}

impl RtpsParticipant {
    /// a Participant sending over UDP and listening on the user traffic ports of its domain
    pub fn new(
        attributes: ParticipantAttributes,
        security: Option<Arc<dyn SecurityPlugin>>,
        small_rng: &mut SmallRng,
    ) -> RtpsResult<Self> {
        let domain_id = attributes.domain_id;
        let mut sockets = Vec::new();
        // rtps 2.3 spec, 9.6.1.1
        // Each Participant on the same node and in the same domain must use a unique participantId.
        let mut participant_id = 0;
        let unicast = loop {
            match new_unicast(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                usertraffic_unicast_port(domain_id, participant_id),
            ) {
                Ok(s) => break s,
                Err(e) if participant_id + 1 < MAX_PARTICIPANTS_PER_HOST => {
                    trace!("participant id {} is taken: {}", participant_id, e);
                    participant_id += 1;
                }
                Err(e) => {
                    return Err(RtpsError::ResourceExhausted(format!(
                        "no free participant id on this host: {}",
                        e
                    )))
                }
            }
        };
        sockets.push(unicast);
        let mut multicast_locator_list = Vec::new();
        if attributes.use_multicast {
            let port = usertraffic_multicast_port(domain_id);
            match new_multicast(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                port,
                USERTRAFFIC_MULTICAST_GROUP,
            ) {
                Ok(s) => {
                    sockets.push(s);
                    multicast_locator_list.push(Locator::new_from_ipv4(
                        port as u32,
                        USERTRAFFIC_MULTICAST_GROUP.octets(),
                    ));
                }
                Err(e) => warn!("multicast user traffic disabled: {}", e),
            }
        }

        let unicast_port = usertraffic_unicast_port(domain_id, participant_id);
        let addresses = match attributes.unicast_address {
            Some(addr) => vec![addr],
            None => {
                let interfaces = get_local_interfaces();
                if interfaces.is_empty() {
                    vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
                } else {
                    interfaces
                }
            }
        };
        let unicast_locator_list = addresses
            .into_iter()
            .map(|a| Locator::from_socket_addr(&SocketAddr::new(a, unicast_port)))
            .collect();

        let transport = Arc::new(UdpTransport::new(0)?);
        let guid_prefix = GUID::new_participant_guid(small_rng).guid_prefix;
        let mut participant =
            Self::with_transport(guid_prefix, attributes, transport, security, sockets)?;
        participant.participant_id = participant_id;
        participant.unicast_locator_list = unicast_locator_list;
        participant.multicast_locator_list = multicast_locator_list;
        info!(
            "Participant created: {} participant id {} locators {:?}",
            guid_prefix, participant_id, participant.unicast_locator_list
        );
        Ok(participant)
    }

    /// A Participant sending through `transport` and receiving on `sockets`.
    ///
    /// With no sockets no receive thread runs, datagrams are fed through
    /// `message_receiver()` instead.
    pub fn with_transport(
        guid_prefix: GuidPrefix,
        attributes: ParticipantAttributes,
        transport: Arc<dyn Transport>,
        security: Option<Arc<dyn SecurityPlugin>>,
        sockets: Vec<UdpSocket>,
    ) -> RtpsResult<Self> {
        let registry = EndpointRegistry::new();
        let timed_events = TimedEventResource::new(registry.clone())?;
        let async_writer = AsyncWriterThread::new(registry.clone())?;
        let send_buffers = SendBuffersManager::new(
            attributes.send_buffers_initial,
            MAX_MESSAGE_SIZE,
            attributes.send_buffers_max,
        );
        let (receive_stop, receive_thread) = if sockets.is_empty() {
            (None, None)
        } else {
            let receiver = MessageReceiver::new(guid_prefix, registry.clone(), security.clone());
            let (stop, thread) = spawn_receive_thread(sockets, receiver)?;
            (Some(stop), Some(thread))
        };
        Ok(Self {
            guid: GUID::new(guid_prefix, EntityId::PARTICIPANT),
            attributes,
            participant_id: 0,
            registry,
            transport,
            send_buffers,
            security,
            unicast_locator_list: Vec::new(),
            multicast_locator_list: Vec::new(),
            local_writers: RwLock::new(BTreeMap::new()),
            local_readers: RwLock::new(BTreeMap::new()),
            // largest pre-difined entityKey is {00, 02, 01} @DDS-Security 1.1
            // entity_key of user difined entity start {00, 03, 00}
            entity_key_generator: AtomicU32::new(0x0300),
            receive_stop,
            receive_thread,
            async_writer,
            timed_events,
        })
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid.guid_prefix
    }

    pub fn domain_id(&self) -> u16 {
        self.attributes.domain_id
    }

    pub fn participant_id(&self) -> u16 {
        self.participant_id
    }

    pub fn unicast_locator_list(&self) -> &[Locator] {
        &self.unicast_locator_list
    }

    pub fn multicast_locator_list(&self) -> &[Locator] {
        &self.multicast_locator_list
    }

    /// replaces the locators new endpoints announce
    pub fn set_locators(&mut self, unicast: Vec<Locator>, multicast: Vec<Locator>) {
        self.unicast_locator_list = unicast;
        self.multicast_locator_list = multicast;
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// a receiver dispatching to this Participant's endpoints
    pub fn message_receiver(&self) -> MessageReceiver {
        MessageReceiver::new(
            self.guid.guid_prefix,
            self.registry.clone(),
            self.security.clone(),
        )
    }

    fn gen_entity_key(&self) -> u32 {
        // rtps 2.3 spec, 9.3.1.2 Mapping of the EntityId_t
        // the entityKey can be chosen arbitrarily as long as the EntityId_t is unique within the Participant
        self.entity_key_generator.fetch_add(1, Ordering::Relaxed)
    }

    fn writer_context(&self) -> WriterContext {
        WriterContext {
            transport: self.transport.clone(),
            send_buffers: self.send_buffers.clone(),
            security: self.security.clone(),
            timers: self.timed_events.factory(),
            async_waker: Some(self.async_writer.waker()),
        }
    }

    fn reader_context(&self) -> ReaderContext {
        ReaderContext {
            transport: self.transport.clone(),
            send_buffers: self.send_buffers.clone(),
            security: self.security.clone(),
            timers: self.timed_events.factory(),
        }
    }

    fn writer_ingredients(
        &self,
        config: WriterConfig,
        status_sender: Option<mio_channel::Sender<DataWriterStatusChanged>>,
    ) -> WriterIngredients {
        let guid = GUID::new(
            self.guid.guid_prefix,
            EntityId::new_writer(self.gen_entity_key(), config.topic_kind),
        );
        self.local_writers.write().insert(
            guid,
            WriterProxyData::new(
                guid,
                self.unicast_locator_list.clone(),
                self.multicast_locator_list.clone(),
                config.qos,
            ),
        );
        WriterIngredients {
            guid,
            topic_kind: config.topic_kind,
            qos: config.qos,
            attributes: config.attributes,
            unicast_locator_list: self.unicast_locator_list.clone(),
            multicast_locator_list: self.multicast_locator_list.clone(),
            status_sender,
        }
    }

    fn reader_ingredients(
        &self,
        config: ReaderConfig,
        status_sender: Option<mio_channel::Sender<DataReaderStatusChanged>>,
    ) -> ReaderIngredients {
        let guid = GUID::new(
            self.guid.guid_prefix,
            EntityId::new_reader(self.gen_entity_key(), config.topic_kind),
        );
        let mut proxy = ReaderProxyData::new(
            guid,
            self.unicast_locator_list.clone(),
            self.multicast_locator_list.clone(),
            config.qos,
        );
        proxy.expects_inline_qos = config.attributes.expects_inline_qos;
        self.local_readers.write().insert(guid, proxy);
        ReaderIngredients {
            guid,
            topic_kind: config.topic_kind,
            qos: config.qos,
            attributes: config.attributes,
            unicast_locator_list: self.unicast_locator_list.clone(),
            multicast_locator_list: self.multicast_locator_list.clone(),
            status_sender,
        }
    }

    pub fn create_stateful_writer(
        &self,
        config: WriterConfig,
        status_sender: Option<mio_channel::Sender<DataWriterStatusChanged>>,
    ) -> Arc<WriterHandle<StatefulWriter>> {
        let ingredients = self.writer_ingredients(config, status_sender);
        let guid = ingredients.guid;
        let writer = Arc::new(WriterHandle::new(StatefulWriter::new(
            ingredients,
            self.writer_context(),
        )));
        self.registry.add_writer(guid, writer.clone());
        writer
    }

    pub fn create_stateless_writer(
        &self,
        config: WriterConfig,
        status_sender: Option<mio_channel::Sender<DataWriterStatusChanged>>,
    ) -> Arc<WriterHandle<StatelessWriter>> {
        let ingredients = self.writer_ingredients(config, status_sender);
        let guid = ingredients.guid;
        let writer = Arc::new(WriterHandle::new(StatelessWriter::new(
            ingredients,
            self.writer_context(),
        )));
        self.registry.add_writer(guid, writer.clone());
        writer
    }

    /// StatefulWriter for reliable QoS, StatelessWriter for best-effort
    pub fn create_writer(
        &self,
        config: WriterConfig,
        status_sender: Option<mio_channel::Sender<DataWriterStatusChanged>>,
    ) -> SharedWriter {
        if config.qos.is_reliable() {
            self.create_stateful_writer(config, status_sender)
        } else {
            self.create_stateless_writer(config, status_sender)
        }
    }

    pub fn create_stateful_reader(
        &self,
        config: ReaderConfig,
        status_sender: Option<mio_channel::Sender<DataReaderStatusChanged>>,
    ) -> Arc<Mutex<StatefulReader>> {
        let ingredients = self.reader_ingredients(config, status_sender);
        let guid = ingredients.guid;
        let reader = Arc::new(Mutex::new(StatefulReader::new(
            ingredients,
            self.reader_context(),
        )));
        self.registry.add_reader(guid, reader.clone());
        reader
    }

    pub fn create_stateless_reader(
        &self,
        config: ReaderConfig,
        status_sender: Option<mio_channel::Sender<DataReaderStatusChanged>>,
    ) -> Arc<Mutex<StatelessReader>> {
        let ingredients = self.reader_ingredients(config, status_sender);
        let guid = ingredients.guid;
        let reader = Arc::new(Mutex::new(StatelessReader::new(ingredients)));
        self.registry.add_reader(guid, reader.clone());
        reader
    }

    /// StatefulReader for reliable QoS, StatelessReader for best-effort
    pub fn create_reader(
        &self,
        config: ReaderConfig,
        status_sender: Option<mio_channel::Sender<DataReaderStatusChanged>>,
    ) -> SharedReader {
        if config.qos.is_reliable() {
            self.create_stateful_reader(config, status_sender)
        } else {
            self.create_stateless_reader(config, status_sender)
        }
    }

    /// unregisters the Writer, the Readers it was matched with forget it
    pub fn delete_writer(&self, writer_guid: GUID) -> bool {
        self.local_writers.write().remove(&writer_guid);
        if self.registry.remove_writer(writer_guid).is_none() {
            return false;
        }
        for reader in self.registry.readers() {
            reader.lock().matched_writer_remove(writer_guid);
        }
        debug!("Writer deleted\n\tWriter: {}", writer_guid);
        true
    }

    /// unregisters the Reader, the Writers it was matched with forget it
    pub fn delete_reader(&self, reader_guid: GUID) -> bool {
        self.local_readers.write().remove(&reader_guid);
        if self.registry.remove_reader(reader_guid).is_none() {
            return false;
        }
        for writer in self.registry.writers() {
            writer.matched_reader_remove(reader_guid);
        }
        debug!("Reader deleted\n\tReader: {}", reader_guid);
        true
    }

    /// what remote Participants need to match with a local Writer
    pub fn writer_proxy_data(&self, writer_guid: GUID) -> Option<WriterProxyData> {
        self.local_writers.read().get(&writer_guid).cloned()
    }

    /// what remote Participants need to match with a local Reader
    pub fn reader_proxy_data(&self, reader_guid: GUID) -> Option<ReaderProxyData> {
        self.local_readers.read().get(&reader_guid).cloned()
    }

    /// match a local Writer with a Reader of this or another Participant
    pub fn match_reader(&self, writer_guid: GUID, reader: ReaderProxyData) -> RtpsResult<()> {
        let writer = self
            .registry
            .writer(writer_guid)
            .ok_or(RtpsError::NotMatched(writer_guid))?;
        writer.matched_reader_add(reader)
    }

    /// match a local Reader with a Writer of this or another Participant
    pub fn match_writer(&self, reader_guid: GUID, writer: WriterProxyData) -> RtpsResult<()> {
        let reader = self
            .registry
            .reader(reader_guid)
            .ok_or(RtpsError::NotMatched(reader_guid))?;
        let mut reader = reader.lock();
        reader.matched_writer_add(writer)
    }

    /// match two endpoints of this Participant with each other
    pub fn match_local(&self, writer_guid: GUID, reader_guid: GUID) -> RtpsResult<()> {
        let writer_data = self
            .writer_proxy_data(writer_guid)
            .ok_or(RtpsError::NotMatched(writer_guid))?;
        let reader_data = self
            .reader_proxy_data(reader_guid)
            .ok_or(RtpsError::NotMatched(reader_guid))?;
        self.match_writer(reader_guid, writer_data)?;
        if let Err(e) = self.match_reader(writer_guid, reader_data) {
            if let Some(reader) = self.registry.reader(reader_guid) {
                reader.lock().matched_writer_remove(writer_guid);
            }
            return Err(e);
        }
        info!(
            "local endpoints matched\n\tWriter: {}\n\tReader: {}",
            writer_guid, reader_guid
        );
        Ok(())
    }

    pub fn unmatch(&self, writer_guid: GUID, reader_guid: GUID) {
        if let Some(writer) = self.registry.writer(writer_guid) {
            writer.matched_reader_remove(reader_guid);
        }
        if let Some(reader) = self.registry.reader(reader_guid) {
            reader.lock().matched_writer_remove(writer_guid);
        }
    }
}

impl RTPSEntity for RtpsParticipant {
    fn guid(&self) -> GUID {
        self.guid
    }
}

impl Drop for RtpsParticipant {
    fn drop(&mut self) {
        if let Some(stop) = self.receive_stop.take() {
            if stop.send(()).is_err() {
                debug!("receive thread already stopped");
            }
        }
        if let Some(thread) = self.receive_thread.take() {
            if thread.join().is_err() {
                error!("receive thread panicked");
            }
        }
        debug!("Participant dropped: {}", self.guid.guid_prefix);
    }
}

fn spawn_receive_thread(
    sockets: Vec<UdpSocket>,
    mut receiver: MessageReceiver,
) -> io::Result<(mio_channel::Sender<()>, JoinHandle<()>)> {
    let poll = Poll::new()?;
    let mut listeners = BTreeMap::new();
    for (i, socket) in sockets.into_iter().enumerate() {
        let token = Token(USERTRAFFIC_TOKEN_BASE + i);
        poll.register(&socket, token, Ready::readable(), PollOpt::edge())?;
        listeners.insert(token, socket);
    }
    let (stop, stop_receiver) = mio_channel::channel();
    poll.register(
        &stop_receiver,
        STOP_POLL_TOKEN,
        Ready::readable(),
        PollOpt::edge(),
    )?;
    let thread = thread::Builder::new()
        .name(String::from("rtps-receive"))
        .spawn(move || {
            let mut events = Events::with_capacity(64);
            loop {
                if let Err(e) = poll.poll(&mut events, None) {
                    error!("receive thread stopped: {}", e);
                    return;
                }
                for event in events.iter() {
                    if event.token() == STOP_POLL_TOKEN {
                        while stop_receiver.try_recv().is_ok() {}
                        debug!("receive thread shut down");
                        return;
                    }
                    if let Some(socket) = listeners.get(&event.token()) {
                        receiver.handle_packet(receive_packets(socket));
                    }
                }
            }
        })?;
    Ok((stop, thread))
}

/// everything the socket has queued
fn receive_packets(socket: &UdpSocket) -> Vec<Bytes> {
    let mut packets = Vec::with_capacity(4);
    loop {
        let mut buf = BytesMut::zeroed(MAX_MESSAGE_SIZE);
        match socket.recv_from(&mut buf) {
            Ok((n, _addr)) => {
                buf.truncate(n);
                packets.push(buf.freeze());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return packets,
            Err(e) => {
                error!("couldn't receive from socket: {}", e);
                return packets;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dds::qos::{
        policy::{Durability, History, HistoryQosKind, Reliability},
        ReaderQosBuilder, WriterQosBuilder,
    };
    use crate::message::submessage::element::{SequenceNumber, SerializedPayload, CDR_LE};
    use crate::network::transport::test_transport::RecordingTransport;
    use crate::structure::Duration;
    use crate::rtps::cache::{ChangeKind, InstanceHandle};
    use crate::rtps::reader::{ReaderTimes, RtpsReader};
    use crate::rtps::timed_event::TimedEventKind;
    use core::time::Duration as CoreDuration;

    fn participant(key: u8, transport: Arc<RecordingTransport>) -> RtpsParticipant {
        let mut participant = RtpsParticipant::with_transport(
            GuidPrefix::from_bytes([key; 12]),
            ParticipantAttributes::default(),
            transport,
            None,
            Vec::new(),
        )
        .unwrap();
        participant.set_locators(
            vec![Locator::new_from_ipv4(7410 + key as u32, [127, 0, 0, 1])],
            Vec::new(),
        );
        participant
    }

    fn writer_config(reliability: Reliability) -> WriterConfig {
        WriterConfig {
            topic_kind: TopicKind::NoKey,
            qos: WriterQosBuilder::new()
                .reliability(reliability)
                .durability(Durability::TransientLocal)
                .build(),
            attributes: WriterAttributes::default(),
        }
    }

    fn reader_config(reliability: Reliability) -> ReaderConfig {
        ReaderConfig {
            topic_kind: TopicKind::NoKey,
            qos: ReaderQosBuilder::new()
                .reliability(reliability)
                .history(History {
                    kind: HistoryQosKind::KeepAll,
                    depth: 1,
                })
                .build(),
            // answer at once instead of through the timer thread
            attributes: ReaderAttributes {
                times: ReaderTimes {
                    heartbeat_response_delay: Duration::ZERO,
                    initial_acknack_delay: Duration::ZERO,
                },
                ..ReaderAttributes::default()
            },
        }
    }

    fn payload(v: u8) -> Option<SerializedPayload> {
        Some(SerializedPayload::new(CDR_LE, Bytes::from(vec![v; 16])))
    }

    /// datagrams captured by `from` delivered to `to`
    fn deliver(from: &RecordingTransport, to: &RtpsParticipant) -> usize {
        let datagrams: Vec<Bytes> = from.take().into_iter().map(|(_, d)| d).collect();
        let n = datagrams.len();
        to.message_receiver().handle_packet(datagrams);
        n
    }

    #[test]
    fn endpoint_kind_follows_reliability() {
        let p = participant(1, Arc::new(RecordingTransport::default()));
        let reliable = p.create_writer(writer_config(Reliability::default_reliable()), None);
        let best_effort = p.create_writer(writer_config(Reliability::default_besteffort()), None);
        assert!(reliable.lock().is_reliable());
        assert!(!best_effort.lock().is_reliable());
        assert_ne!(reliable.lock().guid(), best_effort.lock().guid());
        let reader = p.create_reader(reader_config(Reliability::default_besteffort()), None);
        assert!(!reader.lock().is_reliable());
        assert_eq!(p.registry().len(), 3);
        let reader_guid = reader.lock().guid();
        assert!(p.delete_reader(reader_guid));
        assert!(!p.delete_reader(reader_guid));
        assert_eq!(p.registry().len(), 2);
    }

    #[test]
    fn reliable_pair_across_participants() {
        let pub_transport = Arc::new(RecordingTransport::default());
        let sub_transport = Arc::new(RecordingTransport::default());
        let publisher = participant(1, pub_transport.clone());
        let subscriber = participant(2, sub_transport.clone());

        let (status_sender, statuses) = mio_channel::channel();
        let writer = publisher.create_stateful_writer(
            writer_config(Reliability::default_reliable()),
            Some(status_sender),
        );
        let reader = subscriber.create_stateful_reader(
            reader_config(Reliability::default_reliable()),
            None,
        );
        let writer_guid = writer.lock().guid();
        let reader_guid = reader.lock().guid();
        publisher
            .match_reader(writer_guid, subscriber.reader_proxy_data(reader_guid).unwrap())
            .unwrap();
        subscriber
            .match_writer(reader_guid, publisher.writer_proxy_data(writer_guid).unwrap())
            .unwrap();

        for v in 1..=3 {
            writer
                .write(ChangeKind::Alive, payload(v), InstanceHandle::NIL, None)
                .unwrap();
        }
        writer.lock().assert_liveliness().unwrap();
        writer.on_timed_event(TimedEventKind::PeriodicHeartbeat {
            writer: writer_guid,
        });
        for _ in 0..3 {
            deliver(&pub_transport, &subscriber);
            deliver(&sub_transport, &publisher);
        }
        let received: Vec<SequenceNumber> = reader
            .lock()
            .take_changes()
            .into_iter()
            .map(|c| c.sequence_number)
            .collect();
        assert_eq!(
            received,
            vec![SequenceNumber(1), SequenceNumber(2), SequenceNumber(3)]
        );
        assert!(writer.wait_for_all_acked(CoreDuration::from_millis(10)));
        let mut matched = false;
        while let Ok(status) = statuses.try_recv() {
            matched |= matches!(status, DataWriterStatusChanged::PublicationMatched(_));
        }
        assert!(matched);
    }

    #[test]
    fn local_match_and_unmatch() {
        let transport = Arc::new(RecordingTransport::default());
        let p = participant(3, transport.clone());
        let writer = p.create_writer(writer_config(Reliability::default_besteffort()), None);
        let reader = p.create_reader(reader_config(Reliability::default_besteffort()), None);
        let writer_guid = writer.lock().guid();
        let reader_guid = reader.lock().guid();
        p.match_local(writer_guid, reader_guid).unwrap();
        assert!(writer.lock().matched_reader_is_matched(reader_guid));
        assert!(reader.lock().matched_writer_is_matched(writer_guid));

        writer
            .write(ChangeKind::Alive, payload(7), InstanceHandle::NIL, None)
            .unwrap();
        assert!(deliver(&transport, &p) > 0);
        assert_eq!(reader.lock().take_changes().len(), 1);

        p.unmatch(writer_guid, reader_guid);
        assert!(!writer.lock().matched_reader_is_matched(reader_guid));
        assert!(!reader.lock().matched_writer_is_matched(writer_guid));
        assert!(matches!(
            p.match_local(writer_guid, GUID::UNKNOW),
            Err(RtpsError::NotMatched(_))
        ));
    }

    #[test]
    fn drop_stops_every_thread() {
        let socket = UdpSocket::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let p = RtpsParticipant::with_transport(
            GuidPrefix::from_bytes([6; 12]),
            ParticipantAttributes::default(),
            Arc::new(RecordingTransport::default()),
            None,
            vec![socket],
        )
        .unwrap();
        assert!(p.receive_thread.is_some());
        thread::sleep(CoreDuration::from_millis(50));
        let (done_sender, done) = std::sync::mpsc::channel();
        thread::spawn(move || {
            drop(p);
            let _ = done_sender.send(());
        });
        assert!(done.recv_timeout(CoreDuration::from_secs(5)).is_ok());
    }

    #[test]
    fn incompatible_local_match_leaves_nothing_matched() {
        let p = participant(4, Arc::new(RecordingTransport::default()));
        let writer = p.create_writer(writer_config(Reliability::default_besteffort()), None);
        let reader = p.create_reader(reader_config(Reliability::default_reliable()), None);
        let writer_guid = writer.lock().guid();
        let reader_guid = reader.lock().guid();
        assert!(p.match_local(writer_guid, reader_guid).is_err());
        assert!(!writer.lock().matched_reader_is_matched(reader_guid));
        assert!(!reader.lock().matched_writer_is_matched(writer_guid));
    }
}
