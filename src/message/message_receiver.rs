//! rtps 2.3 spec 8.3.4 The RTPS Message Receiver
//!
//! Decodes one datagram at a time and hands its submessages to the local
//! endpoints found in the `EndpointRegistry`. Decode errors end here: they
//! are logged and the rest of the message is dropped.

use crate::message::message_header::{Header, ProtocolVersion};
use crate::message::submessage::element::{
    acknack::AckNack, data::Data, datafrag::DataFrag, gap::Gap, heartbeat::Heartbeat,
    heartbeatfrag::HeartbeatFrag, nackfrag::NackFrag, Locator, SequenceNumber, Timestamp,
};
use crate::message::submessage::submessage_flag::*;
use crate::message::submessage::{
    EntitySubmessage, InterpreterSubmessage, SubMessage, SubMessageBody, SubMessageHeader,
    SubMessageIter,
};
use crate::rtps::registry::{EndpointRegistry, SharedReader};
use crate::security::{SecureDecode, SecurityPlugin};
use crate::structure::{GuidPrefix, VendorId, GUID};
use alloc::sync::Arc;
use bytes::Bytes;
use enumflags2::BitFlags;
use log::{debug, info, trace, warn};

pub struct MessageReceiver {
    own_guid_prefix: GuidPrefix,
    registry: Arc<EndpointRegistry>,
    security: Option<Arc<dyn SecurityPlugin>>,
    source_version: ProtocolVersion,
    source_vendor_id: VendorId,
    source_guid_prefix: GuidPrefix,
    dest_guid_prefix: GuidPrefix,
    unicast_reply_locator_list: Vec<Locator>,
    multicast_reply_locator_list: Vec<Locator>,
    have_timestamp: bool,
    timestamp: Timestamp,
}

/// what one submessage did to the message being processed
enum Flow {
    Continue,
    Abort,
}

impl MessageReceiver {
    pub fn new(
        participant_guidprefix: GuidPrefix,
        registry: Arc<EndpointRegistry>,
        security: Option<Arc<dyn SecurityPlugin>>,
    ) -> Self {
        Self {
            own_guid_prefix: participant_guidprefix,
            registry,
            security,
            source_version: ProtocolVersion::PROTOCOLVERSION,
            source_vendor_id: VendorId::VENDORID_UNKNOW,
            source_guid_prefix: GuidPrefix::UNKNOW,
            dest_guid_prefix: GuidPrefix::UNKNOW,
            unicast_reply_locator_list: Vec::new(),
            multicast_reply_locator_list: Vec::new(),
            have_timestamp: false,
            timestamp: Timestamp::TIME_INVALID,
        }
    }

    fn reset(&mut self) {
        self.source_version = ProtocolVersion::PROTOCOLVERSION;
        self.source_vendor_id = VendorId::VENDORID_UNKNOW;
        self.source_guid_prefix = GuidPrefix::UNKNOW;
        self.dest_guid_prefix = GuidPrefix::UNKNOW;
        self.unicast_reply_locator_list.clear();
        self.multicast_reply_locator_list.clear();
        self.have_timestamp = false;
        self.timestamp = Timestamp::TIME_INVALID;
    }

    pub fn handle_packet(&mut self, messages: Vec<Bytes>) {
        for message in messages {
            self.process_message(message);
        }
    }

    /// decode `message` and dispatch every submessage up to the first malformed one
    pub fn process_message(&mut self, message: Bytes) {
        // Is DDSPING
        if message.len() < 20
            && message.len() >= 16
            && message[0..4] == b"RTPS"[..]
            && message[9..16] == b"DDSPING"[..]
        {
            info!("Received DDSPING");
            return;
        }
        let header = match Header::deserialize(&message) {
            Ok(h) => h,
            Err(e) => {
                warn!("couldn't deserialize RTPS message: {}", e);
                return;
            }
        };

        self.reset();
        self.source_version = header.version;
        self.source_vendor_id = header.vendor_id;
        self.source_guid_prefix = header.guid_prefix;
        self.dest_guid_prefix = self.own_guid_prefix;
        trace!(
            "receive RTPS {}.{} message from {} vendor {:?}",
            self.source_version.major,
            self.source_version.minor,
            self.source_guid_prefix,
            self.source_vendor_id.vendor_id
        );

        let message = match self.decode_message(message) {
            Some(m) => m,
            None => return,
        };

        for item in SubMessageIter::new(message, Header::LEN) {
            let (submessage_header, body) = match item {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        "malformed RTPS message from {}, rest dropped: {}",
                        self.source_guid_prefix, e
                    );
                    return;
                }
            };
            let (submessage_header, body) = match self.decode_submessage(submessage_header, body)
            {
                Some(s) => s,
                None => continue,
            };
            let submessage = match SubMessage::deserialize(submessage_header, &body) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    trace!(
                        "submessage {:?} skipped",
                        submessage_header.get_submessagekind()
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        "couldn't deserialize submessage {:?} from {}, rest dropped: {}",
                        submessage_header.get_submessagekind(),
                        self.source_guid_prefix,
                        e
                    );
                    return;
                }
            };
            let flow = match submessage.body {
                SubMessageBody::Entity(e) => self.handle_entity_submessage(e),
                SubMessageBody::Interpreter(i) => self.handle_interpreter_submessage(i),
            };
            if let Flow::Abort = flow {
                return;
            }
        }
    }

    fn decode_message(&self, message: Bytes) -> Option<Bytes> {
        let security = match &self.security {
            Some(s) => s,
            None => return Some(message),
        };
        match security.decode_rtps_message(&message, self.source_guid_prefix) {
            Ok(SecureDecode::NotProtected) => Some(message),
            Ok(SecureDecode::Decoded(plain)) => match Header::deserialize(&plain) {
                Ok(_) => Some(plain),
                Err(e) => {
                    warn!("decoded RTPS message has no valid header: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!(
                    "couldn't decode RTPS message from {}: {}",
                    self.source_guid_prefix, e
                );
                None
            }
        }
    }

    /// None drops the submessage alone
    fn decode_submessage(
        &self,
        header: SubMessageHeader,
        body: Bytes,
    ) -> Option<(SubMessageHeader, Bytes)> {
        let security = match &self.security {
            Some(s) => s,
            None => return Some((header, body)),
        };
        let mut whole = Vec::with_capacity(SubMessageHeader::LEN + body.len());
        whole.extend_from_slice(&header.to_bytes());
        whole.extend_from_slice(&body);
        let plain = match security.decode_rtps_submessage(&whole, self.source_guid_prefix) {
            Ok(SecureDecode::NotProtected) => return Some((header, body)),
            Ok(SecureDecode::Decoded(plain)) => plain,
            Err(e) => {
                warn!(
                    "couldn't decode submessage {:?} from {}: {}",
                    header.get_submessagekind(),
                    self.source_guid_prefix,
                    e
                );
                return None;
            }
        };
        // the plaintext is one submessage with its own header
        let mut inner = SubMessageIter::new(plain, 0);
        match inner.next() {
            Some(Ok(decoded)) => Some(decoded),
            Some(Err(e)) => {
                warn!("decoded submessage is malformed: {}", e);
                None
            }
            None => {
                warn!("decoded submessage is empty");
                None
            }
        }
    }

    fn handle_entity_submessage(&mut self, entity_subm: EntitySubmessage) -> Flow {
        if self.dest_guid_prefix != self.own_guid_prefix
            && self.dest_guid_prefix != GuidPrefix::UNKNOW
        {
            trace!(
                "submessage for other Participant {} skipped",
                self.dest_guid_prefix
            );
            return Flow::Continue;
        }
        match entity_subm {
            EntitySubmessage::AckNack(acknack, flags) => self.handle_acknack_submsg(acknack, flags),
            EntitySubmessage::Data(data, flags) => self.handle_data_submsg(data, flags),
            EntitySubmessage::DataFrag(data_frag, flags) => {
                self.handle_datafrag_submsg(data_frag, flags)
            }
            EntitySubmessage::Gap(gap, flags) => self.handle_gap_submsg(gap, flags),
            EntitySubmessage::HeartBeat(heartbeat, flags) => {
                self.handle_heartbeat_submsg(heartbeat, flags)
            }
            EntitySubmessage::HeartbeatFrag(heartbeatfrag, flags) => {
                self.handle_heartbeatfrag_submsg(heartbeatfrag, flags)
            }
            EntitySubmessage::NackFrag(nack_frag, flags) => {
                self.handle_nackfrag_submsg(nack_frag, flags)
            }
        }
        Flow::Continue
    }

    fn handle_interpreter_submessage(&mut self, interpreter_subm: InterpreterSubmessage) -> Flow {
        match interpreter_subm {
            InterpreterSubmessage::InfoReply(info_reply, flags) => {
                self.unicast_reply_locator_list = info_reply.unicast_locator_list;
                if flags.contains(InfoReplyFlag::Multicast) {
                    match info_reply.multicast_locator_list {
                        Some(multi_loc_list) => self.multicast_reply_locator_list = multi_loc_list,
                        None => {
                            warn!("Invalid InfoReply Submessage");
                            return Flow::Abort;
                        }
                    }
                } else {
                    self.multicast_reply_locator_list.clear();
                }
            }
            InterpreterSubmessage::InfoReplyIp4(info_reply_ip4, flags) => {
                self.unicast_reply_locator_list = vec![info_reply_ip4.unicast_locator.into()];
                if flags.contains(InfoReplyIp4Flag::Multicast) {
                    match info_reply_ip4.multicast_locator {
                        Some(multi_loc) => {
                            self.multicast_reply_locator_list = vec![multi_loc.into()]
                        }
                        None => {
                            warn!("Invalid InfoReplyIp4 Submessage");
                            return Flow::Abort;
                        }
                    }
                } else {
                    self.multicast_reply_locator_list.clear();
                }
            }
            InterpreterSubmessage::InfoTimestamp(info_ts, flags) => {
                if flags.contains(InfoTimestampFlag::Invalidate) {
                    self.have_timestamp = false;
                } else {
                    match info_ts.timestamp {
                        Some(ts) => {
                            self.have_timestamp = true;
                            self.timestamp = ts;
                        }
                        None => {
                            warn!("Invalid InfoTimestamp Submessage");
                            return Flow::Abort;
                        }
                    }
                }
            }
            InterpreterSubmessage::InfoSource(info_souce, _flags) => {
                self.source_guid_prefix = info_souce.guid_prefix;
                self.source_version = info_souce.protocol_version;
                self.source_vendor_id = info_souce.vendor_id;
                self.unicast_reply_locator_list.clear();
                self.multicast_reply_locator_list.clear();
                self.have_timestamp = false;
            }
            InterpreterSubmessage::InfoDestination(info_dst, _flags) => {
                self.dest_guid_prefix = if info_dst.guid_prefix == GuidPrefix::UNKNOW {
                    self.own_guid_prefix
                } else {
                    info_dst.guid_prefix
                };
            }
        }
        Flow::Continue
    }

    fn source_timestamp(&self) -> Timestamp {
        if self.have_timestamp {
            self.timestamp
        } else {
            Timestamp::TIME_INVALID
        }
    }

    /// Readers of this Participant a submessage from `writer_guid` goes to,
    /// told about the reply locators the message carried
    fn readers_for(&self, reader_guid: GUID, writer_guid: GUID) -> Vec<SharedReader> {
        let readers = self.registry.readers_for(reader_guid, writer_guid);
        if readers.is_empty() {
            trace!(
                "no local Reader for submessage\n\tReader: {}\n\tWriter: {}",
                reader_guid,
                writer_guid
            );
        }
        let reply_locators: Vec<Locator> = self
            .unicast_reply_locator_list
            .iter()
            .chain(self.multicast_reply_locator_list.iter())
            .filter(|l| **l != Locator::INVALID)
            .copied()
            .collect();
        if !reply_locators.is_empty() {
            for reader in &readers {
                reader
                    .lock()
                    .set_reply_locators(writer_guid, reply_locators.clone());
            }
        }
        readers
    }

    fn handle_acknack_submsg(&self, acknack: AckNack, flags: BitFlags<AckNackFlag>) {
        // rtps 2.3 spec 8.3.7.1 AckNack
        let writer_guid = GUID::new(self.own_guid_prefix, acknack.writer_id);
        let reader_guid = GUID::new(self.source_guid_prefix, acknack.reader_id);

        if acknack.reader_sn_state.base() == SequenceNumber(0)
            && acknack.reader_sn_state.num_bits() == 0
        {
            // preemptive ACKNACK, sent before the remote Reader knows of any change
            debug!(
                "received preemptive ACKNACK\n\tWriter: {}\n\tReader: {}",
                writer_guid, reader_guid
            );
            return;
        }
        if !acknack.is_valid() {
            warn!(
                "invalid ACKNACK dropped\n\tWriter: {}\n\tReader: {}",
                writer_guid, reader_guid
            );
            return;
        }
        match self.registry.writer(writer_guid) {
            Some(writer) => {
                writer.process_acknack(reader_guid, &acknack, flags.contains(AckNackFlag::Final));
            }
            None => trace!(
                "ACKNACK for unknown Writer\n\tWriter: {}\n\tReader: {}",
                writer_guid,
                reader_guid
            ),
        }
    }

    fn handle_nackfrag_submsg(&self, nack_frag: NackFrag, _flags: BitFlags<NackFragFlag>) {
        // rtps 2.3 spec 8.3.7.5 NackFrag
        let writer_guid = GUID::new(self.own_guid_prefix, nack_frag.writer_id);
        let reader_guid = GUID::new(self.source_guid_prefix, nack_frag.reader_id);
        if !nack_frag.is_valid() {
            warn!(
                "invalid NACK_FRAG dropped\n\tWriter: {}\n\tReader: {}",
                writer_guid, reader_guid
            );
            return;
        }
        match self.registry.writer(writer_guid) {
            Some(writer) => {
                writer.process_nack_frag(reader_guid, &nack_frag);
            }
            None => trace!(
                "NACK_FRAG for unknown Writer\n\tWriter: {}\n\tReader: {}",
                writer_guid,
                reader_guid
            ),
        }
    }

    fn handle_data_submsg(&self, data: Data, _flags: BitFlags<DataFlag>) {
        // rtps 2.3 spec 8.3.7.2 Data
        let writer_guid = GUID::new(self.source_guid_prefix, data.writer_id);
        let reader_guid = GUID::new(self.own_guid_prefix, data.reader_id);
        if data.writer_sn <= SequenceNumber(0) {
            warn!(
                "DATA with sequence number {} dropped\n\tWriter: {}",
                data.writer_sn, writer_guid
            );
            return;
        }
        let timestamp = self.source_timestamp();
        for reader in self.readers_for(reader_guid, writer_guid) {
            reader.lock().process_data(writer_guid, &data, timestamp);
        }
    }

    fn handle_datafrag_submsg(&self, data_frag: DataFrag, _flags: BitFlags<DataFragFlag>) {
        // rtps 2.3 spec 8.3.7.3 DataFrag
        let writer_guid = GUID::new(self.source_guid_prefix, data_frag.writer_id);
        let reader_guid = GUID::new(self.own_guid_prefix, data_frag.reader_id);
        if !data_frag.is_valid() {
            warn!(
                "invalid DATA_FRAG {} dropped\n\tWriter: {}",
                data_frag.writer_sn, writer_guid
            );
            return;
        }
        let timestamp = self.source_timestamp();
        for reader in self.readers_for(reader_guid, writer_guid) {
            reader
                .lock()
                .process_data_frag(writer_guid, &data_frag, timestamp);
        }
    }

    fn handle_heartbeat_submsg(&self, heartbeat: Heartbeat, flags: BitFlags<HeartbeatFlag>) {
        // rtps 2.3 spec 8.3.7.5 Heartbeat
        let writer_guid = GUID::new(self.source_guid_prefix, heartbeat.writer_id);
        let reader_guid = GUID::new(self.own_guid_prefix, heartbeat.reader_id);
        if !heartbeat.is_valid() {
            warn!(
                "invalid HEARTBEAT [{}, {}] dropped\n\tWriter: {}",
                heartbeat.first_sn, heartbeat.last_sn, writer_guid
            );
            return;
        }
        let is_final = flags.contains(HeartbeatFlag::Final);
        let liveliness = flags.contains(HeartbeatFlag::Liveliness);
        for reader in self.readers_for(reader_guid, writer_guid) {
            reader
                .lock()
                .process_heartbeat(writer_guid, &heartbeat, is_final, liveliness);
        }
    }

    fn handle_heartbeatfrag_submsg(
        &self,
        heartbeatfrag: HeartbeatFrag,
        _flags: BitFlags<HeartbeatFragFlag>,
    ) {
        // rtps 2.3 spec 8.3.7.6 HeartbeatFrag
        let writer_guid = GUID::new(self.source_guid_prefix, heartbeatfrag.writer_id);
        let reader_guid = GUID::new(self.own_guid_prefix, heartbeatfrag.reader_id);
        if !heartbeatfrag.is_valid() {
            warn!(
                "invalid HEARTBEAT_FRAG dropped\n\tWriter: {}",
                writer_guid
            );
            return;
        }
        for reader in self.readers_for(reader_guid, writer_guid) {
            reader
                .lock()
                .process_heartbeat_frag(writer_guid, &heartbeatfrag);
        }
    }

    fn handle_gap_submsg(&self, gap: Gap, _flags: BitFlags<GapFlag>) {
        // rtps 2.3 spec 8.3.7.4 Gap
        let writer_guid = GUID::new(self.source_guid_prefix, gap.writer_id);
        let reader_guid = GUID::new(self.own_guid_prefix, gap.reader_id);
        if !gap.is_valid() {
            warn!("invalid GAP dropped\n\tWriter: {}", writer_guid);
            return;
        }
        for reader in self.readers_for(reader_guid, writer_guid) {
            reader.lock().process_gap(writer_guid, &gap);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dds::qos::{
        policy::{History, HistoryQosKind, Reliability},
        ReaderQosBuilder, WriterQosBuilder,
    };
    use crate::message::message_group::RTPSMessageGroup;
    use crate::message::send_buffers::SendBuffersManager;
    use crate::message::submessage::element::{SequenceNumberSet, SerializedPayload, CDR_LE};
    use crate::network::transport::test_transport::RecordingTransport;
    use crate::rtps::cache::{ChangeKind, InstanceHandle};
    use crate::rtps::reader::{
        ReaderAttributes, ReaderContext, ReaderIngredients, ReaderTimes, RtpsReader,
        StatefulReader,
    };
    use crate::rtps::registry::SharedWriter;
    use crate::rtps::stateful_writer::StatefulWriter;
    use crate::rtps::timed_event::{TimedEventKind, TimerFactory};
    use crate::rtps::writer::{
        RtpsWriter, WriterAttributes, WriterContext, WriterHandle, WriterIngredients,
    };
    use crate::security::test_plugin::XorPlugin;
    use crate::structure::{
        Duration, EntityId, ReaderProxyData, RTPSEntity, TopicKind, WriterProxyData,
    };
    use parking_lot::Mutex;

    fn writer_guid() -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([1; 12]),
            EntityId::new_writer(1, TopicKind::NoKey),
        )
    }

    fn reader_guid() -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([2; 12]),
            EntityId::new_reader(1, TopicKind::NoKey),
        )
    }

    fn writer_locator() -> Locator {
        Locator::new_from_ipv4(7411, [127, 0, 0, 1])
    }

    fn reader_locator() -> Locator {
        Locator::new_from_ipv4(7412, [127, 0, 0, 1])
    }

    struct ReaderSide {
        registry: Arc<EndpointRegistry>,
        reader: Arc<Mutex<StatefulReader>>,
        transport: Arc<RecordingTransport>,
    }

    fn reader_side() -> ReaderSide {
        let transport = Arc::new(RecordingTransport::default());
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
                    .history(History {
                        kind: HistoryQosKind::KeepAll,
                        depth: 1,
                    })
                    .build(),
                attributes: ReaderAttributes {
                    times: ReaderTimes {
                        heartbeat_response_delay: Duration::ZERO,
                        initial_acknack_delay: Duration::ZERO,
                    },
                    ..ReaderAttributes::default()
                },
                unicast_locator_list: vec![reader_locator()],
                multicast_locator_list: Vec::new(),
                status_sender: None,
            },
            context,
        );
        reader
            .matched_writer_add(WriterProxyData::new(
                writer_guid(),
                vec![writer_locator()],
                Vec::new(),
                WriterQosBuilder::new().build(),
            ))
            .unwrap();
        // initial ACKNACK is not what the tests look at
        transport.take();
        let reader = Arc::new(Mutex::new(reader));
        let registry = EndpointRegistry::new();
        registry.add_reader(reader_guid(), reader.clone());
        ReaderSide {
            registry,
            reader,
            transport,
        }
    }

    struct WriterSide {
        registry: Arc<EndpointRegistry>,
        writer: Arc<WriterHandle<StatefulWriter>>,
        transport: Arc<RecordingTransport>,
    }

    fn writer_side() -> WriterSide {
        let transport = Arc::new(RecordingTransport::default());
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
                qos: WriterQosBuilder::new().build(),
                attributes: WriterAttributes::default(),
                unicast_locator_list: vec![writer_locator()],
                multicast_locator_list: Vec::new(),
                status_sender: None,
            },
            context,
        );
        let writer = Arc::new(WriterHandle::new(writer));
        writer
            .matched_reader_add(ReaderProxyData::new(
                reader_guid(),
                vec![reader_locator()],
                Vec::new(),
                ReaderQosBuilder::new()
                    .reliability(Reliability::default_reliable())
                    .build(),
            ))
            .unwrap();
        let registry = EndpointRegistry::new();
        let shared: SharedWriter = writer.clone();
        registry.add_writer(writer_guid(), shared);
        WriterSide {
            registry,
            writer,
            transport,
        }
    }

    fn payload(seq: u8) -> Option<SerializedPayload> {
        Some(SerializedPayload::new(CDR_LE, Bytes::from(vec![seq; 8])))
    }

    /// one datagram from the Writer's Participant built by `build`
    fn datagram<F>(security: Option<&dyn crate::security::SecurityPlugin>, build: F) -> Bytes
    where
        F: FnOnce(&mut RTPSMessageGroup<'_>),
    {
        let transport = RecordingTransport::default();
        let buffers = SendBuffersManager::new(1, 65536, 0);
        let mut group = RTPSMessageGroup::new(
            &transport,
            &buffers,
            security,
            writer_guid().guid_prefix,
            65500,
            None,
        )
        .unwrap();
        group
            .set_destination(&[reader_locator()], &[reader_guid().guid_prefix])
            .unwrap();
        build(&mut group);
        group.flush().unwrap();
        drop(group);
        let mut sent = transport.take();
        assert_eq!(sent.len(), 1);
        sent.remove(0).1
    }

    fn data_datagram(seq: i64) -> Bytes {
        let change = crate::rtps::cache::CacheChange::new(
            ChangeKind::Alive,
            writer_guid(),
            SequenceNumber(seq),
            Timestamp::TIME_ZERO,
            payload(seq as u8),
            InstanceHandle::NIL,
        );
        datagram(None, |group| {
            group
                .add_data(&change, reader_guid().entity_id, false)
                .unwrap()
        })
    }

    fn received(side: &ReaderSide) -> Vec<i64> {
        side.reader
            .lock()
            .history()
            .iter()
            .map(|c| c.sequence_number.0)
            .collect()
    }

    #[test]
    fn data_reaches_matched_reader() {
        let side = reader_side();
        let mut receiver =
            MessageReceiver::new(reader_guid().guid_prefix, side.registry.clone(), None);
        receiver.process_message(data_datagram(1));
        receiver.process_message(data_datagram(2));
        assert_eq!(received(&side), vec![1, 2]);
    }

    #[test]
    fn overlong_submessage_aborts_whole_message() {
        let side = reader_side();
        let mut receiver =
            MessageReceiver::new(reader_guid().guid_prefix, side.registry.clone(), None);

        // a HEARTBEAT claiming far more bytes than the datagram holds, in front of a DATA
        let good = data_datagram(1);
        let mut bad = good[..Header::LEN].to_vec();
        bad.extend_from_slice(&[0x07, 0x01, 0xff, 0xff, 0, 0, 0, 0]);
        bad.extend_from_slice(&good[Header::LEN..]);
        receiver.process_message(Bytes::from(bad));
        assert!(received(&side).is_empty());

        // the same behind the DATA: the DATA is taken, nothing after it
        let mut tail = good.to_vec();
        tail.extend_from_slice(&[0x07, 0x01, 0xff, 0xff, 0, 0]);
        receiver.process_message(Bytes::from(tail));
        assert_eq!(received(&side), vec![1]);

        // shorter than a header
        receiver.process_message(Bytes::from_static(b"RTPS\x02"));
        assert_eq!(received(&side), vec![1]);
    }

    #[test]
    fn submessages_for_other_participant_are_skipped() {
        let side = reader_side();
        let mut receiver = MessageReceiver::new(
            GuidPrefix::from_bytes([9; 12]),
            side.registry.clone(),
            None,
        );
        // INFO_DST in the datagram names the Reader's Participant, not ours
        receiver.process_message(data_datagram(1));
        assert!(received(&side).is_empty());
    }

    #[test]
    fn zero_sequence_number_is_rejected() {
        let side = reader_side();
        let mut receiver =
            MessageReceiver::new(reader_guid().guid_prefix, side.registry.clone(), None);
        receiver.process_message(data_datagram(0));
        assert!(received(&side).is_empty());
    }

    #[test]
    fn info_reply_redirects_acknack() {
        let side = reader_side();
        let mut receiver =
            MessageReceiver::new(reader_guid().guid_prefix, side.registry.clone(), None);
        let heartbeat = datagram(None, |group| {
            group
                .add_heartbeat(
                    writer_guid().entity_id,
                    reader_guid().entity_id,
                    SequenceNumber(1),
                    SequenceNumber(1),
                    1,
                    false,
                    false,
                )
                .unwrap()
        });
        let reply_to = Locator::new_from_ipv4(9000, [10, 0, 0, 7]);
        // INFO_REPLY, little endian, one unicast locator
        let mut info_reply = vec![0x0f, 0x01, 28, 0];
        info_reply.extend_from_slice(&1_u32.to_le_bytes());
        info_reply.extend_from_slice(&reply_to.kind.to_le_bytes());
        info_reply.extend_from_slice(&reply_to.port.to_le_bytes());
        info_reply.extend_from_slice(&reply_to.address);
        let mut message = heartbeat[..Header::LEN].to_vec();
        message.extend_from_slice(&info_reply);
        message.extend_from_slice(&heartbeat[Header::LEN..]);

        receiver.process_message(Bytes::from(message));
        let acknacks: Vec<_> = side
            .transport
            .take_submessages()
            .into_iter()
            .filter(|(_, s)| {
                matches!(s.body, SubMessageBody::Entity(EntitySubmessage::AckNack(..)))
            })
            .collect();
        assert_eq!(acknacks.len(), 1);
        assert_eq!(acknacks[0].0, reply_to);
    }

    #[test]
    fn acknack_reaches_writer() {
        let side = writer_side();
        side.writer
            .write(ChangeKind::Alive, payload(1), InstanceHandle::NIL, None)
            .unwrap();
        side.transport.take();
        assert!(!side.writer.lock().all_changes_acked());

        let acknack = {
            let transport = RecordingTransport::default();
            let buffers = SendBuffersManager::new(1, 65536, 0);
            let mut group = RTPSMessageGroup::new(
                &transport,
                &buffers,
                None,
                reader_guid().guid_prefix,
                65500,
                None,
            )
            .unwrap();
            group
                .set_destination(&[writer_locator()], &[writer_guid().guid_prefix])
                .unwrap();
            group
                .add_acknack(
                    reader_guid().entity_id,
                    writer_guid().entity_id,
                    SequenceNumberSet::new_empty(SequenceNumber(2)),
                    1,
                    true,
                )
                .unwrap();
            group.flush().unwrap();
            drop(group);
            transport.take().remove(0).1
        };
        let mut receiver =
            MessageReceiver::new(writer_guid().guid_prefix, side.registry.clone(), None);
        receiver.process_message(acknack);
        assert!(side.writer.lock().all_changes_acked());
        assert!(side.writer.wait_for_all_acked(core::time::Duration::ZERO));
    }

    #[test]
    fn reliable_exchange_through_two_receivers() {
        let writer = writer_side();
        let reader = reader_side();
        let mut at_reader =
            MessageReceiver::new(reader_guid().guid_prefix, reader.registry.clone(), None);
        let mut at_writer =
            MessageReceiver::new(writer_guid().guid_prefix, writer.registry.clone(), None);

        for seq in 1..=3_u8 {
            writer
                .writer
                .write(ChangeKind::Alive, payload(seq), InstanceHandle::NIL, None)
                .unwrap();
        }
        // the second DATA is lost on the way
        let mut datagrams = writer.transport.take();
        assert!(!datagrams.is_empty());
        let lossy: Vec<Bytes> = datagrams
            .drain(..)
            .map(|(_, bytes)| bytes)
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, bytes)| bytes)
            .collect();
        at_reader.handle_packet(lossy);

        // HEARTBEAT, ACKNACK requesting the lost change, repair
        writer.writer.on_timed_event(TimedEventKind::PeriodicHeartbeat {
            writer: writer_guid(),
        });
        for _ in 0..3 {
            at_reader.handle_packet(writer.transport.take().into_iter().map(|d| d.1).collect());
            at_writer.handle_packet(reader.transport.take().into_iter().map(|d| d.1).collect());
            writer.writer.on_timed_event(TimedEventKind::NackResponseDelay {
                writer: writer_guid(),
                reader: reader_guid(),
            });
            writer.writer.on_timed_event(TimedEventKind::PeriodicHeartbeat {
                writer: writer_guid(),
            });
        }
        assert_eq!(received(&reader), vec![1, 2, 3]);
        assert!(writer.writer.lock().all_changes_acked());
        assert_eq!(writer.writer.lock().guid(), writer_guid());
    }

    #[test]
    fn protected_submessages_are_decoded() {
        let plugin = XorPlugin::default();
        let change = crate::rtps::cache::CacheChange::new(
            ChangeKind::Alive,
            writer_guid(),
            SequenceNumber(1),
            Timestamp::TIME_ZERO,
            payload(1),
            InstanceHandle::NIL,
        );
        let protected = datagram(Some(&plugin), |group| {
            group
                .add_data(&change, reader_guid().entity_id, false)
                .unwrap()
        });
        assert!(*plugin.encoded_submessages.lock() > 0);

        // without the plugin the wrapped DATA is an unknown vendor submessage
        let side = reader_side();
        let mut plain_receiver =
            MessageReceiver::new(reader_guid().guid_prefix, side.registry.clone(), None);
        plain_receiver.process_message(protected.clone());
        assert!(received(&side).is_empty());

        let mut receiver = MessageReceiver::new(
            reader_guid().guid_prefix,
            side.registry.clone(),
            Some(Arc::new(XorPlugin::default())),
        );
        receiver.process_message(protected);
        assert_eq!(received(&side), vec![1]);
    }
}
