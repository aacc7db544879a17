//! batching of outgoing submessages into RTPS messages
//!
//! A group collects submessages for one set of destination locators and sends
//! them as few datagrams as the message size allows. Nothing leaves before
//! `flush` (or the drop of the group).
//!
//! A Writer tags what it adds with `track` and learns from `take_flushed`
//! which tagged submessages really left. A message dropped on an expired
//! deadline never shows up there, so its changes stay unsent.

use crate::error::{RtpsError, RtpsResult};
use crate::message::message_header::Header;
use crate::message::padding_len;
use crate::message::send_buffers::{SendBuffer, SendBuffersManager};
use crate::message::submessage::{
    element::{
        acknack::AckNack, data::Data, datafrag::DataFrag, gap::Gap, heartbeat::Heartbeat,
        heartbeatfrag::HeartbeatFrag, infodst::InfoDestination, nackfrag::NackFrag, Count,
        FragmentNumber, FragmentNumberSet, Locator, Parameter, ParameterList, SequenceNumber,
        SequenceNumberSet, Timestamp,
    },
    submessage_flag::*,
    SubMessageHeader, SubMessageKind,
};
use crate::network::Transport;
use crate::rtps::cache::{CacheChange, ChangeKind, InstanceHandle};
use crate::security::SecurityPlugin;
use crate::structure::{EntityId, GuidPrefix, ParameterId};
use alloc::sync::Arc;
use bytes::Bytes;
use enumflags2::BitFlags;
use log::{debug, error, trace, warn};
use speedy::{Endianness, Writable};
use std::time::Instant;

const ENDIANNESS: Endianness = Endianness::LittleEndian;

// INFO_DST: submessage header + GuidPrefix
const INFO_DST_LEN: usize = SubMessageHeader::LEN + 12;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Writer,
    Reader,
    Interpreter,
}

/// RTPS message under construction for one destination set
pub struct RTPSMessageGroup<'a> {
    transport: &'a dyn Transport,
    security: Option<&'a dyn SecurityPlugin>,
    source: GuidPrefix,
    buffer: SendBuffer,
    max_size: usize,
    locators: Vec<Locator>,
    destinations: Vec<GuidPrefix>,
    // destination the last INFO_DST in the buffer selected
    info_dst: GuidPrefix,
    submessages: usize,
    max_blocking_time_point: Option<Instant>,
    sent_datagrams: usize,
    // tags of submessages in the buffer, and of those already sent
    pending_units: Vec<usize>,
    flushed_units: Vec<usize>,
}

impl<'a> RTPSMessageGroup<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        send_buffers: &Arc<SendBuffersManager>,
        security: Option<&'a dyn SecurityPlugin>,
        source: GuidPrefix,
        max_message_size: usize,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<Self> {
        let buffer = send_buffers.get_buffer(max_blocking_time_point)?;
        let max_size = core::cmp::min(max_message_size, transport.max_message_size());
        Ok(Self {
            transport,
            security,
            source,
            buffer,
            max_size,
            locators: Vec::new(),
            destinations: Vec::new(),
            info_dst: GuidPrefix::UNKNOW,
            submessages: 0,
            max_blocking_time_point,
            sent_datagrams: 0,
            pending_units: Vec::new(),
            flushed_units: Vec::new(),
        })
    }

    /// Target following submessages at `locators`, read by the participants
    /// `destinations`. A different target flushes what is pending first.
    pub fn set_destination(
        &mut self,
        locators: &[Locator],
        destinations: &[GuidPrefix],
    ) -> RtpsResult<()> {
        if self.locators == locators && self.destinations == destinations {
            return Ok(());
        }
        self.flush()?;
        self.locators = locators.to_vec();
        self.destinations = destinations.to_vec();
        Ok(())
    }

    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    /// octets pending in the current message
    pub fn current_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn submessage_count(&self) -> usize {
        self.submessages
    }

    pub fn sent_datagrams(&self) -> usize {
        self.sent_datagrams
    }

    /// tag the submessage added last, `take_flushed` reports it once sent
    pub fn track(&mut self, unit: usize) {
        self.pending_units.push(unit);
    }

    /// tags of the submessages sent since the last call
    pub fn take_flushed(&mut self) -> Vec<usize> {
        core::mem::take(&mut self.flushed_units)
    }

    /// room left for submessages in a message which only holds its header
    pub fn payload_capacity(&self) -> usize {
        self.max_size
            .saturating_sub(Header::LEN + INFO_DST_LEN + SubMessageHeader::LEN)
    }

    /// INFO_TS + DATA carrying `change`
    pub fn add_data(
        &mut self,
        change: &CacheChange,
        reader_id: EntityId,
        expects_inline_qos: bool,
    ) -> RtpsResult<()> {
        let inline_qos = inline_qos_of(change, expects_inline_qos);
        let mut flags = DataFlag::from_endianness(ENDIANNESS);
        if inline_qos.is_some() {
            flags |= DataFlag::InlineQos;
        }
        let payload = if change.kind.is_alive() {
            change.data_value().cloned()
        } else {
            None
        };
        if payload.is_some() {
            flags |= DataFlag::Data;
        }
        let data = Data::new(
            reader_id,
            change.writer_guid.entity_id,
            change.sequence_number,
            inline_qos,
            payload,
        );
        let submessage = serialize_submessage(SubMessageKind::DATA, flags.bits(), &data)?;
        trace!(
            "add DATA sn {} to message group\n\tWriter: {}",
            change.sequence_number,
            change.writer_guid
        );
        self.add_with_timestamp(change.source_timestamp, submessage)
    }

    /// INFO_TS + DATA_FRAG carrying fragment `fragment_number` of `change`
    pub fn add_data_frag(
        &mut self,
        change: &CacheChange,
        fragment_number: FragmentNumber,
        reader_id: EntityId,
        expects_inline_qos: bool,
    ) -> RtpsResult<()> {
        let fragment = change.fragment(fragment_number).ok_or_else(|| {
            RtpsError::InvalidArgument(format!(
                "{} is not a fragment of change {}",
                fragment_number, change.sequence_number
            ))
        })?;
        let inline_qos = inline_qos_of(change, expects_inline_qos);
        let mut flags = DataFragFlag::from_endianness(ENDIANNESS);
        if inline_qos.is_some() {
            flags |= DataFragFlag::InlineQos;
        }
        let data_frag = DataFrag::new(
            reader_id,
            change.writer_guid.entity_id,
            change.sequence_number,
            fragment_number,
            1,
            change.fragment_size(),
            change.serialized_size() as u32,
            inline_qos,
            fragment,
        );
        let submessage =
            serialize_submessage(SubMessageKind::DATA_FRAG, flags.bits(), &data_frag)?;
        trace!(
            "add DATA_FRAG sn {} fragment {} to message group\n\tWriter: {}",
            change.sequence_number,
            fragment_number,
            change.writer_guid
        );
        self.add_with_timestamp(change.source_timestamp, submessage)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_heartbeat(
        &mut self,
        writer_id: EntityId,
        reader_id: EntityId,
        first_sn: SequenceNumber,
        last_sn: SequenceNumber,
        count: Count,
        is_final: bool,
        liveliness: bool,
    ) -> RtpsResult<()> {
        let mut flags = HeartbeatFlag::from_endianness(ENDIANNESS);
        if is_final {
            flags |= HeartbeatFlag::Final;
        }
        if liveliness {
            flags |= HeartbeatFlag::Liveliness;
        }
        let heartbeat = Heartbeat::new(reader_id, writer_id, first_sn, last_sn, count);
        let submessage = serialize_submessage(SubMessageKind::HEARTBEAT, flags.bits(), &heartbeat)?;
        self.add_submessage(submessage, Origin::Writer)
    }

    pub fn add_heartbeat_frag(
        &mut self,
        writer_id: EntityId,
        reader_id: EntityId,
        writer_sn: SequenceNumber,
        last_fragment_num: FragmentNumber,
        count: Count,
    ) -> RtpsResult<()> {
        let flags: BitFlags<HeartbeatFragFlag> = HeartbeatFragFlag::from_endianness(ENDIANNESS);
        let heartbeat_frag = HeartbeatFrag {
            reader_id,
            writer_id,
            writer_sn,
            last_fragment_num,
            count,
        };
        let submessage =
            serialize_submessage(SubMessageKind::HEARTBEAT_FRAG, flags.bits(), &heartbeat_frag)?;
        self.add_submessage(submessage, Origin::Writer)
    }

    pub fn add_gap(
        &mut self,
        writer_id: EntityId,
        reader_id: EntityId,
        gap_start: SequenceNumber,
        gap_list: SequenceNumberSet,
    ) -> RtpsResult<()> {
        let flags = GapFlag::from_endianness(ENDIANNESS);
        let gap = Gap::new(reader_id, writer_id, gap_start, gap_list);
        let submessage = serialize_submessage(SubMessageKind::GAP, flags.bits(), &gap)?;
        self.add_submessage(submessage, Origin::Writer)
    }

    pub fn add_acknack(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        reader_sn_state: SequenceNumberSet,
        count: Count,
        is_final: bool,
    ) -> RtpsResult<()> {
        let mut flags = AckNackFlag::from_endianness(ENDIANNESS);
        if is_final {
            flags |= AckNackFlag::Final;
        }
        let acknack = AckNack::new(reader_id, writer_id, reader_sn_state, count);
        let submessage = serialize_submessage(SubMessageKind::ACKNACK, flags.bits(), &acknack)?;
        self.add_submessage(submessage, Origin::Reader)
    }

    pub fn add_nackfrag(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: SequenceNumber,
        fragment_number_state: FragmentNumberSet,
        count: Count,
    ) -> RtpsResult<()> {
        let flags = NackFragFlag::from_endianness(ENDIANNESS);
        let nack_frag = NackFrag {
            reader_id,
            writer_id,
            writer_sn,
            fragment_number_state,
            count,
        };
        let submessage = serialize_submessage(SubMessageKind::NACK_FRAG, flags.bits(), &nack_frag)?;
        self.add_submessage(submessage, Origin::Reader)
    }

    /// send the pending message to every locator of the current destination
    pub fn flush(&mut self) -> RtpsResult<()> {
        if self.submessages == 0 {
            self.buffer.clear();
            return Ok(());
        }
        self.submessages = 0;
        self.info_dst = GuidPrefix::UNKNOW;
        if let Some(deadline) = self.max_blocking_time_point {
            if Instant::now() > deadline {
                self.buffer.clear();
                self.pending_units.clear();
                warn!("message group dropped a message: blocking deadline expired");
                return Err(RtpsError::Timeout);
            }
        }
        let message: Bytes = match self.security {
            Some(security) => {
                let encoded =
                    security.encode_rtps_message(&self.buffer, self.source, &self.destinations);
                self.buffer.clear();
                // a message the plugin refuses is not tried again
                self.flushed_units.append(&mut self.pending_units);
                encoded?
            }
            None => {
                let message = Bytes::copy_from_slice(&self.buffer);
                self.buffer.clear();
                message
            }
        };
        let mut sent = false;
        for locator in &self.locators {
            if self
                .transport
                .send(&message, locator, self.max_blocking_time_point)
            {
                sent = true;
            } else {
                debug!("transport refused a message of {} bytes to {}", message.len(), locator);
            }
        }
        self.flushed_units.append(&mut self.pending_units);
        if sent {
            self.sent_datagrams += 1;
        } else if !self.locators.is_empty() {
            warn!(
                "message of {} bytes reached none of {} locators",
                message.len(),
                self.locators.len()
            );
        }
        Ok(())
    }

    fn add_with_timestamp(
        &mut self,
        timestamp: Timestamp,
        submessage: Vec<u8>,
    ) -> RtpsResult<()> {
        let submessage = self.protect(submessage, Origin::Writer)?;
        let flags = InfoTimestampFlag::from_endianness(ENDIANNESS);
        let mut unit = serialize_submessage(SubMessageKind::INFO_TS, flags.bits(), &timestamp)?;
        unit.extend_from_slice(&submessage);
        self.add_unit(&unit, 2)
    }

    fn add_submessage(&mut self, submessage: Vec<u8>, origin: Origin) -> RtpsResult<()> {
        let submessage = self.protect(submessage, origin)?;
        self.add_unit(&submessage, 1)
    }

    // an encode failure drops this submessage only
    fn protect(&self, submessage: Vec<u8>, origin: Origin) -> RtpsResult<Bytes> {
        let security = match self.security {
            Some(s) => s,
            None => return Ok(Bytes::from(submessage)),
        };
        let encoded = match origin {
            Origin::Writer => {
                security.encode_writer_submessage(&submessage, self.source, &self.destinations)
            }
            Origin::Reader => {
                security.encode_reader_submessage(&submessage, self.source, &self.destinations)
            }
            Origin::Interpreter => return Ok(Bytes::from(submessage)),
        };
        encoded.map_err(|e| {
            error!("security plugin refused to encode a submessage: {}", e);
            RtpsError::Security(e)
        })
    }

    // submessages of one unit always share a message
    fn add_unit(&mut self, unit: &[u8], submessages: usize) -> RtpsResult<()> {
        if !self.fits(unit.len()) {
            if self.submessages == 0 {
                return Err(RtpsError::MessageTooLarge(
                    self.required_len(unit.len()),
                    self.max_size,
                ));
            }
            self.flush()?;
            if !self.fits(unit.len()) {
                return Err(RtpsError::MessageTooLarge(
                    self.required_len(unit.len()),
                    self.max_size,
                ));
            }
        }
        if self.buffer.is_empty() {
            self.buffer
                .extend_from_slice(&Header::new(self.source).to_bytes());
        }
        let destination = self.single_destination();
        if destination != self.info_dst {
            let flags = InfoDestinationFlag::from_endianness(ENDIANNESS);
            let info_dst = InfoDestination {
                guid_prefix: destination,
            };
            let submessage =
                serialize_submessage(SubMessageKind::INFO_DST, flags.bits(), &info_dst)?;
            let submessage = self.protect(submessage, Origin::Interpreter)?;
            self.buffer.extend_from_slice(&submessage);
            self.info_dst = destination;
        }
        self.buffer.extend_from_slice(unit);
        self.submessages += submessages;
        Ok(())
    }

    fn single_destination(&self) -> GuidPrefix {
        match self.destinations.as_slice() {
            [only] => *only,
            _ => GuidPrefix::UNKNOW,
        }
    }

    fn required_len(&self, unit_len: usize) -> usize {
        let header = if self.buffer.is_empty() {
            Header::LEN
        } else {
            0
        };
        let info_dst = if self.single_destination() != self.info_dst {
            INFO_DST_LEN
        } else {
            0
        };
        self.buffer.len() + header + info_dst + unit_len
    }

    fn fits(&self, unit_len: usize) -> bool {
        self.required_len(unit_len) <= self.max_size
    }
}

impl Drop for RTPSMessageGroup<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("message group failed to flush on drop: {}", e);
        }
    }
}

/// KEY_HASH for keyed changes, STATUS_INFO for not alive ones
pub fn inline_qos_of(change: &CacheChange, expects_inline_qos: bool) -> Option<ParameterList> {
    let mut inline_qos = ParameterList::new();
    let handle = change.instance_handle();
    if !handle.is_nil() && (expects_inline_qos || !change.kind.is_alive()) {
        inline_qos.push(Parameter::new(
            ParameterId::PID_KEY_HASH,
            Bytes::copy_from_slice(&handle.0),
        ));
    }
    if !change.kind.is_alive() {
        inline_qos.push(Parameter::new(
            ParameterId::PID_STATUS_INFO,
            Bytes::copy_from_slice(&[0, 0, 0, change.kind.status_info()]),
        ));
    }
    if inline_qos.is_empty() {
        None
    } else {
        Some(inline_qos)
    }
}

/// kind and instance of a received change, read back from its inline QoS
pub fn change_attributes_of(inline_qos: Option<&ParameterList>) -> (ChangeKind, InstanceHandle) {
    let inline_qos = match inline_qos {
        Some(q) => q,
        None => return (ChangeKind::Alive, InstanceHandle::NIL),
    };
    let kind = match inline_qos.get(ParameterId::PID_STATUS_INFO) {
        Some(p) if p.value.len() == 4 => ChangeKind::from_status_info(p.value[3]),
        _ => ChangeKind::Alive,
    };
    let handle = match inline_qos.get(ParameterId::PID_KEY_HASH) {
        Some(p) if p.value.len() == 16 => {
            let mut bytes = [0; 16];
            bytes.copy_from_slice(&p.value);
            InstanceHandle(bytes)
        }
        _ => InstanceHandle::NIL,
    };
    (kind, handle)
}

/// header + body padded to the next 4 octet boundary
pub(crate) fn serialize_submessage<T: Writable<Endianness>>(
    kind: SubMessageKind,
    flags: u8,
    body: &T,
) -> RtpsResult<Vec<u8>> {
    let mut body = body.write_to_vec_with_ctx(ENDIANNESS)?;
    body.resize(body.len() + padding_len(body.len()), 0);
    let length = u16::try_from(body.len())
        .map_err(|_| RtpsError::MessageTooLarge(body.len(), u16::MAX as usize))?;
    let mut submessage = Vec::with_capacity(SubMessageHeader::LEN + body.len());
    submessage.extend_from_slice(&SubMessageHeader::new(kind as u8, flags, length).to_bytes());
    submessage.extend(body);
    Ok(submessage)
}
