use crate::error::{IoError, IoResult};
use crate::message::submessage::{element::*, submessage_flag::DataFragFlag};
use crate::structure::EntityId;
use bytes::Bytes;
use enumflags2::BitFlags;
use speedy::{Context, Endianness, Writable, Writer};

#[derive(Clone, Debug, PartialEq)]
pub struct DataFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_starting_num: FragmentNumber,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    pub data_size: u32,
    pub inline_qos: Option<ParameterList>,
    /// The serialized_payload is a fragment of the SerializedPayload, the
    /// encapsulation header appears only in the first fragment.
    /// It is an opaque stream of bytes.
    pub serialized_payload: Bytes,
}

impl DataFrag {
    // between octets_to_inline_qos and inline_qos in rtps 2.3, there are
    // reader_id (4), writer_id (4), writer_sn (8), fragment_staring_num (4), fragment_in_submessage
    // (2), fragment_size (2), data_size (4) = 28 octets
    pub const OCTETS_TO_INLINE_QOS: u16 = 28;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: SequenceNumber,
        fragment_starting_num: FragmentNumber,
        fragments_in_submessage: u16,
        fragment_size: u16,
        data_size: u32,
        inline_qos: Option<ParameterList>,
        serialized_payload: Bytes,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            writer_sn,
            fragment_starting_num,
            fragments_in_submessage,
            fragment_size,
            data_size,
            inline_qos,
            serialized_payload,
        }
    }

    pub fn total_fragments(&self) -> u32 {
        if self.fragment_size == 0 {
            return 0;
        }
        self.data_size.div_ceil(self.fragment_size as u32)
    }

    pub fn deserialize(buffer: &Bytes, flags: BitFlags<DataFragFlag>) -> IoResult<Self> {
        let mut readed_byte = 0;
        let endiannes = if flags.contains(DataFragFlag::Endianness) {
            Endianness::LittleEndian
        } else {
            Endianness::BigEndian
        };

        let (_extra_flags, len) = read_element::<u16>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (octets_to_inline_qos, len) = read_element::<u16>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (reader_id, len) = read_element::<EntityId>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (writer_id, len) = read_element::<EntityId>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (writer_sn, len) = read_element::<SequenceNumber>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (fragment_starting_num, len) =
            read_element::<FragmentNumber>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (fragments_in_submessage, len) =
            read_element::<u16>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (fragment_size, len) = read_element::<u16>(endiannes, buffer, readed_byte)?;
        readed_byte += len;
        let (data_size, len) = read_element::<u32>(endiannes, buffer, readed_byte)?;
        readed_byte += len;

        let extra_octets = octets_to_inline_qos
            .checked_sub(Self::OCTETS_TO_INLINE_QOS)
            .ok_or_else(|| {
                IoError::Malformed(format!(
                    "DATA_FRAG octetsToInlineQos {} is smaller than {}",
                    octets_to_inline_qos,
                    Self::OCTETS_TO_INLINE_QOS
                ))
            })?;
        readed_byte += extra_octets as usize;

        let inline_qos = if flags.contains(DataFragFlag::InlineQos) {
            let (param_list, len) =
                read_element::<ParameterList>(endiannes, buffer, readed_byte)?;
            readed_byte += len;
            Some(param_list)
        } else {
            None
        };

        let mut frag = Self {
            reader_id,
            writer_id,
            writer_sn,
            fragment_starting_num,
            fragments_in_submessage,
            fragment_size,
            data_size,
            inline_qos,
            serialized_payload: Bytes::new(),
        };
        if !frag.is_valid() {
            return Err(IoError::Malformed(format!(
                "invalid DATA_FRAG: sn {}, start {}, count {}, size {}, data_size {}",
                writer_sn, fragment_starting_num, fragments_in_submessage, fragment_size, data_size
            )));
        }

        // trailing alignment padding is not part of the fragment
        let offset = (fragment_starting_num.0 as usize - 1) * fragment_size as usize;
        let expected = core::cmp::min(
            fragments_in_submessage as usize * fragment_size as usize,
            data_size as usize - offset,
        );
        let end = readed_byte + expected;
        if end > buffer.len() {
            return Err(IoError::Malformed(format!(
                "DATA_FRAG carries {} of {} fragment octets",
                buffer.len().saturating_sub(readed_byte),
                expected
            )));
        }
        frag.serialized_payload = buffer.slice(readed_byte..end);
        Ok(frag)
    }

    /// rtps 2.3 spec 8.3.7.3 DataFrag validity
    pub fn is_valid(&self) -> bool {
        if self.writer_sn <= SequenceNumber(0) || self.fragment_starting_num.0 == 0 {
            return false;
        }
        if self.fragment_size == 0 || self.fragments_in_submessage == 0 {
            return false;
        }
        if self.fragment_size as u32 > self.data_size {
            return false;
        }
        let last = self.fragment_starting_num.0 as u64 + self.fragments_in_submessage as u64 - 1;
        last <= self.total_fragments() as u64
    }
}

impl<C: Context> Writable<C> for DataFrag {
    fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
        writer.write_u16(0)?;
        writer.write_u16(Self::OCTETS_TO_INLINE_QOS)?;
        writer.write_value(&self.reader_id)?;
        writer.write_value(&self.writer_id)?;
        writer.write_value(&self.writer_sn)?;
        writer.write_value(&self.fragment_starting_num)?;
        writer.write_u16(self.fragments_in_submessage)?;
        writer.write_u16(self.fragment_size)?;
        writer.write_u32(self.data_size)?;
        if let Some(inline_qos) = self.inline_qos.as_ref() {
            writer.write_value(inline_qos)?;
        }
        writer.write_bytes(&self.serialized_payload)?;
        Ok(())
    }
}
