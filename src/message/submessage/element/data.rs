use crate::error::{IoError, IoResult};
use crate::message::submessage::{element::*, submessage_flag::DataFlag};
use crate::structure::EntityId;
use bytes::Bytes;
use enumflags2::BitFlags;
use speedy::{Context, Endianness, Writable, Writer};

#[derive(Clone, Debug, PartialEq)]
pub struct Data {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub inline_qos: Option<ParameterList>,
    pub serialized_payload: Option<SerializedPayload>,
}

impl Data {
    // between octets_to_inline_qos and inline_qos in rtps 2.3, there are
    // reader_id (4), writer_id (4), writer_sn (8) = 16 octets
    pub const OCTETS_TO_INLINE_QOS: u16 = 16;

    pub fn new(
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: SequenceNumber,
        inline_qos: Option<ParameterList>,
        serialized_payload: Option<SerializedPayload>,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            writer_sn,
            inline_qos,
            serialized_payload,
        }
    }

    pub fn deserialize_data(buffer: &Bytes, flags: BitFlags<DataFlag>) -> IoResult<Self> {
        let mut readed_byte = 0;
        let endiannes = if flags.contains(DataFlag::Endianness) {
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

        // octetsToInlineQos may be larger in later protocol versions
        let extra_octets = octets_to_inline_qos
            .checked_sub(Self::OCTETS_TO_INLINE_QOS)
            .ok_or_else(|| {
                IoError::Malformed(format!(
                    "DATA octetsToInlineQos {} is smaller than {}",
                    octets_to_inline_qos,
                    Self::OCTETS_TO_INLINE_QOS
                ))
            })?;
        readed_byte += extra_octets as usize;

        let inline_qos = if flags.contains(DataFlag::InlineQos) {
            let (param_list, len) =
                read_element::<ParameterList>(endiannes, buffer, readed_byte)?;
            readed_byte += len;
            Some(param_list)
        } else {
            None
        };

        let serialized_payload = if flags.contains(DataFlag::Data) || flags.contains(DataFlag::Key)
        {
            if readed_byte > buffer.len() {
                return Err(IoError::Malformed(
                    "DATA serialized payload is past the end of submessage".to_string(),
                ));
            }
            Some(SerializedPayload::from_bytes(&buffer.slice(readed_byte..))?)
        } else {
            None
        };
        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            inline_qos,
            serialized_payload,
        })
    }
}

impl<C: Context> Writable<C> for Data {
    fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
        writer.write_u16(0)?; // extraFlags
                              // In RTPS 2.3, it is set all 0.

        writer.write_u16(Self::OCTETS_TO_INLINE_QOS)?;
        writer.write_value(&self.reader_id)?;
        writer.write_value(&self.writer_id)?;
        writer.write_value(&self.writer_sn)?;
        if let Some(inline_qos) = self.inline_qos.as_ref() {
            writer.write_value(inline_qos)?;
        }

        if let Some(serialized_payload) = self.serialized_payload.as_ref() {
            writer.write_value(serialized_payload)?
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::submessage::submessage_flag::DataFlag;
    use crate::structure::ParameterId;
    use bytes::Bytes;
    use enumflags2::BitFlags;

    #[test]
    fn test_deserialize_dispose() {
        // DATA(r) from eProsima FastDDS carrying key hash and status info
        const TEST_DATA: [u8; 80] = [
            0x00, 0x00, 0x10, 0x00, 0x00, 0x01, 0x00, 0xC7, 0x00, 0x01, 0x00, 0xC2, 0x00, 0x00,
            0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x0F, 0x80, 0x18, 0x00, 0x01, 0x0F, 0x19, 0x1A,
            0x44, 0x01, 0x3E, 0x4D, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0xC2, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x70, 0x00, 0x10, 0x00, 0x01, 0x0F, 0x19, 0x1A,
            0x44, 0x01, 0x3E, 0x4D, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xC1, 0x71, 0x00,
            0x04, 0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x00,
        ];
        let test_data_flags: BitFlags<DataFlag, u8> =
            BitFlags::<DataFlag>::from_bits_truncate(0x03);
        let test_data = Bytes::from_static(&TEST_DATA);
        let data = match Data::deserialize_data(&test_data, test_data_flags) {
            Ok(d) => d,
            Err(e) => panic!("{:?}", e),
        };
        assert_eq!(data.writer_sn, SequenceNumber(2));
        assert!(data.serialized_payload.is_none());
        let inline_qos = data.inline_qos.unwrap();
        assert_eq!(
            inline_qos.get(ParameterId::PID_KEY_HASH).unwrap().value.len(),
            16
        );
        assert_eq!(
            inline_qos.get(ParameterId::PID_STATUS_INFO).unwrap().value,
            Bytes::from_static(&[0, 0, 0, 3])
        );
    }

    #[test]
    fn truncated_data_is_rejected() {
        let truncated = Bytes::from_static(&[0x00, 0x00, 0x10, 0x00, 0x00, 0x01]);
        let flags = BitFlags::<DataFlag>::from_bits_truncate(0x05);
        assert!(Data::deserialize_data(&truncated, flags).is_err());

        // octetsToInlineQos smaller than the fixed header
        let short_octets = Bytes::from_static(&[
            0x00, 0x00, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0,
        ]);
        assert!(Data::deserialize_data(&short_octets, flags).is_err());
    }
}
