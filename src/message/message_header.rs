use crate::error::{IoError, IoResult};
use crate::structure::{GuidPrefix, VendorId};
use serde::Deserialize;
use speedy::{Endianness, Readable, Writable};

#[derive(Readable, Writable, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const PROTOCOLVERSION: Self = Self { major: 2, minor: 4 };
}

#[derive(Readable, Writable, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolId {
    protocol_id: [u8; 4],
}

impl ProtocolId {
    pub const PROTOCOLVID: Self = Self {
        protocol_id: [b'R', b'T', b'P', b'S'],
    };
}

#[derive(Readable, Writable, Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub protocol: ProtocolId,
    pub version: ProtocolVersion,
    pub vendor_id: VendorId,
    pub guid_prefix: GuidPrefix,
}

impl Header {
    pub const LEN: usize = 20;

    pub fn new(guid_prefix: GuidPrefix) -> Self {
        Self {
            protocol: ProtocolId::PROTOCOLVID,
            version: ProtocolVersion::PROTOCOLVERSION,
            vendor_id: VendorId::THIS_IMPLEMENTATION,
            guid_prefix,
        }
    }

    /// rtps 2.3 spec 8.3.6.3: a message shorter than the header, with a
    /// foreign protocol id or with a newer major version is not RTPS
    pub fn deserialize(buffer: &[u8]) -> IoResult<Self> {
        if buffer.len() < Self::LEN {
            return Err(IoError::Malformed(format!(
                "message of {} bytes is shorter than RTPS header",
                buffer.len()
            )));
        }
        // Header consists only of octet arrays
        let header = Self::read_from_buffer_with_ctx(Endianness::BigEndian, &buffer[..Self::LEN])?;
        if header.protocol != ProtocolId::PROTOCOLVID {
            return Err(IoError::Malformed("protocol id is not RTPS".to_string()));
        }
        if header.version.major > ProtocolVersion::PROTOCOLVERSION.major {
            return Err(IoError::Malformed(format!(
                "unsupported protocol version {}.{}",
                header.version.major, header.version.minor
            )));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0; Self::LEN];
        bytes[0..4].copy_from_slice(&self.protocol.protocol_id);
        bytes[4] = self.version.major;
        bytes[5] = self.version.minor;
        bytes[6..8].copy_from_slice(&self.vendor_id.vendor_id);
        bytes[8..].copy_from_slice(&self.guid_prefix.guid_prefix);
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_validation() {
        let prefix = GuidPrefix::from_bytes([1; 12]);
        let bytes = Header::new(prefix).to_bytes();
        assert_eq!(&bytes[0..6], b"RTPS\x02\x04");
        assert_eq!(Header::deserialize(&bytes).unwrap().guid_prefix, prefix);

        assert!(Header::deserialize(&bytes[..19]).is_err());
        let mut foreign = bytes;
        foreign[0] = b'X';
        assert!(Header::deserialize(&foreign).is_err());
        let mut newer = bytes;
        newer[4] = 3;
        assert!(Header::deserialize(&newer).is_err());
        let mut older_minor = bytes;
        older_minor[5] = 1;
        assert!(Header::deserialize(&older_minor).is_ok());
    }
}
