use crate::structure::entity_id::*;
use alloc::fmt;
use rand::{self, rngs::SmallRng, Rng};
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct GUID {
    pub guid_prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl GUID {
    pub const UNKNOW: Self = Self {
        guid_prefix: GuidPrefix::UNKNOW,
        entity_id: EntityId::UNKNOW,
    };

    pub fn new(guid_prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self {
            guid_prefix,
            entity_id,
        }
    }

    pub fn new_participant_guid(small_rng: &mut SmallRng) -> Self {
        Self {
            guid_prefix: GuidPrefix::new(small_rng),
            entity_id: EntityId::PARTICIPANT,
        }
    }
}

impl fmt::Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.guid_prefix, self.entity_id)
    }
}

#[derive(
    Readable,
    Writable,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
pub struct GuidPrefix {
    pub guid_prefix: [u8; 12],
}
impl GuidPrefix {
    pub const UNKNOW: Self = Self {
        guid_prefix: [0x00; 12],
    };

    // rtps 2.3 sprc, 9.3.1.5
    // To comply with this specification, implementations of the RTPS protocol shall set the first two bytes
    // of the guidPrefix to match their assigned vendorId (see 8.3.3.1.3).
    // guid_prefix[0] = venderId[0]
    // guid_prefix[1] = venderId[1]
    pub fn new(small_rng: &mut SmallRng) -> Self {
        let mut bytes: [u8; 12] = small_rng.gen();

        // spec 8.2.4.2 The GUIDs of RTPS Participants
        // This implementation chose using random number to GuidPrefix.
        bytes[0] = crate::structure::vendor_id::VendorId::THIS_IMPLEMENTATION.vendor_id[0];
        bytes[1] = crate::structure::vendor_id::VendorId::THIS_IMPLEMENTATION.vendor_id[1];
        Self { guid_prefix: bytes }
    }

    pub fn from_bytes(guid_prefix: [u8; 12]) -> Self {
        Self { guid_prefix }
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.guid_prefix.iter().enumerate() {
            if i != 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn guid_prefix_carries_vendor_id() {
        let mut small_rng = SmallRng::seed_from_u64(7);
        let prefix = GuidPrefix::new(&mut small_rng);
        assert_eq!(
            prefix.guid_prefix[0..2],
            crate::structure::VendorId::THIS_IMPLEMENTATION.vendor_id
        );
        assert_ne!(prefix, GuidPrefix::UNKNOW);
    }

    #[test]
    fn guid_prefix_display() {
        let prefix = GuidPrefix::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(format!("{}", prefix), "01020304.05060708.090a0b0c");
    }
}
