use alloc::fmt;
use serde::Deserialize;
use speedy::{Readable, Writable};

#[derive(Readable, Writable, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VendorId {
    pub vendor_id: [u8; 2],
}

impl VendorId {
    // not assigned by OMG DDS SIG yet
    // https://www.dds-foundation.org/dds-rtps-vendor-and-product-ids/
    pub const THIS_IMPLEMENTATION: Self = Self::VENDORID_UNKNOW;

    pub const VENDORID_UNKNOW: Self = Self {
        vendor_id: [0x00; 2],
    };
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}", self.vendor_id[0], self.vendor_id[1])
    }
}
