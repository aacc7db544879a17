use speedy::{Readable, Writable};

#[derive(Readable, Writable, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterId {
    pub value: u16,
}

impl ParameterId {
    #![allow(dead_code)]
    pub const PID_PAD: Self = Self { value: 0x0000 };
    pub const PID_SENTINEL: Self = Self { value: 0x0001 };
    pub const PID_EXPECTS_INLINE_QOS: Self = Self { value: 0x0043 };
    pub const PID_KEY_HASH: Self = Self { value: 0x0070 };
    pub const PID_STATUS_INFO: Self = Self { value: 0x0071 };
    // eProsima FastRTPS and RTI Connext put this on the wire instead of 0x0083
    pub const PID_RELATED_SAMPLE_IDENTITY: Self = Self { value: 0x800f };
}
