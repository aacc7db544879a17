//! RTPS message (de)serialization and the per-destination message batching

pub mod message_group;
pub mod message_header;
pub mod message_receiver;
pub mod send_buffers;
pub mod submessage;

pub use submessage::submessage_flag;

/// rtps 2.3 spec 9.4.1: submessages start on 4 octet boundaries
pub(crate) fn padding_len(len: usize) -> usize {
    (4 - len % 4) % 4
}
