//! structures for DDS & RTPS

mod duration;
mod entity;
mod entity_id;
mod guid;
mod parameter_id;
mod proxy;
mod topic_kind;
mod vendor_id;

#[doc(inline)]
pub use {
    duration::Duration,
    entity::RTPSEntity,
    entity_id::{EntityId, EntityKind},
    guid::{GuidPrefix, GUID},
    proxy::{ReaderProxy, ReaderProxyData, WriterProxy, WriterProxyData},
    topic_kind::TopicKind,
};

pub(crate) use {parameter_id::ParameterId, vendor_id::VendorId};
