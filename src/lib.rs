//! RTPS reliable-delivery engine: Writers and Readers exchanging changes over UDP
//! with HEARTBEAT / ACKNACK driven repair.

extern crate alloc;

pub mod dds;
pub mod error;
pub mod message;
pub mod network;
pub mod rtps;
pub mod security;
pub mod structure;

pub use error::{RtpsError, RtpsResult};
