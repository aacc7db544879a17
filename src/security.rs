//! call sites of an RTPS security plugin (DDS Security 1.1, 8.5 Cryptographic plugin)
//!
//! The engine never interprets protected payloads. Writers and readers hand
//! complete submessages to the plugin before they go into a message, the
//! message group hands the assembled message to it before sending, and the
//! MessageReceiver asks it to undo both on the way in.

use crate::structure::GuidPrefix;
use bytes::Bytes;
use thiserror;

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SecurityError {
    pub message: String,
}

impl SecurityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type SecurityResult<T> = Result<T, SecurityError>;

/// outcome of a decode attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SecureDecode {
    /// the unit was protected and this is its plaintext
    Decoded(Bytes),
    /// the unit was not protected by this plugin, use it as is
    NotProtected,
}

pub trait SecurityPlugin: Send + Sync {
    /// `message` is a whole RTPS message, header included
    fn encode_rtps_message(
        &self,
        message: &[u8],
        source: GuidPrefix,
        destinations: &[GuidPrefix],
    ) -> SecurityResult<Bytes>;

    /// `submessage` is one complete writer submessage (DATA, DATA_FRAG, GAP, HEARTBEAT, HEARTBEAT_FRAG)
    fn encode_writer_submessage(
        &self,
        submessage: &[u8],
        source: GuidPrefix,
        destinations: &[GuidPrefix],
    ) -> SecurityResult<Bytes>;

    /// `submessage` is one complete reader submessage (ACKNACK, NACK_FRAG)
    fn encode_reader_submessage(
        &self,
        submessage: &[u8],
        source: GuidPrefix,
        destinations: &[GuidPrefix],
    ) -> SecurityResult<Bytes>;

    fn decode_rtps_message(&self, message: &[u8], source: GuidPrefix)
        -> SecurityResult<SecureDecode>;

    /// `submessage` starts with its submessage header, the result must too
    fn decode_rtps_submessage(
        &self,
        submessage: &[u8],
        source: GuidPrefix,
    ) -> SecurityResult<SecureDecode>;
}
