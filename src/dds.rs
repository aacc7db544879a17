//! DDS level settings the RTPS endpoints are configured with

pub mod qos;

pub use crate::rtps::{reader::DataReaderStatusChanged, writer::DataWriterStatusChanged};
