//! RTPS Writers and Readers and the machinery that drives them

pub mod async_writer;
pub mod cache;
pub mod collector;
pub mod fragment;
pub mod history;
pub mod participant;
pub mod reader;
pub mod reader_locator;
pub mod registry;
pub mod stateful_writer;
pub mod stateless_writer;
pub mod timed_event;
pub(crate) mod tokens;
pub mod writer;

pub use participant::{ParticipantAttributes, ReaderConfig, RtpsParticipant, WriterConfig};
pub use reader::{DataReaderStatusChanged, RtpsReader, StatefulReader, StatelessReader};
pub use writer::{DataWriterStatusChanged, RtpsWriter, WriterHandle};
