//! the local endpoints of a Participant, looked up by GUID
//!
//! The MessageReceiver, the timer reactor and the async writer thread all
//! reach Writers and Readers through here.

use crate::rtps::async_writer::AsyncWriterTarget;
use crate::rtps::reader::RtpsReader;
use crate::rtps::timed_event::{TimedEventHandler, TimedEventKind};
use crate::rtps::writer::{RtpsWriter, WriterHandle};
use crate::structure::{EntityId, GUID};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, error, trace};
use parking_lot::{Mutex, RwLock};

pub type SharedWriter = Arc<WriterHandle<dyn RtpsWriter>>;
pub type SharedReader = Arc<Mutex<dyn RtpsReader>>;

#[derive(Default)]
pub struct EndpointRegistry {
    writers: RwLock<BTreeMap<GUID, SharedWriter>>,
    readers: RwLock<BTreeMap<GUID, SharedReader>>,
}

impl EndpointRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_writer(&self, guid: GUID, writer: SharedWriter) {
        trace!("registered\n\tWriter: {}", guid);
        self.writers.write().insert(guid, writer);
    }

    pub fn remove_writer(&self, guid: GUID) -> Option<SharedWriter> {
        self.writers.write().remove(&guid)
    }

    pub fn writer(&self, guid: GUID) -> Option<SharedWriter> {
        self.writers.read().get(&guid).cloned()
    }

    pub fn writers(&self) -> Vec<SharedWriter> {
        self.writers.read().values().cloned().collect()
    }

    pub fn add_reader(&self, guid: GUID, reader: SharedReader) {
        trace!("registered\n\tReader: {}", guid);
        self.readers.write().insert(guid, reader);
    }

    pub fn remove_reader(&self, guid: GUID) -> Option<SharedReader> {
        self.readers.write().remove(&guid)
    }

    pub fn reader(&self, guid: GUID) -> Option<SharedReader> {
        self.readers.read().get(&guid).cloned()
    }

    pub fn readers(&self) -> Vec<SharedReader> {
        self.readers.read().values().cloned().collect()
    }

    /// Readers a submessage from `writer_guid` addressed to `reader_guid` goes to.
    ///
    /// An unknown reader entity means every local Reader matched with the Writer.
    pub fn readers_for(&self, reader_guid: GUID, writer_guid: GUID) -> Vec<SharedReader> {
        if reader_guid.entity_id != EntityId::UNKNOW {
            return self.reader(reader_guid).into_iter().collect();
        }
        self.readers
            .read()
            .values()
            .filter(|r| r.lock().matched_writer_is_matched(writer_guid))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.writers.read().len() + self.readers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimedEventHandler for EndpointRegistry {
    fn on_timed_event(&self, event: TimedEventKind) {
        let owner = event.owner();
        if owner.entity_id.is_writer() {
            match self.writer(owner) {
                Some(writer) => writer.on_timed_event(event),
                None => debug!("timer fired for removed endpoint\n\tWriter: {}", owner),
            }
        } else {
            match self.reader(owner) {
                Some(reader) => reader.lock().on_timed_event(event),
                None => debug!("timer fired for removed endpoint\n\tReader: {}", owner),
            }
        }
    }
}

impl AsyncWriterTarget for EndpointRegistry {
    fn send_unsent_changes(&self, writer: GUID) {
        let Some(handle) = self.writer(writer) else {
            debug!("woken for removed endpoint\n\tWriter: {}", writer);
            return;
        };
        if let Err(e) = handle.send_any_unsent_changes(None) {
            error!("async send failed: {}\n\tWriter: {}", e, writer);
        }
    }
}
