//! thread sending the changes of Writers in Asynchronous mode
//!
//! An asynchronous `write` only queues the change and wakes this thread with
//! the Writer's GUID, the thread then sends whatever that Writer has unsent.

use crate::rtps::tokens::{ASYNC_WRITER_STOP, ASYNC_WRITER_WAKE};
use crate::structure::GUID;
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use log::{debug, error, trace};
use mio_extras::channel as mio_channel;
use mio_v06::{Events, Poll, PollOpt, Ready};
use std::io;
use std::thread::{self, JoinHandle};

/// what the async writer thread drives, resolved by GUID on every wake-up
pub trait AsyncWriterTarget: Send + Sync {
    fn send_unsent_changes(&self, writer: GUID);
}

/// handle given to Writers to wake the async writer thread
#[derive(Clone)]
pub struct AsyncWaker {
    sender: mio_channel::Sender<GUID>,
}

impl AsyncWaker {
    pub fn wake(&self, writer: GUID) {
        if self.sender.send(writer).is_err() {
            debug!("async writer thread is gone\n\tWriter: {}", writer);
        }
    }
}

pub struct AsyncWriterThread {
    waker: AsyncWaker,
    stop: mio_channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncWriterThread {
    pub fn new(target: Arc<dyn AsyncWriterTarget>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let (sender, wake_receiver) = mio_channel::channel();
        let (stop, stop_receiver) = mio_channel::channel();
        poll.register(
            &wake_receiver,
            ASYNC_WRITER_WAKE,
            Ready::readable(),
            PollOpt::edge(),
        )?;
        poll.register(
            &stop_receiver,
            ASYNC_WRITER_STOP,
            Ready::readable(),
            PollOpt::edge(),
        )?;
        let thread = thread::Builder::new()
            .name(String::from("rtps-async-writer"))
            .spawn(move || {
                if let Err(e) = run(poll, wake_receiver, stop_receiver, target) {
                    error!("async writer thread stopped: {}", e);
                }
            })?;
        Ok(Self {
            waker: AsyncWaker { sender },
            stop,
            thread: Some(thread),
        })
    }

    pub fn waker(&self) -> AsyncWaker {
        self.waker.clone()
    }
}

impl Drop for AsyncWriterThread {
    fn drop(&mut self) {
        if self.stop.send(()).is_err() {
            debug!("async writer thread already stopped");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("async writer thread panicked");
            }
        }
    }
}

fn run(
    poll: Poll,
    wake_receiver: mio_channel::Receiver<GUID>,
    stop_receiver: mio_channel::Receiver<()>,
    target: Arc<dyn AsyncWriterTarget>,
) -> io::Result<()> {
    let mut events = Events::with_capacity(8);
    loop {
        poll.poll(&mut events, None)?;
        for event in events.iter() {
            match event.token() {
                ASYNC_WRITER_WAKE => {
                    // one send per Writer however often it was woken
                    let mut writers = BTreeSet::new();
                    while let Ok(writer) = wake_receiver.try_recv() {
                        writers.insert(writer);
                    }
                    for writer in writers {
                        trace!("async writer sends\n\tWriter: {}", writer);
                        target.send_unsent_changes(writer);
                    }
                }
                ASYNC_WRITER_STOP => {
                    while stop_receiver.try_recv().is_ok() {}
                    debug!("async writer thread shut down");
                    return Ok(());
                }
                token => trace!("async writer got unknown token {:?}", token),
            }
        }
    }
}
