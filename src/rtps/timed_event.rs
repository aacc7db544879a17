//! timers of Writers and Readers, driven by one reactor thread
//!
//! Every timer of an endpoint is a `TimerHandle` owned by the endpoint (or the
//! proxy) it serves. Arming and cancelling only sends a command to the reactor,
//! so it never blocks while the endpoint lock is held. When a timer expires the
//! reactor hands its `TimedEventKind` to a `TimedEventHandler`, which resolves the
//! endpoint by GUID and locks it; an event whose target is gone is ignored.

use crate::rtps::tokens::{TIMED_EVENT_COMMAND, TIMED_EVENT_TIMER};
use crate::structure::GUID;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration as CoreDuration;
use log::{debug, error, trace};
use mio_extras::{
    channel as mio_channel,
    timer::{Builder as TimerBuilder, Timeout, Timer},
};
use mio_v06::{Events, Poll, PollOpt, Ready};
use std::io;
use std::thread::{self, JoinHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimedEventKind {
    /// Writer: announce available changes to every matched reliable Reader
    PeriodicHeartbeat { writer: GUID },
    /// Writer: resend what `reader` requested
    NackResponseDelay { writer: GUID, reader: GUID },
    /// Writer: changes underway to `reader` may have been lost
    NackSupression { writer: GUID, reader: GUID },
    /// Reader: answer the last HEARTBEAT of `writer`
    HeartbeatResponseDelay { reader: GUID, writer: GUID },
    /// Reader: first ACKNACK to a newly matched `writer`
    InitialAckNack { reader: GUID, writer: GUID },
}

impl TimedEventKind {
    /// the local endpoint which owns the timer
    pub fn owner(&self) -> GUID {
        match *self {
            Self::PeriodicHeartbeat { writer } => writer,
            Self::NackResponseDelay { writer, .. } | Self::NackSupression { writer, .. } => writer,
            Self::HeartbeatResponseDelay { reader, .. } | Self::InitialAckNack { reader, .. } => {
                reader
            }
        }
    }
}

pub trait TimedEventHandler: Send + Sync {
    fn on_timed_event(&self, event: TimedEventKind);
}

enum TimerCmd {
    Restart {
        id: u64,
        delay: CoreDuration,
        event: TimedEventKind,
    },
    Cancel(u64),
    Shutdown,
}

/// Creates TimerHandles bound to one reactor.
///
/// A detached factory creates handles which only track their armed state,
/// tests drive the endpoints' timer callbacks by hand with them.
#[derive(Clone)]
pub struct TimerFactory {
    commands: Option<mio_channel::Sender<TimerCmd>>,
    next_id: Arc<AtomicU64>,
}

impl TimerFactory {
    pub fn detached() -> Self {
        Self {
            commands: None,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn create(&self, event: TimedEventKind, interval: CoreDuration) -> TimerHandle {
        TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            event,
            interval,
            commands: self.commands.clone(),
            armed: false,
        }
    }
}

pub struct TimerHandle {
    id: u64,
    event: TimedEventKind,
    interval: CoreDuration,
    commands: Option<mio_channel::Sender<TimerCmd>>,
    armed: bool,
}

impl TimerHandle {
    /// (re)arm the timer to fire `interval` from now
    pub fn restart_timer(&mut self) {
        self.armed = true;
        self.send(TimerCmd::Restart {
            id: self.id,
            delay: self.interval,
            event: self.event,
        });
    }

    pub fn cancel_timer(&mut self) {
        if self.armed {
            self.armed = false;
            self.send(TimerCmd::Cancel(self.id));
        }
    }

    /// takes effect from the next restart
    pub fn update_interval(&mut self, interval: CoreDuration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> CoreDuration {
        self.interval
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn event(&self) -> TimedEventKind {
        self.event
    }

    /// the owner got the expiration of this timer
    pub(crate) fn on_fired(&mut self) {
        self.armed = false;
    }

    fn send(&self, cmd: TimerCmd) {
        if let Some(commands) = &self.commands {
            if commands.send(cmd).is_err() {
                debug!("timed event reactor is gone, command dropped");
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// the reactor thread serving every timer of a participant
pub struct TimedEventResource {
    commands: mio_channel::Sender<TimerCmd>,
    next_id: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl TimedEventResource {
    const TICK: CoreDuration = CoreDuration::from_millis(1);

    pub fn new(handler: Arc<dyn TimedEventHandler>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let timer: Timer<(u64, u64)> = TimerBuilder::default().tick_duration(Self::TICK).build();
        let (commands, command_receiver) = mio_channel::channel();
        poll.register(&timer, TIMED_EVENT_TIMER, Ready::readable(), PollOpt::edge())?;
        poll.register(
            &command_receiver,
            TIMED_EVENT_COMMAND,
            Ready::readable(),
            PollOpt::edge(),
        )?;
        let thread = thread::Builder::new()
            .name(String::from("rtps-timed-event"))
            .spawn(move || {
                let reactor = Reactor {
                    poll,
                    timer,
                    command_receiver,
                    handler,
                    armed: BTreeMap::new(),
                    generation: 0,
                };
                if let Err(e) = reactor.run() {
                    error!("timed event reactor stopped: {}", e);
                }
            })?;
        Ok(Self {
            commands,
            next_id: Arc::new(AtomicU64::new(0)),
            thread: Some(thread),
        })
    }

    pub fn factory(&self) -> TimerFactory {
        TimerFactory {
            commands: Some(self.commands.clone()),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl Drop for TimedEventResource {
    fn drop(&mut self) {
        let _ = self.commands.send(TimerCmd::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("timed event reactor panicked");
            }
        }
    }
}

struct Reactor {
    poll: Poll,
    timer: Timer<(u64, u64)>,
    command_receiver: mio_channel::Receiver<TimerCmd>,
    handler: Arc<dyn TimedEventHandler>,
    // id -> (timeout, generation of the arming, event)
    armed: BTreeMap<u64, (Timeout, u64, TimedEventKind)>,
    generation: u64,
}

impl Reactor {
    fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(64);
        loop {
            self.poll.poll(&mut events, None)?;
            for event in events.iter() {
                match event.token() {
                    TIMED_EVENT_TIMER => self.fire_expired(),
                    TIMED_EVENT_COMMAND => {
                        if !self.handle_commands() {
                            debug!("timed event reactor shut down");
                            return Ok(());
                        }
                    }
                    token => trace!("timed event reactor got unknown token {:?}", token),
                }
            }
        }
    }

    fn fire_expired(&mut self) {
        while let Some((id, generation)) = self.timer.poll() {
            // a restart after the timeout was queued leaves a stale generation behind
            let current = matches!(self.armed.get(&id), Some((_, g, _)) if *g == generation);
            if !current {
                continue;
            }
            if let Some((_, _, event)) = self.armed.remove(&id) {
                trace!("timed event fired: {:?}", event);
                self.handler.on_timed_event(event);
            }
        }
    }

    /// false on shutdown
    fn handle_commands(&mut self) -> bool {
        while let Ok(cmd) = self.command_receiver.try_recv() {
            match cmd {
                TimerCmd::Restart { id, delay, event } => {
                    if let Some((timeout, _, _)) = self.armed.remove(&id) {
                        self.timer.cancel_timeout(&timeout);
                    }
                    self.generation += 1;
                    let timeout = self.timer.set_timeout(delay, (id, self.generation));
                    self.armed.insert(id, (timeout, self.generation, event));
                }
                TimerCmd::Cancel(id) => {
                    if let Some((timeout, _, _)) = self.armed.remove(&id) {
                        self.timer.cancel_timeout(&timeout);
                    }
                }
                TimerCmd::Shutdown => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::structure::{EntityId, GuidPrefix, TopicKind};
    use parking_lot::{Condvar, Mutex};
    use std::time::Instant;

    #[derive(Default)]
    struct Collect {
        fired: Mutex<Vec<TimedEventKind>>,
        cond: Condvar,
    }

    impl TimedEventHandler for Collect {
        fn on_timed_event(&self, event: TimedEventKind) {
            self.fired.lock().push(event);
            self.cond.notify_all();
        }
    }

    impl Collect {
        fn wait_for(&self, n: usize, max_wait: CoreDuration) -> usize {
            let deadline = Instant::now() + max_wait;
            let mut fired = self.fired.lock();
            while fired.len() < n {
                if self.cond.wait_until(&mut fired, deadline).timed_out() {
                    break;
                }
            }
            fired.len()
        }
    }

    fn writer() -> GUID {
        GUID::new(
            GuidPrefix::from_bytes([3; 12]),
            EntityId::new_writer(1, TopicKind::NoKey),
        )
    }

    #[test]
    fn detached_handles_track_arming() {
        let factory = TimerFactory::detached();
        let mut handle = factory.create(
            TimedEventKind::PeriodicHeartbeat { writer: writer() },
            CoreDuration::from_millis(5),
        );
        assert!(!handle.is_armed());
        handle.restart_timer();
        assert!(handle.is_armed());
        handle.on_fired();
        assert!(!handle.is_armed());
        handle.restart_timer();
        handle.cancel_timer();
        assert!(!handle.is_armed());
        assert_eq!(handle.event().owner(), writer());
    }

    #[test]
    fn reactor_fires_restarted_timer_once() {
        let collect = Arc::new(Collect::default());
        let resource = TimedEventResource::new(collect.clone()).unwrap();
        let factory = resource.factory();
        let event = TimedEventKind::PeriodicHeartbeat { writer: writer() };
        let mut handle = factory.create(event, CoreDuration::from_millis(10));
        handle.restart_timer();
        handle.restart_timer();
        assert_eq!(collect.wait_for(1, CoreDuration::from_secs(2)), 1);
        thread::sleep(CoreDuration::from_millis(40));
        assert_eq!(collect.fired.lock().as_slice(), &[event]);
    }

    #[test]
    fn cancelled_and_dropped_timers_do_not_fire() {
        let collect = Arc::new(Collect::default());
        let resource = TimedEventResource::new(collect.clone()).unwrap();
        let factory = resource.factory();
        let mut cancelled = factory.create(
            TimedEventKind::PeriodicHeartbeat { writer: writer() },
            CoreDuration::from_millis(20),
        );
        cancelled.restart_timer();
        cancelled.cancel_timer();
        {
            let mut dropped = factory.create(
                TimedEventKind::NackSupression {
                    writer: writer(),
                    reader: GUID::UNKNOW,
                },
                CoreDuration::from_millis(20),
            );
            dropped.restart_timer();
        }
        assert_eq!(collect.wait_for(1, CoreDuration::from_millis(100)), 0);
    }
}
