//! Edge-triggered readiness reactor.
//!
//! One reactor runs per worker thread over a mio `Poll` (epoll on Linux,
//! kqueue on the BSDs, always edge-triggered). Per-descriptor state lives
//! in a dense vector indexed by token (the raw descriptor number), sized on
//! demand and never shrunk. Event dispatch goes through a
//! [`ReactorHandler`] implemented by the worker; the registry's state tag
//! and generation counter make sure events and timers for a reused
//! descriptor never reach the wrong connection.
//!
//! Edge-triggered contract: every ready callback must drain its descriptor
//! until `WouldBlock`, otherwise the kernel will not re-notify.
//!
//! Close syscalls are amortized: the first couple of teardowns per tick
//! close inline, the rest drain in bounded batches between readiness
//! sweeps.

pub mod pool;
pub(crate) mod reserve;

use crossbeam::queue::ArrayQueue;
use mio::event::Source;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::timer::{TimerHandle, TimerWheel, DEFAULT_TICK};

/// Token reserved for the cross-thread waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness events drained per poll call.
const EVENTS_CAPACITY: usize = 1024;

/// Closes performed synchronously inside `queue_close` per tick.
const CLOSE_INLINE_BUDGET: usize = 2;

/// Deferred closes flushed per tick.
const CLOSE_BATCH: usize = 32;

/// Bound of the cross-thread task ring.
const TASK_QUEUE_CAPACITY: usize = 1024;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Readable/writable flags of one readiness event.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Worker-side event sink driven by [`Reactor::run`].
pub trait ReactorHandler {
    fn on_ready(&mut self, reactor: &mut Reactor, token: Token, readiness: Readiness);

    fn on_timer(&mut self, reactor: &mut Reactor, token: Token);

    /// Called between readiness batches, after deferred closes and posted
    /// tasks have drained. Returning false stops the loop.
    fn on_tick(&mut self, reactor: &mut Reactor) -> bool {
        let _ = reactor;
        true
    }
}

/// Per-descriptor lifecycle: vacant -> registered -> pending-close -> vacant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Vacant,
    Registered,
    PendingClose,
}

#[derive(Debug, Clone, Copy)]
struct FdSlot {
    state: SlotState,
    interest: Option<Interest>,
    generation: u32,
}

const VACANT_SLOT: FdSlot = FdSlot { state: SlotState::Vacant, interest: None, generation: 0 };

/// Cross-thread handle: wake, stop, and task posting.
#[derive(Clone)]
pub struct RemoteHandle {
    waker: Arc<Waker>,
    tasks: Arc<ArrayQueue<Task>>,
    stop: Arc<AtomicBool>,
}

impl RemoteHandle {
    pub fn wake(&self) {
        let _ = self.waker.wake();
    }

    /// Enqueues a task to run between readiness batches. Fails when the
    /// ring is full.
    pub fn post(&self, task: Task) -> Result<(), Task> {
        self.tasks.push(task)?;
        self.wake();
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }
}

pub struct Reactor {
    poll: Poll,
    registry: Vec<FdSlot>,
    timer: TimerWheel<(Token, u32)>,
    waker: Arc<Waker>,
    tasks: Arc<ArrayQueue<Task>>,
    pending_close: VecDeque<(Token, TcpStream)>,
    inline_close_budget: usize,
    stop: Arc<AtomicBool>,
    fired_timers: Vec<(Token, u32)>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Self::with_tick(DEFAULT_TICK)
    }

    pub fn with_tick(tick: Duration) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            registry: Vec::new(),
            timer: TimerWheel::new(tick),
            waker,
            tasks: Arc::new(ArrayQueue::new(TASK_QUEUE_CAPACITY)),
            pending_close: VecDeque::new(),
            inline_close_budget: CLOSE_INLINE_BUDGET,
            stop: Arc::new(AtomicBool::new(false)),
            fired_timers: Vec::new(),
        })
    }

    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            waker: Arc::clone(&self.waker),
            tasks: Arc::clone(&self.tasks),
            stop: Arc::clone(&self.stop),
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Inserts interest for a descriptor. Fails with `AlreadyExists` if the
    /// token is still registered or pending close.
    pub fn register<S: Source>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()> {
        debug_assert_ne!(token, WAKE_TOKEN);
        self.ensure_slot(token.0);
        let slot = &mut self.registry[token.0];
        if slot.state != SlotState::Vacant {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "token already registered"));
        }
        self.poll.registry().register(source, token, interest)?;
        let slot = &mut self.registry[token.0];
        slot.state = SlotState::Registered;
        slot.interest = Some(interest);
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }

    /// Updates the interest mask without re-registering.
    pub fn modify<S: Source>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()> {
        let slot = self
            .registry
            .get_mut(token.0)
            .filter(|slot| slot.state == SlotState::Registered)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        if slot.interest == Some(interest) {
            return Ok(());
        }
        self.poll.registry().reregister(source, token, interest)?;
        self.registry[token.0].interest = Some(interest);
        Ok(())
    }

    /// Removes interest; the descriptor itself stays open and is closed by
    /// the caller (or handed to `queue_close`).
    pub fn deregister<S: Source>(&mut self, source: &mut S, token: Token) -> io::Result<()> {
        let slot = self
            .registry
            .get_mut(token.0)
            .filter(|slot| slot.state == SlotState::Registered)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        slot.state = SlotState::Vacant;
        slot.interest = None;
        self.poll.registry().deregister(source)
    }

    /// Tears a connection down. The first `CLOSE_INLINE_BUDGET` calls per
    /// tick close synchronously; the rest park in the close batch and drain
    /// between readiness sweeps.
    pub fn queue_close(&mut self, token: Token, mut stream: TcpStream) {
        let _ = self.poll.registry().deregister(&mut stream);
        self.ensure_slot(token.0);

        if self.inline_close_budget > 0 {
            self.inline_close_budget -= 1;
            self.registry[token.0].state = SlotState::Vacant;
            self.registry[token.0].interest = None;
            drop(stream);
            return;
        }

        self.registry[token.0].state = SlotState::PendingClose;
        self.registry[token.0].interest = None;
        self.pending_close.push_back((token, stream));
    }

    /// Enqueues a task from the owning thread.
    pub fn post(&self, task: Task) -> Result<(), Task> {
        self.tasks.push(task)
    }

    /// Arms a timeout bound to the token's current generation; a fire after
    /// the descriptor was closed and reused is dropped.
    pub fn arm_timer(&mut self, after: Duration, token: Token) -> TimerHandle {
        let generation = self.registry.get(token.0).map(|slot| slot.generation).unwrap_or(0);
        self.timer.insert(after, (token, generation))
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timer.cancel(handle);
    }

    /// Blocks on readiness and dispatches until the handler's `on_tick`
    /// returns false. Poll failures other than `EINTR` are fatal and bubble
    /// to the worker.
    pub fn run(&mut self, handler: &mut impl ReactorHandler) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut batch: Vec<(Token, Readiness)> = Vec::with_capacity(EVENTS_CAPACITY);

        loop {
            let timeout = Some(self.timer.tick_duration());
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            self.inline_close_budget = CLOSE_INLINE_BUDGET;

            batch.clear();
            for event in events.iter() {
                batch.push((
                    event.token(),
                    Readiness { readable: event.is_readable(), writable: event.is_writable() },
                ));
            }

            for i in 0..batch.len() {
                if let Some(&(next, _)) = batch.get(i + 1) {
                    self.prefetch_slot(next);
                }

                let (token, readiness) = batch[i];
                if token == WAKE_TOKEN {
                    continue;
                }
                let live = self
                    .registry
                    .get(token.0)
                    .map(|slot| slot.state == SlotState::Registered)
                    .unwrap_or(false);
                if !live {
                    trace!(token = token.0, "dropping event for stale slot");
                    continue;
                }
                handler.on_ready(self, token, readiness);
            }

            let mut fired = std::mem::take(&mut self.fired_timers);
            self.timer.advance(Instant::now(), &mut fired);
            for (token, generation) in fired.drain(..) {
                let live = self
                    .registry
                    .get(token.0)
                    .map(|slot| slot.state == SlotState::Registered && slot.generation == generation)
                    .unwrap_or(false);
                if live {
                    handler.on_timer(self, token);
                }
            }
            self.fired_timers = fired;

            self.flush_deferred_closes();

            while let Some(task) = self.tasks.pop() {
                task();
            }

            if !handler.on_tick(self) {
                return Ok(());
            }
        }
    }

    fn flush_deferred_closes(&mut self) {
        let batch = self.pending_close.len().min(CLOSE_BATCH);
        for _ in 0..batch {
            if let Some((token, stream)) = self.pending_close.pop_front() {
                if let Some(slot) = self.registry.get_mut(token.0) {
                    slot.state = SlotState::Vacant;
                }
                drop(stream);
            }
        }
    }

    fn ensure_slot(&mut self, index: usize) {
        if index >= self.registry.len() {
            self.registry.resize(index + 1, VACANT_SLOT);
        }
    }

    /// Warms the cache line of the next event's slot while the current one
    /// is being handled.
    #[inline]
    fn prefetch_slot(&self, token: Token) {
        #[cfg(target_arch = "x86_64")]
        if let Some(slot) = self.registry.get(token.0) {
            unsafe {
                core::arch::x86_64::_mm_prefetch::<{ core::arch::x86_64::_MM_HINT_T0 }>(
                    slot as *const FdSlot as *const i8,
                )
            };
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = token;
    }

    #[cfg(test)]
    fn slot_state(&self, token: Token) -> Option<SlotState> {
        self.registry.get(token.0).map(|slot| slot.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::bind_listener;
    use std::net::SocketAddr;
    use std::os::fd::AsRawFd;

    fn ephemeral_listener() -> (mio::net::TcpListener, SocketAddr) {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16, false).unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    struct CountingHandler {
        ready: usize,
        timers: usize,
        ticks: usize,
        max_ticks: usize,
    }

    impl CountingHandler {
        fn new(max_ticks: usize) -> Self {
            Self { ready: 0, timers: 0, ticks: 0, max_ticks }
        }
    }

    impl ReactorHandler for CountingHandler {
        fn on_ready(&mut self, _reactor: &mut Reactor, _token: Token, _readiness: Readiness) {
            self.ready += 1;
        }

        fn on_timer(&mut self, _reactor: &mut Reactor, _token: Token) {
            self.timers += 1;
        }

        fn on_tick(&mut self, _reactor: &mut Reactor) -> bool {
            self.ticks += 1;
            self.ticks < self.max_ticks
        }
    }

    #[test]
    fn double_register_fails() {
        let mut reactor = Reactor::new().unwrap();
        let (mut listener, _) = ephemeral_listener();
        let token = Token(listener.as_raw_fd() as usize);

        reactor.register(&mut listener, token, Interest::READABLE).unwrap();
        let err = reactor.register(&mut listener, token, Interest::READABLE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        reactor.deregister(&mut listener, token).unwrap();
        reactor.register(&mut listener, token, Interest::READABLE).unwrap();
    }

    #[test]
    fn modify_requires_registration() {
        let mut reactor = Reactor::new().unwrap();
        let (mut listener, _) = ephemeral_listener();
        let token = Token(listener.as_raw_fd() as usize);

        let err = reactor.modify(&mut listener, token, Interest::WRITABLE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn listener_readiness_reaches_handler() {
        let mut reactor = Reactor::with_tick(Duration::from_millis(20)).unwrap();
        let (mut listener, addr) = ephemeral_listener();
        let token = Token(listener.as_raw_fd() as usize);
        reactor.register(&mut listener, token, Interest::READABLE).unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();

        let mut handler = CountingHandler::new(50);
        reactor.run(&mut handler).unwrap();
        assert!(handler.ready >= 1, "accept readiness must be delivered");
    }

    #[test]
    fn posted_tasks_run_between_batches() {
        let mut reactor = Reactor::with_tick(Duration::from_millis(10)).unwrap();
        let remote = reactor.remote();

        let flag = Arc::new(AtomicBool::new(false));
        let task_flag = Arc::clone(&flag);
        remote.post(Box::new(move || task_flag.store(true, Ordering::SeqCst))).ok().unwrap();

        let mut handler = CountingHandler::new(3);
        reactor.run(&mut handler).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn timer_fires_for_registered_token() {
        let mut reactor = Reactor::with_tick(Duration::from_millis(10)).unwrap();
        let (mut listener, _) = ephemeral_listener();
        let token = Token(listener.as_raw_fd() as usize);
        reactor.register(&mut listener, token, Interest::READABLE).unwrap();
        reactor.arm_timer(Duration::from_millis(20), token);

        let mut handler = CountingHandler::new(40);
        reactor.run(&mut handler).unwrap();
        assert_eq!(handler.timers, 1);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let mut reactor = Reactor::with_tick(Duration::from_millis(10)).unwrap();
        let (mut listener, _) = ephemeral_listener();
        let token = Token(listener.as_raw_fd() as usize);
        reactor.register(&mut listener, token, Interest::READABLE).unwrap();
        let handle = reactor.arm_timer(Duration::from_millis(20), token);
        reactor.cancel_timer(handle);

        let mut handler = CountingHandler::new(8);
        reactor.run(&mut handler).unwrap();
        assert_eq!(handler.timers, 0);
    }

    #[test]
    fn queue_close_applies_inline_budget() {
        let mut reactor = Reactor::with_tick(Duration::from_millis(10)).unwrap();
        let (mut listener, addr) = ephemeral_listener();
        let listener_token = Token(listener.as_raw_fd() as usize);
        reactor.register(&mut listener, listener_token, Interest::READABLE).unwrap();

        let clients: Vec<_> = (0..3).map(|_| std::net::TcpStream::connect(addr).unwrap()).collect();

        // Accept the three connections (blocking-ish retry loop).
        let mut accepted = Vec::new();
        while accepted.len() < 3 {
            match listener.accept() {
                Ok((stream, _)) => accepted.push(stream),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }

        let mut tokens = Vec::new();
        for mut stream in accepted {
            let token = Token(stream.as_raw_fd() as usize);
            reactor.register(&mut stream, token, Interest::READABLE).unwrap();
            tokens.push((token, stream));
        }

        for (token, stream) in tokens.drain(..) {
            reactor.queue_close(token, stream);
        }

        // Two inline closes, one deferred.
        let pending: Vec<_> = reactor
            .registry
            .iter()
            .filter(|slot| slot.state == SlotState::PendingClose)
            .collect();
        assert_eq!(pending.len(), 1);

        reactor.flush_deferred_closes();
        assert!(reactor.registry.iter().all(|slot| slot.state != SlotState::PendingClose));
        drop(clients);
    }
}
