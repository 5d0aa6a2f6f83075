//! Ordering of pipelined messages on one connection.
//!
//! Every message entering a connection gets a [`Ticket`]. Before a message
//! may be written, its ticket waits until the previous message finished
//! writing, so messages reach the wire in submission order no matter in
//! which order their handlers finish. There is no connection-wide lock: each
//! ticket only waits on its own predecessor, and a lone message never waits.
//!
//! The pipeline also owns the connection's [`IdleTimer`]. It only runs while
//! the queue is empty: a queued message keeps the connection busy through its
//! handler and its writes, and the timer is re-armed once the last message
//! leaves the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::ensure;
use crate::protocol::PipelineError;
use crate::protocol::body::Body;

/// Tracks inactivity on a connection.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Option<Duration>,
    last_activity: Instant,
    active_writes: usize,
}

impl IdleTimer {
    /// A zero timeout disables the timer like `None` does.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout: timeout.filter(|timeout| !timeout.is_zero()), last_activity: Instant::now(), active_writes: 0 }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn suspend(&mut self) {
        self.active_writes += 1;
    }

    pub fn resume(&mut self) {
        self.active_writes = self.active_writes.saturating_sub(1);
        if self.active_writes == 0 {
            self.touch();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.active_writes > 0
    }

    /// When the timer fires if nothing happens; `None` while disabled or
    /// suspended.
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_suspended() {
            return None;
        }
        self.timeout.map(|timeout| self.last_activity + timeout)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }
}

/// The ordered queue of in-flight messages of one connection.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    aborted: watch::Sender<bool>,
}

struct State {
    next_id: u64,
    entries: VecDeque<Entry>,
    tail: Option<oneshot::Receiver<()>>,
    accepting: bool,
    timer: IdleTimer,
}

struct Entry {
    id: u64,
    body: Option<Body>,
}

impl Pipeline {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        let (aborted, _) = watch::channel(false);
        let state = State {
            next_id: 0,
            entries: VecDeque::new(),
            tail: None,
            accepting: true,
            timer: IdleTimer::new(idle_timeout),
        };
        Self { shared: Arc::new(Shared { state: Mutex::new(state), aborted }) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a message to the queue.
    ///
    /// `body` is the body to abort should the connection fail while the
    /// message is in flight.
    pub fn enter(&self, body: Option<Body>) -> Result<Ticket, PipelineError> {
        let mut state = self.lock();
        ensure!(state.accepting, PipelineError::Closed);

        let id = state.next_id;
        state.next_id += 1;

        let (release, gate) = oneshot::channel();
        let predecessor = if state.entries.is_empty() { None } else { state.tail.take() };
        state.tail = Some(gate);
        state.entries.push_back(Entry { id, body });
        trace!(id, queued = state.entries.len(), "message entered pipeline");

        Ok(Ticket {
            id,
            predecessor,
            release: Some(release),
            aborted: self.shared.aborted.subscribe(),
            pipeline: self.clone(),
        })
    }

    /// Registers the body of a message that is already queued, e.g. the
    /// response body a client receives for a sent request.
    pub fn attach_body(&self, id: u64, body: Body) {
        if let Some(entry) = self.lock().entries.iter_mut().find(|entry| entry.id == id) {
            entry.body = Some(body);
        }
    }

    /// Removes a message whose whole cycle is done.
    pub fn complete(&self, id: u64) {
        let mut state = self.lock();
        state.entries.retain(|entry| entry.id != id);
        trace!(id, queued = state.entries.len(), "message left pipeline");
        if state.entries.is_empty() {
            state.tail = None;
            state.timer.touch();
        }
    }

    /// Stops accepting new messages; queued ones carry on.
    pub fn stop_accepting(&self) {
        self.lock().accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    /// Tears the pipeline down: queued bodies are aborted so their readers
    /// are released, and every ticket still waiting fails with
    /// [`PipelineError::Aborted`].
    pub fn fail_all(&self) {
        let entries = {
            let mut state = self.lock();
            state.accepting = false;
            state.tail = None;
            std::mem::take(&mut state.entries)
        };
        debug!(failed = entries.len(), "failing queued messages");
        for body in entries.into_iter().filter_map(|entry| entry.body) {
            body.abort();
        }
        self.shared.aborted.send_replace(true);
    }

    pub fn is_failed(&self) -> bool {
        *self.shared.aborted.borrow()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Records activity on the connection.
    pub fn touch(&self) {
        self.lock().timer.touch();
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.lock().timer.timeout()
    }

    /// When the connection idles out; `None` while messages are queued or
    /// the timer is disabled.
    pub fn deadline(&self) -> Option<Instant> {
        let state = self.lock();
        if state.entries.is_empty() { state.timer.deadline() } else { None }
    }

    pub fn is_expired(&self) -> bool {
        let state = self.lock();
        state.entries.is_empty() && state.timer.is_expired(Instant::now())
    }

    /// Sleeps until the idle deadline as of now; never resolves while the
    /// timer is disabled or suspended, or while messages are queued.
    pub async fn idle(&self) {
        match self.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Pipeline")
            .field("queued", &state.entries.len())
            .field("accepting", &state.accepting)
            .field("timer", &state.timer)
            .finish_non_exhaustive()
    }
}

/// One message's place in the [`Pipeline`].
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    predecessor: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
    aborted: watch::Receiver<bool>,
    pipeline: Pipeline,
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits until the previous message finished writing.
    ///
    /// Fails when the pipeline was torn down, or when the predecessor's
    /// ticket was dropped without finishing.
    pub async fn wait_predecessor(&mut self) -> Result<(), PipelineError> {
        ensure!(!*self.aborted.borrow(), PipelineError::Aborted);
        let Some(gate) = self.predecessor.take() else {
            return Ok(());
        };

        tokio::select! {
            released = gate => released.map_err(|oneshot::Canceled| PipelineError::Aborted),
            _ = self.aborted.wait_for(|aborted| *aborted) => Err(PipelineError::Aborted),
        }
    }

    /// Suspends the idle timer until the returned guard is dropped.
    pub fn begin_write(&self) -> WriteGuard {
        self.pipeline.lock().timer.suspend();
        WriteGuard { pipeline: self.pipeline.clone() }
    }

    /// Lets the next message start writing.
    pub fn finish_write(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }

    /// Ends the message's cycle: releases the successor if that did not
    /// happen yet and leaves the queue.
    pub fn complete(mut self) {
        self.finish_write();
        self.pipeline.complete(self.id);
    }
}

/// Keeps the idle timer suspended while a write is in progress.
#[derive(Debug)]
pub struct WriteGuard {
    pipeline: Pipeline,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.pipeline.lock().timer.resume();
    }
}
