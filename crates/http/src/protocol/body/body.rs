use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::channel::mpsc;
use tokio::sync::watch;
use tracing::trace;

use crate::protocol::Payload;
use crate::protocol::body::{BodySource, BodyStream};

/// An append-only byte buffer that is filled asynchronously.
///
/// A `Body` decouples "bytes have arrived" from "someone wants to read them":
/// - the single writer appends with [`write`](Body::write) and finishes with
///   [`close_write`](Body::close_write), which fires the completion signal once
/// - any number of readers either [`subscribe`](Body::subscribe) (replay of what
///   is buffered, then live chunks) or wait for completion and read the final
///   content with [`read`](Body::read), [`gets`](Body::gets) or
///   [`to_bytes`](Body::to_bytes)
///
/// `Body` is a cheap handle; clones share the same buffer. Writes and the
/// close call are expected to come from one task, the owner of the message.
#[derive(Clone)]
pub struct Body {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    closed: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    buffer: BytesMut,
    read_pos: usize,
    write_closed: bool,
    aborted: bool,
    expected_length: Option<u64>,
    subscribers: Vec<mpsc::UnboundedSender<Bytes>>,
    source: Option<Arc<dyn BodySource>>,
}

impl Body {
    /// Creates an empty body that is open for writing.
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { shared: Arc::new(Shared { state: Mutex::new(State::default()), closed }) }
    }

    /// Creates a closed body holding `data`.
    pub fn full(data: impl Into<Bytes>) -> Self {
        let body = Self::new();
        body.write(data);
        body.close_write();
        body
    }

    /// Creates a closed body holding nothing.
    pub fn empty() -> Self {
        let body = Self::new();
        body.close_write();
        body
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `data` and hands exactly these bytes to every live subscriber,
    /// in subscription order.
    ///
    /// Returns the number of bytes accepted: zero once the body is write-closed,
    /// and never more than the expected length announced by the source.
    pub fn write(&self, data: impl Into<Bytes>) -> usize {
        let mut data = data.into();
        let mut state = self.lock();
        if state.write_closed {
            trace!(len = data.len(), "dropping write to closed body");
            return 0;
        }

        if let Some(expected) = state.expected_length {
            let room = expected.saturating_sub(state.buffer.len() as u64);
            if data.len() as u64 > room {
                data.truncate(usize::try_from(room).unwrap_or(usize::MAX));
            }
        }

        if data.is_empty() {
            return 0;
        }

        state.buffer.extend_from_slice(&data);
        state.subscribers.retain(|subscriber| subscriber.unbounded_send(data.clone()).is_ok());
        data.len()
    }

    /// Closes the body for writing and fires the completion signal.
    ///
    /// Every task waiting on this body is released. Returns `true` only for the
    /// call that actually closed it; later calls are no-ops.
    pub fn close_write(&self) -> bool {
        {
            let mut state = self.lock();
            if state.write_closed {
                return false;
            }
            state.write_closed = true;
            // dropping the senders ends every subscription
            state.subscribers.clear();
        }
        self.shared.closed.send_replace(true);
        true
    }

    /// Closes the body because its message failed; readers observe the end of
    /// the content instead of hanging.
    pub fn abort(&self) -> bool {
        self.lock().aborted = true;
        self.close_write()
    }

    pub fn is_write_closed(&self) -> bool {
        self.lock().write_closed
    }

    /// Whether the body was closed by [`abort`](Body::abort) rather than by
    /// its writer finishing.
    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Subscribes to the content: first everything buffered so far as a single
    /// chunk, then every later write, ending when the body is write-closed.
    ///
    /// Each call is a fresh subscription, so historical bytes are replayed
    /// again to late subscribers. Subscribing resumes a paused source.
    pub fn subscribe(&self) -> BodyStream {
        let (sender, receiver) = mpsc::unbounded();
        {
            let mut state = self.lock();
            if !state.buffer.is_empty() {
                let _ = sender.unbounded_send(Bytes::copy_from_slice(&state.buffer));
            }
            if !state.write_closed {
                state.subscribers.push(sender);
            }
        }
        self.resume_source();
        BodyStream::new(receiver)
    }

    /// Calls `on_chunk` for the replayed content and every later chunk,
    /// returning once the body is write-closed.
    pub async fn each<F>(&self, mut on_chunk: F)
    where
        F: FnMut(Bytes),
    {
        let mut stream = self.subscribe();
        while let Some(chunk) = stream.next().await {
            on_chunk(chunk);
        }
    }

    /// Waits until the body is write-closed.
    ///
    /// Resumes a paused source first.
    pub async fn wait(&self) {
        self.resume_source();
        let mut closed = self.shared.closed.subscribe();
        // the sender lives as long as `self`, so this only ends with `true`
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Waits for the whole content, then reads from the read cursor.
    ///
    /// With `None` everything left is returned (empty at the end). With
    /// `Some(n)` at most `n` bytes are returned and `None` marks the end.
    pub async fn read(&self, length: Option<usize>) -> Option<Bytes> {
        self.wait().await;
        let mut state = self.lock();
        let remaining = state.buffer.len() - state.read_pos;
        let take = match length {
            None => remaining,
            Some(0) => return Some(Bytes::new()),
            Some(_) if remaining == 0 => return None,
            Some(n) => n.min(remaining),
        };
        let start = state.read_pos;
        state.read_pos += take;
        Some(Bytes::copy_from_slice(&state.buffer[start..start + take]))
    }

    /// Waits for the whole content, then reads one line including its `\n`.
    ///
    /// Returns `None` at the end of the content.
    pub async fn gets(&self) -> Option<Bytes> {
        self.wait().await;
        let mut state = self.lock();
        let start = state.read_pos;
        let rest = &state.buffer[start..];
        if rest.is_empty() {
            return None;
        }
        let end = rest.iter().position(|b| *b == b'\n').map_or(rest.len(), |i| i + 1);
        let line = Bytes::copy_from_slice(&rest[..end]);
        state.read_pos += end;
        Some(line)
    }

    /// Waits for the whole content and moves the read cursor back to the start.
    pub async fn rewind(&self) {
        self.wait().await;
        self.lock().read_pos = 0;
    }

    /// The read cursor position.
    pub fn pos(&self) -> usize {
        self.lock().read_pos
    }

    /// Waits for the whole content and returns a copy of it.
    pub async fn to_bytes(&self) -> Bytes {
        self.wait().await;
        Bytes::copy_from_slice(&self.lock().buffer)
    }

    /// The length announced by the source, or the final length once the
    /// body is complete.
    pub async fn length(&self) -> u64 {
        if let Some(expected) = self.lock().expected_length {
            return expected;
        }
        self.wait().await;
        self.lock().buffer.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.length().await == 0
    }

    /// Announces how many bytes the source will deliver; writes beyond that
    /// are truncated.
    pub fn set_expected_length(&self, length: u64) {
        self.lock().expected_length = Some(length);
    }

    /// Attaches the flow-controllable source feeding this body.
    pub fn attach_source(&self, source: Arc<dyn BodySource>) {
        self.lock().source = Some(source);
    }

    /// The first reader detaches the source: from then on the body is
    /// demanded and must not be throttled again.
    fn resume_source(&self) {
        let source = self.lock().source.take();
        if let Some(source) = source.filter(|source| source.is_paused()) {
            trace!("resuming paused body source");
            source.resume();
        }
    }

    /// Whether a flow-controllable source is attached and no reader has
    /// shown up yet.
    pub fn has_source(&self) -> bool {
        self.lock().source.is_some()
    }

    /// Bytes written so far.
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Number of subscriptions still being listened to.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.iter().filter(|subscriber| !subscriber.is_closed()).count()
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Body")
            .field("buffered", &state.buffer.len())
            .field("write_closed", &state.write_closed)
            .field("aborted", &state.aborted)
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::full(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(str: &'static str) -> Self {
        Body::full(Bytes::from_static(str.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(string: String) -> Self {
        Body::full(string)
    }
}

impl From<Vec<u8>> for Body {
    fn from(vec: Vec<u8>) -> Self {
        Body::full(vec)
    }
}

impl From<Payload> for Body {
    fn from(payload: Payload) -> Self {
        let body = Body::new();
        for chunk in payload.into_chunks() {
            body.write(chunk);
        }
        body.close_write();
        body
    }
}
