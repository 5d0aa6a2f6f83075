use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::trace;

/// A data source feeding a [`Body`](crate::protocol::body::Body) that can be
/// asked to stop delivering for a while.
pub trait BodySource: Send + Sync {
    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;
}

/// The connection read loop's pause switch.
///
/// The read loop checks [`is_paused`](BodySource::is_paused) before reading
/// more bytes and parks in [`until_resumed`](FlowControl::until_resumed);
/// any reader of the body resumes it.
#[derive(Debug, Default)]
pub struct FlowControl {
    paused: AtomicBool,
    notify: Notify,
}

impl FlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once the source is no longer paused.
    pub async fn until_resumed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking, so a resume in between is not lost
            notified.as_mut().enable();
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }
}

impl BodySource for FlowControl {
    fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            trace!("pausing body source");
        }
    }

    fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            trace!("resuming body source");
        }
        self.notify.notify_waiters();
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}
