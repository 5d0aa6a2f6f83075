use std::sync::Arc;

use tracing::debug;

use crate::protocol::body::{Body, BodySource, FlowControl};

/// The body a connection is currently receiving, with its read throttle.
///
/// Reading pauses while the body buffers more than `high_water` bytes and no
/// reader has shown up; the first reader resumes it for good.
#[derive(Debug)]
pub(crate) struct InboundBody {
    body: Body,
    flow: Arc<FlowControl>,
    high_water: usize,
    released: bool,
}

impl InboundBody {
    pub(crate) fn new(body: Body, high_water: usize) -> Self {
        let flow = Arc::new(FlowControl::new());
        body.attach_source(Arc::clone(&flow) as Arc<dyn BodySource>);
        Self { body, flow, high_water, released: false }
    }

    pub(crate) fn body(&self) -> &Body {
        &self.body
    }

    /// Pauses reading when the body is over its high water mark. Returns
    /// whether reading is paused.
    pub(crate) fn throttle(&self) -> bool {
        if !self.released && self.body.has_source() && !self.body.is_write_closed() && self.body.buffered_len() > self.high_water {
            if !self.flow.is_paused() {
                debug!(buffered = self.body.buffered_len(), "pausing reads until the body is read");
            }
            self.flow.pause();
        }
        self.flow.is_paused()
    }

    /// Lifts the throttle for good, e.g. once the body's message was
    /// answered and the rest only needs draining.
    pub(crate) fn release(&mut self) {
        self.released = true;
        self.flow.resume();
    }

    pub(crate) async fn until_resumed(&self) {
        self.flow.until_resumed().await;
    }

    pub(crate) fn abort(&self) {
        self.body.abort();
        self.flow.resume();
    }
}
