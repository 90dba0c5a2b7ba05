//! Non-blocking fan-out of frame results and encoded preview frames.
//!
//! Each subscription owns a bounded drop-oldest queue; a slow subscriber
//! loses the oldest items from its own queue and never blocks the
//! producer. Dropping a [`Subscription`] deregisters it.

use crate::{
    consts::{PREVIEW_QUEUE_CAPACITY, RESULT_QUEUE_CAPACITY},
    ext::broadcast::ReceiverExt as _,
    liveness::LivenessResult,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// An encoded preview frame.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    /// JPEG bytes, shared across subscribers.
    pub jpeg: Arc<Vec<u8>>,
    /// Monotonic pipeline timestamp of the source frame.
    pub timestamp: std::time::Duration,
}

/// Fan-out hub for the two camera item streams.
#[derive(Debug)]
pub struct Hub {
    results: broadcast::Sender<LivenessResult>,
    previews: broadcast::Sender<PreviewFrame>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(RESULT_QUEUE_CAPACITY, PREVIEW_QUEUE_CAPACITY)
    }
}

impl Hub {
    /// Creates a hub with custom per-subscription queue capacities.
    #[must_use]
    pub fn new(result_capacity: usize, preview_capacity: usize) -> Self {
        let (results, _) = broadcast::channel(result_capacity);
        let (previews, _) = broadcast::channel(preview_capacity);
        Self { results, previews }
    }

    /// Publishes a frame result to every active subscription.
    pub fn publish_result(&self, result: LivenessResult) {
        // An error only means there is no subscriber right now.
        drop(self.results.send(result));
    }

    /// Publishes an encoded preview frame to every active subscription.
    pub fn publish_preview(&self, frame: PreviewFrame) {
        drop(self.previews.send(frame));
    }

    /// Subscribes to the frame-result stream.
    #[must_use]
    pub fn subscribe_results(&self) -> Subscription<LivenessResult> {
        Subscription { rx: self.results.subscribe() }
    }

    /// Subscribes to the preview stream.
    #[must_use]
    pub fn subscribe_previews(&self) -> Subscription<PreviewFrame> {
        Subscription { rx: self.previews.subscribe() }
    }
}

/// A handle to one bounded drop-oldest queue. Drop to deregister.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone + Send> Subscription<T> {
    /// Receives the next item in publish order. Items lost to the bounded
    /// queue are skipped. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.next_broadcast().await
    }
}
