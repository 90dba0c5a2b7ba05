//! `broadcast` channel extensions.

use tokio::sync::broadcast::{error::RecvError, Receiver};

/// An extension trait for [`tokio::sync::broadcast::Receiver`].
pub trait ReceiverExt<T: Clone> {
    /// Resolves to the next item, skipping over items lost to the bounded
    /// ring (drop-oldest). Returns `None` when the channel is closed.
    async fn next_broadcast(&mut self) -> Option<T>;
}

impl<T: Clone + Send> ReceiverExt<T> for Receiver<T> {
    async fn next_broadcast(&mut self) -> Option<T> {
        loop {
            match self.recv().await {
                Ok(item) => break Some(item),
                Err(RecvError::Lagged(count)) => {
                    tracing::warn!("subscription lagged behind by {count} items");
                }
                Err(RecvError::Closed) => break None,
            }
        }
    }
}
