//! `mpsc` channel extensions.

use tokio::sync::mpsc::{error::TrySendError, Sender};

/// An extension trait for [`tokio::sync::mpsc::Sender`].
pub trait SenderExt<T> {
    /// Sends a message if the queue is not full. A full queue drops the
    /// message silently; a closed channel is reported.
    fn send_now(&self, message: T) -> Result<(), T>;
}

impl<T> SenderExt<T> for Sender<T> {
    fn send_now(&self, message: T) -> Result<(), T> {
        match self.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                tracing::warn!("bounded queue full, dropping message");
                drop(message);
                Ok(())
            }
            Err(TrySendError::Closed(message)) => Err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send_now(1).unwrap();
        tx.send_now(2).unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_returns_the_message() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(tx.send_now(7), Err(7));
    }
}
