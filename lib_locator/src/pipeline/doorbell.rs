use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// "Something changed, re-check for un-enriched samples." Carries no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentSignal;

/// Outcome of a single [`Doorbell::ring`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    Queued,
    /// Queue at capacity; the ring was discarded.
    Dropped,
    /// The doorbell has been closed by shutdown.
    Closed,
}

/// Producer side of the enrichment doorbell.
///
/// Clones share one underlying sender, so [`Doorbell::close`] from any clone
/// closes the queue for everybody and lets the receiver drain and finish.
#[derive(Clone, Debug)]
pub struct Doorbell {
    sender: Arc<Mutex<Option<mpsc::Sender<EnrichmentSignal>>>>,
}

/// Consumer side of the enrichment doorbell. There is exactly one.
#[derive(Debug)]
pub struct DoorbellReceiver {
    receiver: mpsc::Receiver<EnrichmentSignal>,
}

impl Doorbell {
    /// Creates a doorbell holding at most `capacity` pending signals.
    pub fn new(capacity: usize) -> (Self, DoorbellReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            DoorbellReceiver { receiver: rx },
        )
    }

    /// Enqueues one signal without waiting.
    pub fn ring(&self) -> Ring {
        let guard = self.lock();
        match guard.as_ref() {
            None => Ring::Closed,
            Some(tx) => match tx.try_send(EnrichmentSignal) {
                Ok(()) => Ring::Queued,
                Err(TrySendError::Full(_)) => Ring::Dropped,
                Err(TrySendError::Closed(_)) => Ring::Closed,
            },
        }
    }

    /// Closes the queue. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    // A panic while holding the lock cannot leave the Option half-updated.
    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<EnrichmentSignal>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DoorbellReceiver {
    /// Waits for the next signal. `None` once the doorbell is closed and every
    /// queued signal has been taken.
    pub async fn recv(&mut self) -> Option<EnrichmentSignal> {
        self.receiver.recv().await
    }

    /// Number of signals waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ring_never_blocks_when_full() {
        let (doorbell, rx) = Doorbell::new(100);

        let outcomes: Vec<Ring> = (0..1000).map(|_| doorbell.ring()).collect();

        assert_eq!(outcomes.iter().filter(|r| **r == Ring::Queued).count(), 100);
        assert_eq!(outcomes.iter().filter(|r| **r == Ring::Dropped).count(), 900);
        assert_eq!(rx.pending(), 100);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (doorbell, mut rx) = Doorbell::new(4);
        doorbell.ring();
        doorbell.ring();

        assert!(doorbell.close());
        assert_eq!(doorbell.ring(), Ring::Closed);

        assert_eq!(rx.recv().await, Some(EnrichmentSignal));
        assert_eq!(rx.recv().await, Some(EnrichmentSignal));
        let end = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(end, None);
    }

    #[test]
    fn close_is_idempotent_across_clones() {
        let (doorbell, _rx) = Doorbell::new(1);
        let other = doorbell.clone();

        assert!(doorbell.close());
        assert!(!other.close());
        assert!(other.is_closed());
    }
}
