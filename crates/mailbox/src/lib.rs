//! Bounded multi-producer / single-consumer mailboxes for cross-core
//! command delivery.
//!
//! Every worker block owns exactly one Mailbox and drains it from its own
//! core; any other thread may hold a MailboxSender. Entries are delivered
//! in FIFO order within one mailbox. There is no ordering between
//! mailboxes.

/// Default mailbox capacity.
pub const MAILBOX_MAX_ENTRIES: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    /// The mailbox is at capacity. The entry is returned to the caller and
    /// is NOT retried: a lost policy update is logged by the producer and
    /// the decision service is expected to re-issue it.
    #[error("mailbox is full")]
    Full,
    /// The consumer exited and dropped its Mailbox. Expected while the
    /// process is shutting down.
    #[error("mailbox consumer is gone")]
    Disconnected,
}

/// Producer half of a mailbox. Cloneable and thread-safe; `send` never
/// blocks.
pub struct MailboxSender<T> {
    tx: crossbeam_channel::Sender<T>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MailboxSender<T> {
    pub fn send(&self, entry: T) -> Result<(), SendError> {
        use crossbeam_channel::TrySendError;

        match self.tx.try_send(entry) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }
}

/// Consumer half of a mailbox. Owned by exactly one worker, which drains
/// it with `dequeue_burst` from its poll loop.
pub struct Mailbox<T> {
    rx: crossbeam_channel::Receiver<T>,
}

impl<T> Mailbox<T> {
    /// Pop up to `max` entries into `into`, preserving FIFO order.
    /// Returns the number of entries popped. Never blocks.
    pub fn dequeue_burst(&self, into: &mut Vec<T>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            match self.rx.try_recv() {
                Ok(entry) => {
                    into.push(entry);
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }
}

/// Build a bounded mailbox of the given capacity.
pub fn bounded<T>(capacity: usize) -> (MailboxSender<T>, Mailbox<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (MailboxSender { tx }, Mailbox { rx })
}
