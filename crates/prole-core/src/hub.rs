//! Replayable, in-memory event log with live fan-out.
//!
//! The log always ends in one open slot. Subscribers wait on that slot's
//! signal rather than on the log itself, so any number of them can follow
//! the producer at their own pace, and late subscribers replay from any
//! offset. Closing the hub signals the open slot without a value, which
//! every subscriber reads as end of stream.

use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

struct Slot<E> {
    event: OnceLock<E>,
    occurred: watch::Sender<bool>,
}

impl<E> Slot<E> {
    fn open() -> Arc<Self> {
        let (occurred, _) = watch::channel(false);
        Arc::new(Self {
            event: OnceLock::new(),
            occurred,
        })
    }

    fn signal(&self) {
        self.occurred.send_replace(true);
    }
}

struct Log<E> {
    slots: Vec<Arc<Slot<E>>>,
    closed: bool,
}

/// How a subscription stopped.
#[derive(Debug)]
pub enum Subscription<E> {
    /// The stream ended; the destination was closed.
    Ended,
    /// The cancel token fired; the destination is handed back open.
    Cancelled(mpsc::Sender<E>),
    /// The receiving side went away.
    Disconnected,
}

/// Append-only event log for one build.
pub struct EventHub<E> {
    log: RwLock<Log<E>>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Log {
                slots: vec![Slot::open()],
                closed: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Log<E>> {
        self.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Log<E>> {
        self.log.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `event` and wake everyone waiting on it. Dropped once closed.
    pub fn emit(&self, event: E) {
        let mut log = self.write();
        if log.closed {
            return;
        }

        let Some(slot) = log.slots.last().cloned() else {
            return;
        };
        let _ = slot.event.set(event);
        log.slots.push(Slot::open());
        slot.signal();
    }

    /// Mark the end of the stream. Idempotent.
    pub fn close(&self) {
        let mut log = self.write();
        if log.closed {
            return;
        }

        log.closed = true;
        if let Some(slot) = log.slots.last() {
            slot.signal();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.read().slots.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + Send + Sync + 'static> EventHub<E> {
    /// Events recorded so far, in order.
    pub fn snapshot(&self) -> Vec<E> {
        self.read()
            .slots
            .iter()
            .filter_map(|slot| slot.event.get().cloned())
            .collect()
    }

    /// Deliver every event from offset `from` onwards into `dest`, in order.
    ///
    /// Returns once the stream ends (dropping `dest`), the receiver goes
    /// away, or `cancel` fires (handing `dest` back). An offset past the end
    /// of the log ends the stream immediately.
    pub async fn subscribe(
        &self,
        from: usize,
        dest: mpsc::Sender<E>,
        cancel: &CancellationToken,
    ) -> Subscription<E> {
        let mut index = from;

        loop {
            let slot = match self.read().slots.get(index) {
                Some(slot) => slot.clone(),
                None => return Subscription::Ended,
            };

            let mut occurred = slot.occurred.subscribe();
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = occurred.wait_for(|filled| *filled) => false,
            };
            if cancelled {
                return Subscription::Cancelled(dest);
            }

            let Some(event) = slot.event.get() else {
                return Subscription::Ended;
            };

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = dest.send(event.clone()) => Some(sent.is_ok()),
            };
            match sent {
                None => return Subscription::Cancelled(dest),
                Some(false) => return Subscription::Disconnected,
                Some(true) => index += 1,
            }
        }
    }

    /// Follow the hub from `from` on a background task, returning the
    /// receiving end. The channel closes at end of stream or on cancel.
    pub fn follow(
        self: &Arc<Self>,
        from: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<E> {
        let (tx, rx) = mpsc::channel(64);
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let _ = hub.subscribe(from, tx, &cancel).await;
        });
        rx
    }
}
