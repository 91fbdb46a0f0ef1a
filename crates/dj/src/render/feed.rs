//! Single-producer snapshot hand-off from control code to the renderer.
//!
//! Control code publishes complete parameter snapshots; the renderer drains
//! whatever arrived since its last block and keeps the newest. A full ring
//! only happens while nothing is rendering, so the latest snapshot is parked
//! and retried on the next send or flush.

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

pub const SNAPSHOT_CAPACITY: usize = 256;

pub fn snapshot_channel<T>(capacity: usize) -> (SnapshotSender<T>, SnapshotReceiver<T>) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    (
        SnapshotSender {
            producer: Mutex::new(producer),
            unsent: None,
        },
        SnapshotReceiver { consumer },
    )
}

pub struct SnapshotSender<T> {
    // Only reached through `get_mut`; the mutex just makes the sender `Sync`
    producer: Mutex<Producer<T>>,
    unsent: Option<T>,
}

impl<T> SnapshotSender<T> {
    /// Publish `value`, superseding anything still parked.
    pub fn send(&mut self, value: T) {
        self.unsent = None;
        if let Err(PushError::Full(value)) = self.producer.get_mut().push(value) {
            self.unsent = Some(value);
        }
    }

    /// Retry a parked snapshot. Returns true when nothing is left pending.
    pub fn flush(&mut self) -> bool {
        match self.unsent.take() {
            Some(value) => {
                if let Err(PushError::Full(value)) = self.producer.get_mut().push(value) {
                    self.unsent = Some(value);
                    return false;
                }
                true
            }
            None => true,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.unsent.is_some()
    }
}

pub struct SnapshotReceiver<T> {
    consumer: Consumer<T>,
}

impl<T> SnapshotReceiver<T> {
    /// Hand every queued snapshot to `f`, oldest first.
    #[inline]
    pub fn drain(&mut self, mut f: impl FnMut(T)) {
        while let Ok(value) = self.consumer.pop() {
            f(value);
        }
    }

    /// Newest queued snapshot, discarding older ones.
    #[inline]
    pub fn latest(&mut self) -> Option<T> {
        let mut newest = None;
        self.drain(|value| newest = Some(value));
        newest
    }
}
