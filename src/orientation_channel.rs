//! The latest-wins handoff between the head-tracking reader and the audio
//! callback.
//!
//! The reader pushes every decoded orientation; the callback only ever
//! cares about the newest one. Neither side waits on the other: a full
//! channel evicts its oldest value, and the consumer gives up on a
//! contended lock and keeps the orientation it already has.

use crate::quaternion::Quaternion;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, TryLockError,
    },
};

/// How many orientations may pile up before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug)]
struct Shared {
    pending: Mutex<VecDeque<Quaternion>>,
    capacity: usize,
    produced: AtomicU64,
}

/// Creates a connected producer/consumer pair holding at most `capacity`
/// pending orientations (at least one).
pub fn orientation_channel(capacity: usize) -> (OrientationProducer, OrientationConsumer) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        pending: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        produced: AtomicU64::new(0),
    });
    (
        OrientationProducer {
            shared: shared.clone(),
        },
        OrientationConsumer {
            shared,
            current: Quaternion::IDENTITY,
        },
    )
}

/// The writing end, owned by the reader thread.
#[derive(Debug, Clone)]
pub struct OrientationProducer {
    shared: Arc<Shared>,
}

impl OrientationProducer {
    /// Installs a new orientation, evicting the oldest pending one if the
    /// channel is full.
    pub fn push(&self, orientation: Quaternion) {
        // A poisoned lock only means another holder panicked mid-push; the
        // queue of plain values is still usable.
        let mut pending = match self.shared.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while pending.len() >= self.shared.capacity {
            pending.pop_front();
        }
        pending.push_back(orientation);
        self.shared.produced.fetch_add(1, Ordering::Release);
    }

    /// Total number of orientations pushed so far.
    pub fn produced(&self) -> u64 {
        self.shared.produced.load(Ordering::Acquire)
    }
}

/// The reading end, owned by the render engine.
#[derive(Debug)]
pub struct OrientationConsumer {
    shared: Arc<Shared>,
    current: Quaternion,
}

impl OrientationConsumer {
    /// Drains the channel and returns the most recent orientation. Older
    /// pending values are dropped: the newest one wins.
    ///
    /// Never blocks. The lock is only tried, so when nothing is pending, or
    /// the producer holds the lock at this instant, the previous orientation
    /// is returned unchanged. A value missed because of the lock stays
    /// pending and is returned by the next call.
    pub fn latest(&mut self) -> Quaternion {
        let newest = match self.shared.pending.try_lock() {
            Ok(mut pending) => {
                let newest = pending.pop_back();
                pending.clear();
                newest
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut pending = poisoned.into_inner();
                let newest = pending.pop_back();
                pending.clear();
                newest
            }
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(orientation) = newest {
            self.current = orientation;
        }
        self.current
    }

    /// The orientation returned by the last call to [`latest`](Self::latest),
    /// identity before any sample arrived.
    pub fn current(&self) -> Quaternion {
        self.current
    }

    /// Total number of orientations pushed by the producer so far.
    pub fn produced(&self) -> u64 {
        self.shared.produced.load(Ordering::Acquire)
    }

    /// True when at least one orientation has ever been pushed.
    pub fn has_received(&self) -> bool {
        self.produced() > 0
    }
}
