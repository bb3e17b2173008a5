//! Write-once deferred value
//!
//! `process` on a publisher returns one of these: it resolves with the
//! terminal outcome of the subscription. Write-once, single-reader;
//! a second read observes `ValueWasMoved`, a read before resolution
//! observes `NotInitialized` (or blocks, via [`Deferred::wait`]).

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{StreamError, StreamResult};

enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

/// Consumer half of a write-once value.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

/// Producer half of a write-once value. Resolving twice is a no-op.
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Create a linked deferred/resolver pair.
pub fn deferred<T>() -> (Deferred<T>, Resolver<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot::Pending),
        cond: Condvar::new(),
    });
    (
        Deferred {
            inner: Arc::clone(&inner),
        },
        Resolver { inner },
    )
}

impl<T> Resolver<T> {
    pub fn resolve(&self, value: T) {
        let mut slot = match self.inner.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Slot::Pending = *slot {
            *slot = Slot::Ready(value);
            self.inner.cond.notify_all();
        }
    }
}

impl<T> Deferred<T> {
    /// Take the value without blocking.
    pub fn poll(&self) -> StreamResult<T> {
        let mut slot = match self.inner.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Ok(value),
            Slot::Pending => {
                *slot = Slot::Pending;
                Err(StreamError::NotInitialized)
            }
            Slot::Taken => Err(StreamError::ValueWasMoved),
        }
    }

    /// Block until resolution and take the value.
    pub fn wait(&self) -> StreamResult<T> {
        let mut slot = match self.inner.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(value) => return Ok(value),
                Slot::Taken => return Err(StreamError::ValueWasMoved),
                Slot::Pending => {
                    *slot = Slot::Pending;
                    slot = match self.inner.cond.wait(slot) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
    }

    /// Block until resolution or a deadline; `FrameNotReady` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> StreamResult<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = match self.inner.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(value) => return Ok(value),
                Slot::Taken => return Err(StreamError::ValueWasMoved),
                Slot::Pending => {
                    *slot = Slot::Pending;
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return Err(StreamError::FrameNotReady);
                    }
                    let (guard, _) = match self.inner.cond.wait_timeout(slot, deadline - now) {
                        Ok(pair) => pair,
                        Err(poisoned) => {
                            let pair = poisoned.into_inner();
                            (pair.0, pair.1)
                        }
                    };
                    slot = guard;
                }
            }
        }
    }
}
