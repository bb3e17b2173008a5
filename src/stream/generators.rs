//! Stateful and asynchronous stream generators
//!
//! `stateful` is the pull-mode source every finite publisher builds on:
//! the engine calls a generator function with the outstanding demand and
//! the generator emits synchronously. `async_source` bridges externally
//! driven producers (channel callbacks, device events) into a publisher;
//! it ignores demand by design and producers apply their own backpressure
//! or drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::core::{BoxPublisher, Observer, Publisher, Subscriber, Subscription};
use super::serial::Serial;
use crate::error::StreamError;

/// Cap on how many values one generator call may be asked for, so
/// cancellation is observed between batches even under unbounded demand.
const GEN_BATCH_LIMIT: u64 = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ================================
// Stateful generator
// ================================

type GenFn<S, T> = Box<dyn FnMut(&mut S, u64, &mut dyn Observer<T>) + Send>;

struct GenBody<S, T> {
    state: S,
    gen: GenFn<S, T>,
    subscriber: Box<dyn Subscriber<T>>,
}

struct StatefulState<S, T> {
    body: Option<GenBody<S, T>>,
    demand: u64,
    terminated: bool,
}

struct StatefulShared<S, T> {
    serial: Arc<Serial>,
    cancelled: AtomicBool,
    state: Mutex<StatefulState<S, T>>,
}

/// Observer handed to the generator for one batch. Tracks the budget and
/// drops anything emitted beyond it or after a terminal event.
struct BatchObserver<'a, T> {
    subscriber: &'a mut dyn Subscriber<T>,
    budget: u64,
    emitted: u64,
    terminated: bool,
}

impl<'a, T> Observer<T> for BatchObserver<'a, T> {
    fn on_next(&mut self, value: T) {
        if self.terminated {
            return;
        }
        if self.emitted >= self.budget {
            log::error!("generator emitted a value without demand, dropping it");
            drop(value);
            return;
        }
        self.emitted += 1;
        self.subscriber.on_next(value);
    }

    fn on_complete(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.subscriber.on_complete();
    }

    fn on_error(&mut self, error: StreamError) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.subscriber.on_error(error);
    }
}

impl<S: Send + 'static, T: Send + 'static> StatefulShared<S, T> {
    /// Run generator batches until demand is exhausted, the generator
    /// stalls, or a terminal event lands. Must run inside a serial task.
    fn drain(&self) {
        loop {
            let mut body = {
                let mut state = lock(&self.state);
                if state.terminated || state.demand == 0 {
                    return;
                }
                if self.cancelled.load(Ordering::Acquire) {
                    // drop generator state without a terminal callback
                    state.body = None;
                    return;
                }
                match state.body.take() {
                    Some(body) => body,
                    None => return,
                }
            };
            let budget = {
                let state = lock(&self.state);
                state.demand.min(GEN_BATCH_LIMIT)
            };

            let mut observer = BatchObserver {
                subscriber: &mut *body.subscriber,
                budget,
                emitted: 0,
                terminated: false,
            };
            (body.gen)(&mut body.state, budget, &mut observer);
            let emitted = observer.emitted;
            let terminated = observer.terminated;

            let mut state = lock(&self.state);
            state.demand -= emitted;
            if terminated {
                state.terminated = true;
                return; // body and generator state dropped here
            }
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            state.body = Some(body);
            if emitted == 0 {
                // no progress; park until the next request re-polls us
                return;
            }
        }
    }
}

struct StatefulSubscription<S, T> {
    shared: Arc<StatefulShared<S, T>>,
}

impl<S: Send + 'static, T: Send + 'static> Subscription for StatefulSubscription<S, T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            {
                let mut state = lock(&shared.state);
                state.demand = state.demand.saturating_add(n);
            }
            shared.drain();
        });
    }

    fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let mut state = lock(&shared.state);
            state.body = None;
        });
    }
}

struct StatefulPublisher<S, T> {
    create: Box<dyn FnOnce() -> S + Send>,
    gen: GenFn<S, T>,
}

impl<S: Send + 'static, T: Send + 'static> Publisher<T> for StatefulPublisher<S, T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let shared = Arc::new(StatefulShared {
            serial: Serial::new(),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(StatefulState {
                body: None,
                demand: 0,
                terminated: false,
            }),
        });
        let serial = Arc::clone(&shared.serial);
        serial.exec(move || {
            let mut subscriber = subscriber;
            let state = (this.create)();
            subscriber.on_subscribe(Arc::new(StatefulSubscription {
                shared: Arc::clone(&shared),
            }));
            lock(&shared.state).body = Some(GenBody {
                state,
                gen: this.gen,
                subscriber,
            });
            shared.drain();
        });
    }
}

/// Pull-mode stateful source.
///
/// `create` builds the per-subscription state; `gen` is called with the
/// current demand and emits up to that many values, completes, or errors.
/// Returning without progress parks the source until more demand arrives.
/// The state object is dropped on any terminal event or cancellation.
pub fn stateful<S, T, C, G>(create: C, gen: G) -> BoxPublisher<T>
where
    S: Send + 'static,
    T: Send + 'static,
    C: FnOnce() -> S + Send + 'static,
    G: FnMut(&mut S, u64, &mut dyn Observer<T>) + Send + 'static,
{
    Box::new(StatefulPublisher {
        create: Box::new(create),
        gen: Box::new(gen),
    })
}

// ================================
// Async generator
// ================================

struct AsyncCore<T> {
    terminated: AtomicBool,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T> AsyncCore<T> {
    fn run_teardown(&self) {
        let teardown = lock(&self.teardown).take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    fn drop_subscriber_if_idle(&self) {
        // an in-flight callback holds the lock and drops the subscriber
        // itself once it observes the terminated flag
        if let Ok(mut guard) = self.subscriber.try_lock() {
            guard.take();
        }
    }
}

/// Push handle given to an externally driven producer. Cloneable and
/// thread-safe; calls after a terminal event are ignored.
pub struct AsyncObserver<T> {
    core: Arc<AsyncCore<T>>,
}

impl<T> Clone for AsyncObserver<T> {
    fn clone(&self) -> Self {
        AsyncObserver {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static> AsyncObserver<T> {
    pub fn on_next(&self, value: T) {
        if self.core.terminated.load(Ordering::Acquire) {
            return;
        }
        let mut guard = lock(&self.core.subscriber);
        if let Some(subscriber) = guard.as_mut() {
            subscriber.on_next(value);
        }
        if self.core.terminated.load(Ordering::Acquire) {
            // cancelled from inside the callback
            guard.take();
            drop(guard);
            self.core.run_teardown();
        }
    }

    pub fn on_complete(&self) {
        if self.core.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriber = lock(&self.core.subscriber).take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_complete();
        }
        self.core.run_teardown();
    }

    pub fn on_error(&self, error: StreamError) {
        if self.core.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriber = lock(&self.core.subscriber).take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_error(error);
        }
        self.core.run_teardown();
    }
}

struct AsyncSubscription<T> {
    core: Arc<AsyncCore<T>>,
}

impl<T: Send + 'static> Subscription for AsyncSubscription<T> {
    fn request(&self, _n: u64) {
        // async sources run on implicit unbounded credit; producers that
        // need strict demand buffer and drop on their side
    }

    fn cancel(&self) {
        if self.core.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.run_teardown();
        self.core.drop_subscriber_if_idle();
    }
}

struct AsyncPublisher<S, T> {
    init: Box<dyn FnOnce(AsyncObserver<T>) -> S + Send>,
    cancel: Box<dyn FnOnce(S) + Send>,
}

impl<S: Send + 'static, T: Send + 'static> Publisher<T> for AsyncPublisher<S, T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let core = Arc::new(AsyncCore {
            terminated: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            teardown: Mutex::new(None),
        });
        subscriber.on_subscribe(Arc::new(AsyncSubscription {
            core: Arc::clone(&core),
        }));
        if core.terminated.load(Ordering::Acquire) {
            // cancelled during on_subscribe; the producer was never started
            return;
        }
        *lock(&core.subscriber) = Some(subscriber);

        let observer = AsyncObserver {
            core: Arc::clone(&core),
        };
        let state = (this.init)(observer);
        let cancel = this.cancel;
        *lock(&core.teardown) = Some(Box::new(move || cancel(state)));
        if core.terminated.load(Ordering::Acquire) {
            // terminal raced with init; release the producer now
            core.run_teardown();
            core.drop_subscriber_if_idle();
        }
    }
}

/// Push-mode source driven by an external process.
///
/// `init` is called once with the observer handle and returns a state
/// object representing the registration; `cancel` consumes it exactly
/// once on terminal or cancellation. Demand is not enforced.
pub fn async_source<S, T, I, C>(init: I, cancel: C) -> BoxPublisher<T>
where
    S: Send + 'static,
    T: Send + 'static,
    I: FnOnce(AsyncObserver<T>) -> S + Send + 'static,
    C: FnOnce(S) + Send + 'static,
{
    Box::new(AsyncPublisher {
        init: Box::new(init),
        cancel: Box::new(cancel),
    })
}
