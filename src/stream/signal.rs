//! Graceful shutdown on OS signals
//!
//! `signal_breaker` passes values through untouched until one of the
//! listed signals is delivered, then cancels upstream and completes
//! downstream. Handlers are idempotent and uninstalled on any terminal
//! event.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use signal_hook::iterator::{Handle, Signals};

use super::core::{BoxPublisher, NoopSubscription, Observer, Op, Publisher, Subscriber, Subscription};
use super::serial::Serial;
use crate::error::StreamError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct BreakerShared<T> {
    serial: Arc<Serial>,
    state: Mutex<BreakerState<T>>,
}

struct BreakerState<T> {
    downstream: Option<Box<dyn Subscriber<T>>>,
    upstream: Option<Arc<dyn Subscription>>,
    handle: Option<Handle>,
    listener: Option<JoinHandle<()>>,
    terminated: bool,
}

impl<T: Send + 'static> BreakerShared<T> {
    /// Uninstall the signal handler and reap the listener thread. Must
    /// not be called from the listener thread with `join` set.
    fn teardown(handle: Option<Handle>, listener: Option<JoinHandle<()>>) {
        if let Some(handle) = handle {
            handle.close();
        }
        if let Some(listener) = listener {
            if listener.thread().id() != thread::current().id() {
                let _ = listener.join();
            }
        }
    }

    /// First signal delivery: cancel upstream, complete downstream.
    fn fire(shared: &Arc<Self>) {
        let task_shared = Arc::clone(shared);
        shared.serial.exec(move || {
            let shared = task_shared;
            let (downstream, upstream, handle, listener) = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.terminated = true;
                (
                    state.downstream.take(),
                    state.upstream.take(),
                    state.handle.take(),
                    state.listener.take(),
                )
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
            if let Some(mut downstream) = downstream {
                downstream.on_complete();
            }
            Self::teardown(handle, listener);
        });
    }
}

struct BreakerSubscription<T> {
    shared: Arc<BreakerShared<T>>,
}

impl<T: Send + 'static> Subscription for BreakerSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let upstream = {
                let state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.upstream.clone()
            };
            if let Some(upstream) = upstream {
                upstream.request(n);
            }
        });
    }

    fn cancel(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let (upstream, handle, listener) = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.terminated = true;
                state.downstream = None;
                (
                    state.upstream.take(),
                    state.handle.take(),
                    state.listener.take(),
                )
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
            BreakerShared::<T>::teardown(handle, listener);
        });
    }
}

struct BreakerUpstreamSubscriber<T> {
    shared: Arc<BreakerShared<T>>,
}

impl<T: Send + 'static> Observer<T> for BreakerUpstreamSubscriber<T> {
    fn on_next(&mut self, value: T) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.downstream.take()
            };
            if let Some(mut downstream) = downstream {
                downstream.on_next(value);
                lock(&shared.state).downstream = Some(downstream);
            }
        });
    }

    fn on_complete(&mut self) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let (downstream, handle, listener) = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.terminated = true;
                state.upstream = None;
                (
                    state.downstream.take(),
                    state.handle.take(),
                    state.listener.take(),
                )
            };
            if let Some(mut downstream) = downstream {
                downstream.on_complete();
            }
            BreakerShared::<T>::teardown(handle, listener);
        });
    }

    fn on_error(&mut self, error: StreamError) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let (downstream, handle, listener) = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.terminated = true;
                state.upstream = None;
                (
                    state.downstream.take(),
                    state.handle.take(),
                    state.listener.take(),
                )
            };
            if let Some(mut downstream) = downstream {
                downstream.on_error(error);
            }
            BreakerShared::<T>::teardown(handle, listener);
        });
    }
}

impl<T: Send + 'static> Subscriber<T> for BreakerUpstreamSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let mut state = lock(&shared.state);
            if state.terminated {
                drop(state);
                subscription.cancel();
                return;
            }
            state.upstream = Some(subscription);
        });
    }
}

struct BreakerPublisher<T> {
    source: BoxPublisher<T>,
    signals: Vec<i32>,
}

impl<T: Send + 'static> Publisher<T> for BreakerPublisher<T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let mut signals = match Signals::new(&this.signals) {
            Ok(signals) => signals,
            Err(error) => {
                subscriber.on_subscribe(Arc::new(NoopSubscription));
                subscriber.on_error(StreamError::Io(format!(
                    "can't install signal handler: {}",
                    error
                )));
                return;
            }
        };
        let handle = signals.handle();
        let shared = Arc::new(BreakerShared {
            serial: Serial::new(),
            state: Mutex::new(BreakerState {
                downstream: Some(subscriber),
                upstream: None,
                handle: Some(handle),
                listener: None,
                terminated: false,
            }),
        });

        let listener_shared = Arc::clone(&shared);
        let listener = thread::Builder::new()
            .name("signal-breaker".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    log::info!("received signal {}, stopping pipeline", signal);
                    BreakerShared::fire(&listener_shared);
                }
            });
        match listener {
            Ok(listener) => lock(&shared.state).listener = Some(listener),
            Err(error) => log::warn!("can't spawn signal listener: {}", error),
        }

        let source = this.source;
        let serial = Arc::clone(&shared.serial);
        serial.exec(move || {
            let downstream = lock(&shared.state).downstream.take();
            if let Some(mut downstream) = downstream {
                downstream.on_subscribe(Arc::new(BreakerSubscription {
                    shared: Arc::clone(&shared),
                }));
                lock(&shared.state).downstream = Some(downstream);
            }
            source.subscribe(Box::new(BreakerUpstreamSubscriber { shared }));
        });
    }
}

/// Convert the first delivery of any listed OS signal into graceful
/// completion: upstream is cancelled, downstream observes `on_complete`.
pub fn signal_breaker<T: Send + 'static>(signals: &[i32]) -> Op<T, T> {
    let signals = signals.to_vec();
    Op::new(move |source: BoxPublisher<T>| -> BoxPublisher<T> {
        Box::new(BreakerPublisher { source, signals })
    })
}
