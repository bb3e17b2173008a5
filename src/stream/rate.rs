//! Pacing combinator over the reactor
//!
//! `interval` gates emission to at most one value per period. Between
//! gates a single value is buffered (downstream demand is typically 1);
//! upstream credit is only re-issued once the buffer is free, which is
//! how a file source ends up paced to its nominal frame rate.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::core::{BoxPublisher, Observer, Op, Publisher, Subscriber, Subscription};
use super::serial::Serial;
use crate::error::StreamError;
use crate::reactor::Reactor;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct IntervalShared<T> {
    serial: Arc<Serial>,
    reactor: Reactor,
    period: Duration,
    state: Mutex<IntervalState<T>>,
}

struct IntervalState<T> {
    downstream: Option<Box<dyn Subscriber<T>>>,
    upstream: Option<Arc<dyn Subscription>>,
    demand: u64,
    gate_open: bool,
    pending: Option<T>,
    inflight: bool,
    upstream_done: bool,
    terminated: bool,
}

enum Step<T> {
    Emit(T, Box<dyn Subscriber<T>>),
    Complete(Box<dyn Subscriber<T>>),
    Pull(Arc<dyn Subscription>),
    Park,
}

impl<T: Send + 'static> IntervalShared<T> {
    /// Advance the gate state machine. Must run inside a serial task.
    fn pump(shared: &Arc<Self>) {
        loop {
            let step = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                if state.gate_open && state.demand > 0 && state.pending.is_some() {
                    match (state.pending.take(), state.downstream.take()) {
                        (Some(value), Some(downstream)) => {
                            state.demand -= 1;
                            state.gate_open = false;
                            Step::Emit(value, downstream)
                        }
                        (pending, downstream) => {
                            state.pending = pending;
                            state.downstream = downstream;
                            Step::Park
                        }
                    }
                } else if state.pending.is_none() && state.upstream_done {
                    state.terminated = true;
                    match state.downstream.take() {
                        Some(downstream) => Step::Complete(downstream),
                        None => Step::Park,
                    }
                } else if state.pending.is_none()
                    && !state.upstream_done
                    && !state.inflight
                    && state.demand > 0
                {
                    match state.upstream.as_ref().map(Arc::clone) {
                        Some(upstream) => {
                            state.inflight = true;
                            Step::Pull(upstream)
                        }
                        None => Step::Park,
                    }
                } else {
                    Step::Park
                }
            };
            match step {
                Step::Emit(value, mut downstream) => {
                    downstream.on_next(value);
                    {
                        let mut state = lock(&shared.state);
                        if !state.terminated {
                            state.downstream = Some(downstream);
                        }
                    }
                    let reopen = Arc::clone(shared);
                    shared.reactor.schedule(shared.period, move || {
                        let inner = Arc::clone(&reopen);
                        reopen.serial.exec(move || {
                            lock(&inner.state).gate_open = true;
                            IntervalShared::pump(&inner);
                        });
                    });
                }
                Step::Complete(mut downstream) => {
                    downstream.on_complete();
                    return;
                }
                Step::Pull(upstream) => {
                    upstream.request(1);
                    return;
                }
                Step::Park => return,
            }
        }
    }
}

struct IntervalSubscription<T> {
    shared: Arc<IntervalShared<T>>,
}

impl<T: Send + 'static> Subscription for IntervalSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.demand = state.demand.saturating_add(n);
            }
            IntervalShared::pump(&shared);
        });
    }

    fn cancel(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let upstream = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.terminated = true;
                state.pending = None;
                state.downstream = None;
                state.upstream.take()
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
        });
    }
}

struct IntervalUpstreamSubscriber<T> {
    shared: Arc<IntervalShared<T>>,
}

impl<T: Send + 'static> Observer<T> for IntervalUpstreamSubscriber<T> {
    fn on_next(&mut self, value: T) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.inflight = false;
                state.pending = Some(value);
            }
            IntervalShared::pump(&shared);
        });
    }

    fn on_complete(&mut self) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.upstream_done = true;
                state.upstream = None;
            }
            IntervalShared::pump(&shared);
        });
    }

    fn on_error(&mut self, error: StreamError) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated {
                    return;
                }
                state.terminated = true;
                state.pending = None;
                state.upstream = None;
                state.downstream.take()
            };
            if let Some(mut downstream) = downstream {
                downstream.on_error(error);
            }
        });
    }
}

impl<T: Send + 'static> Subscriber<T> for IntervalUpstreamSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            {
                let mut state = lock(&shared.state);
                if state.terminated {
                    drop(state);
                    subscription.cancel();
                    return;
                }
                state.upstream = Some(subscription);
            }
            IntervalShared::pump(&shared);
        });
    }
}

struct IntervalPublisher<T> {
    source: BoxPublisher<T>,
    reactor: Reactor,
    period: Duration,
}

impl<T: Send + 'static> Publisher<T> for IntervalPublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let shared = Arc::new(IntervalShared {
            serial: Serial::new(),
            reactor: this.reactor,
            period: this.period,
            state: Mutex::new(IntervalState {
                downstream: Some(subscriber),
                upstream: None,
                demand: 0,
                gate_open: true,
                pending: None,
                inflight: false,
                upstream_done: false,
                terminated: false,
            }),
        });
        let source = this.source;
        let serial = Arc::clone(&shared.serial);
        serial.exec(move || {
            let downstream = lock(&shared.state).downstream.take();
            if let Some(mut downstream) = downstream {
                downstream.on_subscribe(Arc::new(IntervalSubscription {
                    shared: Arc::clone(&shared),
                }));
                lock(&shared.state).downstream = Some(downstream);
            }
            source.subscribe(Box::new(IntervalUpstreamSubscriber { shared }));
        });
    }
}

/// Pace upstream values to at most one per `period`, gated by reactor
/// timers.
pub fn interval<T: Send + 'static>(reactor: &Reactor, period: Duration) -> Op<T, T> {
    let reactor = reactor.clone();
    Op::new(move |source: BoxPublisher<T>| -> BoxPublisher<T> {
        Box::new(IntervalPublisher {
            source,
            reactor,
            period,
        })
    })
}
