//! Generic stream combinators
//!
//! Each operator returns a publisher that subscribes to its upstream(s)
//! when subscribed, forwarding demand and terminal signals. `take`,
//! `take_while` and the signal breaker are the only combinators that
//! initiate cancellation themselves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::core::{BoxPublisher, NoopSubscription, Observer, Op, Publisher, Subscriber, Subscription};
use super::serial::Serial;
use crate::error::StreamError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ================================
// map
// ================================

struct MapPublisher<S, F> {
    source: BoxPublisher<S>,
    f: F,
}

struct MapSubscriber<T, F> {
    downstream: Box<dyn Subscriber<T>>,
    f: F,
}

impl<S, T, F> Observer<S> for MapSubscriber<T, F>
where
    T: Send + 'static,
    F: FnMut(S) -> T + Send,
{
    fn on_next(&mut self, value: S) {
        let mapped = (self.f)(value);
        self.downstream.on_next(mapped);
    }

    fn on_complete(&mut self) {
        self.downstream.on_complete();
    }

    fn on_error(&mut self, error: StreamError) {
        self.downstream.on_error(error);
    }
}

impl<S, T, F> Subscriber<S> for MapSubscriber<T, F>
where
    T: Send + 'static,
    F: FnMut(S) -> T + Send,
{
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        // demand is 1:1 with upstream, the handle passes through untouched
        self.downstream.on_subscribe(subscription);
    }
}

impl<S, T, F> Publisher<T> for MapPublisher<S, F>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnMut(S) -> T + Send + 'static,
{
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        this.source.subscribe(Box::new(MapSubscriber {
            downstream: subscriber,
            f: this.f,
        }));
    }
}

/// Transform each element with `f`.
pub fn map<S, T, F>(f: F) -> Op<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnMut(S) -> T + Send + 'static,
{
    Op::new(move |source: BoxPublisher<S>| -> BoxPublisher<T> {
        Box::new(MapPublisher { source, f })
    })
}

// ================================
// take / take_while / head
// ================================

struct TakePublisher<T> {
    source: BoxPublisher<T>,
    count: u64,
}

struct TakeSubscriber<T> {
    downstream: Box<dyn Subscriber<T>>,
    remaining: u64,
    upstream: Option<Arc<dyn Subscription>>,
    done: bool,
}

impl<T: Send + 'static> Observer<T> for TakeSubscriber<T> {
    fn on_next(&mut self, value: T) {
        if self.done {
            return;
        }
        self.remaining -= 1;
        let last = self.remaining == 0;
        if last {
            self.done = true;
            if let Some(upstream) = self.upstream.take() {
                upstream.cancel();
            }
        }
        self.downstream.on_next(value);
        if last {
            self.downstream.on_complete();
        }
    }

    fn on_complete(&mut self) {
        if !self.done {
            self.done = true;
            self.downstream.on_complete();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if !self.done {
            self.done = true;
            self.downstream.on_error(error);
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.upstream = Some(Arc::clone(&subscription));
        self.downstream.on_subscribe(subscription);
    }
}

impl<T: Send + 'static> Publisher<T> for TakePublisher<T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        if this.count == 0 {
            // complete without ever subscribing upstream
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_complete();
            return;
        }
        this.source.subscribe(Box::new(TakeSubscriber {
            downstream: subscriber,
            remaining: this.count,
            upstream: None,
            done: false,
        }));
    }
}

/// Forward the first `count` values, then cancel upstream and complete.
pub fn take<T: Send + 'static>(count: u64) -> Op<T, T> {
    Op::new(move |source: BoxPublisher<T>| -> BoxPublisher<T> {
        Box::new(TakePublisher { source, count })
    })
}

/// The first element only.
pub fn head<T: Send + 'static>() -> Op<T, T> {
    take(1)
}

struct TakeWhilePublisher<T, P> {
    source: BoxPublisher<T>,
    predicate: P,
}

struct TakeWhileSubscriber<T, P> {
    downstream: Box<dyn Subscriber<T>>,
    predicate: P,
    upstream: Option<Arc<dyn Subscription>>,
    done: bool,
}

impl<T, P> Observer<T> for TakeWhileSubscriber<T, P>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send,
{
    fn on_next(&mut self, value: T) {
        if self.done {
            return;
        }
        if (self.predicate)(&value) {
            self.downstream.on_next(value);
        } else {
            self.done = true;
            if let Some(upstream) = self.upstream.take() {
                upstream.cancel();
            }
            self.downstream.on_complete();
        }
    }

    fn on_complete(&mut self) {
        if !self.done {
            self.done = true;
            self.downstream.on_complete();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if !self.done {
            self.done = true;
            self.downstream.on_error(error);
        }
    }
}

impl<T, P> Subscriber<T> for TakeWhileSubscriber<T, P>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send,
{
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.upstream = Some(Arc::clone(&subscription));
        self.downstream.on_subscribe(subscription);
    }
}

impl<T, P> Publisher<T> for TakeWhilePublisher<T, P>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        this.source.subscribe(Box::new(TakeWhileSubscriber {
            downstream: subscriber,
            predicate: this.predicate,
            upstream: None,
            done: false,
        }));
    }
}

/// Forward values while the predicate holds; the first failing value is
/// dropped, upstream is cancelled and the stream completes. The predicate
/// runs once per element, before emission.
pub fn take_while<T, P>(predicate: P) -> Op<T, T>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    Op::new(move |source: BoxPublisher<T>| -> BoxPublisher<T> {
        Box::new(TakeWhilePublisher { source, predicate })
    })
}

// ================================
// do_finally
// ================================

struct FinallyCell {
    f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FinallyCell {
    fn fire(&self) {
        let f = lock(&self.f).take();
        if let Some(f) = f {
            f();
        }
    }
}

struct DoFinallyPublisher<T> {
    source: BoxPublisher<T>,
    cell: Arc<FinallyCell>,
}

struct DoFinallySubscriber<T> {
    downstream: Box<dyn Subscriber<T>>,
    cell: Arc<FinallyCell>,
}

struct DoFinallySubscription {
    upstream: Arc<dyn Subscription>,
    cell: Arc<FinallyCell>,
}

impl Subscription for DoFinallySubscription {
    fn request(&self, n: u64) {
        self.upstream.request(n);
    }

    fn cancel(&self) {
        self.upstream.cancel();
        self.cell.fire();
    }
}

impl<T: Send + 'static> Observer<T> for DoFinallySubscriber<T> {
    fn on_next(&mut self, value: T) {
        self.downstream.on_next(value);
    }

    fn on_complete(&mut self) {
        self.downstream.on_complete();
        self.cell.fire();
    }

    fn on_error(&mut self, error: StreamError) {
        self.downstream.on_error(error);
        self.cell.fire();
    }
}

impl<T: Send + 'static> Subscriber<T> for DoFinallySubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.downstream.on_subscribe(Arc::new(DoFinallySubscription {
            upstream: subscription,
            cell: Arc::clone(&self.cell),
        }));
    }
}

impl<T: Send + 'static> Publisher<T> for DoFinallyPublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        this.source.subscribe(Box::new(DoFinallySubscriber {
            downstream: subscriber,
            cell: this.cell,
        }));
    }
}

/// Run `f` exactly once on completion, error or downstream cancellation.
pub fn do_finally<T, F>(f: F) -> Op<T, T>
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    Op::new(move |source: BoxPublisher<T>| -> BoxPublisher<T> {
        Box::new(DoFinallyPublisher {
            source,
            cell: Arc::new(FinallyCell {
                f: Mutex::new(Some(Box::new(f))),
            }),
        })
    })
}

// ================================
// lift
// ================================

/// Extension point for user-defined operators: wrap any publisher
/// transformation as an `Op`.
pub fn lift<S, T, F>(f: F) -> Op<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnOnce(BoxPublisher<S>) -> BoxPublisher<T> + Send + 'static,
{
    Op::new(f)
}

// ================================
// merge
// ================================

struct MergeShared<T> {
    serial: Arc<Serial>,
    state: Mutex<MergeState<T>>,
}

struct MergeState<T> {
    stages: VecDeque<BoxPublisher<T>>,
    downstream: Option<Box<dyn Subscriber<T>>>,
    upstream: Option<Arc<dyn Subscription>>,
    demand: u64,
    terminated: bool,
    cancelled: bool,
}

impl<T: Send + 'static> MergeShared<T> {
    /// Subscribe the next stage, or complete downstream when none remain.
    /// Must run inside a serial task.
    fn start_next(shared: &Arc<Self>) {
        let next = {
            let mut state = lock(&shared.state);
            if state.terminated || state.cancelled {
                return;
            }
            state.upstream = None;
            state.stages.pop_front()
        };
        match next {
            Some(publisher) => {
                publisher.subscribe(Box::new(MergeStageSubscriber {
                    shared: Arc::clone(shared),
                }));
            }
            None => {
                let downstream = {
                    let mut state = lock(&shared.state);
                    state.terminated = true;
                    state.downstream.take()
                };
                if let Some(mut downstream) = downstream {
                    downstream.on_complete();
                }
            }
        }
    }
}

struct MergeStageSubscriber<T> {
    shared: Arc<MergeShared<T>>,
}

impl<T: Send + 'static> Observer<T> for MergeStageSubscriber<T> {
    fn on_next(&mut self, value: T) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.demand = state.demand.saturating_sub(1);
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
        self.shared
            .serial
            .exec(move || MergeShared::start_next(&shared));
    }

    fn on_error(&mut self, error: StreamError) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.terminated = true;
                state.stages.clear();
                state.downstream.take()
            };
            if let Some(mut downstream) = downstream {
                downstream.on_error(error);
            }
        });
    }
}

impl<T: Send + 'static> Subscriber<T> for MergeStageSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let pending = {
                let mut state = lock(&shared.state);
                if state.cancelled || state.terminated {
                    drop(state);
                    subscription.cancel();
                    return;
                }
                state.upstream = Some(Arc::clone(&subscription));
                state.demand
            };
            if pending > 0 {
                subscription.request(pending);
            }
        });
    }
}

struct MergeSubscription<T> {
    shared: Arc<MergeShared<T>>,
}

impl<T: Send + 'static> Subscription for MergeSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let upstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.demand = state.demand.saturating_add(n);
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
            let upstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.cancelled = true;
                state.stages.clear();
                state.downstream = None;
                state.upstream.take()
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
        });
    }
}

struct MergePublisher<T> {
    publishers: Vec<BoxPublisher<T>>,
}

impl<T: Send + 'static> Publisher<T> for MergePublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let shared = Arc::new(MergeShared {
            serial: Serial::new(),
            state: Mutex::new(MergeState {
                stages: this.publishers.into(),
                downstream: Some(subscriber),
                upstream: None,
                demand: 0,
                terminated: false,
                cancelled: false,
            }),
        });
        let serial = Arc::clone(&shared.serial);
        serial.exec(move || {
            let downstream = lock(&shared.state).downstream.take();
            if let Some(mut downstream) = downstream {
                downstream.on_subscribe(Arc::new(MergeSubscription {
                    shared: Arc::clone(&shared),
                }));
                lock(&shared.state).downstream = Some(downstream);
            }
            MergeShared::start_next(&shared);
        });
    }
}

/// Stream the given publishers one after another: each stage must
/// complete before the next is subscribed. Any stage error terminates
/// the merge. Outstanding demand carries across stages.
pub fn merge<T: Send + 'static>(publishers: Vec<BoxPublisher<T>>) -> BoxPublisher<T> {
    Box::new(MergePublisher { publishers })
}

// ================================
// flat_map
// ================================

type InnerFn<S, T> = Box<dyn FnMut(S) -> BoxPublisher<T> + Send>;

struct FlatMapShared<S, T> {
    serial: Arc<Serial>,
    state: Mutex<FlatMapState<S, T>>,
}

struct FlatMapState<S, T> {
    f: Option<InnerFn<S, T>>,
    downstream: Option<Box<dyn Subscriber<T>>>,
    outer: Option<Arc<dyn Subscription>>,
    inner: Option<Arc<dyn Subscription>>,
    demand: u64,
    inner_credit: u64,
    inner_active: bool,
    outer_inflight: bool,
    outer_done: bool,
    terminated: bool,
    cancelled: bool,
}

impl<S: Send + 'static, T: Send + 'static> FlatMapShared<S, T> {
    /// Ask the outer stream for its next value if nothing is in flight
    /// and downstream still wants data. Must run inside a serial task.
    fn maybe_pull_outer(&self) {
        let outer = {
            let mut state = lock(&self.state);
            if state.terminated
                || state.cancelled
                || state.outer_done
                || state.outer_inflight
                || state.inner_active
                || state.demand == 0
            {
                return;
            }
            match state.outer.as_ref().map(Arc::clone) {
                Some(outer) => {
                    state.outer_inflight = true;
                    outer
                }
                None => return,
            }
        };
        outer.request(1);
    }

    fn terminate_with(&self, error: StreamError) {
        let (downstream, outer, inner) = {
            let mut state = lock(&self.state);
            if state.terminated || state.cancelled {
                return;
            }
            state.terminated = true;
            (
                state.downstream.take(),
                state.outer.take(),
                state.inner.take(),
            )
        };
        if let Some(outer) = outer {
            outer.cancel();
        }
        if let Some(inner) = inner {
            inner.cancel();
        }
        if let Some(mut downstream) = downstream {
            downstream.on_error(error);
        }
    }
}

struct FlatMapOuterSubscriber<S, T> {
    shared: Arc<FlatMapShared<S, T>>,
}

impl<S: Send + 'static, T: Send + 'static> Observer<S> for FlatMapOuterSubscriber<S, T> {
    fn on_next(&mut self, value: S) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let mut f = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.outer_inflight = false;
                state.inner_active = true;
                match state.f.take() {
                    Some(f) => f,
                    None => return,
                }
            };
            let publisher = f(value);
            lock(&shared.state).f = Some(f);
            publisher.subscribe(Box::new(FlatMapInnerSubscriber {
                shared: Arc::clone(&shared),
            }));
        });
    }

    fn on_complete(&mut self) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.outer_done = true;
                state.outer = None;
                if state.inner_active {
                    None
                } else {
                    state.terminated = true;
                    state.downstream.take()
                }
            };
            if let Some(mut downstream) = downstream {
                downstream.on_complete();
            }
        });
    }

    fn on_error(&mut self, error: StreamError) {
        let shared = Arc::clone(&self.shared);
        self.shared
            .serial
            .exec(move || shared.terminate_with(error));
    }
}

impl<S: Send + 'static, T: Send + 'static> Subscriber<S> for FlatMapOuterSubscriber<S, T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            {
                let mut state = lock(&shared.state);
                if state.cancelled {
                    drop(state);
                    subscription.cancel();
                    return;
                }
                state.outer = Some(subscription);
            }
            shared.maybe_pull_outer();
        });
    }
}

struct FlatMapInnerSubscriber<S, T> {
    shared: Arc<FlatMapShared<S, T>>,
}

impl<S: Send + 'static, T: Send + 'static> Observer<T> for FlatMapInnerSubscriber<S, T> {
    fn on_next(&mut self, value: T) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.demand = state.demand.saturating_sub(1);
                state.inner_credit = state.inner_credit.saturating_sub(1);
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
            let downstream = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.inner_active = false;
                state.inner = None;
                state.inner_credit = 0;
                if state.outer_done {
                    state.terminated = true;
                    state.downstream.take()
                } else {
                    None
                }
            };
            match downstream {
                Some(mut downstream) => downstream.on_complete(),
                None => shared.maybe_pull_outer(),
            }
        });
    }

    fn on_error(&mut self, error: StreamError) {
        let shared = Arc::clone(&self.shared);
        self.shared
            .serial
            .exec(move || shared.terminate_with(error));
    }
}

impl<S: Send + 'static, T: Send + 'static> Subscriber<T> for FlatMapInnerSubscriber<S, T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let pending = {
                let mut state = lock(&shared.state);
                if state.cancelled || state.terminated {
                    drop(state);
                    subscription.cancel();
                    return;
                }
                state.inner = Some(Arc::clone(&subscription));
                state.inner_credit = state.demand;
                state.demand
            };
            if pending > 0 {
                subscription.request(pending);
            }
        });
    }
}

struct FlatMapSubscription<S, T> {
    shared: Arc<FlatMapShared<S, T>>,
}

impl<S: Send + 'static, T: Send + 'static> Subscription for FlatMapSubscription<S, T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let inner = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.demand = state.demand.saturating_add(n);
                if state.inner_active {
                    state.inner_credit = state.inner_credit.saturating_add(n);
                    state.inner.clone()
                } else {
                    None
                }
            };
            match inner {
                Some(inner) => inner.request(n),
                None => shared.maybe_pull_outer(),
            }
        });
    }

    fn cancel(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.exec(move || {
            let (outer, inner) = {
                let mut state = lock(&shared.state);
                if state.terminated || state.cancelled {
                    return;
                }
                state.cancelled = true;
                state.downstream = None;
                (state.outer.take(), state.inner.take())
            };
            if let Some(outer) = outer {
                outer.cancel();
            }
            if let Some(inner) = inner {
                inner.cancel();
            }
        });
    }
}

struct FlatMapPublisher<S, T> {
    source: BoxPublisher<S>,
    f: InnerFn<S, T>,
}

impl<S: Send + 'static, T: Send + 'static> Publisher<T> for FlatMapPublisher<S, T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let shared = Arc::new(FlatMapShared {
            serial: Serial::new(),
            state: Mutex::new(FlatMapState {
                f: Some(this.f),
                downstream: Some(subscriber),
                outer: None,
                inner: None,
                demand: 0,
                inner_credit: 0,
                inner_active: false,
                outer_inflight: false,
                outer_done: false,
                terminated: false,
                cancelled: false,
            }),
        });
        let source = this.source;
        let serial = Arc::clone(&shared.serial);
        serial.exec(move || {
            let downstream = lock(&shared.state).downstream.take();
            if let Some(mut downstream) = downstream {
                downstream.on_subscribe(Arc::new(FlatMapSubscription {
                    shared: Arc::clone(&shared),
                }));
                lock(&shared.state).downstream = Some(downstream);
            }
            source.subscribe(Box::new(FlatMapOuterSubscriber { shared }));
        });
    }
}

/// Turn each element into a stream and drain those streams one after
/// another: inner `k` finishes before inner `k+1` begins. Completion is
/// reported once the outer stream and the last inner stream have both
/// completed; an inner error terminates the whole pipeline.
pub fn flat_map<S, T, F>(f: F) -> Op<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnMut(S) -> BoxPublisher<T> + Send + 'static,
{
    Op::new(move |source: BoxPublisher<S>| -> BoxPublisher<T> {
        Box::new(FlatMapPublisher {
            source,
            f: Box::new(f),
        })
    })
}
