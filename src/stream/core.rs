//! Core stream protocol: publisher, subscriber, subscription
//!
//! A publisher produces at most one linear sequence of values followed by
//! exactly one terminal event. Emission is demand-driven: the downstream
//! grants credit with `request(n)` and the upstream may never emit beyond
//! it. Terminal events and cancellation are final; after either, no
//! further observer calls are made.

use std::sync::Arc;

use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{StreamError, StreamResult};

/// Upstream handle held by a subscriber.
pub trait Subscription: Send + Sync {
    /// Grant permission to emit up to `n` more values.
    fn request(&self, n: u64);
    /// Request immediate termination without further values.
    fn cancel(&self);
}

/// Downstream endpoint for values and terminal events.
pub trait Observer<T> {
    fn on_next(&mut self, value: T);
    fn on_complete(&mut self);
    fn on_error(&mut self, error: StreamError);
}

/// An observer that first receives its upstream handle.
///
/// The subscriber must stay alive until a terminal event is delivered or
/// `cancel` has fully propagated; the engine owns it for exactly that long.
pub trait Subscriber<T>: Observer<T> + Send {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);
}

/// One-shot factory for a value sequence.
///
/// `subscribe` consumes the publisher, so a second subscription on the
/// same publisher is unrepresentable.
pub trait Publisher<T: Send + 'static>: Send {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>);
}

/// The boxed publisher every combinator consumes and produces.
pub type BoxPublisher<T> = Box<dyn Publisher<T>>;

impl<T: Send + 'static> Publisher<T> for BoxPublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        (*self).subscribe(subscriber)
    }
}

/// Subscription for publishers that terminate during `subscribe`.
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

/// A stream transformation from `Publisher<S>` to `Publisher<T>`.
///
/// Operators are one-shot values, like the publishers they transform.
/// `then` composes two operators; composition associates with `pipe`, so
/// `p.pipe(a).pipe(b)` and `p.pipe(a.then(b))` build the same pipeline.
pub struct Op<S, T> {
    f: Box<dyn FnOnce(BoxPublisher<S>) -> BoxPublisher<T> + Send>,
}

impl<S: Send + 'static, T: Send + 'static> Op<S, T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(BoxPublisher<S>) -> BoxPublisher<T> + Send + 'static,
    {
        Op { f: Box::new(f) }
    }

    /// Apply this operator to a publisher.
    pub fn apply(self, publisher: BoxPublisher<S>) -> BoxPublisher<T> {
        (self.f)(publisher)
    }

    /// Compose with a second operator applied after this one.
    pub fn then<U: Send + 'static>(self, next: Op<T, U>) -> Op<S, U> {
        Op::new(move |publisher| next.apply(self.apply(publisher)))
    }
}

/// Chaining surface on boxed publishers.
pub trait PublisherExt<T: Send + 'static> {
    /// Apply an operator, yielding the transformed publisher.
    fn pipe<U: Send + 'static>(self, op: Op<T, U>) -> BoxPublisher<U>;

    fn map<U, F>(self, f: F) -> BoxPublisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static;

    fn flat_map<U, F>(self, f: F) -> BoxPublisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> BoxPublisher<U> + Send + 'static;

    fn head(self) -> BoxPublisher<T>;

    fn take(self, count: u64) -> BoxPublisher<T>;

    fn take_while<P>(self, predicate: P) -> BoxPublisher<T>
    where
        P: FnMut(&T) -> bool + Send + 'static;

    fn do_finally<F>(self, f: F) -> BoxPublisher<T>
    where
        F: FnOnce() + Send + 'static;

    /// Terminate the pipeline with a trivial subscriber that requests one
    /// value at a time. The returned deferred resolves with the terminal
    /// outcome.
    fn process<F>(self, on_next: F) -> Deferred<StreamResult<()>>
    where
        F: FnMut(T) + Send + 'static;
}

impl<T: Send + 'static> PublisherExt<T> for BoxPublisher<T> {
    fn pipe<U: Send + 'static>(self, op: Op<T, U>) -> BoxPublisher<U> {
        op.apply(self)
    }

    fn map<U, F>(self, f: F) -> BoxPublisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        super::combinators::map(f).apply(self)
    }

    fn flat_map<U, F>(self, f: F) -> BoxPublisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> BoxPublisher<U> + Send + 'static,
    {
        super::combinators::flat_map(f).apply(self)
    }

    fn head(self) -> BoxPublisher<T> {
        super::combinators::head().apply(self)
    }

    fn take(self, count: u64) -> BoxPublisher<T> {
        super::combinators::take(count).apply(self)
    }

    fn take_while<P>(self, predicate: P) -> BoxPublisher<T>
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        super::combinators::take_while(predicate).apply(self)
    }

    fn do_finally<F>(self, f: F) -> BoxPublisher<T>
    where
        F: FnOnce() + Send + 'static,
    {
        super::combinators::do_finally(f).apply(self)
    }

    fn process<F>(self, on_next: F) -> Deferred<StreamResult<()>>
    where
        F: FnMut(T) + Send + 'static,
    {
        let (result, resolver) = deferred();
        self.subscribe(Box::new(ProcessSubscriber {
            on_next,
            resolver,
            subscription: None,
        }));
        result
    }
}

struct ProcessSubscriber<F> {
    on_next: F,
    resolver: Resolver<StreamResult<()>>,
    subscription: Option<Arc<dyn Subscription>>,
}

impl<T, F: FnMut(T) + Send> Observer<T> for ProcessSubscriber<F> {
    fn on_next(&mut self, value: T) {
        (self.on_next)(value);
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    fn on_complete(&mut self) {
        self.resolver.resolve(Ok(()));
    }

    fn on_error(&mut self, error: StreamError) {
        self.resolver.resolve(Err(error));
    }
}

impl<T, F: FnMut(T) + Send> Subscriber<T> for ProcessSubscriber<F> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.subscription = Some(Arc::clone(&subscription));
        subscription.request(1);
    }
}
