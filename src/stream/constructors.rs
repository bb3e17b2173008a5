//! Publisher constructors: empty, error, of, range

use std::marker::PhantomData;
use std::sync::Arc;

use super::core::{BoxPublisher, NoopSubscription, Observer, Publisher, Subscriber};
use super::generators;
use crate::error::StreamError;

struct EmptyPublisher<T> {
    _marker: PhantomData<T>,
}

impl<T: Send + 'static> Publisher<T> for EmptyPublisher<T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        subscriber.on_subscribe(Arc::new(NoopSubscription));
        subscriber.on_complete();
    }
}

/// A stream that completes immediately.
pub fn empty<T: Send + 'static>() -> BoxPublisher<T> {
    Box::new(EmptyPublisher {
        _marker: PhantomData,
    })
}

struct ErrorPublisher<T> {
    error: StreamError,
    _marker: PhantomData<T>,
}

impl<T: Send + 'static> Publisher<T> for ErrorPublisher<T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        subscriber.on_subscribe(Arc::new(NoopSubscription));
        subscriber.on_error(self.error);
    }
}

/// A stream born in the given error state.
pub fn error<T: Send + 'static>(error: StreamError) -> BoxPublisher<T> {
    Box::new(ErrorPublisher {
        error,
        _marker: PhantomData,
    })
}

/// A stream of the given values, in order.
pub fn of<T: Send + 'static>(values: Vec<T>) -> BoxPublisher<T> {
    generators::stateful(
        move || values.into_iter(),
        |iter: &mut std::vec::IntoIter<T>, n: u64, observer: &mut dyn Observer<T>| {
            for _ in 0..n {
                match iter.next() {
                    Some(value) => observer.on_next(value),
                    None => {
                        observer.on_complete();
                        return;
                    }
                }
            }
        },
    )
}

/// The half-open integer range `[from, to)`.
pub fn range(from: i64, to: i64) -> BoxPublisher<i64> {
    generators::stateful(
        move || from,
        move |next: &mut i64, n: u64, observer: &mut dyn Observer<i64>| {
            for _ in 0..n {
                if *next >= to {
                    observer.on_complete();
                    return;
                }
                let value = *next;
                *next += 1;
                observer.on_next(value);
            }
        },
    )
}
