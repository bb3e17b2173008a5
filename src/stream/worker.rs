//! Thread hand-off combinator
//!
//! `threaded_worker` is the one deliberate thread boundary in a
//! pipeline: upstream keeps running on the caller's thread, downstream
//! moves onto a dedicated named worker. A bounded drop-oldest queue sits
//! between them so a stalling consumer never drags a real-time source
//! off its pace; drops are counted in the metrics registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::core::{BoxPublisher, Observer, Op, Publisher, Subscriber, Subscription};
use crate::error::StreamError;
use crate::metrics;
use crate::queue::{Entry, HandoffQueue};

/// Value slots in the hand-off queue.
const HANDOFF_CAPACITY: usize = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Producer-side view of the upstream subscription, shared with the
/// worker subscription so cancellation reaches the caller's thread.
struct UpstreamSlot {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    cancel_pending: AtomicBool,
}

impl UpstreamSlot {
    fn cancel(&self) {
        self.cancel_pending.store(true, Ordering::Release);
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

struct WorkerSubscription<T> {
    queue: Arc<HandoffQueue<T>>,
    upstream: Arc<UpstreamSlot>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T: Send + 'static> Subscription for WorkerSubscription<T> {
    fn request(&self, n: u64) {
        self.queue.add_credit(n);
    }

    fn cancel(&self) {
        self.queue.cancel();
        self.upstream.cancel();
        let handle = lock(&self.join).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            // on the worker thread itself the loop exits right after this
            // call returns; the handle is detached
        }
    }
}

struct ProducerSubscriber<T> {
    queue: Arc<HandoffQueue<T>>,
    upstream: Arc<UpstreamSlot>,
    dropped: metrics::Counter,
    name: String,
}

impl<T: Send + 'static> Observer<T> for ProducerSubscriber<T> {
    fn on_next(&mut self, value: T) {
        let discarded = self.queue.push_value(value);
        if discarded > 0 {
            self.dropped.add(discarded);
            log::debug!("worker {} dropped {} stale value(s)", self.name, discarded);
        }
    }

    fn on_complete(&mut self) {
        self.queue.push_terminal(Entry::Complete);
    }

    fn on_error(&mut self, error: StreamError) {
        self.queue.push_terminal(Entry::Error(error));
    }
}

impl<T: Send + 'static> Subscriber<T> for ProducerSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        if self.upstream.cancel_pending.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        *lock(&self.upstream.subscription) = Some(Arc::clone(&subscription));
        if self.upstream.cancel_pending.load(Ordering::Acquire) {
            self.upstream.cancel();
            return;
        }
        // effectively unbounded credit; overload is handled by the
        // drop-oldest policy instead of blocking the producer
        subscription.request(u64::MAX);
    }
}

struct WorkerPublisher<T> {
    source: BoxPublisher<T>,
    name: String,
}

impl<T: Send + 'static> Publisher<T> for WorkerPublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>) {
        let this = *self;
        let queue = Arc::new(HandoffQueue::new(HANDOFF_CAPACITY));
        let upstream = Arc::new(UpstreamSlot {
            subscription: Mutex::new(None),
            cancel_pending: AtomicBool::new(false),
        });
        let delivered = metrics::counter(&format!("worker.{}.delivered", this.name));
        let dropped = metrics::counter(&format!("worker.{}.dropped", this.name));

        // the subscriber travels to the worker thread through this slot;
        // a failed spawn takes it back to report the error
        let carried = Arc::new(Mutex::new(Some(subscriber)));
        let join_slot = Arc::new(Mutex::new(None));

        let worker_queue = Arc::clone(&queue);
        let worker_upstream = Arc::clone(&upstream);
        let worker_carried = Arc::clone(&carried);
        let worker_join = Arc::clone(&join_slot);
        let spawned = thread::Builder::new()
            .name(this.name.clone())
            .spawn(move || {
                let mut downstream = match lock(&worker_carried).take() {
                    Some(downstream) => downstream,
                    None => return,
                };
                downstream.on_subscribe(Arc::new(WorkerSubscription {
                    queue: Arc::clone(&worker_queue),
                    upstream: worker_upstream,
                    join: worker_join,
                }));
                loop {
                    match worker_queue.pop() {
                        None => return, // cancelled, pending values discarded
                        Some(Entry::Value(value)) => {
                            delivered.inc();
                            downstream.on_next(value);
                        }
                        Some(Entry::Complete) => {
                            downstream.on_complete();
                            return;
                        }
                        Some(Entry::Error(error)) => {
                            downstream.on_error(error);
                            return;
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                *lock(&join_slot) = Some(handle);
                this.source.subscribe(Box::new(ProducerSubscriber {
                    queue,
                    upstream,
                    dropped,
                    name: this.name,
                }));
            }
            Err(error) => {
                if let Some(mut subscriber) = lock(&carried).take() {
                    subscriber.on_subscribe(Arc::new(super::core::NoopSubscription));
                    subscriber.on_error(StreamError::StreamInitialization(format!(
                        "can't spawn worker thread {}: {}",
                        this.name, error
                    )));
                }
            }
        }
    }
}

/// Move the downstream of this point onto a dedicated named thread.
pub fn threaded_worker<T: Send + 'static>(name: &str) -> Op<T, T> {
    let name = name.to_string();
    Op::new(move |source: BoxPublisher<T>| -> BoxPublisher<T> {
        Box::new(WorkerPublisher { source, name })
    })
}
