use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use framepipe::error::StreamError;
use framepipe::stream::{
    async_source, stateful, Observer, Publisher, PublisherExt, Subscriber, Subscription,
};

struct Collecting {
    budget: u64,
    received: Arc<Mutex<Vec<i64>>>,
    completed: Arc<AtomicBool>,
    subscription: Arc<Mutex<Option<Arc<dyn Subscription>>>>,
}

impl Observer<i64> for Collecting {
    fn on_next(&mut self, value: i64) {
        self.received.lock().unwrap().push(value);
    }

    fn on_complete(&mut self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    fn on_error(&mut self, _error: StreamError) {}
}

impl Subscriber<i64> for Collecting {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(Arc::clone(&subscription));
        subscription.request(self.budget);
    }
}

#[test]
fn stateful_source_parks_without_progress() {
    // the generator has nothing on its first poll and data afterwards
    struct Gate {
        polls: u64,
        next: i64,
    }

    let p = stateful(
        || Gate { polls: 0, next: 0 },
        |gate: &mut Gate, n: u64, observer: &mut dyn Observer<i64>| {
            gate.polls += 1;
            if gate.polls == 1 {
                return; // not ready yet
            }
            for _ in 0..n {
                if gate.next == 3 {
                    observer.on_complete();
                    return;
                }
                observer.on_next(gate.next);
                gate.next += 1;
            }
        },
    );

    let received = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(AtomicBool::new(false));
    let subscription = Arc::new(Mutex::new(None));
    p.subscribe(Box::new(Collecting {
        budget: 5,
        received: Arc::clone(&received),
        completed: Arc::clone(&completed),
        subscription: Arc::clone(&subscription),
    }));

    // first poll made no progress, the source parked with demand left
    assert!(received.lock().unwrap().is_empty());
    assert!(!completed.load(Ordering::SeqCst));

    // a new request re-polls and the stream finishes
    let handle = subscription.lock().unwrap().clone().unwrap();
    handle.request(1);
    assert_eq!(received.lock().unwrap().clone(), vec![0, 1, 2]);
    assert!(completed.load(Ordering::SeqCst));
}

#[test]
fn stateful_state_dropped_on_cancel() {
    struct Tracked(Arc<AtomicBool>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let dropped = Arc::new(AtomicBool::new(false));
    let marker = Arc::clone(&dropped);
    let p = stateful(
        move || Tracked(marker),
        |_state: &mut Tracked, n: u64, observer: &mut dyn Observer<i64>| {
            for _ in 0..n {
                observer.on_next(1);
            }
        },
    );

    let subscription = Arc::new(Mutex::new(None));
    p.subscribe(Box::new(Collecting {
        budget: 2,
        received: Arc::new(Mutex::new(Vec::new())),
        completed: Arc::new(AtomicBool::new(false)),
        subscription: Arc::clone(&subscription),
    }));
    assert!(!dropped.load(Ordering::SeqCst));

    subscription.lock().unwrap().clone().unwrap().cancel();
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn stateful_state_dropped_on_completion() {
    struct Tracked(Arc<AtomicBool>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let dropped = Arc::new(AtomicBool::new(false));
    let marker = Arc::clone(&dropped);
    let p = stateful(
        move || Tracked(marker),
        |_state: &mut Tracked, _n: u64, observer: &mut dyn Observer<i64>| {
            observer.on_complete();
        },
    );
    let done = p.process(|_value| {});
    assert_eq!(done.wait().and_then(|outcome| outcome), Ok(()));
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn generator_cannot_exceed_demand() {
    // a misbehaving generator keeps emitting past its budget; the engine
    // must drop the excess
    let p = stateful(
        || 0i64,
        |next: &mut i64, n: u64, observer: &mut dyn Observer<i64>| {
            for _ in 0..(n + 3) {
                observer.on_next(*next);
                *next += 1;
            }
        },
    );
    let received = Arc::new(Mutex::new(Vec::new()));
    p.subscribe(Box::new(Collecting {
        budget: 2,
        received: Arc::clone(&received),
        completed: Arc::new(AtomicBool::new(false)),
        subscription: Arc::new(Mutex::new(None)),
    }));
    assert_eq!(received.lock().unwrap().clone(), vec![0, 1]);
}

#[test]
fn async_source_pushes_and_cancels() {
    let cancelled = Arc::new(AtomicU64::new(0));
    let cancel_marker = Arc::clone(&cancelled);
    let pushed = Arc::new(Mutex::new(None));
    let handle_out = Arc::clone(&pushed);

    let p = async_source(
        move |observer| {
            *handle_out.lock().unwrap() = Some(observer);
            42u32 // registration token
        },
        move |token: u32| {
            assert_eq!(token, 42);
            cancel_marker.fetch_add(1, Ordering::SeqCst);
        },
    );

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = Arc::new(Mutex::new(None));
    p.subscribe(Box::new(Collecting {
        budget: 1, // demand is ignored by async sources
        received: Arc::clone(&received),
        completed: Arc::new(AtomicBool::new(false)),
        subscription: Arc::clone(&subscription),
    }));

    let observer = pushed.lock().unwrap().clone().unwrap();
    observer.on_next(10);
    observer.on_next(11);
    observer.on_next(12);
    assert_eq!(received.lock().unwrap().clone(), vec![10, 11, 12]);

    subscription.lock().unwrap().clone().unwrap().cancel();
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);

    // after cancellation nothing is delivered and the hook stays fired once
    observer.on_next(13);
    assert_eq!(received.lock().unwrap().clone(), vec![10, 11, 12]);
    subscription.lock().unwrap().clone().unwrap().cancel();
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}

#[test]
fn async_source_runs_cancel_hook_on_completion() {
    let cancelled = Arc::new(AtomicU64::new(0));
    let cancel_marker = Arc::clone(&cancelled);
    let pushed = Arc::new(Mutex::new(None));
    let handle_out = Arc::clone(&pushed);

    let p = async_source(
        move |observer| {
            *handle_out.lock().unwrap() = Some(observer);
        },
        move |_token: ()| {
            cancel_marker.fetch_add(1, Ordering::SeqCst);
        },
    );
    let done = p.process(|_value: i64| {});

    let observer = pushed.lock().unwrap().clone().unwrap();
    observer.on_next(1);
    observer.on_complete();
    assert_eq!(done.wait().and_then(|outcome| outcome), Ok(()));
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}
