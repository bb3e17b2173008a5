use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framepipe::error::StreamError;
use framepipe::queue::{Entry, HandoffQueue};
use framepipe::stream::{of, range, threaded_worker, Publisher, PublisherExt};

#[test]
fn handoff_queue_drops_oldest_when_full() {
    let queue = HandoffQueue::new(2);
    assert_eq!(queue.push_value(1), 0);
    assert_eq!(queue.push_value(2), 0);
    assert_eq!(queue.push_value(3), 1);
    assert_eq!(queue.dropped(), 1);

    queue.add_credit(10);
    assert!(matches!(queue.pop(), Some(Entry::Value(2))));
    assert!(matches!(queue.pop(), Some(Entry::Value(3))));
}

#[test]
fn handoff_queue_orders_terminal_after_values() {
    let queue = HandoffQueue::new(4);
    queue.push_value(1);
    queue.push_value(2);
    queue.push_terminal(Entry::Complete);

    queue.add_credit(2);
    assert!(matches!(queue.pop(), Some(Entry::Value(1))));
    assert!(matches!(queue.pop(), Some(Entry::Value(2))));
    assert!(matches!(queue.pop(), Some(Entry::Complete)));
}

#[test]
fn handoff_queue_cancel_discards_pending() {
    let queue = HandoffQueue::new(4);
    queue.push_value(1);
    queue.cancel();
    assert!(queue.pop().is_none());
    // pushes after cancellation are ignored
    assert_eq!(queue.push_value(2), 0);
    assert!(queue.pop().is_none());
}

#[test]
fn worker_preserves_value_then_terminal_order() {
    let p = of(vec![1i64, 2]).pipe(threaded_worker("order-worker"));
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let done = p.process(move |value| sink.lock().unwrap().push(value));
    assert_eq!(
        done.wait_timeout(Duration::from_secs(10))
            .and_then(|outcome| outcome),
        Ok(())
    );
    assert_eq!(received.lock().unwrap().clone(), vec![1, 2]);
}

#[test]
fn worker_forwards_errors_in_band() {
    let p = framepipe::stream::constructors::error::<i64>(StreamError::EndOfStream)
        .pipe(threaded_worker("error-worker"));
    let done = p.process(|_value| {});
    assert_eq!(
        done.wait_timeout(Duration::from_secs(10))
            .and_then(|outcome| outcome),
        Err(StreamError::EndOfStream)
    );
}

#[test]
fn infinite_range_through_worker_take_five_terminates() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let p = range(0, i64::MAX)
        .do_finally(move || flag.store(true, Ordering::SeqCst))
        .pipe(threaded_worker("take-worker"))
        .take(5);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let done = p.process(move |value| sink.lock().unwrap().push(value));

    // the worker joins and the pipeline completes within one deadline
    assert_eq!(
        done.wait_timeout(Duration::from_secs(10))
            .and_then(|outcome| outcome),
        Ok(())
    );
    assert_eq!(received.lock().unwrap().len(), 5);

    // cancellation reached the producer thread
    for _ in 0..100 {
        if finished.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn worker_drop_policy_keeps_producer_unblocked() {
    // no consumer credit at all: the producer must still run to
    // completion, shedding everything beyond the queue capacity
    let p = range(0, 1000).pipe(threaded_worker("shed-worker"));

    struct NoDemand;

    impl framepipe::stream::Observer<i64> for NoDemand {
        fn on_next(&mut self, _value: i64) {}
        fn on_complete(&mut self) {}
        fn on_error(&mut self, _error: StreamError) {}
    }

    impl framepipe::stream::Subscriber<i64> for NoDemand {
        fn on_subscribe(&mut self, _subscription: Arc<dyn framepipe::stream::Subscription>) {
            // deliberately requests nothing
        }
    }

    p.subscribe(Box::new(NoDemand));
    let dropped = framepipe::metrics::counter("worker.shed-worker.dropped");
    for _ in 0..100 {
        if dropped.value() >= 998 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    // capacity is 2, everything else was shed without blocking upstream
    assert!(dropped.value() >= 998);
}
