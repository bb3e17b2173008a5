use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use framepipe::error::StreamError;
use framepipe::stream::{
    constructors, flat_map, head, lift, map, merge, of, range, take, take_while, BoxPublisher,
    Observer, Op, Publisher, PublisherExt, Subscriber, Subscription,
};

/// Drive a publisher to its terminal event and record everything seen,
/// values as strings, completion as ".", errors as "error: ...".
fn events(publisher: BoxPublisher<i64>) -> Vec<String> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let done = publisher.process(move |value| sink.lock().unwrap().push(value.to_string()));
    match done.wait().and_then(|outcome| outcome) {
        Ok(()) => log.lock().unwrap().push(".".to_string()),
        Err(error) => log.lock().unwrap().push(format!("error: {}", error)),
    }
    let result = log.lock().unwrap().clone();
    result
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn empty_completes_immediately() {
    assert_eq!(events(constructors::empty::<i64>()), strings(&["."]));
}

#[test]
fn of_emits_values_in_order() {
    assert_eq!(events(of(vec![3, 1, 2])), strings(&["3", "1", "2", "."]));
}

#[test]
fn range_is_half_open() {
    assert_eq!(events(range(0, 3)), strings(&["0", "1", "2", "."]));
    assert_eq!(events(range(5, 5)), strings(&["."]));
}

#[test]
fn map_transforms_each_value() {
    let p = range(2, 5).map(|i| i * i);
    assert_eq!(events(p), strings(&["4", "9", "16", "."]));
}

#[test]
fn map_composition_fuses() {
    let composed = range(0, 5).map(|i| i + 1).map(|i| i * 2);
    let fused = range(0, 5).map(|i| (i + 1) * 2);
    assert_eq!(events(composed), events(fused));
}

#[test]
fn flat_map_drains_inners_sequentially() {
    let p = range(1, 4).flat_map(|i| range(0, i));
    assert_eq!(events(p), strings(&["0", "0", "1", "0", "1", "2", "."]));
}

#[test]
fn flat_map_of_singletons_is_identity() {
    let p = of(vec![4, 7, 9]).flat_map(|x| of(vec![x]));
    assert_eq!(events(p), events(of(vec![4, 7, 9])));
}

#[test]
fn flat_map_inner_error_terminates_pipeline() {
    let p = range(0, 10).flat_map(|i| {
        if i == 2 {
            constructors::error(StreamError::Custom("boom".to_string()))
        } else {
            of(vec![i])
        }
    });
    assert_eq!(
        events(p),
        strings(&["0", "1", "error: stream error: boom"])
    );
}

#[test]
fn head_takes_one_and_cancels_upstream() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let p = range(3, 300_000_000)
        .do_finally(move || flag.store(true, Ordering::SeqCst))
        .head();
    assert_eq!(events(p), strings(&["3", "."]));
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn take_stops_after_count() {
    let p = range(2, 300_000_000).take(4);
    assert_eq!(events(p), strings(&["2", "3", "4", "5", "."]));
}

#[test]
fn take_forwards_early_completion() {
    let p = range(0, 2).take(10);
    assert_eq!(events(p), strings(&["0", "1", "."]));
}

#[test]
fn take_zero_never_subscribes_upstream() {
    let touched = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&touched);
    let p = range(0, 100)
        .do_finally(move || flag.store(true, Ordering::SeqCst))
        .take(0);
    assert_eq!(events(p), strings(&["."]));
    // upstream was never subscribed, so no terminal ever reached it
    assert!(!touched.load(Ordering::SeqCst));
}

#[test]
fn stacked_takes_observe_the_minimum() {
    assert_eq!(events(range(0, 100).take(10).take(3)).len(), 4);
    assert_eq!(events(range(0, 100).take(3).take(10)).len(), 4);
    assert_eq!(events(range(0, 2).take(10).take(10)).len(), 3);
}

#[test]
fn take_while_stops_on_first_false() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let p = range(0, 300_000_000)
        .do_finally(move || flag.store(true, Ordering::SeqCst))
        .take_while(|value| *value < 3);
    assert_eq!(events(p), strings(&["0", "1", "2", "."]));
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn merge_concatenates_stages() {
    let p = merge(vec![range(1, 3), range(3, 6)]);
    assert_eq!(events(p), strings(&["1", "2", "3", "4", "5", "."]));
}

#[test]
fn merge_of_nothing_completes() {
    assert_eq!(events(merge(vec![])), strings(&["."]));
}

#[test]
fn merge_stops_on_stage_error() {
    let p = merge(vec![
        range(0, 2),
        constructors::error(StreamError::EndOfStream),
        range(5, 8),
    ]);
    assert_eq!(events(p), strings(&["0", "1", "error: end of stream"]));
}

#[test]
fn do_finally_runs_on_completion() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let p = constructors::empty::<i64>().do_finally(move || flag.store(true, Ordering::SeqCst));
    assert!(!finished.load(Ordering::SeqCst));
    events(p);
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn do_finally_runs_on_error() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let p = constructors::error::<i64>(StreamError::Custom("not supported".to_string()))
        .do_finally(move || flag.store(true, Ordering::SeqCst));
    assert_eq!(events(p), strings(&["error: stream error: not supported"]));
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn do_finally_runs_on_downstream_cancel() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let p = range(3, 300_000_000)
        .do_finally(move || flag.store(true, Ordering::SeqCst))
        .head();
    assert!(!finished.load(Ordering::SeqCst));
    events(p);
    assert!(finished.load(Ordering::SeqCst));
}

fn square() -> Op<i64, i64> {
    lift(|publisher: BoxPublisher<i64>| publisher.map(|i| i * i))
}

#[test]
fn lift_applies_user_operators() {
    let p = range(2, 5).pipe(square());
    assert_eq!(events(p), strings(&["4", "9", "16", "."]));
}

#[test]
fn op_composition_associates() {
    let left = range(0, 4).pipe(map(|i: i64| i + 1)).pipe(take(2));
    let right = range(0, 4).pipe(map(|i: i64| i + 1).then(take(2)));
    assert_eq!(events(left), events(right));
}

#[test]
fn free_function_forms_match_methods() {
    let via_ops = range(1, 4)
        .pipe(flat_map(|i| range(0, i)))
        .pipe(take_while(|v: &i64| *v < 2))
        .pipe(head());
    assert_eq!(events(via_ops), strings(&["0", "."]));
}

/// Subscriber with a fixed credit budget: checks that upstream never
/// emits beyond what was requested.
struct BudgetSubscriber {
    budget: u64,
    received: Arc<Mutex<Vec<i64>>>,
    subscription: Arc<Mutex<Option<Arc<dyn Subscription>>>>,
}

impl Observer<i64> for BudgetSubscriber {
    fn on_next(&mut self, value: i64) {
        self.received.lock().unwrap().push(value);
    }

    fn on_complete(&mut self) {}

    fn on_error(&mut self, _error: StreamError) {}
}

impl Subscriber<i64> for BudgetSubscriber {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(Arc::clone(&subscription));
        subscription.request(self.budget);
    }
}

#[test]
fn emission_respects_demand() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = Arc::new(Mutex::new(None));
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);

    let p = range(0, 1_000_000).do_finally(move || flag.store(true, Ordering::SeqCst));
    p.subscribe(Box::new(BudgetSubscriber {
        budget: 3,
        received: Arc::clone(&received),
        subscription: Arc::clone(&subscription),
    }));

    assert_eq!(received.lock().unwrap().clone(), vec![0, 1, 2]);
    assert!(!finished.load(Ordering::SeqCst));

    // more credit resumes exactly where emission stopped
    let handle = subscription.lock().unwrap().clone().unwrap();
    handle.request(2);
    assert_eq!(received.lock().unwrap().clone(), vec![0, 1, 2, 3, 4]);

    handle.cancel();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(received.lock().unwrap().len(), 5);
}

#[test]
fn cancel_after_terminal_is_ignored() {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let subscription = Arc::new(Mutex::new(None));

    let p = range(0, 2).do_finally(move || flag.store(true, Ordering::SeqCst));
    p.subscribe(Box::new(BudgetSubscriber {
        budget: 10,
        received: Arc::new(Mutex::new(Vec::new())),
        subscription: Arc::clone(&subscription),
    }));
    assert!(fired.load(Ordering::SeqCst));

    // the stream already completed; cancel must stay a no-op
    let handle = subscription.lock().unwrap().clone().unwrap();
    handle.cancel();
}
