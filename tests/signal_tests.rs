use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use signal_hook::consts::SIGUSR1;

use framepipe::stream::{async_source, signal_breaker, PublisherExt};

#[test]
fn signal_breaks_pipeline_into_completion() {
    let cancelled = Arc::new(AtomicU64::new(0));
    let cancel_marker = Arc::clone(&cancelled);
    let pushed = Arc::new(Mutex::new(None));
    let handle_out = Arc::clone(&pushed);

    // an externally driven source that never completes on its own
    let source = async_source(
        move |observer| {
            *handle_out.lock().unwrap() = Some(observer);
        },
        move |_state: ()| {
            cancel_marker.fetch_add(1, Ordering::SeqCst);
        },
    );

    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let done = source
        .do_finally(move || flag.store(true, Ordering::SeqCst))
        .pipe(signal_breaker(&[SIGUSR1]))
        .process(move |value: i64| sink.lock().unwrap().push(value));

    let observer = pushed.lock().unwrap().clone().unwrap();
    observer.on_next(1);
    observer.on_next(2);

    signal_hook::low_level::raise(SIGUSR1).unwrap();

    // the breaker completes downstream and cancels upstream
    assert_eq!(
        done.wait_timeout(Duration::from_secs(10))
            .and_then(|outcome| outcome),
        Ok(())
    );
    assert_eq!(received.lock().unwrap().clone(), vec![1, 2]);

    for _ in 0..100 {
        if finished.load(Ordering::SeqCst) && cancelled.load(Ordering::SeqCst) == 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);

    // values pushed after the break are not observed
    observer.on_next(3);
    assert_eq!(received.lock().unwrap().clone(), vec![1, 2]);
}
