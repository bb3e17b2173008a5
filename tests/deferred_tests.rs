use std::thread;
use std::time::Duration;

use framepipe::deferred::deferred;
use framepipe::error::StreamError;

#[test]
fn poll_before_resolution_is_not_initialized() {
    let (value, resolver) = deferred::<i32>();
    assert_eq!(value.poll(), Err(StreamError::NotInitialized));
    resolver.resolve(10);
    assert_eq!(value.poll(), Ok(10));
}

#[test]
fn second_read_observes_value_was_moved() {
    let (value, resolver) = deferred::<i32>();
    resolver.resolve(5);
    assert_eq!(value.wait(), Ok(5));
    assert_eq!(value.wait(), Err(StreamError::ValueWasMoved));
    assert_eq!(value.poll(), Err(StreamError::ValueWasMoved));
}

#[test]
fn resolve_is_write_once() {
    let (value, resolver) = deferred::<i32>();
    resolver.resolve(1);
    resolver.resolve(2);
    assert_eq!(value.wait(), Ok(1));
}

#[test]
fn wait_blocks_until_resolution() {
    let (value, resolver) = deferred::<&'static str>();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        resolver.resolve("done");
    });
    assert_eq!(value.wait(), Ok("done"));
    handle.join().unwrap();
}

#[test]
fn wait_timeout_reports_unready_values() {
    let (value, _resolver) = deferred::<i32>();
    assert_eq!(
        value.wait_timeout(Duration::from_millis(30)),
        Err(StreamError::FrameNotReady)
    );
}
