use strand::deferred::{Event, fail, succeed};
use strand::{Deferred, Error};

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_chain_forwards_result() {
    let source = Deferred::new();
    let target = Deferred::new();
    source.chain(&target);

    source.resolve("x");
    assert_eq!(target.result(), Some(Ok("x")));
}

#[test]
#[should_panic(expected = "already settled")]
fn test_chain_into_settled_target_panics() {
    let source = Deferred::new();
    let target = Deferred::resolved(1);
    source.chain(&target);

    source.resolve(2);
}

#[test]
fn test_chain_into_cancelled_target_is_ignored() {
    let source = Deferred::new();
    let target = Deferred::new();
    source.chain(&target);

    target.cancel();
    source.resolve(2);

    assert_eq!(source.result(), Some(Ok(2)));
    assert_eq!(target.result(), Some(Err(Error::Cancelled)));
}

#[test]
fn test_observers_registered_inside_observers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let deferred = Deferred::<u8>::new();

    let (outer_log, inner) = (log.clone(), deferred.clone());
    deferred.on_settled(move |_| {
        outer_log.lock().push("first");
        let nested_log = outer_log.clone();
        inner.on_settled(move |_| nested_log.lock().push("nested"));
    });
    let tail = log.clone();
    deferred.on_settled(move |_| tail.lock().push("second"));

    deferred.resolve(0);
    assert_eq!(*log.lock(), ["first", "nested", "second"]);
}

#[test]
fn test_then_may_recover() {
    let failed = fail::<u8>(Error::msg("bad"));
    let recovered = failed.then(|result| Ok(result.unwrap_or(0)));
    assert_eq!(recovered.result(), Some(Ok(0)));

    let renamed = fail::<u8>(Error::Cancelled).map_err(|_| Error::QueueUnderflow);
    assert_eq!(renamed.result(), Some(Err(Error::QueueUnderflow)));
}

#[test]
fn test_signal_drops_value() {
    let source = succeed(vec![1, 2, 3]);
    assert_eq!(source.signal().result(), Some(Ok(())));
}

#[test]
fn test_wait_timeout_gives_up() {
    let deferred = Deferred::<u8>::new();
    assert_eq!(deferred.wait_timeout(Duration::from_millis(10)), None);

    let producer = deferred.clone();
    thread::spawn(move || producer.resolve(4));
    assert_eq!(deferred.wait_timeout(Duration::from_secs(5)), Some(Ok(4)));
}

#[test]
fn test_event_fires_current_listeners_only() {
    let event = Event::new();
    let early = event.listen();
    let cancelled = event.listen();
    cancelled.cancel();

    event.fire(1);
    let late = event.listen();

    assert_eq!(early.result(), Some(Ok(1)));
    assert_eq!(cancelled.result(), Some(Err(Error::Cancelled)));
    assert!(!late.is_settled());

    event.fire(2);
    assert_eq!(late.result(), Some(Ok(2)));
}

#[test]
fn test_describe_uses_default_label() {
    let deferred = Deferred::<u8>::new();
    let description = deferred.describe();
    assert!(description.starts_with("[0.0s] Deferred("));
}
