use strand::host::ManualHost;
use strand::task::{self, AsyncStep, Inline, Resume, Step, TaskState};
use strand::{Deferred, Error, Value, context, time};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_cancel_sleeping_task() {
    let host = Arc::new(ManualHost::new());
    let sleeper_host = host.clone();

    let sleeper = task::start(AsyncStep::named("sleeper", async move {
        time::sleep(&*sleeper_host, Duration::from_secs(100)).await
    }));

    assert!(sleeper.is_suspended());
    assert_eq!(host.pending_timers(), 1);

    sleeper.cancel();

    assert_eq!(sleeper.state(), TaskState::Cancelled);
    assert_eq!(host.pending_timers(), 0, "cancelling the task should cancel the timer");
    assert_eq!(sleeper.deferred().result(), Some(Err(Error::Cancelled)));

    host.advance(Duration::from_secs(200));
    assert_eq!(sleeper.deferred().result(), Some(Err(Error::Cancelled)));
}

#[test]
fn test_value_after_sleep() {
    let host = Arc::new(ManualHost::new());
    let task_host = host.clone();

    let result = task::inline(async move {
        time::sleep(&*task_host, Duration::from_millis(10)).await?;
        Ok((5, "abc"))
    })
    .unwrap();

    let Inline::Pending(deferred) = result else {
        panic!("a sleeping task cannot finish synchronously");
    };

    host.advance(Duration::from_millis(10));
    assert_eq!(deferred.result(), Some(Ok((5, "abc"))));
}

#[test]
fn test_unroll_instant_results_then_sleep() {
    let host = Arc::new(ManualHost::new());
    let sleeper_host = host.clone();
    let mut yields = 0u32;

    let coroutine = task::from_fn("instant", move |input: Resume<()>| {
        if let Some(Err(error)) = input.into_result() {
            return Step::Failed(error);
        }
        yields += 1;
        match yields {
            1..=1000 => Step::Await(Deferred::resolved(())),
            1001 => Step::Await(time::sleep(&*sleeper_host, Duration::from_secs(1))),
            _ => Step::Done("done"),
        }
    });

    let Inline::Pending(deferred) = task::run(coroutine).unwrap() else {
        panic!("the final sleep should suspend the task");
    };

    host.advance(Duration::from_secs(1));
    assert_eq!(deferred.result(), Some(Ok("done")));
}

#[test]
fn test_yield_values() {
    let a = Deferred::<u32>::new();
    let b = strand::deferred::succeed(2u32);
    let c = Deferred::<(u32, u32)>::new();

    let (wa, wb, wc) = (a.clone(), b.clone(), c.clone());
    let out = task::spawn(AsyncStep::new(async move {
        let mut total = wa.await?;
        total += wb.await?;
        let (x, y) = wc.await?;
        Ok(total + x + y)
    }));

    assert!(!out.is_settled());
    a.resolve(1);
    assert!(!out.is_settled());
    c.resolve((3, 4));
    assert_eq!(out.result(), Some(Ok(10)));
}

#[test]
fn test_cancelled_task_ignores_late_settlement() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Deferred::<u32>::with_canceller(|_| {});

    let awaited = gate.clone();
    let steps = log.clone();
    let running = task::start(AsyncStep::new(async move {
        steps.lock().push("before");
        let value = awaited.await?;
        steps.lock().push("after");
        Ok(value)
    }));

    let observed = log.clone();
    running
        .deferred()
        .on_settled(move |result| observed.lock().push(if result.is_ok() { "ok" } else { "err" }));

    running.cancel();
    assert!(gate.is_cancelled());

    // The producer loses the race and settles anyway.
    assert_eq!(gate.try_resolve(3), Ok(()));

    assert_eq!(*log.lock(), vec!["before", "err"]);
    assert_eq!(running.deferred().result(), Some(Err(Error::Cancelled)));
}

#[test]
fn test_error_propagates_to_result() {
    let gate = Deferred::<u32>::new();
    let awaited = gate.clone();

    let out = task::spawn(AsyncStep::new(async move { awaited.await }));
    gate.reject(Error::msg("backend unavailable"));

    let error = out.result().unwrap().unwrap_err();
    assert_eq!(error.to_string(), "backend unavailable");
}

#[test]
fn test_result_observers_see_creation_context() {
    let gate = Deferred::<()>::new();
    let awaited = gate.clone();
    let seen = Arc::new(Mutex::new(None));

    let deferred = {
        let _scope = context::enter([("request", 1)]);
        let out = task::spawn(AsyncStep::new(async move {
            let _inner = context::enter([("request", 2)]);
            awaited.await
        }));

        let sink = seen.clone();
        out.on_settled(move |_| *sink.lock() = context::get("request").ok());
        out
    };

    let _other = context::enter([("request", 3)]);
    gate.resolve(());

    assert!(deferred.is_settled());
    assert_eq!(seen.lock().clone(), Some(Value::Int(1)));
    assert_eq!(context::get("request").unwrap(), Value::Int(3));
}

#[test]
fn test_context_restored_after_failure() {
    let gate = Deferred::<()>::new();
    let awaited = gate.clone();

    let out = task::spawn(AsyncStep::new(async move {
        let _scope = context::enter([("foo", "bar")]);
        awaited.await?;
        Err::<(), _>(Error::msg("crash"))
    }));

    gate.resolve(());

    assert!(out.result().is_some_and(|r| r.is_err()));
    assert!(!context::has("foo"));
}

#[test]
fn test_describe_shows_awaited_sleep() {
    let host = Arc::new(ManualHost::new());
    let task_host = host.clone();

    let sleeper = task::start(AsyncStep::named("nap", async move {
        time::sleep(&*task_host, Duration::from_secs(5)).await
    }));

    let description = sleeper.describe();
    assert!(description.contains("nap:normal"), "{description}");
    assert!(!description.contains("*nap"), "{description}");

    host.advance(Duration::from_secs(5));
    assert!(sleeper.describe().contains("*nap:finished"));
}

#[test]
fn test_describe_follows_nested_tasks() {
    let host = Arc::new(ManualHost::new());
    let task_host = host.clone();

    let outer = task::start(AsyncStep::named("outer", async move {
        let inner = task::spawn(AsyncStep::named("inner", async move {
            time::sleep(&*task_host, Duration::from_secs(5)).await
        }));
        inner.await
    }));

    let description = outer.describe();
    let outer_at = description.find("outer:normal").expect(&description);
    let inner_at = description.find("inner:normal").expect(&description);
    let sleep_at = description.find("sleep(5s)").expect(&description);
    assert!(outer_at < inner_at && inner_at < sleep_at, "{description}");

    host.advance(Duration::from_secs(5));
    assert!(outer.describe().contains("*outer:finished"));
}

#[test]
fn test_panic_after_suspension_fails_the_task() {
    let host = Arc::new(ManualHost::new());
    let task_host = host.clone();

    let doomed = task::spawn(AsyncStep::named("doomed", async move {
        time::sleep(&*task_host, Duration::from_secs(1)).await?;
        if task_host.elapsed() >= Duration::from_secs(1) {
            panic!("coroutine blew up");
        }
        Ok(())
    }));

    assert!(!doomed.is_settled());
    host.advance(Duration::from_secs(1));

    assert_eq!(
        doomed.result(),
        Some(Err(Error::Panicked("coroutine blew up".to_owned())))
    );
}

#[test]
fn test_panic_on_first_step_is_returned() {
    let coroutine = task::from_fn("boom", |_: Resume<()>| -> Step<(), u32> { panic!("bad input") });

    let error = task::run(coroutine).err().expect("a panicking task fails");
    assert_eq!(error, Error::Panicked("bad input".to_owned()));
    assert_eq!(error.to_string(), "task panicked: bad input");
}

#[test]
fn test_cancel_racing_a_resume_leaves_nothing_running() {
    for _ in 0..2_000 {
        let kick = Deferred::<u32>::new();
        let gate = Deferred::<u32>::new();
        let reached = Arc::new(AtomicBool::new(false));
        let marker = Arc::new(());

        let coroutine = {
            let (kick, gate, reached, marker) = (kick.clone(), gate.clone(), reached.clone(), marker.clone());
            task::from_fn("racer", move |input: Resume<u32>| -> Step<u32, u32> {
                let _held = &marker;
                match input {
                    Resume::Start => Step::Await(kick.clone()),
                    Resume::Value(_) => {
                        reached.store(true, AtomicOrdering::SeqCst);
                        Step::Await(gate.clone())
                    }
                    Resume::Error(error) => Step::Failed(error),
                }
            })
        };

        let racer = task::start(coroutine);
        let barrier = Arc::new(Barrier::new(2));

        let resumer = {
            let (kick, barrier) = (kick.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                let _ = kick.try_resolve(1);
            })
        };
        let canceller = {
            let (deferred, barrier) = (racer.deferred(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                deferred.cancel();
            })
        };

        resumer.join().unwrap();
        canceller.join().unwrap();

        assert_eq!(racer.state(), TaskState::Cancelled);
        if reached.load(AtomicOrdering::SeqCst) {
            assert!(gate.is_settled(), "the deferred awaited after cancellation must be cancelled");
        }
        assert_eq!(Arc::strong_count(&marker), 1, "the cancelled coroutine must be dropped");
    }
}
