use strand::sync::{BacklogQueue, MaxSizeQueue};
use strand::{Deferred, Error, Inline};

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_max_size_queue_basics() {
    let queue = MaxSizeQueue::new(5);
    assert_eq!(queue.len(), 0);
    assert!(!queue.is_full());

    assert!(queue.extend([1, 2, 3]).is_none());
    assert_eq!(queue.len(), 3);

    assert!(queue.push(4).is_none());
    assert_eq!(queue.len(), 4);

    let space = queue.push(5).expect("the queue is full at 5 items");
    assert!(!space.is_settled());
    assert!(queue.is_full());

    let more_space = queue.push(6).expect("the queue stays full");
    assert!(!more_space.is_settled());
    assert_eq!(queue.len(), 6);
    assert!(!space.ptr_eq(&more_space));

    assert_eq!(queue.shift_many(3), vec![1, 2, 3]);
    assert_eq!(queue.len(), 3);
    assert!(space.is_settled());
    assert!(more_space.is_settled());
    assert!(!queue.is_full());

    assert!(queue.push(7).is_none());
    assert_eq!(queue.peek(), Some(4));
    assert_eq!(queue.shift(), Some(4));
    assert_eq!(queue.len(), 3);
}

/// Runs queue operations, logging what each returns and when deferreds fire.
struct Script {
    queue: BacklogQueue<String>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Script {
    fn new() -> Self {
        Self {
            queue: BacklogQueue::new(3).with_backlog(2),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    fn watch<T: Clone + Send + 'static>(&self, deferred: Deferred<T>, desc: String) {
        self.record("result: Deferred");
        let log = self.log.clone();
        deferred.on_complete(move |_| log.lock().push(format!("callback {desc}")), |_| {});
    }

    fn push(&self, item: &str) {
        let desc = format!("push {item}");
        self.record(desc.clone());
        match self.queue.push(item.to_owned()) {
            Some(space) => self.watch(space, desc),
            None => self.record("result: None"),
        }
    }

    fn shift(&self) {
        self.record("shift");
        match self.queue.shift() {
            Ok(Inline::Ready(item)) => self.record(format!("result: {item}")),
            Ok(Inline::Pending(next)) => self.watch(next, "shift".to_owned()),
            Err(error) => self.record(format!("error: {error}")),
        }
    }
}

#[test]
fn test_backlog_queue_basics() {
    let script = Script::new();

    script.push("1");
    script.push("2");
    script.push("3");
    script.push("4");
    script.shift();
    script.shift();
    script.shift();
    script.shift();
    script.shift();
    script.shift();
    assert_eq!(script.queue.shift().unwrap_err(), Error::QueueUnderflow);
    script.push("5");
    script.push("6");

    assert_eq!(
        *script.log.lock(),
        vec![
            "push 1",
            "result: None",
            "push 2",
            "result: None",
            "push 3",
            "result: Deferred",
            "push 4",
            "result: Deferred",
            "shift",
            "result: 1",
            "shift",
            "callback push 3",
            "callback push 4",
            "result: 2",
            "shift",
            "result: 3",
            "shift",
            "result: 4",
            "shift",
            "result: Deferred",
            "shift",
            "result: Deferred",
            "push 5",
            "callback shift",
            "result: None",
            "push 6",
            "callback shift",
            "result: None",
        ]
    );
}

#[test]
fn test_zero_backlog_never_waits() {
    let queue = BacklogQueue::<u8>::new(1).with_backlog(0);
    assert_eq!(queue.shift().unwrap_err(), Error::QueueUnderflow);
}

#[test]
fn test_cancelled_consumer_frees_backlog_slot() {
    let queue = BacklogQueue::<u8>::new(1).with_backlog(1);

    let Ok(Inline::Pending(waiting)) = queue.shift() else {
        panic!("expected a waiting consumer");
    };
    assert_eq!(queue.shift().unwrap_err(), Error::QueueUnderflow);

    waiting.cancel();
    assert_eq!(queue.waiting(), 0);
    assert!(matches!(queue.shift(), Ok(Inline::Pending(_))));
}

#[test]
fn test_backlog_try_push_peek_and_clear() {
    let queue = BacklogQueue::new(2);

    let Ok(Inline::Pending(consumer)) = queue.shift() else {
        panic!("an empty queue makes the consumer wait");
    };
    assert_eq!(queue.try_push(1), Ok(()));
    assert_eq!(consumer.result(), Some(Ok(1)));
    assert!(queue.is_empty());

    assert_eq!(queue.try_push(2), Ok(()));
    assert_eq!(queue.try_push(3), Ok(()));
    assert_eq!(queue.try_push(4), Err(Error::QueueOverflow));
    assert_eq!(queue.peek(), Some(2));
    assert_eq!(queue.len(), 2);

    let space = queue.wait_for_space();
    assert!(!space.is_settled());
    queue.clear();
    assert!(queue.is_empty());
    assert_eq!(space.result(), Some(Ok(())));

    let Ok(Inline::Pending(waiting)) = queue.shift() else {
        panic!("a cleared queue makes the consumer wait");
    };
    queue.clear();
    assert!(!waiting.is_settled());
    assert_eq!(queue.waiting(), 1);
}

#[test]
fn test_waiting_consumer_beats_concurrent_shift() {
    for _ in 0..2_000 {
        let queue = Arc::new(BacklogQueue::new(4));
        let Ok(Inline::Pending(oldest)) = queue.shift() else {
            panic!("expected a pending consumer");
        };

        let barrier = Arc::new(Barrier::new(2));
        let producer = {
            let (queue, barrier) = (queue.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                let _ = queue.push(1);
            })
        };
        let late = {
            let (queue, barrier) = (queue.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                queue.shift().unwrap().is_ready()
            })
        };

        producer.join().unwrap();
        let late_got_item = late.join().unwrap();

        assert!(!late_got_item, "a later shift took the item from a waiting consumer");
        assert_eq!(oldest.result(), Some(Ok(1)));
    }
}

#[derive(Debug, Clone)]
enum Op {
    Push(u16),
    Shift,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u16>().prop_map(Op::Push), Just(Op::Shift)]
}

proptest! {
    #[test]
    fn prop_items_come_out_in_push_order(ops in prop::collection::vec(op(), 0..200)) {
        let queue = BacklogQueue::new(8);
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut pushed = Vec::new();

        for op in ops {
            match op {
                Op::Push(item) => {
                    pushed.push(item);
                    let _ = queue.push(item);
                }
                Op::Shift => match queue.shift().unwrap() {
                    Inline::Ready(item) => received.lock().push(item),
                    Inline::Pending(next) => {
                        let sink = received.clone();
                        next.on_complete(move |item| sink.lock().push(item), |_| {});
                    }
                },
            }
        }

        while let Some(item) = queue.shift_many(1).pop() {
            received.lock().push(item);
        }

        prop_assert_eq!(&*received.lock(), &pushed);
    }
}
