//! End-to-end kernel scenarios on the hosted backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use lk_kernel::trace::records;
use lk_kernel::{
    Hosted, Kernel, KernelConfig, Mutex, Priority, Semaphore, ThreadConfig, Timeout, TraceError,
    TraceHook,
};

fn boot() -> Arc<Kernel<Hosted>> {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::boot(
        Hosted::new(),
        KernelConfig::builder().tickless_idle(true).build(),
    )
    .expect("boot kernel")
}

#[test]
fn priority_first_then_fifo_among_equals() {
    let kernel = boot();
    let order = Arc::new(StdMutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (name, level) in [("A", 5), ("B", 5), ("C", 10)] {
        let order = order.clone();
        let handle = kernel
            .spawn(ThreadConfig::new(name, Priority(level)), move || {
                order.lock().unwrap().push(name);
                0
            })
            .expect("spawn");
        handles.push(handle);
    }

    for handle in &handles {
        handle.join(Timeout::Infinite).expect("join");
    }
    assert_eq!(*order.lock().unwrap(), ["C", "A", "B"]);
}

#[test]
fn mutex_owner_runs_at_waiter_priority() {
    let kernel = boot();
    let log = Arc::new(StdMutex::new(Vec::new()));
    let lock = Arc::new(Mutex::new(&kernel));
    let go = Arc::new(Semaphore::new(&kernel, 0));

    let holder = {
        let (log, lock, go) = (log.clone(), lock.clone(), go.clone());
        kernel
            .spawn(ThreadConfig::new("holder", Priority::LOW), move || {
                lock.lock(Timeout::Infinite).expect("lock");
                log.lock().unwrap().push("holder locked");
                go.wait(Timeout::Infinite).expect("go");
                log.lock().unwrap().push("holder unlocking");
                lock.unlock().expect("unlock");
                log.lock().unwrap().push("holder done");
                0
            })
            .expect("spawn holder")
    };
    kernel.sleep(1);
    assert_eq!(*log.lock().unwrap(), ["holder locked"]);

    let waiter = {
        let (log, lock) = (log.clone(), lock.clone());
        kernel
            .spawn(ThreadConfig::new("waiter", Priority::HIGH), move || {
                lock.lock(Timeout::Infinite).expect("lock");
                log.lock().unwrap().push("waiter got");
                lock.unlock().expect("unlock");
                0
            })
            .expect("spawn waiter")
    };
    let medium = {
        let log = log.clone();
        kernel
            .spawn(ThreadConfig::new("medium", Priority(12)), move || {
                log.lock().unwrap().push("medium");
                0
            })
            .expect("spawn medium")
    };

    kernel.yield_now();
    let info = holder.info().expect("holder alive");
    assert_eq!(info.priority, Priority::HIGH);
    assert_eq!(info.base_priority, Priority::LOW);

    go.signal().expect("signal");
    assert_eq!(holder.info().map(|info| info.priority), Some(Priority::LOW));

    for handle in [&waiter, &medium, &holder] {
        handle.join(Timeout::Infinite).expect("join");
    }
    assert_eq!(
        *log.lock().unwrap(),
        [
            "holder locked",
            "holder unlocking",
            "waiter got",
            "medium",
            "holder done"
        ]
    );
}

#[test]
fn bounded_buffer_producer_consumer() {
    const ITEMS: u32 = 20;

    let kernel = boot();
    let buffer = Arc::new(StdMutex::new(VecDeque::new()));
    let guard = Arc::new(Mutex::new(&kernel));
    let slots = Arc::new(Semaphore::with_max(&kernel, 4, 4).expect("slots"));
    let items = Arc::new(Semaphore::new(&kernel, 0));

    let producer = {
        let (buffer, guard, slots, items) =
            (buffer.clone(), guard.clone(), slots.clone(), items.clone());
        kernel
            .spawn(ThreadConfig::new("producer", Priority::LOW), move || {
                for value in 0..ITEMS {
                    slots.wait(Timeout::Infinite).expect("slot");
                    guard.lock(Timeout::Infinite).expect("lock");
                    buffer.lock().unwrap().push_back(value);
                    guard.unlock().expect("unlock");
                    items.signal().expect("item");
                }
                0
            })
            .expect("spawn producer")
    };

    let received = Arc::new(StdMutex::new(Vec::new()));
    let consumer = {
        let (buffer, guard, slots, items, received) = (
            buffer.clone(),
            guard.clone(),
            slots.clone(),
            items.clone(),
            received.clone(),
        );
        kernel
            .spawn(ThreadConfig::new("consumer", Priority::LOW), move || {
                for _ in 0..ITEMS {
                    items.wait(Timeout::Infinite).expect("item");
                    guard.lock(Timeout::Infinite).expect("lock");
                    let value = buffer.lock().unwrap().pop_front();
                    guard.unlock().expect("unlock");
                    slots.signal().expect("slot");
                    received.lock().unwrap().extend(value);
                }
                0
            })
            .expect("spawn consumer")
    };

    producer.join(Timeout::Infinite).expect("join producer");
    consumer.join(Timeout::Infinite).expect("join consumer");

    assert_eq!(*received.lock().unwrap(), (0..ITEMS).collect::<Vec<_>>());
    assert_eq!(slots.count(), 4);
    assert_eq!(items.count(), 0);
    assert!(!guard.is_locked());
}

#[test]
fn trace_hook_sees_thread_lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();
    let captured = Arc::new(StdMutex::new(Vec::<(u8, Vec<u8>)>::new()));

    let sink = captured.clone();
    let hook: TraceHook = Arc::new(
        move |record: u8, payload: &[u8], _timestamp: bool| -> Result<(), TraceError> {
            sink.lock().unwrap().push((record, payload.to_vec()));
            Ok(())
        },
    );
    let kernel = Kernel::builder(Hosted::new())
        .config(KernelConfig::builder().tickless_idle(true).build())
        .with_trace_hook(hook)
        .boot()
        .expect("boot kernel");

    let worker = kernel
        .spawn(ThreadConfig::new("worker", Priority::LOW), || 9)
        .expect("spawn");
    let id = worker.id().0.to_le_bytes();
    assert_eq!(worker.join(Timeout::Infinite), Ok(9));

    let captured = captured.lock().unwrap();
    let spawn = [id[0], id[1], id[2], id[3], Priority::LOW.0];
    assert!(captured
        .iter()
        .any(|(record, payload)| *record == records::thread::SPAWN && payload[..] == spawn));

    let switched_in = captured.iter().any(|(record, payload)| {
        *record == records::sched::SWITCH && payload.len() == 8 && payload[..4] == id
    });
    assert!(switched_in);

    let exit = [id[0], id[1], id[2], id[3], 9, 0, 0, 0];
    assert!(captured
        .iter()
        .any(|(record, payload)| *record == records::thread::EXIT && payload[..] == exit));
    assert!(captured
        .iter()
        .any(|(record, payload)| *record == records::thread::JOIN && payload[..] == id));
}
