use std::sync::Arc;

use super::{boot, boot_with, Journal};
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::primitives::Semaphore;
use crate::thread::{Priority, ThreadConfig, ThreadFlags, ThreadState};
use crate::timer::Timeout;

#[test]
fn spawn_does_not_dispatch() {
    let kernel = boot();
    let journal = Journal::default();

    let log = journal.clone();
    let handle = kernel
        .spawn(ThreadConfig::new("eager", Priority::HIGH), move || {
            log.push("ran");
            0
        })
        .expect("spawn");

    assert!(journal.entries().is_empty());
    assert_eq!(handle.info().map(|info| info.state), Some(ThreadState::Ready));

    assert_eq!(handle.join(Timeout::Infinite), Ok(0));
    assert_eq!(journal.entries(), ["ran"]);
}

#[test]
fn higher_priority_dispatches_first() {
    let kernel = boot();
    let journal = Journal::default();

    let mut handles = Vec::new();
    for (name, priority) in [("low", Priority::LOW), ("high", Priority::HIGH), ("mid", Priority(12))] {
        let log = journal.clone();
        handles.push(
            kernel
                .spawn(ThreadConfig::new(name, priority), move || {
                    log.push(name);
                    0
                })
                .expect("spawn"),
        );
    }

    for handle in &handles {
        handle.join(Timeout::Infinite).expect("join");
    }
    assert_eq!(journal.entries(), ["high", "mid", "low"]);
}

#[test]
fn equal_priorities_run_in_spawn_order() {
    let kernel = boot();
    let journal = Journal::default();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let log = journal.clone();
            kernel
                .spawn(ThreadConfig::new(format!("t{i}"), Priority::LOW), move || {
                    log.push(format!("t{i}"));
                    0
                })
                .expect("spawn")
        })
        .collect();

    handles[3].join(Timeout::Infinite).expect("join");
    assert_eq!(journal.entries(), ["t0", "t1", "t2", "t3"]);
}

#[test]
fn yield_rotates_equal_priority_peers() {
    let kernel = boot();
    let journal = Journal::default();

    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let log = journal.clone();
            let k = Arc::clone(&kernel);
            kernel
                .spawn(ThreadConfig::new(name, Priority::HIGH), move || {
                    for round in 0..2 {
                        log.push(format!("{name}{round}"));
                        k.yield_now();
                    }
                    0
                })
                .expect("spawn")
        })
        .collect();

    for handle in &handles {
        handle.join(Timeout::Infinite).expect("join");
    }
    assert_eq!(journal.entries(), ["a0", "b0", "a1", "b1"]);
    assert!(kernel.stats().yields >= 4);
}

#[test]
fn quantum_expiry_round_robins_at_interrupt_exit() {
    let kernel = boot_with(
        KernelConfig::builder()
            .tickless_idle(true)
            .quantum_ticks(2)
            .build(),
    );
    let journal = Journal::default();

    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let log = journal.clone();
            let k = Arc::clone(&kernel);
            kernel
                .spawn(ThreadConfig::new(name, Priority::LOW), move || {
                    for _ in 0..4 {
                        log.push(name);
                        // The timer fires while this thread is running.
                        k.timer_interrupt();
                    }
                    0
                })
                .expect("spawn")
        })
        .collect();

    for handle in &handles {
        handle.join(Timeout::Infinite).expect("join");
    }
    assert_eq!(journal.entries(), ["a", "a", "b", "b", "a", "a", "b", "b"]);
    assert!(kernel.stats().preemptions >= 3);
}

#[test]
fn real_time_thread_is_not_sliced() {
    let kernel = boot_with(
        KernelConfig::builder()
            .tickless_idle(true)
            .quantum_ticks(1)
            .build(),
    );
    let journal = Journal::default();

    let log = journal.clone();
    let k = Arc::clone(&kernel);
    let rt = kernel
        .spawn(ThreadConfig::new("rt", Priority::LOW), move || {
            k.set_real_time();
            for _ in 0..3 {
                log.push("rt");
                k.timer_interrupt();
            }
            0
        })
        .expect("spawn");

    let log = journal.clone();
    let other = kernel
        .spawn(ThreadConfig::new("other", Priority::LOW), move || {
            log.push("other");
            0
        })
        .expect("spawn");

    other.join(Timeout::Infinite).expect("join");
    rt.join(Timeout::Infinite).expect("join");
    assert_eq!(journal.entries(), ["rt", "rt", "rt", "other"]);
}

#[test]
fn higher_priority_wakeup_preempts_at_interrupt_exit() {
    let kernel = boot();
    let journal = Journal::default();

    let log = journal.clone();
    let k = Arc::clone(&kernel);
    let high = kernel
        .spawn(ThreadConfig::new("high", Priority::HIGH), move || {
            k.sleep(2);
            log.push("high");
            0
        })
        .expect("spawn");

    let log = journal.clone();
    let k = Arc::clone(&kernel);
    let low = kernel
        .spawn(ThreadConfig::new("low", Priority::LOW), move || {
            for i in 0..4 {
                log.push(format!("low{i}"));
                k.timer_interrupt();
            }
            0
        })
        .expect("spawn");

    low.join(Timeout::Infinite).expect("join");
    high.join(Timeout::Infinite).expect("join");
    assert_eq!(journal.entries(), ["low0", "low1", "high", "low2", "low3"]);
}

#[test]
fn join_returns_exit_code_and_releases_thread() {
    let kernel = boot();
    let handle = kernel
        .spawn(ThreadConfig::new("worker", Priority::LOW), || 42)
        .expect("spawn");
    let id = handle.id();

    assert_eq!(handle.join(Timeout::Infinite), Ok(42));
    assert!(handle.info().is_none());
    assert!(kernel.threads().iter().all(|info| info.id != id));
    assert_eq!(handle.join(Timeout::Poll), Err(KernelError::InvalidArgs));
}

#[test]
fn join_times_out_on_running_thread() {
    let kernel = boot();
    let gate = Arc::new(Semaphore::new(&kernel, 0));

    let g = Arc::clone(&gate);
    let handle = kernel
        .spawn(ThreadConfig::new("blocked", Priority::LOW), move || {
            g.wait(Timeout::Infinite).expect("gate");
            5
        })
        .expect("spawn");

    assert_eq!(handle.join(Timeout::Poll), Err(KernelError::TimedOut));
    assert_eq!(handle.join(Timeout::Ticks(3)), Err(KernelError::TimedOut));

    gate.signal().expect("signal");
    assert_eq!(handle.join(Timeout::Infinite), Ok(5));
}

#[test]
fn joining_self_is_a_deadlock() {
    let kernel = boot();
    let journal = Journal::default();

    let log = journal.clone();
    let k = Arc::clone(&kernel);
    let handle = kernel
        .spawn(ThreadConfig::new("self-join", Priority::HIGH), move || {
            let outcome = k.join_thread(k.current_thread(), Timeout::Infinite);
            log.push(format!("{outcome:?}"));
            0
        })
        .expect("spawn");

    assert_eq!(handle.join(Timeout::Infinite), Ok(0));
    assert_eq!(journal.entries(), ["Err(Deadlock)"]);
}

#[test]
fn detach_fails_pending_join_and_reaps_on_exit() {
    let kernel = boot();
    let journal = Journal::default();
    let gate = Arc::new(Semaphore::new(&kernel, 0));

    let g = Arc::clone(&gate);
    let target = Arc::new(
        kernel
            .spawn(ThreadConfig::new("target", Priority::LOW), move || {
                g.wait(Timeout::Infinite).expect("gate");
                7
            })
            .expect("spawn"),
    );
    let target_id = target.id();

    let log = journal.clone();
    let t = Arc::clone(&target);
    let joiner = kernel
        .spawn(ThreadConfig::new("joiner", Priority::HIGH), move || {
            log.push(format!("{:?}", t.join(Timeout::Infinite)));
            0
        })
        .expect("spawn");

    // Joiner blocks in join, target blocks on the gate.
    kernel.sleep(1);
    assert!(journal.entries().is_empty());

    target.detach().expect("detach");
    assert_eq!(journal.entries(), ["Err(ThreadDetached)"]);
    assert_eq!(joiner.join(Timeout::Infinite), Ok(0));

    gate.signal().expect("signal");
    kernel.sleep(1);
    assert!(kernel.threads().iter().all(|info| info.id != target_id));
    assert_eq!(target.join(Timeout::Poll), Err(KernelError::InvalidArgs));
}

#[test]
fn suspended_thread_waits_for_resume() {
    let kernel = boot();
    let journal = Journal::default();

    let log = journal.clone();
    let handle = kernel
        .spawn_suspended(ThreadConfig::new("sleeper", Priority::HIGH), move || {
            log.push("resumed");
            3
        })
        .expect("spawn");

    kernel.sleep(2);
    assert!(journal.entries().is_empty());
    assert_eq!(
        handle.info().map(|info| info.state),
        Some(ThreadState::Suspended)
    );

    handle.resume().expect("resume");
    assert_eq!(journal.entries(), ["resumed"]);
    assert_eq!(handle.resume(), Err(KernelError::NotSuspended));
    assert_eq!(handle.join(Timeout::Infinite), Ok(3));
}

#[test]
fn sleep_lasts_at_least_the_requested_ticks() {
    let kernel = boot();
    let start = kernel.now();
    kernel.sleep(5);
    assert!(kernel.now() - start >= 5);

    let start = kernel.now();
    kernel.sleep(0);
    assert!(kernel.now() - start >= 1);
}

#[test]
fn lowering_priority_hands_over_to_ready_thread() {
    let kernel = boot();
    let journal = Journal::default();

    let log = journal.clone();
    let handle = kernel
        .spawn(ThreadConfig::new("mid", Priority(12)), move || {
            log.push("mid");
            0
        })
        .expect("spawn");

    assert!(journal.entries().is_empty());
    kernel.set_priority(Priority::LOW).expect("set priority");
    assert_eq!(journal.entries(), ["mid"]);

    let me = kernel.current_thread();
    let info = kernel
        .threads()
        .into_iter()
        .find(|info| info.id == me)
        .expect("bootstrap thread");
    assert_eq!(info.base_priority, Priority::LOW);
    assert_eq!(info.priority, Priority::LOW);

    assert_eq!(kernel.set_priority(Priority(40)), Err(KernelError::InvalidArgs));
    handle.join(Timeout::Infinite).expect("join");
}

#[test]
fn invalid_priority_is_rejected_at_spawn() {
    let kernel = boot();
    let result = kernel.spawn(ThreadConfig::new("bad", Priority(32)), || 0);
    assert!(matches!(result, Err(KernelError::InvalidArgs)));
}

#[test]
fn thread_table_and_stack_budget_are_enforced() {
    let kernel = boot_with(
        KernelConfig::builder()
            .max_threads(4)
            .stack_budget(16 * 1024)
            .default_stack_size(4 * 1024)
            .dpc_stack_size(4 * 1024)
            .build(),
    );

    // bootstrap, idle and the deferred call worker already exist.
    let big = kernel.spawn(
        ThreadConfig::new("big", Priority::LOW).with_stack_size(64 * 1024),
        || 0,
    );
    assert!(matches!(big, Err(KernelError::OutOfMemory)));

    let fits = kernel
        .spawn(ThreadConfig::new("fits", Priority::LOW), || 0)
        .expect("spawn");
    let full = kernel.spawn(ThreadConfig::new("extra", Priority::LOW), || 0);
    assert!(matches!(full, Err(KernelError::OutOfMemory)));

    fits.join(Timeout::Infinite).expect("join");
    assert!(kernel
        .spawn(ThreadConfig::new("again", Priority::LOW), || 0)
        .is_ok());
}

#[test]
fn diagnostics_describe_kernel_threads() {
    let kernel = boot();
    let handle = kernel
        .spawn_suspended(ThreadConfig::new("sampler", Priority::LOW), || 0)
        .expect("spawn");

    let threads = kernel.threads();
    let names: Vec<_> = threads.iter().map(|info| info.name.as_str()).collect();
    assert_eq!(names, ["bootstrap", "idle", "dpc", "sampler"]);

    let idle = &threads[1];
    assert!(idle.flags.contains(ThreadFlags::IDLE));
    assert_eq!(idle.priority, Priority::IDLE);
    assert_eq!(threads[2].priority, Priority::DPC);

    assert_eq!(threads[0].stack_high_water, None);
    let sampler = &threads[3];
    assert_eq!(sampler.stack_size, kernel.config().default_stack_size);
    let used = sampler.stack_high_water.expect("owned stack");
    assert!(used > 0 && used < sampler.stack_size);

    kernel.dump_threads();
    handle.resume().expect("resume");
    handle.join(Timeout::Infinite).expect("join");
    assert!(kernel.stats().context_switches > 0);
}

#[test]
fn interrupt_hooks_track_nesting() {
    let kernel = boot();
    assert!(!kernel.in_interrupt());
    assert!(kernel.can_preempt());

    kernel.irq_enter();
    kernel.irq_enter();
    assert!(kernel.in_interrupt());
    assert!(!kernel.can_preempt());
    kernel.irq_exit();
    assert!(kernel.in_interrupt());
    kernel.irq_exit();
    assert!(!kernel.in_interrupt());
}

#[test]
#[should_panic(expected = "interrupt context")]
fn blocking_in_interrupt_context_halts() {
    let kernel = boot();
    let sem = Semaphore::new(&kernel, 0);
    kernel.irq_enter();
    let _ = sem.wait(Timeout::Infinite);
}
