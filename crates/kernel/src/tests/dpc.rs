use std::sync::Mutex;

use super::{boot, boot_with};
use crate::config::KernelConfig;
use crate::dpc::DpcFlags;
use crate::error::KernelError;

#[test]
fn deferred_calls_run_in_queue_order() {
    static RAN: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(arg: usize) {
        RAN.lock().unwrap().push(arg);
    }

    let kernel = boot();
    for arg in 1..=3 {
        kernel
            .dpc_queue(record, arg, DpcFlags::NORESCHED)
            .expect("queue");
    }
    assert!(RAN.lock().unwrap().is_empty());
    assert_eq!(kernel.dpc_pending(), 3);

    // The worker outranks us and drains at the next reschedule point.
    kernel.reschedule();
    assert_eq!(*RAN.lock().unwrap(), [1, 2, 3]);
    assert_eq!(kernel.dpc_pending(), 0);
    assert_eq!(kernel.stats().dpcs_run, 3);
}

#[test]
fn deferred_call_runs_before_queue_returns() {
    static RAN: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(arg: usize) {
        RAN.lock().unwrap().push(arg);
    }

    let kernel = boot();
    kernel.dpc_queue(record, 10, DpcFlags::empty()).expect("queue");
    assert_eq!(*RAN.lock().unwrap(), [10]);

    // Again once the worker is parked on its event.
    kernel.dpc_queue(record, 11, DpcFlags::empty()).expect("queue");
    assert_eq!(*RAN.lock().unwrap(), [10, 11]);
}

#[test]
fn deferred_call_from_interrupt_runs_at_interrupt_exit() {
    static RAN: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(arg: usize) {
        RAN.lock().unwrap().push(arg);
    }

    let kernel = boot();
    kernel.irq_enter();
    kernel.dpc_queue(record, 7, DpcFlags::empty()).expect("queue");
    assert!(RAN.lock().unwrap().is_empty());
    assert!(kernel.reschedule_pending());

    kernel.irq_exit();
    assert_eq!(*RAN.lock().unwrap(), [7]);
}

#[test]
fn bounded_queue_reports_full() {
    static RAN: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(arg: usize) {
        RAN.lock().unwrap().push(arg);
    }

    let kernel = boot_with(KernelConfig::builder().tickless_idle(true).dpc_capacity(2).build());
    kernel.dpc_queue(record, 1, DpcFlags::NORESCHED).expect("queue");
    kernel.dpc_queue(record, 2, DpcFlags::NORESCHED).expect("queue");
    assert_eq!(
        kernel.dpc_queue(record, 3, DpcFlags::NORESCHED),
        Err(KernelError::QueueFull)
    );

    kernel.reschedule();
    assert_eq!(*RAN.lock().unwrap(), [1, 2]);
    kernel.dpc_queue(record, 3, DpcFlags::empty()).expect("queue");
    assert_eq!(*RAN.lock().unwrap(), [1, 2, 3]);
}
