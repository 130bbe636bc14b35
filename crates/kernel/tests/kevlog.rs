//! Kernel trace records carried through the binary event log.
#![cfg(all(feature = "kevlog", feature = "hosted"))]

use lk_kernel::trace::records;
use lk_kernel::{Hosted, Kernel, KernelConfig, Priority, ThreadConfig, Timeout};
use lk_kevlog::{decode_frame, KevlogConfig, MemoryBackend, Tracer};

#[test]
fn kernel_records_decode_from_kevlog_frames() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = MemoryBackend::new();
    let config = KevlogConfig {
        include_timestamp: false,
        ..KevlogConfig::default()
    };
    let tracer = Tracer::new(config, backend.clone()).into_handle();

    let kernel = Kernel::builder(Hosted::new())
        .config(KernelConfig::builder().tickless_idle(true).build())
        .with_trace_hook(tracer.hook())
        .boot()
        .expect("boot kernel");

    let worker = kernel
        .spawn(ThreadConfig::new("worker", Priority::LOW), || 5)
        .expect("spawn");
    let id = worker.id().0.to_le_bytes();
    assert_eq!(worker.join(Timeout::Infinite), Ok(5));

    let bodies: Vec<Vec<u8>> = backend
        .frames()
        .iter()
        .map(|frame| decode_frame(frame).expect("intact frame"))
        .collect();
    assert!(!bodies.is_empty());

    // [seq, record, payload..] with sequence numbers counting up from one.
    for (index, body) in bodies.iter().enumerate() {
        assert_eq!(body[0], (index + 1) as u8);
    }

    let has = |record: u8, payload: &[u8]| {
        bodies
            .iter()
            .any(|body| body[1] == record && body[2..] == *payload)
    };
    assert!(has(
        records::thread::SPAWN,
        &[id[0], id[1], id[2], id[3], Priority::LOW.0]
    ));
    assert!(has(records::thread::EXIT, &[id[0], id[1], id[2], id[3], 5, 0, 0, 0]));
    assert!(has(records::thread::JOIN, &id));

    let switched_in = bodies
        .iter()
        .any(|body| body[1] == records::sched::SWITCH && body[2..6] == id);
    assert!(switched_in);
}
