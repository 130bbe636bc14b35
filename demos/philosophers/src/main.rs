//! Dining philosophers on the hosted kernel.
//!
//! Five philosophers share five forks, each fork a kernel mutex. Every
//! philosopher picks up the lower-numbered fork first, so no cycle of waits
//! can form. A periodic software timer queues a deferred call that reports
//! progress, and the thread table is dumped once everyone has eaten.
//!
//! Usage: `philosophers [TRACE_FILE]`. With a path, kernel trace records are
//! written there as HDLC frames.

use std::error::Error;
use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lk_kernel::{
    DpcFlags, Hosted, Kernel, KernelConfig, KernelResult, Mutex, Priority, ThreadConfig, Timeout,
    Timer,
};
use lk_kevlog::{KevlogConfig, Tracer, WriterBackend};

const N_PHILO: usize = 5;
const MEALS: usize = 3;
const REPORT_PERIOD: u64 = 10;

static MEALS_EATEN: AtomicUsize = AtomicUsize::new(0);

fn report(tick: usize) {
    log::info!(
        "tick {tick}: {} of {} meals eaten",
        MEALS_EATEN.load(Ordering::Relaxed),
        N_PHILO * MEALS
    );
}

fn philosopher(
    kernel: &Kernel<Hosted>,
    id: usize,
    forks: &[Arc<Mutex<Hosted>>],
) -> KernelResult<()> {
    let left = id;
    let right = (id + 1) % N_PHILO;
    let (first, second) = (left.min(right), left.max(right));

    for meal in 0..MEALS {
        log::info!("philosopher {id} thinking");
        kernel.sleep(2 + id as u64);

        log::info!("philosopher {id} hungry");
        forks[first].lock(Timeout::Infinite)?;
        forks[second].lock(Timeout::Infinite)?;

        log::info!("philosopher {id} eating meal {}", meal + 1);
        MEALS_EATEN.fetch_add(1, Ordering::Relaxed);
        kernel.sleep(3);

        forks[second].unlock()?;
        forks[first].unlock()?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = KernelConfig::builder()
        .name("dpp")
        .tickless_idle(true)
        .dpc_capacity(16)
        .build();
    let mut builder = Kernel::builder(Hosted::new()).config(config);
    if let Some(path) = std::env::args().nth(1) {
        let backend = WriterBackend::new(File::create(&path)?);
        let tracer = Tracer::new(KevlogConfig::default(), backend).into_handle();
        builder = builder.with_trace_hook(tracer.hook());
        log::info!("tracing kernel records to {path}");
    }
    let kernel = builder.boot()?;

    let forks: Arc<Vec<_>> = Arc::new((0..N_PHILO).map(|_| Arc::new(Mutex::new(&kernel))).collect());

    let reporter = Timer::new(&kernel);
    {
        let kernel = Arc::clone(&kernel);
        reporter.set_periodic(REPORT_PERIOD, REPORT_PERIOD, move || {
            let tick = kernel.now() as usize;
            if let Err(err) = kernel.dpc_queue(report, tick, DpcFlags::empty()) {
                log::warn!("progress report dropped: {err}");
            }
        })?;
    }

    let mut philosophers = Vec::with_capacity(N_PHILO);
    for id in 0..N_PHILO {
        let kernel_ref = Arc::clone(&kernel);
        let forks = Arc::clone(&forks);
        let handle = kernel.spawn(
            ThreadConfig::new(format!("philo-{id}"), Priority(Priority::DEFAULT.0 + id as u8)),
            move || match philosopher(&kernel_ref, id, &forks) {
                Ok(()) => 0,
                Err(err) => {
                    log::error!("philosopher {id} failed: {err}");
                    1
                }
            },
        )?;
        philosophers.push(handle);
    }

    let mut failures = 0;
    for handle in &philosophers {
        if handle.join(Timeout::Infinite)? != 0 {
            failures += 1;
        }
    }
    reporter.cancel();

    log::info!(
        "all philosophers done at tick {}: {} meals, {failures} failure(s)",
        kernel.now(),
        MEALS_EATEN.load(Ordering::Relaxed)
    );
    kernel.dump_threads();
    Ok(())
}
