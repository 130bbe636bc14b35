//! Behavioural tests on the hosted backend.
//!
//! The test body is the bootstrap thread. Kernel threads only record into
//! shared state; every assertion runs on the bootstrap thread once it has
//! been scheduled back in.

mod dpc;
mod scheduling;

use std::sync::{Arc, Mutex};

use crate::arch::Hosted;
use crate::config::KernelConfig;
use crate::Kernel;

pub(crate) type TestKernel = Arc<Kernel<Hosted>>;

/// Shared, ordered record of what kernel threads did.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Boots a kernel whose idle thread fast-forwards to the next deadline.
pub(crate) fn boot() -> TestKernel {
    boot_with(KernelConfig::builder().tickless_idle(true).build())
}

pub(crate) fn boot_with(config: KernelConfig) -> TestKernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::boot(Hosted::new(), config).expect("boot kernel")
}
