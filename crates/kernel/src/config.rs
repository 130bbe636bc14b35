//! Kernel sizing and policy configuration.

/// Number of ticks a thread may run before yielding to an equal-priority peer.
pub const DEFAULT_QUANTUM_TICKS: u32 = 5;

/// Configuration for a kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    /// Upper bound on live thread control blocks, including the kernel's own threads.
    pub max_threads: usize,
    pub default_stack_size: usize,
    /// Total bytes all thread stacks may occupy at once. `None` leaves it unbounded.
    pub stack_budget: Option<usize>,
    pub quantum_ticks: u32,
    /// Tick frequency used to convert durations into ticks.
    pub tick_hz: u32,
    /// Maximum queued deferred calls. `None` leaves the queue unbounded.
    pub dpc_capacity: Option<usize>,
    pub dpc_stack_size: usize,
    /// Let the idle thread advance time straight to the next timer deadline.
    pub tickless_idle: bool,
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "LK",
            max_threads: 64,
            default_stack_size: 8192,
            stack_budget: None,
            quantum_ticks: DEFAULT_QUANTUM_TICKS,
            tick_hz: 1000,
            dpc_capacity: None,
            dpc_stack_size: 8192,
            tickless_idle: false,
            idle_callback: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for [`KernelConfig`].
#[derive(Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the maximum number of live threads.
    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    /// Sets the stack size used when a thread does not request one.
    pub fn default_stack_size(mut self, size: usize) -> Self {
        self.config.default_stack_size = size;
        self
    }

    /// Caps the total bytes of all live thread stacks.
    pub fn stack_budget(mut self, bytes: usize) -> Self {
        self.config.stack_budget = Some(bytes);
        self
    }

    /// Sets the round-robin time slice. Zero is treated as one tick.
    pub fn quantum_ticks(mut self, ticks: u32) -> Self {
        self.config.quantum_ticks = ticks.max(1);
        self
    }

    pub fn tick_hz(mut self, hz: u32) -> Self {
        self.config.tick_hz = hz.max(1);
        self
    }

    /// Bounds the deferred call queue.
    pub fn dpc_capacity(mut self, capacity: usize) -> Self {
        self.config.dpc_capacity = Some(capacity);
        self
    }

    pub fn dpc_stack_size(mut self, size: usize) -> Self {
        self.config.dpc_stack_size = size;
        self
    }

    /// Enables idle-time fast-forwarding to the next timer deadline.
    pub fn tickless_idle(mut self, enabled: bool) -> Self {
        self.config.tickless_idle = enabled;
        self
    }

    /// Sets the callback invoked each time the idle thread finds no work.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_hook() {}

    #[test]
    fn defaults_use_five_tick_quantum() {
        let config = KernelConfig::default();
        assert_eq!(config.quantum_ticks, 5);
        assert_eq!(config.tick_hz, 1000);
        assert!(config.dpc_capacity.is_none());
        assert!(config.stack_budget.is_none());
        assert!(!config.tickless_idle);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = KernelConfig::builder()
            .name("test")
            .max_threads(8)
            .default_stack_size(4096)
            .stack_budget(64 * 1024)
            .quantum_ticks(0)
            .dpc_capacity(4)
            .tickless_idle(true)
            .idle_callback(idle_hook)
            .build();

        assert_eq!(config.name, "test");
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.default_stack_size, 4096);
        assert_eq!(config.stack_budget, Some(64 * 1024));
        assert_eq!(config.quantum_ticks, 1);
        assert_eq!(config.dpc_capacity, Some(4));
        assert!(config.tickless_idle);
        assert!(config.idle_callback.is_some());
    }
}
