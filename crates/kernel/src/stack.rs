//! Thread stack allocation and accounting.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

/// Byte every fresh stack is filled with, for high-water measurement.
pub const STACK_FILL: u8 = 0x99;

/// Fixed-size stack region owned by exactly one thread.
pub struct Stack {
    bytes: Vec<u8>,
}

impl Stack {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Bytes at the low end that still hold the fill pattern.
    ///
    /// Stacks grow down, so this is the headroom the thread never reached.
    pub fn untouched(&self) -> usize {
        self.bytes.iter().take_while(|&&b| b == STACK_FILL).count()
    }

    /// Deepest extent the thread has used so far.
    pub fn high_water(&self) -> usize {
        self.len() - self.untouched()
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("len", &self.len())
            .field("high_water", &self.high_water())
            .finish()
    }
}

/// Hands out stacks against an optional total byte budget.
#[derive(Debug)]
pub(crate) struct StackPool {
    budget: Option<usize>,
    in_use: usize,
}

impl StackPool {
    pub fn new(budget: Option<usize>) -> Self {
        Self { budget, in_use: 0 }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Allocates a filled stack of `size` bytes.
    pub fn allocate(&mut self, size: usize) -> KernelResult<Stack> {
        if size == 0 {
            return Err(KernelError::InvalidArgs);
        }
        let in_use = self
            .in_use
            .checked_add(size)
            .ok_or(KernelError::OutOfMemory)?;
        if self.budget.is_some_and(|budget| in_use > budget) {
            return Err(KernelError::OutOfMemory);
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| KernelError::OutOfMemory)?;
        bytes.resize(size, STACK_FILL);

        self.in_use = in_use;
        Ok(Stack { bytes })
    }

    /// Returns a stack's bytes to the budget.
    pub fn release(&mut self, stack: Stack) {
        self.in_use -= stack.len();
    }
}
