//! Simulated heap
//!
//! Every [`SimHeap::allocate`] is one allocation event seen by the injector.
//! A [`Block`] releases itself on drop, so an out-of-memory return that drops
//! its partial allocations frees them without any explicit cleanup.

use crate::injector::Shared;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Injected allocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("simulated allocation of {size} bytes failed")]
pub struct OutOfMemory {
    /// Requested size
    pub size: usize,
}

/// Allocation handle over the simulator's shared state
#[derive(Clone)]
pub struct SimHeap {
    shared: Arc<Mutex<Shared>>,
}

impl SimHeap {
    pub(crate) fn new(shared: Arc<Mutex<Shared>>) -> Self {
        Self { shared }
    }

    /// Allocate one block
    ///
    /// # Errors
    /// [`OutOfMemory`] when the injector fails this allocation.
    pub fn allocate(&self, size: usize) -> Result<Block, OutOfMemory> {
        let epoch = self.shared.lock().allocate(size)?;
        Ok(Block {
            shared: Arc::clone(&self.shared),
            size,
            epoch,
        })
    }

    /// Allocate `count` blocks, releasing all of them if any one fails
    ///
    /// # Errors
    /// [`OutOfMemory`] from the first failing allocation.
    pub fn allocate_many(&self, count: usize, size: usize) -> Result<Vec<Block>, OutOfMemory> {
        (0..count).map(|_| self.allocate(size)).collect()
    }
}

impl fmt::Debug for SimHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHeap").finish_non_exhaustive()
    }
}

/// A live simulated allocation
pub struct Block {
    shared: Arc<Mutex<Shared>>,
    size: usize,
    epoch: Option<u64>,
}

impl Block {
    /// Requested size
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.shared.lock().free(self.epoch);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("size", &self.size)
            .field("epoch", &self.epoch)
            .finish()
    }
}
