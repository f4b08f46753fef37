use std::sync::{Mutex, PoisonError};

/// Sequential id allocator behind its own lock.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: Mutex<u64>,
}

impl IdAllocator {
    /// Resume after the highest sequence already on disk.
    pub fn recover(max_existing: u64) -> Self {
        Self {
            last: Mutex::new(max_existing),
        }
    }

    /// Reserve the next sequence number. Numbers are never reused.
    pub fn allocate(&self) -> u64 {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last += 1;
        *last
    }

    pub fn current(&self) -> u64 {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
