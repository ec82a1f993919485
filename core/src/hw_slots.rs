//! Bounded semaphore over GPU encode slots (C5, spec §4.5).

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A counting semaphore with capacity `MAX_HW_PROCESSES`. Acquisition is
/// non-blocking: callers that can't get a slot fall back to CPU encoding.
#[derive(Clone)]
pub struct HwSlotLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl HwSlotLimiter {
    pub fn new(capacity: usize) -> Self {
        HwSlotLimiter {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Try to reserve a hardware slot. Never blocks; `None` means fall back to CPU.
    pub fn acquire(&self, task_id: &str) -> Option<HwSlotGuard> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                tracing::debug!(task_id, "acquired hardware encode slot");
                Some(HwSlotGuard { permit })
            }
            Err(_) => {
                tracing::debug!(task_id, "no hardware slot available, falling back to CPU");
                None
            }
        }
    }
}

/// Held for the lifetime of a hardware-encoding task. The permit is released
/// automatically on drop, which the supervisor ties to the process handle so
/// release happens on both the normal-exit and forced-termination paths.
pub struct HwSlotGuard {
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}
