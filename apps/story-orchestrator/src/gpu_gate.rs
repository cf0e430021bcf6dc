//! `GpuGate`: a process-wide counting semaphore serializing access to
//! GPU-bound pipeline steps. Only `StepKind::Clone` acquires it;
//! CPU-bound steps never contend for it.

use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct GpuGate {
	semaphore: Semaphore,
	permits: usize,
}

impl GpuGate {
	#[must_use]
	pub fn new(permits: usize) -> Arc<Self> {
		Arc::new(Self {
			semaphore: Semaphore::new(permits),
			permits,
		})
	}

	#[must_use]
	pub const fn permits(&self) -> usize {
		self.permits
	}

	#[must_use]
	pub fn available(&self) -> usize {
		self.semaphore.available_permits()
	}

	/// Block until a permit is available. `tokio::sync::Semaphore` serves
	/// waiters in FIFO order.
	pub async fn acquire(&self) -> SemaphorePermit<'_> {
		// The semaphore is never closed, so acquiring cannot fail.
		self.semaphore.acquire().await.expect("gpu gate semaphore is never closed")
	}
}
