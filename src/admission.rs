//! Memory admission control: a per-request budget over in-flight block reads.
//!
//! One [`MemoryAdmission`] is created per request and discarded with it;
//! nothing here is shared across requests or persisted. Every tracked read
//! must be released exactly once — [`BudgetPermit`] does this on drop so the
//! budget cannot leak on early returns or abandoned streams.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{GatewayError, Result};

/// Static limits applied to every request's retrieval work.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryLimits {
    /// Largest single block admitted, in bytes.
    pub max_block_size: u64,
    /// Ceiling on bytes committed at once across all in-flight blocks.
    pub max_batch_size: u64,
    /// Ceiling on distinct blocks in flight at once.
    pub max_concurrent_blocks: usize,
    /// Fraction of `max_batch_size` above which `stats()` reports throttled.
    pub throttle_ratio: f64,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        MemoryLimits {
            max_block_size: 2 * 1024 * 1024,
            max_batch_size: 32 * 1024 * 1024,
            max_concurrent_blocks: 8,
            throttle_ratio: 0.8,
        }
    }
}

/// Point-in-time budget usage, surfaced as response headers.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub current_usage: u64,
    pub active_blocks: usize,
    pub is_throttled: bool,
}

#[derive(Default)]
struct Inner {
    current_usage: u64,
    active: HashSet<String>,
}

/// Per-request memory/concurrency budget.
pub struct MemoryAdmission {
    limits: MemoryLimits,
    inner: Mutex<Inner>,
}

impl MemoryAdmission {
    pub fn new(limits: MemoryLimits) -> Self {
        MemoryAdmission {
            limits,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    /// Commit `size` bytes for block `id`, or reject naming the violated
    /// limit. Called once per whole block, or once per chunk when a single
    /// block is streamed (repeat tracks of an active id do not count against
    /// the concurrency limit).
    pub fn track(&self, id: &str, size: u64) -> Result<()> {
        if size > self.limits.max_block_size {
            return Err(GatewayError::BudgetExceeded(format!(
                "block {id} is {size} bytes, max block size is {}",
                self.limits.max_block_size
            )));
        }
        let mut inner = self.inner.lock();
        if inner.current_usage + size > self.limits.max_batch_size {
            return Err(GatewayError::BudgetExceeded(format!(
                "tracking block {id} ({size} bytes) would exceed batch size {} (current {})",
                self.limits.max_batch_size, inner.current_usage
            )));
        }
        if !inner.active.contains(id) && inner.active.len() >= self.limits.max_concurrent_blocks {
            return Err(GatewayError::BudgetExceeded(format!(
                "{} blocks already in flight, max is {}",
                inner.active.len(),
                self.limits.max_concurrent_blocks
            )));
        }
        inner.current_usage += size;
        inner.active.insert(id.to_string());
        Ok(())
    }

    /// Return `size` bytes for block `id`. Usage is floored at zero.
    pub fn release(&self, id: &str, size: u64) {
        let mut inner = self.inner.lock();
        inner.current_usage = inner.current_usage.saturating_sub(size);
        inner.active.remove(id);
    }

    pub fn stats(&self) -> AdmissionStats {
        let inner = self.inner.lock();
        AdmissionStats {
            current_usage: inner.current_usage,
            active_blocks: inner.active.len(),
            is_throttled: inner.current_usage as f64
                > self.limits.max_batch_size as f64 * self.limits.throttle_ratio,
        }
    }

    /// Track `size` bytes for `id` and hand back a permit that releases the
    /// commitment when dropped.
    pub fn admit(self: &Arc<Self>, id: &str, size: u64) -> Result<BudgetPermit> {
        self.track(id, size)?;
        Ok(BudgetPermit {
            admission: Arc::clone(self),
            id: id.to_string(),
            size,
        })
    }
}

/// Releases one tracked read on drop.
pub struct BudgetPermit {
    admission: Arc<MemoryAdmission>,
    id: String,
    size: u64,
}

impl Drop for BudgetPermit {
    fn drop(&mut self) {
        self.admission.release(&self.id, self.size);
    }
}
