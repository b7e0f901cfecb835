//! Host allocator interface
//!
//! The host frees objects it did not create through its own allocator, so
//! storage for anything handed to the host must come from there as well.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A block of host-owned storage. Not `Clone`: whoever holds it owns it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct StorageBlock {
    id: NonZeroU64,
    size: usize,
}

impl StorageBlock {
    pub fn id(&self) -> NonZeroU64 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Allocator supplied by the host
pub trait HostAllocator: Send + Sync {
    /// Allocate `size` bytes. `None` when the host is out of memory.
    fn allocate(&self, size: usize) -> Option<StorageBlock>;

    /// Release a block obtained from [`HostAllocator::allocate`]
    fn free_non_zero(&self, block: StorageBlock);
}

/// In-process allocator that keeps track of live blocks
#[derive(Debug)]
pub struct TrackingAllocator {
    next_id: AtomicU64,
    limit: Option<usize>,
    live: Mutex<HashMap<NonZeroU64, usize>>,
}

impl TrackingAllocator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            limit: None,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Allocator that refuses to hand out more than `bytes` in total
    pub fn with_limit(bytes: usize) -> Self {
        Self {
            limit: Some(bytes),
            ..Self::new()
        }
    }

    /// Number of blocks allocated and not yet freed
    pub fn live_blocks(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Total size of live blocks
    pub fn bytes_in_use(&self) -> usize {
        self.live.lock().map(|l| l.values().sum()).unwrap_or(0)
    }
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HostAllocator for TrackingAllocator {
    fn allocate(&self, size: usize) -> Option<StorageBlock> {
        let mut live = self.live.lock().ok()?;

        if let Some(limit) = self.limit {
            let in_use: usize = live.values().sum();
            if in_use.saturating_add(size) > limit {
                tracing::warn!(size, in_use, limit, "Host allocation refused");
                return None;
            }
        }

        let id = NonZeroU64::new(self.next_id.fetch_add(1, Ordering::Relaxed))?;
        live.insert(id, size);
        Some(StorageBlock { id, size })
    }

    fn free_non_zero(&self, block: StorageBlock) {
        if let Ok(mut live) = self.live.lock() {
            if live.remove(&block.id).is_none() {
                tracing::error!(id = block.id, "Freeing unknown storage block");
            }
        }
    }
}
