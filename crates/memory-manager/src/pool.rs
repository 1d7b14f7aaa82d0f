// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budgeted arena for tensor buffers.
//!
//! The [`MemoryPool`] is the only place the runtime obtains tensor memory:
//!
//! 1. Requests that would push live bytes past the budget fail with
//!    [`MemoryError::OutOfMemory`]; nothing is returned half-built.
//! 2. Returned buffers are kept on a free list keyed by their exact block
//!    count. A compiled schedule requests the same sizes on every run, so the
//!    second inference is served entirely from the list.
//! 3. Every event is counted in [`AllocationStats`].
//!
//! `MemoryPool` is a cheap handle: clones share the same arena.

use crate::guard::{blocks_for, Block};
use crate::{AlignedBuffer, AllocationStats, MemoryBudget, MemoryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Arena state shared between the pool handle and every live buffer.
pub(crate) struct PoolInner {
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    /// block count → returned block vectors of exactly that length.
    free_buffers: Mutex<HashMap<usize, Vec<Vec<Block>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    /// Called by `AlignedBuffer::drop`.
    pub(crate) fn return_buffer(&self, blocks: Vec<Block>, size_bytes: usize) {
        self.allocated_bytes.fetch_sub(size_bytes, Ordering::AcqRel);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_deallocation();
        }

        let held = blocks.len() * std::mem::size_of::<Block>();
        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(blocks.len()).or_default().push(blocks);
            self.free_list_bytes.fetch_add(held, Ordering::AcqRel);
        }
    }

    fn take_cached(&self, block_count: usize) -> Option<Vec<Block>> {
        let mut free = self.free_buffers.lock().ok()?;
        let mut blocks = free.get_mut(&block_count)?.pop()?;
        self.free_list_bytes
            .fetch_sub(block_count * std::mem::size_of::<Block>(), Ordering::AcqRel);
        blocks.fill(Block([0; 16]));
        Some(blocks)
    }
}

/// The tensor buffer allocator.
///
/// # Example
/// ```
/// use memory_manager::{MemoryBudget, MemoryPool};
///
/// let pool = MemoryPool::new(MemoryBudget::from_kb(64));
/// let buf = pool.allocate(1000).unwrap();
/// assert_eq!(buf.as_ptr() as usize % 16, 0);
/// assert_eq!(pool.allocated_bytes(), 1000);
/// drop(buf);
/// assert_eq!(pool.allocated_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Creates an arena with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                budget,
                allocated_bytes: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner>) -> Self {
        Self { inner }
    }

    /// Creates an arena without a ceiling.
    pub fn unbounded() -> Self {
        Self::new(MemoryBudget::unlimited())
    }

    /// Allocates a zeroed, 16-byte aligned buffer of `size_bytes`.
    pub fn allocate(&self, size_bytes: usize) -> Result<AlignedBuffer, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let current = self.inner.allocated_bytes.load(Ordering::Acquire);
        let budget = self.inner.budget.as_bytes();
        if current.saturating_add(size_bytes) > budget {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_oom();
            }
            tracing::warn!(
                "arena exhausted: requested {size_bytes} bytes with {current} of {budget} in use"
            );
            return Err(MemoryError::OutOfMemory {
                requested_bytes: size_bytes,
                available_bytes: budget.saturating_sub(current),
                budget_bytes: budget,
            });
        }

        let block_count = blocks_for(size_bytes);
        let cached = self.inner.take_cached(block_count);
        let is_hit = cached.is_some();
        let blocks = cached.unwrap_or_else(|| vec![Block([0; 16]); block_count]);

        let live = self
            .inner
            .allocated_bytes
            .fetch_add(size_bytes, Ordering::AcqRel)
            + size_bytes;

        if let Ok(mut stats) = self.inner.stats.lock() {
            if is_hit {
                stats.record_cache_hit(size_bytes);
            } else {
                stats.record_cache_miss(size_bytes);
            }
            stats.update_peak(live);
        }

        Ok(AlignedBuffer::new(blocks, Arc::clone(&self.inner), size_bytes))
    }

    /// Live bytes (handed out, not yet returned).
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Bytes remaining before the budget is hit.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    /// The arena budget.
    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Snapshot of the arena statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drops every cached free buffer.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            free.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
    }

    /// Bytes held on the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("free_list_bytes", &self.free_list_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_drop() {
        let pool = MemoryPool::new(MemoryBudget::from_kb(4));
        let buf = pool.allocate(100).unwrap();
        assert_eq!(buf.size_bytes(), 100);
        assert_eq!(buf.as_slice().len(), 100);
        assert_eq!(pool.allocated_bytes(), 100);
        drop(buf);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.stats().total_deallocations, 1);
    }

    #[test]
    fn test_alignment() {
        let pool = MemoryPool::unbounded();
        for size in [1, 3, 16, 17, 255, 4096] {
            let buf = pool.allocate(size).unwrap();
            assert_eq!(buf.as_ptr() as usize % 16, 0, "size {size}");
        }
    }

    #[test]
    fn test_zeroed_and_writable() {
        let pool = MemoryPool::unbounded();
        let mut buf = pool.allocate(33).unwrap();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        buf.as_mut_slice()[32] = 7;
        assert_eq!(buf.as_slice()[32], 7);
    }

    #[test]
    fn test_out_of_memory() {
        let pool = MemoryPool::new(MemoryBudget::from_bytes(256));
        let _a = pool.allocate(200).unwrap();
        let err = pool.allocate(100).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::OutOfMemory {
                requested_bytes: 100,
                available_bytes: 56,
                budget_bytes: 256
            }
        ));
        assert_eq!(pool.stats().oom_count, 1);
    }

    #[test]
    fn test_zero_sized() {
        let pool = MemoryPool::unbounded();
        assert!(matches!(
            pool.allocate(0),
            Err(MemoryError::ZeroSizedAllocation)
        ));
    }

    #[test]
    fn test_free_list_reuse_is_zeroed() {
        let pool = MemoryPool::unbounded();
        let mut buf = pool.allocate(64).unwrap();
        buf.as_mut_slice().fill(0xAB);
        drop(buf);
        assert_eq!(pool.free_list_bytes(), 64);

        let again = pool.allocate(64).unwrap();
        assert!(again.as_slice().iter().all(|&b| b == 0));
        assert_eq!(pool.free_list_bytes(), 0);

        let stats = pool.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_different_size_is_a_miss() {
        let pool = MemoryPool::unbounded();
        drop(pool.allocate(64).unwrap());
        let _b = pool.allocate(128).unwrap();
        assert_eq!(pool.stats().cache_hits, 0);
    }

    #[test]
    fn test_shrink() {
        let pool = MemoryPool::unbounded();
        drop(pool.allocate(1024).unwrap());
        assert!(pool.free_list_bytes() > 0);
        pool.shrink();
        assert_eq!(pool.free_list_bytes(), 0);
    }

    #[test]
    fn test_clones_share_arena() {
        let pool = MemoryPool::new(MemoryBudget::from_kb(1));
        let handle = pool.clone();
        let _buf = handle.allocate(512).unwrap();
        assert_eq!(pool.allocated_bytes(), 512);
        assert_eq!(pool.available_bytes(), 512);
    }

    #[test]
    fn test_buffer_knows_its_pool() {
        let pool = MemoryPool::new(MemoryBudget::from_kb(1));
        let buf = pool.allocate(100).unwrap();
        let again = buf.pool().allocate(100).unwrap();
        assert_eq!(pool.allocated_bytes(), 200);
        drop(again);
        drop(buf);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_peak() {
        let pool = MemoryPool::unbounded();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(200).unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().peak_allocated_bytes, 300);
    }
}
