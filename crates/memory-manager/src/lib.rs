// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! A budgeted arena of 16-byte aligned buffers backing every RAM tensor of
//! the inference runtime.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: the ceiling on live bytes, parsed from `"2M"`, `"512K"`.
//! - [`MemoryPool`]: the allocator. Enforces the budget, keeps returned
//!   buffers on a free list keyed by block count, tracks statistics.
//! - [`AlignedBuffer`]: an RAII buffer. Dropping it returns the storage to
//!   the pool.
//! - [`AllocationStats`]: cumulative counters (peak, hit ratio, OOMs).
//!
//! # Ownership Model
//!
//! ```text
//! MemoryPool::allocate(size)
//!       │
//!       ▼
//!   AlignedBuffer  ◄─── owns Vec<Block>, holds Arc<PoolInner>
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::return_buffer()  ──► free list
//! ```
//!
//! Tensors wrap an `AlignedBuffer` in an `Arc`, so the buffer goes back to
//! the arena exactly when the last tensor view sharing it is released.
//!
//! # Example
//! ```
//! use memory_manager::{MemoryBudget, MemoryPool, BUFFER_ALIGN};
//!
//! let pool = MemoryPool::new(MemoryBudget::from_mb(2));
//! let a = pool.allocate(3 * 224 * 224).unwrap();
//! assert_eq!(a.as_ptr() as usize % BUFFER_ALIGN, 0);
//! drop(a);
//! assert_eq!(pool.allocated_bytes(), 0);
//! ```

mod budget;
mod error;
mod guard;
mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::{AlignedBuffer, BUFFER_ALIGN};
pub use pool::MemoryPool;
pub use stats::AllocationStats;
