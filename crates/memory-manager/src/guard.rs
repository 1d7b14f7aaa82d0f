// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII aligned buffer that returns itself to the arena on drop.
//!
//! The backing store is a `Vec` of 16-byte blocks, so the first byte is
//! always 16-byte aligned. That is the alignment the KPU DMA path and the
//! tensor `cstep` rule rely on.

use crate::pool::PoolInner;
use crate::MemoryPool;
use std::sync::Arc;

/// Alignment guaranteed for every buffer handed out by the arena.
pub const BUFFER_ALIGN: usize = 16;

/// One 16-byte, 16-aligned storage unit.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
pub(crate) struct Block(pub(crate) [u8; BUFFER_ALIGN]);

// SAFETY: `Block` is a plain byte array; size equals alignment so there is
// no padding, and every bit pattern is valid.
unsafe impl bytemuck::Zeroable for Block {}
unsafe impl bytemuck::Pod for Block {}

/// Number of blocks needed to hold `size_bytes`.
pub(crate) fn blocks_for(size_bytes: usize) -> usize {
    size_bytes.div_ceil(BUFFER_ALIGN)
}

/// An aligned, zero-initialised byte buffer owned by a [`MemoryPool`](crate::MemoryPool).
///
/// Dropping the buffer returns it to the pool's free list and decrements the
/// live-byte counter.
pub struct AlignedBuffer {
    blocks: Option<Vec<Block>>,
    pool: Arc<PoolInner>,
    size_bytes: usize,
}

impl AlignedBuffer {
    pub(crate) fn new(blocks: Vec<Block>, pool: Arc<PoolInner>, size_bytes: usize) -> Self {
        debug_assert!(blocks.len() * BUFFER_ALIGN >= size_bytes);
        Self {
            blocks: Some(blocks),
            pool,
            size_bytes,
        }
    }

    /// The requested size in bytes (the block tail beyond it is not exposed).
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Read-only view of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        match &self.blocks {
            Some(blocks) => &bytemuck::cast_slice::<Block, u8>(blocks)[..self.size_bytes],
            None => &[],
        }
    }

    /// Mutable view of the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let size = self.size_bytes;
        match &mut self.blocks {
            Some(blocks) => &mut bytemuck::cast_slice_mut::<Block, u8>(blocks)[..size],
            None => &mut [],
        }
    }

    /// A handle to the arena this buffer came from.
    pub fn pool(&self) -> MemoryPool {
        MemoryPool::from_inner(Arc::clone(&self.pool))
    }

    /// Address of the first byte, for alignment assertions in tests and
    /// for logging device-visible buffers.
    pub fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if let Some(blocks) = self.blocks.take() {
            self.pool.return_buffer(blocks, self.size_bytes);
        }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("size_bytes", &self.size_bytes)
            .field("has_data", &self.blocks.is_some())
            .finish()
    }
}
