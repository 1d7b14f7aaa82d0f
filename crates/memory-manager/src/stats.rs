// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arena statistics.
//!
//! The counters double as the leak check for tensor ownership: after a
//! graph step finishes, `live_buffers()` must be back where it started.

/// Cumulative statistics about arena usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocationStats {
    /// Total number of allocation requests, successful or not.
    pub total_allocations: u64,
    /// Allocations served from the free list.
    pub cache_hits: u64,
    /// Allocations that required fresh memory.
    pub cache_misses: u64,
    /// Requests rejected because the budget was exhausted.
    pub oom_count: u64,
    /// High-water mark of live bytes.
    pub peak_allocated_bytes: usize,
    /// Total bytes ever handed out.
    pub cumulative_allocated_bytes: u64,
    /// Buffers returned to the arena.
    pub total_deallocations: u64,
}

impl AllocationStats {
    /// Returns the free-list hit ratio in `[0.0, 1.0]`, or `0.0` before the
    /// first allocation.
    pub fn cache_hit_ratio(&self) -> f64 {
        let served = self.cache_hits + self.cache_misses;
        if served == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / served as f64
    }

    /// Number of buffers currently handed out and not yet returned.
    pub fn live_buffers(&self) -> u64 {
        (self.cache_hits + self.cache_misses).saturating_sub(self.total_deallocations)
    }

    pub(crate) fn record_cache_hit(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_hits += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_cache_miss(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_misses += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_deallocation(&mut self) {
        self.total_deallocations += 1;
    }

    pub(crate) fn update_peak(&mut self, current_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(current_bytes);
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} buffers ({} reused, {:.0}% hit rate), {} live, {} OOMs, peak {:.1} KB",
            self.total_allocations,
            self.cache_hits,
            self.cache_hit_ratio() * 100.0,
            self.live_buffers(),
            self.oom_count,
            self.peak_allocated_bytes as f64 / 1024.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = AllocationStats::default();
        assert_eq!(s.total_allocations, 0);
        assert_eq!(s.live_buffers(), 0);
        assert_eq!(s.cache_hit_ratio(), 0.0);
    }

    #[test]
    fn test_live_buffers() {
        let mut s = AllocationStats::default();
        s.record_cache_miss(64);
        s.record_cache_miss(64);
        s.record_oom();
        assert_eq!(s.live_buffers(), 2);
        s.record_deallocation();
        assert_eq!(s.live_buffers(), 1);
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut s = AllocationStats::default();
        s.update_peak(300);
        s.update_peak(100);
        assert_eq!(s.peak_allocated_bytes, 300);
    }

    #[test]
    fn test_summary() {
        let mut s = AllocationStats::default();
        s.record_cache_miss(2048);
        s.record_cache_hit(2048);
        s.update_peak(2048);
        let line = s.summary();
        assert!(line.contains("2 buffers"));
        assert!(line.contains("1 reused"));
        assert!(line.contains("peak 2.0 KB"));
    }
}
