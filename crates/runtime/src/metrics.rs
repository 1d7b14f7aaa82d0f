// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Inference profiling metrics.
//!
//! [`InferenceMetrics`] collects per-node compute time and arena usage for
//! one `compute()` call.

use std::time::Duration;

/// Metrics for a single node's execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeMetrics {
    pub node_name: String,
    pub compute_duration: Duration,
    /// Live arena bytes right after the node finished.
    pub arena_bytes: usize,
}

/// Aggregate metrics for a complete inference run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InferenceMetrics {
    /// Wall-clock time of the whole run, allocation included.
    pub total_duration: Duration,
    /// Sum of node compute times.
    pub total_compute_duration: Duration,
    /// Arena high-water mark over the run.
    pub peak_memory_bytes: usize,
    pub node_metrics: Vec<NodeMetrics>,
}

impl InferenceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records metrics for a single node.
    pub fn record_node(&mut self, name: &str, compute: Duration, arena_bytes: usize) {
        self.total_compute_duration += compute;
        self.peak_memory_bytes = self.peak_memory_bytes.max(arena_bytes);
        self.node_metrics.push(NodeMetrics {
            node_name: name.to_string(),
            compute_duration: compute,
            arena_bytes,
        });
    }

    /// Finalises metrics with the total wall-clock time and the arena's
    /// high-water mark.
    pub fn finalise(&mut self, total: Duration, peak_memory_bytes: usize) {
        self.total_duration = total;
        self.peak_memory_bytes = self.peak_memory_bytes.max(peak_memory_bytes);
    }

    /// The slowest node, if any ran.
    pub fn slowest_node(&self) -> Option<&NodeMetrics> {
        self.node_metrics.iter().max_by_key(|n| n.compute_duration)
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let overhead = self.total_duration.saturating_sub(self.total_compute_duration);
        format!(
            "Inference: {:.3}ms total, {} nodes, {:.3}ms compute, {:.3}ms overhead, peak {:.1} KB",
            self.total_duration.as_secs_f64() * 1000.0,
            self.node_metrics.len(),
            self.total_compute_duration.as_secs_f64() * 1000.0,
            overhead.as_secs_f64() * 1000.0,
            self.peak_memory_bytes as f64 / 1024.0,
        )
    }
}
