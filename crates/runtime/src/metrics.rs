// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline execution metrics.
//!
//! [`PipelineMetrics`] aggregates per-subgraph wall time and failover counts
//! across inferences. Device-level profiling records are separate — see
//! `SubgraphPipeline::profiling_info`.

use std::time::Duration;

/// Aggregate metrics for the pipeline.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineMetrics {
    /// Wall-clock time of the most recent inference.
    pub total_duration: Duration,
    /// Accumulated execution time per subgraph slot.
    pub subgraph_durations: Vec<Duration>,
    /// Device failovers taken since construction.
    pub failovers: usize,
    /// Completed inferences since construction.
    pub inferences: usize,
}

impl PipelineMetrics {
    /// Creates an empty container for `num_subgraphs` slots.
    pub fn new(num_subgraphs: usize) -> Self {
        Self {
            total_duration: Duration::ZERO,
            subgraph_durations: vec![Duration::ZERO; num_subgraphs],
            failovers: 0,
            inferences: 0,
        }
    }

    /// Adds one subgraph step's execution time.
    pub fn record_subgraph(&mut self, idx: usize, duration: Duration) {
        if let Some(slot) = self.subgraph_durations.get_mut(idx) {
            *slot += duration;
        }
    }

    /// Counts one device failover.
    pub fn record_failover(&mut self) {
        self.failovers += 1;
    }

    /// Completes one inference with its wall-clock time.
    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total;
        self.inferences += 1;
    }

    /// Index of the slowest subgraph so far, if any ran.
    pub fn slowest_subgraph(&self) -> Option<usize> {
        self.subgraph_durations
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_zero())
            .max_by_key(|(_, d)| **d)
            .map(|(i, _)| i)
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let busy: Duration = self.subgraph_durations.iter().sum();
        format!(
            "Inference: {:.2}ms total, {:.2}ms in {} subgraphs, {} inference(s), {} failover(s)",
            self.total_duration.as_secs_f64() * 1000.0,
            busy.as_secs_f64() * 1000.0,
            self.subgraph_durations.iter().filter(|d| !d.is_zero()).count(),
            self.inferences,
            self.failovers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_finalise() {
        let mut m = PipelineMetrics::new(3);
        m.record_subgraph(0, Duration::from_millis(5));
        m.record_subgraph(2, Duration::from_millis(9));
        m.record_subgraph(2, Duration::from_millis(1));
        m.finalise(Duration::from_millis(20));

        assert_eq!(m.subgraph_durations[2], Duration::from_millis(10));
        assert_eq!(m.inferences, 1);
        assert_eq!(m.slowest_subgraph(), Some(2));
    }

    #[test]
    fn test_out_of_range_record_is_ignored() {
        let mut m = PipelineMetrics::new(1);
        m.record_subgraph(5, Duration::from_millis(1));
        assert_eq!(m.subgraph_durations.len(), 1);
    }

    #[test]
    fn test_summary_format() {
        let mut m = PipelineMetrics::new(2);
        m.record_subgraph(0, Duration::from_millis(3));
        m.record_failover();
        m.finalise(Duration::from_millis(7));

        let s = m.summary();
        assert!(s.contains("Inference:"));
        assert!(s.contains("1 failover"));
    }

    #[test]
    fn test_empty_metrics() {
        let m = PipelineMetrics::new(2);
        assert_eq!(m.slowest_subgraph(), None);
        assert_eq!(m.inferences, 0);
    }
}
