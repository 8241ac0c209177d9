// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The orchestration core that turns a partitioned model into a correct,
//! memory-efficient, failure-tolerant inference execution.
//!
//! [`SubgraphPipeline`] walks the subgraphs in index order and, per step:
//!
//! 1. Binds global results and runs the function-call prologue (activation
//!    wiring, closure resolution, output placement).
//! 2. Runs the subgraph — slice-wise for spatial bodies — while preparing
//!    the *next* subgraph ("run and prepare next", with optional funcall
//!    pipelining on double-buffered subrequests).
//! 3. On an infer failure, advances the device cursor, recompiles, rebuilds
//!    the subrequest and re-wires before retrying.
//!
//! The pipeline itself is synchronous on the calling thread; asynchrony is
//! confined to the device driver's `start_async`/`wait` pair, a scoped
//! worker used by spatial bodies, and rayon parallel-for sites for copies
//! and closure unpacking.

mod closure;
mod config;
mod engine;
mod error;
mod metrics;
mod spatial;
mod wiring;

pub use config::{is_set, RuntimeConfig};
pub use engine::SubgraphPipeline;
pub use error::RuntimeError;
pub use metrics::PipelineMetrics;
