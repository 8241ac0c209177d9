// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # subgraph-ir
//!
//! The read-only contract between the upstream partitioning compiler and
//! the orchestration core:
//!
//! - [`Submodel`] — one descriptor per subgraph slot: compiled handle,
//!   function-call target, weight closure, spatial execution plan, and the
//!   device preference cursor.
//! - [`PartitionedModel`] — the submodel list plus the four global link
//!   tables, with a **type-state pattern** (`Assembled` → `Verified`) so the
//!   runtime can only ever see a validated model.
//! - [`SubgraphCompiler`] — the recompile callback used by device failover.
//!
//! The partitioner emits submodels in topological order; validation enforces
//! that, and every other structural invariant of the descriptor set, once,
//! up front.

mod error;
pub mod model;
mod submodel;

pub use error::GraphError;
pub use model::{Assembled, ModelState, PartitionedModel, SubgraphCompiler, Verified};
pub use submodel::{HostGather, Spatial, SpatialParam, Submodel};
