// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slice-wise execution of spatial function bodies.
//!
//! A spatial body is compiled for exactly `nway` elements along one
//! designated axis. The executor covers the full range like this:
//!
//! ```text
//! |<- - - - full range  - - - ->|
//! +------+------+------+------+-+
//! | nway | nway | nway | nway | |
//! +------+------+------+------+-+
//!                              ^tail
//! ```
//!
//! Full slices bind views of the staged full-range tensors directly, so
//! their outputs land in place. The tail (if any) is staged through
//! preallocated `nway`-sized buffers and copied back, because the body
//! always produces a full block.

use crate::RuntimeError;
use device_api::{InferRequest, Port};
use std::sync::RwLock;
use subgraph_ir::Spatial;
use tensor_host::Tensor;

/// Staged spatial inputs/outputs for one function body.
///
/// The full-range input and output slots are rewritten on every call by the
/// prologue and the global-parameter pass — possibly from the prepare-next
/// worker while the spatial loop runs — so they sit behind locks and the
/// executor snapshots them at entry. Tail buffers are allocated once at
/// construction and never replaced.
pub(crate) struct SpatialIo {
    pub inputs: Vec<RwLock<Option<Tensor>>>,
    pub input_tails: Vec<Option<Tensor>>,
    pub outputs: Vec<RwLock<Option<Tensor>>>,
    pub output_tails: Vec<Option<Tensor>>,
}

impl SpatialIo {
    /// A placeholder for non-spatial slots.
    pub fn empty() -> Self {
        Self {
            inputs: Vec::new(),
            input_tails: Vec::new(),
            outputs: Vec::new(),
            output_tails: Vec::new(),
        }
    }

    /// Allocates staging slots for a body with `param_base` activation
    /// inputs and `num_outputs` outputs.
    pub fn for_body(param_base: usize, num_outputs: usize) -> Self {
        Self {
            inputs: (0..param_base).map(|_| RwLock::new(None)).collect(),
            input_tails: vec![None; param_base],
            outputs: (0..num_outputs).map(|_| RwLock::new(None)).collect(),
            output_tails: vec![None; num_outputs],
        }
    }

    pub fn is_unallocated(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Stages the full-range tensor for input `idx`.
    pub fn stage_input(&self, idx: usize, tensor: Tensor) {
        *self.inputs[idx].write().expect("spatial slot poisoned") = Some(tensor);
    }

    /// Stages the full-range tensor for output `idx`.
    pub fn stage_output(&self, idx: usize, tensor: Tensor) {
        *self.outputs[idx].write().expect("spatial slot poisoned") = Some(tensor);
    }

    fn staged_input(&self, idx: usize) -> Option<Tensor> {
        self.inputs[idx].read().expect("spatial slot poisoned").clone()
    }

    fn staged_output(&self, idx: usize) -> Option<Tensor> {
        self.outputs[idx].read().expect("spatial slot poisoned").clone()
    }
}

/// Runs one spatial body over its full range.
///
/// All staged inputs and outputs must be in place; the request's bindings
/// are rewritten per slice.
pub(crate) fn run_spatial(
    request: &dyn InferRequest,
    spatial: &Spatial,
    io: &SpatialIo,
    num_outputs: usize,
    subgraph: usize,
) -> Result<(), RuntimeError> {
    let device_err = |e| RuntimeError::Subgraph {
        subgraph,
        source: e,
    };
    let unstaged = |what: String| RuntimeError::Spatial {
        subgraph,
        detail: what,
    };

    // Snapshot the staged slots once: the prepare-next worker may rewrite
    // them while the loop below runs.
    let mut inputs: Vec<Option<Tensor>> = vec![None; io.inputs.len()];
    for p in &spatial.params {
        inputs[p.idx] = Some(
            io.staged_input(p.idx)
                .ok_or_else(|| unstaged(format!("input {} not staged", p.idx)))?,
        );
    }
    let mut outputs = Vec::with_capacity(num_outputs);
    for j in 0..num_outputs {
        outputs.push(
            io.staged_output(j)
                .ok_or_else(|| unstaged(format!("output {j} not staged")))?,
        );
    }

    // Full slices: bind views, run in place.
    let mut offset = 0usize;
    for _ in 0..spatial.nway_iters {
        for p in &spatial.params {
            let input = inputs[p.idx].as_ref().expect("snapshotted above");
            let slice = input.view(p.dim, offset, spatial.nway)?;
            request
                .set_tensor(Port::Input(p.idx), slice)
                .map_err(device_err)?;
        }
        for (j, output) in outputs.iter().enumerate() {
            let slice = output.view(spatial.out_dim, offset, spatial.nway)?;
            request
                .set_tensor(Port::Output(j), slice)
                .map_err(device_err)?;
        }
        request.infer().map_err(device_err)?;
        offset += spatial.nway;
    }

    // Tail: stage a full nway block, run, copy the meaningful prefix back.
    if spatial.tail_size > 0 {
        for p in &spatial.params {
            let input = inputs[p.idx].as_ref().expect("snapshotted above");
            let tail_buf = io.input_tails[p.idx]
                .clone()
                .ok_or_else(|| unstaged(format!("input tail {} missing", p.idx)))?;
            let src = input.view(p.dim, offset, spatial.tail_size)?;
            let dst = tail_buf.view(p.dim, 0, spatial.tail_size)?;
            src.copy_to(&dst)?;
            request
                .set_tensor(Port::Input(p.idx), tail_buf)
                .map_err(device_err)?;
        }
        for j in 0..num_outputs {
            let tail_buf = io.output_tails[j]
                .clone()
                .ok_or_else(|| unstaged(format!("output tail {j} missing")))?;
            request
                .set_tensor(Port::Output(j), tail_buf)
                .map_err(device_err)?;
        }

        request.infer().map_err(device_err)?;

        for (j, output) in outputs.iter().enumerate() {
            let tail_buf = io.output_tails[j].as_ref().expect("checked above");
            let src = tail_buf.view(spatial.out_dim, 0, spatial.tail_size)?;
            let dst = output.view(spatial.out_dim, offset, spatial.tail_size)?;
            src.copy_to(&dst)?;
        }
    }

    Ok(())
}
