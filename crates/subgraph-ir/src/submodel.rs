// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-subgraph descriptors.
//!
//! A [`Submodel`] describes one slot of the partitioned model. Slots come in
//! three flavours:
//!
//! - **normal** — `replaced_by` is `None`; the slot owns its compiled body.
//! - **function body** — `replaced_by` points at itself; the slot owns the
//!   compiled body *and* is the first call site of it.
//! - **function call** — `replaced_by` points at an earlier body; the slot
//!   borrows that body's request and supplies its own weight closure.
//! - **optimized out** — neither compiled nor a call; skipped entirely.
//!
//! The compiled handle and the device cursor are interior-mutable: failover
//! recompiles a body in place, and several orchestrators may share one model.

use device_api::CompiledSubgraph;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tensor_host::Tensor;

/// One spatial input parameter: which input, and which axis gets sliced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialParam {
    /// Input index on the compiled body.
    pub idx: usize,
    /// The sliced axis of that input.
    pub dim: usize,
}

/// Slice-wise execution plan for a body compiled to a fixed block width.
///
/// The body processes exactly `nway` elements along the designated axis per
/// inference; the executor fans `range` across `nway_iters` full slices plus
/// a `tail_size` remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spatial {
    /// The spatial inputs (non-spatial inputs are bound whole).
    pub params: Vec<SpatialParam>,
    /// The sliced axis of every output.
    pub out_dim: usize,
    /// Full extent to cover.
    pub range: usize,
    /// Block width the body was compiled for.
    pub nway: usize,
    /// Number of full blocks.
    pub nway_iters: usize,
    /// Remainder (`< nway`); zero when `nway` divides `range`.
    pub tail_size: usize,
}

impl Spatial {
    /// Builds a plan covering `range` in `nway`-wide blocks.
    pub fn over(params: Vec<SpatialParam>, out_dim: usize, range: usize, nway: usize) -> Self {
        Self {
            params,
            out_dim,
            range,
            nway,
            nway_iters: range / nway,
            tail_size: range % nway,
        }
    }
}

/// Host-side embedding lookup performed during parameter binding.
///
/// Rows of the vocabulary closure slot (`src_idx`) selected by the tensor
/// bound at input `idx_idx` are gathered into the destination closure slot
/// (`dst_idx`). `dst_idx` and `src_idx` are absolute input indices, at or
/// beyond `param_base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGather {
    pub dst_idx: usize,
    pub src_idx: usize,
    pub idx_idx: usize,
}

/// Descriptor of one subgraph slot.
pub struct Submodel {
    compiled: RwLock<Option<Arc<dyn CompiledSubgraph>>>,
    /// Body slot this call reuses; `Some(self)` marks a function body.
    pub replaced_by: Option<usize>,
    /// Number of activation inputs; inputs beyond this are closure slots.
    pub param_base: usize,
    /// Host-side weight tensor per closure slot.
    pub closure: Vec<Tensor>,
    /// Dequantisation scales aligned with `closure`.
    pub scales: Vec<Option<Tensor>>,
    /// Dequantisation zero-points aligned with `closure`.
    pub zerops: Vec<Option<Tensor>>,
    /// Whether the slot's device tensor must be rewritten each inference.
    pub update_required: Vec<bool>,
    /// Optional host-side embedding lookup.
    pub host_gather: Option<HostGather>,
    /// Optional slice-wise execution plan (function bodies only).
    pub spatial: Option<Spatial>,
    devices: Vec<String>,
    device_cursor: AtomicUsize,
}

impl Submodel {
    /// Creates a descriptor owning a compiled subgraph.
    pub fn new(compiled: Arc<dyn CompiledSubgraph>, devices: Vec<String>) -> Self {
        Self {
            compiled: RwLock::new(Some(compiled)),
            replaced_by: None,
            param_base: 0,
            closure: Vec::new(),
            scales: Vec::new(),
            zerops: Vec::new(),
            update_required: Vec::new(),
            host_gather: None,
            spatial: None,
            devices,
            device_cursor: AtomicUsize::new(0),
        }
    }

    /// Creates a slot that was optimized out by the partitioner.
    pub fn optimized_out() -> Self {
        Self {
            compiled: RwLock::new(None),
            replaced_by: None,
            param_base: 0,
            closure: Vec::new(),
            scales: Vec::new(),
            zerops: Vec::new(),
            update_required: Vec::new(),
            host_gather: None,
            spatial: None,
            devices: Vec::new(),
            device_cursor: AtomicUsize::new(0),
        }
    }

    /// Creates a function-call slot reusing `body`'s compiled subgraph.
    pub fn call_of(body: usize, param_base: usize) -> Self {
        let mut sm = Self::optimized_out();
        sm.replaced_by = Some(body);
        sm.param_base = param_base;
        sm
    }

    /// Marks this slot as a function body (its own first call site).
    pub fn as_body(mut self, own_index: usize, param_base: usize) -> Self {
        self.replaced_by = Some(own_index);
        self.param_base = param_base;
        self
    }

    /// Attaches a spatial execution plan.
    pub fn with_spatial(mut self, spatial: Spatial) -> Self {
        self.spatial = Some(spatial);
        self
    }

    /// Attaches a host-gather step.
    pub fn with_host_gather(mut self, gather: HostGather) -> Self {
        self.host_gather = Some(gather);
        self
    }

    /// Appends one closure slot.
    pub fn push_closure(
        &mut self,
        weights: Tensor,
        scale: Option<Tensor>,
        zerop: Option<Tensor>,
        update_required: bool,
    ) {
        self.closure.push(weights);
        self.scales.push(scale);
        self.zerops.push(zerop);
        self.update_required.push(update_required);
    }

    /// Returns the compiled subgraph, if the slot has one.
    pub fn compiled(&self) -> Option<Arc<dyn CompiledSubgraph>> {
        self.compiled.read().expect("compiled lock poisoned").clone()
    }

    /// Replaces the compiled subgraph (failover recompilation).
    pub fn set_compiled(&self, compiled: Arc<dyn CompiledSubgraph>) {
        *self.compiled.write().expect("compiled lock poisoned") = Some(compiled);
    }

    /// `true` for function calls and bodies alike.
    pub fn is_funcall(&self) -> bool {
        self.replaced_by.is_some()
    }

    /// `true` when the partitioner removed this slot entirely.
    pub fn is_optimized_out(&self) -> bool {
        self.compiled().is_none() && self.replaced_by.is_none()
    }

    /// The device preference list.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// The device the cursor currently points at.
    pub fn current_device(&self) -> Option<String> {
        self.devices
            .get(self.device_cursor.load(Ordering::SeqCst))
            .cloned()
    }

    /// Advances the cursor one preference; never rewinds.
    pub fn advance_device(&self) -> Option<String> {
        let next = self.device_cursor.fetch_add(1, Ordering::SeqCst) + 1;
        self.devices.get(next).cloned()
    }

    /// Position of the cursor in the preference list.
    pub fn device_position(&self) -> usize {
        self.device_cursor.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Submodel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submodel")
            .field("compiled", &self.compiled().is_some())
            .field("replaced_by", &self.replaced_by)
            .field("param_base", &self.param_base)
            .field("closure_slots", &self.closure.len())
            .field("spatial", &self.spatial.is_some())
            .field("device", &self.current_device())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_over() {
        let s = Spatial::over(vec![SpatialParam { idx: 0, dim: 1 }], 1, 10, 4);
        assert_eq!(s.nway_iters, 2);
        assert_eq!(s.tail_size, 2);

        let exact = Spatial::over(vec![], 0, 8, 4);
        assert_eq!(exact.nway_iters, 2);
        assert_eq!(exact.tail_size, 0);
    }

    #[test]
    fn test_device_cursor_advances_forward_only() {
        let mut sm = Submodel::optimized_out();
        sm.devices = vec!["NPU".into(), "GPU".into(), "CPU".into()];

        assert_eq!(sm.current_device().as_deref(), Some("NPU"));
        assert_eq!(sm.advance_device().as_deref(), Some("GPU"));
        assert_eq!(sm.advance_device().as_deref(), Some("CPU"));
        assert_eq!(sm.advance_device(), None);
        assert_eq!(sm.current_device(), None);
        assert_eq!(sm.device_position(), 3);
    }

    #[test]
    fn test_slot_flavours() {
        let opt = Submodel::optimized_out();
        assert!(opt.is_optimized_out());
        assert!(!opt.is_funcall());

        let call = Submodel::call_of(0, 2);
        assert!(call.is_funcall());
        assert!(!call.is_optimized_out());
        assert_eq!(call.replaced_by, Some(0));
        assert_eq!(call.param_base, 2);
    }

    #[test]
    fn test_push_closure_keeps_arity() {
        let mut sm = Submodel::call_of(0, 1);
        sm.push_closure(
            Tensor::zeros(tensor_host::Shape::vector(4), tensor_host::DType::I8),
            None,
            None,
            true,
        );
        assert_eq!(sm.closure.len(), 1);
        assert_eq!(sm.scales.len(), 1);
        assert_eq!(sm.zerops.len(), 1);
        assert_eq!(sm.update_required.len(), 1);
    }
}
