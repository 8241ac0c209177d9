// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The partitioned model: submodels plus global link tables.
//!
//! # Type-State Pattern
//!
//! The model transitions through states enforced at compile time:
//!
//! ```text
//! PartitionedModel<Assembled>  — tables filled in, nothing checked.
//!       │  .validate()
//!       ▼
//! PartitionedModel<Verified>   — invariants hold, safe to orchestrate.
//! ```
//!
//! The runtime only accepts `Verified` models, so a malformed link table can
//! never reach the wiring pass. The transition consumes the old state and
//! returns the new one; the markers are zero-sized.

use crate::{GraphError, Submodel};
use device_api::{CompiledSubgraph, DeviceError, PortDesc, WeightsBank};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: model has been assembled but not validated.
#[derive(Debug, Clone)]
pub struct Assembled;

/// Marker: model invariants have been verified.
#[derive(Debug, Clone)]
pub struct Verified;

/// Sealed trait for model states.
pub trait ModelState: fmt::Debug {}
impl ModelState for Assembled {}
impl ModelState for Verified {}

/// Recompile callback provided by the upstream partitioning compiler.
pub trait SubgraphCompiler: Send + Sync {
    /// Compiles subgraph `sub_idx` for `device`.
    fn compile(
        &self,
        sub_idx: usize,
        device: &str,
    ) -> Result<Arc<dyn CompiledSubgraph>, DeviceError>;
}

// ── PartitionedModel ───────────────────────────────────────────────

/// The compiled model decomposed into an ordered list of subgraphs.
///
/// Link tables are produced by the partitioner and consumed read-only by
/// the orchestrator:
///
/// - `inputs_to_submodel_inputs[g]` — primary consumer of global input `g`.
/// - `param_subscribers[g]` — further consumers of global input `g`.
/// - `outputs_to_submodel_outputs[g]` — producer of global output `g`.
/// - `submodels_input_to_prev_output[(to, in)]` — inter-subgraph edges.
pub struct PartitionedModel<S: ModelState = Verified> {
    /// Human-readable model name.
    pub name: String,
    /// Ordered subgraph descriptors.
    pub submodels: Vec<Submodel>,
    /// Global input ports.
    pub inputs: Vec<PortDesc>,
    /// Global output ports.
    pub outputs: Vec<PortDesc>,
    /// Global input → (subgraph, input); `None` when unlinked.
    pub inputs_to_submodel_inputs: Vec<Option<(usize, usize)>>,
    /// Global input → additional (subgraph, input) subscribers.
    pub param_subscribers: BTreeMap<usize, Vec<(usize, usize)>>,
    /// Global output → producing (subgraph, output). Bound in ascending
    /// global order via [`PartitionedModel::bind_output`].
    pub outputs_to_submodel_outputs: Vec<(usize, usize)>,
    /// (consumer, input) → (producer, output) edges.
    pub submodels_input_to_prev_output: BTreeMap<(usize, usize), (usize, usize)>,
    compiler: Arc<dyn SubgraphCompiler>,
    /// Shared store of device-resident weight tensors.
    pub weights_bank: Arc<dyn WeightsBank>,
    _state: std::marker::PhantomData<S>,
}

// ── Assembled state ────────────────────────────────────────────────

impl PartitionedModel<Assembled> {
    /// Creates a model in the `Assembled` state with empty link tables.
    pub fn new(
        name: impl Into<String>,
        submodels: Vec<Submodel>,
        inputs: Vec<PortDesc>,
        outputs: Vec<PortDesc>,
        compiler: Arc<dyn SubgraphCompiler>,
        weights_bank: Arc<dyn WeightsBank>,
    ) -> Self {
        let n_inputs = inputs.len();
        Self {
            name: name.into(),
            submodels,
            inputs,
            outputs,
            inputs_to_submodel_inputs: vec![None; n_inputs],
            param_subscribers: BTreeMap::new(),
            outputs_to_submodel_outputs: Vec::new(),
            submodels_input_to_prev_output: BTreeMap::new(),
            compiler,
            weights_bank,
            _state: std::marker::PhantomData,
        }
    }

    /// Routes global input `global` to `(sub, input)`.
    pub fn bind_input(mut self, global: usize, sub: usize, input: usize) -> Self {
        self.inputs_to_submodel_inputs[global] = Some((sub, input));
        self
    }

    /// Registers a further subscriber of global input `global`.
    pub fn subscribe_param(mut self, global: usize, sub: usize, input: usize) -> Self {
        self.param_subscribers
            .entry(global)
            .or_default()
            .push((sub, input));
        self
    }

    /// Declares `(sub, output)` as the producer of the next global output.
    pub fn bind_output(mut self, sub: usize, output: usize) -> Self {
        self.outputs_to_submodel_outputs.push((sub, output));
        self
    }

    /// Adds an inter-subgraph edge `(from, out) → (to, in)`.
    pub fn link(mut self, from: (usize, usize), to: (usize, usize)) -> Self {
        self.submodels_input_to_prev_output.insert(to, from);
        self
    }

    /// Validates the model and transitions to the `Verified` state.
    ///
    /// # Checks
    /// - Function calls point backwards at self-referential, compiled bodies,
    ///   with matching `param_base` and closure arity.
    /// - Spatial plans sit on function bodies and their block arithmetic
    ///   adds up (`nway · nway_iters + tail_size = range`, `tail_size < nway`).
    /// - Every link stays inside the model and respects topological order.
    /// - Link tables cover exactly the global ports.
    /// - Every compiled slot carries at least one device preference.
    pub fn validate(self) -> Result<PartitionedModel<Verified>, GraphError> {
        let n = self.submodels.len();

        if self.inputs_to_submodel_inputs.len() != self.inputs.len() {
            return Err(GraphError::TableArity {
                detail: format!(
                    "{} input links for {} inputs",
                    self.inputs_to_submodel_inputs.len(),
                    self.inputs.len()
                ),
            });
        }
        if self.outputs_to_submodel_outputs.len() != self.outputs.len() {
            return Err(GraphError::TableArity {
                detail: format!(
                    "{} output links for {} outputs",
                    self.outputs_to_submodel_outputs.len(),
                    self.outputs.len()
                ),
            });
        }

        for (i, sm) in self.submodels.iter().enumerate() {
            if !sm.is_optimized_out() && sm.devices().is_empty() && sm.replaced_by.is_none() {
                return Err(GraphError::MissingDevice { index: i });
            }
            if let Some(body) = sm.replaced_by {
                if body > i {
                    return Err(GraphError::InvalidFuncall {
                        index: i,
                        detail: format!("body {body} comes after the call"),
                    });
                }
                let body_sm = &self.submodels[body];
                if body_sm.compiled().is_none() {
                    return Err(GraphError::InvalidFuncall {
                        index: i,
                        detail: format!("body {body} has no compiled subgraph"),
                    });
                }
                if body_sm.replaced_by != Some(body) {
                    return Err(GraphError::InvalidFuncall {
                        index: i,
                        detail: format!("body {body} is not a function body"),
                    });
                }
                if body_sm.devices().is_empty() {
                    return Err(GraphError::MissingDevice { index: body });
                }
                if sm.param_base != body_sm.param_base {
                    return Err(GraphError::ClosureArity {
                        index: i,
                        detail: format!(
                            "param_base {} differs from body's {}",
                            sm.param_base, body_sm.param_base
                        ),
                    });
                }
                let arity_ok = sm.closure.len() == sm.scales.len()
                    && sm.closure.len() == sm.zerops.len()
                    && sm.closure.len() == sm.update_required.len();
                if !arity_ok {
                    return Err(GraphError::ClosureArity {
                        index: i,
                        detail: "closure/scales/zerops/update_required lengths differ".into(),
                    });
                }
                let body_inputs = body_sm
                    .compiled()
                    .map(|c| c.inputs().len())
                    .unwrap_or_default();
                if sm.param_base + sm.closure.len() != body_inputs {
                    return Err(GraphError::ClosureArity {
                        index: i,
                        detail: format!(
                            "{} activations + {} closure slots != {} body inputs",
                            sm.param_base,
                            sm.closure.len(),
                            body_inputs
                        ),
                    });
                }
            }
            if let Some(hg) = &sm.host_gather {
                let closure_end = sm.param_base + sm.closure.len();
                let in_closure_range =
                    |p: usize| p >= sm.param_base && p < closure_end;
                if sm.replaced_by.is_none()
                    || !in_closure_range(hg.dst_idx)
                    || !in_closure_range(hg.src_idx)
                {
                    return Err(GraphError::InvalidFuncall {
                        index: i,
                        detail: format!(
                            "host gather {}/{} outside closure range [{}, {closure_end})",
                            hg.dst_idx, hg.src_idx, sm.param_base
                        ),
                    });
                }
            }
            if let Some(spatial) = &sm.spatial {
                if sm.replaced_by != Some(i) {
                    return Err(GraphError::InvalidSpatial {
                        index: i,
                        detail: "spatial plans only apply to function bodies".into(),
                    });
                }
                if spatial.nway == 0
                    || spatial.tail_size >= spatial.nway
                    || spatial.nway * spatial.nway_iters + spatial.tail_size != spatial.range
                {
                    return Err(GraphError::InvalidSpatial {
                        index: i,
                        detail: format!(
                            "nway {} x iters {} + tail {} != range {}",
                            spatial.nway, spatial.nway_iters, spatial.tail_size, spatial.range
                        ),
                    });
                }
                for p in &spatial.params {
                    if p.idx >= sm.param_base {
                        return Err(GraphError::InvalidSpatial {
                            index: i,
                            detail: format!(
                                "spatial input {} is not an activation (param_base {})",
                                p.idx, sm.param_base
                            ),
                        });
                    }
                }
            }
        }

        for (&(to, to_in), &(from, from_out)) in &self.submodels_input_to_prev_output {
            if to >= n || from >= n {
                return Err(GraphError::LinkOutOfRange {
                    detail: format!("edge ({from}, {from_out}) -> ({to}, {to_in})"),
                });
            }
            if from >= to {
                return Err(GraphError::NotTopological { from, to });
            }
        }

        for (g, link) in self.inputs_to_submodel_inputs.iter().enumerate() {
            if let Some((sub, _)) = link {
                if *sub >= n {
                    return Err(GraphError::LinkOutOfRange {
                        detail: format!("global input {g} -> subgraph {sub}"),
                    });
                }
            }
        }
        for (g, subs) in &self.param_subscribers {
            for (sub, _) in subs {
                if *sub >= n {
                    return Err(GraphError::LinkOutOfRange {
                        detail: format!("global input {g} subscriber -> subgraph {sub}"),
                    });
                }
            }
        }
        for (g, (sub, _)) in self.outputs_to_submodel_outputs.iter().enumerate() {
            if *sub >= n {
                return Err(GraphError::LinkOutOfRange {
                    detail: format!("global output {g} <- subgraph {sub}"),
                });
            }
        }

        Ok(PartitionedModel {
            name: self.name,
            submodels: self.submodels,
            inputs: self.inputs,
            outputs: self.outputs,
            inputs_to_submodel_inputs: self.inputs_to_submodel_inputs,
            param_subscribers: self.param_subscribers,
            outputs_to_submodel_outputs: self.outputs_to_submodel_outputs,
            submodels_input_to_prev_output: self.submodels_input_to_prev_output,
            compiler: self.compiler,
            weights_bank: self.weights_bank,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Verified state ─────────────────────────────────────────────────

impl PartitionedModel<Verified> {
    /// Number of subgraph slots.
    pub fn num_submodels(&self) -> usize {
        self.submodels.len()
    }

    /// Resolves a slot to the index owning the compiled body.
    pub fn real(&self, idx: usize) -> usize {
        self.submodels[idx].replaced_by.unwrap_or(idx)
    }

    /// Recompiles subgraph `idx` for the device its cursor points at.
    ///
    /// Returns `false` when the preference list is exhausted or the compiler
    /// rejects the device — both fatal to the caller's failover loop.
    pub fn compile_for_success(&self, idx: usize) -> bool {
        let sm = &self.submodels[idx];
        let Some(device) = sm.current_device() else {
            tracing::error!("subgraph {idx}: no devices left to compile for");
            return false;
        };
        match self.compiler.compile(idx, &device) {
            Ok(compiled) => {
                tracing::info!("subgraph {idx}: recompiled for '{device}'");
                sm.set_compiled(compiled);
                true
            }
            Err(e) => {
                tracing::error!("subgraph {idx}: compilation for '{device}' failed: {e}");
                false
            }
        }
    }

    /// One line per slot: which device each subgraph currently targets.
    pub fn device_summary(&self) -> String {
        let mut out = String::new();
        for (i, sm) in self.submodels.iter().enumerate() {
            let device = match (sm.is_optimized_out(), sm.current_device()) {
                (true, _) => "-".to_string(),
                (false, Some(d)) => d,
                (false, None) => "<exhausted>".to_string(),
            };
            out.push_str(&format!("subgraph {i}: {device}\n"));
        }
        out
    }
}

impl<S: ModelState> fmt::Debug for PartitionedModel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedModel")
            .field("name", &self.name)
            .field("submodels", &self.submodels.len())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("links", &self.submodels_input_to_prev_output.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_api::host::HostSubgraph;
    use device_api::TensorBank;
    use tensor_host::{DType, Shape};

    struct NullCompiler;
    impl SubgraphCompiler for NullCompiler {
        fn compile(
            &self,
            _sub_idx: usize,
            device: &str,
        ) -> Result<Arc<dyn CompiledSubgraph>, DeviceError> {
            Err(DeviceError::CompileFailed {
                device: device.into(),
                reason: "unsupported".into(),
            })
        }
    }

    fn port() -> PortDesc {
        PortDesc::new(Shape::matrix(1, 4), DType::F32)
    }

    fn compiled() -> Arc<dyn CompiledSubgraph> {
        Arc::new(HostSubgraph::identity("NPU", port()))
    }

    fn assembled(submodels: Vec<Submodel>) -> PartitionedModel<Assembled> {
        PartitionedModel::new(
            "test",
            submodels,
            vec![port()],
            vec![port()],
            Arc::new(NullCompiler),
            Arc::new(TensorBank::new()),
        )
    }

    #[test]
    fn test_validate_simple_chain() {
        let submodels = vec![
            Submodel::new(compiled(), vec!["NPU".into()]),
            Submodel::new(compiled(), vec!["NPU".into()]),
        ];
        let model = assembled(submodels)
            .bind_input(0, 0, 0)
            .bind_output(1, 0)
            .link((0, 0), (1, 0))
            .validate()
            .unwrap();
        assert_eq!(model.num_submodels(), 2);
        assert_eq!(model.real(1), 1);
    }

    #[test]
    fn test_validate_rejects_forward_funcall() {
        let submodels = vec![
            Submodel::call_of(1, 0),
            Submodel::new(compiled(), vec!["NPU".into()]).as_body(1, 0),
        ];
        let err = assembled(submodels)
            .bind_input(0, 0, 0)
            .bind_output(1, 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidFuncall { index: 0, .. }));
    }

    #[test]
    fn test_validate_rejects_non_body_target() {
        // Slot 1 points at slot 0, but slot 0 is a plain submodel.
        let submodels = vec![
            Submodel::new(compiled(), vec!["NPU".into()]),
            Submodel::call_of(0, 0),
        ];
        let err = assembled(submodels)
            .bind_input(0, 0, 0)
            .bind_output(0, 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidFuncall { index: 1, .. }));
    }

    #[test]
    fn test_validate_rejects_closure_arity_mismatch() {
        // The identity body has exactly one input, all of it activation.
        let body = Submodel::new(compiled(), vec!["NPU".into()]).as_body(0, 1);
        let mut call = Submodel::call_of(0, 1);
        // One closure slot too many for a body with no closure range.
        call.push_closure(
            tensor_host::Tensor::zeros(Shape::vector(4), DType::F32),
            None,
            None,
            true,
        );
        let err = assembled(vec![body, call])
            .bind_input(0, 0, 0)
            .bind_output(0, 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, GraphError::ClosureArity { index: 1, .. }));
    }

    #[test]
    fn test_validate_rejects_bad_spatial_arithmetic() {
        let mut spatial = crate::Spatial::over(vec![], 1, 10, 4);
        spatial.tail_size = 1; // 4 * 2 + 1 != 10
        let body = Submodel::new(compiled(), vec!["NPU".into()])
            .as_body(0, 1)
            .with_spatial(spatial);
        let err = assembled(vec![body])
            .bind_input(0, 0, 0)
            .bind_output(0, 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidSpatial { .. }));
    }

    #[test]
    fn test_validate_rejects_backward_link() {
        let submodels = vec![
            Submodel::new(compiled(), vec!["NPU".into()]),
            Submodel::new(compiled(), vec!["NPU".into()]),
        ];
        let err = assembled(submodels)
            .bind_input(0, 0, 0)
            .bind_output(1, 0)
            .link((1, 0), (0, 0))
            .validate()
            .unwrap_err();
        assert!(matches!(err, GraphError::NotTopological { from: 1, to: 0 }));
    }

    #[test]
    fn test_validate_rejects_missing_output_binding() {
        let submodels = vec![Submodel::new(compiled(), vec!["NPU".into()])];
        let err = assembled(submodels)
            .bind_input(0, 0, 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, GraphError::TableArity { .. }));
    }

    #[test]
    fn test_compile_for_success_failure_is_fatal() {
        let submodels = vec![Submodel::new(compiled(), vec!["NPU".into()])];
        let model = assembled(submodels)
            .bind_input(0, 0, 0)
            .bind_output(0, 0)
            .validate()
            .unwrap();
        // NullCompiler rejects everything.
        assert!(!model.compile_for_success(0));
        // Exhausted cursor is also fatal.
        model.submodels[0].advance_device();
        assert!(!model.compile_for_success(0));
    }

    #[test]
    fn test_device_summary() {
        let submodels = vec![
            Submodel::new(compiled(), vec!["NPU".into()]),
            Submodel::optimized_out(),
        ];
        let model = assembled(submodels)
            .bind_input(0, 0, 0)
            .bind_output(0, 0)
            .validate()
            .unwrap();
        let summary = model.device_summary();
        assert!(summary.contains("subgraph 0: NPU"));
        assert!(summary.contains("subgraph 1: -"));
    }
}
