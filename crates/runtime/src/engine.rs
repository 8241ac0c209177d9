// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The pipeline engine: construction, the per-step driver, device failover,
//! and the external IO surface.
//!
//! One [`SubgraphPipeline`] executes one inference at a time over a shared
//! [`PartitionedModel`]. Subrequests are exclusively owned; function-call
//! slots hold `None` and borrow the body's request by index indirection.
//! A body may own a second ("spare") subrequest when funcall pipelining is
//! on, so the next call's closure can be unpacked while the previous call
//! executes; the pair is swapped after the body completes and is never in
//! flight simultaneously.

use crate::metrics::PipelineMetrics;
use crate::spatial::SpatialIo;
use crate::wiring::GlobalIo;
use crate::{closure, spatial, wiring, RuntimeConfig, RuntimeError};
use device_api::{CompletionCallback, InferRequest, Port, ProfilingRecord, VariableState};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use subgraph_ir::PartitionedModel;
use tensor_host::{ops, Shape, Tensor};

/// Double-buffering state for one pipelined function body / call site.
#[derive(Default)]
struct FuncallLink {
    /// The spare subrequest (present on body slots when pipelining is on).
    subrequest: Option<Box<dyn InferRequest>>,
    /// The next call site of the same body, recorded on its predecessor.
    next: Option<usize>,
}

/// Orchestrates one inference over a partitioned model.
pub struct SubgraphPipeline {
    model: Arc<PartitionedModel>,
    config: RuntimeConfig,
    use_pipelining: bool,
    /// One request per live body; `None` at funcall slots that reuse one.
    subrequests: Vec<Option<Box<dyn InferRequest>>>,
    /// Device each live subrequest was built for (failover drift detection).
    subrequest_devices: Vec<Option<String>>,
    funcall_pipeline: Vec<FuncallLink>,
    /// First call site of each body; their closures are preloaded once
    /// before the first inference when pipelining is on.
    funcall_heads: Vec<usize>,
    /// Preallocated result tensor per (call site, output).
    funcall_result: HashMap<(usize, usize), Tensor>,
    spatial_io: Vec<SpatialIo>,
    gio: Vec<GlobalIo>,
    input_tensors: Vec<Tensor>,
    output_tensors: Vec<Tensor>,
    /// The step currently executing (drives spare-request selection).
    now_idx: Option<usize>,
    metrics: PipelineMetrics,
}

impl std::fmt::Debug for SubgraphPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubgraphPipeline").finish_non_exhaustive()
    }
}

impl SubgraphPipeline {
    /// Builds the pipeline: creates subrequests, preallocates funcall and
    /// spatial IO tensors, wires inter-subgraph links, and presets
    /// bank-resident closures.
    pub fn new(model: Arc<PartitionedModel>, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let n = model.num_submodels();
        let use_pipelining = config.funcall_async;
        if use_pipelining {
            tracing::warn!(
                "function call pipelining is enabled for {}, expect a higher memory consumption",
                model.name
            );
        }

        let mut subrequests: Vec<Option<Box<dyn InferRequest>>> = (0..n).map(|_| None).collect();
        let mut subrequest_devices: Vec<Option<String>> = vec![None; n];
        let mut funcall_pipeline: Vec<FuncallLink> =
            (0..n).map(|_| FuncallLink::default()).collect();
        let mut funcall_result: HashMap<(usize, usize), Tensor> = HashMap::new();
        let mut spatial_io: Vec<SpatialIo> = (0..n).map(|_| SpatialIo::empty()).collect();
        let mut failover_happened = false;

        for i in 0..n {
            let sm = &model.submodels[i];
            tracing::info!("creating infer request for subgraph {i}");
            if sm.is_optimized_out() {
                tracing::info!("subgraph {i}: optimized out");
                continue;
            }

            if let Some(real_idx) = sm.replaced_by {
                // Preallocate this call site's result tensors, and the
                // body's spatial staging areas if it is spatial.
                let body = &model.submodels[real_idx];
                let proto = body
                    .compiled()
                    .ok_or(RuntimeError::NotAvailable { subgraph: real_idx })?;
                let num_outputs = proto.outputs().len();

                if let Some(sp) = &body.spatial {
                    if spatial_io[real_idx].is_unallocated() {
                        let mut io = SpatialIo::for_body(body.param_base, num_outputs);
                        if sp.tail_size > 0 {
                            // Tail buffers cover a full nway block; bytes
                            // beyond tail_size are don't-care.
                            for p in &sp.params {
                                let port = &proto.inputs()[p.idx];
                                io.input_tails[p.idx] =
                                    Some(Tensor::zeros(port.shape.clone(), port.dtype));
                            }
                            for (j, port) in proto.outputs().iter().enumerate() {
                                io.output_tails[j] =
                                    Some(Tensor::zeros(port.shape.clone(), port.dtype));
                            }
                        }
                        spatial_io[real_idx] = io;
                    }
                }

                for (j, port) in proto.outputs().iter().enumerate() {
                    let mut dims = port.shape.dims().to_vec();
                    if let Some(sp) = &body.spatial {
                        // Promote the output to the full spatial range.
                        dims[sp.out_dim] = sp.range;
                    }
                    funcall_result.insert((i, j), Tensor::zeros(Shape::new(dims), port.dtype));
                }

                if real_idx != i {
                    tracing::info!("subgraph {i}: reusing the request of subgraph {real_idx}");
                    continue;
                }
            }

            let count = if sm.is_funcall() && use_pipelining { 2 } else { 1 };
            let (mut requests, recompiled) = create_requests(&model, i, count)?;
            failover_happened |= recompiled;
            subrequests[i] = Some(requests.remove(0));
            subrequest_devices[i] = model.submodels[i].current_device();
            if !requests.is_empty() {
                funcall_pipeline[i].subrequest = Some(requests.remove(0));
            }
            tracing::info!("subgraph {i}: done");
        }

        if failover_happened {
            tracing::info!("refined device distribution:\n{}", model.device_summary());
        }

        // Funcall pipeline topology: the first call of each body is a head;
        // every later call is recorded on its predecessor so the post-body
        // swap can chain.
        let mut funcall_heads = Vec::new();
        if use_pipelining {
            let mut prevs: Vec<Option<usize>> = vec![None; n];
            for i in 0..n {
                if let Some(real_id) = model.submodels[i].replaced_by {
                    if let Some(prev) = prevs[real_id] {
                        tracing::info!("subgraph {i} follows subgraph {prev} in the funcall pipeline");
                        funcall_pipeline[prev].next = Some(i);
                    } else {
                        tracing::info!("subgraph {i} is a head of the funcall pipeline");
                        funcall_heads.push(i);
                    }
                    prevs[real_id] = Some(i);
                }
            }
        }

        // Preallocate the caller-visible ports. A global output produced by
        // a function call aliases its funcall result tensor, so the call
        // writes straight into the caller's buffer.
        let input_tensors: Vec<Tensor> = model
            .inputs
            .iter()
            .map(|p| Tensor::zeros(p.shape.clone(), p.dtype))
            .collect();
        let mut output_tensors = Vec::with_capacity(model.outputs.len());
        for (g, port) in model.outputs.iter().enumerate() {
            let produced_by = model.outputs_to_submodel_outputs[g];
            let tensor = funcall_result
                .get(&produced_by)
                .cloned()
                .unwrap_or_else(|| Tensor::zeros(port.shape.clone(), port.dtype));
            output_tensors.push(tensor);
        }

        wiring::connect(&model, &subrequests, &funcall_result)?;
        let gio = wiring::build_global_io(&model);

        // Preset bank-resident closures so bind-once slots are live before
        // the first prologue.
        for i in 0..n {
            if !model.submodels[i].is_funcall() {
                continue;
            }
            let real_idx = model.real(i);
            if let Some(request) = &subrequests[real_idx] {
                closure::preset_bank_closures(&model, i, request.as_ref())?;
            }
        }

        Ok(Self {
            metrics: PipelineMetrics::new(n),
            model,
            config,
            use_pipelining,
            subrequests,
            subrequest_devices,
            funcall_pipeline,
            funcall_heads,
            funcall_result,
            spatial_io,
            gio,
            input_tensors,
            output_tensors,
            now_idx: None,
        })
    }

    /// Runs one inference: all subgraphs in index order.
    pub fn infer(&mut self) -> Result<(), RuntimeError> {
        let run_start = Instant::now();
        self.prepare_for_infer()?;
        for idx in 0..self.model.num_submodels() {
            if !self.valid_subrequest(idx) {
                continue;
            }
            self.now_idx = Some(idx);
            let step_start = Instant::now();
            let result = self.run_subrequest_for_success(idx);
            if self.config.enable_profiling {
                self.metrics.record_subgraph(idx, step_start.elapsed());
            }
            result?;
        }
        self.now_idx = None;
        self.metrics.finalise(run_start.elapsed());
        Ok(())
    }

    // ── Caller-visible ports ───────────────────────────────────

    /// The host tensor backing global input `idx`.
    pub fn input(&self, idx: usize) -> Option<&Tensor> {
        self.input_tensors.get(idx)
    }

    /// The host tensor backing global output `idx`.
    pub fn output(&self, idx: usize) -> Option<&Tensor> {
        self.output_tensors.get(idx)
    }

    /// Execution metrics accumulated so far.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    // ── External IO surface ────────────────────────────────────

    /// Union of every live subrequest's variable states.
    pub fn query_state(&self) -> Vec<VariableState> {
        self.subrequests
            .iter()
            .flatten()
            .flat_map(|request| request.query_state())
            .collect()
    }

    /// Concatenation of per-subrequest profiling records, each renamed to
    /// `"subgraph<i>: <original>"`.
    pub fn profiling_info(&self) -> Vec<ProfilingRecord> {
        let mut info = Vec::new();
        for (i, request) in self.subrequests.iter().enumerate() {
            let Some(request) = request else { continue };
            for mut record in request.profiling_info() {
                record.node_name = format!("subgraph{i}: {}", record.node_name);
                info.push(record);
            }
        }
        info
    }

    /// Forwards cancellation to the subrequest at slot `idx` (no retry).
    pub fn cancel(&self, idx: usize) -> Result<(), RuntimeError> {
        self.subrequests
            .get(idx)
            .and_then(|r| r.as_deref())
            .ok_or(RuntimeError::NotAvailable { subgraph: idx })?
            .cancel();
        Ok(())
    }

    /// Attaches a completion callback to the real subrequest of `idx`.
    pub fn subscribe(&self, idx: usize, callback: CompletionCallback) -> Result<(), RuntimeError> {
        let real_idx = self.model.real(idx);
        self.subrequest(real_idx)?.set_callback(callback);
        Ok(())
    }

    /// The pipeline always runs on the calling thread.
    pub fn supports_async_pipeline(&self) -> bool {
        false
    }

    // ── Diagnostics ────────────────────────────────────────────

    /// `true` when slot `idx` owns its subrequest (function calls that
    /// reuse a body's request do not).
    pub fn has_own_subrequest(&self, idx: usize) -> bool {
        self.subrequests.get(idx).is_some_and(Option::is_some)
    }

    /// Number of preallocated funcall result tensors.
    pub fn num_funcall_results(&self) -> usize {
        self.funcall_result.len()
    }

    /// The device the live subrequest of slot `idx` was built for.
    pub fn subrequest_device(&self, idx: usize) -> Option<&str> {
        self.subrequest_devices
            .get(idx)
            .and_then(|d| d.as_deref())
    }

    // ── Step driver ────────────────────────────────────────────

    /// Binds the first subgraph's parameters and, with pipelining on,
    /// preloads the head call sites' closures.
    fn prepare_for_infer(&self) -> Result<(), RuntimeError> {
        tracing::debug!("preparing to infer");
        self.bind_global_parameters(self.next(0))?;
        for &head in &self.funcall_heads {
            tracing::debug!("pre-initialising weights for subgraph {head}");
            let real_idx = self.model.real(head);
            closure::unpack_closure(
                &self.model,
                head,
                self.subrequest(real_idx)?,
                self.config.needs_copy(head),
            )?;
        }
        Ok(())
    }

    /// Runs step `idx`, recovering from device failures by failover.
    fn run_subrequest_for_success(&mut self, idx: usize) -> Result<(), RuntimeError> {
        let real_idx = self.model.real(idx);
        let mut next_prepared = false;

        loop {
            // Another orchestrator sharing this model may have failed over
            // first; our subrequest would then target a stale device.
            let cursor_device = self.model.submodels[real_idx].current_device();
            if self.subrequest_devices[real_idx] != cursor_device {
                tracing::info!(
                    "recreating subrequest of subgraph {real_idx}: model was recompiled for {:?}",
                    cursor_device
                );
                self.recreate_subrequests(idx)?;
            }

            self.bind_global_results(idx)?;
            if self.model.submodels[idx].is_funcall() {
                self.function_prologue(idx)?;
            }

            match self.run_this_prep_next(idx, &mut next_prepared) {
                Ok(()) => break,
                Err(RuntimeError::Subgraph { subgraph, source }) => {
                    tracing::error!("subgraph {subgraph}: failed to run infer request: {source}");
                    tracing::info!("trying the next device");
                    self.metrics.record_failover();
                    self.model.submodels[real_idx].advance_device();
                    if !self.model.compile_for_success(real_idx) {
                        return Err(RuntimeError::DevicesExhausted { subgraph: real_idx });
                    }
                    self.recreate_subrequests(idx)?;
                }
                Err(other) => return Err(other),
            }
        }

        // Swap in the spare prepared during this run; the next call of this
        // body will execute it.
        if self.use_pipelining && self.funcall_pipeline[idx].next.is_some() {
            let link = &mut self.funcall_pipeline[real_idx];
            std::mem::swap(&mut self.subrequests[real_idx], &mut link.subrequest);
        }
        Ok(())
    }

    /// Runs the body of `idx` while preparing the next step.
    fn run_this_prep_next(
        &self,
        idx: usize,
        next_prepared: &mut bool,
    ) -> Result<(), RuntimeError> {
        let real_idx = self.model.real(idx);
        let next_idx = self.next(idx + 1);

        if next_idx == 0 {
            // The next step is the start of the next inference; run
            // synchronously and prepare nothing. The pipelined swap will
            // not happen either — the last call of a body has no successor.
            return self.infer_body(real_idx);
        }

        if self.model.submodels[idx].is_funcall() {
            if real_idx == self.model.real(next_idx) {
                // The next subgraph is a call to the same function.
                if self.use_pipelining {
                    debug_assert_eq!(self.funcall_pipeline[idx].next, Some(next_idx));
                    self.during(real_idx, || {
                        tracing::debug!("preparing the spare subrequest for subgraph {next_idx}");
                        // Unconditional: if this request fails, everything is
                        // resubmitted to the recompiled pair anyway.
                        self.bind_global_parameters(next_idx)?;
                        closure::unpack_closure(
                            &self.model,
                            next_idx,
                            self.spare_subrequest(real_idx)?,
                            self.config.needs_copy(next_idx),
                        )
                    })
                } else {
                    // This request is also the next one: run, then rebind.
                    self.infer_body(real_idx)?;
                    self.bind_global_parameters(next_idx)
                }
            } else {
                self.during(real_idx, || {
                    if !*next_prepared {
                        self.bind_global_parameters(next_idx)?;
                        *next_prepared = true;
                    }
                    if self.use_pipelining {
                        if let Some(my_next) = self.funcall_pipeline[idx].next {
                            tracing::debug!("unpacking closures for subgraph {my_next}");
                            closure::unpack_closure(
                                &self.model,
                                my_next,
                                self.spare_subrequest(real_idx)?,
                                self.config.needs_copy(my_next),
                            )?;
                        }
                    }
                    Ok(())
                })
            }
        } else {
            self.during(real_idx, || {
                if !*next_prepared {
                    self.bind_global_parameters(next_idx)?;
                    *next_prepared = true;
                }
                Ok(())
            })
        }
    }

    /// The latency-hiding primitive.
    ///
    /// Non-spatial bodies start asynchronously, run `f` on the calling
    /// thread, then join. Spatial bodies run `f` on a scoped worker while
    /// the spatial loop executes on the calling thread. `f` must not mutate
    /// orchestrator state beyond the preallocated staging slots and closure
    /// device buffers.
    fn during<F>(&self, real_idx: usize, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> Result<(), RuntimeError> + Send,
    {
        if self.model.submodels[real_idx].spatial.is_none() {
            let request = self.subrequest(real_idx)?;
            request
                .start_async()
                .map_err(|e| self.subgraph_err(real_idx, e))?;
            // The request is in flight with live views into our tensors; a
            // preparation failure cannot be unwound safely here.
            if let Err(e) = f() {
                panic!("prepare-next failed while subgraph {real_idx} was in flight: {e}");
            }
            request.wait().map_err(|e| self.subgraph_err(real_idx, e))
        } else {
            std::thread::scope(|scope| {
                let worker = scope.spawn(f);
                let inferred = self.spatial_infer(real_idx);
                let prepared = worker
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                inferred?;
                prepared
            })
        }
    }

    /// Runs the body synchronously: plain infer, or the spatial loop.
    fn infer_body(&self, real_idx: usize) -> Result<(), RuntimeError> {
        if self.model.submodels[real_idx].spatial.is_none() {
            self.subrequest(real_idx)?
                .infer()
                .map_err(|e| self.subgraph_err(real_idx, e))
        } else {
            self.spatial_infer(real_idx)
        }
    }

    fn spatial_infer(&self, real_idx: usize) -> Result<(), RuntimeError> {
        let body = &self.model.submodels[real_idx];
        let sp = body.spatial.as_ref().expect("spatial body");
        let num_outputs = body
            .compiled()
            .map(|c| c.outputs().len())
            .unwrap_or_default();
        spatial::run_spatial(
            self.subrequest(real_idx)?,
            sp,
            &self.spatial_io[real_idx],
            num_outputs,
            real_idx,
        )
    }

    // ── Binding passes ─────────────────────────────────────────

    /// Binds global input tensors to the submodel consuming them, routing
    /// copies through one parallel phase, then runs the host gather.
    fn bind_global_parameters(&self, idx: usize) -> Result<(), RuntimeError> {
        tracing::debug!("binding parameters for subgraph {idx}");
        let real_idx = self.model.real(idx);
        let do_copy = self.config.needs_copy(idx);
        let body = &self.model.submodels[real_idx];
        let is_spatial = body.spatial.is_some();

        // When the body being prepared is the one executing right now and
        // pipelining is on, prepare the spare request instead.
        let request: &dyn InferRequest = if self.use_pipelining
            && self.now_idx.map(|now| self.model.real(now)) == Some(real_idx)
        {
            tracing::debug!("accessing the pipeline subrequest");
            self.spare_subrequest(real_idx)?
        } else {
            self.subrequest(real_idx)?
        };

        let is_spatial_param = |sub_in: usize| -> bool {
            is_spatial
                && body
                    .spatial
                    .as_ref()
                    .is_some_and(|sp| sp.params.iter().any(|p| p.idx == sub_in))
        };

        let mut copy_list: Vec<(Tensor, usize)> = Vec::new();
        for (&g, &sub_in) in &self.gio[idx].params {
            tracing::debug!("processing global input {g} -> input {sub_in}");
            let g_tensor = self.input_tensors[g].clone();
            if is_spatial_param(sub_in) {
                // Register the full-range tensor for the spatial loop.
                self.spatial_io[real_idx].stage_input(sub_in, g_tensor);
            } else if do_copy {
                copy_list.push((g_tensor, sub_in));
            } else {
                request
                    .set_tensor(Port::Input(sub_in), g_tensor)
                    .map_err(|e| self.subgraph_err(idx, e))?;
            }
        }

        copy_list.par_iter().try_for_each(|(src, sub_in)| {
            let dst = request
                .get_tensor(Port::Input(*sub_in))
                .map_err(|e| self.subgraph_err(idx, e))?;
            src.copy_to(&dst)?;
            Ok::<(), RuntimeError>(())
        })?;

        // Host-side gather: pull rows of the vocabulary closure into the
        // destination closure using the just-bound index tensor.
        let sm = &self.model.submodels[idx];
        if let Some(hg) = &sm.host_gather {
            let dst = &sm.closure[hg.dst_idx - sm.param_base];
            let vocab = &sm.closure[hg.src_idx - sm.param_base];
            let lookup = request
                .get_tensor(Port::Input(hg.idx_idx))
                .map_err(|e| self.subgraph_err(idx, e))?;
            ops::gather(vocab, &lookup, dst)?;
        }

        Ok(())
    }

    /// Binds this submodel's outputs to the caller-visible result tensors.
    /// Function calls skip this: their prologue installs `funcall_result`
    /// tensors, which alias the global outputs where relevant.
    fn bind_global_results(&self, idx: usize) -> Result<(), RuntimeError> {
        if self.model.submodels[idx].is_funcall() {
            tracing::debug!("skipping result binding for subgraph {idx}: the function handles it");
            return Ok(());
        }
        let request = self.subrequest(idx)?;
        for (&g, &sub_out) in &self.gio[idx].results {
            request
                .set_tensor(Port::Output(sub_out), self.output_tensors[g].clone())
                .map_err(|e| self.subgraph_err(idx, e))?;
        }
        Ok(())
    }

    /// Function-call prologue: wire activations, resolve the closure (when
    /// pipelining is off), and install this call's result tensors.
    fn function_prologue(&self, idx: usize) -> Result<(), RuntimeError> {
        tracing::debug!("preparing subgraph {idx} funcall prologue");
        let sm = &self.model.submodels[idx];
        let real_idx = sm.replaced_by.expect("prologue runs on function calls");
        let body = &self.model.submodels[real_idx];
        let is_spatial = body.spatial.is_some();
        let request = self.subrequest(real_idx)?;

        // 1. Walk the function dependencies and set the respective tensors
        //    as parameters.
        for i in 0..body.param_base {
            let Some(&(prod_idx, prod_out)) =
                self.model.submodels_input_to_prev_output.get(&(idx, i))
            else {
                continue;
            };
            let tensor = if !self.model.submodels[prod_idx].is_funcall() {
                // Producer is a normal subgraph: take its live output.
                self.subrequest(prod_idx)?
                    .get_tensor(Port::Output(prod_out))
                    .map_err(|e| self.subgraph_err(prod_idx, e))?
            } else {
                // Producer is a function call, maybe the same body we are
                // about to run: take its result from the storage.
                self.funcall_result
                    .get(&(prod_idx, prod_out))
                    .cloned()
                    .ok_or_else(|| RuntimeError::LinkInconsistency {
                        from: prod_idx,
                        to: idx,
                        detail: format!("no funcall result for output {prod_out}"),
                    })?
            };
            if is_spatial {
                self.spatial_io[real_idx].stage_input(i, tensor);
            } else {
                request
                    .set_tensor(Port::Input(i), tensor)
                    .map_err(|e| self.subgraph_err(idx, e))?;
            }
        }

        // 2. Unpack the closure here when pipelining is off; when it is on,
        //    the closure was prepared on the spare request during the
        //    previous call of this body.
        if !self.use_pipelining {
            closure::unpack_closure(&self.model, idx, request, self.config.needs_copy(idx))?;
        }

        // 3. Tell the function which results to produce this time. Global
        //    outputs produced by this call already alias these tensors.
        let num_outputs = body
            .compiled()
            .map(|c| c.outputs().len())
            .unwrap_or_default();
        for j in 0..num_outputs {
            let tensor = self
                .funcall_result
                .get(&(idx, j))
                .cloned()
                .ok_or_else(|| RuntimeError::LinkInconsistency {
                    from: idx,
                    to: idx,
                    detail: format!("no funcall result for output {j}"),
                })?;
            if is_spatial {
                self.spatial_io[real_idx].stage_output(j, tensor);
            } else {
                request
                    .set_tensor(Port::Output(j), tensor)
                    .map_err(|e| self.subgraph_err(idx, e))?;
            }
        }
        Ok(())
    }

    // ── Failover ───────────────────────────────────────────────

    /// Rebuilds the subrequest pair of `idx`'s body and re-wires.
    fn recreate_subrequests(&mut self, idx: usize) -> Result<(), RuntimeError> {
        let real_idx = self.model.real(idx);
        let is_funcall = self.model.submodels[idx].is_funcall();
        let count = if is_funcall && self.use_pipelining { 2 } else { 1 };

        let (mut requests, _) = create_requests(&self.model, real_idx, count)?;
        // Always update the body slot: for function calls the call slots
        // stay empty and borrow by index.
        self.subrequests[real_idx] = Some(requests.remove(0));
        if !requests.is_empty() {
            self.funcall_pipeline[real_idx].subrequest = Some(requests.remove(0));
        }

        // A fresh request lost every cross-request binding; run the full
        // wiring pass again.
        wiring::connect(&self.model, &self.subrequests, &self.funcall_result)?;
        self.subrequest_devices[real_idx] = self.model.submodels[real_idx].current_device();

        // Restore this call's closure on the fresh primary. Without
        // pipelining the retried prologue does it; with pipelining the
        // closure had been prepared on a request that no longer exists.
        if is_funcall {
            let request = self.subrequest(real_idx)?;
            if self.use_pipelining {
                closure::unpack_closure(&self.model, idx, request, self.config.needs_copy(idx))?;
            } else {
                closure::preset_bank_closures(&self.model, idx, request)?;
            }
        }
        Ok(())
    }

    // ── Small helpers ──────────────────────────────────────────

    fn valid_subrequest(&self, idx: usize) -> bool {
        self.subrequests[self.model.real(idx)].is_some()
    }

    /// First valid subgraph index at or after `from`, wrapping around.
    fn next(&self, from: usize) -> usize {
        let n = self.model.num_submodels();
        (0..n)
            .map(|k| (from + k) % n)
            .find(|&i| self.valid_subrequest(i))
            .unwrap_or(from % n)
    }

    fn subrequest(&self, real_idx: usize) -> Result<&dyn InferRequest, RuntimeError> {
        self.subrequests[real_idx]
            .as_deref()
            .ok_or(RuntimeError::NotAvailable { subgraph: real_idx })
    }

    fn spare_subrequest(&self, real_idx: usize) -> Result<&dyn InferRequest, RuntimeError> {
        self.funcall_pipeline[real_idx]
            .subrequest
            .as_deref()
            .ok_or(RuntimeError::NotAvailable { subgraph: real_idx })
    }

    fn subgraph_err(&self, idx: usize, source: device_api::DeviceError) -> RuntimeError {
        RuntimeError::Subgraph {
            subgraph: idx,
            source,
        }
    }
}

/// Creates `count` requests for subgraph `idx`, failing over to the next
/// device preference when the current device rejects request creation.
fn create_requests(
    model: &PartitionedModel,
    idx: usize,
    count: usize,
) -> Result<(Vec<Box<dyn InferRequest>>, bool), RuntimeError> {
    let sm = &model.submodels[idx];
    let mut recompiled = false;
    loop {
        let compiled = sm
            .compiled()
            .ok_or(RuntimeError::NotAvailable { subgraph: idx })?;
        let attempt: Result<Vec<_>, _> = (0..count).map(|_| compiled.create_request()).collect();
        match attempt {
            Ok(requests) => return Ok((requests, recompiled)),
            Err(e) => {
                tracing::warn!("subgraph {idx}: request creation failed: {e}; trying next device");
                sm.advance_device();
                if !model.compile_for_success(idx) {
                    return Err(RuntimeError::DevicesExhausted { subgraph: idx });
                }
                recompiled = true;
            }
        }
    }
}
