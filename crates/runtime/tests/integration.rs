// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end execution of partitioned models.
//!
//! These tests drive the full flow — descriptor assembly → validation →
//! pipeline construction → inference — over the host reference backend,
//! covering zero-copy wiring, function-call reuse, spatial slicing, device
//! failover, funcall pipelining, and the external IO surface.

use device_api::host::{HostKernel, HostSubgraph};
use device_api::{
    CompiledSubgraph, DeviceError, PortDesc, TensorBank,
};
use runtime::{RuntimeConfig, RuntimeError, SubgraphPipeline};
use std::sync::Arc;
use subgraph_ir::{
    Assembled, HostGather, PartitionedModel, Spatial, SpatialParam, SubgraphCompiler, Submodel,
};
use tensor_host::{DType, Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn f32_port(dims: &[usize]) -> PortDesc {
    PortDesc::new(Shape::from(dims), DType::F32)
}

/// A compiler backed by a closure; most tests never recompile.
struct FnCompiler(
    Box<dyn Fn(usize, &str) -> Result<Arc<dyn CompiledSubgraph>, DeviceError> + Send + Sync>,
);

impl SubgraphCompiler for FnCompiler {
    fn compile(
        &self,
        sub_idx: usize,
        device: &str,
    ) -> Result<Arc<dyn CompiledSubgraph>, DeviceError> {
        (self.0)(sub_idx, device)
    }
}

fn no_recompile() -> Arc<dyn SubgraphCompiler> {
    Arc::new(FnCompiler(Box::new(|_, device| {
        Err(DeviceError::CompileFailed {
            device: device.into(),
            reason: "recompilation not available".into(),
        })
    })))
}

/// Kernel: output = input + delta (single input, single output).
///
/// Bound tensors may be strided views when the body runs spatially, so the
/// kernel stages them through contiguous scratch tensors.
fn add_kernel(delta: f32) -> HostKernel {
    Arc::new(move |inputs, outputs| {
        let scratch = Tensor::zeros(inputs[0].shape().clone(), inputs[0].dtype());
        inputs[0].copy_to(&scratch)?;
        {
            let mut data = scratch.write();
            for value in data.as_slice_mut::<f32>() {
                *value += delta;
            }
        }
        scratch.copy_to(&outputs[0])?;
        Ok(())
    })
}

/// Kernel: output = input0 + input1 (activation plus closure).
fn add_pair_kernel() -> HostKernel {
    Arc::new(|inputs, outputs| {
        let a = inputs[0].read();
        let b = inputs[1].read();
        let mut output = outputs[0].write();
        for ((o, x), y) in output
            .as_slice_mut::<f32>()
            .iter_mut()
            .zip(a.as_slice::<f32>())
            .zip(b.as_slice::<f32>())
        {
            *o = x + y;
        }
        Ok(())
    })
}

fn model(
    submodels: Vec<Submodel>,
    inputs: Vec<PortDesc>,
    outputs: Vec<PortDesc>,
    compiler: Arc<dyn SubgraphCompiler>,
) -> PartitionedModel<Assembled> {
    PartitionedModel::new(
        "test-model",
        submodels,
        inputs,
        outputs,
        compiler,
        Arc::new(TensorBank::new()),
    )
}

fn write_input(pipeline: &SubgraphPipeline, idx: usize, values: &[f32]) {
    let input = pipeline.input(idx).expect("input exists");
    input.write().as_slice_mut::<f32>().copy_from_slice(values);
}

fn read_output(pipeline: &SubgraphPipeline, idx: usize) -> Vec<f32> {
    let output = pipeline.output(idx).expect("output exists");
    let data = output.read();
    data.as_slice::<f32>().to_vec()
}

// ── Zero-copy wiring ───────────────────────────────────────────

/// Two plain subgraphs in a chain: the consumer's input tensor must be the
/// producer's output tensor, pointer-identically.
#[test]
fn test_normal_chain_is_zero_copy() {
    let sg0 = Arc::new(HostSubgraph::new(
        "NPU",
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        add_kernel(1.0),
    ));
    let sg1 = Arc::new(HostSubgraph::new(
        "NPU",
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        add_kernel(10.0),
    ));
    let submodels = vec![
        Submodel::new(sg0.clone(), vec!["NPU".into()]),
        Submodel::new(sg1.clone(), vec!["NPU".into()]),
    ];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(1, 0)
    .link((0, 0), (1, 0))
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();

    write_input(&pipeline, 0, &[1.0, 2.0, 3.0, 4.0]);
    pipeline.infer().unwrap();
    assert_eq!(read_output(&pipeline, 0), vec![12.0, 13.0, 14.0, 15.0]);

    // The zero-copy property itself.
    let producer_out = sg0.requests()[0].bound_output(0).unwrap();
    let consumer_in = sg1.requests()[0].bound_input(0).unwrap();
    assert!(consumer_in.same_storage(&producer_out));
}

/// With the copy gate on, global inputs are copied into the subrequest's
/// own buffer instead of zero-copy bound.
#[test]
fn test_input_copy_gate() {
    let sg0 = Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4])));
    let submodels = vec![Submodel::new(sg0.clone(), vec!["NPU".into()])];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let config = RuntimeConfig {
        input_copy: "YES".into(),
        ..Default::default()
    };
    let mut pipeline = SubgraphPipeline::new(Arc::new(verified), config).unwrap();

    write_input(&pipeline, 0, &[5.0, 6.0, 7.0, 8.0]);
    pipeline.infer().unwrap();
    assert_eq!(read_output(&pipeline, 0), vec![5.0, 6.0, 7.0, 8.0]);

    let bound = sg0.requests()[0].bound_input(0).unwrap();
    assert!(!bound.same_storage(pipeline.input(0).unwrap()));
}

// ── Function-call reuse ────────────────────────────────────────

/// `[body, call, call]`: only the body owns a subrequest, and every call
/// site (the body included) gets its own result tensor.
#[test]
fn test_funcall_reuse() {
    let body_sg = Arc::new(HostSubgraph::new(
        "NPU",
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        add_kernel(1.0),
    ));
    let submodels = vec![
        Submodel::new(body_sg.clone(), vec!["NPU".into()]).as_body(0, 1),
        Submodel::call_of(0, 1),
        Submodel::call_of(0, 1),
    ];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(2, 0)
    .link((0, 0), (1, 0))
    .link((1, 0), (2, 0))
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();

    // Reuse: one live subrequest, one result tensor per call site.
    assert!(pipeline.has_own_subrequest(0));
    assert!(!pipeline.has_own_subrequest(1));
    assert!(!pipeline.has_own_subrequest(2));
    assert_eq!(pipeline.num_funcall_results(), 3);
    assert_eq!(body_sg.requests().len(), 1);

    write_input(&pipeline, 0, &[0.0, 1.0, 2.0, 3.0]);
    pipeline.infer().unwrap();
    // Three calls of the +1 body.
    assert_eq!(read_output(&pipeline, 0), vec![3.0, 4.0, 5.0, 6.0]);

    // The global output aliases the last call's result tensor.
    let last_bound_output = body_sg.requests()[0].bound_output(0).unwrap();
    assert!(pipeline.output(0).unwrap().same_storage(&last_bound_output));
}

/// Distinct call sites of one body never share result storage: a second
/// inference sees the same values, not accumulated garbage.
#[test]
fn test_funcall_results_are_isolated() {
    let body_sg = Arc::new(HostSubgraph::new(
        "NPU",
        vec![f32_port(&[1, 2])],
        vec![f32_port(&[1, 2])],
        add_kernel(1.0),
    ));
    let submodels = vec![
        Submodel::new(body_sg, vec!["NPU".into()]).as_body(0, 1),
        Submodel::call_of(0, 1),
    ];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 2])],
        vec![f32_port(&[1, 2])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(1, 0)
    .link((0, 0), (1, 0))
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    for _ in 0..3 {
        write_input(&pipeline, 0, &[1.0, 2.0]);
        pipeline.infer().unwrap();
        assert_eq!(read_output(&pipeline, 0), vec![3.0, 4.0]);
    }
}

// ── Closures and funcall pipelining ────────────────────────────

/// Three call sites with different closures produce the same result with
/// pipelining off and on.
#[test]
fn test_closure_chain_with_and_without_pipelining() {
    for funcall_async in [false, true] {
        let body_sg = Arc::new(HostSubgraph::new(
            "NPU",
            vec![f32_port(&[1, 4]), f32_port(&[1, 4])],
            vec![f32_port(&[1, 4])],
            add_pair_kernel(),
        ));
        let closure_values = [10.0f32, 20.0, 30.0];
        let mut submodels = Vec::new();
        for (i, &value) in closure_values.iter().enumerate() {
            let mut sm = if i == 0 {
                Submodel::new(body_sg.clone(), vec!["NPU".into()]).as_body(0, 1)
            } else {
                Submodel::call_of(0, 1)
            };
            sm.push_closure(
                Tensor::from_f32(Shape::matrix(1, 4), &[value; 4]).unwrap(),
                None,
                None,
                true,
            );
            submodels.push(sm);
        }
        let verified = model(
            submodels,
            vec![f32_port(&[1, 4])],
            vec![f32_port(&[1, 4])],
            no_recompile(),
        )
        .bind_input(0, 0, 0)
        .bind_output(2, 0)
        .link((0, 0), (1, 0))
        .link((1, 0), (2, 0))
        .validate()
        .unwrap();

        let config = RuntimeConfig {
            funcall_async,
            ..Default::default()
        };
        let mut pipeline = SubgraphPipeline::new(Arc::new(verified), config).unwrap();

        // Two inferences: the pipelined swap chain must stay consistent
        // across runs.
        for _ in 0..2 {
            write_input(&pipeline, 0, &[1.0, 2.0, 3.0, 4.0]);
            pipeline.infer().unwrap();
            assert_eq!(
                read_output(&pipeline, 0),
                vec![61.0, 62.0, 63.0, 64.0],
                "funcall_async = {funcall_async}"
            );
        }
    }
}

/// Quantised closures go through the unpack kernels: i8 weights with a
/// per-row scale land in the body's f32 input.
#[test]
fn test_quantised_closure_unpack() {
    let body_sg = Arc::new(HostSubgraph::new(
        "NPU",
        vec![f32_port(&[1, 4]), f32_port(&[2, 2])],
        vec![f32_port(&[1, 4])],
        Arc::new(|inputs: &[Tensor], outputs: &[Tensor]| {
            // output = activation + flattened weight rows.
            let a = inputs[0].read();
            let w = inputs[1].read();
            let mut o = outputs[0].write();
            for ((dst, x), y) in o
                .as_slice_mut::<f32>()
                .iter_mut()
                .zip(a.as_slice::<f32>())
                .zip(w.as_slice::<f32>())
            {
                *dst = x + y;
            }
            Ok(())
        }),
    ));
    let mut body = Submodel::new(body_sg, vec!["NPU".into()]).as_body(0, 1);
    // Rows (1, 2) and (3, 4) scaled by 2.0 and 10.0.
    body.push_closure(
        Tensor::from_elems(Shape::matrix(2, 2), &[1i8, 2, 3, 4]).unwrap(),
        Some(Tensor::from_f32(Shape::matrix(2, 1), &[2.0, 10.0]).unwrap()),
        None,
        true,
    );
    let verified = model(
        vec![body],
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    write_input(&pipeline, 0, &[0.5, 0.5, 0.5, 0.5]);
    pipeline.infer().unwrap();
    assert_eq!(read_output(&pipeline, 0), vec![2.5, 4.5, 30.5, 40.5]);
}

// ── Spatial execution ──────────────────────────────────────────

/// range 10 = 2 full slices of nway 4 plus a tail of 2: an identity body
/// must reproduce the input in 3 infer calls.
#[test]
fn test_spatial_tail_roundtrip() {
    let body_sg = Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4])));
    let body = Submodel::new(body_sg.clone(), vec!["NPU".into()])
        .as_body(0, 1)
        .with_spatial(Spatial::over(
            vec![SpatialParam { idx: 0, dim: 1 }],
            1,
            10,
            4,
        ));
    let verified = model(
        vec![body],
        vec![f32_port(&[1, 10])],
        vec![f32_port(&[1, 10])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();

    let values: Vec<f32> = (0..10).map(|v| v as f32).collect();
    write_input(&pipeline, 0, &values);
    pipeline.infer().unwrap();

    assert_eq!(read_output(&pipeline, 0), values);
    assert_eq!(body_sg.requests()[0].infer_count(), 3);
}

/// Spatial stitching law: slicewise execution equals one hypothetical
/// full-range inference of the same (deterministic) body.
#[test]
fn test_spatial_stitching_matches_reference() {
    for (range, nway) in [(10usize, 4usize), (8, 4), (7, 3), (5, 5)] {
        let body_sg = Arc::new(HostSubgraph::new(
            "NPU",
            vec![f32_port(&[1, nway])],
            vec![f32_port(&[1, nway])],
            add_kernel(100.0),
        ));
        let body = Submodel::new(body_sg, vec!["NPU".into()])
            .as_body(0, 1)
            .with_spatial(Spatial::over(
                vec![SpatialParam { idx: 0, dim: 1 }],
                1,
                range,
                nway,
            ));
        let verified = model(
            vec![body],
            vec![f32_port(&[1, range])],
            vec![f32_port(&[1, range])],
            no_recompile(),
        )
        .bind_input(0, 0, 0)
        .bind_output(0, 0)
        .validate()
        .unwrap();

        let mut pipeline =
            SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
        let values: Vec<f32> = (0..range).map(|v| v as f32).collect();
        write_input(&pipeline, 0, &values);
        pipeline.infer().unwrap();

        let reference: Vec<f32> = values.iter().map(|v| v + 100.0).collect();
        assert_eq!(
            read_output(&pipeline, 0),
            reference,
            "range {range} nway {nway}"
        );
    }
}

// ── Device failover ────────────────────────────────────────────

/// The first infer on subgraph 3 raises; the cursor advances from NPU to
/// CPU, recompilation succeeds, and the retried step yields the reference
/// result.
#[test]
fn test_failover_to_next_device() {
    let working = |device: &str| -> Arc<HostSubgraph> {
        Arc::new(HostSubgraph::new(
            device,
            vec![f32_port(&[1, 4])],
            vec![f32_port(&[1, 4])],
            add_kernel(1.0),
        ))
    };
    let compiler: Arc<dyn SubgraphCompiler> = Arc::new(FnCompiler(Box::new(|sub_idx, device| {
        if sub_idx == 3 && device == "CPU" {
            Ok(Arc::new(HostSubgraph::new(
                "CPU",
                vec![f32_port(&[1, 4])],
                vec![f32_port(&[1, 4])],
                add_kernel(1.0),
            )))
        } else {
            Err(DeviceError::CompileFailed {
                device: device.into(),
                reason: "unsupported".into(),
            })
        }
    })));

    let broken = Arc::new(
        HostSubgraph::new(
            "NPU",
            vec![f32_port(&[1, 4])],
            vec![f32_port(&[1, 4])],
            add_kernel(1.0),
        )
        .failing(),
    );
    let submodels = vec![
        Submodel::new(working("NPU"), vec!["NPU".into()]),
        Submodel::new(working("NPU"), vec!["NPU".into()]),
        Submodel::new(working("NPU"), vec!["NPU".into()]),
        Submodel::new(broken, vec!["NPU".into(), "CPU".into()]),
    ];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        compiler,
    )
    .bind_input(0, 0, 0)
    .bind_output(3, 0)
    .link((0, 0), (1, 0))
    .link((1, 0), (2, 0))
    .link((2, 0), (3, 0))
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    write_input(&pipeline, 0, &[0.0, 0.0, 0.0, 0.0]);
    pipeline.infer().unwrap();

    // Four +1 subgraphs: the single-device reference.
    assert_eq!(read_output(&pipeline, 0), vec![4.0, 4.0, 4.0, 4.0]);
    assert_eq!(pipeline.subrequest_device(3), Some("CPU"));
    assert_eq!(pipeline.metrics().failovers, 1);
}

/// When no device remains, the failure is fatal and carries the failing
/// subgraph index.
#[test]
fn test_failover_exhaustion_is_fatal() {
    let broken = Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4])).failing());
    let submodels = vec![Submodel::new(broken, vec!["NPU".into()])];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    let err = pipeline.infer().unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::DevicesExhausted { subgraph: 0 }
    ));
}

/// A second orchestrator over the same model notices the advanced device
/// cursor at step entry and rebuilds without failing over itself.
#[test]
fn test_concurrent_orchestrator_drift_rebuild() {
    let compiler: Arc<dyn SubgraphCompiler> = Arc::new(FnCompiler(Box::new(|_, device| {
        if device == "CPU" {
            Ok(Arc::new(HostSubgraph::identity("CPU", f32_port(&[1, 4]))))
        } else {
            Err(DeviceError::CompileFailed {
                device: device.into(),
                reason: "unsupported".into(),
            })
        }
    })));
    let broken = Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4])).failing());
    let submodels = vec![Submodel::new(broken, vec!["NPU".into(), "CPU".into()])];
    let verified = Arc::new(
        model(
            submodels,
            vec![f32_port(&[1, 4])],
            vec![f32_port(&[1, 4])],
            compiler,
        )
        .bind_input(0, 0, 0)
        .bind_output(0, 0)
        .validate()
        .unwrap(),
    );

    let mut first = SubgraphPipeline::new(verified.clone(), RuntimeConfig::default()).unwrap();
    let mut second = SubgraphPipeline::new(verified.clone(), RuntimeConfig::default()).unwrap();

    write_input(&first, 0, &[1.0, 2.0, 3.0, 4.0]);
    first.infer().unwrap();
    assert_eq!(first.metrics().failovers, 1);

    // The shared cursor already points at CPU; the second pipeline rebuilds
    // at step entry instead of failing over again.
    write_input(&second, 0, &[5.0, 6.0, 7.0, 8.0]);
    second.infer().unwrap();
    assert_eq!(read_output(&second, 0), vec![5.0, 6.0, 7.0, 8.0]);
    assert_eq!(second.metrics().failovers, 0);
    assert_eq!(second.subrequest_device(0), Some("CPU"));
}

// ── Host gather ────────────────────────────────────────────────

/// The embedding rows selected by the bound index tensor are gathered into
/// the destination closure before the closure pass binds it.
#[test]
fn test_host_gather_binding() {
    let body_sg = Arc::new(HostSubgraph::new(
        "NPU",
        vec![
            PortDesc::new(Shape::matrix(1, 2), DType::I64),
            PortDesc::new(Shape::new(vec![1, 2, 3]), DType::F32),
            PortDesc::new(Shape::matrix(4, 3), DType::F32),
        ],
        vec![PortDesc::new(Shape::new(vec![1, 2, 3]), DType::F32)],
        Arc::new(|inputs: &[Tensor], outputs: &[Tensor]| {
            inputs[1].copy_to(&outputs[0])?;
            Ok(())
        }),
    ));
    let vocab: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let mut body = Submodel::new(body_sg, vec!["NPU".into()])
        .as_body(0, 1)
        .with_host_gather(HostGather {
            dst_idx: 1,
            src_idx: 2,
            idx_idx: 0,
        });
    body.push_closure(
        Tensor::zeros(Shape::new(vec![1, 2, 3]), DType::F32),
        None,
        None,
        true,
    );
    body.push_closure(
        Tensor::from_f32(Shape::matrix(4, 3), &vocab).unwrap(),
        None,
        None,
        false,
    );
    let verified = model(
        vec![body],
        vec![PortDesc::new(Shape::matrix(1, 2), DType::I64)],
        vec![PortDesc::new(Shape::new(vec![1, 2, 3]), DType::F32)],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();

    pipeline
        .input(0)
        .unwrap()
        .write()
        .as_slice_mut::<i64>()
        .copy_from_slice(&[2, 0]);
    pipeline.infer().unwrap();

    // Rows 2 and 0 of the vocabulary.
    assert_eq!(
        read_output(&pipeline, 0),
        vec![6.0, 7.0, 8.0, 0.0, 1.0, 2.0]
    );
}

// ── Construction-time failures ─────────────────────────────────

/// A live edge from an optimized-out producer to a live consumer is fatal
/// at construction.
#[test]
fn test_optimized_out_producer_is_fatal() {
    let submodels = vec![
        Submodel::optimized_out(),
        Submodel::new(
            Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4]))),
            vec!["NPU".into()],
        ),
    ];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 1, 0)
    .bind_output(1, 0)
    .link((0, 0), (1, 0))
    .validate()
    .unwrap();

    let err = SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::LinkInconsistency { from: 0, to: 1, .. }
    ));
}

// ── External IO surface ────────────────────────────────────────

#[test]
fn test_profiling_query_state_and_cancel() {
    let sg0 = Arc::new(
        HostSubgraph::identity("NPU", f32_port(&[1, 4]))
            .named("matvec")
            .with_state("kv", f32_port(&[1, 8])),
    );
    let body = Submodel::new(sg0.clone(), vec!["NPU".into()]).as_body(0, 1);
    let call = Submodel::call_of(0, 1);
    let verified = model(
        vec![body, call],
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(1, 0)
    .link((0, 0), (1, 0))
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    write_input(&pipeline, 0, &[1.0, 1.0, 1.0, 1.0]);
    pipeline.infer().unwrap();

    // Records are renamed with the owning slot index.
    let info = pipeline.profiling_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].node_name, "subgraph0: matvec");

    // Variable states are the union over live subrequests.
    let states = pipeline.query_state();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name, "kv");

    assert!(!pipeline.supports_async_pipeline());

    // Cancellation forwards to the slot's own subrequest; funcall slots
    // that borrow one have none.
    pipeline.cancel(0).unwrap();
    assert!(sg0.requests()[0].was_cancelled());
    assert!(matches!(
        pipeline.cancel(1),
        Err(RuntimeError::NotAvailable { subgraph: 1 })
    ));
}

#[test]
fn test_completion_callback_subscription() {
    let sg0 = Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4])));
    let submodels = vec![Submodel::new(sg0, vec!["NPU".into()])];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let hits_cb = hits.clone();
    pipeline
        .subscribe(
            0,
            Box::new(move |result| {
                assert!(result.is_ok());
                hits_cb.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        )
        .unwrap();

    write_input(&pipeline, 0, &[0.0; 4]);
    pipeline.infer().unwrap();
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_metrics_accumulate() {
    let sg0 = Arc::new(HostSubgraph::identity("NPU", f32_port(&[1, 4])));
    let submodels = vec![Submodel::new(sg0, vec!["NPU".into()])];
    let verified = model(
        submodels,
        vec![f32_port(&[1, 4])],
        vec![f32_port(&[1, 4])],
        no_recompile(),
    )
    .bind_input(0, 0, 0)
    .bind_output(0, 0)
    .validate()
    .unwrap();

    let mut pipeline =
        SubgraphPipeline::new(Arc::new(verified), RuntimeConfig::default()).unwrap();
    for _ in 0..3 {
        write_input(&pipeline, 0, &[0.0; 4]);
        pipeline.infer().unwrap();
    }
    let metrics = pipeline.metrics();
    assert_eq!(metrics.inferences, 3);
    assert_eq!(metrics.failovers, 0);
    assert!(metrics.summary().contains("3 inference(s)"));
}
