// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Synthetic partitioned models backed by the host reference backend.
//!
//! The demo model is one function body shared by `calls` call sites, each
//! with its own quantised closure, chained head to tail:
//!
//! ```text
//! input -> call0(body) -> call1(body) -> ... -> callN-1(body) -> output
//! ```
//!
//! The body computes `output = activation + closure`, so the expected
//! result is input plus the sum of all dequantised closures — easy to check
//! from the demo driver.

use device_api::host::{HostKernel, HostSubgraph};
use device_api::{CompiledSubgraph, DeviceError, PortDesc, TensorBank};
use std::sync::Arc;
use subgraph_ir::{PartitionedModel, Spatial, SpatialParam, SubgraphCompiler, Submodel, Verified};
use tensor_host::{DType, Shape, Tensor};

/// A compiler that recompiles any subgraph for the fallback device.
struct HostCompiler {
    width: usize,
}

impl SubgraphCompiler for HostCompiler {
    fn compile(
        &self,
        sub_idx: usize,
        device: &str,
    ) -> Result<Arc<dyn CompiledSubgraph>, DeviceError> {
        tracing::info!("compiling subgraph {sub_idx} for '{device}'");
        Ok(Arc::new(body_subgraph(device, self.width)))
    }
}

/// The shared function body: `output = activation + closure`.
///
/// The activation and the output arrive as strided views when the body runs
/// spatially, so both sides are staged through contiguous scratch tensors.
fn body_subgraph(device: &str, width: usize) -> HostSubgraph {
    let port = PortDesc::new(Shape::matrix(1, width), DType::F32);
    let kernel: HostKernel = Arc::new(|inputs, outputs| {
        let scratch = Tensor::zeros(inputs[0].shape().clone(), inputs[0].dtype());
        inputs[0].copy_to(&scratch)?;
        {
            let weights = inputs[1].read();
            let mut data = scratch.write();
            for (value, w) in data
                .as_slice_mut::<f32>()
                .iter_mut()
                .zip(weights.as_slice::<f32>())
            {
                *value += w;
            }
        }
        scratch.copy_to(&outputs[0])?;
        Ok(())
    });
    HostSubgraph::new(device, vec![port.clone(), port.clone()], vec![port], kernel).named("add")
}

/// Builds the chained-calls demo model.
///
/// Every call site carries an i8 closure holding the value `i + 1` with a
/// scale of `0.5`, so call `i` adds `(i + 1) / 2` everywhere. When
/// `spatial` is given, the body is compiled for the block width and fanned
/// over the full range.
pub fn chained_calls(
    calls: usize,
    width: usize,
    spatial: Option<(usize, usize)>,
) -> anyhow::Result<(Arc<PartitionedModel<Verified>>, f32)> {
    anyhow::ensure!(calls >= 1, "at least one call site is required");

    let (body_width, io_width) = match spatial {
        Some((range, nway)) => (nway, range),
        None => (width, width),
    };

    let mut expected_delta = 0.0f32;
    let mut submodels = Vec::with_capacity(calls);
    for i in 0..calls {
        let mut sm = if i == 0 {
            Submodel::new(
                Arc::new(body_subgraph("NPU", body_width)),
                vec!["NPU".into(), "CPU".into()],
            )
            .as_body(0, 1)
        } else {
            Submodel::call_of(0, 1)
        };
        if let Some((range, nway)) = spatial {
            if i == 0 {
                sm = sm.with_spatial(Spatial::over(
                    vec![SpatialParam { idx: 0, dim: 1 }],
                    1,
                    range,
                    nway,
                ));
            }
        }
        let weight = (i + 1) as i8;
        expected_delta += weight as f32 * 0.5;
        sm.push_closure(
            Tensor::from_elems(Shape::matrix(1, body_width), &vec![weight; body_width]).unwrap(),
            Some(Tensor::from_f32(Shape::matrix(1, 1), &[0.5]).unwrap()),
            None,
            true,
        );
        submodels.push(sm);
    }

    let io_port = PortDesc::new(Shape::matrix(1, io_width), DType::F32);
    let mut model = PartitionedModel::new(
        "chained-calls",
        submodels,
        vec![io_port.clone()],
        vec![io_port],
        Arc::new(HostCompiler { width: body_width }),
        Arc::new(TensorBank::new()),
    )
    .bind_input(0, 0, 0)
    .bind_output(calls - 1, 0);
    for i in 1..calls {
        model = model.link((i - 1, 0), (i, 0));
    }

    Ok((Arc::new(model.validate()?), expected_delta))
}
