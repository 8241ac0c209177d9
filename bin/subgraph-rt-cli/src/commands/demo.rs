// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `demo`: run a synthetic partitioned model end to end.

use crate::synthetic;
use runtime::{RuntimeConfig, SubgraphPipeline};

#[allow(clippy::too_many_arguments)]
pub fn execute(
    calls: usize,
    width: usize,
    funcall_async: bool,
    input_copy: String,
    iterations: usize,
    spatial_range: usize,
    spatial_nway: usize,
) -> anyhow::Result<()> {
    let spatial = (spatial_range > 0).then_some((spatial_range, spatial_nway));
    let (model, expected_delta) = synthetic::chained_calls(calls, width, spatial)?;

    let config = RuntimeConfig {
        funcall_async,
        input_copy,
        enable_profiling: true,
    };
    let mut pipeline = SubgraphPipeline::new(model, config)?;

    let io_width = pipeline
        .input(0)
        .expect("model has one input")
        .shape()
        .num_elements();

    for iteration in 0..iterations.max(1) {
        {
            let input = pipeline.input(0).expect("model has one input");
            let mut data = input.write();
            for (i, value) in data.as_slice_mut::<f32>().iter_mut().enumerate() {
                *value = (iteration + i) as f32;
            }
        }

        pipeline.infer()?;

        let output = pipeline.output(0).expect("model has one output");
        let data = output.read();
        let values = data.as_slice::<f32>();
        let ok = values
            .iter()
            .enumerate()
            .all(|(i, &v)| v == (iteration + i) as f32 + expected_delta);
        println!(
            "iteration {iteration}: output[0..4] = {:?}, expected delta {expected_delta} -> {}",
            &values[..4.min(io_width)],
            if ok { "OK" } else { "MISMATCH" }
        );
        anyhow::ensure!(ok, "iteration {iteration} produced a wrong result");
    }

    println!("{}", pipeline.metrics().summary());
    for record in pipeline.profiling_info() {
        println!(
            "  {}: {:.3}ms",
            record.node_name,
            record.real_time.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
