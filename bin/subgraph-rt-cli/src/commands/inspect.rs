// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `inspect`: print the synthetic model's structure.

use crate::synthetic;

pub fn execute(calls: usize, width: usize) -> anyhow::Result<()> {
    let (model, _) = synthetic::chained_calls(calls, width, None)?;

    println!("model '{}': {} subgraphs", model.name, model.num_submodels());
    for (i, sm) in model.submodels.iter().enumerate() {
        let kind = match sm.replaced_by {
            Some(body) if body == i => "function body",
            Some(_) => "function call",
            None if sm.is_optimized_out() => "optimized out",
            None => "subgraph",
        };
        println!(
            "  [{i}] {kind}, {} activation input(s), {} closure slot(s){}",
            sm.param_base,
            sm.closure.len(),
            sm.replaced_by
                .filter(|&b| b != i)
                .map(|b| format!(", reuses subgraph {b}"))
                .unwrap_or_default(),
        );
    }
    println!(
        "{} inter-subgraph link(s), {} input(s), {} output(s)",
        model.submodels_input_to_prev_output.len(),
        model.inputs.len(),
        model.outputs.len(),
    );
    print!("{}", model.device_summary());
    Ok(())
}
