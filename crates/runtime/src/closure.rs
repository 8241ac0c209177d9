// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight closure resolution.
//!
//! For each closure slot of a function call, exactly one of:
//!
//! 1. **Bank bind** — `update_required` is false: the device-resident tensor
//!    comes from the weights bank. Rebinding is idempotent and cheap, and
//!    doing it on every pass is what restores these slots after a failover
//!    rebuilds the subrequest.
//! 2. **Unpack** — the host closure is stored in a narrower dtype than the
//!    body's input: dispatch to `unpack`/`unpack1`/`unpack2` depending on
//!    which dequantisation parameters are present.
//! 3. **Copy / set** — same dtype: zero-copy bind, or an element copy when
//!    the copy gate is on for this submodel.
//!
//! Copies and unpacks of distinct slots are independent and run in parallel.

use crate::RuntimeError;
use device_api::{InferRequest, Port};
use rayon::prelude::*;
use subgraph_ir::PartitionedModel;
use tensor_host::unpack;

/// Binds bank-resident (`update_required = false`) closure slots of call
/// site `idx` onto `request`. Used at construction; the runtime passes go
/// through [`unpack_closure`], which covers these slots too.
pub(crate) fn preset_bank_closures(
    model: &PartitionedModel,
    idx: usize,
    request: &dyn InferRequest,
) -> Result<(), RuntimeError> {
    let sm = &model.submodels[idx];
    let real_idx = model.real(idx);
    let device = model.submodels[real_idx]
        .current_device()
        .ok_or(RuntimeError::DevicesExhausted { subgraph: real_idx })?;

    for (cidx, closure) in sm.closure.iter().enumerate() {
        if sm.update_required[cidx] {
            continue;
        }
        let port = Port::Input(sm.param_base + cidx);
        let device_tensor = model.weights_bank.get(closure, &device);
        request
            .set_tensor(port, device_tensor)
            .map_err(|e| RuntimeError::Subgraph {
                subgraph: idx,
                source: e,
            })?;
    }
    Ok(())
}

/// Resolves every closure slot of call site `idx` onto `request`.
pub(crate) fn unpack_closure(
    model: &PartitionedModel,
    idx: usize,
    request: &dyn InferRequest,
    do_copy: bool,
) -> Result<(), RuntimeError> {
    let sm = &model.submodels[idx];
    debug_assert!(sm.is_funcall(), "closure resolution on a non-funcall slot");
    let real_idx = model.real(idx);
    let device = model.submodels[real_idx]
        .current_device()
        .ok_or(RuntimeError::DevicesExhausted { subgraph: real_idx })?;

    let device_err = |e| RuntimeError::Subgraph {
        subgraph: idx,
        source: e,
    };

    // Sort the slots first; the heavy work runs in parallel after.
    let mut copy_required: Vec<usize> = Vec::new();
    let mut unpack_required: Vec<usize> = Vec::new();

    for (cidx, closure) in sm.closure.iter().enumerate() {
        let port = Port::Input(sm.param_base + cidx);
        if !sm.update_required[cidx] {
            let device_tensor = model.weights_bank.get(closure, &device);
            request.set_tensor(port, device_tensor).map_err(device_err)?;
            continue;
        }
        let bound = request.get_tensor(port).map_err(device_err)?;
        if closure.dtype() != bound.dtype() {
            unpack_required.push(cidx);
        } else if do_copy {
            copy_required.push(cidx);
        } else {
            request.set_tensor(port, closure.clone()).map_err(device_err)?;
        }
    }

    copy_required.par_iter().try_for_each(|&cidx| {
        let port = Port::Input(sm.param_base + cidx);
        let bound = request.get_tensor(port).map_err(device_err)?;
        sm.closure[cidx].copy_to(&bound)?;
        Ok::<(), RuntimeError>(())
    })?;

    // Slots are disjoint, so the kernels may run concurrently.
    unpack_required.par_iter().try_for_each(|&cidx| {
        let port = Port::Input(sm.param_base + cidx);
        let bound = request.get_tensor(port).map_err(device_err)?;
        match (&sm.zerops[cidx], &sm.scales[cidx]) {
            (Some(zerop), Some(scale)) => {
                unpack::unpack2(&sm.closure[cidx], zerop, scale, &bound)?
            }
            (None, Some(scale)) => unpack::unpack1(&sm.closure[cidx], scale, &bound)?,
            _ => unpack::unpack(&sm.closure[cidx], &bound)?,
        }
        Ok::<(), RuntimeError>(())
    })?;

    Ok(())
}
