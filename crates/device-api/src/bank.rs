// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Content-addressed bank of device-resident weight tensors.
//!
//! Closure weights with `update_required = false` are uploaded once and
//! shared by every inference request that binds them. The bank keys entries
//! by host-tensor storage identity and target device, so repeated lookups
//! are idempotent and concurrent lookups race only on the cache lock.

use std::collections::HashMap;
use std::sync::Mutex;
use tensor_host::Tensor;

/// A store of device-resident tensors keyed by host tensor and device.
pub trait WeightsBank: Send + Sync {
    /// Returns the device-resident counterpart of `host` on `device`,
    /// materialising it on first use.
    fn get(&self, host: &Tensor, device: &str) -> Tensor;
}

/// The default in-memory bank.
pub struct TensorBank {
    cache: Mutex<HashMap<(usize, String), Tensor>>,
}

impl TensorBank {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of materialised entries (diagnostics).
    pub fn len(&self) -> usize {
        self.cache.lock().expect("bank lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TensorBank {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightsBank for TensorBank {
    fn get(&self, host: &Tensor, device: &str) -> Tensor {
        let key = (host.storage_id(), device.to_string());
        let mut cache = self.cache.lock().expect("bank lock poisoned");
        if let Some(existing) = cache.get(&key) {
            return existing.clone();
        }
        tracing::debug!(
            "weights bank: materialising {} {} tensor for '{device}'",
            host.shape(),
            host.dtype()
        );
        let device_tensor = Tensor::zeros(host.shape().clone(), host.dtype());
        host.copy_to(&device_tensor)
            .expect("bank upload copies between identical shapes");
        cache.insert(key, device_tensor.clone());
        device_tensor
    }
}
