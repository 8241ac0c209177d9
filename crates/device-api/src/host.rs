// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host reference backend.
//!
//! Executes subgraph bodies as host closures over the bound tensors. This
//! backs the test suites and the demo CLI without requiring accelerator
//! hardware, and shows a real backend what the orchestrator expects:
//! pre-bound default tensors per port, rebindable inputs and outputs, and
//! `start_async`/`wait` that may run on another thread.
//!
//! Failure injection (`failing`) makes a compiled subgraph raise on every
//! `infer`, which is how the failover path is exercised end to end.

use crate::{
    CompiledSubgraph, CompletionCallback, DeviceError, InferRequest, Port, PortDesc,
    ProfilingRecord, VariableState,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tensor_host::Tensor;

/// A subgraph body: reads the bound inputs, writes the bound outputs.
///
/// Bound tensors may be strided views (the spatial executor binds slices),
/// so kernels should go through [`Tensor::copy_to`] or guard-based access
/// rather than assuming dense storage.
pub type HostKernel = Arc<dyn Fn(&[Tensor], &[Tensor]) -> Result<(), DeviceError> + Send + Sync>;

/// A subgraph "compiled" for a host device.
pub struct HostSubgraph {
    name: String,
    device: String,
    inputs: Vec<PortDesc>,
    outputs: Vec<PortDesc>,
    kernel: HostKernel,
    fail_infer: bool,
    state_descs: Vec<(String, PortDesc)>,
    requests: Mutex<Vec<Arc<HostRequestState>>>,
}

impl HostSubgraph {
    pub fn new(
        device: impl Into<String>,
        inputs: Vec<PortDesc>,
        outputs: Vec<PortDesc>,
        kernel: HostKernel,
    ) -> Self {
        Self {
            name: "kernel".into(),
            device: device.into(),
            inputs,
            outputs,
            kernel,
            fail_infer: false,
            state_descs: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A single-input single-output subgraph that copies input to output.
    pub fn identity(device: impl Into<String>, port: PortDesc) -> Self {
        let kernel: HostKernel = Arc::new(|inputs: &[Tensor], outputs: &[Tensor]| {
            inputs[0].copy_to(&outputs[0])?;
            Ok(())
        });
        Self::new(device, vec![port.clone()], vec![port], kernel)
    }

    /// Names the kernel in profiling records.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Makes every `infer` on this subgraph fail (failover testing).
    pub fn failing(mut self) -> Self {
        self.fail_infer = true;
        self
    }

    /// Adds a variable state exposed by every request.
    pub fn with_state(mut self, name: impl Into<String>, desc: PortDesc) -> Self {
        self.state_descs.push((name.into(), desc));
        self
    }

    /// Snapshot of every request created so far (test introspection).
    pub fn requests(&self) -> Vec<Arc<HostRequestState>> {
        self.requests.lock().expect("request registry poisoned").clone()
    }
}

impl CompiledSubgraph for HostSubgraph {
    fn device(&self) -> &str {
        &self.device
    }

    fn inputs(&self) -> &[PortDesc] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortDesc] {
        &self.outputs
    }

    fn create_request(&self) -> Result<Box<dyn InferRequest>, DeviceError> {
        let defaults = |descs: &[PortDesc]| -> Vec<Tensor> {
            descs
                .iter()
                .map(|d| Tensor::zeros(d.shape.clone(), d.dtype))
                .collect()
        };
        let states = self
            .state_descs
            .iter()
            .map(|(name, d)| VariableState {
                name: name.clone(),
                state: Tensor::zeros(d.shape.clone(), d.dtype),
            })
            .collect();
        let state = Arc::new(HostRequestState {
            name: self.name.clone(),
            device: self.device.clone(),
            fail_infer: self.fail_infer,
            kernel: Arc::clone(&self.kernel),
            port_descs: (self.inputs.clone(), self.outputs.clone()),
            inputs: Mutex::new(defaults(&self.inputs)),
            outputs: Mutex::new(defaults(&self.outputs)),
            infer_count: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            last_duration: Mutex::new(Duration::ZERO),
            callback: Mutex::new(None),
            pending: Mutex::new(None),
            states,
        });
        self.requests
            .lock()
            .expect("request registry poisoned")
            .push(Arc::clone(&state));
        tracing::debug!("host backend: created request on '{}'", self.device);
        Ok(Box::new(HostRequest { state }))
    }
}

/// Shared state of one host request; also the test-introspection handle.
pub struct HostRequestState {
    name: String,
    device: String,
    fail_infer: bool,
    kernel: HostKernel,
    port_descs: (Vec<PortDesc>, Vec<PortDesc>),
    inputs: Mutex<Vec<Tensor>>,
    outputs: Mutex<Vec<Tensor>>,
    infer_count: AtomicUsize,
    cancelled: AtomicBool,
    last_duration: Mutex<Duration>,
    callback: Mutex<Option<CompletionCallback>>,
    pending: Mutex<Option<JoinHandle<Result<(), DeviceError>>>>,
    states: Vec<VariableState>,
}

impl HostRequestState {
    /// The tensor currently bound to input `idx`.
    pub fn bound_input(&self, idx: usize) -> Option<Tensor> {
        self.inputs.lock().expect("bindings poisoned").get(idx).cloned()
    }

    /// The tensor currently bound to output `idx`.
    pub fn bound_output(&self, idx: usize) -> Option<Tensor> {
        self.outputs.lock().expect("bindings poisoned").get(idx).cloned()
    }

    /// How many inferences completed successfully.
    pub fn infer_count(&self) -> usize {
        self.infer_count.load(Ordering::SeqCst)
    }

    /// Whether cancellation was requested.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn run_once(self: &Arc<Self>) -> Result<(), DeviceError> {
        let start = Instant::now();
        let result = if self.fail_infer {
            Err(DeviceError::InferFailed {
                device: self.device.clone(),
                reason: "injected failure".into(),
            })
        } else {
            let inputs = self.inputs.lock().expect("bindings poisoned").clone();
            let outputs = self.outputs.lock().expect("bindings poisoned").clone();
            (self.kernel)(&inputs, &outputs)
        };
        if result.is_ok() {
            self.infer_count.fetch_add(1, Ordering::SeqCst);
            *self.last_duration.lock().expect("timing poisoned") = start.elapsed();
        }
        if let Some(cb) = &*self.callback.lock().expect("callback poisoned") {
            cb(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(e),
            });
        }
        result
    }

}

/// The boxed request handed to the orchestrator.
struct HostRequest {
    state: Arc<HostRequestState>,
}

impl InferRequest for HostRequest {
    fn set_tensor(&self, port: Port, tensor: Tensor) -> Result<(), DeviceError> {
        let (kind, idx) = match port {
            Port::Input(i) => ("input", i),
            Port::Output(i) => ("output", i),
        };
        let (descs, slots) = match port {
            Port::Input(_) => (&self.state.port_descs.0, &self.state.inputs),
            Port::Output(_) => (&self.state.port_descs.1, &self.state.outputs),
        };
        let desc = descs.get(idx).ok_or(DeviceError::InvalidPort {
            kind,
            index: idx,
            count: descs.len(),
        })?;
        if tensor.shape() != &desc.shape || tensor.dtype() != desc.dtype {
            return Err(DeviceError::BindMismatch {
                kind,
                index: idx,
                expected: format!("{} {}", desc.shape, desc.dtype),
                actual: format!("{} {}", tensor.shape(), tensor.dtype()),
            });
        }
        slots.lock().expect("bindings poisoned")[idx] = tensor;
        Ok(())
    }

    fn get_tensor(&self, port: Port) -> Result<Tensor, DeviceError> {
        let (kind, idx, slots) = match port {
            Port::Input(i) => ("input", i, &self.state.inputs),
            Port::Output(i) => ("output", i, &self.state.outputs),
        };
        let bound = slots.lock().expect("bindings poisoned");
        bound.get(idx).cloned().ok_or(DeviceError::InvalidPort {
            kind,
            index: idx,
            count: bound.len(),
        })
    }

    fn infer(&self) -> Result<(), DeviceError> {
        self.state.run_once()
    }

    fn start_async(&self) -> Result<(), DeviceError> {
        let mut pending = self.state.pending.lock().expect("pending poisoned");
        if pending.is_some() {
            return Err(DeviceError::AlreadyInFlight);
        }
        let state = Arc::clone(&self.state);
        *pending = Some(std::thread::spawn(move || state.run_once()));
        Ok(())
    }

    fn wait(&self) -> Result<(), DeviceError> {
        let handle = self
            .state
            .pending
            .lock()
            .expect("pending poisoned")
            .take()
            .ok_or(DeviceError::NotStarted)?;
        handle.join().unwrap_or_else(|_| {
            Err(DeviceError::InferFailed {
                device: self.state.device.clone(),
                reason: "worker thread panicked".into(),
            })
        })
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    fn set_callback(&self, callback: CompletionCallback) {
        *self.state.callback.lock().expect("callback poisoned") = Some(callback);
    }

    fn query_state(&self) -> Vec<VariableState> {
        self.state.states.clone()
    }

    fn profiling_info(&self) -> Vec<ProfilingRecord> {
        let elapsed = *self.state.last_duration.lock().expect("timing poisoned");
        vec![ProfilingRecord {
            node_name: self.state.name.clone(),
            real_time: elapsed,
            cpu_time: elapsed,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_host::{DType, Shape};

    fn f32_port(dims: Vec<usize>) -> PortDesc {
        PortDesc::new(Shape::new(dims), DType::F32)
    }

    #[test]
    fn test_identity_infer() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 4]));
        let rq = sg.create_request().unwrap();

        let input = Tensor::from_f32(Shape::matrix(1, 4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        rq.set_tensor(Port::Input(0), input).unwrap();
        rq.infer().unwrap();

        let out = rq.get_tensor(Port::Output(0)).unwrap();
        assert_eq!(out.read().as_slice::<f32>(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_async_start_and_wait() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 2]));
        let rq = sg.create_request().unwrap();
        rq.set_tensor(
            Port::Input(0),
            Tensor::from_f32(Shape::matrix(1, 2), &[5.0, 6.0]).unwrap(),
        )
        .unwrap();

        rq.start_async().unwrap();
        assert!(matches!(
            rq.start_async(),
            Err(DeviceError::AlreadyInFlight)
        ));
        rq.wait().unwrap();
        assert!(matches!(rq.wait(), Err(DeviceError::NotStarted)));

        let out = rq.get_tensor(Port::Output(0)).unwrap();
        assert_eq!(out.read().as_slice::<f32>(), &[5.0, 6.0]);
    }

    #[test]
    fn test_injected_failure() {
        let sg = HostSubgraph::identity("NPU", f32_port(vec![1, 2])).failing();
        let rq = sg.create_request().unwrap();
        assert!(matches!(rq.infer(), Err(DeviceError::InferFailed { .. })));
    }

    #[test]
    fn test_callback_invoked() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 2]));
        let rq = sg.create_request().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        rq.set_callback(Box::new(move |result| {
            assert!(result.is_ok());
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }));

        rq.infer().unwrap();
        rq.infer().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bind_validation() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 4]));
        let rq = sg.create_request().unwrap();

        let wrong_shape = Tensor::zeros(Shape::matrix(1, 5), DType::F32);
        assert!(matches!(
            rq.set_tensor(Port::Input(0), wrong_shape),
            Err(DeviceError::BindMismatch { .. })
        ));
        let t = Tensor::zeros(Shape::matrix(1, 4), DType::F32);
        assert!(matches!(
            rq.set_tensor(Port::Input(3), t),
            Err(DeviceError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_request_registry_introspection() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 2]));
        let rq = sg.create_request().unwrap();
        assert_eq!(sg.requests().len(), 1);

        let bound = Tensor::zeros(Shape::matrix(1, 2), DType::F32);
        rq.set_tensor(Port::Input(0), bound.clone()).unwrap();
        let probe = &sg.requests()[0];
        assert!(probe.bound_input(0).unwrap().same_storage(&bound));
        assert_eq!(probe.infer_count(), 0);
        rq.infer().unwrap();
        assert_eq!(probe.infer_count(), 1);
    }

    #[test]
    fn test_variable_states() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 2]))
            .with_state("kv", f32_port(vec![1, 8]));
        let rq = sg.create_request().unwrap();
        let states = rq.query_state();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].name, "kv");
    }

    #[test]
    fn test_cancel_flag() {
        let sg = HostSubgraph::identity("CPU", f32_port(vec![1, 2]));
        let rq = sg.create_request().unwrap();
        rq.cancel();
        assert!(sg.requests()[0].was_cancelled());
    }
}
