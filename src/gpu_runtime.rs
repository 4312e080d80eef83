//! The GPU execution boundary.
//!
//! [`GpuRuntime`] is consumed, not implemented, by this crate: the search
//! driver only ever holds a `&dyn GpuRuntime`, so it never depends on a
//! concrete backend. [`FakeGpuRuntime`], gated to tests, gives the search
//! driver's monotonicity and termination properties something deterministic
//! to run against without hardware.

use crate::codegen::KernelString;

/// A compiled kernel, opaque to this crate beyond what `launch` needs.
/// `handle` is backend-defined (an OpenCL/HIP program handle, an index into
/// a runtime-owned table, ...); this crate never interprets it.
#[derive(Debug)]
pub struct CompiledKernel {
    pub name: String,
    pub handle: u64,
}

impl CompiledKernel {
    pub fn new(name: impl Into<String>, handle: u64) -> Self {
        CompiledKernel {
            name: name.into(),
            handle,
        }
    }
}

/// A handle to an in-flight or completed kernel launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchHandle(pub u64);

/// The buffers a launch needs: device pointers are backend-defined, so this
/// crate only carries byte lengths and a workspace flag.
#[derive(Debug, Clone)]
pub struct KernelBuffers {
    pub a_len: usize,
    pub b_len: usize,
    pub c_len: usize,
    pub workspace_len: usize,
    pub alpha: f64,
    pub beta: f64,
}

/// The compiler rejected an emitted kernel source.
#[derive(Debug, thiserror::Error)]
#[error("kernel compilation failed for `{kernel_name}`: {reason}")]
pub struct CompileFailure {
    pub kernel_name: String,
    pub reason: String,
}

/// The runtime failed to enqueue or launch a compiled kernel.
#[derive(Debug, thiserror::Error)]
#[error("kernel launch failed for `{kernel_name}`: {reason}")]
pub struct LaunchFailure {
    pub kernel_name: String,
    pub reason: String,
}

/// The host-side boundary to a GPU (or GPU-like) execution backend.
///
/// All kernel sources this crate emits conform to a C-like compute-kernel
/// dialect (`__kernel`/`__global`/`__local`/`barrier`/`atomic_cmpxchg`); a
/// `GpuRuntime` implementation is responsible for compiling and running
/// that dialect, but this crate never assumes which backend does so.
pub trait GpuRuntime {
    /// A string identifying the device, used as the first component of the
    /// kernel cache key.
    fn device_identifier(&self) -> &str;

    /// Compiles kernel source to a backend-specific binary.
    fn compile(&self, kernel: &KernelString) -> Result<CompiledKernel, CompileFailure>;

    /// Enqueues and launches a compiled kernel with the given buffers,
    /// returning a handle to the (possibly still in-flight) launch.
    fn launch(
        &self,
        kernel: &CompiledKernel,
        buffers: &KernelBuffers,
    ) -> Result<LaunchHandle, LaunchFailure>;

    /// Event-based timing: blocks until the launch completes and returns its
    /// wall-clock duration in seconds.
    fn elapsed_seconds(&self, handle: LaunchHandle) -> f64;
}

/// A deterministic, hardware-free [`GpuRuntime`] for tests: "compilation"
/// always succeeds, and "device time" is a closed-form function of the
/// kernel's launch geometry so the search driver's monotonicity properties
/// are testable without a GPU.
#[cfg(test)]
pub struct FakeGpuRuntime {
    device: String,
    next_handle: std::cell::Cell<u64>,
    shapes: std::cell::RefCell<std::collections::HashMap<u64, KernelString>>,
}

#[cfg(test)]
impl FakeGpuRuntime {
    pub fn new(device: impl Into<String>) -> Self {
        FakeGpuRuntime {
            device: device.into(),
            next_handle: std::cell::Cell::new(0),
            shapes: std::cell::RefCell::new(std::collections::HashMap::new()),
        }
    }

    /// Deterministic closed-form cost: favors larger work-per-thread (more
    /// reuse) and penalizes more work-groups than the device can run
    /// concurrently, in inverse proportion — good enough to give local
    /// search a real gradient to descend without needing real timings.
    fn cost_seconds(kernel: &KernelString) -> f64 {
        let useful = (kernel.work_per_thread.max(1) * kernel.local_work_size.max(1)) as f64;
        let total_work = (kernel.global_work_size.max(1)) as f64;
        total_work / (useful * 1e9)
    }
}

#[cfg(test)]
impl GpuRuntime for FakeGpuRuntime {
    fn device_identifier(&self) -> &str {
        &self.device
    }

    fn compile(&self, kernel: &KernelString) -> Result<CompiledKernel, CompileFailure> {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.shapes.borrow_mut().insert(handle, kernel.clone());
        Ok(CompiledKernel::new(kernel.name.clone(), handle))
    }

    fn launch(
        &self,
        kernel: &CompiledKernel,
        _buffers: &KernelBuffers,
    ) -> Result<LaunchHandle, LaunchFailure> {
        Ok(LaunchHandle(kernel.handle))
    }

    fn elapsed_seconds(&self, handle: LaunchHandle) -> f64 {
        self.shapes
            .borrow()
            .get(&handle.0)
            .map(Self::cost_seconds)
            .unwrap_or(1e-3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_runtime_compiles_and_launches() {
        let runtime = FakeGpuRuntime::new("fake0");
        let kernel = KernelString {
            name: "k".into(),
            source: "__kernel void k() {}".into(),
            local_work_size: 64,
            global_work_size: 4096,
            work_per_thread: 4,
            description: "".into(),
        };
        let compiled = runtime.compile(&kernel).unwrap();
        let buffers = KernelBuffers {
            a_len: 0,
            b_len: 0,
            c_len: 0,
            workspace_len: 0,
            alpha: 1.0,
            beta: 0.0,
        };
        let handle = runtime.launch(&compiled, &buffers).unwrap();
        assert!(runtime.elapsed_seconds(handle) > 0.0);
    }

    #[test]
    fn cost_favors_more_reuse_per_thread() {
        let small = KernelString {
            name: "a".into(),
            source: String::new(),
            local_work_size: 64,
            global_work_size: 4096,
            work_per_thread: 1,
            description: String::new(),
        };
        let large = KernelString {
            work_per_thread: 8,
            ..small.clone()
        };
        assert!(FakeGpuRuntime::cost_seconds(&large) < FakeGpuRuntime::cost_seconds(&small));
    }
}
