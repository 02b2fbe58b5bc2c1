use burn::backend::ndarray::NdArrayDevice;

/// CPU backend used for index generation and tests.
pub type CpuBackend = burn::backend::NdArray;

/// CPU backend with automatic differentiation, used for training.
pub type CpuAutodiffBackend = burn::backend::Autodiff<CpuBackend>;

pub fn init_cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

#[cfg(feature = "gpu")]
pub use gpu::*;

#[cfg(feature = "gpu")]
mod gpu {
    use burn::backend::wgpu::WgpuDevice;

    pub type WgpuBackend = burn::backend::Wgpu;

    pub type WgpuAutodiffBackend = burn::backend::Autodiff<WgpuBackend>;

    pub fn init_gpu_device() -> WgpuDevice {
        // Burn's WGPU backend uses Default::default() for device creation
        // Metal backend is automatically selected on macOS when available
        WgpuDevice::default()
    }
}
