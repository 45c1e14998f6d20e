mod simplifier;

pub use simplifier::Simplifier;

/// Tensor backend used by the binaries, picked at compile time.
#[cfg(feature = "wgpu-backend")]
pub type InferenceBackend = burn_wgpu::Wgpu;

#[cfg(all(feature = "tch-backend", not(feature = "wgpu-backend")))]
pub type InferenceBackend = burn_tch::LibTorch<f32>;

#[cfg(not(any(feature = "wgpu-backend", feature = "tch-backend")))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;
