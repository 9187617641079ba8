//! Core GPU context and device management.
//!
//! [`GpuContext`] holds the wgpu device and queue the [`WgpuBackend`](crate::WgpuBackend)
//! renders with. The compositor never needs a window: final images land in
//! an offscreen texture the caller can copy, present or read back.
//!
//! # Example
//!
//! ```no_run
//! use pinwheel::{GpuContext, WgpuBackend};
//!
//! let gpu = GpuContext::headless()?;
//! let backend = WgpuBackend::new(gpu, 1280, 720);
//! # Ok::<(), pinwheel::BackendError>(())
//! ```

use crate::error::BackendError;

/// Core GPU context holding wgpu resources.
///
/// All fields are public to allow direct access to wgpu APIs when needed,
/// e.g. from a [`SceneRenderer`](crate::SceneRenderer).
pub struct GpuContext {
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a GPU context without a surface.
    ///
    /// 1. Creates a wgpu instance with primary backends (Vulkan, Metal, DX12)
    /// 2. Requests any suitable adapter
    /// 3. Creates the logical device and command queue
    pub fn headless() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| BackendError::Device(format!("no suitable GPU adapter: {err}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Pinwheel Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|err| BackendError::Device(format!("failed to create device: {err}")))?;

        log::debug!("created headless GPU context on {:?}", adapter.get_info().name);
        Ok(Self { device, queue })
    }

    /// Wrap a device and queue created elsewhere, e.g. by a windowing app.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }
}
