// ============================================================================
// GPU CONTEXT — wgpu Device, Queue, and adapter initialization
// ============================================================================

use std::sync::Arc;

use super::texture::Samplers;
use crate::error::{PipelineError, PipelineResult};

/// Holds the core wgpu resources shared by every stage.
/// Created once per renderer; all GPU submission happens through it.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Maximum texture dimension supported by this device.
    pub max_texture_dim: u32,
    /// Sample counts usable for the half-float color targets.
    pub supported_sample_counts: Vec<u32>,
    /// Clamp-to-edge samplers shared by all passes.
    pub samplers: Samplers,
}

impl GpuContext {
    /// Create a headless GPU context.  Tries hardware first, then falls back
    /// to a software rasterizer (`force_fallback_adapter`).
    pub fn new() -> PipelineResult<Self> {
        match pollster::block_on(Self::new_async(false)) {
            Ok(ctx) => Ok(ctx),
            Err(PipelineError::NoAdapter) => {
                tracing::warn!("hardware adapter unavailable, trying software fallback");
                pollster::block_on(Self::new_async(true))
            }
            Err(e) => Err(e),
        }
    }

    async fn new_async(force_fallback: bool) -> PipelineResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await
            .ok_or(PipelineError::NoAdapter)?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let flags = adapter
            .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
            .flags;
        // Without TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES only 1x and 4x are usable.
        let supported_sample_counts: Vec<u32> = [1u32, 4]
            .into_iter()
            .filter(|&n| n == 1 || flags.sample_count_supported(n))
            .collect();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("trailfield GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .map_err(|e| PipelineError::Device(e.to_string()))?;

        // Anything not caught by an error scope is logged rather than panicking.
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            tracing::error!("uncaptured wgpu error: {err}");
        }));

        tracing::info!(
            adapter = %adapter_name,
            fallback = force_fallback,
            msaa = ?supported_sample_counts,
            "gpu context ready"
        );

        let samplers = Samplers::new(&device);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
            supported_sample_counts,
            samplers,
        })
    }

    /// Check if a texture of the given dimensions can be created.
    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }

    /// Highest supported sample count that does not exceed `requested`.
    pub fn clamp_sample_count(&self, requested: u32) -> u32 {
        self.supported_sample_counts
            .iter()
            .copied()
            .filter(|&n| n <= requested)
            .max()
            .unwrap_or(1)
    }

    /// Submit a single encoder's commands.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Open validation + out-of-memory scopes.  Must be paired with
    /// [`GpuContext::pop_scopes`].
    pub fn push_scopes(&self) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    }

    /// Close the scopes opened by [`GpuContext::push_scopes`] and return the
    /// first captured error message, if any.
    pub fn pop_scopes(&self) -> Option<String> {
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        validation.or(oom).map(|e| e.to_string())
    }

    /// Run `f` inside error scopes and map a captured error with `on_err`.
    pub fn scoped<T>(
        &self,
        f: impl FnOnce() -> PipelineResult<T>,
        on_err: impl FnOnce(String) -> PipelineError,
    ) -> PipelineResult<T> {
        self.push_scopes();
        let result = f();
        let captured = self.pop_scopes();
        let value = result?;
        match captured {
            Some(msg) => Err(on_err(msg)),
            None => Ok(value),
        }
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
