// ============================================================================
// GPU TEXTURE — allocation wrappers for textures, samplers and buffers
// ============================================================================
//
// No policy lives here: stages decide sizes and formats, this module only
// allocates and checks that the device accepted the request.

use wgpu::util::DeviceExt;

use super::context::GpuContext;
use crate::error::{PipelineError, PipelineResult};

/// Pixel format / precision tag for every texture the pipeline allocates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// 8-bit normalized RGBA (final output, screenshots).
    Rgba8,
    /// Half-float RGBA (trail, bloom and combine images).
    Rgba16F,
    /// Single-float RGBA (particle positions).
    Rgba32F,
    /// Single-channel float (per-pixel timestamps).
    R32F,
    /// Single-channel unsigned int.
    R32U,
}

impl TexelFormat {
    pub fn wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            Self::Rgba16F => wgpu::TextureFormat::Rgba16Float,
            Self::Rgba32F => wgpu::TextureFormat::Rgba32Float,
            Self::R32F => wgpu::TextureFormat::R32Float,
            Self::R32U => wgpu::TextureFormat::R32Uint,
        }
    }

    /// Bytes per texel in a linear copy.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8 | Self::R32F | Self::R32U => 4,
            Self::Rgba16F => 8,
            Self::Rgba32F => 16,
        }
    }

    /// Render-target byte cost and component alignment, used to keep a set of
    /// color attachments under the per-sample budget.
    pub fn target_cost(self) -> (u32, u32) {
        match self {
            Self::Rgba8 => (8, 1),
            Self::Rgba16F => (8, 2),
            Self::Rgba32F => (16, 4),
            Self::R32F | Self::R32U => (4, 4),
        }
    }

    pub fn is_filterable(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Rgba16F)
    }

    pub fn is_blendable(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Rgba16F)
    }

    pub fn sample_type(self) -> wgpu::TextureSampleType {
        match self {
            Self::R32U => wgpu::TextureSampleType::Uint,
            other => wgpu::TextureSampleType::Float {
                filterable: other.is_filterable(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// A GPU texture plus the default view every pass binds.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    pub filter: FilterMode,
    pub sample_count: u32,
}

impl GpuTexture {
    /// Upload tightly packed texel data covering the whole texture.
    pub fn write_full(&self, queue: &wgpu::Queue, data: &[u8]) {
        let bpp = self.format.bytes_per_texel();
        debug_assert_eq!(data.len(), (self.width * self.height * bpp) as usize);

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bpp * self.width),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Release the GPU allocation now instead of waiting for the last handle
    /// to drop.  Work already submitted that reads the texture still completes.
    pub fn destroy(self) {
        self.texture.destroy();
    }
}

/// Allocate a single-sample 2D texture usable as a render target, a sampled
/// input and a copy source/destination.
pub fn create_texture(
    ctx: &GpuContext,
    label: &str,
    width: u32,
    height: u32,
    format: TexelFormat,
    filter: FilterMode,
) -> PipelineResult<GpuTexture> {
    allocate(ctx, label, width, height, format, filter, 1)
}

/// Allocate a multisampled render-only texture.
pub fn create_multisample_texture(
    ctx: &GpuContext,
    label: &str,
    width: u32,
    height: u32,
    format: TexelFormat,
    sample_count: u32,
) -> PipelineResult<GpuTexture> {
    allocate(ctx, label, width, height, format, FilterMode::Nearest, sample_count)
}

fn allocate(
    ctx: &GpuContext,
    label: &str,
    width: u32,
    height: u32,
    format: TexelFormat,
    filter: FilterMode,
    sample_count: u32,
) -> PipelineResult<GpuTexture> {
    if width == 0 || height == 0 {
        return Err(PipelineError::resource(label, format!("zero-sized texture {width}x{height}")));
    }
    if !ctx.supports_size(width, height) {
        return Err(PipelineError::resource(
            label,
            format!(
                "{}x{} exceeds the device limit of {}",
                width, height, ctx.max_texture_dim
            ),
        ));
    }
    if filter == FilterMode::Linear && !format.is_filterable() {
        return Err(PipelineError::resource(
            label,
            format!("{:?} cannot be sampled with linear filtering", format),
        ));
    }

    // Multisampled textures can only be rendered to and resolved.
    let usage = if sample_count > 1 {
        wgpu::TextureUsages::RENDER_ATTACHMENT
    } else {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
    };

    ctx.scoped(
        || {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count,
                dimension: wgpu::TextureDimension::D2,
                format: format.wgpu(),
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            Ok(GpuTexture {
                texture,
                view,
                width,
                height,
                format,
                filter,
                sample_count,
            })
        },
        |reason| PipelineError::resource(label, reason),
    )
}

/// Clamp-to-edge samplers shared by all stages.
pub struct Samplers {
    pub linear: wgpu::Sampler,
    pub nearest: wgpu::Sampler,
}

impl Samplers {
    pub fn new(device: &wgpu::Device) -> Self {
        let linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_linear"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_nearest"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self { linear, nearest }
    }

    /// The sampler matching the filter mode `tex` was created with.
    pub fn for_texture(&self, tex: &GpuTexture) -> &wgpu::Sampler {
        match tex.filter {
            FilterMode::Linear => &self.linear,
            FilterMode::Nearest => &self.nearest,
        }
    }
}

/// Vertex buffer holding `0..count` as `u32`, one entry per particle.
pub fn create_index_buffer(ctx: &GpuContext, label: &str, count: u32) -> PipelineResult<wgpu::Buffer> {
    let indices: Vec<u32> = (0..count.max(1)).collect();
    ctx.scoped(
        || {
            Ok(ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::VERTEX,
            }))
        },
        |reason| PipelineError::resource(label, reason),
    )
}

/// Uniform buffer initialised from a `Pod` value and updatable via
/// `queue.write_buffer`.
pub fn create_uniform_buffer<T: bytemuck::Pod>(ctx: &GpuContext, label: &str, value: &T) -> wgpu::Buffer {
    ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_targets_are_not_blendable() {
        assert!(TexelFormat::Rgba16F.is_blendable());
        assert!(!TexelFormat::Rgba32F.is_blendable());
        assert!(!TexelFormat::R32F.is_blendable());
        assert!(!TexelFormat::R32F.is_filterable());
    }

    #[test]
    fn texel_sizes_match_formats() {
        assert_eq!(TexelFormat::Rgba8.bytes_per_texel(), 4);
        assert_eq!(TexelFormat::Rgba16F.bytes_per_texel(), 8);
        assert_eq!(TexelFormat::Rgba32F.bytes_per_texel(), 16);
        assert_eq!(TexelFormat::R32U.wgpu(), wgpu::TextureFormat::R32Uint);
    }
}
