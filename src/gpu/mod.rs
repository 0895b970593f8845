// ============================================================================
// GPU MODULE — wgpu plumbing shared by every pipeline stage
// ============================================================================
//
// Architecture:
//   context.rs  — wgpu Device, Queue, adapter init, error scopes
//   texture.rs  — texture / sampler / buffer allocation
//   target.rs   — render targets, stage outputs, ping-pong pairs, MSAA
//   program.rs  — shader compile + pipeline link with named bindings
//   shaders.rs  — all WGSL shader source (inline strings)
//   readback.rs — texture → CPU copies for screenshots and tests
// ============================================================================

pub mod context;
pub mod program;
pub mod readback;
pub mod shaders;
pub mod target;
pub mod texture;

pub use context::GpuContext;
pub use program::{BindingDecl, Program, ProgramSpec, ShaderSource, assemble_program};
pub use target::{BufferedStageOutput, MultisampleTarget, RenderTarget, StageOutput};
pub use texture::{FilterMode, GpuTexture, Samplers, TexelFormat};

/// Vertices drawn by the fullscreen quad vertex stage.
pub const FULLSCREEN_VERTICES: u32 = 6;

/// Vertex stage shared by every image-space pass.
pub fn fullscreen_vertex(label: &str) -> ShaderSource<'_> {
    ShaderSource {
        label,
        source: shaders::FULLSCREEN_VS,
        entry: "vs_fullscreen",
    }
}

/// Begin a render pass writing the given attachments.
pub fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    attachments: &[Option<wgpu::RenderPassColorAttachment<'e>>],
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: attachments,
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
