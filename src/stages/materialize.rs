// ============================================================================
// MATERIALIZE STAGE — particles rasterized as points
// ============================================================================
//
// Output slots:
//   0: color  Rgba16F  additive point color, cleared to 0 every draw
//   1: stamp  R32F     simulation time of the last point written, cleared to -1
//
// With multisampling the color goes through an MSAA buffer resolved into
// slot 0, and the stamp is drawn in a second single-sample pass so
// timestamps are never averaged.

use bytemuck::{Pod, Zeroable};

use super::{FrameClock, Stage, StageId, StageInputs};
use crate::error::PipelineResult;
use crate::gpu::program::{additive_target, replace_target};
use crate::gpu::texture::{create_index_buffer, create_uniform_buffer};
use crate::gpu::{
    self, BindingDecl, FilterMode, GpuContext, MultisampleTarget, Program, ProgramSpec, ShaderSource,
    StageOutput, TexelFormat, assemble_program, shaders,
};
use crate::params::{ParamMeta, ParamSet, ParamValue};

pub const OUTPUT_LAYOUT: [(TexelFormat, FilterMode); 2] = [
    (TexelFormat::Rgba16F, FilterMode::Linear),
    (TexelFormat::R32F, FilterMode::Nearest),
];

/// Stamp value meaning "no point landed here this tick".
pub const UNTOUCHED_STAMP: f64 = -1.0;

const INDEX_LAYOUT: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Uint32];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MaterializeUniforms {
    time: f32,
    aspect: f32,
    brightness: f32,
    scale: f32,
    particle_count: u32,
    state_width: u32,
    _pad: [u32; 2],
}

enum Raster {
    /// Color and stamp in one two-target pass.
    Single { points: Program },
    /// MSAA color pass resolved into slot 0, then a stamp-only pass.
    Multisample {
        color: Program,
        stamp: Program,
        target: MultisampleTarget,
    },
}

pub struct MaterializeStage {
    raster: Raster,
    uniforms: wgpu::Buffer,
    indices: wgpu::Buffer,
    particle_count: u32,
    output: StageOutput,
    params: ParamSet,
}

fn point_program(
    ctx: &GpuContext,
    label: &str,
    entry: &str,
    targets: &[Option<wgpu::ColorTargetState>],
    sample_count: u32,
) -> PipelineResult<Program> {
    let bindings = [
        BindingDecl::uniform("params"),
        BindingDecl::texture("geometry", TexelFormat::Rgba32F),
        BindingDecl::texture("color", TexelFormat::Rgba16F),
        BindingDecl::texture("props", TexelFormat::Rgba16F),
    ];
    let index_buffer = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<u32>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &INDEX_LAYOUT,
    };
    assemble_program(
        ctx,
        &ProgramSpec {
            label,
            vertex: ShaderSource {
                label,
                source: shaders::MATERIALIZE_SHADER,
                entry: "vs_points",
            },
            fragment: ShaderSource {
                label,
                source: shaders::MATERIALIZE_SHADER,
                entry,
            },
            bindings: &bindings,
            vertex_buffers: &[index_buffer],
            topology: wgpu::PrimitiveTopology::PointList,
            targets,
            sample_count,
        },
    )
}

impl MaterializeStage {
    /// `sample_count` must already be clamped to what the device supports.
    pub fn create(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        particle_count: u32,
        sample_count: u32,
    ) -> PipelineResult<Self> {
        let [(color_format, _), (stamp_format, _)] = OUTPUT_LAYOUT;
        let raster = if sample_count > 1 {
            Raster::Multisample {
                color: point_program(
                    ctx,
                    "materialize_color",
                    "fs_color",
                    &[additive_target(color_format)],
                    sample_count,
                )?,
                stamp: point_program(ctx, "materialize_stamp", "fs_stamp", &[replace_target(stamp_format)], 1)?,
                target: MultisampleTarget::new(ctx, "materialize_msaa", width, height, color_format, sample_count)?,
            }
        } else {
            Raster::Single {
                points: point_program(
                    ctx,
                    "materialize",
                    "fs_points",
                    &[additive_target(color_format), replace_target(stamp_format)],
                    1,
                )?,
            }
        };

        let uniforms = create_uniform_buffer(ctx, "materialize_params", &MaterializeUniforms::zeroed());
        let indices = create_index_buffer(ctx, "materialize_indices", particle_count)?;
        let output = StageOutput::new(ctx, "materialize", width, height, &OUTPUT_LAYOUT)?;
        tracing::info!(width, height, particles = particle_count, samples = sample_count, "materialize stage created");

        Ok(Self {
            raster,
            uniforms,
            indices,
            particle_count,
            output,
            params: ParamSet::new()
                .with("brightness", ParamValue::Float(0.6), ParamMeta::range(0.0, 4.0, 0.01))
                .with("scale", ParamValue::Float(0.9), ParamMeta::range(0.1, 4.0, 0.01)),
        })
    }

    pub fn sample_count(&self) -> u32 {
        match &self.raster {
            Raster::Single { .. } => 1,
            Raster::Multisample { target, .. } => target.sample_count,
        }
    }

    /// Rebuild the index buffer for a new particle count.  The render targets
    /// depend only on the render size and are kept.
    pub fn resize(&mut self, ctx: &GpuContext, particle_count: u32) -> PipelineResult<()> {
        let indices = create_index_buffer(ctx, "materialize_indices", particle_count)?;
        std::mem::replace(&mut self.indices, indices).destroy();
        self.particle_count = particle_count;
        Ok(())
    }

    fn clear_colors() -> [wgpu::Color; 2] {
        [
            wgpu::Color::TRANSPARENT,
            wgpu::Color {
                r: UNTOUCHED_STAMP,
                g: 0.0,
                b: 0.0,
                a: 0.0,
            },
        ]
    }
}

impl Stage for MaterializeStage {
    fn id(&self) -> StageId {
        StageId::Materialize
    }

    fn input(&self) -> Option<StageId> {
        Some(StageId::Simulate)
    }

    fn targets(&self) -> &StageOutput {
        &self.output
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn draw(
        &mut self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &StageInputs<'_>,
        clock: &FrameClock,
    ) -> PipelineResult<()> {
        let state = inputs.require_input(self.id())?;
        let uniforms = MaterializeUniforms {
            time: clock.time,
            aspect: self.output.height() as f32 / self.output.width() as f32,
            brightness: self.params.float("brightness", 0.6),
            scale: self.params.float("scale", 0.9),
            particle_count: self.particle_count,
            state_width: state.width(),
            _pad: [0; 2],
        };
        ctx.queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let resources = |program: &Program| {
            program.bind_group(
                &ctx.device,
                &[
                    ("params", self.uniforms.as_entire_binding()),
                    ("geometry", wgpu::BindingResource::TextureView(&state.texture(0).view)),
                    ("color", wgpu::BindingResource::TextureView(&state.texture(1).view)),
                    ("props", wgpu::BindingResource::TextureView(&state.texture(2).view)),
                ],
            )
        };
        let [clear_color, clear_stamp] = Self::clear_colors();
        let vertices = 0..self.particle_count;

        match &self.raster {
            Raster::Single { points } => {
                let bind_group = resources(points)?;
                let attachments = self
                    .output
                    .attachments(&[wgpu::LoadOp::Clear(clear_color), wgpu::LoadOp::Clear(clear_stamp)]);
                let mut pass = gpu::begin_pass(encoder, "materialize", &attachments);
                pass.set_pipeline(&points.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_vertex_buffer(0, self.indices.slice(..));
                pass.draw(vertices, 0..1);
            }
            Raster::Multisample { color, stamp, target } => {
                let color_group = resources(color)?;
                let stamp_group = resources(stamp)?;
                {
                    let attachment =
                        Some(target.attachment(self.output.texture(0), wgpu::LoadOp::Clear(clear_color)));
                    let mut pass = gpu::begin_pass(encoder, "materialize_color", std::slice::from_ref(&attachment));
                    pass.set_pipeline(&color.pipeline);
                    pass.set_bind_group(0, &color_group, &[]);
                    pass.set_vertex_buffer(0, self.indices.slice(..));
                    pass.draw(vertices.clone(), 0..1);
                }
                {
                    let attachments = self
                        .output
                        .attachments(&[wgpu::LoadOp::Load, wgpu::LoadOp::Clear(clear_stamp)]);
                    // Slot 0 already holds the resolved color; only the stamp is drawn.
                    let mut pass = gpu::begin_pass(encoder, "materialize_stamp", &attachments[1..]);
                    pass.set_pipeline(&stamp.pipeline);
                    pass.set_bind_group(0, &stamp_group, &[]);
                    pass.set_vertex_buffer(0, self.indices.slice(..));
                    pass.draw(vertices, 0..1);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::target::attachment_bytes;

    #[test]
    fn uniform_block_is_32_bytes() {
        assert_eq!(std::mem::size_of::<MaterializeUniforms>(), 32);
    }

    #[test]
    fn output_layout_fits_one_target() {
        assert_eq!(attachment_bytes(OUTPUT_LAYOUT.iter().map(|(f, _)| *f)), 12);
    }

    #[test]
    fn stamp_clears_below_any_simulation_time() {
        let [color, stamp] = MaterializeStage::clear_colors();
        assert_eq!(color, wgpu::Color::TRANSPARENT);
        assert!(stamp.r < 0.0);
    }
}
