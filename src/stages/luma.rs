// ============================================================================
// LUMA STAGE — isolate bloom source pixels
// ============================================================================

use bytemuck::{Pod, Zeroable};

use super::{FrameClock, Stage, StageId, StageInputs};
use crate::error::PipelineResult;
use crate::gpu::program::replace_target;
use crate::gpu::texture::create_uniform_buffer;
use crate::gpu::{
    self, BindingDecl, FilterMode, GpuContext, Program, ProgramSpec, ShaderSource, StageOutput, TexelFormat,
    assemble_program, shaders,
};
use crate::params::{ParamMeta, ParamSet, ParamValue};

/// Rec. 709 luma, the brightness proxy used by the threshold shader.
pub fn luma(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LumaUniforms {
    threshold: f32,
    _pad: [f32; 3],
}

pub struct LumaStage {
    program: Program,
    uniforms: wgpu::Buffer,
    output: StageOutput,
    params: ParamSet,
}

impl LumaStage {
    pub fn create(ctx: &GpuContext, width: u32, height: u32) -> PipelineResult<Self> {
        let bindings = [
            BindingDecl::uniform("params"),
            BindingDecl::texture("source", TexelFormat::Rgba16F),
            BindingDecl::sampler("samp"),
        ];
        let program = assemble_program(
            ctx,
            &ProgramSpec {
                label: "luma",
                vertex: gpu::fullscreen_vertex("luma"),
                fragment: ShaderSource {
                    label: "luma",
                    source: shaders::LUMA_FS,
                    entry: "fs_luma",
                },
                bindings: &bindings,
                vertex_buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                targets: &[replace_target(TexelFormat::Rgba16F)],
                sample_count: 1,
            },
        )?;
        let uniforms = create_uniform_buffer(ctx, "luma_params", &LumaUniforms::zeroed());
        let output = StageOutput::new(
            ctx,
            "luma",
            width,
            height,
            &[(TexelFormat::Rgba16F, FilterMode::Linear)],
        )?;

        Ok(Self {
            program,
            uniforms,
            output,
            params: ParamSet::new().with("threshold", ParamValue::Float(0.25), ParamMeta::range(0.0, 2.0, 0.01)),
        })
    }
}

impl Stage for LumaStage {
    fn id(&self) -> StageId {
        StageId::Luma
    }

    fn input(&self) -> Option<StageId> {
        Some(StageId::Accumulate)
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
        _clock: &FrameClock,
    ) -> PipelineResult<()> {
        let source = inputs.require_input(self.id())?;
        let uniforms = LumaUniforms {
            threshold: self.params.float("threshold", 0.25),
            _pad: [0.0; 3],
        };
        ctx.queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.program.bind_group(
            &ctx.device,
            &[
                ("params", self.uniforms.as_entire_binding()),
                ("source", wgpu::BindingResource::TextureView(&source.texture(0).view)),
                ("samp", wgpu::BindingResource::Sampler(ctx.samplers.for_texture(source.texture(0)))),
            ],
        )?;
        let attachments = self.output.attachments(&[wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)]);
        let mut pass = gpu::begin_pass(encoder, "luma", &attachments);
        pass.set_pipeline(&self.program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_weights_sum_to_one() {
        assert!((luma([1.0, 1.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!(luma([0.0, 1.0, 0.0]) > luma([1.0, 0.0, 0.0]));
        assert!(luma([1.0, 0.0, 0.0]) > luma([0.0, 0.0, 1.0]));
    }
}
