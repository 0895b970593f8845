// ============================================================================
// COMBINE STAGE — bloom added back onto the trail image
// ============================================================================
//
// `output = base * intensity1 + bloom * intensity2`, summed in the shader
// with blending disabled.  `base` is the pre-bloom accumulate image and the
// stage's chain input is the bloom output.

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

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CombineUniforms {
    intensity1: f32,
    intensity2: f32,
    _pad: [f32; 2],
}

pub struct CombineStage {
    program: Program,
    uniforms: wgpu::Buffer,
    output: StageOutput,
    params: ParamSet,
}

impl CombineStage {
    pub fn create(ctx: &GpuContext, width: u32, height: u32) -> PipelineResult<Self> {
        let bindings = [
            BindingDecl::uniform("params"),
            BindingDecl::texture("texture1", TexelFormat::Rgba16F),
            BindingDecl::texture("texture2", TexelFormat::Rgba16F),
            BindingDecl::sampler("samp"),
        ];
        let program = assemble_program(
            ctx,
            &ProgramSpec {
                label: "combine",
                vertex: gpu::fullscreen_vertex("combine"),
                fragment: ShaderSource {
                    label: "combine",
                    source: shaders::COMBINE_FS,
                    entry: "fs_combine",
                },
                bindings: &bindings,
                vertex_buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                targets: &[replace_target(TexelFormat::Rgba16F)],
                sample_count: 1,
            },
        )?;
        let uniforms = create_uniform_buffer(ctx, "combine_params", &CombineUniforms::zeroed());
        let output = StageOutput::new(
            ctx,
            "combine",
            width,
            height,
            &[(TexelFormat::Rgba16F, FilterMode::Linear)],
        )?;

        Ok(Self {
            program,
            uniforms,
            output,
            params: ParamSet::new()
                .with("intensity1", ParamValue::Float(1.0), ParamMeta::range(0.0, 4.0, 0.01))
                .with("intensity2", ParamValue::Float(1.0), ParamMeta::range(0.0, 4.0, 0.01)),
        })
    }
}

impl Stage for CombineStage {
    fn id(&self) -> StageId {
        StageId::Combine
    }

    fn input(&self) -> Option<StageId> {
        Some(StageId::Bloom)
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
        let bloom = inputs.require_input(self.id())?;
        let base = inputs.require_base(self.id())?;
        let uniforms = CombineUniforms {
            intensity1: self.params.float("intensity1", 1.0),
            intensity2: self.params.float("intensity2", 1.0),
            _pad: [0.0; 2],
        };
        ctx.queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.program.bind_group(
            &ctx.device,
            &[
                ("params", self.uniforms.as_entire_binding()),
                ("texture1", wgpu::BindingResource::TextureView(&base.texture(0).view)),
                ("texture2", wgpu::BindingResource::TextureView(&bloom.texture(0).view)),
                ("samp", wgpu::BindingResource::Sampler(ctx.samplers.for_texture(bloom.texture(0)))),
            ],
        )?;
        let attachments = self.output.attachments(&[wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)]);
        let mut pass = gpu::begin_pass(encoder, "combine", &attachments);
        pass.set_pipeline(&self.program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
        Ok(())
    }
}
