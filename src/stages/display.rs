// ============================================================================
// DISPLAY STAGE — final blit to an offscreen image or a caller's view
// ============================================================================
//
// The offscreen target is Rgba8 at render size and backs screenshots and
// stage captures.  Blits to caller-owned views (a window surface, usually)
// use one pipeline per target format, built on first use.

use std::collections::HashMap;

use super::{FrameClock, Stage, StageId, StageInputs};
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{
    self, BindingDecl, FilterMode, GpuContext, Program, ProgramSpec, ShaderSource, StageOutput, TexelFormat,
    assemble_program, shaders,
};
use crate::params::ParamSet;

pub const OFFSCREEN_FORMAT: TexelFormat = TexelFormat::Rgba8;

fn display_program(ctx: &GpuContext, format: wgpu::TextureFormat) -> PipelineResult<Program> {
    let label = format!("display ({format:?})");
    let bindings = [
        BindingDecl::texture("source", TexelFormat::Rgba16F),
        BindingDecl::sampler("samp"),
    ];
    assemble_program(
        ctx,
        &ProgramSpec {
            label: &label,
            vertex: gpu::fullscreen_vertex("display"),
            fragment: ShaderSource {
                label: "display",
                source: shaders::DISPLAY_FS,
                entry: "fs_display",
            },
            bindings: &bindings,
            vertex_buffers: &[],
            topology: wgpu::PrimitiveTopology::TriangleList,
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            sample_count: 1,
        },
    )
}

pub struct DisplayStage {
    input: StageId,
    offscreen_program: Program,
    view_programs: HashMap<wgpu::TextureFormat, Program>,
    output: StageOutput,
    params: ParamSet,
}

impl DisplayStage {
    pub fn create(ctx: &GpuContext, width: u32, height: u32, input: StageId) -> PipelineResult<Self> {
        let offscreen_program = display_program(ctx, OFFSCREEN_FORMAT.wgpu())?;
        let output = StageOutput::new(ctx, "display", width, height, &[(OFFSCREEN_FORMAT, FilterMode::Linear)])?;
        Ok(Self {
            input,
            offscreen_program,
            view_programs: HashMap::new(),
            output,
            params: ParamSet::new(),
        })
    }

    /// Point the blit at another upstream stage.
    pub fn set_input(&mut self, input: StageId) {
        if self.input != input {
            tracing::debug!(from = %self.input, to = %input, "display input rewired");
            self.input = input;
        }
    }

    /// Blit `source` into the offscreen image.
    pub fn blit(&self, ctx: &GpuContext, encoder: &mut wgpu::CommandEncoder, source: &StageOutput) -> PipelineResult<()> {
        let bind_group = source_group(ctx, &self.offscreen_program, source)?;
        let attachments = self.output.attachments(&[wgpu::LoadOp::Clear(wgpu::Color::BLACK)]);
        let mut pass = gpu::begin_pass(encoder, "display", &attachments);
        pass.set_pipeline(&self.offscreen_program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
        Ok(())
    }

    /// Blit `source` into a caller-owned view of `format`, covering the
    /// `width x height` region at its origin.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_to_view(
        &mut self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        source: &StageOutput,
        view: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> PipelineResult<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::config(format!("cannot present to a {width}x{height} view")));
        }
        if !self.view_programs.contains_key(&format) {
            let program = display_program(ctx, format)?;
            tracing::debug!(?format, "display pipeline built for view format");
            self.view_programs.insert(format, program);
        }
        let Some(program) = self.view_programs.get(&format) else {
            return Err(PipelineError::config(format!("no display pipeline for {format:?}")));
        };

        let bind_group = source_group(ctx, program, source)?;
        let attachment = Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        });
        let mut pass = gpu::begin_pass(encoder, "display_view", std::slice::from_ref(&attachment));
        pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
        Ok(())
    }
}

fn source_group(ctx: &GpuContext, program: &Program, source: &StageOutput) -> PipelineResult<wgpu::BindGroup> {
    let texture = source.texture(0);
    if !texture.format.is_filterable() {
        return Err(PipelineError::config(format!(
            "'{}' holds {:?}, which cannot be displayed",
            source.name, texture.format
        )));
    }
    program.bind_group(
        &ctx.device,
        &[
            ("source", wgpu::BindingResource::TextureView(&texture.view)),
            ("samp", wgpu::BindingResource::Sampler(ctx.samplers.for_texture(texture))),
        ],
    )
}

impl Stage for DisplayStage {
    fn id(&self) -> StageId {
        StageId::Display
    }

    fn input(&self) -> Option<StageId> {
        Some(self.input)
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
        self.blit(ctx, encoder, source)
    }
}
