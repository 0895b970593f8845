// ============================================================================
// ACCUMULATE STAGE — persistent, fading trail buffer
// ============================================================================
//
// Ping-pong pair of (color, stamp) targets at render size, alternated by the
// same frame counter as the simulate stage.  Each draw reads last tick's
// trail plus the fresh materialize output and writes the other slot.

use bytemuck::{Pod, Zeroable};

use super::{FrameClock, Stage, StageId, StageInputs};
use crate::error::PipelineResult;
use crate::gpu::program::replace_target;
use crate::gpu::texture::create_uniform_buffer;
use crate::gpu::{
    self, BindingDecl, BufferedStageOutput, FilterMode, GpuContext, Program, ProgramSpec, ShaderSource,
    StageOutput, TexelFormat, assemble_program, shaders,
};
use crate::params::{ParamMeta, ParamSet, ParamValue};

pub const TRAIL_LAYOUT: [(TexelFormat, FilterMode); 2] = [
    (TexelFormat::Rgba16F, FilterMode::Linear),
    (TexelFormat::R32F, FilterMode::Nearest),
];

/// Decay rate per fade period, shared with the accumulate shader.
pub const FADE_RATE: f32 = 5.0;

/// Per-tick multiplier applied to an untouched pixel whose last write was
/// `age` seconds ago.  Reaches exactly zero once `age >= fade_time`.
pub fn fade_factor(age: f32, delta: f32, fade_time: f32) -> f32 {
    if fade_time <= 0.0 || age >= fade_time {
        return 0.0;
    }
    (-FADE_RATE * delta / fade_time).exp()
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AccumulateUniforms {
    time: f32,
    delta: f32,
    fade_time: f32,
    enabled: u32,
}

pub struct AccumulateStage {
    program: Program,
    uniforms: wgpu::Buffer,
    trail: BufferedStageOutput,
    params: ParamSet,
}

impl AccumulateStage {
    pub fn create(ctx: &GpuContext, width: u32, height: u32) -> PipelineResult<Self> {
        let bindings = [
            BindingDecl::uniform("params"),
            BindingDecl::texture("prev_color", TexelFormat::Rgba16F),
            BindingDecl::texture("prev_stamp", TexelFormat::R32F),
            BindingDecl::texture("fresh_color", TexelFormat::Rgba16F),
            BindingDecl::texture("fresh_stamp", TexelFormat::R32F),
        ];
        let targets = TRAIL_LAYOUT.map(|(format, _)| replace_target(format));
        let program = assemble_program(
            ctx,
            &ProgramSpec {
                label: "accumulate",
                vertex: gpu::fullscreen_vertex("accumulate"),
                fragment: ShaderSource {
                    label: "accumulate",
                    source: shaders::ACCUMULATE_FS,
                    entry: "fs_accumulate",
                },
                bindings: &bindings,
                vertex_buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                targets: &targets,
                sample_count: 1,
            },
        )?;

        let uniforms = create_uniform_buffer(ctx, "accumulate_params", &AccumulateUniforms::zeroed());
        let trail = BufferedStageOutput::new(ctx, "accumulate", width, height, &TRAIL_LAYOUT)?;
        tracing::info!(width, height, "accumulate stage created");

        Ok(Self {
            program,
            uniforms,
            trail,
            params: ParamSet::new()
                .with("enabled", ParamValue::Bool(true), ParamMeta::default())
                .with("fade_time", ParamValue::Float(1.5), ParamMeta::range(0.01, 20.0, 0.01)),
        })
    }

    /// One of the two trail slots, for inspection.
    pub fn slot(&self, index: usize) -> &StageOutput {
        self.trail.slot(index)
    }
}

impl Stage for AccumulateStage {
    fn id(&self) -> StageId {
        StageId::Accumulate
    }

    fn input(&self) -> Option<StageId> {
        Some(StageId::Materialize)
    }

    fn targets(&self) -> &StageOutput {
        self.trail.current()
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
        let fresh = inputs.require_input(self.id())?;
        let uniforms = AccumulateUniforms {
            time: clock.time,
            delta: clock.delta,
            fade_time: self.params.float("fade_time", 1.5),
            enabled: self.params.boolean("enabled", true) as u32,
        };
        ctx.queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let prev = self.trail.read(clock.frame);
        let bind_group = self.program.bind_group(
            &ctx.device,
            &[
                ("params", self.uniforms.as_entire_binding()),
                ("prev_color", wgpu::BindingResource::TextureView(&prev.texture(0).view)),
                ("prev_stamp", wgpu::BindingResource::TextureView(&prev.texture(1).view)),
                ("fresh_color", wgpu::BindingResource::TextureView(&fresh.texture(0).view)),
                ("fresh_stamp", wgpu::BindingResource::TextureView(&fresh.texture(1).view)),
            ],
        )?;

        {
            let write = self.trail.write(clock.frame);
            let attachments = write.attachments(&[wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT); 2]);
            let mut pass = gpu::begin_pass(encoder, "accumulate", &attachments);
            pass.set_pipeline(&self.program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
        }

        self.trail.mark_written(clock.frame);
        Ok(())
    }

    /// Wipe both trail slots to zero.
    fn reset(&mut self, _ctx: &GpuContext, encoder: &mut wgpu::CommandEncoder) -> PipelineResult<()> {
        self.trail.clear_all(encoder, &[wgpu::Color::TRANSPARENT; 2]);
        tracing::debug!("accumulate trail cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_pixels_fade_out_completely() {
        // Any starting color is gone once its age reaches the fade time,
        // whatever the tick length.
        let fade_time = 1.5;
        for dt in [1.0 / 240.0, 1.0 / 60.0, 0.1, 0.75] {
            let mut value = 1.0f32;
            let mut age = 0.0f32;
            while age < fade_time {
                age += dt;
                value *= fade_factor(age, dt, fade_time);
            }
            assert!(value.abs() < 1e-6, "dt={dt} left {value}");
        }
    }

    #[test]
    fn fade_is_monotonic_and_bounded() {
        let f = fade_factor(0.1, 1.0 / 60.0, 2.0);
        assert!(f > 0.0 && f < 1.0);
        assert!(fade_factor(0.1, 1.0 / 30.0, 2.0) < f);
        assert_eq!(fade_factor(0.1, 1.0 / 60.0, 0.0), 0.0);
    }

    #[test]
    fn uniform_block_is_16_bytes() {
        assert_eq!(std::mem::size_of::<AccumulateUniforms>(), 16);
    }
}
