// ============================================================================
// SIMULATE STAGE — double-buffered particle state
// ============================================================================
//
// One texel per particle in three state textures:
//   0: geometry  Rgba32F  (position.xy, drift offset.xy)
//   1: color     Rgba16F  (rgb * envelope, envelope)
//   2: props     Rgba16F  (angle, radius, age, lifetime)
// The state square is the smallest `side x side` grid covering the particle
// count.  Texels past the count are zeroed by the update pass and skipped by
// materialize through the count uniform, never through texture bounds.

use bytemuck::{Pod, Zeroable};

use super::{FrameClock, Stage, StageId, StageInputs};
use crate::config::state_texture_side;
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::program::replace_target;
use crate::gpu::texture::create_uniform_buffer;
use crate::gpu::{
    self, BindingDecl, BufferedStageOutput, FilterMode, GpuContext, Program, ProgramSpec, ShaderSource,
    StageOutput, TexelFormat, assemble_program, shaders,
};
use crate::params::{ParamMeta, ParamSet, ParamValue};

pub const STATE_LAYOUT: [(TexelFormat, FilterMode); 3] = [
    (TexelFormat::Rgba32F, FilterMode::Nearest),
    (TexelFormat::Rgba16F, FilterMode::Nearest),
    (TexelFormat::Rgba16F, FilterMode::Nearest),
];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SimUniforms {
    time: f32,
    delta: f32,
    frame: u32,
    particle_count: u32,
    state_width: u32,
    noise_scale: f32,
    noise_speed: f32,
    drift: f32,
    spin: f32,
    spawn_radius: f32,
    lifetime_min: f32,
    lifetime_max: f32,
    palette_a: [f32; 4],
    palette_b: [f32; 4],
    palette_c: [f32; 4],
    palette_d: [f32; 4],
}

/// Cosine palette `a + b * cos(2π(c * t + d))`, the same function the update
/// shader colors particles with.
pub fn palette(a: [f32; 3], b: [f32; 3], c: [f32; 3], d: [f32; 3], t: f32) -> [f32; 3] {
    let tau = std::f32::consts::TAU;
    std::array::from_fn(|i| a[i] + b[i] * (tau * (c[i] * t + d[i])).cos())
}

fn default_params() -> ParamSet {
    ParamSet::new()
        .with("noise_scale", ParamValue::Float(1.5), ParamMeta::range(0.0, 10.0, 0.01))
        .with("noise_speed", ParamValue::Float(0.4), ParamMeta::range(0.0, 5.0, 0.01))
        .with("drift", ParamValue::Float(0.02), ParamMeta::range(-1.0, 1.0, 0.001))
        .with("spin", ParamValue::Float(0.35), ParamMeta::range(-5.0, 5.0, 0.01))
        .with("spawn_radius", ParamValue::Float(0.9), ParamMeta::range(0.0, 2.0, 0.01))
        .with("lifetime_min", ParamValue::Float(2.0), ParamMeta::range(0.1, 30.0, 0.1))
        .with("lifetime_max", ParamValue::Float(6.0), ParamMeta::range(0.1, 30.0, 0.1))
        .with("palette_a", ParamValue::Vec3([0.5, 0.5, 0.5]), ParamMeta::default())
        .with("palette_b", ParamValue::Vec3([0.5, 0.5, 0.5]), ParamMeta::default())
        .with("palette_c", ParamValue::Vec3([1.0, 1.0, 1.0]), ParamMeta::default())
        .with("palette_d", ParamValue::Vec3([0.0, 0.33, 0.67]), ParamMeta::default())
}

pub struct SimulateStage {
    program: Program,
    uniforms: wgpu::Buffer,
    state: BufferedStageOutput,
    particle_count: u32,
    max_particle_count: u32,
    params: ParamSet,
}

impl SimulateStage {
    pub fn create(ctx: &GpuContext, particle_count: u32, max_particle_count: u32) -> PipelineResult<Self> {
        check_count(particle_count, max_particle_count)?;
        let side = state_texture_side(particle_count);
        if !ctx.supports_size(side, side) {
            return Err(PipelineError::resource(
                "simulate",
                format!("state texture {side}x{side} exceeds the device limit"),
            ));
        }

        let bindings = [
            BindingDecl::uniform("params"),
            BindingDecl::texture("geometry", TexelFormat::Rgba32F),
            BindingDecl::texture("color", TexelFormat::Rgba16F),
            BindingDecl::texture("props", TexelFormat::Rgba16F),
        ];
        let targets = STATE_LAYOUT.map(|(format, _)| replace_target(format));
        let program = assemble_program(
            ctx,
            &ProgramSpec {
                label: "simulate",
                vertex: gpu::fullscreen_vertex("simulate"),
                fragment: ShaderSource {
                    label: "simulate",
                    source: shaders::SIMULATE_FS,
                    entry: "fs_simulate",
                },
                bindings: &bindings,
                vertex_buffers: &[],
                topology: wgpu::PrimitiveTopology::TriangleList,
                targets: &targets,
                sample_count: 1,
            },
        )?;

        let uniforms = create_uniform_buffer(ctx, "simulate_params", &SimUniforms::zeroed());
        let state = BufferedStageOutput::new(ctx, "simulate", side, side, &STATE_LAYOUT)?;
        tracing::info!(particles = particle_count, side, "simulate stage created");

        Ok(Self {
            program,
            uniforms,
            state,
            particle_count,
            max_particle_count,
            params: default_params(),
        })
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    /// Side of the square state textures.
    pub fn state_side(&self) -> u32 {
        self.state.width()
    }

    /// One of the two state slots, for inspection.
    pub fn slot(&self, index: usize) -> &StageOutput {
        self.state.slot(index)
    }

    /// Reallocate both state slots for a new particle count.  Particle state
    /// is not migrated: every particle respawns on the next tick.
    pub fn resize(&mut self, ctx: &GpuContext, particle_count: u32) -> PipelineResult<()> {
        check_count(particle_count, self.max_particle_count)?;
        let side = state_texture_side(particle_count);
        let fresh = BufferedStageOutput::new(ctx, "simulate", side, side, &STATE_LAYOUT)?;
        let old = std::mem::replace(&mut self.state, fresh);
        old.destroy();
        tracing::info!(from = self.particle_count, to = particle_count, side, "simulate state reallocated");
        self.particle_count = particle_count;
        Ok(())
    }

    fn pack_uniforms(&self, clock: &FrameClock) -> SimUniforms {
        let p = &self.params;
        let vec4 = |name: &str, default: [f32; 3]| {
            let [x, y, z] = p.vec3(name, default);
            [x, y, z, 0.0]
        };
        let lifetime_min = p.float("lifetime_min", 2.0).max(0.01);
        SimUniforms {
            time: clock.time,
            delta: clock.delta,
            frame: clock.frame as u32,
            particle_count: self.particle_count,
            state_width: self.state.width(),
            noise_scale: p.float("noise_scale", 1.5),
            noise_speed: p.float("noise_speed", 0.4),
            drift: p.float("drift", 0.02),
            spin: p.float("spin", 0.35),
            spawn_radius: p.float("spawn_radius", 0.9),
            lifetime_min,
            lifetime_max: p.float("lifetime_max", 6.0).max(lifetime_min),
            palette_a: vec4("palette_a", [0.5; 3]),
            palette_b: vec4("palette_b", [0.5; 3]),
            palette_c: vec4("palette_c", [1.0; 3]),
            palette_d: vec4("palette_d", [0.0, 0.33, 0.67]),
        }
    }
}

fn check_count(particle_count: u32, max: u32) -> PipelineResult<()> {
    if particle_count > max {
        return Err(PipelineError::config(format!(
            "particle count {particle_count} exceeds the configured maximum {max}"
        )));
    }
    Ok(())
}

impl Stage for SimulateStage {
    fn id(&self) -> StageId {
        StageId::Simulate
    }

    fn input(&self) -> Option<StageId> {
        None
    }

    fn targets(&self) -> &StageOutput {
        self.state.current()
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
        _inputs: &StageInputs<'_>,
        clock: &FrameClock,
    ) -> PipelineResult<()> {
        ctx.queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&self.pack_uniforms(clock)));

        let read = self.state.read(clock.frame);
        let bind_group = self.program.bind_group(
            &ctx.device,
            &[
                ("params", self.uniforms.as_entire_binding()),
                ("geometry", wgpu::BindingResource::TextureView(&read.texture(0).view)),
                ("color", wgpu::BindingResource::TextureView(&read.texture(1).view)),
                ("props", wgpu::BindingResource::TextureView(&read.texture(2).view)),
            ],
        )?;

        {
            let write = self.state.write(clock.frame);
            let attachments = write.attachments(&[wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT); 3]);
            let mut pass = gpu::begin_pass(encoder, "simulate", &attachments);
            pass.set_pipeline(&self.program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
        }

        self.state.mark_written(clock.frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::target::attachment_bytes;

    #[test]
    fn uniform_block_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<SimUniforms>(), 112);
    }

    #[test]
    fn state_layout_fits_one_target() {
        assert_eq!(attachment_bytes(STATE_LAYOUT.iter().map(|(f, _)| *f)), 32);
    }

    #[test]
    fn palette_matches_cosine_form() {
        let a = [0.5; 3];
        let b = [0.5; 3];
        let c = [1.0; 3];
        let d = [0.0, 0.25, 0.5];
        let at_zero = palette(a, b, c, d, 0.0);
        // cos(0) = 1, cos(π/2) = 0, cos(π) = -1
        assert!((at_zero[0] - 1.0).abs() < 1e-5);
        assert!((at_zero[1] - 0.5).abs() < 1e-5);
        assert!(at_zero[2].abs() < 1e-5);
        // Integer steps of c * t wrap around.
        let at_one = palette(a, b, c, d, 1.0);
        for i in 0..3 {
            assert!((at_zero[i] - at_one[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn counts_above_the_cap_are_rejected() {
        assert!(check_count(1000, 1000).is_ok());
        assert!(check_count(1001, 1000).is_err());
    }
}
