// ============================================================================
// BLOOM STAGE — multi-resolution blur with weighted recombination
// ============================================================================
//
// Per draw, on one encoder:
//
//   1. downsample   input → L0 → L1 → … → L(K-1), each half the previous.
//                   High quality runs the 4-tap tent filter, low quality a
//                   plain bilinear copy.
//   2. blur         coarsest to finest: L(i) → scratch (horizontal),
//                   scratch → L(i) (vertical), radius lerped min → max.
//   3. recombine    coarsest to finest: L(i) added into L(i-1) with a
//                   constant blend weight.
//   4. output       L0 copied into the persistent output, optionally mixed
//                   with the unblurred input.
//
// Quality and step count are fixed per instance; changing either means
// building a new stage.

use bytemuck::{Pod, Zeroable};

use super::{FrameClock, Stage, StageId, StageInputs};
use crate::config::{BloomQuality, max_steps_for_size};
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::program::{replace_target, weighted_target};
use crate::gpu::texture::create_uniform_buffer;
use crate::gpu::{
    self, BindingDecl, FilterMode, GpuContext, GpuTexture, Program, ProgramSpec, ShaderSource, StageOutput,
    TexelFormat, assemble_program, shaders,
};
use crate::params::{ParamMeta, ParamSet, ParamValue};

const LEVEL_LAYOUT: [(TexelFormat, FilterMode); 1] = [(TexelFormat::Rgba16F, FilterMode::Linear)];

// ============================================================================
// LEVEL MATH
// ============================================================================

/// Size of every level for a `width x height` input: level 0 is half the
/// input, each further level halves again, never below one pixel.
pub fn level_sizes(width: u32, height: u32, steps: u32) -> Vec<(u32, u32)> {
    (0..steps)
        .map(|i| (((width >> 1) >> i).max(1), ((height >> 1) >> i).max(1)))
        .collect()
}

/// Blur radius for `level`, interpolated from `min` at the finest level to
/// `max` at the coarsest.
pub fn blur_radius(level: u32, steps: u32, min: f32, max: f32) -> f32 {
    let t = if steps <= 1 {
        0.0
    } else {
        level as f32 / (steps - 1) as f32
    };
    min + (max - min) * t
}

/// Blend weight used when adding `level` into `level - 1`.
///
/// The coarsest transition is added at full weight.  From the second-coarsest
/// down to the finest, `1 - 0.5 * p^4` with `p = 1 - level / (steps - 2)`,
/// so the sharpest contribution is attenuated the most.  Always in (0.5, 1].
pub fn transition_weight(level: u32, steps: u32) -> f32 {
    if level + 1 >= steps {
        return 1.0;
    }
    let p = 1.0 - level as f32 / (steps - 2) as f32;
    1.0 - 0.5 * p.powi(4)
}

// ============================================================================
// UNIFORMS
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DownsampleUniforms {
    source_texel: [f32; 2],
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlurUniforms {
    texel: [f32; 2],
    direction: [f32; 2],
    radius: f32,
    _pad: [f32; 3],
}

/// One chain level: the level image, a scratch target for the horizontal
/// blur, and the uniforms of every pass that writes them.  Each pass keeps its
/// own buffer because queued uniform writes land before the whole encoder
/// executes.
struct BloomLevel {
    image: StageOutput,
    scratch: StageOutput,
    downsample: wgpu::Buffer,
    blur_h: wgpu::Buffer,
    blur_v: wgpu::Buffer,
}

impl BloomLevel {
    fn destroy(self) {
        self.image.destroy();
        self.scratch.destroy();
        self.downsample.destroy();
        self.blur_h.destroy();
        self.blur_v.destroy();
    }
}

struct BloomPrograms {
    /// Present only in high quality.
    downsample: Option<Program>,
    blur: Program,
    copy: Program,
    /// `dst = src * constant`
    scaled: Program,
    /// `dst += src * constant`
    added: Program,
}

fn copy_program(ctx: &GpuContext, label: &str, target: Option<wgpu::ColorTargetState>) -> PipelineResult<Program> {
    let bindings = [
        BindingDecl::texture("source", TexelFormat::Rgba16F),
        BindingDecl::sampler("samp"),
    ];
    assemble_program(
        ctx,
        &ProgramSpec {
            label,
            vertex: gpu::fullscreen_vertex(label),
            fragment: ShaderSource {
                label,
                source: shaders::COPY_FS,
                entry: "fs_copy",
            },
            bindings: &bindings,
            vertex_buffers: &[],
            topology: wgpu::PrimitiveTopology::TriangleList,
            targets: &[target],
            sample_count: 1,
        },
    )
}

fn filter_program(ctx: &GpuContext, label: &str, source: &str, entry: &str) -> PipelineResult<Program> {
    let bindings = [
        BindingDecl::uniform("params"),
        BindingDecl::texture("source", TexelFormat::Rgba16F),
        BindingDecl::sampler("samp"),
    ];
    assemble_program(
        ctx,
        &ProgramSpec {
            label,
            vertex: gpu::fullscreen_vertex(label),
            fragment: ShaderSource { label, source, entry },
            bindings: &bindings,
            vertex_buffers: &[],
            topology: wgpu::PrimitiveTopology::TriangleList,
            targets: &[replace_target(TexelFormat::Rgba16F)],
            sample_count: 1,
        },
    )
}

impl BloomPrograms {
    fn new(ctx: &GpuContext, quality: BloomQuality) -> PipelineResult<Self> {
        let format = TexelFormat::Rgba16F;
        let downsample = match quality {
            BloomQuality::High => Some(filter_program(
                ctx,
                "bloom_downsample",
                shaders::DOWNSAMPLE_FS,
                "fs_downsample",
            )?),
            _ => None,
        };
        Ok(Self {
            downsample,
            blur: filter_program(ctx, "bloom_blur", shaders::BLUR_FS, "fs_blur")?,
            copy: copy_program(ctx, "bloom_copy", replace_target(format))?,
            scaled: copy_program(ctx, "bloom_scaled", weighted_target(format, wgpu::BlendFactor::Zero))?,
            added: copy_program(ctx, "bloom_added", weighted_target(format, wgpu::BlendFactor::One))?,
        })
    }
}

// ============================================================================
// STAGE
// ============================================================================

pub struct BloomStage {
    quality: BloomQuality,
    programs: BloomPrograms,
    levels: Vec<BloomLevel>,
    /// `weights[i - 1]` is the blend weight of level `i` into level `i - 1`.
    weights: Vec<f32>,
    output: StageOutput,
    params: ParamSet,
}

pub fn default_params() -> ParamSet {
    ParamSet::new()
        .with("radius_min", ParamValue::Float(2.0), ParamMeta::range(0.0, 16.0, 0.1))
        .with("radius_max", ParamValue::Float(6.0), ParamMeta::range(0.0, 32.0, 0.1))
        .with("mix_enabled", ParamValue::Bool(false), ParamMeta::default())
        .with("mix", ParamValue::Float(0.0), ParamMeta::range(0.0, 1.0, 0.01))
}

impl BloomStage {
    /// Build a `steps`-level chain for an input of `width x height`.  `steps`
    /// must not exceed `floor(log2(min(width, height)))`.
    pub fn create(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        quality: BloomQuality,
        steps: u32,
    ) -> PipelineResult<Self> {
        if quality == BloomQuality::Off {
            return Err(PipelineError::config("bloom stage cannot be built with quality 'off'"));
        }
        let cap = max_steps_for_size(width, height);
        if steps == 0 || steps > cap {
            return Err(PipelineError::config(format!(
                "bloom step count {steps} outside 1..={cap} for a {width}x{height} input"
            )));
        }

        let programs = BloomPrograms::new(ctx, quality)?;
        let levels = level_sizes(width, height, steps)
            .into_iter()
            .enumerate()
            .map(|(i, (w, h))| {
                Ok(BloomLevel {
                    image: StageOutput::new(ctx, &format!("bloom_level{i}"), w, h, &LEVEL_LAYOUT)?,
                    scratch: StageOutput::new(ctx, &format!("bloom_scratch{i}"), w, h, &LEVEL_LAYOUT)?,
                    downsample: create_uniform_buffer(ctx, "bloom_downsample_params", &DownsampleUniforms::zeroed()),
                    blur_h: create_uniform_buffer(ctx, "bloom_blur_h_params", &BlurUniforms::zeroed()),
                    blur_v: create_uniform_buffer(ctx, "bloom_blur_v_params", &BlurUniforms::zeroed()),
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        let (out_w, out_h) = (levels[0].image.width(), levels[0].image.height());
        let output = StageOutput::new(ctx, "bloom", out_w, out_h, &LEVEL_LAYOUT)?;
        let weights = (1..steps).map(|i| transition_weight(i, steps)).collect();

        tracing::info!(quality = quality.label(), steps, width = out_w, height = out_h, "bloom stage created");
        Ok(Self {
            quality,
            programs,
            levels,
            weights,
            output,
            params: default_params(),
        })
    }

    pub fn quality(&self) -> BloomQuality {
        self.quality
    }

    pub fn steps(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Cross-fade between bloom and the unblurred input: `None` outputs pure
    /// bloom, `Some(m)` outputs `bloom * (1 - m) + input * m`.
    pub fn set_mix(&mut self, mix: Option<f32>) -> PipelineResult<()> {
        self.params.set("mix_enabled", ParamValue::Bool(mix.is_some()))?;
        if let Some(m) = mix {
            self.params.set("mix", ParamValue::Float(m.clamp(0.0, 1.0)))?;
        }
        Ok(())
    }

    pub fn mix(&self) -> Option<f32> {
        self.params
            .boolean("mix_enabled", false)
            .then(|| self.params.float("mix", 0.0).clamp(0.0, 1.0))
    }

    /// Release every level and the output.
    pub fn destroy(self) {
        for level in self.levels {
            level.destroy();
        }
        self.output.destroy();
    }

    fn write_uniforms(&self, ctx: &GpuContext, input: &StageOutput) {
        let steps = self.steps();
        let min = self.params.float("radius_min", 2.0);
        let max = self.params.float("radius_max", 6.0);
        for (i, level) in self.levels.iter().enumerate() {
            let (src_w, src_h) = match i {
                0 => (input.width(), input.height()),
                _ => (self.levels[i - 1].image.width(), self.levels[i - 1].image.height()),
            };
            let down = DownsampleUniforms {
                source_texel: [1.0 / src_w as f32, 1.0 / src_h as f32],
                _pad: [0.0; 2],
            };
            ctx.queue.write_buffer(&level.downsample, 0, bytemuck::bytes_of(&down));

            let texel = [1.0 / level.image.width() as f32, 1.0 / level.image.height() as f32];
            let radius = blur_radius(i as u32, steps, min, max);
            for (buffer, direction) in [(&level.blur_h, [1.0, 0.0]), (&level.blur_v, [0.0, 1.0])] {
                let blur = BlurUniforms {
                    texel,
                    direction,
                    radius,
                    _pad: [0.0; 3],
                };
                ctx.queue.write_buffer(buffer, 0, bytemuck::bytes_of(&blur));
            }
        }
    }
}

fn source_group(
    ctx: &GpuContext,
    program: &Program,
    params: Option<&wgpu::Buffer>,
    source: &GpuTexture,
) -> PipelineResult<wgpu::BindGroup> {
    let view = wgpu::BindingResource::TextureView(&source.view);
    let samp = wgpu::BindingResource::Sampler(ctx.samplers.for_texture(source));
    match params {
        Some(buffer) => program.bind_group(
            &ctx.device,
            &[("params", buffer.as_entire_binding()), ("source", view), ("samp", samp)],
        ),
        None => program.bind_group(&ctx.device, &[("source", view), ("samp", samp)]),
    }
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    program: &Program,
    bind_group: &wgpu::BindGroup,
    target: &StageOutput,
    load: wgpu::LoadOp<wgpu::Color>,
    constant: Option<f32>,
) {
    let attachments = target.attachments(&[load]);
    let mut pass = gpu::begin_pass(encoder, label, &attachments);
    pass.set_pipeline(&program.pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    if let Some(w) = constant {
        let w = w as f64;
        pass.set_blend_constant(wgpu::Color { r: w, g: w, b: w, a: w });
    }
    pass.draw(0..gpu::FULLSCREEN_VERTICES, 0..1);
}

const CLEAR: wgpu::LoadOp<wgpu::Color> = wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT);

impl Stage for BloomStage {
    fn id(&self) -> StageId {
        StageId::Bloom
    }

    fn input(&self) -> Option<StageId> {
        Some(StageId::Luma)
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
        let input = inputs.require_input(self.id())?;
        self.write_uniforms(ctx, input);
        let p = &self.programs;

        // -- Downsample chain --------------------------------------------
        for (i, level) in self.levels.iter().enumerate() {
            let source = match i {
                0 => input.texture(0),
                _ => self.levels[i - 1].image.texture(0),
            };
            let (program, params) = match &p.downsample {
                Some(filter) => (filter, Some(&level.downsample)),
                None => (&p.copy, None),
            };
            let group = source_group(ctx, program, params, source)?;
            fullscreen_pass(encoder, "bloom_downsample", program, &group, &level.image, CLEAR, None);
        }

        // -- Separable blur, coarsest first ------------------------------
        for level in self.levels.iter().rev() {
            let horizontal = source_group(ctx, &p.blur, Some(&level.blur_h), level.image.texture(0))?;
            fullscreen_pass(encoder, "bloom_blur_h", &p.blur, &horizontal, &level.scratch, CLEAR, None);
            let vertical = source_group(ctx, &p.blur, Some(&level.blur_v), level.scratch.texture(0))?;
            fullscreen_pass(encoder, "bloom_blur_v", &p.blur, &vertical, &level.image, CLEAR, None);
        }

        // -- Weighted recombination, coarsest into finest ----------------
        for i in (1..self.levels.len()).rev() {
            let group = source_group(ctx, &p.added, None, self.levels[i].image.texture(0))?;
            fullscreen_pass(
                encoder,
                "bloom_recombine",
                &p.added,
                &group,
                &self.levels[i - 1].image,
                wgpu::LoadOp::Load,
                Some(self.weights[i - 1]),
            );
        }

        // -- Output ------------------------------------------------------
        let bloom = self.levels[0].image.texture(0);
        match self.mix() {
            None => {
                let group = source_group(ctx, &p.copy, None, bloom)?;
                fullscreen_pass(encoder, "bloom_output", &p.copy, &group, &self.output, CLEAR, None);
            }
            Some(m) => {
                let scaled = source_group(ctx, &p.scaled, None, bloom)?;
                fullscreen_pass(encoder, "bloom_output", &p.scaled, &scaled, &self.output, CLEAR, Some(1.0 - m));
                let original = source_group(ctx, &p.added, None, input.texture(0))?;
                fullscreen_pass(
                    encoder,
                    "bloom_mix",
                    &p.added,
                    &original,
                    &self.output,
                    wgpu::LoadOp::Load,
                    Some(m),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_halve_and_stay_positive() {
        let sizes = level_sizes(1280, 720, 8);
        assert_eq!(sizes[0], (640, 360));
        assert_eq!(sizes[1], (320, 180));
        for pair in sizes.windows(2) {
            assert!(pair[1].0 < pair[0].0 && pair[1].1 < pair[0].1);
        }
        assert!(sizes.iter().all(|&(w, h)| w >= 1 && h >= 1));
    }

    #[test]
    fn capped_chain_never_collapses() {
        for (w, h) in [(1280, 720), (64, 48), (3, 2), (1, 1), (2, 4096)] {
            let steps = max_steps_for_size(w, h);
            let sizes = level_sizes(w, h, steps);
            for pair in sizes.windows(2) {
                assert!(pair[1].0 < pair[0].0 || pair[1].1 < pair[0].1, "{w}x{h}");
            }
        }
    }

    #[test]
    fn radius_spans_min_to_max() {
        assert_eq!(blur_radius(0, 7, 2.0, 8.0), 2.0);
        assert_eq!(blur_radius(6, 7, 2.0, 8.0), 8.0);
        assert!((blur_radius(3, 7, 2.0, 8.0) - 5.0).abs() < 1e-6);
        assert_eq!(blur_radius(0, 1, 2.0, 8.0), 2.0);
    }

    #[test]
    fn weights_stay_in_half_open_unit_band() {
        for steps in 2..=12 {
            for level in 1..steps {
                let w = transition_weight(level, steps);
                assert!(w > 0.5 && w <= 1.0, "steps={steps} level={level} w={w}");
            }
        }
    }

    #[test]
    fn finest_transition_is_attenuated_most() {
        let steps = 7;
        let weights: Vec<f32> = (1..steps).map(|i| transition_weight(i, steps)).collect();
        // Walking toward the finest level the weight never grows.
        for pair in weights.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(transition_weight(steps - 1, steps), 1.0);
        assert_eq!(transition_weight(steps - 2, steps), 1.0);
        assert!((transition_weight(1, steps) - (1.0 - 0.5 * 0.8f32.powi(4))).abs() < 1e-6);
    }

    #[test]
    fn two_level_chain_adds_at_full_weight() {
        assert_eq!(transition_weight(1, 2), 1.0);
    }

    #[test]
    fn uniform_blocks_match_shader_layout() {
        assert_eq!(std::mem::size_of::<DownsampleUniforms>(), 16);
        assert_eq!(std::mem::size_of::<BlurUniforms>(), 32);
    }
}
