// ============================================================================
// RENDERER — owns the stage chain and drives the frame loop
// ============================================================================
//
// Per displayed frame:
//
//   apply runtime config   particle count resize, bloom rebuild + rewiring
//   N simulation ticks     simulate → materialize → accumulate, one submit each
//   frame chain            [luma → bloom → combine →] display, one submit
//
// Which stages run, and which outputs feed each one, comes from the current
// `Topology`; `draw_stage` resolves the inputs through it.
//
// Every tick gets its own command submission because uniform writes queued
// on the device land at the next submit: two ticks in one encoder would both
// see the second tick's uniforms.
//
// Timing: `start`/`pause` accumulate wall-clock time across runs so a resume
// continues where the last run stopped.  `tick` turns that time into
// simulation steps; `step` advances by a caller-chosen fixed delta.

use std::time::{Duration, Instant};

use image::{ImageEncoder, RgbaImage};

use crate::config::{BloomQuality, PipelineConfig, RuntimeConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::readback::read_texture;
use crate::gpu::{GpuContext, StageOutput};
use crate::graph::Topology;
use crate::params::{ParamSet, ParamValue, ParameterRegistry};
use crate::stages::{
    self, AccumulateStage, BloomStage, CombineStage, DisplayStage, FrameClock, LumaStage, MaterializeStage,
    SimulateStage, Stage, StageId, StageInputs,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

pub struct Renderer {
    ctx: GpuContext,
    config: PipelineConfig,
    runtime: RuntimeConfig,
    topology: Topology,

    simulate: SimulateStage,
    materialize: MaterializeStage,
    accumulate: AccumulateStage,
    luma: LumaStage,
    bloom: Option<BloomStage>,
    /// Bloom tunables kept while the bloom stage is torn down, so they
    /// survive quality switches.
    bloom_params: ParamSet,
    combine: CombineStage,
    display: DisplayStage,

    clock: FrameClock,
    state: RunState,
    /// Wall-clock time accumulated by completed runs.
    run_time: Duration,
    resumed_at: Option<Instant>,
    /// Value of `elapsed()` at the last `tick`.
    last_tick: Duration,
}

impl Renderer {
    /// Build every stage.  Any allocation or shader failure aborts
    /// construction; no partially built renderer is returned.
    pub fn new(ctx: GpuContext, config: PipelineConfig, runtime: RuntimeConfig) -> PipelineResult<Self> {
        config.validate()?;
        runtime.validate(&config)?;

        let (width, height) = (config.render_width, config.render_height);
        if !ctx.supports_size(width, height) {
            return Err(PipelineError::resource(
                "renderer",
                format!("render size {width}x{height} exceeds the device limit of {}", ctx.max_texture_dim),
            ));
        }
        let state_side = config.max_state_side();
        if !ctx.supports_size(state_side, state_side) {
            return Err(PipelineError::resource(
                "renderer",
                format!(
                    "max_particle_count {} needs {state_side}x{state_side} state textures, over the device limit of {}",
                    config.max_particle_count, ctx.max_texture_dim
                ),
            ));
        }

        let requested = config.sample_count();
        let samples = ctx.clamp_sample_count(requested);
        if samples != requested {
            tracing::warn!(requested, using = samples, "multisample count not supported, falling back");
        }

        let simulate = SimulateStage::create(&ctx, runtime.particle_count, config.max_particle_count)?;
        let materialize = MaterializeStage::create(&ctx, width, height, runtime.particle_count, samples)?;
        let accumulate = AccumulateStage::create(&ctx, width, height)?;
        let luma = LumaStage::create(&ctx, width, height)?;
        let combine = CombineStage::create(&ctx, width, height)?;

        let plan = config.bloom_plan(runtime.bloom_quality, runtime.bloom_steps);
        if plan.is_none() && runtime.bloom_quality != BloomQuality::Off {
            warn_bloom_fallback(&config, runtime.bloom_quality);
        }
        let topology = plan.map_or(Topology::BloomOff, |(quality, _)| Topology::for_quality(quality));
        let bloom_params = stages::bloom::default_params();
        let bloom = match plan {
            None => None,
            Some((quality, steps)) => {
                let mut stage = BloomStage::create(&ctx, luma.targets().width(), luma.targets().height(), quality, steps)?;
                *stage.params_mut() = bloom_params.clone();
                Some(stage)
            }
        };
        let display = DisplayStage::create(&ctx, width, height, topology.display_input())?;

        tracing::info!(
            adapter = %ctx.adapter_name,
            width,
            height,
            particles = runtime.particle_count,
            topology = topology.label(),
            "renderer ready"
        );

        Ok(Self {
            ctx,
            config,
            runtime,
            topology,
            simulate,
            materialize,
            accumulate,
            luma,
            bloom,
            bloom_params,
            combine,
            display,
            clock: FrameClock::default(),
            state: RunState::Stopped,
            run_time: Duration::ZERO,
            resumed_at: None,
            last_tick: Duration::ZERO,
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn clock(&self) -> FrameClock {
        self.clock
    }

    pub fn simulate(&self) -> &SimulateStage {
        &self.simulate
    }

    pub fn accumulate(&self) -> &AccumulateStage {
        &self.accumulate
    }

    pub fn bloom(&self) -> Option<&BloomStage> {
        self.bloom.as_ref()
    }

    /// Any stage through the common contract.  `None` only for bloom while it
    /// is disabled.
    pub fn stage(&self, id: StageId) -> Option<&dyn Stage> {
        match id {
            StageId::Simulate => Some(&self.simulate),
            StageId::Materialize => Some(&self.materialize),
            StageId::Accumulate => Some(&self.accumulate),
            StageId::Luma => Some(&self.luma),
            StageId::Bloom => self.bloom.as_ref().map(|b| b as &dyn Stage),
            StageId::Combine => Some(&self.combine),
            StageId::Display => Some(&self.display),
        }
    }

    /// Replace the runtime config.  Changes take effect on the next tick.
    pub fn set_runtime_config(&mut self, runtime: RuntimeConfig) -> PipelineResult<()> {
        runtime.validate(&self.config)?;
        self.runtime = runtime;
        Ok(())
    }

    // ========================================================================
    // PARAMETERS
    // ========================================================================

    /// Offer every stage's tunables to `registry`, grouped by stage name.
    pub fn register_params(&self, registry: &mut dyn ParameterRegistry) {
        for id in StageId::ALL {
            let params = match id {
                StageId::Bloom => self.bloom.as_ref().map_or(&self.bloom_params, |b| b.params()),
                _ => match self.stage(id) {
                    Some(stage) => stage.params(),
                    None => continue,
                },
            };
            for param in params.iter() {
                registry.register(id.name(), param);
            }
        }
    }

    pub fn param(&self, stage: StageId, name: &str) -> Option<ParamValue> {
        match stage {
            StageId::Bloom => self.bloom.as_ref().map_or(&self.bloom_params, |b| b.params()).get(name),
            _ => self.stage(stage)?.params().get(name),
        }
    }

    /// Cross-fade the bloom output with its unblurred input, see
    /// [`BloomStage::set_mix`].  Kept across bloom rebuilds.
    pub fn set_bloom_mix(&mut self, mix: Option<f32>) -> PipelineResult<()> {
        match self.bloom.as_mut() {
            Some(bloom) => bloom.set_mix(mix),
            None => {
                self.bloom_params
                    .set("mix_enabled", ParamValue::Bool(mix.is_some()))?;
                match mix {
                    Some(m) => self.bloom_params.set("mix", ParamValue::Float(m.clamp(0.0, 1.0))),
                    None => Ok(()),
                }
            }
        }
    }

    pub fn set_param(&mut self, stage: StageId, name: &str, value: ParamValue) -> PipelineResult<()> {
        let params = match stage {
            StageId::Simulate => self.simulate.params_mut(),
            StageId::Materialize => self.materialize.params_mut(),
            StageId::Accumulate => self.accumulate.params_mut(),
            StageId::Luma => self.luma.params_mut(),
            StageId::Bloom => match self.bloom.as_mut() {
                Some(bloom) => bloom.params_mut(),
                None => &mut self.bloom_params,
            },
            StageId::Combine => self.combine.params_mut(),
            StageId::Display => self.display.params_mut(),
        };
        params.set(name, value)
    }

    // ========================================================================
    // RUN STATE
    // ========================================================================

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn start(&mut self) {
        if self.state == RunState::Running {
            return;
        }
        self.state = RunState::Running;
        self.resumed_at = Some(Instant::now());
        tracing::info!(elapsed = ?self.run_time, "renderer started");
    }

    pub fn pause(&mut self) {
        if self.state == RunState::Stopped {
            return;
        }
        if let Some(resumed) = self.resumed_at.take() {
            self.run_time += resumed.elapsed();
        }
        self.state = RunState::Stopped;
        tracing::info!(elapsed = ?self.run_time, "renderer paused");
    }

    /// Wall-clock time spent running, excluding pauses.
    pub fn elapsed(&self) -> Duration {
        self.run_time + self.resumed_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Scheduler entry point.  Runs one displayed frame if running and
    /// returns whether it did.
    pub fn tick(&mut self) -> PipelineResult<bool> {
        if !self.is_running() {
            return Ok(false);
        }
        let now = self.elapsed();
        let wall_delta = now.saturating_sub(self.last_tick).as_secs_f32();
        self.last_tick = now;

        let updates = self.runtime.updates_per_draw.max(1);
        let dt = self.runtime.time_step.unwrap_or(wall_delta / updates as f32);
        self.cycle(dt)?;
        Ok(true)
    }

    /// One displayed frame advancing simulation by `updates_per_draw` ticks of
    /// exactly `dt` seconds, whatever the run state.
    pub fn step(&mut self, dt: f32) -> PipelineResult<()> {
        self.cycle(dt)
    }

    fn cycle(&mut self, dt: f32) -> PipelineResult<()> {
        self.guarded("frame", |r| {
            r.apply_runtime()?;
            for _ in 0..r.runtime.updates_per_draw.max(1) {
                r.simulation_tick(dt)?;
            }
            r.render_frame()
        })
    }

    /// Run `f` inside device error scopes.  Any failure stops the renderer
    /// before it is returned.
    fn guarded<T>(&mut self, label: &str, f: impl FnOnce(&mut Self) -> PipelineResult<T>) -> PipelineResult<T> {
        self.ctx.push_scopes();
        let result = f(self);
        let captured = self.ctx.pop_scopes();
        let result = match (result, captured) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(reason)) => Err(PipelineError::gpu(label, reason)),
            (Ok(value), None) => Ok(value),
        };
        if let Err(e) = &result {
            tracing::error!("{label} failed, stopping renderer: {e}");
            self.pause();
        }
        result
    }

    // ========================================================================
    // RECONFIGURATION
    // ========================================================================

    fn apply_runtime(&mut self) -> PipelineResult<()> {
        let particles = self.runtime.particle_count;
        if particles != self.simulate.particle_count() {
            self.simulate.resize(&self.ctx, particles)?;
            self.materialize.resize(&self.ctx, particles)?;
        }

        let quality = self.runtime.bloom_quality;
        let wanted = self.config.bloom_plan(quality, self.runtime.bloom_steps);
        let current = self.bloom.as_ref().map(|b| (b.quality(), b.steps()));
        if wanted != current {
            if wanted.is_none() && quality != BloomQuality::Off {
                warn_bloom_fallback(&self.config, quality);
            }
            self.rebuild_bloom(wanted)?;
        }
        Ok(())
    }

    fn rebuild_bloom(&mut self, wanted: Option<(BloomQuality, u32)>) -> PipelineResult<()> {
        if let Some(old) = self.bloom.take() {
            self.bloom_params = old.params().clone();
            old.destroy();
        }
        let next = match wanted {
            Some((quality, steps)) => {
                let input = self.luma.targets();
                let mut stage = BloomStage::create(&self.ctx, input.width(), input.height(), quality, steps)?;
                *stage.params_mut() = self.bloom_params.clone();
                self.bloom = Some(stage);
                Topology::for_quality(quality)
            }
            None => Topology::BloomOff,
        };
        if self.topology.reconfigure(next)
            && let Some(input) = self.topology.upstream(StageId::Display)
        {
            self.display.set_input(input);
        }
        Ok(())
    }

    // ========================================================================
    // DRAWING
    // ========================================================================

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn simulation_tick(&mut self, dt: f32) -> PipelineResult<()> {
        let clock = self.clock.advance(dt);
        let mut encoder = self.encoder("simulation_tick");
        for &id in self.topology.simulation_stages() {
            self.draw_stage(id, &mut encoder, &clock)?;
        }
        self.ctx.submit_one(encoder);
        self.clock = clock;
        Ok(())
    }

    /// The once-per-frame chain on the latest accumulated image.
    fn render_frame(&mut self) -> PipelineResult<()> {
        let clock = self.clock;
        let mut encoder = self.encoder("frame");
        for &id in self.topology.frame_stages() {
            self.draw_stage(id, &mut encoder, &clock)?;
        }
        self.ctx.submit_one(encoder);
        Ok(())
    }

    /// Draw one stage with the upstream outputs the topology wires into it.
    fn draw_stage(&mut self, id: StageId, encoder: &mut wgpu::CommandEncoder, clock: &FrameClock) -> PipelineResult<()> {
        let topology = self.topology;
        let Self {
            ctx,
            simulate,
            materialize,
            accumulate,
            luma,
            bloom,
            combine,
            display,
            ..
        } = self;
        let mut chain: [Option<&mut dyn Stage>; 7] = [
            Some(simulate as &mut dyn Stage),
            Some(materialize as &mut dyn Stage),
            Some(accumulate as &mut dyn Stage),
            Some(luma as &mut dyn Stage),
            bloom.as_mut().map(|b| b as &mut dyn Stage),
            Some(combine as &mut dyn Stage),
            Some(display as &mut dyn Stage),
        ];

        // Inputs always sit earlier in the chain than their reader.
        let (earlier, rest) = chain.split_at_mut(id.index());
        let earlier: &[Option<&mut dyn Stage>] = earlier;
        let stage = rest
            .first_mut()
            .and_then(|s| s.as_deref_mut())
            .ok_or_else(|| PipelineError::config(format!("stage '{id}' is not built")))?;

        let upstream = topology.upstream(id);
        if stage.input() != upstream {
            return Err(PipelineError::config(format!(
                "stage '{id}' reads {:?} but the {} topology wires {:?}",
                stage.input(),
                topology.label(),
                upstream
            )));
        }
        let inputs = StageInputs {
            input: upstream.map(|up| built_output(earlier, up, id)).transpose()?,
            base: topology.base(id).map(|up| built_output(earlier, up, id)).transpose()?,
        };
        stage.draw(ctx, encoder, &inputs, clock)
    }

    /// Present the latest frame into a caller-owned view.
    pub fn draw_to_view(
        &mut self,
        view: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> PipelineResult<()> {
        self.guarded("present", |r| {
            let mut encoder = r.encoder("present");
            let source = display_source(r.topology.upstream(StageId::Display), &r.accumulate, &r.combine)?;
            r.display
                .draw_to_view(&r.ctx, &mut encoder, source, view, format, width, height)?;
            r.ctx.submit_one(encoder);
            Ok(())
        })
    }

    /// Wipe the trail buffer.
    pub fn clear(&mut self) -> PipelineResult<()> {
        self.guarded("clear", |r| {
            let mut encoder = r.encoder("clear");
            r.accumulate.reset(&r.ctx, &mut encoder)?;
            r.ctx.submit_one(encoder);
            Ok(())
        })
    }

    // ========================================================================
    // CAPTURE
    // ========================================================================

    /// Re-run the frame chain on the current simulation state and read the
    /// display image back.  Simulation time and run state are untouched.
    pub fn screenshot_image(&mut self) -> PipelineResult<RgbaImage> {
        self.guarded("screenshot", |r| {
            r.apply_runtime()?;
            r.render_frame()
        })?;
        self.read_display()
    }

    /// `screenshot_image` encoded as PNG.
    pub fn screenshot(&mut self) -> PipelineResult<Vec<u8>> {
        encode_png(&self.screenshot_image()?)
    }

    /// Blit one stage's primary output through the display pass and read it
    /// back.  Overwrites the display image until the next frame.
    pub fn capture_stage(&mut self, id: StageId) -> PipelineResult<RgbaImage> {
        if id != StageId::Display {
            let source = self.output_of(id)?;
            self.ctx.scoped(
                || {
                    let mut encoder = self.encoder("capture");
                    self.display.blit(&self.ctx, &mut encoder, source)?;
                    self.ctx.submit_one(encoder);
                    Ok(())
                },
                |reason| PipelineError::gpu("capture", reason),
            )?;
        }
        self.read_display()
    }

    fn output_of(&self, id: StageId) -> PipelineResult<&StageOutput> {
        match self.stage(id) {
            Some(stage) => Ok(stage.targets()),
            None => Err(PipelineError::config(format!("stage '{id}' is not built"))),
        }
    }

    fn read_display(&self) -> PipelineResult<RgbaImage> {
        let texture = self.display.targets().texture(0);
        let pixels = read_texture(&self.ctx, texture)?;
        RgbaImage::from_raw(texture.width, texture.height, pixels)
            .ok_or_else(|| PipelineError::readback("pixel buffer does not match the display size"))
    }
}

fn warn_bloom_fallback(config: &PipelineConfig, quality: BloomQuality) {
    tracing::warn!(
        quality = quality.label(),
        width = config.render_width,
        height = config.render_height,
        "render target too small for bloom, using the bloom-off topology"
    );
}

/// Primary output of `source`, which must be built and precede `reader`.
fn built_output<'a>(
    earlier: &'a [Option<&mut dyn Stage>],
    source: StageId,
    reader: StageId,
) -> PipelineResult<&'a StageOutput> {
    earlier
        .get(source.index())
        .and_then(|s| s.as_deref())
        .map(|s| s.targets())
        .ok_or_else(|| PipelineError::config(format!("stage '{reader}' reads '{source}', which is not available")))
}

fn display_source<'a>(
    input: Option<StageId>,
    accumulate: &'a AccumulateStage,
    combine: &'a CombineStage,
) -> PipelineResult<&'a StageOutput> {
    match input {
        Some(StageId::Combine) => Ok(combine.targets()),
        Some(StageId::Accumulate) => Ok(accumulate.targets()),
        other => Err(PipelineError::config(format!("display cannot read from {other:?}"))),
    }
}

pub fn encode_png(image: &RgbaImage) -> PipelineResult<Vec<u8>> {
    let mut bytes = Vec::new();
    image::codecs::png::PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_encoding_keeps_dimensions() {
        let image = RgbaImage::from_pixel(5, 3, image::Rgba([10, 20, 30, 255]));
        let bytes = encode_png(&image).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let decoded = image::load_from_memory(&bytes).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(decoded.get_pixel(4, 2), &image::Rgba([10, 20, 30, 255]));
    }
}
