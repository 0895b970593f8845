// End-to-end runs of the stage chain on a real device.  Every test returns
// early when the machine has no usable adapter.

use trailfield::gpu::readback::read_texture;
use trailfield::gpu::target::{MAX_COLOR_ATTACHMENTS, create_frame_buffer};
use trailfield::gpu::texture::create_texture;
use trailfield::gpu::{FilterMode, TexelFormat};
use trailfield::{
    BloomQuality, CollectingRegistry, GpuContext, PipelineConfig, PipelineError, ParamValue, Renderer,
    RunState, RuntimeConfig, Stage, StageId, Topology,
};

const DT: f32 = 1.0 / 60.0;

fn gpu() -> Option<GpuContext> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    match GpuContext::new() {
        Ok(ctx) => Some(ctx),
        Err(e) if e.to_string().contains("no gpu adapter available") => None,
        Err(e) => panic!("unexpected gpu init error: {e}"),
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        max_particle_count: 8192,
        max_bloom_steps: 8,
        render_width: 256,
        render_height: 192,
        multisample_count: None,
    }
}

fn runtime(quality: BloomQuality) -> RuntimeConfig {
    RuntimeConfig {
        bloom_quality: quality,
        bloom_steps: 7,
        updates_per_draw: 1,
        particle_count: 1000,
        time_step: Some(DT),
    }
}

fn renderer(quality: BloomQuality) -> Option<Renderer> {
    let ctx = gpu()?;
    Some(Renderer::new(ctx, config(), runtime(quality)).expect("renderer construction"))
}

#[test]
fn ten_ticks_at_high_quality_produce_a_full_size_image() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    for _ in 0..10 {
        r.step(DT).unwrap();
    }
    assert_eq!(r.clock().frame, 10);
    assert_eq!(r.bloom().map(|b| b.steps()), Some(7));

    let image = r.screenshot_image().unwrap();
    assert_eq!(image.dimensions(), (256, 192));

    let png = r.screenshot().unwrap();
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (256, 192));
}

#[test]
fn particles_reach_the_screen() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    for _ in 0..30 {
        r.step(DT).unwrap();
    }
    let image = r.capture_stage(StageId::Accumulate).unwrap();
    assert!(image.pixels().any(|p| p[0] > 0 || p[1] > 0 || p[2] > 0));
}

#[test]
fn turning_bloom_off_rewires_display_to_accumulate() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    r.step(DT).unwrap();
    let display_input = |r: &Renderer| r.stage(StageId::Display).and_then(|s| s.input());
    assert_eq!(display_input(&r), Some(StageId::Combine));
    assert_eq!(r.topology(), Topology::BloomOn);

    r.set_runtime_config(runtime(BloomQuality::Off)).unwrap();
    r.step(DT).unwrap();
    assert_eq!(display_input(&r), Some(StageId::Accumulate));
    assert_eq!(r.topology(), Topology::BloomOff);
    assert!(r.bloom().is_none());

    r.set_runtime_config(runtime(BloomQuality::Low)).unwrap();
    r.step(DT).unwrap();
    assert_eq!(display_input(&r), Some(StageId::Combine));
    assert_eq!(r.bloom().map(|b| b.quality()), Some(BloomQuality::Low));
}

#[test]
fn stage_inputs_match_the_topology() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    for quality in [BloomQuality::High, BloomQuality::Off, BloomQuality::Low] {
        r.set_runtime_config(runtime(quality)).unwrap();
        r.step(DT).unwrap();
        let topology = r.topology();
        for id in StageId::ALL {
            if let Some(stage) = r.stage(id)
                && topology.is_active(id)
            {
                assert_eq!(stage.input(), topology.upstream(id), "{id} under {}", topology.label());
            }
        }
    }
}

#[test]
fn one_pixel_targets_fall_back_to_bloom_off() {
    let Some(ctx) = gpu() else { return };
    let cfg = PipelineConfig {
        render_width: 64,
        render_height: 1,
        ..config()
    };
    let mut r = Renderer::new(ctx, cfg, runtime(BloomQuality::High)).unwrap();
    assert_eq!(r.topology(), Topology::BloomOff);
    assert!(r.bloom().is_none());
    r.step(DT).unwrap();

    r.set_runtime_config(runtime(BloomQuality::Low)).unwrap();
    r.step(DT).unwrap();
    assert_eq!(r.topology(), Topology::BloomOff);
    assert_eq!(r.screenshot_image().unwrap().dimensions(), (64, 1));
}

#[test]
fn particle_cap_beyond_the_device_limit_is_rejected() {
    let Some(ctx) = gpu() else { return };
    let cfg = PipelineConfig {
        max_particle_count: u32::MAX,
        ..config()
    };
    match Renderer::new(ctx, cfg, runtime(BloomQuality::Off)) {
        Err(PipelineError::ResourceCreation { reason, .. }) => assert!(reason.contains("state textures"), "{reason}"),
        Err(other) => panic!("expected ResourceCreation, got {other:?}"),
        Ok(_) => panic!("renderer built with a {} particle cap", u32::MAX),
    }
}

#[test]
fn bloom_params_survive_a_rebuild() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    r.set_param(StageId::Bloom, "radius_max", ParamValue::Float(9.0)).unwrap();
    r.set_runtime_config(runtime(BloomQuality::Off)).unwrap();
    r.step(DT).unwrap();
    assert_eq!(r.param(StageId::Bloom, "radius_max"), Some(ParamValue::Float(9.0)));
    r.set_runtime_config(runtime(BloomQuality::Low)).unwrap();
    r.step(DT).unwrap();
    assert_eq!(r.param(StageId::Bloom, "radius_max"), Some(ParamValue::Float(9.0)));
}

#[test]
fn bypass_equals_the_accumulated_image() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    for _ in 0..5 {
        r.step(DT).unwrap();
    }
    let shown = r.screenshot_image().unwrap();
    let accumulated = r.capture_stage(StageId::Accumulate).unwrap();
    assert_eq!(shown, accumulated);
}

#[test]
fn accumulate_reset_zeroes_both_slots() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    for _ in 0..3 {
        r.step(DT).unwrap();
    }
    // Fill both slots with 1.0 (f16 0x3C00) so the reset has something to wipe.
    let ctx = r.context();
    for slot in 0..2 {
        let color = r.accumulate().slot(slot).texture(0);
        let ones: Vec<u8> = std::iter::repeat([0x00u8, 0x3C])
            .take((color.width * color.height * 4) as usize)
            .flatten()
            .collect();
        color.write_full(&ctx.queue, &ones);
    }

    r.clear().unwrap();
    for slot in 0..2 {
        let bytes = read_texture(r.context(), r.accumulate().slot(slot).texture(0)).unwrap();
        assert!(bytes.iter().all(|&b| b == 0), "slot {slot} not cleared");
    }
}

#[test]
fn trails_fade_to_zero_without_particles() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    r.set_param(StageId::Accumulate, "fade_time", ParamValue::Float(0.1)).unwrap();
    for _ in 0..30 {
        r.step(DT).unwrap();
    }
    let color = |r: &Renderer| read_texture(r.context(), r.accumulate().targets().texture(0)).unwrap();
    assert!(color(&r).iter().any(|&b| b != 0), "no trails were laid down");

    let mut rc = runtime(BloomQuality::Off);
    rc.particle_count = 0;
    r.set_runtime_config(rc).unwrap();
    // 0.25s of ticks, well past the 0.1s fade time.
    for _ in 0..15 {
        r.step(DT).unwrap();
    }
    assert_eq!(r.simulate().particle_count(), 0);
    assert!(color(&r).iter().all(|&b| b == 0), "trails survived the fade time");
}

#[test]
fn bloom_mix_blends_the_input_back() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    // Pass every pixel through the threshold so the bloom input is the trail image.
    r.set_param(StageId::Luma, "threshold", ParamValue::Float(0.0)).unwrap();
    for _ in 0..30 {
        r.step(DT).unwrap();
    }
    let bloom_bytes = |r: &mut Renderer| {
        r.screenshot_image().unwrap();
        let bloom = r.bloom().expect("bloom is on").targets().texture(0);
        read_texture(r.context(), bloom).unwrap()
    };
    let pure = bloom_bytes(&mut r);
    assert!(pure.iter().any(|&b| b != 0));

    // A zero mix runs both blend passes and leaves the bloom untouched.
    r.set_bloom_mix(Some(0.0)).unwrap();
    assert_eq!(r.bloom().and_then(|b| b.mix()), Some(0.0));
    assert_eq!(bloom_bytes(&mut r), pure);

    r.set_bloom_mix(Some(1.0)).unwrap();
    assert_ne!(bloom_bytes(&mut r), pure);

    // The mix survives a rebuild.
    r.set_bloom_mix(Some(0.5)).unwrap();
    r.set_runtime_config(runtime(BloomQuality::Low)).unwrap();
    r.step(DT).unwrap();
    assert_eq!(r.bloom().and_then(|b| b.mix()), Some(0.5));

    r.set_bloom_mix(None).unwrap();
    assert_eq!(r.bloom().and_then(|b| b.mix()), None);
}

#[test]
fn resize_replaces_every_state_texture() {
    let Some(mut r) = renderer(BloomQuality::Low) else { return };
    r.step(DT).unwrap();
    assert_eq!(r.simulate().state_side(), 32);

    let mut rc = runtime(BloomQuality::Low);
    rc.particle_count = 5000;
    r.set_runtime_config(rc).unwrap();
    r.step(DT).unwrap();

    let sim = r.simulate();
    assert_eq!(sim.particle_count(), 5000);
    assert_eq!(sim.state_side(), 71);
    for slot in 0..2 {
        assert_eq!(sim.slot(slot).width(), 71);
    }
    let targets = r.stage(StageId::Simulate).map(|s| s.targets().width());
    assert_eq!(targets, Some(71));
}

#[test]
fn texels_past_the_particle_count_stay_empty() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    r.step(DT).unwrap();
    r.step(DT).unwrap();
    let current = r.stage(StageId::Simulate).map(|s| s.targets().texture(2)).unwrap();
    let bytes = read_texture(r.context(), current).unwrap();
    // Particle props: 4 x f16 per texel, lifetime in the last channel.
    let texel = 8;
    let live = &bytes[..1000 * texel];
    let unused = &bytes[1000 * texel..];
    assert!(unused.iter().all(|&b| b == 0));
    assert!(live.chunks(texel).any(|t| t[6] != 0 || t[7] != 0));
}

#[test]
fn multisampled_materialize_renders() {
    let Some(ctx) = gpu() else { return };
    let cfg = PipelineConfig {
        multisample_count: Some(4),
        ..config()
    };
    let mut r = Renderer::new(ctx, cfg, runtime(BloomQuality::High)).unwrap();
    for _ in 0..4 {
        r.step(DT).unwrap();
    }
    assert_eq!(r.screenshot_image().unwrap().dimensions(), (256, 192));
}

#[test]
fn several_updates_per_draw_advance_the_clock() {
    let Some(ctx) = gpu() else { return };
    let mut rc = runtime(BloomQuality::Low);
    rc.updates_per_draw = 3;
    let mut r = Renderer::new(ctx, config(), rc).unwrap();
    r.step(DT).unwrap();
    r.step(DT).unwrap();
    assert_eq!(r.clock().frame, 6);
    assert!((r.clock().time - 6.0 * DT).abs() < 1e-5);
}

#[test]
fn paused_renderer_does_not_tick() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    assert!(!r.tick().unwrap());
    r.start();
    assert!(r.is_running());
    assert!(r.tick().unwrap());
    r.pause();
    let frozen = r.elapsed();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(r.elapsed(), frozen);
    assert!(!r.tick().unwrap());

    // Screenshots do not change the run state or simulation time.
    let before = r.clock();
    r.screenshot().unwrap();
    assert!(!r.is_running());
    assert_eq!(r.clock(), before);
}

#[test]
fn present_to_an_external_view() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    r.step(DT).unwrap();
    let format = wgpu::TextureFormat::Bgra8UnormSrgb;
    let surface = r.context().device.create_texture(&wgpu::TextureDescriptor {
        label: Some("fake_surface"),
        size: wgpu::Extent3d {
            width: 128,
            height: 96,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = surface.create_view(&wgpu::TextureViewDescriptor::default());
    r.draw_to_view(&view, format, 128, 96).unwrap();
    // Second call reuses the cached pipeline.
    r.draw_to_view(&view, format, 128, 96).unwrap();
}

#[test]
fn present_errors_stop_the_renderer() {
    let Some(mut r) = renderer(BloomQuality::Off) else { return };
    r.step(DT).unwrap();
    r.start();
    let surface = r.context().device.create_texture(&wgpu::TextureDescriptor {
        label: Some("rgba_surface"),
        size: wgpu::Extent3d {
            width: 128,
            height: 96,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = surface.create_view(&wgpu::TextureViewDescriptor::default());
    // The view is Rgba8Unorm but the pipeline is built for Bgra8Unorm.
    match r.draw_to_view(&view, wgpu::TextureFormat::Bgra8Unorm, 128, 96) {
        Err(PipelineError::Gpu { label, .. }) => assert_eq!(label, "present"),
        other => panic!("expected a gpu error, got {other:?}"),
    }
    assert_eq!(r.state(), RunState::Stopped);
}

#[test]
fn samplers_follow_the_texture_filter() {
    let Some(ctx) = gpu() else { return };
    let sharp = create_texture(&ctx, "sharp", 4, 4, TexelFormat::Rgba8, FilterMode::Nearest).unwrap();
    let smooth = create_texture(&ctx, "smooth", 4, 4, TexelFormat::Rgba16F, FilterMode::Linear).unwrap();
    assert!(std::ptr::eq(ctx.samplers.for_texture(&sharp), &ctx.samplers.nearest));
    assert!(std::ptr::eq(ctx.samplers.for_texture(&smooth), &ctx.samplers.linear));
}

#[test]
fn parameters_are_registered_and_type_checked() {
    let Some(mut r) = renderer(BloomQuality::High) else { return };
    let mut registry = CollectingRegistry::default();
    r.register_params(&mut registry);
    assert!(registry.entries.iter().any(|(group, p)| group == "luma" && p.name == "threshold"));
    assert!(registry.entries.iter().any(|(group, p)| group == "accumulate" && p.name == "fade_time"));

    r.set_param(StageId::Luma, "threshold", ParamValue::Float(0.8)).unwrap();
    assert_eq!(r.param(StageId::Luma, "threshold"), Some(ParamValue::Float(0.8)));
    assert!(r.set_param(StageId::Luma, "threshold", ParamValue::Bool(true)).is_err());
    assert!(r.set_param(StageId::Combine, "nope", ParamValue::Float(1.0)).is_err());
}

#[test]
fn more_than_eight_attachments_are_rejected() {
    let Some(ctx) = gpu() else { return };
    let textures: Vec<_> = (0..MAX_COLOR_ATTACHMENTS + 1)
        .map(|i| create_texture(&ctx, &format!("att{i}"), 4, 4, TexelFormat::Rgba8, FilterMode::Nearest).unwrap())
        .collect();
    let refs: Vec<_> = textures.iter().collect();
    match create_frame_buffer("too_many", &refs) {
        Err(PipelineError::InvalidAttachmentIndex { index, max }) => {
            assert_eq!(index, 8);
            assert_eq!(max, 8);
        }
        other => panic!("expected InvalidAttachmentIndex, got {other:?}"),
    }
}

#[test]
fn oversized_steps_are_clamped_to_the_render_size() {
    let Some(ctx) = gpu() else { return };
    let cfg = PipelineConfig {
        render_width: 64,
        render_height: 32,
        ..config()
    };
    let r = Renderer::new(ctx, cfg, runtime(BloomQuality::High)).unwrap();
    // floor(log2(32)) = 5
    assert_eq!(r.bloom().map(|b| b.steps()), Some(5));
}
