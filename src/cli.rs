// ============================================================================
// trailfield CLI — headless rendering via command-line arguments
// ============================================================================
//
// Usage examples:
//   trailfield --output field.png
//   trailfield -o out.png --frames 240 --particles 200000 --bloom low
//   trailfield -o big.png --width 1920 --height 1080 --msaa 4 --steps 8
//   trailfield -o preset.png --config settings.json --frames 600
//   trailfield -o trails.png --stage accumulate
//
// No window is opened.  The pipeline runs on a headless GPU context at a
// fixed time step and the final display image is written as PNG.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::config::{BloomQuality, Settings};
use crate::error::PipelineResult;
use crate::gpu::GpuContext;
use crate::renderer::{Renderer, encode_png};
use crate::stages::StageId;

/// Step used when neither the settings file nor `--time-step` sets one.
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// trailfield headless renderer.
///
/// Simulate a particle field with trails and bloom on the GPU and save the
/// final frame.
#[derive(Parser, Debug)]
#[command(
    name = "trailfield",
    about = "Headless GPU particle field renderer",
    long_about = "Run the particle pipeline for a number of fixed-step frames and save\n\
                  the displayed image as PNG. Command-line values override the\n\
                  settings file.\n\n\
                  Example:\n  \
                  trailfield --output field.png --frames 240 --bloom high"
)]
pub struct CliArgs {
    /// Output PNG path.
    #[arg(short, long, value_name = "FILE.png")]
    pub output: PathBuf,

    /// JSON settings file with `pipeline` and `runtime` sections.
    #[arg(short, long, value_name = "SETTINGS.json")]
    pub config: Option<PathBuf>,

    /// Number of displayed frames to render before saving.
    #[arg(short, long, default_value_t = 120)]
    pub frames: u32,

    /// Render width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Render height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Particle count.
    #[arg(short, long)]
    pub particles: Option<u32>,

    /// Bloom quality: off, low, high.
    #[arg(short, long, value_name = "QUALITY")]
    pub bloom: Option<BloomQuality>,

    /// Bloom level count (capped by the render size).
    #[arg(long)]
    pub steps: Option<u32>,

    /// Multisample count for particle rasterization (1 or 4).
    #[arg(long)]
    pub msaa: Option<u32>,

    /// Simulation ticks per displayed frame.
    #[arg(long)]
    pub updates: Option<u32>,

    /// Fixed simulation step in seconds [default: settings file, else 1/60].
    #[arg(long)]
    pub time_step: Option<f32>,

    /// Save this stage's output instead of the displayed image.
    #[arg(long, value_name = "STAGE", value_parser = parse_stage)]
    pub stage: Option<StageId>,

    /// Print per-stage setup and timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Merge the settings file (if any) with the command-line overrides.
    pub fn settings(&self) -> PipelineResult<Settings> {
        let settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        self.apply_overrides(settings)
    }

    /// Layer the command-line values over `settings` and validate the result.
    pub fn apply_overrides(&self, mut settings: Settings) -> PipelineResult<Settings> {
        let pipeline = &mut settings.pipeline;
        let runtime = &mut settings.runtime;

        if let Some(w) = self.width {
            pipeline.render_width = w;
        }
        if let Some(h) = self.height {
            pipeline.render_height = h;
        }
        if let Some(n) = self.msaa {
            pipeline.multisample_count = Some(n);
        }
        if let Some(n) = self.particles {
            runtime.particle_count = n;
            pipeline.max_particle_count = pipeline.max_particle_count.max(n);
        }
        if let Some(q) = self.bloom {
            runtime.bloom_quality = q;
        }
        if let Some(s) = self.steps {
            runtime.bloom_steps = s;
            pipeline.max_bloom_steps = pipeline.max_bloom_steps.max(s);
        }
        if let Some(u) = self.updates {
            runtime.updates_per_draw = u;
        }
        if let Some(dt) = self.time_step {
            runtime.time_step = Some(dt);
        }

        settings.pipeline.validate()?;
        settings.runtime.validate(&settings.pipeline)?;
        Ok(settings)
    }
}

fn parse_stage(name: &str) -> Result<StageId, String> {
    StageId::from_name(name).ok_or_else(|| {
        let known: Vec<_> = StageId::ALL.iter().map(|id| id.name()).collect();
        format!("unknown stage '{name}', expected one of: {}", known.join(", "))
    })
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the headless render and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match render(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("render failed: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn render(args: &CliArgs) -> PipelineResult<()> {
    let settings = args.settings()?;
    let start = Instant::now();

    let ctx = GpuContext::new()?;
    if args.verbose {
        println!("adapter: {}", ctx.adapter_name);
    }
    let mut renderer = Renderer::new(ctx, settings.pipeline.clone(), settings.runtime.clone())?;

    let dt = settings.runtime.time_step.unwrap_or(DEFAULT_TIME_STEP);
    for frame in 0..args.frames {
        renderer.step(dt)?;
        if args.verbose && (frame + 1) % 60 == 0 {
            println!("  frame {}/{}", frame + 1, args.frames);
        }
    }

    let png = match args.stage {
        None | Some(StageId::Display) => renderer.screenshot()?,
        Some(stage) => encode_png(&renderer.capture_stage(stage)?)?,
    };
    write_output(&args.output, &png)?;

    if args.verbose {
        println!(
            "  → {} ({}x{}, {:.0}ms)",
            args.output.display(),
            settings.pipeline.render_width,
            settings.pipeline.render_height,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    tracing::info!(output = %args.output.display(), frames = args.frames, "render written");
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_over_defaults() {
        let args = CliArgs::parse_from([
            "trailfield",
            "-o",
            "out.png",
            "--width",
            "320",
            "--height",
            "200",
            "--bloom",
            "low",
            "--particles",
            "1000",
        ]);
        let settings = args.settings().unwrap();
        assert_eq!(settings.pipeline.render_width, 320);
        assert_eq!(settings.pipeline.render_height, 200);
        assert_eq!(settings.runtime.bloom_quality, BloomQuality::Low);
        assert_eq!(settings.runtime.particle_count, 1000);
        assert_eq!(settings.runtime.time_step, None);
        assert_eq!(args.stage, None);
    }

    #[test]
    fn settings_file_time_step_survives_without_flag() {
        let file = Settings::from_json(r#"{ "runtime": { "time_step": 0.005 } }"#).unwrap();

        let args = CliArgs::parse_from(["trailfield", "-o", "x.png"]);
        let settings = args.apply_overrides(file.clone()).unwrap();
        assert_eq!(settings.runtime.time_step, Some(0.005));

        let args = CliArgs::parse_from(["trailfield", "-o", "x.png", "--time-step", "0.02"]);
        let settings = args.apply_overrides(file).unwrap();
        assert_eq!(settings.runtime.time_step, Some(0.02));
    }

    #[test]
    fn stage_names_select_a_capture() {
        let args = CliArgs::parse_from(["trailfield", "-o", "x.png", "--stage", "luma"]);
        assert_eq!(args.stage, Some(StageId::Luma));
        let err = CliArgs::try_parse_from(["trailfield", "-o", "x.png", "--stage", "blur"])
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("unknown stage 'blur'"), "{err}");
    }

    #[test]
    fn particle_override_raises_the_cap() {
        let args = CliArgs::parse_from(["trailfield", "-o", "x.png", "--particles", "5000000"]);
        let settings = args.settings().unwrap();
        assert!(settings.pipeline.max_particle_count >= 5_000_000);
    }

    #[test]
    fn bad_bloom_quality_is_a_parse_error() {
        assert!(CliArgs::try_parse_from(["trailfield", "-o", "x.png", "--bloom", "ultra"]).is_err());
    }

    #[test]
    fn zero_updates_are_rejected() {
        let args = CliArgs::parse_from(["trailfield", "-o", "x.png", "--updates", "0"]);
        assert!(args.settings().is_err());
    }
}
