// ============================================================================
// CONFIGURATION — construction-time and runtime settings
// ============================================================================
//
// `PipelineConfig` is fixed for the lifetime of a renderer: it decides the
// render resolution, the upper bound on particles and bloom levels, and the
// optional multisample count.  `RuntimeConfig` is read every tick and may
// change while the renderer is running.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Sample counts a render target may request.  Whether the device actually
/// supports one is checked against the adapter at construction time.
pub const VALID_SAMPLE_COUNTS: [u32; 5] = [1, 2, 4, 8, 16];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_particle_count: u32,
    pub max_bloom_steps: u32,
    pub render_width: u32,
    pub render_height: u32,
    pub multisample_count: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_particle_count: 1 << 20,
            max_bloom_steps: 8,
            render_width: 1280,
            render_height: 720,
            multisample_count: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.render_width == 0 || self.render_height == 0 {
            return Err(PipelineError::config(format!(
                "render size must be non-zero, got {}x{}",
                self.render_width, self.render_height
            )));
        }
        if self.max_particle_count == 0 {
            return Err(PipelineError::config("max_particle_count must be at least 1"));
        }
        if self.max_bloom_steps == 0 {
            return Err(PipelineError::config("max_bloom_steps must be at least 1"));
        }
        if let Some(samples) = self.multisample_count
            && !VALID_SAMPLE_COUNTS.contains(&samples)
        {
            return Err(PipelineError::config(format!(
                "multisample_count must be one of {:?}, got {}",
                VALID_SAMPLE_COUNTS, samples
            )));
        }
        Ok(())
    }

    /// Sample count for the materialize color target (1 = no multisampling).
    pub fn sample_count(&self) -> u32 {
        self.multisample_count.unwrap_or(1).max(1)
    }

    /// Largest bloom step count the render size can hold before a level would
    /// collapse to zero pixels.
    pub fn bloom_step_cap(&self) -> u32 {
        max_steps_for_size(self.render_width, self.render_height).min(self.max_bloom_steps)
    }

    /// Clamp a requested step count into `1..=bloom_step_cap()`.
    pub fn clamp_bloom_steps(&self, requested: u32) -> u32 {
        requested.clamp(1, self.bloom_step_cap().max(1))
    }

    /// Bloom quality and level count actually built for a runtime request,
    /// `None` for the bloom-off topology.  A render target with a one-pixel
    /// side cannot hold a single bloom level, so bloom falls back to off.
    pub fn bloom_plan(&self, quality: BloomQuality, requested_steps: u32) -> Option<(BloomQuality, u32)> {
        match quality {
            BloomQuality::Off => None,
            _ if self.bloom_step_cap() == 0 => None,
            quality => Some((quality, self.clamp_bloom_steps(requested_steps))),
        }
    }

    /// Side length of the square state textures used for the largest allowed
    /// particle count.
    pub fn max_state_side(&self) -> u32 {
        state_texture_side(self.max_particle_count)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloomQuality {
    Off,
    Low,
    #[default]
    High,
}

impl BloomQuality {
    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for BloomQuality {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            other => Err(PipelineError::config(format!("unknown bloom quality '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bloom_quality: BloomQuality,
    pub bloom_steps: u32,
    pub updates_per_draw: u32,
    pub particle_count: u32,
    /// Fixed simulation step in seconds.  `None` derives the step from wall
    /// clock time.
    pub time_step: Option<f32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bloom_quality: BloomQuality::High,
            bloom_steps: 7,
            updates_per_draw: 1,
            particle_count: 65_536,
            time_step: None,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self, pipeline: &PipelineConfig) -> PipelineResult<()> {
        if self.updates_per_draw == 0 {
            return Err(PipelineError::config("updates_per_draw must be at least 1"));
        }
        if self.particle_count > pipeline.max_particle_count {
            return Err(PipelineError::config(format!(
                "particle_count {} exceeds max_particle_count {}",
                self.particle_count, pipeline.max_particle_count
            )));
        }
        if let Some(dt) = self.time_step
            && !(dt.is_finite() && dt > 0.0)
        {
            return Err(PipelineError::config(format!("time_step must be positive, got {dt}")));
        }
        Ok(())
    }
}

/// Settings file layout accepted by the headless renderer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub runtime: RuntimeConfig,
}

impl Settings {
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::config(format!("invalid settings: {e}")))
    }

    pub fn load(path: &std::path::Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Smallest square side `s` with `s * s >= n` (at least 1).
pub fn state_texture_side(n: u32) -> u32 {
    if n <= 1 {
        return 1;
    }
    let n = n as u64;
    let mut side = (n as f64).sqrt().ceil() as u64;
    // Float rounding can land one off either way for large n.
    while side * side < n {
        side += 1;
    }
    while side > 1 && (side - 1) * (side - 1) >= n {
        side -= 1;
    }
    side as u32
}

/// `floor(log2(min(width, height)))`, the deepest bloom chain whose coarsest
/// level is still at least one pixel wide.
pub fn max_steps_for_size(width: u32, height: u32) -> u32 {
    let min = width.min(height);
    if min == 0 { 0 } else { min.ilog2() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_side_is_smallest_covering_square() {
        for n in 1..5000u32 {
            let side = state_texture_side(n);
            assert!(side * side >= n, "n={n} side={side}");
            assert!((side - 1) * (side - 1) < n, "n={n} side={side}");
        }
        assert_eq!(state_texture_side(0), 1);
        assert_eq!(state_texture_side(1000), 32);
        assert_eq!(state_texture_side(1 << 20), 1024);
        assert_eq!(state_texture_side((1 << 20) + 1), 1025);
    }

    #[test]
    fn bloom_steps_are_capped_by_resolution() {
        assert_eq!(max_steps_for_size(1280, 720), 9);
        assert_eq!(max_steps_for_size(64, 64), 6);
        assert_eq!(max_steps_for_size(1, 300), 0);

        let cfg = PipelineConfig {
            render_width: 64,
            render_height: 32,
            max_bloom_steps: 8,
            ..Default::default()
        };
        assert_eq!(cfg.bloom_step_cap(), 5);
        assert_eq!(cfg.clamp_bloom_steps(7), 5);
        assert_eq!(cfg.clamp_bloom_steps(0), 1);
    }

    #[test]
    fn one_pixel_targets_plan_no_bloom() {
        let thin = PipelineConfig {
            render_width: 300,
            render_height: 1,
            ..Default::default()
        };
        assert_eq!(thin.bloom_step_cap(), 0);
        assert_eq!(thin.bloom_plan(BloomQuality::High, 7), None);
        assert_eq!(thin.bloom_plan(BloomQuality::Low, 1), None);

        let cfg = PipelineConfig {
            render_width: 64,
            render_height: 32,
            ..Default::default()
        };
        assert_eq!(cfg.bloom_plan(BloomQuality::Off, 4), None);
        assert_eq!(cfg.bloom_plan(BloomQuality::Low, 9), Some((BloomQuality::Low, 5)));
    }

    #[test]
    fn state_side_covers_the_particle_cap() {
        let cfg = PipelineConfig {
            max_particle_count: 1000,
            ..Default::default()
        };
        assert_eq!(cfg.max_state_side(), 32);
        assert_eq!(PipelineConfig::default().max_state_side(), 1024);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(PipelineConfig::default().validate().is_ok());
        let zero = PipelineConfig {
            render_width: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let msaa = PipelineConfig {
            multisample_count: Some(3),
            ..Default::default()
        };
        assert!(msaa.validate().is_err());

        let pipeline = PipelineConfig {
            max_particle_count: 100,
            ..Default::default()
        };
        let too_many = RuntimeConfig {
            particle_count: 101,
            ..Default::default()
        };
        assert!(too_many.validate(&pipeline).is_err());
        let no_updates = RuntimeConfig {
            particle_count: 10,
            updates_per_draw: 0,
            ..Default::default()
        };
        assert!(no_updates.validate(&pipeline).is_err());
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings = Settings::from_json(
            r#"{ "pipeline": { "render_width": 320, "render_height": 200 },
                 "runtime": { "bloom_quality": "low", "bloom_steps": 4 } }"#,
        )
        .unwrap();
        assert_eq!(settings.pipeline.render_width, 320);
        assert_eq!(settings.pipeline.max_bloom_steps, 8);
        assert_eq!(settings.runtime.bloom_quality, BloomQuality::Low);
        assert_eq!(settings.runtime.updates_per_draw, 1);
        assert!(Settings::from_json("{ not json").is_err());
    }

    #[test]
    fn quality_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<BloomQuality>().unwrap(), BloomQuality::High);
        assert_eq!("off".parse::<BloomQuality>().unwrap(), BloomQuality::Off);
        assert!("ultra".parse::<BloomQuality>().is_err());
    }
}
