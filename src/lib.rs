//! GPU particle field renderer: a simulate → materialize → accumulate chain
//! feeding a multi-level bloom and a final display blit, all on wgpu.
//!
//! ```no_run
//! use trailfield::{GpuContext, PipelineConfig, Renderer, RuntimeConfig};
//!
//! # fn main() -> trailfield::PipelineResult<()> {
//! let ctx = GpuContext::new()?;
//! let mut renderer = Renderer::new(ctx, PipelineConfig::default(), RuntimeConfig::default())?;
//! for _ in 0..60 {
//!     renderer.step(1.0 / 60.0)?;
//! }
//! let png = renderer.screenshot()?;
//! std::fs::write("frame.png", png)?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gpu;
pub mod graph;
pub mod logger;
pub mod params;
pub mod renderer;
pub mod stages;

pub use config::{BloomQuality, PipelineConfig, RuntimeConfig, Settings};
pub use error::{PipelineError, PipelineResult};
pub use gpu::GpuContext;
pub use graph::Topology;
pub use params::{CollectingRegistry, Param, ParamMeta, ParamSet, ParamValue, ParameterRegistry};
pub use renderer::{RunState, Renderer};
pub use stages::{FrameClock, Stage, StageId, StageInputs};
