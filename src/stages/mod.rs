// ============================================================================
// STAGES — GPU render passes chained through their output textures
// ============================================================================
//
//   simulate → materialize → accumulate → luma → bloom → combine → display
//
// Every stage owns its StageOutput(s) and exposes the most recently written
// one through `targets()`.  Stages never hold references to each other: the
// renderer resolves each stage's upstream id and hands the upstream outputs
// in through `StageInputs` for the duration of one `draw`.

pub mod accumulate;
pub mod bloom;
pub mod combine;
pub mod display;
pub mod luma;
pub mod materialize;
pub mod simulate;

pub use accumulate::AccumulateStage;
pub use bloom::BloomStage;
pub use combine::CombineStage;
pub use display::DisplayStage;
pub use luma::LumaStage;
pub use materialize::MaterializeStage;
pub use simulate::SimulateStage;

use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{GpuContext, StageOutput};
use crate::params::ParamSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageId {
    Simulate,
    Materialize,
    Accumulate,
    Luma,
    Bloom,
    Combine,
    Display,
}

impl StageId {
    pub const ALL: [StageId; 7] = [
        Self::Simulate,
        Self::Materialize,
        Self::Accumulate,
        Self::Luma,
        Self::Bloom,
        Self::Combine,
        Self::Display,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Simulate => "simulate",
            Self::Materialize => "materialize",
            Self::Accumulate => "accumulate",
            Self::Luma => "luma",
            Self::Bloom => "bloom",
            Self::Combine => "combine",
            Self::Display => "display",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    /// Position in `ALL`, which is also chain order.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Simulation time for one tick.  Threaded explicitly through every draw so
/// buffer parity never depends on hidden state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameClock {
    /// Monotonic simulation tick counter.
    pub frame: u64,
    /// Simulation time in seconds at this tick.
    pub time: f32,
    /// Seconds since the previous tick.
    pub delta: f32,
}

impl FrameClock {
    /// The clock for the tick after this one.
    pub fn advance(&self, delta: f32) -> Self {
        Self {
            frame: self.frame + 1,
            time: self.time + delta,
            delta,
        }
    }
}

/// Upstream outputs visible to a stage while it draws.
#[derive(Clone, Copy, Default)]
pub struct StageInputs<'a> {
    /// The stage's upstream input.
    pub input: Option<&'a StageOutput>,
    /// Second image for stages that read two upstream outputs (combine).
    pub base: Option<&'a StageOutput>,
}

impl<'a> StageInputs<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(input: &'a StageOutput) -> Self {
        Self {
            input: Some(input),
            base: None,
        }
    }

    pub fn pair(input: &'a StageOutput, base: &'a StageOutput) -> Self {
        Self {
            input: Some(input),
            base: Some(base),
        }
    }

    pub fn require_input(&self, stage: StageId) -> PipelineResult<&'a StageOutput> {
        self.input.ok_or(PipelineError::MissingInput {
            stage: stage.name(),
            input: "input",
        })
    }

    pub fn require_base(&self, stage: StageId) -> PipelineResult<&'a StageOutput> {
        self.base.ok_or(PipelineError::MissingInput {
            stage: stage.name(),
            input: "base",
        })
    }
}

/// Contract shared by every stage.  Construction is each stage's own
/// `create`; stage-specific operations (`resize`, bloom `mix`, display to a
/// surface) are inherent methods.
pub trait Stage {
    fn id(&self) -> StageId;

    fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Upstream stage this one reads, if any.
    fn input(&self) -> Option<StageId>;

    /// The output written by the most recent `draw`.
    fn targets(&self) -> &StageOutput;

    fn params(&self) -> &ParamSet;

    fn params_mut(&mut self) -> &mut ParamSet;

    /// Encode one unit of work.  Uniform updates are queued on `ctx.queue`,
    /// so the caller must submit `encoder` before drawing the same stage again.
    fn draw(
        &mut self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &StageInputs<'_>,
        clock: &FrameClock,
    ) -> PipelineResult<()>;

    /// Clear persistent state.  Stateless stages have nothing to clear.
    fn reset(&mut self, _ctx: &GpuContext, _encoder: &mut wgpu::CommandEncoder) -> PipelineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for id in StageId::ALL {
            assert_eq!(StageId::from_name(id.name()), Some(id));
        }
        assert_eq!(StageId::from_name("blur"), None);
        for (i, id) in StageId::ALL.into_iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn clock_advances_frame_and_time() {
        let clock = FrameClock::default().advance(0.5).advance(0.25);
        assert_eq!(clock.frame, 2);
        assert!((clock.time - 0.75).abs() < 1e-6);
        assert_eq!(clock.delta, 0.25);
    }

    #[test]
    fn missing_inputs_are_reported() {
        let inputs = StageInputs::none();
        let err = inputs.require_input(StageId::Luma).err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("stage 'luma' was drawn without its 'input' input"));
    }
}
