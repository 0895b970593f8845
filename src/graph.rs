// ============================================================================
// STAGE GRAPH — named topologies of the stage chain
// ============================================================================
//
//   BloomOn   simulate → materialize → accumulate → luma → bloom → combine → display
//                                          └──────────────────────────┘ (base)
//   BloomOff  simulate → materialize → accumulate → display
//
// The renderer owns one `Topology` and changes it only through
// `reconfigure`, which reports whether anything needs rewiring.

use crate::config::BloomQuality;
use crate::stages::StageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topology {
    BloomOff,
    BloomOn,
}

const SIMULATION: [StageId; 3] = [StageId::Simulate, StageId::Materialize, StageId::Accumulate];
const POST_BLOOM_ON: [StageId; 4] = [StageId::Luma, StageId::Bloom, StageId::Combine, StageId::Display];
const POST_BLOOM_OFF: [StageId; 1] = [StageId::Display];

impl Topology {
    pub fn for_quality(quality: BloomQuality) -> Self {
        match quality {
            BloomQuality::Off => Self::BloomOff,
            BloomQuality::Low | BloomQuality::High => Self::BloomOn,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::BloomOff => "bloom-off",
            Self::BloomOn => "bloom-on",
        }
    }

    /// Switch to `next`.  Returns `true` when the wiring actually changed.
    pub fn reconfigure(&mut self, next: Topology) -> bool {
        if *self == next {
            return false;
        }
        tracing::info!(from = self.label(), to = next.label(), "pipeline topology changed");
        *self = next;
        true
    }

    /// The stage whose output the display stage blits.
    pub fn display_input(self) -> StageId {
        match self {
            Self::BloomOff => StageId::Accumulate,
            Self::BloomOn => StageId::Combine,
        }
    }

    /// Stages run once per simulation tick, in order.
    pub fn simulation_stages(self) -> &'static [StageId] {
        &SIMULATION
    }

    /// Stages run once per displayed frame, in order.
    pub fn frame_stages(self) -> &'static [StageId] {
        match self {
            Self::BloomOff => &POST_BLOOM_OFF,
            Self::BloomOn => &POST_BLOOM_ON,
        }
    }

    pub fn is_active(self, stage: StageId) -> bool {
        self.simulation_stages().contains(&stage) || self.frame_stages().contains(&stage)
    }

    /// Upstream input of `stage` under this topology, `None` for the chain
    /// head and for stages that do not run.
    pub fn upstream(self, stage: StageId) -> Option<StageId> {
        if !self.is_active(stage) {
            return None;
        }
        match stage {
            StageId::Simulate => None,
            StageId::Materialize => Some(StageId::Simulate),
            StageId::Accumulate => Some(StageId::Materialize),
            StageId::Luma => Some(StageId::Accumulate),
            StageId::Bloom => Some(StageId::Luma),
            StageId::Combine => Some(StageId::Bloom),
            StageId::Display => Some(self.display_input()),
        }
    }

    /// Second image read by `stage`: combine blends bloom over the trails.
    pub fn base(self, stage: StageId) -> Option<StageId> {
        match stage {
            StageId::Combine if self.is_active(stage) => Some(StageId::Accumulate),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_follows_topology() {
        assert_eq!(Topology::BloomOn.display_input(), StageId::Combine);
        assert_eq!(Topology::BloomOff.display_input(), StageId::Accumulate);
        assert_eq!(Topology::for_quality(BloomQuality::Low), Topology::BloomOn);
        assert_eq!(Topology::for_quality(BloomQuality::Off), Topology::BloomOff);
    }

    #[test]
    fn reconfigure_reports_changes_only() {
        let mut topology = Topology::BloomOn;
        assert!(!topology.reconfigure(Topology::BloomOn));
        assert!(topology.reconfigure(Topology::BloomOff));
        assert_eq!(topology.upstream(StageId::Display), Some(StageId::Accumulate));
        assert!(topology.reconfigure(Topology::BloomOn));
        assert_eq!(topology.upstream(StageId::Display), Some(StageId::Combine));
    }

    #[test]
    fn bypass_skips_bloom_stages() {
        let off = Topology::BloomOff;
        for stage in [StageId::Luma, StageId::Bloom, StageId::Combine] {
            assert!(!off.is_active(stage));
            assert_eq!(off.upstream(stage), None);
        }
        assert!(Topology::BloomOn.frame_stages().ends_with(&[StageId::Display]));
    }

    #[test]
    fn only_combine_reads_a_base_image() {
        assert_eq!(Topology::BloomOn.base(StageId::Combine), Some(StageId::Accumulate));
        assert_eq!(Topology::BloomOff.base(StageId::Combine), None);
        for stage in StageId::ALL.into_iter().filter(|s| *s != StageId::Combine) {
            assert_eq!(Topology::BloomOn.base(stage), None);
        }
    }

    #[test]
    fn inputs_come_from_earlier_stages() {
        for topology in [Topology::BloomOn, Topology::BloomOff] {
            for stage in StageId::ALL {
                for up in [topology.upstream(stage), topology.base(stage)].into_iter().flatten() {
                    assert!(up.index() < stage.index(), "{up} feeds {stage}");
                }
            }
        }
    }

    #[test]
    fn every_active_chain_is_rooted_at_simulate() {
        for topology in [Topology::BloomOn, Topology::BloomOff] {
            let mut stage = StageId::Display;
            let mut hops = 0;
            while let Some(up) = topology.upstream(stage) {
                stage = up;
                hops += 1;
                assert!(hops < StageId::ALL.len());
            }
            assert_eq!(stage, StageId::Simulate);
        }
    }
}
