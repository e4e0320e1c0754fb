//! Match phases as an explicit transition table
//!
//! The simulation only asks two questions: "given this trigger, where do we
//! go?" ([`next`]) and "what runs when we get there?" ([`entry_actions`]).

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Search,
    Conflict,
    Escape,
    Ended,
}

impl Phase {
    /// Loot table index (1..=3) used for tier weights, item caps and supply drops
    pub fn loot_index(self) -> u8 {
        match self {
            Phase::Init | Phase::Search => 1,
            Phase::Conflict => 2,
            Phase::Escape | Phase::Ended => 3,
        }
    }

    /// Countdown length on entry; `None` for phases without a timer
    pub fn duration_secs(self, cfg: &GameConfig) -> Option<f32> {
        match self {
            Phase::Search => Some(cfg.phases.phase1.duration_sec as f32),
            Phase::Conflict => Some(cfg.phases.phase2.duration_sec as f32),
            Phase::Escape => Some(cfg.phases.phase3.duration_sec as f32),
            Phase::Init | Phase::Ended => None,
        }
    }

    /// Whether player actions (move, items, economy, interaction) are accepted
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Search | Phase::Conflict | Phase::Escape)
    }
}

/// Something that can move the match forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Enough players picked a tactic
    QuorumReady,
    /// Phase countdown reached zero
    CountdownElapsed,
    /// Required motor count reached
    MotorsRepaired,
}

/// Side effects run when a phase is entered, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    SeedWorldItems,
    SpawnMotors,
    SpawnSupplyDrops,
    PlaceMerchant,
    RefreshShopStock,
    ResetPulse,
    OpenExit,
    EndMatch,
}

/// (from, trigger, to)
const TRANSITIONS: &[(Phase, Trigger, Phase)] = &[
    (Phase::Init, Trigger::QuorumReady, Phase::Search),
    (Phase::Search, Trigger::CountdownElapsed, Phase::Conflict),
    (Phase::Conflict, Trigger::CountdownElapsed, Phase::Escape),
    (Phase::Conflict, Trigger::MotorsRepaired, Phase::Escape),
    (Phase::Escape, Trigger::CountdownElapsed, Phase::Ended),
];

/// Target phase for a trigger, or `None` if the trigger does not apply
pub fn next(from: Phase, trigger: Trigger) -> Option<Phase> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == trigger)
        .map(|(_, _, to)| *to)
}

pub fn entry_actions(phase: Phase) -> &'static [EntryAction] {
    use EntryAction::*;
    match phase {
        Phase::Init => &[],
        Phase::Search => &[SeedWorldItems, SpawnSupplyDrops, PlaceMerchant, RefreshShopStock],
        Phase::Conflict => &[SpawnMotors, SpawnSupplyDrops, PlaceMerchant, RefreshShopStock, ResetPulse],
        Phase::Escape => &[OpenExit, SpawnSupplyDrops, PlaceMerchant, RefreshShopStock],
        Phase::Ended => &[EndMatch],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_follows_match_order() {
        assert_eq!(next(Phase::Init, Trigger::QuorumReady), Some(Phase::Search));
        assert_eq!(next(Phase::Search, Trigger::CountdownElapsed), Some(Phase::Conflict));
        assert_eq!(next(Phase::Conflict, Trigger::MotorsRepaired), Some(Phase::Escape));
        assert_eq!(next(Phase::Escape, Trigger::CountdownElapsed), Some(Phase::Ended));
    }

    #[test]
    fn triggers_outside_their_phase_do_nothing() {
        assert_eq!(next(Phase::Search, Trigger::MotorsRepaired), None);
        assert_eq!(next(Phase::Escape, Trigger::MotorsRepaired), None);
        assert_eq!(next(Phase::Init, Trigger::CountdownElapsed), None);
        assert_eq!(next(Phase::Ended, Trigger::CountdownElapsed), None);
    }

    #[test]
    fn durations_come_from_config() {
        let cfg = GameConfig::default();
        assert_eq!(Phase::Conflict.duration_secs(&cfg), Some(300.0));
        assert_eq!(Phase::Init.duration_secs(&cfg), None);
        assert_eq!(Phase::Ended.loot_index(), 3);
    }
}
