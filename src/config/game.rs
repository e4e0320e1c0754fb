//! Game tunables for a room
//!
//! A `GameConfig` is deserialized from JSON (every section has defaults, so a
//! partial file or overlay is fine) and then passed through
//! [`GameConfig::clamped`] before a room ever sees it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ws::protocol::Tactic;

use super::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub server: ServerSection,
    pub map: MapSection,
    pub gameplay: GameplaySection,
    pub items: ItemsSection,
    pub tactics: TacticsSection,
    pub phases: PhasesSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub tick_rate_ms: u64,
    pub max_players: usize,
    /// Seconds a disconnected player is kept before removal
    pub disconnect_grace_sec: u64,
    /// Players that must pick a tactic before the match starts
    pub min_ready_players: usize,
    pub allow_dev_commands: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            tick_rate_ms: 50,
            max_players: 8,
            disconnect_grace_sec: 30,
            min_ready_players: 1,
            allow_dev_commands: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSection {
    pub width: usize,
    pub height: usize,
    pub wall_density: f32,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            width: 48,
            height: 48,
            wall_density: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplaySection {
    pub inventory_size: usize,
    pub base_move_speed: f32,
    pub base_view_radius: f32,
    pub hear_radius: f32,
    pub base_max_hp: f32,
    pub base_max_weight: f32,
    /// Hard floor for effective move speed
    pub min_move_speed: f32,
    /// Collision circle radius in tiles
    pub player_radius: f32,
}

impl Default for GameplaySection {
    fn default() -> Self {
        Self {
            inventory_size: 6,
            base_move_speed: 5.0,
            base_view_radius: 8.0,
            hear_radius: 12.0,
            base_max_hp: 100.0,
            base_max_weight: 10.0,
            min_move_speed: 2.0,
            player_radius: 0.25,
        }
    }
}

/// One value per loot phase (Search, Conflict, Escape)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerPhase<T> {
    pub phase1: T,
    pub phase2: T,
    pub phase3: T,
}

impl<T: Copy> PerPhase<T> {
    /// Value for loot phase 1..=3; out-of-range indices clamp to the ends.
    pub fn get(&self, phase: u8) -> T {
        match phase {
            0 | 1 => self.phase1,
            2 => self.phase2,
            _ => self.phase3,
        }
    }

    fn map(self, mut f: impl FnMut(T) -> T) -> Self {
        Self {
            phase1: f(self.phase1),
            phase2: f(self.phase2),
            phase3: f(self.phase3),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierWeights {
    pub t1: f32,
    pub t2: f32,
    pub t3: f32,
}

impl TierWeights {
    pub fn as_array(&self) -> [f32; 3] {
        [self.t1, self.t2, self.t3]
    }
}

/// Catalog override from the external value table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemOverride {
    pub value: Option<u32>,
    pub weight: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemsSection {
    pub initial_world_item_count: usize,
    pub respawn_interval_sec: f32,
    pub merchant_stock_size: usize,
    pub merchant_refresh_cost: u32,
    pub max_world_item_count: PerPhase<usize>,
    pub tier_weights_by_phase: PerPhase<TierWeights>,
    pub scavenge_share_by_phase: PerPhase<f32>,
    /// Share of non-scavenge loot that goes to the tactic's focus category
    pub tactic_focus_share: f32,
    pub value_overrides: BTreeMap<String, ItemOverride>,
}

impl Default for ItemsSection {
    fn default() -> Self {
        Self {
            initial_world_item_count: 20,
            respawn_interval_sec: 5.0,
            merchant_stock_size: 4,
            merchant_refresh_cost: 120,
            max_world_item_count: PerPhase {
                phase1: 60,
                phase2: 60,
                phase3: 60,
            },
            tier_weights_by_phase: PerPhase {
                phase1: TierWeights { t1: 0.70, t2: 0.25, t3: 0.05 },
                phase2: TierWeights { t1: 0.45, t2: 0.40, t3: 0.15 },
                phase3: TierWeights { t1: 0.20, t2: 0.45, t3: 0.35 },
            },
            scavenge_share_by_phase: PerPhase {
                phase1: 0.25,
                phase2: 0.20,
                phase3: 0.15,
            },
            tactic_focus_share: 0.5,
            value_overrides: BTreeMap::new(),
        }
    }
}

/// Stat multipliers applied by a tactic
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TacticProfile {
    pub max_hp_mult: f32,
    pub move_speed_mult: f32,
    pub view_radius_mult: f32,
    pub hear_radius_mult: f32,
    pub heal_effect_mult: f32,
    pub damage_effect_mult: f32,
    pub recon_effect_mult: f32,
}

impl Default for TacticProfile {
    fn default() -> Self {
        Self {
            max_hp_mult: 1.0,
            move_speed_mult: 1.0,
            view_radius_mult: 1.0,
            hear_radius_mult: 1.0,
            heal_effect_mult: 1.0,
            damage_effect_mult: 1.0,
            recon_effect_mult: 1.0,
        }
    }
}

impl TacticProfile {
    fn clamped(self) -> Self {
        let c = |v: f32| clamp_f32(v, 0.5, 2.0);
        Self {
            max_hp_mult: c(self.max_hp_mult),
            move_speed_mult: c(self.move_speed_mult),
            view_radius_mult: c(self.view_radius_mult),
            hear_radius_mult: c(self.hear_radius_mult),
            heal_effect_mult: c(self.heal_effect_mult),
            damage_effect_mult: c(self.damage_effect_mult),
            recon_effect_mult: c(self.recon_effect_mult),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TacticsSection {
    pub recon: TacticProfile,
    pub defense: TacticProfile,
    pub trap: TacticProfile,
}

impl Default for TacticsSection {
    fn default() -> Self {
        Self {
            recon: TacticProfile {
                max_hp_mult: 0.9,
                move_speed_mult: 1.1,
                view_radius_mult: 1.25,
                hear_radius_mult: 1.25,
                heal_effect_mult: 1.0,
                damage_effect_mult: 0.9,
                recon_effect_mult: 1.5,
            },
            defense: TacticProfile {
                max_hp_mult: 1.3,
                move_speed_mult: 0.9,
                view_radius_mult: 1.0,
                hear_radius_mult: 1.0,
                heal_effect_mult: 1.5,
                damage_effect_mult: 1.0,
                recon_effect_mult: 0.8,
            },
            trap: TacticProfile {
                max_hp_mult: 1.0,
                move_speed_mult: 1.0,
                view_radius_mult: 0.9,
                hear_radius_mult: 1.1,
                heal_effect_mult: 1.0,
                damage_effect_mult: 1.4,
                recon_effect_mult: 1.0,
            },
        }
    }
}

impl TacticsSection {
    pub fn profile(&self, tactic: Tactic) -> &TacticProfile {
        match tactic {
            Tactic::Recon => &self.recon,
            Tactic::Defense => &self.defense,
            Tactic::Trap => &self.trap,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPhaseConfig {
    pub duration_sec: u32,
}

impl Default for SearchPhaseConfig {
    fn default() -> Self {
        Self { duration_sec: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictPhaseConfig {
    pub duration_sec: u32,
    pub motors_spawn_count: usize,
    pub motors_required_to_open_exit: usize,
    pub motor_progress_per_sec: f32,
}

impl Default for ConflictPhaseConfig {
    fn default() -> Self {
        Self {
            duration_sec: 300,
            motors_spawn_count: 5,
            motors_required_to_open_exit: 2,
            motor_progress_per_sec: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscapePhaseConfig {
    pub duration_sec: u32,
    pub extraction_time_sec: f32,
}

impl Default for EscapePhaseConfig {
    fn default() -> Self {
        Self {
            duration_sec: 120,
            extraction_time_sec: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasesSection {
    pub phase1: SearchPhaseConfig,
    pub phase2: ConflictPhaseConfig,
    pub phase3: EscapePhaseConfig,
}

fn clamp_f32(v: f32, min: f32, max: f32) -> f32 {
    if v.is_nan() {
        return min;
    }
    v.clamp(min, max)
}

impl GameConfig {
    /// Read a JSON config file and clamp it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: GameConfig = serde_json::from_str(&raw)?;
        Ok(cfg.clamped())
    }

    /// Merge a partial JSON object over this config, then clamp the result
    pub fn with_overlay(&self, overlay: &Value) -> Result<Self, ConfigError> {
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, overlay);
        let cfg: GameConfig = serde_json::from_value(base)?;
        Ok(cfg.clamped())
    }

    /// Enforce hard safety bounds so no out-of-range value reaches a room
    pub fn clamped(mut self) -> Self {
        let s = &mut self.server;
        s.tick_rate_ms = s.tick_rate_ms.clamp(10, 200);
        s.max_players = s.max_players.clamp(1, 16);
        s.disconnect_grace_sec = s.disconnect_grace_sec.clamp(0, 600);
        s.min_ready_players = s.min_ready_players.clamp(1, 16);

        let m = &mut self.map;
        m.width = m.width.clamp(16, 256);
        m.height = m.height.clamp(16, 256);
        m.wall_density = clamp_f32(m.wall_density, 0.0, 0.6);

        let g = &mut self.gameplay;
        g.inventory_size = g.inventory_size.clamp(1, 12);
        g.base_move_speed = clamp_f32(g.base_move_speed, 0.5, 10.0);
        g.base_view_radius = clamp_f32(g.base_view_radius, 1.0, 20.0);
        g.hear_radius = clamp_f32(g.hear_radius, 1.0, 30.0);
        g.base_max_hp = clamp_f32(g.base_max_hp, 10.0, 300.0);
        g.base_max_weight = clamp_f32(g.base_max_weight, 1.0, 50.0);
        g.min_move_speed = clamp_f32(g.min_move_speed, 0.1, g.base_move_speed);
        g.player_radius = clamp_f32(g.player_radius, 0.1, 0.49);

        let i = &mut self.items;
        i.initial_world_item_count = i.initial_world_item_count.clamp(0, 500);
        i.respawn_interval_sec = clamp_f32(i.respawn_interval_sec, 0.5, 30.0);
        i.merchant_stock_size = i.merchant_stock_size.clamp(1, 6);
        i.merchant_refresh_cost = i.merchant_refresh_cost.clamp(0, 10_000);
        i.max_world_item_count = i.max_world_item_count.map(|v| v.clamp(0, 1000));
        i.tier_weights_by_phase = i.tier_weights_by_phase.map(|w| TierWeights {
            t1: clamp_f32(w.t1, 0.0, 1.0),
            t2: clamp_f32(w.t2, 0.0, 1.0),
            t3: clamp_f32(w.t3, 0.0, 1.0),
        });
        i.scavenge_share_by_phase = i.scavenge_share_by_phase.map(|v| clamp_f32(v, 0.0, 1.0));
        i.tactic_focus_share = clamp_f32(i.tactic_focus_share, 0.34, 0.80);

        let t = &mut self.tactics;
        t.recon = t.recon.clamped();
        t.defense = t.defense.clamped();
        t.trap = t.trap.clamped();

        let p = &mut self.phases;
        p.phase1.duration_sec = p.phase1.duration_sec.clamp(10, 3600);
        p.phase2.duration_sec = p.phase2.duration_sec.clamp(10, 3600);
        p.phase2.motors_spawn_count = p.phase2.motors_spawn_count.clamp(1, 50);
        p.phase2.motors_required_to_open_exit = p
            .phase2
            .motors_required_to_open_exit
            .clamp(1, p.phase2.motors_spawn_count);
        p.phase2.motor_progress_per_sec = clamp_f32(p.phase2.motor_progress_per_sec, 1.0, 100.0);
        p.phase3.duration_sec = p.phase3.duration_sec.clamp(10, 3600);
        p.phase3.extraction_time_sec = clamp_f32(p.phase3.extraction_time_sec, 0.5, 30.0);

        self
    }
}

/// Recursively overlay `patch` onto `base`; objects merge, everything else replaces
fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
