//! Derived player stats from config, tactic and active buffs

use crate::config::game::TacticProfile;
use crate::config::GameConfig;

use super::player::Player;

/// Maximum share of speed lost at full carry weight
const WEIGHT_SPEED_PENALTY: f32 = 0.6;

fn profile(player: &Player, cfg: &GameConfig) -> TacticProfile {
    player
        .tactic
        .map(|t| *cfg.tactics.profile(t))
        .unwrap_or_default()
}

/// Recompute every derived stat of `player` at simulation time `now`.
///
/// HP is clamped into the new max so an expiring buff never leaves a player
/// above their cap. The inventory cap never drops below what is carried; it
/// shrinks back as items leave.
pub fn recalculate(player: &mut Player, cfg: &GameConfig, now: f64) {
    let g = &cfg.gameplay;
    let p = profile(player, cfg);
    let b = &player.buffs;

    let cap = g.inventory_size + b.inventory_cap.value_or(now, 0.0).max(0.0) as usize;
    player.inventory_cap = cap.max(player.inventory.len());
    player.max_weight = g.base_max_weight + b.max_weight.value_or(now, 0.0);
    player.max_hp = g.base_max_hp * p.max_hp_mult;
    player.view_radius = g.base_view_radius * p.view_radius_mult + b.view.value_or(now, 0.0);
    player.hear_radius = g.hear_radius * p.hear_radius_mult + b.hear.value_or(now, 0.0);

    player.weight = player.inventory.iter().map(|i| i.def.weight).sum();
    let ratio = if player.max_weight > 0.0 {
        (player.weight / player.max_weight).min(1.0)
    } else {
        1.0
    };

    let speed = g.base_move_speed
        * p.move_speed_mult
        * b.speed.value_or(now, 1.0)
        * (1.0 - WEIGHT_SPEED_PENALTY * ratio);
    player.move_speed = speed.max(g.min_move_speed);

    player.hp = player.hp.min(player.max_hp);
}

/// Tactic multiplier for heal effects
pub fn heal_mult(player: &Player, cfg: &GameConfig) -> f32 {
    profile(player, cfg).heal_effect_mult
}

/// Tactic multiplier for damage effects
pub fn damage_mult(player: &Player, cfg: &GameConfig) -> f32 {
    profile(player, cfg).damage_effect_mult
}

/// Tactic multiplier for recon effects
pub fn recon_mult(player: &Player, cfg: &GameConfig) -> f32 {
    profile(player, cfg).recon_effect_mult
}
