//! Area of interest: sight, hearing and radar for one observer

use std::f32::consts::{FRAC_1_SQRT_2, TAU};

use rand::Rng;

use crate::util::Vec2;
use crate::ws::protocol::{RadarBlip, SoundEvent};

use super::entity::{Entity, EntityKind};
use super::map::TileMap;
use super::phase::Phase;
use super::player::Player;

/// cos(45deg): half of a 90 degree vision cone
pub const VISION_CONE_COS: f32 = FRAC_1_SQRT_2;

/// Motor pulse cycle length in seconds
pub const PULSE_PERIOD: f32 = 15.0;

/// Seconds at the start of each pulse cycle during which motors show on radar
pub const PULSE_REVEAL: f32 = 5.0;

/// Intensity multiplier for jammed sounds
const JAMMED_INTENSITY: f32 = 0.25;

/// Sight check: radius, then cone, then line of sight.
///
/// A zero facing vector is treated as +X.
pub fn can_see(map: &TileMap, from: Vec2, facing: Vec2, view_radius: f32, target: Vec2) -> bool {
    let offset = target - from;
    let dist_sq = offset.length_squared();
    if dist_sq > view_radius * view_radius {
        return false;
    }

    // Standing on the target: no meaningful bearing
    if let Some(dir) = offset.try_normalize() {
        let facing = facing.try_normalize().unwrap_or(Vec2::UNIT_X);
        if dir.dot(facing) < VISION_CONE_COS {
            return false;
        }
    }

    map.has_line_of_sight(from, target)
}

/// Whether `observer` sees a world point; extracted observers see everything
pub fn observer_sees(map: &TileMap, observer: &Player, target: Vec2) -> bool {
    observer.extracted || can_see(map, observer.pos, observer.facing, observer.view_radius, target)
}

/// Directional sounds reaching `observer` from every other moving player.
///
/// Silenced, dead and extracted sources make no sound. A jammed source
/// arrives from a random direction at a quarter of the intensity.
pub fn sounds_for<'a, R: Rng + ?Sized>(
    observer: &Player,
    others: impl Iterator<Item = &'a Player>,
    now: f64,
    rng: &mut R,
) -> Vec<SoundEvent> {
    let hear = observer.hear_radius;
    if hear <= 0.0 {
        return Vec::new();
    }

    let mut sounds = Vec::new();
    for src in others {
        if src.session_id == observer.session_id || !src.alive || src.extracted {
            continue;
        }
        if !src.is_moving() || src.buffs.silence.active(now) {
            continue;
        }

        let offset = src.pos - observer.pos;
        let dist = offset.length();
        if dist > hear {
            continue;
        }

        let mut intensity = (1.0 - dist / hear).max(0.0);
        let mut dir = offset.try_normalize().unwrap_or(Vec2::UNIT_X);
        if src.buffs.jamming.active(now) {
            dir = Vec2::from_angle(rng.gen_range(0.0..TAU));
            intensity *= JAMMED_INTENSITY;
        }
        sounds.push(SoundEvent { dir, intensity });
    }
    sounds
}

/// Radar overlay, independent of sight.
///
/// `pulse_timer` counts down from [`PULSE_PERIOD`]; motors are revealed while
/// it is in the first [`PULSE_REVEAL`] seconds of the cycle.
pub fn radar_blips<'a>(
    phase: Phase,
    pulse_timer: f32,
    entities: impl Iterator<Item = &'a Entity>,
) -> Vec<RadarBlip> {
    let pulse_on = phase == Phase::Conflict && pulse_timer > PULSE_PERIOD - PULSE_REVEAL;
    let exit_on = matches!(phase, Phase::Escape | Phase::Ended);

    entities
        .filter(|e| match e.kind {
            EntityKind::Motor { .. } => pulse_on,
            EntityKind::Exit { .. } => exit_on,
            EntityKind::SupplyDrop { .. } => true,
            _ => false,
        })
        .map(|e| RadarBlip {
            id: e.id,
            kind: e.tag(),
            pos: e.pos,
        })
        .collect()
}
