//! Player state and timed buffs

use uuid::Uuid;

use crate::config::GameConfig;
use crate::util::Vec2;
use crate::ws::protocol::{BuffKind, BuffView, ChannelView, Tactic};

use super::items::Item;
use super::phase::Phase;

/// Effect magnitude that holds until the simulation clock reaches `until`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimedBuff {
    pub magnitude: f32,
    pub until: f64,
}

impl TimedBuff {
    pub fn active(&self, now: f64) -> bool {
        now < self.until
    }

    /// Magnitude while active, `inactive` otherwise
    pub fn value_or(&self, now: f64, inactive: f32) -> f32 {
        if self.active(now) {
            self.magnitude
        } else {
            inactive
        }
    }

    /// Start (or refresh) the buff from `now`
    pub fn set(&mut self, magnitude: f32, now: f64, secs: f32) {
        self.magnitude = magnitude;
        self.until = now + secs as f64;
    }
}

/// Independent timed buffs; each slot holds at most one effect
#[derive(Debug, Clone, Default)]
pub struct Buffs {
    /// Speed multiplier
    pub speed: TimedBuff,
    /// Additive view radius
    pub view: TimedBuff,
    /// Additive hear radius
    pub hear: TimedBuff,
    /// Extra inventory slots
    pub inventory_cap: TimedBuff,
    /// Extra carry weight
    pub max_weight: TimedBuff,
    /// Fraction of incoming damage removed
    pub damage_reduction: TimedBuff,
    pub silence: TimedBuff,
    pub jamming: TimedBuff,
}

impl Buffs {
    pub fn views(&self, now: f64) -> Vec<BuffView> {
        [
            (BuffKind::Speed, &self.speed),
            (BuffKind::View, &self.view),
            (BuffKind::Hear, &self.hear),
            (BuffKind::InventoryCap, &self.inventory_cap),
            (BuffKind::MaxWeight, &self.max_weight),
            (BuffKind::DamageReduction, &self.damage_reduction),
            (BuffKind::Silence, &self.silence),
            (BuffKind::Jamming, &self.jamming),
        ]
        .into_iter()
        .filter(|(_, b)| b.active(now))
        .map(|(kind, b)| BuffView {
            kind,
            magnitude: b.magnitude,
            remaining: (b.until - now) as f32,
        })
        .collect()
    }
}

/// The single entity a player is channeling on, by id
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Channel {
    Repair { motor: Uuid },
    Extract { exit: Uuid, remaining: f32 },
}

impl Channel {
    pub fn view(&self) -> ChannelView {
        match *self {
            Channel::Repair { motor } => ChannelView::Repair { target: motor },
            Channel::Extract { exit, remaining } => ChannelView::Extract {
                target: exit,
                remaining,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub session_id: Uuid,
    /// What other players see instead of the session id
    pub public_id: Uuid,
    pub name: Option<String>,
    pub pos: Vec2,
    /// Unit vector
    pub facing: Vec2,
    /// Normalized movement intent, zero when idle
    pub move_dir: Vec2,

    pub hp: f32,
    pub max_hp: f32,
    pub move_speed: f32,
    pub view_radius: f32,
    pub hear_radius: f32,
    pub max_weight: f32,
    pub weight: f32,
    pub inventory: Vec<Item>,
    pub inventory_cap: usize,
    pub funds: u32,

    pub alive: bool,
    pub disconnected: bool,
    /// Simulation clock at disconnect
    pub disconnected_at: Option<f64>,
    pub extracted: bool,

    pub buffs: Buffs,
    pub channel: Option<Channel>,
    pub tactic: Option<Tactic>,
    /// Catalog ids on offer at the merchant
    pub shop_stock: Vec<String>,
    /// Phase in which the free refresh was spent
    pub free_refresh_used: Option<Phase>,
}

impl Player {
    pub fn new(session_id: Uuid, name: Option<String>, pos: Vec2, cfg: &GameConfig) -> Self {
        let g = &cfg.gameplay;
        Self {
            session_id,
            public_id: Uuid::new_v4(),
            name,
            pos,
            facing: Vec2::UNIT_X,
            move_dir: Vec2::ZERO,
            hp: g.base_max_hp,
            max_hp: g.base_max_hp,
            move_speed: g.base_move_speed,
            view_radius: g.base_view_radius,
            hear_radius: g.hear_radius,
            max_weight: g.base_max_weight,
            weight: 0.0,
            inventory: Vec::new(),
            inventory_cap: g.inventory_size,
            funds: 0,
            alive: true,
            disconnected: false,
            disconnected_at: None,
            extracted: false,
            buffs: Buffs::default(),
            channel: None,
            tactic: None,
            shop_stock: Vec::new(),
            free_refresh_used: None,
        }
    }

    /// Alive, connected and still in the match
    pub fn is_active(&self) -> bool {
        self.alive && !self.disconnected && !self.extracted
    }

    pub fn has_room(&self) -> bool {
        self.inventory.len() < self.inventory_cap
    }

    pub fn is_moving(&self) -> bool {
        !self.move_dir.is_zero()
    }

    /// Sum of cash values of everything carried
    pub fn inventory_value(&self) -> u32 {
        self.inventory.iter().map(|i| i.def.cash_value()).sum()
    }

    pub fn free_refresh_available(&self, phase: Phase) -> bool {
        self.free_refresh_used != Some(phase)
    }

    pub fn cancel_channel(&mut self) {
        self.channel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buff_active_strictly_before_expiry() {
        let mut buff = TimedBuff::default();
        assert!(!buff.active(0.0));

        buff.set(1.5, 10.0, 8.0);
        assert!(buff.active(10.0));
        assert!(buff.active(17.999));
        assert!(!buff.active(18.0));
        assert_eq!(buff.value_or(20.0, 1.0), 1.0);
    }

    #[test]
    fn free_refresh_is_per_phase() {
        let mut p = Player::new(Uuid::nil(), None, Vec2::ZERO, &GameConfig::default());
        assert!(p.free_refresh_available(Phase::Search));
        p.free_refresh_used = Some(Phase::Search);
        assert!(!p.free_refresh_available(Phase::Search));
        assert!(p.free_refresh_available(Phase::Conflict));
    }
}
