//! Per-observer snapshot building

use std::collections::{BTreeMap, VecDeque};

use rand::Rng;
use uuid::Uuid;

use crate::ws::protocol::{
    EntityView, GameEvent, GameSnapshot, SelfState, ShopOffer, VisiblePlayer,
};

use super::entity::Entity;
use super::items::ItemCatalog;
use super::map::TileMap;
use super::phase::Phase;
use super::player::Player;
use super::visibility;

/// Read-only borrow of everything a snapshot needs
pub struct WorldView<'a> {
    pub tick: u64,
    pub phase: Phase,
    pub time_left: f32,
    pub now: f64,
    pub pulse_timer: f32,
    pub map: &'a TileMap,
    pub players: &'a BTreeMap<Uuid, Player>,
    pub entities: &'a BTreeMap<Uuid, Entity>,
    pub events: &'a VecDeque<GameEvent>,
    pub catalog: &'a ItemCatalog,
}

/// Builds snapshots for network transmission
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Build the filtered snapshot `observer` is allowed to see.
    ///
    /// Self state is always complete. Other players and entities pass the
    /// sight check; radar and sounds are independent of sight.
    pub fn build<R: Rng + ?Sized>(
        world: &WorldView<'_>,
        observer: &Player,
        rng: &mut R,
    ) -> GameSnapshot {
        let players = world
            .players
            .values()
            .filter(|p| p.session_id != observer.session_id)
            .filter(|p| observer.extracted || !p.extracted)
            .filter(|p| visibility::observer_sees(world.map, observer, p.pos))
            .map(visible_player)
            .collect();

        let entities: Vec<EntityView> = world
            .entities
            .values()
            .filter(|e| visibility::observer_sees(world.map, observer, e.pos))
            .map(Entity::view)
            .collect();

        let radar_blips =
            visibility::radar_blips(world.phase, world.pulse_timer, world.entities.values());

        let sounds = visibility::sounds_for(observer, world.players.values(), world.now, rng);

        GameSnapshot {
            tick: world.tick,
            phase: world.phase,
            time_left: world.time_left,
            events: world.events.iter().cloned().collect(),
            me: self_state(world, observer),
            players,
            entities,
            radar_blips,
            sounds,
        }
    }
}

fn visible_player(p: &Player) -> VisiblePlayer {
    VisiblePlayer {
        id: p.public_id,
        name: p.name.clone(),
        pos: p.pos,
        facing: p.facing,
        hp: p.hp,
        max_hp: p.max_hp,
        alive: p.alive,
    }
}

fn self_state(world: &WorldView<'_>, p: &Player) -> SelfState {
    let shop_stock = p
        .shop_stock
        .iter()
        .filter_map(|id| world.catalog.get(id))
        .map(|def| ShopOffer {
            item_id: def.id.clone(),
            name: def.name.clone(),
            tier: def.tier,
            price: def.cash_value(),
        })
        .collect();

    SelfState {
        session_id: p.session_id,
        name: p.name.clone(),
        pos: p.pos,
        facing: p.facing,
        hp: p.hp,
        max_hp: p.max_hp,
        move_speed: p.move_speed,
        view_radius: p.view_radius,
        hear_radius: p.hear_radius,
        weight: p.weight,
        max_weight: p.max_weight,
        inventory: p.inventory.clone(),
        inventory_cap: p.inventory_cap,
        funds: p.funds,
        alive: p.alive,
        extracted: p.extracted,
        tactic: p.tactic,
        channel: p.channel.map(|c| c.view()),
        buffs: p.buffs.views(world.now),
        shop_stock,
        free_refresh: world.phase.is_active() && p.free_refresh_available(world.phase),
    }
}
