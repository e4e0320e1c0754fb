//! Room simulation: the single owner of all mutable world state
//!
//! A `Simulation` is driven by its room task. Commands are applied one at a
//! time between ticks and [`Simulation::tick`] advances the clock by a fixed
//! step. Nothing here blocks or awaits; persistence is queued as
//! [`StoreRequest`]s for the room to execute.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::{FundsRecord, StoreRequest};
use crate::util::Vec2;
use crate::ws::protocol::{EventKind, GameEvent, GameSnapshot, Tactic};

use super::entity::{Entity, EntityKind, MotorState};
use super::items::{Item, ItemCatalog, ItemEffect};
use super::loot::{random_id, Loot};
use super::map::TileMap;
use super::phase::{self, EntryAction, Phase, Trigger};
use super::physics::PhysicsSystem;
use super::player::{Channel, Player};
use super::room::RoomError;
use super::snapshot::{SnapshotBuilder, WorldView};
use super::stats;
use super::visibility::PULSE_PERIOD;

/// Max distance to start channeling on a motor or exit
pub const INTERACT_RANGE: f32 = 2.0;
/// Max distance to pick up a drop
pub const PICKUP_RANGE: f32 = 1.5;
/// Max distance to trade with the merchant
pub const MERCHANT_RANGE: f32 = 3.0;
/// Rolling event log length
pub const EVENT_LOG_CAP: usize = 5;

const MERCHANT_SEARCH_RADIUS: i32 = 6;
const SUPPLY_SCATTER: f32 = 10.0;
const NAME_MAX_CHARS: usize = 24;

/// A validated player action
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    SetName(String),
    Move { dir: Vec2, look_dir: Option<Vec2> },
    UseItem { slot: usize },
    Interact,
    Pickup,
    Drop { slot: usize },
    Sell { slot: usize },
    Buy { item_id: String },
    RefreshShop,
    ChooseTactic(Tactic),
    DevSkipPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The session already had a player; it was reconnected
    Resumed,
}

pub struct Simulation {
    id: Uuid,
    config: Arc<GameConfig>,
    catalog: Arc<ItemCatalog>,
    map: TileMap,
    rng: ChaCha8Rng,

    players: BTreeMap<Uuid, Player>,
    entities: BTreeMap<Uuid, Entity>,

    phase: Phase,
    phase_timer: f32,
    pulse_timer: f32,
    respawn_timer: f32,
    motors_fixed: usize,

    /// Simulation clock in seconds
    now: f64,
    tick: u64,

    events: VecDeque<GameEvent>,
    outbox: Vec<StoreRequest>,
}

impl Simulation {
    /// New room simulation with a map generated from the room seed
    pub fn new(id: Uuid, config: Arc<GameConfig>, catalog: Arc<ItemCatalog>, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let m = &config.map;
        let map = TileMap::generate(m.width, m.height, m.wall_density, &mut rng);
        Self::with_map(id, config, catalog, map, rng)
    }

    pub fn with_map(
        id: Uuid,
        config: Arc<GameConfig>,
        catalog: Arc<ItemCatalog>,
        map: TileMap,
        rng: ChaCha8Rng,
    ) -> Self {
        let respawn_timer = config.items.respawn_interval_sec;
        Self {
            id,
            config,
            catalog,
            map,
            rng,
            players: BTreeMap::new(),
            entities: BTreeMap::new(),
            phase: Phase::Init,
            phase_timer: 0.0,
            pulse_timer: 0.0,
            respawn_timer,
            motors_fixed: 0,
            now: 0.0,
            tick: 0,
            events: VecDeque::with_capacity(EVENT_LOG_CAP),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn map(&self) -> &TileMap {
        &self.map
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn player(&self, session_id: &Uuid) -> Option<&Player> {
        self.players.get(session_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Sessions that should receive snapshots
    pub fn connected_sessions(&self) -> Vec<Uuid> {
        self.players
            .values()
            .filter(|p| !p.disconnected)
            .map(|p| p.session_id)
            .collect()
    }

    /// Drain queued persistence work
    pub fn take_store_requests(&mut self) -> Vec<StoreRequest> {
        std::mem::take(&mut self.outbox)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Add a player, or resume one that is already in the room
    pub fn add_player(
        &mut self,
        session_id: Uuid,
        name: Option<String>,
    ) -> Result<JoinOutcome, RoomError> {
        if let Some(player) = self.players.get_mut(&session_id) {
            if !player.disconnected {
                return Err(RoomError::SessionInUse);
            }
            player.disconnected = false;
            player.disconnected_at = None;
            info!(room_id = %self.id, session_id = %session_id, "Player resumed");
            return Ok(JoinOutcome::Resumed);
        }

        if self.phase == Phase::Ended {
            return Err(RoomError::MatchOver);
        }
        if self.players.len() >= self.config.server.max_players {
            return Err(RoomError::Full);
        }

        let pos = self.map.random_walkable_pos(&mut self.rng);
        let mut player = Player::new(session_id, None, pos, &self.config);
        player.public_id = random_id(&mut self.rng);
        stats::recalculate(&mut player, &self.config, self.now);
        if self.phase.is_active() {
            player.shop_stock = Loot::new(&self.catalog, &self.config.items).shop_stock(
                &mut self.rng,
                self.phase.loot_index(),
                None,
            );
        }
        self.players.insert(session_id, player);
        info!(room_id = %self.id, session_id = %session_id, "Player joined");

        if let Some(name) = name {
            self.set_name(session_id, &name);
        }
        Ok(JoinOutcome::Joined)
    }

    /// Mark a player offline; removal happens after the grace period
    pub fn mark_disconnected(&mut self, session_id: Uuid) {
        if let Some(player) = self.players.get_mut(&session_id) {
            player.disconnected = true;
            player.disconnected_at = Some(self.now);
            player.move_dir = Vec2::ZERO;
            player.cancel_channel();
            debug!(room_id = %self.id, session_id = %session_id, "Player disconnected");
        }
    }

    /// Remove a player now, persisting their funds if named
    pub fn remove_player(&mut self, session_id: Uuid) -> bool {
        let Some(player) = self.players.remove(&session_id) else {
            return false;
        };
        self.outbox.extend(save_request(&player));
        self.push_event(EventKind::PlayerLeft, format!("{} left", display_name(&player)));
        info!(room_id = %self.id, session_id = %session_id, "Player removed");
        true
    }

    /// Funds fetched from the store for a name this player took
    pub fn apply_loaded_funds(&mut self, session_id: Uuid, name: &str, funds: u32) {
        if let Some(player) = self.players.get_mut(&session_id) {
            if player.name.as_deref() == Some(name) {
                player.funds = funds;
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Apply one command. Invalid commands are silently ignored.
    pub fn apply(&mut self, session_id: Uuid, command: PlayerCommand) {
        if !self.players.contains_key(&session_id) {
            return;
        }

        match command {
            PlayerCommand::SetName(name) => self.set_name(session_id, &name),
            PlayerCommand::ChooseTactic(tactic) => self.choose_tactic(session_id, tactic),
            PlayerCommand::DevSkipPhase => self.dev_skip_phase(),
            action => {
                if !self.phase.is_active() {
                    return;
                }
                if !self.players.get(&session_id).is_some_and(Player::is_active) {
                    return;
                }
                match action {
                    PlayerCommand::Move { dir, look_dir } => self.set_move(session_id, dir, look_dir),
                    PlayerCommand::UseItem { slot } => self.use_item(session_id, slot),
                    PlayerCommand::Interact => self.interact(session_id),
                    PlayerCommand::Pickup => self.pickup(session_id),
                    PlayerCommand::Drop { slot } => self.drop_item(session_id, slot),
                    PlayerCommand::Sell { slot } => self.sell(session_id, slot),
                    PlayerCommand::Buy { item_id } => self.buy(session_id, &item_id),
                    PlayerCommand::RefreshShop => self.refresh_shop(session_id),
                    PlayerCommand::SetName(_)
                    | PlayerCommand::ChooseTactic(_)
                    | PlayerCommand::DevSkipPhase => {}
                }
            }
        }
    }

    fn set_name(&mut self, session_id: Uuid, raw: &str) {
        let name = raw.trim();
        if name.is_empty() || name.chars().count() > NAME_MAX_CHARS {
            return;
        }
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        player.name = Some(name.to_string());
        self.outbox.push(StoreRequest::Load {
            session_id,
            name: name.to_string(),
        });
    }

    fn choose_tactic(&mut self, session_id: Uuid, tactic: Tactic) {
        if self.phase != Phase::Init {
            return;
        }
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        player.tactic = Some(tactic);
        stats::recalculate(player, &self.config, self.now);
        player.hp = player.max_hp;

        let ready = self
            .players
            .values()
            .filter(|p| p.tactic.is_some() && !p.disconnected)
            .count();
        if ready >= self.config.server.min_ready_players {
            self.fire(Trigger::QuorumReady);
        }
    }

    /// Zero the current countdown; the next tick performs the transition
    fn dev_skip_phase(&mut self) {
        if !self.config.server.allow_dev_commands {
            debug!(room_id = %self.id, "Dev command rejected");
            return;
        }
        if self.phase.duration_secs(&self.config).is_some() {
            self.phase_timer = 0.0;
            self.push_event(EventKind::Dev, format!("Phase {:?} skipped", self.phase));
        }
    }

    fn set_move(&mut self, session_id: Uuid, dir: Vec2, look_dir: Option<Vec2>) {
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        let dir = dir.try_normalize().unwrap_or(Vec2::ZERO);
        player.move_dir = dir;

        if let Some(look) = look_dir.and_then(Vec2::try_normalize) {
            player.facing = look;
        } else if !dir.is_zero() {
            player.facing = dir;
        }

        if !dir.is_zero() {
            player.cancel_channel();
        }
    }

    fn use_item(&mut self, session_id: Uuid, slot: usize) {
        let Some(user) = self.players.get(&session_id) else {
            return;
        };
        let Some(item) = user.inventory.get(slot) else {
            return;
        };
        let effect = item.def.effect;
        let item_id = item.def.id.clone();
        let pos = user.pos;
        let damage_mult = stats::damage_mult(user, &self.config);

        let used = match effect {
            ItemEffect::Damage { range, amount } => match self.nearest_enemy(session_id, pos, range) {
                Some(target) => {
                    self.damage_player(target, amount * damage_mult);
                    true
                }
                None => false,
            },
            ItemEffect::MotorBoost { fraction } => {
                let motor = self.nearest_entity(pos, INTERACT_RANGE, |e| {
                    matches!(e.kind, EntityKind::Motor { state, .. } if state != MotorState::Fixed)
                });
                match motor {
                    Some(motor) => {
                        let max = match self.entities.get(&motor).map(|e| &e.kind) {
                            Some(EntityKind::Motor { max_progress, .. }) => *max_progress,
                            _ => return,
                        };
                        self.advance_motor(motor, max * fraction);
                        true
                    }
                    None => false,
                }
            }
            effect => match self.players.get_mut(&session_id) {
                Some(player) => {
                    apply_self_effect(player, effect, &self.config, self.now);
                    true
                }
                None => false,
            },
        };

        if !used {
            return;
        }
        if let Some(player) = self.players.get_mut(&session_id) {
            if slot < player.inventory.len() {
                player.inventory.remove(slot);
            }
            stats::recalculate(player, &self.config, self.now);
        }
        debug!(room_id = %self.id, session_id = %session_id, item = %item_id, "Item used");
    }

    fn interact(&mut self, session_id: Uuid) {
        let Some(pos) = self.players.get(&session_id).map(|p| p.pos) else {
            return;
        };
        let Some(target) = self.nearest_entity(pos, INTERACT_RANGE, Entity::is_interactable) else {
            return;
        };

        let extraction_time = self.config.phases.phase3.extraction_time_sec;
        let channel = match self.entities.get_mut(&target).map(|e| &mut e.kind) {
            Some(EntityKind::Motor { state, .. }) => {
                if *state == MotorState::Inactive {
                    *state = MotorState::Active;
                }
                Channel::Repair { motor: target }
            }
            Some(EntityKind::Exit { .. }) => Channel::Extract {
                exit: target,
                remaining: extraction_time,
            },
            _ => return,
        };

        if let Some(player) = self.players.get_mut(&session_id) {
            player.channel = Some(channel);
            player.move_dir = Vec2::ZERO;
        }
    }

    fn pickup(&mut self, session_id: Uuid) {
        let Some(pos) = self.players.get(&session_id).map(|p| p.pos) else {
            return;
        };
        let Some(target) = self.nearest_entity(pos, PICKUP_RANGE, Entity::is_pickup) else {
            return;
        };
        let (Some(player), Some(entity)) = (
            self.players.get_mut(&session_id),
            self.entities.get_mut(&target),
        ) else {
            return;
        };

        let mut claimed_supply = false;
        let emptied = match &mut entity.kind {
            EntityKind::ItemDrop { item } => {
                if !player.has_room() {
                    return;
                }
                player.inventory.push(item.clone());
                true
            }
            EntityKind::SupplyDrop { funds, items } => {
                let took_items = player.has_room() && !items.is_empty();
                if *funds == 0 && !took_items {
                    return;
                }
                player.funds = player.funds.saturating_add(*funds);
                *funds = 0;
                while player.has_room() && !items.is_empty() {
                    player.inventory.push(items.remove(0));
                }
                claimed_supply = true;
                items.is_empty()
            }
            _ => return,
        };

        stats::recalculate(player, &self.config, self.now);
        let name = display_name(player);
        if emptied {
            self.entities.remove(&target);
        }
        if claimed_supply {
            self.push_event(EventKind::SupplyClaimed, format!("{name} claimed a supply drop"));
        }
    }

    fn drop_item(&mut self, session_id: Uuid, slot: usize) {
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        if slot >= player.inventory.len() {
            return;
        }
        let item = player.inventory.remove(slot);
        let pos = player.pos;
        stats::recalculate(player, &self.config, self.now);
        self.spawn_item_drop(pos, item);
    }

    fn sell(&mut self, session_id: Uuid, slot: usize) {
        if !self.near_merchant(session_id) {
            return;
        }
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        if slot >= player.inventory.len() {
            return;
        }
        let item = player.inventory.remove(slot);
        let value = item.def.cash_value();
        player.funds = player.funds.saturating_add(value);
        stats::recalculate(player, &self.config, self.now);
        debug!(room_id = %self.id, session_id = %session_id, item = %item.def.id, value, "Item sold");
    }

    fn buy(&mut self, session_id: Uuid, item_id: &str) {
        if !self.near_merchant(session_id) {
            return;
        }
        let Some(def) = self.catalog.get(item_id) else {
            return;
        };
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        let Some(listing) = player.shop_stock.iter().position(|id| id == item_id) else {
            return;
        };
        let price = def.cash_value();
        if player.funds < price || !player.has_room() {
            return;
        }

        player.funds -= price;
        player.shop_stock.remove(listing);
        player.inventory.push(Item::new(random_id(&mut self.rng), def));
        stats::recalculate(player, &self.config, self.now);
        debug!(room_id = %self.id, session_id = %session_id, item = %item_id, price, "Item bought");
    }

    /// One free refresh per phase, then `merchant_refresh_cost` each
    fn refresh_shop(&mut self, session_id: Uuid) {
        if !self.near_merchant(session_id) {
            return;
        }
        let phase = self.phase;
        let cost = self.config.items.merchant_refresh_cost;
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };

        if player.free_refresh_available(phase) {
            player.free_refresh_used = Some(phase);
        } else if player.funds >= cost {
            player.funds -= cost;
        } else {
            return;
        }

        player.shop_stock = Loot::new(&self.catalog, &self.config.items).shop_stock(
            &mut self.rng,
            phase.loot_index(),
            player.tactic,
        );
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance the world by `dt` seconds
    pub fn tick(&mut self, dt: f32) {
        self.tick += 1;
        self.now += dt as f64;

        self.kick_expired();

        if !self.phase.is_active() {
            return;
        }

        self.phase_timer -= dt;
        if self.phase_timer <= 0.0 {
            self.fire(Trigger::CountdownElapsed);
            if !self.phase.is_active() {
                return;
            }
        }

        if self.phase == Phase::Conflict {
            self.pulse_timer -= dt;
            if self.pulse_timer <= 0.0 {
                self.pulse_timer += PULSE_PERIOD;
                self.push_event(EventKind::MotorPulse, "Motors pulse on radar".to_string());
            }
        }

        self.update_channels(dt);
        self.respawn_items(dt);

        for player in self.players.values_mut() {
            if player.is_active() {
                stats::recalculate(player, &self.config, self.now);
            }
        }

        self.move_players(dt);
    }

    fn kick_expired(&mut self) {
        let grace = self.config.server.disconnect_grace_sec as f64;
        let now = self.now;
        let expired: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| p.disconnected_at.is_some_and(|t| now - t > grace))
            .map(|p| p.session_id)
            .collect();

        for session_id in expired {
            info!(room_id = %self.id, session_id = %session_id, "Disconnect grace expired");
            self.remove_player(session_id);
        }
    }

    fn update_channels(&mut self, dt: f32) {
        let rate = self.config.phases.phase2.motor_progress_per_sec;
        let channeling: Vec<(Uuid, Channel)> = self
            .players
            .values()
            .filter(|p| p.is_active())
            .filter_map(|p| p.channel.map(|c| (p.session_id, c)))
            .collect();

        for (session_id, channel) in channeling {
            // An earlier motor fix this tick may have released this player
            if self.players.get(&session_id).and_then(|p| p.channel) != Some(channel) {
                continue;
            }

            match channel {
                Channel::Repair { motor } => {
                    let valid = matches!(
                        self.entities.get(&motor).map(|e| &e.kind),
                        Some(EntityKind::Motor { state, .. }) if *state != MotorState::Fixed
                    );
                    if !valid {
                        self.cancel_channel(session_id);
                        continue;
                    }
                    self.advance_motor(motor, rate * dt);
                }
                Channel::Extract { exit, remaining } => {
                    let open = matches!(
                        self.entities.get(&exit).map(|e| &e.kind),
                        Some(EntityKind::Exit { open: true })
                    );
                    if !open {
                        self.cancel_channel(session_id);
                        continue;
                    }
                    let remaining = remaining - dt;
                    if remaining <= 0.0 {
                        self.extract(session_id);
                    } else if let Some(player) = self.players.get_mut(&session_id) {
                        player.channel = Some(Channel::Extract { exit, remaining });
                    }
                }
            }
        }
    }

    fn cancel_channel(&mut self, session_id: Uuid) {
        if let Some(player) = self.players.get_mut(&session_id) {
            player.cancel_channel();
        }
    }

    /// Add progress to a motor; fixing it may force Conflict -> Escape
    fn advance_motor(&mut self, motor_id: Uuid, amount: f32) {
        let Some(Entity {
            kind:
                EntityKind::Motor {
                    state,
                    progress,
                    max_progress,
                },
            ..
        }) = self.entities.get_mut(&motor_id)
        else {
            return;
        };
        if *state == MotorState::Fixed {
            return;
        }

        *state = MotorState::Active;
        *progress = (*progress + amount).min(*max_progress);
        if *progress < *max_progress {
            return;
        }
        *state = MotorState::Fixed;
        self.motors_fixed += 1;

        for player in self.players.values_mut() {
            if matches!(player.channel, Some(Channel::Repair { motor }) if motor == motor_id) {
                player.cancel_channel();
            }
        }

        let required = self.config.phases.phase2.motors_required_to_open_exit;
        info!(room_id = %self.id, fixed = self.motors_fixed, required, "Motor repaired");
        self.push_event(
            EventKind::MotorFixed,
            format!("Motor repaired ({}/{})", self.motors_fixed, required),
        );

        if self.phase == Phase::Conflict && self.motors_fixed >= required {
            self.fire(Trigger::MotorsRepaired);
        }
    }

    /// Cash out the inventory and turn the player into a spectator
    fn extract(&mut self, session_id: Uuid) {
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        let value = player.inventory_value();
        player.funds = player.funds.saturating_add(value);
        player.inventory.clear();
        player.extracted = true;
        player.alive = false;
        player.cancel_channel();
        player.move_dir = Vec2::ZERO;
        stats::recalculate(player, &self.config, self.now);

        let name = display_name(player);
        let request = save_request(player);
        self.outbox.extend(request);

        info!(room_id = %self.id, session_id = %session_id, value, "Player extracted");
        self.push_event(EventKind::Extraction, format!("{name} extracted with ${value}"));
    }

    fn respawn_items(&mut self, dt: f32) {
        self.respawn_timer -= dt;
        if self.respawn_timer > 0.0 {
            return;
        }
        self.respawn_timer = self.config.items.respawn_interval_sec;

        let cap = self
            .config
            .items
            .max_world_item_count
            .get(self.phase.loot_index());
        let on_ground = self
            .entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::ItemDrop { .. }))
            .count();
        if on_ground < cap {
            self.spawn_world_item();
        }
    }

    fn move_players(&mut self, dt: f32) {
        let radius = self.config.gameplay.player_radius;
        for player in self.players.values_mut() {
            if !player.is_active() || player.move_dir.is_zero() {
                continue;
            }
            let delta = player.move_dir * (player.move_speed * dt);
            player.pos = PhysicsSystem::resolve_movement(&self.map, player.pos, delta, radius);
        }
    }

    // =========================================================================
    // Phase machine
    // =========================================================================

    fn fire(&mut self, trigger: Trigger) {
        if let Some(to) = phase::next(self.phase, trigger) {
            self.enter(to);
        }
    }

    fn enter(&mut self, to: Phase) {
        info!(room_id = %self.id, from = ?self.phase, to = ?to, "Phase transition");
        self.phase = to;
        self.phase_timer = to.duration_secs(&self.config).unwrap_or(0.0);
        self.push_event(EventKind::PhaseChange, format!("Phase {:?} begins", to));

        for action in phase::entry_actions(to) {
            self.run_entry_action(*action);
        }
    }

    fn run_entry_action(&mut self, action: EntryAction) {
        match action {
            EntryAction::SeedWorldItems => {
                for _ in 0..self.config.items.initial_world_item_count {
                    self.spawn_world_item();
                }
            }
            EntryAction::SpawnMotors => {
                for _ in 0..self.config.phases.phase2.motors_spawn_count {
                    let pos = self.map.random_walkable_pos(&mut self.rng);
                    let id = random_id(&mut self.rng);
                    self.entities.insert(id, Entity::motor(id, pos));
                }
            }
            EntryAction::SpawnSupplyDrops => self.spawn_supply_drops(),
            EntryAction::PlaceMerchant => self.place_merchant(),
            EntryAction::RefreshShopStock => {
                let loot_phase = self.phase.loot_index();
                let loot = Loot::new(&self.catalog, &self.config.items);
                for player in self.players.values_mut() {
                    if !player.disconnected {
                        player.shop_stock = loot.shop_stock(&mut self.rng, loot_phase, player.tactic);
                    }
                }
            }
            EntryAction::ResetPulse => self.pulse_timer = PULSE_PERIOD,
            EntryAction::OpenExit => {
                let pos = self.map.random_walkable_pos(&mut self.rng);
                let id = random_id(&mut self.rng);
                self.entities
                    .insert(id, Entity::new(id, pos, EntityKind::Exit { open: true }));
                self.push_event(EventKind::ExitOpened, "The exit is open".to_string());
            }
            EntryAction::EndMatch => self.end_match(),
        }
    }

    fn spawn_world_item(&mut self) {
        let loot = Loot::new(&self.catalog, &self.config.items);
        let Some(item) = loot.roll_item(&mut self.rng, self.phase.loot_index(), None) else {
            return;
        };
        let pos = self.map.random_walkable_pos(&mut self.rng);
        self.spawn_item_drop(pos, item);
    }

    fn spawn_item_drop(&mut self, pos: Vec2, item: Item) {
        let id = random_id(&mut self.rng);
        self.entities
            .insert(id, Entity::new(id, pos, EntityKind::ItemDrop { item }));
    }

    /// Drops land near the living players' centroid with some scatter
    fn spawn_supply_drops(&mut self) {
        let loot_phase = self.phase.loot_index();
        let count = if loot_phase == 1 { 1 } else { 2 };
        let (w, h) = (self.map.width() as f32, self.map.height() as f32);

        let alive: Vec<Vec2> = self
            .players
            .values()
            .filter(|p| p.alive && !p.extracted)
            .map(|p| p.pos)
            .collect();
        let centroid = if alive.is_empty() {
            Vec2::new(w / 2.0, h / 2.0)
        } else {
            alive.iter().fold(Vec2::ZERO, |acc, p| acc + *p) * (1.0 / alive.len() as f32)
        };

        for _ in 0..count {
            let offset = Vec2::new(
                self.rng.gen_range(-SUPPLY_SCATTER..=SUPPLY_SCATTER),
                self.rng.gen_range(-SUPPLY_SCATTER..=SUPPLY_SCATTER),
            );
            let target = centroid + offset;
            let mut pos = Vec2::new(target.x.clamp(1.0, w - 1.0), target.y.clamp(1.0, h - 1.0));
            if !self.map.is_walkable(pos) {
                pos = self.map.random_walkable_pos(&mut self.rng);
            }

            let (funds, items) =
                Loot::new(&self.catalog, &self.config.items).supply_drop(&mut self.rng, loot_phase);
            let id = random_id(&mut self.rng);
            self.entities
                .insert(id, Entity::new(id, pos, EntityKind::SupplyDrop { funds, items }));
        }
    }

    /// One merchant at a time, anchored per phase
    fn place_merchant(&mut self) {
        self.entities
            .retain(|_, e| !matches!(e.kind, EntityKind::Merchant));

        let (w, h) = (self.map.width() as f32, self.map.height() as f32);
        let (ax, ay) = match self.phase.loot_index() {
            1 => (0.5, 0.5),
            2 => (0.25, 0.25),
            _ => (0.75, 0.75),
        };
        let pos = match self
            .map
            .nearest_walkable(Vec2::new(w * ax, h * ay), MERCHANT_SEARCH_RADIUS)
        {
            Some(pos) => pos,
            None => self.map.random_walkable_pos(&mut self.rng),
        };
        let id = random_id(&mut self.rng);
        self.entities
            .insert(id, Entity::new(id, pos, EntityKind::Merchant));
    }

    fn end_match(&mut self) {
        let requests: Vec<StoreRequest> = self.players.values().filter_map(save_request).collect();
        self.outbox.extend(requests);

        for player in self.players.values_mut() {
            player.cancel_channel();
            player.move_dir = Vec2::ZERO;
        }

        let extracted = self.players.values().filter(|p| p.extracted).count();
        info!(room_id = %self.id, extracted, "Match ended");
        self.push_event(
            EventKind::MatchEnd,
            format!("Match over: {} of {} extracted", extracted, self.players.len()),
        );
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn nearest_entity(
        &self,
        pos: Vec2,
        range: f32,
        pred: impl Fn(&Entity) -> bool,
    ) -> Option<Uuid> {
        let range_sq = range * range;
        self.entities
            .values()
            .filter(|&e| pred(e))
            .map(|e| (e.id, e.pos.distance_squared(pos)))
            .filter(|(_, d)| *d <= range_sq)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    fn nearest_enemy(&self, session_id: Uuid, pos: Vec2, range: f32) -> Option<Uuid> {
        let range_sq = range * range;
        self.players
            .values()
            .filter(|p| p.session_id != session_id && p.alive && !p.extracted)
            .map(|p| (p.session_id, p.pos.distance_squared(pos)))
            .filter(|(_, d)| *d <= range_sq)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    fn near_merchant(&self, session_id: Uuid) -> bool {
        let Some(pos) = self.players.get(&session_id).map(|p| p.pos) else {
            return false;
        };
        self.nearest_entity(pos, MERCHANT_RANGE, |e| matches!(e.kind, EntityKind::Merchant))
            .is_some()
    }

    fn damage_player(&mut self, target: Uuid, amount: f32) {
        let now = self.now;
        let Some(player) = self.players.get_mut(&target) else {
            return;
        };
        let reduction = player.buffs.damage_reduction.value_or(now, 0.0).clamp(0.0, 1.0);
        player.hp -= amount * (1.0 - reduction);
        if player.hp <= 0.0 {
            player.hp = 0.0;
            self.down_player(target);
        }
    }

    /// Player reached 0 HP: out of the match, inventory spills on the floor
    fn down_player(&mut self, session_id: Uuid) {
        let Some(player) = self.players.get_mut(&session_id) else {
            return;
        };
        player.alive = false;
        player.cancel_channel();
        player.move_dir = Vec2::ZERO;
        let spilled = std::mem::take(&mut player.inventory);
        let pos = player.pos;
        stats::recalculate(player, &self.config, self.now);
        let name = display_name(player);

        for item in spilled {
            self.spawn_item_drop(pos, item);
        }
        info!(room_id = %self.id, session_id = %session_id, "Player down");
        self.push_event(EventKind::PlayerDown, format!("{name} is down"));
    }

    fn push_event(&mut self, kind: EventKind, message: String) {
        if self.events.len() >= EVENT_LOG_CAP {
            self.events.pop_front();
        }
        self.events.push_back(GameEvent {
            kind,
            message,
            at: self.now,
        });
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Filtered view of the world for one player
    pub fn snapshot_for(&mut self, session_id: Uuid) -> Option<GameSnapshot> {
        let observer = self.players.get(&session_id)?;
        let time_left = if self.phase.duration_secs(&self.config).is_some() {
            self.phase_timer.max(0.0)
        } else {
            0.0
        };
        let world = WorldView {
            tick: self.tick,
            phase: self.phase,
            time_left,
            now: self.now,
            pulse_timer: self.pulse_timer,
            map: &self.map,
            players: &self.players,
            entities: &self.entities,
            events: &self.events,
            catalog: &self.catalog,
        };
        Some(SnapshotBuilder::build(&world, observer, &mut self.rng))
    }
}

/// Self-targeted item effects (heals, buffs, funds)
fn apply_self_effect(player: &mut Player, effect: ItemEffect, cfg: &GameConfig, now: f64) {
    match effect {
        ItemEffect::Heal { amount } => {
            let healed = amount * stats::heal_mult(player, cfg);
            player.hp = (player.hp + healed).min(player.max_hp);
        }
        ItemEffect::SpeedBoost { mult, secs } => player.buffs.speed.set(mult, now, secs),
        ItemEffect::Silence { secs } => player.buffs.silence.set(1.0, now, secs),
        ItemEffect::Jamming { secs } => player.buffs.jamming.set(1.0, now, secs),
        ItemEffect::DamageReduction { fraction, secs } => {
            player.buffs.damage_reduction.set(fraction, now, secs)
        }
        ItemEffect::HearBoost { bonus, secs } => {
            let bonus = bonus * stats::recon_mult(player, cfg);
            player.buffs.hear.set(bonus, now, secs);
        }
        ItemEffect::ViewBoost { bonus, secs } => {
            let bonus = bonus * stats::recon_mult(player, cfg);
            player.buffs.view.set(bonus, now, secs);
        }
        ItemEffect::Backpack { slots, weight, secs } => {
            player.buffs.inventory_cap.set(slots as f32, now, secs);
            player.buffs.max_weight.set(weight, now, secs);
        }
        ItemEffect::Funds { amount } => player.funds = player.funds.saturating_add(amount),
        ItemEffect::Damage { .. } | ItemEffect::MotorBoost { .. } => {}
    }
}

fn save_request(player: &Player) -> Option<StoreRequest> {
    player.name.as_ref().map(|name| {
        StoreRequest::Save(FundsRecord {
            name: name.clone(),
            funds: player.funds,
            item_count: player.inventory.len(),
        })
    })
}

fn display_name(player: &Player) -> String {
    match &player.name {
        Some(name) => name.clone(),
        None => player.session_id.simple().to_string()[..8].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::visibility::PULSE_REVEAL;

    fn open_map() -> TileMap {
        let mut rows = vec!["#".repeat(20)];
        for _ in 0..18 {
            rows.push(format!("#{}#", ".".repeat(18)));
        }
        rows.push("#".repeat(20));
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        TileMap::from_rows(&refs)
    }

    fn sim_with(cfg: GameConfig) -> Simulation {
        Simulation::with_map(
            Uuid::nil(),
            Arc::new(cfg.clamped()),
            Arc::new(ItemCatalog::builtin()),
            open_map(),
            ChaCha8Rng::seed_from_u64(1),
        )
    }

    fn sim() -> Simulation {
        sim_with(GameConfig::default())
    }

    fn join_at(sim: &mut Simulation, pos: Vec2) -> Uuid {
        let sid = Uuid::new_v4();
        sim.add_player(sid, None).unwrap();
        sim.players.get_mut(&sid).unwrap().pos = pos;
        sid
    }

    fn give(sim: &mut Simulation, sid: Uuid, item_id: &str) {
        let def = sim.catalog.get(item_id).unwrap().clone();
        let player = sim.players.get_mut(&sid).unwrap();
        player.inventory.push(Item::new(Uuid::new_v4(), &def));
        stats::recalculate(player, &sim.config, sim.now);
    }

    fn place(sim: &mut Simulation, pos: Vec2, kind: EntityKind) -> Uuid {
        let id = Uuid::new_v4();
        sim.entities.insert(id, Entity::new(id, pos, kind));
        id
    }

    fn merchant_pos(sim: &Simulation) -> Vec2 {
        sim.entities
            .values()
            .find(|e| matches!(e.kind, EntityKind::Merchant))
            .map(|e| e.pos)
            .unwrap()
    }

    #[test]
    fn quorum_starts_search_with_world_seeded() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        assert_eq!(sim.phase(), Phase::Init);

        sim.apply(sid, PlayerCommand::ChooseTactic(Tactic::Defense));
        assert_eq!(sim.phase(), Phase::Search);

        let items = sim
            .entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::ItemDrop { .. }))
            .count();
        let drops = sim
            .entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::SupplyDrop { .. }))
            .count();
        assert_eq!(items, sim.config.items.initial_world_item_count);
        assert_eq!(drops, 1);
        merchant_pos(&sim);

        let player = sim.player(&sid).unwrap();
        assert_eq!(player.shop_stock.len(), sim.config.items.merchant_stock_size);
        assert_eq!(player.hp, player.max_hp);
        assert!(player.max_hp > sim.config.gameplay.base_max_hp);
    }

    #[test]
    fn tactic_is_locked_after_start() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.apply(sid, PlayerCommand::ChooseTactic(Tactic::Recon));
        sim.apply(sid, PlayerCommand::ChooseTactic(Tactic::Trap));
        assert_eq!(sim.player(&sid).unwrap().tactic, Some(Tactic::Recon));
    }

    #[test]
    fn movement_is_ignored_in_init() {
        let mut sim = sim();
        let start = Vec2::new(5.5, 5.5);
        let sid = join_at(&mut sim, start);
        sim.apply(
            sid,
            PlayerCommand::Move {
                dir: Vec2::UNIT_X,
                look_dir: None,
            },
        );
        sim.tick(0.05);
        assert_eq!(sim.player(&sid).unwrap().pos, start);
    }

    #[test]
    fn movement_uses_speed_and_faces_direction() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.enter(Phase::Search);
        sim.apply(
            sid,
            PlayerCommand::Move {
                dir: Vec2::new(0.0, 2.0),
                look_dir: None,
            },
        );
        sim.tick(0.1);

        let player = sim.player(&sid).unwrap();
        assert_eq!(player.facing, Vec2::new(0.0, 1.0));
        let expected = 5.5 + player.move_speed * 0.1;
        assert!((player.pos.y - expected).abs() < 1e-5);
        assert_eq!(player.pos.x, 5.5);
    }

    #[test]
    fn final_motor_forces_escape_in_same_tick() {
        let mut sim = sim();
        let pos = Vec2::new(4.5, 4.5);
        let sid = join_at(&mut sim, pos);
        sim.enter(Phase::Conflict);
        let required = sim.config.phases.phase2.motors_required_to_open_exit;
        sim.motors_fixed = required - 1;

        let motor = place(
            &mut sim,
            pos,
            EntityKind::Motor {
                state: MotorState::Inactive,
                progress: 99.5,
                max_progress: 100.0,
            },
        );
        sim.apply(sid, PlayerCommand::Interact);
        assert_eq!(
            sim.player(&sid).unwrap().channel,
            Some(Channel::Repair { motor })
        );
        assert!(sim.phase_timer > 200.0);

        sim.tick(0.05);
        assert_eq!(sim.phase(), Phase::Escape);
        assert_eq!(sim.motors_fixed, required);
        assert_eq!(sim.entities[&motor].state(), 2);
        assert!(sim.player(&sid).unwrap().channel.is_none());
        assert!(sim
            .entities
            .values()
            .any(|e| matches!(e.kind, EntityKind::Exit { open: true })));
    }

    #[test]
    fn motor_progress_accrues_per_second() {
        let mut sim = sim();
        let pos = Vec2::new(4.5, 4.5);
        let sid = join_at(&mut sim, pos);
        sim.enter(Phase::Conflict);
        let motor = place(
            &mut sim,
            pos,
            EntityKind::Motor {
                state: MotorState::Inactive,
                progress: 0.0,
                max_progress: 100.0,
            },
        );
        sim.apply(sid, PlayerCommand::Interact);
        sim.tick(0.5);

        match &sim.entities[&motor].kind {
            EntityKind::Motor { state, progress, .. } => {
                assert_eq!(*state, MotorState::Active);
                assert!((*progress - 10.0).abs() < 1e-4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sim.phase(), Phase::Conflict);
    }

    #[test]
    fn moving_cancels_channel() {
        let mut sim = sim();
        let pos = Vec2::new(4.5, 4.5);
        let sid = join_at(&mut sim, pos);
        sim.enter(Phase::Conflict);
        place(&mut sim, pos, EntityKind::Motor {
            state: MotorState::Inactive,
            progress: 0.0,
            max_progress: 100.0,
        });
        sim.apply(sid, PlayerCommand::Interact);
        assert!(sim.player(&sid).unwrap().channel.is_some());

        sim.apply(
            sid,
            PlayerCommand::Move {
                dir: Vec2::UNIT_X,
                look_dir: None,
            },
        );
        assert!(sim.player(&sid).unwrap().channel.is_none());
    }

    #[test]
    fn extraction_round_trip() {
        let mut sim = sim();
        let pos = Vec2::new(3.5, 3.5);
        let sid = join_at(&mut sim, pos);
        let far = join_at(&mut sim, Vec2::new(16.5, 16.5));
        sim.apply(sid, PlayerCommand::SetName("kit".to_string()));
        assert_eq!(
            sim.take_store_requests(),
            vec![StoreRequest::Load {
                session_id: sid,
                name: "kit".to_string()
            }]
        );

        sim.enter(Phase::Escape);
        place(&mut sim, pos, EntityKind::Exit { open: true });
        give(&mut sim, sid, "WPN_STUN_GRENADE");
        sim.players.get_mut(&sid).unwrap().funds = 25;
        assert_eq!(sim.player(&sid).unwrap().inventory_value(), 150);

        // Face away so the far player is out of sight before extracting
        sim.players.get_mut(&sid).unwrap().facing = Vec2::new(-1.0, 0.0);
        let far_id = sim.player(&far).unwrap().public_id;
        let before = sim.snapshot_for(sid).unwrap();
        assert!(before.players.iter().all(|p| p.id != far_id));

        sim.apply(sid, PlayerCommand::Interact);
        let mut ticks = 0;
        while !sim.player(&sid).unwrap().extracted {
            sim.tick(0.05);
            ticks += 1;
            assert!(ticks <= 70, "extraction did not finish");
        }
        assert!(ticks >= 59);

        let player = sim.player(&sid).unwrap();
        assert_eq!(player.funds, 175);
        assert!(player.inventory.is_empty());
        assert!(!player.alive);
        assert!(player.extracted);
        assert_eq!(player.weight, 0.0);

        let requests = sim.take_store_requests();
        assert!(requests.contains(&StoreRequest::Save(FundsRecord {
            name: "kit".to_string(),
            funds: 175,
            item_count: 0,
        })));

        let after = sim.snapshot_for(sid).unwrap();
        assert!(after.players.iter().any(|p| p.id == far_id));
        assert_eq!(after.entities.len(), sim.entities.len());

        // Spectators can no longer act
        sim.apply(sid, PlayerCommand::Pickup);
        sim.apply(
            sid,
            PlayerCommand::Move {
                dir: Vec2::UNIT_X,
                look_dir: None,
            },
        );
        assert!(sim.player(&sid).unwrap().move_dir.is_zero());
    }

    #[test]
    fn extraction_cancelled_when_exit_disappears() {
        let mut sim = sim();
        let pos = Vec2::new(3.5, 3.5);
        let sid = join_at(&mut sim, pos);
        sim.enter(Phase::Escape);
        let exit = place(&mut sim, pos, EntityKind::Exit { open: true });
        sim.apply(sid, PlayerCommand::Interact);
        sim.entities.remove(&exit);
        sim.tick(0.05);
        assert!(sim.player(&sid).unwrap().channel.is_none());
        assert!(!sim.player(&sid).unwrap().extracted);
    }

    #[test]
    fn merchant_economy() {
        let mut cfg = GameConfig::default();
        cfg.items.merchant_refresh_cost = 120;
        let mut sim = sim_with(cfg);
        let sid = join_at(&mut sim, Vec2::new(2.5, 2.5));
        sim.enter(Phase::Search);
        let at_merchant = merchant_pos(&sim);

        // Out of range: nothing happens
        give(&mut sim, sid, "SURV_BANDAGE");
        sim.apply(sid, PlayerCommand::Sell { slot: 0 });
        assert_eq!(sim.player(&sid).unwrap().inventory.len(), 1);

        sim.players.get_mut(&sid).unwrap().pos = at_merchant;
        sim.apply(sid, PlayerCommand::Sell { slot: 0 });
        let player = sim.player(&sid).unwrap();
        assert!(player.inventory.is_empty());
        assert_eq!(player.funds, 40);

        // First refresh in a phase is free, the next one costs
        sim.players.get_mut(&sid).unwrap().funds = 200;
        sim.apply(sid, PlayerCommand::RefreshShop);
        assert_eq!(sim.player(&sid).unwrap().funds, 200);
        sim.apply(sid, PlayerCommand::RefreshShop);
        assert_eq!(sim.player(&sid).unwrap().funds, 80);
        sim.apply(sid, PlayerCommand::RefreshShop);
        assert_eq!(sim.player(&sid).unwrap().funds, 80);

        sim.players.get_mut(&sid).unwrap().shop_stock = vec!["SURV_BANDAGE".to_string()];
        sim.apply(sid, PlayerCommand::Buy { item_id: "WPN_EMP_MINE".to_string() });
        assert!(sim.player(&sid).unwrap().inventory.is_empty());
        sim.apply(sid, PlayerCommand::Buy { item_id: "SURV_BANDAGE".to_string() });
        let player = sim.player(&sid).unwrap();
        assert_eq!(player.funds, 40);
        assert_eq!(player.inventory[0].def.id, "SURV_BANDAGE");
        assert!(player.shop_stock.is_empty());
    }

    #[test]
    fn buy_requires_funds_and_room() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(2.5, 2.5));
        sim.enter(Phase::Search);
        let at_merchant = merchant_pos(&sim);
        {
            let player = sim.players.get_mut(&sid).unwrap();
            player.pos = at_merchant;
            player.funds = 10;
            player.shop_stock = vec!["SURV_BANDAGE".to_string()];
        }
        sim.apply(sid, PlayerCommand::Buy { item_id: "SURV_BANDAGE".to_string() });
        assert!(sim.player(&sid).unwrap().inventory.is_empty());

        sim.players.get_mut(&sid).unwrap().funds = 1000;
        for _ in 0..sim.config.gameplay.inventory_size {
            give(&mut sim, sid, "WPN_STONE");
        }
        sim.apply(sid, PlayerCommand::Buy { item_id: "SURV_BANDAGE".to_string() });
        assert_eq!(sim.player(&sid).unwrap().funds, 1000);
    }

    #[test]
    fn supply_drop_leftovers_stay() {
        let mut sim = sim();
        let pos = Vec2::new(6.5, 6.5);
        let sid = join_at(&mut sim, pos);
        sim.enter(Phase::Search);
        for _ in 0..sim.config.gameplay.inventory_size - 1 {
            give(&mut sim, sid, "WPN_STONE");
        }

        let bandage = sim.catalog.get("SURV_BANDAGE").unwrap().clone();
        let items = vec![
            Item::new(Uuid::new_v4(), &bandage),
            Item::new(Uuid::new_v4(), &bandage),
        ];
        let drop = place(&mut sim, pos, EntityKind::SupplyDrop { funds: 100, items });
        sim.apply(sid, PlayerCommand::Pickup);

        let player = sim.player(&sid).unwrap();
        assert_eq!(player.funds, 100);
        assert_eq!(player.inventory.len(), sim.config.gameplay.inventory_size);
        match &sim.entities[&drop].kind {
            EntityKind::SupplyDrop { funds, items } => {
                assert_eq!(*funds, 0);
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sim.events.back().unwrap().kind, EventKind::SupplyClaimed);
    }

    #[test]
    fn pickup_and_drop_keep_weight_in_sync() {
        let mut sim = sim();
        let pos = Vec2::new(6.5, 6.5);
        let sid = join_at(&mut sim, pos);
        sim.enter(Phase::Search);
        let knife = sim.catalog.get("WPN_KNIFE_T2").unwrap().clone();
        let drop = place(
            &mut sim,
            pos,
            EntityKind::ItemDrop {
                item: Item::new(Uuid::new_v4(), &knife),
            },
        );

        sim.apply(sid, PlayerCommand::Pickup);
        assert!(!sim.entities.contains_key(&drop));
        assert_eq!(sim.player(&sid).unwrap().weight, knife.weight);

        sim.apply(sid, PlayerCommand::Drop { slot: 0 });
        sim.apply(sid, PlayerCommand::Drop { slot: 3 });
        let player = sim.player(&sid).unwrap();
        assert!(player.inventory.is_empty());
        assert_eq!(player.weight, 0.0);
    }

    #[test]
    fn lethal_damage_downs_and_spills() {
        let mut sim = sim();
        let attacker = join_at(&mut sim, Vec2::new(5.5, 5.5));
        let victim = join_at(&mut sim, Vec2::new(8.5, 5.5));
        sim.enter(Phase::Search);
        give(&mut sim, attacker, "WPN_EMP_MINE");
        give(&mut sim, victim, "SURV_BANDAGE");
        sim.players.get_mut(&victim).unwrap().hp = 10.0;
        let drops_before = sim
            .entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::ItemDrop { .. }))
            .count();

        sim.apply(attacker, PlayerCommand::UseItem { slot: 0 });

        let v = sim.player(&victim).unwrap();
        assert!(!v.alive);
        assert!(!v.extracted);
        assert!(v.inventory.is_empty());
        assert!(sim.player(&attacker).unwrap().inventory.is_empty());
        let drops_after = sim
            .entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::ItemDrop { .. }))
            .count();
        assert_eq!(drops_after, drops_before + 1);
        assert_eq!(sim.events.back().unwrap().kind, EventKind::PlayerDown);
    }

    #[test]
    fn damage_without_target_keeps_item() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(2.5, 2.5));
        join_at(&mut sim, Vec2::new(17.5, 17.5));
        sim.enter(Phase::Search);
        give(&mut sim, sid, "WPN_STONE");
        sim.apply(sid, PlayerCommand::UseItem { slot: 0 });
        assert_eq!(sim.player(&sid).unwrap().inventory.len(), 1);

        // Bad slot is a no-op
        sim.apply(sid, PlayerCommand::UseItem { slot: 9 });
        assert_eq!(sim.player(&sid).unwrap().inventory.len(), 1);
    }

    #[test]
    fn armor_reduces_damage() {
        let mut sim = sim();
        let attacker = join_at(&mut sim, Vec2::new(5.5, 5.5));
        let victim = join_at(&mut sim, Vec2::new(7.5, 5.5));
        sim.enter(Phase::Search);
        give(&mut sim, attacker, "WPN_KNIFE_T2");
        give(&mut sim, victim, "SURV_ARMOR_LIGHT");
        sim.apply(victim, PlayerCommand::UseItem { slot: 0 });
        sim.apply(attacker, PlayerCommand::UseItem { slot: 0 });

        let v = sim.player(&victim).unwrap();
        let expected = v.max_hp - 30.0 * 0.65;
        assert!((v.hp - expected).abs() < 1e-3);
    }

    #[test]
    fn expired_backpack_keeps_overflow_until_dropped() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.enter(Phase::Search);
        give(&mut sim, sid, "SCAV_BACKPACK_M");
        sim.apply(sid, PlayerCommand::UseItem { slot: 0 });

        let base = sim.config.gameplay.inventory_size;
        assert_eq!(sim.player(&sid).unwrap().inventory_cap, base + 2);
        while sim.player(&sid).unwrap().has_room() {
            give(&mut sim, sid, "SURV_BANDAGE");
        }
        assert_eq!(sim.player(&sid).unwrap().inventory.len(), base + 2);

        for _ in 0..700 {
            sim.tick(0.05);
        }
        let player = sim.player(&sid).unwrap();
        assert_eq!(player.inventory.len(), base + 2);
        assert!(player.inventory.len() <= player.inventory_cap);
        assert!(!player.has_room());

        sim.apply(sid, PlayerCommand::Drop { slot: 0 });
        sim.apply(sid, PlayerCommand::Drop { slot: 0 });
        assert_eq!(sim.player(&sid).unwrap().inventory_cap, base);
        sim.apply(sid, PlayerCommand::Drop { slot: 0 });
        let player = sim.player(&sid).unwrap();
        assert_eq!(player.inventory_cap, base);
        assert!(player.has_room());
    }

    #[test]
    fn speed_item_buff_expires() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.enter(Phase::Search);
        give(&mut sim, sid, "SURV_ADRENALINE");
        sim.players.get_mut(&sid).unwrap().inventory[0].def.weight = 0.0;
        stats::recalculate(sim.players.get_mut(&sid).unwrap(), &sim.config, sim.now);
        let base = sim.player(&sid).unwrap().move_speed;

        sim.apply(sid, PlayerCommand::UseItem { slot: 0 });
        assert_eq!(sim.player(&sid).unwrap().move_speed, base * 1.5);

        for _ in 0..200 {
            sim.tick(0.05);
        }
        assert_eq!(sim.player(&sid).unwrap().move_speed, base);
    }

    #[test]
    fn dev_skip_lets_tick_transition() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.apply(sid, PlayerCommand::ChooseTactic(Tactic::Trap));
        sim.apply(sid, PlayerCommand::DevSkipPhase);
        assert_eq!(sim.phase(), Phase::Search);
        assert_eq!(sim.events.back().unwrap().kind, EventKind::Dev);

        sim.tick(0.05);
        assert_eq!(sim.phase(), Phase::Conflict);
        let motors = sim
            .entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::Motor { .. }))
            .count();
        assert_eq!(motors, sim.config.phases.phase2.motors_spawn_count);
        assert!(sim.pulse_timer > PULSE_PERIOD - PULSE_REVEAL);
    }

    #[test]
    fn dev_skip_can_be_disabled() {
        let mut cfg = GameConfig::default();
        cfg.server.allow_dev_commands = false;
        let mut sim = sim_with(cfg);
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.apply(sid, PlayerCommand::ChooseTactic(Tactic::Trap));
        sim.apply(sid, PlayerCommand::DevSkipPhase);
        sim.tick(0.05);
        assert_eq!(sim.phase(), Phase::Search);
        assert!(sim.events.iter().all(|e| e.kind != EventKind::Dev));
    }

    #[test]
    fn escape_countdown_ends_match() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.apply(sid, PlayerCommand::SetName("rae".to_string()));
        sim.take_store_requests();
        sim.enter(Phase::Escape);
        sim.phase_timer = 0.01;
        sim.tick(0.05);

        assert_eq!(sim.phase(), Phase::Ended);
        assert_eq!(sim.events.back().unwrap().kind, EventKind::MatchEnd);
        assert_eq!(sim.take_store_requests().len(), 1);

        // Frozen: no movement, no new joins
        sim.apply(
            sid,
            PlayerCommand::Move {
                dir: Vec2::UNIT_X,
                look_dir: None,
            },
        );
        assert!(sim.player(&sid).unwrap().move_dir.is_zero());
        assert_eq!(sim.add_player(Uuid::new_v4(), None), Err(RoomError::MatchOver));
        // Snapshots still flow
        assert!(sim.snapshot_for(sid).is_some());
    }

    #[test]
    fn disconnect_grace_then_removal() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.apply(sid, PlayerCommand::SetName("nova".to_string()));
        sim.take_store_requests();

        sim.mark_disconnected(sid);
        sim.tick(1.0);
        assert!(sim.player(&sid).is_some());

        // Reconnect keeps the player
        assert_eq!(sim.add_player(sid, None), Ok(JoinOutcome::Resumed));
        assert!(!sim.player(&sid).unwrap().disconnected);
        assert_eq!(sim.add_player(sid, None), Err(RoomError::SessionInUse));

        sim.mark_disconnected(sid);
        let grace = sim.config.server.disconnect_grace_sec as f32;
        sim.tick(grace + 1.0);
        assert!(sim.player(&sid).is_none());
        assert!(matches!(
            sim.take_store_requests().as_slice(),
            [StoreRequest::Save(FundsRecord { name, .. })] if name == "nova"
        ));
    }

    #[test]
    fn live_session_cannot_be_taken_over() {
        let mut sim = sim();
        let owner = join_at(&mut sim, Vec2::new(5.5, 5.5));
        let other = join_at(&mut sim, Vec2::new(3.5, 5.5));

        assert_eq!(sim.add_player(owner, None), Err(RoomError::SessionInUse));
        assert!(!sim.player(&owner).unwrap().disconnected);

        // Others only ever see the per-room id
        let public_id = sim.player(&owner).unwrap().public_id;
        let snap = sim.snapshot_for(other).unwrap();
        let seen: Vec<Uuid> = snap.players.iter().map(|p| p.id).collect();
        assert_eq!(seen, vec![public_id]);
        assert_ne!(public_id, owner);
    }

    #[test]
    fn room_rejects_players_when_full() {
        let mut cfg = GameConfig::default();
        cfg.server.max_players = 1;
        let mut sim = sim_with(cfg);
        sim.add_player(Uuid::new_v4(), None).unwrap();
        assert_eq!(sim.add_player(Uuid::new_v4(), None), Err(RoomError::Full));
    }

    #[test]
    fn event_log_is_bounded() {
        let mut sim = sim();
        for i in 0..12 {
            sim.push_event(EventKind::MotorPulse, format!("pulse {i}"));
        }
        assert_eq!(sim.events.len(), EVENT_LOG_CAP);
        assert_eq!(sim.events.front().unwrap().message, "pulse 7");
    }

    #[test]
    fn pulse_reveals_motors_then_cycles() {
        let mut sim = sim();
        let sid = join_at(&mut sim, Vec2::new(5.5, 5.5));
        sim.enter(Phase::Conflict);

        let snap = sim.snapshot_for(sid).unwrap();
        let motors_on_radar = |s: &GameSnapshot| {
            s.radar_blips
                .iter()
                .filter(|b| b.kind == crate::ws::protocol::EntityTag::Motor)
                .count()
        };
        assert_eq!(motors_on_radar(&snap), sim.config.phases.phase2.motors_spawn_count);

        sim.tick(PULSE_REVEAL + 0.5);
        assert_eq!(motors_on_radar(&sim.snapshot_for(sid).unwrap()), 0);

        sim.tick(PULSE_PERIOD - PULSE_REVEAL);
        assert_eq!(sim.events.back().unwrap().kind, EventKind::MotorPulse);
        assert!(motors_on_radar(&sim.snapshot_for(sid).unwrap()) > 0);
    }
}
