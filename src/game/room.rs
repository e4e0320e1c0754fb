//! Room task and registry
//!
//! Each room is one tokio task that owns its [`Simulation`]. Connections talk
//! to it only through a bounded [`RoomInput`] queue and receive frames on
//! their own bounded outbound channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::{FundsStore, StoreRequest};
use crate::util::time::{tick_delta, Timer};
use crate::ws::protocol::{RoomSummary, ServerMsg};

use super::items::ItemCatalog;
use super::phase::Phase;
use super::sim::{JoinOutcome, PlayerCommand, Simulation};

/// Room input queue depth
const INPUT_QUEUE_CAPACITY: usize = 512;

/// How long a finished room keeps sending snapshots before shutting down
const ENDED_LINGER: Duration = Duration::from_secs(30);

/// How long a room may sit with no players before shutting down
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Room errors surfaced to clients
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    Full,

    #[error("Room name already taken")]
    NameTaken,

    #[error("Room name must not be empty")]
    InvalidName,

    #[error("Room not found")]
    NotFound,

    #[error("Session is already connected")]
    SessionInUse,

    #[error("Match is over")]
    MatchOver,

    #[error("Invalid room config: {0}")]
    InvalidConfig(String),
}

impl RoomError {
    /// Stable code for error messages on the wire
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::Full => "room_full",
            RoomError::NameTaken => "name_taken",
            RoomError::InvalidName => "invalid_name",
            RoomError::NotFound => "room_not_found",
            RoomError::SessionInUse => "session_in_use",
            RoomError::MatchOver => "match_over",
            RoomError::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Messages consumed by the room task
#[derive(Debug)]
pub enum RoomInput {
    Join {
        session_id: Uuid,
        name: Option<String>,
        outbound: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Result<JoinOutcome, RoomError>>,
    },
    /// Explicit leave: removed right away
    Leave { session_id: Uuid },
    /// Socket dropped: kept for the grace period
    Disconnect { session_id: Uuid },
    Command {
        session_id: Uuid,
        command: PlayerCommand,
    },
    /// Result of a store load queued by the simulation
    FundsLoaded {
        session_id: Uuid,
        name: String,
        funds: u32,
    },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub name: String,
    pub input_tx: mpsc::Sender<RoomInput>,
    summary: Arc<RwLock<RoomSummary>>,
}

impl RoomHandle {
    /// Summary as of the last tick
    pub fn summary(&self) -> RoomSummary {
        self.summary.read().clone()
    }
}

/// Registry of all live rooms
pub struct RoomRegistry {
    rooms: DashMap<Uuid, RoomHandle>,
    names: DashMap<String, Uuid>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            names: DashMap::new(),
        }
    }

    /// Create a room and spawn its task. The room removes itself from the
    /// registry when it shuts down.
    pub fn create(
        self: &Arc<Self>,
        name: &str,
        config: GameConfig,
        catalog: Arc<ItemCatalog>,
        store: FundsStore,
    ) -> Result<RoomHandle, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::InvalidName);
        }

        let id = Uuid::new_v4();
        match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(RoomError::NameTaken),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let seed: u64 = rand::random();
        let (room, handle) = GameRoom::new(id, name.to_string(), Arc::new(config), catalog, store, seed);
        self.rooms.insert(id, handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            room.run().await;
            registry.remove(&id);
        });

        info!(room_id = %id, room_name = %name, seed, "Room created");
        Ok(handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn remove(&self, id: &Uuid) -> Option<RoomHandle> {
        let (_, handle) = self.rooms.remove(id)?;
        self.names.remove(&handle.name);
        Some(handle)
    }

    pub fn list(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self.rooms.iter().map(|r| r.value().summary()).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().summary().players).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative room loop
pub struct GameRoom {
    name: String,
    sim: Simulation,
    input_rx: mpsc::Receiver<RoomInput>,
    /// Fed back by store tasks
    input_tx: mpsc::Sender<RoomInput>,
    connections: HashMap<Uuid, mpsc::Sender<ServerMsg>>,
    summary: Arc<RwLock<RoomSummary>>,
    store: FundsStore,
    /// Map rows, computed once for MatchStarted
    tiles: Vec<Vec<u8>>,
    started: bool,
}

impl GameRoom {
    pub fn new(
        id: Uuid,
        name: String,
        config: Arc<GameConfig>,
        catalog: Arc<ItemCatalog>,
        store: FundsStore,
        seed: u64,
    ) -> (Self, RoomHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let sim = Simulation::new(id, config, catalog, seed);
        let tiles = sim.map().to_rows();

        let summary = Arc::new(RwLock::new(RoomSummary {
            id,
            name: name.clone(),
            players: 0,
            max_players: sim.config().server.max_players,
            phase: Phase::Init,
            map_width: sim.map().width(),
            map_height: sim.map().height(),
        }));

        let handle = RoomHandle {
            id,
            name: name.clone(),
            input_tx: input_tx.clone(),
            summary: summary.clone(),
        };

        let room = Self {
            name,
            sim,
            input_rx,
            input_tx,
            connections: HashMap::new(),
            summary,
            store,
            tiles,
            started: false,
        };

        (room, handle)
    }

    /// Run the fixed-step loop until the room finishes or sits idle
    pub async fn run(mut self) {
        let tick_rate_ms = self.sim.config().server.tick_rate_ms;
        let dt = tick_delta(tick_rate_ms);
        let budget_micros = tick_rate_ms * 1000;
        info!(room_id = %self.sim.id(), room_name = %self.name, tick_rate_ms, "Room loop started");

        let mut tick_interval = interval(Duration::from_millis(tick_rate_ms));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ended_at: Option<Instant> = None;
        let mut empty_since: Option<Instant> = Some(Instant::now());

        loop {
            tick_interval.tick().await;
            let timer = Timer::new();

            self.process_inputs();
            self.sim.tick(dt);

            if !self.started && self.sim.phase() != Phase::Init {
                self.started = true;
                let sessions: Vec<Uuid> = self.connections.keys().copied().collect();
                for session_id in sessions {
                    self.send_match_started(session_id);
                }
            }

            self.broadcast_snapshots();
            self.flush_store_requests();
            self.publish_summary();

            let elapsed = timer.elapsed_micros();
            if elapsed > budget_micros {
                warn!(room_id = %self.sim.id(), elapsed_micros = elapsed, budget_micros, "Tick overran budget");
            }

            if self.sim.phase() == Phase::Ended {
                let since = *ended_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= ENDED_LINGER {
                    info!(room_id = %self.sim.id(), "Room finished");
                    break;
                }
            }

            if self.sim.player_count() == 0 {
                let since = *empty_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= IDLE_TIMEOUT {
                    info!(room_id = %self.sim.id(), "Room idle, shutting down");
                    break;
                }
            } else {
                empty_since = None;
            }
        }

        // Nothing queued may be lost on shutdown
        self.flush_store_requests();
    }

    /// Drain every queued input; applied one at a time in arrival order
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            match input {
                RoomInput::Join {
                    session_id,
                    name,
                    outbound,
                    reply,
                } => {
                    let result = self.sim.add_player(session_id, name);
                    if result.is_ok() {
                        self.connections.insert(session_id, outbound);
                        if self.started {
                            self.send_match_started(session_id);
                        }
                    }
                    if reply.send(result).is_err() {
                        debug!(session_id = %session_id, "Join requester went away");
                    }
                }
                RoomInput::Leave { session_id } => {
                    self.connections.remove(&session_id);
                    self.sim.remove_player(session_id);
                }
                RoomInput::Disconnect { session_id } => {
                    self.connections.remove(&session_id);
                    self.sim.mark_disconnected(session_id);
                }
                RoomInput::Command {
                    session_id,
                    command,
                } => self.sim.apply(session_id, command),
                RoomInput::FundsLoaded {
                    session_id,
                    name,
                    funds,
                } => self.sim.apply_loaded_funds(session_id, &name, funds),
            }
        }
    }

    fn send_match_started(&self, session_id: Uuid) {
        let (Some(tx), Some(player)) = (self.connections.get(&session_id), self.sim.player(&session_id))
        else {
            return;
        };
        let msg = ServerMsg::MatchStarted {
            width: self.sim.map().width(),
            height: self.sim.map().height(),
            tiles: self.tiles.clone(),
            spawn: player.pos,
        };
        if tx.try_send(msg).is_err() {
            warn!(room_id = %self.sim.id(), session_id = %session_id, "Could not deliver match start");
        }
    }

    /// One snapshot per connected player; full outbound queues drop the frame
    fn broadcast_snapshots(&mut self) {
        for session_id in self.sim.connected_sessions() {
            let Some(tx) = self.connections.get(&session_id) else {
                continue;
            };
            let Some(snapshot) = self.sim.snapshot_for(session_id) else {
                continue;
            };
            match tx.try_send(ServerMsg::Snapshot(Box::new(snapshot))) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(session_id = %session_id, "Outbound full, dropping snapshot");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(session_id = %session_id, "Outbound closed");
                }
            }
        }
    }

    /// Run persistence off the tick path; failures are logged only
    fn flush_store_requests(&mut self) {
        for request in self.sim.take_store_requests() {
            let store = self.store.clone();
            let input_tx = self.input_tx.clone();
            let room_id = self.sim.id();

            tokio::spawn(async move {
                match request {
                    StoreRequest::Load { session_id, name } => {
                        let loaded = store.load(&name).await;
                        match loaded {
                            Ok(funds) => {
                                let _ = input_tx
                                    .send(RoomInput::FundsLoaded {
                                        session_id,
                                        name,
                                        funds,
                                    })
                                    .await;
                            }
                            Err(e) => {
                                warn!(room_id = %room_id, player = %name, error = %e, "Failed to load funds");
                            }
                        }
                    }
                    StoreRequest::Save(record) => {
                        if let Err(e) = store.save(&record).await {
                            warn!(room_id = %room_id, player = %record.name, error = %e, "Failed to save funds");
                        } else {
                            debug!(room_id = %room_id, player = %record.name, funds = record.funds, "Funds saved");
                        }
                    }
                }
            });
        }
    }

    fn publish_summary(&self) {
        let mut summary = self.summary.write();
        summary.players = self.sim.player_count();
        summary.phase = self.sim.phase();
    }
}
