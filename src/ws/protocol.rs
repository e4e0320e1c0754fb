//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::game::items::Item;
use crate::game::phase::Phase;
use crate::util::Vec2;

/// Pre-match role choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tactic {
    /// Wider senses, better recon items
    Recon,
    /// Tanky, stronger heals
    Defense,
    /// Harder hits, offense loot
    Trap,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Create a room; `config` is a partial game config overlay
    CreateRoom {
        name: String,
        #[serde(default)]
        config: Option<Value>,
    },

    /// Join a room, optionally resuming an earlier session
    JoinRoom {
        room_id: Uuid,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        resume_session: Option<Uuid>,
    },

    ListRooms,

    LeaveRoom,

    SetName {
        name: String,
    },

    /// Movement intent; zero `dir` stops
    Move {
        dir: Vec2,
        #[serde(default)]
        look_dir: Option<Vec2>,
    },

    UseItem {
        slot_index: usize,
    },

    Interact,

    Pickup,

    Drop {
        slot_index: usize,
    },

    Sell {
        slot_index: usize,
    },

    Buy {
        item_id: String,
    },

    RefreshShop,

    ChooseTactic {
        tactic: Tactic,
    },

    /// Debug: end the current phase countdown
    DevSkipPhase,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        session_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of room join
    RoomJoined {
        room_id: Uuid,
        room_name: String,
        session_id: Uuid,
        /// True when an existing player was resumed
        resumed: bool,
    },

    RoomList {
        rooms: Vec<RoomSummary>,
    },

    /// Map layout, sent when the match leaves Init (or on late join)
    MatchStarted {
        width: usize,
        height: usize,
        /// Row-major, 0 = empty, 1 = wall
        tiles: Vec<Vec<u8>>,
        spawn: Vec2,
    },

    /// Per-player view of the world (sent every tick)
    Snapshot(Box<GameSnapshot>),

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Room listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: Uuid,
    pub name: String,
    pub players: usize,
    pub max_players: usize,
    pub phase: Phase,
    pub map_width: usize,
    pub map_height: usize,
}

/// Full snapshot for one observer
#[derive(Debug, Clone, Serialize)]
pub struct GameSnapshot {
    pub tick: u64,
    pub phase: Phase,
    /// Seconds left in the current phase (0 in Init/Ended)
    pub time_left: f32,
    pub events: Vec<GameEvent>,
    #[serde(rename = "self")]
    pub me: SelfState,
    pub players: Vec<VisiblePlayer>,
    pub entities: Vec<EntityView>,
    pub radar_blips: Vec<RadarBlip>,
    pub sounds: Vec<SoundEvent>,
}

/// The observer's own state, unfiltered
#[derive(Debug, Clone, Serialize)]
pub struct SelfState {
    pub session_id: Uuid,
    pub name: Option<String>,
    pub pos: Vec2,
    pub facing: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub move_speed: f32,
    pub view_radius: f32,
    pub hear_radius: f32,
    pub weight: f32,
    pub max_weight: f32,
    pub inventory: Vec<Item>,
    pub inventory_cap: usize,
    pub funds: u32,
    pub alive: bool,
    pub extracted: bool,
    pub tactic: Option<Tactic>,
    pub channel: Option<ChannelView>,
    pub buffs: Vec<BuffView>,
    pub shop_stock: Vec<ShopOffer>,
    pub free_refresh: bool,
}

/// What the player is currently channeling
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelView {
    Repair { target: Uuid },
    Extract { target: Uuid, remaining: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuffKind {
    Speed,
    View,
    Hear,
    InventoryCap,
    MaxWeight,
    DamageReduction,
    Silence,
    Jamming,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuffView {
    pub kind: BuffKind,
    pub magnitude: f32,
    pub remaining: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShopOffer {
    pub item_id: String,
    pub name: String,
    pub tier: u8,
    pub price: u32,
}

/// Another player inside the observer's sight
#[derive(Debug, Clone, Serialize)]
pub struct VisiblePlayer {
    pub id: Uuid,
    pub name: Option<String>,
    pub pos: Vec2,
    pub facing: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityTag {
    ItemDrop,
    Motor,
    Exit,
    SupplyDrop,
    Merchant,
}

/// A visible world entity
#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub id: Uuid,
    pub kind: EntityTag,
    pub pos: Vec2,
    pub state: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RadarBlip {
    pub id: Uuid,
    pub kind: EntityTag,
    pub pos: Vec2,
}

/// Directional sound heard by the observer
#[derive(Debug, Clone, Serialize)]
pub struct SoundEvent {
    /// Unit vector from observer toward the (apparent) source
    pub dir: Vec2,
    /// 0..=1
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PhaseChange,
    MotorPulse,
    MotorFixed,
    ExitOpened,
    Extraction,
    SupplyClaimed,
    PlayerDown,
    PlayerLeft,
    MatchEnd,
    Dev,
}

/// Broadcast event in the rolling log
#[derive(Debug, Clone, Serialize)]
pub struct GameEvent {
    pub kind: EventKind,
    pub message: String,
    /// Simulation clock when it happened
    pub at: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_client_messages() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"move","dir":{"x":1.0,"y":0.0}}"#).unwrap();
        match msg {
            ClientMsg::Move { dir, look_dir } => {
                assert_eq!(dir, Vec2::new(1.0, 0.0));
                assert!(look_dir.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"choose_tactic","tactic":"RECON"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::ChooseTactic { tactic: Tactic::Recon }));
    }

    #[test]
    fn unknown_tactic_is_rejected() {
        let res = serde_json::from_str::<ClientMsg>(r#"{"type":"choose_tactic","tactic":"SNIPER"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn server_error_serializes_with_tag() {
        let json = serde_json::to_value(ServerMsg::error("room_full", "Room is full")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "room_full");
    }
}
