//! Game simulation modules

pub mod entity;
pub mod items;
pub mod loot;
pub mod map;
pub mod phase;
pub mod physics;
pub mod player;
pub mod room;
pub mod sim;
pub mod snapshot;
pub mod stats;
pub mod visibility;

pub use items::ItemCatalog;
pub use room::{RoomError, RoomHandle, RoomInput, RoomRegistry};
pub use sim::{JoinOutcome, PlayerCommand};

use crate::ws::protocol::ClientMsg;

impl PlayerCommand {
    /// In-room command for a client message; lobby messages map to `None`
    pub fn from_client(msg: ClientMsg) -> Option<Self> {
        let command = match msg {
            ClientMsg::SetName { name } => Self::SetName(name),
            ClientMsg::Move { dir, look_dir } => Self::Move { dir, look_dir },
            ClientMsg::UseItem { slot_index } => Self::UseItem { slot: slot_index },
            ClientMsg::Interact => Self::Interact,
            ClientMsg::Pickup => Self::Pickup,
            ClientMsg::Drop { slot_index } => Self::Drop { slot: slot_index },
            ClientMsg::Sell { slot_index } => Self::Sell { slot: slot_index },
            ClientMsg::Buy { item_id } => Self::Buy { item_id },
            ClientMsg::RefreshShop => Self::RefreshShop,
            ClientMsg::ChooseTactic { tactic } => Self::ChooseTactic(tactic),
            ClientMsg::DevSkipPhase => Self::DevSkipPhase,
            ClientMsg::CreateRoom { .. }
            | ClientMsg::JoinRoom { .. }
            | ClientMsg::ListRooms
            | ClientMsg::LeaveRoom
            | ClientMsg::Ping { .. } => return None,
        };
        Some(command)
    }
}
