//! World entities as a tagged sum type

use uuid::Uuid;

use crate::util::Vec2;
use crate::ws::protocol::{EntityTag, EntityView};

use super::items::Item;

pub const MOTOR_MAX_PROGRESS: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Inactive,
    Active,
    Fixed,
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    ItemDrop {
        item: Item,
    },
    Motor {
        state: MotorState,
        progress: f32,
        max_progress: f32,
    },
    Exit {
        open: bool,
    },
    SupplyDrop {
        funds: u32,
        items: Vec<Item>,
    },
    Merchant,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: Uuid,
    pub pos: Vec2,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(id: Uuid, pos: Vec2, kind: EntityKind) -> Self {
        Self { id, pos, kind }
    }

    pub fn motor(id: Uuid, pos: Vec2) -> Self {
        Self::new(
            id,
            pos,
            EntityKind::Motor {
                state: MotorState::Inactive,
                progress: 0.0,
                max_progress: MOTOR_MAX_PROGRESS,
            },
        )
    }

    pub fn tag(&self) -> EntityTag {
        match self.kind {
            EntityKind::ItemDrop { .. } => EntityTag::ItemDrop,
            EntityKind::Motor { .. } => EntityTag::Motor,
            EntityKind::Exit { .. } => EntityTag::Exit,
            EntityKind::SupplyDrop { .. } => EntityTag::SupplyDrop,
            EntityKind::Merchant => EntityTag::Merchant,
        }
    }

    /// Small integer state: motor 0/1/2 (inactive/active/fixed), exit 1 when open
    pub fn state(&self) -> u8 {
        match &self.kind {
            EntityKind::Motor { state, .. } => match state {
                MotorState::Inactive => 0,
                MotorState::Active => 1,
                MotorState::Fixed => 2,
            },
            EntityKind::Exit { open } => u8::from(*open),
            _ => 0,
        }
    }

    /// Whether a player can channel on this entity
    pub fn is_interactable(&self) -> bool {
        match &self.kind {
            EntityKind::Motor { state, .. } => *state != MotorState::Fixed,
            EntityKind::Exit { open } => *open,
            _ => false,
        }
    }

    pub fn is_pickup(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::ItemDrop { .. } | EntityKind::SupplyDrop { .. }
        )
    }

    pub fn view(&self) -> EntityView {
        let mut view = EntityView {
            id: self.id,
            kind: self.tag(),
            pos: self.pos,
            state: self.state(),
            item: None,
            progress: None,
            max_progress: None,
            funds: None,
            item_count: None,
        };
        match &self.kind {
            EntityKind::ItemDrop { item } => view.item = Some(item.clone()),
            EntityKind::Motor {
                progress,
                max_progress,
                ..
            } => {
                view.progress = Some(*progress);
                view.max_progress = Some(*max_progress);
            }
            EntityKind::SupplyDrop { funds, items } => {
                view.funds = Some(*funds);
                view.item_count = Some(items.len());
            }
            EntityKind::Exit { .. } | EntityKind::Merchant => {}
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motor_state_codes() {
        let mut motor = Entity::motor(Uuid::nil(), Vec2::ZERO);
        assert_eq!(motor.state(), 0);
        assert!(motor.is_interactable());

        if let EntityKind::Motor { state, .. } = &mut motor.kind {
            *state = MotorState::Fixed;
        }
        assert_eq!(motor.state(), 2);
        assert!(!motor.is_interactable());
    }

    #[test]
    fn exit_is_interactable_only_when_open() {
        let closed = Entity::new(Uuid::nil(), Vec2::ZERO, EntityKind::Exit { open: false });
        let open = Entity::new(Uuid::nil(), Vec2::ZERO, EntityKind::Exit { open: true });
        assert!(!closed.is_interactable());
        assert!(open.is_interactable());
        assert_eq!(open.state(), 1);
    }
}
