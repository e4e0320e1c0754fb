//! Item catalog - immutable reference data shared by every room

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::game::ItemOverride;
use crate::ws::protocol::Tactic;

/// Loot category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCategory {
    Offense,
    Survival,
    Recon,
    Scavenge,
}

impl ItemCategory {
    /// Categories a tactic can focus on (everything except Scavenge)
    pub const COMBAT: [ItemCategory; 3] = [
        ItemCategory::Offense,
        ItemCategory::Survival,
        ItemCategory::Recon,
    ];

    /// Category whose drops are boosted for a tactic
    pub fn focus_for(tactic: Tactic) -> ItemCategory {
        match tactic {
            Tactic::Recon => ItemCategory::Recon,
            Tactic::Defense => ItemCategory::Survival,
            Tactic::Trap => ItemCategory::Offense,
        }
    }
}

/// What happens when an item is used
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemEffect {
    /// Hit the nearest enemy within `range`
    Damage { range: f32, amount: f32 },
    Heal { amount: f32 },
    SpeedBoost { mult: f32, secs: f32 },
    Silence { secs: f32 },
    Jamming { secs: f32 },
    DamageReduction { fraction: f32, secs: f32 },
    HearBoost { bonus: f32, secs: f32 },
    ViewBoost { bonus: f32, secs: f32 },
    Backpack { slots: usize, weight: f32, secs: f32 },
    Funds { amount: u32 },
    /// Advance a nearby motor by a fraction of its max progress
    MotorBoost { fraction: f32 },
}

/// Catalog entry
#[derive(Debug, Clone, Serialize)]
pub struct ItemDef {
    pub id: String,
    pub category: ItemCategory,
    pub name: String,
    pub tier: u8,
    pub max_uses: u8,
    pub weight: f32,
    pub value: u32,
    #[serde(skip)]
    pub effect: ItemEffect,
}

impl ItemDef {
    /// Cash value when sold or extracted; items without a value fall back to 50 per tier
    pub fn cash_value(&self) -> u32 {
        if self.value > 0 {
            self.value
        } else {
            50 * self.tier as u32
        }
    }
}

/// An item instance in an inventory, drop or shop
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub uid: Uuid,
    #[serde(flatten)]
    pub def: ItemDef,
}

impl Item {
    pub fn new(uid: Uuid, def: &ItemDef) -> Self {
        Self {
            uid,
            def: def.clone(),
        }
    }
}

/// Read-only set of item definitions
#[derive(Debug, Clone)]
pub struct ItemCatalog {
    items: Vec<ItemDef>,
}

fn def(
    id: &str,
    category: ItemCategory,
    name: &str,
    tier: u8,
    weight: f32,
    value: u32,
    effect: ItemEffect,
) -> ItemDef {
    ItemDef {
        id: id.to_string(),
        category,
        name: name.to_string(),
        tier,
        max_uses: 1,
        weight,
        value,
        effect,
    }
}

impl ItemCatalog {
    /// Built-in catalog
    pub fn builtin() -> Self {
        use ItemCategory::*;
        use ItemEffect::*;

        let items = vec![
            // Offense
            def("WPN_STONE", Offense, "Throwing Stone", 1, 0.5, 20, Damage { range: 5.0, amount: 5.0 }),
            def("WPN_SHOCK_T1", Offense, "Improvised Stunner", 1, 1.0, 60, Damage { range: 3.0, amount: 15.0 }),
            def("WPN_KNIFE_T2", Offense, "Tactical Throwing Knife", 2, 1.0, 120, Damage { range: 6.0, amount: 30.0 }),
            def("WPN_TRACK_DART", Offense, "Tracking Dart", 2, 0.5, 140, Damage { range: 6.0, amount: 20.0 }),
            def("WPN_STUN_GRENADE", Offense, "Stun Grenade", 2, 1.5, 150, Damage { range: 5.0, amount: 25.0 }),
            def("WPN_EMP_MINE", Offense, "EMP Mine", 3, 2.0, 260, Damage { range: 8.0, amount: 45.0 }),
            // Survival
            def("SURV_BANDAGE", Survival, "First Aid Bandage", 1, 0.5, 40, Heal { amount: 30.0 }),
            def("SURV_ENERGY_BAR", Survival, "Energy Bar", 1, 0.3, 30, Heal { amount: 12.0 }),
            def("SURV_ADRENALINE", Survival, "Adrenaline Shot", 2, 0.5, 110, SpeedBoost { mult: 1.5, secs: 8.0 }),
            def("SURV_SILENT_PAD", Survival, "Silent Insoles", 2, 0.5, 120, Silence { secs: 20.0 }),
            def("SURV_JAMMER", Survival, "Portable Jammer", 2, 1.0, 150, Jamming { secs: 12.0 }),
            def("SURV_ARMOR_LIGHT", Survival, "Kevlar Lining", 3, 2.5, 240, DamageReduction { fraction: 0.35, secs: 20.0 }),
            // Recon
            def("RECON_AMP_T1", Recon, "Audio Amplifier", 1, 0.5, 50, HearBoost { bonus: 6.0, secs: 20.0 }),
            def("RECON_FLASHLIGHT", Recon, "Directional Flashlight", 1, 1.0, 60, ViewBoost { bonus: 3.0, secs: 15.0 }),
            def("RECON_HEARTBEAT", Recon, "Heartbeat Sensor", 2, 1.0, 130, ViewBoost { bonus: 4.0, secs: 20.0 }),
            def("RECON_DRONE_TAG", Recon, "Drone Beacon", 2, 1.5, 140, ViewBoost { bonus: 5.0, secs: 15.0 }),
            def("RECON_GLOBAL_SCAN", Recon, "Global Scan Terminal", 3, 3.0, 280, ViewBoost { bonus: 8.0, secs: 10.0 }),
            def("RECON_XRAY", Recon, "X-Ray Goggles", 3, 1.0, 260, ViewBoost { bonus: 6.0, secs: 12.0 }),
            // Scavenge
            def("SCAV_DETECTOR", Scavenge, "Metal Detector", 1, 1.0, 50, Funds { amount: 40 }),
            def("SCAV_BACKPACK_M", Scavenge, "Large Backpack", 2, 1.0, 100, Backpack { slots: 2, weight: 3.0, secs: 30.0 }),
            def("SCAV_DECODER", Scavenge, "Motor Decoder Card", 2, 0.5, 120, MotorBoost { fraction: 0.25 }),
            def("SCAV_MASTER_KEY", Scavenge, "Master Key", 3, 0.5, 200, Funds { amount: 120 }),
        ];

        Self { items }
    }

    #[cfg(test)]
    pub fn from_defs(items: Vec<ItemDef>) -> Self {
        Self { items }
    }

    /// Apply value/weight overrides from an external table; unknown ids are ignored
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ItemOverride>) -> Self {
        for item in &mut self.items {
            if let Some(o) = overrides.get(&item.id) {
                if let Some(value) = o.value {
                    item.value = value;
                }
                if let Some(weight) = o.weight {
                    if weight.is_finite() && weight >= 0.0 {
                        item.weight = weight;
                    }
                }
            }
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<&ItemDef> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn all(&self) -> &[ItemDef] {
        &self.items
    }

    /// Items of a category with exactly this tier
    pub fn matching(&self, category: ItemCategory, tier: u8) -> Vec<&ItemDef> {
        self.items
            .iter()
            .filter(|i| i.category == category && i.tier == tier)
            .collect()
    }

    /// Items of a category at or below this tier
    pub fn at_most(&self, category: ItemCategory, tier: u8) -> Vec<&ItemDef> {
        self.items
            .iter()
            .filter(|i| i.category == category && i.tier <= tier)
            .collect()
    }
}

impl Default for ItemCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_category_at_tier_one() {
        let catalog = ItemCatalog::builtin();
        for cat in [
            ItemCategory::Offense,
            ItemCategory::Survival,
            ItemCategory::Recon,
            ItemCategory::Scavenge,
        ] {
            assert!(!catalog.matching(cat, 1).is_empty(), "{cat:?} has no tier 1");
        }
        assert!(catalog.all().iter().all(|i| (1..=3).contains(&i.tier)));
    }

    #[test]
    fn overrides_replace_value_and_weight() {
        let mut table = BTreeMap::new();
        table.insert(
            "SURV_BANDAGE".to_string(),
            ItemOverride {
                value: Some(999),
                weight: Some(2.0),
            },
        );
        table.insert("NOT_AN_ITEM".to_string(), ItemOverride::default());

        let catalog = ItemCatalog::builtin().with_overrides(&table);
        let bandage = catalog.get("SURV_BANDAGE").unwrap();
        assert_eq!(bandage.value, 999);
        assert_eq!(bandage.weight, 2.0);
    }

    #[test]
    fn cash_value_falls_back_by_tier() {
        let mut item = ItemCatalog::builtin().get("SCAV_MASTER_KEY").unwrap().clone();
        item.value = 0;
        assert_eq!(item.cash_value(), 150);
    }
}
