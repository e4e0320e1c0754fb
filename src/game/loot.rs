//! Weighted loot generation: world items, supply drops and shop stock

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::config::game::ItemsSection;
use crate::ws::protocol::Tactic;

use super::items::{Item, ItemCatalog, ItemCategory, ItemDef};

/// Draw attempts per shop slot before backfilling
const SHOP_ATTEMPTS_PER_SLOT: usize = 8;

/// Identifier drawn from the room RNG so seeded rooms stay reproducible
pub fn random_id<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid()
}

/// Loot roller bound to a catalog and the room's item tunables
pub struct Loot<'a> {
    catalog: &'a ItemCatalog,
    cfg: &'a ItemsSection,
}

impl<'a> Loot<'a> {
    pub fn new(catalog: &'a ItemCatalog, cfg: &'a ItemsSection) -> Self {
        Self { catalog, cfg }
    }

    /// Stage one: category.
    ///
    /// Scavenge takes its per-phase share first. The rest goes to the tactic's
    /// focus category (`tactic_focus_share` of it) and the other two split the
    /// remainder; with no tactic the three combat categories split evenly.
    pub fn roll_category<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        phase: u8,
        tactic: Option<Tactic>,
    ) -> ItemCategory {
        let scavenge = self.cfg.scavenge_share_by_phase.get(phase);
        let roll: f32 = rng.gen();
        if roll < scavenge {
            return ItemCategory::Scavenge;
        }

        let rest = 1.0 - scavenge;
        let weights = match tactic {
            Some(tactic) => {
                let focus = ItemCategory::focus_for(tactic);
                let focus_share = rest * self.cfg.tactic_focus_share.clamp(0.34, 0.80);
                let other_share = (rest - focus_share) / 2.0;
                ItemCategory::COMBAT.map(|c| (c, if c == focus { focus_share } else { other_share }))
            }
            None => ItemCategory::COMBAT.map(|c| (c, rest / 3.0)),
        };

        let mut acc = scavenge;
        for (category, weight) in weights {
            acc += weight;
            if roll < acc {
                return category;
            }
        }
        // Float drift at the top of the range
        weights[2].0
    }

    /// Stage two: tier from the phase weights, never above `max_tier`
    pub fn roll_tier<R: Rng + ?Sized>(&self, rng: &mut R, phase: u8, max_tier: u8) -> u8 {
        let weights = self.cfg.tier_weights_by_phase.get(phase).as_array();
        let allowed = (max_tier.clamp(1, 3)) as usize;
        let total: f32 = weights[..allowed].iter().sum();
        if total <= 0.0 {
            return 1;
        }

        let mut roll = rng.gen::<f32>() * total;
        for (i, w) in weights[..allowed].iter().enumerate() {
            if roll < *w {
                return i as u8 + 1;
            }
            roll -= w;
        }
        allowed as u8
    }

    /// Stage three: a uniform pick matching category and tier.
    ///
    /// Falls back to the category at or below the tier, then the whole
    /// category, then anything in the catalog.
    pub fn pick_def<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        category: ItemCategory,
        tier: u8,
    ) -> Option<&'a ItemDef> {
        let exact = self.catalog.matching(category, tier);
        if let Some(def) = exact.choose(rng) {
            return Some(*def);
        }
        let lower = self.catalog.at_most(category, tier);
        if let Some(def) = lower.choose(rng) {
            return Some(*def);
        }
        let any_tier = self.catalog.at_most(category, u8::MAX);
        if let Some(def) = any_tier.choose(rng) {
            return Some(*def);
        }
        self.catalog.all().choose(rng)
    }

    /// A fresh world item for the given loot phase
    pub fn roll_item<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        phase: u8,
        tactic: Option<Tactic>,
    ) -> Option<Item> {
        let category = self.roll_category(rng, phase, tactic);
        let tier = self.roll_tier(rng, phase, 3);
        let def = self.pick_def(rng, category, tier)?;
        Some(Item::new(random_id(rng), def))
    }

    /// Supply drop contents: 1-3 items capped at tier `phase + 1`, plus a
    /// lump of funds scaled by that cap.
    pub fn supply_drop<R: Rng + ?Sized>(&self, rng: &mut R, phase: u8) -> (u32, Vec<Item>) {
        let tier_cap = (phase + 1).min(3);
        let count = rng.gen_range(1..=3);
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let category = self.roll_category(rng, phase, None);
            let tier = self.roll_tier(rng, phase, tier_cap);
            if let Some(def) = self.pick_def(rng, category, tier) {
                items.push(Item::new(random_id(rng), def));
            }
        }
        let funds = 50 * tier_cap as u32 + rng.gen_range(0..=25);
        (funds, items)
    }

    /// Deduplicated list of catalog ids for a player's merchant stock
    pub fn shop_stock<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        phase: u8,
        tactic: Option<Tactic>,
    ) -> Vec<String> {
        let size = self.cfg.merchant_stock_size.min(self.catalog.all().len());
        let mut stock: Vec<String> = Vec::with_capacity(size);

        for _ in 0..size * SHOP_ATTEMPTS_PER_SLOT {
            if stock.len() >= size {
                break;
            }
            let category = self.roll_category(rng, phase, tactic);
            let tier = self.roll_tier(rng, phase, 3);
            if let Some(def) = self.pick_def(rng, category, tier) {
                if !stock.contains(&def.id) {
                    stock.push(def.id.clone());
                }
            }
        }

        if stock.len() < size {
            let mut rest: Vec<&ItemDef> = self
                .catalog
                .all()
                .iter()
                .filter(|d| !stock.contains(&d.id))
                .collect();
            rest.shuffle(rng);
            stock.extend(rest.into_iter().take(size - stock.len()).map(|d| d.id.clone()));
        }

        stock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::items::ItemEffect;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const DRAWS: usize = 10_000;

    #[test]
    fn phase_one_tiers_match_weights() {
        let catalog = ItemCatalog::builtin();
        let cfg = ItemsSection::default();
        let loot = Loot::new(&catalog, &cfg);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let mut counts = [0usize; 3];
        for _ in 0..DRAWS {
            let tier = loot.roll_tier(&mut rng, 1, 3);
            counts[tier as usize - 1] += 1;
        }

        let expected = [0.70, 0.25, 0.05];
        for (count, want) in counts.iter().zip(expected) {
            let got = *count as f32 / DRAWS as f32;
            assert!((got - want).abs() < 0.02, "got {got}, want {want}");
        }
    }

    #[test]
    fn tactic_focus_gets_its_share() {
        let catalog = ItemCatalog::builtin();
        let mut cfg = ItemsSection::default();
        cfg.tactic_focus_share = 0.8;
        let loot = Loot::new(&catalog, &cfg);
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let mut recon = 0;
        let mut scavenge = 0;
        for _ in 0..DRAWS {
            match loot.roll_category(&mut rng, 1, Some(Tactic::Recon)) {
                ItemCategory::Recon => recon += 1,
                ItemCategory::Scavenge => scavenge += 1,
                _ => {}
            }
        }
        // scavenge 0.25, recon 0.75 * 0.8 = 0.6
        assert!((recon as f32 / DRAWS as f32 - 0.60).abs() < 0.03);
        assert!((scavenge as f32 / DRAWS as f32 - 0.25).abs() < 0.03);
    }

    #[test]
    fn missing_tier_falls_back_to_lower() {
        let mut defs: Vec<ItemDef> = ItemCatalog::builtin()
            .all()
            .iter()
            .filter(|d| d.category != ItemCategory::Offense)
            .cloned()
            .collect();
        let mut stone = ItemCatalog::builtin().get("WPN_STONE").unwrap().clone();
        stone.effect = ItemEffect::Damage {
            range: 1.0,
            amount: 1.0,
        };
        defs.push(stone);
        let catalog = ItemCatalog::from_defs(defs);
        let cfg = ItemsSection::default();
        let loot = Loot::new(&catalog, &cfg);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let def = loot.pick_def(&mut rng, ItemCategory::Offense, 3).unwrap();
        assert_eq!(def.id, "WPN_STONE");
    }

    #[test]
    fn supply_drops_respect_tier_cap() {
        let catalog = ItemCatalog::builtin();
        let cfg = ItemsSection::default();
        let loot = Loot::new(&catalog, &cfg);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for _ in 0..200 {
            let (funds, items) = loot.supply_drop(&mut rng, 1);
            assert!((100..=125).contains(&funds));
            assert!((1..=3).contains(&items.len()));
            assert!(items.iter().all(|i| i.def.tier <= 2));
        }
    }

    #[test]
    fn shop_stock_is_unique_and_full() {
        let catalog = ItemCatalog::builtin();
        let mut cfg = ItemsSection::default();
        cfg.merchant_stock_size = 6;
        let loot = Loot::new(&catalog, &cfg);
        let mut rng = ChaCha8Rng::seed_from_u64(77);

        let stock = loot.shop_stock(&mut rng, 3, Some(Tactic::Trap));
        assert_eq!(stock.len(), 6);
        let mut dedup = stock.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 6);
    }
}
