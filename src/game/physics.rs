//! Circle-vs-tile movement resolution

use crate::util::Vec2;

use super::map::TileMap;

/// Physics system for moving player circles through the tile map
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Resolve a desired displacement with axis sliding.
    ///
    /// Tries the full move, then X only, then Y only; stays put if all three
    /// collide.
    pub fn resolve_movement(map: &TileMap, pos: Vec2, delta: Vec2, radius: f32) -> Vec2 {
        let full = pos + delta;
        if !Self::collides(map, full, radius) {
            return full;
        }

        let x_only = Vec2::new(pos.x + delta.x, pos.y);
        if delta.x != 0.0 && !Self::collides(map, x_only, radius) {
            return x_only;
        }

        let y_only = Vec2::new(pos.x, pos.y + delta.y);
        if delta.y != 0.0 && !Self::collides(map, y_only, radius) {
            return y_only;
        }

        pos
    }

    /// Whether a circle at `pos` overlaps a wall tile or leaves the map
    pub fn collides(map: &TileMap, pos: Vec2, radius: f32) -> bool {
        let w = map.width() as f32;
        let h = map.height() as f32;
        if pos.x < radius || pos.x > w - radius || pos.y < radius || pos.y > h - radius {
            return true;
        }

        let min_x = (pos.x - radius).floor() as i32;
        let max_x = (pos.x + radius).floor() as i32;
        let min_y = (pos.y - radius).floor() as i32;
        let max_y = (pos.y + radius).floor() as i32;

        for ty in min_y..=max_y {
            for tx in min_x..=max_x {
                if map.is_wall_cell(tx, ty) && Self::circle_overlaps_tile(pos, radius, tx, ty) {
                    return true;
                }
            }
        }
        false
    }

    /// Circle vs unit AABB at tile `(tx, ty)` via the closest point on the box
    pub fn circle_overlaps_tile(center: Vec2, radius: f32, tx: i32, ty: i32) -> bool {
        let closest_x = center.x.clamp(tx as f32, (tx + 1) as f32);
        let closest_y = center.y.clamp(ty as f32, (ty + 1) as f32);
        let dx = center.x - closest_x;
        let dy = center.y - closest_y;
        dx * dx + dy * dy < radius * radius
    }
}
