//! Tile map: generation, walkability, line of sight and spawn sampling

use rand::Rng;

use crate::util::Vec2;

/// A single map cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Empty,
    Wall,
}

/// Immutable width x height tile grid. Tile `(x, y)` covers world space
/// `[x, x+1) x [y, y+1)`.
#[derive(Debug, Clone)]
pub struct TileMap {
    width: usize,
    height: usize,
    tiles: Vec<Tile>,
}

/// Random samples tried before falling back to a linear scan
const SPAWN_SAMPLE_ATTEMPTS: usize = 256;

impl TileMap {
    /// Generate a map with a solid border and random interior walls.
    pub fn generate<R: Rng>(width: usize, height: usize, wall_density: f32, rng: &mut R) -> Self {
        let mut tiles = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
                let tile = if border || rng.gen::<f32>() < wall_density {
                    Tile::Wall
                } else {
                    Tile::Empty
                };
                tiles.push(tile);
            }
        }
        Self {
            width,
            height,
            tiles,
        }
    }

    /// Build a map from text rows, `#` is a wall and anything else is empty.
    #[cfg(test)]
    pub fn from_rows(rows: &[&str]) -> Self {
        let height = rows.len();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut tiles = vec![Tile::Empty; width * height];
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                if ch == '#' {
                    tiles[y * width + x] = Tile::Wall;
                }
            }
        }
        Self {
            width,
            height,
            tiles,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Tile at grid cell, `None` when out of bounds
    pub fn tile(&self, x: i32, y: i32) -> Option<Tile> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(self.tiles[y as usize * self.width + x as usize])
    }

    /// Out-of-bounds cells count as walls
    pub fn is_wall_cell(&self, x: i32, y: i32) -> bool {
        !matches!(self.tile(x, y), Some(Tile::Empty))
    }

    /// Whether the world point lies on an empty tile
    pub fn is_walkable(&self, pos: Vec2) -> bool {
        if pos.x < 0.0 || pos.y < 0.0 {
            return false;
        }
        !self.is_wall_cell(pos.x as i32, pos.y as i32)
    }

    /// Rows of 0 (empty) / 1 (wall) for the client
    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.tiles
            .chunks(self.width.max(1))
            .map(|row| {
                row.iter()
                    .map(|t| match t {
                        Tile::Empty => 0,
                        Tile::Wall => 1,
                    })
                    .collect()
            })
            .collect()
    }

    /// Center of a random empty tile.
    ///
    /// Samples the interior first; if that keeps hitting walls, scans the grid
    /// for the first empty tile. A map with no empty tile yields its center.
    pub fn random_walkable_pos<R: Rng>(&self, rng: &mut R) -> Vec2 {
        if self.width > 2 && self.height > 2 {
            for _ in 0..SPAWN_SAMPLE_ATTEMPTS {
                let x = rng.gen_range(1..self.width - 1);
                let y = rng.gen_range(1..self.height - 1);
                if self.tiles[y * self.width + x] == Tile::Empty {
                    return cell_center(x, y);
                }
            }
        }

        self.tiles
            .iter()
            .position(|t| *t == Tile::Empty)
            .map(|idx| cell_center(idx % self.width, idx / self.width))
            .unwrap_or_else(|| Vec2::new(self.width as f32 / 2.0, self.height as f32 / 2.0))
    }

    /// Nearest empty tile center to `anchor` within a square spiral of `max_radius`.
    pub fn nearest_walkable(&self, anchor: Vec2, max_radius: i32) -> Option<Vec2> {
        let cx = anchor.x.floor() as i32;
        let cy = anchor.y.floor() as i32;
        for r in 0..=max_radius {
            for dy in -r..=r {
                for dx in -r..=r {
                    // Only the ring at distance r; inner rings were already checked
                    if dx.abs() != r && dy.abs() != r {
                        continue;
                    }
                    let (x, y) = (cx + dx, cy + dy);
                    if !self.is_wall_cell(x, y) {
                        return Some(cell_center(x as usize, y as usize));
                    }
                }
            }
        }
        None
    }

    /// Grid ray traversal (Amanatides & Woo) from `from` to `to`.
    ///
    /// Returns false as soon as a wall cell is entered before the target cell.
    /// The starting cell never blocks, and points in the same cell always see
    /// each other.
    pub fn has_line_of_sight(&self, from: Vec2, to: Vec2) -> bool {
        let w = self.width as f32;
        let h = self.height as f32;
        if from.x < 0.0 || from.y < 0.0 || to.x < 0.0 || to.y < 0.0 {
            return false;
        }
        if from.x >= w || to.x >= w || from.y >= h || to.y >= h {
            return false;
        }

        let (start_x, start_y) = (from.x as i32, from.y as i32);
        let (end_x, end_y) = (to.x as i32, to.y as i32);
        if start_x == end_x && start_y == end_y {
            return true;
        }

        let dx = to.x - from.x;
        let dy = to.y - from.y;
        let step_x = if dx > 0.0 { 1 } else if dx < 0.0 { -1 } else { 0 };
        let step_y = if dy > 0.0 { 1 } else if dy < 0.0 { -1 } else { 0 };

        let (mut t_max_x, t_delta_x) = if step_x != 0 {
            let boundary = if step_x > 0 {
                (start_x + 1) as f32
            } else {
                start_x as f32
            };
            ((boundary - from.x).abs() / dx.abs(), 1.0 / dx.abs())
        } else {
            (f32::INFINITY, f32::INFINITY)
        };

        let (mut t_max_y, t_delta_y) = if step_y != 0 {
            let boundary = if step_y > 0 {
                (start_y + 1) as f32
            } else {
                start_y as f32
            };
            ((boundary - from.y).abs() / dy.abs(), 1.0 / dy.abs())
        } else {
            (f32::INFINITY, f32::INFINITY)
        };

        let (mut x, mut y) = (start_x, start_y);
        let max_steps = self.width + self.height + 8;
        for _ in 0..max_steps {
            if t_max_x < t_max_y {
                x += step_x;
                t_max_x += t_delta_x;
            } else {
                y += step_y;
                t_max_y += t_delta_y;
            }

            match self.tile(x, y) {
                None | Some(Tile::Wall) => return false,
                Some(Tile::Empty) => {}
            }
            if x == end_x && y == end_y {
                return true;
            }
        }

        false
    }
}

fn cell_center(x: usize, y: usize) -> Vec2 {
    Vec2::new(x as f32 + 0.5, y as f32 + 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn open_room() -> TileMap {
        TileMap::from_rows(&[
            "##########",
            "#........#",
            "#........#",
            "#........#",
            "##########",
        ])
    }

    #[test]
    fn generated_map_has_solid_border() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let map = TileMap::generate(20, 16, 0.3, &mut rng);
        for x in 0..20 {
            assert!(map.is_wall_cell(x, 0));
            assert!(map.is_wall_cell(x, 15));
        }
        for y in 0..16 {
            assert!(map.is_wall_cell(0, y));
            assert!(map.is_wall_cell(19, y));
        }
    }

    #[test]
    fn walkability_and_bounds() {
        let map = open_room();
        assert!(map.is_walkable(Vec2::new(1.5, 1.5)));
        assert!(!map.is_walkable(Vec2::new(0.5, 1.5)));
        assert!(!map.is_walkable(Vec2::new(-0.5, 1.5)));
        assert!(!map.is_walkable(Vec2::new(12.0, 1.5)));
    }

    #[test]
    fn random_spawn_is_walkable() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let map = TileMap::generate(32, 32, 0.4, &mut rng);
        for _ in 0..100 {
            let pos = map.random_walkable_pos(&mut rng);
            assert!(map.is_walkable(pos));
        }
    }

    #[test]
    fn random_spawn_falls_back_to_scan() {
        let map = TileMap::from_rows(&["#####", "#####", "####.", "#####"]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(map.random_walkable_pos(&mut rng), Vec2::new(4.5, 2.5));
    }

    #[test]
    fn line_of_sight_open_and_blocked() {
        let map = TileMap::from_rows(&[
            "##########",
            "#........#",
            "#...#....#",
            "#........#",
            "##########",
        ]);
        // Clear row
        assert!(map.has_line_of_sight(Vec2::new(1.5, 1.5), Vec2::new(8.5, 1.5)));
        // Wall at (4, 2) sits between the two points on the same row
        assert!(!map.has_line_of_sight(Vec2::new(1.5, 2.5), Vec2::new(8.5, 2.5)));
        assert!(!map.has_line_of_sight(Vec2::new(8.5, 2.5), Vec2::new(1.5, 2.5)));
        // Same cell always passes
        assert!(map.has_line_of_sight(Vec2::new(4.1, 2.1), Vec2::new(4.9, 2.9)));
    }

    #[test]
    fn line_of_sight_diagonal() {
        let map = open_room();
        assert!(map.has_line_of_sight(Vec2::new(1.5, 1.5), Vec2::new(8.5, 3.5)));
        assert!(!map.has_line_of_sight(Vec2::new(1.5, 1.5), Vec2::new(1.5, -3.0)));
    }

    #[test]
    fn nearest_walkable_spirals_out() {
        let map = TileMap::from_rows(&["#####", "#####", "##.##", "#####"]);
        assert_eq!(
            map.nearest_walkable(Vec2::new(1.2, 1.2), 3),
            Some(Vec2::new(2.5, 2.5))
        );
        assert_eq!(map.nearest_walkable(Vec2::new(0.0, 0.0), 1), None);
    }
}
