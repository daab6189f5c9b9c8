//! Map Catalog
//!
//! The fixed set of arenas shipped with the binary. Every map has an
//! unbreakable border and empty spawn corners with one free cell on each
//! side, so a player can always drop a first bomb and step away.

use tracing::debug;

use crate::game::tiles::{Tile, TileGrid, TilePos};

/// A named map as shipped: one string of tile codes per row.
#[derive(Debug, Clone, Copy)]
pub struct MapDef {
    pub name: &'static str,
    pub rows: &'static [&'static str],
}

/// Map loading errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No map with that name in the catalog.
    #[error("unknown map {0:?}")]
    UnknownMap(String),

    /// Zero rows or zero columns.
    #[error("map is empty")]
    Empty,

    /// Exceeds the 32x18 playfield.
    #[error("map is {width}x{height}, larger than the playfield")]
    TooLarge { width: usize, height: usize },

    /// Rows of different length.
    #[error("row {row} has {found} cells, expected {expected}")]
    Ragged { row: usize, expected: usize, found: usize },

    /// Cell code outside the tile set.
    #[error("unknown tile code {code} at ({x},{y})")]
    UnknownTile { x: usize, y: usize, code: u8 },

    /// Spawn corner is not walkable.
    #[error("spawn {spawn_id} at {pos} is blocked")]
    BlockedSpawn { spawn_id: u8, pos: TilePos },

    /// Spawn id outside 1..=4.
    #[error("spawn id {0} does not exist")]
    InvalidSpawn(u8),
}

const CLASSIC: &[&str] = &[
    "1111111111111111111",
    "1000222002202022001",
    "1010121212101212101",
    "1222222222200020021",
    "1210101012101012101",
    "1002022022200222021",
    "1212121210101012121",
    "1200202200222020001",
    "1010121012121010121",
    "1222220022220000021",
    "1010121212101212101",
    "1002222022222222001",
    "1111111111111111111",
];

const OPEN_ARENA: &[&str] = &[
    "111111111111111",
    "100220000000001",
    "101010101010101",
    "122000000220201",
    "101012101010101",
    "100000200000001",
    "101010101010101",
    "100200200000001",
    "101010101210101",
    "100000202002001",
    "111111111111111",
];

const TELEPORT_MAZE: &[&str] = &[
    "111111111111111111111",
    "100204220220202020001",
    "101012101012121012101",
    "100020200222020202201",
    "101010101010101210101",
    "100020022002022200251",
    "121012101010101212101",
    "152202202002200000001",
    "121012121010101212101",
    "120020202002200220221",
    "101210121210121010101",
    "100222022202022402001",
    "111111111111111111111",
];

const TRAP_FIELD: &[&str] = &[
    "11111111111111111",
    "10022220002022001",
    "10101010121210101",
    "10020002820002001",
    "10101012101212121",
    "10220800202820221",
    "10121010121212101",
    "10222020800022001",
    "10101010121212101",
    "10022220222022001",
    "11111111111111111",
];

const GRAND_HALL: &[&str] = &[
    "1111111111111111111111111111111",
    "1000000220002224022200202022001",
    "1010101210101012101010101212101",
    "1222020220222020200202022202001",
    "1012121010121010101210121210101",
    "1200222220022002200222022020001",
    "1012121210121210101012121012121",
    "1222000222200200000202200208021",
    "1012101210101012101010121010101",
    "1008020020002000200002220200221",
    "1212121212121212121010121012121",
    "1222022020200020022000002022001",
    "1210101212121210121010101210121",
    "1220222202200202002220202000201",
    "1010121210121210101212121010101",
    "1002000202202204002200220222001",
    "1111111111111111111111111111111",
];

/// Built-in maps, in catalog order.
pub const BUILTIN_MAPS: &[MapDef] = &[
    MapDef { name: "Classic", rows: CLASSIC },
    MapDef { name: "Open Arena", rows: OPEN_ARENA },
    MapDef { name: "Teleport Maze", rows: TELEPORT_MAZE },
    MapDef { name: "Trap Field", rows: TRAP_FIELD },
    MapDef { name: "Grand Hall", rows: GRAND_HALL },
];

impl MapDef {
    /// Parse this map into a fresh grid.
    pub fn load(&self) -> Result<TileGrid, MapError> {
        let rows: Vec<Vec<u8>> = self
            .rows
            .iter()
            .map(|row| {
                row.bytes()
                    .map(|b| b.wrapping_sub(b'0'))
                    .collect()
            })
            .collect();
        let grid = TileGrid::from_rows(&rows)?;
        debug!(map = self.name, width = grid.width(), height = grid.height(), "map loaded");
        Ok(grid)
    }
}

/// Name-indexed map lookup.
#[derive(Debug, Clone)]
pub struct MapCatalog {
    maps: &'static [MapDef],
}

impl MapCatalog {
    /// The maps compiled into the binary.
    pub fn builtin() -> Self {
        Self { maps: BUILTIN_MAPS }
    }

    /// All map names, in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.maps.iter().map(|m| m.name.to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&MapDef> {
        self.maps.iter().find(|m| m.name == name)
    }

    /// Deep copy of the named map's grid.
    pub fn load(&self, name: &str) -> Result<TileGrid, MapError> {
        self.get(name)
            .ok_or_else(|| MapError::UnknownMap(name.to_string()))?
            .load()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl Default for MapCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Corner spawn for `spawn_id` (1 = top-left, 2 = top-right,
/// 3 = bottom-left, 4 = bottom-right).
pub fn spawn_tile(grid: &TileGrid, spawn_id: u8) -> Result<TilePos, MapError> {
    let right = grid.width() as i32 - 2;
    let bottom = grid.height() as i32 - 2;
    let pos = match spawn_id {
        1 => TilePos::new(1, 1),
        2 => TilePos::new(right, 1),
        3 => TilePos::new(1, bottom),
        4 => TilePos::new(right, bottom),
        other => return Err(MapError::InvalidSpawn(other)),
    };

    match grid.get(pos) {
        Some(tile) if !tile.blocks_movement() => Ok(pos),
        _ => Err(MapError::BlockedSpawn { spawn_id, pos }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_GRID_HEIGHT, MAX_GRID_WIDTH};

    #[test]
    fn test_all_builtin_maps_load() {
        let catalog = MapCatalog::builtin();
        assert!(catalog.len() >= 3, "map selection samples three maps");

        for name in catalog.names() {
            let grid = catalog.load(&name).unwrap();
            assert!(grid.width() <= MAX_GRID_WIDTH);
            assert!(grid.height() <= MAX_GRID_HEIGHT);
        }
    }

    #[test]
    fn test_builtin_maps_have_walled_border() {
        for def in BUILTIN_MAPS {
            let grid = def.load().unwrap();
            let (w, h) = (grid.width() as i32, grid.height() as i32);
            for x in 0..w {
                assert_eq!(grid.get(TilePos::new(x, 0)), Some(Tile::Wall), "{}", def.name);
                assert_eq!(grid.get(TilePos::new(x, h - 1)), Some(Tile::Wall), "{}", def.name);
            }
            for y in 0..h {
                assert_eq!(grid.get(TilePos::new(0, y)), Some(Tile::Wall), "{}", def.name);
                assert_eq!(grid.get(TilePos::new(w - 1, y)), Some(Tile::Wall), "{}", def.name);
            }
        }
    }

    #[test]
    fn test_spawns_are_open() {
        for def in BUILTIN_MAPS {
            let grid = def.load().unwrap();
            for spawn_id in 1..=4 {
                let pos = spawn_tile(&grid, spawn_id).unwrap();
                assert_eq!(grid.get(pos), Some(Tile::Empty), "{} spawn {}", def.name, spawn_id);
            }
        }
    }

    #[test]
    fn test_teleports_come_in_pairs() {
        for def in BUILTIN_MAPS {
            let grid = def.load().unwrap();
            for tile in [Tile::TeleportA, Tile::TeleportB] {
                let pads = grid.positions_of(tile);
                assert!(pads.is_empty() || pads.len() == 2, "{} {:?}", def.name, tile);
            }
        }
    }

    #[test]
    fn test_unknown_map() {
        let catalog = MapCatalog::builtin();
        assert_eq!(
            catalog.load("Nowhere"),
            Err(MapError::UnknownMap("Nowhere".to_string()))
        );
    }

    #[test]
    fn test_from_rows_validation() {
        let empty: [&[u8]; 0] = [];
        assert_eq!(TileGrid::from_rows(&empty), Err(MapError::Empty));
        assert!(matches!(
            TileGrid::from_rows(&[&[0u8, 0][..], &[0u8][..]]),
            Err(MapError::Ragged { row: 1, .. })
        ));
        assert!(matches!(
            TileGrid::from_rows(&[&[0u8, 3][..]]),
            Err(MapError::UnknownTile { x: 1, y: 0, code: 3 })
        ));
        let wide = vec![vec![0u8; 33]];
        assert!(matches!(TileGrid::from_rows(&wide), Err(MapError::TooLarge { .. })));
    }

    #[test]
    fn test_spawn_ids() {
        let grid = MapCatalog::builtin().load("Classic").unwrap();
        assert_eq!(spawn_tile(&grid, 1).unwrap(), TilePos::new(1, 1));
        assert_eq!(spawn_tile(&grid, 4).unwrap(), TilePos::new(17, 11));
        assert_eq!(spawn_tile(&grid, 0), Err(MapError::InvalidSpawn(0)));
        assert_eq!(spawn_tile(&grid, 5), Err(MapError::InvalidSpawn(5)));
    }
}
