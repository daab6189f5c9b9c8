//! Tile Grid
//!
//! Cell codes, tile coordinates and the mutable grid the bomb engine writes
//! to. Pixel coordinates are always `tile × GRID_SIZE`.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::game::input::Direction;
use crate::game::maps::MapError;
use crate::{GRID_SIZE, MAX_GRID_HEIGHT, MAX_GRID_WIDTH};

// =============================================================================
// TILE CODES
// =============================================================================

/// A single map cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tile {
    /// Walkable floor.
    Empty = 0,
    /// Permanent wall, stops explosions.
    Wall = 1,
    /// Breakable brick, may hide a power-up.
    Brick = 2,
    /// Teleport pad paired with the other `4` cell.
    TeleportA = 4,
    /// Teleport pad paired with the other `5` cell.
    TeleportB = 5,
    /// Damages whoever stands on it.
    Trap = 8,
}

impl Tile {
    /// Decode a map code.
    pub fn from_code(code: u8) -> Option<Tile> {
        match code {
            0 => Some(Tile::Empty),
            1 => Some(Tile::Wall),
            2 => Some(Tile::Brick),
            4 => Some(Tile::TeleportA),
            5 => Some(Tile::TeleportB),
            8 => Some(Tile::Trap),
            _ => None,
        }
    }

    /// Map code of this tile.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Walls and bricks can never be entered.
    #[inline]
    pub fn blocks_movement(self) -> bool {
        matches!(self, Tile::Wall | Tile::Brick)
    }

    #[inline]
    pub fn is_teleport(self) -> bool {
        matches!(self, Tile::TeleportA | Tile::TeleportB)
    }
}

// =============================================================================
// COORDINATES
// =============================================================================

/// Grid coordinate (column, row).
///
/// Ordered row-major so BTreeMaps keyed by position iterate the way the
/// grid is laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Neighbour `distance` cells away in `dir`.
    pub fn offset(self, dir: Direction, distance: i32) -> TilePos {
        let (dx, dy) = dir.delta();
        TilePos::new(self.x + dx * distance, self.y + dy * distance)
    }

    /// Top-left pixel of this cell.
    pub fn to_pixels(self) -> (i32, i32) {
        (self.x * GRID_SIZE, self.y * GRID_SIZE)
    }

    /// Convert grid-aligned pixels back to a tile.
    ///
    /// Returns `None` for coordinates that are not multiples of `GRID_SIZE`.
    pub fn from_pixels(px: i32, py: i32) -> Option<TilePos> {
        if px % GRID_SIZE != 0 || py % GRID_SIZE != 0 {
            return None;
        }
        Some(TilePos::new(px / GRID_SIZE, py / GRID_SIZE))
    }

    /// Pixel rectangle covered by this cell.
    pub fn rect(self) -> Rect {
        let (x, y) = self.to_pixels();
        Rect::new(x, y, GRID_SIZE, GRID_SIZE)
    }
}

impl Ord for TilePos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for TilePos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Wire form is `"x,y"`.
impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Error parsing a `"x,y"` position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tile position {0:?}")]
pub struct ParseTilePosError(pub String);

impl FromStr for TilePos {
    type Err = ParseTilePosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTilePosError(s.to_string());
        let (x, y) = s.split_once(',').ok_or_else(err)?;
        let x = x.trim().parse::<i32>().map_err(|_| err())?;
        let y = y.trim().parse::<i32>().map_err(|_| err())?;
        Ok(TilePos::new(x, y))
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Strict overlap; rectangles that only share an edge do not collide.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

// =============================================================================
// GRID
// =============================================================================

/// The match's tile map.
///
/// Only the bomb engine mutates it (`destroy_brick`), and only `2 → 0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    cells: Vec<Tile>,
}

impl TileGrid {
    /// Build a grid from row-major cells.
    ///
    /// Caller guarantees `cells.len() == width * height`; the map loader is
    /// the only public path in and validates that.
    pub(crate) fn from_cells(width: u32, height: u32, cells: Vec<Tile>) -> Self {
        debug_assert_eq!(cells.len(), (width * height) as usize);
        Self { width, height, cells }
    }

    /// Build a grid from rows of tile codes.
    ///
    /// Rows must be non-empty, equally long, within the field size, and use
    /// only known codes.
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self, MapError> {
        let height = rows.len();
        let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(MapError::Empty);
        }
        if width > MAX_GRID_WIDTH as usize || height > MAX_GRID_HEIGHT as usize {
            return Err(MapError::TooLarge { width, height });
        }

        let mut cells = Vec::with_capacity(width * height);
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != width {
                return Err(MapError::Ragged { row: y, expected: width, found: row.len() });
            }
            for (x, code) in row.iter().enumerate() {
                let tile = Tile::from_code(*code)
                    .ok_or(MapError::UnknownTile { x, y, code: *code })?;
                cells.push(tile);
            }
        }

        Ok(Self::from_cells(width as u32, height as u32, cells))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major cells.
    pub fn cells(&self) -> &[Tile] {
        &self.cells
    }

    #[inline]
    pub fn in_bounds(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    #[inline]
    fn index(&self, pos: TilePos) -> Option<usize> {
        if self.in_bounds(pos) {
            Some(pos.y as usize * self.width as usize + pos.x as usize)
        } else {
            None
        }
    }

    /// Tile at `pos`, `None` when off-grid.
    pub fn get(&self, pos: TilePos) -> Option<Tile> {
        self.index(pos).map(|i| self.cells[i])
    }

    /// Closest walkable cell to `from` by Manhattan distance, ties broken
    /// row-major.
    pub fn nearest_open(&self, from: TilePos) -> Option<TilePos> {
        let mut best: Option<(u32, TilePos)> = None;
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let pos = TilePos::new(x, y);
                if self.get(pos).map_or(true, |t| t.blocks_movement()) {
                    continue;
                }
                let dist = from.x.abs_diff(x) + from.y.abs_diff(y);
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, pos));
                }
            }
        }
        best.map(|(_, pos)| pos)
    }

    /// Turn a brick into floor.
    ///
    /// Returns `false` (and changes nothing) if the cell is not a brick.
    pub(crate) fn destroy_brick(&mut self, pos: TilePos) -> bool {
        match self.index(pos) {
            Some(i) if self.cells[i] == Tile::Brick => {
                self.cells[i] = Tile::Empty;
                true
            }
            _ => false,
        }
    }

    /// All positions holding `tile`, row-major.
    pub fn positions_of(&self, tile: Tile) -> Vec<TilePos> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == tile)
            .map(|(i, _)| {
                TilePos::new((i % self.width as usize) as i32, (i / self.width as usize) as i32)
            })
            .collect()
    }

    /// The other cell carrying the same teleport code.
    ///
    /// With more than two pads of a code the first other one in row-major
    /// order wins. `None` for non-teleport cells and unpaired pads.
    pub fn teleport_pair(&self, pos: TilePos) -> Option<TilePos> {
        let tile = self.get(pos)?;
        if !tile.is_teleport() {
            return None;
        }
        self.positions_of(tile).into_iter().find(|p| *p != pos)
    }
}
