//! Bomb Engine
//!
//! Placement, fuse, blast rays and chain reactions. The only code allowed
//! to mutate the tile grid.

use std::fmt;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::config::RulesConfig;
use crate::core::time::Millis;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::Direction;
use crate::game::player::PlayerId;
use crate::game::tiles::{Rect, Tile, TileGrid, TilePos};
use crate::game::world::World;

/// Bomb handle, monotonic per world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BombId(pub u32);

impl fmt::Display for BombId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A ticking bomb.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bomb {
    pub id: BombId,
    pub owner: PlayerId,
    pub tile: TilePos,
    pub placed_at: Millis,
    /// Absolute detonation deadline
    pub fuse_at: Millis,
    /// Owner's range when the bomb was placed
    pub range: u32,
}

impl Bomb {
    pub fn rect(&self) -> Rect {
        self.tile.rect()
    }
}

/// Visual stage of an explosion. Damage is the same in both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplosionPhase {
    Burst,
    Fade,
}

/// One burning cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explosion {
    pub tile: TilePos,
    pub born_at: Millis,
    pub expires_at: Millis,
    pub source: BombId,
}

impl Explosion {
    pub fn rect(&self) -> Rect {
        self.tile.rect()
    }

    pub fn phase(&self, now: Millis, rules: &RulesConfig) -> ExplosionPhase {
        if now.saturating_sub(self.born_at) < rules.explosion_phase_ms {
            ExplosionPhase::Burst
        } else {
            ExplosionPhase::Fade
        }
    }

    #[inline]
    pub fn is_expired(&self, now: Millis) -> bool {
        now >= self.expires_at
    }
}

/// Why a bomb could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceBombError {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("player {0} is out of the match")]
    Eliminated(PlayerId),

    #[error("player {0} has no bombs in hand")]
    NoBombsInHand(PlayerId),

    #[error("a bomb already sits at {0}")]
    Occupied(TilePos),
}

// =============================================================================
// BLAST GEOMETRY
// =============================================================================

/// Cells reached by a blast and bricks it breaks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blast {
    /// Explosion cells, center first, then Up/Down/Left/Right rays.
    pub cells: Vec<TilePos>,
    /// Bricks in `cells` that the blast turns to floor.
    pub bricks: Vec<TilePos>,
}

/// Trace the four blast rays from `center`.
///
/// Walls stop a ray before the cell, bricks and teleport pads stop it after,
/// floor and traps let it continue. Never yields off-grid cells.
pub fn blast_cells(grid: &TileGrid, center: TilePos, range: u32) -> Blast {
    let mut blast = Blast::default();
    blast.cells.push(center);

    for dir in Direction::ALL {
        for d in 1..=range as i32 {
            let target = center.offset(dir, d);
            let Some(tile) = grid.get(target) else {
                break;
            };
            match tile {
                Tile::Empty | Tile::Trap => blast.cells.push(target),
                Tile::Wall => break,
                Tile::Brick => {
                    blast.cells.push(target);
                    blast.bricks.push(target);
                    break;
                }
                Tile::TeleportA | Tile::TeleportB => {
                    blast.cells.push(target);
                    break;
                }
            }
        }
    }
    blast
}

// =============================================================================
// PLACEMENT & DETONATION
// =============================================================================

/// Drop a bomb on the player's current cell.
pub fn place_bomb(
    world: &mut World,
    owner: PlayerId,
    now: Millis,
    rules: &RulesConfig,
) -> Result<BombId, PlaceBombError> {
    let player = world.player(owner).ok_or(PlaceBombError::UnknownPlayer(owner))?;
    if !player.alive {
        return Err(PlaceBombError::Eliminated(owner));
    }
    if player.bombs_in_hand == 0 {
        return Err(PlaceBombError::NoBombsInHand(owner));
    }
    let tile = player.tile;
    let range = player.explosion_range;
    if world.bomb_at(tile).is_some() {
        return Err(PlaceBombError::Occupied(tile));
    }

    let id = world.next_bomb_id();
    world.bombs.insert(id, Bomb {
        id,
        owner,
        tile,
        placed_at: now,
        fuse_at: now + rules.fuse_ms,
        range,
    });
    if let Some(player) = world.player_mut(owner) {
        player.bombs_in_hand -= 1;
    }

    debug!(bomb = %id, owner = %owner, tile = %tile, range, "bomb placed");
    world.push_event(GameEvent::new(now, GameEventData::BombPlaced { bomb_id: id, owner, tile }));
    Ok(id)
}

/// Mirror a bomb the owner's peer says it dropped.
///
/// The owner's own simulation is authoritative for its bombs. A local copy
/// still sitting on the owner's cell, or holding the owner's last bomb,
/// already went off over there, so it detonates now to make room.
pub fn place_remote_bomb(
    world: &mut World,
    owner: PlayerId,
    now: Millis,
    rules: &RulesConfig,
) -> Result<BombId, PlaceBombError> {
    let player = world.player(owner).ok_or(PlaceBombError::UnknownPlayer(owner))?;
    if player.alive {
        let underfoot = world.bomb_at(player.tile).filter(|b| b.owner == owner).map(|b| b.id);
        let stale = underfoot.or_else(|| {
            if player.bombs_in_hand > 0 {
                return None;
            }
            world
                .bombs
                .values()
                .filter(|b| b.owner == owner)
                .min_by_key(|b| (b.placed_at, b.id))
                .map(|b| b.id)
        });
        if let Some(id) = stale {
            warn!(bomb = %id, owner = %owner, "remote bomb arrived early, detonating predecessor");
            if let Some(bomb) = world.bombs.get_mut(&id) {
                bomb.fuse_at = now;
            }
            update_bombs(world, now, rules);
        }
    }
    place_bomb(world, owner, now, rules)
}

/// Whether a bomb keeps `mover` (currently covering `mover_rect`) out of `target`.
pub fn bomb_blocks(world: &World, target: TilePos, mover_rect: Rect) -> bool {
    world
        .bombs
        .values()
        .any(|b| b.tile == target && !b.rect().intersects(&mover_rect))
}

/// Detonate every bomb whose fuse has run out, including chain reactions.
///
/// A blast reaching another bomb sets that bomb's fuse to `now`, so whole
/// chains resolve within one call. Bombs go off in id order.
///
/// Returns the detonated bomb ids.
pub fn update_bombs(world: &mut World, now: Millis, rules: &RulesConfig) -> Vec<BombId> {
    let mut detonated = Vec::new();

    while let Some(id) = world
        .bombs
        .values()
        .find(|b| b.fuse_at <= now)
        .map(|b| b.id)
    {
        let Some(bomb) = world.bombs.remove(&id) else {
            break;
        };
        detonate(world, bomb, now, rules);
        detonated.push(id);
    }
    detonated
}

fn detonate(world: &mut World, bomb: Bomb, now: Millis, rules: &RulesConfig) {
    let blast = blast_cells(&world.grid, bomb.tile, bomb.range);

    for tile in &blast.bricks {
        world.destroy_brick(*tile, now, rules);
    }

    for tile in &blast.cells {
        world.explosions.push(Explosion {
            tile: *tile,
            born_at: now,
            expires_at: now + rules.explosion_lifetime_ms,
            source: bomb.id,
        });
        for other in world.bombs.values_mut() {
            if other.tile == *tile && other.fuse_at > now {
                other.fuse_at = now;
            }
        }
    }

    // Live bombs of the owner are already out of the world map here
    let live = world.bombs_owned(bomb.owner);
    if let Some(owner) = world.player_mut(bomb.owner) {
        owner.bombs_in_hand = (owner.bombs_in_hand + 1).min(owner.max_bombs.saturating_sub(live));
    }

    debug!(
        bomb = %bomb.id,
        cells = blast.cells.len(),
        bricks = blast.bricks.len(),
        "bomb detonated"
    );
    world.push_event(GameEvent::new(
        now,
        GameEventData::BombDetonated { bomb_id: bomb.id, owner: bomb.owner, cells: blast.cells },
    ));
}

/// Drop explosions past their lifetime.
pub fn update_explosions(world: &mut World, now: Millis) {
    world.explosions.retain(|e| !e.is_expired(now));
}

// =============================================================================
// TESTS
// =============================================================================
