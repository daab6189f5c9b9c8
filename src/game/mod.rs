//! Game Logic Module
//!
//! Tile-based match simulation. No I/O; time comes in as `now`.
//!
//! ## Module Structure
//!
//! - `tiles`: Tile codes, coordinates, the mutable grid
//! - `maps`: Built-in map catalog and spawn corners
//! - `input`: Directions and player intents
//! - `player`: Player entity, cooldowns, damage
//! - `bomb`: Placement, blast rays, chain reactions
//! - `powerup`: Hidden placement, reveal, pickup effects
//! - `world`: Arena owning every match entity
//! - `tick`: Per-tick update order
//! - `events`: Game events for render and logs

pub mod tiles;
pub mod maps;
pub mod input;
pub mod player;
pub mod bomb;
pub mod powerup;
pub mod world;
pub mod tick;
pub mod events;

// Re-export key types
pub use tiles::{Tile, TileGrid, TilePos, Rect};
pub use maps::{MapCatalog, MapError, spawn_tile};
pub use input::{Direction, Facing, Intent};
pub use player::{Player, PlayerId};
pub use bomb::{Bomb, BombId, Explosion, ExplosionPhase};
pub use powerup::{PowerUp, PowerUpKind};
pub use world::{MatchOutcome, World};
pub use tick::{tick, StepOutcome, TickResult};
pub use events::{GameEvent, GameEventData};
