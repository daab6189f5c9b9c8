//! Game Events
//!
//! Events generated during simulation for the render/audio layer and logs.

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::bomb::BombId;
use crate::game::input::Facing;
use crate::game::player::PlayerId;
use crate::game::powerup::PowerUpKind;
use crate::game::tiles::TilePos;
use crate::game::world::MatchOutcome;

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Player stepped (or teleported) to a new cell
    PlayerMoved {
        player_id: PlayerId,
        tile: TilePos,
        facing: Facing,
        teleported: bool,
    },

    /// Bomb dropped
    BombPlaced {
        bomb_id: BombId,
        owner: PlayerId,
        tile: TilePos,
    },

    /// Bomb went off; `cells` are the explosion cells it spawned
    BombDetonated {
        bomb_id: BombId,
        owner: PlayerId,
        cells: Vec<TilePos>,
    },

    /// Brick turned into floor
    TileDestroyed {
        tile: TilePos,
    },

    /// Hidden power-up uncovered
    PowerUpRevealed {
        tile: TilePos,
        kind: PowerUpKind,
    },

    /// Power-up picked up
    PowerUpCollected {
        player_id: PlayerId,
        tile: TilePos,
        kind: PowerUpKind,
    },

    /// Power-up left the field unclaimed
    PowerUpExpired {
        tile: TilePos,
        kind: PowerUpKind,
    },

    /// Player lost health
    PlayerDamaged {
        player_id: PlayerId,
        health: i32,
        from_trap: bool,
    },

    /// Player ran out of health
    PlayerEliminated {
        player_id: PlayerId,
    },

    /// Match is decided
    MatchEnded {
        outcome: MatchOutcome,
    },
}

/// A game event with its timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Session time when the event occurred
    pub at: Millis,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    pub fn new(at: Millis, data: GameEventData) -> Self {
        Self { at, data }
    }

    /// Player the event is about, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        match &self.data {
            GameEventData::PlayerMoved { player_id, .. }
            | GameEventData::PowerUpCollected { player_id, .. }
            | GameEventData::PlayerDamaged { player_id, .. }
            | GameEventData::PlayerEliminated { player_id } => Some(*player_id),
            GameEventData::BombPlaced { owner, .. }
            | GameEventData::BombDetonated { owner, .. } => Some(*owner),
            GameEventData::MatchEnded { outcome } => outcome.winner(),
            _ => None,
        }
    }
}
