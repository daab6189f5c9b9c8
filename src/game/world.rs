//! Match World
//!
//! Arena that owns every entity of a running match. Entities refer to each
//! other by `PlayerId` / `BombId` / `TilePos`, never by reference.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use tracing::error;

use crate::config::RulesConfig;
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::time::Millis;
use crate::game::bomb::{Bomb, BombId, Explosion};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::Facing;
use crate::game::player::{Player, PlayerId};
use crate::game::powerup::{PowerUp, PowerUpKind};
use crate::game::tiles::{Tile, TileGrid, TilePos};

/// How a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Last player standing.
    Winner(PlayerId),
    /// Everyone went down in the same tick.
    Draw,
}

impl MatchOutcome {
    pub fn winner(self) -> Option<PlayerId> {
        match self {
            MatchOutcome::Winner(id) => Some(id),
            MatchOutcome::Draw => None,
        }
    }
}

/// Why a remote position update was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteMoveError {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("position {0} is off the grid")]
    OutOfBounds(TilePos),

    #[error("position {0} is a wall or brick")]
    Blocked(TilePos),
}

/// Complete state of one match.
#[derive(Clone, Debug)]
pub struct World {
    pub grid: TileGrid,

    /// Arena indexed by `PlayerId`
    pub players: Vec<Player>,

    /// Live bombs (BTreeMap for deterministic iteration)
    pub bombs: BTreeMap<BombId, Bomb>,

    pub explosions: Vec<Explosion>,

    /// Visible power-ups by cell
    pub powerups: BTreeMap<TilePos, PowerUp>,

    /// Power-ups still under bricks. Only the peer that placed them has entries.
    pub hidden_powerups: BTreeMap<TilePos, PowerUpKind>,

    /// Reveals the peer announced for bricks that still stand here
    announced_reveals: BTreeMap<TilePos, PowerUpKind>,

    pub outcome: Option<MatchOutcome>,

    next_bomb_id: u32,

    /// Events generated since the last `take_events`
    pending_events: Vec<GameEvent>,

    /// Reveals caused by local brick destruction, to be announced to the peer
    pending_reveals: Vec<(TilePos, PowerUpKind)>,
}

impl World {
    pub fn new(grid: TileGrid) -> Self {
        Self {
            grid,
            players: Vec::new(),
            bombs: BTreeMap::new(),
            explosions: Vec::new(),
            powerups: BTreeMap::new(),
            hidden_powerups: BTreeMap::new(),
            announced_reveals: BTreeMap::new(),
            outcome: None,
            next_bomb_id: 0,
            pending_events: Vec::new(),
            pending_reveals: Vec::new(),
        }
    }

    /// Add a player at `tile` with the starting loadout.
    pub fn add_player(
        &mut self,
        name: impl Into<String>,
        tile: TilePos,
        rules: &RulesConfig,
    ) -> PlayerId {
        let id = PlayerId(self.players.len() as u8);
        self.players.push(Player::new(id, name, tile, rules));
        id
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id.index())
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id.index())
    }

    pub fn player_by_name(&self, name: &str) -> Option<PlayerId> {
        self.players.iter().find(|p| p.name == name).map(|p| p.id)
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    pub fn is_ended(&self) -> bool {
        self.outcome.is_some()
    }

    /// Live bombs placed by `owner`.
    pub fn bombs_owned(&self, owner: PlayerId) -> u32 {
        self.bombs.values().filter(|b| b.owner == owner).count() as u32
    }

    pub fn bomb_at(&self, tile: TilePos) -> Option<&Bomb> {
        self.bombs.values().find(|b| b.tile == tile)
    }

    pub fn has_explosion_at(&self, tile: TilePos) -> bool {
        self.explosions.iter().any(|e| e.tile == tile)
    }

    pub(crate) fn next_bomb_id(&mut self) -> BombId {
        let id = BombId(self.next_bomb_id);
        self.next_bomb_id += 1;
        id
    }

    /// Mirror a remote player's position.
    ///
    /// Remote peers own their player's movement; the update is only
    /// checked against the grid.
    pub fn apply_remote_position(
        &mut self,
        id: PlayerId,
        tile: TilePos,
        facing: Facing,
        now: Millis,
    ) -> Result<(), RemoteMoveError> {
        match self.grid.get(tile) {
            None => return Err(RemoteMoveError::OutOfBounds(tile)),
            Some(t) if t.blocks_movement() => return Err(RemoteMoveError::Blocked(tile)),
            Some(_) => {}
        }
        let player = self.players.get_mut(id.index()).ok_or(RemoteMoveError::UnknownPlayer(id))?;
        let moved = player.tile != tile;
        player.tile = tile;
        player.facing = facing;
        if moved {
            player.last_move = Some(now);
            self.push_event(GameEvent::new(
                now,
                GameEventData::PlayerMoved { player_id: id, tile, facing, teleported: false },
            ));
        }
        Ok(())
    }

    /// Make a power-up announced by the peer visible here.
    ///
    /// Idempotent: a second announcement for the same cell is ignored. If
    /// our copy of the blast has not reached the brick yet, the power-up
    /// appears when it does. Returns `false` for walls and off-grid cells.
    pub fn mirror_reveal(
        &mut self,
        tile: TilePos,
        kind: PowerUpKind,
        now: Millis,
        rules: &RulesConfig,
    ) -> bool {
        match self.grid.get(tile) {
            None | Some(Tile::Wall) => return false,
            Some(Tile::Brick) => {
                self.announced_reveals.insert(tile, kind);
                return true;
            }
            Some(_) => {}
        }
        if self.powerups.contains_key(&tile) {
            return true;
        }
        self.hidden_powerups.remove(&tile);
        self.powerups.insert(tile, PowerUp::new(tile, kind, now, rules));
        self.push_event(GameEvent::new(now, GameEventData::PowerUpRevealed { tile, kind }));
        true
    }

    /// Destroy the brick at `tile`, revealing what it hid.
    pub(crate) fn destroy_brick(&mut self, tile: TilePos, now: Millis, rules: &RulesConfig) {
        if !self.grid.destroy_brick(tile) {
            return;
        }
        self.push_event(GameEvent::new(now, GameEventData::TileDestroyed { tile }));

        if let Some(kind) = self.hidden_powerups.remove(&tile) {
            self.powerups.insert(tile, PowerUp::new(tile, kind, now, rules));
            self.pending_reveals.push((tile, kind));
            self.push_event(GameEvent::new(now, GameEventData::PowerUpRevealed { tile, kind }));
        } else if let Some(kind) = self.announced_reveals.remove(&tile) {
            self.powerups.insert(tile, PowerUp::new(tile, kind, now, rules));
            self.push_event(GameEvent::new(now, GameEventData::PowerUpRevealed { tile, kind }));
        }
    }

    /// Clamp anything a correct simulation can never produce.
    ///
    /// Returns the number of corrections made.
    pub fn enforce_invariants(&mut self, rules: &RulesConfig) -> usize {
        let mut fixes = 0;
        let owned: Vec<u32> = self.players.iter().map(|p| self.bombs_owned(p.id)).collect();

        for (player, owned) in self.players.iter_mut().zip(owned) {
            if player.max_bombs > rules.max_bomb_limit || player.max_bombs == 0 {
                error!(player = %player.id, max_bombs = player.max_bombs, "max_bombs out of range");
                player.max_bombs = player.max_bombs.clamp(1, rules.max_bomb_limit);
                fixes += 1;
            }
            let allowed = player.max_bombs.saturating_sub(owned);
            if player.bombs_in_hand > allowed {
                error!(
                    player = %player.id,
                    bombs_in_hand = player.bombs_in_hand,
                    live = owned,
                    "bombs_in_hand exceeds max_bombs"
                );
                player.bombs_in_hand = allowed;
                fixes += 1;
            }
            if player.health > rules.max_health {
                error!(player = %player.id, health = player.health, "health above cap");
                player.health = rules.max_health;
                fixes += 1;
            }
            if self.grid.get(player.tile).map_or(true, |t| t.blocks_movement()) {
                match self.grid.nearest_open(player.tile) {
                    Some(open) => {
                        error!(
                            player = %player.id,
                            tile = %player.tile,
                            to = %open,
                            "player inside a blocked tile"
                        );
                        player.tile = open;
                        fixes += 1;
                    }
                    None => error!(
                        player = %player.id,
                        tile = %player.tile,
                        "player inside a blocked tile, nowhere to go"
                    ),
                }
            }
        }
        fixes
    }

    /// Hash of everything both peers must agree on.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.grid.width(), self.grid.height(), |hasher| {
            for player in &self.players {
                player.hash_into(hasher);
            }
            for tile in self.grid.cells() {
                hasher.update_u8(tile.code());
            }
        })
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Take reveals that the peer has not been told about yet.
    pub fn take_reveals(&mut self) -> Vec<(TilePos, PowerUpKind)> {
        std::mem::take(&mut self.pending_reveals)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================
