//! Match Players
//!
//! Per-match player entity. Created from the lobby roster when the match
//! starts and dropped with the world when it ends. Every timer is an
//! absolute deadline on the session clock.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::config::RulesConfig;
use crate::core::hash::StateHasher;
use crate::core::time::Millis;
use crate::game::input::Facing;
use crate::game::powerup::PowerUpKind;
use crate::game::tiles::{Rect, TilePos};

/// Index of a player in the world arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

impl PlayerId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A player on the field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Current cell. Pixel position is derived.
    pub tile: TilePos,
    pub facing: Facing,
    pub health: i32,
    pub max_bombs: u32,
    pub bombs_in_hand: u32,
    pub explosion_range: u32,
    /// Timed effects currently on this player, kind → expiry.
    pub active_powerups: BTreeMap<PowerUpKind, Millis>,
    pub frozen_until: Millis,
    pub invincible_until: Millis,
    pub last_move: Option<Millis>,
    pub last_hit: Option<Millis>,
    pub last_trap: Option<Millis>,
    pub alive: bool,
}

impl Player {
    /// Fresh player with the starting loadout.
    pub fn new(id: PlayerId, name: impl Into<String>, tile: TilePos, rules: &RulesConfig) -> Self {
        Self {
            id,
            name: name.into(),
            tile,
            facing: Facing::Idle,
            health: rules.start_health,
            max_bombs: rules.start_bombs,
            bombs_in_hand: rules.start_bombs,
            explosion_range: rules.start_range,
            active_powerups: BTreeMap::new(),
            frozen_until: 0,
            invincible_until: 0,
            last_move: None,
            last_hit: None,
            last_trap: None,
            alive: true,
        }
    }

    /// Top-left pixel position.
    pub fn position(&self) -> (i32, i32) {
        self.tile.to_pixels()
    }

    pub fn rect(&self) -> Rect {
        self.tile.rect()
    }

    #[inline]
    pub fn is_frozen(&self, now: Millis) -> bool {
        now < self.frozen_until
    }

    #[inline]
    pub fn is_invincible(&self, now: Millis) -> bool {
        now < self.invincible_until
    }

    /// Step cooldown in effect at `now`.
    pub fn move_cooldown(&self, now: Millis, rules: &RulesConfig) -> Millis {
        if self.is_frozen(now) {
            rules.move_cooldown_ms * rules.frozen_cooldown_factor
        } else {
            rules.move_cooldown_ms
        }
    }

    /// Whether the step gate is open.
    pub fn can_move(&self, now: Millis, rules: &RulesConfig) -> bool {
        match self.last_move {
            Some(last) => now.saturating_sub(last) >= self.move_cooldown(now, rules),
            None => true,
        }
    }

    /// Apply one explosion hit, honoring shield and i-frames.
    ///
    /// Returns `true` if health was lost.
    pub fn take_explosion_hit(&mut self, now: Millis, rules: &RulesConfig) -> bool {
        if !self.alive || self.is_invincible(now) {
            return false;
        }
        if let Some(last) = self.last_hit {
            if now.saturating_sub(last) < rules.iframes_ms {
                return false;
            }
        }
        self.health -= 1;
        self.last_hit = Some(now);
        true
    }

    /// Apply trap damage. Shields do not protect against traps.
    pub fn take_trap_hit(&mut self, now: Millis, rules: &RulesConfig) -> bool {
        if !self.alive {
            return false;
        }
        if let Some(last) = self.last_trap {
            if now.saturating_sub(last) < rules.trap_cooldown_ms {
                return false;
            }
        }
        self.health -= 1;
        self.last_trap = Some(now);
        true
    }

    /// Drop timed effects whose deadline has passed.
    pub fn expire_powerups(&mut self, now: Millis) {
        self.active_powerups.retain(|_, until| now < *until);
    }

    /// Feed convergence-relevant fields into a hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.id.0);
        hasher.update_str(&self.name);
        hasher.update_i32(self.health);
        hasher.update_u32(self.max_bombs);
        hasher.update_u32(self.explosion_range);
        hasher.update_i32(self.tile.x);
        hasher.update_i32(self.tile.y);
        hasher.update_bool(self.alive);
    }
}
