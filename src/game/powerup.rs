//! Power-Ups
//!
//! Hidden under bricks at match start, revealed when the brick breaks,
//! picked up on contact or despawned after a while on the field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::config::RulesConfig;
use crate::core::rng::DeterministicRng;
use crate::core::time::Millis;
use crate::game::player::{Player, PlayerId};
use crate::game::tiles::{Rect, Tile, TileGrid, TilePos};

/// Power-up kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerUpKind {
    /// One more bomb.
    #[serde(rename = "bomb_powerup")]
    BombUp,
    /// One more cell of blast range.
    #[serde(rename = "range_powerup", alias = "speed_powerup")]
    RangeUp,
    /// Slows every other player.
    #[serde(rename = "freeze_powerup")]
    Freeze,
    /// One health back.
    #[serde(rename = "life_powerup")]
    LifeUp,
    /// Temporary immunity to explosions.
    #[serde(rename = "shield_powerup")]
    Shield,
}

impl PowerUpKind {
    pub const ALL: [PowerUpKind; 5] = [
        PowerUpKind::BombUp,
        PowerUpKind::RangeUp,
        PowerUpKind::Freeze,
        PowerUpKind::LifeUp,
        PowerUpKind::Shield,
    ];

    /// Name used in `POWERUP_UPDATE`.
    pub fn wire_name(self) -> &'static str {
        match self {
            PowerUpKind::BombUp => "bomb_powerup",
            PowerUpKind::RangeUp => "range_powerup",
            PowerUpKind::Freeze => "freeze_powerup",
            PowerUpKind::LifeUp => "life_powerup",
            PowerUpKind::Shield => "shield_powerup",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PowerUpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Unknown power-up name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown power-up {0:?}")]
pub struct ParsePowerUpError(pub String);

impl FromStr for PowerUpKind {
    type Err = ParsePowerUpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bomb_powerup" => Ok(PowerUpKind::BombUp),
            "range_powerup" | "speed_powerup" => Ok(PowerUpKind::RangeUp),
            "freeze_powerup" => Ok(PowerUpKind::Freeze),
            "life_powerup" => Ok(PowerUpKind::LifeUp),
            "shield_powerup" => Ok(PowerUpKind::Shield),
            other => Err(ParsePowerUpError(other.to_string())),
        }
    }
}

/// A revealed power-up lying on the field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUp {
    pub tile: TilePos,
    pub kind: PowerUpKind,
    pub revealed_at: Millis,
    pub expires_at: Millis,
}

impl PowerUp {
    pub fn new(tile: TilePos, kind: PowerUpKind, now: Millis, rules: &RulesConfig) -> Self {
        Self {
            tile,
            kind,
            revealed_at: now,
            expires_at: now + rules.powerup_field_ms,
        }
    }

    pub fn rect(&self) -> Rect {
        self.tile.rect()
    }

    #[inline]
    pub fn is_expired(&self, now: Millis) -> bool {
        now >= self.expires_at
    }
}

/// Choose which bricks hide a power-up.
///
/// `floor(bricks × spawn_percent / 100)` bricks are picked without
/// replacement; each gets a kind drawn uniformly from the enabled set.
pub fn place_hidden_powerups(
    grid: &TileGrid,
    rng: &mut DeterministicRng,
    rules: &RulesConfig,
) -> BTreeMap<TilePos, PowerUpKind> {
    let mut hidden = BTreeMap::new();
    if rules.enabled_powerups.is_empty() {
        return hidden;
    }

    let bricks = grid.positions_of(Tile::Brick);
    let count = bricks.len() * rules.powerup_spawn_percent as usize / 100;
    for tile in rng.sample(&bricks, count) {
        if let Some(kind) = rng.choose(&rules.enabled_powerups) {
            hidden.insert(tile, *kind);
        }
    }

    debug!(bricks = bricks.len(), hidden = hidden.len(), "hidden power-ups placed");
    hidden
}

/// Apply a pickup to `collector`.
pub fn apply_effect(
    players: &mut [Player],
    collector: PlayerId,
    kind: PowerUpKind,
    now: Millis,
    rules: &RulesConfig,
) {
    match kind {
        PowerUpKind::BombUp => {
            if let Some(p) = players.get_mut(collector.index()) {
                if p.max_bombs < rules.max_bomb_limit {
                    p.max_bombs += 1;
                    p.bombs_in_hand += 1;
                }
            }
        }
        PowerUpKind::RangeUp => {
            if let Some(p) = players.get_mut(collector.index()) {
                p.explosion_range += 1;
            }
        }
        PowerUpKind::Freeze => {
            let until = now + rules.freeze_duration_ms;
            for p in players.iter_mut().filter(|p| p.id != collector) {
                p.frozen_until = until;
                p.active_powerups.insert(PowerUpKind::Freeze, until);
            }
        }
        PowerUpKind::LifeUp => {
            if let Some(p) = players.get_mut(collector.index()) {
                p.health = (p.health + 1).min(rules.max_health);
            }
        }
        PowerUpKind::Shield => {
            if let Some(p) = players.get_mut(collector.index()) {
                p.invincible_until = now + rules.shield_duration_ms;
                p.active_powerups.insert(PowerUpKind::Shield, p.invincible_until);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players(rules: &RulesConfig) -> Vec<Player> {
        vec![
            Player::new(PlayerId(0), "a", TilePos::new(1, 1), rules),
            Player::new(PlayerId(1), "b", TilePos::new(3, 3), rules),
        ]
    }

    #[test]
    fn test_wire_names_and_alias() {
        for kind in PowerUpKind::ALL {
            assert_eq!(kind.wire_name().parse::<PowerUpKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.wire_name()));
        }
        assert_eq!("speed_powerup".parse::<PowerUpKind>().unwrap(), PowerUpKind::RangeUp);
        assert_eq!(
            serde_json::from_str::<PowerUpKind>("\"speed_powerup\"").unwrap(),
            PowerUpKind::RangeUp
        );
        assert!("mystery_powerup".parse::<PowerUpKind>().is_err());
    }

    #[test]
    fn test_hidden_placement_count_and_positions() {
        let rules = RulesConfig::default();
        let grid = TileGrid::from_rows(&[
            [1u8, 1, 1, 1, 1, 1, 1],
            [1, 2, 2, 2, 2, 2, 1],
            [1, 2, 0, 0, 0, 2, 1],
            [1, 1, 1, 1, 1, 1, 1],
        ])
        .unwrap();
        let mut rng = DeterministicRng::new(7);
        let hidden = place_hidden_powerups(&grid, &mut rng, &rules);

        // 7 bricks × 40% = 2.8, floored
        assert_eq!(hidden.len(), 2);
        for tile in hidden.keys() {
            assert_eq!(grid.get(*tile), Some(Tile::Brick));
        }

        let mut again = DeterministicRng::new(7);
        assert_eq!(place_hidden_powerups(&grid, &mut again, &rules), hidden);
    }

    #[test]
    fn test_hidden_placement_respects_enabled_set() {
        let rules = RulesConfig {
            enabled_powerups: vec![PowerUpKind::Shield],
            powerup_spawn_percent: 100,
            ..RulesConfig::default()
        };
        let grid = TileGrid::from_rows(&[[2u8, 2, 2, 2]]).unwrap();
        let hidden = place_hidden_powerups(&grid, &mut DeterministicRng::new(1), &rules);
        assert_eq!(hidden.len(), 4);
        assert!(hidden.values().all(|k| *k == PowerUpKind::Shield));

        let none = RulesConfig { enabled_powerups: vec![], ..rules };
        assert!(place_hidden_powerups(&grid, &mut DeterministicRng::new(1), &none).is_empty());
    }

    #[test]
    fn test_bomb_up_caps() {
        let rules = RulesConfig::default();
        let mut ps = players(&rules);
        for _ in 0..6 {
            apply_effect(&mut ps, PlayerId(0), PowerUpKind::BombUp, 0, &rules);
        }
        assert_eq!(ps[0].max_bombs, 4);
        assert_eq!(ps[0].bombs_in_hand, 4);
    }

    #[test]
    fn test_life_up_caps() {
        let rules = RulesConfig::default();
        let mut ps = players(&rules);
        for _ in 0..4 {
            apply_effect(&mut ps, PlayerId(0), PowerUpKind::LifeUp, 0, &rules);
        }
        assert_eq!(ps[0].health, 5);
    }

    #[test]
    fn test_freeze_hits_others_only() {
        let rules = RulesConfig::default();
        let mut ps = players(&rules);
        apply_effect(&mut ps, PlayerId(0), PowerUpKind::Freeze, 1_000, &rules);
        assert!(!ps[0].is_frozen(1_000));
        assert!(ps[1].is_frozen(5_999));
        assert!(!ps[1].is_frozen(6_000));
    }

    #[test]
    fn test_shield_and_range() {
        let rules = RulesConfig::default();
        let mut ps = players(&rules);
        apply_effect(&mut ps, PlayerId(1), PowerUpKind::Shield, 0, &rules);
        apply_effect(&mut ps, PlayerId(1), PowerUpKind::RangeUp, 0, &rules);
        assert_eq!(ps[1].invincible_until, 15_000);
        assert_eq!(ps[1].explosion_range, 2);
        assert_eq!(ps[0].explosion_range, 1);
    }

    #[test]
    fn test_field_expiry() {
        let rules = RulesConfig::default();
        let p = PowerUp::new(TilePos::new(1, 2), PowerUpKind::LifeUp, 2_000, &rules);
        assert!(!p.is_expired(31_999));
        assert!(p.is_expired(32_000));
    }
}
