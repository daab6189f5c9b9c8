//! Simulation Tick
//!
//! One call advances the world to `now`. Order is fixed so both peers
//! resolve the same inputs the same way:
//!
//! 1. Player intents (steps, bomb drops)
//! 2. Bomb fuses and chain reactions
//! 3. Explosion lifetimes
//! 4. Power-up expiry and pickup
//! 5. Damage (explosions, traps)
//! 6. End-of-match check

use tracing::{debug, info};

use crate::config::RulesConfig;
use crate::core::time::Millis;
use crate::game::bomb::{bomb_blocks, place_bomb, update_bombs, update_explosions, BombId};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::{Direction, Facing, Intent};
use crate::game::player::PlayerId;
use crate::game::powerup::{apply_effect, PowerUpKind};
use crate::game::tiles::{Tile, TilePos};
use crate::game::world::{MatchOutcome, World};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Players whose step succeeded, with their new cell
    pub moved: Vec<(PlayerId, TilePos, Facing)>,
    /// Bombs placed from intents this tick
    pub bombs_placed: Vec<(PlayerId, BombId)>,
    /// Power-ups this peer uncovered, to announce
    pub reveals: Vec<(TilePos, PowerUpKind)>,
    /// Set on the tick the match ends
    pub outcome: Option<MatchOutcome>,
}

/// What happened to a step request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Moved(TilePos),
    Teleported { from: TilePos, to: TilePos },
    Blocked,
    CoolingDown,
}

/// Run one simulation tick.
///
/// `intents` are applied in slice order. Once the match has an outcome the
/// world is frozen and the call is a no-op.
pub fn tick(
    world: &mut World,
    intents: &[(PlayerId, Intent)],
    now: Millis,
    rules: &RulesConfig,
) -> TickResult {
    let mut result = TickResult::default();
    if world.is_ended() {
        return result;
    }

    // 1. Intents
    for (id, intent) in intents {
        match intent {
            Intent::Move(dir) => match step_player(world, *id, *dir, now, rules) {
                StepOutcome::Moved(tile) | StepOutcome::Teleported { to: tile, .. } => {
                    let facing = Facing::from(*dir);
                    result.moved.push((*id, tile, facing));
                }
                StepOutcome::Blocked | StepOutcome::CoolingDown => {}
            },
            Intent::PlaceBomb => match place_bomb(world, *id, now, rules) {
                Ok(bomb) => result.bombs_placed.push((*id, bomb)),
                Err(e) => debug!(player = %id, "bomb refused: {}", e),
            },
        }
    }

    // 2. Bombs
    update_bombs(world, now, rules);

    // 3. Explosions
    update_explosions(world, now);

    // 4. Power-ups
    update_powerups(world, now, rules);

    // 5. Damage
    resolve_damage(world, now, rules);

    // 6. End check
    result.outcome = check_match_end(world, now);

    world.enforce_invariants(rules);
    result.reveals = world.take_reveals();
    result.events = world.take_events();
    result
}

/// Try to move a player one cell.
pub fn step_player(
    world: &mut World,
    id: PlayerId,
    dir: Direction,
    now: Millis,
    rules: &RulesConfig,
) -> StepOutcome {
    let Some(player) = world.player(id) else {
        return StepOutcome::Blocked;
    };
    if !player.alive {
        return StepOutcome::Blocked;
    }
    if !player.can_move(now, rules) {
        return StepOutcome::CoolingDown;
    }

    let from = player.tile;
    let mover_rect = player.rect();
    let target = from.offset(dir, 1);

    let (dest, teleported) = match world.grid.get(target) {
        None | Some(Tile::Wall) | Some(Tile::Brick) => return StepOutcome::Blocked,
        Some(Tile::TeleportA) | Some(Tile::TeleportB) => match world.grid.teleport_pair(target) {
            Some(pair) => (pair, true),
            None => return StepOutcome::Blocked,
        },
        Some(Tile::Empty) | Some(Tile::Trap) => (target, false),
    };

    if bomb_blocks(world, target, mover_rect)
        || (teleported && bomb_blocks(world, dest, mover_rect))
    {
        return StepOutcome::Blocked;
    }

    let facing = Facing::from(dir);
    if let Some(player) = world.player_mut(id) {
        player.tile = dest;
        player.facing = facing;
        player.last_move = Some(now);
    }
    world.push_event(GameEvent::new(
        now,
        GameEventData::PlayerMoved { player_id: id, tile: dest, facing, teleported },
    ));

    if teleported {
        StepOutcome::Teleported { from, to: dest }
    } else {
        StepOutcome::Moved(dest)
    }
}

/// Despawn stale power-ups and hand out pickups.
pub fn update_powerups(world: &mut World, now: Millis, rules: &RulesConfig) {
    let expired: Vec<_> = world
        .powerups
        .values()
        .filter(|p| p.is_expired(now))
        .map(|p| (p.tile, p.kind))
        .collect();
    for (tile, kind) in expired {
        world.powerups.remove(&tile);
        world.push_event(GameEvent::new(now, GameEventData::PowerUpExpired { tile, kind }));
    }

    for p in world.players.iter_mut() {
        p.expire_powerups(now);
    }

    let mut collected = Vec::new();
    for powerup in world.powerups.values() {
        let rect = powerup.rect();
        if let Some(player) = world.players.iter().find(|p| p.alive && p.rect().intersects(&rect)) {
            collected.push((player.id, powerup.tile, powerup.kind));
        }
    }
    for (player_id, tile, kind) in collected {
        world.powerups.remove(&tile);
        apply_effect(&mut world.players, player_id, kind, now, rules);
        debug!(player = %player_id, %kind, tile = %tile, "power-up collected");
        let collected = GameEventData::PowerUpCollected { player_id, tile, kind };
        world.push_event(GameEvent::new(now, collected));
    }
}

/// Explosion and trap damage for every living player.
pub fn resolve_damage(world: &mut World, now: Millis, rules: &RulesConfig) {
    let mut events = Vec::new();

    for player in world.players.iter_mut().filter(|p| p.alive) {
        let rect = player.rect();
        let in_blast = world.explosions.iter().any(|e| e.rect().intersects(&rect));
        if in_blast && player.take_explosion_hit(now, rules) {
            events.push(GameEventData::PlayerDamaged {
                player_id: player.id,
                health: player.health,
                from_trap: false,
            });
        }
        if world.grid.get(player.tile) == Some(Tile::Trap) && player.take_trap_hit(now, rules) {
            events.push(GameEventData::PlayerDamaged {
                player_id: player.id,
                health: player.health,
                from_trap: true,
            });
        }
        if player.health <= 0 {
            player.alive = false;
            info!(player = %player.id, name = %player.name, "player eliminated");
            events.push(GameEventData::PlayerEliminated { player_id: player.id });
        }
    }

    for data in events {
        world.push_event(GameEvent::new(now, data));
    }
}

/// Decide the match once at most one player is left standing.
pub fn check_match_end(world: &mut World, now: Millis) -> Option<MatchOutcome> {
    if world.is_ended() || world.players.is_empty() {
        return None;
    }
    let alive: Vec<PlayerId> = world.players.iter().filter(|p| p.alive).map(|p| p.id).collect();
    if alive.len() == world.players.len() || alive.len() > 1 {
        return None;
    }

    let outcome = match alive.first() {
        Some(id) => MatchOutcome::Winner(*id),
        None => MatchOutcome::Draw,
    };
    world.outcome = Some(outcome);
    info!(?outcome, "match ended");
    world.push_event(GameEvent::new(now, GameEventData::MatchEnded { outcome }));
    Some(outcome)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tiles::TileGrid;

    fn world(rows: &[&[u8]]) -> World {
        World::new(TileGrid::from_rows(rows).unwrap())
    }

    #[test]
    fn test_step_respects_cooldown() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 0, 0, 0]]);
        let p = w.add_player("a", TilePos::new(0, 0), &rules);

        let mut right = |now| step_player(&mut w, p, Direction::Right, now, &rules);
        assert_eq!(right(0), StepOutcome::Moved(TilePos::new(1, 0)));
        assert_eq!(right(100), StepOutcome::CoolingDown);
        assert_eq!(right(120), StepOutcome::Moved(TilePos::new(2, 0)));
        assert_eq!(w.player(p).unwrap().facing, Facing::Right);
    }

    #[test]
    fn test_step_blocked_by_tiles_and_edges() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 1], &[2, 0]]);
        let p = w.add_player("a", TilePos::new(0, 0), &rules);

        assert_eq!(step_player(&mut w, p, Direction::Right, 0, &rules), StepOutcome::Blocked);
        assert_eq!(step_player(&mut w, p, Direction::Down, 0, &rules), StepOutcome::Blocked);
        assert_eq!(step_player(&mut w, p, Direction::Up, 0, &rules), StepOutcome::Blocked);
        assert_eq!(step_player(&mut w, p, Direction::Left, 0, &rules), StepOutcome::Blocked);
        assert_eq!(w.player(p).unwrap().tile, TilePos::new(0, 0));
        assert_eq!(w.player(p).unwrap().last_move, None, "blocked steps do not start the cooldown");
    }

    #[test]
    fn test_unpaired_teleport_blocks() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 4, 0]]);
        let p = w.add_player("a", TilePos::new(0, 0), &rules);
        assert_eq!(step_player(&mut w, p, Direction::Right, 0, &rules), StepOutcome::Blocked);
        assert_eq!(w.player(p).unwrap().tile, TilePos::new(0, 0));
    }

    #[test]
    fn test_trap_damage_ignores_shield() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 8]]);
        let p = w.add_player("a", TilePos::new(0, 0), &rules);
        w.player_mut(p).unwrap().invincible_until = 60_000;

        tick(&mut w, &[(p, Intent::Move(Direction::Right))], 0, &rules);
        assert_eq!(w.player(p).unwrap().health, 2);
        tick(&mut w, &[], 500, &rules);
        assert_eq!(w.player(p).unwrap().health, 2);
        tick(&mut w, &[], 1_000, &rules);
        assert_eq!(w.player(p).unwrap().health, 1);
    }

    #[test]
    fn test_explosion_damage_and_iframes() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 0, 0]]);
        let p = w.add_player("a", TilePos::new(1, 0), &rules);
        tick(&mut w, &[(p, Intent::PlaceBomb)], 0, &rules);

        let result = tick(&mut w, &[], 3_000, &rules);
        assert_eq!(w.player(p).unwrap().health, 2);
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e.data, GameEventData::PlayerDamaged { from_trap: false, .. })));

        tick(&mut w, &[], 3_400, &rules);
        assert_eq!(w.player(p).unwrap().health, 2, "i-frames");
    }

    #[test]
    fn test_last_player_standing_wins() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 0, 0, 0, 0]]);
        let a = w.add_player("a", TilePos::new(0, 0), &rules);
        let b = w.add_player("b", TilePos::new(4, 0), &rules);
        w.player_mut(b).unwrap().health = 1;
        w.player_mut(b).unwrap().tile = TilePos::new(1, 0);

        tick(&mut w, &[(a, Intent::PlaceBomb)], 0, &rules);
        w.player_mut(a).unwrap().invincible_until = 10_000;
        let result = tick(&mut w, &[], 3_000, &rules);

        assert_eq!(result.outcome, Some(MatchOutcome::Winner(a)));
        assert!(w.is_ended());
        let late = tick(&mut w, &[(a, Intent::Move(Direction::Right))], 3_200, &rules);
        assert!(late.events.is_empty());
    }

    #[test]
    fn test_simultaneous_death_is_a_draw() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 0, 0]]);
        let a = w.add_player("a", TilePos::new(0, 0), &rules);
        let b = w.add_player("b", TilePos::new(2, 0), &rules);
        for id in [a, b] {
            w.player_mut(id).unwrap().health = 1;
        }
        w.player_mut(a).unwrap().tile = TilePos::new(1, 0);
        tick(&mut w, &[(a, Intent::PlaceBomb)], 0, &rules);
        w.player_mut(a).unwrap().tile = TilePos::new(0, 0);

        let result = tick(&mut w, &[], 3_000, &rules);
        assert_eq!(result.outcome, Some(MatchOutcome::Draw));
    }

    #[test]
    fn test_powerup_despawns_after_field_time() {
        let rules = RulesConfig::default();
        let mut w = world(&[&[0, 0, 0]]);
        w.add_player("a", TilePos::new(0, 0), &rules);
        w.mirror_reveal(TilePos::new(2, 0), PowerUpKind::LifeUp, 1_000, &rules);

        tick(&mut w, &[], 30_999, &rules);
        assert_eq!(w.powerups.len(), 1);
        let result = tick(&mut w, &[], 31_000, &rules);
        assert!(w.powerups.is_empty());
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e.data, GameEventData::PowerUpExpired { .. })));
    }
}
