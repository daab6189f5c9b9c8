//! Match simulation scenarios and boundary behaviors.

use bomberlan::game::{
    tick, Direction, GameEventData, Intent, PowerUp, PowerUpKind, StepOutcome, Tile, TileGrid,
    TilePos, World,
};
use bomberlan::game::tick::step_player;
use bomberlan::RulesConfig;

fn world(rows: &[&[u8]]) -> World {
    World::new(TileGrid::from_rows(rows).unwrap())
}

#[test]
fn s1_basic_bomb_cycle() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[0, 0, 0], &[0, 0, 0], &[0, 0, 0]]);
    let p = w.add_player("a", TilePos::new(1, 1), &rules);

    let placed = tick(&mut w, &[(p, Intent::PlaceBomb)], 0, &rules);
    assert_eq!(placed.bombs_placed.len(), 1);
    assert_eq!(w.player(p).unwrap().bombs_in_hand, 0);

    tick(&mut w, &[], 2_999, &rules);
    assert!(w.explosions.is_empty(), "fuse not yet out");

    tick(&mut w, &[], 3_000, &rules);
    for tile in [(1, 1), (0, 1), (2, 1), (1, 0), (1, 2)] {
        assert!(w.has_explosion_at(TilePos::new(tile.0, tile.1)), "no explosion at {:?}", tile);
    }
    for corner in [(0, 0), (2, 0), (0, 2), (2, 2)] {
        assert!(!w.has_explosion_at(TilePos::new(corner.0, corner.1)));
    }
    assert!(w.bombs.is_empty());
    assert_eq!(w.player(p).unwrap().bombs_in_hand, 1);

    tick(&mut w, &[], 3_500, &rules);
    assert!(w.explosions.is_empty(), "explosions last 0.5 s");
}

#[test]
fn s2_brick_reveals_powerup() {
    let rules = RulesConfig::default();
    let mut w = world(&[
        &[1, 1, 1, 1, 1],
        &[1, 0, 0, 0, 1],
        &[1, 2, 0, 0, 1],
        &[1, 0, 0, 0, 1],
        &[1, 1, 1, 1, 1],
    ]);
    let brick = TilePos::new(1, 2);
    w.hidden_powerups.insert(brick, PowerUpKind::RangeUp);
    let p = w.add_player("a", TilePos::new(1, 1), &rules);

    tick(&mut w, &[(p, Intent::PlaceBomb)], 0, &rules);
    let blast = tick(&mut w, &[], 3_000, &rules);

    assert_eq!(w.grid.get(brick), Some(Tile::Empty));
    assert_eq!(w.powerups.get(&brick).map(|p| p.kind), Some(PowerUpKind::RangeUp));
    assert!(w.hidden_powerups.is_empty());
    assert_eq!(blast.reveals, vec![(brick, PowerUpKind::RangeUp)]);

    let walk = tick(&mut w, &[(p, Intent::Move(Direction::Down))], 3_100, &rules);
    assert_eq!(walk.moved.len(), 1);
    assert_eq!(w.player(p).unwrap().tile, brick);
    assert_eq!(w.player(p).unwrap().explosion_range, 2);
    assert!(w.powerups.is_empty());
}

#[test]
fn s3_teleport_pair() {
    let rules = RulesConfig::default();
    let mut rows = vec![vec![0u8; 6]; 6];
    rows[1][1] = 4;
    rows[4][4] = 4;
    let mut w = World::new(TileGrid::from_rows(&rows).unwrap());
    let p = w.add_player("a", TilePos::new(1, 2), &rules);

    let outcome = step_player(&mut w, p, Direction::Up, 0, &rules);
    assert_eq!(
        outcome,
        StepOutcome::Teleported { from: TilePos::new(1, 2), to: TilePos::new(4, 4) }
    );
    assert_eq!(w.player(p).unwrap().tile, TilePos::new(4, 4));
}

#[test]
fn s6_freeze_doubles_cooldown() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[0, 0, 0, 0], &[0, 0, 0, 0]]);
    let p1 = w.add_player("a", TilePos::new(0, 0), &rules);
    let p2 = w.add_player("b", TilePos::new(0, 1), &rules);
    let freeze = TilePos::new(1, 0);
    w.powerups.insert(freeze, PowerUp::new(freeze, PowerUpKind::Freeze, 0, &rules));

    let result = tick(&mut w, &[(p1, Intent::Move(Direction::Right))], 0, &rules);
    assert!(result
        .events
        .iter()
        .any(|e| matches!(
            e.data,
            GameEventData::PowerUpCollected { kind: PowerUpKind::Freeze, .. }
        )));
    assert_eq!(w.player(p2).unwrap().move_cooldown(100, &rules), 240);
    assert_eq!(w.player(p1).unwrap().move_cooldown(100, &rules), 120, "collector is not frozen");

    let moved = |x| StepOutcome::Moved(TilePos::new(x, 1));
    assert_eq!(step_player(&mut w, p2, Direction::Right, 1_000, &rules), moved(1));
    assert_eq!(step_player(&mut w, p2, Direction::Right, 1_130, &rules), StepOutcome::CoolingDown);
    assert_eq!(step_player(&mut w, p2, Direction::Right, 1_240, &rules), moved(2));

    assert_eq!(w.player(p2).unwrap().move_cooldown(5_000, &rules), 120);
    assert_eq!(step_player(&mut w, p2, Direction::Left, 6_000, &rules), moved(1));
    assert_eq!(step_player(&mut w, p2, Direction::Left, 6_120, &rules), moved(0));
}

#[test]
fn corner_explosion_stays_on_grid() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[0, 0], &[0, 0]]);
    let p = w.add_player("a", TilePos::new(0, 0), &rules);
    w.player_mut(p).unwrap().explosion_range = 3;

    tick(&mut w, &[(p, Intent::PlaceBomb)], 0, &rules);
    tick(&mut w, &[], 3_000, &rules);

    assert_eq!(w.explosions.len(), 3);
    assert!(w.explosions.iter().all(|e| w.grid.in_bounds(e.tile)));
}

#[test]
fn plain_brick_just_clears() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[0, 2, 0]]);
    let p = w.add_player("a", TilePos::new(0, 0), &rules);
    w.player_mut(p).unwrap().explosion_range = 2;

    tick(&mut w, &[(p, Intent::PlaceBomb)], 0, &rules);
    let result = tick(&mut w, &[], 3_000, &rules);

    assert_eq!(w.grid.get(TilePos::new(1, 0)), Some(Tile::Empty));
    assert!(w.powerups.is_empty());
    assert!(result.reveals.is_empty());
    assert!(!w.has_explosion_at(TilePos::new(2, 0)), "brick stops the ray");
}

#[test]
fn shield_blocks_explosions_not_traps() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[8, 0, 0]]);
    let p = w.add_player("a", TilePos::new(0, 0), &rules);
    w.player_mut(p).unwrap().invincible_until = 20_000;

    tick(&mut w, &[(p, Intent::PlaceBomb)], 0, &rules);
    assert_eq!(w.player(p).unwrap().health, 2, "trap hits through the shield");

    tick(&mut w, &[], 500, &rules);
    assert_eq!(w.player(p).unwrap().health, 2, "trap cooldown is one second");

    // Trap again at 3000; the blast on the same tick is absorbed
    tick(&mut w, &[], 3_000, &rules);
    assert!(w.has_explosion_at(TilePos::new(0, 0)));
    assert_eq!(w.player(p).unwrap().health, 1);
}

#[test]
fn chain_reaction_same_tick() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[0, 0, 0, 0, 0]]);
    let a = w.add_player("a", TilePos::new(0, 0), &rules);
    let b = w.add_player("b", TilePos::new(1, 0), &rules);

    tick(&mut w, &[(a, Intent::PlaceBomb)], 0, &rules);
    tick(&mut w, &[(b, Intent::PlaceBomb)], 2_000, &rules);
    assert_eq!(w.bombs.len(), 2);

    tick(&mut w, &[], 3_000, &rules);
    assert!(w.bombs.is_empty(), "b's bomb goes off with a's");
    assert!(w.has_explosion_at(TilePos::new(2, 0)));
    assert_eq!(w.player(a).unwrap().bombs_in_hand, 1);
    assert_eq!(w.player(b).unwrap().bombs_in_hand, 1);
}

#[test]
fn last_player_standing_wins() {
    let rules = RulesConfig::default();
    let mut w = world(&[&[0, 0, 0, 1, 0]]);
    let a = w.add_player("a", TilePos::new(0, 0), &rules);
    let b = w.add_player("b", TilePos::new(4, 0), &rules);
    w.player_mut(a).unwrap().health = 1;

    tick(&mut w, &[(a, Intent::PlaceBomb)], 0, &rules);
    let result = tick(&mut w, &[], 3_000, &rules);

    assert_eq!(result.outcome, Some(bomberlan::MatchOutcome::Winner(b)));
    assert!(w.is_ended());
    let frozen = tick(&mut w, &[(b, Intent::Move(Direction::Left))], 4_000, &rules);
    assert!(frozen.moved.is_empty(), "world is frozen after the end");
}
