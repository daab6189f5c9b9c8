//! Match Field Sync
//!
//! Binds a `World` to the `MultiplayerTestField` scope. Local intents run
//! through the simulation and come out as `PLAYER_UPDATE` / `BOMB_UPDATE` /
//! `POWERUP_UPDATE`; the same packets from the peer are mirrored into the
//! local world. Both peers simulate bombs, damage and pickups themselves.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::config::RulesConfig;
use crate::core::hash::StateHash;
use crate::core::rng::DeterministicRng;
use crate::core::time::Millis;
use crate::game::bomb::place_remote_bomb;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::Intent;
use crate::game::maps::{spawn_tile, MapError};
use crate::game::player::PlayerId;
use crate::game::powerup::place_hidden_powerups;
use crate::game::tick::{tick, TickResult};
use crate::game::tiles::{TileGrid, TilePos};
use crate::game::world::{MatchOutcome, World};
use crate::network::protocol::{FieldPacket, Packet};
use crate::network::session::Outgoing;

/// Spawn corner of the host.
pub const HOST_SPAWN: u8 = 1;
/// Spawn corner of the client.
pub const CLIENT_SPAWN: u8 = 4;

/// Match setup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error(transparent)]
    Map(#[from] MapError),

    #[error("local player {0:?} is not in the spawn list")]
    UnknownLocal(String),

    #[error("spawn list is empty")]
    NoPlayers,
}

/// A running match as seen by one peer.
#[derive(Debug)]
pub struct MatchField {
    world: World,
    map_name: String,
    local: PlayerId,
    spawns: BTreeMap<String, u8>,
    names: BTreeMap<String, PlayerId>,
    remotes: Vec<SocketAddr>,
    /// Newest applied PLAYER_UPDATE seq per remote player
    last_update_seq: BTreeMap<PlayerId, u32>,
    rules: RulesConfig,
    outbox: Vec<Outgoing>,
}

impl MatchField {
    /// Host side: spawn both players, hide power-ups, announce the spawns.
    pub fn host(
        map_name: impl Into<String>,
        grid: TileGrid,
        host_name: &str,
        client_names: &[String],
        remotes: Vec<SocketAddr>,
        rng: &mut DeterministicRng,
        rules: RulesConfig,
    ) -> Result<Self, FieldError> {
        let mut spawns = BTreeMap::new();
        spawns.insert(host_name.to_string(), HOST_SPAWN);
        for name in client_names {
            spawns.insert(name.clone(), CLIENT_SPAWN);
        }

        let mut field = Self::from_spawns(map_name, grid, spawns, host_name, remotes, rules)?;
        field.world.hidden_powerups = place_hidden_powerups(&field.world.grid, rng, &field.rules);

        let packet = field.player_list_packet();
        field.send_to_remotes(packet);
        Ok(field)
    }

    /// Build the match from a spawn list (name → spawn id).
    ///
    /// Players are created in spawn order so both peers hand out the same
    /// `PlayerId`s.
    pub fn from_spawns(
        map_name: impl Into<String>,
        grid: TileGrid,
        spawns: BTreeMap<String, u8>,
        local_name: &str,
        remotes: Vec<SocketAddr>,
        rules: RulesConfig,
    ) -> Result<Self, FieldError> {
        if spawns.is_empty() {
            return Err(FieldError::NoPlayers);
        }
        if !spawns.contains_key(local_name) {
            return Err(FieldError::UnknownLocal(local_name.to_string()));
        }

        let mut ordered: Vec<(&String, u8)> =
            spawns.iter().map(|(name, spawn)| (name, *spawn)).collect();
        ordered.sort_by_key(|(name, spawn)| (*spawn, (*name).clone()));

        let mut world = World::new(grid);
        let mut names = BTreeMap::new();
        for (name, spawn) in ordered {
            let tile = spawn_tile(&world.grid, spawn)?;
            let id = world.add_player(name.clone(), tile, &rules);
            names.insert(name.clone(), id);
        }
        let local = names[local_name];

        let map_name = map_name.into();
        info!(map = %map_name, local = %local, players = names.len(), "match started");
        Ok(Self {
            world,
            map_name,
            local,
            spawns,
            names,
            remotes,
            last_update_seq: BTreeMap::new(),
            rules,
            outbox: Vec::new(),
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn local_id(&self) -> PlayerId {
        self.local
    }

    pub fn spawns(&self) -> &BTreeMap<String, u8> {
        &self.spawns
    }

    pub fn player_id(&self, name: &str) -> Option<PlayerId> {
        self.names.get(name).copied()
    }

    pub fn outcome(&self) -> Option<MatchOutcome> {
        self.world.outcome
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    pub fn state_hash(&self) -> StateHash {
        self.world.compute_hash()
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Field `PLAYER_LIST` announcing the spawns.
    pub fn player_list_packet(&self) -> Packet {
        FieldPacket::PlayerList { list: self.spawns.clone() }.into()
    }

    // =========================================================================
    // REMOTE
    // =========================================================================

    /// Mirror a peer's field packet into the local world.
    pub fn apply(&mut self, from: SocketAddr, seq: u32, packet: &FieldPacket, now: Millis) {
        if self.world.is_ended() {
            debug!(%from, seq, "match over, ignoring field packet");
            return;
        }

        match packet {
            FieldPacket::PlayerList { .. } => debug!(%from, "spawn list repeated"),
            FieldPacket::PlayerUpdate { player_name, x, y, direction } => {
                let Some(id) = self.remote_id(player_name) else {
                    return;
                };
                if self.last_update_seq.get(&id).is_some_and(|last| *last >= seq) {
                    debug!(player = %player_name, seq, "stale PLAYER_UPDATE");
                    return;
                }
                let Some(tile) = TilePos::from_pixels(*x, *y) else {
                    warn!(player = %player_name, x, y, "PLAYER_UPDATE off the grid lines");
                    return;
                };
                match self.world.apply_remote_position(id, tile, *direction, now) {
                    Ok(()) => {
                        self.last_update_seq.insert(id, seq);
                    }
                    Err(e) => warn!(player = %player_name, "rejected PLAYER_UPDATE: {}", e),
                }
            }
            FieldPacket::BombUpdate { player_name } => {
                let Some(id) = self.remote_id(player_name) else {
                    return;
                };
                if let Err(e) = place_remote_bomb(&mut self.world, id, now, &self.rules) {
                    warn!(player = %player_name, "rejected BOMB_UPDATE: {}", e);
                }
            }
            FieldPacket::PowerupUpdate { pos, powerup_type } => {
                if !self.world.mirror_reveal(*pos, *powerup_type, now, &self.rules) {
                    warn!(tile = %pos, kind = %powerup_type, "POWERUP_UPDATE on a wall");
                }
            }
        }
    }

    fn remote_id(&self, name: &str) -> Option<PlayerId> {
        match self.names.get(name) {
            Some(id) if *id == self.local => {
                warn!(player = %name, "peer tried to drive the local player");
                None
            }
            Some(id) => Some(*id),
            None => {
                warn!(player = %name, "unknown player in field packet");
                None
            }
        }
    }

    // =========================================================================
    // LOCAL
    // =========================================================================

    /// Run one tick with the local player's intents and queue what the peer
    /// must hear about.
    pub fn update(&mut self, intents: &[Intent], now: Millis) -> TickResult {
        let local = self.local;
        let tagged: Vec<(PlayerId, Intent)> =
            intents.iter().map(|intent| (local, *intent)).collect();
        let result = tick(&mut self.world, &tagged, now, &self.rules);

        let local_name = self.world.player(local).map(|p| p.name.clone()).unwrap_or_default();
        let moves: Vec<Packet> = result
            .moved
            .iter()
            .filter(|(id, _, _)| *id == local)
            .map(|(_, tile, facing)| {
                let (x, y) = tile.to_pixels();
                FieldPacket::PlayerUpdate {
                    player_name: local_name.clone(),
                    x,
                    y,
                    direction: *facing,
                }
                .into()
            })
            .collect();
        let bombs: Vec<Packet> = result
            .bombs_placed
            .iter()
            .filter(|(id, _)| *id == local)
            .map(|_| FieldPacket::BombUpdate { player_name: local_name.clone() }.into())
            .collect();

        // Keep the intent order so the peer drops the bomb on the same cell
        let bomb_first = matches!(
            (
                intents.iter().position(|i| matches!(i, Intent::PlaceBomb)),
                intents.iter().position(|i| matches!(i, Intent::Move(_))),
            ),
            (Some(b), Some(m)) if b < m
        );
        let (first, second) = if bomb_first { (bombs, moves) } else { (moves, bombs) };
        for packet in first.into_iter().chain(second) {
            self.send_to_remotes(packet);
        }

        for (pos, kind) in &result.reveals {
            self.send_to_remotes(FieldPacket::PowerupUpdate { pos: *pos, powerup_type: *kind });
        }

        if let Some(outcome) = result.outcome {
            info!(?outcome, map = %self.map_name, "match ended");
        }
        result
    }

    /// End the match in the local player's favor (the peer left).
    pub fn forfeit(&mut self, now: Millis) -> Option<MatchOutcome> {
        if self.world.is_ended() {
            return self.world.outcome;
        }
        let outcome = MatchOutcome::Winner(self.local);
        info!(winner = %self.local, "peer left, match forfeited");
        self.world.outcome = Some(outcome);
        self.world.push_event(GameEvent::new(now, GameEventData::MatchEnded { outcome }));
        Some(outcome)
    }

    fn send_to_remotes(&mut self, packet: impl Into<Packet>) {
        let packet = packet.into();
        for to in &self.remotes {
            self.outbox.push(Outgoing { to: *to, packet: packet.clone() });
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
