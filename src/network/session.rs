//! Session State Machine
//!
//! Lobby and map selection for one host and one client. The host owns the
//! roster, the map draw and every phase transition; the client mirrors what
//! the host broadcasts and only ever asks.
//!
//! The session performs no I/O. Outgoing packets are queued in an outbox
//! that the peer flushes through the transport.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::core::rng::DeterministicRng;
use crate::game::maps::MapCatalog;
use crate::network::protocol::{
    InputPopupPacket, LobbyPacket, MapSelectorPacket, Packet, PhaseName, PlayerState,
};
use crate::network::transport::Received;
use crate::MAX_PLAYERS;

/// Which side of the session this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Host waiting for a joiner and ready flags.
    LobbyHost,
    /// Client in (or joining) the host's lobby.
    LobbyClient,
    /// Host running the map vote.
    MapSelectHost,
    /// Client voting.
    MapSelectClient,
    /// Match running.
    Match,
    /// Match decided, waiting for the host to return to the lobby.
    GameOver,
    /// Session over for this peer.
    MainMenu,
}

impl Phase {
    pub fn is_lobby(self) -> bool {
        matches!(self, Phase::LobbyHost | Phase::LobbyClient)
    }

    pub fn is_map_select(self) -> bool {
        matches!(self, Phase::MapSelectHost | Phase::MapSelectClient)
    }
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Roster capacity.
    pub capacity: usize,
    /// Maps offered in the vote.
    pub map_choices: usize,
    /// Number of distinct player colors.
    pub colors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_PLAYERS,
            map_choices: 3,
            colors: 8,
        }
    }
}

/// A packet the session wants sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: SocketAddr,
    pub packet: Packet,
}

/// Something the UI or the peer should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    RosterChanged,
    PhaseChanged { from: Phase, to: Phase },
    /// Our JOIN was refused.
    Rejected { msg: String },
    MapOptions(Vec<String>),
    FinalMap(String),
    PeerLeft { name: String },
}

/// Local actions the session refuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Only the host may do this.
    #[error("Only the host can do that")]
    NotHost,

    /// Action does not fit the current phase.
    #[error("Not allowed in phase {0:?}")]
    WrongPhase(Phase),

    /// Roster not full or someone not ready.
    #[error("Players not ready")]
    PlayersNotReady,

    /// Another player wears that color.
    #[error("Color {0} is taken")]
    ColorTaken(u32),

    /// Map index outside the offered list.
    #[error("Map index {index} out of range ({len} maps)")]
    IndexOutOfRange { index: u32, len: usize },

    /// Catalog had nothing to offer.
    #[error("No maps available")]
    NoMaps,

    /// Local player missing from the roster.
    #[error("Player not found")]
    PlayerNotFound,
}

/// Lobby and map-selection state for one peer.
#[derive(Debug)]
pub struct Session {
    role: Role,
    phase: Phase,
    local_name: String,
    /// Client only
    host_addr: Option<SocketAddr>,
    roster: BTreeMap<String, PlayerState>,
    map_list: Vec<String>,
    final_map: Option<String>,
    catalog: MapCatalog,
    /// Host only: map draw, tie-breaks, hidden power-ups
    rng: DeterministicRng,
    config: SessionConfig,
    outbox: Vec<Outgoing>,
    events: Vec<SessionEvent>,
}

impl Session {
    /// Open a lobby as host.
    pub fn host(
        name: impl Into<String>,
        seed: u64,
        catalog: MapCatalog,
        config: SessionConfig,
    ) -> Self {
        let name = name.into();
        let mut roster = BTreeMap::new();
        roster.insert(name.clone(), PlayerState::new(name.clone(), None, true));
        info!(host = %name, seed, "lobby opened");
        Self {
            role: Role::Host,
            phase: Phase::LobbyHost,
            local_name: name,
            host_addr: None,
            roster,
            map_list: Vec::new(),
            final_map: None,
            catalog,
            rng: DeterministicRng::new(seed),
            config,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Ask to join the lobby at `host_addr`.
    pub fn join(
        name: impl Into<String>,
        host_addr: SocketAddr,
        catalog: MapCatalog,
        config: SessionConfig,
    ) -> Self {
        let name = name.into();
        let mut session = Self {
            role: Role::Client,
            phase: Phase::LobbyClient,
            local_name: name.clone(),
            host_addr: Some(host_addr),
            roster: BTreeMap::new(),
            map_list: Vec::new(),
            final_map: None,
            catalog,
            rng: DeterministicRng::default(),
            config,
            outbox: Vec::new(),
            events: Vec::new(),
        };
        session.push_out(host_addr, InputPopupPacket::Join { player_name: name });
        info!(host = %host_addr, "joining lobby");
        session
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn host_addr(&self) -> Option<SocketAddr> {
        self.host_addr
    }

    pub fn roster(&self) -> &BTreeMap<String, PlayerState> {
        &self.roster
    }

    /// Whether the host has accepted us (always true on the host).
    pub fn has_joined(&self) -> bool {
        self.roster.contains_key(&self.local_name)
    }

    pub fn map_list(&self) -> &[String] {
        &self.map_list
    }

    pub fn final_map(&self) -> Option<&str> {
        self.final_map.as_deref()
    }

    pub fn catalog(&self) -> &MapCatalog {
        &self.catalog
    }

    /// Host RNG, for match setup.
    pub fn rng_mut(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// Name of the host player.
    pub fn host_name(&self) -> Option<&str> {
        self.roster.values().find(|p| p.is_host).map(|p| p.name.as_str())
    }

    /// Addresses of every other peer.
    pub fn remote_addrs(&self) -> Vec<SocketAddr> {
        match self.role {
            Role::Host => self.roster.values().filter_map(|p| p.addr).collect(),
            Role::Client => self.host_addr.into_iter().collect(),
        }
    }

    /// Roster full and everyone ready.
    pub fn can_start(&self) -> bool {
        self.roster.len() == self.config.capacity && self.roster.values().all(|p| p.is_ready)
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // LOCAL ACTIONS
    // =========================================================================

    /// Flip the local ready flag.
    pub fn toggle_ready(&mut self) -> Result<(), SessionError> {
        self.require(self.phase.is_lobby())?;
        let me = self.roster.get_mut(&self.local_name).ok_or(SessionError::PlayerNotFound)?;
        me.is_ready = !me.is_ready;
        self.events.push(SessionEvent::RosterChanged);

        match self.role {
            Role::Host => self.broadcast_roster(),
            Role::Client => {
                let packet = LobbyPacket::ReadyToggle { player_name: self.local_name.clone() };
                self.send_to_remotes(packet);
            }
        }
        Ok(())
    }

    /// Change the local color and hat.
    pub fn set_skin(&mut self, color_index: u32, hat_index: u32) -> Result<(), SessionError> {
        self.require(self.phase.is_lobby())?;
        if self.color_taken(color_index, &self.local_name) {
            return Err(SessionError::ColorTaken(color_index));
        }
        let me = self.roster.get_mut(&self.local_name).ok_or(SessionError::PlayerNotFound)?;
        me.color_index = color_index;
        me.hat_index = hat_index;
        self.events.push(SessionEvent::RosterChanged);

        match self.role {
            Role::Host => self.broadcast_roster(),
            Role::Client => {
                let packet = LobbyPacket::SkinUpdate {
                    player_name: self.local_name.clone(),
                    color_index,
                    hat_index,
                };
                self.send_to_remotes(packet);
            }
        }
        Ok(())
    }

    /// Host: leave the lobby for the map vote.
    pub fn start_map_select(&mut self) -> Result<(), SessionError> {
        if !self.is_host() {
            return Err(SessionError::NotHost);
        }
        self.require(self.phase == Phase::LobbyHost)?;
        if !self.can_start() {
            return Err(SessionError::PlayersNotReady);
        }

        let names = self.catalog.names();
        let map_list = self.rng.sample(&names, self.config.map_choices);
        if map_list.is_empty() {
            return Err(SessionError::NoMaps);
        }
        info!(maps = ?map_list, "map selection started");

        for player in self.roster.values_mut() {
            player.selection_index = 0;
            player.vote_index = None;
        }
        self.map_list = map_list.clone();
        self.final_map = None;
        self.set_phase(Phase::MapSelectHost);

        self.send_to_remotes(LobbyPacket::StateChange { state: PhaseName::MapSelect });
        self.send_to_remotes(MapSelectorPacket::MapSelection { map_list: map_list.clone() });
        self.events.push(SessionEvent::MapOptions(map_list));
        Ok(())
    }

    /// Move the local highlight.
    pub fn move_selection(&mut self, index: u32) -> Result<(), SessionError> {
        self.require(self.phase.is_map_select())?;
        self.check_index(index)?;
        let me = self.roster.get_mut(&self.local_name).ok_or(SessionError::PlayerNotFound)?;
        me.selection_index = index;
        let packet = MapSelectorPacket::MoveSelection {
            player_name: self.local_name.clone(),
            new_index: index,
        };
        self.send_to_remotes(packet);
        Ok(())
    }

    /// Vote for a map.
    pub fn confirm_selection(&mut self, index: u32) -> Result<(), SessionError> {
        self.require(self.phase.is_map_select())?;
        self.check_index(index)?;
        let me = self.roster.get_mut(&self.local_name).ok_or(SessionError::PlayerNotFound)?;
        me.vote_index = Some(index);
        let packet = MapSelectorPacket::ConfirmSelection {
            player_name: self.local_name.clone(),
            vote_index: index,
        };
        self.send_to_remotes(packet);
        self.try_finalize_vote();
        Ok(())
    }

    /// Withdraw the local vote.
    pub fn cancel_selection(&mut self) -> Result<(), SessionError> {
        self.require(self.phase.is_map_select())?;
        let me = self.roster.get_mut(&self.local_name).ok_or(SessionError::PlayerNotFound)?;
        me.vote_index = None;
        let packet = MapSelectorPacket::CancelSelection { player_name: self.local_name.clone() };
        self.send_to_remotes(packet);
        Ok(())
    }

    /// Host: back to the lobby after a match.
    pub fn return_to_lobby(&mut self) -> Result<(), SessionError> {
        if !self.is_host() {
            return Err(SessionError::NotHost);
        }
        self.require(matches!(self.phase, Phase::GameOver | Phase::Match))?;
        self.reset_to_lobby();
        self.send_to_remotes(LobbyPacket::StateChange { state: PhaseName::Lobby });
        self.broadcast_roster();
        Ok(())
    }

    /// The packet announcing our departure.
    pub fn leave_packet(&self) -> Packet {
        LobbyPacket::Leave { player_name: self.local_name.clone() }.into()
    }

    /// Local transition not negotiated with the peer (game over, main menu).
    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!(from = ?self.phase, to = ?phase, "phase change");
            self.events.push(SessionEvent::PhaseChanged { from: self.phase, to: phase });
            self.phase = phase;
        }
    }

    // =========================================================================
    // INCOMING
    // =========================================================================

    /// Apply a packet from the peer. Field packets are not handled here.
    pub fn handle(&mut self, received: &Received) {
        let from = received.addr;
        match &received.packet {
            Packet::InputPopup(InputPopupPacket::Join { player_name }) => {
                self.handle_join(from, player_name, true);
            }
            Packet::InputPopup(InputPopupPacket::SameData { msg }) => {
                self.handle_rejection(from, msg)
            }
            Packet::Lobby(packet) => self.handle_lobby(from, packet),
            Packet::MapSelector(packet) => self.handle_map_selector(from, packet),
            Packet::Field(_) => debug!(%from, "field packet outside the match layer"),
        }
    }

    fn handle_lobby(&mut self, from: SocketAddr, packet: &LobbyPacket) {
        match packet {
            LobbyPacket::Join { player_name } => self.handle_join(from, player_name, false),
            LobbyPacket::Leave { player_name } => self.handle_leave(from, player_name),
            LobbyPacket::PlayerList { player_list } => {
                if !self.from_host(from) {
                    return;
                }
                let was_joined = self.has_joined();
                self.roster = player_list.clone();
                if !was_joined && self.has_joined() {
                    info!(players = self.roster.len(), "joined lobby");
                }
                self.events.push(SessionEvent::RosterChanged);
            }
            LobbyPacket::ReadyToggle { player_name } => {
                if !self.is_host() || !self.sender_owns(from, player_name) {
                    warn!(%from, player = %player_name, "ignoring READY_TOGGLE");
                    return;
                }
                if let Some(player) = self.roster.get_mut(player_name) {
                    player.is_ready = !player.is_ready;
                }
                self.events.push(SessionEvent::RosterChanged);
                self.broadcast_roster();
            }
            LobbyPacket::SkinUpdate { player_name, color_index, hat_index } => {
                if !self.is_host() || !self.sender_owns(from, player_name) {
                    warn!(%from, player = %player_name, "ignoring SKIN_UPDATE");
                    return;
                }
                let color_free = !self.color_taken(*color_index, player_name);
                if let Some(player) = self.roster.get_mut(player_name) {
                    if color_free {
                        player.color_index = *color_index;
                    } else {
                        warn!(player = %player_name, color = color_index, "color taken");
                    }
                    player.hat_index = *hat_index;
                }
                self.events.push(SessionEvent::RosterChanged);
                self.broadcast_roster();
            }
            LobbyPacket::SameData { msg } => self.handle_rejection(from, msg),
            LobbyPacket::StateChange { state } => self.handle_state_change(from, *state),
        }
    }

    fn handle_map_selector(&mut self, from: SocketAddr, packet: &MapSelectorPacket) {
        match packet {
            MapSelectorPacket::MapSelection { map_list } => {
                if !self.from_host(from) {
                    return;
                }
                self.map_list = map_list.clone();
                self.events.push(SessionEvent::MapOptions(map_list.clone()));
            }
            MapSelectorPacket::MoveSelection { player_name, new_index } => {
                if !self.sender_owns(from, player_name) {
                    warn!(%from, player = %player_name, "ignoring MOVE_SELECTION");
                    return;
                }
                if let Some(player) = self.roster.get_mut(player_name) {
                    player.selection_index = *new_index;
                }
            }
            MapSelectorPacket::ConfirmSelection { player_name, vote_index } => {
                if !self.sender_owns(from, player_name) {
                    warn!(%from, player = %player_name, "ignoring CONFIRM_SELECTION");
                    return;
                }
                if !self.map_list.is_empty() && *vote_index as usize >= self.map_list.len() {
                    warn!(player = %player_name, vote = vote_index, "vote out of range");
                    return;
                }
                if let Some(player) = self.roster.get_mut(player_name) {
                    player.vote_index = Some(*vote_index);
                }
                self.try_finalize_vote();
            }
            MapSelectorPacket::CancelSelection { player_name } => {
                if !self.sender_owns(from, player_name) {
                    warn!(%from, player = %player_name, "ignoring CANCEL_SELECTION");
                    return;
                }
                if let Some(player) = self.roster.get_mut(player_name) {
                    player.vote_index = None;
                }
            }
            MapSelectorPacket::FinalMapSelection { final_map } => {
                if !self.from_host(from) {
                    return;
                }
                if self.catalog.get(final_map).is_none() {
                    warn!(map = %final_map, "final map not in catalog");
                    return;
                }
                info!(map = %final_map, "final map chosen");
                self.final_map = Some(final_map.clone());
                self.events.push(SessionEvent::FinalMap(final_map.clone()));
            }
            MapSelectorPacket::StateChange { state } => self.handle_state_change(from, *state),
        }
    }

    fn handle_join(&mut self, from: SocketAddr, name: &str, via_popup: bool) {
        if !self.is_host() {
            warn!(%from, "JOIN sent to a client");
            return;
        }
        let reject = |session: &mut Self, msg: &str| {
            warn!(%from, player = %name, reason = msg, "join rejected");
            let msg = msg.to_string();
            if via_popup {
                session.push_out(from, InputPopupPacket::SameData { msg });
            } else {
                session.push_out(from, LobbyPacket::SameData { msg });
            }
        };

        if let Some(existing) = self.roster.get(name) {
            if existing.addr == Some(from) {
                // Same peer asking again; just repeat the roster
                let packet = LobbyPacket::PlayerList { player_list: self.roster.clone() };
                self.push_out(from, packet);
            } else {
                reject(self, "name already taken");
            }
            return;
        }
        if self.phase != Phase::LobbyHost {
            reject(self, "match already in progress");
            return;
        }
        if self.roster.len() >= self.config.capacity {
            reject(self, "lobby is full");
            return;
        }

        let mut player = PlayerState::new(name, Some(from), false);
        player.color_index = self.free_color();
        info!(%from, player = %name, color = player.color_index, "player joined");
        self.roster.insert(name.to_string(), player);
        self.events.push(SessionEvent::RosterChanged);
        self.broadcast_roster();
    }

    fn handle_leave(&mut self, from: SocketAddr, name: &str) {
        match self.role {
            Role::Host => {
                if !self.sender_owns(from, name) {
                    warn!(%from, player = %name, "ignoring LEAVE");
                    return;
                }
                self.roster.remove(name);
                info!(player = %name, "player left");
                self.events.push(SessionEvent::PeerLeft { name: name.to_string() });
                self.events.push(SessionEvent::RosterChanged);

                if self.phase == Phase::MapSelectHost {
                    self.reset_to_lobby();
                }
                self.broadcast_roster();
            }
            Role::Client => {
                if !self.from_host(from) {
                    return;
                }
                info!(player = %name, "host left");
                self.events.push(SessionEvent::PeerLeft { name: name.to_string() });
                self.set_phase(Phase::MainMenu);
            }
        }
    }

    fn handle_rejection(&mut self, from: SocketAddr, msg: &str) {
        if !self.from_host(from) {
            return;
        }
        warn!(reason = %msg, "host refused us");
        self.events.push(SessionEvent::Rejected { msg: msg.to_string() });
        self.set_phase(Phase::MainMenu);
    }

    fn handle_state_change(&mut self, from: SocketAddr, state: PhaseName) {
        if !self.from_host(from) {
            return;
        }
        match state {
            PhaseName::Lobby => {
                self.map_list.clear();
                self.final_map = None;
                self.set_phase(Phase::LobbyClient);
            }
            PhaseName::MapSelect => self.set_phase(Phase::MapSelectClient),
            PhaseName::Match => self.set_phase(Phase::Match),
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Host: once every player voted, pick the map and start the match.
    fn try_finalize_vote(&mut self) {
        let voting = self.role == Role::Host && self.phase == Phase::MapSelectHost;
        if !voting || self.map_list.is_empty() {
            return;
        }
        if self.roster.values().any(|p| p.vote_index.is_none()) {
            return;
        }

        let mut counts = vec![0u32; self.map_list.len()];
        for vote in self.roster.values().filter_map(|p| p.vote_index) {
            if let Some(count) = counts.get_mut(vote as usize) {
                *count += 1;
            }
        }
        let best = counts.iter().copied().max().unwrap_or(0);
        let tied: Vec<usize> = (0..counts.len()).filter(|i| counts[*i] == best).collect();
        let Some(winner) = self.rng.choose(&tied).copied() else {
            return;
        };
        let final_map = self.map_list[winner].clone();
        info!(map = %final_map, votes = ?counts, "map vote decided");

        self.final_map = Some(final_map.clone());
        self.send_to_remotes(MapSelectorPacket::FinalMapSelection { final_map: final_map.clone() });
        self.send_to_remotes(MapSelectorPacket::StateChange { state: PhaseName::Match });
        self.events.push(SessionEvent::FinalMap(final_map));
        self.set_phase(Phase::Match);
    }

    fn reset_to_lobby(&mut self) {
        for player in self.roster.values_mut() {
            player.is_ready = false;
            player.selection_index = 0;
            player.vote_index = None;
        }
        self.map_list.clear();
        self.final_map = None;
        let lobby = match self.role {
            Role::Host => Phase::LobbyHost,
            Role::Client => Phase::LobbyClient,
        };
        self.set_phase(lobby);
    }

    fn require(&self, ok: bool) -> Result<(), SessionError> {
        if ok {
            Ok(())
        } else {
            Err(SessionError::WrongPhase(self.phase))
        }
    }

    fn check_index(&self, index: u32) -> Result<(), SessionError> {
        if (index as usize) < self.map_list.len() {
            Ok(())
        } else {
            Err(SessionError::IndexOutOfRange { index, len: self.map_list.len() })
        }
    }

    fn color_taken(&self, color: u32, except: &str) -> bool {
        self.roster.values().any(|p| p.name != except && p.color_index == color)
    }

    fn free_color(&self) -> u32 {
        (0..self.config.colors)
            .find(|c| !self.roster.values().any(|p| p.color_index == *c))
            .unwrap_or(0)
    }

    /// Client side: packet came from our host.
    fn from_host(&self, from: SocketAddr) -> bool {
        let ok = self.role == Role::Client && self.host_addr == Some(from);
        if !ok {
            warn!(%from, "ignoring host-only packet");
        }
        ok
    }

    /// Whether `from` may speak for `name`.
    fn sender_owns(&self, from: SocketAddr, name: &str) -> bool {
        match (self.role, self.roster.get(name)) {
            (Role::Host, Some(player)) => player.addr == Some(from),
            (Role::Client, Some(player)) => player.is_host && self.host_addr == Some(from),
            (_, None) => false,
        }
    }

    fn broadcast_roster(&mut self) {
        if self.role != Role::Host {
            return;
        }
        let packet = LobbyPacket::PlayerList { player_list: self.roster.clone() };
        self.send_to_remotes(packet);
    }

    fn send_to_remotes(&mut self, packet: impl Into<Packet>) {
        let packet = packet.into();
        for to in self.remote_addrs() {
            self.outbox.push(Outgoing { to, packet: packet.clone() });
        }
    }

    fn push_out(&mut self, to: SocketAddr, packet: impl Into<Packet>) {
        self.outbox.push(Outgoing { to, packet: packet.into() });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    const HOST: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999);
    const CLIENT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000);
    const OTHER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5001);

    /// Hand everything `from` queued for `to_addr` to `to`.
    fn deliver(from: &mut Session, from_addr: SocketAddr, to: &mut Session, to_addr: SocketAddr) {
        let outbox = from.take_outbox();
        for (seq, out) in outbox.into_iter().enumerate() {
            if out.to == to_addr {
                to.handle(&Received { addr: from_addr, seq: seq as u32 + 1, packet: out.packet });
            }
        }
    }

    fn lobby() -> (Session, Session) {
        let mut host = Session::host("hana", 42, MapCatalog::builtin(), SessionConfig::default());
        let mut client =
            Session::join("kai", HOST, MapCatalog::builtin(), SessionConfig::default());
        deliver(&mut client, CLIENT, &mut host, HOST);
        deliver(&mut host, HOST, &mut client, CLIENT);
        (host, client)
    }

    fn both_ready(host: &mut Session, client: &mut Session) {
        host.toggle_ready().unwrap();
        deliver(host, HOST, client, CLIENT);
        client.toggle_ready().unwrap();
        deliver(client, CLIENT, host, HOST);
        deliver(host, HOST, client, CLIENT);
    }

    #[test]
    fn test_join_assigns_free_color() {
        let (host, client) = lobby();
        assert_eq!(host.roster().len(), 2);
        assert!(client.has_joined());
        assert_eq!(client.roster(), host.roster());
        assert_eq!(host.roster()["hana"].color_index, 0);
        assert_eq!(host.roster()["kai"].color_index, 1);
        assert_eq!(host.roster()["kai"].addr, Some(CLIENT));
        assert_eq!(client.host_name(), Some("hana"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut host = Session::host("hana", 1, MapCatalog::builtin(), SessionConfig::default());
        let mut client =
            Session::join("hana", HOST, MapCatalog::builtin(), SessionConfig::default());
        deliver(&mut client, CLIENT, &mut host, HOST);

        let out = host.take_outbox();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].packet, Packet::InputPopup(InputPopupPacket::SameData { .. })));
        assert_eq!(host.roster().len(), 1);

        client.handle(&Received { addr: HOST, seq: 1, packet: out[0].packet.clone() });
        assert_eq!(client.phase(), Phase::MainMenu);
        assert!(client
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Rejected { .. })));
    }

    #[test]
    fn test_full_lobby_rejects_third() {
        let (mut host, _client) = lobby();
        host.take_outbox();
        host.handle(&Received {
            addr: OTHER,
            seq: 1,
            packet: LobbyPacket::Join { player_name: "mio".into() }.into(),
        });

        let out = host.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, OTHER);
        assert_eq!(
            out[0].packet,
            Packet::Lobby(LobbyPacket::SameData { msg: "lobby is full".into() })
        );
        assert_eq!(host.roster().len(), 2);
    }

    #[test]
    fn test_ready_and_start() {
        let (mut host, mut client) = lobby();
        assert!(!host.can_start());
        assert_eq!(host.start_map_select(), Err(SessionError::PlayersNotReady));

        both_ready(&mut host, &mut client);
        assert!(host.can_start());
        assert!(client.roster().values().all(|p| p.is_ready));

        assert_eq!(client.start_map_select(), Err(SessionError::NotHost));
        host.start_map_select().unwrap();
        assert_eq!(host.phase(), Phase::MapSelectHost);
        assert_eq!(host.map_list().len(), 3);

        deliver(&mut host, HOST, &mut client, CLIENT);
        assert_eq!(client.phase(), Phase::MapSelectClient);
        assert_eq!(client.map_list(), host.map_list());
    }

    #[test]
    fn test_skin_update_merges() {
        let (mut host, mut client) = lobby();
        client.set_skin(5, 2).unwrap();
        deliver(&mut client, CLIENT, &mut host, HOST);
        assert_eq!(host.roster()["kai"].color_index, 5);
        assert_eq!(host.roster()["kai"].hat_index, 2);

        assert_eq!(host.set_skin(5, 0), Err(SessionError::ColorTaken(5)));
    }

    #[test]
    fn test_vote_decides_map() {
        let (mut host, mut client) = lobby();
        both_ready(&mut host, &mut client);
        host.start_map_select().unwrap();
        deliver(&mut host, HOST, &mut client, CLIENT);

        client.move_selection(2).unwrap();
        client.confirm_selection(2).unwrap();
        deliver(&mut client, CLIENT, &mut host, HOST);
        assert_eq!(host.roster()["kai"].selection_index, 2);
        assert_eq!(host.phase(), Phase::MapSelectHost, "host has not voted");

        host.confirm_selection(2).unwrap();
        assert_eq!(host.phase(), Phase::Match);
        let expected = host.map_list()[2].clone();
        assert_eq!(host.final_map(), Some(expected.as_str()));

        deliver(&mut host, HOST, &mut client, CLIENT);
        assert_eq!(client.phase(), Phase::Match);
        assert_eq!(client.final_map(), Some(expected.as_str()));
    }

    #[test]
    fn test_tie_break_picks_a_voted_map() {
        let (mut host, mut client) = lobby();
        both_ready(&mut host, &mut client);
        host.start_map_select().unwrap();
        deliver(&mut host, HOST, &mut client, CLIENT);

        client.confirm_selection(0).unwrap();
        deliver(&mut client, CLIENT, &mut host, HOST);
        host.confirm_selection(1).unwrap();

        let chosen = host.final_map().unwrap().to_string();
        assert!(chosen == host.map_list()[0] || chosen == host.map_list()[1]);
    }

    #[test]
    fn test_cancel_withdraws_vote() {
        let (mut host, mut client) = lobby();
        both_ready(&mut host, &mut client);
        host.start_map_select().unwrap();
        deliver(&mut host, HOST, &mut client, CLIENT);

        client.confirm_selection(1).unwrap();
        client.cancel_selection().unwrap();
        deliver(&mut client, CLIENT, &mut host, HOST);
        host.confirm_selection(1).unwrap();
        assert_eq!(host.phase(), Phase::MapSelectHost);
        assert_eq!(
            client.confirm_selection(7),
            Err(SessionError::IndexOutOfRange { index: 7, len: 3 })
        );
    }

    #[test]
    fn test_client_leave_during_map_select_returns_host_to_lobby() {
        let (mut host, mut client) = lobby();
        both_ready(&mut host, &mut client);
        host.start_map_select().unwrap();
        host.take_outbox();

        let leave = client.leave_packet();
        host.handle(&Received { addr: CLIENT, seq: 50, packet: leave });
        assert_eq!(host.phase(), Phase::LobbyHost);
        assert_eq!(host.roster().len(), 1);
        assert!(!host.roster()["hana"].is_ready);
    }

    #[test]
    fn test_host_leave_ends_client_session() {
        let (host, mut client) = lobby();
        client.handle(&Received { addr: HOST, seq: 9, packet: host.leave_packet() });
        assert_eq!(client.phase(), Phase::MainMenu);
    }

    #[test]
    fn test_client_ignores_strangers() {
        let (_host, mut client) = lobby();
        client.handle(&Received {
            addr: OTHER,
            seq: 1,
            packet: LobbyPacket::StateChange { state: PhaseName::Match }.into(),
        });
        assert_eq!(client.phase(), Phase::LobbyClient);
    }

    #[test]
    fn test_return_to_lobby() {
        let (mut host, mut client) = lobby();
        both_ready(&mut host, &mut client);
        host.start_map_select().unwrap();
        deliver(&mut host, HOST, &mut client, CLIENT);
        host.confirm_selection(0).unwrap();
        client.confirm_selection(0).unwrap();
        deliver(&mut client, CLIENT, &mut host, HOST);
        deliver(&mut host, HOST, &mut client, CLIENT);
        host.set_phase(Phase::GameOver);
        client.set_phase(Phase::GameOver);

        host.return_to_lobby().unwrap();
        deliver(&mut host, HOST, &mut client, CLIENT);
        assert_eq!(host.phase(), Phase::LobbyHost);
        assert_eq!(client.phase(), Phase::LobbyClient);
        assert!(client.final_map().is_none());
        assert!(client.roster().values().all(|p| !p.is_ready));
    }
}
