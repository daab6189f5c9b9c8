//! Peer Orchestrator
//!
//! One `Peer` per process. It owns the transport, the session and, during a
//! match, the field, and advances all of them in a fixed order once per
//! tick:
//!
//! ```text
//! poll until empty → session / field dispatch → match setup
//!   → local tick → flush outboxes → transport.tick → leave check
//! ```
//!
//! `update` never blocks and never fails; problems are logged and surface
//! as state (phase, outcome) on the returned report.

use std::collections::BTreeMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tracing::{debug, error, info, instrument, warn};

use crate::config::PeerConfig;
use crate::core::rng::derive_session_seed;
use crate::core::time::{reached, Millis};
use crate::game::events::GameEvent;
use crate::game::input::Intent;
use crate::game::maps::MapCatalog;
use crate::game::world::MatchOutcome;
use crate::network::codec::{Codec, JsonCodec};
use crate::network::field::MatchField;
use crate::network::protocol::{FieldPacket, Packet};
use crate::network::session::{Outgoing, Phase, Session, SessionConfig, SessionError, SessionEvent};
use crate::network::socket::{DatagramSocket, UdpDatagramSocket};
use crate::network::transport::{Received, ReliableTransport};

/// Field packets kept while the client waits for its match to be built.
const EARLY_FIELD_LIMIT: usize = 256;

/// What happened during one `Peer::update`.
#[derive(Debug)]
pub struct TickReport {
    /// Phase after the update
    pub phase: Phase,
    /// Packets handed to the application
    pub received: usize,
    pub session_events: Vec<SessionEvent>,
    pub game_events: Vec<GameEvent>,
    /// Set on the update the match ends
    pub outcome: Option<MatchOutcome>,
    /// Outgoing packets the transport refused
    pub send_errors: usize,
}

/// Outstanding LEAVE handshake.
#[derive(Debug)]
struct Leaving {
    seqs: Vec<(SocketAddr, u32)>,
    started_at: Millis,
}

/// A host or client process.
pub struct Peer<S, C = JsonCodec> {
    transport: ReliableTransport<S, C>,
    session: Session,
    field: Option<MatchField>,
    config: PeerConfig,
    /// Client: field PLAYER_LIST from the host
    spawn_list: Option<BTreeMap<String, u8>>,
    /// Client: field packets that beat the spawn list
    early_field: Vec<Received>,
    leaving: Option<Leaving>,
}

impl<S: DatagramSocket> Peer<S, JsonCodec> {
    /// Open a lobby on `socket`.
    ///
    /// The session RNG is seeded from the host name and `nonce`, so the
    /// same pair replays the same map draw and power-up layout.
    #[instrument(skip(socket, config))]
    pub fn host(socket: S, name: &str, nonce: u64, config: PeerConfig) -> Self {
        let seed = derive_session_seed(name, nonce);
        let session = Session::host(name, seed, MapCatalog::builtin(), SessionConfig::default());
        let transport = ReliableTransport::new(socket, config.transport.clone());
        Self::from_parts(transport, session, config)
    }

    /// Ask the host at `host_addr` to let us in.
    #[instrument(skip(socket, config))]
    pub fn join(socket: S, name: &str, host_addr: SocketAddr, config: PeerConfig) -> Self {
        let session =
            Session::join(name, host_addr, MapCatalog::builtin(), SessionConfig::default());
        let transport = ReliableTransport::new(socket, config.transport.clone());
        Self::from_parts(transport, session, config)
    }
}

impl Peer<UdpDatagramSocket, JsonCodec> {
    /// Host over UDP on `config.host_port`, all interfaces.
    #[instrument(skip(config))]
    pub async fn host_udp(name: &str, nonce: u64, config: PeerConfig) -> io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.host_port));
        let socket = UdpDatagramSocket::bind(addr).await?;
        Ok(Self::host(socket, name, nonce, config))
    }

    /// Join over UDP from an ephemeral port.
    #[instrument(skip(config))]
    pub async fn join_udp(
        name: &str,
        host_addr: SocketAddr,
        config: PeerConfig,
    ) -> io::Result<Self> {
        let socket = UdpDatagramSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        Ok(Self::join(socket, name, host_addr, config))
    }
}

impl<S: DatagramSocket, C: Codec> Peer<S, C> {
    /// Assemble a peer from an existing transport and session.
    pub fn from_parts(
        transport: ReliableTransport<S, C>,
        session: Session,
        config: PeerConfig,
    ) -> Self {
        Self {
            transport,
            session,
            field: None,
            config,
            spawn_list: None,
            early_field: Vec::new(),
            leaving: None,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn field(&self) -> Option<&MatchField> {
        self.field.as_ref()
    }

    pub fn transport(&self) -> &ReliableTransport<S, C> {
        &self.transport
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving.is_some()
    }

    // =========================================================================
    // LOCAL ACTIONS
    // =========================================================================
    //
    // Packets are queued and go out on the next `update`.

    pub fn toggle_ready(&mut self) -> Result<(), SessionError> {
        self.session.toggle_ready()
    }

    pub fn set_skin(&mut self, color_index: u32, hat_index: u32) -> Result<(), SessionError> {
        self.session.set_skin(color_index, hat_index)
    }

    pub fn start_map_select(&mut self) -> Result<(), SessionError> {
        self.session.start_map_select()
    }

    pub fn move_selection(&mut self, index: u32) -> Result<(), SessionError> {
        self.session.move_selection(index)
    }

    pub fn confirm_selection(&mut self, index: u32) -> Result<(), SessionError> {
        self.session.confirm_selection(index)
    }

    pub fn cancel_selection(&mut self) -> Result<(), SessionError> {
        self.session.cancel_selection()
    }

    pub fn return_to_lobby(&mut self) -> Result<(), SessionError> {
        self.session.return_to_lobby()?;
        self.clear_match();
        Ok(())
    }

    /// Announce our departure. The peer reaches `MainMenu` once every LEAVE
    /// is acknowledged or given up on, or after `leave_timeout_ms`.
    pub fn leave(&mut self, now: Millis) {
        if self.leaving.is_some() || self.session.phase() == Phase::MainMenu {
            return;
        }
        let packet = self.session.leave_packet();
        let mut seqs = Vec::new();
        for addr in self.session.remote_addrs() {
            match self.transport.send(addr, &packet, now) {
                Ok(seq) => seqs.push((addr, seq)),
                Err(e) => warn!(%addr, "failed to send LEAVE: {}", e),
            }
        }
        info!(peers = seqs.len(), "leaving session");
        self.leaving = Some(Leaving { seqs, started_at: now });
        self.check_leave(now);
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance everything by one tick. `intents` are the local player's.
    pub fn update(&mut self, now: Millis, intents: &[Intent]) -> TickReport {
        let mut report = TickReport {
            phase: self.session.phase(),
            received: 0,
            session_events: Vec::new(),
            game_events: Vec::new(),
            outcome: None,
            send_errors: 0,
        };

        // 1. Drain the socket
        while let Some(received) = self.transport.poll(now) {
            report.received += 1;
            self.dispatch(received, now);
        }

        // 2. React to session changes
        let session_events = self.session.take_events();
        for event in &session_events {
            self.on_session_event(event, now);
        }
        report.session_events = session_events;
        self.ensure_match(now);

        // 3. Local simulation
        if self.session.phase() == Phase::Match {
            if let Some(field) = self.field.as_mut() {
                let result = field.update(intents, now);
                report.game_events = result.events;
                if let Some(outcome) = result.outcome {
                    report.outcome = Some(outcome);
                    self.session.set_phase(Phase::GameOver);
                }
            }
        }

        // 4. Flush
        report.send_errors += self.flush(now);

        // 5. Retries
        self.transport.tick(now);

        // 6. Leave handshake
        self.check_leave(now);

        report.session_events.extend(self.session.take_events());
        report.phase = self.session.phase();
        report
    }

    fn dispatch(&mut self, received: Received, now: Millis) {
        if self.session.phase() == Phase::MainMenu {
            debug!(from = %received.addr, "session closed, ignoring packet");
            return;
        }

        let Packet::Field(packet) = &received.packet else {
            let was_member = self.session.remote_addrs().contains(&received.addr);
            self.session.handle(&received);
            if was_member && !self.session.remote_addrs().contains(&received.addr) {
                // Nothing we still owe a departed peer is worth retrying
                self.transport.forget_peer(received.addr);
            }
            return;
        };

        if !self.session.remote_addrs().contains(&received.addr) {
            warn!(from = %received.addr, "field packet from outside the session");
            return;
        }

        if let Some(field) = self.field.as_mut() {
            field.apply(received.addr, received.seq, packet, now);
            return;
        }

        match packet {
            FieldPacket::PlayerList { list } if !self.session.is_host() => {
                debug!(players = list.len(), "spawn list received");
                self.spawn_list = Some(list.clone());
            }
            _ if self.early_field.len() < EARLY_FIELD_LIMIT => self.early_field.push(received),
            _ => warn!(from = %received.addr, "field packet before match setup, buffer full"),
        }
    }

    fn on_session_event(&mut self, event: &SessionEvent, now: Millis) {
        match event {
            SessionEvent::PeerLeft { name } => {
                if self.session.phase() == Phase::Match {
                    if let Some(field) = self.field.as_mut() {
                        info!(player = %name, "peer left mid-match");
                        field.forfeit(now);
                        self.session.set_phase(Phase::GameOver);
                    }
                }
                if self.session.phase() == Phase::MainMenu {
                    self.clear_match();
                }
            }
            SessionEvent::PhaseChanged { to, .. } if to.is_lobby() || to.is_map_select() => {
                self.clear_match()
            }
            SessionEvent::PhaseChanged { to: Phase::MainMenu, .. } => self.clear_match(),
            _ => {}
        }
    }

    /// Build the match once everything it needs is known.
    fn ensure_match(&mut self, now: Millis) {
        if self.field.is_some() || self.session.phase() != Phase::Match {
            return;
        }
        let Some(map_name) = self.session.final_map().map(str::to_string) else {
            return;
        };
        let grid = match self.session.catalog().load(&map_name) {
            Ok(grid) => grid,
            Err(e) => {
                error!(map = %map_name, "cannot load final map: {}", e);
                return;
            }
        };
        let remotes = self.session.remote_addrs();
        let rules = self.config.rules.clone();
        let local_name = self.session.local_name().to_string();

        let built = if self.session.is_host() {
            let clients: Vec<String> = self
                .session
                .roster()
                .values()
                .filter(|p| !p.is_host)
                .map(|p| p.name.clone())
                .collect();
            let rng = self.session.rng_mut();
            MatchField::host(map_name, grid, &local_name, &clients, remotes, rng, rules)
        } else {
            let Some(spawns) = self.spawn_list.clone() else {
                return;
            };
            MatchField::from_spawns(map_name, grid, spawns, &local_name, remotes, rules)
        };

        match built {
            Ok(mut field) => {
                for early in std::mem::take(&mut self.early_field) {
                    if let Packet::Field(packet) = &early.packet {
                        field.apply(early.addr, early.seq, packet, now);
                    }
                }
                self.field = Some(field);
            }
            Err(e) => error!("match setup failed: {}", e),
        }
    }

    fn clear_match(&mut self) {
        if self.field.take().is_some() {
            debug!("match state dropped");
        }
        self.spawn_list = None;
        self.early_field.clear();
    }

    /// Send everything queued. Returns the number of failed sends.
    fn flush(&mut self, now: Millis) -> usize {
        let mut outgoing: Vec<Outgoing> = self.session.take_outbox();
        if let Some(field) = self.field.as_mut() {
            outgoing.extend(field.take_outbox());
        }

        let mut failed = 0;
        for Outgoing { to, packet } in outgoing {
            if let Err(e) = self.transport.send(to, &packet, now) {
                warn!(%to, kind = %packet.kind(), "send failed: {}", e);
                failed += 1;
            }
        }
        failed
    }

    fn check_leave(&mut self, now: Millis) {
        let Some(leaving) = &self.leaving else {
            return;
        };
        let settled = leaving
            .seqs
            .iter()
            .all(|(addr, seq)| {
                self.transport.completed(*addr, *seq) || self.transport.is_dropped(*seq)
            });
        let timed_out = reached(now, leaving.started_at + self.config.leave_timeout_ms);
        if settled || timed_out {
            if !settled {
                warn!("LEAVE not acknowledged in time");
            }
            self.leaving = None;
            self.clear_match();
            self.session.set_phase(Phase::MainMenu);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
