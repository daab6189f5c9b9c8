//! Bomberlan Demo
//!
//! Runs a host and a client in one process over loopback UDP and drives
//! them through lobby → map vote → match with scripted inputs, then has the
//! client leave so the host wins by forfeit.
//!
//! Usage: `bomberlan [config.json]`. Log level comes from `RUST_LOG`.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bomberlan::{
    game::{Direction, GameEventData, Intent},
    network::{discover_local_ip, Codec, DatagramSocket, Peer, Phase, UdpDatagramSocket},
    Millis, MonotonicClock, PeerConfig, TICK_RATE, VERSION,
};

/// How long the scripted match runs before the client walks out.
const MATCH_DEMO_MS: Millis = 8_000;

/// Hard stop for the whole demo.
const DEMO_LIMIT_MS: Millis = 30_000;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => PeerConfig::from_json_file(&path)
            .with_context(|| format!("loading config {}", path))?,
        None => PeerConfig::default(),
    };
    config.validate().context("invalid config")?;

    info!("Bomberlan v{}", VERSION);
    info!("Tick Rate: {} Hz (default {})", config.tick_rate_hz, TICK_RATE);
    info!("LAN address: {} (port {})", discover_local_ip(), config.host_port);

    demo_session(config).await
}

/// Host and client on loopback, scripted end to end.
async fn demo_session(config: PeerConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");

    let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let host_socket = UdpDatagramSocket::bind(loopback).await.context("binding host socket")?;
    let host_addr = host_socket.local_addr().context("reading host address")?;
    let client_socket = UdpDatagramSocket::bind(loopback).await.context("binding client socket")?;

    let nonce = 12345;
    let mut host = Peer::host(host_socket, "hana", nonce, config.clone());
    let mut client = Peer::join(client_socket, "kai", host_addr, config.clone());
    info!("Host listening on {}", host_addr);

    let period = Duration::from_micros(1_000_000 / u64::from(config.tick_rate_hz.max(1)));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let clock = MonotonicClock::start();
    let mut match_started_at: Option<Millis> = None;
    let mut step: u64 = 0;

    loop {
        ticker.tick().await;
        let now = clock.now();
        step += 1;

        // Lobby script
        if host.phase() == Phase::LobbyHost && host.session().roster().len() == 2 {
            if host.session().roster().get("hana").is_some_and(|p| !p.is_ready) {
                host.toggle_ready()?;
            }
            if client.session().roster().get("kai").is_some_and(|p| !p.is_ready) {
                client.toggle_ready()?;
            }
            if host.session().can_start() {
                host.start_map_select()?;
            }
        }

        // Map vote script
        for peer_vote in [(&mut host, "hana", 0u32), (&mut client, "kai", 1u32)] {
            let (peer, name, choice) = peer_vote;
            let session = peer.session();
            let voted = session.roster().get(name).is_some_and(|p| p.vote_index.is_some());
            if session.phase().is_map_select() && !session.map_list().is_empty() && !voted {
                let choice = choice.min(session.map_list().len() as u32 - 1);
                peer.confirm_selection(choice)?;
            }
        }

        // Match script
        let (host_intents, client_intents) = match (host.field(), match_started_at) {
            (Some(_), None) => {
                match_started_at = Some(now);
                info!("=== Match on {} ===", host.session().final_map().unwrap_or("?"));
                (vec![Intent::PlaceBomb], vec![Intent::PlaceBomb])
            }
            (Some(_), Some(_)) => (scripted_walk(step, 0), scripted_walk(step, 2)),
            _ => (Vec::new(), Vec::new()),
        };

        let host_report = host.update(now, &host_intents);
        let client_report = client.update(now, &client_intents);

        for event in host_report.game_events.iter() {
            match &event.data {
                GameEventData::PlayerDamaged { player_id, health, from_trap } => {
                    info!("Player {} hit (health {}, trap: {})", player_id, health, from_trap);
                }
                GameEventData::PowerUpCollected { player_id, kind, .. } => {
                    info!("Player {} picked up {}", player_id, kind);
                }
                GameEventData::MatchEnded { outcome } => info!("Match ended: {:?}", outcome),
                _ => {}
            }
        }
        if let Some(outcome) = client_report.outcome {
            info!("Client saw the match end: {:?}", outcome);
        }

        if let Some(started) = match_started_at {
            let demo_over = now >= started + MATCH_DEMO_MS;
            if demo_over && !client.is_leaving() && client.phase() != Phase::MainMenu {
                report_hashes(&host, &client);
                info!("Client leaving");
                client.leave(now);
            }
        }

        if client.phase() == Phase::MainMenu && host.phase() == Phase::GameOver {
            break;
        }
        if client.phase() == Phase::MainMenu && match_started_at.is_none() {
            warn!("Client dropped out before the match");
            break;
        }
        if now >= DEMO_LIMIT_MS {
            warn!("Demo timed out in phase host={:?} client={:?}", host.phase(), client.phase());
            break;
        }
    }

    info!("=== Session Results ===");
    if let Some(field) = host.field() {
        info!("Outcome: {:?}", field.outcome());
        info!("Final State Hash: {}", hex::encode(field.state_hash()));
    }
    info!(
        "Host pending packets: {}, client pending packets: {}",
        host.transport().pending_count(),
        client.transport().pending_count()
    );
    Ok(())
}

/// Wander in a square, dropping a bomb at each corner.
fn scripted_walk(step: u64, offset: usize) -> Vec<Intent> {
    let leg = (step / 60) as usize;
    if step % 60 == 0 {
        return vec![Intent::PlaceBomb];
    }
    vec![Intent::Move(Direction::ALL[(leg + offset) % Direction::ALL.len()])]
}

fn report_hashes<S, C>(host: &Peer<S, C>, client: &Peer<S, C>)
where
    S: DatagramSocket,
    C: Codec,
{
    let (Some(h), Some(c)) = (host.field(), client.field()) else {
        return;
    };
    let (hh, ch) = (h.state_hash(), c.state_hash());
    if hh == ch {
        info!("Peers converged: {}", hex::encode(hh));
    } else {
        info!(
            "Peers differ (packets in flight): host {} client {}",
            hex::encode(hh),
            hex::encode(ch)
        );
    }
}
