//! # Bomberlan
//!
//! Two-player, peer-to-peer Bomberman-style game core: the tile simulation
//! and the reliable-UDP protocol that walks two peers through
//! lobby → map selection → match → game over.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BOMBERLAN                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Xorshift128+ session RNG           │
//! │  ├── hash.rs     - State hashing for peer convergence        │
//! │  └── time.rs     - Monotonic millisecond clock               │
//! │                                                              │
//! │  game/           - Match simulation (no I/O)                 │
//! │  ├── tiles.rs    - Tile codes, positions, grid               │
//! │  ├── maps.rs     - Built-in map catalog, spawns              │
//! │  ├── player.rs   - Player entity, cooldowns, damage          │
//! │  ├── bomb.rs     - Bombs, blast rays, chain reactions        │
//! │  ├── powerup.rs  - Hidden placement, reveal, effects         │
//! │  ├── world.rs    - Arena of match entities                   │
//! │  └── tick.rs     - Per-tick update order                     │
//! │                                                              │
//! │  network/        - Peer-to-peer protocol                     │
//! │  ├── protocol.rs - Envelope, scopes, typed packets           │
//! │  ├── codec.rs    - Envelope ↔ datagram bytes                 │
//! │  ├── socket.rs   - UDP and in-memory datagram sockets        │
//! │  ├── transport.rs- Seq / ACK / dedup / retry                 │
//! │  ├── session.rs  - Lobby and map-vote state machine          │
//! │  ├── field.rs    - Match packets ↔ world                     │
//! │  └── peer.rs     - Per-tick orchestration                    │
//! │                                                              │
//! │  config.rs       - Transport, rules and peer settings        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! Each peer owns its own player's movement and bomb drops and tells the
//! other about them. Everything else (blasts, brick destruction, damage,
//! pickups) is simulated on both sides from those inputs. Hidden power-ups
//! live only on the host; reveals are announced.
//!
//! The `core/` and `game/` modules take time as an argument and draw
//! randomness from a seeded RNG, so a run is reproducible from its seed
//! and inputs. Maps iterate in a fixed order (`BTreeMap`).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::config::{ConfigError, PeerConfig, RulesConfig, TransportConfig};
pub use crate::core::rng::DeterministicRng;
pub use crate::core::time::{Millis, MonotonicClock};
pub use crate::game::{Intent, MatchOutcome, PlayerId, TileGrid, TilePos, World};
pub use crate::network::{Peer, Phase, ReliableTransport, TickReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tile edge in pixels
pub const GRID_SIZE: i32 = 30;

/// Playfield width in pixels
pub const FIELD_WIDTH: i32 = 960;

/// Playfield height in pixels
pub const FIELD_HEIGHT: i32 = 540;

/// Widest grid that fits the field (32)
pub const MAX_GRID_WIDTH: u32 = (FIELD_WIDTH / GRID_SIZE) as u32;

/// Tallest grid that fits the field (18)
pub const MAX_GRID_HEIGHT: u32 = (FIELD_HEIGHT / GRID_SIZE) as u32;

/// Port the host listens on
pub const DEFAULT_HOST_PORT: u16 = 9999;

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 120;

/// Lobby capacity
pub const MAX_PLAYERS: usize = 2;
