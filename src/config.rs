//! Peer Configuration
//!
//! Typed settings with game defaults. Every struct deserializes with
//! missing fields falling back to `Default`, so a config file only needs the
//! keys it changes.

use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::game::powerup::PowerUpKind;
use crate::{DEFAULT_HOST_PORT, TICK_RATE};

/// Reliable transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Age at which an unACKed packet is resent.
    pub resend_timeout_ms: Millis,
    /// Transmissions after the first before a packet is dropped.
    pub max_tries: u32,
    /// Receive buffer size; larger datagrams are truncated by the OS.
    pub max_datagram: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            resend_timeout_ms: 500,
            max_tries: 5,
            max_datagram: 65_507,
        }
    }
}

/// Game rule constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Bomb fuse after placement.
    pub fuse_ms: Millis,
    /// Explosion lifetime.
    pub explosion_lifetime_ms: Millis,
    /// Visual phase switch inside the lifetime.
    pub explosion_phase_ms: Millis,
    /// Minimum time between two steps.
    pub move_cooldown_ms: Millis,
    /// Cooldown multiplier while frozen.
    pub frozen_cooldown_factor: u64,
    /// Invulnerability after an explosion hit.
    pub iframes_ms: Millis,
    /// Per-player cooldown between trap hits.
    pub trap_cooldown_ms: Millis,
    pub freeze_duration_ms: Millis,
    pub shield_duration_ms: Millis,
    /// How long a revealed power-up stays on the field.
    pub powerup_field_ms: Millis,
    /// Share of bricks hiding a power-up, in percent.
    pub powerup_spawn_percent: u32,
    /// Kinds that may be hidden under bricks.
    pub enabled_powerups: Vec<PowerUpKind>,
    pub start_health: i32,
    pub max_health: i32,
    pub start_bombs: u32,
    pub max_bomb_limit: u32,
    pub start_range: u32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            fuse_ms: 3_000,
            explosion_lifetime_ms: 500,
            explosion_phase_ms: 250,
            move_cooldown_ms: 120,
            frozen_cooldown_factor: 2,
            iframes_ms: 750,
            trap_cooldown_ms: 1_000,
            freeze_duration_ms: 5_000,
            shield_duration_ms: 15_000,
            powerup_field_ms: 30_000,
            powerup_spawn_percent: 40,
            enabled_powerups: PowerUpKind::ALL.to_vec(),
            start_health: 3,
            max_health: 5,
            start_bombs: 1,
            max_bomb_limit: 4,
            start_range: 1,
        }
    }
}

/// Everything a peer needs besides its socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Port the host listens on.
    pub host_port: u16,
    /// Loop frequency of the driving binary.
    pub tick_rate_hz: u32,
    /// Upper bound on the LEAVE handshake.
    pub leave_timeout_ms: Millis,
    pub transport: TransportConfig,
    pub rules: RulesConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host_port: DEFAULT_HOST_PORT,
            tick_rate_hz: TICK_RATE,
            leave_timeout_ms: 3_000,
            transport: TransportConfig::default(),
            rules: RulesConfig::default(),
        }
    }
}

/// Config loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl PeerConfig {
    /// Parse from JSON text and validate.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: PeerConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = &self.rules;
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_rate_hz",
                reason: "must be positive".into(),
            });
        }
        if self.transport.resend_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.resend_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        if rules.start_bombs == 0 || rules.start_bombs > rules.max_bomb_limit {
            return Err(ConfigError::Invalid {
                field: "rules.start_bombs",
                reason: format!("must be in 1..={}", rules.max_bomb_limit),
            });
        }
        if rules.start_range == 0 {
            return Err(ConfigError::Invalid {
                field: "rules.start_range",
                reason: "must be at least 1".into(),
            });
        }
        if rules.start_health <= 0 || rules.start_health > rules.max_health {
            return Err(ConfigError::Invalid {
                field: "rules.start_health",
                reason: format!("must be in 1..={}", rules.max_health),
            });
        }
        if rules.powerup_spawn_percent > 100 {
            return Err(ConfigError::Invalid {
                field: "rules.powerup_spawn_percent",
                reason: "must be at most 100".into(),
            });
        }
        if rules.explosion_phase_ms > rules.explosion_lifetime_ms {
            return Err(ConfigError::Invalid {
                field: "rules.explosion_phase_ms",
                reason: "must not exceed the explosion lifetime".into(),
            });
        }
        Ok(())
    }
}
