//! Protocol Messages
//!
//! Wire format for peer-to-peer traffic over UDP. Every datagram carries one
//! `Envelope`; its `scope` + `type` pick a typed packet, which is decoded
//! from `data`. Decoding *is* validation: a packet that does not decode
//! into its scope's enum is rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::game::input::Facing;
use crate::game::powerup::PowerUpKind;
use crate::game::tiles::TilePos;

/// Envelope type of acknowledgements.
pub const ACK_TYPE: &str = "ACK";

// =============================================================================
// ENVELOPE
// =============================================================================

/// One datagram on the wire.
///
/// `scope` and `data` stay untyped here so that an envelope with a bad
/// payload still decodes far enough to be acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,

    #[serde(rename = "type")]
    pub kind: String,

    pub seq: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// Acknowledgement for `seq`.
    pub fn ack(seq: u32) -> Self {
        Self { scope: None, kind: ACK_TYPE.to_string(), seq, data: None }
    }

    pub fn is_ack(&self) -> bool {
        self.kind == ACK_TYPE
    }

    /// Wrap a typed packet.
    pub fn from_packet(packet: &Packet, seq: u32) -> Result<Self, PacketError> {
        let (kind, data) = packet.split()?;
        Ok(Self {
            scope: Some(Value::String(packet.scope().as_str().to_string())),
            kind,
            seq,
            data: Some(data),
        })
    }
}

// =============================================================================
// SCOPES
// =============================================================================

/// Logical namespace of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    MultiplayerLobby,
    MultiplayerMapSelector,
    MultiplayerTestField,
    InputPopup,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::MultiplayerLobby,
        Scope::MultiplayerMapSelector,
        Scope::MultiplayerTestField,
        Scope::InputPopup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::MultiplayerLobby => "MultiplayerLobby",
            Scope::MultiplayerMapSelector => "MultiplayerMapSelector",
            Scope::MultiplayerTestField => "MultiplayerTestField",
            Scope::InputPopup => "InputPopup",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| PacketError::UnknownScope(s.to_string()))
    }
}

/// Target of a `STATE_CHANGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseName {
    Lobby,
    MapSelect,
    Match,
}

// =============================================================================
// ROSTER RECORD
// =============================================================================

/// Lobby roster entry, as carried in `PLAYER_LIST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub name: String,
    #[serde(default)]
    pub addr: Option<SocketAddr>,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub color_index: u32,
    #[serde(default)]
    pub hat_index: u32,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub selection_index: u32,
    #[serde(default)]
    pub vote_index: Option<u32>,
}

impl PlayerState {
    pub fn new(name: impl Into<String>, addr: Option<SocketAddr>, is_host: bool) -> Self {
        Self {
            name: name.into(),
            addr,
            is_host,
            color_index: 0,
            hat_index: 0,
            is_ready: false,
            selection_index: 0,
            vote_index: None,
        }
    }
}

// =============================================================================
// TYPED PACKETS
// =============================================================================

/// `MultiplayerLobby` packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyPacket {
    Join { player_name: String },
    Leave { player_name: String },
    PlayerList { player_list: BTreeMap<String, PlayerState> },
    ReadyToggle { player_name: String },
    SkinUpdate { player_name: String, color_index: u32, hat_index: u32 },
    SameData { msg: String },
    StateChange { state: PhaseName },
}

/// `MultiplayerMapSelector` packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapSelectorPacket {
    MapSelection { map_list: Vec<String> },
    MoveSelection { player_name: String, new_index: u32 },
    ConfirmSelection { player_name: String, vote_index: u32 },
    CancelSelection { player_name: String },
    FinalMapSelection { final_map: String },
    StateChange { state: PhaseName },
}

/// `MultiplayerTestField` packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldPacket {
    /// Player name → spawn id
    PlayerList { list: BTreeMap<String, u8> },
    /// Grid-aligned pixel position
    PlayerUpdate { player_name: String, x: i32, y: i32, direction: Facing },
    BombUpdate { player_name: String },
    PowerupUpdate {
        #[serde(with = "tile_pos_string")]
        pos: TilePos,
        powerup_type: PowerUpKind,
    },
}

/// `InputPopup` packets, exchanged before the joiner enters the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputPopupPacket {
    Join { player_name: String },
    SameData { msg: String },
}

/// Any application packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Lobby(LobbyPacket),
    MapSelector(MapSelectorPacket),
    Field(FieldPacket),
    InputPopup(InputPopupPacket),
}

impl From<LobbyPacket> for Packet {
    fn from(p: LobbyPacket) -> Self {
        Packet::Lobby(p)
    }
}

impl From<MapSelectorPacket> for Packet {
    fn from(p: MapSelectorPacket) -> Self {
        Packet::MapSelector(p)
    }
}

impl From<FieldPacket> for Packet {
    fn from(p: FieldPacket) -> Self {
        Packet::Field(p)
    }
}

impl From<InputPopupPacket> for Packet {
    fn from(p: InputPopupPacket) -> Self {
        Packet::InputPopup(p)
    }
}

/// Why a packet failed validation.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("missing scope")]
    MissingScope,

    #[error("scope is not a string")]
    ScopeNotString,

    #[error("unknown scope {0:?}")]
    UnknownScope(String),

    #[error("missing data")]
    MissingData,

    #[error("invalid {scope} {kind} payload: {source}")]
    InvalidPayload {
        scope: Scope,
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("empty {field} in {kind}")]
    EmptyField { kind: String, field: &'static str },

    #[error("failed to serialize packet: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl Packet {
    pub fn scope(&self) -> Scope {
        match self {
            Packet::Lobby(_) => Scope::MultiplayerLobby,
            Packet::MapSelector(_) => Scope::MultiplayerMapSelector,
            Packet::Field(_) => Scope::MultiplayerTestField,
            Packet::InputPopup(_) => Scope::InputPopup,
        }
    }

    /// Validate an envelope and decode its payload.
    pub fn decode(envelope: &Envelope) -> Result<Packet, PacketError> {
        let scope = match &envelope.scope {
            None => return Err(PacketError::MissingScope),
            Some(Value::String(s)) => s.parse::<Scope>()?,
            Some(_) => return Err(PacketError::ScopeNotString),
        };
        let data = envelope.data.clone().ok_or(PacketError::MissingData)?;
        let tagged = serde_json::json!({ "type": envelope.kind, "data": data });

        let invalid = |source: serde_json::Error| PacketError::InvalidPayload {
            scope,
            kind: envelope.kind.clone(),
            source,
        };
        let packet = match scope {
            Scope::MultiplayerLobby => {
                Packet::Lobby(serde_json::from_value(tagged).map_err(invalid)?)
            }
            Scope::MultiplayerMapSelector => {
                Packet::MapSelector(serde_json::from_value(tagged).map_err(invalid)?)
            }
            Scope::MultiplayerTestField => {
                Packet::Field(serde_json::from_value(tagged).map_err(invalid)?)
            }
            Scope::InputPopup => {
                Packet::InputPopup(serde_json::from_value(tagged).map_err(invalid)?)
            }
        };
        packet.check_required()?;
        Ok(packet)
    }

    /// Split into the envelope's `type` and `data`.
    pub fn split(&self) -> Result<(String, Value), PacketError> {
        let tagged = match self {
            Packet::Lobby(p) => serde_json::to_value(p),
            Packet::MapSelector(p) => serde_json::to_value(p),
            Packet::Field(p) => serde_json::to_value(p),
            Packet::InputPopup(p) => serde_json::to_value(p),
        }
        .map_err(PacketError::Serialize)?;

        let Value::Object(mut obj) = tagged else {
            return Ok((String::new(), Value::Null));
        };
        let kind = match obj.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => String::new(),
        };
        let data = obj.remove("data").unwrap_or(Value::Null);
        Ok((kind, data))
    }

    /// Envelope `type` of this packet.
    pub fn kind(&self) -> String {
        self.split().map(|(kind, _)| kind).unwrap_or_default()
    }

    /// Reject empty required strings.
    fn check_required(&self) -> Result<(), PacketError> {
        let mut fields: Vec<(&'static str, &str)> = Vec::new();
        match self {
            Packet::Lobby(p) => match p {
                LobbyPacket::Join { player_name }
                | LobbyPacket::Leave { player_name }
                | LobbyPacket::ReadyToggle { player_name }
                | LobbyPacket::SkinUpdate { player_name, .. } => {
                    fields.push(("player_name", player_name.as_str()))
                }
                LobbyPacket::PlayerList { player_list } => {
                    for (name, state) in player_list {
                        fields.push(("player_list key", name.as_str()));
                        fields.push(("name", state.name.as_str()));
                    }
                }
                LobbyPacket::SameData { msg } => fields.push(("msg", msg.as_str())),
                LobbyPacket::StateChange { .. } => {}
            },
            Packet::MapSelector(p) => match p {
                MapSelectorPacket::MapSelection { map_list } => {
                    for name in map_list {
                        fields.push(("map_list entry", name.as_str()));
                    }
                }
                MapSelectorPacket::MoveSelection { player_name, .. }
                | MapSelectorPacket::ConfirmSelection { player_name, .. }
                | MapSelectorPacket::CancelSelection { player_name } => {
                    fields.push(("player_name", player_name.as_str()))
                }
                MapSelectorPacket::FinalMapSelection { final_map } => {
                    fields.push(("final_map", final_map.as_str()))
                }
                MapSelectorPacket::StateChange { .. } => {}
            },
            Packet::Field(p) => match p {
                FieldPacket::PlayerList { list } => {
                    for name in list.keys() {
                        fields.push(("list key", name.as_str()));
                    }
                }
                FieldPacket::PlayerUpdate { player_name, .. }
                | FieldPacket::BombUpdate { player_name } => {
                    fields.push(("player_name", player_name.as_str()))
                }
                FieldPacket::PowerupUpdate { .. } => {}
            },
            Packet::InputPopup(p) => match p {
                InputPopupPacket::Join { player_name } => {
                    fields.push(("player_name", player_name.as_str()))
                }
                InputPopupPacket::SameData { msg } => fields.push(("msg", msg.as_str())),
            },
        }

        match fields.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(PacketError::EmptyField { kind: self.kind(), field }),
            None => Ok(()),
        }
    }
}

/// `TilePos` as its `"x,y"` wire string.
mod tile_pos_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::game::tiles::TilePos;

    pub fn serialize<S: Serializer>(pos: &TilePos, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(pos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TilePos, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(scope: &str, kind: &str, data: Value) -> Envelope {
        Envelope {
            scope: Some(Value::String(scope.to_string())),
            kind: kind.to_string(),
            seq: 1,
            data: Some(data),
        }
    }

    #[test]
    fn test_ack_has_no_scope_or_data() {
        let json = serde_json::to_value(Envelope::ack(7)).unwrap();
        assert_eq!(json, json!({"type": "ACK", "seq": 7}));
    }

    #[test]
    fn test_packet_wire_shape() {
        let packet = Packet::Lobby(LobbyPacket::SkinUpdate {
            player_name: "alice".into(),
            color_index: 2,
            hat_index: 1,
        });
        let env = Envelope::from_packet(&packet, 12).unwrap();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            json!({
                "scope": "MultiplayerLobby",
                "type": "SKIN_UPDATE",
                "seq": 12,
                "data": {"player_name": "alice", "color_index": 2, "hat_index": 1}
            })
        );
        assert_eq!(Packet::decode(&env).unwrap(), packet);
    }

    #[test]
    fn test_every_type_name() {
        let cases: Vec<(Packet, &str)> = vec![
            (LobbyPacket::Join { player_name: "a".into() }.into(), "JOIN"),
            (LobbyPacket::PlayerList { player_list: BTreeMap::new() }.into(), "PLAYER_LIST"),
            (LobbyPacket::ReadyToggle { player_name: "a".into() }.into(), "READY_TOGGLE"),
            (LobbyPacket::SameData { msg: "x".into() }.into(), "SAME_DATA"),
            (LobbyPacket::StateChange { state: PhaseName::MapSelect }.into(), "STATE_CHANGE"),
            (MapSelectorPacket::MapSelection { map_list: vec![] }.into(), "MAP_SELECTION"),
            (
                MapSelectorPacket::FinalMapSelection { final_map: "m".into() }.into(),
                "FINAL_MAP_SELECTION",
            ),
            (FieldPacket::BombUpdate { player_name: "a".into() }.into(), "BOMB_UPDATE"),
            (
                FieldPacket::PowerupUpdate {
                    pos: TilePos::new(1, 2),
                    powerup_type: PowerUpKind::Freeze,
                }
                .into(),
                "POWERUP_UPDATE",
            ),
            (InputPopupPacket::Join { player_name: "a".into() }.into(), "JOIN"),
        ];
        for (packet, kind) in cases {
            assert_eq!(packet.kind(), kind);
        }
    }

    #[test]
    fn test_state_change_payload() {
        let env = envelope("MultiplayerMapSelector", "STATE_CHANGE", json!({"state": "Match"}));
        assert_eq!(
            Packet::decode(&env).unwrap(),
            Packet::MapSelector(MapSelectorPacket::StateChange { state: PhaseName::Match })
        );
    }

    #[test]
    fn test_powerup_pos_is_a_string() {
        let env = envelope(
            "MultiplayerTestField",
            "POWERUP_UPDATE",
            json!({"pos": "3,4", "powerup_type": "speed_powerup"}),
        );
        assert_eq!(
            Packet::decode(&env).unwrap(),
            Packet::Field(FieldPacket::PowerupUpdate {
                pos: TilePos::new(3, 4),
                powerup_type: PowerUpKind::RangeUp,
            })
        );

        let bad = envelope(
            "MultiplayerTestField",
            "POWERUP_UPDATE",
            json!({"pos": "3;4", "powerup_type": "life_powerup"}),
        );
        assert!(matches!(Packet::decode(&bad), Err(PacketError::InvalidPayload { .. })));
    }

    #[test]
    fn test_validation_failures() {
        let mut env = envelope("MultiplayerLobby", "JOIN", json!({"player_name": "a"}));
        env.scope = None;
        assert!(matches!(Packet::decode(&env), Err(PacketError::MissingScope)));

        let env = envelope("Nowhere", "JOIN", json!({"player_name": "a"}));
        assert!(matches!(Packet::decode(&env), Err(PacketError::UnknownScope(_))));

        let mut env = envelope("MultiplayerLobby", "JOIN", json!({}));
        env.data = None;
        assert!(matches!(Packet::decode(&env), Err(PacketError::MissingData)));

        let env = envelope("MultiplayerLobby", "JOIN", json!({"player_name": 5}));
        assert!(matches!(Packet::decode(&env), Err(PacketError::InvalidPayload { .. })));

        let env = envelope("MultiplayerLobby", "JOIN", json!({"player_name": "  "}));
        assert!(matches!(
            Packet::decode(&env),
            Err(PacketError::EmptyField { field: "player_name", .. })
        ));

        let env = envelope("MultiplayerLobby", "BOMB_UPDATE", json!({"player_name": "a"}));
        // Type from another scope
        assert!(matches!(Packet::decode(&env), Err(PacketError::InvalidPayload { .. })));

        // Missing direction
        let env = envelope(
            "MultiplayerTestField",
            "PLAYER_UPDATE",
            json!({"player_name": "a", "x": 30, "y": 30}),
        );
        assert!(matches!(Packet::decode(&env), Err(PacketError::InvalidPayload { .. })));
    }

    #[test]
    fn test_player_state_roundtrip() {
        let mut state = PlayerState::new("bob", Some("192.168.1.20:9999".parse().unwrap()), false);
        state.color_index = 3;
        state.vote_index = Some(1);
        let text = serde_json::to_string(&state).unwrap();
        let back: PlayerState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
        assert_eq!(serde_json::to_string(&back).unwrap(), text);
    }
}
